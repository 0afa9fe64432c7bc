use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info_span};

use crate::error::DispatchError;
use crate::instance::{Instance, InstanceSelector};
use crate::metrics::{DispatchMetrics, DispatchMetricsSnapshot};
use crate::observe::{DispatchContext, DispatchObserver};
use crate::request::Request;
use crate::response::Response;
use crate::rewrite::{rewrite, service_name};
use crate::transform::{RequestTransformer, TransformerChain};
use crate::transport::{RequestExecutor, Transport};
use crate::util::redact_uri_for_logs;

/// A request bound to the pipeline that will run it, handed to an
/// [`InstanceSelector`] so it can be applied to whichever instance it picks.
pub struct DispatchRequest<'a> {
    service: &'a str,
    request: &'a Request,
    pipeline: &'a DispatchPipeline,
    record_selection: bool,
}

impl<'a> DispatchRequest<'a> {
    pub(crate) fn new(
        service: &'a str,
        request: &'a Request,
        pipeline: &'a DispatchPipeline,
    ) -> Self {
        Self {
            service,
            request,
            pipeline,
            record_selection: true,
        }
    }

    /// One attempt of a retrying dispatch; selection was already recorded by
    /// the caller.
    pub(crate) fn attempt(
        service: &'a str,
        request: &'a Request,
        pipeline: &'a DispatchPipeline,
    ) -> Self {
        Self {
            record_selection: false,
            ..Self::new(service, request, pipeline)
        }
    }

    pub fn service(&self) -> &str {
        self.service
    }

    pub fn request(&self) -> &Request {
        self.request
    }

    /// Rewrites the request for `instance`, runs the transformer chain and
    /// executes it.
    pub fn apply(&self, instance: &Instance) -> Result<Response, DispatchError> {
        let pipeline = self.pipeline;
        if !self.record_selection {
            return pipeline.execute_on(self.request, instance);
        }
        pipeline.metrics.record_instance_selection();
        if !pipeline.observers.is_empty() {
            let context = DispatchContext::new(
                self.service.to_owned(),
                self.request.method().clone(),
                redact_uri_for_logs(&self.request.uri().to_string()),
                0,
                1,
            );
            pipeline.notify_instance_selected(&context, instance);
        }
        pipeline.execute_on(self.request, instance)
    }
}

pub struct DispatchPipelineBuilder {
    selector: Arc<dyn InstanceSelector>,
    transport: Arc<dyn Transport>,
    transformers: Vec<Arc<dyn RequestTransformer>>,
    observers: Vec<Arc<dyn DispatchObserver>>,
}

impl DispatchPipelineBuilder {
    fn new(selector: Arc<dyn InstanceSelector>, transport: Arc<dyn Transport>) -> Self {
        Self {
            selector,
            transport,
            transformers: Vec::new(),
            observers: Vec::new(),
        }
    }

    pub fn transformer<T>(mut self, transformer: T) -> Self
    where
        T: RequestTransformer + 'static,
    {
        self.transformers.push(Arc::new(transformer));
        self
    }

    pub fn transformers<I>(mut self, transformers: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn RequestTransformer>>,
    {
        self.transformers.extend(transformers);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn DispatchObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn build(self) -> DispatchPipeline {
        DispatchPipeline {
            selector: self.selector,
            transformers: TransformerChain::new(self.transformers),
            executor: RequestExecutor::new(self.transport),
            observers: self.observers.into(),
            metrics: DispatchMetrics::default(),
        }
    }
}

/// Resolves the logical service in a request, lets the selector pick an
/// instance and runs the request against it once.
#[derive(Clone)]
pub struct DispatchPipeline {
    pub(crate) selector: Arc<dyn InstanceSelector>,
    transformers: TransformerChain,
    executor: RequestExecutor,
    pub(crate) observers: Arc<[Arc<dyn DispatchObserver>]>,
    pub(crate) metrics: DispatchMetrics,
}

impl std::fmt::Debug for DispatchPipeline {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("DispatchPipeline")
            .field("transformers", &self.transformers)
            .field("observers", &self.observers.len())
            .finish_non_exhaustive()
    }
}

impl DispatchPipeline {
    pub fn builder(
        selector: Arc<dyn InstanceSelector>,
        transport: Arc<dyn Transport>,
    ) -> DispatchPipelineBuilder {
        DispatchPipelineBuilder::new(selector, transport)
    }

    pub fn transformers(&self) -> &TransformerChain {
        &self.transformers
    }

    pub fn metrics_snapshot(&self) -> DispatchMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn dispatch(&self, request: Request) -> Result<Response, DispatchError> {
        let started_at = Instant::now();
        self.metrics.record_dispatch_started();
        let _in_flight = self.metrics.enter_in_flight();

        let service = match service_name(&request) {
            Ok(service) => service.to_owned(),
            Err(error) => {
                self.metrics
                    .record_dispatch_completed(Err(&error), started_at.elapsed());
                return Err(error);
            }
        };
        let redacted_uri = redact_uri_for_logs(&request.uri().to_string());
        let span = info_span!(
            "svc_dispatch.dispatch",
            service = %service,
            method = %request.method(),
            uri = %redacted_uri,
        );
        let _enter = span.enter();

        let context = DispatchContext::new(
            service.clone(),
            request.method().clone(),
            redacted_uri,
            0,
            0,
        );
        self.notify_dispatch_start(&context);
        debug!("dispatching request");

        let dispatch_request = DispatchRequest::new(&service, &request, self);
        let result = self.selector.execute(&service, dispatch_request);
        debug!(succeeded = result.is_ok(), "dispatch finished");

        self.metrics
            .record_dispatch_completed(result.as_ref(), started_at.elapsed());
        self.notify_dispatch_complete(&context, result.as_ref());
        result
    }

    /// Rewrite, transform and execute `request` against `instance`, exactly once.
    pub(crate) fn execute_on(
        &self,
        request: &Request,
        instance: &Instance,
    ) -> Result<Response, DispatchError> {
        self.metrics.record_execution_attempt();
        let rewritten = rewrite(request, instance)?;
        let transformed = self.transformers.apply(rewritten, instance);
        let started_at = Instant::now();
        let result = self.executor.execute(transformed, instance);
        if let Ok(response) = &result {
            debug!(
                instance = instance.id(),
                status = response.status().as_u16(),
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                "instance responded"
            );
        }
        result
    }

    pub(crate) fn notify_dispatch_start(&self, context: &DispatchContext) {
        for observer in self.observers.iter() {
            observer.on_dispatch_start(context);
        }
    }

    pub(crate) fn notify_instance_selected(&self, context: &DispatchContext, instance: &Instance) {
        for observer in self.observers.iter() {
            observer.on_instance_selected(context, instance);
        }
    }

    pub(crate) fn notify_dispatch_complete(
        &self,
        context: &DispatchContext,
        outcome: Result<&Response, &DispatchError>,
    ) {
        for observer in self.observers.iter() {
            observer.on_dispatch_complete(context, outcome);
        }
    }
}
