use std::sync::Arc;
use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime};

use http::Method;
use tracing::{debug, info_span, warn};

use crate::dispatch::{DispatchPipeline, DispatchRequest};
use crate::error::{DispatchError, DispatchFailure};
use crate::instance::Instance;
use crate::metrics::DispatchMetricsSnapshot;
use crate::observe::DispatchContext;
use crate::request::Request;
use crate::response::Response;
use crate::retry::{
    BackoffSource, PolicyBackoffSource, RetryDecision, RetryEligibility, RetryPolicy,
    StrictRetryEligibility,
};
use crate::rewrite::service_name;
use crate::util::{
    bounded_retry_delay, deadline_exceeded_error, parse_retry_after, redact_uri_for_logs,
};

/// Per-call bookkeeping for one retrying dispatch.
#[derive(Debug)]
struct RetryContext {
    method: Method,
    started_at: Instant,
    selection_attempts: usize,
    same_instance_attempts: usize,
    execution_attempts: usize,
    last_failure: Option<DispatchError>,
}

impl RetryContext {
    fn new(method: Method) -> Self {
        Self {
            method,
            started_at: Instant::now(),
            selection_attempts: 0,
            same_instance_attempts: 0,
            execution_attempts: 0,
            last_failure: None,
        }
    }

    fn begin_selection(&mut self) {
        self.selection_attempts += 1;
        self.same_instance_attempts = 0;
    }

    fn begin_execution(&mut self) {
        self.same_instance_attempts += 1;
        self.execution_attempts += 1;
    }

    fn dispatch_context(&self, service: &str, uri: &str) -> DispatchContext {
        DispatchContext::new(
            service.to_owned(),
            self.method.clone(),
            uri.to_owned(),
            self.execution_attempts,
            self.selection_attempts,
        )
    }
}

enum AttemptOutcome {
    Success(Response),
    Retryable {
        error: DispatchError,
        decision: RetryDecision,
        retry_after: Option<Duration>,
    },
    Fatal(DispatchError),
}

// Without a total timeout nothing else bounds a server-supplied delay.
fn capped_retry_after(retry_after: Duration, policy: &RetryPolicy) -> Duration {
    if policy.configured_total_timeout().is_some() {
        retry_after
    } else {
        retry_after.min(policy.configured_max_backoff())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RetryStep {
    SameInstance,
    NextInstance,
    GiveUp,
}

fn next_step(context: &RetryContext, policy: &RetryPolicy) -> RetryStep {
    if context.same_instance_attempts < policy.configured_max_attempts_per_instance() {
        RetryStep::SameInstance
    } else if context.selection_attempts < policy.configured_max_selection_attempts() {
        RetryStep::NextInstance
    } else {
        RetryStep::GiveUp
    }
}

/// [`DispatchPipeline`] with bounded retries on the same instance and across
/// instances.
///
/// Requests the configured [`RetryEligibility`] rejects (by default every
/// non-idempotent method) run exactly once unless the policy opts in with
/// [`RetryPolicy::retry_non_idempotent`].
#[derive(Clone)]
pub struct RetryDispatchPipeline {
    pipeline: DispatchPipeline,
    retry_policy: RetryPolicy,
    retry_eligibility: Arc<dyn RetryEligibility>,
    backoff_source: Arc<dyn BackoffSource>,
}

impl std::fmt::Debug for RetryDispatchPipeline {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RetryDispatchPipeline")
            .field("pipeline", &self.pipeline)
            .field("retry_policy", &self.retry_policy)
            .finish_non_exhaustive()
    }
}

impl RetryDispatchPipeline {
    pub fn new(pipeline: DispatchPipeline) -> Self {
        Self {
            pipeline,
            retry_policy: RetryPolicy::standard(),
            retry_eligibility: Arc::new(StrictRetryEligibility),
            backoff_source: Arc::new(PolicyBackoffSource),
        }
    }

    pub fn retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn retry_eligibility(mut self, retry_eligibility: Arc<dyn RetryEligibility>) -> Self {
        self.retry_eligibility = retry_eligibility;
        self
    }

    pub fn backoff_source(mut self, backoff_source: Arc<dyn BackoffSource>) -> Self {
        self.backoff_source = backoff_source;
        self
    }

    pub fn pipeline(&self) -> &DispatchPipeline {
        &self.pipeline
    }

    pub fn metrics_snapshot(&self) -> DispatchMetricsSnapshot {
        self.pipeline.metrics_snapshot()
    }

    pub fn dispatch(&self, request: Request) -> Result<Response, DispatchFailure> {
        self.dispatch_with_policy(request, &self.retry_policy)
    }

    pub fn dispatch_with_policy(
        &self,
        request: Request,
        policy: &RetryPolicy,
    ) -> Result<Response, DispatchFailure> {
        let metrics = &self.pipeline.metrics;
        metrics.record_dispatch_started();
        let _in_flight = metrics.enter_in_flight();
        let mut context = RetryContext::new(request.method().clone());

        let service = match service_name(&request) {
            Ok(service) => service.to_owned(),
            Err(error) => {
                metrics.record_dispatch_completed(Err(&error), context.started_at.elapsed());
                return Err(DispatchFailure::new(error, 0, 0));
            }
        };
        let redacted_uri = redact_uri_for_logs(&request.uri().to_string());
        let retry_permitted = policy.permits_non_idempotent()
            || self
                .retry_eligibility
                .supports_retry(request.method(), request.headers());

        let span = info_span!(
            "svc_dispatch.dispatch",
            service = %service,
            method = %context.method,
            uri = %redacted_uri,
            retry_permitted,
        );
        let _enter = span.enter();
        self.pipeline
            .notify_dispatch_start(&context.dispatch_context(&service, &redacted_uri));
        debug!("dispatching request");

        let result = self.run(
            &service,
            &redacted_uri,
            &request,
            policy,
            retry_permitted,
            &mut context,
        );

        debug!(
            succeeded = result.is_ok(),
            attempts = context.execution_attempts,
            selections = context.selection_attempts,
            "dispatch finished"
        );
        metrics.record_dispatch_completed(result.as_ref(), context.started_at.elapsed());
        self.pipeline.notify_dispatch_complete(
            &context.dispatch_context(&service, &redacted_uri),
            result.as_ref(),
        );
        result.map_err(|error| {
            DispatchFailure::new(error, context.execution_attempts, context.selection_attempts)
        })
    }

    fn run(
        &self,
        service: &str,
        redacted_uri: &str,
        request: &Request,
        policy: &RetryPolicy,
        retry_permitted: bool,
        context: &mut RetryContext,
    ) -> Result<Response, DispatchError> {
        loop {
            if context.selection_attempts >= policy.configured_max_selection_attempts() {
                return Err(context.last_failure.take().unwrap_or_else(|| {
                    DispatchError::NoInstanceAvailable {
                        service: service.to_owned(),
                    }
                }));
            }

            context.begin_selection();
            self.pipeline.metrics.record_instance_selection();
            let Some(instance) = self.pipeline.selector.choose(service) else {
                let error = DispatchError::NoInstanceAvailable {
                    service: service.to_owned(),
                };
                if context.selection_attempts >= policy.configured_max_selection_attempts() {
                    return Err(error);
                }
                let backoff = self
                    .backoff_source
                    .backoff_for_retry(policy, context.selection_attempts);
                let Some(delay) = bounded_retry_delay(
                    backoff,
                    policy.configured_total_timeout(),
                    context.started_at,
                ) else {
                    return Err(deadline_exceeded_error(
                        policy.configured_total_timeout(),
                        &context.method,
                        redacted_uri,
                        error,
                    ));
                };
                debug!(
                    service,
                    delay_ms = delay.as_millis() as u64,
                    "no instance available; selecting again"
                );
                self.pipeline.metrics.record_next_instance_retry();
                context.last_failure = Some(error);
                if !delay.is_zero() {
                    sleep(delay);
                }
                continue;
            };

            self.pipeline.notify_instance_selected(
                &context.dispatch_context(service, redacted_uri),
                &instance,
            );

            loop {
                context.begin_execution();
                let span = info_span!(
                    "svc_dispatch.attempt",
                    service = %service,
                    instance = %instance.id(),
                    method = %context.method,
                    uri = %redacted_uri,
                    attempt = context.execution_attempts,
                    instance_attempt = context.same_instance_attempts,
                    selection = context.selection_attempts,
                );
                let _enter = span.enter();
                debug!("sending request");

                let result = self.pipeline.selector.execute_on(
                    service,
                    &instance,
                    DispatchRequest::attempt(service, request, &self.pipeline),
                );
                let (error, decision, retry_after) =
                    match self.classify(result, policy, context, &instance, redacted_uri) {
                        AttemptOutcome::Success(response) => return Ok(response),
                        AttemptOutcome::Fatal(error) => return Err(error),
                        AttemptOutcome::Retryable {
                            error,
                            decision,
                            retry_after,
                        } => (error, decision, retry_after),
                    };

                if !retry_permitted {
                    debug!(error = %error, "retry not permitted for request method");
                    return Err(error);
                }

                let step = next_step(context, policy);
                if step == RetryStep::GiveUp {
                    return Err(error);
                }

                let backoff = match retry_after {
                    Some(retry_after) if step == RetryStep::SameInstance => {
                        capped_retry_after(retry_after, policy)
                    }
                    _ => self
                        .backoff_source
                        .backoff_for_retry(policy, context.execution_attempts),
                };
                let Some(delay) = bounded_retry_delay(
                    backoff,
                    policy.configured_total_timeout(),
                    context.started_at,
                ) else {
                    return Err(deadline_exceeded_error(
                        policy.configured_total_timeout(),
                        &context.method,
                        redacted_uri,
                        error,
                    ));
                };
                warn!(
                    delay_ms = delay.as_millis() as u64,
                    same_instance = step == RetryStep::SameInstance,
                    error = %error,
                    "retrying dispatch"
                );
                for observer in self.pipeline.observers.iter() {
                    observer.on_retry_scheduled(
                        &context.dispatch_context(service, redacted_uri),
                        &decision,
                        delay,
                    );
                }
                if !delay.is_zero() {
                    sleep(delay);
                }

                match step {
                    RetryStep::SameInstance => {
                        self.pipeline.metrics.record_same_instance_retry();
                    }
                    RetryStep::NextInstance | RetryStep::GiveUp => {
                        self.pipeline.metrics.record_next_instance_retry();
                        context.last_failure = Some(error);
                        break;
                    }
                }
            }
        }
    }

    fn classify(
        &self,
        result: Result<Response, DispatchError>,
        policy: &RetryPolicy,
        context: &RetryContext,
        instance: &Instance,
        redacted_uri: &str,
    ) -> AttemptOutcome {
        let decision = |status, transport_error_kind, timeout| RetryDecision {
            service: instance.service_id().to_owned(),
            instance_id: instance.id().to_owned(),
            method: context.method.clone(),
            uri: redacted_uri.to_owned(),
            execution_attempt: context.execution_attempts,
            same_instance_attempt: context.same_instance_attempts,
            selection_attempt: context.selection_attempts,
            status,
            transport_error_kind,
            timeout,
        };

        match result {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return AttemptOutcome::Success(response);
                }
                let decision = decision(Some(status), None, false);
                if !policy.should_retry_decision(&decision) {
                    return AttemptOutcome::Success(response);
                }
                let retry_after = parse_retry_after(response.headers(), SystemTime::now());
                AttemptOutcome::Retryable {
                    error: DispatchError::RetryableStatus {
                        status,
                        service: instance.service_id().to_owned(),
                        instance_id: instance.id().to_owned(),
                        method: context.method.clone(),
                        uri: redacted_uri.to_owned(),
                        response: Box::new(response),
                    },
                    decision,
                    retry_after,
                }
            }
            Err(error) => {
                let decision = match &error {
                    DispatchError::Transport { kind, .. } => decision(None, Some(*kind), false),
                    DispatchError::Timeout { .. } => decision(None, None, true),
                    _ => return AttemptOutcome::Fatal(error),
                };
                if policy.should_retry_decision(&decision) {
                    AttemptOutcome::Retryable {
                        error,
                        decision,
                        retry_after: None,
                    }
                } else {
                    AttemptOutcome::Fatal(error)
                }
            }
        }
    }

}
