use std::sync::Arc;

use http::header::HeaderValue;

use crate::instance::Instance;
use crate::request::Request;

pub const X_FORWARDED_HOST: &str = "x-forwarded-host";
pub const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Hook that may rewrite a request once an instance has been chosen.
///
/// A transformer sees only the request produced by its predecessor. Whatever
/// it returns is passed on as-is; keeping the body and headers intact is the
/// transformer's responsibility.
pub trait RequestTransformer: Send + Sync {
    fn transform(&self, request: Request, instance: &Instance) -> Request;
}

impl<F> RequestTransformer for F
where
    F: Fn(Request, &Instance) -> Request + Send + Sync,
{
    fn transform(&self, request: Request, instance: &Instance) -> Request {
        self(request, instance)
    }
}

/// Transformers applied in registration order.
#[derive(Clone, Default)]
pub struct TransformerChain {
    transformers: Arc<[Arc<dyn RequestTransformer>]>,
}

impl std::fmt::Debug for TransformerChain {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("TransformerChain")
            .field("len", &self.transformers.len())
            .finish()
    }
}

impl TransformerChain {
    pub fn new<I>(transformers: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn RequestTransformer>>,
    {
        Self {
            transformers: transformers.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.transformers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transformers.is_empty()
    }

    pub fn apply(&self, request: Request, instance: &Instance) -> Request {
        self.transformers
            .iter()
            .fold(request, |request, transformer| {
                transformer.transform(request, instance)
            })
    }
}

/// Adds `x-forwarded-host` (the logical service) and `x-forwarded-proto`
/// (the outgoing scheme) to each request.
#[derive(Clone, Copy, Debug)]
pub struct ForwardedHeadersTransformer {
    forward_host: bool,
    forward_proto: bool,
}

impl ForwardedHeadersTransformer {
    pub const fn new() -> Self {
        Self {
            forward_host: true,
            forward_proto: true,
        }
    }

    pub const fn forward_host(mut self, enabled: bool) -> Self {
        self.forward_host = enabled;
        self
    }

    pub const fn forward_proto(mut self, enabled: bool) -> Self {
        self.forward_proto = enabled;
        self
    }
}

impl Default for ForwardedHeadersTransformer {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestTransformer for ForwardedHeadersTransformer {
    fn transform(&self, mut request: Request, instance: &Instance) -> Request {
        if self.forward_host
            && let Ok(value) = HeaderValue::from_str(instance.service_id())
        {
            request = request.header(http::header::HeaderName::from_static(X_FORWARDED_HOST), value);
        }
        if self.forward_proto
            && let Some(scheme) = request.uri().scheme_str()
            && let Ok(value) = HeaderValue::from_str(scheme)
        {
            request = request.header(http::header::HeaderName::from_static(X_FORWARDED_PROTO), value);
        }
        request
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use http::header::HeaderValue;

    use super::{
        ForwardedHeadersTransformer, RequestTransformer, TransformerChain, X_FORWARDED_HOST,
        X_FORWARDED_PROTO,
    };
    use crate::instance::Instance;
    use crate::request::Request;

    fn marker(value: &'static str) -> Arc<dyn RequestTransformer> {
        Arc::new(move |request: Request, _instance: &Instance| {
            request.header(
                http::header::HeaderName::from_static("x-marker"),
                HeaderValue::from_static(value),
            )
        })
    }

    fn markers(request: &Request) -> Vec<String> {
        request
            .headers()
            .get_all("x-marker")
            .iter()
            .map(|value| value.to_str().expect("ascii header").to_owned())
            .collect()
    }

    #[test]
    fn chain_runs_in_registration_order() {
        let chain = TransformerChain::new([marker("t1"), marker("t2")]);
        let instance = Instance::new("orders", "10.0.0.7", 8080);
        let request = Request::get("http://10.0.0.7:8080/").expect("request should build");

        let transformed = chain.apply(request, &instance);
        assert_eq!(markers(&transformed), vec!["t1", "t2"]);
    }

    #[test]
    fn empty_chain_is_identity() {
        let chain = TransformerChain::default();
        let instance = Instance::new("orders", "10.0.0.7", 8080);
        let request = Request::get("http://10.0.0.7:8080/items")
            .and_then(|request| request.try_header("accept", "application/json"))
            .map(|request| request.with_body("payload"))
            .expect("request should build");

        assert!(chain.is_empty());
        assert_eq!(chain.apply(request.clone(), &instance), request);
    }

    #[test]
    fn transformer_output_is_passed_through_unchecked() {
        let drop_body: Arc<dyn RequestTransformer> =
            Arc::new(|request: Request, _instance: &Instance| request.with_body(""));
        let chain = TransformerChain::new([drop_body]);
        let instance = Instance::new("orders", "10.0.0.7", 8080);
        let request = Request::post("http://10.0.0.7:8080/items")
            .map(|request| request.with_body("payload"))
            .expect("request should build");

        assert!(chain.apply(request, &instance).body().is_empty());
    }

    #[test]
    fn forwarded_headers_name_service_and_scheme() {
        let instance = Instance::new("orders", "10.0.0.7", 8443).secure(true);
        let request = Request::get("https://10.0.0.7:8443/items").expect("request should build");

        let transformed = ForwardedHeadersTransformer::new().transform(request, &instance);
        assert_eq!(
            transformed.headers().get(X_FORWARDED_HOST),
            Some(&HeaderValue::from_static("orders"))
        );
        assert_eq!(
            transformed.headers().get(X_FORWARDED_PROTO),
            Some(&HeaderValue::from_static("https"))
        );
    }

    #[test]
    fn forwarded_headers_can_be_disabled_individually() {
        let instance = Instance::new("orders", "10.0.0.7", 8080);
        let request = Request::get("http://10.0.0.7:8080/items").expect("request should build");

        let transformed = ForwardedHeadersTransformer::new()
            .forward_proto(false)
            .transform(request, &instance);
        assert!(transformed.headers().contains_key(X_FORWARDED_HOST));
        assert!(!transformed.headers().contains_key(X_FORWARDED_PROTO));
    }
}
