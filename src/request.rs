use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, Uri};

use crate::error::DispatchError;
use crate::util::{parse_header_name, parse_header_value};
use crate::{DispatchResult, IDEMPOTENCY_KEY_HEADER};

/// Outbound request addressed to a logical service.
///
/// Before dispatch the host component of `uri` names the service
/// (`http://orders/v1/items`); after rewriting it names a concrete instance.
/// Values are immutable: every `with_*` method returns a new request.
#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
}

/// Method, target and headers of a request, as handed to a [`Transport`](crate::Transport).
#[derive(Clone, Debug)]
pub struct RequestHead {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
}

impl Request {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn parse(method: Method, uri: &str) -> DispatchResult<Self> {
        let uri = uri.parse().map_err(|_| DispatchError::InvalidUri {
            uri: uri.to_owned(),
        })?;
        Ok(Self::new(method, uri))
    }

    pub fn get(uri: &str) -> DispatchResult<Self> {
        Self::parse(Method::GET, uri)
    }

    pub fn post(uri: &str) -> DispatchResult<Self> {
        Self::parse(Method::POST, uri)
    }

    pub fn put(uri: &str) -> DispatchResult<Self> {
        Self::parse(Method::PUT, uri)
    }

    pub fn delete(uri: &str) -> DispatchResult<Self> {
        Self::parse(Method::DELETE, uri)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn with_uri(mut self, uri: Uri) -> Self {
        self.uri = uri;
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Appends a value, keeping any values already present under `name`.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn try_header(self, name: &str, value: &str) -> DispatchResult<Self> {
        let name = parse_header_name(name)?;
        let value = parse_header_value(name.as_str(), value)?;
        Ok(self.header(name, value))
    }

    pub fn idempotency_key(self, key: &str) -> DispatchResult<Self> {
        self.try_header(IDEMPOTENCY_KEY_HEADER, key)
    }

    pub fn into_parts(self) -> (RequestHead, Bytes) {
        (
            RequestHead {
                method: self.method,
                uri: self.uri,
                headers: self.headers,
            },
            self.body,
        )
    }
}

#[cfg(test)]
mod tests {
    use http::Method;

    use super::Request;
    use crate::error::DispatchError;

    #[test]
    fn header_appends_instead_of_replacing() {
        let request = Request::get("http://orders/v1/items")
            .and_then(|request| request.try_header("x-trace", "a"))
            .and_then(|request| request.try_header("x-trace", "b"))
            .expect("request should build");
        let values: Vec<_> = request
            .headers()
            .get_all("x-trace")
            .iter()
            .map(|value| value.to_str().expect("ascii header"))
            .collect();
        assert_eq!(values, vec!["a", "b"]);
    }

    #[test]
    fn parse_rejects_malformed_uri() {
        let error = Request::parse(Method::GET, "http://orders/ bad").expect_err("uri is invalid");
        match error {
            DispatchError::InvalidUri { uri } => assert_eq!(uri, "http://orders/ bad"),
            other => panic!("unexpected error variant: {other}"),
        }
    }

    #[test]
    fn try_header_rejects_invalid_name() {
        let error = Request::get("http://orders/")
            .expect("request should build")
            .try_header("bad header", "x")
            .expect_err("header name is invalid");
        assert!(matches!(error, DispatchError::InvalidHeaderName { .. }));
    }
}
