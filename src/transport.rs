use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;

use crate::error::{BoxError, DispatchError, TransportErrorKind};
use crate::instance::Instance;
use crate::request::{Request, RequestHead};
use crate::response::Response;
use crate::util::redact_uri_for_logs;

#[derive(Debug, Error)]
pub enum TransportFault {
    #[error("transport error ({kind}): {source}")]
    Transport {
        kind: TransportErrorKind,
        #[source]
        source: BoxError,
    },
    #[error("transport timed out after {}ms", .timeout.as_millis())]
    Timeout { timeout: Duration },
}

impl TransportFault {
    pub fn new(kind: TransportErrorKind, source: impl Into<BoxError>) -> Self {
        Self::Transport {
            kind,
            source: source.into(),
        }
    }

    pub fn timeout(timeout: Duration) -> Self {
        Self::Timeout { timeout }
    }
}

/// Sends one fully resolved request over the wire.
///
/// Non-success statuses are responses, not faults.
pub trait Transport: Send + Sync {
    fn execute(&self, head: RequestHead, body: Bytes) -> Result<Response, TransportFault>;
}

#[derive(Clone)]
pub struct RequestExecutor {
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.debug_struct("RequestExecutor").finish_non_exhaustive()
    }
}

impl RequestExecutor {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub fn execute(&self, request: Request, instance: &Instance) -> Result<Response, DispatchError> {
        let method = request.method().clone();
        let uri = request.uri().to_string();
        let (head, body) = request.into_parts();
        self.transport
            .execute(head, body)
            .map_err(|fault| match fault {
                TransportFault::Transport { kind, source } => DispatchError::Transport {
                    kind,
                    service: instance.service_id().to_owned(),
                    instance_id: instance.id().to_owned(),
                    method,
                    uri: redact_uri_for_logs(&uri),
                    source,
                },
                TransportFault::Timeout { timeout } => DispatchError::Timeout {
                    timeout_ms: timeout.as_millis(),
                    service: instance.service_id().to_owned(),
                    instance_id: instance.id().to_owned(),
                    method,
                    uri: redact_uri_for_logs(&uri),
                },
            })
    }
}
