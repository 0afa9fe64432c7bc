use http::{Method, StatusCode};
use serde::Deserialize;
use thiserror::Error;

use crate::response::Response;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    Dns,
    Connect,
    Tls,
    Read,
    Protocol,
    Other,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Dns => "dns",
            Self::Connect => "connect",
            Self::Tls => "tls",
            Self::Read => "read",
            Self::Protocol => "protocol",
            Self::Other => "other",
        };
        formatter.write_str(text)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DispatchErrorCode {
    InvalidUri,
    InvalidHeaderName,
    InvalidHeaderValue,
    MissingServiceName,
    NoInstanceAvailable,
    InvalidInstance,
    Transport,
    Timeout,
    RetryableStatus,
    DeadlineExceeded,
}

impl DispatchErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidUri => "invalid_uri",
            Self::InvalidHeaderName => "invalid_header_name",
            Self::InvalidHeaderValue => "invalid_header_value",
            Self::MissingServiceName => "missing_service_name",
            Self::NoInstanceAvailable => "no_instance_available",
            Self::InvalidInstance => "invalid_instance",
            Self::Transport => "transport",
            Self::Timeout => "timeout",
            Self::RetryableStatus => "retryable_status",
            Self::DeadlineExceeded => "deadline_exceeded",
        }
    }
}

impl std::fmt::Display for DispatchErrorCode {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DispatchError {
    #[error("invalid request uri: {uri}")]
    InvalidUri { uri: String },
    #[error("invalid header name {name}: {source}")]
    InvalidHeaderName {
        name: String,
        #[source]
        source: http::header::InvalidHeaderName,
    },
    #[error("invalid header value for {name}: {source}")]
    InvalidHeaderValue {
        name: String,
        #[source]
        source: http::header::InvalidHeaderValue,
    },
    #[error("request uri does not contain a service name: {uri}")]
    MissingServiceName { uri: String },
    #[error("no instance available for service {service}")]
    NoInstanceAvailable { service: String },
    #[error("invalid instance {instance_id} for service {service}: {reason}")]
    InvalidInstance {
        service: String,
        instance_id: String,
        reason: String,
    },
    #[error("transport error ({kind}) on {service}/{instance_id} for {method} {uri}: {source}")]
    Transport {
        kind: TransportErrorKind,
        service: String,
        instance_id: String,
        method: Method,
        uri: String,
        #[source]
        source: BoxError,
    },
    #[error("request timed out after {timeout_ms}ms on {service}/{instance_id} for {method} {uri}")]
    Timeout {
        timeout_ms: u128,
        service: String,
        instance_id: String,
        method: Method,
        uri: String,
    },
    #[error("retryable status {status} from {service}/{instance_id} for {method} {uri}")]
    RetryableStatus {
        status: StatusCode,
        service: String,
        instance_id: String,
        method: Method,
        uri: String,
        response: Box<Response>,
    },
    #[error("dispatch deadline exceeded after {timeout_ms}ms for {method} {uri}")]
    DeadlineExceeded {
        timeout_ms: u128,
        method: Method,
        uri: String,
        #[source]
        last_error: Box<DispatchError>,
    },
}

impl DispatchError {
    pub const fn code(&self) -> DispatchErrorCode {
        match self {
            Self::InvalidUri { .. } => DispatchErrorCode::InvalidUri,
            Self::InvalidHeaderName { .. } => DispatchErrorCode::InvalidHeaderName,
            Self::InvalidHeaderValue { .. } => DispatchErrorCode::InvalidHeaderValue,
            Self::MissingServiceName { .. } => DispatchErrorCode::MissingServiceName,
            Self::NoInstanceAvailable { .. } => DispatchErrorCode::NoInstanceAvailable,
            Self::InvalidInstance { .. } => DispatchErrorCode::InvalidInstance,
            Self::Transport { .. } => DispatchErrorCode::Transport,
            Self::Timeout { .. } => DispatchErrorCode::Timeout,
            Self::RetryableStatus { .. } => DispatchErrorCode::RetryableStatus,
            Self::DeadlineExceeded { .. } => DispatchErrorCode::DeadlineExceeded,
        }
    }

    /// The response behind a `RetryableStatus` failure, if any, including one
    /// that ran out of deadline before it could be retried.
    pub fn response(&self) -> Option<&Response> {
        match self {
            Self::RetryableStatus { response, .. } => Some(response),
            Self::DeadlineExceeded { last_error, .. } => last_error.response(),
            _ => None,
        }
    }
}

/// Final failure of a retrying dispatch: the last error observed plus how many
/// attempts were spent reaching it.
#[derive(Debug, Error)]
#[error("{error} (after {execution_attempts} attempt(s) across {selection_attempts} selection(s))")]
pub struct DispatchFailure {
    #[source]
    error: DispatchError,
    execution_attempts: usize,
    selection_attempts: usize,
}

impl DispatchFailure {
    pub(crate) fn new(
        error: DispatchError,
        execution_attempts: usize,
        selection_attempts: usize,
    ) -> Self {
        Self {
            error,
            execution_attempts,
            selection_attempts,
        }
    }

    pub fn error(&self) -> &DispatchError {
        &self.error
    }

    pub fn into_error(self) -> DispatchError {
        self.error
    }

    pub fn code(&self) -> DispatchErrorCode {
        self.error.code()
    }

    pub fn execution_attempts(&self) -> usize {
        self.execution_attempts
    }

    pub fn selection_attempts(&self) -> usize {
        self.selection_attempts
    }
}

impl From<DispatchFailure> for DispatchError {
    fn from(failure: DispatchFailure) -> Self {
        failure.error
    }
}
