use std::time::Duration;

use http::Method;

use crate::error::DispatchError;
use crate::instance::Instance;
use crate::response::Response;
use crate::retry::RetryDecision;

/// Where a dispatch stands when an observer is called.
#[derive(Clone, Debug)]
pub struct DispatchContext {
    service: String,
    method: Method,
    uri: String,
    execution_attempts: usize,
    selection_attempts: usize,
}

impl DispatchContext {
    pub(crate) fn new(
        service: String,
        method: Method,
        uri: String,
        execution_attempts: usize,
        selection_attempts: usize,
    ) -> Self {
        Self {
            service,
            method,
            uri,
            execution_attempts,
            selection_attempts,
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Redacted target as written by the caller.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn execution_attempts(&self) -> usize {
        self.execution_attempts
    }

    pub fn selection_attempts(&self) -> usize {
        self.selection_attempts
    }
}

pub trait DispatchObserver: Send + Sync {
    fn on_dispatch_start(&self, _context: &DispatchContext) {}

    fn on_instance_selected(&self, _context: &DispatchContext, _instance: &Instance) {}

    fn on_retry_scheduled(
        &self,
        _context: &DispatchContext,
        _decision: &RetryDecision,
        _delay: Duration,
    ) {
    }

    fn on_dispatch_complete(
        &self,
        _context: &DispatchContext,
        _outcome: Result<&Response, &DispatchError>,
    ) {
    }
}
