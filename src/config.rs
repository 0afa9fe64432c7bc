use std::time::Duration;

use serde::Deserialize;

use crate::error::TransportErrorKind;
use crate::retry::{RetryPolicy, default_retryable_transport_error_kinds};

/// Externally loaded retry settings, e.g. from a JSON or TOML file.
///
/// Missing keys take their defaults: no same-instance retries, one retry on
/// the next instance, idempotent methods only, no retryable status codes and
/// no backoff.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryProperties {
    pub enabled: bool,
    pub max_retries_on_same_service_instance: usize,
    pub max_retries_on_next_service_instance: usize,
    pub retry_on_all_operations: bool,
    pub retryable_status_codes: Vec<u16>,
    pub retryable_transport_errors: Vec<TransportErrorKind>,
    pub retry_on_timeout: bool,
    pub total_timeout_ms: Option<u64>,
    pub backoff: BackoffProperties,
}

impl Default for RetryProperties {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries_on_same_service_instance: 0,
            max_retries_on_next_service_instance: 1,
            retry_on_all_operations: false,
            retryable_status_codes: Vec::new(),
            retryable_transport_errors: default_retryable_transport_error_kinds()
                .into_iter()
                .collect(),
            retry_on_timeout: true,
            total_timeout_ms: None,
            backoff: BackoffProperties::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackoffProperties {
    pub enabled: bool,
    pub min_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub jitter: f64,
}

impl Default for BackoffProperties {
    fn default() -> Self {
        Self {
            enabled: false,
            min_backoff_ms: 5,
            max_backoff_ms: 2_000,
            jitter: 0.5,
        }
    }
}

impl RetryProperties {
    /// Retry counts here exclude the first try, so each maps to `retries + 1`
    /// attempts on its axis.
    pub fn into_policy(self) -> RetryPolicy {
        if !self.enabled {
            return RetryPolicy::disabled();
        }

        let mut policy = RetryPolicy::standard()
            .max_attempts_per_instance(self.max_retries_on_same_service_instance.saturating_add(1))
            .max_selection_attempts(self.max_retries_on_next_service_instance.saturating_add(1))
            .retry_non_idempotent(self.retry_on_all_operations)
            .retryable_status_codes(self.retryable_status_codes)
            .retryable_transport_error_kinds(self.retryable_transport_errors)
            .retry_on_timeout(self.retry_on_timeout);

        policy = if self.backoff.enabled {
            policy
                .base_backoff(Duration::from_millis(self.backoff.min_backoff_ms))
                .max_backoff(Duration::from_millis(self.backoff.max_backoff_ms))
                .jitter_ratio(self.backoff.jitter)
        } else {
            policy.no_backoff()
        };

        if let Some(total_timeout_ms) = self.total_timeout_ms {
            policy = policy.total_timeout(Duration::from_millis(total_timeout_ms));
        }
        policy
    }
}
