use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use http::{HeaderMap, Method, StatusCode};
use rand::Rng;

use crate::IDEMPOTENCY_KEY_HEADER;
use crate::error::TransportErrorKind;

/// Facts about one failed attempt, handed to a [`RetryClassifier`].
#[derive(Clone, Debug)]
pub struct RetryDecision {
    pub service: String,
    pub instance_id: String,
    pub method: Method,
    pub uri: String,
    pub execution_attempt: usize,
    pub same_instance_attempt: usize,
    pub selection_attempt: usize,
    pub status: Option<StatusCode>,
    pub transport_error_kind: Option<TransportErrorKind>,
    pub timeout: bool,
}

pub trait RetryClassifier: Send + Sync {
    fn should_retry(&self, decision: &RetryDecision) -> bool;
}

pub trait RetryEligibility: Send + Sync {
    fn supports_retry(&self, method: &Method, headers: &HeaderMap) -> bool;
}

/// Retries idempotent methods only.
#[derive(Debug, Default)]
pub struct StrictRetryEligibility;

impl RetryEligibility for StrictRetryEligibility {
    fn supports_retry(&self, method: &Method, _headers: &HeaderMap) -> bool {
        is_method_idempotent(method)
    }
}

/// Retries idempotent methods and requests carrying an `idempotency-key`.
#[derive(Debug, Default)]
pub struct IdempotencyKeyRetryEligibility;

impl RetryEligibility for IdempotencyKeyRetryEligibility {
    fn supports_retry(&self, method: &Method, headers: &HeaderMap) -> bool {
        is_method_idempotent(method) || headers.contains_key(IDEMPOTENCY_KEY_HEADER)
    }
}

#[derive(Debug, Default)]
pub struct PermissiveRetryEligibility;

impl RetryEligibility for PermissiveRetryEligibility {
    fn supports_retry(&self, _method: &Method, _headers: &HeaderMap) -> bool {
        true
    }
}

pub trait BackoffSource: Send + Sync {
    fn backoff_for_retry(&self, retry_policy: &RetryPolicy, retry_index: usize) -> Duration;
}

#[derive(Debug, Default)]
pub struct PolicyBackoffSource;

impl BackoffSource for PolicyBackoffSource {
    fn backoff_for_retry(&self, retry_policy: &RetryPolicy, retry_index: usize) -> Duration {
        retry_policy.backoff_for_retry(retry_index)
    }
}

#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts_per_instance: usize,
    max_selection_attempts: usize,
    retry_non_idempotent: bool,
    retryable_status_codes: BTreeSet<u16>,
    retryable_transport_error_kinds: BTreeSet<TransportErrorKind>,
    retry_on_timeout: bool,
    backoff_enabled: bool,
    base_backoff: Duration,
    max_backoff: Duration,
    jitter_ratio: f64,
    total_timeout: Option<Duration>,
    retry_classifier: Option<Arc<dyn RetryClassifier>>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RetryPolicy")
            .field("max_attempts_per_instance", &self.max_attempts_per_instance)
            .field("max_selection_attempts", &self.max_selection_attempts)
            .field("retry_non_idempotent", &self.retry_non_idempotent)
            .field("retryable_status_codes", &self.retryable_status_codes)
            .field(
                "retryable_transport_error_kinds",
                &self.retryable_transport_error_kinds,
            )
            .field("retry_on_timeout", &self.retry_on_timeout)
            .field("backoff_enabled", &self.backoff_enabled)
            .field("base_backoff", &self.base_backoff)
            .field("max_backoff", &self.max_backoff)
            .field("jitter_ratio", &self.jitter_ratio)
            .field("total_timeout", &self.total_timeout)
            .field("retry_classifier", &self.retry_classifier.is_some())
            .finish()
    }
}

impl RetryPolicy {
    /// One attempt, one instance.
    pub fn disabled() -> Self {
        Self {
            max_attempts_per_instance: 1,
            max_selection_attempts: 1,
            ..Self::standard()
        }
    }

    /// One attempt per instance and one fallback instance; no status codes
    /// are retryable until configured.
    pub fn standard() -> Self {
        Self {
            max_attempts_per_instance: 1,
            max_selection_attempts: 2,
            retry_non_idempotent: false,
            retryable_status_codes: BTreeSet::new(),
            retryable_transport_error_kinds: default_retryable_transport_error_kinds(),
            retry_on_timeout: true,
            backoff_enabled: true,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            jitter_ratio: 0.2,
            total_timeout: None,
            retry_classifier: None,
        }
    }

    pub fn max_attempts_per_instance(mut self, max_attempts: usize) -> Self {
        self.max_attempts_per_instance = max_attempts.max(1);
        self
    }

    pub fn max_selection_attempts(mut self, max_attempts: usize) -> Self {
        self.max_selection_attempts = max_attempts.max(1);
        self
    }

    pub fn retry_non_idempotent(mut self, retry: bool) -> Self {
        self.retry_non_idempotent = retry;
        self
    }

    pub fn retryable_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.retryable_status_codes = codes.into_iter().collect();
        self
    }

    pub fn retryable_transport_error_kinds(
        mut self,
        kinds: impl IntoIterator<Item = TransportErrorKind>,
    ) -> Self {
        self.retryable_transport_error_kinds = kinds.into_iter().collect();
        self
    }

    pub fn retry_on_timeout(mut self, retry: bool) -> Self {
        self.retry_on_timeout = retry;
        self
    }

    pub fn no_backoff(mut self) -> Self {
        self.backoff_enabled = false;
        self
    }

    pub fn base_backoff(mut self, base_backoff: Duration) -> Self {
        self.backoff_enabled = true;
        self.base_backoff = base_backoff.max(Duration::from_millis(1));
        if self.max_backoff < self.base_backoff {
            self.max_backoff = self.base_backoff;
        }
        self
    }

    pub fn max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff.max(self.base_backoff);
        self
    }

    pub fn jitter_ratio(mut self, jitter_ratio: f64) -> Self {
        self.jitter_ratio = jitter_ratio.clamp(0.0, 1.0);
        self
    }

    /// Upper bound on the whole dispatch, retries and backoff included.
    pub fn total_timeout(mut self, total_timeout: Duration) -> Self {
        self.total_timeout = Some(total_timeout.max(Duration::from_millis(1)));
        self
    }

    pub fn retry_classifier(mut self, retry_classifier: Arc<dyn RetryClassifier>) -> Self {
        self.retry_classifier = Some(retry_classifier);
        self
    }

    pub fn configured_max_attempts_per_instance(&self) -> usize {
        self.max_attempts_per_instance
    }

    pub fn configured_max_selection_attempts(&self) -> usize {
        self.max_selection_attempts
    }

    pub fn configured_total_timeout(&self) -> Option<Duration> {
        self.total_timeout
    }

    pub fn configured_max_backoff(&self) -> Duration {
        self.max_backoff
    }

    pub(crate) fn permits_non_idempotent(&self) -> bool {
        self.retry_non_idempotent
    }

    pub fn is_retryable_status(&self, status: StatusCode) -> bool {
        self.retryable_status_codes.contains(&status.as_u16())
    }

    pub(crate) fn should_retry_decision(&self, decision: &RetryDecision) -> bool {
        if let Some(retry_classifier) = &self.retry_classifier {
            return retry_classifier.should_retry(decision);
        }
        if let Some(status) = decision.status {
            return self.is_retryable_status(status);
        }
        if let Some(kind) = decision.transport_error_kind {
            return self.retryable_transport_error_kinds.contains(&kind);
        }
        if decision.timeout {
            return self.retry_on_timeout;
        }
        false
    }

    pub(crate) fn backoff_for_retry(&self, retry_index: usize) -> Duration {
        if !self.backoff_enabled {
            return Duration::ZERO;
        }
        let capped_exponent = retry_index.saturating_sub(1).min(31) as u32;
        let multiplier = 1_u128 << capped_exponent;
        let base_ms = self.base_backoff.as_millis().max(1);
        let max_ms = self.max_backoff.as_millis().max(base_ms);
        let delay_ms = base_ms
            .saturating_mul(multiplier)
            .min(max_ms)
            .min(u64::MAX as u128) as u64;
        self.apply_jitter(Duration::from_millis(delay_ms))
    }

    fn apply_jitter(&self, backoff: Duration) -> Duration {
        if self.jitter_ratio <= f64::EPSILON {
            return backoff;
        }

        let backoff_ms = backoff.as_millis().min(u64::MAX as u128) as u64;
        if backoff_ms <= 1 {
            return backoff;
        }
        let max_backoff_ms = self.max_backoff.as_millis().min(u64::MAX as u128) as u64;

        let jitter_span = ((backoff_ms as f64) * self.jitter_ratio).round().max(1.0) as u64;
        let low = backoff_ms.saturating_sub(jitter_span);
        let high = backoff_ms.saturating_add(jitter_span).max(low);
        let mut rng = rand::rng();
        let sampled_ms = rng.random_range(low..=high).min(max_backoff_ms.max(1));
        Duration::from_millis(sampled_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

pub(crate) fn default_retryable_transport_error_kinds() -> BTreeSet<TransportErrorKind> {
    [
        TransportErrorKind::Dns,
        TransportErrorKind::Connect,
        TransportErrorKind::Read,
    ]
    .into_iter()
    .collect()
}

pub fn is_method_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::PUT | Method::DELETE | Method::OPTIONS | Method::TRACE
    )
}
