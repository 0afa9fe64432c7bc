use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::error::DispatchError;
use crate::response::Response;
use crate::util::lock_unpoisoned;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DispatchMetricsSnapshot {
    pub dispatches_started: u64,
    pub dispatches_succeeded: u64,
    pub dispatches_failed: u64,
    pub execution_attempts: u64,
    pub instance_selections: u64,
    pub same_instance_retries: u64,
    pub next_instance_retries: u64,
    pub in_flight: u64,
    pub latency_samples: u64,
    pub latency_total_ms: u64,
    pub latency_avg_ms: f64,
    pub status_counts: BTreeMap<u16, u64>,
    pub error_counts: BTreeMap<String, u64>,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct DispatchMetrics {
    inner: Arc<DispatchMetricsInner>,
}

#[derive(Debug, Default)]
struct DispatchMetricsInner {
    dispatches_started: AtomicU64,
    dispatches_succeeded: AtomicU64,
    dispatches_failed: AtomicU64,
    execution_attempts: AtomicU64,
    instance_selections: AtomicU64,
    same_instance_retries: AtomicU64,
    next_instance_retries: AtomicU64,
    in_flight: AtomicU64,
    latency_total_ms: AtomicU64,
    latency_samples: AtomicU64,
    status_counts: Mutex<BTreeMap<u16, u64>>,
    error_counts: Mutex<BTreeMap<String, u64>>,
}

pub(crate) struct InFlightGuard {
    metrics: DispatchMetrics,
}

impl DispatchMetrics {
    pub(crate) fn record_dispatch_started(&self) {
        self.inner
            .dispatches_started
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn enter_in_flight(&self) -> InFlightGuard {
        self.inner.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            metrics: self.clone(),
        }
    }

    pub(crate) fn record_execution_attempt(&self) {
        self.inner
            .execution_attempts
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_instance_selection(&self) {
        self.inner
            .instance_selections
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_same_instance_retry(&self) {
        self.inner
            .same_instance_retries
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_next_instance_retry(&self) {
        self.inner
            .next_instance_retries
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dispatch_completed(
        &self,
        result: Result<&Response, &DispatchError>,
        latency: Duration,
    ) {
        self.record_latency(latency);
        match result {
            Ok(response) => {
                self.inner
                    .dispatches_succeeded
                    .fetch_add(1, Ordering::Relaxed);
                self.add_status_count(response.status().as_u16());
            }
            Err(error) => {
                self.inner.dispatches_failed.fetch_add(1, Ordering::Relaxed);
                match error {
                    DispatchError::Transport { kind, .. } => {
                        self.add_error_count(format!("transport:{kind}"));
                    }
                    DispatchError::RetryableStatus { status, .. } => {
                        self.add_status_count(status.as_u16());
                        self.add_error_count(format!("retryable_status:{}", status.as_u16()));
                    }
                    other => self.add_error_count(other.code().as_str().to_owned()),
                }
            }
        }
    }

    pub(crate) fn snapshot(&self) -> DispatchMetricsSnapshot {
        let latency_samples = self.inner.latency_samples.load(Ordering::Relaxed);
        let latency_total_ms = self.inner.latency_total_ms.load(Ordering::Relaxed);
        let latency_avg_ms = if latency_samples == 0 {
            0.0
        } else {
            latency_total_ms as f64 / latency_samples as f64
        };

        DispatchMetricsSnapshot {
            dispatches_started: self.inner.dispatches_started.load(Ordering::Relaxed),
            dispatches_succeeded: self.inner.dispatches_succeeded.load(Ordering::Relaxed),
            dispatches_failed: self.inner.dispatches_failed.load(Ordering::Relaxed),
            execution_attempts: self.inner.execution_attempts.load(Ordering::Relaxed),
            instance_selections: self.inner.instance_selections.load(Ordering::Relaxed),
            same_instance_retries: self.inner.same_instance_retries.load(Ordering::Relaxed),
            next_instance_retries: self.inner.next_instance_retries.load(Ordering::Relaxed),
            in_flight: self.inner.in_flight.load(Ordering::Relaxed),
            latency_samples,
            latency_total_ms,
            latency_avg_ms,
            status_counts: lock_unpoisoned(&self.inner.status_counts).clone(),
            error_counts: lock_unpoisoned(&self.inner.error_counts).clone(),
        }
    }

    fn record_latency(&self, latency: Duration) {
        self.inner.latency_samples.fetch_add(1, Ordering::Relaxed);
        self.inner.latency_total_ms.fetch_add(
            latency.as_millis().min(u64::MAX as u128) as u64,
            Ordering::Relaxed,
        );
    }

    fn add_status_count(&self, status: u16) {
        let mut status_counts = lock_unpoisoned(&self.inner.status_counts);
        *status_counts.entry(status).or_insert(0) += 1;
    }

    fn add_error_count(&self, error_key: String) {
        let mut error_counts = lock_unpoisoned(&self.inner.error_counts);
        *error_counts.entry(error_key).or_insert(0) += 1;
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.metrics.inner.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}
