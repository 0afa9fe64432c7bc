//! `svc-dispatch` sends HTTP requests addressed by logical service name to a
//! concrete service instance, with pluggable request transformers and
//! instance-aware retries.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use svc_dispatch::prelude::{
//!     DispatchPipeline, Instance, Request, RetryDispatchPipeline, RetryPolicy,
//!     RoundRobinInstanceSelector, UreqTransport,
//! };
//! use svc_dispatch::ForwardedHeadersTransformer;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let selector = RoundRobinInstanceSelector::new([
//!         Instance::new("orders", "10.0.0.7", 8443).secure(true),
//!         Instance::new("orders", "10.0.0.8", 8443).secure(true),
//!     ]);
//!     let pipeline = DispatchPipeline::builder(
//!         Arc::new(selector),
//!         Arc::new(UreqTransport::builder().timeout(Duration::from_secs(2)).build()),
//!     )
//!     .transformer(ForwardedHeadersTransformer::default())
//!     .build();
//!
//!     let client = RetryDispatchPipeline::new(pipeline).retry_policy(
//!         RetryPolicy::standard()
//!             .max_attempts_per_instance(2)
//!             .retryable_status_codes([502, 503]),
//!     );
//!
//!     let response = client.dispatch(Request::get("http://orders/v1/items?page=2")?)?;
//!     println!("status={}", response.status());
//!     Ok(())
//! }
//! ```
//!
//! # Recommended Defaults
//!
//! - Use `RetryPolicy::standard()` and add the status codes your services
//!   signal overload with.
//! - Set a total timeout when callers have a deadline of their own.
//! - Non-idempotent methods run once unless an eligibility or the policy says
//!   otherwise; pair `IdempotencyKeyRetryEligibility` with `idempotency_key(...)`
//!   to retry `POST` safely.

pub(crate) const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

mod config;
mod dispatch;
mod error;
mod instance;
mod metrics;
mod observe;
mod request;
mod response;
mod retry;
mod retry_dispatch;
mod rewrite;
mod transform;
mod transport;
#[cfg(feature = "ureq-transport")]
mod ureq_transport;
mod util;

pub use crate::config::{BackoffProperties, RetryProperties};
pub use crate::dispatch::{DispatchPipeline, DispatchPipelineBuilder, DispatchRequest};
pub use crate::error::{DispatchError, DispatchErrorCode, DispatchFailure, TransportErrorKind};
pub use crate::instance::{Instance, InstanceSelector, RoundRobinInstanceSelector};
pub use crate::metrics::DispatchMetricsSnapshot;
pub use crate::observe::{DispatchContext, DispatchObserver};
pub use crate::request::{Request, RequestHead};
pub use crate::response::Response;
pub use crate::retry::{
    BackoffSource, IdempotencyKeyRetryEligibility, PermissiveRetryEligibility,
    PolicyBackoffSource, RetryClassifier, RetryDecision, RetryEligibility, RetryPolicy,
    StrictRetryEligibility, is_method_idempotent,
};
pub use crate::retry_dispatch::RetryDispatchPipeline;
pub use crate::rewrite::{rewrite, service_name};
pub use crate::transform::{
    ForwardedHeadersTransformer, RequestTransformer, TransformerChain, X_FORWARDED_HOST,
    X_FORWARDED_PROTO,
};
pub use crate::transport::{RequestExecutor, Transport, TransportFault};
#[cfg(feature = "ureq-transport")]
pub use crate::ureq_transport::{UreqTransport, UreqTransportBuilder};

pub type DispatchResult<T> = std::result::Result<T, DispatchError>;

pub mod prelude {
    pub use crate::{
        DispatchError, DispatchErrorCode, DispatchFailure, DispatchMetricsSnapshot,
        DispatchPipeline, DispatchResult, Instance, InstanceSelector, Request, Response,
        RetryDispatchPipeline, RetryEligibility, RetryPolicy, RetryProperties,
        RoundRobinInstanceSelector, StrictRetryEligibility, Transport, TransportErrorKind,
    };

    #[cfg(feature = "ureq-transport")]
    pub use crate::UreqTransport;
}
