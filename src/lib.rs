#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # quotaguard
//!
//! Key-scoped request admission for tower HTTP stacks.
//!
//! Every request is mapped to a quota key, optionally excluded, and checked against a shared
//! [`QuotaService`]. The request then either continues to the inner service, or is answered
//! here with a "too many requests" response (quota exhausted) or a generic failure (quota
//! backend down, fail closed).
//!
//! ## Features
//!
//! - **Pluggable key extraction**: client IP with proxy and subnet handling, header, global
//! - **Exclusions** evaluated before the quota backend is touched
//! - **Refund of failed requests**: admitted requests that fail downstream give their unit back
//! - **Immutable configuration** shared by every clone of the middleware
//! - **Telemetry events** through tower-based sinks, plus `tracing` logs
//!
//! ## Quick Start
//!
//! ```rust
//! use quotaguard::{AdmissionConfig, AdmissionLayer, ClientIp, MemoryQuota};
//! use std::time::Duration;
//! use tower::ServiceBuilder;
//!
//! let quota = MemoryQuota::new(100, Duration::from_secs(60)).unwrap();
//! let config = AdmissionConfig::<String>::builder()
//!     .key_extractor(ClientIp::new().trust_forward_header(true))
//!     .exclude_keys(["127.0.0.1"])
//!     .refund_failed_requests(true)
//!     .build()
//!     .unwrap();
//!
//! let _layer = ServiceBuilder::new().layer(AdmissionLayer::new(quota, config));
//! ```

pub mod admission;
pub mod clock;
pub mod config;
pub mod error;
pub mod handler;
pub mod key;
pub mod middleware;
pub mod prelude;
pub mod quota;
pub mod telemetry;

// Re-exports
pub use admission::{Admission, Decision, RefundOutcome};
pub use clock::{Clock, MonotonicClock};
pub use config::{AdmissionConfig, AdmissionConfigBuilder, DEFAULT_REFUND_TIMEOUT};
pub use error::{BuildError, QuotaError};
pub use handler::{ErrorHandler, LimitReached, LimitReachedHandler};
pub use key::{ClientIp, GlobalKey, HeaderKey, KeyExtractor, DEFAULT_KEY};
pub use middleware::{AdmissionLayer, AdmissionService};
pub use quota::{MemoryQuota, QuotaKey, QuotaService, QuotaVerdict};
pub use telemetry::{AdmissionEvent, LogSink, MemorySink, NullSink, TelemetrySink};
