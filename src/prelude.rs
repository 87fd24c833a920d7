//! Convenient re-exports for common quotaguard types.
pub use crate::{
    admission::{Admission, Decision, RefundOutcome},
    config::{AdmissionConfig, AdmissionConfigBuilder},
    handler::{default_error_response, default_limit_reached_response, headers, LimitReached},
    key::{ClientIp, GlobalKey, HeaderKey, KeyExtractor},
    middleware::{AdmissionLayer, AdmissionService},
    quota::{MemoryQuota, QuotaKey, QuotaService, QuotaVerdict},
    telemetry::{AdmissionEvent, MemorySink, TelemetrySink},
    BuildError, QuotaError,
};
