//! Admission decision and outcome hook.
//!
//! Each request moves through:
//!
//! ```text
//! START -> KEY_EXTRACTED -> EXCLUDED
//!                        -> CHECKED -> ERRORED | DENIED | ADMITTED
//! ```
//!
//! [`Admission::decide`] runs that machine and returns a [`Decision`]. Only
//! [`Decision::Admitted`] lets the request continue downstream; after the downstream service
//! completes, [`Admission::settle`] runs the outcome hook with the same verdict, so the refund
//! condition depends on this request's own decision and nothing else.
//!
//! Hosts other than tower can drive the two calls directly:
//!
//! ```
//! use quotaguard::{Admission, AdmissionConfig, Decision, GlobalKey, MemoryQuota};
//! use std::time::Duration;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let quota = MemoryQuota::new(1, Duration::from_secs(60)).unwrap();
//! let config = AdmissionConfig::<String>::builder()
//!     .key_extractor(GlobalKey::new("all"))
//!     .refund_failed_requests(true)
//!     .build()
//!     .unwrap();
//! let admission = Admission::new(quota.clone(), config);
//!
//! let (parts, ()) = http::Request::new(()).into_parts();
//! if let Decision::Admitted { key, verdict } = admission.decide(&parts).await {
//!     let downstream_failed = true;
//!     admission.settle(&key, &verdict, downstream_failed).await;
//! }
//! assert_eq!(quota.remaining("all"), 1);
//! # });
//! ```

use crate::config::AdmissionConfig;
use crate::quota::{QuotaService, QuotaVerdict};
use crate::telemetry::AdmissionEvent;
use crate::QuotaError;
use http::request::Parts;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Outcome of the admission decision for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The key is excluded; the quota was never consulted.
    Excluded {
        /// Extracted quota key.
        key: String,
    },
    /// Capacity remained and one unit was consumed. The only state that runs downstream.
    Admitted {
        /// Extracted quota key.
        key: String,
        /// Verdict returned by the quota service.
        verdict: QuotaVerdict,
    },
    /// The quota is exhausted.
    Denied {
        /// Extracted quota key.
        key: String,
        /// Verdict returned by the quota service.
        verdict: QuotaVerdict,
    },
    /// The quota service failed. Admission fails closed.
    Errored {
        /// Extracted quota key.
        key: String,
        /// Backend failure.
        error: QuotaError,
    },
}

impl Decision {
    /// Quota key the decision was made for.
    pub fn key(&self) -> &str {
        match self {
            Self::Excluded { key }
            | Self::Admitted { key, .. }
            | Self::Denied { key, .. }
            | Self::Errored { key, .. } => key,
        }
    }

    /// Whether the downstream service may run.
    pub fn proceeds(&self) -> bool {
        matches!(self, Self::Excluded { .. } | Self::Admitted { .. })
    }

    pub(crate) fn event(&self) -> AdmissionEvent {
        match self {
            Self::Excluded { key } => AdmissionEvent::Excluded { key: key.clone() },
            Self::Admitted { key, verdict } => {
                AdmissionEvent::Admitted { key: key.clone(), remaining: verdict.remaining }
            }
            Self::Denied { key, verdict } => {
                AdmissionEvent::Denied { key: key.clone(), retry_after: verdict.reset_after }
            }
            Self::Errored { key, error } => {
                AdmissionEvent::QuotaFailed { key: key.clone(), error: error.to_string() }
            }
        }
    }
}

/// Result of the outcome hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefundOutcome {
    /// No refund was due.
    Skipped,
    /// One unit was returned.
    Refunded,
    /// The refund call failed; the failure is reported here and nowhere else.
    Failed(QuotaError),
}

impl RefundOutcome {
    pub(crate) fn event(&self, key: &str) -> Option<AdmissionEvent> {
        match self {
            Self::Skipped => None,
            Self::Refunded => Some(AdmissionEvent::Refunded { key: key.to_string() }),
            Self::Failed(e) => {
                Some(AdmissionEvent::RefundFailed { key: key.to_string(), error: e.to_string() })
            }
        }
    }
}

/// A quota service bound to an immutable configuration.
///
/// Cheap to clone; clones share the backend and the configuration.
pub struct Admission<Q, B> {
    quota: Arc<Q>,
    config: Arc<AdmissionConfig<B>>,
}

impl<Q, B> Clone for Admission<Q, B> {
    fn clone(&self) -> Self {
        Self { quota: self.quota.clone(), config: self.config.clone() }
    }
}

impl<Q, B> std::fmt::Debug for Admission<Q, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Admission")
            .field("quota", &"<quota service>")
            .field("config", &self.config)
            .finish()
    }
}

impl<Q, B> Admission<Q, B>
where
    Q: QuotaService,
{
    /// Bind `quota` to `config`.
    pub fn new(quota: Q, config: AdmissionConfig<B>) -> Self {
        Self::from_shared(Arc::new(quota), Arc::new(config))
    }

    /// Bind already-shared handles.
    pub fn from_shared(quota: Arc<Q>, config: Arc<AdmissionConfig<B>>) -> Self {
        Self { quota, config }
    }

    /// The bound configuration.
    pub fn config(&self) -> &AdmissionConfig<B> {
        &self.config
    }

    /// Decide whether the request may continue.
    ///
    /// Key extraction and exclusion are evaluated fresh on every call; the quota service is
    /// only consulted for keys that are not excluded.
    pub async fn decide(&self, parts: &Parts) -> Decision {
        let key = self.config.extract_key(parts);

        if self.config.is_excluded(&key) {
            tracing::debug!(key = %key, "Admission: key excluded");
            return Decision::Excluded { key };
        }

        match with_deadline(self.config.quota_timeout(), self.quota.check(&key)).await {
            Err(error) => {
                tracing::error!(key = %key, error = %error, "Admission: quota check failed");
                Decision::Errored { key, error }
            }
            Ok(verdict) if verdict.is_reached() => {
                tracing::warn!(
                    key = %key,
                    limit = verdict.limit,
                    retry_after = ?verdict.reset_after,
                    "Admission: limit reached"
                );
                Decision::Denied { key, verdict }
            }
            Ok(verdict) => {
                tracing::debug!(key = %key, remaining = verdict.remaining, "Admission: admitted");
                Decision::Admitted { key, verdict }
            }
        }
    }

    /// Outcome hook for an admitted request whose downstream work has completed.
    ///
    /// Refunds one unit for `key` only when refunds are enabled, `verdict` (this request's own
    /// verdict) did not reach the limit, and the downstream outcome was a failure. The call is
    /// bounded by the refund deadline. Refund errors and timeouts are logged and returned, never
    /// raised.
    pub async fn settle(&self, key: &str, verdict: &QuotaVerdict, failed: bool) -> RefundOutcome {
        if !self.config.refund_failed_requests() || verdict.is_reached() || !failed {
            return RefundOutcome::Skipped;
        }

        match with_deadline(Some(self.config.refund_timeout()), self.quota.refund(key)).await {
            Ok(()) => {
                tracing::debug!(key = %key, "Admission: refunded failed request");
                RefundOutcome::Refunded
            }
            Err(error) => {
                tracing::warn!(key = %key, error = %error, "Admission: refund failed");
                RefundOutcome::Failed(error)
            }
        }
    }
}

async fn with_deadline<T, F>(deadline: Option<Duration>, call: F) -> Result<T, QuotaError>
where
    F: Future<Output = Result<T, QuotaError>>,
{
    match deadline {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .unwrap_or_else(|_| Err(QuotaError::Timeout(limit))),
        None => call.await,
    }
}
