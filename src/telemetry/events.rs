use std::fmt;
use std::time::Duration;

/// Events emitted while admitting a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionEvent {
    /// The key matched the exclusion predicate; the quota was not consulted.
    Excluded {
        /// Quota key of the request
        key: String,
    },
    /// Quota remained; the request was passed downstream.
    Admitted {
        /// Quota key of the request
        key: String,
        /// Units left after this request
        remaining: u64,
    },
    /// Quota was exhausted; the limit-reached handler answered.
    Denied {
        /// Quota key of the request
        key: String,
        /// Time until the window resets
        retry_after: Duration,
    },
    /// The quota backend failed; the error handler answered.
    QuotaFailed {
        /// Quota key of the request
        key: String,
        /// Rendered backend error
        error: String,
    },
    /// A failed admitted request gave its unit back.
    Refunded {
        /// Quota key of the request
        key: String,
    },
    /// The refund call failed and was dropped.
    RefundFailed {
        /// Quota key of the request
        key: String,
        /// Rendered backend error
        error: String,
    },
}

impl AdmissionEvent {
    /// Quota key the event refers to.
    pub fn key(&self) -> &str {
        match self {
            Self::Excluded { key }
            | Self::Admitted { key, .. }
            | Self::Denied { key, .. }
            | Self::QuotaFailed { key, .. }
            | Self::Refunded { key }
            | Self::RefundFailed { key, .. } => key,
        }
    }

    /// Short, stable label for metrics and log filters.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Excluded { .. } => "excluded",
            Self::Admitted { .. } => "admitted",
            Self::Denied { .. } => "denied",
            Self::QuotaFailed { .. } => "quota_failed",
            Self::Refunded { .. } => "refunded",
            Self::RefundFailed { .. } => "refund_failed",
        }
    }
}

impl fmt::Display for AdmissionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Excluded { key } => write!(f, "Excluded(key={})", key),
            Self::Admitted { key, remaining } => {
                write!(f, "Admitted(key={}, remaining={})", key, remaining)
            }
            Self::Denied { key, retry_after } => {
                write!(f, "Denied(key={}, retry_after={:?})", key, retry_after)
            }
            Self::QuotaFailed { key, error } => write!(f, "QuotaFailed(key={}, error={})", key, error),
            Self::Refunded { key } => write!(f, "Refunded(key={})", key),
            Self::RefundFailed { key, error } => {
                write!(f, "RefundFailed(key={}, error={})", key, error)
            }
        }
    }
}
