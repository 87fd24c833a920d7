//! Error types for quota backends and configuration
use std::time::Duration;

/// Failure of the quota backend itself.
///
/// This is an infrastructure failure, distinct from "quota exhausted", which is reported through
/// [`QuotaVerdict::is_reached`](crate::QuotaVerdict::is_reached).
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum QuotaError {
    /// Backend could not be reached (connection refused, pool exhausted, ...).
    #[error("quota backend unavailable: {0}")]
    Unavailable(String),
    /// Backend answered with an error.
    #[error("quota backend error: {0}")]
    Backend(String),
    /// The call did not complete within the configured deadline.
    #[error("quota call timed out after {0:?}")]
    Timeout(Duration),
}

impl QuotaError {
    /// Check if this error is due to the configured deadline
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Access the deadline that expired, if this is a timeout.
    pub fn timeout(&self) -> Option<Duration> {
        match self {
            Self::Timeout(d) => Some(*d),
            _ => None,
        }
    }
}

/// Errors produced while validating configuration or constructing a backend.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum BuildError {
    /// Quota limit must be > 0.
    #[error("limit must be > 0 (got {0})")]
    InvalidLimit(u64),
    /// Quota period must be non-zero.
    #[error("period must be > 0 (got {0:?})")]
    InvalidPeriod(Duration),
    /// Quota call deadline must be non-zero and finite.
    #[error("quota timeout must be non-zero and finite (got {0:?})")]
    InvalidTimeout(Duration),
    /// IP mask prefix longer than the address.
    #[error("{family} mask prefix must be <= {max} (got {provided})")]
    InvalidMask {
        /// Address family ("ipv4" or "ipv6").
        family: &'static str,
        /// Longest valid prefix for the family.
        max: u8,
        /// Value provided by caller.
        provided: u8,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_display_includes_duration() {
        let err = QuotaError::Timeout(Duration::from_millis(250));
        let msg = err.to_string();
        assert!(msg.contains("timed out"));
        assert!(msg.contains("250"));
        assert!(err.is_timeout());
        assert_eq!(err.timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn backend_errors_are_not_timeouts() {
        let err = QuotaError::Backend("READONLY replica".into());
        assert!(!err.is_timeout());
        assert!(err.timeout().is_none());
        assert_eq!(err.to_string(), "quota backend error: READONLY replica");
    }

    #[test]
    fn build_error_display() {
        assert_eq!(BuildError::InvalidLimit(0).to_string(), "limit must be > 0 (got 0)");
        let mask = BuildError::InvalidMask { family: "ipv4", max: 32, provided: 40 };
        assert_eq!(mask.to_string(), "ipv4 mask prefix must be <= 32 (got 40)");
    }
}
