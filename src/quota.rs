//! Quota service contract.
//!
//! The middleware never tracks quota itself. It consumes a [`QuotaService`] through two calls:
//! - [`QuotaService::check`]: atomically consult and, unless exhausted, consume one unit.
//! - [`QuotaService::refund`]: give one previously consumed unit back (best-effort).
//!
//! Ordering between concurrent checks for the same key, and the atomicity of
//! check-and-consume, belong to the implementation. [`MemoryQuota`](memory::MemoryQuota) is an
//! in-process implementation for tests and single-node deployments; distributed stores
//! implement the trait in their own crates.
//!
//! # Cancellation
//!
//! Both futures are owned by the request future. If the request is dropped (client went away,
//! outer timeout fired) the in-flight call is dropped with it.

use crate::QuotaError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub mod memory;

pub use memory::MemoryQuota;

/// Result of a quota check for one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaVerdict {
    /// Quota was already exhausted; nothing was consumed.
    pub reached: bool,
    /// Units granted per window.
    pub limit: u64,
    /// Units left after this check.
    pub remaining: u64,
    /// Time until the window resets. Surfaced as `Retry-After` on denial.
    pub reset_after: Duration,
}

impl QuotaVerdict {
    /// A verdict that admitted the request.
    pub fn allowed(limit: u64, remaining: u64, reset_after: Duration) -> Self {
        Self { reached: false, limit, remaining, reset_after }
    }

    /// A verdict for a key whose quota is exhausted.
    pub fn exhausted(limit: u64, reset_after: Duration) -> Self {
        Self { reached: true, limit, remaining: 0, reset_after }
    }

    /// Helper to check if the limit was reached.
    pub fn is_reached(&self) -> bool {
        self.reached
    }
}

/// Quota key the request was charged against.
///
/// Inserted into the extensions of admitted requests next to their [`QuotaVerdict`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuotaKey(pub String);

impl QuotaKey {
    /// Borrow the key.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QuotaKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Shared, key-scoped quota backend.
#[async_trait]
pub trait QuotaService: Send + Sync {
    /// Consult the quota for `key` and consume one unit if any remain.
    async fn check(&self, key: &str) -> Result<QuotaVerdict, QuotaError>;

    /// Return one previously consumed unit to `key`.
    async fn refund(&self, key: &str) -> Result<(), QuotaError>;
}

#[async_trait]
impl<Q> QuotaService for Arc<Q>
where
    Q: QuotaService + ?Sized,
{
    async fn check(&self, key: &str) -> Result<QuotaVerdict, QuotaError> {
        (**self).check(key).await
    }

    async fn refund(&self, key: &str) -> Result<(), QuotaError> {
        (**self).refund(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_constructors() {
        let ok = QuotaVerdict::allowed(10, 9, Duration::from_secs(60));
        assert!(!ok.is_reached());
        assert_eq!(ok.remaining, 9);

        let full = QuotaVerdict::exhausted(10, Duration::from_secs(5));
        assert!(full.is_reached());
        assert_eq!(full.remaining, 0);
        assert_eq!(full.reset_after, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn arc_dyn_service_delegates() {
        let quota: Arc<dyn QuotaService> =
            Arc::new(MemoryQuota::new(1, Duration::from_secs(60)).unwrap());
        assert!(!quota.check("k").await.unwrap().is_reached());
        assert!(quota.check("k").await.unwrap().is_reached());
        quota.refund("k").await.unwrap();
        assert!(!quota.check("k").await.unwrap().is_reached());
    }
}
