use crate::clock::{Clock, MonotonicClock};
use crate::quota::{QuotaService, QuotaVerdict};
use crate::{BuildError, QuotaError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u64,
    started_at: u64,
}

#[derive(Debug, Default)]
struct Windows {
    by_key: HashMap<String, Window>,
    next_cleanup: u64,
}

/// In-process, per-key fixed-window quota.
///
/// Each key gets `limit` units per `period`; the window starts on the key's first check.
/// Clones share the same counters, so a test can keep a handle to inspect what the middleware
/// consumed and refunded.
///
/// Expired windows are swept out on the first check after each cleanup interval (one period by
/// default), so keys that stop sending requests do not stay in memory.
#[derive(Clone, Debug)]
pub struct MemoryQuota {
    windows: Arc<Mutex<Windows>>,
    limit: u64,
    period_millis: u64,
    cleanup_interval_millis: u64,
    clock: Arc<dyn Clock>,
}

impl MemoryQuota {
    /// Create a quota of `limit` units per `period` for every key.
    ///
    /// # Examples
    /// ```
    /// use quotaguard::MemoryQuota;
    /// use std::time::Duration;
    /// let quota = MemoryQuota::new(100, Duration::from_secs(60)).unwrap();
    /// assert_eq!(quota.remaining("203.0.113.7"), 100);
    /// ```
    pub fn new(limit: u64, period: Duration) -> Result<Self, BuildError> {
        if limit == 0 {
            return Err(BuildError::InvalidLimit(limit));
        }
        let period_millis = u64::try_from(period.as_millis()).unwrap_or(u64::MAX);
        if period_millis == 0 {
            return Err(BuildError::InvalidPeriod(period));
        }
        let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::default());
        let windows = Windows {
            by_key: HashMap::new(),
            next_cleanup: clock.now_millis().saturating_add(period_millis),
        };
        Ok(Self {
            windows: Arc::new(Mutex::new(windows)),
            limit,
            period_millis,
            cleanup_interval_millis: period_millis,
            clock,
        })
    }

    /// Sweep expired windows at most once per `interval` instead of once per period.
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Result<Self, BuildError> {
        let millis = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        if millis == 0 {
            return Err(BuildError::InvalidPeriod(interval));
        }
        self.cleanup_interval_millis = millis;
        self.schedule_cleanup();
        Ok(self)
    }

    /// Override the clock (useful for deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self.schedule_cleanup();
        self
    }

    /// Units granted per window.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Units left for `key` in its current window.
    pub fn remaining(&self, key: &str) -> u64 {
        let now = self.clock.now_millis();
        match self.lock().by_key.get(key) {
            Some(w) if !self.expired(w, now) => self.limit.saturating_sub(w.count),
            _ => self.limit,
        }
    }

    /// Forget all state for `key`.
    pub fn reset(&self, key: &str) {
        self.lock().by_key.remove(key);
    }

    /// Forget all state for every key.
    pub fn clear(&self) {
        self.lock().by_key.clear();
    }

    /// Number of keys currently tracked, expired windows not yet swept included.
    pub fn tracked_keys(&self) -> usize {
        self.lock().by_key.len()
    }

    fn schedule_cleanup(&self) {
        let next = self.clock.now_millis().saturating_add(self.cleanup_interval_millis);
        self.lock().next_cleanup = next;
    }

    fn sweep_expired(&self, windows: &mut Windows, now: u64) {
        if now < windows.next_cleanup {
            return;
        }
        let before = windows.by_key.len();
        let period = self.period_millis;
        windows.by_key.retain(|_, w| now.saturating_sub(w.started_at) < period);
        windows.next_cleanup = now.saturating_add(self.cleanup_interval_millis);
        tracing::debug!(
            removed = before - windows.by_key.len(),
            remaining = windows.by_key.len(),
            "MemoryQuota: swept expired windows"
        );
    }

    fn lock(&self) -> MutexGuard<'_, Windows> {
        // Counters stay consistent across a panic in another holder; keep serving.
        self.windows.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn expired(&self, window: &Window, now: u64) -> bool {
        now.saturating_sub(window.started_at) >= self.period_millis
    }

    fn reset_after(&self, window: &Window, now: u64) -> Duration {
        let elapsed = now.saturating_sub(window.started_at);
        Duration::from_millis(self.period_millis.saturating_sub(elapsed))
    }
}

#[async_trait]
impl QuotaService for MemoryQuota {
    async fn check(&self, key: &str) -> Result<QuotaVerdict, QuotaError> {
        let now = self.clock.now_millis();
        let mut guard = self.lock();
        self.sweep_expired(&mut guard, now);
        let window =
            guard.by_key.entry(key.to_string()).or_insert(Window { count: 0, started_at: now });

        if now.saturating_sub(window.started_at) >= self.period_millis {
            *window = Window { count: 0, started_at: now };
        }

        let reset_after = self.reset_after(window, now);
        if window.count >= self.limit {
            return Ok(QuotaVerdict::exhausted(self.limit, reset_after));
        }

        window.count += 1;
        Ok(QuotaVerdict::allowed(self.limit, self.limit - window.count, reset_after))
    }

    async fn refund(&self, key: &str) -> Result<(), QuotaError> {
        let now = self.clock.now_millis();
        let mut guard = self.lock();
        if let Some(window) = guard.by_key.get_mut(key) {
            // A unit consumed in an expired window is already gone.
            if now.saturating_sub(window.started_at) < self.period_millis {
                window.count = window.count.saturating_sub(1);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Debug, Clone)]
    struct ManualClock {
        now: Arc<AtomicU64>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self { now: Arc::new(AtomicU64::new(0)) }
        }

        fn advance(&self, millis: u64) {
            self.now.fetch_add(millis, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_millis(&self) -> u64 {
            self.now.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn rejects_zero_limit() {
        let err = MemoryQuota::new(0, Duration::from_secs(1)).expect_err("zero limit");
        assert_eq!(err, BuildError::InvalidLimit(0));
    }

    #[test]
    fn rejects_zero_period() {
        let err = MemoryQuota::new(1, Duration::ZERO).expect_err("zero period");
        assert_eq!(err, BuildError::InvalidPeriod(Duration::ZERO));
    }

    #[tokio::test]
    async fn consumes_until_exhausted_without_overdrawing() {
        let quota = MemoryQuota::new(2, Duration::from_secs(60)).unwrap();

        let first = quota.check("a").await.unwrap();
        assert_eq!(first.remaining, 1);
        let second = quota.check("a").await.unwrap();
        assert_eq!(second.remaining, 0);
        assert!(!second.is_reached());

        for _ in 0..3 {
            assert!(quota.check("a").await.unwrap().is_reached());
        }
        assert_eq!(quota.remaining("a"), 0);

        // One refund gives back exactly one unit even after denied checks.
        quota.refund("a").await.unwrap();
        assert_eq!(quota.remaining("a"), 1);
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let quota = MemoryQuota::new(1, Duration::from_secs(60)).unwrap();
        assert!(!quota.check("a").await.unwrap().is_reached());
        assert!(!quota.check("b").await.unwrap().is_reached());
        assert!(quota.check("a").await.unwrap().is_reached());
    }

    #[tokio::test]
    async fn window_resets_after_period() {
        let clock = ManualClock::new();
        let quota =
            MemoryQuota::new(1, Duration::from_millis(100)).unwrap().with_clock(clock.clone());

        assert!(!quota.check("a").await.unwrap().is_reached());
        let denied = quota.check("a").await.unwrap();
        assert!(denied.is_reached());
        assert_eq!(denied.reset_after, Duration::from_millis(100));

        clock.advance(40);
        assert_eq!(quota.check("a").await.unwrap().reset_after, Duration::from_millis(60));

        clock.advance(60);
        assert!(!quota.check("a").await.unwrap().is_reached());
    }

    #[tokio::test]
    async fn refund_never_goes_below_zero_or_into_new_window() {
        let clock = ManualClock::new();
        let quota =
            MemoryQuota::new(2, Duration::from_millis(100)).unwrap().with_clock(clock.clone());

        quota.refund("never-seen").await.unwrap();
        assert_eq!(quota.remaining("never-seen"), 2);

        quota.check("a").await.unwrap();
        quota.refund("a").await.unwrap();
        quota.refund("a").await.unwrap();
        assert_eq!(quota.remaining("a"), 2);

        quota.check("a").await.unwrap();
        clock.advance(150);
        quota.refund("a").await.unwrap();
        assert_eq!(quota.remaining("a"), 2);
    }

    #[tokio::test]
    async fn expired_windows_are_swept() {
        let clock = ManualClock::new();
        let quota =
            MemoryQuota::new(1, Duration::from_millis(100)).unwrap().with_clock(clock.clone());

        for i in 0..1_000 {
            quota.check(&format!("client-{i}")).await.unwrap();
        }
        assert_eq!(quota.tracked_keys(), 1_000);

        clock.advance(10_000);
        quota.check("late").await.unwrap();
        assert_eq!(quota.tracked_keys(), 1);
        assert_eq!(quota.remaining("client-0"), 1);
    }

    #[tokio::test]
    async fn sweep_keeps_live_windows() {
        let clock = ManualClock::new();
        let quota = MemoryQuota::new(2, Duration::from_millis(100))
            .unwrap()
            .with_clock(clock.clone())
            .with_cleanup_interval(Duration::from_millis(50))
            .unwrap();

        quota.check("old").await.unwrap();
        clock.advance(60);
        quota.check("fresh").await.unwrap();
        clock.advance(50);

        // "old" expired at 100; "fresh" lives until 160.
        quota.check("trigger").await.unwrap();
        assert_eq!(quota.tracked_keys(), 2);
        assert_eq!(quota.remaining("fresh"), 1);
    }

    #[tokio::test]
    async fn reset_restores_full_quota() {
        let quota = MemoryQuota::new(1, Duration::from_secs(60)).unwrap();
        quota.check("a").await.unwrap();
        quota.reset("a");
        assert_eq!(quota.remaining("a"), 1);
        quota.check("b").await.unwrap();
        quota.clear();
        assert_eq!(quota.remaining("b"), 1);
    }
}
