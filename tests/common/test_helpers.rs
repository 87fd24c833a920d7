#![allow(dead_code)]

use async_trait::async_trait;
use http::header::HeaderName;
use http::{Request, Response, StatusCode};
use quotaguard::{
    AdmissionConfigBuilder, HeaderKey, MemoryQuota, QuotaError, QuotaKey, QuotaService,
    QuotaVerdict,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tower::Service;

pub const CLIENT_HEADER: HeaderName = HeaderName::from_static("x-client");

/// Build a request keyed by `key` through the `x-client` header.
pub fn request(key: &str) -> Request<()> {
    Request::builder().uri("/resource").header(CLIENT_HEADER, key).body(()).unwrap()
}

/// Config builder keyed by the `x-client` header.
pub fn keyed_config() -> AdmissionConfigBuilder<String> {
    quotaguard::AdmissionConfig::builder().key_extractor(HeaderKey::new(CLIENT_HEADER))
}

/// Quota wrapper counting every check and refund, with switchable failures.
#[derive(Clone, Debug)]
pub struct RecordingQuota {
    pub inner: MemoryQuota,
    checks: Arc<Mutex<Vec<String>>>,
    refunds: Arc<Mutex<Vec<String>>>,
    fail_checks: Arc<AtomicBool>,
    fail_refunds: Arc<AtomicBool>,
    stall_checks: Arc<AtomicBool>,
    stall_refunds: Arc<AtomicBool>,
    dropped_checks: Arc<AtomicUsize>,
}

/// Counts a pending call that was dropped before it completed.
struct DropCounter(Arc<AtomicUsize>);

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

impl RecordingQuota {
    pub fn new(limit: u64) -> Self {
        Self {
            inner: MemoryQuota::new(limit, Duration::from_secs(60)).unwrap(),
            checks: Arc::default(),
            refunds: Arc::default(),
            fail_checks: Arc::default(),
            fail_refunds: Arc::default(),
            stall_checks: Arc::default(),
            stall_refunds: Arc::default(),
            dropped_checks: Arc::default(),
        }
    }

    /// Checks never complete.
    pub fn stalled_checks(self) -> Self {
        self.stall_checks.store(true, Ordering::SeqCst);
        self
    }

    /// Refunds never complete.
    pub fn stalled_refunds(self) -> Self {
        self.stall_refunds.store(true, Ordering::SeqCst);
        self
    }

    /// Stalled checks whose future was dropped.
    pub fn dropped_checks(&self) -> usize {
        self.dropped_checks.load(Ordering::SeqCst)
    }

    pub fn failing_checks(self) -> Self {
        self.fail_checks.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing_refunds(self) -> Self {
        self.fail_refunds.store(true, Ordering::SeqCst);
        self
    }

    pub fn checks(&self) -> Vec<String> {
        self.checks.lock().unwrap().clone()
    }

    pub fn refunds(&self) -> Vec<String> {
        self.refunds.lock().unwrap().clone()
    }

    pub fn remaining(&self, key: &str) -> u64 {
        self.inner.remaining(key)
    }
}

#[async_trait]
impl QuotaService for RecordingQuota {
    async fn check(&self, key: &str) -> Result<QuotaVerdict, QuotaError> {
        self.checks.lock().unwrap().push(key.to_string());
        if self.fail_checks.load(Ordering::SeqCst) {
            return Err(QuotaError::Unavailable("connection refused".into()));
        }
        if self.stall_checks.load(Ordering::SeqCst) {
            let _pending = DropCounter(self.dropped_checks.clone());
            return futures::future::pending().await;
        }
        self.inner.check(key).await
    }

    async fn refund(&self, key: &str) -> Result<(), QuotaError> {
        self.refunds.lock().unwrap().push(key.to_string());
        if self.fail_refunds.load(Ordering::SeqCst) {
            return Err(QuotaError::Backend("refund rejected".into()));
        }
        if self.stall_refunds.load(Ordering::SeqCst) {
            return futures::future::pending().await;
        }
        self.inner.refund(key).await
    }
}

/// What the downstream service saw of one request.
#[derive(Clone, Debug)]
pub struct Seen {
    pub verdict: Option<QuotaVerdict>,
    pub key: Option<QuotaKey>,
}

/// Downstream service answering with a fixed status (or error), recording what it saw.
#[derive(Clone, Debug)]
pub struct Downstream {
    status: StatusCode,
    error: bool,
    calls: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<Seen>>>,
}

impl Downstream {
    pub fn ok() -> Self {
        Self::status(StatusCode::OK)
    }

    pub fn status(status: StatusCode) -> Self {
        Self { status, error: false, calls: Arc::default(), seen: Arc::default() }
    }

    pub fn erroring() -> Self {
        Self { error: true, ..Self::ok() }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }
}

impl Service<Request<()>> for Downstream {
    type Response = Response<String>;
    type Error = std::io::Error;
    type Future = std::future::Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<()>) -> Self::Future {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(Seen {
            verdict: req.extensions().get::<QuotaVerdict>().cloned(),
            key: req.extensions().get::<QuotaKey>().cloned(),
        });
        if self.error {
            return std::future::ready(Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "handler crashed",
            )));
        }
        let mut res = Response::new(String::from("downstream"));
        *res.status_mut() = self.status;
        std::future::ready(Ok(res))
    }
}
