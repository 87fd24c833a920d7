//! Tower layer enforcing key-scoped quota on HTTP requests.
//!
//! ```
//! use quotaguard::{AdmissionConfig, AdmissionLayer, GlobalKey, MemoryQuota};
//! use std::time::Duration;
//! use tower::{service_fn, ServiceBuilder, ServiceExt};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let quota = MemoryQuota::new(1, Duration::from_secs(60)).unwrap();
//! let config = AdmissionConfig::<String>::builder()
//!     .key_extractor(GlobalKey::new("all"))
//!     .build()
//!     .unwrap();
//!
//! let svc = ServiceBuilder::new()
//!     .layer(AdmissionLayer::new(quota, config))
//!     .service(service_fn(|_req: http::Request<()>| async {
//!         Ok::<_, std::convert::Infallible>(http::Response::new(String::from("hello")))
//!     }));
//!
//! let res = svc.clone().oneshot(http::Request::new(())).await.unwrap();
//! assert_eq!(res.status(), 200);
//! let res = svc.oneshot(http::Request::new(())).await.unwrap();
//! assert_eq!(res.status(), 429);
//! # });
//! ```

use crate::admission::{Admission, Decision};
use crate::config::AdmissionConfig;
use crate::handler::{insert_rate_limit_headers, LimitReached};
use crate::quota::{QuotaKey, QuotaService};
use crate::telemetry::{emit_best_effort, NullSink, TelemetrySink};
use futures::future::BoxFuture;
use http::{Request, Response};
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;

/// A layer that admits requests against a [`QuotaService`].
pub struct AdmissionLayer<Q, B, T = NullSink> {
    admission: Admission<Q, B>,
    sink: T,
}

impl<Q, B> AdmissionLayer<Q, B>
where
    Q: QuotaService,
{
    /// Create a new admission layer.
    pub fn new(quota: Q, config: AdmissionConfig<B>) -> Self {
        Self { admission: Admission::new(quota, config), sink: NullSink }
    }
}

impl<Q, B> AdmissionLayer<Q, B>
where
    Q: QuotaService,
    B: From<&'static str> + 'static,
{
    /// Create an admission layer with the default configuration.
    pub fn with_defaults(quota: Q) -> Self {
        Self::new(quota, AdmissionConfig::default())
    }
}

impl<Q, B, T> AdmissionLayer<Q, B, T> {
    /// Emit an [`AdmissionEvent`](crate::AdmissionEvent) per decision and refund to `sink`.
    pub fn with_sink<T2>(self, sink: T2) -> AdmissionLayer<Q, B, T2>
    where
        T2: TelemetrySink,
    {
        AdmissionLayer { admission: self.admission, sink }
    }
}

impl<Q, B, T: Clone> Clone for AdmissionLayer<Q, B, T> {
    fn clone(&self) -> Self {
        Self { admission: self.admission.clone(), sink: self.sink.clone() }
    }
}

impl<Q, B, T> std::fmt::Debug for AdmissionLayer<Q, B, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionLayer").field("admission", &self.admission).finish()
    }
}

impl<S, Q, B, T> Layer<S> for AdmissionLayer<Q, B, T>
where
    T: Clone,
{
    type Service = AdmissionService<S, Q, B, T>;

    fn layer(&self, service: S) -> Self::Service {
        AdmissionService {
            inner: service,
            admission: self.admission.clone(),
            sink: self.sink.clone(),
        }
    }
}

/// Middleware service that admits, denies, or fails requests before the inner service.
pub struct AdmissionService<S, Q, B, T = NullSink> {
    inner: S,
    admission: Admission<Q, B>,
    sink: T,
}

impl<S: Clone, Q, B, T: Clone> Clone for AdmissionService<S, Q, B, T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone(), admission: self.admission.clone(), sink: self.sink.clone() }
    }
}

impl<S, Q, B, T> std::fmt::Debug for AdmissionService<S, Q, B, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionService").field("admission", &self.admission).finish()
    }
}

impl<S, Q, T, ReqBody, ResBody> Service<Request<ReqBody>> for AdmissionService<S, Q, ResBody, T>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    Q: QuotaService + 'static,
    T: TelemetrySink,
    ReqBody: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        // The driven-to-ready service is the one that must handle this request.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let admission = self.admission.clone();
        let sink = self.sink.clone();

        Box::pin(async move {
            let (mut parts, body) = req.into_parts();
            let decision = admission.decide(&parts).await;
            emit_best_effort(sink.clone(), decision.event()).await;

            match decision {
                Decision::Excluded { .. } => inner.call(Request::from_parts(parts, body)).await,
                Decision::Errored { error, .. } => {
                    Ok(admission.config().error_response(&parts, &error))
                }
                Decision::Denied { key, verdict } => {
                    let mut res = admission.config().limit_reached_response(&parts, &verdict);
                    res.extensions_mut().insert(LimitReached { key, verdict });
                    Ok(res)
                }
                Decision::Admitted { key, verdict } => {
                    parts.extensions.insert(verdict.clone());
                    parts.extensions.insert(QuotaKey(key.clone()));

                    let mut result = inner.call(Request::from_parts(parts, body)).await;

                    let failed = match &result {
                        Ok(res) => admission.config().is_failure(res),
                        Err(_) => true,
                    };
                    let refund = admission.settle(&key, &verdict, failed).await;
                    if let Some(event) = refund.event(&key) {
                        emit_best_effort(sink, event).await;
                    }

                    if admission.config().expose_headers() {
                        if let Ok(res) = &mut result {
                            insert_rate_limit_headers(res.headers_mut(), &verdict);
                        }
                    }
                    result
                }
            }
        })
    }
}
