//! Middleware configuration.
//!
//! An [`AdmissionConfig`] is assembled once through [`AdmissionConfigBuilder`] and is read-only
//! afterwards. Every clone of the middleware shares it behind an `Arc`, so concurrent requests
//! see the same strategies and nothing can swap one out mid-flight.

use crate::handler::{
    default_error_response, default_limit_reached_response, ErrorHandler, LimitReachedHandler,
};
use crate::key::{ClientIp, KeyExtractor};
use crate::quota::QuotaVerdict;
use crate::{BuildError, QuotaError};
use http::request::Parts;
use http::Response;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Deadline on refund calls unless overridden with
/// [`AdmissionConfigBuilder::refund_timeout`].
pub const DEFAULT_REFUND_TIMEOUT: Duration = Duration::from_secs(1);

type ExclusionPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;
type FailureClassifier<B> = Arc<dyn Fn(&Response<B>) -> bool + Send + Sync>;

/// Validated, immutable strategies for one middleware instance.
pub struct AdmissionConfig<B> {
    key_extractor: Arc<dyn KeyExtractor>,
    excluded: Option<ExclusionPredicate>,
    on_error: ErrorHandler<B>,
    on_limit_reached: LimitReachedHandler<B>,
    refund_failed_requests: bool,
    is_failure: FailureClassifier<B>,
    quota_timeout: Option<Duration>,
    refund_timeout: Duration,
    expose_headers: bool,
}

impl<B> std::fmt::Debug for AdmissionConfig<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionConfig")
            .field("key_extractor", &"<extractor>")
            .field("excluded", &self.excluded.is_some())
            .field("on_error", &"<handler>")
            .field("on_limit_reached", &"<handler>")
            .field("refund_failed_requests", &self.refund_failed_requests)
            .field("is_failure", &"<predicate>")
            .field("quota_timeout", &self.quota_timeout)
            .field("refund_timeout", &self.refund_timeout)
            .field("expose_headers", &self.expose_headers)
            .finish()
    }
}

impl<B> AdmissionConfig<B>
where
    B: From<&'static str> + 'static,
{
    /// Construct a new builder with defaults.
    pub fn builder() -> AdmissionConfigBuilder<B> {
        AdmissionConfigBuilder::new()
    }
}

impl<B> Default for AdmissionConfig<B>
where
    B: From<&'static str> + 'static,
{
    fn default() -> Self {
        AdmissionConfigBuilder::new().assemble()
    }
}

impl<B> AdmissionConfig<B> {
    pub(crate) fn extract_key(&self, parts: &Parts) -> String {
        self.key_extractor.extract(parts)
    }

    pub(crate) fn is_excluded(&self, key: &str) -> bool {
        self.excluded.as_ref().is_some_and(|excluded| excluded(key))
    }

    pub(crate) fn error_response(&self, parts: &Parts, error: &QuotaError) -> Response<B> {
        (self.on_error)(parts, error)
    }

    pub(crate) fn limit_reached_response(
        &self,
        parts: &Parts,
        verdict: &QuotaVerdict,
    ) -> Response<B> {
        (self.on_limit_reached)(parts, verdict)
    }

    pub(crate) fn is_failure(&self, response: &Response<B>) -> bool {
        (self.is_failure)(response)
    }

    /// Whether admitted requests that fail downstream give their unit back.
    pub fn refund_failed_requests(&self) -> bool {
        self.refund_failed_requests
    }

    /// Deadline applied to each quota check, if any.
    pub fn quota_timeout(&self) -> Option<Duration> {
        self.quota_timeout
    }

    /// Deadline applied to each refund call. Always finite.
    pub fn refund_timeout(&self) -> Duration {
        self.refund_timeout
    }

    /// Whether admitted responses carry `X-RateLimit-*` headers.
    pub fn expose_headers(&self) -> bool {
        self.expose_headers
    }
}

/// Builder for [`AdmissionConfig`].
pub struct AdmissionConfigBuilder<B> {
    key_extractor: Arc<dyn KeyExtractor>,
    excluded: Option<ExclusionPredicate>,
    on_error: ErrorHandler<B>,
    on_limit_reached: LimitReachedHandler<B>,
    refund_failed_requests: bool,
    is_failure: FailureClassifier<B>,
    quota_timeout: Option<Duration>,
    refund_timeout: Duration,
    expose_headers: bool,
}

impl<B> AdmissionConfigBuilder<B>
where
    B: From<&'static str> + 'static,
{
    /// Defaults: key by client IP, exclude nothing, 500 on quota failure, 429 on denial,
    /// no refunds, no check deadline, a one second refund deadline, no headers on admitted
    /// responses.
    pub fn new() -> Self {
        Self {
            key_extractor: Arc::new(ClientIp::default()),
            excluded: None,
            on_error: Arc::new(default_error_response::<B>),
            on_limit_reached: Arc::new(default_limit_reached_response::<B>),
            refund_failed_requests: false,
            is_failure: Arc::new(|res: &Response<B>| {
                res.status().is_client_error() || res.status().is_server_error()
            }),
            quota_timeout: None,
            refund_timeout: DEFAULT_REFUND_TIMEOUT,
            expose_headers: false,
        }
    }
}

impl<B> Default for AdmissionConfigBuilder<B>
where
    B: From<&'static str> + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<B> AdmissionConfigBuilder<B> {
    /// Set the key extractor.
    pub fn key_extractor<K>(mut self, extractor: K) -> Self
    where
        K: KeyExtractor + 'static,
    {
        self.key_extractor = Arc::new(extractor);
        self
    }

    /// Skip quota enforcement entirely for keys matching `predicate`.
    ///
    /// Evaluated on every request, before the quota is consulted.
    pub fn exclude<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.excluded = Some(Arc::new(predicate));
        self
    }

    /// Skip quota enforcement for an exact set of keys.
    pub fn exclude_keys<I, K>(self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let keys: HashSet<String> = keys.into_iter().map(Into::into).collect();
        self.exclude(move |key| keys.contains(key))
    }

    /// Set the reaction to a failing quota backend.
    pub fn on_error<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Parts, &QuotaError) -> Response<B> + Send + Sync + 'static,
    {
        self.on_error = Arc::new(handler);
        self
    }

    /// Set the reaction to an exhausted quota.
    pub fn on_limit_reached<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Parts, &QuotaVerdict) -> Response<B> + Send + Sync + 'static,
    {
        self.on_limit_reached = Arc::new(handler);
        self
    }

    /// Refund the consumed unit when an admitted request fails downstream.
    pub fn refund_failed_requests(mut self, refund: bool) -> Self {
        self.refund_failed_requests = refund;
        self
    }

    /// Decide which downstream responses count as failures for refunds.
    ///
    /// Defaults to any 4xx or 5xx status. An error returned by the inner service always counts.
    pub fn failure_classifier<F>(mut self, classifier: F) -> Self
    where
        F: Fn(&Response<B>) -> bool + Send + Sync + 'static,
    {
        self.is_failure = Arc::new(classifier);
        self
    }

    /// Bound each quota check. An expired check fails closed through the error handler.
    pub fn quota_timeout(mut self, timeout: Duration) -> Self {
        self.quota_timeout = Some(timeout);
        self
    }

    /// Bound each refund call. An expired refund is dropped; the response goes out unchanged.
    pub fn refund_timeout(mut self, timeout: Duration) -> Self {
        self.refund_timeout = timeout;
        self
    }

    /// Add `X-RateLimit-*` headers to admitted responses.
    pub fn expose_headers(mut self, expose: bool) -> Self {
        self.expose_headers = expose;
        self
    }

    /// Validate and freeze the configuration.
    pub fn build(self) -> Result<AdmissionConfig<B>, BuildError> {
        if let Some(timeout) = self.quota_timeout {
            if timeout == Duration::ZERO || timeout == Duration::MAX {
                return Err(BuildError::InvalidTimeout(timeout));
            }
        }
        if self.refund_timeout == Duration::ZERO || self.refund_timeout == Duration::MAX {
            return Err(BuildError::InvalidTimeout(self.refund_timeout));
        }
        Ok(self.assemble())
    }

    fn assemble(self) -> AdmissionConfig<B> {
        AdmissionConfig {
            key_extractor: self.key_extractor,
            excluded: self.excluded,
            on_error: self.on_error,
            on_limit_reached: self.on_limit_reached,
            refund_failed_requests: self.refund_failed_requests,
            is_failure: self.is_failure,
            quota_timeout: self.quota_timeout,
            refund_timeout: self.refund_timeout,
            expose_headers: self.expose_headers,
        }
    }
}
