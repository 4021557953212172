//! Request executor.
//!
//! Runs one logical request to completion: builds headers, encodes the body, waits for the global
//! gate and the route's bucket, transmits, reconciles bucket state from the response, and decides
//! whether to retry.
//!
//! Semantics:
//! - At most `max_attempts` transmissions per logical request (default 5).
//! - The bucket permit is taken on the first attempt and held until the request finishes, so
//!   retries keep their place ahead of later requests on the same bucket.
//! - The global gate is checked immediately before every transmission.
//! - Rate-limit accounting is updated from every response except 429s.
//! - Sleeps that would precede a transmission that can never happen (after the final attempt)
//!   are skipped.
//!
//! Example
//! ```rust,no_run
//! use bucketwise::{ClientConfig, RequestDescriptor, RequestExecutor, ReqwestTransport, Route};
//! use http::Method;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::from_env("https://gateway.example/api/v10")?.token("secret");
//! let executor = RequestExecutor::builder(Arc::new(ReqwestTransport::default()))
//!     .config(config)
//!     .build()?;
//!
//! let route = Route::new(Method::POST, "/channels/{channel_id}/messages").param("channel_id", 1);
//! let body = executor
//!     .execute(RequestDescriptor::new(route).json(serde_json::json!({"content": "hi"})))
//!     .await?;
//! println!("{}", body);
//! # Ok(())
//! # }
//! ```

use crate::classify::{classify, Outcome};
use crate::clock::{SystemClock, WallClock};
use crate::config::{ClientConfig, ConfigError, LiveConfig};
use crate::error::HttpError;
use crate::global::GlobalThrottle;
use crate::rate_limit::headers::{self, secs, RateLimitHeaders};
use crate::rate_limit::{BucketRegistry, Limiter};
use crate::request::RequestDescriptor;
use crate::response::{RawResponse, ResponseBody};
use crate::route::{BucketHash, BucketKey, Route};
use crate::transport::{PreparedRequest, Transport};
use crate::{Backoff, Sleeper, TokioSleeper};
use futures::future::BoxFuture;
use http::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use http::StatusCode;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_service::Service;
use tracing::{debug, error, warn};

pub const AUDIT_LOG_REASON: &str = "x-audit-log-reason";

/// Characters left unescaped in the audit-log reason: unreserved characters, `/` and space.
const REASON_ESCAPE: &AsciiSet =
    &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_').remove(b'~').remove(b'/').remove(b' ');

struct Inner {
    transport: Arc<dyn Transport>,
    config: LiveConfig,
    registry: BucketRegistry,
    global: Arc<GlobalThrottle>,
    sleeper: Arc<dyn Sleeper>,
    clock: Arc<dyn WallClock>,
    backoff: Backoff,
}

/// Executes logical requests against the remote API. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct RequestExecutor {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("config", &self.inner.config.load())
            .field("buckets", &self.inner.registry.len())
            .field("global_open", &self.inner.global.is_open())
            .field("backoff", &self.inner.backoff)
            .finish()
    }
}

impl RequestExecutor {
    pub fn builder(transport: Arc<dyn Transport>) -> RequestExecutorBuilder {
        RequestExecutorBuilder::new(transport)
    }

    pub fn config(&self) -> &LiveConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &BucketRegistry {
        &self.inner.registry
    }

    pub fn global_throttle(&self) -> &Arc<GlobalThrottle> {
        &self.inner.global
    }

    /// Run `request` to completion.
    pub async fn execute(&self, request: RequestDescriptor) -> Result<ResponseBody, HttpError> {
        let inner = &*self.inner;
        let config = inner.config.load();
        let route = &request.route;
        let method = route.method().clone();
        let url = route.url(&config.base_url);
        let bucket = inner.registry.resolve(route);
        let mut known_hash = bucket.hash.clone();
        let max_attempts = config.max_attempts;

        let mut permit = None;
        let mut last: Option<(StatusCode, ResponseBody)> = None;

        for attempt in 0..max_attempts {
            let is_last = attempt + 1 >= max_attempts;
            let prepared = self.prepare(&request, &url, attempt, &config)?;

            inner.global.wait().await;
            let held = match permit.take() {
                Some(held) => held,
                None => bucket.limiter.acquire().await,
            };
            held.throttle(&*inner.sleeper).await;
            // the gate may have closed while this request was queued on its bucket
            inner.global.wait().await;
            let held = permit.insert(held);

            let response = match inner.transport.send(prepared).await {
                Ok(response) => response,
                Err(err) if err.is_connection_reset() && !is_last => {
                    let delay = inner.backoff.delay(attempt);
                    warn!(
                        target: "bucketwise::executor",
                        %method, %url, attempt, delay_ms = delay.as_millis() as u64,
                        "connection reset; retrying"
                    );
                    inner.sleeper.sleep(delay).await;
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            let body = response.decode();
            debug!(
                target: "bucketwise::executor",
                %method, %url, attempt, status = response.status.as_u16(),
                "request returned"
            );
            self.reconcile(route, &mut known_hash, held.limiter(), &response, &config);

            match classify(response.status, &response.headers, &body) {
                Outcome::Success => {
                    debug!(target: "bucketwise::executor", %method, %url, "request succeeded");
                    return Ok(body);
                }
                Outcome::RateLimited(limit) => {
                    let retry_after = limit.retry_after;
                    if held.limiter().remaining() > 0 {
                        debug!(
                            target: "bucketwise::executor",
                            %method, %url, remaining = held.limiter().remaining(),
                            "429 despite remaining capacity; sub-rate-limit hit"
                        );
                    }
                    if let Some(ceiling) = config.max_ratelimit_timeout {
                        if retry_after > ceiling.as_secs_f64() {
                            warn!(
                                target: "bucketwise::executor",
                                %method, %url, retry_after, ceiling_secs = ceiling.as_secs_f64(),
                                "rate limited for longer than the configured ceiling; not waiting"
                            );
                            return Err(HttpError::RateLimited { retry_after });
                        }
                    }
                    last = Some((response.status, body));
                    if is_last {
                        break;
                    }

                    let wait = secs(retry_after);
                    warn!(
                        target: "bucketwise::executor",
                        %method, %url, retry_after, bucket = %bucket.key, global = limit.global,
                        "rate limited; retrying after the advertised delay"
                    );
                    let tripped = limit.global.then(|| {
                        warn!(target: "bucketwise::executor", retry_after, "global rate limit hit");
                        inner.global.trip(wait)
                    });
                    inner.sleeper.sleep(wait).await;
                    if let Some(generation) = tripped {
                        inner.global.reopen_if(generation);
                    }
                    debug!(target: "bucketwise::executor", %method, %url, "rate limit wait over");
                }
                Outcome::RetryableServerError => {
                    last = Some((response.status, body));
                    if is_last {
                        break;
                    }
                    let delay = inner.backoff.delay(attempt);
                    debug!(
                        target: "bucketwise::executor",
                        %method, %url, status = response.status.as_u16(), delay_ms = delay.as_millis() as u64,
                        "server error; backing off"
                    );
                    inner.sleeper.sleep(delay).await;
                }
                Outcome::Forbidden => return Err(HttpError::Forbidden { body }),
                Outcome::NotFound => return Err(HttpError::NotFound { body }),
                Outcome::ServerError => {
                    return Err(HttpError::ServerError { status: response.status, body })
                }
                Outcome::EdgeBlocked | Outcome::ClientError => {
                    return Err(HttpError::Http { status: response.status, body })
                }
            }
        }

        match last {
            Some((status, body)) if status.is_server_error() => {
                Err(HttpError::ServerError { status, body })
            }
            Some((status, body)) => Err(HttpError::Http { status, body }),
            None => {
                error!(
                    target: "bucketwise::executor",
                    %method, %url, "request loop ended without a response"
                );
                Err(HttpError::Unreachable)
            }
        }
    }

    fn prepare(
        &self,
        request: &RequestDescriptor,
        url: &str,
        attempt: usize,
        config: &ClientConfig,
    ) -> Result<PreparedRequest, HttpError> {
        let body = request.body.prepare(attempt)?;

        let mut headers = request.headers.clone();
        headers.insert(USER_AGENT, HeaderValue::from_str(&config.user_agent)?);
        if let Some(authorization) = config.authorization() {
            let mut value = HeaderValue::from_str(&authorization)?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        if request.body.is_json() {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }
        if let Some(reason) = request.reason.as_deref().filter(|r| !r.is_empty()) {
            let escaped = utf8_percent_encode(reason, REASON_ESCAPE).to_string();
            headers.insert(AUDIT_LOG_REASON, HeaderValue::from_str(&escaped)?);
        }

        Ok(PreparedRequest { method: request.route.method().clone(), url: url.to_string(), headers, body })
    }

    /// Learn bucket identity and accounting from a complete response.
    ///
    /// `known` is the hash this request currently believes its route has; it follows the
    /// response's hash once observed. Accounting goes to whichever limiter holds the response's
    /// bucket key after the hash is observed, so routes that turn out to share a bucket also share
    /// its remaining count.
    fn reconcile(
        &self,
        route: &Route,
        known: &mut Option<BucketHash>,
        limiter: &Arc<Limiter>,
        response: &RawResponse,
        config: &ClientConfig,
    ) {
        let registry = &self.inner.registry;
        let (key, target) = match headers::bucket_hash(&response.headers) {
            Some(hash) => {
                registry.observe(route, known.as_ref(), hash.clone(), limiter);
                let key = BucketKey::hashed(&hash, &route.major_parameters());
                let target = registry.get(&key).unwrap_or_else(|| Arc::clone(limiter));
                *known = Some(hash);
                (key, target)
            }
            None => (registry.key_for(route).0, Arc::clone(limiter)),
        };
        if response.status == StatusCode::TOO_MANY_REQUESTS {
            return;
        }
        if let Some(accounting) = RateLimitHeaders::parse(&response.headers) {
            let reset_in = accounting.reset_in(config.use_clock, self.inner.clock.unix_now());
            target.update(&accounting, reset_in);
            if accounting.remaining == 0 {
                debug!(
                    target: "bucketwise::limiter",
                    bucket = %key, reset_ms = reset_in.as_millis() as u64,
                    "bucket exhausted; pre-emptively rate limiting"
                );
            }
        }
    }
}

impl Service<RequestDescriptor> for RequestExecutor {
    type Response = ResponseBody;
    type Error = HttpError;
    type Future = BoxFuture<'static, Result<ResponseBody, HttpError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: RequestDescriptor) -> Self::Future {
        let executor = self.clone();
        Box::pin(async move { executor.execute(request).await })
    }
}

/// Builder for [`RequestExecutor`].
pub struct RequestExecutorBuilder {
    transport: Arc<dyn Transport>,
    config: ClientConfig,
    registry: Option<BucketRegistry>,
    global: Option<Arc<GlobalThrottle>>,
    sleeper: Arc<dyn Sleeper>,
    clock: Arc<dyn WallClock>,
    backoff: Backoff,
}

impl RequestExecutorBuilder {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            config: ClientConfig::default(),
            registry: None,
            global: None,
            sleeper: Arc::new(TokioSleeper),
            clock: Arc::new(SystemClock),
            backoff: Backoff::server_error(),
        }
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Share a global gate with other executors using the same credential.
    pub fn global_throttle(mut self, global: Arc<GlobalThrottle>) -> Self {
        self.global = Some(global);
        self
    }

    pub fn registry(mut self, registry: BucketRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn with_clock<C>(mut self, clock: C) -> Self
    where
        C: WallClock + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn build(self) -> Result<RequestExecutor, ConfigError> {
        let config = LiveConfig::new(self.config)?;
        let global = self
            .global
            .unwrap_or_else(|| Arc::new(GlobalThrottle::with_sleeper(self.sleeper.clone())));
        Ok(RequestExecutor {
            inner: Arc::new(Inner {
                transport: self.transport,
                config,
                registry: self.registry.unwrap_or_default(),
                global,
                sleeper: self.sleeper,
                clock: self.clock,
                backoff: self.backoff,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{FilePart, MultipartForm};
    use crate::response::RawResponse;
    use crate::transport::{PreparedBody, TransportError};
    use crate::InstantSleeper;
    use async_trait::async_trait;
    use http::{HeaderMap, Method};
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct Recorder {
        seen: Mutex<Vec<PreparedRequest>>,
    }

    #[async_trait]
    impl Transport for Recorder {
        async fn send(&self, request: PreparedRequest) -> Result<RawResponse, TransportError> {
            self.seen.lock().unwrap().push(request);
            Ok(RawResponse::new(StatusCode::NO_CONTENT, HeaderMap::new(), ""))
        }
    }

    fn executor(transport: Arc<Recorder>, config: ClientConfig) -> RequestExecutor {
        RequestExecutor::builder(transport).config(config).with_sleeper(InstantSleeper).build().unwrap()
    }

    fn route() -> Route {
        Route::new(Method::POST, "/channels/{channel_id}/messages").param("channel_id", 5)
    }

    #[tokio::test]
    async fn headers_carry_agent_token_type_and_escaped_reason() {
        let transport = Arc::new(Recorder::default());
        let config = ClientConfig::new("https://gateway.example/api/v10/").token("tkn").user_agent("ua/1");
        let request = RequestDescriptor::new(route())
            .json(serde_json::json!({"content": "x"}))
            .reason("spam & abuse/cleanup");

        executor(transport.clone(), config).execute(request).await.unwrap();

        let seen = transport.seen.lock().unwrap();
        let sent = &seen[0];
        assert_eq!(sent.url, "https://gateway.example/api/v10/channels/5/messages");
        assert_eq!(sent.headers[USER_AGENT], "ua/1");
        assert_eq!(sent.headers[AUTHORIZATION], "Bot tkn");
        assert!(sent.headers[AUTHORIZATION].is_sensitive());
        assert_eq!(sent.headers[CONTENT_TYPE], "application/json");
        assert_eq!(sent.headers[AUDIT_LOG_REASON], "spam %26 abuse/cleanup");
    }

    #[tokio::test]
    async fn raw_token_and_empty_reason() {
        let transport = Arc::new(Recorder::default());
        let config = ClientConfig::new("http://api").token("user-token").raw_token(true);
        let request = RequestDescriptor::new(route()).reason("");

        executor(transport.clone(), config).execute(request).await.unwrap();

        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen[0].headers[AUTHORIZATION], "user-token");
        assert!(!seen[0].headers.contains_key(AUDIT_LOG_REASON));
        assert!(!seen[0].headers.contains_key(CONTENT_TYPE));
        assert_eq!(seen[0].body, PreparedBody::Empty);
    }

    #[tokio::test]
    async fn multipart_bodies_do_not_get_a_json_content_type() {
        let transport = Arc::new(Recorder::default());
        let form = MultipartForm::new().file("files[0]", FilePart::from_bytes("a.png", "png"));
        let request = RequestDescriptor::new(route()).multipart(form);

        executor(transport.clone(), ClientConfig::new("http://api")).execute(request).await.unwrap();

        let seen = transport.seen.lock().unwrap();
        assert!(!seen[0].headers.contains_key(CONTENT_TYPE));
        assert!(!seen[0].headers.contains_key(AUTHORIZATION));
        assert!(matches!(&seen[0].body, PreparedBody::Multipart(parts) if parts[0].name == "files[0]"));
    }

    #[test]
    fn builder_rejects_zero_attempts() {
        let err = RequestExecutor::builder(Arc::new(Recorder::default()))
            .config(ClientConfig::new("http://api").max_attempts(0))
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::InvalidMaxAttempts(0));
    }

    #[tokio::test]
    async fn service_impl_delegates_to_execute() {
        use tower::ServiceExt;

        let transport = Arc::new(Recorder::default());
        let service = executor(transport.clone(), ClientConfig::new("http://api"));
        let body = service.oneshot(RequestDescriptor::new(route())).await.unwrap();
        assert_eq!(body, ResponseBody::Text(String::new()));
        assert_eq!(transport.seen.lock().unwrap().len(), 1);
    }
}
