//! Shared fixtures for executor integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use bucketwise::{
    ClientConfig, PreparedBody, PreparedRequest, RawResponse, RequestExecutor, Sleeper, Transport,
    TransportError, TransportErrorKind,
};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

pub const BASE: &str = "http://api.test";

/// What the scripted transport does for one call.
#[derive(Debug, Clone)]
pub enum Reply {
    Respond(RawResponse),
    Reset,
}

/// A call as seen by the transport.
#[derive(Debug, Clone)]
pub struct Call {
    pub path: String,
    pub at: Instant,
    pub headers: HeaderMap,
    pub body: PreparedBody,
}

#[derive(Debug, Default)]
struct State {
    scripts: HashMap<String, VecDeque<Reply>>,
    calls: Vec<Call>,
    in_flight: HashMap<String, usize>,
    max_in_flight: HashMap<String, usize>,
    total_in_flight: usize,
    max_total_in_flight: usize,
}

/// In-memory transport replaying scripted replies per path. Unscripted calls get `200 {}`.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    state: Mutex<State>,
    latency: Duration,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_latency(latency: Duration) -> Arc<Self> {
        Arc::new(Self { latency, ..Self::default() })
    }

    pub fn script(&self, path: &str, replies: impl IntoIterator<Item = Reply>) {
        let mut state = self.state.lock().unwrap();
        state.scripts.entry(path.to_string()).or_default().extend(replies);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn calls_to(&self, path: &str) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.path == path).collect()
    }

    pub fn max_in_flight(&self, path: &str) -> usize {
        self.state.lock().unwrap().max_in_flight.get(path).copied().unwrap_or(0)
    }

    pub fn max_total_in_flight(&self) -> usize {
        self.state.lock().unwrap().max_total_in_flight
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: PreparedRequest) -> Result<RawResponse, TransportError> {
        let path = request.url.strip_prefix(BASE).unwrap_or(&request.url).to_string();
        let reply = {
            let mut guard = self.state.lock().unwrap();
            let state = &mut *guard;
            state.calls.push(Call {
                path: path.clone(),
                at: Instant::now(),
                headers: request.headers.clone(),
                body: request.body.clone(),
            });
            let current = state.in_flight.entry(path.clone()).or_default();
            *current += 1;
            let peak = state.max_in_flight.entry(path.clone()).or_default();
            *peak = (*peak).max(*current);
            state.total_in_flight += 1;
            state.max_total_in_flight = state.max_total_in_flight.max(state.total_in_flight);
            state.scripts.get_mut(&path).and_then(VecDeque::pop_front)
        };

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        {
            let mut guard = self.state.lock().unwrap();
            let state = &mut *guard;
            if let Some(count) = state.in_flight.get_mut(&path) {
                *count -= 1;
            }
            state.total_in_flight -= 1;
        }

        match reply.unwrap_or_else(|| Reply::Respond(json(StatusCode::OK, "{}"))) {
            Reply::Respond(response) => Ok(response),
            Reply::Reset => Err(TransportError::new(
                TransportErrorKind::ConnectionReset,
                io::Error::from(io::ErrorKind::ConnectionReset),
            )),
        }
    }
}

pub fn json(status: StatusCode, body: &str) -> RawResponse {
    let mut headers = HeaderMap::new();
    headers.insert(http::header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    RawResponse::new(status, headers, body.to_string())
}

pub fn status(code: u16) -> Reply {
    let status = StatusCode::from_u16(code).unwrap();
    Reply::Respond(json(status, r#"{"message": "scripted"}"#))
}

pub fn ok(body: &str) -> Reply {
    Reply::Respond(json(StatusCode::OK, body))
}

/// 200 carrying bucket accounting headers.
pub fn ok_with_bucket(hash: &str, limit: u32, remaining: u32, reset_after: f64) -> Reply {
    let mut response = json(StatusCode::OK, "{}");
    let pairs = [
        ("x-ratelimit-bucket", hash.to_string()),
        ("x-ratelimit-limit", limit.to_string()),
        ("x-ratelimit-remaining", remaining.to_string()),
        ("x-ratelimit-reset-after", reset_after.to_string()),
    ];
    for (name, value) in pairs {
        response
            .headers
            .insert(HeaderName::from_static(name), HeaderValue::from_str(&value).unwrap());
    }
    Reply::Respond(response)
}

/// 200 carrying an absolute `X-Ratelimit-Reset` alongside `X-Ratelimit-Reset-After`.
pub fn ok_with_reset(hash: &str, remaining: u32, reset_at: f64, reset_after: f64) -> Reply {
    let Reply::Respond(mut response) = ok_with_bucket(hash, 1, remaining, reset_after) else {
        unreachable!()
    };
    response
        .headers
        .insert("x-ratelimit-reset", HeaderValue::from_str(&reset_at.to_string()).unwrap());
    Reply::Respond(response)
}

/// 429 from the API itself (it carries `Via`).
pub fn rate_limited(retry_after: f64, global: bool) -> Reply {
    let body = serde_json::json!({
        "message": "You are being rate limited.",
        "retry_after": retry_after,
        "global": global,
    });
    let mut response = json(StatusCode::TOO_MANY_REQUESTS, &body.to_string());
    response.headers.insert(http::header::VIA, HeaderValue::from_static("1.1 google"));
    Reply::Respond(response)
}

/// 429 from an edge proxy: no `Via`, HTML body.
pub fn edge_blocked() -> Reply {
    let mut headers = HeaderMap::new();
    headers.insert(http::header::CONTENT_TYPE, HeaderValue::from_static("text/html"));
    Reply::Respond(RawResponse::new(
        StatusCode::TOO_MANY_REQUESTS,
        headers,
        "<html>Error 1015: You are being rate limited</html>",
    ))
}

pub fn executor<S>(transport: Arc<ScriptedTransport>, sleeper: S) -> RequestExecutor
where
    S: Sleeper + 'static,
{
    executor_with(transport, sleeper, ClientConfig::new(BASE).token("test-token"))
}

pub fn executor_with<S>(
    transport: Arc<ScriptedTransport>,
    sleeper: S,
    config: ClientConfig,
) -> RequestExecutor
where
    S: Sleeper + 'static,
{
    RequestExecutor::builder(transport).config(config).with_sleeper(sleeper).build().unwrap()
}
