//! Response classification.
//!
//! A pure mapping from the response envelope to what the executor should do next.

use crate::response::ResponseBody;
use http::{HeaderMap, StatusCode};
use serde::Deserialize;

/// Statuses retried unconditionally with backoff.
pub const RETRYABLE_SERVER_STATUSES: [u16; 4] = [500, 502, 504, 524];

/// Body of a protocol 429.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct RateLimitBody {
    /// Seconds to wait before retrying.
    pub retry_after: f64,
    /// Whether the limit applies to every bucket for the credential.
    #[serde(default)]
    pub global: bool,
}

/// What a response means for the request that produced it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Outcome {
    Success,
    /// Protocol rate limit; wait `retry_after` and retry.
    RateLimited(RateLimitBody),
    /// 500/502/504/524; back off and retry.
    RetryableServerError,
    /// A 429 that did not come from the API itself (no `Via`, or an unstructured body).
    EdgeBlocked,
    Forbidden,
    NotFound,
    ServerError,
    ClientError,
}

impl Outcome {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Outcome::RateLimited(_) | Outcome::RetryableServerError)
    }
}

pub fn classify(status: StatusCode, headers: &HeaderMap, body: &ResponseBody) -> Outcome {
    if status.is_success() {
        return Outcome::Success;
    }
    match status.as_u16() {
        429 => {
            if !headers.contains_key(http::header::VIA) {
                return Outcome::EdgeBlocked;
            }
            match body.json::<RateLimitBody>() {
                Some(limit) => Outcome::RateLimited(limit),
                None => Outcome::EdgeBlocked,
            }
        }
        code if RETRYABLE_SERVER_STATUSES.contains(&code) => Outcome::RetryableServerError,
        403 => Outcome::Forbidden,
        404 => Outcome::NotFound,
        _ if status.is_server_error() => Outcome::ServerError,
        _ => Outcome::ClientError,
    }
}
