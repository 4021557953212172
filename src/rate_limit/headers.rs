//! Parsing of the rate-limit response headers.

use crate::route::BucketHash;
use http::HeaderMap;
use std::time::Duration;

pub const BUCKET: &str = "x-ratelimit-bucket";
pub const LIMIT: &str = "x-ratelimit-limit";
pub const REMAINING: &str = "x-ratelimit-remaining";
pub const RESET: &str = "x-ratelimit-reset";
pub const RESET_AFTER: &str = "x-ratelimit-reset-after";

/// The bucket hash advertised by a response, if any.
pub fn bucket_hash(headers: &HeaderMap) -> Option<BucketHash> {
    header_str(headers, BUCKET).filter(|h| !h.is_empty()).map(BucketHash::new)
}

/// Rate-limit accounting carried by a response.
///
/// Only produced when `X-Ratelimit-Remaining` is present; the other headers fall back to the
/// values the remote service documents as defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitHeaders {
    pub limit: u32,
    pub remaining: u32,
    /// `X-Ratelimit-Reset-After`, relative to receipt of the response.
    pub reset_after: Duration,
    /// `X-Ratelimit-Reset`, seconds since the Unix epoch.
    pub reset_at: Option<f64>,
}

impl RateLimitHeaders {
    pub fn parse(headers: &HeaderMap) -> Option<Self> {
        let remaining = header_str(headers, REMAINING)?.trim().parse::<f64>().ok()?;
        let limit = header_str(headers, LIMIT)
            .and_then(|v| v.trim().parse::<f64>().ok())
            .unwrap_or(1.0);
        let reset_after = header_str(headers, RESET_AFTER)
            .and_then(|v| v.trim().parse::<f64>().ok())
            .map(secs)
            .unwrap_or_default();
        let reset_at = header_str(headers, RESET).and_then(|v| v.trim().parse::<f64>().ok());
        Some(Self {
            limit: clamp_count(limit),
            remaining: clamp_count(remaining),
            reset_after,
            reset_at,
        })
    }

    /// Time until the bucket resets, either from `Reset-After` or from the absolute `Reset`
    /// timestamp measured against `unix_now`.
    pub fn reset_in(&self, use_clock: bool, unix_now: f64) -> Duration {
        match (use_clock, self.reset_at) {
            (true, Some(reset_at)) => secs(reset_at - unix_now),
            _ => self.reset_after,
        }
    }
}

/// Convert float seconds to a duration, mapping negative or non-finite values to zero.
pub(crate) fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

fn clamp_count(value: f64) -> u32 {
    if value.is_finite() && value > 0.0 {
        value.min(u32::MAX as f64) as u32
    } else {
        0
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderName, HeaderValue};

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(HeaderName::from_bytes(name.as_bytes()).unwrap(), HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn absent_remaining_means_no_accounting() {
        let map = headers(&[(LIMIT, "5"), (RESET_AFTER, "1.5")]);
        assert!(RateLimitHeaders::parse(&map).is_none());
    }

    #[test]
    fn parses_full_set() {
        let map = headers(&[
            ("X-RateLimit-Limit", "5"),
            ("X-RateLimit-Remaining", "0"),
            ("X-RateLimit-Reset-After", "2.250"),
            ("X-RateLimit-Reset", "1700000010.5"),
        ]);
        let parsed = RateLimitHeaders::parse(&map).expect("headers present");
        assert_eq!(parsed.limit, 5);
        assert_eq!(parsed.remaining, 0);
        assert_eq!(parsed.reset_after, Duration::from_millis(2250));
        assert_eq!(parsed.reset_at, Some(1_700_000_010.5));
    }

    #[test]
    fn limit_defaults_to_one() {
        let parsed = RateLimitHeaders::parse(&headers(&[(REMAINING, "1")])).unwrap();
        assert_eq!(parsed.limit, 1);
        assert_eq!(parsed.reset_after, Duration::ZERO);
    }

    #[test]
    fn reset_in_uses_clock_only_when_asked() {
        let parsed = RateLimitHeaders::parse(&headers(&[
            (REMAINING, "0"),
            (RESET_AFTER, "9"),
            (RESET, "1000.5"),
        ]))
        .unwrap();
        assert_eq!(parsed.reset_in(false, 1000.0), Duration::from_secs(9));
        assert_eq!(parsed.reset_in(true, 1000.0), Duration::from_millis(500));
        assert_eq!(parsed.reset_in(true, 2000.0), Duration::ZERO);
    }

    #[test]
    fn empty_bucket_header_is_ignored() {
        assert!(bucket_hash(&headers(&[(BUCKET, "")])).is_none());
        assert_eq!(bucket_hash(&headers(&[(BUCKET, "abc")])), Some(BucketHash::new("abc")));
    }
}
