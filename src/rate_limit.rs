//! Adaptive, server-directed rate limiting.
//!
//! - [`headers`]: parsing of `X-Ratelimit-*` response headers.
//! - [`Limiter`]: per-bucket FIFO gate plus remaining/reset accounting.
//! - [`BucketRegistry`]: learns which bucket each route belongs to and owns the limiters.
//!
//! # Keys
//!
//! Buckets are not configured up front. A route starts out limited under a key derived from the
//! route itself; the first response carrying `X-Ratelimit-Bucket` tells us the real bucket, and
//! from then on the route is limited under `hash:major-parameters`. Several routes that report the
//! same hash end up sharing one limiter.

pub mod headers;
pub mod limiter;
pub mod registry;

pub use headers::RateLimitHeaders;
pub use limiter::{Limiter, LimiterPermit, LimiterSnapshot};
pub use registry::{BucketRegistry, Discovery, ResolvedBucket};
