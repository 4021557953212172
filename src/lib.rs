#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # bucketwise
//!
//! Rate-limit-aware request pipeline for HTTP APIs that publish their limits in response headers.
//!
//! ## Features
//!
//! - **Bucket discovery**: routes are mapped to server-side buckets as `X-Ratelimit-Bucket`
//!   hashes are observed; routes sharing a hash share one limiter
//! - **Per-bucket FIFO limiters** that pre-emptively wait when a bucket is exhausted
//! - **Global throttle gate** tripped by global 429s and shared across executors
//! - **Bounded retries** for 429s, transient server errors and connection resets
//! - **Response classification** into typed [`HttpError`] variants
//! - **Voice receive helpers**: RTP/RTCP packet parsing and a UDP receive loop
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bucketwise::{ClientConfig, RequestDescriptor, RequestExecutor, ReqwestTransport, Route};
//! use http::Method;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let executor = RequestExecutor::builder(Arc::new(ReqwestTransport::default()))
//!         .config(ClientConfig::from_env("https://gateway.example/api/v10")?.token("secret"))
//!         .build()?;
//!
//!     let route = Route::new(Method::GET, "/channels/{channel_id}").param("channel_id", 41771983423143937u64);
//!     let channel = executor.execute(RequestDescriptor::new(route)).await?;
//!     println!("{}", channel);
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod classify;
pub mod clock;
pub mod config;
pub mod error;
pub mod executor;
pub mod global;
pub mod prelude;
pub mod rate_limit;
pub mod request;
pub mod response;
pub mod route;
pub mod sleeper;
pub mod transport;
pub mod voice;

// Re-exports
pub use backoff::{Backoff, BackoffError};
pub use classify::{classify, Outcome, RateLimitBody};
pub use clock::{FixedClock, SystemClock, WallClock};
pub use config::{ClientConfig, ConfigError, LiveConfig};
pub use error::HttpError;
pub use executor::{RequestExecutor, RequestExecutorBuilder};
pub use global::GlobalThrottle;
pub use rate_limit::{BucketRegistry, Discovery, Limiter, RateLimitHeaders};
pub use request::{BodyError, FilePart, MultipartForm, RequestBody, RequestDescriptor};
pub use response::{RawResponse, ResponseBody};
pub use route::{BucketHash, BucketKey, Route, RouteKey};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use transport::{
    PreparedBody, PreparedPart, PreparedRequest, ReqwestTransport, Transport, TransportError,
    TransportErrorKind,
};
