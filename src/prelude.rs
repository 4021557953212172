//! Convenient re-exports for common bucketwise types.
pub use crate::{
    backoff::{Backoff, MAX_BACKOFF},
    classify::Outcome,
    config::{ClientConfig, LiveConfig},
    error::HttpError,
    executor::RequestExecutor,
    global::GlobalThrottle,
    rate_limit::BucketRegistry,
    request::{FilePart, MultipartForm, RequestDescriptor},
    response::ResponseBody,
    route::Route,
    sleeper::{Sleeper, TokioSleeper},
    transport::{ReqwestTransport, Transport},
    voice::{RtpPacket, VoiceReceiver},
};
