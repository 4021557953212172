//! Errors surfaced to callers of the executor.
//!
//! Every retry decision is made inside the executor; a caller sees either a body or exactly one
//! of these.
use crate::request::BodyError;
use crate::response::ResponseBody;
use crate::transport::TransportError;
use http::StatusCode;

/// Terminal outcome of a failed request.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// The service asked us to wait longer than the configured ceiling.
    #[error("rate limited: retry after {retry_after:.2}s exceeds the configured ceiling")]
    RateLimited { retry_after: f64 },
    #[error("403 Forbidden: {body}")]
    Forbidden { body: ResponseBody },
    #[error("404 Not Found: {body}")]
    NotFound { body: ResponseBody },
    #[error("{status} server error: {body}")]
    ServerError { status: StatusCode, body: ResponseBody },
    /// Any other non-success response, including edge-provider 429s.
    #[error("{status}: {body}")]
    Http { status: StatusCode, body: ResponseBody },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("invalid request body: {0}")]
    Body(#[from] BodyError),
    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] http::header::InvalidHeaderValue),
    /// The retry loop ended without a response to report. Indicates a bug.
    #[error("request loop finished without a response; this is a bug")]
    Unreachable,
}

impl HttpError {
    /// Status of the response that caused this error, when there was one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Forbidden { .. } => Some(StatusCode::FORBIDDEN),
            Self::NotFound { .. } => Some(StatusCode::NOT_FOUND),
            Self::ServerError { status, .. } | Self::Http { status, .. } => Some(*status),
            Self::RateLimited { .. } => Some(StatusCode::TOO_MANY_REQUESTS),
            _ => None,
        }
    }

    pub fn body(&self) -> Option<&ResponseBody> {
        match self {
            Self::Forbidden { body }
            | Self::NotFound { body }
            | Self::ServerError { body, .. }
            | Self::Http { body, .. } => Some(body),
            _ => None,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    pub fn is_forbidden(&self) -> bool {
        matches!(self, Self::Forbidden { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::ServerError { .. })
    }

    /// Seconds the service asked for, if this is [`HttpError::RateLimited`].
    pub fn retry_after(&self) -> Option<f64> {
        match self {
            Self::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}
