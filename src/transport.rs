//! The transmission boundary.
//!
//! The executor hands a fully prepared request to a [`Transport`] and gets back the complete
//! response. Nothing about TLS, pooling or proxies leaks past this trait. [`ReqwestTransport`] is
//! the production implementation.

use crate::response::RawResponse;
use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method};
use std::error::Error as StdError;
use std::fmt;

/// A multipart field ready to be written to the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedPart {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

/// An encoded request body.
#[derive(Debug, Clone, PartialEq)]
pub enum PreparedBody {
    Empty,
    Json(Bytes),
    Multipart(Vec<PreparedPart>),
}

/// One attempt's worth of request, headers already built.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: PreparedBody,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The peer reset the connection; safe to retry with backoff.
    ConnectionReset,
    Timeout,
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionReset => f.write_str("connection reset"),
            Self::Timeout => f.write_str("timed out"),
            Self::Other => f.write_str("transport failure"),
        }
    }
}

/// Failure below the HTTP layer.
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {source}")]
pub struct TransportError {
    kind: TransportErrorKind,
    #[source]
    source: Box<dyn StdError + Send + Sync>,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, source: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self { kind, source: source.into() }
    }

    /// Classify an arbitrary error by walking its source chain for an I/O error.
    pub fn classify(source: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        let source = source.into();
        let kind = kind_of(source.as_ref());
        Self { kind, source }
    }

    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    pub fn is_connection_reset(&self) -> bool {
        self.kind == TransportErrorKind::ConnectionReset
    }
}

fn kind_of(err: &(dyn StdError + 'static)) -> TransportErrorKind {
    let mut current = Some(err);
    while let Some(err) = current {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            match io.kind() {
                std::io::ErrorKind::ConnectionReset => return TransportErrorKind::ConnectionReset,
                std::io::ErrorKind::TimedOut => return TransportErrorKind::Timeout,
                _ => {}
            }
        }
        current = err.source();
    }
    TransportErrorKind::Other
}

/// Send one prepared request and return the complete response.
///
/// Implementations must read the whole body before returning, so a cancelled call never yields a
/// partial response.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    async fn send(&self, request: PreparedRequest) -> Result<RawResponse, TransportError>;
}

/// [`Transport`] backed by a shared `reqwest::Client`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn multipart(parts: Vec<PreparedPart>) -> Result<reqwest::multipart::Form, TransportError> {
        // field names such as `files[0]` must reach the server unescaped
        let mut form = reqwest::multipart::Form::new().percent_encode_noop();
        for part in parts {
            let mut field = reqwest::multipart::Part::bytes(part.data.to_vec());
            if let Some(filename) = part.filename {
                field = field.file_name(filename);
            }
            if let Some(content_type) = part.content_type {
                field = field.mime_str(&content_type).map_err(TransportError::classify)?;
            }
            form = form.part(part.name, field);
        }
        Ok(form)
    }

    fn from_reqwest(err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            return TransportError::new(TransportErrorKind::Timeout, err);
        }
        TransportError::classify(err)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: PreparedRequest) -> Result<RawResponse, TransportError> {
        let mut builder = self.client.request(request.method, &request.url).headers(request.headers);
        builder = match request.body {
            PreparedBody::Empty => builder,
            PreparedBody::Json(bytes) => builder.body(bytes),
            PreparedBody::Multipart(parts) => builder.multipart(Self::multipart(parts)?),
        };

        let response = builder.send().await.map_err(Self::from_reqwest)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(Self::from_reqwest)?;
        Ok(RawResponse { status, headers, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[derive(Debug)]
    struct Wrapper(io::Error);

    impl fmt::Display for Wrapper {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "request failed")
        }
    }

    impl StdError for Wrapper {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn nested_connection_reset_is_detected() {
        let err = TransportError::classify(Wrapper(io::Error::from(io::ErrorKind::ConnectionReset)));
        assert!(err.is_connection_reset());
    }

    #[test]
    fn other_io_errors_are_not_resets() {
        let refused = TransportError::classify(io::Error::from(io::ErrorKind::ConnectionRefused));
        assert_eq!(refused.kind(), TransportErrorKind::Other);

        let timeout = TransportError::classify(Wrapper(io::Error::from(io::ErrorKind::TimedOut)));
        assert_eq!(timeout.kind(), TransportErrorKind::Timeout);
    }

    #[test]
    fn display_includes_kind_and_cause() {
        let err = TransportError::new(TransportErrorKind::ConnectionReset, "peer went away");
        assert_eq!(err.to_string(), "connection reset: peer went away");
    }

    #[test]
    fn multipart_with_bad_mime_is_a_transport_error() {
        let parts = vec![PreparedPart {
            name: "files[0]".into(),
            filename: Some("a.bin".into()),
            content_type: Some("not a mime".into()),
            data: Bytes::from_static(b"x"),
        }];
        assert!(ReqwestTransport::multipart(parts).is_err());
    }
}
