//! Logical requests and their bodies.
//!
//! A [`RequestDescriptor`] stays the same for every attempt of one logical request. The only part
//! that changes between attempts is the read position of file parts, which are rewound before
//! each retry so the full file is re-sent.

use crate::route::Route;
use crate::transport::{PreparedBody, PreparedPart};
use bytes::Bytes;
use http::HeaderMap;
use std::fmt;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::sync::Mutex;

/// Failure to produce the bytes of a request body.
#[derive(Debug, thiserror::Error)]
pub enum BodyError {
    #[error("failed to serialize JSON body: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to read file part '{filename}': {source}")]
    File {
        filename: String,
        #[source]
        source: io::Error,
    },
}

trait FileSource: Read + Seek + Send {}
impl<T: Read + Seek + Send> FileSource for T {}

/// A file attached to a multipart body.
///
/// The reader is remembered at its starting position; attempts after the first seek back there
/// before reading.
pub struct FilePart {
    filename: String,
    content_type: Option<String>,
    origin: u64,
    source: Mutex<Box<dyn FileSource>>,
}

impl fmt::Debug for FilePart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilePart")
            .field("filename", &self.filename)
            .field("content_type", &self.content_type)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

impl FilePart {
    pub fn from_bytes(filename: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            filename: filename.into(),
            content_type: None,
            origin: 0,
            source: Mutex::new(Box::new(Cursor::new(data.into()))),
        }
    }

    /// Wrap a seekable reader, remembering its current position as the start of the file.
    pub fn from_reader<R>(filename: impl Into<String>, mut reader: R) -> io::Result<Self>
    where
        R: Read + Seek + Send + 'static,
    {
        let origin = reader.stream_position()?;
        Ok(Self {
            filename: filename.into(),
            content_type: None,
            origin,
            source: Mutex::new(Box::new(reader)),
        })
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Read the file for attempt `attempt`, rewinding first on every attempt but the first.
    pub fn read_for_attempt(&self, attempt: usize) -> Result<Bytes, BodyError> {
        let mut source = self.source.lock().expect("file part poisoned");
        let read = |source: &mut Box<dyn FileSource>| -> io::Result<Vec<u8>> {
            if attempt > 0 {
                source.seek(SeekFrom::Start(self.origin))?;
            }
            let mut data = Vec::new();
            source.read_to_end(&mut data)?;
            Ok(data)
        };
        read(&mut *source)
            .map(Bytes::from)
            .map_err(|source| BodyError::File { filename: self.filename.clone(), source })
    }
}

/// One field of a multipart form.
#[derive(Debug)]
pub enum FormField {
    Text { name: String, value: String },
    File { name: String, file: FilePart },
}

/// Multipart form. Field names are sent verbatim, so `files[0]` keeps its brackets.
#[derive(Debug, Default)]
pub struct MultipartForm {
    fields: Vec<FormField>,
}

impl MultipartForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push(FormField::Text { name: name.into(), value: value.into() });
        self
    }

    /// Attach `payload` as the `payload_json` field.
    pub fn payload_json(self, payload: &serde_json::Value) -> Result<Self, BodyError> {
        let encoded = serde_json::to_string(payload)?;
        Ok(self.text("payload_json", encoded))
    }

    pub fn file(mut self, name: impl Into<String>, file: FilePart) -> Self {
        self.fields.push(FormField::File { name: name.into(), file });
        self
    }

    pub fn fields(&self) -> &[FormField] {
        &self.fields
    }

    fn prepare(&self, attempt: usize) -> Result<Vec<PreparedPart>, BodyError> {
        self.fields
            .iter()
            .map(|field| match field {
                FormField::Text { name, value } => Ok(PreparedPart {
                    name: name.clone(),
                    filename: None,
                    content_type: None,
                    data: Bytes::from(value.clone()),
                }),
                FormField::File { name, file } => Ok(PreparedPart {
                    name: name.clone(),
                    filename: Some(file.filename.clone()),
                    content_type: file.content_type.clone(),
                    data: file.read_for_attempt(attempt)?,
                }),
            })
            .collect()
    }
}

#[derive(Debug, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(serde_json::Value),
    Multipart(MultipartForm),
}

impl RequestBody {
    pub fn is_json(&self) -> bool {
        matches!(self, Self::Json(_))
    }

    /// Encode the body for attempt `attempt`.
    pub fn prepare(&self, attempt: usize) -> Result<PreparedBody, BodyError> {
        match self {
            Self::Empty => Ok(PreparedBody::Empty),
            Self::Json(value) => Ok(PreparedBody::Json(Bytes::from(serde_json::to_vec(value)?))),
            Self::Multipart(form) => Ok(PreparedBody::Multipart(form.prepare(attempt)?)),
        }
    }
}

/// Everything needed to perform one logical request.
#[derive(Debug)]
pub struct RequestDescriptor {
    pub route: Route,
    pub headers: HeaderMap,
    pub body: RequestBody,
    /// Human-readable reason recorded in the remote audit log.
    pub reason: Option<String>,
}

impl RequestDescriptor {
    pub fn new(route: Route) -> Self {
        Self { route, headers: HeaderMap::new(), body: RequestBody::Empty, reason: None }
    }

    pub fn json(mut self, value: serde_json::Value) -> Self {
        self.body = RequestBody::Json(value);
        self
    }

    pub fn multipart(mut self, form: MultipartForm) -> Self {
        self.body = RequestBody::Multipart(form);
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn header(mut self, name: http::HeaderName, value: http::HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}
