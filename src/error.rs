//! Failure types a handler may return.
//!
//! Every handler returns `Result<R, E>` where `E: Into<Failure>`. The
//! middleware's failure boundary is the only place a [`Failure`] becomes an
//! HTTP response:
//!
//! | Variant | Status | Body |
//! |---|---|---|
//! | [`Failure::Http`] | the error's status | `{"code":…,"message":…}` |
//! | [`Failure::Raw`] | the error's status | the raw bytes, untouched |
//! | [`Failure::Unexpected`] | 500 | generic or detailed message |
//!
//! Panics inside a handler end up in the same place as `Unexpected`.

use std::backtrace::Backtrace;
use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;
use http::StatusCode;
use serde::Serialize;

use crate::binding::BindError;
use crate::validation::ValidationError;

// ── HttpError ─────────────────────────────────────────────────────────────────

/// An expected, domain-level failure.
///
/// Serialised as `{"code": <extended code>, "message": <message>}` with the
/// `code` key omitted when the extended code is zero.
///
/// ```rust
/// use bulwark::HttpError;
///
/// let err = HttpError::new(404, 1001, "not found");
/// assert_eq!(err.to_string(), "404 (1001): not found");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{status} ({code}): {message}")]
pub struct HttpError {
    status: u16,
    code: i64,
    message: String,
}

impl HttpError {
    pub fn new(status: u16, code: i64, message: impl Into<String>) -> Self {
        Self { status, code, message: message.into() }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(400, 0, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(404, 0, message)
    }

    pub fn method_not_allowed(message: impl Into<String>) -> Self {
        Self::new(405, 0, message)
    }

    /// Attach a domain-specific extended code.
    pub fn with_code(mut self, code: i64) -> Self {
        self.code = code;
        self
    }

    pub fn status(&self) -> u16 { self.status }
    pub fn code(&self) -> i64 { self.code }
    pub fn message(&self) -> &str { &self.message }

    /// The wire status. Codes outside `100..=999` collapse to 500.
    pub(crate) fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    pub(crate) fn envelope(&self) -> ErrorBody<'_> {
        ErrorBody { code: self.code, message: &self.message }
    }
}

/// JSON error envelope.
#[derive(Serialize)]
pub(crate) struct ErrorBody<'a> {
    #[serde(skip_serializing_if = "is_zero")]
    pub(crate) code: i64,
    pub(crate) message: &'a str,
}

fn is_zero(code: &i64) -> bool {
    *code == 0
}

// ── RawError ──────────────────────────────────────────────────────────────────

/// A failure whose response is passed through byte-for-byte.
///
/// Use it when the handler already holds a complete alternate response, e.g.
/// an upstream service's error body that should reach the client unchanged.
///
/// ```rust
/// use bulwark::RawError;
///
/// let err = RawError::new(502, "<h1>bad gateway</h1>")
///     .with_content_type("text/html")
///     .with_header("retry-after", "5");
/// assert_eq!(err.status(), 502);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawError {
    status: u16,
    content_type: Option<String>,
    body: Bytes,
    headers: HashMap<String, String>,
}

impl RawError {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self { status, content_type: None, body: body.into(), headers: HashMap::new() }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn status(&self) -> u16 { self.status }
    pub fn body(&self) -> &Bytes { &self.body }
    pub fn headers(&self) -> &HashMap<String, String> { &self.headers }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub(crate) fn into_parts(self) -> (StatusCode, Option<String>, HashMap<String, String>, Bytes) {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, self.content_type, self.headers, self.body)
    }
}

impl fmt::Display for RawError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}]: {}",
            self.status,
            self.content_type.as_deref().unwrap_or(""),
            String::from_utf8_lossy(&self.body),
        )
    }
}

impl std::error::Error for RawError {}

// ── Unexpected ────────────────────────────────────────────────────────────────

/// Any failure that is neither an [`HttpError`] nor a [`RawError`].
///
/// A backtrace is captured when the value is built, so the log line written
/// by the failure boundary points at the code that gave up.
#[derive(Debug)]
pub struct Unexpected {
    error: Box<dyn std::error::Error + Send + Sync>,
    backtrace: Backtrace,
}

impl Unexpected {
    pub fn error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.error.as_ref()
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }
}

impl fmt::Display for Unexpected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

// ── Failure ───────────────────────────────────────────────────────────────────

/// Everything a handler can fail with.
#[derive(Debug, thiserror::Error)]
pub enum Failure {
    #[error(transparent)]
    Http(#[from] HttpError),

    #[error(transparent)]
    Raw(#[from] RawError),

    #[error("{0}")]
    Unexpected(Unexpected),
}

impl Failure {
    /// Wrap an arbitrary error as an unexpected failure (HTTP 500).
    pub fn unexpected<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Unexpected(Unexpected { error: error.into(), backtrace: Backtrace::force_capture() })
    }
}

/// Malformed input is the client's fault: 400.
impl From<BindError> for Failure {
    fn from(e: BindError) -> Self {
        Self::Http(HttpError::bad_request(e.to_string()))
    }
}

impl From<ValidationError> for Failure {
    fn from(e: ValidationError) -> Self {
        Self::Http(HttpError::bad_request(e.to_string()))
    }
}
