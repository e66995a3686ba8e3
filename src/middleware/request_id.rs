//! Request identifiers.

use std::sync::Arc;

use uuid::Uuid;

use crate::request::Request;

/// Header carrying the request identifier on every response.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Longest inbound identifier [`from_header_or_generate`] will reuse.
const MAX_REQUEST_ID_LENGTH: usize = 64;

/// Derives the identifier for one request.
pub type RequestIdFn = Arc<dyn Fn(&Request) -> String + Send + Sync + 'static>;

/// A fresh random UUID v4, e.g. `9b2f0e0c-5b8e-4f52-9a4c-2a8f3f6c1d7e`.
pub fn generate() -> String {
    Uuid::new_v4().to_string()
}

/// Reuse the caller's `X-Request-ID` when it is present and sane, else
/// [`generate`] one.
pub fn from_header_or_generate(req: &Request) -> String {
    req.header(REQUEST_ID_HEADER)
        .filter(|s| !s.is_empty() && s.len() <= MAX_REQUEST_ID_LENGTH)
        .map_or_else(generate, str::to_owned)
}
