//! Response encoding: serde values to JSON or XML responses.
//!
//! Every encoder shares the same status handling: `204 No Content` writes
//! the status only, with no content type and no body. Encoding failures are
//! returned as [`Failure::Unexpected`] so they reach the middleware's failure
//! boundary like any other fault.
//!
//! ```rust
//! use bulwark::{encode, Failure, Request, Response};
//! use serde::Serialize;
//!
//! #[derive(Serialize)]
//! struct User { id: u64, name: String }
//!
//! async fn get_user(_req: Request) -> Result<Response, Failure> {
//!     encode::json(&User { id: 1, name: "alice".into() })
//! }
//! ```

use http::StatusCode;
use serde::Serialize;

use crate::error::Failure;
use crate::response::{ContentType, Response};

/// Prefix written before every XML document.
pub const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

/// `200 OK` with `value` as `application/json`.
pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Response, Failure> {
    json_status(StatusCode::OK, value)
}

/// `status` with `value` as `application/json`.
pub fn json_status<T: Serialize + ?Sized>(status: StatusCode, value: &T) -> Result<Response, Failure> {
    if status == StatusCode::NO_CONTENT {
        return Ok(empty_status(status));
    }
    let body = serde_json::to_vec(value).map_err(Failure::unexpected)?;
    Ok(Response::builder().status(status).bytes(ContentType::Json, body))
}

/// `200 OK` with `value` as `application/xml`.
pub fn xml<T: Serialize + ?Sized>(value: &T) -> Result<Response, Failure> {
    xml_status(StatusCode::OK, value)
}

/// `status` with `value` as `application/xml`, preceded by [`XML_DECLARATION`].
///
/// The root element is named after the serialised type.
pub fn xml_status<T: Serialize + ?Sized>(status: StatusCode, value: &T) -> Result<Response, Failure> {
    if status == StatusCode::NO_CONTENT {
        return Ok(empty_status(status));
    }
    let document = quick_xml::se::to_string(value).map_err(Failure::unexpected)?;
    let mut body = String::with_capacity(XML_DECLARATION.len() + document.len());
    body.push_str(XML_DECLARATION);
    body.push_str(&document);
    Ok(Response::builder().status(status).bytes(ContentType::Xml, body))
}

/// The status line alone.
pub fn empty_status(status: StatusCode) -> Response {
    Response::status(status)
}
