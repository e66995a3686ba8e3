//! The failure boundary: every [`Failure`] and every panic becomes exactly
//! one response here.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::panic;
use std::sync::Once;

use http::StatusCode;
use tracing::error;

use crate::error::{ErrorBody, Failure, HttpError, RawError};
use crate::response::{ContentType, Response};

/// Upper bound on a backtrace written to the log.
pub(crate) const MAX_BACKTRACE_BYTES: usize = 1024 * 1024;

/// Body of a 500 when detailed errors are off.
pub(crate) const INTERNAL_ERROR_BODY: &str = r#"{"Message":"internal error"}"#;

pub(crate) fn failure_response(failure: Failure, request_id: &str, detailed: bool) -> Response {
    match failure {
        Failure::Http(e) => http_error_response(&e),
        Failure::Raw(e) => raw_error_response(e),
        Failure::Unexpected(e) => {
            let backtrace = e.backtrace().to_string();
            internal_error(&e.to_string(), backtrace, request_id, detailed)
        }
    }
}

pub(crate) fn panic_response(payload: Box<dyn Any + Send>, request_id: &str, detailed: bool) -> Response {
    // Falls back to the boundary's own stack if the hook saw nothing.
    let backtrace = take_panic_backtrace()
        .unwrap_or_else(Backtrace::force_capture)
        .to_string();
    internal_error(&panic_message(payload.as_ref()), backtrace, request_id, detailed)
}

thread_local! {
    /// Stack of the most recent panic on this thread, captured before unwinding.
    static PANIC_BACKTRACE: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
}

static PANIC_HOOK: Once = Once::new();

/// Chain a hook in front of the current panic hook that records the
/// panicking stack for [`panic_response`]. Installed at most once per process.
///
/// `catch_unwind` runs on the thread that panicked, so the thread-local is
/// still holding the fault site's frames when the boundary reads it.
pub(crate) fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let backtrace = Backtrace::force_capture();
            // Thread-locals may already be gone on a thread that is exiting.
            let _ = PANIC_BACKTRACE.try_with(|slot| *slot.borrow_mut() = Some(backtrace));
            previous(info);
        }));
    });
}

fn take_panic_backtrace() -> Option<Backtrace> {
    PANIC_BACKTRACE.with(|slot| slot.borrow_mut().take())
}

fn http_error_response(e: &HttpError) -> Response {
    let body = serde_json::to_vec(&e.envelope()).unwrap_or_else(|_| INTERNAL_ERROR_BODY.into());
    Response::builder().status(e.status_code()).bytes(ContentType::Json, body)
}

fn raw_error_response(e: RawError) -> Response {
    let (status, content_type, headers, body) = e.into_parts();
    let mut res = Response { status, headers: Vec::new(), body };
    if let Some(content_type) = content_type {
        res.set_header("content-type", &content_type);
    }
    for (name, value) in &headers {
        res.set_header(name, value);
    }
    res
}

fn internal_error(message: &str, mut backtrace: String, request_id: &str, detailed: bool) -> Response {
    truncate_at_boundary(&mut backtrace, MAX_BACKTRACE_BYTES);
    error!(request_id = %request_id, failure = %message, backtrace = %backtrace, "unhandled failure");

    let body = if detailed {
        let envelope = ErrorBody { code: 0, message };
        serde_json::to_vec(&envelope).unwrap_or_else(|_| INTERNAL_ERROR_BODY.into())
    } else {
        INTERNAL_ERROR_BODY.into()
    };
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .bytes(ContentType::Json, body)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with a non-string payload".to_owned()
    }
}

fn truncate_at_boundary(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_error_uses_envelope() {
        let res = failure_response(HttpError::new(404, 1001, "not found").into(), "id", false);
        assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(res.header("content-type"), Some("application/json"));
        assert_eq!(&res.body()[..], br#"{"code":1001,"message":"not found"}"#);
    }

    #[test]
    fn raw_error_passes_through() {
        let raw = RawError::new(503, "<busy/>")
            .with_content_type("application/xml")
            .with_header("Retry-After", "5");
        let res = failure_response(raw.into(), "id", false);
        assert_eq!(res.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(res.header("content-type"), Some("application/xml"));
        assert_eq!(res.header("retry-after"), Some("5"));
        assert_eq!(&res.body()[..], b"<busy/>");
    }

    #[test]
    fn raw_error_without_content_type_sets_none() {
        let res = failure_response(RawError::new(409, "x").into(), "id", false);
        assert_eq!(res.header("content-type"), None);
    }

    #[test]
    fn unexpected_hides_details_by_default() {
        let res = failure_response(Failure::unexpected("db down"), "id", false);
        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(&res.body()[..], INTERNAL_ERROR_BODY.as_bytes());
    }

    #[test]
    fn unexpected_details_on_request() {
        let res = failure_response(Failure::unexpected("db down"), "id", true);
        assert_eq!(&res.body()[..], br#"{"message":"db down"}"#);
    }

    #[inline(never)]
    fn hook_fault_site() {
        panic!("hook fault");
    }

    #[test]
    fn hook_records_the_panicking_stack() {
        install_panic_hook();
        let payload = std::panic::catch_unwind(hook_fault_site).unwrap_err();

        let recorded = take_panic_backtrace().expect("hook stored a backtrace");
        assert!(recorded.to_string().contains("hook_fault_site"));
        assert!(take_panic_backtrace().is_none());
        assert_eq!(panic_message(payload.as_ref()), "hook fault");
    }

    #[test]
    fn panic_payloads_become_messages() {
        assert_eq!(panic_message(&"boom"), "boom");
        assert_eq!(panic_message(&String::from("bang")), "bang");
        assert_eq!(panic_message(&42_u8), "panic with a non-string payload");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let mut s = "aé".repeat(4);
        truncate_at_boundary(&mut s, 2);
        assert_eq!(s, "a");
        let mut short = String::from("ok");
        truncate_at_boundary(&mut short, 10);
        assert_eq!(short, "ok");
    }
}
