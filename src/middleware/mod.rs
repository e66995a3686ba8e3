//! The request middleware.
//!
//! [`Middleware`] wraps a [`Dispatcher`] (normally a [`Router`]) and gives
//! every request the same treatment:
//!
//! 1. resolve a request identifier and expose it as `X-Request-ID`,
//! 2. log `request started`,
//! 3. dispatch inside a failure boundary that catches returned
//!    [`Failure`]s *and* panics and turns them into one response,
//! 4. log `request finished` with the final status and elapsed seconds.
//!
//! ```rust,no_run
//! use bulwark::{HttpError, Middleware, Request, Response, Router};
//!
//! async fn find(req: Request) -> Result<Response, HttpError> {
//!     match req.param("id") {
//!         Some("1") => Ok(Response::text("found")),
//!         _ => Err(HttpError::new(404, 1001, "not found")),
//!     }
//! }
//!
//! let app = Middleware::builder(Router::new().get("/items/{id}", find))
//!     .detailed_errors(false)
//!     .build();
//! # let _ = app;
//! ```

mod recover;
pub mod request_id;

use std::convert::Infallible;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use futures::FutureExt;
use http_body_util::{BodyExt, Full};
use tracing::instrument::WithSubscriber;
use tracing::{info, info_span, warn, Instrument};

use crate::config::Config;
use crate::error::{Failure, HttpError};
use crate::handler::{Dispatcher, Outcome};
use crate::request::Request;
use crate::response::Response;
use crate::router::Router;

pub use request_id::{RequestIdFn, REQUEST_ID_HEADER};

/// Request middleware around a [`Dispatcher`].
///
/// Cheap to clone: the state lives behind an `Arc`, so one instance can be
/// shared by every connection.
pub struct Middleware<D = Router> {
    shared: Arc<Shared<D>>,
}

struct Shared<D> {
    dispatcher: D,
    request_id: RequestIdFn,
    detailed_errors: bool,
    logger: Option<tracing::Dispatch>,
}

impl<D> Clone for Middleware<D> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<D: Dispatcher> Middleware<D> {
    /// Wrap `dispatcher` with the default settings.
    pub fn new(dispatcher: D) -> Self {
        Self::builder(dispatcher).build()
    }

    pub fn builder(dispatcher: D) -> MiddlewareBuilder<D> {
        MiddlewareBuilder {
            dispatcher,
            request_id: None,
            detailed_errors: false,
            logger: None,
        }
    }

    /// Run one request through the middleware.
    ///
    /// Always yields exactly one response; handler failures and panics are
    /// converted, never propagated.
    pub async fn handle(&self, req: Request) -> Response {
        self.scoped(self.process(req, None)).await
    }

    /// Run the future under the configured log sink, if any.
    async fn scoped<F: Future<Output = Response>>(&self, fut: F) -> Response {
        match &self.shared.logger {
            Some(logger) => fut.with_subscriber(logger.clone()).await,
            None => fut.await,
        }
    }

    /// `early` short-circuits dispatch with a failure found before routing.
    async fn process(&self, mut req: Request, early: Option<Failure>) -> Response {
        let shared = &self.shared;
        let request_id = (shared.request_id)(&req);
        req.set_request_id(request_id.clone());

        let start = Instant::now();
        let method = req.method().clone();
        let uri = req.uri().clone();

        info!(request_id = %request_id, method = %method, uri = %uri, "request started");

        // A panic payload or the handler's outcome.
        let caught: std::thread::Result<Outcome> = match early {
            Some(failure) => Ok(Err(failure)),
            None => {
                let span = info_span!("request", request_id = %request_id);
                let downstream = async move { shared.dispatcher.dispatch(req).await };
                AssertUnwindSafe(downstream.instrument(span)).catch_unwind().await
            }
        };

        let mut response = match caught {
            Ok(Ok(response)) => response,
            Ok(Err(failure)) => recover::failure_response(failure, &request_id, shared.detailed_errors),
            Err(payload) => recover::panic_response(payload, &request_id, shared.detailed_errors),
        };
        response.set_header(REQUEST_ID_HEADER, &request_id);

        let status = response.status_code();
        let elapsed = format!("{:.3}s", start.elapsed().as_secs_f64());
        info!(
            request_id = %request_id,
            status = status.as_str(),
            method = %method,
            uri = %uri,
            elapsed = %elapsed,
            "request finished",
        );
        response
    }
}

// ── Builder ───────────────────────────────────────────────────────────────────

/// Fluent builder for [`Middleware`]. Obtain via [`Middleware::builder`].
pub struct MiddlewareBuilder<D> {
    dispatcher: D,
    request_id: Option<RequestIdFn>,
    detailed_errors: bool,
    logger: Option<tracing::Dispatch>,
}

impl<D: Dispatcher> MiddlewareBuilder<D> {
    /// Derive request identifiers with `f` instead of a random UUID.
    pub fn request_id<F>(mut self, f: F) -> Self
    where
        F: Fn(&Request) -> String + Send + Sync + 'static,
    {
        self.request_id = Some(Arc::new(f));
        self
    }

    /// Include the failure text in 500 responses.
    pub fn detailed_errors(mut self, enabled: bool) -> Self {
        self.detailed_errors = enabled;
        self
    }

    /// Log through `logger` instead of the process-wide default.
    pub fn logger(mut self, logger: tracing::Dispatch) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Apply the settings carried by a [`Config`].
    pub fn config(mut self, config: &Config) -> Self {
        self.detailed_errors = config.detailed_errors;
        self
    }

    pub fn build(self) -> Middleware<D> {
        recover::install_panic_hook();
        let id_fn: RequestIdFn = match self.request_id {
            Some(f) => f,
            None => Arc::new(|_: &Request| request_id::generate()),
        };
        Middleware {
            shared: Arc::new(Shared {
                dispatcher: self.dispatcher,
                request_id: id_fn,
                detailed_errors: self.detailed_errors,
                logger: self.logger,
            }),
        }
    }
}

// ── hyper integration ─────────────────────────────────────────────────────────

/// Serve the middleware with hyper: hand a clone to `serve_connection`.
///
/// The request body is buffered before dispatch. A body that fails to read
/// is answered with a 400 through the same failure boundary.
impl<D, B> hyper::service::Service<http::Request<B>> for Middleware<D>
where
    D: Dispatcher,
    B: hyper::body::Body + Send + 'static,
    B::Data: Send,
    B::Error: std::fmt::Display,
{
    type Response = http::Response<Full<Bytes>>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Infallible>> + Send>>;

    fn call(&self, req: http::Request<B>) -> Self::Future {
        let this = self.clone();
        Box::pin(async move {
            let response = this.scoped(async {
                let (parts, body) = req.into_parts();
                let (body, early) = match body.collect().await {
                    Ok(collected) => (collected.to_bytes(), None),
                    Err(e) => {
                        warn!(error = %e, "failed to read request body");
                        let failure = HttpError::bad_request("unable to read request body");
                        (Bytes::new(), Some(Failure::from(failure)))
                    }
                };
                this.process(Request::from_parts(parts, body), early).await
            })
            .await;
            Ok(response.into_http())
        })
    }
}
