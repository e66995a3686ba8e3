//! # bulwark
//!
//! Request middleware for HTTP services built on hyper.
//!
//! ## The contract
//!
//! Every request that passes through a [`Middleware`] gets:
//!
//! - a request identifier, echoed as `X-Request-ID` on the response,
//! - a `request started` / `request finished` pair of structured log lines,
//! - a failure boundary: whatever the handler returns or panics with, the
//!   client receives exactly one well-formed response.
//!
//! Handlers fail with a typed [`Failure`]:
//!
//! - [`HttpError`]: status + extended code + message, sent as
//!   `{"code":1001,"message":"not found"}`,
//! - [`RawError`]: a complete alternate response, passed through untouched,
//! - anything else ([`Failure::unexpected`] or a panic): `500` with
//!   `{"Message":"internal error"}` and a backtrace in the log.
//!
//! Inputs are built with the [`binding`] module: a [`Schema`](binding::Schema)
//! lists each field's sources (JSON body, XML body, path parameter, query
//! parameter) and rules (`required`, `max`), and binding fails with a
//! field-level diagnostic such as
//! `Field validation for 'Foo' failed on the 'required' tag`.
//!
//! What bulwark does not do: listen on sockets, terminate TLS, or implement
//! routing itself. Routing is delegated to [`matchit`]; transport is whatever
//! hyper connection loop the host already runs.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::OnceLock;
//!
//! use bulwark::binding::{Bind, Field, Schema};
//! use bulwark::{encode, Failure, Middleware, Request, Response, Router};
//! use serde::Serialize;
//!
//! #[derive(Default, Serialize)]
//! struct NewUser {
//!     name: String,
//!     age: u32,
//! }
//!
//! impl Bind for NewUser {
//!     fn schema() -> &'static Schema<Self> {
//!         static SCHEMA: OnceLock<Schema<NewUser>> = OnceLock::new();
//!         SCHEMA.get_or_init(|| {
//!             Schema::new()
//!                 .field(Field::new("Name", |u: &NewUser| &u.name, |u: &mut NewUser| &mut u.name)
//!                     .json("name").required())
//!                 .field(Field::new("Age", |u: &NewUser| &u.age, |u: &mut NewUser| &mut u.age)
//!                     .json("age").max(150.0))
//!         })
//!     }
//! }
//!
//! async fn create_user(req: Request) -> Result<Response, Failure> {
//!     let user: NewUser = req.bind()?;
//!     encode::json_status(http::StatusCode::CREATED, &user)
//! }
//!
//! let app = Middleware::new(Router::new().post("/users", create_user));
//! // hand `app.clone()` to hyper's `serve_connection` for each connection
//! # let _ = app;
//! ```

mod error;
mod handler;
mod request;
mod response;
mod router;

pub mod binding;
pub mod config;
pub mod encode;
pub mod logging;
pub mod middleware;
pub mod validation;

pub use error::{Failure, HttpError, RawError, Unexpected};
pub use handler::{BoxFuture, Dispatcher, Handler, Outcome};
pub use middleware::{Middleware, MiddlewareBuilder};
pub use request::Request;
pub use response::{ContentType, IntoResponse, Response, ResponseBuilder};
pub use router::Router;
