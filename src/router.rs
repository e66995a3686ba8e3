//! Radix-tree request router.
//!
//! One tree per HTTP method. O(path-length) lookup. You register a path, you
//! get a handler; matched `{name}` segments travel on the request as path
//! parameters for [`Request::param`] and the binder.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future;
use http::Method;
use matchit::Router as MatchitRouter;

use crate::error::HttpError;
use crate::handler::{BoxFuture, BoxedHandler, Dispatcher, Handler, Outcome};
use crate::request::Request;

/// The application router.
///
/// Build it once at startup and hand it to [`Middleware::builder`](crate::Middleware::builder).
/// Each registration returns `self` so calls chain naturally.
pub struct Router {
    routes: HashMap<Method, MatchitRouter<BoxedHandler>>,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: HashMap::new() }
    }

    /// Register a handler for a method + path pair.
    ///
    /// ```rust
    /// # use bulwark::{Failure, Request, Response, Router};
    /// # use http::Method;
    /// # async fn get_user(_: Request) -> Result<Response, Failure> { Ok(Response::text("")) }
    /// # async fn create_user(_: Request) -> Result<Response, Failure> { Ok(Response::text("")) }
    /// Router::new()
    ///     .on(Method::GET,  "/users/{id}", get_user)
    ///     .on(Method::POST, "/users",      create_user);
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if `path` is not a valid route pattern or conflicts with an
    /// existing route for the same method.
    pub fn on(mut self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.routes
            .entry(method)
            .or_default()
            .insert(path, handler.into_boxed_handler())
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
        self
    }

    pub fn get(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::GET, path, handler)
    }

    pub fn post(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::POST, path, handler)
    }

    pub fn put(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::PUT, path, handler)
    }

    pub fn patch(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::PATCH, path, handler)
    }

    pub fn delete(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::DELETE, path, handler)
    }

    pub(crate) fn lookup(
        &self,
        method: &Method,
        path: &str,
    ) -> Option<(BoxedHandler, HashMap<String, String>)> {
        let tree = self.routes.get(method)?;
        let matched = tree.at(path).ok()?;
        let handler = Arc::clone(matched.value);
        let params = matched.params.iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some((handler, params))
    }

    fn allows_other_method(&self, method: &Method, path: &str) -> bool {
        self.routes.iter().any(|(m, tree)| m != method && tree.at(path).is_ok())
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}

impl Dispatcher for Router {
    fn dispatch(&self, mut req: Request) -> BoxFuture {
        match self.lookup(req.method(), req.path()) {
            Some((handler, params)) => {
                req.set_params(params);
                handler.call(req)
            }
            None => {
                let err = if self.allows_other_method(req.method(), req.path()) {
                    HttpError::method_not_allowed("method not allowed")
                } else {
                    HttpError::not_found("not found")
                };
                let outcome: Outcome = Err(err.into());
                Box::pin(future::ready(outcome))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http::StatusCode;

    use super::*;
    use crate::error::Failure;
    use crate::response::Response;

    async fn echo_id(req: Request) -> Result<Response, Failure> {
        Ok(Response::text(req.param("id").unwrap_or("none").to_owned()))
    }

    fn request(method: Method, uri: &str) -> Request {
        http::Request::builder()
            .method(method)
            .uri(uri)
            .body(Bytes::new())
            .unwrap()
            .into()
    }

    fn router() -> Router {
        Router::new().get("/users/{id}", echo_id)
    }

    #[tokio::test]
    async fn matched_params_reach_the_handler() {
        let res = router().dispatch(request(Method::GET, "/users/42")).await.unwrap();
        assert_eq!(res.status_code(), StatusCode::OK);
        assert_eq!(&res.body()[..], b"42");
    }

    #[tokio::test]
    async fn unknown_path_is_404() {
        match router().dispatch(request(Method::GET, "/nope")).await {
            Err(Failure::Http(e)) => assert_eq!(e.status(), 404),
            other => panic!("expected 404, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn wrong_method_is_405() {
        match router().dispatch(request(Method::DELETE, "/users/1")).await {
            Err(Failure::Http(e)) => assert_eq!(e.status(), 405),
            other => panic!("expected 405, got {other:?}"),
        }
    }

    #[test]
    #[should_panic(expected = "invalid route")]
    fn conflicting_route_panics() {
        let _ = Router::new()
            .get("/users/{id}", echo_id)
            .get("/users/{name}", echo_id);
    }
}
