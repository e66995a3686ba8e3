//! A small user service behind bulwark.
//!
//! Run with:
//!   BULWARK_LOG_FORMAT=text cargo run --example basic
//!
//! Try:
//!   curl -i http://localhost:3000/users/42
//!   curl -i http://localhost:3000/users/7
//!   curl -i -X POST http://localhost:3000/users \
//!        -H 'content-type: application/json' \
//!        -d '{"name":"alice","age":31}'
//!   curl -i -X POST http://localhost:3000/users \
//!        -H 'content-type: application/xml' \
//!        -d '<user><name>bob</name><age>200</age></user>'
//!   curl -i http://localhost:3000/users/42/avatar
//!   curl -i http://localhost:3000/boom

use std::sync::OnceLock;

use bulwark::binding::{Bind, Field, Schema};
use bulwark::config::Config;
use bulwark::{encode, logging, Failure, HttpError, Middleware, RawError, Request, Response, Router};
use http::StatusCode;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{error, info};

#[derive(Debug, Default, Serialize)]
#[serde(rename = "user")]
struct User {
    id: u64,
    name: String,
    age: u32,
}

/// Route parameters of `/users/{id}`.
#[derive(Debug, Default)]
struct UserPath {
    id: u64,
}

impl Bind for UserPath {
    fn schema() -> &'static Schema<Self> {
        static SCHEMA: OnceLock<Schema<UserPath>> = OnceLock::new();
        SCHEMA.get_or_init(|| {
            Schema::new()
                .field(Field::new("Id", |p: &UserPath| &p.id, |p: &mut UserPath| &mut p.id)
                    .path("id").required())
        })
    }
}

impl Bind for User {
    fn schema() -> &'static Schema<Self> {
        static SCHEMA: OnceLock<Schema<User>> = OnceLock::new();
        SCHEMA.get_or_init(|| {
            Schema::new()
                .field(Field::new("Name", |u: &User| &u.name, |u: &mut User| &mut u.name)
                    .json("name").xml("name").required())
                .field(Field::new("Age", |u: &User| &u.age, |u: &mut User| &mut u.age)
                    .json("age").xml("age").max(150.0))
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = Config::from_env()?;
    logging::init(&config.log)?;

    let app = Router::new()
        .get("/users/{id}", get_user)
        .post("/users", create_user)
        .delete("/users/{id}", delete_user)
        .get("/users/{id}/avatar", avatar)
        .get("/boom", boom);
    let app = Middleware::builder(app).config(&config).build();

    let listener = TcpListener::bind("0.0.0.0:3000").await?;
    info!(addr = "0.0.0.0:3000", "listening");

    let mut tasks = tokio::task::JoinSet::new();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                break;
            }

            res = listener.accept() => {
                let (stream, peer) = match res {
                    Ok(v) => v,
                    Err(e) => {
                        error!("accept error: {e}");
                        continue;
                    }
                };
                let svc = app.clone();
                tasks.spawn(async move {
                    if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                        .serve_connection(TokioIo::new(stream), svc)
                        .await
                    {
                        error!(peer = %peer, "connection error: {e}");
                    }
                });
            }

            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
        }
    }

    while tasks.join_next().await.is_some() {}
    info!("stopped");
    Ok(())
}

// GET /users/{id}: 404 with an extended code for anything but 42.
async fn get_user(req: Request) -> Result<Response, Failure> {
    let path: UserPath = req.bind()?;
    let id = path.id;
    if id != 42 {
        return Err(HttpError::new(404, 1001, "user not found").into());
    }
    encode::json(&User { id, name: "alice".into(), age: 31 })
}

// POST /users: JSON or XML in, same format out.
async fn create_user(req: Request) -> Result<Response, Failure> {
    let mut user: User = req.bind()?;
    user.id = 99;
    if req.media_type().as_deref() == Some("application/json") {
        encode::json_status(StatusCode::CREATED, &user)
    } else {
        encode::xml_status(StatusCode::CREATED, &user)
    }
}

async fn delete_user(_req: Request) -> Result<Response, Failure> {
    Ok(encode::empty_status(StatusCode::NO_CONTENT))
}

// A fully formed alternate response, sent as is.
async fn avatar(_req: Request) -> Result<Response, RawError> {
    Err(RawError::new(503, "<svg/>")
        .with_content_type("image/svg+xml")
        .with_header("retry-after", "30"))
}

async fn boom(req: Request) -> Result<Response, Failure> {
    let limits: [u32; 2] = [1, 2];
    let slot = req.path().len();
    Ok(Response::text(limits[slot].to_string()))
}
