//! pier_web - Minimal HTTP/1.1 origin server
//!
//! A small origin server built around a strict request ingestion core:
//! requests are framed directly off the TCP byte stream against a subset
//! of RFC 9110/9112, routed through a path-pattern table, and answered
//! one at a time per connection.
//!
//! # Protocol Support
//!
//! - **HTTP/1.1**: persistent connections, chunked request bodies,
//!   `Expect: 100-continue`
//! - **HTTP/1.0**: opt-in keep-alive via the `Connection` header
//!
//! # What the core enforces
//!
//! - **Strict framing** - exactly one of `Content-Length` or chunked
//!   transfer coding frames a body; unsafe methods without either get
//!   `411 Length Required`.
//! - **Strict syntax** - token-checked methods and field names, unique
//!   header names, a mandatory `Host`, origin-form targets only.
//! - **Hard limits** - 64 KiB per input line, 1 MiB per body, enforced
//!   before buffering.
//! - **Deadlines** - 180 s idle, 30 s per request, 60 s per response.
//!
//! # Quick Start
//!
//! ```no_run
//! use pier_web::{Reply, Request, Router, Server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let router = Router::new()
//!         .route("/", |_| async { Ok(Reply::from("<h1>Main Page</h1>")) })
//!         .route("/user/<id>", |req: Request| async move {
//!             Ok(Reply::Json(serde_json::json!({
//!                 "user": req.param("id"),
//!             })))
//!         })
//!         .status(404, |_| async { Reply::from("<h1>Not found</h1>") });
//!
//!     Server::builder().router(router).build().launch().await;
//! }
//! ```
//!
//! Handlers receive the parsed [`Request`] by value and return a
//! [`Reply`] (HTML string, JSON value, or file path) or fail with a
//! status-bearing [`ErrorKind`]. Routes are compiled once at startup and
//! shared read-only across connections.
pub(crate) mod http {
    pub(crate) mod query;
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod stream;
    pub(crate) mod types;
}
pub(crate) mod server {
    pub(crate) mod connection;
    pub(crate) mod server_impl;
}
pub(crate) mod errors;
pub mod limits;
pub(crate) mod router;

pub use crate::{
    errors::ErrorKind,
    http::{
        request::{ParsedBody, Request},
        response::Reply,
        types::{Method, StatusCode, Version},
    },
    router::{Handler, HandlerFuture, Router, StatusFuture, StatusHandler},
    server::server_impl::{Server, ServerBuilder},
};
