//! Path-pattern routing.
//!
//! Routes are registered against a small DSL: `<name>` segments become
//! path parameters matching one path segment (`[^/]+`), everything else
//! is literal. Patterns are compiled once at bootstrap into anchored
//! regexes and the table is shared read-only across connections.
//!
//! Matching is first-hit in registration order — there is no specificity
//! or longest-prefix resolution.
//!
//! ```
//! use pier_web::{Reply, Router};
//!
//! let router = Router::new()
//!     .route("/", |_| async { Ok(Reply::from("<h1>Main Page</h1>")) })
//!     .route("/user/<id>", |req: pier_web::Request| async move {
//!         Ok(Reply::from(format!("user {}", req.param("id").unwrap_or(""))))
//!     })
//!     .status(404, |_| async { Reply::from("<h1>Nope</h1>") });
//! ```

use crate::{
    errors::ErrorKind,
    http::{request::Request, response::Reply},
    StatusCode,
};
use regex::Regex;
use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Reply, ErrorKind>> + Send>>;
pub type StatusFuture = Pin<Box<dyn Future<Output = Reply> + Send>>;

/// A path-route handler.
///
/// Implemented for any `Fn(Request) -> impl Future<Output = Result<Reply,
/// ErrorKind>>`, so plain async closures register directly. Path
/// parameters captured by the route pattern arrive on the request
/// ([`Request::param`]).
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, request: Request) -> HandlerFuture;
}

impl std::fmt::Debug for dyn Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("<handler>")
    }
}

impl<F, Fut> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Reply, ErrorKind>> + Send + 'static,
{
    fn handle(&self, request: Request) -> HandlerFuture {
        Box::pin(self(request))
    }
}

/// A status-keyed handler, used only to render error response bodies.
///
/// Infallible: an error page that cannot render would have nowhere left
/// to go.
pub trait StatusHandler: Send + Sync + 'static {
    fn render(&self, status: StatusCode) -> StatusFuture;
}

impl<F, Fut> StatusHandler for F
where
    F: Fn(StatusCode) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Reply> + Send + 'static,
{
    fn render(&self, status: StatusCode) -> StatusFuture {
        Box::pin(self(status))
    }
}

/// The compiled route table.
///
/// Built once by the bootstrap and shared read-only across every
/// connection; there is no locking on the request path.
#[derive(Default)]
pub struct Router {
    routes: Vec<(Regex, Arc<dyn Handler>)>,
    status_routes: HashMap<u16, Arc<dyn StatusHandler>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for a path pattern.
    ///
    /// # Panics
    ///
    /// Panics if the pattern does not compile (for example, two
    /// parameters sharing one name). Route tables are built at startup
    /// from programmer-written literals, so this is a configuration bug,
    /// not an input error.
    #[track_caller]
    pub fn route<F, Fut>(mut self, pattern: &str, handler: F) -> Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply, ErrorKind>> + Send + 'static,
    {
        let regex = compile_pattern(pattern)
            .unwrap_or_else(|e| panic!("invalid route pattern {pattern:?}: {e}"));
        self.routes.push((regex, Arc::new(handler)));
        self
    }

    /// Registers a handler keyed by status code, used to render the body
    /// of error responses with that status.
    ///
    /// # Panics
    ///
    /// Panics if `code` is not a 3-digit status code.
    #[track_caller]
    pub fn status<F, Fut>(mut self, code: u16, handler: F) -> Self
    where
        F: Fn(StatusCode) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Reply> + Send + 'static,
    {
        StatusCode::from_u16(code)
            .unwrap_or_else(|| panic!("invalid status route key {code}"));
        self.status_routes.insert(code, Arc::new(handler));
        self
    }

    /// Resolves a decoded path to its handler and captured parameters.
    /// First registered match wins.
    pub(crate) fn resolve(&self, path: &str) -> Option<(Arc<dyn Handler>, Vec<(String, String)>)> {
        for (regex, handler) in &self.routes {
            let Some(caps) = regex.captures(path) else {
                continue;
            };

            let params = regex
                .capture_names()
                .flatten()
                .filter_map(|name| {
                    caps.name(name)
                        .map(|m| (name.to_owned(), m.as_str().to_owned()))
                })
                .collect();

            return Some((handler.clone(), params));
        }

        None
    }

    pub(crate) fn status_route(&self, status: StatusCode) -> Option<Arc<dyn StatusHandler>> {
        self.status_routes.get(&status.as_u16()).cloned()
    }

    /// Installs the default `404` body when the user has not registered
    /// one. Called once by the bootstrap.
    pub(crate) fn finalize(&mut self) {
        self.status_routes
            .entry(404)
            .or_insert_with(|| Arc::new(default_not_found));
    }
}

async fn default_not_found(_: StatusCode) -> Reply {
    Reply::from("<h1>Not found</h1>")
}

/// Translates the route DSL into an anchored regex: each `<name>` becomes
/// the named capture `(?P<name>[^/]+)`, every other character is an
/// escaped literal.
fn compile_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    let mut built = String::with_capacity(pattern.len() + 16);
    built.push_str(r"\A");

    let mut rest = pattern;
    while let Some(open) = rest.find('<') {
        let (literal, tail) = rest.split_at(open);
        match parameter_name(tail) {
            Some(name) => {
                built.push_str(&regex::escape(literal));
                built.push_str("(?P<");
                built.push_str(name);
                built.push_str(">[^/]+)");
                rest = &tail[name.len() + 2..];
            }
            None => {
                // Not a parameter, keep the `<` literal.
                built.push_str(&regex::escape(&rest[..open + 1]));
                rest = &tail[1..];
            }
        }
    }
    built.push_str(&regex::escape(rest));
    built.push_str(r"\z");

    Regex::new(&built)
}

// `<name>` with a non-empty word-character name, at the start of `tail`.
fn parameter_name(tail: &str) -> Option<&str> {
    let inner = tail.strip_prefix('<')?;
    let close = inner.find('>')?;
    let name = &inner[..close];
    match !name.is_empty() && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
        true => Some(name),
        false => None,
    }
}
