//! The per-connection state machine.
//!
//! One driver owns one connection end to end: it frames requests off the
//! stream, routes them, runs the handler, writes the response and decides
//! whether the connection survives. Only one request is ever in flight;
//! bytes of a following request are not touched until the previous
//! response has been flushed.
//!
//! Three deadlines govern the loop: a connection may idle for 180 s
//! between requests (expiry closes it without a byte), a request must
//! complete within 30 s of its first byte (expiry answers `408`), and a
//! response must be written within 60 s (expiry is fatal and silent).

use crate::{
    errors::ErrorKind,
    http::{
        response::{self, Payload},
        stream::MessageReader,
        types::{Method, StatusCode},
    },
    limits::{ConnLimits, ReqLimits},
    router::Router,
};
use std::sync::Arc;
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    time::timeout,
};
use tracing::debug;

pub(crate) struct HttpConnection<R, W> {
    pub(crate) reader: MessageReader<R>,
    pub(crate) writer: W,
    pub(crate) router: Arc<Router>,
    pub(crate) conn_limits: ConnLimits,
    pub(crate) req_limits: ReqLimits,
    continue_sent: bool,
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> HttpConnection<R, W> {
    #[inline]
    pub(crate) fn new(
        read: R,
        write: W,
        router: Arc<Router>,
        conn_limits: ConnLimits,
        req_limits: ReqLimits,
    ) -> Self {
        Self {
            reader: MessageReader::new(read, req_limits.read_buffer),
            writer: write,
            router,
            conn_limits,
            req_limits,
            continue_sent: false,
        }
    }

    /// Drives the connection until it closes. Never returns an error:
    /// every failure is either answered on the wire or logged and
    /// swallowed here.
    pub(crate) async fn run(&mut self) {
        loop {
            match timeout(self.conn_limits.idle_timeout, self.reader.poll_ready()).await {
                // Idle deadline passed with nothing on the wire.
                Err(_) => {
                    debug!("idle deadline expired");
                    return;
                }
                // Peer finished or vanished between requests.
                Ok(Ok(false)) => return,
                Ok(Err(kind)) => {
                    debug!(error = %kind, "transport failed between requests");
                    return;
                }
                Ok(Ok(true)) => {}
            }

            if !self.serve_one().await {
                return;
            }
        }
    }

    /// Serves exactly one request/response exchange. Returns whether the
    /// connection may carry another.
    async fn serve_one(&mut self) -> bool {
        self.continue_sent = false;

        // The request deadline runs from the first byte; framing that
        // outlives it is answered with 408. Expiry cancels the framing
        // future, so any method it had parsed is gone with it.
        let framed = match timeout(self.conn_limits.request_timeout, self.read_request()).await {
            Ok(result) => result,
            Err(_) => Err((ErrorKind::RequestTimeout, None)),
        };

        let (request, handler) = match framed {
            Ok(pair) => pair,
            Err((kind, method)) => {
                self.send_error(kind, method == Some(Method::Head)).await;
                return false;
            }
        };

        let head = request.method() == Method::Head;
        let keep_alive = match connection_directive(request.header(b"connection")) {
            Some(explicit) => explicit,
            None => request.version().default_keep_alive(),
        };

        let outcome = match handler.handle(request).await {
            Ok(reply) => response::resolve_reply(reply).await,
            Err(kind) => Err(kind),
        };

        match outcome {
            Ok((status, payload)) => {
                self.send(status, payload.as_ref(), keep_alive, head).await && keep_alive
            }
            Err(kind) => {
                self.send_error(kind, head).await;
                false
            }
        }
    }

    /// Converts an error into its canonical response, rendering the body
    /// through a status-keyed route when one is registered. Transport
    /// errors get no response at all.
    async fn send_error(&mut self, kind: ErrorKind, head: bool) {
        let Some(status) = kind.status() else {
            debug!(error = %kind, "connection dropped without a response");
            return;
        };
        debug!(error = %kind, status = status.as_u16(), "request rejected");

        let payload = match self.router.status_route(status) {
            Some(handler) => response::error_payload(handler.render(status).await).await,
            None => None,
        };

        self.send(status, payload.as_ref(), false, head).await;
    }

    /// Writes one response under the response deadline. A failed or
    /// expired write is fatal: no retry, no further bytes.
    async fn send(
        &mut self,
        status: StatusCode,
        payload: Option<&Payload>,
        keep_alive: bool,
        head: bool,
    ) -> bool {
        let wire = response::encode(status, payload, keep_alive, head);
        let deadline = self.conn_limits.response_timeout;

        let io = async {
            self.writer.write_all(&wire).await?;
            self.writer.flush().await
        };
        match timeout(deadline, io).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                debug!(error = %e, "response write failed");
                false
            }
            Err(_) => {
                debug!("response deadline expired");
                false
            }
        }
    }

    /// Writes the `100 Continue` interim line, at most once per request.
    pub(crate) async fn write_continue(&mut self) -> Result<(), ErrorKind> {
        if self.continue_sent {
            return Ok(());
        }
        self.continue_sent = true;

        self.writer
            .write_all(b"HTTP/1.1 100 Continue\r\n\r\n")
            .await?;
        self.writer.flush().await?;
        Ok(())
    }
}

/// The `Connection` header's verdict, if it renders one. Unknown values
/// leave the version default in place.
fn connection_directive(value: Option<&[u8]>) -> Option<bool> {
    let value = value?;
    if value.eq_ignore_ascii_case(b"keep-alive") {
        Some(true)
    } else if value.eq_ignore_ascii_case(b"close") {
        Some(false)
    } else {
        None
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::TestConnection;
    use super::*;
    use crate::{tools::str_op, Reply};
    use tokio::io::{AsyncReadExt, AsyncWriteExt as _};

    async fn exchange(input: &str) -> String {
        let mut conn = TestConnection::from_req(input);
        conn.run().await;
        str_op(conn.written()).to_owned()
    }

    #[test]
    fn connection_header_directive() {
        assert_eq!(connection_directive(None), None);
        assert_eq!(connection_directive(Some(b"keep-alive")), Some(true));
        assert_eq!(connection_directive(Some(b"Keep-Alive")), Some(true));
        assert_eq!(connection_directive(Some(b"close")), Some(false));
        assert_eq!(connection_directive(Some(b"CLOSE")), Some(false));
        assert_eq!(connection_directive(Some(b"upgrade")), None);
    }

    #[tokio::test]
    async fn simple_get() {
        let wire = exchange("GET / HTTP/1.1\r\nHost: x\r\n\r\n").await;

        assert_eq!(
            wire,
            "HTTP/1.1 200 OK\r\n\
             Content-Type: text/html; charset=utf-8\r\n\
             Connection: keep-alive\r\n\
             Content-Length: 2\r\n\
             \r\n\
             ok"
        );
    }

    #[tokio::test]
    async fn unrouted_path_renders_default_404() {
        let wire = exchange("GET /nope HTTP/1.1\r\nHost: x\r\n\r\n").await;

        assert!(wire.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(wire.contains("Connection: close\r\n"));
        assert!(wire.contains("Content-Length: 18\r\n"));
        assert!(wire.ends_with("\r\n\r\n<h1>Not found</h1>"));
    }

    #[tokio::test]
    async fn json_echo() {
        let wire = exchange(
            "POST /u HTTP/1.1\r\nHost: x\r\nContent-Length: 5\r\n\
             Content-Type: application/json\r\n\r\n\"hi!\"",
        )
        .await;

        assert!(wire.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(wire.contains("Content-Type: application/json; charset=utf-8\r\n"));
        assert!(wire.contains("Content-Length: 5\r\n"));
        assert!(wire.ends_with("\r\n\r\n\"hi!\""));
    }

    #[tokio::test]
    async fn chunked_body_reaches_handler() {
        let wire = exchange(
            "POST /big HTTP/1.1\r\nHost: x\r\nTransfer-Encoding: chunked\r\n\r\n\
             5\r\nhello\r\n0\r\n\r\n",
        )
        .await;

        assert!(wire.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(wire.ends_with("\r\n\r\nlen=5"));
    }

    #[tokio::test]
    async fn http10_keep_alive_survives_for_a_second_request() {
        let wire = exchange(
            "GET / HTTP/1.0\r\nHost: x\r\nConnection: keep-alive\r\n\r\n\
             GET / HTTP/1.0\r\nHost: x\r\n\r\n",
        )
        .await;

        let first_end = wire.find("ok").expect("first response present") + 2;
        let (first, second) = wire.split_at(first_end);

        assert!(first.contains("Connection: keep-alive\r\n"));
        // Second request has no Connection header: HTTP/1.0 defaults to
        // close, and the loop ends after it.
        assert!(second.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(second.contains("Connection: close\r\n"));
        assert!(second.ends_with("ok"));
    }

    #[tokio::test]
    async fn http11_client_close_is_honored() {
        let wire = exchange(
            "GET / HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n\
             GET / HTTP/1.1\r\nHost: x\r\n\r\n",
        )
        .await;

        assert!(wire.contains("Connection: close\r\n"));
        // One response only; the second request was never read.
        assert_eq!(wire.matches("HTTP/1.1 200 OK").count(), 1);
    }

    #[tokio::test]
    async fn duplicate_host_is_fatal() {
        let wire = exchange(
            "GET / HTTP/1.1\r\nHost: x\r\nHost: y\r\n\r\n\
             GET / HTTP/1.1\r\nHost: x\r\n\r\n",
        )
        .await;

        assert!(wire.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(wire.contains("Connection: close\r\n"));
        // The connection closed: the well-formed second request got nothing.
        assert_eq!(wire.matches("HTTP/1.1").count(), 1);
    }

    #[tokio::test]
    async fn error_status_lines() {
        #[rustfmt::skip]
        let cases = [
            ("GET\r\nHost: x\r\n\r\n",                        "HTTP/1.1 400 Bad Request\r\n"),
            ("BREW / HTTP/1.1\r\nHost: x\r\n\r\n",            "HTTP/1.1 501 Not Implemented\r\n"),
            ("GET / HTTP/2.0\r\nHost: x\r\n\r\n",             "HTTP/1.1 505 HTTP Version Not Supported\r\n"),
            ("POST /u HTTP/1.1\r\nHost: x\r\n\r\n",           "HTTP/1.1 411 Length Required\r\n"),
            (
                "POST /u HTTP/1.1\r\nHost: x\r\nContent-Length: 1\r\nExpect: tea\r\n\r\nx",
                "HTTP/1.1 417 Expectation Failed\r\n",
            ),
        ];

        for (input, expected) in cases {
            let wire = exchange(input).await;
            assert!(wire.starts_with(expected), "{input:?} -> {wire:?}");
            assert!(wire.contains("Connection: close\r\n"), "{input:?}");
        }
    }

    #[tokio::test]
    async fn head_suppresses_body_keeps_length() {
        let wire = exchange("HEAD / HTTP/1.1\r\nHost: x\r\n\r\n").await;

        assert!(wire.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(wire.contains("Content-Length: 2\r\n"));
        assert!(wire.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn head_error_suppresses_status_route_body() {
        // The method is already known when the duplicate Host is caught:
        // the 400 page's body stays off the wire, its length does not.
        let router = crate::Router::new()
            .route("/", |_| async { Ok(Reply::from("ok")) })
            .status(400, |_| async { Reply::from("<b>bad</b>") });

        let mut conn = TestConnection::with_router(
            "HEAD / HTTP/1.1\r\nHost: a\r\nHost: b\r\n\r\n",
            router,
        );
        conn.run().await;
        let wire = str_op(conn.written());

        assert!(wire.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(wire.contains("Connection: close\r\n"));
        assert!(wire.contains("Content-Length: 10\r\n"));
        assert!(wire.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn head_errors_suppress_bodies_once_method_is_known() {
        // Post-start-line failures under HEAD: the default 404 page and
        // a 417 both render headers only.
        let wire = exchange("HEAD /nope HTTP/1.1\r\nHost: x\r\n\r\n").await;
        assert!(wire.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(wire.contains("Content-Length: 18\r\n"));
        assert!(wire.ends_with("\r\n\r\n"));

        let wire = exchange("HEAD / HTTP/1.1\r\nHost: x\r\nExpect: tea\r\n\r\n").await;
        assert!(wire.starts_with("HTTP/1.1 417 Expectation Failed\r\n"));
        assert!(wire.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn no_content_has_no_length() {
        let wire = exchange("GET /none HTTP/1.1\r\nHost: x\r\n\r\n").await;

        assert_eq!(
            wire,
            "HTTP/1.1 204 No Content\r\nConnection: keep-alive\r\n\r\n"
        );
    }

    #[tokio::test]
    async fn handler_failure_is_500_and_closes() {
        let wire = exchange("GET /boom HTTP/1.1\r\nHost: x\r\n\r\n").await;

        assert_eq!(
            wire,
            "HTTP/1.1 500 Internal Server Error\r\n\
             Connection: close\r\n\
             Content-Length: 0\r\n\
             \r\n"
        );
    }

    #[tokio::test]
    async fn status_route_renders_error_body() {
        let router = crate::Router::new()
            .route("/boom", |_| async {
                Err(ErrorKind::Handler(StatusCode::INTERNAL_SERVER_ERROR))
            })
            .status(500, |_| async { Reply::from("<b>it broke</b>") });

        let mut conn =
            TestConnection::with_router("GET /boom HTTP/1.1\r\nHost: x\r\n\r\n", router);
        conn.run().await;
        let wire = str_op(conn.written());

        assert!(wire.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
        assert!(wire.contains("Content-Type: text/html; charset=utf-8\r\n"));
        assert!(wire.contains("Connection: close\r\n"));
        assert!(wire.ends_with("\r\n\r\n<b>it broke</b>"));
    }

    #[tokio::test]
    async fn param_routes_through_the_loop() {
        let wire = exchange("GET /api/42 HTTP/1.1\r\nHost: x\r\n\r\n").await;
        assert!(wire.ends_with("\r\n\r\nid=42"));
    }

    #[tokio::test]
    async fn continue_line_precedes_the_response() {
        let wire = exchange(
            "POST /big HTTP/1.1\r\nHost: x\r\nContent-Length: 2\r\n\
             Expect: 100-continue\r\n\r\nhi",
        )
        .await;

        assert!(wire.starts_with("HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\n"));
        assert!(wire.ends_with("len=2"));
    }

    #[tokio::test]
    async fn empty_stream_closes_silently() {
        let wire = exchange("").await;
        assert!(wire.is_empty());
    }

    #[tokio::test]
    async fn eof_mid_request_closes_silently() {
        let wire = exchange("GET / HTTP/1.1\r\nHost:").await;
        assert!(wire.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_request_answers_408() {
        let (mut client, server) = tokio::io::duplex(1024);
        client.write_all(b"GET / HT").await.unwrap();

        let (read, write) = tokio::io::split(server);
        let mut conn = HttpConnection::new(
            read,
            write,
            test_support::finalized_router(),
            ConnLimits::default(),
            ReqLimits::default(),
        );
        conn.run().await;
        drop(conn);

        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        let wire = str_op(&out);

        assert!(wire.starts_with("HTTP/1.1 408 Request Timeout\r\n"));
        assert!(wire.contains("Connection: close\r\n"));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_connection_closes_without_a_byte() {
        let (mut client, server) = tokio::io::duplex(1024);

        let (read, write) = tokio::io::split(server);
        let mut conn = HttpConnection::new(
            read,
            write,
            test_support::finalized_router(),
            ConnLimits::default(),
            ReqLimits::default(),
        );
        conn.run().await;
        drop(conn);

        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unread_response_hits_the_write_deadline() {
        // An 8-byte pipe the client never drains: the response cannot be
        // flushed and the write deadline tears the connection down.
        let (mut client, server) = tokio::io::duplex(8);

        let handle = tokio::spawn(async move {
            let (read, write) = tokio::io::split(server);
            let mut conn = HttpConnection::new(
                read,
                write,
                test_support::finalized_router(),
                ConnLimits::default(),
                ReqLimits::default(),
            );
            conn.run().await;
        });

        client
            .write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n")
            .await
            .unwrap();

        // Returns once the write deadline expires rather than hanging.
        handle.await.unwrap();
    }
}
