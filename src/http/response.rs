//! Handler reply values and the wire encoder.
//!
//! Handlers return a [`Reply`] — an explicit sum over the supported body
//! kinds rather than runtime type inspection. The encoder turns a status
//! plus an optional payload into the response bytes: status line, then
//! `Content-Type`, `Connection`, `Content-Length` in that order, a blank
//! line and the body. Responses always carry an explicit length; the
//! server never emits `Transfer-Encoding: chunked`.

use crate::{errors::ErrorKind, http::types::StatusCode};
use std::{io::Write as _, path::PathBuf};

/// What a handler hands back.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Sent as `text/html; charset=utf-8`.
    Html(String),
    /// Sent as `application/json; charset=utf-8`.
    Json(serde_json::Value),
    /// File contents, content type guessed from the extension
    /// (`application/octet-stream` when unknown).
    File(PathBuf),
    /// `204 No Content`: no body, no length.
    NoContent,
}

impl From<String> for Reply {
    fn from(body: String) -> Self {
        Reply::Html(body)
    }
}

impl From<&str> for Reply {
    fn from(body: &str) -> Self {
        Reply::Html(body.to_owned())
    }
}

impl From<serde_json::Value> for Reply {
    fn from(value: serde_json::Value) -> Self {
        Reply::Json(value)
    }
}

impl From<PathBuf> for Reply {
    fn from(path: PathBuf) -> Self {
        Reply::File(path)
    }
}

/// An encoded body with its content type, ready for the wire.
#[derive(Debug, PartialEq)]
pub(crate) struct Payload {
    pub(crate) content_type: String,
    pub(crate) body: Vec<u8>,
}

/// Normalizes a reply into status + payload.
///
/// Failures here (unreadable file, unencodable JSON) are the server's
/// fault, not the client's, and surface as 500.
pub(crate) async fn resolve_reply(reply: Reply) -> Result<(StatusCode, Option<Payload>), ErrorKind> {
    match reply {
        Reply::Html(body) => Ok((
            StatusCode::OK,
            Some(Payload {
                content_type: "text/html; charset=utf-8".to_owned(),
                body: body.into_bytes(),
            }),
        )),
        Reply::Json(value) => {
            let body = serde_json::to_vec(&value).map_err(|_| ErrorKind::EncodingFailure)?;
            Ok((
                StatusCode::OK,
                Some(Payload {
                    content_type: "application/json; charset=utf-8".to_owned(),
                    body,
                }),
            ))
        }
        Reply::File(path) => {
            let body = tokio::fs::read(&path)
                .await
                .map_err(|_| ErrorKind::EncodingFailure)?;
            let content_type = mime_guess::from_path(&path)
                .first_or_octet_stream()
                .to_string();
            Ok((StatusCode::OK, Some(Payload { content_type, body })))
        }
        Reply::NoContent => Ok((StatusCode::NO_CONTENT, None)),
    }
}

/// Renders a reply body alone, for status-keyed error routes. The error
/// response always carries `text/html`, whatever the reply kind.
pub(crate) async fn error_payload(reply: Reply) -> Option<Payload> {
    let (_, payload) = resolve_reply(reply).await.ok()?;
    let payload = payload?;
    Some(Payload {
        content_type: "text/html; charset=utf-8".to_owned(),
        body: payload.body,
    })
}

/// Serializes one response.
///
/// `head` suppresses the body while keeping the `Content-Length` a GET
/// would have carried. 204 carries neither body nor length.
pub(crate) fn encode(
    status: StatusCode,
    payload: Option<&Payload>,
    keep_alive: bool,
    head: bool,
) -> Vec<u8> {
    let body_len = payload.map_or(0, |p| p.body.len());
    let mut wire = Vec::with_capacity(128 + if head { 0 } else { body_len });

    // write! to a Vec is infallible.
    let _ = write!(wire, "HTTP/1.1 {} {}\r\n", status.as_u16(), status.reason());
    if let Some(payload) = payload {
        let _ = write!(wire, "Content-Type: {}\r\n", payload.content_type);
    }
    let connection = match keep_alive && !status.is_error() {
        true => "keep-alive",
        false => "close",
    };
    let _ = write!(wire, "Connection: {connection}\r\n");
    if status != StatusCode::NO_CONTENT {
        let _ = write!(wire, "Content-Length: {body_len}\r\n");
    }
    wire.extend_from_slice(b"\r\n");

    if let Some(payload) = payload {
        if !head {
            wire.extend_from_slice(&payload.body);
        }
    }

    wire
}
