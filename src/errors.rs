use crate::StatusCode;
use std::{error, fmt, io};

/// Everything that can go wrong while ingesting or answering a request.
///
/// Each variant maps to exactly one wire status through [`ErrorKind::status`];
/// transport-level failures map to `None` and close the connection without a
/// response. Handlers surface failures as values through
/// [`ErrorKind::Handler`] rather than panicking.
#[derive(Debug, PartialEq)]
pub enum ErrorKind {
    /// Request line is not three space-separated fields, or a field is
    /// syntactically invalid.
    MalformedStartLine,
    /// Method is token-valid but not one the server implements.
    UnknownMethod,
    /// Version is syntactically valid but outside HTTP/1.0 and HTTP/1.1.
    UnsupportedVersion,

    /// Field line violates `token ":" value` syntax, or the value carries
    /// control bytes.
    MalformedHeader,
    /// Same field name (case-insensitively) appeared twice.
    DuplicateHeader,
    /// No `Host` header.
    MissingHost,

    /// `Content-Length` is not a plain non-negative integer.
    BadContentLength,
    /// Unsafe method with neither `Content-Length` nor chunked framing.
    LengthRequired,
    /// Declared or accumulated body exceeds the 1 MiB cap.
    OversizeBody,
    /// Malformed chunk size line or chunk terminator.
    BadChunk,
    /// Body bytes do not parse as the content type the handler asked for.
    BadBodyParse,
    /// `Expect` carries something other than `100-continue`.
    BadExpectation,

    /// No route matched the request path.
    UnroutedPath,
    /// The request did not complete within its deadline.
    RequestTimeout,
    /// A single input line grew past the transport line limit.
    LineTooLong,

    /// A handler failed with an explicit status.
    Handler(StatusCode),
    /// A reply could not be serialized onto the wire.
    EncodingFailure,

    /// Peer closed the stream before the message was complete.
    ConnectionClosed,
    Io(IoError),
}

impl ErrorKind {
    /// The wire status for this error, or `None` when the connection must
    /// close silently.
    pub(crate) fn status(&self) -> Option<StatusCode> {
        match self {
            ErrorKind::MalformedStartLine
            | ErrorKind::MalformedHeader
            | ErrorKind::DuplicateHeader
            | ErrorKind::MissingHost
            | ErrorKind::BadContentLength
            | ErrorKind::OversizeBody
            | ErrorKind::BadChunk
            | ErrorKind::BadBodyParse
            | ErrorKind::LineTooLong => Some(StatusCode::BAD_REQUEST),
            ErrorKind::UnroutedPath => Some(StatusCode::NOT_FOUND),
            ErrorKind::RequestTimeout => Some(StatusCode::REQUEST_TIMEOUT),
            ErrorKind::LengthRequired => Some(StatusCode::LENGTH_REQUIRED),
            ErrorKind::BadExpectation => Some(StatusCode::EXPECTATION_FAILED),
            ErrorKind::UnknownMethod => Some(StatusCode::NOT_IMPLEMENTED),
            ErrorKind::UnsupportedVersion => Some(StatusCode::HTTP_VERSION_NOT_SUPPORTED),
            ErrorKind::Handler(status) => Some(*status),
            ErrorKind::EncodingFailure => Some(StatusCode::INTERNAL_SERVER_ERROR),
            ErrorKind::ConnectionClosed | ErrorKind::Io(_) => None,
        }
    }
}

impl error::Error for ErrorKind {}
impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<io::Error> for ErrorKind {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => ErrorKind::ConnectionClosed,
            _ => ErrorKind::Io(IoError(err)),
        }
    }
}

#[derive(Debug)]
pub struct IoError(pub(crate) io::Error);

impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}
