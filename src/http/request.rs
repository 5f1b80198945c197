use crate::{
    errors::ErrorKind,
    http::{
        query,
        types::{self, Method, Version},
    },
    router::Handler,
    server::connection::HttpConnection,
};
use memchr::{memchr, memmem};
use percent_encoding::percent_decode;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// A fully framed HTTP request.
///
/// One `Request` is built per iteration of the connection loop, handed to
/// the matched handler by value, and dropped once the response has been
/// flushed. The body is complete and capped at 1 MiB before the handler
/// ever runs; trailers of chunked bodies are consumed but never exposed.
#[derive(Debug)]
pub struct Request {
    pub(crate) method: Method,
    pub(crate) target: Vec<u8>,
    pub(crate) path: String,
    pub(crate) query: Option<Vec<u8>>,
    pub(crate) version: Version,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Vec<u8>,
    pub(crate) params: Vec<(String, String)>,
}

impl Request {
    #[inline(always)]
    pub const fn method(&self) -> Method {
        self.method
    }

    #[inline(always)]
    pub const fn version(&self) -> Version {
        self.version
    }

    /// Raw request-target bytes as they appeared on the request line.
    #[inline(always)]
    pub fn target(&self) -> &[u8] {
        &self.target
    }

    /// Percent-decoded path, without the query.
    #[inline(always)]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Raw query bytes, without the leading `?`.
    #[inline(always)]
    pub fn query(&self) -> Option<&[u8]> {
        self.query.as_deref()
    }

    /// Decoded query parameters, in wire order, duplicates preserved.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let Some(raw) = self.query.as_deref() else {
            return Vec::new();
        };

        query::split_pairs(raw)
            .into_iter()
            .filter_map(|(key, value)| {
                let key = query::decode_component(key, false).ok()?;
                let value = query::decode_component(value, false).ok()?;
                Some((key, value))
            })
            .collect()
    }

    /// First header value for `name`, case-insensitively.
    #[inline(always)]
    pub fn header(&self, name: &[u8]) -> Option<&[u8]> {
        self.headers.get(name)
    }

    /// The complete request body, possibly empty.
    #[inline(always)]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// A path parameter captured by the matched route pattern.
    #[inline(always)]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    #[inline(always)]
    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    /// Parses the body as JSON. Anything that is not valid UTF-8 JSON is
    /// the client's fault: `400 Bad Request`.
    pub fn json(&self) -> Result<serde_json::Value, ErrorKind> {
        let text = simdutf8::basic::from_utf8(&self.body).map_err(|_| ErrorKind::BadBodyParse)?;
        serde_json::from_str(text).map_err(|_| ErrorKind::BadBodyParse)
    }

    /// Parses the body as `application/x-www-form-urlencoded` into decoded
    /// key/value pairs, duplicates preserved.
    pub fn form(&self) -> Result<Vec<(String, String)>, ErrorKind> {
        query::split_pairs(&self.body)
            .into_iter()
            .map(|(key, value)| {
                Ok((
                    query::decode_component(key, true)?,
                    query::decode_component(value, true)?,
                ))
            })
            .collect()
    }

    /// The body interpreted by its `Content-Type`: JSON and form bodies
    /// are decoded, everything else passes through as raw bytes.
    pub fn parsed_body(&self) -> Result<ParsedBody<'_>, ErrorKind> {
        match self.header(b"content-type") {
            Some(ct) if media_type_is(ct, b"application/json") => {
                Ok(ParsedBody::Json(self.json()?))
            }
            Some(ct) if media_type_is(ct, b"application/x-www-form-urlencoded") => {
                Ok(ParsedBody::Form(self.form()?))
            }
            _ => Ok(ParsedBody::Raw(&self.body)),
        }
    }
}

/// A request body decoded according to its `Content-Type`.
#[derive(Debug, PartialEq)]
pub enum ParsedBody<'a> {
    Json(serde_json::Value),
    Form(Vec<(String, String)>),
    Raw(&'a [u8]),
}

// Media type comparison ignores parameters (`; charset=...`) and case.
fn media_type_is(value: &[u8], expected: &[u8]) -> bool {
    let media_type = match memchr(b';', value) {
        Some(pos) => &value[..pos],
        None => value,
    };
    trim_ows(media_type).eq_ignore_ascii_case(expected)
}

// HEADER MAP

/// Ordered header storage with lowercased, unique field names.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct HeaderMap {
    entries: Vec<(Vec<u8>, Vec<u8>)>,
}

impl HeaderMap {
    #[inline(always)]
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn insert(&mut self, name: Vec<u8>, value: Vec<u8>) -> Result<(), ErrorKind> {
        if self.get(&name).is_some() {
            return Err(ErrorKind::DuplicateHeader);
        }
        self.entries.push((name, value));
        Ok(())
    }

    #[inline(always)]
    pub(crate) fn get(&self, name: &[u8]) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_slice())
    }
}

// PARSE PHASES

pub(crate) struct StartLine {
    pub(crate) method: Method,
    pub(crate) target: Vec<u8>,
    pub(crate) path: String,
    pub(crate) query: Option<Vec<u8>>,
    pub(crate) version: Version,
}

#[derive(Debug, PartialEq)]
pub(crate) enum BodyFraming {
    Empty,
    Length(usize),
    Chunked,
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> HttpConnection<R, W> {
    /// Frames one request off the stream: start line, early route
    /// resolution, header block, framing headers, `Expect`, body.
    ///
    /// Failures carry the method when the start line got far enough to
    /// name one, so the driver can suppress error bodies for `HEAD`.
    pub(crate) async fn read_request(
        &mut self,
    ) -> Result<(Request, Arc<dyn Handler>), (ErrorKind, Option<Method>)> {
        let start = self.parse_start_line().await.map_err(|kind| (kind, None))?;

        let method = start.method;
        self.finish_request(start)
            .await
            .map_err(|kind| (kind, Some(method)))
    }

    async fn finish_request(
        &mut self,
        start: StartLine,
    ) -> Result<(Request, Arc<dyn Handler>), ErrorKind> {
        // Resolving before the header block means an unrouted path costs
        // the client one line of bandwidth, not a whole request.
        let Some((handler, params)) = self.router.resolve(&start.path) else {
            return Err(ErrorKind::UnroutedPath);
        };

        let headers = self.parse_headers().await?;
        if headers.get(b"host").is_none() {
            return Err(ErrorKind::MissingHost);
        }

        let framing = resolve_framing(start.method, &headers, self.req_limits.body_limit)?;
        self.handle_expect(&headers).await?;
        let body = self.read_body(framing).await?;

        let request = Request {
            method: start.method,
            target: start.target,
            path: start.path,
            query: start.query,
            version: start.version,
            headers,
            body,
            params,
        };
        Ok((request, handler))
    }

    // request-line = method SP request-target SP HTTP-version
    async fn parse_start_line(&mut self) -> Result<StartLine, ErrorKind> {
        let line = self
            .reader
            .read_until(b"\r\n", self.req_limits.line_limit)
            .await?;
        let line = &line[..line.len() - 2];

        let fields: Vec<&[u8]> = line.split(|&b| b == b' ').collect();
        let &[method, target, version] = fields.as_slice() else {
            return Err(ErrorKind::MalformedStartLine);
        };

        // Version first, then method, then target: a request that is both
        // from the future and misspelled is answered for the version.
        let version = Version::parse(version)?;
        let method = Method::parse(method)?;
        let (path, query) = split_target(target)?;

        Ok(StartLine {
            method,
            target: target.to_vec(),
            path,
            query,
            version,
        })
    }

    // field-line = field-name ":" OWS field-value OWS
    async fn parse_headers(&mut self) -> Result<HeaderMap, ErrorKind> {
        let block = self
            .reader
            .read_until(b"\r\n\r\n", self.req_limits.line_limit)
            .await?;
        let content = &block[..block.len() - 4];

        let mut headers = HeaderMap::new();
        if content.is_empty() {
            return Ok(headers);
        }

        let mut last = 0;
        for pos in memmem::find_iter(content, b"\r\n").chain([content.len()]) {
            let (name, value) = parse_field_line(&content[last..pos])?;
            headers.insert(name, value)?;
            last = pos + 2;
        }

        Ok(headers)
    }

    // Expect: 100-continue [RFC 9110, Section 10.1.1]
    async fn handle_expect(&mut self, headers: &HeaderMap) -> Result<(), ErrorKind> {
        let Some(expect) = headers.get(b"expect") else {
            return Ok(());
        };

        if !expect.eq_ignore_ascii_case(b"100-continue") {
            return Err(ErrorKind::BadExpectation);
        }
        self.write_continue().await
    }

    async fn read_body(&mut self, framing: BodyFraming) -> Result<Vec<u8>, ErrorKind> {
        match framing {
            BodyFraming::Empty => Ok(Vec::new()),
            BodyFraming::Length(len) => self.reader.read_exact(len).await,
            BodyFraming::Chunked => self.read_chunked_body().await,
        }
    }

    // chunked-body = *chunk last-chunk trailer-section CRLF
    async fn read_chunked_body(&mut self) -> Result<Vec<u8>, ErrorKind> {
        let line_limit = self.req_limits.line_limit;
        let mut body = Vec::new();

        loop {
            let size_line = self.reader.read_until(b"\r\n", line_limit).await?;
            let size = parse_chunk_size(&size_line[..size_line.len() - 2])?;

            if size == 0 {
                // Trailer fields are consumed, never surfaced.
                loop {
                    let trailer = self.reader.read_until(b"\r\n", line_limit).await?;
                    if trailer == b"\r\n" {
                        return Ok(body);
                    }
                }
            }

            if body.len() + size > self.req_limits.body_limit {
                return Err(ErrorKind::OversizeBody);
            }

            let chunk = self.reader.read_exact(size).await?;
            body.extend_from_slice(&chunk);

            if self.reader.read_exact(2).await? != b"\r\n" {
                return Err(ErrorKind::BadChunk);
            }
        }
    }
}

// FIELD-LEVEL PARSERS

/// Splits an origin-form request-target into a decoded path and raw query.
///
/// origin-form = absolute-path [ "?" query ], restricted here to
/// `/[\w/]*` paths and `[\w=&]*` queries.
pub(crate) fn split_target(target: &[u8]) -> Result<(String, Option<Vec<u8>>), ErrorKind> {
    if target.first() != Some(&b'/') {
        return Err(ErrorKind::MalformedStartLine);
    }

    let (raw_path, query) = match memchr(b'?', target) {
        Some(pos) => (&target[..pos], Some(&target[pos + 1..])),
        None => (target, None),
    };

    let path_ok = raw_path[1..]
        .iter()
        .all(|&b| b.is_ascii_alphanumeric() || b == b'_' || b == b'/');
    let query_ok = query.map_or(true, |q| {
        q.iter()
            .all(|&b| b.is_ascii_alphanumeric() || b == b'_' || b == b'=' || b == b'&')
    });
    if !path_ok || !query_ok {
        return Err(ErrorKind::MalformedStartLine);
    }

    let decoded = percent_decode(raw_path).collect::<Vec<u8>>();
    let path = simdutf8::basic::from_utf8(&decoded)
        .map(str::to_owned)
        .map_err(|_| ErrorKind::MalformedStartLine)?;

    Ok((path, query.map(<[u8]>::to_vec)))
}

/// Parses one header field line into a lowercased name and trimmed value.
pub(crate) fn parse_field_line(line: &[u8]) -> Result<(Vec<u8>, Vec<u8>), ErrorKind> {
    let colon = memchr(b':', line).ok_or(ErrorKind::MalformedHeader)?;

    // No whitespace between field-name and colon: WS is not a tchar.
    let name = &line[..colon];
    if !types::is_token(name) {
        return Err(ErrorKind::MalformedHeader);
    }

    let value = trim_ows(&line[colon + 1..]);
    if value
        .iter()
        .any(|&b| (b < 0x20 && b != b'\t') || b == 0x7f)
    {
        return Err(ErrorKind::MalformedHeader);
    }

    Ok((types::to_lower_vec(name), value.to_vec()))
}

#[inline]
fn trim_ows(mut value: &[u8]) -> &[u8] {
    while let [b' ' | b'\t', rest @ ..] = value {
        value = rest;
    }
    while let [rest @ .., b' ' | b'\t'] = value {
        value = rest;
    }
    value
}

/// Decides how the body is framed: chunked transfer-coding wins, then
/// content-length, then 411 for unsafe methods.
pub(crate) fn resolve_framing(
    method: Method,
    headers: &HeaderMap,
    body_limit: usize,
) -> Result<BodyFraming, ErrorKind> {
    if let Some(te) = headers.get(b"transfer-encoding") {
        if has_chunked_token(te) {
            return Ok(BodyFraming::Chunked);
        }
    }

    if let Some(raw) = headers.get(b"content-length") {
        let len = types::slice_to_usize(raw).ok_or(ErrorKind::BadContentLength)?;
        if len > body_limit {
            return Err(ErrorKind::OversizeBody);
        }
        if method.is_safe() && len > 0 {
            return Err(ErrorKind::BadContentLength);
        }
        return Ok(match len {
            0 => BodyFraming::Empty,
            _ => BodyFraming::Length(len),
        });
    }

    match method.is_safe() {
        true => Ok(BodyFraming::Empty),
        false => Err(ErrorKind::LengthRequired),
    }
}

#[inline]
fn has_chunked_token(value: &[u8]) -> bool {
    value
        .split(|&b| b == b',')
        .any(|token| trim_ows(token).eq_ignore_ascii_case(b"chunked"))
}

/// Parses a chunk-size line, discarding chunk-extensions after `;`.
pub(crate) fn parse_chunk_size(line: &[u8]) -> Result<usize, ErrorKind> {
    let size_field = match memchr(b';', line) {
        Some(pos) => &line[..pos],
        None => line,
    };
    let size_field = trim_ows(size_field);

    let text = simdutf8::basic::from_utf8(size_field).map_err(|_| ErrorKind::BadChunk)?;
    usize::from_str_radix(text, 16).map_err(|_| ErrorKind::BadChunk)
}
