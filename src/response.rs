//! Response shapes, status-code table, and wire rendering.

use std::collections::HashMap;

/// Status text table. Codes not listed here render as "Unknown".
pub fn status_text(code: u16) -> &'static str {
    match code {
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        409 => "Conflict",
        410 => "Gone",
        413 => "Payload Too Large",
        415 => "Unsupported Media Type",
        422 => "Unprocessable Entity",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Unknown",
    }
}

/// `Set-Cookie` may repeat; every other header is single-valued.
#[derive(Debug, Clone, Default)]
pub struct HeaderMap {
    single: Vec<(String, String)>,
    set_cookie: Vec<String>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        if name.eq_ignore_ascii_case("set-cookie") {
            self.set_cookie.push(value.into());
        } else {
            self.single.push((name, value.into()));
        }
    }

    pub fn extend_set_cookie(&mut self, values: impl IntoIterator<Item = String>) {
        self.set_cookie.extend(values);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.single
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .chain(self.set_cookie.iter().map(|v| ("Set-Cookie", v.as_str())))
    }

    /// Drop any user-supplied `Content-Length` — the renderer always
    /// computes it from the final body. `Content-Type` is left alone: an
    /// explicit user value is honored, and auto-detection only fills in
    /// when none was given (see `render`).
    fn strip_computed(&mut self) {
        self.single.retain(|(k, _)| !k.eq_ignore_ascii_case("content-length"));
    }

    fn has_content_type(&self) -> bool {
        self.single.iter().any(|(k, _)| k.eq_ignore_ascii_case("content-type"))
    }
}

/// What a handler (or middleware short-circuit) returned, before rendering.
pub enum HandlerOutput {
    /// Plain byte-string body; status 200, content-type auto-detected.
    Bytes(Vec<u8>),
    /// Explicit `(status, headers, body)`.
    Full {
        status: u16,
        headers: HeaderMap,
        body: Vec<u8>,
    },
    /// Handler raised; becomes a 500 with a fixed body.
    Error,
    /// Streaming handler already wrote and owns the connection; no bytes to send.
    Streaming,
}

impl HandlerOutput {
    pub fn full(status: u16, headers: HeaderMap, body: impl Into<Vec<u8>>) -> Self {
        HandlerOutput::Full {
            status,
            headers,
            body: body.into(),
        }
    }

    pub fn bytes(body: impl Into<Vec<u8>>) -> Self {
        HandlerOutput::Bytes(body.into())
    }
}

/// A fully rendered HTTP response, ready to be written to the wire, or the
/// streaming sentinel.
pub enum RenderedResponse {
    Bytes(Vec<u8>),
    Streaming,
}

impl RenderedResponse {
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            RenderedResponse::Bytes(b) => Some(b),
            RenderedResponse::Streaming => None,
        }
    }
}

/// Auto-detect content-type from the first non-whitespace byte of a plain
/// byte-string body.
fn detect_content_type(body: &[u8]) -> &'static str {
    match body.iter().find(|b| !b.is_ascii_whitespace()) {
        Some(b'{') | Some(b'[') => "application/json",
        _ => "text/plain",
    }
}

/// Rendering context: security headers, keep-alive decision, and optional
/// gzip compression.
pub struct RenderContext<'a> {
    pub security_headers: Option<&'a [u8]>,
    pub keep_alive: bool,
    pub gzip: Option<&'a GzipPolicy>,
}

pub struct GzipPolicy {
    pub accept_encoding_has_gzip: bool,
    pub min_size: usize,
}

/// Render a `HandlerOutput` into the final wire bytes.
pub fn render(output: HandlerOutput, ctx: &RenderContext<'_>) -> RenderedResponse {
    let (status, mut headers, mut body) = match output {
        HandlerOutput::Bytes(body) => {
            let mut h = HeaderMap::new();
            h.insert("Content-Type", detect_content_type(&body));
            (200, h, body)
        }
        HandlerOutput::Full {
            status,
            mut headers,
            body,
        } => {
            headers.strip_computed();
            if !headers.has_content_type() {
                headers.insert("Content-Type", detect_content_type(&body));
            }
            (status, headers, body)
        }
        HandlerOutput::Error => {
            let mut h = HeaderMap::new();
            h.insert("Content-Type", "text/plain");
            h.insert("Connection", "close");
            return RenderedResponse::Bytes(build(500, &h, b"Internal Server Error"));
        }
        HandlerOutput::Streaming => return RenderedResponse::Streaming,
    };

    if let Some(policy) = ctx.gzip {
        if policy.accept_encoding_has_gzip && body.len() >= policy.min_size {
            if let Ok(compressed) = crate::compression::gzip(&body) {
                body = compressed;
                headers.insert("Content-Encoding", "gzip");
            }
        }
    }

    headers.insert("Connection", if ctx.keep_alive { "keep-alive" } else { "close" });

    if let Some(sec) = ctx.security_headers {
        // Security headers are a pre-joined constant spliced verbatim.
        for line in std::str::from_utf8(sec).unwrap_or("").split("\r\n") {
            if let Some((k, v)) = line.split_once(": ") {
                headers.insert(k, v);
            }
        }
    }

    RenderedResponse::Bytes(build(status, &headers, &body))
}

fn build(status: u16, headers: &HeaderMap, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 256);
    out.extend_from_slice(format!("HTTP/1.1 {} {}\r\n", status, status_text(status)).as_bytes());
    for (k, v) in headers.iter() {
        out.extend_from_slice(k.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(v.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(body);
    out
}

/// Build the fixed 404 constant once at generation time.
pub fn not_found_constant(security_headers: Option<&[u8]>) -> Vec<u8> {
    let mut headers = HeaderMap::new();
    headers.insert("Content-Type", "text/plain");
    let ctx = RenderContext {
        security_headers,
        keep_alive: true,
        gzip: None,
    };
    match render(HandlerOutput::full(404, headers, *b"Not Found"), &ctx) {
        RenderedResponse::Bytes(b) => b,
        RenderedResponse::Streaming => unreachable!(),
    }
}

/// Build the fixed 500 constant once at generation time.
pub fn internal_error_constant() -> Vec<u8> {
    match render(HandlerOutput::Error, &RenderContext {
        security_headers: None,
        keep_alive: false,
        gzip: None,
    }) {
        RenderedResponse::Bytes(b) => b,
        RenderedResponse::Streaming => unreachable!(),
    }
}

/// Parse the query-string / form-body shared percent-decoding rule
/// (`+` -> space, then percent-decode).
pub fn parse_urlencoded(input: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    if input.is_empty() {
        return out;
    }
    for pair in input.split('&').filter(|s| !s.is_empty()) {
        let mut parts = pair.splitn(2, '=');
        let key = parts.next().unwrap_or("");
        let value = parts.next().unwrap_or("");
        let value = value.replace('+', " ");
        let key = urlencoding::decode(key).map(|c| c.into_owned()).unwrap_or_default();
        let value = urlencoding::decode(&value).map(|c| c.into_owned()).unwrap_or_default();
        out.insert(key, value);
    }
    out
}
