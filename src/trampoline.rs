//! The dynamic handler trampoline: the exact per-request
//! step order a dynamic or native-builder route runs through, parsing only
//! what that route's flags ask for.

use crate::codegen::CompiledServer;
use crate::middleware::{run_after_chain, run_before_chain};
use crate::request::Request;
use crate::response::{self, GzipPolicy, HandlerOutput, RenderContext, RenderedResponse};
use crate::route::Route;
use std::panic::{self, AssertUnwindSafe};
use tracing::warn;

pub struct TrampolineContext<'a> {
    pub compiled: &'a CompiledServer,
    pub keep_alive: bool,
    pub accept_encoding: Option<&'a str>,
    pub gzip_min_size: usize,
}

/// Raw bytes the event loop has already read off the wire, handed in so the
/// trampoline can decide — per each route's flags — how much of it to
/// actually parse. Dynamic routes only pay for the parsing their own flags
/// ask for.
pub struct RawRequest<'a> {
    pub raw_headers: &'a [(String, String)],
    pub body: Vec<u8>,
}

/// Run the full trampoline for one dynamic (or native-builder) dispatch,
/// in order:
/// 1. split path at `?`
/// 2. allocate/extend extension slots
/// 3. segment the path, fill terminal segment
/// 4. bind named params from the route's `(name, position)` table
/// 5. parse query string if requested
/// 6. parse headers (and cookies/json/form as implied) if requested
/// 7. native-builder before-middleware, then callable before-middleware
///    (short-circuits on `Stop`)
/// 8. invoke the handler
/// 9. callable after-middleware, then native-builder after-middleware
/// 10. streaming sentinel
/// 11. render
pub fn dispatch_dynamic(
    route: &Route,
    raw_path_and_query: &str,
    raw: RawRequest<'_>,
    ctx: &TrampolineContext<'_>,
) -> RenderedResponse {
    let mut request = Request::new();
    request.method = route.method.as_str().to_string();
    request.body = raw.body;

    // Step 1: split path at `?`.
    let (path, query_string) = match raw_path_and_query.split_once('?') {
        Some((p, q)) => (p, q),
        None => (raw_path_and_query, ""),
    };
    request.path = path.to_string();
    request.query_string = query_string.to_string();

    // Step 2: extension slots sized to this server's native-builder count.
    request.reserve_extensions(ctx.compiled.analysis.extension_slot_count());

    // Step 3: segment the path; terminal segment is the last one (or empty
    // for the root path).
    let segments: Vec<String> = if path == "/" {
        Vec::new()
    } else {
        path.trim_start_matches('/').split('/').map(str::to_string).collect()
    };
    request.terminal_segment = segments.last().cloned().unwrap_or_default();
    request.segments = segments.clone();

    // Step 4: bind named params by position.
    for (name, position) in route.param_positions() {
        if let Some(value) = segments.get(position) {
            request.params.insert(name, value.clone());
        }
    }

    // Step 5: query parsing.
    if route.flags.parse_query {
        request.query = response::parse_urlencoded(query_string);
    }

    // Step 6: header-derived parsing. Only copy headers at all when this
    // route (or one of its implied flags) actually needs them.
    if route.flags.parse_headers {
        for (k, v) in raw.raw_headers {
            request.headers.insert(normalize_header_name(k), v.clone());
        }
    }
    if route.flags.parse_cookies {
        if let Some(cookie_header) = request.headers.get("cookie").cloned() {
            request.cookies = parse_cookie_header(&cookie_header);
        }
    }
    let content_type = request.headers.get("content_type").map(String::as_str).unwrap_or("");
    if route.flags.parse_json && content_type.starts_with("application/json") && !request.body.is_empty() {
        request.json = crate::json::parse_json_bytes(&request.body).ok();
    }
    if route.flags.parse_form && content_type.starts_with("application/x-www-form-urlencoded") {
        if let Ok(body_str) = std::str::from_utf8(&request.body) {
            request.form = response::parse_urlencoded(body_str);
        }
    }

    // Step 7: native-builder before, then callable before — global wraps
    // route on both ends; first `Stop` short-circuits the rest of the chain
    // and the handler itself. Per-route before-middleware runs after global.
    let short_circuited = run_before_chain(&ctx.compiled.global, &route.native_before, &route.before, &mut request);

    // Step 8: invoke the handler, unless short-circuited. A panicking
    // handler must not take the worker down with it — caught and turned
    // into the same 500 a returned error produces.
    let mut output = short_circuited.unwrap_or_else(|| {
        match panic::catch_unwind(AssertUnwindSafe(|| (route.handler)(&request))) {
            Ok(output) => output,
            Err(payload) => {
                let msg = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                warn!(route = %route.template.raw, error = %msg, "handler panicked");
                HandlerOutput::Error
            }
        }
    });

    // Step 9: callable after, then native-builder after — mirrors the before
    // side's nesting so global still sandwiches route on each end:
    // global-before, route-before, handler, route-after, global-after.
    let view = request.clone_without_body();
    run_after_chain(&ctx.compiled.global, &route.after, &route.native_after, &view, &mut output);

    // Step 10: streaming sentinel — the handler already wrote and owns the
    // connection, nothing further to render.
    if matches!(output, HandlerOutput::Streaming) {
        return RenderedResponse::Streaming;
    }

    // Step 11: render.
    let gzip_policy = ctx.accept_encoding.map(|ae| GzipPolicy {
        accept_encoding_has_gzip: crate::compression::accepts_gzip(ae),
        min_size: ctx.gzip_min_size,
    });
    let render_ctx = RenderContext {
        security_headers: ctx.compiled.security_headers.as_deref(),
        keep_alive: ctx.keep_alive,
        gzip: gzip_policy.as_ref(),
    };
    response::render(output, &render_ctx)
}

/// Header names are normalized to lowercase with `-` replaced by `_`, so a
/// handler reads `request.headers["content_type"]` rather than the
/// wire-level `Content-Type`.
fn normalize_header_name(name: &str) -> String {
    name.to_ascii_lowercase().replace('-', "_")
}

fn parse_cookie_header(header: &str) -> crate::request::CookieMap {
    let mut out = crate::request::CookieMap::new();
    for pair in header.split(';') {
        if let Some((k, v)) = pair.trim().split_once('=') {
            out.insert(k.trim().to_string(), v.trim().to_string());
        }
    }
    out
}
