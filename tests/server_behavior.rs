//! End-to-end scenarios exercised through the public route table, the
//! generated dispatcher, and the request trampoline together — the same
//! path a live connection drives, without opening a socket.

use hypersonic::codegen::dispatch::DispatchOutcome;
use hypersonic::codegen::CodeGenerator;
use hypersonic::middleware::{Middleware, MiddlewareAction, MiddlewareChain};
use hypersonic::response::HandlerOutput;
use hypersonic::route::{Method, PathTemplate, Route, RouteFlags};
use hypersonic::security::SecurityHeaderOverrides;
use hypersonic::trampoline::{dispatch_dynamic, RawRequest, TrampolineContext};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

fn route(method: Method, path: &str, flags: RouteFlags, handler: hypersonic::route::HandlerFn) -> Route {
    Route {
        method,
        template: PathTemplate::parse(path).unwrap(),
        handler,
        flags: flags.normalize(),
        before: Vec::new(),
        after: Vec::new(),
        native_before: Vec::new(),
        native_after: Vec::new(),
        index: 0,
    }
}

fn reindex(mut routes: Vec<Route>) -> Vec<Route> {
    for (i, r) in routes.iter_mut().enumerate() {
        r.index = i;
    }
    routes
}

fn render_one(route: &Route, path_and_query: &str, raw: RawRequest<'_>, compiled: &hypersonic::codegen::CompiledServer) -> Vec<u8> {
    let ctx = TrampolineContext {
        compiled,
        keep_alive: true,
        accept_encoding: None,
        gzip_min_size: 1024,
    };
    dispatch_dynamic(route, path_and_query, raw, &ctx).as_bytes().unwrap().to_vec()
}

/// Scenario 1: a plain GET to a static route returns the precomputed body.
#[test]
fn static_get_returns_precomputed_body() {
    let routes = reindex(vec![route(
        Method::Get,
        "/health",
        RouteFlags::default(),
        Arc::new(|_req| HandlerOutput::bytes(b"ok".to_vec())),
    )]);
    let compiled = CodeGenerator::generate(
        routes,
        MiddlewareChain::default(),
        HashMap::new(),
        false,
        &SecurityHeaderOverrides::default(),
        true,
        false,
        true,
    )
    .unwrap();

    let outcome = compiled.dispatcher.dispatch(Method::Get, "/health");
    let index = match outcome {
        DispatchOutcome::Static(index) => index,
        other => panic!("expected a static dispatch, got {other:?}"),
    };
    let body = compiled.static_response(index);
    let text = String::from_utf8_lossy(&body);
    assert!(text.starts_with("HTTP/1.1 200 OK"));
    assert!(text.ends_with("ok"));
}

/// Scenario 2: a dynamic JSON-echo route parses the body before the
/// handler runs and reflects it back.
#[test]
fn dynamic_json_echo_round_trips_the_body() {
    let routes = reindex(vec![route(
        Method::Post,
        "/echo",
        RouteFlags {
            parse_json: true,
            ..Default::default()
        },
        Arc::new(|req| match &req.json {
            Some(v) => HandlerOutput::bytes(hypersonic::json::serialize_json(v).unwrap()),
            None => HandlerOutput::Error,
        }),
    )]);
    let compiled = CodeGenerator::generate(
        routes,
        MiddlewareChain::default(),
        HashMap::new(),
        false,
        &SecurityHeaderOverrides::default(),
        true,
        false,
        true,
    )
    .unwrap();

    let outcome = compiled.dispatcher.dispatch(Method::Post, "/echo");
    let index = match outcome {
        DispatchOutcome::Dynamic(index) => index,
        other => panic!("expected a dynamic dispatch, got {other:?}"),
    };
    let raw = RawRequest {
        raw_headers: &[("Content-Type".to_string(), "application/json".to_string())],
        body: serde_json::to_vec(&serde_json::json!({"n": 7})).unwrap(),
    };
    let body = render_one(compiled.route(index), "/echo", raw, &compiled);
    let split = body.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
    let parsed: serde_json::Value = serde_json::from_slice(&body[split..]).unwrap();
    assert_eq!(parsed, serde_json::json!({"n": 7}));
}

/// Scenario 3: a parametric route binds the named segment and the handler
/// sees it in `req.params`.
#[test]
fn param_route_binds_named_segment() {
    let routes = reindex(vec![route(
        Method::Get,
        "/u/:id",
        RouteFlags::default(),
        Arc::new(|req| {
            let id = req.params.get("id").cloned().unwrap_or_default();
            HandlerOutput::bytes(format!("user:{id}").into_bytes())
        }),
    )]);
    let compiled = CodeGenerator::generate(
        routes,
        MiddlewareChain::default(),
        HashMap::new(),
        false,
        &SecurityHeaderOverrides::default(),
        true,
        false,
        true,
    )
    .unwrap();

    let outcome = compiled.dispatcher.dispatch(Method::Get, "/u/42");
    let index = match outcome {
        DispatchOutcome::Dynamic(index) => index,
        other => panic!("expected a dynamic dispatch, got {other:?}"),
    };
    let raw = RawRequest {
        raw_headers: &[],
        body: Vec::new(),
    };
    let body = render_one(compiled.route(index), "/u/42", raw, &compiled);
    assert!(String::from_utf8_lossy(&body).ends_with("user:42"));
}

/// Scenario 4: a path matching no route dispatches to the precomputed
/// 404 constant, not a per-request render.
#[test]
fn unknown_route_dispatches_to_the_404_constant() {
    let routes = reindex(vec![route(
        Method::Get,
        "/health",
        RouteFlags::default(),
        Arc::new(|_req| HandlerOutput::bytes(b"ok".to_vec())),
    )]);
    let compiled = CodeGenerator::generate(
        routes,
        MiddlewareChain::default(),
        HashMap::new(),
        false,
        &SecurityHeaderOverrides::default(),
        true,
        false,
        true,
    )
    .unwrap();

    let outcome = compiled.dispatcher.dispatch(Method::Get, "/nope");
    assert_eq!(outcome, DispatchOutcome::NotFound);
    let text = String::from_utf8_lossy(&compiled.not_found);
    assert!(text.starts_with("HTTP/1.1 404 Not Found"));
}

struct BlockAll;

impl Middleware for BlockAll {
    fn before(&self, _req: &mut hypersonic::request::Request) -> MiddlewareAction {
        MiddlewareAction::Stop(HandlerOutput::full(403, Default::default(), b"forbidden".to_vec()))
    }
}

/// Scenario 5: global before-middleware short-circuits the chain; the
/// route's own handler never runs.
#[test]
fn global_before_middleware_short_circuits_the_handler() {
    let handler_ran = Arc::new(AtomicBool::new(false));
    let flag = handler_ran.clone();
    let routes = reindex(vec![route(
        Method::Get,
        "/admin",
        RouteFlags::default(),
        Arc::new(move |_req| {
            flag.store(true, Ordering::SeqCst);
            HandlerOutput::bytes(b"should not run".to_vec())
        }),
    )]);
    let global = MiddlewareChain {
        before: vec![Arc::new(BlockAll)],
        after: Vec::new(),
        native_before: Vec::new(),
        native_after: Vec::new(),
    };
    let compiled = CodeGenerator::generate(
        routes,
        global,
        HashMap::new(),
        false,
        &SecurityHeaderOverrides::default(),
        true,
        false,
        true,
    )
    .unwrap();

    // The route itself classifies as Static (no params/flags), so the
    // generated static body is what the code generator already rendered
    // through the same global chain at compile time.
    match compiled.dispatcher.dispatch(Method::Get, "/admin") {
        DispatchOutcome::Static(_) => {}
        other => panic!("expected /admin to classify as static, got {other:?}"),
    }
    assert!(!handler_ran.load(Ordering::SeqCst), "short-circuited handler must not run");
}

/// Scenario 6: keep-alive is reflected on the rendered response across
/// repeated dispatches of the same compiled server (no per-request state
/// leaks between them).
#[test]
fn keep_alive_is_reflected_across_repeated_requests() {
    let routes = reindex(vec![route(
        Method::Get,
        "/u/:id",
        RouteFlags::default(),
        Arc::new(|req| {
            let id = req.params.get("id").cloned().unwrap_or_default();
            HandlerOutput::bytes(id.into_bytes())
        }),
    )]);
    let compiled = CodeGenerator::generate(
        routes,
        MiddlewareChain::default(),
        HashMap::new(),
        false,
        &SecurityHeaderOverrides::default(),
        true,
        false,
        true,
    )
    .unwrap();

    let outcome = compiled.dispatcher.dispatch(Method::Get, "/u/1");
    let index = match outcome {
        DispatchOutcome::Dynamic(index) => index,
        other => panic!("expected a dynamic dispatch, got {other:?}"),
    };
    for path in ["/u/1", "/u/2"] {
        let raw = RawRequest {
            raw_headers: &[],
            body: Vec::new(),
        };
        let body = render_one(compiled.route(index), path, raw, &compiled);
        let text = String::from_utf8_lossy(&body);
        assert!(text.contains("Connection: keep-alive"));
    }
}

struct TagAfter;

impl Middleware for TagAfter {
    fn after(&self, _req: &hypersonic::request::Request, _response: &HandlerOutput) -> Option<HandlerOutput> {
        Some(HandlerOutput::bytes(b"tagged".to_vec()))
    }
}

/// Global before/after middleware must run for dynamic routes too, sandwiching
/// the route's own middleware and handler: global-before, route-before,
/// handler, route-after, global-after.
#[test]
fn global_middleware_runs_around_dynamic_routes() {
    let routes = reindex(vec![route(
        Method::Get,
        "/u/:id",
        RouteFlags::default(),
        Arc::new(|req| {
            let id = req.params.get("id").cloned().unwrap_or_default();
            HandlerOutput::bytes(id.into_bytes())
        }),
    )]);
    let global = MiddlewareChain {
        before: Vec::new(),
        after: vec![Arc::new(TagAfter)],
        native_before: Vec::new(),
        native_after: Vec::new(),
    };
    let compiled = CodeGenerator::generate(
        routes,
        global,
        HashMap::new(),
        false,
        &SecurityHeaderOverrides::default(),
        true,
        false,
        true,
    )
    .unwrap();

    let index = match compiled.dispatcher.dispatch(Method::Get, "/u/42") {
        DispatchOutcome::Dynamic(index) => index,
        other => panic!("expected a dynamic dispatch, got {other:?}"),
    };
    let raw = RawRequest {
        raw_headers: &[],
        body: Vec::new(),
    };
    let body = render_one(compiled.route(index), "/u/42", raw, &compiled);
    assert!(String::from_utf8_lossy(&body).ends_with("tagged"));
}

/// Global before-middleware short-circuits a dynamic route's own handler,
/// not just a static one (complements
/// `global_before_middleware_short_circuits_the_handler` above).
#[test]
fn global_before_middleware_short_circuits_a_dynamic_handler() {
    let handler_ran = Arc::new(AtomicBool::new(false));
    let flag = handler_ran.clone();
    let routes = reindex(vec![route(
        Method::Get,
        "/u/:id",
        RouteFlags::default(),
        Arc::new(move |_req| {
            flag.store(true, Ordering::SeqCst);
            HandlerOutput::bytes(b"should not run".to_vec())
        }),
    )]);
    let global = MiddlewareChain {
        before: vec![Arc::new(BlockAll)],
        after: Vec::new(),
        native_before: Vec::new(),
        native_after: Vec::new(),
    };
    let compiled = CodeGenerator::generate(
        routes,
        global,
        HashMap::new(),
        false,
        &SecurityHeaderOverrides::default(),
        true,
        false,
        true,
    )
    .unwrap();

    let index = match compiled.dispatcher.dispatch(Method::Get, "/u/42") {
        DispatchOutcome::Dynamic(index) => index,
        other => panic!("expected a dynamic dispatch, got {other:?}"),
    };
    let raw = RawRequest {
        raw_headers: &[],
        body: Vec::new(),
    };
    let body = render_one(compiled.route(index), "/u/42", raw, &compiled);
    assert!(String::from_utf8_lossy(&body).ends_with("forbidden"));
    assert!(!handler_ran.load(Ordering::SeqCst), "short-circuited handler must not run");
}

/// Content-Type gates JSON/form body parsing; a `parse_json` route with no
/// matching header must not attempt to decode the body, leaving
/// `request.json` `None`.
#[test]
fn json_parsing_is_gated_on_content_type_header() {
    let routes = reindex(vec![route(
        Method::Post,
        "/echo",
        RouteFlags {
            parse_json: true,
            ..Default::default()
        },
        Arc::new(|req| HandlerOutput::bytes(if req.json.is_some() { b"yes".to_vec() } else { b"no".to_vec() })),
    )]);
    let compiled = CodeGenerator::generate(
        routes,
        MiddlewareChain::default(),
        HashMap::new(),
        false,
        &SecurityHeaderOverrides::default(),
        true,
        false,
        true,
    )
    .unwrap();
    let index = match compiled.dispatcher.dispatch(Method::Post, "/echo") {
        DispatchOutcome::Dynamic(index) => index,
        other => panic!("expected a dynamic dispatch, got {other:?}"),
    };

    // No Content-Type header at all: body looks like JSON but must not be parsed.
    let raw = RawRequest {
        raw_headers: &[],
        body: serde_json::to_vec(&serde_json::json!({"n": 1})).unwrap(),
    };
    let body = render_one(compiled.route(index), "/echo", raw, &compiled);
    assert!(String::from_utf8_lossy(&body).ends_with("no"));

    // Matching Content-Type: body is parsed.
    let raw = RawRequest {
        raw_headers: &[("Content-Type".to_string(), "application/json".to_string())],
        body: serde_json::to_vec(&serde_json::json!({"n": 1})).unwrap(),
    };
    let body = render_one(compiled.route(index), "/echo", raw, &compiled);
    assert!(String::from_utf8_lossy(&body).ends_with("yes"));
}

/// Compiling the same route table twice yields the same content-addressed
/// module id.
#[test]
fn same_route_table_yields_same_module_id() {
    fn build() -> Vec<Route> {
        reindex(vec![route(
            Method::Get,
            "/health",
            RouteFlags::default(),
            Arc::new(|_req| HandlerOutput::bytes(b"ok".to_vec())),
        )])
    }
    let a = CodeGenerator::generate(
        build(),
        MiddlewareChain::default(),
        HashMap::new(),
        false,
        &SecurityHeaderOverrides::default(),
        true,
        false,
        true,
    )
    .unwrap();
    let b = CodeGenerator::generate(
        build(),
        MiddlewareChain::default(),
        HashMap::new(),
        false,
        &SecurityHeaderOverrides::default(),
        true,
        false,
        true,
    )
    .unwrap();
    assert_eq!(a.module_id, b.module_id);
}

/// Exercises the crate's full public builder surface (`App`) end to end,
/// including a param route and the async-pool opt-in, down through
/// `compile()`.
#[test]
fn app_builder_compiles_a_mixed_route_table() {
    let app = hypersonic::App::new()
        .get("/health", |_req| HandlerOutput::bytes(b"ok".to_vec()))
        .unwrap()
        .get("/u/:id", |req| {
            let id = req.params.get("id").cloned().unwrap_or_default();
            HandlerOutput::bytes(id.into_bytes())
        })
        .unwrap()
        .enable_async_pool();

    let server = app.compile().unwrap();
    assert_eq!(server.metrics().snapshot().total_requests, 0);
    assert!(server.async_pool().is_some());
}
