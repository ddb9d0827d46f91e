//! Code generation: lowers an analyzed route table into a
//! `CompiledServer` — static response bytes computed once, a 404/500
//! constant, and the dispatcher. No C source or `.so` is emitted; see
//! `cache` for the content-addressed artifact dump this step produces
//! instead.

pub mod cache;
pub mod dispatch;

use crate::analyzer::{Analysis, RouteAnalyzer};
use crate::error::HypersonicError;
use crate::middleware::{run_after_chain, run_before_chain, MiddlewareChain};
use crate::response::{self, HandlerOutput, RenderContext};
use crate::route::{Classification, Route};
use crate::security::SecurityHeaderOverrides;
use crate::websocket::WebSocketHandler;
use dispatch::Dispatcher;
use std::collections::HashMap;
use std::sync::Arc;

/// The frozen, specialized structure produced by generation.
/// `compile()` with the same route table always produces a `CompiledServer`
/// with the same `module_id` and the same static response bytes.
pub struct CompiledServer {
    pub module_id: String,
    pub routes: Vec<Route>,
    pub analysis: Analysis,
    pub dispatcher: Dispatcher,
    /// Rendered once at generation time, indexed by `Route::index` for
    /// static routes.
    pub static_responses: Vec<Option<Vec<u8>>>,
    pub not_found: Vec<u8>,
    pub internal_error: Vec<u8>,
    pub global: MiddlewareChain,
    pub security_headers: Option<Vec<u8>>,
    pub websocket_routes: HashMap<String, WebSocketHandler>,
}

pub struct CodeGenerator;

impl CodeGenerator {
    /// Run analysis and generation, returning the compiled, specialized
    /// server structure or the `CompileError` that blocked it.
    #[allow(clippy::too_many_arguments)]
    pub fn generate(
        routes: Vec<Route>,
        global: MiddlewareChain,
        websocket_routes: HashMap<String, WebSocketHandler>,
        needs_async_pool: bool,
        security_overrides: &SecurityHeaderOverrides,
        enable_security_headers: bool,
        is_tls: bool,
        keep_alive: bool,
    ) -> Result<CompiledServer, HypersonicError> {
        let needs_websocket = !websocket_routes.is_empty();
        let analysis = RouteAnalyzer::analyze(&routes, &global, needs_websocket, needs_async_pool)?;

        // `enable_security_headers` gates the whole splice; when
        // off, no security-header constant is built at all rather than built
        // and then discarded.
        let security_headers = enable_security_headers
            .then(|| crate::security::build_security_headers(security_overrides, is_tls));
        let security_ref = security_headers.as_deref();

        let render_ctx = RenderContext {
            security_headers: security_ref,
            keep_alive,
            gzip: None,
        };

        // Static routes are invoked once, here, so their response bytes are
        // a precomputed constant thereafter. The same global+route middleware
        // sandwich the trampoline runs per dynamic request is applied here
        // exactly once — since the response never changes again, a
        // short-circuit or rewrite only needs to happen at generation time to
        // be reflected in every future dispatch of this route — the ordered
        // middleware sandwich has no separate meaning for a route whose
        // output is frozen at compile().
        let mut static_responses: Vec<Option<Vec<u8>>> = vec![None; routes.len()];
        for route in &routes {
            if route.classification() == Classification::Static {
                let mut request = crate::request::Request::new();
                request.method = route.method.as_str().to_string();
                request.path = route.template.raw.clone();

                let short_circuited =
                    run_before_chain(&global, &route.native_before, &route.before, &mut request);
                let mut output: HandlerOutput =
                    short_circuited.unwrap_or_else(|| (route.handler)(&request));
                let view = request.clone_without_body();
                run_after_chain(&global, &route.after, &route.native_after, &view, &mut output);

                let rendered = response::render(output, &render_ctx);
                let bytes = match rendered {
                    response::RenderedResponse::Bytes(b) => b,
                    response::RenderedResponse::Streaming => {
                        return Err(HypersonicError::Compile(format!(
                            "static route {} {} produced a streaming response",
                            route.method.as_str(),
                            route.template.raw
                        )))
                    }
                };
                static_responses[route.index] = Some(bytes);
            }
        }

        let not_found = response::not_found_constant(security_ref);
        let internal_error = response::internal_error_constant();
        let dispatcher = Dispatcher::build(&routes);
        let module_id = cache::module_id(&routes);

        Ok(CompiledServer {
            module_id,
            routes,
            analysis,
            dispatcher,
            static_responses,
            not_found,
            internal_error,
            global,
            security_headers,
            websocket_routes,
        })
    }
}

impl CompiledServer {
    pub fn route(&self, index: usize) -> &Route {
        &self.routes[index]
    }

    pub fn static_response(&self, index: usize) -> Arc<[u8]> {
        self.static_responses[index]
            .as_ref()
            .map(|b| Arc::from(b.as_slice()))
            .unwrap_or_else(|| Arc::from(self.internal_error.as_slice()))
    }
}
