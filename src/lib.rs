//! Hypersonic: a high-throughput HTTP server built around a route-specialized
//! compile step. `App` is the thin public surface:
//! register routes and middleware, `compile()` to analyze and generate the
//! specialized dispatch structure, then `run()` to serve.

pub mod analyzer;
pub mod asyncpool;
pub mod backend;
pub mod codegen;
pub mod compression;
pub mod error;
pub mod http2;
pub mod json;
pub mod middleware;
pub mod request;
pub mod response;
pub mod route;
pub mod security;
pub mod server;
pub mod staticfiles;
pub mod tls;
pub mod trampoline;
pub mod websocket;

use error::{HypersonicError, Result};
use middleware::{MiddlewareChain, MiddlewareRef, NativeMiddlewareRef};
use route::{HandlerFn, Method, PathTemplate, Route, RouteFlags};
use security::SecurityHeaderOverrides;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use websocket::WebSocketHandler;

/// Route registration options, mirroring `RouteFlags`.
#[derive(Debug, Clone, Default)]
pub struct RouteOptions {
    pub dynamic: bool,
    pub parse_query: bool,
    pub parse_headers: bool,
    pub parse_cookies: bool,
    pub parse_json: bool,
    pub parse_form: bool,
    pub streaming: bool,
}

impl RouteOptions {
    fn into_flags(self, native_needed: bool) -> RouteFlags {
        RouteFlags {
            dynamic: self.dynamic,
            parse_query: self.parse_query,
            parse_headers: self.parse_headers,
            parse_cookies: self.parse_cookies,
            parse_json: self.parse_json,
            parse_form: self.parse_form,
            streaming: self.streaming,
            need_native_builder: native_needed,
        }
        .normalize()
    }
}

/// The application builder: accumulates routes and global
/// middleware, then lowers them into a `server::Server` via `compile()`.
pub struct App {
    routes: Vec<Route>,
    global_before: Vec<MiddlewareRef>,
    global_after: Vec<MiddlewareRef>,
    global_native_before: Vec<NativeMiddlewareRef>,
    global_native_after: Vec<NativeMiddlewareRef>,
    websocket_routes: HashMap<String, WebSocketHandler>,
    needs_async_pool: bool,
    security_overrides: SecurityHeaderOverrides,
    enable_security_headers: bool,
    config: server::ServerConfig,
}

impl App {
    pub fn new() -> Self {
        App {
            routes: Vec::new(),
            global_before: Vec::new(),
            global_after: Vec::new(),
            global_native_before: Vec::new(),
            global_native_after: Vec::new(),
            websocket_routes: HashMap::new(),
            needs_async_pool: false,
            security_overrides: SecurityHeaderOverrides::default(),
            enable_security_headers: true,
            config: server::ServerConfig::default(),
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.config.workers = n;
        self
    }

    pub fn tls(mut self, opts: tls::TlsOptions) -> Self {
        self.config.tls = Some(opts);
        self
    }

    pub fn http2(mut self, enabled: bool) -> Self {
        self.config.http2.enabled = enabled;
        self
    }

    pub fn security_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.security_overrides.0.insert(name.into(), value.into());
        self
    }

    /// Toggle the security-headers splice wholesale. On by default;
    /// per-name overrides via `security_header()` still apply when this is
    /// left on.
    pub fn enable_security_headers(mut self, enabled: bool) -> Self {
        self.enable_security_headers = enabled;
        self
    }

    pub fn enable_async_pool(mut self) -> Self {
        self.needs_async_pool = true;
        self
    }

    /// Directory `compile()` writes the content-addressed analysis dump to
    ///. Unset by default — no artifact is written.
    pub fn cache_dir(mut self, dir: impl Into<std::path::PathBuf>) -> Self {
        self.config.cache_dir = Some(dir.into());
        self
    }

    fn push_route(
        &mut self,
        method: Method,
        path: &str,
        opts: RouteOptions,
        handler: HandlerFn,
    ) -> Result<()> {
        let template = PathTemplate::parse(path)?;
        let index = self.routes.len();
        self.routes.push(Route {
            method,
            template,
            handler,
            flags: opts.into_flags(false),
            before: Vec::new(),
            after: Vec::new(),
            native_before: Vec::new(),
            native_after: Vec::new(),
            index,
        });
        Ok(())
    }

    /// Register a route with explicit options (the `get`/`post`/... helpers
    /// below cover the common case of no options).
    pub fn route(
        mut self,
        method: Method,
        path: &str,
        opts: RouteOptions,
        handler: impl Fn(&request::Request) -> response::HandlerOutput + Send + Sync + 'static,
    ) -> Result<Self> {
        self.push_route(method, path, opts, Arc::new(handler))?;
        Ok(self)
    }

    fn simple(
        self,
        method: Method,
        path: &str,
        handler: impl Fn(&request::Request) -> response::HandlerOutput + Send + Sync + 'static,
    ) -> Result<Self> {
        self.route(method, path, RouteOptions::default(), handler)
    }

    pub fn get(self, path: &str, handler: impl Fn(&request::Request) -> response::HandlerOutput + Send + Sync + 'static) -> Result<Self> {
        self.simple(Method::Get, path, handler)
    }

    pub fn post(self, path: &str, handler: impl Fn(&request::Request) -> response::HandlerOutput + Send + Sync + 'static) -> Result<Self> {
        self.simple(Method::Post, path, handler)
    }

    pub fn put(self, path: &str, handler: impl Fn(&request::Request) -> response::HandlerOutput + Send + Sync + 'static) -> Result<Self> {
        self.simple(Method::Put, path, handler)
    }

    pub fn delete(self, path: &str, handler: impl Fn(&request::Request) -> response::HandlerOutput + Send + Sync + 'static) -> Result<Self> {
        self.simple(Method::Delete, path, handler)
    }

    pub fn patch(self, path: &str, handler: impl Fn(&request::Request) -> response::HandlerOutput + Send + Sync + 'static) -> Result<Self> {
        self.simple(Method::Patch, path, handler)
    }

    pub fn head(self, path: &str, handler: impl Fn(&request::Request) -> response::HandlerOutput + Send + Sync + 'static) -> Result<Self> {
        self.simple(Method::Head, path, handler)
    }

    pub fn options(self, path: &str, handler: impl Fn(&request::Request) -> response::HandlerOutput + Send + Sync + 'static) -> Result<Self> {
        self.simple(Method::Options, path, handler)
    }

    /// Register a websocket endpoint.
    pub fn websocket(
        mut self,
        path: &str,
        handler: impl Fn(websocket::UpgradedSocket) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.websocket_routes.insert(path.to_string(), Arc::new(handler));
        self
    }

    /// Mount a directory of static files under `prefix`.
    pub fn static_dir(mut self, prefix: &str, dir: impl AsRef<Path>, opts: staticfiles::StaticDirOptions) -> Result<Self> {
        let mut routes = staticfiles::static_dir(prefix, dir.as_ref(), &opts)
            .map_err(HypersonicError::Io)?;
        // static_dir numbers its own routes from 0; re-index onto the end of
        // the app's running route table.
        let base = self.routes.len();
        for (i, route) in routes.iter_mut().enumerate() {
            route.index = base + i;
        }
        self.routes.extend(routes);
        Ok(self)
    }

    pub fn before(mut self, middleware: impl middleware::Middleware + 'static) -> Self {
        self.global_before.push(Arc::new(middleware));
        self
    }

    pub fn after(mut self, middleware: impl middleware::Middleware + 'static) -> Self {
        self.global_after.push(Arc::new(middleware));
        self
    }

    pub fn native_before(mut self, middleware: impl middleware::NativeMiddleware + 'static) -> Self {
        self.global_native_before.push(Arc::new(middleware));
        self
    }

    pub fn native_after(mut self, middleware: impl middleware::NativeMiddleware + 'static) -> Self {
        self.global_native_after.push(Arc::new(middleware));
        self
    }

    /// Analyze and generate the specialized dispatch structure.
    pub fn compile(self) -> Result<server::Server> {
        self.config.validate()?;

        let global = MiddlewareChain {
            before: self.global_before,
            after: self.global_after,
            native_before: self.global_native_before,
            native_after: self.global_native_after,
        };

        let is_tls = self.config.tls.is_some();
        let keep_alive = self.config.keep_alive.is_some();

        let compiled = codegen::CodeGenerator::generate(
            self.routes,
            global,
            self.websocket_routes,
            self.needs_async_pool,
            &self.security_overrides,
            self.enable_security_headers,
            is_tls,
            keep_alive,
        )?;

        // Filesystem/cache interface: write the deterministic
        // analysis dump when an operator has configured a `cache_dir`.
        if let Some(dir) = &self.config.cache_dir {
            if let Err(e) = codegen::cache::write_artifact(dir, &compiled.module_id, &compiled.routes, &compiled.analysis) {
                tracing::warn!(error = %e, dir = ?dir, "failed to write cache artifact");
            }
        }

        server::Server::new(self.config, compiled)
    }

    /// Convenience: compile then run on the caller's existing tokio runtime,
    /// blocking until shutdown. Does not fork additional workers — use
    /// `run_blocking` for the multi-process `workers` model.
    pub async fn run(self) -> Result<()> {
        self.compile()?.run().await
    }

    /// Compile, then fork into `workers` worker processes and block the
    /// calling thread until all of them exit. Must be called
    /// before any tokio runtime exists on the calling thread.
    pub fn run_blocking(self) -> Result<()> {
        self.compile()?.run_blocking()
    }
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use response::HandlerOutput;

    #[test]
    fn builds_and_compiles_a_minimal_app() {
        let app = App::new()
            .get("/health", |_req| HandlerOutput::bytes(b"ok".to_vec()))
            .unwrap()
            .get("/u/:id", |req| {
                let id = req.params.get("id").cloned().unwrap_or_default();
                HandlerOutput::bytes(id.into_bytes())
            })
            .unwrap();

        let server = app.compile().unwrap();
        assert_eq!(server.metrics().uptime().as_secs(), 0);
    }

    #[test]
    fn duplicate_static_routes_reject_at_compile_time() {
        let app = App::new()
            .get("/health", |_req| HandlerOutput::bytes(b"a".to_vec()))
            .unwrap()
            .get("/health", |_req| HandlerOutput::bytes(b"b".to_vec()))
            .unwrap();

        assert!(app.compile().is_err());
    }
}
