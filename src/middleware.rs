//! Middleware: the callable chain invoked per request via indirection, and
//! native-builder middleware that the generator inlines at compile time with
//! no per-request indirect dispatch.

use crate::request::Request;
use crate::response::HandlerOutput;
use std::sync::Arc;

/// Outcome of a single before/after middleware invocation.
pub enum MiddlewareAction {
    Continue,
    /// Short-circuits the remaining chain and the main handler; its value
    /// becomes the response.
    Stop(HandlerOutput),
}

/// Callable middleware: invoked per request via `Arc<dyn Middleware>`
/// indirection (the opposite of `NativeMiddleware`).
pub trait Middleware: Send + Sync {
    fn before(&self, _req: &mut Request) -> MiddlewareAction {
        MiddlewareAction::Continue
    }

    /// May rewrite the response by returning `Stop` with a replacement.
    fn after(&self, _req: &Request, _response: &HandlerOutput) -> Option<HandlerOutput> {
        None
    }
}

pub type MiddlewareRef = Arc<dyn Middleware>;

/// Native-builder middleware: participates in generation
/// by declaring the extension slots it needs and contributing a hook that
/// the generator bakes directly into the compiled trampoline's field list,
/// rather than into the indexed callable chain — there is no per-request
/// lookup by id, only a direct call through the struct field.
pub trait NativeMiddleware: Send + Sync {
    /// Slot names this middleware needs; the analyzer assigns each a stable
    /// index starting at 16 and the same name always maps to the same index
    /// for the lifetime of one compiled server.
    fn slot_names(&self) -> &[&'static str] {
        &[]
    }

    fn build_before(&self, _req: &mut Request) {}

    fn build_after(&self, _req: &Request, _response: &mut HandlerOutput) {}
}

pub type NativeMiddlewareRef = Arc<dyn NativeMiddleware>;

/// Global (server-wide) middleware lists, run outside any specific route:
/// global-before, route-before, handler, route-after, global-after.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    pub before: Vec<MiddlewareRef>,
    pub after: Vec<MiddlewareRef>,
    pub native_before: Vec<NativeMiddlewareRef>,
    pub native_after: Vec<NativeMiddlewareRef>,
}

impl MiddlewareChain {
    pub fn is_empty(&self) -> bool {
        self.before.is_empty() && self.after.is_empty()
    }

    pub fn has_native(&self) -> bool {
        !self.native_before.is_empty() || !self.native_after.is_empty()
    }
}

/// Run the before-side of the global+route middleware sandwich: native
/// global, native route, then callable global, callable route; first
/// `Stop` wins and short-circuits the rest, including the handler. Shared
/// by the trampoline (per dynamic request) and the code generator (once,
/// at static-route precompute time), so both paths apply middleware
/// identically.
pub fn run_before_chain(
    global: &MiddlewareChain,
    route_native_before: &[NativeMiddlewareRef],
    route_before: &[MiddlewareRef],
    request: &mut Request,
) -> Option<HandlerOutput> {
    for nm in global.native_before.iter().chain(route_native_before) {
        nm.build_before(request);
    }
    for mw in global.before.iter().chain(route_before) {
        if let MiddlewareAction::Stop(output) = mw.before(request) {
            return Some(output);
        }
    }
    None
}

/// Run the after-side of the sandwich: callable route then global, native
/// route then global — mirrors `run_before_chain`'s nesting so global always
/// wraps route on both ends.
pub fn run_after_chain(
    global: &MiddlewareChain,
    route_after: &[MiddlewareRef],
    route_native_after: &[NativeMiddlewareRef],
    request: &Request,
    output: &mut HandlerOutput,
) {
    for mw in route_after.iter().chain(&global.after) {
        if let Some(replacement) = mw.after(request, output) {
            *output = replacement;
        }
    }
    for nm in route_native_after.iter().chain(&global.native_after) {
        nm.build_after(request, output);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Middleware for Recorder {
        fn before(&self, _req: &mut Request) -> MiddlewareAction {
            self.log.lock().unwrap().push(self.name);
            MiddlewareAction::Continue
        }

        fn after(&self, _req: &Request, _response: &HandlerOutput) -> Option<HandlerOutput> {
            self.log.lock().unwrap().push(self.name);
            None
        }
    }

    #[test]
    fn before_chain_runs_global_then_route() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let global = MiddlewareChain {
            before: vec![Arc::new(Recorder { name: "global", log: log.clone() })],
            after: Vec::new(),
            native_before: Vec::new(),
            native_after: Vec::new(),
        };
        let route_before: Vec<MiddlewareRef> = vec![Arc::new(Recorder { name: "route", log: log.clone() })];
        let mut request = Request::new();
        let result = run_before_chain(&global, &[], &route_before, &mut request);
        assert!(result.is_none());
        assert_eq!(*log.lock().unwrap(), vec!["global", "route"]);
    }

    #[test]
    fn after_chain_runs_route_then_global() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let global = MiddlewareChain {
            before: Vec::new(),
            after: vec![Arc::new(Recorder { name: "global", log: log.clone() })],
            native_before: Vec::new(),
            native_after: Vec::new(),
        };
        let route_after: Vec<MiddlewareRef> = vec![Arc::new(Recorder { name: "route", log: log.clone() })];
        let request = Request::new();
        let mut output = HandlerOutput::bytes(b"x".to_vec());
        run_after_chain(&global, &route_after, &[], &request, &mut output);
        assert_eq!(*log.lock().unwrap(), vec!["route", "global"]);
    }

    struct AlwaysStop;
    impl Middleware for AlwaysStop {
        fn before(&self, _req: &mut Request) -> MiddlewareAction {
            MiddlewareAction::Stop(HandlerOutput::bytes(b"stopped".to_vec()))
        }
    }

    #[test]
    fn global_before_short_circuit_skips_route_before() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let global = MiddlewareChain {
            before: vec![Arc::new(AlwaysStop)],
            after: Vec::new(),
            native_before: Vec::new(),
            native_after: Vec::new(),
        };
        let route_before: Vec<MiddlewareRef> = vec![Arc::new(Recorder { name: "route", log: log.clone() })];
        let mut request = Request::new();
        let result = run_before_chain(&global, &[], &route_before, &mut request);
        assert!(result.is_some());
        assert!(log.lock().unwrap().is_empty(), "route-before must not run after a global short-circuit");
    }
}
