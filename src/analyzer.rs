//! The route analyzer: walks the declared routes and global middleware,
//! propagates feature flags route -> server, and assigns the deterministic
//! slot-index map for native-builder middleware extensions.

use crate::error::{CompileErrorKind, HypersonicError};
use crate::middleware::MiddlewareChain;
use crate::route::{Classification, Method, Route};
use std::collections::{HashMap, HashSet};

/// Server-level booleans derived from the whole route table.
#[derive(Debug, Default, Clone)]
pub struct Analysis {
    pub has_dynamic: bool,
    pub has_static: bool,
    pub needs_query: bool,
    pub needs_headers: bool,
    pub needs_cookies: bool,
    pub needs_json: bool,
    pub needs_form: bool,
    pub needs_streaming: bool,
    pub needs_websocket: bool,
    pub needs_async_pool: bool,
    pub has_global_before: bool,
    pub has_global_after: bool,
    pub has_route_middleware: bool,
    pub has_any_middleware: bool,
    pub single_method: Option<Method>,
    pub common_prefix: Option<String>,
    /// Stable native-builder-middleware slot name -> slot index, starting at 16.
    pub slot_map: HashMap<String, usize>,
}

impl Analysis {
    pub fn extension_slot_count(&self) -> usize {
        self.slot_map.len()
    }
}

pub struct RouteAnalyzer;

impl RouteAnalyzer {
    /// Analyze the route table and global middleware, returning the derived
    /// `Analysis` or a `CompileErrorKind` (duplicate routes, bad paths/methods
    /// are rejected earlier at registration time; this catches table-wide
    /// issues only duplicates across the whole set can reveal).
    pub fn analyze(
        routes: &[Route],
        global: &MiddlewareChain,
        needs_websocket: bool,
        needs_async_pool: bool,
    ) -> Result<Analysis, HypersonicError> {
        let mut analysis = Analysis {
            needs_websocket,
            needs_async_pool,
            ..Default::default()
        };

        // Duplicate exact (method, path) across static routes is a compile
        // failure.
        let mut seen_static: HashSet<(Method, String)> = HashSet::new();
        let mut methods_seen: HashSet<Method> = HashSet::new();

        for route in routes {
            methods_seen.insert(route.method);

            match route.classification() {
                Classification::Static => {
                    analysis.has_static = true;
                    let key = (route.method, route.template.raw.clone());
                    if !seen_static.insert(key) {
                        return Err(CompileErrorKind::DuplicateRoute {
                            method: route.method.as_str().to_string(),
                            path: route.template.raw.clone(),
                        }
                        .into());
                    }
                }
                Classification::Dynamic => {
                    analysis.has_dynamic = true;
                }
            }

            // Route -> server flag propagation: any route
            // needing a downstream header-derived feature pulls header
            // parsing in at the server level too.
            analysis.needs_query |= route.flags.parse_query;
            analysis.needs_cookies |= route.flags.parse_cookies;
            analysis.needs_json |= route.flags.parse_json;
            analysis.needs_form |= route.flags.parse_form;
            analysis.needs_streaming |= route.flags.streaming;
            analysis.needs_headers |= route.flags.parse_headers
                || route.flags.parse_cookies
                || route.flags.parse_json
                || route.flags.parse_form;

            if !route.before.is_empty() || !route.after.is_empty() {
                analysis.has_route_middleware = true;
            }
        }

        analysis.has_global_before = !global.before.is_empty();
        analysis.has_global_after = !global.after.is_empty();
        analysis.has_any_middleware =
            analysis.has_global_before || analysis.has_global_after || analysis.has_route_middleware;

        if methods_seen.len() == 1 {
            analysis.single_method = methods_seen.into_iter().next();
        }

        analysis.common_prefix = common_prefix(routes);

        // Assign deterministic slot indices (starting at 16) to every
        // unique native-builder middleware slot name, in declaration order:
        // global middleware first, then per-route, matching registration
        // order so the mapping is stable across identical route tables.
        let mut next_slot = 16usize;
        for nm in global.native_before.iter().chain(global.native_after.iter()) {
            for name in nm.slot_names() {
                analysis
                    .slot_map
                    .entry((*name).to_string())
                    .or_insert_with(|| {
                        let idx = next_slot;
                        next_slot += 1;
                        idx
                    });
            }
        }
        for route in routes {
            for nm in route.native_before.iter().chain(route.native_after.iter()) {
                for name in nm.slot_names() {
                    analysis
                        .slot_map
                        .entry((*name).to_string())
                        .or_insert_with(|| {
                            let idx = next_slot;
                            next_slot += 1;
                            idx
                        });
                }
            }
        }

        Ok(analysis)
    }
}

/// Longest shared literal prefix across every route's path, if longer than `/`.
fn common_prefix(routes: &[Route]) -> Option<String> {
    let mut iter = routes.iter();
    let first = iter.next()?.template.raw.clone();
    let mut prefix = first;
    for route in iter {
        let path = &route.template.raw;
        let common_len = prefix
            .bytes()
            .zip(path.bytes())
            .take_while(|(a, b)| a == b)
            .count();
        prefix.truncate(common_len);
        if prefix.is_empty() {
            return None;
        }
    }
    // Trim back to the last full segment boundary.
    if let Some(pos) = prefix.rfind('/') {
        prefix.truncate(if pos == 0 { 1 } else { pos });
    }
    if prefix.len() > 1 {
        Some(prefix)
    } else {
        None
    }
}
