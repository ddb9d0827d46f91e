//! Content-addressed cache key and artifact dump.
//!
//! This target has no host C compiler to shell out to, so the "build
//! driver" step is reduced to: hash a canonical serialization of the
//! analyzed route table into a module id, then write a human-readable
//! dump of that analysis to `<cache_dir>/<module_id>` for operators to
//! diff between deploys. The hash is the Testable Property 3 cache key:
//! the same route table always yields the same id.

use crate::analyzer::Analysis;
use crate::route::Route;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Deterministic id derived from the route table's shape: method, path,
/// and the flags that affect dispatch/parsing, in declaration order.
/// Handler bodies are not part of the key — two compiles of the same
/// table produce the same id even if closures capture different state, so
/// the same route table always yields the same generated structure.
pub fn module_id(routes: &[Route]) -> String {
    let mut hasher = Sha256::new();
    for route in routes {
        hasher.update(route.method.as_str().as_bytes());
        hasher.update(b"\0");
        hasher.update(route.template.raw.as_bytes());
        hasher.update(b"\0");
        let flags = &route.flags;
        let bits = [
            flags.dynamic,
            flags.parse_query,
            flags.parse_headers,
            flags.parse_cookies,
            flags.parse_json,
            flags.parse_form,
            flags.streaming,
            flags.need_native_builder,
        ];
        for b in bits {
            hasher.update([b as u8]);
        }
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// Write the analysis dump to `<cache_dir>/<module_id>`. Infallible once
/// generation has succeeded: a failure to write is an I/O
/// condition, not a compile failure, so this returns `std::io::Result`
/// rather than `HypersonicError`.
pub fn write_artifact(cache_dir: &Path, module_id: &str, routes: &[Route], analysis: &Analysis) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(cache_dir)?;
    let path = cache_dir.join(module_id);
    let mut dump = format!("module_id: {module_id}\nroutes: {}\n\n", routes.len());
    for route in routes {
        dump.push_str(&format!(
            "  {:<7} {} [{:?}]\n",
            route.method.as_str(),
            route.template.raw,
            route.classification()
        ));
    }
    dump.push_str(&format!(
        "\nanalysis:\n  has_dynamic={}\n  has_static={}\n  needs_query={}\n  needs_headers={}\n  needs_cookies={}\n  needs_json={}\n  needs_form={}\n  needs_streaming={}\n  needs_websocket={}\n  needs_async_pool={}\n  single_method={:?}\n  common_prefix={:?}\n  extension_slots={}\n",
        analysis.has_dynamic,
        analysis.has_static,
        analysis.needs_query,
        analysis.needs_headers,
        analysis.needs_cookies,
        analysis.needs_json,
        analysis.needs_form,
        analysis.needs_streaming,
        analysis.needs_websocket,
        analysis.needs_async_pool,
        analysis.single_method,
        analysis.common_prefix,
        analysis.extension_slot_count(),
    ));
    std::fs::write(&path, dump)?;
    Ok(path)
}
