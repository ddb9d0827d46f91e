//! The request slot object: a fixed-index container passed to
//! handlers and middleware. Slots 0-11 are reserved by the core; slots 16+
//! are allocated to native-builder middleware by the analyzer.

use serde_json::Value;
use std::collections::HashMap;

/// Slot 3 / slot 9: simple string-keyed maps (params, query, form).
pub type StringMap = HashMap<String, String>;

/// A single `Set-Cookie`-shaped cookie read from the request (slot 7 stores
/// these as a flat name->value map; the wire-level multi-value nature only
/// matters for the response side).
pub type CookieMap = HashMap<String, String>;

/// Fixed-slot request object. Slots 0-11 are reserved by the core; slots
/// 16+ are reserved per-server for native-builder middleware extensions and
/// addressed via `Request::ext` / `Request::ext_mut`.
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub body: Vec<u8>,
    pub params: StringMap,
    pub query: StringMap,
    pub query_string: String,
    pub headers: StringMap,
    pub cookies: CookieMap,
    pub json: Option<Value>,
    pub form: StringMap,
    pub segments: Vec<String>,
    pub terminal_segment: String,
    /// Slots 16.. — one per unique native-builder middleware slot name,
    /// indexed by `slot_index - 16` (the analyzer guarantees contiguity).
    extensions: Vec<Option<Value>>,
}

impl Request {
    pub fn new() -> Self {
        Request::default()
    }

    /// Ensure at least `count` extension slots exist (called once per
    /// compiled server at trampoline setup from the analyzer's slot count).
    pub fn reserve_extensions(&mut self, count: usize) {
        if self.extensions.len() < count {
            self.extensions.resize(count, None);
        }
    }

    pub fn ext(&self, slot_index: usize) -> Option<&Value> {
        self.extensions.get(slot_index - 16).and_then(|v| v.as_ref())
    }

    pub fn ext_mut(&mut self, slot_index: usize) -> &mut Option<Value> {
        let i = slot_index - 16;
        if self.extensions.len() <= i {
            self.extensions.resize(i + 1, None);
        }
        &mut self.extensions[i]
    }

    /// A shallow copy without the (possibly large) body, used when building
    /// the request view handed to after-middleware.
    pub fn clone_without_body(&self) -> Self {
        Request {
            body: Vec::new(),
            ..self.clone()
        }
    }
}
