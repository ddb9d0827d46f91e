//! Route table data model: methods, path templates, per-route feature flags,
//! and static/dynamic classification.

use crate::error::{CompileErrorKind, HypersonicError};
use crate::middleware::{MiddlewareRef, NativeMiddlewareRef};
use crate::response::HandlerOutput;
use std::sync::Arc;

/// HTTP methods recognized by the route table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
        }
    }

    pub fn parse(s: &str) -> Result<Self, HypersonicError> {
        match s {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            "PATCH" => Ok(Method::Patch),
            "HEAD" => Ok(Method::Head),
            "OPTIONS" => Ok(Method::Options),
            other => Err(CompileErrorKind::InvalidMethod(other.to_string()).into()),
        }
    }

    /// Whether requests of this method are expected to carry a body.
    pub fn is_body_bearing(self) -> bool {
        matches!(self, Method::Post | Method::Put | Method::Patch)
    }
}

/// One template segment: a literal, a named parameter (`:name`), or the
/// trailing greedy wildcard (`*`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Param(String),
    Wildcard,
}

/// A parsed `/a/:x/b/*` style path template.
#[derive(Debug, Clone)]
pub struct PathTemplate {
    pub raw: String,
    pub segments: Vec<Segment>,
}

impl PathTemplate {
    pub fn parse(path: &str) -> Result<Self, HypersonicError> {
        if !path.starts_with('/') {
            return Err(CompileErrorKind::InvalidPath(path.to_string()).into());
        }
        let mut segments = Vec::new();
        for (i, raw_seg) in path.trim_start_matches('/').split('/').enumerate() {
            if raw_seg.is_empty() && i == 0 && path == "/" {
                break;
            }
            if raw_seg == "*" {
                segments.push(Segment::Wildcard);
            } else if let Some(name) = raw_seg.strip_prefix(':') {
                if name.is_empty() {
                    return Err(CompileErrorKind::InvalidPath(path.to_string()).into());
                }
                segments.push(Segment::Param(name.to_string()));
            } else {
                segments.push(Segment::Literal(raw_seg.to_string()));
            }
        }
        Ok(PathTemplate {
            raw: path.to_string(),
            segments,
        })
    }

    /// True when every segment is a plain literal (no params, no wildcard).
    pub fn is_static_shape(&self) -> bool {
        self.segments
            .iter()
            .all(|s| matches!(s, Segment::Literal(_)))
    }

    /// `(name, segment_index)` pairs for every named parameter, in order —
    /// the params table the trampoline reads segments against.
    pub fn param_positions(&self) -> Vec<(String, usize)> {
        self.segments
            .iter()
            .enumerate()
            .filter_map(|(i, s)| match s {
                Segment::Param(name) => Some((name.clone(), i)),
                _ => None,
            })
            .collect()
    }

    /// The literal prefix before the first `:` or `*`, used by the dispatcher's
    /// fast prefix match.
    pub fn literal_prefix(&self) -> String {
        let mut out = String::from("/");
        for seg in &self.segments {
            match seg {
                Segment::Literal(lit) => {
                    out.push_str(lit);
                    out.push('/');
                }
                _ => break,
            }
        }
        if out.len() > 1 {
            out.pop();
        }
        out
    }

    pub fn has_params(&self) -> bool {
        self.segments
            .iter()
            .any(|s| !matches!(s, Segment::Literal(_)))
    }
}

/// Per-route feature flags.
#[derive(Debug, Clone, Default)]
pub struct RouteFlags {
    /// Explicit `dynamic` option; opts a
    /// body-bearing route into dynamic classification even with no params
    /// and no other parse_* flag set.
    pub dynamic: bool,
    pub parse_query: bool,
    pub parse_headers: bool,
    pub parse_cookies: bool,
    pub parse_json: bool,
    pub parse_form: bool,
    pub streaming: bool,
    pub need_native_builder: bool,
}

impl RouteFlags {
    /// Propagate implied flags: cookies/json/form all imply header parsing,
    /// and any of them implies query parsing is still independent (query is
    /// parsed from the URI, not headers).
    pub fn normalize(mut self) -> Self {
        if self.parse_cookies || self.parse_json || self.parse_form {
            self.parse_headers = true;
        }
        self
    }
}

/// Whether a route's response is known before the first request (`Static`)
/// or must be computed per request (`Dynamic`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Static,
    Dynamic,
}

pub type HandlerFn = Arc<dyn Fn(&crate::request::Request) -> HandlerOutput + Send + Sync>;

/// One registered route. `handler_index` is assigned by the analyzer and is
/// immutable once `compile()` has run.
#[derive(Clone)]
pub struct Route {
    pub method: Method,
    pub template: PathTemplate,
    pub handler: HandlerFn,
    pub flags: RouteFlags,
    pub before: Vec<MiddlewareRef>,
    pub after: Vec<MiddlewareRef>,
    pub native_before: Vec<NativeMiddlewareRef>,
    pub native_after: Vec<NativeMiddlewareRef>,
    /// Assigned by the analyzer; index into the compiled dispatch table.
    pub index: usize,
}

impl Route {
    pub fn classification(&self) -> Classification {
        let explicit_flag = self.flags.streaming
            || self.flags.need_native_builder
            || self.flags.parse_query
            || self.flags.parse_headers
            || self.flags.parse_cookies
            || self.flags.parse_json
            || self.flags.parse_form;
        let body_opt_in = self.method.is_body_bearing() && self.flags.dynamic;
        let dynamic = self.template.has_params() || explicit_flag || body_opt_in;
        if dynamic {
            Classification::Dynamic
        } else {
            Classification::Static
        }
    }

    pub fn param_positions(&self) -> Vec<(String, usize)> {
        self.template.param_positions()
    }
}
