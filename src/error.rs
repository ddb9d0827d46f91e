//! Error kinds for route registration, compilation, and per-request handling.
//!
//! Config and compile errors are raised synchronously and abort startup;
//! the rest are localized to a single connection and never crash the worker.

use std::fmt;

/// Top-level error type returned by the public API surface.
#[derive(Debug, thiserror::Error)]
pub enum HypersonicError {
    /// Invalid option combination, raised from `ServerConfig` construction
    /// or `App::compile()` before any socket is opened.
    #[error("config error: {0}")]
    Config(String),

    /// Route table inconsistency or generator failure, raised from `compile()`.
    #[error("compile error: {0}")]
    Compile(String),

    /// Transient accept() failure; the loop logs and continues.
    #[error("accept error: {0}")]
    Accept(String),

    /// Malformed request; the connection is answered with 400 and closed.
    #[error("parse error: {0}")]
    Parse(String),

    /// A handler (or middleware) raised during dynamic dispatch.
    #[error("handler error: {0}")]
    Handler(String),

    /// send/recv fatal error (EPIPE, ECONNRESET, ...); connection is torn down.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A collaborator conversion (JSON decode, etc.) failed; callers convert
    /// this to `null` in the slot rather than surfacing it.
    #[error("upstream error: {0}")]
    Upstream(String),
}

pub type Result<T> = std::result::Result<T, HypersonicError>;

/// Route-table compilation failures, distinguished so `App::compile()` can
/// report which invariant was violated.
#[derive(Debug)]
pub enum CompileErrorKind {
    DuplicateRoute { method: String, path: String },
    InvalidPath(String),
    InvalidMethod(String),
    Http2WithoutTls,
    TlsUnavailable,
}

impl fmt::Display for CompileErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileErrorKind::DuplicateRoute { method, path } => {
                write!(f, "duplicate route {method} {path}")
            }
            CompileErrorKind::InvalidPath(p) => write!(f, "invalid path: {p}"),
            CompileErrorKind::InvalidMethod(m) => write!(f, "invalid method: {m}"),
            CompileErrorKind::Http2WithoutTls => write!(f, "http2 requires tls"),
            CompileErrorKind::TlsUnavailable => write!(f, "tls requested but unavailable"),
        }
    }
}

impl From<CompileErrorKind> for HypersonicError {
    fn from(kind: CompileErrorKind) -> Self {
        // HTTP/2 without TLS and an unavailable TLS cert/key are invalid
        // option combinations, surfaced as Config even though they're
        // represented alongside the analyzer's own CompileErrorKind
        // variants here.
        match kind {
            CompileErrorKind::Http2WithoutTls | CompileErrorKind::TlsUnavailable => {
                HypersonicError::Config(kind.to_string())
            }
            _ => HypersonicError::Compile(kind.to_string()),
        }
    }
}
