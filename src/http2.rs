//! HTTP/2 configuration: a thin wrapper over
//! `hyper_util`'s auto connection builder rather than a second protocol
//! implementation alongside hyper's own http1 path.

use crate::error::{CompileErrorKind, HypersonicError};

#[derive(Debug, Clone, Copy, Default)]
pub struct Http2Options {
    pub enabled: bool,
}

impl Http2Options {
    /// HTTP/2 requires TLS in this implementation (no h2c); requesting it
    /// without TLS is a `CompileError` raised eagerly, before any socket is
    /// opened.
    pub fn validate(&self, tls_enabled: bool) -> Result<(), HypersonicError> {
        if self.enabled && !tls_enabled {
            return Err(CompileErrorKind::Http2WithoutTls.into());
        }
        Ok(())
    }
}
