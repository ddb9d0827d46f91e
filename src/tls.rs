//! TLS as an opaque collaborator: certificate/key loading
//! and `rustls::ServerConfig` construction only. Handshake internals are
//! rustls's, not reimplemented here.

use crate::error::{CompileErrorKind, HypersonicError};
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct TlsOptions {
    pub cert_file: std::path::PathBuf,
    pub key_file: std::path::PathBuf,
}

/// Build the `rustls::ServerConfig`. `http2` controls the advertised ALPN
/// protocol list: HTTP/2 is only negotiated over TLS in this implementation
/// (no h2c), so `h2` is offered before `http/1.1` only when the caller has
/// enabled it.
pub fn load_server_config(opts: &TlsOptions, http2: bool) -> Result<Arc<rustls::ServerConfig>, HypersonicError> {
    let certs = load_certs(&opts.cert_file)?;
    let key = load_key(&opts.key_file)?;

    let mut config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| HypersonicError::Config(format!("tls config: {e}")))?;

    config.alpn_protocols = if http2 {
        vec![b"h2".to_vec(), b"http/1.1".to_vec()]
    } else {
        vec![b"http/1.1".to_vec()]
    };

    Ok(Arc::new(config))
}

fn load_certs(path: &Path) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>, HypersonicError> {
    let file = std::fs::File::open(path).map_err(|e| HypersonicError::Config(format!("cert file {path:?}: {e}")))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| HypersonicError::Config(format!("cert parse: {e}")))
}

fn load_key(path: &Path) -> Result<rustls::pki_types::PrivateKeyDer<'static>, HypersonicError> {
    let file = std::fs::File::open(path).map_err(|e| HypersonicError::Config(format!("key file {path:?}: {e}")))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| HypersonicError::Config(format!("key parse: {e}")))?
        .ok_or_else(|| CompileErrorKind::TlsUnavailable.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_cert_file_is_a_config_error() {
        let opts = TlsOptions {
            cert_file: "/nonexistent/cert.pem".into(),
            key_file: "/nonexistent/key.pem".into(),
        };
        let result = load_server_config(&opts, false);
        assert!(matches!(result, Err(HypersonicError::Config(_))));
    }
}
