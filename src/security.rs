//! Security headers splice: the configured set is joined into
//! a single byte-slice constant once, at generation time, and spliced into
//! every emitted response shape.

use std::collections::HashMap;

/// Per-name overrides for the default security header values
///.
#[derive(Debug, Clone, Default)]
pub struct SecurityHeaderOverrides(pub HashMap<String, String>);

/// Build the security-headers constant. `is_tls` controls whether
/// `Strict-Transport-Security` is included.
pub fn build_security_headers(overrides: &SecurityHeaderOverrides, is_tls: bool) -> Vec<u8> {
    let mut defaults: Vec<(&'static str, String)> = vec![
        ("X-Frame-Options", "DENY".to_string()),
        ("X-Content-Type-Options", "nosniff".to_string()),
        ("X-XSS-Protection", "1; mode=block".to_string()),
        ("Referrer-Policy", "no-referrer".to_string()),
    ];

    if is_tls {
        defaults.push((
            "Strict-Transport-Security",
            "max-age=63072000; includeSubDomains".to_string(),
        ));
    }

    if let Some(csp) = overrides.0.get("Content-Security-Policy") {
        defaults.push(("Content-Security-Policy", csp.clone()));
    }
    if let Some(pp) = overrides.0.get("Permissions-Policy") {
        defaults.push(("Permissions-Policy", pp.clone()));
    }

    let mut out = Vec::new();
    for (name, default_value) in defaults {
        let value = overrides.0.get(name).cloned().unwrap_or(default_value);
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    // Trailing CRLF is added by the response builder between headers and body;
    // drop the last pair's CRLF duplication isn't needed since render() splits
    // on "\r\n" and tolerates a dangling empty segment.
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn includes_hsts_only_for_tls() {
        let overrides = SecurityHeaderOverrides::default();
        let plain = build_security_headers(&overrides, false);
        let tls = build_security_headers(&overrides, true);
        assert!(!String::from_utf8_lossy(&plain).contains("Strict-Transport-Security"));
        assert!(String::from_utf8_lossy(&tls).contains("Strict-Transport-Security"));
    }

    #[test]
    fn override_replaces_default_value() {
        let mut overrides = SecurityHeaderOverrides::default();
        overrides
            .0
            .insert("X-Frame-Options".to_string(), "SAMEORIGIN".to_string());
        let headers = build_security_headers(&overrides, false);
        assert!(String::from_utf8_lossy(&headers).contains("X-Frame-Options: SAMEORIGIN"));
    }
}
