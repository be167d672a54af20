//! Control-plane bind-address validation and bearer token authentication.
//!
//! Tokens are compared in constant time so a timing side channel can't be
//! used to brute-force a valid token byte by byte.

use std::net::SocketAddr;

use baxter_core::config::ServerConfig;
use subtle::ConstantTimeEq;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";

/// Validate and resolve the configured bind address. An empty address
/// defaults to loopback on a fixed port. A non-loopback address is rejected
/// unless `allow_remote` is set, in which case at least one auth token must
/// also be configured.
pub fn resolve_bind_addr(cfg: &ServerConfig) -> Result<SocketAddr, String> {
    let raw = if cfg.bind_addr.is_empty() {
        DEFAULT_BIND_ADDR
    } else {
        cfg.bind_addr.as_str()
    };

    let addr: SocketAddr = match raw.rsplit_once(':') {
        Some(("localhost", port)) => {
            let port: u16 = port.parse().map_err(|_| format!("invalid bind address: {raw}"))?;
            SocketAddr::from(([127, 0, 0, 1], port))
        }
        _ => raw.parse().map_err(|_| format!("invalid bind address: {raw}"))?,
    };

    if !cfg.allow_remote && !addr.ip().is_loopback() {
        return Err(format!(
            "bind address {addr} is not loopback; set server.allow_remote to bind a non-loopback address"
        ));
    }
    if cfg.allow_remote && cfg.tokens.is_empty() {
        return Err("server.allow_remote requires at least one auth token".into());
    }
    Ok(addr)
}

/// True if `presented` matches any of `configured` in constant time.
/// An empty `configured` list means auth is disabled; everything passes.
pub fn token_is_valid(configured: &[String], presented: Option<&str>) -> bool {
    if configured.is_empty() {
        return true;
    }
    let Some(presented) = presented else {
        return false;
    };
    configured
        .iter()
        .any(|expected| bool::from(expected.as_bytes().ct_eq(presented.as_bytes())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_token_list_disables_auth() {
        assert!(token_is_valid(&[], None));
        assert!(token_is_valid(&[], Some("anything")));
    }

    #[test]
    fn rejects_missing_token_when_configured() {
        let tokens = vec!["secret".to_string()];
        assert!(!token_is_valid(&tokens, None));
    }

    #[test]
    fn accepts_any_configured_token() {
        let tokens = vec!["first".to_string(), "second".to_string()];
        assert!(token_is_valid(&tokens, Some("second")));
        assert!(!token_is_valid(&tokens, Some("third")));
    }

    #[test]
    fn empty_bind_addr_defaults_to_loopback() {
        let cfg = ServerConfig::default();
        let addr = resolve_bind_addr(&cfg).unwrap();
        assert!(addr.ip().is_loopback());
    }

    #[test]
    fn non_loopback_requires_allow_remote() {
        let cfg = ServerConfig {
            bind_addr: "0.0.0.0:9000".into(),
            ..Default::default()
        };
        assert!(resolve_bind_addr(&cfg).is_err());
    }

    #[test]
    fn allow_remote_requires_a_token() {
        let cfg = ServerConfig {
            bind_addr: "0.0.0.0:9000".into(),
            allow_remote: true,
            tokens: vec![],
        };
        assert!(resolve_bind_addr(&cfg).is_err());

        let cfg = ServerConfig {
            tokens: vec!["tok".into()],
            ..cfg
        };
        assert!(resolve_bind_addr(&cfg).is_ok());
    }
}
