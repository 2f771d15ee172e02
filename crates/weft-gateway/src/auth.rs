use weft_core::config::GatewayConfig;

/// Bearer-token check. With no token configured every request passes.
pub fn validate_bearer(config: &GatewayConfig, bearer: Option<&str>) -> bool {
    match config.token.as_deref() {
        None => true,
        Some(expected) => bearer == Some(expected),
    }
}

/// Token from an `Authorization: Bearer <token>` header value.
pub fn extract_bearer(header: &str) -> Option<&str> {
    header.strip_prefix("Bearer ").map(str::trim).filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway(token: Option<&str>) -> GatewayConfig {
        GatewayConfig {
            bind: "127.0.0.1:18080".to_string(),
            token: token.map(|s| s.to_string()),
        }
    }

    #[test]
    fn test_no_token_always_passes() {
        let config = gateway(None);
        assert!(validate_bearer(&config, None));
        assert!(validate_bearer(&config, Some("anything")));
    }

    #[test]
    fn test_token_auth() {
        let config = gateway(Some("secret"));
        assert!(!validate_bearer(&config, None));
        assert!(!validate_bearer(&config, Some("wrong")));
        assert!(validate_bearer(&config, Some("secret")));
    }

    #[test]
    fn test_extract_bearer() {
        assert_eq!(extract_bearer("Bearer abc"), Some("abc"));
        assert_eq!(extract_bearer("Bearer "), None);
        assert_eq!(extract_bearer("Basic abc"), None);
    }
}
