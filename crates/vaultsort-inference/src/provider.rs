//! Provider construction and shared HTTP error classification.
//!
//! Every backend maps failures the same way so the classifier can decide
//! what to retry:
//!
//! | Failure | Error |
//! |---------|-------|
//! | connect error, request timeout | `Transient` |
//! | HTTP 429, HTTP 5xx | `Transient` |
//! | HTTP 401/403 | `Provider` (authentication) |
//! | any other non-success status | `Provider` |
//! | undecodable success body | `Provider` |

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use tracing::info;

use vaultsort_core::{ClassificationProvider, Error, ProviderKind, ProviderSettings, Result};

/// Longest response body excerpt kept in error messages.
const ERROR_BODY_LIMIT: usize = 512;

/// Build the provider selected by `settings.kind`.
pub fn build_provider(settings: &ProviderSettings) -> Result<Arc<dyn ClassificationProvider>> {
    info!(
        subsystem = "inference",
        provider = %settings.kind,
        model = %settings.resolved_model(),
        base_url = %settings.resolved_base_url(),
        "Building classification provider"
    );
    match settings.kind {
        #[cfg(feature = "ollama")]
        ProviderKind::Ollama => Ok(Arc::new(crate::ollama::OllamaProvider::from_settings(
            settings,
        )?)),
        #[cfg(feature = "anthropic")]
        ProviderKind::Anthropic => Ok(Arc::new(
            crate::anthropic::AnthropicProvider::from_settings(settings)?,
        )),
        #[allow(unreachable_patterns)]
        kind => Err(Error::Config(format!(
            "Provider '{}' is not enabled in this build",
            kind
        ))),
    }
}

/// Shared HTTP client. Per-request timeouts are set by each call.
pub fn http_client() -> Result<Client> {
    Client::builder()
        .build()
        .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))
}

/// Map a failed `send()` into the retry taxonomy.
pub fn map_send_error(provider: &str, timeout: Duration, e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Transient(format!("{} request timed out after {:?}", provider, timeout))
    } else if e.is_connect() {
        Error::Transient(format!("{} connection failed: {}", provider, e))
    } else if e.is_request() {
        Error::Transient(format!("{} request failed: {}", provider, e))
    } else {
        Error::Request(format!("{} request failed: {}", provider, e))
    }
}

/// Map a non-success HTTP status into the retry taxonomy.
pub fn classify_status(provider: &str, status: StatusCode, body: &str) -> Error {
    let body = truncate(body.trim(), ERROR_BODY_LIMIT);
    if status == StatusCode::TOO_MANY_REQUESTS {
        Error::Transient(format!("{} rate limited ({}): {}", provider, status, body))
    } else if status.is_server_error() {
        Error::Transient(format!("{} returned {}: {}", provider, status, body))
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        Error::Provider(format!(
            "{} authentication failed ({}): {}",
            provider, status, body
        ))
    } else {
        Error::Provider(format!("{} returned {}: {}", provider, status, body))
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status_rate_limit_is_transient() {
        let err = classify_status("ollama", StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert!(err.is_transient());
        assert!(err.to_string().contains("rate limited"));
    }

    #[test]
    fn test_classify_status_server_error_is_transient() {
        for code in [500u16, 502, 503, 504] {
            let status = StatusCode::from_u16(code).unwrap();
            assert!(classify_status("anthropic", status, "").is_transient());
        }
    }

    #[test]
    fn test_classify_status_auth_is_not_transient() {
        let err = classify_status("anthropic", StatusCode::UNAUTHORIZED, "bad key");
        assert!(matches!(err, Error::Provider(_)));
        assert!(err.to_string().contains("authentication"));
    }

    #[test]
    fn test_classify_status_bad_request_is_provider_error() {
        let err = classify_status("ollama", StatusCode::NOT_FOUND, "model not found");
        assert!(matches!(err, Error::Provider(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_error_body_is_truncated() {
        let body = "é".repeat(ERROR_BODY_LIMIT);
        let err = classify_status("ollama", StatusCode::BAD_REQUEST, &body);
        assert!(err.to_string().len() < body.len() + 64);
    }

    #[cfg(feature = "anthropic")]
    #[test]
    fn test_build_provider_selects_anthropic() {
        let settings = ProviderSettings {
            kind: ProviderKind::Anthropic,
            api_key: Some("sk-ant-test".to_string()),
            ..Default::default()
        };
        let provider = build_provider(&settings).unwrap();
        assert_eq!(provider.name(), "anthropic");
    }

    #[cfg(feature = "ollama")]
    #[test]
    fn test_build_provider_defaults_to_ollama() {
        let provider = build_provider(&ProviderSettings::default()).unwrap();
        assert_eq!(provider.name(), "ollama");
        assert_eq!(provider.model_name(), vaultsort_core::defaults::OLLAMA_MODEL);
    }
}
