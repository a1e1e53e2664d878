use std::env;
use std::time::Duration;

use secrecy::SecretString;
use snapsight_contracts::models::DEFAULT_MODEL;

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_MAX_TOKENS: u32 = 500;

/// Connection settings for the OpenAI gateway.
///
/// The key is held as a [`SecretString`]; its `Debug` output is redacted and
/// nothing in this crate formats it.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub api_key: Option<SecretString>,
    pub api_base: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        let api_key = first_non_empty_env(&["OPENAI_API_KEY", "OPENAI_API_KEY_BACKUP"])
            .map(SecretString::new);
        let api_base = normalize_api_base(
            first_non_empty_env(&["OPENAI_API_BASE", "OPENAI_BASE_URL"]).as_deref(),
        );
        let model = first_non_empty_env(&["SNAPSIGHT_MODEL"])
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let timeout =
            parse_timeout_secs(first_non_empty_env(&["SNAPSIGHT_TIMEOUT_SECS"]).as_deref());
        Self {
            api_key,
            api_base,
            model,
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout,
        }
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }
}

pub fn first_non_empty_env(keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Ok(value) = env::var(key) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

/// Trims trailing slashes and appends `/v1` to a bare host.
pub fn normalize_api_base(raw: Option<&str>) -> String {
    let raw = raw
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_API_BASE);
    let mut base = raw.trim_end_matches('/').to_string();
    if let Ok(parsed) = reqwest::Url::parse(&base) {
        if parsed.path().trim().is_empty() || parsed.path() == "/" {
            base = format!("{base}/v1");
        }
    }
    base.trim_end_matches('/').to_string()
}

fn parse_timeout_secs(raw: Option<&str>) -> Duration {
    let secs = raw
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_TIMEOUT_SECS);
    Duration::from_secs(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_base_defaults_and_normalizes() {
        assert_eq!(normalize_api_base(None), DEFAULT_API_BASE);
        assert_eq!(normalize_api_base(Some("  ")), DEFAULT_API_BASE);
        assert_eq!(
            normalize_api_base(Some("http://localhost:8080/")),
            "http://localhost:8080/v1"
        );
        assert_eq!(
            normalize_api_base(Some("https://proxy.example.com/openai/v1/")),
            "https://proxy.example.com/openai/v1"
        );
    }

    #[test]
    fn timeout_falls_back_on_garbage() {
        assert_eq!(parse_timeout_secs(Some("30")), Duration::from_secs(30));
        assert_eq!(parse_timeout_secs(Some("0")), Duration::from_secs(120));
        assert_eq!(parse_timeout_secs(Some("soon")), Duration::from_secs(120));
        assert_eq!(parse_timeout_secs(None), Duration::from_secs(120));
    }

    #[test]
    fn debug_output_never_contains_the_key() {
        let config = GatewayConfig {
            api_key: Some(SecretString::new("sk-test-do-not-print".to_string())),
            ..GatewayConfig::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("sk-test-do-not-print"));
        assert!(config.has_api_key());
    }
}
