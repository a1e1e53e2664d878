//! Failures raised by an analysis gateway.

/// Categorized gateway failure. Every variant ends one user action; none is retried.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// No API key in the environment.
    #[error("no API key configured (set OPENAI_API_KEY)")]
    MissingCredential,

    /// An image could not be read for inlining.
    #[error("failed to encode {name}: {source}")]
    Encoding {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// Connection, TLS, or timeout failure before a response arrived.
    #[error("network error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The provider refused the credential (401/403).
    #[error("authentication failed ({status}): {message}")]
    Authentication { status: u16, message: String },

    /// Any other non-success status.
    #[error("API error: {status} - {message}")]
    Provider { status: u16, message: String },

    /// A success status whose body is not a chat completion.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// No choices, or a first choice without text.
    #[error("model returned an empty response")]
    EmptyResponse,
}

impl GatewayError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingCredential => "missing_credential",
            Self::Encoding { .. } => "encoding",
            Self::Transport(_) => "transport",
            Self::Authentication { .. } => "authentication",
            Self::Provider { .. } => "provider",
            Self::InvalidResponse(_) => "invalid_response",
            Self::EmptyResponse => "empty_response",
        }
    }

    /// Maps a non-success HTTP status and body to a categorized error.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = provider_message(body);
        match status {
            401 | 403 => Self::Authentication { status, message },
            _ => Self::Provider { status, message },
        }
    }
}

/// Reads `{"error": {"message": ...}}`, falling back to the truncated raw body.
fn provider_message(body: &str) -> String {
    let parsed = serde_json::from_str::<serde_json::Value>(body).ok();
    let message = parsed
        .as_ref()
        .and_then(|value| value.get("error"))
        .and_then(|error| {
            error
                .get("message")
                .and_then(serde_json::Value::as_str)
                .or_else(|| error.as_str())
        })
        .map(str::trim)
        .filter(|value| !value.is_empty());
    match message {
        Some(message) => message.to_string(),
        None => {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                "empty error body".to_string()
            } else {
                truncate_text(trimmed, 512)
            }
        }
    }
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
