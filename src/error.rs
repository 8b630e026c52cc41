use thiserror::Error;

/// Errors surfaced by the model client, transport and configuration layers.
#[derive(Error, Debug)]
pub enum GenerativeAiError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Model API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    EmptyResponse(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, GenerativeAiError>;

impl GenerativeAiError {
    /// Whether repeating the same request later could plausibly succeed.
    ///
    /// Network failures, timeouts, rate limiting and server-side errors are
    /// retryable. Bad requests, invalid credentials, malformed payloads and
    /// local failures are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            GenerativeAiError::Http(e) => {
                if e.is_timeout() || e.is_connect() {
                    return true;
                }
                match e.status() {
                    Some(status) => status.as_u16() == 429 || status.is_server_error(),
                    None => e.is_request(),
                }
            }
            GenerativeAiError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
