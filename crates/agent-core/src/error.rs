//! Agent error types.

/// Errors raised while talking to a language model.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// API key not configured.
    #[error("API key not configured")]
    ApiKeyMissing,

    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Failed to parse API response.
    #[error("failed to parse response: {0}")]
    Parse(String),

    /// Stream ended before the model finished its turn.
    #[error("stream ended unexpectedly")]
    StreamEnded,

    /// Provider misconfiguration.
    #[error("config error: {0}")]
    Config(String),
}

/// Result type for agent operations.
pub type Result<T> = std::result::Result<T, AgentError>;
