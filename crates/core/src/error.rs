//! Error types for the OpenAgent domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all OpenAgent operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Model provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Command execution errors ---
    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Filesystem ---
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Request aborted: {0}")]
    Aborted(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl ProviderError {
    /// Whether this error looks like the request was aborted or timed out
    /// rather than failing on its own.
    ///
    /// Matches the dedicated variants first, then falls back to the message
    /// text so transport errors that only say "operation timed out" or
    /// "request cancelled" are classified the same way.
    pub fn is_abort_like(&self) -> bool {
        match self {
            ProviderError::Timeout(_) | ProviderError::Aborted(_) => true,
            other => {
                let text = other.to_string().to_lowercase();
                text.contains("abort")
                    || text.contains("canceled")
                    || text.contains("cancelled")
                    || text.contains("timeout")
                    || text.contains("timed out")
            }
        }
    }

    /// Whether the transport layer may retry this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited { .. } | ProviderError::Network(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Command failed to start: {run}: {reason}")]
    SpawnFailed { run: String, reason: String },

    #[error("Command execution failed: {run}: {reason}")]
    ExecutionFailed { run: String, reason: String },

    #[error("Unsupported shell: {0}")]
    UnsupportedShell(String),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Virtual agent failed: {0}")]
    VirtualAgent(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn command_error_displays_correctly() {
        let err = Error::Command(CommandError::SpawnFailed {
            run: "ls -la".into(),
            reason: "no such file".into(),
        });
        assert!(err.to_string().contains("ls -la"));
        assert!(err.to_string().contains("no such file"));
    }

    #[test]
    fn abort_like_detection_uses_variant_and_message() {
        assert!(ProviderError::Timeout("deadline".into()).is_abort_like());
        assert!(ProviderError::Aborted("signal".into()).is_abort_like());
        assert!(ProviderError::Network("operation was cancelled".into()).is_abort_like());
        assert!(ProviderError::Network("connect timeout".into()).is_abort_like());
        assert!(!ProviderError::AuthenticationFailed("bad key".into()).is_abort_like());
        assert!(
            !ProviderError::ApiError {
                status_code: 500,
                message: "boom".into()
            }
            .is_abort_like()
        );
    }

    #[test]
    fn retryable_errors() {
        assert!(ProviderError::RateLimited { retry_after_secs: 1 }.is_retryable());
        assert!(ProviderError::Network("reset".into()).is_retryable());
        assert!(!ProviderError::ModelNotFound("x".into()).is_retryable());
    }
}
