//! Error types for the guild mirror.

use thiserror::Error;

/// Errors that can occur while mirroring or updating guild state.
#[derive(Debug, Error)]
pub enum SyncError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A snapshot was missing a field required to identify its entity.
    #[error("malformed snapshot: {0}")]
    MalformedSnapshot(String),

    /// Rate limited.
    #[error("rate limited{}", match retry_after_secs {
        Some(secs) => format!(" (retry after {}s)", secs),
        None => String::new(),
    })]
    RateLimited {
        /// Seconds to wait before retrying (from Retry-After header, optional).
        retry_after_secs: Option<f64>,
    },

    /// Structured error returned by the REST API.
    #[error("API error ({status}): {message} (code {code})")]
    Api {
        status: u16,
        code: i64,
        message: String,
    },

    /// Invalid response from server.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Invalid client configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Failure reported by a non-HTTP request sink.
    #[error("transport error: {0}")]
    Transport(String),
}
