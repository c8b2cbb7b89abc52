//! Error types for the triage console

use thiserror::Error;

/// Result type alias for triage console operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the triage console
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Backend could not be reached
    #[error("network failure: {0}")]
    Network(#[from] reqwest::Error),

    /// Backend answered with a non-success status
    #[error("backend error {status}: {body}")]
    Backend { status: u16, body: String },

    /// Backend no longer recognizes the session id
    #[error("session expired")]
    SessionExpired,

    /// Operation was cancelled by the user
    #[error("cancelled")]
    Cancelled,

    /// Platform lacks speech capture or playback
    #[error("capability unavailable: {0}")]
    CapabilityUnavailable(String),

    /// Persisted snapshot could not be read back
    #[error("corrupt persisted state: {0}")]
    CorruptState(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl Error {
    /// Whether this error means the backend could not serve the request
    ///
    /// Transport failures and non-success statuses are both recovered the
    /// same way: an error turn, or the next speech provider.
    #[must_use]
    pub const fn is_network_failure(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Backend { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_status_counts_as_network_failure() {
        let err = Error::Backend {
            status: 502,
            body: "bad gateway".to_string(),
        };
        assert!(err.is_network_failure());
        assert!(!Error::SessionExpired.is_network_failure());
        assert!(!Error::Cancelled.is_network_failure());
    }
}
