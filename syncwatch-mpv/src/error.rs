//! Error types for syncwatch-mpv

/// Player control errors
#[derive(Debug, thiserror::Error)]
pub enum MpvError {
    /// The control socket is not accepting connections (yet)
    #[error("Could not connect to player at {}: {source}", path.display())]
    Connect {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("Serialization error: {source}")]
    Serialization { source: serde_json::Error },

    #[error("Player sent a malformed response {body:?}: {source}")]
    MalformedResponse {
        body: String,
        source: serde_json::Error,
    },

    #[error("Player rejected the command: {error}")]
    Command { error: String },

    #[error("Player closed the control connection without answering")]
    Closed,

    #[error("Stopped waiting for the player")]
    Cancelled,

    #[error("Could not find a working mpv executable")]
    NoExecutable,

    #[error("Could not start the player {command:?}: {source}")]
    Launch {
        command: String,
        source: std::io::Error,
    },
}

impl MpvError {
    /// Whether the call may succeed when retried later
    pub fn is_connect(&self) -> bool {
        matches!(self, MpvError::Connect { .. })
    }
}
