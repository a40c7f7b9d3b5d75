//! Error types for the synchronization engine

use syncwatch_mpv::MpvError;
use syncwatch_net::{CodecError, CredentialsError, TransportError};

/// Session errors
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The stream code could not be parsed. Nothing was dialed.
    #[error("{source}")]
    InvalidStreamCode {
        #[from]
        source: CredentialsError,
    },

    #[error("Transport error: {source}")]
    Transport {
        #[from]
        source: TransportError,
    },

    #[error("Transport closed before a peer connected")]
    TransportClosed,

    #[error("Peer left before sending the session details")]
    HandshakeIncomplete,

    #[error("Peer sent an unreadable message: {source}")]
    Codec {
        #[from]
        source: CodecError,
    },

    #[error("Player error: {source}")]
    Player {
        #[from]
        source: MpvError,
    },

    #[error("Operation cancelled")]
    Cancelled,
}

impl SyncError {
    /// Whether the user can simply try again with different input
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SyncError::InvalidStreamCode { .. })
    }
}
