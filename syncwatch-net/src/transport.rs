//! Peer transport abstraction.
//!
//! A transport discovers the other members of a session and hands out one
//! ordered, reliable byte stream per peer. How it does that (rendezvous,
//! relays, direct sockets) is its own business; the synchronization engine
//! only relies on the three operations of [`Transport`].

use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};

use crate::codec::{EnvelopeReader, EnvelopeWriter};

/// Byte stream carrying one peer channel
pub trait PeerIo: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> PeerIo for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub type PeerReader = EnvelopeReader<ReadHalf<Box<dyn PeerIo>>>;
pub type PeerWriter = EnvelopeWriter<WriteHalf<Box<dyn PeerIo>>>;

/// A connected peer as handed out by [`Transport::accept`]
pub struct Peer {
    pub peer_id: String,
    pub channel_id: String,
    pub conn: Box<dyn PeerIo>,
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("peer_id", &self.peer_id)
            .field("channel_id", &self.channel_id)
            .finish_non_exhaustive()
    }
}

impl Peer {
    pub fn new(
        peer_id: impl Into<String>,
        channel_id: impl Into<String>,
        conn: impl PeerIo,
    ) -> Self {
        Self {
            peer_id: peer_id.into(),
            channel_id: channel_id.into(),
            conn: Box::new(conn),
        }
    }

    /// Split the stream into an envelope reader and writer
    pub fn into_channel(self) -> PeerChannel {
        let (read, write) = tokio::io::split(self.conn);
        PeerChannel {
            peer_id: self.peer_id,
            channel_id: self.channel_id,
            reader: EnvelopeReader::new(read),
            writer: EnvelopeWriter::new(write),
        }
    }
}

/// A peer stream split into its two envelope directions
pub struct PeerChannel {
    pub peer_id: String,
    pub channel_id: String,
    pub reader: PeerReader,
    pub writer: PeerWriter,
}

/// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        source: std::io::Error,
    },

    #[error("Transport is already open")]
    AlreadyOpen,

    #[error("Transport is closed")]
    Closed,

    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Start discovery. The returned channel yields the local node id every
    /// time the transport (re)connects to its rendezvous.
    async fn open(&self) -> Result<tokio::sync::mpsc::Receiver<String>, TransportError>;

    /// Wait for the next connected peer, `None` once the transport is closed
    async fn accept(&self) -> Option<Peer>;

    /// Stop discovery and drop pending peers. Safe to call more than once.
    async fn close(&self) -> Result<(), TransportError>;
}
