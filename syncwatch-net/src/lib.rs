//! # syncwatch-net
//!
//! Peer side of a syncwatch session: the newline-delimited JSON envelope
//! that carries playback events between peers, the credential triple that
//! names a session, and the transports that hand out one ordered byte stream
//! per connected peer.
//!
//! ```rust,no_run
//! use syncwatch_net::{Credentials, Envelope, MemoryTransport, Transport};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let (transport, hub) = MemoryTransport::new("host");
//! transport.open().await?;
//! let _remote = hub.connect("guest").await;
//!
//! if let Some(peer) = transport.accept().await {
//!     let mut channel = peer.into_channel();
//!     channel.writer.send(&Envelope::pause(true)).await?;
//! }
//! # Ok(())
//! # }
//! ```

mod codec;
mod credentials;
mod memory;
pub mod protocol;
mod tcp;
mod transport;

pub use codec::{CodecError, EnvelopeReader, EnvelopeWriter};
pub use credentials::{Credentials, CredentialsError};
pub use memory::{MemoryHub, MemoryTransport};
pub use protocol::{Envelope, MagnetLink, Subtitle};
pub use tcp::{Hello, HelloError, HelloReply, TcpTransport, TcpTransportConfig};
pub use transport::{Peer, PeerChannel, PeerIo, PeerReader, PeerWriter, Transport, TransportError};
