//! # syncwatch
//!
//! Keeps the media players of everyone in a watch session in lockstep.
//!
//! ## Architecture
//!
//! ```text
//!  local controls ──▶ WatchSession ──▶ Broadcaster ──▶ per-peer writer ──▶ peer
//!                          │                ▲
//!                          ▼                │
//!                       Playback ◀── BufferingDetector (polls the player)
//!                          ▲
//!  peer ──▶ per-peer reader ──▶ RemoteApplier
//! ```
//!
//! Everything local flows out through the [`Broadcaster`]; everything remote
//! flows in through the [`RemoteApplier`], which has no way to publish. A
//! remote command therefore can never be echoed back to the network.
//!
//! A session starts with [`SessionNegotiator::host`] or
//! [`SessionNegotiator::join`] and runs as a [`WatchSession`]:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use syncwatch::{EventSink, SessionConfig, SessionNegotiator, WatchSession};
//! use syncwatch_mpv::MpvClient;
//! use syncwatch_net::{Credentials, MagnetLink, MemoryTransport, Transport};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), syncwatch::SyncError> {
//! let factory = |_: &Credentials| -> Arc<dyn Transport> {
//!     Arc::new(MemoryTransport::new("host").0)
//! };
//! let negotiated = SessionNegotiator::new(factory).host(None).await?;
//! println!("stream code: {}", negotiated.credentials);
//!
//! let (events, _display) = EventSink::new();
//! let session = WatchSession::start(
//!     negotiated,
//!     MagnetLink::default(),
//!     Arc::new(MpvClient::new("/tmp/mpv.sock")),
//!     events,
//!     &SessionConfig::default(),
//!     CancellationToken::new(),
//! )
//! .await?;
//! session.toggle_paused().await?;
//! session.close().await;
//! # Ok(())
//! # }
//! ```

mod applier;
mod broadcast;
pub mod config;
mod detector;
mod error;
pub mod gateway;
mod handshake;
mod peer;
mod player;
mod session;
mod state;

pub use applier::{RemoteApplier, duration_to_nanos, nanos_to_duration};
pub use broadcast::{Broadcaster, DEFAULT_CAPACITY, Subscription};
pub use config::{ConfigError, Settings, get_syncwatch_home};
pub use detector::{BufferingDetector, DEFAULT_POLL_INTERVAL, Snapshot};
pub use error::SyncError;
pub use gateway::{GatewayClient, GatewayError};
pub use handshake::{
    HandshakeBuffer, JoinedPeer, Negotiated, Phase, SessionNegotiator, TransportFactory,
    generate_credentials,
};
pub use peer::{PeerContext, serve_peer};
pub use player::{Playback, Player};
pub use session::{SessionConfig, WatchSession};
pub use state::{EventSink, SessionEvent, SessionState, StallSource, format_duration};
