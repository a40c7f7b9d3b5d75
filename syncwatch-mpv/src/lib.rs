//! # syncwatch-mpv
//!
//! Drives a local [mpv](https://mpv.io) process through its JSON IPC socket.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   one connection per call   ┌─────────────┐
//! │  MpvClient   │◄───────────────────────────►│ mpv.sock    │
//! └──────────────┘                              └─────────────┘
//!        ▲                                            ▲
//!        │ client()                                   │ --input-ipc-server
//! ┌──────┴────────┐      spawns / kills        ┌──────┴──────┐
//! │ PlayerProcess │───────────────────────────►│  mpv        │
//! └───────────────┘                            └─────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use syncwatch_mpv::{MpvClient, Property};
//!
//! # async fn example() -> Result<(), syncwatch_mpv::MpvError> {
//! let client = MpvClient::new("/tmp/syncwatch-ipc/mpv.sock");
//! let paused: bool = client.get_property(Property::Pause).await?;
//! client.set_paused(!paused).await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
mod process;
pub mod protocol;

pub use client::MpvClient;
pub use error::MpvError;
pub use process::{LaunchOptions, PlayerProcess, SOCKET_NAME, discover_executable};
pub use protocol::{Property, Request, Response, Track};
