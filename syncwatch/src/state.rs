//! Shared session state and the event stream towards the display layer.
//!
//! Every field of [`SessionState`] has a single designated writer:
//!
//! | field             | written by                               |
//! |-------------------|------------------------------------------|
//! | `intended_paused` | [`crate::Playback::set_paused`]          |
//! | `seeking`         | local seek control in [`crate::WatchSession`] |
//! | `total`           | [`crate::BufferingDetector`]             |
//! | `local_stall`     | [`crate::BufferingDetector`]             |
//! | `remote_stall`    | [`crate::RemoteApplier`]                 |
//! | `ready`           | [`crate::BufferingDetector`]             |
//!
//! The connected peer count is the only field touched by several tasks; it
//! is only ever changed with atomic increments and decrements.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;

#[derive(Debug)]
pub struct SessionState {
    intended_paused: AtomicBool,
    seeking: AtomicBool,
    total_nanos: AtomicU64,
    local_stall: AtomicBool,
    remote_stall: AtomicBool,
    ready: AtomicBool,
    peers: AtomicUsize,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            // the player is always launched paused
            intended_paused: AtomicBool::new(true),
            seeking: AtomicBool::new(false),
            total_nanos: AtomicU64::new(0),
            local_stall: AtomicBool::new(false),
            remote_stall: AtomicBool::new(false),
            ready: AtomicBool::new(false),
            peers: AtomicUsize::new(0),
        }
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Play/pause state the local user (or a remote command) asked for
    pub fn intended_paused(&self) -> bool {
        self.intended_paused.load(Ordering::SeqCst)
    }

    pub(crate) fn set_intended_paused(&self, paused: bool) {
        self.intended_paused.store(paused, Ordering::SeqCst);
    }

    /// Whether the local user is currently moving the seek position
    pub fn seeking(&self) -> bool {
        self.seeking.load(Ordering::SeqCst)
    }

    pub(crate) fn set_seeking(&self, seeking: bool) {
        self.seeking.store(seeking, Ordering::SeqCst);
    }

    pub fn total(&self) -> Duration {
        Duration::from_nanos(self.total_nanos.load(Ordering::SeqCst))
    }

    pub(crate) fn set_total(&self, total: Duration) {
        let nanos = u64::try_from(total.as_nanos()).unwrap_or(u64::MAX);
        self.total_nanos.store(nanos, Ordering::SeqCst);
    }

    pub fn local_stall(&self) -> bool {
        self.local_stall.load(Ordering::SeqCst)
    }

    pub(crate) fn set_local_stall(&self, stalled: bool) {
        self.local_stall.store(stalled, Ordering::SeqCst);
    }

    pub fn remote_stall(&self) -> bool {
        self.remote_stall.load(Ordering::SeqCst)
    }

    pub(crate) fn set_remote_stall(&self, stalled: bool) {
        self.remote_stall.store(stalled, Ordering::SeqCst);
    }

    /// Whether the stall indicator is shown for any reason
    pub fn stalled(&self) -> bool {
        self.local_stall() || self.remote_stall()
    }

    pub fn ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Mark the player ready, returns `true` the first time only
    pub(crate) fn mark_ready(&self) -> bool {
        !self.ready.swap(true, Ordering::SeqCst)
    }

    pub fn peers(&self) -> usize {
        self.peers.load(Ordering::SeqCst)
    }

    /// Count a new peer, returns the new total
    pub(crate) fn peer_joined(&self) -> usize {
        self.peers.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Forget a peer, returns the new total
    pub(crate) fn peer_left(&self) -> usize {
        self.peers.fetch_sub(1, Ordering::SeqCst).saturating_sub(1)
    }
}

/// Where a stall was observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallSource {
    Local,
    Remote,
}

/// Notifications for the display layer
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    PeerJoined { peer_id: String, connected: usize },
    PeerLeft { peer_id: String, connected: usize },
    Stall { source: StallSource, stalled: bool },
    Paused { paused: bool },
    Progress { elapsed: Duration, total: Duration },
    /// The player reported a non-zero duration for the first time
    PlayerReady { total: Duration },
    Fatal { error: String },
}

impl SessionEvent {
    pub fn progress(elapsed: Duration, total: Duration) -> Self {
        SessionEvent::Progress { elapsed, total }
    }
}

impl std::fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionEvent::PeerJoined { connected, .. } => {
                write!(f, "Someone joined the session, watching with {connected} other(s)")
            }
            SessionEvent::PeerLeft { connected, .. } => {
                write!(f, "Someone left the session, watching with {connected} other(s)")
            }
            SessionEvent::Stall {
                source: StallSource::Local,
                stalled,
            } => write!(f, "Buffering: {stalled}"),
            SessionEvent::Stall {
                source: StallSource::Remote,
                stalled,
            } => write!(f, "Waiting for a peer to buffer: {stalled}"),
            SessionEvent::Paused { paused: true } => f.write_str("Paused"),
            SessionEvent::Paused { paused: false } => f.write_str("Playing"),
            SessionEvent::Progress { elapsed, total } => write!(
                f,
                "{} / -{}",
                format_duration(*elapsed),
                format_duration(total.saturating_sub(*elapsed))
            ),
            SessionEvent::PlayerReady { total } => {
                write!(f, "Ready to play, {} total", format_duration(*total))
            }
            SessionEvent::Fatal { error } => write!(f, "Session failed: {error}"),
        }
    }
}

/// `HH:MM:SS`
pub fn format_duration(duration: Duration) -> String {
    let seconds = duration.as_secs();
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds / 60) % 60,
        seconds % 60
    )
}

/// Sending half of the display event stream. Events are dropped silently
/// once the display layer stops listening.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EventSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_count() {
        let state = SessionState::new();
        assert_eq!(state.peer_joined(), 1);
        assert_eq!(state.peer_joined(), 2);
        assert_eq!(state.peer_left(), 1);
        assert_eq!(state.peers(), 1);
    }

    #[test]
    fn test_ready_only_once() {
        let state = SessionState::new();
        assert!(state.mark_ready());
        assert!(!state.mark_ready());
    }

    #[test]
    fn test_progress_display() {
        let event = SessionEvent::progress(Duration::from_secs(61), Duration::from_secs(3723));
        assert_eq!(event.to_string(), "00:01:01 / -01:01:02");
    }
}
