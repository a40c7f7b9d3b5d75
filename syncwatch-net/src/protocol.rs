//! Wire envelope exchanged between the peers of a watch session.
//!
//! Every message on a peer channel is a single JSON object terminated by a
//! newline. The object carries its kind in a `type` field and the payload
//! fields flattened next to it:
//!
//! ```text
//! {"type":"pause","pause":true}
//! {"type":"position","position":90000000000.0}
//! {"type":"buffering","buffering":false}
//! {"type":"magnet","magnet":"magnet:?xt=...","path":"movie/movie.mkv",
//!  "title":"Movie","description":"...","subtitles":[{"name":"en.srt","size":4096}]}
//! ```
//!
//! Note that `magnet` is both the value of the `type` discriminator and the
//! name of the field holding the magnet link itself.
//!
//! # Forward compatibility
//!
//! Decoding is done in two passes: the document is first parsed into a
//! generic [`serde_json::Value`], its `type` is inspected, and only then is it
//! re-parsed into the concrete [`Envelope`]. A `type` this version does not
//! know about is reported as `Ok(None)` so a receive loop can skip it and keep
//! going. Older peers therefore keep working when newer peers add message
//! kinds.

pub const TYPE_PAUSE: &str = "pause";
pub const TYPE_POSITION: &str = "position";
pub const TYPE_BUFFERING: &str = "buffering";
pub const TYPE_MAGNET: &str = "magnet";

const KNOWN_TYPES: [&str; 4] = [TYPE_PAUSE, TYPE_POSITION, TYPE_BUFFERING, TYPE_MAGNET];

/// Subtitle file shipped alongside the selected media
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Subtitle {
    pub name: String,
    pub size: i64,
}

/// Complete session context handed to a peer that (re)joins
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MagnetLink {
    /// Magnet link of the torrent being watched
    pub magnet: String,
    /// Path of the selected media file inside the torrent
    pub path: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub subtitles: Vec<Subtitle>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    /// Play/pause state
    Pause { pause: bool },
    /// Absolute elapsed position in nanoseconds
    Position { position: f64 },
    /// Network stall state of the sender
    Buffering { buffering: bool },
    /// Session context, terminates the joining handshake
    Magnet(MagnetLink),
}

impl Envelope {
    pub fn pause(pause: bool) -> Self {
        Envelope::Pause { pause }
    }

    pub fn position(position: f64) -> Self {
        Envelope::Position { position }
    }

    pub fn buffering(buffering: bool) -> Self {
        Envelope::Buffering { buffering }
    }

    /// The wire value of the `type` field
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Pause { .. } => TYPE_PAUSE,
            Envelope::Position { .. } => TYPE_POSITION,
            Envelope::Buffering { .. } => TYPE_BUFFERING,
            Envelope::Magnet(_) => TYPE_MAGNET,
        }
    }
}

impl std::fmt::Display for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Envelope::Pause { pause } => write!(f, "pause({pause})"),
            Envelope::Position { position } => write!(f, "position({position}ns)"),
            Envelope::Buffering { buffering } => write!(f, "buffering({buffering})"),
            Envelope::Magnet(m) => write!(f, "magnet({}, {})", m.magnet, m.path),
        }
    }
}

/// Generic view of an envelope used for the first decoding pass
#[derive(Debug, serde::Deserialize)]
struct Header {
    #[serde(rename = "type")]
    kind: String,
}

/// Encode an envelope as a single JSON document (no trailing newline)
pub fn encode(envelope: &Envelope) -> Result<String, crate::CodecError> {
    serde_json::to_string(envelope).map_err(|source| crate::CodecError::Encode { source })
}

/// Decode an already parsed JSON document into an envelope.
///
/// Returns `Ok(None)` when the `type` is not one this version understands.
pub fn decode(value: serde_json::Value) -> Result<Option<Envelope>, crate::CodecError> {
    let header = Header::deserialize_from(&value)?;

    if !KNOWN_TYPES.contains(&header.kind.as_str()) {
        tracing::debug!(kind = %header.kind, "Skipping message with unknown type");
        return Ok(None);
    }

    serde_json::from_value(value)
        .map(Some)
        .map_err(|source| crate::CodecError::Payload {
            kind: header.kind,
            source,
        })
}

impl Header {
    fn deserialize_from(value: &serde_json::Value) -> Result<Self, crate::CodecError> {
        <Header as serde::Deserialize>::deserialize(value)
            .map_err(|source| crate::CodecError::Shape { source })
    }
}
