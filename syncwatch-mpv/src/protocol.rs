//! mpv JSON IPC messages.
//!
//! A request is `{"command": [verb, ...args]}` on one line. The player
//! answers with `{"data": ..., "error": "success"}` or `{"error": "<reason>"}`
//! but may interleave asynchronous event lines (`{"event": ...}`) which are
//! not answers to anything.

pub const SUCCESS: &str = "success";

/// Error reported for time properties before a file is loaded
pub const PROPERTY_UNAVAILABLE: &str = "property unavailable";

/// Track type of a sub track in [`Track::kind`]
pub const TRACK_SUB: &str = "sub";

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Request {
    pub command: Vec<serde_json::Value>,
}

impl Request {
    pub fn new(verb: &str) -> Self {
        Self {
            command: vec![serde_json::Value::from(verb)],
        }
    }

    pub fn arg(mut self, arg: impl Into<serde_json::Value>) -> Self {
        self.command.push(arg.into());
        self
    }

    pub fn get_property(property: Property) -> Self {
        Self::new("get_property").arg(property.as_str())
    }

    pub fn set_property(property: Property, value: serde_json::Value) -> Self {
        Self::new("set_property").arg(property.as_str()).arg(value)
    }

    /// Absolute seek, `seconds` from the start of the file
    pub fn seek_absolute(seconds: f64) -> Self {
        Self::new("seek").arg(seconds).arg("absolute")
    }

    pub fn sub_add(path: &str) -> Self {
        Self::new("sub-add").arg(path)
    }

    pub fn verb(&self) -> &str {
        self.command
            .first()
            .and_then(|verb| verb.as_str())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct Response {
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub error: Option<String>,
}

impl Response {
    /// A response without an `error` field counts as a success
    pub fn is_success(&self) -> bool {
        self.error.as_deref().is_none_or(|error| error == SUCCESS)
    }
}

/// Whether a line read from the socket is an event rather than a response
pub fn is_event(value: &serde_json::Value) -> bool {
    value.get("event").is_some()
}

/// Player properties used by syncwatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Property {
    Pause,
    Volume,
    TimePos,
    Duration,
    CoreIdle,
    TrackList,
}

impl Property {
    pub fn as_str(&self) -> &'static str {
        match self {
            Property::Pause => "pause",
            Property::Volume => "volume",
            Property::TimePos => "time-pos",
            Property::Duration => "duration",
            Property::CoreIdle => "core-idle",
            Property::TrackList => "track-list",
        }
    }
}

impl std::fmt::Display for Property {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the `track-list` property
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Track {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub external_filename: Option<String>,
    #[serde(default)]
    pub lang: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

impl Track {
    pub fn is_sub(&self) -> bool {
        self.kind == TRACK_SUB
    }
}
