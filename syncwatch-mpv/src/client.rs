//! One-shot control client for the player's JSON IPC socket.
//!
//! Every call dials a fresh connection, writes exactly one request line, reads
//! the first response line (skipping asynchronous event lines) and drops the
//! connection again. Calls share nothing, so they can run concurrently without
//! waiting on each other, and no ordering between concurrent calls is implied.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::error::MpvError;
use crate::protocol::{self, Property, Request, Response, Track};

#[derive(Debug, Clone)]
pub struct MpvClient {
    socket_path: PathBuf,
}

impl MpvClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Send one request and return the `data` of its response
    pub async fn execute(&self, request: &Request) -> Result<serde_json::Value, MpvError> {
        let stream = tokio::net::UnixStream::connect(&self.socket_path)
            .await
            .map_err(|source| MpvError::Connect {
                path: self.socket_path.clone(),
                source,
            })?;
        let (read, mut write) = stream.into_split();

        let mut line =
            serde_json::to_vec(request).map_err(|source| MpvError::Serialization { source })?;
        line.push(b'\n');
        write.write_all(&line).await?;
        write.flush().await?;
        tracing::trace!(verb = request.verb(), "Sent player request");

        let mut reader = BufReader::new(read);
        let mut body = String::new();
        loop {
            body.clear();
            if reader.read_line(&mut body).await? == 0 {
                return Err(MpvError::Closed);
            }

            let trimmed = body.trim();
            if trimmed.is_empty() {
                continue;
            }

            let value: serde_json::Value =
                serde_json::from_str(trimmed).map_err(|source| MpvError::MalformedResponse {
                    body: trimmed.to_string(),
                    source,
                })?;

            if protocol::is_event(&value) {
                tracing::trace!(event = %value["event"], "Skipping player event");
                continue;
            }

            let response: Response =
                serde_json::from_value(value).map_err(|source| MpvError::MalformedResponse {
                    body: trimmed.to_string(),
                    source,
                })?;

            if !response.is_success() {
                return Err(MpvError::Command {
                    error: response.error.unwrap_or_default(),
                });
            }

            return Ok(response.data);
        }
    }

    pub async fn get_property<T>(&self, property: Property) -> Result<T, MpvError>
    where
        T: serde::de::DeserializeOwned,
    {
        let data = self.execute(&Request::get_property(property)).await?;
        let body = data.to_string();
        serde_json::from_value(data).map_err(|source| MpvError::MalformedResponse { body, source })
    }

    pub async fn set_property(
        &self,
        property: Property,
        value: impl serde::Serialize,
    ) -> Result<(), MpvError> {
        let value =
            serde_json::to_value(value).map_err(|source| MpvError::Serialization { source })?;
        self.execute(&Request::set_property(property, value)).await?;
        Ok(())
    }

    pub async fn set_paused(&self, paused: bool) -> Result<(), MpvError> {
        self.set_property(Property::Pause, paused).await
    }

    /// Volume in percent, 100 being unamplified
    pub async fn set_volume(&self, percent: u32) -> Result<(), MpvError> {
        self.set_property(Property::Volume, percent).await
    }

    pub async fn is_paused(&self) -> Result<bool, MpvError> {
        self.get_property(Property::Pause).await
    }

    /// Current playback position, zero until a file is loaded
    pub async fn elapsed(&self) -> Result<Duration, MpvError> {
        self.time_property(Property::TimePos).await
    }

    /// Length of the loaded file, zero while it is still unknown
    pub async fn duration(&self) -> Result<Duration, MpvError> {
        self.time_property(Property::Duration).await
    }

    async fn time_property(&self, property: Property) -> Result<Duration, MpvError> {
        match self.get_property::<f64>(property).await {
            Ok(seconds) => Ok(seconds_to_duration(seconds)),
            Err(MpvError::Command { error }) if error == protocol::PROPERTY_UNAVAILABLE => {
                Ok(Duration::ZERO)
            }
            Err(e) => Err(e),
        }
    }

    /// Whether the playback core is currently not advancing
    pub async fn core_idle(&self) -> Result<bool, MpvError> {
        self.get_property(Property::CoreIdle).await
    }

    pub async fn seek_absolute(&self, position: Duration) -> Result<(), MpvError> {
        self.execute(&Request::seek_absolute(position.as_secs_f64()))
            .await?;
        Ok(())
    }

    /// Load an external subtitle file and return its track id, if the player
    /// lists it afterwards
    pub async fn sub_add(&self, path: &Path) -> Result<Option<i64>, MpvError> {
        let path = path.to_string_lossy();
        tracing::debug!(%path, "Adding subtitles");
        self.execute(&Request::sub_add(&path)).await?;

        let tracks = self.track_list().await?;
        Ok(tracks
            .iter()
            .find(|track| track.is_sub() && track.external_filename.as_deref() == Some(&*path))
            .map(|track| track.id))
    }

    pub async fn track_list(&self) -> Result<Vec<Track>, MpvError> {
        self.get_property(Property::TrackList).await
    }

    /// Poll the socket every `interval` until it accepts a request.
    ///
    /// Only connection failures are retried; any other error is returned
    /// as is.
    pub async fn wait_until_ready(
        &self,
        interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), MpvError> {
        loop {
            match self.execute(&Request::get_property(Property::Pause)).await {
                Ok(_) => return Ok(()),
                Err(e) if e.is_connect() => {
                    tracing::trace!(error = %e, "Player not ready yet");
                }
                Err(e) => return Err(e),
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(MpvError::Cancelled),
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }
}

fn seconds_to_duration(seconds: f64) -> Duration {
    Duration::try_from_secs_f64(seconds).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_or_nan_seconds_are_zero() {
        assert_eq!(seconds_to_duration(-1.0), Duration::ZERO);
        assert_eq!(seconds_to_duration(f64::NAN), Duration::ZERO);
        assert_eq!(seconds_to_duration(1.5), Duration::from_millis(1500));
    }
}
