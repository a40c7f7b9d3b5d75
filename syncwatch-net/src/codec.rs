//! Newline-delimited envelope framing over an ordered byte stream

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::protocol::{self, Envelope};

/// Codec errors
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("Could not decode structure: {source}")]
    Json { source: serde_json::Error },

    #[error("Could not decode message: {source}")]
    Shape { source: serde_json::Error },

    #[error("Could not decode {kind}: {source}")]
    Payload {
        kind: String,
        source: serde_json::Error,
    },

    #[error("Could not encode message: {source}")]
    Encode { source: serde_json::Error },
}

impl CodecError {
    /// Whether the stream this error came from must be abandoned.
    ///
    /// A payload that does not match its declared type only loses that one
    /// message; everything else leaves the stream in an unknown state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CodecError::Payload { .. })
    }
}

/// Reads envelopes from one peer stream
pub struct EnvelopeReader<R> {
    inner: BufReader<R>,
    line: String,
}

impl<R: AsyncRead + Unpin> EnvelopeReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: BufReader::new(reader),
            line: String::new(),
        }
    }

    /// Read the next JSON document, `None` once the stream is closed
    pub async fn next_value(&mut self) -> Result<Option<serde_json::Value>, CodecError> {
        loop {
            self.line.clear();
            if self.inner.read_line(&mut self.line).await? == 0 {
                return Ok(None);
            }

            let line = self.line.trim();
            if line.is_empty() {
                continue;
            }

            return serde_json::from_str(line)
                .map(Some)
                .map_err(|source| CodecError::Json { source });
        }
    }

    /// Read the next envelope this version understands.
    ///
    /// Unknown types and payloads that fail to decode are logged and skipped.
    /// Returns `None` once the stream is closed.
    pub async fn next(&mut self) -> Result<Option<Envelope>, CodecError> {
        loop {
            let Some(value) = self.next_value().await? else {
                return Ok(None);
            };

            match protocol::decode(value) {
                Ok(Some(envelope)) => return Ok(Some(envelope)),
                Ok(None) => continue,
                Err(e) if !e.is_terminal() => {
                    tracing::debug!(error = %e, "Skipping undecodable message");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Writes envelopes to one peer stream
pub struct EnvelopeWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> EnvelopeWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { inner: writer }
    }

    pub async fn send(&mut self, envelope: &Envelope) -> Result<(), CodecError> {
        let mut bytes =
            serde_json::to_vec(envelope).map_err(|source| CodecError::Encode { source })?;
        bytes.push(b'\n');

        self.inner.write_all(&bytes).await?;
        self.inner.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), CodecError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_type_does_not_stop_the_stream() {
        let mock = tokio_test::io::Builder::new()
            .read(b"{\"type\":\"reaction\",\"emoji\":\"popcorn\"}\n")
            .read(b"{\"type\":\"pause\",\"pause\":true}\n")
            .build();

        let mut reader = EnvelopeReader::new(mock);
        assert_eq!(reader.next().await.unwrap(), Some(Envelope::pause(true)));
        assert_eq!(reader.next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalid_json_is_terminal() {
        let mock = tokio_test::io::Builder::new()
            .read(b"{\"type\":\"pause\",\n")
            .build();

        let mut reader = EnvelopeReader::new(mock);
        let err = reader.next().await.unwrap_err();
        assert!(matches!(err, CodecError::Json { .. }));
    }

    #[tokio::test]
    async fn test_documents_split_across_reads() {
        let mock = tokio_test::io::Builder::new()
            .read(b"{\"type\":\"position\",")
            .read(b"\"position\":5000000000.0}\n\n{\"type\":\"buffering\",\"buffering\":true}\n")
            .build();

        let mut reader = EnvelopeReader::new(mock);
        assert_eq!(
            reader.next().await.unwrap(),
            Some(Envelope::position(5_000_000_000.0))
        );
        assert_eq!(
            reader.next().await.unwrap(),
            Some(Envelope::buffering(true))
        );
    }

    #[tokio::test]
    async fn test_writer_frames_with_newline() {
        let mock = tokio_test::io::Builder::new()
            .write(b"{\"type\":\"buffering\",\"buffering\":false}\n")
            .build();

        let mut writer = EnvelopeWriter::new(mock);
        writer.send(&Envelope::buffering(false)).await.unwrap();
    }
}
