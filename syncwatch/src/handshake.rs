//! Session negotiation.
//!
//! A session moves through [`Phase::Welcome`] → [`Phase::JoinWait`] →
//! [`Phase::Ready`]; hosts go straight from welcome to ready. A joiner blocks
//! on the first peer stream until it sees the host's [`MagnetLink`], keeping
//! everything that arrives before it in a [`HandshakeBuffer`].

use std::sync::Arc;

use rand::Rng;
use syncwatch_net::{Credentials, Envelope, MagnetLink, PeerChannel, Transport};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::SyncError;

const CREDENTIAL_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789_-";
const CREDENTIAL_LEN: usize = 9;

fn random_part(rng: &mut impl Rng) -> String {
    (0..CREDENTIAL_LEN)
        .map(|_| CREDENTIAL_ALPHABET[rng.gen_range(0..CREDENTIAL_ALPHABET.len())] as char)
        .collect()
}

/// Fresh random credentials for a new hosted session
pub fn generate_credentials() -> Credentials {
    let mut rng = rand::thread_rng();
    Credentials {
        community: random_part(&mut rng),
        password: random_part(&mut rng),
        key: random_part(&mut rng),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Welcome,
    JoinWait,
    Ready,
}

/// Envelopes that arrived before the joining handshake finished.
///
/// Entries are queued in arrival order and replayed newest first.
#[derive(Debug, Default)]
pub struct HandshakeBuffer {
    entries: Vec<Envelope>,
}

impl HandshakeBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, envelope: Envelope) {
        self.entries.push(envelope);
    }

    /// Next envelope to replay
    pub fn pop(&mut self) -> Option<Envelope> {
        self.entries.pop()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Creates the transport for a set of credentials
pub trait TransportFactory: Send + Sync {
    fn create(&self, credentials: &Credentials) -> Arc<dyn Transport>;
}

impl<F> TransportFactory for F
where
    F: Fn(&Credentials) -> Arc<dyn Transport> + Send + Sync,
{
    fn create(&self, credentials: &Credentials) -> Arc<dyn Transport> {
        self(credentials)
    }
}

/// The host stream a joiner waited on
pub struct JoinedPeer {
    pub channel: PeerChannel,
    pub magnet: MagnetLink,
    pub buffer: HandshakeBuffer,
}

/// Result of a successful negotiation
pub struct Negotiated {
    pub credentials: Credentials,
    pub transport: Arc<dyn Transport>,
    /// Local node ids reported by the transport on every reconnect
    pub node_ids: mpsc::Receiver<String>,
    /// Set when joining
    pub joined: Option<JoinedPeer>,
}

pub struct SessionNegotiator<F> {
    factory: F,
    phase: Phase,
}

impl<F: TransportFactory> SessionNegotiator<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            phase: Phase::Welcome,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Open a hosted session, generating credentials when none are given
    pub async fn host(&mut self, credentials: Option<Credentials>) -> Result<Negotiated, SyncError> {
        let credentials = credentials.unwrap_or_else(generate_credentials);
        let transport = self.factory.create(&credentials);
        let node_ids = transport.open().await?;

        tracing::info!(stream_code = %credentials, "Hosting session");
        self.phase = Phase::Ready;

        Ok(Negotiated {
            credentials,
            transport,
            node_ids,
            joined: None,
        })
    }

    /// Join the session named by `stream_code`.
    ///
    /// An invalid code is rejected before any transport is created.
    pub async fn join(
        &mut self,
        stream_code: &str,
        cancel: &CancellationToken,
    ) -> Result<Negotiated, SyncError> {
        let credentials: Credentials = stream_code.parse()?;
        let transport = self.factory.create(&credentials);
        let node_ids = transport.open().await?;
        self.phase = Phase::JoinWait;

        match wait_for_magnet(transport.as_ref(), cancel).await {
            Ok(joined) => {
                self.phase = Phase::Ready;
                Ok(Negotiated {
                    credentials,
                    transport,
                    node_ids,
                    joined: Some(joined),
                })
            }
            Err(e) => {
                if let Err(close) = transport.close().await {
                    tracing::warn!(error = %close, "Could not close transport");
                }
                self.phase = Phase::Welcome;
                Err(e)
            }
        }
    }
}

async fn wait_for_magnet(
    transport: &dyn Transport,
    cancel: &CancellationToken,
) -> Result<JoinedPeer, SyncError> {
    let peer = tokio::select! {
        _ = cancel.cancelled() => return Err(SyncError::Cancelled),
        peer = transport.accept() => peer.ok_or(SyncError::TransportClosed)?,
    };
    tracing::info!(peer_id = %peer.peer_id, channel = %peer.channel_id, "Connected to host");

    let mut channel = peer.into_channel();
    let mut buffer = HandshakeBuffer::new();
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            next = channel.reader.next() => next?,
        };

        match next {
            Some(Envelope::Magnet(magnet)) => {
                tracing::info!(
                    magnet = %magnet.magnet,
                    path = %magnet.path,
                    buffered = buffer.len(),
                    "Got session details"
                );
                return Ok(JoinedPeer {
                    channel,
                    magnet,
                    buffer,
                });
            }
            Some(envelope) => {
                tracing::debug!(%envelope, "Buffering message until the handshake completes");
                buffer.push(envelope);
            }
            None => return Err(SyncError::HandshakeIncomplete),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use syncwatch_net::{EnvelopeWriter, MemoryHub, MemoryTransport};

    fn magnet() -> MagnetLink {
        MagnetLink {
            magnet: "magnet:?xt=urn:btih:abc".to_string(),
            path: "movie.mkv".to_string(),
            title: "Movie".to_string(),
            description: String::new(),
            subtitles: vec![],
        }
    }

    /// Factory handing out one memory transport, counting calls
    struct Factory {
        calls: AtomicUsize,
        transport: Arc<MemoryTransport>,
        seen: Mutex<Option<Credentials>>,
    }

    impl Factory {
        fn new() -> (Arc<Self>, MemoryHub) {
            let (transport, hub) = MemoryTransport::new("local");
            let factory = Arc::new(Self {
                calls: AtomicUsize::new(0),
                transport: Arc::new(transport),
                seen: Mutex::new(None),
            });
            (factory, hub)
        }
    }

    fn counting(factory: Arc<Factory>) -> impl TransportFactory {
        move |credentials: &Credentials| -> Arc<dyn Transport> {
            factory.calls.fetch_add(1, Ordering::SeqCst);
            *factory.seen.lock().unwrap() = Some(credentials.clone());
            factory.transport.clone()
        }
    }

    #[test]
    fn test_replay_order_is_newest_first() {
        let mut buffer = HandshakeBuffer::new();
        buffer.push(Envelope::pause(true));
        buffer.push(Envelope::position(5e9));

        assert_eq!(buffer.pop(), Some(Envelope::position(5e9)));
        assert_eq!(buffer.pop(), Some(Envelope::pause(true)));
        assert_eq!(buffer.pop(), None);
    }

    #[test]
    fn test_generated_credentials_are_usable() {
        let credentials = generate_credentials();
        let parsed: Credentials = credentials.stream_code().parse().unwrap();
        assert_eq!(parsed, credentials);
        assert_ne!(generate_credentials(), credentials);
    }

    #[tokio::test]
    async fn test_invalid_code_never_creates_a_transport() {
        let (factory, _hub) = Factory::new();
        let mut negotiator = SessionNegotiator::new(counting(factory.clone()));

        let err = negotiator
            .join("a:b", &CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert!(err.is_recoverable());
        assert_eq!(factory.calls.load(Ordering::SeqCst), 0);
        assert_eq!(factory.transport.open_count(), 0);
        assert_eq!(negotiator.phase(), Phase::Welcome);
    }

    #[tokio::test]
    async fn test_join_buffers_until_magnet() {
        let (factory, hub) = Factory::new();
        let mut negotiator = SessionNegotiator::new(counting(factory.clone()));

        let host = tokio::spawn(async move {
            let stream = hub.connect("host").await.unwrap();
            let (_read, write) = tokio::io::split(stream);
            let mut writer = EnvelopeWriter::new(write);
            writer.send(&Envelope::pause(true)).await.unwrap();
            writer.send(&Envelope::position(5e9)).await.unwrap();
            writer.send(&Envelope::Magnet(magnet())).await.unwrap();
            writer
        });

        let negotiated = negotiator
            .join("a:b:c", &CancellationToken::new())
            .await
            .unwrap();
        let _writer = host.await.unwrap();

        assert_eq!(factory.calls.load(Ordering::SeqCst), 1);
        assert_eq!(factory.transport.open_count(), 1);
        assert_eq!(
            factory.seen.lock().unwrap().as_ref().map(|c| c.key.as_str()),
            Some("c")
        );
        assert_eq!(negotiator.phase(), Phase::Ready);

        let mut joined = negotiated.joined.unwrap();
        assert_eq!(joined.magnet, magnet());
        assert_eq!(joined.buffer.pop(), Some(Envelope::position(5e9)));
        assert_eq!(joined.buffer.pop(), Some(Envelope::pause(true)));
        assert!(joined.buffer.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_during_wait_closes_transport() {
        let (factory, _hub) = Factory::new();
        let mut negotiator = SessionNegotiator::new(counting(factory.clone()));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = negotiator.join("a:b:c", &cancel).await.err().unwrap();

        assert!(matches!(err, SyncError::Cancelled));
        assert!(factory.transport.is_closed());
    }

    #[tokio::test]
    async fn test_host_generates_credentials() {
        let (factory, _hub) = Factory::new();
        let mut negotiator = SessionNegotiator::new(counting(factory.clone()));

        let mut negotiated = negotiator.host(None).await.unwrap();
        assert_eq!(negotiator.phase(), Phase::Ready);
        assert!(negotiated.joined.is_none());
        assert_eq!(negotiated.node_ids.recv().await.as_deref(), Some("local"));
        assert_eq!(
            factory.seen.lock().unwrap().as_ref(),
            Some(&negotiated.credentials)
        );
    }
}
