//! Sessions wired together over in-memory transports, with a scripted player

use std::sync::{Arc, Mutex};
use std::time::Duration;

use syncwatch::{
    EventSink, Player, SessionConfig, SessionEvent, SessionNegotiator, WatchSession,
};
use syncwatch_mpv::MpvError;
use syncwatch_net::{
    Credentials, Envelope, EnvelopeReader, EnvelopeWriter, MagnetLink, MemoryHub,
    MemoryTransport, Transport,
};
use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq)]
enum Call {
    SetPaused(bool),
    Seek(Duration),
}

/// Player whose `core-idle` follows its pause state, so it never looks stalled
struct ScriptedPlayer {
    inner: Mutex<Inner>,
}

struct Inner {
    paused: bool,
    elapsed: Duration,
    calls: Vec<Call>,
}

impl ScriptedPlayer {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                paused: true,
                elapsed: Duration::ZERO,
                calls: Vec::new(),
            }),
        })
    }

    fn calls(&self) -> Vec<Call> {
        self.inner.lock().unwrap().calls.clone()
    }

    async fn wait_for(&self, call: Call) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !self.calls().contains(&call) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("player never saw {call:?}, got {:?}", self.calls()));
    }
}

#[async_trait::async_trait]
impl Player for ScriptedPlayer {
    async fn wait_ready(&self, _: Duration, _: &CancellationToken) -> Result<(), MpvError> {
        Ok(())
    }

    async fn set_paused(&self, paused: bool) -> Result<(), MpvError> {
        let mut inner = self.inner.lock().unwrap();
        inner.paused = paused;
        inner.calls.push(Call::SetPaused(paused));
        Ok(())
    }

    async fn seek(&self, position: Duration) -> Result<(), MpvError> {
        let mut inner = self.inner.lock().unwrap();
        inner.elapsed = position;
        inner.calls.push(Call::Seek(position));
        Ok(())
    }

    async fn elapsed(&self) -> Result<Duration, MpvError> {
        Ok(self.inner.lock().unwrap().elapsed)
    }

    async fn duration(&self) -> Result<Duration, MpvError> {
        Ok(Duration::from_secs(600))
    }

    async fn core_idle(&self) -> Result<bool, MpvError> {
        Ok(self.inner.lock().unwrap().paused)
    }
}

fn magnet() -> MagnetLink {
    MagnetLink {
        magnet: "magnet:?xt=urn:btih:c9e15763f722f23e98a29decdfae341b98d53056".to_string(),
        path: "Cosmos Laundromat/Cosmos Laundromat.mp4".to_string(),
        title: "Cosmos Laundromat".to_string(),
        description: "First Cycle".to_string(),
        subtitles: vec![],
    }
}

fn config() -> SessionConfig {
    SessionConfig {
        poll_interval: Duration::from_millis(20),
        ..Default::default()
    }
}

fn factory_for(transport: Arc<MemoryTransport>) -> impl Fn(&Credentials) -> Arc<dyn Transport> + Send + Sync {
    move |_: &Credentials| -> Arc<dyn Transport> { transport.clone() }
}

struct Host {
    session: WatchSession,
    transport: Arc<MemoryTransport>,
    hub: MemoryHub,
    player: Arc<ScriptedPlayer>,
    _events: UnboundedReceiver<SessionEvent>,
}

async fn host() -> Host {
    let (transport, hub) = MemoryTransport::new("host");
    let transport = Arc::new(transport);
    let negotiated = SessionNegotiator::new(factory_for(transport.clone()))
        .host(None)
        .await
        .unwrap();

    let player = ScriptedPlayer::new();
    let (events, rx) = EventSink::new();
    let session = WatchSession::start(
        negotiated,
        magnet(),
        player.clone(),
        events,
        &config(),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    Host {
        session,
        transport,
        hub,
        player,
        _events: rx,
    }
}

/// Connect a raw guest and read the session snapshot
async fn guest(host: &Host) -> (EnvelopeReader<ReadHalf<DuplexStream>>, WriteHalf<DuplexStream>) {
    let stream = host.hub.connect("guest").await.unwrap();
    let (read, write) = tokio::io::split(stream);
    let mut reader = EnvelopeReader::new(read);

    assert_eq!(reader.next().await.unwrap(), Some(Envelope::pause(true)));
    assert_eq!(
        reader.next().await.unwrap(),
        Some(Envelope::Magnet(magnet()))
    );
    (reader, write)
}

#[tokio::test]
async fn test_new_peer_gets_pause_then_magnet() {
    let host = host().await;
    let (_reader, _writer) = guest(&host).await;

    assert!(host.session.credentials().stream_code().split(':').count() == 3);
    assert_eq!(host.session.magnet(), &magnet());
    host.session.close().await;
}

#[tokio::test]
async fn test_remote_position_is_not_rebroadcast() {
    let host = host().await;
    let (_reader, write) = guest(&host).await;
    let mut writer = EnvelopeWriter::new(write);
    let baseline = host.session.broadcaster().published();

    writer.send(&Envelope::position(90e9)).await.unwrap();
    host.player.wait_for(Call::Seek(Duration::from_secs(90))).await;

    assert_eq!(host.session.broadcaster().published(), baseline);
    host.session.close().await;
}

#[tokio::test]
async fn test_unknown_message_is_skipped() {
    let host = host().await;
    let (_reader, mut raw) = guest(&host).await;

    raw.write_all(b"{\"type\":\"chat\",\"text\":\"hi\"}\n{\"type\":\"pause\",\"pause\":false}\n")
        .await
        .unwrap();
    host.player.wait_for(Call::SetPaused(false)).await;

    assert!(!host.session.state().intended_paused());
    assert_eq!(host.session.state().peers(), 1);
    host.session.close().await;
}

#[tokio::test]
async fn test_local_controls_reach_peers() {
    let host = host().await;
    let (mut reader, _writer) = guest(&host).await;

    assert!(host.session.set_paused(false).await.unwrap());
    assert_eq!(reader.next().await.unwrap(), Some(Envelope::pause(false)));
    assert_eq!(host.player.calls(), vec![Call::SetPaused(false)]);

    assert!(host.session.seek(Duration::from_secs(30)).await.unwrap());
    assert_eq!(reader.next().await.unwrap(), Some(Envelope::position(30e9)));
    assert!(!host.session.state().seeking());

    host.session.close().await;
}

#[tokio::test]
async fn test_local_controls_are_ignored_while_a_peer_buffers() {
    let host = host().await;
    let (_reader, write) = guest(&host).await;
    let mut writer = EnvelopeWriter::new(write);

    writer.send(&Envelope::buffering(true)).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while !host.session.state().remote_stall() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    assert!(!host.session.set_paused(false).await.unwrap());
    assert!(!host.session.seek(Duration::from_secs(5)).await.unwrap());
    assert!(host.session.state().intended_paused());

    host.session.close().await;
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let host = host().await;
    let (mut reader, _writer) = guest(&host).await;

    host.session.close().await;
    host.session.close().await;

    assert!(host.transport.is_closed());
    assert!(host.session.broadcaster().is_closed());
    assert_eq!(reader.next().await.unwrap(), None);
    host.session.closed().await;
}

#[tokio::test]
async fn test_close_does_not_wait_for_a_peer_that_stopped_reading() {
    let host = host().await;
    let (_reader, _writer) = guest(&host).await;

    // far more than the pipe holds, and the guest never reads any of it
    for i in 0..20_000 {
        host.session.broadcaster().position(i as f64 * 1e9);
        tokio::task::yield_now().await;
    }

    tokio::time::timeout(Duration::from_secs(5), host.session.close())
        .await
        .expect("close waited on a peer that stopped reading");
    assert_eq!(host.session.state().peers(), 0);
}

#[tokio::test]
async fn test_joiner_follows_host() {
    let host = host().await;

    let (transport, joiner_hub) = MemoryTransport::new("joiner");
    let transport = Arc::new(transport);
    let (to_host, to_joiner) = tokio::io::duplex(64 * 1024);
    assert!(host.hub.attach("joiner", "c1".to_string(), to_joiner).await);
    assert!(joiner_hub.attach("host", "c1".to_string(), to_host).await);

    let code = host.session.credentials().stream_code();
    let mut negotiator = SessionNegotiator::new(factory_for(transport.clone()));
    let negotiated = negotiator.join(&code, &CancellationToken::new()).await.unwrap();
    assert_eq!(negotiated.joined.as_ref().unwrap().magnet, magnet());

    let player = ScriptedPlayer::new();
    let (events, _rx) = EventSink::new();
    let joiner = WatchSession::start(
        negotiated,
        magnet(),
        player.clone(),
        events,
        &config(),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    // both sides replay each other's snapshot
    player.wait_for(Call::SetPaused(true)).await;
    host.player.wait_for(Call::SetPaused(true)).await;

    assert!(host.session.set_paused(false).await.unwrap());
    player.wait_for(Call::SetPaused(false)).await;
    assert!(!joiner.state().intended_paused());

    host.session.seek(Duration::from_secs(42)).await.unwrap();
    player.wait_for(Call::Seek(Duration::from_secs(42))).await;

    joiner.close().await;
    host.session.close().await;
    assert!(transport.is_closed());
}
