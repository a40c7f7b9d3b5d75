//! Direct TCP transport.
//!
//! Listens on a local address and/or dials a fixed list of peers. Every new
//! connection starts with a one-line JSON hello from the dialing side carrying
//! its node id, a fresh channel id and the session credentials; the listening
//! side answers with a one-line reply. Only peers of the same session are
//! paired, everything after the reply is the envelope stream.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::credentials::Credentials;
use crate::transport::{Peer, Transport, TransportError};

const MAX_HELLO_LEN: usize = 16 * 1024;

#[derive(Debug, Clone)]
pub struct TcpTransportConfig {
    /// Address to accept peers on, `None` for dial-only
    pub listen: Option<SocketAddr>,
    /// Peers to connect to
    pub dial: Vec<SocketAddr>,
    pub hello_timeout: Duration,
    pub redial_interval: Duration,
}

impl Default for TcpTransportConfig {
    fn default() -> Self {
        Self {
            listen: None,
            dial: Vec::new(),
            hello_timeout: Duration::from_secs(10),
            redial_interval: Duration::from_secs(1),
        }
    }
}

/// Hello rejection codes
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HelloError {
    /// Credentials do not match the listener's session
    WrongSession,
    /// Hello could not be parsed
    Malformed,
}

/// First line sent by the dialing side
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Hello {
    pub client_name: String,
    pub client_version: String,
    pub node_id: String,
    pub channel_id: String,
    #[serde(flatten)]
    pub credentials: Credentials,
}

/// Listener's answer to a [`Hello`]
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HelloReply {
    Success { node_id: String },
    Failure { code: HelloError },
}

impl Hello {
    pub fn new(node_id: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            client_name: env!("CARGO_PKG_NAME").to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            node_id: node_id.into(),
            channel_id: uuid::Uuid::new_v4().to_string(),
            credentials,
        }
    }
}

pub struct TcpTransport {
    config: TcpTransportConfig,
    credentials: Credentials,
    node_id: String,
    peers_tx: mpsc::Sender<Peer>,
    peers_rx: Mutex<mpsc::Receiver<Peer>>,
    local_addr: std::sync::Mutex<Option<SocketAddr>>,
    opened: AtomicBool,
    cancel: CancellationToken,
}

impl TcpTransport {
    pub fn new(config: TcpTransportConfig, credentials: Credentials) -> Self {
        let (peers_tx, peers_rx) = mpsc::channel(16);
        Self {
            config,
            credentials,
            node_id: uuid::Uuid::new_v4().to_string(),
            peers_tx,
            peers_rx: Mutex::new(peers_rx),
            local_addr: std::sync::Mutex::new(None),
            opened: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Address the listener is bound to, once opened
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.lock().ok().and_then(|addr| *addr)
    }
}

#[async_trait::async_trait]
impl Transport for TcpTransport {
    async fn open(&self) -> Result<mpsc::Receiver<String>, TransportError> {
        if self.cancel.is_cancelled() {
            return Err(TransportError::Closed);
        }
        if self.opened.swap(true, Ordering::SeqCst) {
            return Err(TransportError::AlreadyOpen);
        }

        if let Some(addr) = self.config.listen {
            let listener = TcpListener::bind(addr)
                .await
                .map_err(|source| TransportError::Bind { addr, source })?;
            let bound = listener.local_addr()?;
            if let Ok(mut local) = self.local_addr.lock() {
                *local = Some(bound);
            }
            tracing::info!(%bound, node_id = %self.node_id, "Listening for peers");

            tokio::spawn(accept_loop(
                listener,
                self.credentials.clone(),
                self.node_id.clone(),
                self.config.hello_timeout,
                self.peers_tx.clone(),
                self.cancel.clone(),
            ));
        }

        for addr in self.config.dial.iter().copied() {
            let hello = Hello::new(self.node_id.clone(), self.credentials.clone());
            tokio::spawn(dial_loop(
                addr,
                hello,
                self.config.clone(),
                self.peers_tx.clone(),
                self.cancel.clone(),
            ));
        }

        let (tx, rx) = mpsc::channel(1);
        let _ = tx.send(self.node_id.clone()).await;
        Ok(rx)
    }

    async fn accept(&self) -> Option<Peer> {
        let mut peers = tokio::select! {
            _ = self.cancel.cancelled() => return None,
            peers = self.peers_rx.lock() => peers,
        };

        tokio::select! {
            _ = self.cancel.cancelled() => None,
            peer = peers.recv() => peer,
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.cancel.is_cancelled() {
            tracing::debug!(node_id = %self.node_id, "Closing TCP transport");
        }
        self.cancel.cancel();
        Ok(())
    }
}

async fn accept_loop(
    listener: TcpListener,
    credentials: Credentials,
    node_id: String,
    hello_timeout: Duration,
    peers: mpsc::Sender<Peer>,
    cancel: CancellationToken,
) {
    loop {
        let (stream, remote) = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to accept connection");
                    continue;
                }
            },
        };

        let credentials = credentials.clone();
        let node_id = node_id.clone();
        let peers = peers.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let handshake = tokio::time::timeout(
                hello_timeout,
                answer_hello(stream, &credentials, &node_id),
            );
            let peer = tokio::select! {
                _ = cancel.cancelled() => return,
                result = handshake => match result {
                    Ok(Ok(peer)) => peer,
                    Ok(Err(e)) => {
                        tracing::warn!(%remote, error = %e, "Rejected connection");
                        return;
                    }
                    Err(_) => {
                        tracing::warn!(%remote, "Connection did not say hello in time");
                        return;
                    }
                },
            };

            tracing::info!(%remote, peer_id = %peer.peer_id, "Peer connected");
            let _ = peers.send(peer).await;
        });
    }
}

async fn answer_hello(
    mut stream: TcpStream,
    credentials: &Credentials,
    node_id: &str,
) -> Result<Peer, HelloFailure> {
    let line = read_line(&mut stream).await?;
    let hello: Hello = match serde_json::from_slice(&line) {
        Ok(hello) => hello,
        Err(e) => {
            write_json(&mut stream, &HelloReply::Failure { code: HelloError::Malformed }).await?;
            return Err(HelloFailure::Malformed { source: e });
        }
    };

    if hello.credentials != *credentials {
        write_json(
            &mut stream,
            &HelloReply::Failure {
                code: HelloError::WrongSession,
            },
        )
        .await?;
        return Err(HelloFailure::Rejected {
            code: HelloError::WrongSession,
        });
    }

    write_json(
        &mut stream,
        &HelloReply::Success {
            node_id: node_id.to_string(),
        },
    )
    .await?;

    Ok(Peer::new(hello.node_id, hello.channel_id, stream))
}

async fn dial_loop(
    addr: SocketAddr,
    hello: Hello,
    config: TcpTransportConfig,
    peers: mpsc::Sender<Peer>,
    cancel: CancellationToken,
) {
    loop {
        let attempt = tokio::time::timeout(config.hello_timeout, send_hello(addr, &hello));
        let result = tokio::select! {
            _ = cancel.cancelled() => return,
            result = attempt => result,
        };

        match result {
            Ok(Ok(peer)) => {
                tracing::info!(%addr, peer_id = %peer.peer_id, "Connected to peer");
                let _ = peers.send(peer).await;
                return;
            }
            Ok(Err(HelloFailure::Rejected { code })) => {
                tracing::error!(%addr, ?code, "Peer refused this session");
                return;
            }
            Ok(Err(e)) => tracing::debug!(%addr, error = %e, "Dial failed, retrying"),
            Err(_) => tracing::debug!(%addr, "Hello timed out, retrying"),
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(config.redial_interval) => {}
        }
    }
}

async fn send_hello(addr: SocketAddr, hello: &Hello) -> Result<Peer, HelloFailure> {
    let mut stream = TcpStream::connect(addr).await?;
    write_json(&mut stream, hello).await?;

    let line = read_line(&mut stream).await?;
    let reply: HelloReply =
        serde_json::from_slice(&line).map_err(|source| HelloFailure::Malformed { source })?;

    match reply {
        HelloReply::Success { node_id } => {
            Ok(Peer::new(node_id, hello.channel_id.clone(), stream))
        }
        HelloReply::Failure { code } => Err(HelloFailure::Rejected { code }),
    }
}

#[derive(Debug, thiserror::Error)]
enum HelloFailure {
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("Malformed hello: {source}")]
    Malformed { source: serde_json::Error },

    #[error("Hello rejected: {code:?}")]
    Rejected { code: HelloError },

    #[error("Hello line too long")]
    TooLong,
}

async fn write_json<W, T>(writer: &mut W, value: &T) -> Result<(), HelloFailure>
where
    W: AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let mut bytes =
        serde_json::to_vec(value).map_err(|source| HelloFailure::Malformed { source })?;
    bytes.push(b'\n');
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one line without buffering past the newline, so the envelope stream
/// that follows stays untouched
async fn read_line<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, HelloFailure> {
    let mut line = Vec::new();
    loop {
        let byte = reader.read_u8().await?;
        if byte == b'\n' {
            return Ok(line);
        }
        if line.len() >= MAX_HELLO_LEN {
            return Err(HelloFailure::TooLong);
        }
        line.push(byte);
    }
}
