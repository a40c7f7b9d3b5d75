//! CLI module for hosting and joining watch sessions

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use syncwatch::{
    EventSink, GatewayClient, Negotiated, SessionEvent, SessionState, Settings, SyncError,
    TransportFactory, WatchSession,
};
use syncwatch_mpv::{LaunchOptions, MpvClient, PlayerProcess, discover_executable};
use syncwatch_net::{Credentials, MagnetLink, TcpTransport, TcpTransportConfig, Transport};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub mod host;
pub mod join;

/// Port a host listens on when neither `--listen` nor `--dial` is given
pub const DEFAULT_PORT: u16 = 7420;

const DOWNLOAD_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Flags shared by `host` and `join`. Each one overrides `settings.json`.
#[derive(clap::Args, Debug, Clone)]
pub struct CommonArgs {
    /// Address to accept peers on
    #[arg(long, env = "SYNCWATCH_LISTEN")]
    pub listen: Option<SocketAddr>,
    /// Peer addresses to connect to (comma separated)
    #[arg(long, env = "SYNCWATCH_DIAL", value_delimiter = ',')]
    pub dial: Vec<SocketAddr>,
    /// Player command line, e.g. "flatpak run io.mpv.Mpv" (discovered when unset)
    #[arg(long, env = "SYNCWATCH_PLAYER")]
    pub player: Option<String>,
    /// Base URL of the torrent streaming gateway
    #[arg(long, env = "SYNCWATCH_GATEWAY_URL")]
    pub gateway_url: Option<String>,
    #[arg(long, env = "SYNCWATCH_GATEWAY_USERNAME")]
    pub gateway_username: Option<String>,
    #[arg(long, env = "SYNCWATCH_GATEWAY_PASSWORD", hide_env_values = true)]
    pub gateway_password: Option<String>,
    /// Custom SYNCWATCH_HOME directory (defaults to SYNCWATCH_HOME env var or ~/.syncwatch)
    #[arg(long, env = "SYNCWATCH_HOME")]
    pub home: Option<PathBuf>,
}

/// Settings with the command line applied on top
pub struct Setup {
    pub settings: Settings,
    pub gateway: GatewayClient,
}

impl Setup {
    pub async fn load(home: &Path, common: CommonArgs) -> eyre::Result<Self> {
        let mut settings = Settings::load(home).await?;

        if let Some(player) = common.player {
            settings.player = Some(player.split_whitespace().map(str::to_string).collect());
        }
        if let Some(url) = common.gateway_url {
            settings.gateway_url = url;
        }
        if let Some(username) = common.gateway_username {
            settings.gateway_username = username;
        }
        if let Some(password) = common.gateway_password {
            settings.gateway_password = password;
        }
        if common.listen.is_some() {
            settings.listen = common.listen;
        }
        if !common.dial.is_empty() {
            settings.dial = common.dial;
        }

        let gateway = GatewayClient::new(
            &settings.gateway_url,
            settings.gateway_username.clone(),
            settings.gateway_password.clone(),
        )?;

        Ok(Self { settings, gateway })
    }

    pub fn transport_config(&self) -> TcpTransportConfig {
        TcpTransportConfig {
            listen: self.settings.listen,
            dial: self.settings.dial.clone(),
            ..Default::default()
        }
    }
}

/// One TCP transport per negotiated set of credentials
pub fn transport_factory(config: TcpTransportConfig) -> impl TransportFactory {
    move |credentials: &Credentials| -> Arc<dyn Transport> {
        Arc::new(TcpTransport::new(config.clone(), credentials.clone()))
    }
}

async fn launch_player(setup: &Setup, magnet: &MagnetLink) -> eyre::Result<PlayerProcess> {
    let command = match &setup.settings.player {
        Some(command) if !command.is_empty() => command.clone(),
        _ => discover_executable().await?,
    };

    let mut extra_args = Vec::new();
    if !magnet.title.is_empty() {
        extra_args.push(format!("--force-media-title={}", magnet.title));
    }

    let options = LaunchOptions {
        command,
        stream_url: setup
            .gateway
            .stream_url(&magnet.magnet, &magnet.path)
            .to_string(),
        username: setup.gateway.username().to_string(),
        password: setup.gateway.password().to_string(),
        extra_args,
    };
    Ok(PlayerProcess::launch(&options).await?)
}

/// Subtitle files are streamed from the gateway like the media itself
async fn add_subtitles(client: &MpvClient, gateway: &GatewayClient, magnet: &MagnetLink) {
    for subtitle in &magnet.subtitles {
        let url = gateway.stream_url(&magnet.magnet, &subtitle.name);
        match client.sub_add(Path::new(url.as_str())).await {
            Ok(id) => tracing::info!(name = %subtitle.name, ?id, "Added subtitles"),
            Err(e) => tracing::warn!(name = %subtitle.name, error = %e, "Could not add subtitles"),
        }
    }
}

/// Print gateway download progress until the player has loaded enough of
/// the file to know its length
async fn report_download(
    gateway: GatewayClient,
    magnet: MagnetLink,
    state: Arc<SessionState>,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(DOWNLOAD_POLL_INTERVAL);

    while !state.ready() {
        let progress = tokio::select! {
            _ = cancel.cancelled() => break,
            progress = async {
                interval.tick().await;
                gateway.progress(&magnet.magnet, &magnet.path).await
            } => progress,
        };

        if state.ready() {
            break;
        }
        match progress {
            Ok(Some(progress)) => println!("{progress}"),
            Ok(None) => {}
            Err(e) => tracing::debug!(error = %e, "Could not get download progress"),
        }
    }
}

/// Print session events; returns the fatal error, if one ended the session
async fn display(mut events: mpsc::UnboundedReceiver<SessionEvent>) -> Option<String> {
    let mut fatal = None;
    while let Some(event) = events.recv().await {
        match &event {
            SessionEvent::Progress { .. } => continue,
            SessionEvent::Fatal { error } => fatal = Some(error.clone()),
            _ => {}
        }
        println!("{event}");
    }
    fatal
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Control {
    TogglePause,
    Seek(Duration),
    Quit,
}

fn parse_control(line: &str) -> Option<Control> {
    let mut words = line.split_whitespace();
    let control = match words.next()? {
        "p" | "pause" | "play" => Control::TogglePause,
        "q" | "quit" => Control::Quit,
        "s" | "seek" => {
            let secs: f64 = words.next()?.parse().ok()?;
            Control::Seek(Duration::try_from_secs_f64(secs).ok()?)
        }
        _ => return None,
    };

    words.next().is_none().then_some(control)
}

const CONTROLS_HELP: &str = "Controls: p = play/pause, s <seconds> = seek, q = quit";

async fn apply_control(session: &WatchSession, control: Control) -> Result<(), SyncError> {
    let applied = match control {
        Control::TogglePause => session.toggle_paused().await?,
        Control::Seek(position) => session.seek(position).await?,
        Control::Quit => return Ok(()),
    };

    if !applied {
        println!("Waiting for buffering to finish");
    }
    Ok(())
}

/// Launch the player and keep the session running until the user quits, the
/// player exits or the session fails
pub async fn run_session(
    setup: &Setup,
    negotiated: Negotiated,
    magnet: MagnetLink,
    cancel: CancellationToken,
) -> eyre::Result<()> {
    let player = launch_player(setup, &magnet).await?;
    let client = player.client();

    let (events, rx) = EventSink::new();
    let printer = tokio::spawn(display(rx));

    let config = setup.settings.session();
    let start = WatchSession::start(
        negotiated,
        magnet.clone(),
        Arc::new(client.clone()),
        events,
        &config,
        cancel.clone(),
    );
    tokio::pin!(start);

    // a player that dies before its socket is up would be waited on forever
    let started = tokio::select! {
        started = &mut start => started,
        _ = player.exited() => {
            cancel.cancel();
            start.await
        }
    };

    let session = match started {
        Ok(session) => session,
        Err(e) => {
            player.close().await;
            return Err(e.into());
        }
    };

    if let Err(e) = client.set_volume(100).await {
        tracing::warn!(error = %e, "Could not set volume");
    }
    add_subtitles(&client, &setup.gateway, &magnet).await;
    let download = tokio::spawn(report_download(
        setup.gateway.clone(),
        magnet.clone(),
        session.state().clone(),
        cancel.clone(),
    ));
    println!("{CONTROLS_HELP}");

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut result = Ok(());
    loop {
        tokio::select! {
            _ = session.closed() => break,
            _ = player.exited() => {
                tracing::info!("Player closed, leaving session");
                break;
            }
            _ = &mut shutdown => break,
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match parse_control(&line) {
                    Some(Control::Quit) => break,
                    Some(control) => {
                        if let Err(e) = apply_control(&session, control).await {
                            result = Err(e.into());
                            break;
                        }
                    }
                    None if line.trim().is_empty() => {}
                    None => println!("{CONTROLS_HELP}"),
                },
                Ok(None) => stdin_open = false,
                Err(e) => {
                    tracing::warn!(error = %e, "Could not read controls from stdin");
                    stdin_open = false;
                }
            },
        }
    }

    session.close().await;
    player.close().await;
    download.abort();
    drop(session);

    if let Ok(Some(error)) = printer.await {
        eyre::bail!("Session failed: {error}");
    }
    result
}

/// Resolves on Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Could not install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received terminate signal, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_control() {
        assert_eq!(parse_control("p"), Some(Control::TogglePause));
        assert_eq!(parse_control("  pause "), Some(Control::TogglePause));
        assert_eq!(parse_control("q"), Some(Control::Quit));
        assert_eq!(
            parse_control("s 90.5"),
            Some(Control::Seek(Duration::from_millis(90_500)))
        );
        assert_eq!(parse_control("s"), None);
        assert_eq!(parse_control("s -3"), None);
        assert_eq!(parse_control("s 3 4"), None);
        assert_eq!(parse_control("x"), None);
        assert_eq!(parse_control(""), None);
    }

    #[tokio::test]
    async fn test_download_report_stops_on_cancel() {
        // nothing listens on port 9, so every poll fails
        let gateway = GatewayClient::new("http://127.0.0.1:9/", "admin", "").unwrap();
        let magnet = MagnetLink {
            magnet: "magnet:?xt=urn:btih:abc".to_string(),
            path: "movie.mkv".to_string(),
            ..Default::default()
        };
        let cancel = CancellationToken::new();
        cancel.cancel();

        tokio::time::timeout(
            Duration::from_secs(5),
            report_download(gateway, magnet, Arc::new(SessionState::new()), cancel),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_flags_override_settings() {
        let home = tempfile::tempdir().unwrap();
        let common = CommonArgs {
            listen: Some("127.0.0.1:9000".parse().unwrap()),
            dial: vec![],
            player: Some("flatpak run io.mpv.Mpv".to_string()),
            gateway_url: Some("http://gateway:1337/".to_string()),
            gateway_username: None,
            gateway_password: Some("secret".to_string()),
            home: None,
        };

        let setup = Setup::load(home.path(), common).await.unwrap();
        assert_eq!(
            setup.settings.player.as_deref(),
            Some(&["flatpak".to_string(), "run".to_string(), "io.mpv.Mpv".to_string()][..])
        );
        assert_eq!(setup.gateway.username(), "admin");
        assert_eq!(setup.gateway.password(), "secret");
        assert_eq!(
            setup.transport_config().listen,
            Some("127.0.0.1:9000".parse().unwrap())
        );
    }
}
