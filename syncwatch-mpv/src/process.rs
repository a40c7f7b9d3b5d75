//! Player executable discovery and process lifetime

use std::path::{Path, PathBuf};

use base64::Engine;
use tokio_util::sync::CancellationToken;

use crate::client::MpvClient;
use crate::error::MpvError;

pub const SOCKET_NAME: &str = "mpv.sock";

/// Candidate commands, tried in order
fn candidates() -> Vec<Vec<&'static str>> {
    if Path::new("/.flatpak-info").exists() {
        return vec![
            vec!["flatpak-spawn", "--host", "mpv"],
            vec!["flatpak-spawn", "--host", "flatpak", "run", "io.mpv.Mpv"],
        ];
    }

    vec![vec!["mpv"], vec!["flatpak", "run", "io.mpv.Mpv"]]
}

/// Find a player command that runs `--version` successfully.
///
/// Returns the command split into program and leading arguments.
pub async fn discover_executable() -> Result<Vec<String>, MpvError> {
    for candidate in candidates() {
        let Some((program, args)) = candidate.split_first() else {
            continue;
        };

        let status = tokio::process::Command::new(program)
            .args(args)
            .arg("--version")
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .await;

        match status {
            Ok(status) if status.success() => {
                tracing::debug!(command = ?candidate, "Found player");
                return Ok(candidate.iter().map(|part| part.to_string()).collect());
            }
            Ok(status) => tracing::trace!(command = ?candidate, %status, "Player candidate failed"),
            Err(e) => tracing::trace!(command = ?candidate, error = %e, "Player candidate missing"),
        }
    }

    Err(MpvError::NoExecutable)
}

/// What to play and how to reach it
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Player command, e.g. `["mpv"]`
    pub command: Vec<String>,
    pub stream_url: String,
    pub username: String,
    pub password: String,
    pub extra_args: Vec<String>,
}

impl LaunchOptions {
    fn basic_auth(&self) -> String {
        base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", self.username, self.password))
    }

    /// Full argument list after the program name
    pub fn args(&self, socket_path: &Path) -> Vec<String> {
        let mut args: Vec<String> = self.command.iter().skip(1).cloned().collect();
        args.extend([
            "--no-sub-visibility".to_string(),
            "--keep-open=always".to_string(),
            "--no-osc".to_string(),
            "--no-input-default-bindings".to_string(),
            "--pause".to_string(),
            format!("--input-ipc-server={}", socket_path.display()),
            format!("--http-header-fields=Authorization: Basic {}", self.basic_auth()),
        ]);
        args.extend(self.extra_args.iter().cloned());
        args.push(self.stream_url.clone());
        args
    }
}

/// A running player owning its control-socket directory.
///
/// The directory is removed and the process killed by [`PlayerProcess::close`].
pub struct PlayerProcess {
    socket_path: PathBuf,
    dir: std::sync::Mutex<Option<tempfile::TempDir>>,
    kill: CancellationToken,
    exited: CancellationToken,
}

impl PlayerProcess {
    pub async fn launch(options: &LaunchOptions) -> Result<Self, MpvError> {
        let dir = tempfile::Builder::new().prefix("syncwatch-ipc").tempdir()?;
        let socket_path = dir.path().join(SOCKET_NAME);

        let Some(program) = options.command.first() else {
            return Err(MpvError::NoExecutable);
        };

        let mut child = tokio::process::Command::new(program)
            .args(options.args(&socket_path))
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| MpvError::Launch {
                command: options.command.join(" "),
                source,
            })?;
        tracing::info!(pid = ?child.id(), socket = %socket_path.display(), "Started player");

        let kill = CancellationToken::new();
        let exited = CancellationToken::new();
        {
            let kill = kill.clone();
            let exited = exited.clone();
            tokio::spawn(async move {
                tokio::select! {
                    status = child.wait() => match status {
                        Ok(status) => tracing::info!(%status, "Player exited"),
                        Err(e) => tracing::warn!(error = %e, "Could not wait for player"),
                    },
                    _ = kill.cancelled() => {
                        if let Err(e) = child.kill().await {
                            tracing::warn!(error = %e, "Could not kill player");
                        }
                    }
                }
                exited.cancel();
            });
        }

        Ok(Self {
            socket_path,
            dir: std::sync::Mutex::new(Some(dir)),
            kill,
            exited,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn client(&self) -> MpvClient {
        MpvClient::new(&self.socket_path)
    }

    /// Resolves once the player process has exited for any reason
    pub async fn exited(&self) {
        self.exited.cancelled().await
    }

    /// Kill the player and remove the socket directory. Safe to call more
    /// than once.
    pub async fn close(&self) {
        self.kill.cancel();
        self.exited.cancelled().await;

        let dir = self.dir.lock().ok().and_then(|mut dir| dir.take());
        if let Some(dir) = dir {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                tracing::warn!(path = %path.display(), error = %e, "Could not remove socket directory");
            }
        }
    }
}
