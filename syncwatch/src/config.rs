//! Settings stored in `SYNCWATCH_HOME/settings.json`

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::session::SessionConfig;

pub const SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine user home directory")]
    NoHome,

    #[error("Could not read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid settings in {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Everything in the settings file is optional; command line flags win
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Player command, e.g. `["mpv"]`. Discovered when unset.
    pub player: Option<Vec<String>>,
    pub gateway_url: String,
    pub gateway_username: String,
    pub gateway_password: String,
    /// Address to accept peers on
    pub listen: Option<SocketAddr>,
    /// Peers to connect to
    pub dial: Vec<SocketAddr>,
    pub poll_interval_ms: u64,
    pub retry_interval_ms: u64,
    pub bus_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        let session = SessionConfig::default();
        Self {
            player: None,
            gateway_url: "http://localhost:1337/".to_string(),
            gateway_username: "admin".to_string(),
            gateway_password: String::new(),
            listen: None,
            dial: Vec::new(),
            poll_interval_ms: session.poll_interval.as_millis() as u64,
            retry_interval_ms: session.retry_interval.as_millis() as u64,
            bus_capacity: session.bus_capacity,
        }
    }
}

impl Settings {
    /// Load `home/settings.json`, falling back to the defaults when it does
    /// not exist
    pub async fn load(home: &Path) -> Result<Self, ConfigError> {
        let path = home.join(SETTINGS_FILE);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No settings file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => return Err(ConfigError::Read { path, source }),
        };

        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse { path, source })
    }

    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            retry_interval: Duration::from_millis(self.retry_interval_ms.max(1)),
            bus_capacity: self.bus_capacity.max(1),
        }
    }
}

/// Get the SYNCWATCH_HOME directory from the `--home` flag (which clap also
/// fills from the environment), or default to `~/.syncwatch`
pub fn get_syncwatch_home(custom_home: Option<PathBuf>) -> Result<PathBuf, ConfigError> {
    if let Some(home) = custom_home {
        return Ok(home);
    }

    let home_dir = directories::UserDirs::new()
        .ok_or(ConfigError::NoHome)?
        .home_dir()
        .to_path_buf();

    Ok(home_dir.join(".syncwatch"))
}
