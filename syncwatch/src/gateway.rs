//! HTTP client for the torrent streaming gateway.
//!
//! The gateway downloads torrents on demand and serves their files over HTTP
//! behind basic auth:
//!
//! - `GET /info?magnet=...` lists the files of a torrent
//! - `GET /metrics` reports download progress of every active torrent
//! - `GET /stream?magnet=...&path=...` serves the bytes of one file

use reqwest::Url;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Invalid gateway URL {url:?}: {reason}")]
    Url { url: String, reason: String },

    #[error("Gateway request failed: {source}")]
    Request {
        #[from]
        source: reqwest::Error,
    },
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TorrentInfo {
    pub name: String,
    #[serde(default)]
    pub info_hash: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub creation_date: i64,
    pub files: Vec<TorrentFile>,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct TorrentFile {
    pub path: String,
    pub length: i64,
}

impl TorrentInfo {
    /// The biggest file, usually the one worth watching
    pub fn largest_file(&self) -> Option<&TorrentFile> {
        self.files.iter().max_by_key(|file| file.length)
    }
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TorrentMetrics {
    pub magnet: String,
    pub info_hash: String,
    pub peers: usize,
    pub files: Vec<FileMetrics>,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct FileMetrics {
    pub path: String,
    pub length: i64,
    pub completed: i64,
}

/// Download progress of one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub peers: usize,
    pub length: i64,
    pub completed: i64,
}

impl Progress {
    /// Share of the file downloaded so far, 0 to 100
    pub fn percent(&self) -> f64 {
        if self.length <= 0 {
            return 0.0;
        }
        (self.completed as f64 / self.length as f64 * 100.0).clamp(0.0, 100.0)
    }
}

impl std::fmt::Display for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Downloading: {:.1}% ({} peers)",
            self.percent(),
            self.peers
        )
    }
}

#[derive(Debug, Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    base: Url,
    username: String,
    password: String,
}

impl GatewayClient {
    pub fn new(
        base: &str,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, GatewayError> {
        let base = Url::parse(base).map_err(|e| GatewayError::Url {
            url: base.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            http: reqwest::Client::new(),
            base,
            username: username.into(),
            password: password.into(),
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    fn endpoint(&self, path: &str) -> Url {
        let mut url = self.base.clone();
        url.set_path(path);
        url.set_query(None);
        url
    }

    /// URL the player streams `path` of the torrent from
    pub fn stream_url(&self, magnet: &str, path: &str) -> Url {
        let mut url = self.endpoint("/stream");
        url.query_pairs_mut()
            .append_pair("magnet", magnet)
            .append_pair("path", path);
        url
    }

    pub async fn info(&self, magnet: &str) -> Result<TorrentInfo, GatewayError> {
        let mut url = self.endpoint("/info");
        url.query_pairs_mut().append_pair("magnet", magnet);
        tracing::debug!(%magnet, "Getting file list");

        let info = self
            .http
            .get(url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(info)
    }

    pub async fn metrics(&self) -> Result<Vec<TorrentMetrics>, GatewayError> {
        let metrics = self
            .http
            .get(self.endpoint("/metrics"))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(metrics)
    }

    /// Progress of `path` inside the torrent of `magnet`, if the gateway is
    /// downloading it
    pub async fn progress(&self, magnet: &str, path: &str) -> Result<Option<Progress>, GatewayError> {
        let Some(info_hash) = info_hash(magnet) else {
            return Ok(None);
        };

        Ok(find_progress(&self.metrics().await?, &info_hash, path))
    }
}

fn find_progress(metrics: &[TorrentMetrics], info_hash: &str, path: &str) -> Option<Progress> {
    let torrent = metrics
        .iter()
        .find(|torrent| torrent.info_hash.eq_ignore_ascii_case(info_hash))?;
    let file = torrent.files.iter().find(|file| file.path == path)?;

    Some(Progress {
        peers: torrent.peers,
        length: file.length,
        completed: file.completed,
    })
}

/// The `btih` info hash of a magnet link, lowercased
pub fn info_hash(magnet: &str) -> Option<String> {
    let url = Url::parse(magnet).ok()?;
    url.query_pairs()
        .filter(|(key, _)| key == "xt")
        .find_map(|(_, value)| value.strip_prefix("urn:btih:").map(str::to_ascii_lowercase))
}
