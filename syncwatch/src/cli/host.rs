//! `syncwatch host`

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use syncwatch::SessionNegotiator;
use syncwatch::gateway::{GatewayClient, TorrentInfo};
use syncwatch_net::{Credentials, MagnetLink, Subtitle};
use tokio_util::sync::CancellationToken;

use super::{CommonArgs, DEFAULT_PORT, Setup, run_session, transport_factory};

const SUBTITLE_EXTENSIONS: [&str; 4] = ["srt", "vtt", "ass", "ssa"];

pub struct HostArgs {
    pub magnet: String,
    pub path: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub stream_code: Option<String>,
}

pub async fn run(home: PathBuf, args: HostArgs, common: CommonArgs) -> eyre::Result<()> {
    let setup = Setup::load(&home, common).await?;
    let credentials = args
        .stream_code
        .as_deref()
        .map(str::parse::<Credentials>)
        .transpose()?;

    let magnet = resolve_magnet(&setup.gateway, args).await?;
    tracing::info!(magnet = %magnet.magnet, path = %magnet.path, "Selected media");

    let mut config = setup.transport_config();
    if config.listen.is_none() && config.dial.is_empty() {
        config.listen = Some(SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)));
    }
    if let Some(listen) = config.listen {
        println!("Listening for peers on {listen}");
    }

    let mut negotiator = SessionNegotiator::new(transport_factory(config));
    let negotiated = negotiator.host(credentials).await?;
    println!("Stream code: {}", negotiated.credentials);
    println!("Share it with: syncwatch join {}", negotiated.credentials);

    run_session(&setup, negotiated, magnet, CancellationToken::new()).await
}

/// Fill in whatever the command line left out from the torrent's file list
async fn resolve_magnet(gateway: &GatewayClient, args: HostArgs) -> eyre::Result<MagnetLink> {
    let HostArgs {
        magnet,
        path,
        title,
        description,
        ..
    } = args;

    if let Some(path) = path {
        return Ok(MagnetLink {
            title: title.unwrap_or_else(|| file_name(&path).to_string()),
            description: description.unwrap_or_default(),
            magnet,
            path,
            subtitles: vec![],
        });
    }

    let info = gateway.info(&magnet).await?;
    let Some(file) = info.largest_file() else {
        eyre::bail!("Torrent {} has no files", info.name);
    };

    Ok(MagnetLink {
        path: file.path.clone(),
        subtitles: subtitles(&info),
        title: title.unwrap_or_else(|| info.name.clone()),
        description: description.unwrap_or_else(|| info.description.clone()),
        magnet,
    })
}

fn subtitles(info: &TorrentInfo) -> Vec<Subtitle> {
    info.files
        .iter()
        .filter(|file| {
            file.path
                .rsplit_once('.')
                .is_some_and(|(_, ext)| SUBTITLE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        })
        .map(|file| Subtitle {
            name: file.path.clone(),
            size: file.length,
        })
        .collect()
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subtitles_are_picked_by_extension() {
        let info: TorrentInfo = serde_json::from_value(serde_json::json!({
            "name": "Movie",
            "files": [
                {"path": "Movie/movie.mkv", "length": 1000},
                {"path": "Movie/en.SRT", "length": 10},
                {"path": "Movie/de.vtt", "length": 12},
                {"path": "Movie/readme", "length": 1},
            ],
        }))
        .unwrap();

        let names: Vec<String> = subtitles(&info).into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["Movie/en.SRT", "Movie/de.vtt"]);
    }

    #[tokio::test]
    async fn test_explicit_path_skips_the_gateway() {
        // nothing listens on port 9, so any request would fail
        let gateway = GatewayClient::new("http://127.0.0.1:9/", "admin", "").unwrap();
        let magnet = resolve_magnet(
            &gateway,
            HostArgs {
                magnet: "magnet:?xt=urn:btih:abc".to_string(),
                path: Some("Movie/movie.mkv".to_string()),
                title: None,
                description: None,
                stream_code: None,
            },
        )
        .await
        .unwrap();

        assert_eq!(magnet.path, "Movie/movie.mkv");
        assert_eq!(magnet.title, "movie.mkv");
    }
}
