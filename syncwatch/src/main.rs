//! syncwatch: watch a torrent together, in lockstep
//!
//! One person hosts a session and shares the printed stream code; everyone
//! else joins with it. Play/pause, seeks and network stalls are mirrored
//! between all connected players.

use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;

#[derive(Parser)]
#[command(name = "syncwatch")]
#[command(about = "Watch a torrent together with friends, in lockstep")]
struct Cli {
    /// More log output (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Host a new session and print its stream code
    Host {
        /// Magnet link of the torrent to watch
        magnet: String,
        /// File inside the torrent (defaults to the largest one)
        #[arg(long)]
        path: Option<String>,
        /// Title shown to peers (defaults to the torrent name)
        #[arg(long)]
        title: Option<String>,
        /// Description shown to peers
        #[arg(long)]
        description: Option<String>,
        /// Reuse an existing community:password:key instead of a fresh one
        #[arg(long)]
        stream_code: Option<String>,
        #[command(flatten)]
        common: cli::CommonArgs,
    },
    /// Join a session using the host's stream code
    Join {
        /// community:password:key
        stream_code: String,
        #[command(flatten)]
        common: cli::CommonArgs,
    },
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "syncwatch=info,syncwatch_net=info,syncwatch_mpv=info",
        1 => "syncwatch=debug,syncwatch_net=debug,syncwatch_mpv=debug",
        _ => "syncwatch=trace,syncwatch_net=trace,syncwatch_mpv=trace",
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Host {
            magnet,
            path,
            title,
            description,
            stream_code,
            common,
        } => {
            let home = syncwatch::get_syncwatch_home(common.home.clone())?;
            tracing::debug!(home = %home.display(), "Using SYNCWATCH_HOME");
            let args = cli::host::HostArgs {
                magnet,
                path,
                title,
                description,
                stream_code,
            };
            cli::host::run(home, args, common).await
        }
        Commands::Join {
            stream_code,
            common,
        } => {
            let home = syncwatch::get_syncwatch_home(common.home.clone())?;
            tracing::debug!(home = %home.display(), "Using SYNCWATCH_HOME");
            cli::join::run(home, stream_code, common).await
        }
    }
}
