//! `syncwatch join`

use std::path::PathBuf;

use eyre::WrapErr;
use syncwatch::{SessionNegotiator, SyncError};
use syncwatch_net::Credentials;
use tokio_util::sync::CancellationToken;

use super::{CommonArgs, Setup, run_session, shutdown_signal, transport_factory};

const CHECK_STREAM_CODE: &str = "Check the stream code with the host and try again";

pub async fn run(home: PathBuf, stream_code: String, common: CommonArgs) -> eyre::Result<()> {
    if let Err(e) = stream_code.parse::<Credentials>() {
        return Err(SyncError::from(e)).wrap_err(CHECK_STREAM_CODE);
    }

    let setup = Setup::load(&home, common).await?;
    let config = setup.transport_config();
    if config.listen.is_none() && config.dial.is_empty() {
        eyre::bail!("Nowhere to find the host: pass --dial <host:port> or --listen <addr>");
    }

    let cancel = CancellationToken::new();
    let on_signal = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            cancel.cancel();
        })
    };

    println!("Waiting for the host...");
    let mut negotiator = SessionNegotiator::new(transport_factory(config));
    let negotiated = negotiator.join(&stream_code, &cancel).await;
    on_signal.abort();

    let negotiated = match negotiated {
        Ok(negotiated) => negotiated,
        Err(SyncError::Cancelled) => return Ok(()),
        Err(e) if e.is_recoverable() => {
            return Err(e).wrap_err(CHECK_STREAM_CODE);
        }
        Err(e) => return Err(e.into()),
    };

    let Some(joined) = negotiated.joined.as_ref() else {
        eyre::bail!("Joined without a host stream");
    };
    let magnet = joined.magnet.clone();
    println!("Joined \"{}\"", magnet.title);
    if !magnet.description.is_empty() {
        println!("{}", magnet.description);
    }

    run_session(&setup, negotiated, magnet, cancel).await
}
