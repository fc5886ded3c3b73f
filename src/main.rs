use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use firmscan::cli::{Cli, run_one_shot};
use firmscan::{AppState, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_filter().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = Config::from_env()?;
    if let Some(host) = &cli.host {
        config.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    let state = AppState::new(config)?;

    if cli.server {
        let (host, port) = (state.config.host.clone(), state.config.port);
        return firmscan::server::run_server(state, &host, port).await;
    }

    let Some(firmware) = cli.firmware.as_deref() else {
        anyhow::bail!("Firmware file required in CLI mode (or pass --server)");
    };

    run_one_shot(&state.analyzer, firmware, cli.dynamic, cli.json).await
}
