//! BLE HID bridge CLI entry point

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use blehid_cli::{
    app::print_failure,
    cli::{Cli, Commands},
    config::AppConfig,
    error::Result,
    BridgeApp, Platform,
};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    if let Err(e) = execute(cli).await {
        error!("{}", e);
        print_failure("blehid", &e);
        std::process::exit(1);
    }
}

async fn execute(cli: Cli) -> Result<()> {
    let mut config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            simulate,
            adapter,
            name,
            strategy,
        } => {
            if let Some(name) = name {
                config.transport.device_name = name;
            }
            if let Some(strategy) = strategy {
                config.bridge.strategy = strategy;
            }
            if adapter.is_some() {
                config.bridge.adapter = adapter;
            }
            config.bridge.simulate |= simulate;
            config.validate()?;

            let platform = open_platform(&config).await?;
            let app = BridgeApp::new(config, platform)?;

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Interrupt received");
                }
                on_signal.cancel();
            });

            app.run(cancel).await
        }
        Commands::Status { simulate, adapter } => {
            if adapter.is_some() {
                config.bridge.adapter = adapter;
            }
            config.bridge.simulate |= simulate;

            let platform = open_platform(&config).await?;
            BridgeApp::new(config, platform)?.status().await
        }
        Commands::Config { write } => {
            match write {
                Some(path) => {
                    config.save_to_file(&path)?;
                    info!("Configuration written to {}", path.display());
                }
                None => print!("{}", config.to_toml()?),
            }
            Ok(())
        }
    }
}

async fn open_platform(config: &AppConfig) -> Result<Platform> {
    if config.bridge.simulate {
        info!("Using simulated GATT provider");
        return Ok(Platform::simulated());
    }
    Platform::open(config.bridge.adapter.as_deref()).await
}

/// Setup logging from RUST_LOG, falling back to the verbosity flag
fn setup_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
