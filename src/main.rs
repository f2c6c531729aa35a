use std::path::PathBuf;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use robot_motor_runtime::config::Settings;
use robot_motor_runtime::runtime;

/// Motor command runtime
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Directory holding default.toml and <environment>.toml
    #[arg(short, long, default_value = "config")]
    config_dir: PathBuf,

    /// Configuration layer to apply on top of default.toml
    #[arg(short, long, env = "ENVIRONMENT", default_value = "dev")]
    environment: String,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    info!(
        "Loading configuration from {} ({})",
        args.config_dir.display(),
        args.environment
    );
    let settings = match Settings::load(&args.config_dir, &args.environment) {
        Ok(settings) => settings,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        runtime::shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    if let Err(e) = runtime::run(settings, shutdown_rx).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
