use anyhow::Result;
use clap::Parser;
use credflow::commands::{App, ServeExit};
use credflow::config::load_or_default;
use std::path::PathBuf;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Local AWS Identity Center credential broker
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "CREDFLOW_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    let config = load_or_default(args.config.as_deref())?.apply_env();

    // Stdout carries responses, logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.filter.clone().into()),
        )
        .with_writer(std::io::stderr)
        .init();

    info!(
        database = %config.storage.database_path().display(),
        "credflow starting..."
    );

    let app = App::new(&config)?;
    let shutdown = CancellationToken::new();

    let interrupt = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted");
            interrupt.cancel();
        }
    });

    let exit = app
        .serve(
            BufReader::new(tokio::io::stdin()),
            tokio::io::stdout(),
            &shutdown,
        )
        .await?;

    app.shutdown();
    if exit == ServeExit::Fatal {
        std::process::exit(1);
    }
    Ok(())
}
