#![forbid(unsafe_code)]

use clap::Parser;
use fanout_common::types::exit_code;
use fanoutctl::config::{Cli, Command, ControlConfig};
use fanoutctl::{ControlResult, Supervisor};
use tracing_subscriber::EnvFilter;

// Logs go to stderr; stdout carries only the JSON result.
fn init_tracing(verbose: u8) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let directive = match verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        };
        EnvFilter::new(directive)
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = ControlConfig::from(&cli);
    if let Err(e) = config.validate() {
        anyhow::bail!("configuration error: {}", e);
    }
    let supervisor = Supervisor::new(config);

    let outcome = match &cli.command {
        Command::Start { relay_args } => supervisor.start(relay_args).await,
        Command::Stop => supervisor.stop().await,
        Command::Status => supervisor.status(),
    };
    let result = outcome.unwrap_or_else(|e| ControlResult::error(&e));

    println!("{}", result.to_json());
    if result.status.is_error() {
        std::process::exit(exit_code::FATAL);
    }
    Ok(())
}
