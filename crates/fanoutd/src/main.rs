#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use fanout_common::types::exit_code;
use fanoutd::activity_log;
use fanoutd::config::{Args, RelayConfig};
use fanoutd::{Controller, Startup};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let verbose = args.verbose;
    let config: RelayConfig = args.into();

    if let Err(e) = config.validate() {
        anyhow::bail!("configuration error: {}", e);
    }

    // The log file lives in the runtime directory, so it must exist before
    // the subscriber is installed.
    let paths = config.paths();
    paths.ensure_dir().map_err(|e| {
        anyhow::anyhow!("cannot create runtime directory {}: {e}", paths.dir().display())
    })?;
    activity_log::init(&paths.activity_log(), &config.log_tag, verbose)?;

    info!("SERVER: starting message server");
    info!(
        "SERVER: TCP {}, UDP {}, WebSocket {}",
        config.tcp_addr(),
        config.udp_addr(),
        config.ws_addr()
    );

    match Controller::new(config).with_signal_handlers().start().await {
        Ok(Startup::AlreadyRunning { pid }) => {
            info!("SERVER: exiting, instance with PID {pid} is already running");
            std::process::exit(exit_code::ALREADY_RUNNING);
        }
        Ok(Startup::Running(mut relay)) => {
            relay.run_until(std::future::pending()).await;
            relay.shutdown().await;
            Ok(())
        }
        Err(e) => {
            error!("SERVER: fatal error during startup: {e}");
            Err(e.into())
        }
    }
}
