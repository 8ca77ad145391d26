pub mod config;
pub mod forward;
pub mod listener;
pub mod pipeline;
pub mod tracking;

use crate::config::RelayConfig;
use crate::forward::UdpTransport;
use crate::listener::{ListenerStats, OscListener};
use crate::pipeline::PipelineHandle;
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config = RelayConfig::resolve(std::env::args_os().nth(1).map(PathBuf::from)).await?;
    setup_logging_env(config.log_level()?);
    info!("Starting tracker relay with config: {:?}", config);

    let transport = UdpTransport::connect(&config.destination.host, config.destination.port)
        .await
        .map_err(|e| eyre!("Failed to set up forwarding: {}", e))?;
    info!("Relaying tracker updates to {}", transport.destination());

    let pipeline = PipelineHandle::spawn(config.pipeline_settings(), transport);

    let listener = OscListener::bind(&config.listener.address).await?;
    let mut listener_task =
        tokio::spawn(listener.run(pipeline.sender(), pipeline.shutdown_token()));

    let listener_done = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("Ctrl-C received"),
                Err(e) => error!("Unable to listen for shutdown signal: {}", e),
            }
            false
        }
        result = &mut listener_task => {
            log_listener_result(result);
            true
        }
    };

    let summary = pipeline.shutdown().await?;
    if !listener_done {
        log_listener_result(listener_task.await);
    }

    info!("Tracker relay stopped: {:?}", summary);
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    Ok(())
}

fn setup_logging_env(level: Level) {
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}

fn log_listener_result(
    result: std::result::Result<
        std::result::Result<ListenerStats, listener::ListenerError>,
        tokio::task::JoinError,
    >,
) {
    match result {
        Ok(Ok(stats)) => info!(
            "OSC listener finished: {} datagrams, {} accepted, {} rejected, {} undecodable",
            stats.datagrams, stats.accepted, stats.rejected, stats.decode_errors
        ),
        Ok(Err(e)) => error!("OSC listener failed: {}", e),
        Err(e) => warn!("OSC listener task panicked: {}", e),
    }
}
