//! Load-driver binary.
//!
//! Opens the configured number of concurrent connections, issues timed
//! requests on each, writes per-window latency samples to the results CSV,
//! and prints the mean per-connection completion time.

use evbench::client;
use evbench::config::ClientConfig;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ClientConfig::load()?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        message_size = config.message_size,
        message_count = config.message_count,
        clients = config.clients,
        timeout_secs = config.timeout,
        output = %config.output.display(),
        "Starting evbench client"
    );

    let summary = client::run(&config)?;

    if summary.failed > 0 {
        warn!(failed = summary.failed, "Some client threads failed");
    }
    println!(
        "Average connection time: {} seconds",
        summary.mean_connection_time.as_secs_f64()
    );
    Ok(())
}
