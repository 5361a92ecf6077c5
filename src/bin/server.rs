//! Benchmark server binary.
//!
//! Picks one event-handling strategy from the command line (or config
//! file), serves until interrupted, then prints the peak concurrent
//! connection count and per-client traffic totals.

use evbench::config::{ServerConfig, ServerMode};
use evbench::registry::ConnectionRegistry;
use evbench::runtime::Mechanism;
use evbench::server::{EventServer, ThreadedServer};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::sync::Arc;
use std::thread;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::load()?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        mode = ?config.mode,
        workers = config.workers,
        max_queue = config.max_queue,
        "Starting evbench server"
    );

    let registry = Arc::new(ConnectionRegistry::new());

    match config.mode {
        ServerMode::Threads => run_threaded(&config, registry),
        mode => run_event(&config, mode, registry),
    }
}

/// Event-driven dispatch over the requested readiness mechanism.
fn run_event(
    config: &ServerConfig,
    mode: ServerMode,
    registry: Arc<ConnectionRegistry>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mechanism = match mode {
        ServerMode::Epoll => Mechanism::Epoll,
        ServerMode::Kqueue => Mechanism::Kqueue,
        ServerMode::Poll => Mechanism::Poll,
        ServerMode::Select => Mechanism::Select,
        ServerMode::Threads => unreachable!("handled by caller"),
    };

    // Surfaces MechanismUnavailable (with the list of alternatives) before
    // anything binds.
    let poller = mechanism.poller()?;
    info!(mechanism = mechanism.name(), "Using event mechanism");

    let server = EventServer::bind(config, poller, registry)?;
    let handle = server.shutdown_handle();

    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    thread::Builder::new()
        .name("shutdown-listener".into())
        .spawn(move || {
            if signals.forever().next().is_some() {
                info!("Shutdown signal received");
                handle.request();
            }
        })?;

    server.run()?;
    Ok(())
}

/// Thread-per-connection mode; the accept loop never returns on its own, so
/// the signal thread prints the report and exits the process.
fn run_threaded(
    config: &ServerConfig,
    registry: Arc<ConnectionRegistry>,
) -> Result<(), Box<dyn std::error::Error>> {
    let server = ThreadedServer::bind(config, Arc::clone(&registry))?;

    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    thread::Builder::new()
        .name("shutdown-listener".into())
        .spawn(move || {
            if signals.forever().next().is_some() {
                info!("Shutdown signal received");
                print!("{}", registry.render_report());
                std::process::exit(0);
            }
        })?;

    server.run()?;
    Ok(())
}
