//! tcp-oneshot: run one side of a single TCP request/response exchange.
//!
//! - `listen`: accept one connection, save the request, send the reply file
//! - `connect`: send the request file, save the reply
//!
//! Configuration via CLI arguments or TOML file. Ctrl-C aborts a pending
//! accept, connect, send or receive; a second Ctrl-C exits immediately.

use std::process::ExitCode;
use tcp_oneshot::config::{Config, ConnectConfig, ListenConfig, Mode};
use tcp_oneshot::{CancelHandle, Connector, ExchangeError, FileArtifact, Listener};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Exit status after an interrupt that could not be routed to a wait.
const INTERRUPTED: i32 = 130;

fn main() -> ExitCode {
    // Load configuration
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let result = match config.mode {
        Mode::Listen(listen) => run_listener(listen),
        Mode::Connect(connect) => run_connector(connect),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Exchange failed");
            ExitCode::FAILURE
        }
    }
}

fn run_listener(config: ListenConfig) -> Result<(), ExchangeError> {
    info!(
        listen = %config.endpoint,
        backlog = config.options.backlog,
        buffer_size = config.options.buffer_size,
        inbound = %config.inbound.display(),
        outbound = %config.outbound.display(),
        "Starting listener"
    );

    let mut listener = Listener::bind(&config.endpoint, config.options)?;
    install_interrupt_handler(listener.cancel_handle());

    let inbound = FileArtifact::new(config.inbound);
    let outbound = FileArtifact::new(config.outbound);
    let result = listener.serve_once(&inbound, &outbound);

    if let Ok(ref report) = result {
        info!(
            peer = %report.peer,
            received = report.received,
            sent = report.sent,
            "Exchange complete"
        );
    }
    info!("Listener stopped");
    result.map(|_| ())
}

fn run_connector(config: ConnectConfig) -> Result<(), ExchangeError> {
    info!(
        connect = %config.endpoint,
        buffer_size = config.options.buffer_size,
        outbound = %config.outbound.display(),
        inbound = %config.inbound.display(),
        "Starting connector"
    );

    let mut connector = Connector::new(config.endpoint, config.options)?;
    install_interrupt_handler(connector.cancel_handle());

    let outbound = FileArtifact::new(config.outbound);
    let inbound = FileArtifact::new(config.inbound);
    let result = connector.request_once(&outbound, &inbound);

    if let Ok(ref report) = result {
        info!(
            peer = %report.peer,
            sent = report.sent,
            received = report.received,
            "Exchange complete"
        );
    }
    info!("Connector stopped");
    result.map(|_| ())
}

/// Route Ctrl-C to the pending wait so the connection is released cleanly.
///
/// A blocking write that outlasts the first interrupt is ended by the second.
fn install_interrupt_handler(handle: CancelHandle) {
    let result = ctrlc::set_handler(move || {
        if handle.is_cancelled() {
            std::process::exit(INTERRUPTED);
        }
        handle.cancel();
    });
    if let Err(e) = result {
        warn!(error = %e, "Failed to install Ctrl-C handler");
    }
}
