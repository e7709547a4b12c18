//! Sirocco worker
//!
//! Drives the fan-control core: finds the fan controller on a serial
//! port, keeps the temperature helper process alive, and runs the
//! control loop that turns temperature readings into duty commands.
//!
//! The presentation layer (GUI or otherwise) is expected to share the
//! settings, manual controls, and read-outs; this binary stands alone
//! by draining the log queue into its own log output.

mod control;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

use sirocco_core::{
    default_settings_path, log_queue, ManualControls, Readouts, Settings, Ticker, TokioTicker,
    NUM_FANS,
};
use sirocco_hardware::NativeBackend;

/// Name of the temperature helper executable, expected beside the
/// running binary unless overridden.
const HELPER_EXECUTABLE: &str = "sirocco-temps";

/// Sirocco fan control worker
#[derive(Parser, Debug)]
#[command(name = "siroccod")]
#[command(version, about = "Sirocco fan control worker", long_about = None)]
struct Args {
    /// Path to the settings file
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// Path to the temperature helper executable
    #[arg(long)]
    helper: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_tracing(args.verbose);

    info!("siroccod starting...");

    let settings_path = args.settings.unwrap_or_else(default_settings_path);
    info!("Settings file: {}", settings_path.display());

    let settings = match Settings::load(&settings_path) {
        Ok(settings) => {
            info!("Loaded settings from {}", settings_path.display());
            settings
        }
        Err(e) => {
            warn!(
                "Failed to load settings from {}: {}",
                settings_path.display(),
                e
            );
            let settings = Settings::default();
            settings.mark_dirty();
            settings
        }
    };
    let settings = Arc::new(settings);

    let helper_path = match args.helper {
        Some(path) => path,
        None => default_helper_path()?,
    };
    info!("Temperature helper: {}", helper_path.display());

    let manual_values: [f32; NUM_FANS] = std::array::from_fn(|fan| settings.manual_duty(fan));
    let manual = Arc::new(ManualControls::with_values(manual_values));
    let readouts = Arc::new(Readouts::default());

    let exit = Arc::new(AtomicBool::new(false));
    let ticker: Arc<dyn Ticker> = Arc::new(TokioTicker::new(exit.clone()));
    let (log, mut drain) = log_queue();

    // Stand-in for the log pane: forward queued records to the log.
    let drain_task = tokio::spawn(async move {
        while let Some(record) = drain.next().await {
            info!("{}", record.as_str());
        }
    });

    let ctx = control::ControlContext {
        backend: NativeBackend,
        settings,
        settings_path,
        manual,
        readouts,
        ticker,
        log,
        helper_path,
    };
    let worker = tokio::spawn(control::run(ctx));

    shutdown_signal().await;
    info!("Shutting down...");
    exit.store(true, Ordering::Release);

    let _ = worker.await;
    drain_task.abort();

    info!("siroccod shutdown complete");
    Ok(())
}

/// Resolve the helper executable as a sibling of the running binary.
fn default_helper_path() -> Result<PathBuf> {
    let exe = std::env::current_exe()?;
    let dir = exe
        .parent()
        .ok_or_else(|| anyhow::anyhow!("executable has no parent directory"))?;
    Ok(dir.join(format!(
        "{}{}",
        HELPER_EXECUTABLE,
        std::env::consts::EXE_SUFFIX
    )))
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully...");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully...");
        },
    }
}

/// Initialize tracing subscriber for logging
fn init_tracing(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
