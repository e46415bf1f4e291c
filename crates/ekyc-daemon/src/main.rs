//! ekyc-daemon - sharded eKYC identity-verification engine.
//!
//! Loads the TOML config, builds the store and UDP transport, starts the
//! engine and runs until a shutdown signal (SIGINT/SIGTERM) or end of
//! input on stdin. Exit code 0 is a clean stop; any construction failure
//! exits 1 before a single thread starts.

use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use ekyc_core::config::EngineConfig;
use ekyc_core::store::{SqliteStore, Store};
use ekyc_daemon::engine::Engine;
use ekyc_daemon::logging::RollingFileWriter;
use ekyc_daemon::transport::udp::UdpTransport;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Set by the signal handler and the stdin watcher.
static SHUTDOWN: AtomicBool = AtomicBool::new(false);

/// How often the main loop wakes to check the shutdown flag.
const SHUTDOWN_POLL: Duration = Duration::from_millis(500);

/// Main-loop wakeups between periodic counter log lines.
const COUNTER_LOG_TICKS: u32 = 60;

/// Sharded eKYC identity-verification engine.
#[derive(Parser, Debug)]
#[command(name = "ekyc-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the engine configuration file
    #[arg(short, long, default_value = "ekyc.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Override the log directory from the config file
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ekyc-daemon: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    let mut config = EngineConfig::load(&args.config)
        .with_context(|| format!("loading config {}", args.config.display()))?;
    if let Some(dir) = args.log_dir {
        config.log.dir = Some(dir);
    }
    let _log_guard = init_tracing(&args.log_level, &config)?;

    let store: Arc<dyn Store> = Arc::new(match &config.store.path {
        Some(path) => SqliteStore::open(path)
            .with_context(|| format!("opening store {}", path.display()))?,
        None => SqliteStore::in_memory().context("opening in-memory store")?,
    });

    let transport = UdpTransport::new();
    let mut engine =
        Engine::new(config, &transport, store).context("constructing engine")?;
    engine.start().context("starting engine")?;

    install_signal_handlers().context("installing signal handlers")?;
    watch_stdin();

    let mut ticks = 0u32;
    while !SHUTDOWN.load(Ordering::Acquire) {
        thread::sleep(SHUTDOWN_POLL);
        ticks += 1;
        if ticks % COUNTER_LOG_TICKS == 0 {
            info!(counters = ?engine.counters(), "engine heartbeat");
        }
    }

    info!("shutdown requested");
    engine.stop();
    Ok(())
}

/// Routes the filtered log stream to stdout and, when configured, to a
/// size-rotated file in the log directory.
fn init_tracing(
    log_level: &str,
    config: &EngineConfig,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = EnvFilter::try_new(log_level)
        .with_context(|| format!("invalid log level {log_level:?}"))?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if let Some(dir) = &config.log.dir {
        let writer = RollingFileWriter::open(dir, config.log.rotate_size)
            .with_context(|| format!("opening log file in {}", dir.display()))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(writer);
        builder.with_writer(non_blocking).with_ansi(false).init();
        Ok(Some(guard))
    } else {
        builder.init();
        Ok(None)
    }
}

extern "C" fn on_shutdown_signal(_signal: i32) {
    SHUTDOWN.store(true, Ordering::Release);
}

/// Flags SIGINT and SIGTERM into the shutdown atomic.
fn install_signal_handlers() -> Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(on_shutdown_signal),
        SaFlags::empty(),
        SigSet::empty(),
    );
    unsafe {
        signal::sigaction(Signal::SIGINT, &action).context("sigaction(SIGINT)")?;
        signal::sigaction(Signal::SIGTERM, &action).context("sigaction(SIGTERM)")?;
    }
    Ok(())
}

/// Treats end of input (or a bare newline) on stdin as a shutdown request,
/// so an operator at a terminal can stop the daemon with Enter.
fn watch_stdin() {
    thread::spawn(|| {
        let stdin = std::io::stdin();
        let mut line = String::new();
        let _ = stdin.lock().read_line(&mut line);
        SHUTDOWN.store(true, Ordering::Release);
    });
}
