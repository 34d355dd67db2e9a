use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use kbdctl_core::{CancelToken, KbdConfig, KeyboardSession};
use tracing::{debug, error, info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
#[command(author, version, about = "GMK87 keyboard configuration tool", long_about = None)]
struct Args {
    /// Dump the keyboard configuration as hex
    #[arg(long)]
    dump_config: bool,

    /// Set the keyboard clock to the current system time
    #[arg(long)]
    set_time: bool,

    /// Write a trace of every span with timings to FILE
    #[arg(long, value_name = "FILE")]
    trace: Option<PathBuf>,

    /// Load device and timing settings from a TOML file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool, trace: Option<&Path>) -> Result<()> {
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        );

    let trace_layer = match trace {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("failed to create trace file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_span_events(FmtSpan::CLOSE)
                    .with_writer(Mutex::new(file))
                    .with_filter(LevelFilter::TRACE),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(trace_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;
    Ok(())
}

/// Ctrl-C cancels whatever transaction is in flight.
fn setup_interrupt_handler() -> CancelToken {
    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || handler_token.cancel()) {
        warn!(error = %e, "Failed to install Ctrl-C handler");
    }
    cancel
}

fn run(args: &Args, cancel: CancelToken) -> Result<()> {
    let config = match &args.config {
        Some(path) => KbdConfig::load_from_file(path)?,
        None => KbdConfig::default(),
    };
    debug!(?config, "Using configuration");

    let session = KeyboardSession::open(&config, cancel).context("failed to open keyboard")?;
    let result = run_action(args, &session);
    if let Err(e) = session.close() {
        error!(error = %e, "failed to close keyboard");
    }
    result
}

fn run_action<T, O>(args: &Args, session: &KeyboardSession<T, O>) -> Result<()>
where
    T: kbdctl_core::UsbTransport,
    O: kbdctl_core::KbdObserver,
{
    if args.dump_config {
        let image = session.load_config().context("failed to load config")?;
        println!("{}", image);
        return Ok(());
    }

    if args.set_time {
        let now = chrono::Local::now();
        let started = Instant::now();
        let sync = session.set_time(now).context("failed to set time")?;
        info!(
            time = %sync.requested,
            programmed = %sync.programmed,
            took_ms = started.elapsed().as_millis() as u64,
            "time set"
        );
    }

    Ok(())
}

fn main() {
    let args = Args::parse();

    if let Err(e) = init_tracing(args.verbose, args.trace.as_deref()) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }

    let cancel = setup_interrupt_handler();
    if let Err(e) = run(&args, cancel) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }

    println!("OK");
}
