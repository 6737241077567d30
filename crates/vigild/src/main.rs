//! vigild - host service monitor daemon.
//!
//! Loads service declarations from a TOML file and validates them once
//! per cycle: processes, files, directories, fifos, filesystems,
//! programs, remote hosts and the system itself. State-transition events
//! go to the log; alert delivery and the control surface are separate
//! concerns.

mod config;

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::{debug, error, info, Level};
use tracing_subscriber::EnvFilter;

use vigil_core::event::LogSink;
use vigil_core::platform::SystemPlatform;
use vigil_core::Validator;

/// Host service monitor daemon.
#[derive(Parser)]
#[command(name = "vigild", about = "Host service monitor daemon", version)]
struct Args {
    /// Path to the service declarations file.
    #[arg(short, long, default_value = "/etc/vigil/services.toml")]
    config: PathBuf,

    /// Validation cycle interval in seconds.
    #[arg(short, long, default_value = "30")]
    interval: u64,

    /// Path to /proc filesystem (for testing/mocking).
    #[arg(long, default_value = "/proc")]
    proc_path: String,

    /// Disable per-process data collection (state, pid, resources);
    /// liveness and port tests still run.
    #[arg(long)]
    no_process_data: bool,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

/// Initializes the tracing subscriber with the appropriate log level.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("vigild={}", level).parse().expect("static directive"))
        .add_directive(format!("vigil_core={}", level).parse().expect("static directive"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    info!("vigild {} starting", env!("CARGO_PKG_VERSION"));
    info!(
        "Config: file={}, interval={}s, proc={}",
        args.config.display(),
        args.interval,
        args.proc_path
    );

    let services = match config::load(&args.config) {
        Ok(services) => services,
        Err(e) => {
            error!("cannot load configuration: {}", e);
            std::process::exit(1);
        }
    };
    if services.is_empty() {
        error!("no services declared in {}", args.config.display());
        std::process::exit(1);
    }
    info!("Monitoring {} service(s)", services.len());

    let platform = SystemPlatform::new(&args.proc_path);
    let mut validator = Validator::new(platform, LogSink);
    validator.collect_process_data = !args.no_process_data;
    for service in services {
        debug!(service = %service.name, kind = ?service.kind, "service registered");
        validator.add_service(service);
    }

    // Graceful shutdown: the flag is checked between services inside a
    // cycle and between cycles here.
    let stopped = validator.stop_flag();
    {
        let stopped = stopped.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            info!("Received shutdown signal");
            stopped.store(true, Ordering::SeqCst);
        }) {
            error!("Failed to set signal handler: {}", e);
        }
    }

    let interval = Duration::from_secs(args.interval.max(1));
    let mut cycles: u64 = 0;

    info!("Starting validation loop");
    while !stopped.load(Ordering::SeqCst) {
        let started = Instant::now();
        let errors = validator.cycle();
        cycles += 1;
        if errors > 0 {
            info!(
                "Cycle #{}: {} service(s) failed ({} ms)",
                cycles,
                errors,
                started.elapsed().as_millis()
            );
        } else {
            debug!(
                "Cycle #{}: all services passed ({} ms)",
                cycles,
                started.elapsed().as_millis()
            );
        }

        // Sleep in short slices so shutdown stays responsive.
        let mut remaining = interval;
        while !stopped.load(Ordering::SeqCst) && !remaining.is_zero() {
            let slice = remaining.min(Duration::from_millis(500));
            std::thread::sleep(slice);
            remaining = remaining.saturating_sub(slice);
        }
    }

    info!("vigild stopped after {} cycle(s)", cycles);
}
