mod monitor;

use std::path::{Path, PathBuf};
use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::LevelFilter;
use mm_reader::{device, export, logging, ConnectionStatus, NativeBackend, Supervisor, SupervisorConfig};

/// Live readout for serial-linked multimeters.
#[derive(Parser, Debug)]
#[command(name = "reader_cli", version, about)]
struct Cli {
    /// Serial device to read from (default: first detected adapter)
    #[arg(short, long)]
    device: Option<String>,

    /// List detected devices and exit
    #[arg(long)]
    list: bool,

    /// Print one line per reading instead of the terminal UI
    #[arg(long)]
    plain: bool,

    /// Connect immediately on start
    #[arg(long)]
    connect: bool,

    /// CSV file for exported readings
    #[arg(short, long)]
    export: Option<PathBuf>,

    /// Append log lines to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

const DEFAULT_EXPORT: &str = "readings.csv";
const DEFAULT_UI_LOG: &str = "reader_cli.log";

// The main entry point for the command-line reader application.
fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    // The terminal UI owns the screen, so its log always goes to a file.
    let log_file = match (&cli.log_file, cli.plain || cli.list) {
        (Some(path), _) => Some(path.clone()),
        (None, true) => None,
        (None, false) => Some(PathBuf::from(DEFAULT_UI_LOG)),
    };
    logging::init(level, log_file.as_deref()).context("could not start logging")?;

    let devices = device::list_devices().context("could not list serial devices")?;

    if cli.list {
        if devices.is_empty() {
            println!("No serial devices found.");
        }
        for (i, dev) in devices.iter().enumerate() {
            println!("  {}: {}", i, dev.label());
        }
        return Ok(());
    }

    let device = cli
        .device
        .clone()
        .or_else(|| devices.first().map(|d| d.path.clone()))
        .context("no serial device found; pass --device")?;

    let supervisor = Supervisor::spawn(NativeBackend::default(), device, SupervisorConfig::default())?;
    if cli.connect || cli.plain {
        supervisor.connect();
    }

    if cli.plain {
        run_plain(supervisor, cli.export.as_deref())
    } else {
        let export_path = cli.export.unwrap_or_else(|| PathBuf::from(DEFAULT_EXPORT));
        monitor::run(supervisor, devices, export_path)
    }
}

// Prints readings until the link drops, then exports if asked to.
fn run_plain(supervisor: Supervisor<NativeBackend>, export_path: Option<&Path>) -> Result<()> {
    let session = supervisor.session().clone();
    let updates = session.subscribe();
    println!("Reading from {}. Press Ctrl+C to exit.", session.device());

    let mut printed = 0;
    let mut last_status = session.status();
    loop {
        match updates.recv_timeout(Duration::from_millis(250)) {
            Ok(_) | Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        for frame in session.frames().since(printed) {
            println!("{}  {}", frame.timestamp.format("%H:%M:%S%.3f"), frame);
            printed += 1;
        }

        let status = session.status();
        if status != last_status {
            println!("[{}]", status);
            last_status = status;
        }
        if status == ConnectionStatus::Closed && !session.want_connected() {
            if let Some(failure) = session.last_failure() {
                eprintln!("[ERROR] {}: {}", session.device(), failure);
            }
            break;
        }
    }

    if let Some(path) = export_path {
        let rows = export::export_to_path(path, session.frames())
            .with_context(|| format!("could not export to {}", path.display()))?;
        println!("Exported {} readings to {}", rows, path.display());
    }

    supervisor.shutdown()?;
    Ok(())
}
