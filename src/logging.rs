//! Line logger behind the `log` facade.
//!
//! Each record becomes one `HH:MM:SS.mmm LEVEL message` line on stderr, or
//! in an append-mode file while the terminal UI owns the screen.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Local};
use log::{LevelFilter, Log, Metadata, Record};

use crate::error::Result;

/// Where log lines go: stderr, or a file while the terminal UI owns the screen.
enum Sink {
    Stderr,
    File(File),
}

/// Timestamped logger. Prepends `HH:MM:SS.mmm` local time to every line.
pub struct Logger {
    level: LevelFilter,
    sink: Mutex<Sink>,
}

impl Logger {
    fn write_line(&self, line: &str) {
        let mut sink = self.sink.lock().unwrap_or_else(|e| e.into_inner());
        match &mut *sink {
            Sink::Stderr => eprintln!("{}", line),
            Sink::File(file) => {
                let _ = writeln!(file, "{}", line);
            }
        }
    }
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format_line(Local::now(), record.level(), record.args());
        self.write_line(&line);
    }

    fn flush(&self) {
        let mut sink = self.sink.lock().unwrap_or_else(|e| e.into_inner());
        if let Sink::File(file) = &mut *sink {
            let _ = file.flush();
        }
    }
}

/// Installs the process-wide logger.
///
/// With `file`, lines are appended to that file instead of stderr.
pub fn init(level: LevelFilter, file: Option<&Path>) -> Result<()> {
    let sink = match file {
        Some(path) => Sink::File(OpenOptions::new().create(true).append(true).open(path)?),
        None => Sink::Stderr,
    };

    log::set_boxed_logger(Box::new(Logger {
        level,
        sink: Mutex::new(sink),
    }))?;
    log::set_max_level(level);

    if let Some(path) = file {
        log::info!("[logging] file logging started: {}", path.display());
    }
    Ok(())
}

fn format_line(now: DateTime<Local>, level: log::Level, args: &std::fmt::Arguments) -> String {
    format!("{} {:<5} {}", now.format("%H:%M:%S%.3f"), level, args)
}
