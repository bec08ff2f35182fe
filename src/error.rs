//! Crate-level error type.
//!
//! Link failures never reach this type while a session is running; the
//! supervisor turns them into [`ConnectionStatus`](crate::session::ConnectionStatus)
//! transitions instead. What is left here are the failures a caller asks for
//! directly: listing devices, spawning or stopping a worker, exporting, and
//! installing the logger.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The host refused to enumerate serial devices.
    #[error("could not enumerate serial devices: {0}")]
    Enumerate(#[source] serialport::Error),

    /// The operating system refused to start the worker thread.
    #[error("could not spawn supervisor worker: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("supervisor worker panicked")]
    WorkerPanicked,

    /// The worker was already stopped, e.g. by a rebind that could not
    /// start its replacement.
    #[error("supervisor worker already stopped")]
    WorkerStopped,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("logger already installed: {0}")]
    Logger(#[from] log::SetLoggerError),
}

pub type Result<T> = std::result::Result<T, Error>;
