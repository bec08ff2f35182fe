//! Serial port backends.
//!
//! A backend owns the platform side of the link: opening and configuring the
//! device, timed frame reads, and releasing the device again. The supervisor
//! only ever talks to the `PortBackend` trait, so the platform implementation
//! is picked where the supervisor is built.

use std::io::{self, Read};
use std::time::{Duration, Instant};

use serialport::{DataBits, FlowControl, Parity, SerialPort, SerialPortBuilder, StopBits};
use thiserror::Error;

use crate::frame::FRAME_LEN;

#[cfg(unix)]
pub mod posix;
#[cfg(windows)]
pub mod windows;

#[cfg(unix)]
pub use posix::PosixBackend as NativeBackend;
#[cfg(windows)]
pub use windows::WindowsBackend as NativeBackend;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Error)]
pub enum PortError {
    /// Device missing, busy or not permitted.
    #[error("failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: serialport::Error,
    },
    /// No complete frame arrived within the read budget.
    #[error("no data within {0:?}")]
    Timeout(Duration),
    #[error("read error: {0}")]
    Io(#[from] io::Error),
    /// The device went away; the backend has already released the handle.
    #[error("device disconnected")]
    Eof,
    /// The handle was used after it had been released.
    #[error("port handle already released")]
    Closed,
}

/// Fixed line settings for the meter.
#[derive(Clone, Debug, PartialEq)]
pub struct LineSettings {
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub flow_control: FlowControl,
}

impl Default for LineSettings {
    fn default() -> Self {
        Self {
            baud_rate: 2400,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::Hardware,
        }
    }
}

impl LineSettings {
    /// Builder carrying these settings, ready to open `path`.
    pub fn builder(&self, path: &str, timeout: Duration) -> SerialPortBuilder {
        serialport::new(path, self.baud_rate)
            .data_bits(self.data_bits)
            .parity(self.parity)
            .stop_bits(self.stop_bits)
            .flow_control(self.flow_control)
            .timeout(timeout)
    }
}

/// An open device. Cleared when the backend releases it, so a second close
/// is a no-op.
#[derive(Debug)]
pub struct PortHandle<P> {
    path: String,
    port: Option<P>,
}

impl<P> PortHandle<P> {
    pub fn new(path: impl Into<String>, port: P) -> Self {
        Self {
            path: path.into(),
            port: Some(port),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    pub fn port_mut(&mut self) -> Result<&mut P, PortError> {
        self.port.as_mut().ok_or(PortError::Closed)
    }

    /// Takes the port out of the handle, leaving it closed.
    pub fn release(&mut self) -> Option<P> {
        self.port.take()
    }
}

/// Platform primitives the supervisor drives.
pub trait PortBackend: Send {
    type Port: Send;

    /// Opens `path` exclusively and programs the fixed line settings.
    fn open(&mut self, path: &str) -> Result<PortHandle<Self::Port>, PortError>;

    /// Waits up to `timeout` for one complete frame.
    ///
    /// A timeout leaves the handle open. On [`PortError::Eof`] the backend
    /// has already released the handle.
    fn read_with_timeout(
        &mut self,
        handle: &mut PortHandle<Self::Port>,
        timeout: Duration,
    ) -> Result<[u8; FRAME_LEN], PortError>;

    /// Releases the handle. Failures while tidying up are logged, not
    /// returned.
    fn close(&mut self, handle: &mut PortHandle<Self::Port>);
}

// ============================================================================
// Shared read loop
// ============================================================================

/// Reads exactly one frame, gathering partial reads until `timeout` runs out.
///
/// `classify` maps platform errors that are not timeouts onto `Eof` or `Io`.
pub(crate) fn read_frame<P>(
    port: &mut P,
    timeout: Duration,
    classify: fn(io::Error) -> PortError,
) -> Result<[u8; FRAME_LEN], PortError>
where
    P: SerialPort + ?Sized,
{
    let deadline = Instant::now() + timeout;
    let mut buf = [0u8; FRAME_LEN];
    let mut filled = 0;

    while filled < FRAME_LEN {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(PortError::Timeout(timeout));
        }
        port.set_timeout(remaining)
            .map_err(|e| PortError::Io(io::Error::from(e)))?;

        match port.read(&mut buf[filled..]) {
            Ok(0) => return Err(PortError::Eof),
            Ok(n) => filled += n,
            Err(ref e) if e.kind() == io::ErrorKind::TimedOut => {
                return Err(PortError::Timeout(timeout));
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(classify(e)),
        }
    }

    Ok(buf)
}

// ============================================================================
// Tests
// ============================================================================
