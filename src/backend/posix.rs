//! POSIX backend over termios-configured tty devices.
//!
//! The tty is opened with an exclusive lock (TIOCEXCL), raw mode and RTS/CTS
//! flow control. Timeouts are applied through poll() inside `serialport`, not
//! through VTIME, so one read call waits for the whole frame budget.
//!
//! The termios state the device had before we opened it is read through a
//! second descriptor and written back on close.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::time::Duration;

use log::{debug, info, warn};
use nix::fcntl::OFlag;
use nix::sys::termios::{self, SetArg, Termios};
use serialport::{ClearBuffer, SerialPort, TTYPort};

use super::{read_frame, LineSettings, PortBackend, PortError, PortHandle};
use crate::frame::FRAME_LEN;

#[derive(Debug, Default)]
pub struct PosixBackend {
    settings: LineSettings,
}

impl PosixBackend {
    pub fn new(settings: LineSettings) -> Self {
        Self { settings }
    }
}

/// An open tty and the settings it had before we programmed it.
#[derive(Debug)]
pub struct PosixPort {
    tty: TTYPort,
    prior: Option<PriorSettings>,
}

#[derive(Debug)]
struct PriorSettings {
    // Opened before TIOCEXCL is set, so it stays usable after.
    file: File,
    termios: Termios,
}

fn save_settings(path: &str) -> io::Result<PriorSettings> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags((OFlag::O_NOCTTY | OFlag::O_NONBLOCK).bits())
        .open(path)?;
    let termios = termios::tcgetattr(&file)?;
    Ok(PriorSettings { file, termios })
}

impl PortBackend for PosixBackend {
    type Port = PosixPort;

    fn open(&mut self, path: &str) -> Result<PortHandle<PosixPort>, PortError> {
        let open_error = |source| PortError::Open {
            path: path.to_string(),
            source,
        };

        let prior = match save_settings(path) {
            Ok(prior) => Some(prior),
            Err(e) => {
                warn!("[serial] could not save line settings of {}: {}", path, e);
                None
            }
        };

        let mut port = self
            .settings
            .builder(path, Duration::from_secs(1))
            .open_native()
            .map_err(open_error)?;
        port.set_exclusive(true).map_err(open_error)?;

        // Drop whatever the meter sent before we were listening.
        if let Err(e) = port.clear(ClearBuffer::Input) {
            warn!("[serial] could not flush input on {}: {}", path, e);
        }

        info!(
            "[serial] opened {} at {} baud ({:?}, {:?}, {:?}, {:?} flow control)",
            path,
            self.settings.baud_rate,
            self.settings.data_bits,
            self.settings.parity,
            self.settings.stop_bits,
            self.settings.flow_control
        );
        Ok(PortHandle::new(path, PosixPort { tty: port, prior }))
    }

    fn read_with_timeout(
        &mut self,
        handle: &mut PortHandle<PosixPort>,
        timeout: Duration,
    ) -> Result<[u8; FRAME_LEN], PortError> {
        let result = read_frame(&mut handle.port_mut()?.tty, timeout, classify);
        if let Err(PortError::Eof) = result {
            if handle.release().is_some() {
                info!("[serial] {} hung up, port released", handle.path());
            }
        }
        result
    }

    fn close(&mut self, handle: &mut PortHandle<PosixPort>) {
        let Some(mut port) = handle.release() else {
            debug!("[serial] {} already closed", handle.path());
            return;
        };

        if let Err(e) = port.tty.clear(ClearBuffer::All) {
            warn!("[serial] could not flush {} on close: {}", handle.path(), e);
        }
        if let Some(prior) = &port.prior {
            if let Err(e) = termios::tcsetattr(&prior.file, SetArg::TCSANOW, &prior.termios) {
                warn!("[serial] could not restore line settings of {}: {}", handle.path(), e);
            }
        }
        if let Err(e) = port.tty.set_exclusive(false) {
            warn!("[serial] could not release lock on {}: {}", handle.path(), e);
        }
        drop(port);
        info!("[serial] closed {}", handle.path());
    }
}

// poll() reports a hangup as BrokenPipe once the adapter is unplugged.
fn classify(err: io::Error) -> PortError {
    match err.kind() {
        io::ErrorKind::BrokenPipe | io::ErrorKind::UnexpectedEof => PortError::Eof,
        _ => PortError::Io(err),
    }
}
