//! Windows backend over the COMM API.
//!
//! COM ports are opened without sharing, which makes them exclusive. The DCB
//! carries the line settings and COMMTIMEOUTS the per-read budget; a read that
//! returns nothing within it comes back from `serialport` as TimedOut.
//!
//! The DCB a port had before we opened it is read with a short-lived handle
//! and written back with SetCommState on close.

use std::ffi::OsStr;
use std::io;
use std::iter;
use std::os::windows::ffi::OsStrExt;
use std::os::windows::io::AsRawHandle;
use std::ptr;
use std::time::Duration;

use log::{debug, info, warn};
use serialport::{COMPort, ClearBuffer, SerialPort};
use windows_sys::Win32::Devices::Communication::{GetCommState, SetCommState, DCB};
use windows_sys::Win32::Foundation::{CloseHandle, GENERIC_READ, GENERIC_WRITE, HANDLE, INVALID_HANDLE_VALUE};
use windows_sys::Win32::Storage::FileSystem::{CreateFileW, FILE_ATTRIBUTE_NORMAL, OPEN_EXISTING};

use super::{read_frame, LineSettings, PortBackend, PortError, PortHandle};
use crate::frame::FRAME_LEN;

// ReadFile status once a USB adapter has been pulled.
const ERROR_ACCESS_DENIED: i32 = 5;
const ERROR_BAD_COMMAND: i32 = 22;
const ERROR_OPERATION_ABORTED: i32 = 995;
const ERROR_DEVICE_NOT_CONNECTED: i32 = 1167;

#[derive(Debug, Default)]
pub struct WindowsBackend {
    settings: LineSettings,
}

impl WindowsBackend {
    pub fn new(settings: LineSettings) -> Self {
        Self { settings }
    }
}

/// An open COM port and the DCB it had before we programmed it.
pub struct WindowsPort {
    com: COMPort,
    prior: Option<DCB>,
}

// COM ports are exclusive, so the current DCB is read before serialport
// opens the device and the probing handle is closed again.
fn save_settings(path: &str) -> io::Result<DCB> {
    let device = if path.starts_with(r"\\.\") {
        path.to_string()
    } else {
        format!(r"\\.\{}", path)
    };
    let wide: Vec<u16> = OsStr::new(&device).encode_wide().chain(iter::once(0)).collect();

    // SAFETY: `wide` is NUL-terminated and outlives the call; the handle is
    // closed on every path below.
    unsafe {
        let handle = CreateFileW(
            wide.as_ptr(),
            GENERIC_READ | GENERIC_WRITE,
            0,
            ptr::null(),
            OPEN_EXISTING,
            FILE_ATTRIBUTE_NORMAL,
            ptr::null_mut(),
        );
        if handle == INVALID_HANDLE_VALUE {
            return Err(io::Error::last_os_error());
        }

        let mut dcb: DCB = std::mem::zeroed();
        dcb.DCBlength = std::mem::size_of::<DCB>() as u32;
        let ok = GetCommState(handle, &mut dcb) != 0;
        let err = io::Error::last_os_error();
        CloseHandle(handle);
        if ok {
            Ok(dcb)
        } else {
            Err(err)
        }
    }
}

fn restore_settings(port: &COMPort, dcb: &DCB) -> io::Result<()> {
    // SAFETY: the raw handle belongs to `port`, which is alive for the call.
    let ok = unsafe { SetCommState(port.as_raw_handle() as HANDLE, dcb) != 0 };
    if ok {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

impl PortBackend for WindowsBackend {
    type Port = WindowsPort;

    fn open(&mut self, path: &str) -> Result<PortHandle<WindowsPort>, PortError> {
        let prior = match save_settings(path) {
            Ok(dcb) => Some(dcb),
            Err(e) => {
                warn!("[serial] could not save line settings of {}: {}", path, e);
                None
            }
        };

        let port = self
            .settings
            .builder(path, Duration::from_secs(1))
            .open_native()
            .map_err(|source| PortError::Open {
                path: path.to_string(),
                source,
            })?;

        if let Err(e) = port.clear(ClearBuffer::Input) {
            warn!("[serial] could not purge input on {}: {}", path, e);
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
        Ok(PortHandle::new(path, WindowsPort { com: port, prior }))
    }

    fn read_with_timeout(
        &mut self,
        handle: &mut PortHandle<WindowsPort>,
        timeout: Duration,
    ) -> Result<[u8; FRAME_LEN], PortError> {
        let result = read_frame(&mut handle.port_mut()?.com, timeout, classify);
        if let Err(PortError::Eof) = result {
            if handle.release().is_some() {
                info!("[serial] {} removed, port released", handle.path());
            }
        }
        result
    }

    fn close(&mut self, handle: &mut PortHandle<WindowsPort>) {
        let Some(port) = handle.release() else {
            debug!("[serial] {} already closed", handle.path());
            return;
        };

        if let Err(e) = port.com.clear(ClearBuffer::All) {
            warn!("[serial] could not purge {} on close: {}", handle.path(), e);
        }
        if let Some(dcb) = &port.prior {
            if let Err(e) = restore_settings(&port.com, dcb) {
                warn!("[serial] could not restore line settings of {}: {}", handle.path(), e);
            }
        }
        drop(port);
        info!("[serial] closed {}", handle.path());
    }
}

fn classify(err: io::Error) -> PortError {
    match err.raw_os_error() {
        Some(ERROR_ACCESS_DENIED)
        | Some(ERROR_BAD_COMMAND)
        | Some(ERROR_OPERATION_ABORTED)
        | Some(ERROR_DEVICE_NOT_CONNECTED) => PortError::Eof,
        _ => match err.kind() {
            io::ErrorKind::BrokenPipe | io::ErrorKind::UnexpectedEof => PortError::Eof,
            _ => PortError::Io(err),
        },
    }
}
