//! Serial device discovery.
//!
//! Every call re-scans the host. Only devices following the platform's naming
//! convention for USB serial adapters are listed, sorted by path.

use log::debug;
use serialport::{SerialPortInfo, SerialPortType};

use crate::error::{Error, Result};

/// Path prefixes of USB serial adapters on this platform.
#[cfg(target_os = "linux")]
pub const DEVICE_PREFIXES: &[&str] = &["/dev/ttyUSB", "/dev/ttyACM"];
// Only the calling-unit nodes; /dev/tty.* blocks on open waiting for carrier.
#[cfg(target_os = "macos")]
pub const DEVICE_PREFIXES: &[&str] = &["/dev/cu."];
#[cfg(windows)]
pub const DEVICE_PREFIXES: &[&str] = &["COM"];
#[cfg(not(any(target_os = "linux", target_os = "macos", windows)))]
pub const DEVICE_PREFIXES: &[&str] = &["/dev/tty"];

/// A candidate device. Metadata the host does not provide is left empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialDevice {
    pub manufacturer: String,
    pub product: String,
    pub path: String,
}

impl SerialDevice {
    /// Human-readable label, e.g. `"FTDI FT232R (/dev/ttyUSB0)"`.
    pub fn label(&self) -> String {
        let description = [self.manufacturer.as_str(), self.product.as_str()]
            .iter()
            .filter(|s| !s.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(" ");
        if description.is_empty() {
            self.path.clone()
        } else {
            format!("{} ({})", description, self.path)
        }
    }
}

impl From<SerialPortInfo> for SerialDevice {
    fn from(info: SerialPortInfo) -> Self {
        let (manufacturer, product) = match info.port_type {
            SerialPortType::UsbPort(usb) => (usb.manufacturer, usb.product),
            SerialPortType::PciPort | SerialPortType::BluetoothPort | SerialPortType::Unknown => {
                (None, None)
            }
        };
        Self {
            manufacturer: manufacturer.unwrap_or_default(),
            product: product.unwrap_or_default(),
            path: info.port_name,
        }
    }
}

/// Lists candidate devices on this host.
pub fn list_devices() -> Result<Vec<SerialDevice>> {
    let ports = serialport::available_ports().map_err(Error::Enumerate)?;
    let total = ports.len();
    let devices = select_devices(ports, DEVICE_PREFIXES);
    debug!("[device] {} of {} serial ports match", devices.len(), total);
    Ok(devices)
}

/// Keeps ports whose path starts with one of `prefixes`, sorted and
/// de-duplicated by path.
pub fn select_devices(ports: Vec<SerialPortInfo>, prefixes: &[&str]) -> Vec<SerialDevice> {
    let mut devices: Vec<SerialDevice> = ports
        .into_iter()
        .filter(|p| prefixes.iter().any(|prefix| p.port_name.starts_with(prefix)))
        .map(SerialDevice::from)
        .collect();
    devices.sort_by(|a, b| a.path.cmp(&b.path));
    devices.dedup_by(|a, b| a.path == b.path);
    devices
}
