//! # Multimeter Reader Library
//!
//! This library reads a multimeter over its serial link. It decodes the
//! 14-byte frames the meter streams into typed readings, and it supervises
//! the connection so that a missing device, a silent meter or a pulled cable
//! ends a session without taking the process down.
//!
//! The pieces, leaves first:
//!
//! - [`frame`]: pure decoder from raw bytes to a [`Frame`].
//! - [`device`]: lists candidate serial devices.
//! - [`backend`]: platform primitives (open, timed read, close) behind
//!   [`PortBackend`].
//! - [`session`]: the state shared between the worker and its readers.
//! - [`supervisor`]: the worker that runs the connection state machine.
//! - [`export`]: CSV dump of a frame log.
//!
//! ```no_run
//! use mm_reader::{NativeBackend, Supervisor, SupervisorConfig};
//!
//! let supervisor = Supervisor::spawn(NativeBackend::default(), "/dev/ttyUSB0", SupervisorConfig::default())?;
//! supervisor.connect();
//! let updates = supervisor.session().subscribe();
//! while updates.recv().is_ok() {
//!     if let Some(frame) = supervisor.session().frames().latest() {
//!         println!("{}", frame);
//!     }
//! }
//! # Ok::<(), mm_reader::Error>(())
//! ```

pub mod backend;
pub mod device;
pub mod error;
pub mod export;
pub mod frame;
pub mod logging;
pub mod session;
pub mod supervisor;

pub use backend::{LineSettings, NativeBackend, PortBackend, PortError, PortHandle};
pub use device::{list_devices, SerialDevice};
pub use error::{Error, Result};
pub use frame::{Base, Cell, DecodeFault, Digit, Frame, Prefix, Unit, FRAME_LEN};
pub use session::{ConnectionStatus, FrameLog, Notification, Session, Severity};
pub use supervisor::{Supervisor, SupervisorConfig};
