//! Connection supervisor.
//!
//! One background worker drives a [`PortBackend`] through the connection
//! lifecycle:
//!
//! ```text
//!            want_connected
//!  ┌────────┐ ─────────────> ┌────────────┐  open ok   ┌───────────┐
//!  │ Closed │                │ Connecting │ ─────────> │ Connected │ ──┐ frame
//!  └────────┘ <──┐           └────────────┘            └───────────┘ <─┘
//!      ^         │                 │ open failed             │
//!      │         │                 v                         │ timeout / I/O error / EOF
//!      │         └──────── FailedToOpen, Timeout, IoError, Eof <┘
//!      │                                                     │
//!      └──────────── disconnect or shutdown ─────────────────┘
//! ```
//!
//! The worker is steered by two flags on the [`Session`]: `want_connected`
//! (user-level connect/disconnect) and `keep_alive` (stop the worker). Both
//! are polled; the idle wait sleeps [`SupervisorConfig::idle_poll`] between
//! checks and the read loop checks them before every read, so a shutdown is
//! observed within one [`SupervisorConfig::read_timeout`].

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};

use crate::backend::{PortBackend, PortError, PortHandle};
use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::session::{ConnectionStatus, Session};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Budget for one frame read; also the worst-case shutdown latency.
    pub read_timeout: Duration,
    /// Sleep between flag checks while disconnected.
    pub idle_poll: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(1),
            idle_poll: Duration::from_millis(10),
        }
    }
}

/// Owns the worker thread for one session.
///
/// Dropping the supervisor shuts the worker down and joins it.
pub struct Supervisor<B: PortBackend + 'static> {
    session: Arc<Session>,
    config: SupervisorConfig,
    worker: Option<JoinHandle<B>>,
}

impl<B: PortBackend + 'static> Supervisor<B> {
    /// Starts a worker bound to `device`. The link stays closed until
    /// [`connect`](Self::connect) is called.
    pub fn spawn(backend: B, device: impl Into<String>, config: SupervisorConfig) -> Result<Self> {
        let session = Arc::new(Session::new(device));
        let worker = Worker {
            backend,
            session: session.clone(),
            config: config.clone(),
        };

        let handle = thread::Builder::new()
            .name("mm-supervisor".to_string())
            .spawn(move || worker.run())
            .map_err(Error::Spawn)?;

        Ok(Self {
            session,
            config,
            worker: Some(handle),
        })
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn connect(&self) {
        self.session.request_connect();
    }

    pub fn disconnect(&self) {
        self.session.request_disconnect();
    }

    /// Flips the connect request; returns `true` if a connection is now wanted.
    pub fn toggle(&self) -> bool {
        self.session.toggle_connection()
    }

    /// Stops the worker, waits for it and hands the backend back.
    pub fn shutdown(mut self) -> Result<B> {
        self.stop_worker()
    }

    /// Rebinds to another device: stops this worker and starts a fresh one,
    /// with a new session, on the same backend.
    pub fn rebind(&mut self, device: impl Into<String>) -> Result<()> {
        let backend = self.stop_worker()?;
        let fresh = Supervisor::spawn(backend, device, self.config.clone())?;
        *self = fresh;
        Ok(())
    }

    /// `false` once the worker has been stopped and not replaced.
    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    fn stop_worker(&mut self) -> Result<B> {
        self.session.request_shutdown();
        let Some(handle) = self.worker.take() else {
            return Err(Error::WorkerStopped);
        };
        handle.join().map_err(|_| Error::WorkerPanicked)
    }
}

impl<B: PortBackend + 'static> Drop for Supervisor<B> {
    fn drop(&mut self) {
        if self.worker.is_some() {
            if let Err(e) = self.stop_worker() {
                warn!("[supervisor] {}", e);
            }
        }
    }
}

struct Worker<B: PortBackend> {
    backend: B,
    session: Arc<Session>,
    config: SupervisorConfig,
}

impl<B: PortBackend> Worker<B> {
    fn run(mut self) -> B {
        info!("[supervisor] worker started for {}", self.session.device());

        while self.session.keep_alive() {
            if !self.session.want_connected() {
                thread::sleep(self.config.idle_poll);
                continue;
            }
            self.connect_and_stream();
        }

        self.session.set_status(ConnectionStatus::Closed);
        info!("[supervisor] worker stopped for {}", self.session.device());
        self.backend
    }

    fn connect_and_stream(&mut self) {
        self.session.set_status(ConnectionStatus::Connecting);

        let mut handle = match self.backend.open(self.session.device()) {
            Ok(handle) => handle,
            Err(e) => {
                warn!("[supervisor] {}", e);
                self.fail(ConnectionStatus::FailedToOpen);
                return;
            }
        };

        self.session.set_status(ConnectionStatus::Connected);
        match self.stream(&mut handle) {
            ConnectionStatus::Closed => self.session.set_status(ConnectionStatus::Closed),
            failure => self.fail(failure),
        }
    }

    /// Reads until asked to stop or the link fails. Returns `Closed` for a
    /// requested stop, otherwise the failure status.
    fn stream(&mut self, handle: &mut PortHandle<B::Port>) -> ConnectionStatus {
        loop {
            if !self.session.keep_alive() || !self.session.want_connected() {
                self.backend.close(handle);
                return ConnectionStatus::Closed;
            }

            match self.backend.read_with_timeout(handle, self.config.read_timeout) {
                Ok(raw) => {
                    let frame = Frame::decode(&raw, self.session.now());
                    for fault in frame.faults() {
                        debug!("[supervisor] {} ({:02x?})", fault, raw);
                    }
                    self.session.record_frame(frame);
                }
                Err(PortError::Eof) => {
                    warn!("[supervisor] {} disconnected", handle.path());
                    return ConnectionStatus::Eof;
                }
                Err(PortError::Timeout(after)) => {
                    warn!("[supervisor] no data from {} within {:?}", handle.path(), after);
                    self.backend.close(handle);
                    return ConnectionStatus::Timeout;
                }
                Err(e) => {
                    warn!("[supervisor] {}: {}", handle.path(), e);
                    self.backend.close(handle);
                    return ConnectionStatus::IoError;
                }
            }
        }
    }

    // Publishes the failure and drops back to the idle wait.
    fn fail(&self, status: ConnectionStatus) {
        self.session.request_disconnect();
        self.session.set_status(status);
        self.session.set_status(ConnectionStatus::Closed);
    }
}
