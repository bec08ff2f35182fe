//! Shared state for one connection session.
//!
//! A [`Session`] is created for each supervisor and handed out behind an
//! `Arc`. The supervisor's worker is the only writer; readers take snapshots
//! of the frame log and poll the status. Notifications are a wake-up hint
//! only: a slow subscriber may miss some, and recovers by reading the current
//! state again.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use chrono::{DateTime, Local};
use log::info;

use crate::frame::Frame;

// ============================================================================
// Connection status
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    Closed,
    Connecting,
    Connected,
    FailedToOpen,
    IoError,
    Timeout,
    Eof,
}

/// How a status should be presented to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Neutral,
    Pending,
    Good,
    Bad,
}

impl ConnectionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionStatus::Closed => "Closed",
            ConnectionStatus::Connecting => "Connecting...",
            ConnectionStatus::Connected => "Connected",
            ConnectionStatus::FailedToOpen => "Failed to open",
            ConnectionStatus::IoError => "I/O error",
            ConnectionStatus::Timeout => "Timeout",
            ConnectionStatus::Eof => "Disconnected",
        }
    }

    pub fn severity(self) -> Severity {
        match self {
            ConnectionStatus::Closed => Severity::Neutral,
            ConnectionStatus::Connecting => Severity::Pending,
            ConnectionStatus::Connected => Severity::Good,
            ConnectionStatus::FailedToOpen
            | ConnectionStatus::IoError
            | ConnectionStatus::Timeout
            | ConnectionStatus::Eof => Severity::Bad,
        }
    }

    /// Statuses that end a connection attempt.
    pub fn is_failure(self) -> bool {
        self.severity() == Severity::Bad
    }

    fn to_u8(self) -> u8 {
        match self {
            ConnectionStatus::Closed => 0,
            ConnectionStatus::Connecting => 1,
            ConnectionStatus::Connected => 2,
            ConnectionStatus::FailedToOpen => 3,
            ConnectionStatus::IoError => 4,
            ConnectionStatus::Timeout => 5,
            ConnectionStatus::Eof => 6,
        }
    }

    fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(ConnectionStatus::Closed),
            1 => Some(ConnectionStatus::Connecting),
            2 => Some(ConnectionStatus::Connected),
            3 => Some(ConnectionStatus::FailedToOpen),
            4 => Some(ConnectionStatus::IoError),
            5 => Some(ConnectionStatus::Timeout),
            6 => Some(ConnectionStatus::Eof),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const NO_FAILURE: u8 = u8::MAX;

// ============================================================================
// Notifications
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    Status(ConnectionStatus),
    /// A frame was appended at this index of the log.
    Frame(usize),
}

// ============================================================================
// Frame log
// ============================================================================

/// Append-only, lock-guarded sequence of decoded frames.
#[derive(Debug, Default)]
pub struct FrameLog {
    frames: Mutex<Vec<Frame>>,
}

impl FrameLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Frame>> {
        // A panicking reader cannot leave a half-written Vec behind.
        self.frames.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Appends a frame and returns its index.
    pub fn append(&self, frame: Frame) -> usize {
        let mut frames = self.lock();
        frames.push(frame);
        frames.len() - 1
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn latest(&self) -> Option<Frame> {
        self.lock().last().cloned()
    }

    /// Copy of the whole log.
    pub fn snapshot(&self) -> Vec<Frame> {
        self.lock().clone()
    }

    /// Frames from `index` onwards.
    pub fn since(&self, index: usize) -> Vec<Frame> {
        let frames = self.lock();
        frames.get(index..).map(<[Frame]>::to_vec).unwrap_or_default()
    }

    /// The last `count` frames, oldest first.
    pub fn tail(&self, count: usize) -> Vec<Frame> {
        let frames = self.lock();
        let start = frames.len().saturating_sub(count);
        frames[start..].to_vec()
    }
}

// ============================================================================
// Clock
// ============================================================================

/// Wall-clock timestamps that never run backwards within a session.
///
/// Wall time is sampled once; later stamps add monotonic elapsed time to it.
#[derive(Debug, Clone)]
pub struct SessionClock {
    wall: DateTime<Local>,
    start: Instant,
}

impl SessionClock {
    pub fn new() -> Self {
        Self {
            wall: Local::now(),
            start: Instant::now(),
        }
    }

    pub fn now(&self) -> DateTime<Local> {
        let elapsed = chrono::Duration::from_std(self.start.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.wall + elapsed
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Session
// ============================================================================

pub struct Session {
    device: String,
    frames: FrameLog,
    status: AtomicU8,
    last_failure: AtomicU8,
    keep_alive: AtomicBool,
    want_connected: AtomicBool,
    clock: SessionClock,
    subscribers: Mutex<Vec<SyncSender<Notification>>>,
}

impl Session {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            frames: FrameLog::new(),
            status: AtomicU8::new(ConnectionStatus::Closed.to_u8()),
            last_failure: AtomicU8::new(NO_FAILURE),
            keep_alive: AtomicBool::new(true),
            want_connected: AtomicBool::new(false),
            clock: SessionClock::new(),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Path of the device this session is bound to.
    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn frames(&self) -> &FrameLog {
        &self.frames
    }

    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus::from_u8(self.status.load(Ordering::Acquire)).unwrap_or(ConnectionStatus::Closed)
    }

    /// The most recent failure status, kept after the worker returns to `Closed`.
    pub fn last_failure(&self) -> Option<ConnectionStatus> {
        ConnectionStatus::from_u8(self.last_failure.load(Ordering::Acquire))
    }

    pub fn now(&self) -> DateTime<Local> {
        self.clock.now()
    }

    // --- Control flags ---

    pub fn keep_alive(&self) -> bool {
        self.keep_alive.load(Ordering::Acquire)
    }

    pub fn want_connected(&self) -> bool {
        self.want_connected.load(Ordering::Acquire)
    }

    pub fn request_connect(&self) {
        self.want_connected.store(true, Ordering::Release);
    }

    pub fn request_disconnect(&self) {
        self.want_connected.store(false, Ordering::Release);
    }

    /// Flips the connect request and returns the new value.
    pub fn toggle_connection(&self) -> bool {
        !self.want_connected.fetch_xor(true, Ordering::AcqRel)
    }

    /// Asks the worker to stop for good.
    pub fn request_shutdown(&self) {
        self.want_connected.store(false, Ordering::Release);
        self.keep_alive.store(false, Ordering::Release);
    }

    // --- Notifications ---

    /// Subscribes with a one-slot mailbox; bursts coalesce into one wake-up.
    pub fn subscribe(&self) -> Receiver<Notification> {
        self.subscribe_with_capacity(1)
    }

    pub fn subscribe_with_capacity(&self, capacity: usize) -> Receiver<Notification> {
        let (tx, rx) = mpsc::sync_channel(capacity);
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }

    fn notify(&self, notification: Notification) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|tx| match tx.try_send(notification) {
            Ok(()) | Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    // --- Worker side ---

    /// Publishes a status change. Setting the current status again is silent.
    pub(crate) fn set_status(&self, status: ConnectionStatus) {
        let previous = self.status.swap(status.to_u8(), Ordering::AcqRel);
        if previous == status.to_u8() {
            return;
        }
        if status.is_failure() {
            self.last_failure.store(status.to_u8(), Ordering::Release);
        } else if status == ConnectionStatus::Connected {
            self.last_failure.store(NO_FAILURE, Ordering::Release);
        }
        info!("[session] {}: {}", self.device, status);
        self.notify(Notification::Status(status));
    }

    pub(crate) fn record_frame(&self, frame: Frame) -> usize {
        let index = self.frames.append(frame);
        self.notify(Notification::Frame(index));
        index
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("device", &self.device)
            .field("status", &self.status())
            .field("frames", &self.frames.len())
            .field("want_connected", &self.want_connected())
            .field("keep_alive", &self.keep_alive())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FRAME_LEN;

    fn frame_at(session: &Session) -> Frame {
        Frame::decode(&[0u8; FRAME_LEN], session.now())
    }

    #[test]
    fn status_strings_and_severity() {
        assert_eq!(ConnectionStatus::Connecting.to_string(), "Connecting...");
        assert_eq!(ConnectionStatus::Eof.as_str(), "Disconnected");
        assert_eq!(ConnectionStatus::Connected.severity(), Severity::Good);
        assert_eq!(ConnectionStatus::Closed.severity(), Severity::Neutral);
        assert!(ConnectionStatus::Timeout.is_failure());
        assert!(!ConnectionStatus::Connecting.is_failure());
    }

    #[test]
    fn status_round_trips_through_atomic() {
        for status in [
            ConnectionStatus::Closed,
            ConnectionStatus::Connecting,
            ConnectionStatus::Connected,
            ConnectionStatus::FailedToOpen,
            ConnectionStatus::IoError,
            ConnectionStatus::Timeout,
            ConnectionStatus::Eof,
        ] {
            assert_eq!(ConnectionStatus::from_u8(status.to_u8()), Some(status));
        }
        assert_eq!(ConnectionStatus::from_u8(NO_FAILURE), None);
    }

    #[test]
    fn new_session_is_closed_and_idle() {
        let session = Session::new("/dev/ttyUSB0");
        assert_eq!(session.status(), ConnectionStatus::Closed);
        assert!(session.keep_alive());
        assert!(!session.want_connected());
        assert_eq!(session.last_failure(), None);
        assert!(session.frames().is_empty());
    }

    #[test]
    fn one_notification_per_transition() {
        let session = Session::new("/dev/ttyUSB0");
        let rx = session.subscribe_with_capacity(8);

        session.set_status(ConnectionStatus::Connecting);
        session.set_status(ConnectionStatus::Connecting);
        session.set_status(ConnectionStatus::FailedToOpen);

        let seen: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            seen,
            vec![
                Notification::Status(ConnectionStatus::Connecting),
                Notification::Status(ConnectionStatus::FailedToOpen),
            ]
        );
        assert_eq!(session.last_failure(), Some(ConnectionStatus::FailedToOpen));
    }

    #[test]
    fn default_subscription_coalesces() {
        let session = Session::new("/dev/ttyUSB0");
        let rx = session.subscribe();

        session.set_status(ConnectionStatus::Connecting);
        session.set_status(ConnectionStatus::Connected);
        session.record_frame(frame_at(&session));

        assert_eq!(rx.try_iter().count(), 1);
        assert_eq!(session.status(), ConnectionStatus::Connected);
        assert_eq!(session.frames().len(), 1);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let session = Session::new("/dev/ttyUSB0");
        drop(session.subscribe());
        session.set_status(ConnectionStatus::Connecting);
        assert!(session.subscribers.lock().unwrap().is_empty());
    }

    #[test]
    fn toggle_and_shutdown_flags() {
        let session = Session::new("/dev/ttyUSB0");
        assert!(session.toggle_connection());
        assert!(session.want_connected());
        assert!(!session.toggle_connection());
        session.request_connect();
        session.request_shutdown();
        assert!(!session.want_connected());
        assert!(!session.keep_alive());
    }

    #[test]
    fn interleaved_bursts_stay_in_order() {
        let session = Session::new("/dev/ttyUSB0");
        let mut submitted = Vec::new();
        for burst in 0..6 {
            for _ in 0..(burst % 2 + 2) {
                let frame = frame_at(&session);
                submitted.push(frame.timestamp);
                session.record_frame(frame);
            }
            std::thread::sleep(std::time::Duration::from_millis(2));
        }

        let logged: Vec<_> = session.frames().snapshot().iter().map(|f| f.timestamp).collect();
        assert_eq!(logged, submitted);
        assert!(logged.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[test]
    fn log_views() {
        let session = Session::new("/dev/ttyUSB0");
        for _ in 0..5 {
            session.record_frame(frame_at(&session));
        }
        let log = session.frames();
        assert_eq!(log.tail(2).len(), 2);
        assert_eq!(log.tail(10).len(), 5);
        assert_eq!(log.since(3).len(), 2);
        assert!(log.since(9).is_empty());
        assert_eq!(log.latest(), log.snapshot().last().cloned());
        assert_eq!(log.len(), 5);
    }
}
