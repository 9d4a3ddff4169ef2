//! Communication manager.
//!
//! A [`CommunicationManager`] owns one device channel for its whole life and
//! performs bounded, blocking write and read transfers over it.
//!
//! # Lifecycle
//!
//! 1. Open a device by identity or path; opening never fails, check
//!    [`CommunicationManager::is_open`] instead.
//! 2. Call [`write`](CommunicationManager::write) and
//!    [`read`](CommunicationManager::read) as needed.
//! 3. Close explicitly or let the manager drop.
//!
//! ```text
//!   open ──► Open ──close──► Closed
//!     │                        ▲
//!     └──► Invalid ──close─────┘ (no-op, stays Invalid)
//! ```
//!
//! # Examples
//!
//! ```
//! use usblink_hardware::manager::{CommunicationManager, ManagerConfig};
//! use usblink_hardware::mock::MockOpener;
//!
//! # fn main() -> usblink_hardware::Result<()> {
//! let (opener, _device) = MockOpener::new();
//! let mut manager = CommunicationManager::open_with(
//!     &opener,
//!     r"\\?\usb#vid_0dd4&pid_0205#3a21#{28d78fad-5a12-11d1-ae5b-0000f803a8c2}",
//!     ManagerConfig::default(),
//! )?;
//!
//! assert!(manager.write(&[0x1d, 0x49, 0x02])?);
//! assert_eq!(manager.read()?, vec![0x1d, 0x49, 0x02]);
//! manager.close();
//! # Ok(())
//! # }
//! ```
//!
//! # Concurrency
//!
//! A manager has no internal locking. Every operation takes `&mut self`, so
//! sharing one across threads requires an external mutex.
//!
//! A read does not cancel anything before it is issued. A write that timed
//! out may therefore still complete on the device after a later read has
//! started; only the next write's cancellation reconciles it.

use std::fmt;
use std::time::Duration;

use tracing::{debug, info, trace, warn};
use usblink_core::constants::{DEFAULT_TIMEOUT_MS, TRANSFER_BUFFER_SIZE};
use usblink_core::{DeviceIdentity, OpenOptions};

use crate::backend::PlatformOpener;
use crate::devices::AnyChannel;
use crate::error::{HardwareError, Result};
use crate::traits::{DeviceChannel, DeviceOpener, IoDirection, IssueStatus, WaitStatus};

/// Configuration of a [`CommunicationManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Longest time a single transfer is waited for.
    pub timeout: Duration,

    /// Read capacity; one device transfer unit.
    pub buffer_size: usize,

    /// How the device path is opened.
    pub open_options: OpenOptions,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            buffer_size: TRANSFER_BUFFER_SIZE,
            open_options: OpenOptions::default(),
        }
    }
}

impl ManagerConfig {
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    #[must_use]
    pub fn with_open_options(mut self, open_options: OpenOptions) -> Self {
        self.open_options = open_options;
        self
    }

    /// Reject configurations under which no transfer could succeed.
    ///
    /// # Errors
    /// Returns [`usblink_core::Error::Config`] for a zero timeout or a zero
    /// buffer size.
    pub fn validate(&self) -> usblink_core::Result<()> {
        if self.timeout.is_zero() {
            return Err(usblink_core::Error::Config(
                "timeout must be greater than zero".into(),
            ));
        }
        if self.buffer_size == 0 {
            return Err(usblink_core::Error::Config(
                "buffer size must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// State of the device handle owned by a manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleState {
    /// No usable handle: blank path or the open attempt failed.
    Invalid,

    /// Handle open; I/O allowed.
    Open,

    /// Handle released by [`CommunicationManager::close`].
    Closed,
}

impl fmt::Display for HandleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid => write!(f, "invalid"),
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Detailed outcome of a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// Every requested byte was transferred.
    Complete,

    /// The device accepted fewer bytes than requested.
    Partial { written: usize, requested: usize },

    /// The transfer did not finish within the timeout.
    TimedOut,

    /// The platform reported a transfer failure.
    Failed { code: Option<i32> },
}

impl WriteStatus {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

/// Exclusive owner of one device handle.
///
/// The handle is released exactly once, by [`close`](Self::close) or on drop.
///
/// # Examples
///
/// ```
/// use usblink_hardware::manager::{CommunicationManager, HandleState};
///
/// let manager = CommunicationManager::open_path("");
/// assert_eq!(manager.state(), HandleState::Invalid);
/// ```
#[derive(Debug)]
pub struct CommunicationManager {
    channel: Option<AnyChannel>,
    state: HandleState,
    path: String,
    config: ManagerConfig,
}

impl CommunicationManager {
    /// Open the device at `identity`'s path with the platform opener.
    pub fn open(identity: &DeviceIdentity) -> Self {
        Self::open_path(identity.path())
    }

    /// Open `path` with the platform opener and default configuration.
    ///
    /// Never fails; an unusable path yields a manager in
    /// [`HandleState::Invalid`].
    pub fn open_path(path: &str) -> Self {
        Self::connect(&PlatformOpener::default(), path, ManagerConfig::default())
    }

    /// Open `path` through `opener` with `config`.
    ///
    /// A blank path is not opened at all. An open failure is logged and
    /// yields a manager in [`HandleState::Invalid`]. Exactly one open attempt
    /// is made.
    ///
    /// # Errors
    /// Returns an error only when `config` fails validation.
    pub fn open_with(
        opener: &impl DeviceOpener,
        path: &str,
        config: ManagerConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::connect(opener, path, config))
    }

    fn connect(opener: &impl DeviceOpener, path: &str, config: ManagerConfig) -> Self {
        let mut manager = Self {
            channel: None,
            state: HandleState::Invalid,
            path: path.to_string(),
            config,
        };

        if path.trim().is_empty() {
            debug!("No device path given, handle left invalid");
            return manager;
        }

        match opener.open(path, &manager.config.open_options) {
            Ok(channel) => {
                info!("Opened {} ({} backend)", path, channel.backend());
                manager.channel = Some(channel);
                manager.state = HandleState::Open;
            }
            Err(e) => warn!("Failed to open {}: {}", path, e),
        }
        manager
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == HandleState::Open
    }

    pub fn is_invalid(&self) -> bool {
        self.state == HandleState::Invalid
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    fn channel(&mut self) -> Result<&mut AnyChannel> {
        let state = self.state;
        self.channel
            .as_mut()
            .ok_or_else(|| HardwareError::not_open(state))
    }

    /// Write `buffer`, returning `true` only if every byte was transferred.
    ///
    /// A timeout or a short transfer is `false`, not an error.
    ///
    /// # Errors
    /// - [`HardwareError::InvalidArgument`] for an empty buffer, before any I/O.
    /// - [`HardwareError::NotOpen`] if the handle is not open.
    /// - [`HardwareError::Cancellation`] if cancelling outstanding I/O failed.
    pub fn write(&mut self, buffer: &[u8]) -> Result<bool> {
        Ok(self.write_with_status(buffer)?.is_complete())
    }

    /// Write `buffer` and report how the transfer ended.
    ///
    /// # Errors
    /// Same as [`write`](Self::write).
    pub fn write_with_status(&mut self, buffer: &[u8]) -> Result<WriteStatus> {
        if buffer.is_empty() {
            return Err(HardwareError::invalid_argument("write buffer is empty"));
        }

        let timeout = self.config.timeout;
        let channel = self.channel()?;
        channel
            .cancel_pending()
            .map_err(HardwareError::cancellation)?;

        let requested = buffer.len();
        let mut timed_out = false;
        match channel.issue_write(buffer.to_vec()) {
            Ok(IssueStatus::Completed) => {}
            Ok(IssueStatus::Pending) => {
                timed_out = channel.wait(IoDirection::Write, timeout) == WaitStatus::TimedOut;
            }
            Err(e) => {
                warn!("Write of {} bytes failed to start: {}", requested, e);
                return Ok(WriteStatus::Failed {
                    code: e.raw_os_error(),
                });
            }
        }

        let status = match channel.query_result(IoDirection::Write) {
            Ok(written) if written == requested => WriteStatus::Complete,
            Ok(written) => WriteStatus::Partial { written, requested },
            Err(_) if timed_out => WriteStatus::TimedOut,
            Err(e) => {
                warn!("Write of {} bytes failed: {}", requested, e);
                WriteStatus::Failed {
                    code: e.raw_os_error(),
                }
            }
        };

        trace!("Write of {} bytes: {:?}", requested, status);
        Ok(status)
    }

    /// Read one device transfer.
    ///
    /// Returns exactly the bytes the device reported, never more than the
    /// configured buffer size. Empty on timeout or failure.
    ///
    /// # Errors
    /// [`HardwareError::NotOpen`] if the handle is not open.
    pub fn read(&mut self) -> Result<Vec<u8>> {
        let timeout = self.config.timeout;
        let capacity = self.config.buffer_size;
        let channel = self.channel()?;

        match channel.issue_read(capacity) {
            Ok(IssueStatus::Completed) => {}
            Ok(IssueStatus::Pending) => {
                if channel.wait(IoDirection::Read, timeout) == WaitStatus::TimedOut {
                    trace!("Read timed out after {:?}", timeout);
                }
            }
            Err(e) => {
                warn!("Read failed to start: {}", e);
                return Ok(Vec::new());
            }
        }

        match channel.query_result(IoDirection::Read) {
            Ok(count) => {
                let data = channel.read_buffer();
                let count = count.min(capacity).min(data.len());
                trace!("Read {} bytes", count);
                Ok(data[..count].to_vec())
            }
            Err(e) => {
                debug!("Read produced no data: {}", e);
                Ok(Vec::new())
            }
        }
    }

    /// Release the handle.
    ///
    /// Idempotent: only the first call on an open manager releases anything.
    pub fn close(&mut self) {
        let Some(mut channel) = self.channel.take() else {
            return;
        };

        if let Err(e) = channel.close() {
            warn!("Error while closing {}: {}", self.path, e);
        }
        self.state = HandleState::Closed;
        info!("Closed {}", self.path);
    }
}

impl Drop for CommunicationManager {
    fn drop(&mut self) {
        self.close();
    }
}
