//! Enum wrapper for device channel dispatch.
//!
//! The communication manager owns exactly one channel whose concrete type
//! depends on the platform and on how it was opened. [`AnyChannel`] gives it
//! a single concrete type to hold without boxing, with one variant per
//! backend.
//!
//! # Examples
//!
//! ```
//! use usblink_hardware::devices::AnyChannel;
//! use usblink_hardware::mock::MockChannel;
//!
//! let (channel, _handle) = MockChannel::new();
//! let any = AnyChannel::Mock(channel);
//! assert_eq!(any.backend(), "mock");
//! ```

use std::io;
use std::time::Duration;

use crate::backend::threaded::{DeviceStream, ThreadedChannel};
#[cfg(windows)]
use crate::backend::windows::OverlappedChannel;
use crate::mock::MockChannel;
use crate::traits::{DeviceChannel, IoDirection, IssueStatus, WaitStatus};

/// Enum wrapper for channel dispatch.
#[derive(Debug)]
#[non_exhaustive]
pub enum AnyChannel {
    /// Blocking stream driven by a dedicated I/O thread.
    Threaded(ThreadedChannel),

    /// Native overlapped handle.
    #[cfg(windows)]
    Overlapped(OverlappedChannel),

    /// Mock channel for development and testing.
    Mock(MockChannel),
}

impl AnyChannel {
    /// Wrap a blocking stream in a threaded channel.
    pub fn threaded<S: DeviceStream>(stream: S) -> io::Result<Self> {
        Ok(Self::Threaded(ThreadedChannel::spawn(stream)?))
    }

    /// Short backend name, used in logs.
    #[must_use]
    pub fn backend(&self) -> &'static str {
        match self {
            Self::Threaded(_) => "threaded",
            #[cfg(windows)]
            Self::Overlapped(_) => "overlapped",
            Self::Mock(_) => "mock",
        }
    }
}

impl DeviceChannel for AnyChannel {
    fn cancel_pending(&mut self) -> io::Result<()> {
        match self {
            Self::Threaded(channel) => channel.cancel_pending(),
            #[cfg(windows)]
            Self::Overlapped(channel) => channel.cancel_pending(),
            Self::Mock(channel) => channel.cancel_pending(),
        }
    }

    fn issue_write(&mut self, data: Vec<u8>) -> io::Result<IssueStatus> {
        match self {
            Self::Threaded(channel) => channel.issue_write(data),
            #[cfg(windows)]
            Self::Overlapped(channel) => channel.issue_write(data),
            Self::Mock(channel) => channel.issue_write(data),
        }
    }

    fn issue_read(&mut self, capacity: usize) -> io::Result<IssueStatus> {
        match self {
            Self::Threaded(channel) => channel.issue_read(capacity),
            #[cfg(windows)]
            Self::Overlapped(channel) => channel.issue_read(capacity),
            Self::Mock(channel) => channel.issue_read(capacity),
        }
    }

    fn wait(&mut self, direction: IoDirection, timeout: Duration) -> WaitStatus {
        match self {
            Self::Threaded(channel) => channel.wait(direction, timeout),
            #[cfg(windows)]
            Self::Overlapped(channel) => channel.wait(direction, timeout),
            Self::Mock(channel) => channel.wait(direction, timeout),
        }
    }

    fn query_result(&mut self, direction: IoDirection) -> io::Result<usize> {
        match self {
            Self::Threaded(channel) => channel.query_result(direction),
            #[cfg(windows)]
            Self::Overlapped(channel) => channel.query_result(direction),
            Self::Mock(channel) => channel.query_result(direction),
        }
    }

    fn read_buffer(&self) -> &[u8] {
        match self {
            Self::Threaded(channel) => channel.read_buffer(),
            #[cfg(windows)]
            Self::Overlapped(channel) => channel.read_buffer(),
            Self::Mock(channel) => channel.read_buffer(),
        }
    }

    fn close(&mut self) -> io::Result<()> {
        match self {
            Self::Threaded(channel) => channel.close(),
            #[cfg(windows)]
            Self::Overlapped(channel) => channel.close(),
            Self::Mock(channel) => channel.close(),
        }
    }
}
