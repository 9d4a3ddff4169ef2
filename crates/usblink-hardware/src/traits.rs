//! Platform boundary traits.
//!
//! Everything that touches the operating system sits behind one of these
//! traits, so the enumerator and the communication manager can be driven by
//! the Windows backend, the portable threaded backend or the mock platform
//! without change.
//!
//! Boundary methods return `std::io::Result`, carrying the platform error
//! code in [`std::io::Error::raw_os_error`]. Classification into
//! [`HardwareError`](crate::HardwareError) happens in the callers.

use std::io;
use std::time::Duration;

use usblink_core::{DevInfoRecord, DeviceClassId, EnumerationFlags, OpenOptions, PortMetadata, RecordLayout};

use crate::devices::AnyChannel;

/// Immediate outcome of issuing an asynchronous transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueStatus {
    /// The transfer finished before the issuing call returned.
    Completed,

    /// The transfer is in flight; wait on its direction to learn more.
    Pending,
}

/// Outcome of a bounded wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    Signaled,
    TimedOut,
}

/// Transfer direction. Each direction has its own completion signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoDirection {
    Write,
    Read,
}

impl std::fmt::Display for IoDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Write => write!(f, "write"),
            Self::Read => write!(f, "read"),
        }
    }
}

/// Auxiliary device property looked up during enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceProperty {
    Description,
    Service,
    Location,
}

/// Raw buffers returned by the interface detail query.
///
/// Both buffers are decoded with [`usblink_core::records`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawInterfaceDetail {
    /// Interface detail record (size header + UTF-16LE path).
    pub detail: Vec<u8>,

    /// Device info record of the device owning the interface.
    pub devinfo: Vec<u8>,
}

/// Acquires device interface sets for a class.
pub trait DeviceInterfaceSource {
    type Set: DeviceInterfaceSet;

    /// Acquire the set of interfaces for `class` filtered by `flags`.
    ///
    /// Failure here means "nothing to enumerate", not a malfunction.
    fn acquire(&self, class: &DeviceClassId, flags: EnumerationFlags) -> io::Result<Self::Set>;
}

/// A snapshot of device interfaces.
///
/// The platform resources behind a set are released when it is dropped.
pub trait DeviceInterfaceSet {
    type Interface;

    /// Interface at the zero-based `index`, or `None` once exhausted.
    fn interface(&self, index: u32) -> io::Result<Option<Self::Interface>>;

    /// Size of the detail record for `interface` (first call of the
    /// two-call sizing idiom). Zero means the entry should be skipped.
    fn detail_size(&self, interface: &Self::Interface) -> io::Result<usize>;

    /// Fetch the detail record into a buffer of `size` bytes.
    fn detail(&self, interface: &Self::Interface, size: usize) -> io::Result<RawInterfaceDetail>;

    /// Look up an auxiliary property of the device described by `devinfo`.
    fn property(&self, devinfo: &DevInfoRecord, property: DeviceProperty) -> Option<String>;

    /// Layout the raw records were produced with.
    fn layout(&self) -> RecordLayout {
        RecordLayout::native()
    }
}

/// Reads port parameters from the configuration store.
pub trait PortConfigStore {
    /// Read the port parameters stored under `key`.
    fn port_parameters(&self, key: &str) -> io::Result<PortMetadata>;
}

/// An open channel supporting the issue / wait / query transfer protocol.
///
/// At most one transfer per direction is meaningful at a time. Callers must
/// serialize access; a channel provides no internal locking across calls.
pub trait DeviceChannel: Send {
    /// Cancel any outstanding transfer issued on this channel.
    fn cancel_pending(&mut self) -> io::Result<()>;

    /// Issue a write of `data`. The channel owns the bytes until the
    /// transfer completes.
    fn issue_write(&mut self, data: Vec<u8>) -> io::Result<IssueStatus>;

    /// Issue a read of at most `capacity` bytes.
    fn issue_read(&mut self, capacity: usize) -> io::Result<IssueStatus>;

    /// Block until the last transfer in `direction` signals or `timeout`
    /// elapses.
    fn wait(&mut self, direction: IoDirection, timeout: Duration) -> WaitStatus;

    /// Bytes transferred by the last transfer in `direction`. Never blocks;
    /// an unfinished transfer is reported as an error.
    fn query_result(&mut self, direction: IoDirection) -> io::Result<usize>;

    /// Buffer filled by the last completed read.
    fn read_buffer(&self) -> &[u8];

    /// Release the platform handle.
    fn close(&mut self) -> io::Result<()>;
}

/// Opens device channels by path.
pub trait DeviceOpener {
    fn open(&self, path: &str, options: &OpenOptions) -> io::Result<AnyChannel>;
}

impl<F> DeviceOpener for F
where
    F: Fn(&str, &OpenOptions) -> io::Result<AnyChannel>,
{
    fn open(&self, path: &str, options: &OpenOptions) -> io::Result<AnyChannel> {
        self(path, options)
    }
}

/// Error reported by `query_result` while a transfer is still in flight.
pub(crate) fn incomplete(direction: IoDirection) -> io::Error {
    io::Error::new(
        io::ErrorKind::WouldBlock,
        format!("{direction} transfer is still in progress"),
    )
}

/// Error reported for transfers dropped by a cancellation.
pub(crate) fn aborted(direction: IoDirection) -> io::Error {
    io::Error::new(
        io::ErrorKind::Interrupted,
        format!("{direction} transfer was aborted"),
    )
}
