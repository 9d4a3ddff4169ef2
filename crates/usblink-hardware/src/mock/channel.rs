//! Mock device channel for testing the communication manager.
//!
//! The channel never blocks: waits return immediately with the outcome the
//! test scripted. Every platform-facing call is counted so tests can prove
//! that a code path performed no I/O or released a handle exactly once.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use usblink_core::OpenOptions;

use crate::devices::AnyChannel;
use crate::traits::{
    DeviceChannel, DeviceOpener, IoDirection, IssueStatus, WaitStatus, aborted, incomplete,
};

/// How the mock device treats writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteBehavior {
    /// Accept everything before the issuing call returns.
    #[default]
    Immediate,

    /// Report pending; the transfer completes once waited on.
    Deferred,

    /// Report pending and never complete.
    Stalled,

    /// Accept at most this many bytes.
    Partial(usize),

    /// Fail at issue time with this OS error code.
    Fail(i32),
}

/// Counters of platform-facing calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockCalls {
    pub cancel: usize,
    pub write: usize,
    pub read: usize,
    pub wait: usize,
    pub query: usize,
    pub close: usize,
}

impl MockCalls {
    /// Calls that would have started or cancelled a transfer.
    #[must_use]
    pub fn io(&self) -> usize {
        self.cancel + self.write + self.read
    }
}

#[derive(Debug)]
struct DeviceState {
    echo: bool,
    write_behavior: WriteBehavior,
    cancel_error: Option<i32>,
    replies: VecDeque<Vec<u8>>,
    written: Vec<Vec<u8>>,
    wait_timeouts: Vec<Duration>,
    calls: MockCalls,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            echo: true,
            write_behavior: WriteBehavior::default(),
            cancel_error: None,
            replies: VecDeque::new(),
            written: Vec::new(),
            wait_timeouts: Vec::new(),
            calls: MockCalls::default(),
        }
    }
}

type SharedDevice = Arc<Mutex<DeviceState>>;

fn lock(device: &SharedDevice) -> MutexGuard<'_, DeviceState> {
    device.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
enum Transfer {
    #[default]
    Idle,
    Deferred(usize),
    Stalled,
    Done(io::Result<usize>),
}

/// Scripted channel to a simulated device.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use usblink_hardware::mock::MockChannel;
/// use usblink_hardware::traits::{DeviceChannel, IoDirection, WaitStatus};
///
/// let (mut channel, handle) = MockChannel::new();
/// channel.issue_write(vec![0x1d, 0x49, 0x02]).unwrap();
/// assert_eq!(channel.query_result(IoDirection::Write).unwrap(), 3);
///
/// channel.issue_read(4096).unwrap();
/// assert_eq!(channel.wait(IoDirection::Read, Duration::from_secs(1)), WaitStatus::Signaled);
/// assert_eq!(channel.query_result(IoDirection::Read).unwrap(), 3);
/// assert_eq!(channel.read_buffer(), &[0x1d, 0x49, 0x02]);
/// assert_eq!(handle.calls().write, 1);
/// ```
#[derive(Debug)]
pub struct MockChannel {
    device: SharedDevice,
    write: Transfer,
    read: Transfer,
    pending_read: Vec<u8>,
    read_data: Vec<u8>,
}

impl MockChannel {
    /// Create a channel to a fresh echoing device.
    pub fn new() -> (Self, MockDeviceHandle) {
        let device = SharedDevice::default();
        let handle = MockDeviceHandle {
            device: Arc::clone(&device),
        };
        (Self::attach(device), handle)
    }

    fn attach(device: SharedDevice) -> Self {
        Self {
            device,
            write: Transfer::Idle,
            read: Transfer::Idle,
            pending_read: Vec::new(),
            read_data: Vec::new(),
        }
    }

    fn transfer(&mut self, direction: IoDirection) -> &mut Transfer {
        match direction {
            IoDirection::Write => &mut self.write,
            IoDirection::Read => &mut self.read,
        }
    }
}

impl DeviceChannel for MockChannel {
    fn cancel_pending(&mut self) -> io::Result<()> {
        let cancel_error = {
            let mut device = lock(&self.device);
            device.calls.cancel += 1;
            device.cancel_error
        };
        if let Some(code) = cancel_error {
            return Err(io::Error::from_raw_os_error(code));
        }

        for direction in [IoDirection::Write, IoDirection::Read] {
            let transfer = self.transfer(direction);
            if matches!(transfer, Transfer::Stalled | Transfer::Deferred(_)) {
                *transfer = Transfer::Done(Err(aborted(direction)));
            }
        }
        Ok(())
    }

    fn issue_write(&mut self, data: Vec<u8>) -> io::Result<IssueStatus> {
        let mut device = lock(&self.device);
        device.calls.write += 1;

        let behavior = device.write_behavior;
        let accepted = match behavior {
            WriteBehavior::Fail(code) => return Err(io::Error::from_raw_os_error(code)),
            WriteBehavior::Stalled => {
                drop(device);
                self.write = Transfer::Stalled;
                return Ok(IssueStatus::Pending);
            }
            WriteBehavior::Partial(limit) => limit.min(data.len()),
            WriteBehavior::Immediate | WriteBehavior::Deferred => data.len(),
        };

        let delivered = data[..accepted].to_vec();
        if device.echo {
            device.replies.push_back(delivered.clone());
        }
        device.written.push(delivered);
        drop(device);

        if behavior == WriteBehavior::Deferred {
            self.write = Transfer::Deferred(accepted);
            Ok(IssueStatus::Pending)
        } else {
            self.write = Transfer::Done(Ok(accepted));
            Ok(IssueStatus::Completed)
        }
    }

    fn issue_read(&mut self, capacity: usize) -> io::Result<IssueStatus> {
        let mut device = lock(&self.device);
        device.calls.read += 1;

        match device.replies.pop_front() {
            Some(mut reply) => {
                if reply.len() > capacity {
                    let rest = reply.split_off(capacity);
                    device.replies.push_front(rest);
                }
                self.read = Transfer::Deferred(reply.len());
                self.pending_read = reply;
            }
            None => self.read = Transfer::Stalled,
        }
        Ok(IssueStatus::Pending)
    }

    fn wait(&mut self, direction: IoDirection, timeout: Duration) -> WaitStatus {
        {
            let mut device = lock(&self.device);
            device.calls.wait += 1;
            device.wait_timeouts.push(timeout);
        }

        let transfer = self.transfer(direction);
        match *transfer {
            Transfer::Deferred(count) => {
                *transfer = Transfer::Done(Ok(count));
                WaitStatus::Signaled
            }
            Transfer::Done(_) => WaitStatus::Signaled,
            Transfer::Idle | Transfer::Stalled => WaitStatus::TimedOut,
        }
    }

    fn query_result(&mut self, direction: IoDirection) -> io::Result<usize> {
        lock(&self.device).calls.query += 1;

        let result = match std::mem::take(self.transfer(direction)) {
            Transfer::Idle => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("no {direction} transfer has been issued"),
                ));
            }
            Transfer::Stalled => {
                *self.transfer(direction) = Transfer::Stalled;
                return Err(incomplete(direction));
            }
            Transfer::Deferred(count) => Ok(count),
            Transfer::Done(result) => result,
        };

        if direction == IoDirection::Read {
            self.read_data = std::mem::take(&mut self.pending_read);
        }
        result
    }

    fn read_buffer(&self) -> &[u8] {
        &self.read_data
    }

    fn close(&mut self) -> io::Result<()> {
        lock(&self.device).calls.close += 1;
        Ok(())
    }
}

/// Test-side control of a mock device.
#[derive(Debug, Clone)]
pub struct MockDeviceHandle {
    device: SharedDevice,
}

impl MockDeviceHandle {
    /// Echo accepted write bytes back as the next reply.
    pub fn set_echo(&self, echo: bool) {
        lock(&self.device).echo = echo;
    }

    pub fn set_write_behavior(&self, behavior: WriteBehavior) {
        lock(&self.device).write_behavior = behavior;
    }

    /// Make `cancel_pending` fail with this OS error code.
    pub fn fail_cancel(&self, code: Option<i32>) {
        lock(&self.device).cancel_error = code;
    }

    /// Queue one device reply chunk.
    pub fn push_reply(&self, reply: impl Into<Vec<u8>>) {
        lock(&self.device).replies.push_back(reply.into());
    }

    /// Payloads delivered to the device, one entry per write.
    pub fn written(&self) -> Vec<Vec<u8>> {
        lock(&self.device).written.clone()
    }

    /// Timeouts passed to `wait`, in call order.
    pub fn wait_timeouts(&self) -> Vec<Duration> {
        lock(&self.device).wait_timeouts.clone()
    }

    pub fn calls(&self) -> MockCalls {
        lock(&self.device).calls
    }

    /// Number of handle releases.
    pub fn close_calls(&self) -> usize {
        self.calls().close
    }
}

#[derive(Debug, Default)]
struct OpenerState {
    open_error: Option<io::ErrorKind>,
    opened: Vec<(String, OpenOptions)>,
}

/// Opener handing out channels to one shared mock device.
#[derive(Debug, Clone)]
pub struct MockOpener {
    device: SharedDevice,
    state: Arc<Mutex<OpenerState>>,
}

impl MockOpener {
    /// Create an opener for a fresh echoing device.
    pub fn new() -> (Self, MockDeviceHandle) {
        let device = SharedDevice::default();
        let handle = MockDeviceHandle {
            device: Arc::clone(&device),
        };
        let opener = Self {
            device,
            state: Arc::default(),
        };
        (opener, handle)
    }

    fn lock_state(&self) -> MutexGuard<'_, OpenerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make subsequent opens fail with `kind`.
    pub fn fail_opens(&self, kind: Option<io::ErrorKind>) {
        self.lock_state().open_error = kind;
    }

    /// Paths and options of every open attempt.
    pub fn opened(&self) -> Vec<(String, OpenOptions)> {
        self.lock_state().opened.clone()
    }

    pub fn open_calls(&self) -> usize {
        self.lock_state().opened.len()
    }
}

impl DeviceOpener for MockOpener {
    fn open(&self, path: &str, options: &OpenOptions) -> io::Result<AnyChannel> {
        let mut state = self.lock_state();
        state.opened.push((path.to_string(), *options));
        if let Some(kind) = state.open_error {
            return Err(io::Error::new(kind, format!("cannot open {path}")));
        }
        Ok(AnyChannel::Mock(MockChannel::attach(Arc::clone(&self.device))))
    }
}
