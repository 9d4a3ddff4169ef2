//! In-memory blocking stream for exercising the threaded backend.
//!
//! [`LoopbackStream`] behaves like a device node: reads block until the
//! device has something to say, writes may be accepted partially. The paired
//! [`LoopbackHandle`] plays the device side.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use crate::backend::threaded::{DeviceStream, StreamHalves};
use crate::traits::{IoDirection, aborted};

#[derive(Debug, Default)]
struct LoopbackState {
    inbound: VecDeque<u8>,
    written: Vec<u8>,
    echo: bool,
    write_limit: Option<usize>,
    write_error: Option<i32>,
    hung_up: bool,
    shut_down: bool,
    hosts: usize,
}

#[derive(Debug, Default)]
struct LoopbackShared {
    state: Mutex<LoopbackState>,
    readable: Condvar,
}

impl LoopbackShared {
    fn lock(&self) -> MutexGuard<'_, LoopbackState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Blocking in-memory device stream.
///
/// # Examples
///
/// ```
/// use std::io::{Read, Write};
/// use usblink_hardware::mock::LoopbackStream;
///
/// let (mut stream, handle) = LoopbackStream::echo();
/// stream.write_all(&[0x1d, 0x49, 0x02]).unwrap();
///
/// let mut reply = [0u8; 8];
/// let count = stream.read(&mut reply).unwrap();
/// assert_eq!(&reply[..count], &[0x1d, 0x49, 0x02]);
/// assert_eq!(handle.written(), vec![0x1d, 0x49, 0x02]);
/// ```
#[derive(Debug)]
pub struct LoopbackStream {
    shared: Arc<LoopbackShared>,
}

impl LoopbackStream {
    /// A device that answers every write with the accepted bytes.
    pub fn echo() -> (Self, LoopbackHandle) {
        Self::build(true)
    }

    /// A device that only answers with replies pushed through the handle.
    pub fn silent() -> (Self, LoopbackHandle) {
        Self::build(false)
    }

    fn build(echo: bool) -> (Self, LoopbackHandle) {
        let shared = Arc::new(LoopbackShared::default());
        shared.lock().echo = echo;
        (Self::attach(Arc::clone(&shared)), LoopbackHandle { shared })
    }

    fn attach(shared: Arc<LoopbackShared>) -> Self {
        shared.lock().hosts += 1;
        Self { shared }
    }
}

impl Drop for LoopbackStream {
    fn drop(&mut self) {
        self.shared.lock().hosts -= 1;
    }
}

impl DeviceStream for LoopbackStream {
    type Reader = Self;
    type Writer = Self;

    fn split(self) -> io::Result<StreamHalves<Self, Self>> {
        let writer = Self::attach(Arc::clone(&self.shared));
        let shared = Arc::clone(&self.shared);
        Ok(StreamHalves {
            reader: self,
            writer,
            interrupt: Box::new(move || {
                shared.lock().shut_down = true;
                shared.readable.notify_all();
            }),
        })
    }
}

impl Read for LoopbackStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let state = self.shared.lock();
        let mut state = self
            .shared
            .readable
            .wait_while(state, |state| {
                state.inbound.is_empty() && !state.hung_up && !state.shut_down
            })
            .unwrap_or_else(PoisonError::into_inner);
        if state.shut_down {
            return Err(aborted(IoDirection::Read));
        }

        let count = buf.len().min(state.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(state.inbound.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }
}

impl Write for LoopbackStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.shared.lock();
        if state.shut_down {
            return Err(aborted(IoDirection::Write));
        }
        if let Some(code) = state.write_error {
            return Err(io::Error::from_raw_os_error(code));
        }

        let accepted = state.write_limit.map_or(buf.len(), |limit| limit.min(buf.len()));
        state.written.extend_from_slice(&buf[..accepted]);
        if state.echo {
            state.inbound.extend(&buf[..accepted]);
            self.shared.readable.notify_all();
        }
        Ok(accepted)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Device-side control for a [`LoopbackStream`].
#[derive(Debug, Clone)]
pub struct LoopbackHandle {
    shared: Arc<LoopbackShared>,
}

impl LoopbackHandle {
    /// Queue bytes for the host to read.
    pub fn push_reply(&self, bytes: &[u8]) {
        self.shared.lock().inbound.extend(bytes);
        self.shared.readable.notify_all();
    }

    /// Every byte the host has written so far.
    pub fn written(&self) -> Vec<u8> {
        self.shared.lock().written.clone()
    }

    /// Accept at most `limit` bytes per write.
    pub fn set_write_limit(&self, limit: Option<usize>) {
        self.shared.lock().write_limit = limit;
    }

    /// Fail subsequent writes with the given OS error code.
    pub fn fail_writes(&self, code: Option<i32>) {
        self.shared.lock().write_error = code;
    }

    /// Disconnect: blocked and future reads return zero bytes.
    pub fn hang_up(&self) {
        self.shared.lock().hung_up = true;
        self.shared.readable.notify_all();
    }

    /// Whether every host-side stream has been dropped.
    pub fn is_released(&self) -> bool {
        self.shared.lock().hosts == 0
    }
}
