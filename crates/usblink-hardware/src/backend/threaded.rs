//! Portable asynchronous I/O emulated with dedicated threads.
//!
//! Platforms without native overlapped I/O get the same issue / wait / query
//! protocol by splitting the blocking stream into a read half and a write
//! half, each driven by its own I/O thread. Completions land in one slot per
//! direction:
//!
//! ```text
//! caller ── issue_write ──► write queue ──► writer thread ── write() ──► stream
//!    │                                            │
//!    └── wait / query ◄── write slot (manual) ◄───┘
//!
//! caller ── issue_read ───► read queue ───► reader thread ── read() ◄── stream
//!    │                                            │
//!    └── wait / query ◄── read slot  (auto)   ◄───┘
//! ```
//!
//! Every transfer gets a ticket from a single counter. A slot only accepts
//! the completion for the ticket it was last armed with, so a late
//! completion of an abandoned transfer never signals a newer one.
//! Cancellation raises a watermark; queued transfers at or below it are
//! completed as aborted without touching the stream. A transfer a thread has
//! already started runs to completion.
//!
//! A read still outstanding when the next read is issued is reused rather
//! than replaced, so a reply arriving after a timeout is not lost. Closing
//! interrupts both halves and joins the threads, which drops the stream.

use std::fmt;
use std::fs;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};
use usblink_core::{CreationPolicy, OpenOptions};

use crate::devices::AnyChannel;
use crate::traits::{
    DeviceChannel, DeviceOpener, IoDirection, IssueStatus, WaitStatus, aborted, incomplete,
};

const READ_THREAD_NAME: &str = "usblink-read";
const WRITE_THREAD_NAME: &str = "usblink-write";

/// How long `close` waits for each I/O thread to let go of its half.
const CLOSE_GRACE: Duration = Duration::from_secs(1);
const JOIN_POLL: Duration = Duration::from_millis(5);

/// Wakes both halves of a split stream so blocked calls return.
pub type Interrupt = Box<dyn FnOnce() + Send>;

/// The pieces a [`DeviceStream`] splits into.
pub struct StreamHalves<R, W> {
    pub reader: R,
    pub writer: W,
    /// Called once by `close`; after it, blocked and future calls on either
    /// half must return promptly.
    pub interrupt: Interrupt,
}

impl<R, W> fmt::Debug for StreamHalves<R, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHalves").finish_non_exhaustive()
    }
}

/// A blocking byte stream a [`ThreadedChannel`] can drive.
///
/// Reads and writes run on separate threads, so a read waiting on a silent
/// device never holds up a write.
pub trait DeviceStream: Send + 'static {
    type Reader: Read + Send + 'static;
    type Writer: Write + Send + 'static;

    /// Split into independently usable halves.
    fn split(self) -> io::Result<StreamHalves<Self::Reader, Self::Writer>>;
}

struct WriteRequest {
    ticket: u64,
    data: Vec<u8>,
}

struct ReadRequest {
    ticket: u64,
    capacity: usize,
}

struct Completion {
    ticket: u64,
    result: io::Result<usize>,
    data: Vec<u8>,
}

#[derive(Default)]
struct SlotState {
    armed: u64,
    signaled: bool,
    completion: Option<Completion>,
}

/// Completion slot for one direction, modeled on an event object.
struct Slot {
    auto_reset: bool,
    state: Mutex<SlotState>,
    signal: Condvar,
}

impl Slot {
    fn new(auto_reset: bool) -> Self {
        Self {
            auto_reset,
            state: Mutex::new(SlotState::default()),
            signal: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn arm(&self, ticket: u64) {
        let mut state = self.lock();
        state.armed = ticket;
        state.signaled = false;
        state.completion = None;
    }

    fn complete(&self, completion: Completion) {
        let mut state = self.lock();
        if completion.ticket != state.armed {
            trace!(
                "Dropping stale completion for ticket {} (armed {})",
                completion.ticket,
                state.armed
            );
            return;
        }
        state.completion = Some(completion);
        state.signaled = true;
        self.signal.notify_all();
    }

    fn wait(&self, timeout: Duration) -> WaitStatus {
        let state = self.lock();
        let (mut state, _) = self
            .signal
            .wait_timeout_while(state, timeout, |state| !state.signaled)
            .unwrap_or_else(PoisonError::into_inner);

        if !state.signaled {
            return WaitStatus::TimedOut;
        }
        if self.auto_reset {
            state.signaled = false;
        }
        WaitStatus::Signaled
    }

    fn take(&self, ticket: u64) -> Option<Completion> {
        let mut state = self.lock();
        match &state.completion {
            Some(completion) if completion.ticket == ticket => state.completion.take(),
            _ => None,
        }
    }
}

struct Shared {
    write: Slot,
    read: Slot,
    cancel_watermark: AtomicU64,
}

impl Shared {
    fn new() -> Self {
        Self {
            write: Slot::new(false),
            read: Slot::new(true),
            cancel_watermark: AtomicU64::new(0),
        }
    }

    fn slot(&self, direction: IoDirection) -> &Slot {
        match direction {
            IoDirection::Write => &self.write,
            IoDirection::Read => &self.read,
        }
    }

    fn is_cancelled(&self, ticket: u64) -> bool {
        ticket <= self.cancel_watermark.load(Ordering::Acquire)
    }

    fn cancel_through(&self, ticket: u64) {
        self.cancel_watermark.fetch_max(ticket, Ordering::AcqRel);
    }
}

fn run_writer<W: Write>(mut writer: W, requests: Receiver<WriteRequest>, shared: Arc<Shared>) {
    for WriteRequest { ticket, data } in requests {
        let result = if shared.is_cancelled(ticket) {
            Err(aborted(IoDirection::Write))
        } else {
            writer
                .write(&data)
                .and_then(|written| writer.flush().map(|()| written))
        };
        trace!("Write ticket {} finished: {:?}", ticket, result);
        shared.write.complete(Completion {
            ticket,
            result,
            data: Vec::new(),
        });
    }
    debug!("{} thread exiting", WRITE_THREAD_NAME);
}

fn run_reader<R: Read>(mut reader: R, requests: Receiver<ReadRequest>, shared: Arc<Shared>) {
    for ReadRequest { ticket, capacity } in requests {
        let mut data = vec![0u8; capacity];
        let result = if shared.is_cancelled(ticket) {
            Err(aborted(IoDirection::Read))
        } else {
            reader.read(&mut data)
        };
        match &result {
            Ok(count) => data.truncate(*count),
            Err(_) => data.clear(),
        }
        trace!("Read ticket {} finished: {:?}", ticket, result);
        shared.read.complete(Completion {
            ticket,
            result,
            data,
        });
    }
    debug!("{} thread exiting", READ_THREAD_NAME);
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "channel is closed")
}

fn thread_gone_error() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "I/O thread has exited")
}

/// One I/O thread and its request queue.
struct Worker<T> {
    name: &'static str,
    requests: Sender<T>,
    handle: JoinHandle<()>,
}

impl<T: Send + 'static> Worker<T> {
    fn spawn<F>(name: &'static str, body: F) -> io::Result<Self>
    where
        F: FnOnce(Receiver<T>) + Send + 'static,
    {
        let (requests, receiver) = mpsc::channel();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(receiver))?;
        debug!("Spawned {} thread", name);
        Ok(Self {
            name,
            requests,
            handle,
        })
    }

    fn submit(&self, request: T) -> io::Result<()> {
        self.requests.send(request).map_err(|_| thread_gone_error())
    }

    fn is_alive(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Close the queue; the thread exits after its current request.
    fn stop(self) -> (&'static str, JoinHandle<()>) {
        drop(self.requests);
        (self.name, self.handle)
    }
}

struct Workers {
    reader: Worker<ReadRequest>,
    writer: Worker<WriteRequest>,
}

/// Wait up to `grace` for a stopped thread, then detach it.
fn join_within(name: &str, handle: JoinHandle<()>, grace: Duration) {
    let deadline = Instant::now() + grace;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            warn!("{} thread still blocked after {:?}; detaching", name, grace);
            return;
        }
        #[cfg(windows)]
        cancel_synchronous_io(&handle);
        thread::sleep(JOIN_POLL);
    }
    if handle.join().is_err() {
        warn!("{} thread panicked", name);
    }
}

#[cfg(windows)]
fn cancel_synchronous_io(handle: &JoinHandle<()>) {
    use std::os::windows::io::AsRawHandle;
    use windows::Win32::Foundation::HANDLE;
    use windows::Win32::System::IO::CancelSynchronousIo;

    // SAFETY: the thread handle is owned by `handle` and outlives the call.
    // A thread outside any I/O call reports ERROR_NOT_FOUND, which is fine.
    let _ = unsafe { CancelSynchronousIo(HANDLE(handle.as_raw_handle())) };
}

/// Channel driving a split blocking stream from two I/O threads.
///
/// The write slot stays signaled once its transfer completes; the read slot
/// resets when a wait observes it, since reads recur.
///
/// A completion is handed out once: a second `query_result` for the same
/// transfer reports it as still in progress.
pub struct ThreadedChannel {
    workers: Option<Workers>,
    interrupt: Option<Interrupt>,
    shared: Arc<Shared>,
    last_ticket: u64,
    write_ticket: u64,
    read_ticket: u64,
    read_outstanding: bool,
    read_data: Vec<u8>,
}

impl ThreadedChannel {
    /// Split `stream` and start one I/O thread per half.
    ///
    /// # Errors
    /// Returns an error if the stream cannot be split or a thread cannot be
    /// spawned.
    pub fn spawn<S: DeviceStream>(stream: S) -> io::Result<Self> {
        let StreamHalves {
            reader,
            writer,
            interrupt,
        } = stream.split()?;
        let shared = Arc::new(Shared::new());

        let writer_shared = Arc::clone(&shared);
        let writer = Worker::spawn(WRITE_THREAD_NAME, move |requests| {
            run_writer(writer, requests, writer_shared)
        })?;
        let reader_shared = Arc::clone(&shared);
        let reader = Worker::spawn(READ_THREAD_NAME, move |requests| {
            run_reader(reader, requests, reader_shared)
        })?;

        Ok(Self {
            workers: Some(Workers { reader, writer }),
            interrupt: Some(interrupt),
            shared,
            last_ticket: 0,
            write_ticket: 0,
            read_ticket: 0,
            read_outstanding: false,
            read_data: Vec::new(),
        })
    }

    /// Whether `close` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.workers.is_none()
    }

    fn workers(&self) -> io::Result<&Workers> {
        self.workers.as_ref().ok_or_else(closed_error)
    }

    fn next_ticket(&mut self) -> u64 {
        self.last_ticket += 1;
        self.last_ticket
    }

    fn workers_alive(&self) -> bool {
        self.workers
            .as_ref()
            .is_some_and(|workers| workers.reader.is_alive() && workers.writer.is_alive())
    }
}

impl DeviceChannel for ThreadedChannel {
    fn cancel_pending(&mut self) -> io::Result<()> {
        self.workers()?;
        if !self.workers_alive() {
            return Err(thread_gone_error());
        }
        self.shared.cancel_through(self.last_ticket);
        trace!("Cancelled transfers through ticket {}", self.last_ticket);
        Ok(())
    }

    fn issue_write(&mut self, data: Vec<u8>) -> io::Result<IssueStatus> {
        self.workers()?;
        let ticket = self.next_ticket();
        self.write_ticket = ticket;
        self.shared.write.arm(ticket);
        trace!("Issuing write ticket {} ({} bytes)", ticket, data.len());
        self.workers()?.writer.submit(WriteRequest { ticket, data })?;
        Ok(IssueStatus::Pending)
    }

    fn issue_read(&mut self, capacity: usize) -> io::Result<IssueStatus> {
        self.workers()?;
        if self.read_outstanding {
            trace!("Read ticket {} still outstanding; waiting on it again", self.read_ticket);
            return Ok(IssueStatus::Pending);
        }

        let ticket = self.next_ticket();
        self.read_ticket = ticket;
        self.shared.read.arm(ticket);
        trace!("Issuing read ticket {} ({} bytes)", ticket, capacity);
        self.workers()?.reader.submit(ReadRequest { ticket, capacity })?;
        self.read_outstanding = true;
        Ok(IssueStatus::Pending)
    }

    fn wait(&mut self, direction: IoDirection, timeout: Duration) -> WaitStatus {
        self.shared.slot(direction).wait(timeout)
    }

    fn query_result(&mut self, direction: IoDirection) -> io::Result<usize> {
        let ticket = match direction {
            IoDirection::Write => self.write_ticket,
            IoDirection::Read => self.read_ticket,
        };
        if ticket == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("no {direction} transfer has been issued"),
            ));
        }

        let completion = self
            .shared
            .slot(direction)
            .take(ticket)
            .ok_or_else(|| incomplete(direction))?;

        if direction == IoDirection::Read {
            self.read_outstanding = false;
            self.read_data = completion.data;
        }
        completion.result
    }

    fn read_buffer(&self) -> &[u8] {
        &self.read_data
    }

    fn close(&mut self) -> io::Result<()> {
        let Some(Workers { reader, writer }) = self.workers.take() else {
            return Ok(());
        };

        // Anything still queued completes as aborted without reaching the stream.
        self.shared.cancel_through(u64::MAX);
        let stopped = [reader.stop(), writer.stop()];
        if let Some(interrupt) = self.interrupt.take() {
            interrupt();
        }
        for (name, handle) in stopped {
            join_within(name, handle, CLOSE_GRACE);
        }

        self.read_outstanding = false;
        debug!("Threaded channel closed");
        Ok(())
    }
}

impl Drop for ThreadedChannel {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl fmt::Debug for ThreadedChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadedChannel")
            .field("closed", &self.is_closed())
            .field("last_ticket", &self.last_ticket)
            .field("write_ticket", &self.write_ticket)
            .field("read_ticket", &self.read_ticket)
            .field("read_outstanding", &self.read_outstanding)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Files
// ============================================================================

/// One half of a split [`fs::File`].
///
/// On Unix each call first polls the descriptor in short ticks so an
/// interrupt is noticed even while the device stays silent.
#[derive(Debug)]
pub struct FileHalf {
    file: fs::File,
    direction: IoDirection,
    stop: Arc<AtomicBool>,
}

#[cfg(unix)]
const POLL_TICK_MS: libc::c_int = 50;

impl FileHalf {
    fn stopped(&self) -> io::Result<()> {
        if self.stop.load(Ordering::Acquire) {
            return Err(aborted(self.direction));
        }
        Ok(())
    }

    #[cfg(unix)]
    fn ready(&self) -> io::Result<()> {
        use std::os::fd::AsRawFd;

        let events = match self.direction {
            IoDirection::Read => libc::POLLIN,
            IoDirection::Write => libc::POLLOUT,
        };
        let mut fd = libc::pollfd {
            fd: self.file.as_raw_fd(),
            events,
            revents: 0,
        };

        loop {
            self.stopped()?;
            // SAFETY: `fd` is one valid pollfd for the duration of the call.
            let ready = unsafe { libc::poll(&mut fd, 1, POLL_TICK_MS) };
            if ready > 0 {
                return Ok(());
            }
            if ready < 0 {
                let error = io::Error::last_os_error();
                if error.kind() != io::ErrorKind::Interrupted {
                    return Err(error);
                }
            }
        }
    }

    #[cfg(not(unix))]
    fn ready(&self) -> io::Result<()> {
        self.stopped()
    }
}

impl Read for FileHalf {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.ready()?;
        self.file.read(buf)
    }
}

impl Write for FileHalf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.ready()?;
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl DeviceStream for fs::File {
    type Reader = FileHalf;
    type Writer = FileHalf;

    fn split(self) -> io::Result<StreamHalves<FileHalf, FileHalf>> {
        let stop = Arc::new(AtomicBool::new(false));
        let writer = FileHalf {
            file: self.try_clone()?,
            direction: IoDirection::Write,
            stop: Arc::clone(&stop),
        };
        let reader = FileHalf {
            file: self,
            direction: IoDirection::Read,
            stop: Arc::clone(&stop),
        };

        Ok(StreamHalves {
            reader,
            writer,
            interrupt: Box::new(move || stop.store(true, Ordering::Release)),
        })
    }
}

/// Opens a filesystem path (device node or plain file) as a threaded channel.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileOpener;

impl FileOpener {
    /// Translate [`OpenOptions`] into filesystem open options.
    #[must_use]
    pub fn file_options(options: &OpenOptions) -> fs::OpenOptions {
        let mut builder = fs::OpenOptions::new();
        builder.read(options.read).write(options.write);

        match options.creation {
            CreationPolicy::CreateNew => {
                builder.create_new(true);
            }
            CreationPolicy::CreateAlways => {
                builder.create(true).truncate(true);
            }
            CreationPolicy::OpenExisting => {}
            CreationPolicy::OpenAlways => {
                builder.create(true);
            }
        }

        #[cfg(windows)]
        {
            use std::os::windows::fs::OpenOptionsExt;

            const FILE_SHARE_READ: u32 = 0x1;
            const FILE_SHARE_WRITE: u32 = 0x2;
            const FILE_FLAG_SEQUENTIAL_SCAN: u32 = 0x0800_0000;

            let mut share = 0;
            if options.share_read {
                share |= FILE_SHARE_READ;
            }
            if options.share_write {
                share |= FILE_SHARE_WRITE;
            }
            builder.share_mode(share);
            if options.sequential_scan {
                builder.custom_flags(FILE_FLAG_SEQUENTIAL_SCAN);
            }
        }

        builder
    }
}

impl DeviceOpener for FileOpener {
    fn open(&self, path: &str, options: &OpenOptions) -> io::Result<AnyChannel> {
        let file = Self::file_options(options).open(path)?;
        debug!("Opened {} as threaded channel", path);
        AnyChannel::threaded(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::LoopbackStream;

    const SHORT: Duration = Duration::from_millis(50);
    const LONG: Duration = Duration::from_secs(5);

    struct PanicOnRead;

    impl Read for PanicOnRead {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            panic!("device fell off the bus");
        }
    }

    impl DeviceStream for PanicOnRead {
        type Reader = Self;
        type Writer = io::Sink;

        fn split(self) -> io::Result<StreamHalves<Self, io::Sink>> {
            Ok(StreamHalves {
                reader: self,
                writer: io::sink(),
                interrupt: Box::new(|| {}),
            })
        }
    }

    #[test]
    fn test_echo_round_trip() {
        let (stream, _handle) = LoopbackStream::echo();
        let mut channel = ThreadedChannel::spawn(stream).unwrap();

        assert_eq!(channel.issue_write(vec![0x1d, 0x49, 0x02]).unwrap(), IssueStatus::Pending);
        assert_eq!(channel.wait(IoDirection::Write, LONG), WaitStatus::Signaled);
        assert_eq!(channel.query_result(IoDirection::Write).unwrap(), 3);

        channel.issue_read(4096).unwrap();
        assert_eq!(channel.wait(IoDirection::Read, LONG), WaitStatus::Signaled);
        assert_eq!(channel.query_result(IoDirection::Read).unwrap(), 3);
        assert_eq!(channel.read_buffer(), &[0x1d, 0x49, 0x02]);
    }

    #[test]
    fn test_read_times_out_then_completes() {
        let (stream, handle) = LoopbackStream::silent();
        let mut channel = ThreadedChannel::spawn(stream).unwrap();

        channel.issue_read(16).unwrap();
        assert_eq!(channel.wait(IoDirection::Read, SHORT), WaitStatus::TimedOut);
        let error = channel.query_result(IoDirection::Read).unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::WouldBlock);

        handle.push_reply(b"late");
        assert_eq!(channel.wait(IoDirection::Read, LONG), WaitStatus::Signaled);
        assert_eq!(channel.query_result(IoDirection::Read).unwrap(), 4);
        assert_eq!(channel.read_buffer(), b"late");
    }

    #[test]
    fn test_reissued_read_reuses_outstanding_one() {
        let (stream, handle) = LoopbackStream::silent();
        let mut channel = ThreadedChannel::spawn(stream).unwrap();

        channel.issue_read(8).unwrap();
        assert_eq!(channel.wait(IoDirection::Read, SHORT), WaitStatus::TimedOut);
        assert!(channel.query_result(IoDirection::Read).is_err());
        let ticket = channel.read_ticket;

        assert_eq!(channel.issue_read(8).unwrap(), IssueStatus::Pending);
        assert_eq!(channel.read_ticket, ticket);

        handle.push_reply(b"late");
        assert_eq!(channel.wait(IoDirection::Read, LONG), WaitStatus::Signaled);
        assert_eq!(channel.query_result(IoDirection::Read).unwrap(), 4);
        assert_eq!(channel.read_buffer(), b"late");

        // Once collected, the next read is a fresh transfer.
        channel.issue_read(8).unwrap();
        assert!(channel.read_ticket > ticket);
    }

    #[test]
    fn test_write_proceeds_while_read_is_blocked() {
        let (stream, handle) = LoopbackStream::echo();
        let mut channel = ThreadedChannel::spawn(stream).unwrap();

        channel.issue_read(8).unwrap();
        assert_eq!(channel.wait(IoDirection::Read, SHORT), WaitStatus::TimedOut);

        channel.issue_write(vec![0x10, 0x04]).unwrap();
        assert_eq!(channel.wait(IoDirection::Write, LONG), WaitStatus::Signaled);
        assert_eq!(channel.query_result(IoDirection::Write).unwrap(), 2);
        assert_eq!(handle.written(), vec![0x10, 0x04]);

        // The echo wakes the blocked read.
        assert_eq!(channel.wait(IoDirection::Read, LONG), WaitStatus::Signaled);
        assert_eq!(channel.query_result(IoDirection::Read).unwrap(), 2);
    }

    #[test]
    fn test_read_slot_auto_resets_write_slot_does_not() {
        let (stream, _handle) = LoopbackStream::echo();
        let mut channel = ThreadedChannel::spawn(stream).unwrap();

        channel.issue_write(vec![1]).unwrap();
        assert_eq!(channel.wait(IoDirection::Write, LONG), WaitStatus::Signaled);
        assert_eq!(channel.wait(IoDirection::Write, SHORT), WaitStatus::Signaled);

        channel.issue_read(8).unwrap();
        assert_eq!(channel.wait(IoDirection::Read, LONG), WaitStatus::Signaled);
        assert_eq!(channel.wait(IoDirection::Read, SHORT), WaitStatus::TimedOut);
        assert_eq!(channel.query_result(IoDirection::Read).unwrap(), 1);
    }

    #[test]
    fn test_read_never_exceeds_capacity() {
        let (stream, handle) = LoopbackStream::silent();
        handle.push_reply(&[7u8; 32]);
        let mut channel = ThreadedChannel::spawn(stream).unwrap();

        channel.issue_read(10).unwrap();
        assert_eq!(channel.wait(IoDirection::Read, LONG), WaitStatus::Signaled);
        assert_eq!(channel.query_result(IoDirection::Read).unwrap(), 10);
        assert_eq!(channel.read_buffer().len(), 10);
    }

    #[test]
    fn test_partial_write_reports_accepted_count() {
        let (stream, handle) = LoopbackStream::silent();
        handle.set_write_limit(Some(2));
        let mut channel = ThreadedChannel::spawn(stream).unwrap();

        channel.issue_write(vec![1, 2, 3, 4]).unwrap();
        assert_eq!(channel.wait(IoDirection::Write, LONG), WaitStatus::Signaled);
        assert_eq!(channel.query_result(IoDirection::Write).unwrap(), 2);
        assert_eq!(handle.written(), vec![1, 2]);
    }

    #[test]
    fn test_cancel_aborts_queued_read() {
        let (stream, handle) = LoopbackStream::silent();
        let mut channel = ThreadedChannel::spawn(stream).unwrap();

        // Queue a read and cancel it before the reader thread can start it.
        let workers = channel.workers.as_ref().unwrap();
        channel.shared.read.arm(1);
        channel.last_ticket = 1;
        channel.read_ticket = 1;
        channel.shared.cancel_through(1);
        workers
            .reader
            .submit(ReadRequest {
                ticket: 1,
                capacity: 8,
            })
            .unwrap();

        assert_eq!(channel.wait(IoDirection::Read, LONG), WaitStatus::Signaled);
        let error = channel.query_result(IoDirection::Read).unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::Interrupted);

        // The reply stays with the device for the next read.
        handle.push_reply(b"ok");
        channel.issue_read(8).unwrap();
        assert_eq!(channel.wait(IoDirection::Read, LONG), WaitStatus::Signaled);
        assert_eq!(channel.query_result(IoDirection::Read).unwrap(), 2);
    }

    #[test]
    fn test_slot_ignores_stale_completion() {
        let slot = Slot::new(false);
        slot.arm(2);
        slot.complete(Completion {
            ticket: 1,
            result: Ok(3),
            data: Vec::new(),
        });

        assert_eq!(slot.wait(SHORT), WaitStatus::TimedOut);
        assert!(slot.take(1).is_none());
    }

    #[test]
    fn test_cancel_fails_when_thread_is_gone() {
        let mut channel = ThreadedChannel::spawn(PanicOnRead).unwrap();
        channel.issue_read(8).unwrap();

        let deadline = Instant::now() + LONG;
        while channel.workers_alive() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }

        assert!(!channel.workers_alive());
        let error = channel.cancel_pending().unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_query_before_issue() {
        let (stream, _handle) = LoopbackStream::echo();
        let mut channel = ThreadedChannel::spawn(stream).unwrap();
        let error = channel.query_result(IoDirection::Write).unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_close_is_idempotent_and_rejects_io() {
        let (stream, _handle) = LoopbackStream::echo();
        let mut channel = ThreadedChannel::spawn(stream).unwrap();

        channel.close().unwrap();
        channel.close().unwrap();
        assert!(channel.is_closed());

        let error = channel.issue_write(vec![1]).unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::NotConnected);
        assert_eq!(channel.issue_read(8).unwrap_err().kind(), io::ErrorKind::NotConnected);
        assert_eq!(channel.cancel_pending().unwrap_err().kind(), io::ErrorKind::NotConnected);
    }

    #[test]
    fn test_close_releases_stream_with_read_pending() {
        let (stream, handle) = LoopbackStream::silent();
        let mut channel = ThreadedChannel::spawn(stream).unwrap();

        channel.issue_read(8).unwrap();
        assert_eq!(channel.wait(IoDirection::Read, SHORT), WaitStatus::TimedOut);
        assert!(!handle.is_released());

        channel.close().unwrap();
        assert!(handle.is_released());
    }

    #[test]
    fn test_file_opener_writes_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lp0");
        let path_str = path.to_str().unwrap();

        let mut channel = FileOpener.open(path_str, &OpenOptions::default()).unwrap();
        channel.issue_write(b"hello".to_vec()).unwrap();
        assert_eq!(channel.wait(IoDirection::Write, LONG), WaitStatus::Signaled);
        assert_eq!(channel.query_result(IoDirection::Write).unwrap(), 5);
        channel.close().unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
    }

    #[test]
    fn test_file_opener_open_existing_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent");
        let options = OpenOptions {
            creation: CreationPolicy::OpenExisting,
            ..OpenOptions::default()
        };

        let error = FileOpener.open(path.to_str().unwrap(), &options).unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::NotFound);
    }

    #[cfg(unix)]
    #[test]
    fn test_close_interrupts_read_on_silent_fifo() {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lp0");
        let c_path = CString::new(path.as_os_str().as_bytes()).unwrap();
        // SAFETY: c_path is a valid NUL-terminated path.
        assert_eq!(unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) }, 0);

        // Read-write keeps the open from blocking on a writer.
        let options = OpenOptions {
            creation: CreationPolicy::OpenExisting,
            ..OpenOptions::default()
        };
        let mut channel = FileOpener.open(path.to_str().unwrap(), &options).unwrap();
        channel.issue_read(8).unwrap();
        assert_eq!(channel.wait(IoDirection::Read, SHORT), WaitStatus::TimedOut);

        let started = Instant::now();
        channel.close().unwrap();
        assert!(started.elapsed() < CLOSE_GRACE);
    }
}
