//! Line sources, decoders and the receiver worker thread that drives them.
//!
//! # Architecture
//!
//! ```text
//!            open() ── fails ──> wait retry_interval ──┐
//!              │                                       │
//!              ▼                                       │
//! ┌─────> poll_lines() ──> decode() ──> filter ──> EventSink
//! │            │
//! │            ├─ Disconnected ──> close() ──> back to open() ───┘
//! │            ├─ Transient ─────> log, skip the cycle
//! │            └─ StreamClosed ──> stop
//! │            ▼
//! └──── wait poll_interval (interruptible)
//! ```

use crate::error::SourceError;
use crate::event::LogEvent;
use crate::filter::EventFilter;
use crate::shutdown::Shutdown;
use crate::sink::EventSink;
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

/// idle wait between successful poll cycles while tailing
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// wait between attempts to open a source that is not reachable yet
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// raw lines returned by one poll cycle
#[derive(Debug, Default)]
pub struct PollBatch {
    pub lines: Vec<String>,
    /// the source read everything currently available; pending records can be flushed
    pub at_end: bool,
}

impl PollBatch {
    pub fn new(lines: Vec<String>) -> Self {
        Self {
            lines,
            at_end: false,
        }
    }

    pub fn end_of_data(lines: Vec<String>) -> Self {
        Self {
            lines,
            at_end: true,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

/// Trait for acquiring raw log lines from any source.
///
/// Implement this trait to define where lines come from (local files, remote files,
/// sockets). The source is responsible for:
/// - Opening and re-opening its resource
/// - Returning complete lines, in order, since the last poll
/// - Releasing its resource on `close()`
///
/// # Non-blocking Contract
///
/// `poll_lines()` should return promptly. The driver calls it once per cycle and
/// waits [`ReceiverOptions::poll_interval`] between cycles.
///
/// # Thread Safety
///
/// Sources run on a dedicated worker via [`spawn_receiver_thread`], so the trait
/// requires `Send`.
pub trait LineSource: Send {
    /// human-readable name used in log messages (never contains secrets)
    fn name(&self) -> String;

    /// Acquire the underlying resource.
    ///
    /// A [`SourceError::Connection`] makes the driver wait
    /// [`ReceiverOptions::retry_interval`] and try again, indefinitely.
    fn open(&mut self) -> Result<(), SourceError>;

    /// Release the underlying resource. Must be idempotent.
    fn close(&mut self);

    /// Return the lines that arrived since the previous call.
    fn poll_lines(&mut self) -> Result<PollBatch, SourceError>;
}

impl<S: LineSource + ?Sized> LineSource for Box<S> {
    fn name(&self) -> String {
        (**self).name()
    }

    fn open(&mut self) -> Result<(), SourceError> {
        (**self).open()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn poll_lines(&mut self) -> Result<PollBatch, SourceError> {
        (**self).poll_lines()
    }
}

/// Trait for turning raw lines into structured events.
///
/// Decoders are stateful: a logical record may span several lines, so `decode`
/// returns zero or more completed events and `flush` returns whatever is pending.
pub trait LineDecoder: Send {
    fn decode(&mut self, line: &str) -> Vec<LogEvent>;

    fn flush(&mut self) -> Vec<LogEvent>;
}

/// timing and mode of a receiver worker
#[derive(Debug, Clone)]
pub struct ReceiverOptions {
    /// keep polling after the first pass
    pub tailing: bool,
    pub poll_interval: Duration,
    pub retry_interval: Duration,
}

impl ReceiverOptions {
    pub fn tailing() -> Self {
        Self {
            tailing: true,
            poll_interval: DEFAULT_POLL_INTERVAL,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }

    pub fn single_pass() -> Self {
        Self {
            tailing: false,
            ..Self::tailing()
        }
    }

    pub fn with_intervals(mut self, poll_interval: Duration, retry_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.retry_interval = retry_interval;
        self
    }
}

impl Default for ReceiverOptions {
    fn default() -> Self {
        Self::tailing()
    }
}

/// owner-side handle of a running receiver worker
pub struct ReceiverHandle {
    name: String,
    shutdown: Shutdown,
    connected: Arc<AtomicBool>,
    opened: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl ReceiverHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask the worker to stop. Idempotent, callable from any thread; the worker
    /// observes it within one idle interval and closes its source.
    pub fn stop(&self) {
        self.shutdown.close();
    }

    /// `true` once the source was opened and until it is lost or closed
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// `true` once the source was opened at least once, even if it is now reconnecting
    pub fn has_opened(&self) -> bool {
        self.opened.load(Ordering::Acquire)
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(|t| t.is_finished())
    }

    /// wait for the worker to exit
    pub fn join(mut self) {
        self.join_inner();
    }

    /// stop the worker and wait for it to exit
    pub fn stop_and_join(mut self) {
        self.stop();
        self.join_inner();
    }

    fn join_inner(&mut self) {
        if let Some(handle) = self.thread.take()
            && handle.join().is_err()
        {
            log::error!("Receiver '{}': worker thread panicked", self.name);
        }
    }
}

/// Spawns a worker thread that runs a source and feeds decoded events into a sink.
///
/// # Lifecycle
///
/// 1. Calls `source.open()`, retrying every `retry_interval` until it succeeds or
///    the handle is stopped
/// 2. Loops: `poll_lines()` → `decoder.decode()` → optional filter → `sink.push()`
/// 3. Waits `poll_interval` between cycles (one cycle only when not tailing)
/// 4. On stop, stream close or single-pass completion: flushes the decoder, calls
///    `source.close()` and runs `on_exit`
///
/// # Errors
///
/// - Open failures are logged and retried, never returned
/// - Transient poll errors are logged and the cycle is skipped
/// - Disconnects close the source and go back to step 1
/// - [`SourceError::StreamClosed`] ends the worker
pub fn spawn_receiver_thread<S>(
    source: S,
    decoder: Box<dyn LineDecoder>,
    sink: Arc<dyn EventSink>,
    filter: Option<Arc<dyn EventFilter>>,
    options: ReceiverOptions,
) -> ReceiverHandle
where
    S: LineSource + 'static,
{
    spawn_receiver_thread_with_exit(source, decoder, sink, filter, options, None)
}

/// like [`spawn_receiver_thread`], running `on_exit` on the worker after it stops
pub fn spawn_receiver_thread_with_exit<S>(
    mut source: S,
    mut decoder: Box<dyn LineDecoder>,
    sink: Arc<dyn EventSink>,
    filter: Option<Arc<dyn EventFilter>>,
    options: ReceiverOptions,
    on_exit: Option<Box<dyn FnOnce() + Send>>,
) -> ReceiverHandle
where
    S: LineSource + 'static,
{
    let name = source.name();
    let shutdown = Shutdown::new();
    let connected = Arc::new(AtomicBool::new(false));
    let opened = Arc::new(AtomicBool::new(false));

    let worker = Worker {
        name: name.clone(),
        shutdown: shutdown.clone(),
        connected: connected.clone(),
        opened: opened.clone(),
        sink,
        filter,
        options,
    };

    let thread = thread::Builder::new()
        .name(format!("receiver-{}", name))
        .spawn(move || {
            worker.run(&mut source, decoder.as_mut());
            if let Some(on_exit) = on_exit {
                on_exit();
            }
        });

    let thread = match thread {
        Ok(handle) => Some(handle),
        Err(e) => {
            log::error!("Receiver '{}': failed to spawn worker thread: {}", name, e);
            None
        }
    };

    ReceiverHandle {
        name,
        shutdown,
        connected,
        opened,
        thread,
    }
}

struct Worker {
    name: String,
    shutdown: Shutdown,
    connected: Arc<AtomicBool>,
    opened: Arc<AtomicBool>,
    sink: Arc<dyn EventSink>,
    filter: Option<Arc<dyn EventFilter>>,
    options: ReceiverOptions,
}

impl Worker {
    fn run(&self, source: &mut dyn LineSource, decoder: &mut dyn LineDecoder) {
        log::debug!("Receiver '{}': worker started", self.name);

        'connection: while self.open_with_retry(source) {
            self.connected.store(true, Ordering::Release);
            self.opened.store(true, Ordering::Release);

            loop {
                match source.poll_lines() {
                    Ok(batch) => {
                        let flush = batch.at_end || batch.lines.is_empty();
                        let mut events = Vec::new();
                        for line in &batch.lines {
                            events.extend(decoder.decode(line));
                        }
                        if flush {
                            events.extend(decoder.flush());
                        }
                        self.emit(events);
                    }
                    Err(SourceError::StreamClosed) => {
                        log::info!("Receiver '{}': stream closed", self.name);
                        break 'connection;
                    }
                    Err(SourceError::Transient(e)) => {
                        log::warn!("Receiver '{}': read failed, skipping cycle: {}", self.name, e);
                    }
                    Err(e @ (SourceError::Disconnected(_) | SourceError::Connection(_))) => {
                        log::warn!("Receiver '{}': {}, reconnecting", self.name, e);
                        self.connected.store(false, Ordering::Release);
                        source.close();
                        if self.shutdown.wait_timeout(self.options.retry_interval) {
                            break 'connection;
                        }
                        continue 'connection;
                    }
                }

                if !self.options.tailing {
                    log::debug!("Receiver '{}': single pass complete", self.name);
                    break 'connection;
                }
                if self.shutdown.wait_timeout(self.options.poll_interval) {
                    break 'connection;
                }
            }
        }

        self.emit(decoder.flush());
        self.connected.store(false, Ordering::Release);
        source.close();
        log::debug!("Receiver '{}': worker stopped", self.name);
    }

    /// returns `false` if shutdown was requested before the source opened
    fn open_with_retry(&self, source: &mut dyn LineSource) -> bool {
        loop {
            if self.shutdown.is_closed() {
                return false;
            }
            match source.open() {
                Ok(()) => {
                    log::info!("Receiver '{}': connected", self.name);
                    return true;
                }
                Err(SourceError::StreamClosed) => return false,
                Err(e) => {
                    log::warn!(
                        "Receiver '{}': open failed ({}), retrying in {}s",
                        self.name,
                        e,
                        self.options.retry_interval.as_secs_f32()
                    );
                }
            }
            if self.shutdown.wait_timeout(self.options.retry_interval) {
                return false;
            }
        }
    }

    fn emit(&self, events: Vec<LogEvent>) {
        if events.is_empty() {
            return;
        }
        let events = match &self.filter {
            Some(filter) => filter.filter_batch(events),
            None => events,
        };
        log::debug!("Receiver '{}': emitting {} events", self.name, events.len());
        for event in events {
            self.sink.push(event);
        }
    }
}
