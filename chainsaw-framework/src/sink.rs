//! Event sinks: where finished [`LogEvent`]s are pushed.
//!
//! The core never keeps a reference to an event after pushing it; the sink owns it.

use crate::event::LogEvent;
use ringbuf::{
    HeapCons, HeapProd, HeapRb,
    traits::{Producer, Split},
};
use std::sync::{
    Mutex, PoisonError,
    atomic::{AtomicU64, Ordering},
    mpsc,
};

/// receives structured events from receivers
///
/// Implementations are shared between every running receiver thread, so `push`
/// must be cheap and must not block for long.
pub trait EventSink: Send + Sync {
    fn push(&self, event: LogEvent);
}

/// bounded sink backed by a heap ring buffer; drops new events when full
pub struct RingBufferSink {
    producer: Mutex<HeapProd<LogEvent>>,
    dropped: AtomicU64,
}

impl RingBufferSink {
    /// create the sink and the consumer half that the display side drains
    pub fn new(capacity: usize) -> (Self, HeapCons<LogEvent>) {
        let ring_buffer = HeapRb::<LogEvent>::new(capacity.max(1));
        let (producer, consumer) = ring_buffer.split();
        let sink = Self {
            producer: Mutex::new(producer),
            dropped: AtomicU64::new(0),
        };
        (sink, consumer)
    }

    /// number of events discarded because the buffer was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl EventSink for RingBufferSink {
    fn push(&self, event: LogEvent) {
        let mut producer = self
            .producer
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if producer.try_push(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            log::debug!("Ring buffer full, dropping event");
        }
    }
}

/// forwards events over an mpsc channel
pub struct ChannelSink {
    sender: Mutex<mpsc::Sender<LogEvent>>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::Receiver<LogEvent>) {
        let (sender, receiver) = mpsc::channel();
        (
            Self {
                sender: Mutex::new(sender),
            },
            receiver,
        )
    }
}

impl EventSink for ChannelSink {
    fn push(&self, event: LogEvent) {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        if sender.send(event).is_err() {
            log::debug!("Event channel closed, dropping event");
        }
    }
}

/// unbounded in-memory sink; handy for tests and batch tools
#[derive(Default)]
pub struct VecSink {
    events: Mutex<Vec<LogEvent>>,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// clone of everything received so far, in arrival order
    pub fn snapshot(&self) -> Vec<LogEvent> {
        self.lock().clone()
    }

    /// take everything received so far
    pub fn drain(&self) -> Vec<LogEvent> {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<LogEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EventSink for VecSink {
    fn push(&self, event: LogEvent) {
        self.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringbuf::traits::Consumer;

    #[test]
    fn test_ring_buffer_sink_drops_when_full() {
        let (sink, mut consumer) = RingBufferSink::new(2);
        sink.push(LogEvent::new("t", "one"));
        sink.push(LogEvent::new("t", "two"));
        sink.push(LogEvent::new("t", "three"));
        assert_eq!(sink.dropped(), 1);

        let first = consumer.try_pop().map(|e| e.message);
        let second = consumer.try_pop().map(|e| e.message);
        assert_eq!(first.as_deref(), Some("one"));
        assert_eq!(second.as_deref(), Some("two"));
        assert!(consumer.try_pop().is_none());
    }

    #[test]
    fn test_channel_sink_forwards() {
        let (sink, receiver) = ChannelSink::new();
        sink.push(LogEvent::new("t", "hello"));
        assert_eq!(receiver.recv().unwrap().message, "hello");
    }

    #[test]
    fn test_vec_sink_keeps_order() {
        let sink = VecSink::new();
        sink.push(LogEvent::new("t", "a"));
        sink.push(LogEvent::new("t", "b"));
        let messages: Vec<String> = sink.drain().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["a", "b"]);
        assert!(sink.is_empty());
    }
}
