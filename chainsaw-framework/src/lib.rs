//! # chainsaw-framework
//!
//! Shared plumbing for the Chainsaw log ingestion pipeline.
//!
//! ## Overview
//!
//! The framework separates *where lines come from* from *what they mean*:
//!
//! - **[`LineSource`]**: acquires raw text lines from a file, a remote file or a socket
//! - **[`LineDecoder`]**: turns raw lines into structured [`LogEvent`]s
//! - **[`EventSink`]**: receives finished events (a UI table model, a terminal printer, ...)
//!
//! [`spawn_receiver_thread`] glues the three together on a dedicated worker thread:
//!
//! ```text
//! ┌────────────┐  poll_lines()  ┌─────────────┐  decode()  ┌──────────┐  push()  ┌───────────┐
//! │ LineSource │ ─────────────> │ Vec<String> │ ─────────> │ LogEvent │ ───────> │ EventSink │
//! └────────────┘                └─────────────┘            └──────────┘          └───────────┘
//! ```
//!
//! The worker opens the source with an indefinite, fixed-backoff retry, polls it at a
//! fixed cadence and waits between cycles on a [`Shutdown`] signal, so stopping a
//! receiver is observed within one idle interval.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chainsaw_framework::{
//!     LineDecoder, LineSource, LogEvent, PollBatch, ReceiverOptions, SourceError, VecSink,
//!     spawn_receiver_thread,
//! };
//! use std::sync::Arc;
//!
//! struct StaticSource(Vec<String>);
//!
//! impl LineSource for StaticSource {
//!     fn name(&self) -> String {
//!         "static".to_string()
//!     }
//!     fn open(&mut self) -> Result<(), SourceError> {
//!         Ok(())
//!     }
//!     fn close(&mut self) {}
//!     fn poll_lines(&mut self) -> Result<PollBatch, SourceError> {
//!         Ok(PollBatch::end_of_data(self.0.drain(..).collect()))
//!     }
//! }
//!
//! struct PlainDecoder;
//!
//! impl LineDecoder for PlainDecoder {
//!     fn decode(&mut self, line: &str) -> Vec<LogEvent> {
//!         vec![LogEvent::new("static", line)]
//!     }
//!     fn flush(&mut self) -> Vec<LogEvent> {
//!         Vec::new()
//!     }
//! }
//!
//! let sink = Arc::new(VecSink::new());
//! let handle = spawn_receiver_thread(
//!     StaticSource(vec!["hello".to_string()]),
//!     Box::new(PlainDecoder),
//!     sink.clone(),
//!     None,
//!     ReceiverOptions::single_pass(),
//! );
//! handle.join();
//! assert_eq!(sink.len(), 1);
//! ```

pub mod config;
pub mod credentials;
pub mod error;
pub mod event;
pub mod filter;
pub mod receiver;
pub mod shutdown;
pub mod sink;

// re-export commonly used types
pub use config::{ChainsawConfig, ConnectionConfig, ReceiverConfig};
pub use credentials::Credentials;
pub use error::{ConfigError, SourceError};
pub use event::{DetailLevel, EventFormatter, Level, Location, LogEvent};
pub use filter::{EventFilter, TextFilter};
pub use receiver::{
    LineDecoder, LineSource, PollBatch, ReceiverHandle, ReceiverOptions, spawn_receiver_thread,
    spawn_receiver_thread_with_exit,
};
pub use shutdown::Shutdown;
pub use sink::{ChannelSink, EventSink, RingBufferSink, VecSink};
