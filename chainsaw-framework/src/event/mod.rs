//! Structured log events and their text rendering.

mod formatter;
mod log_event;

pub use formatter::{DetailLevel, EventFormatter};
pub use log_event::{Level, Location, LogEvent};
