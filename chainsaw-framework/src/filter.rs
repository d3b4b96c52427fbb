use crate::event::{EventFormatter, LogEvent};
use rayon::prelude::*;

/// batches larger than this are filtered in parallel
const PARALLEL_THRESHOLD: usize = 1000;

/// decides whether an event reaches the sink
///
/// This is the seam for an external rule engine evaluating a receiver's
/// `filter_expression`; [`TextFilter`] is the built-in implementation.
pub trait EventFilter: Send + Sync {
    fn matches(&self, event: &LogEvent) -> bool;

    /// filter a whole poll batch, preserving order
    fn filter_batch(&self, events: Vec<LogEvent>) -> Vec<LogEvent> {
        events.into_iter().filter(|e| self.matches(e)).collect()
    }
}

/// case-insensitive substring match over the formatted event text
pub struct TextFilter {
    /// pre-lowercased once, not per event
    pattern_lower: String,
    formatter: EventFormatter,
}

impl TextFilter {
    pub fn new(query: &str) -> Self {
        Self {
            pattern_lower: query.to_lowercase(),
            formatter: EventFormatter::new(),
        }
    }

    /// build a filter from a receiver's optional expression; blank means no filter
    pub fn from_expression(expression: Option<&str>) -> Option<Self> {
        expression
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(Self::new)
    }
}

impl EventFilter for TextFilter {
    fn matches(&self, event: &LogEvent) -> bool {
        self.formatter
            .get_searchable_text(event)
            .to_lowercase()
            .contains(&self.pattern_lower)
    }

    fn filter_batch(&self, events: Vec<LogEvent>) -> Vec<LogEvent> {
        if events.len() > PARALLEL_THRESHOLD {
            events
                .into_par_iter()
                .filter(|e| self.matches(e))
                .collect()
        } else {
            events.into_iter().filter(|e| self.matches(e)).collect()
        }
    }
}
