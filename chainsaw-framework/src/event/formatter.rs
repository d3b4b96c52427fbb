use super::LogEvent;

/// detail level for rendering an event (0 = message only, 4 = every header field)
pub type DetailLevel = u8;

const MAX_DETAIL_LEVEL: DetailLevel = 4;

/// renders events as single text lines for terminals, filters and clipboards
#[derive(Debug, Clone, Copy, Default)]
pub struct EventFormatter {
    time_format: Option<&'static str>,
}

impl EventFormatter {
    pub fn new() -> Self {
        Self { time_format: None }
    }

    /// use a custom chrono format string for the time column
    pub fn with_time_format(mut self, format: &'static str) -> Self {
        self.time_format = Some(format);
        self
    }

    pub fn max_detail_level(&self) -> DetailLevel {
        MAX_DETAIL_LEVEL
    }

    /// format an event for preview display at the given detail level
    ///
    /// 0 = message, 1 = time, 2 = time + level, 3 = time + level + logger,
    /// 4 = time + level + logger + thread
    pub fn format_preview(&self, event: &LogEvent, detail_level: DetailLevel) -> String {
        let content = first_non_empty_line(&event.message);
        let time = self.format_time(event);
        let thread = event.thread.as_deref().unwrap_or("");

        let field_order = [
            time.as_str(),
            event.level.as_str(),
            event.logger.as_str(),
            thread,
        ];

        let take = usize::from(detail_level.min(MAX_DETAIL_LEVEL));
        let mut parts = Vec::new();
        for field_value in field_order.iter().take(take) {
            if !field_value.is_empty() {
                parts.push(format!("[{}]", field_value));
            }
        }
        parts.push(content);
        parts.join(" ")
    }

    /// text used for filtering: the full preview plus the remaining message lines,
    /// properties and the receiver name
    pub fn get_searchable_text(&self, event: &LogEvent) -> String {
        let mut text = self.format_preview(event, MAX_DETAIL_LEVEL);
        for line in event.message.lines().skip(1) {
            text.push('\n');
            text.push_str(line);
        }
        for (key, value) in &event.properties {
            text.push_str(&format!(" {}={}", key, value));
        }
        text.push(' ');
        text.push_str(&event.source);
        text
    }

    /// full multi-line rendering, used when the detail level is at its maximum
    pub fn format_full(&self, event: &LogEvent) -> String {
        let mut out = self.format_preview(event, MAX_DETAIL_LEVEL);
        for line in event.message.lines().skip(1) {
            out.push('\n');
            out.push_str(line);
        }
        out
    }

    fn format_time(&self, event: &LogEvent) -> String {
        let format = self.time_format.unwrap_or("%Y-%m-%d %H:%M:%S%.3f");
        match event.local_time() {
            Some(time) => time.format(format).to_string(),
            None => String::new(),
        }
    }
}

/// first line of the content that is not blank after trimming
fn first_non_empty_line(content: &str) -> String {
    content
        .split('\n')
        .map(|line| line.trim())
        .find(|line| !line.is_empty())
        .unwrap_or(content)
        .to_string()
}
