//! Timestamp patterns in the conventional `yyyy-MM-dd HH:mm:ss,SSS` letter style.
//!
//! Patterns are translated once into a chrono format string plus a regex
//! fragment used by the log-format matcher. The `RELATIVETIME` sentinel selects
//! millisecond offsets from the receipt time of the first record instead.

use crate::error::TimestampError;
use chrono::{DateTime, Datelike, Local, NaiveDate, NaiveDateTime, TimeZone};

/// sentinel pattern selecting relative millisecond offsets
pub const RELATIVE_TIME: &str = "RELATIVETIME";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    /// a run of one pattern letter, e.g. `yyyy` is `Letters('y', 4)`
    Letters(char, usize),
    Literal(String),
}

/// a compiled absolute timestamp pattern
#[derive(Debug, Clone)]
pub struct TimestampFormat {
    pattern: String,
    chrono_format: String,
    regex_fragment: String,
    has_year: bool,
    has_date: bool,
    has_time: bool,
    has_zone: bool,
}

impl TimestampFormat {
    pub fn compile(pattern: &str) -> Result<Self, TimestampError> {
        if pattern.trim().is_empty() {
            return Err(TimestampError::EmptyPattern);
        }
        let tokens = tokenize(pattern)?;
        let has_meridiem = tokens
            .iter()
            .any(|t| matches!(t, Token::Letters('a', _)));

        let mut chrono_format = String::new();
        let mut regex_fragment = String::new();
        let (mut has_year, mut has_date, mut has_time, mut has_zone) = (false, false, false, false);

        for token in &tokens {
            match token {
                Token::Literal(text) => {
                    for ch in text.chars() {
                        if ch == '%' {
                            chrono_format.push_str("%%");
                        } else {
                            chrono_format.push(ch);
                        }
                    }
                    regex_fragment.push_str(&literal_regex(text));
                }
                Token::Letters(letter, count) => {
                    let spec = match (*letter, *count) {
                        ('y', 2) => "%y",
                        ('y', _) => "%Y",
                        ('M', 1..=2) => "%m",
                        ('M', 3) => "%b",
                        ('M', _) => "%B",
                        ('d', _) => "%d",
                        ('H' | 'k', _) => "%H",
                        // without a meridiem marker a 12-hour field can only be read as-is
                        ('h' | 'K', _) if has_meridiem => "%I",
                        ('h' | 'K', _) => "%H",
                        ('m', _) => "%M",
                        ('s', _) => "%S",
                        ('S', 1..=3) => "%3f",
                        ('S', 4..=6) => "%6f",
                        ('S', _) => "%9f",
                        ('a', _) => "%p",
                        ('E', 1..=3) => "%a",
                        ('E', _) => "%A",
                        ('Z', _) => "%z",
                        ('X', 1..=2) => "%z",
                        ('X', _) => "%:z",
                        (other, _) => return Err(TimestampError::UnsupportedPattern(other)),
                    };
                    match letter {
                        'y' => has_year = true,
                        'M' | 'd' => has_date = true,
                        'H' | 'k' | 'h' | 'K' | 'm' | 's' | 'S' => has_time = true,
                        'Z' | 'X' => has_zone = true,
                        _ => {}
                    }
                    chrono_format.push_str(spec);
                    regex_fragment.push_str(r"\S+");
                }
            }
        }

        Ok(Self {
            pattern: pattern.to_string(),
            chrono_format,
            regex_fragment,
            has_year,
            has_date: has_date || has_year,
            has_time,
            has_zone,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// regex matching text in this pattern's shape (no capture group)
    pub fn regex_fragment(&self) -> &str {
        &self.regex_fragment
    }

    /// parse `text` into epoch milliseconds
    pub fn parse(&self, text: &str) -> Result<i64, TimestampError> {
        let text = text.trim();
        let (format, input) = if !self.has_date {
            (
                format!("%Y-%m-%d {}", self.chrono_format),
                format!("1970-01-01 {}", text),
            )
        } else if !self.has_year {
            (
                format!("%Y {}", self.chrono_format),
                format!("{} {}", Local::now().year(), text),
            )
        } else {
            (self.chrono_format.clone(), text.to_string())
        };

        let parse_error = |reason: String| TimestampError::Parse {
            text: text.to_string(),
            reason,
        };

        if self.has_zone {
            return DateTime::parse_from_str(&input, &format)
                .map(|dt| dt.timestamp_millis())
                .map_err(|e| parse_error(e.to_string()));
        }

        let naive = if self.has_time {
            NaiveDateTime::parse_from_str(&input, &format).map_err(|e| parse_error(e.to_string()))?
        } else {
            NaiveDate::parse_from_str(&input, &format)
                .map_err(|e| parse_error(e.to_string()))?
                .and_hms_opt(0, 0, 0)
                .ok_or_else(|| parse_error("invalid midnight".to_string()))?
        };

        Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.timestamp_millis())
            .ok_or_else(|| parse_error("no such local time".to_string()))
    }
}

/// millisecond offsets anchored at the receipt time of the first record
#[derive(Debug, Clone, Default)]
pub struct RelativeClock {
    anchor: Option<i64>,
}

impl RelativeClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn anchor(&self) -> Option<i64> {
        self.anchor
    }

    /// Resolve an offset received at `received_at` (epoch millis).
    ///
    /// The first call fixes the anchor; later offsets, even smaller ones, are
    /// applied to that same anchor.
    pub fn resolve(&mut self, text: &str, received_at: i64) -> Result<i64, TimestampError> {
        let offset: i64 = text
            .trim()
            .parse()
            .map_err(|_| TimestampError::InvalidRelativeTime(text.to_string()))?;
        let anchor = *self.anchor.get_or_insert(received_at);
        Ok(anchor.saturating_add(offset))
    }
}

/// a compiled timestamp pattern or the relative-time sentinel
#[derive(Debug, Clone)]
pub enum TimestampParser {
    Absolute(TimestampFormat),
    Relative(RelativeClock),
}

impl TimestampParser {
    pub fn compile(pattern: &str) -> Result<Self, TimestampError> {
        if pattern.trim() == RELATIVE_TIME {
            Ok(Self::Relative(RelativeClock::new()))
        } else {
            TimestampFormat::compile(pattern).map(Self::Absolute)
        }
    }

    pub fn regex_fragment(&self) -> &str {
        match self {
            Self::Absolute(format) => format.regex_fragment(),
            Self::Relative(_) => r"\d+",
        }
    }

    pub fn parse(&mut self, text: &str) -> Result<i64, TimestampError> {
        self.parse_at(text, Local::now().timestamp_millis())
    }

    /// like [`parse`](Self::parse) with an explicit receipt time for relative values
    pub fn parse_at(&mut self, text: &str, received_at: i64) -> Result<i64, TimestampError> {
        match self {
            Self::Absolute(format) => format.parse(text),
            Self::Relative(clock) => clock.resolve(text, received_at),
        }
    }
}

fn tokenize(pattern: &str) -> Result<Vec<Token>, TimestampError> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut tokens = Vec::new();
    let mut literal = String::new();
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        if ch.is_ascii_alphabetic() {
            let mut count = 1;
            while i + count < chars.len() && chars[i + count] == ch {
                count += 1;
            }
            if !literal.is_empty() {
                tokens.push(Token::Literal(std::mem::take(&mut literal)));
            }
            tokens.push(Token::Letters(ch, count));
            i += count;
        } else if ch == '\'' {
            // '' is an escaped quote, otherwise everything up to the next quote is literal
            if chars.get(i + 1) == Some(&'\'') {
                literal.push('\'');
                i += 2;
                continue;
            }
            i += 1;
            loop {
                match chars.get(i) {
                    None => return Err(TimestampError::UnterminatedQuote),
                    Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                        literal.push('\'');
                        i += 2;
                    }
                    Some('\'') => {
                        i += 1;
                        break;
                    }
                    Some(c) => {
                        literal.push(*c);
                        i += 1;
                    }
                }
            }
        } else {
            literal.push(ch);
            i += 1;
        }
    }
    if !literal.is_empty() {
        tokens.push(Token::Literal(literal));
    }
    Ok(tokens)
}

/// escape a literal for regex use; whitespace runs match one or more blanks
fn literal_regex(text: &str) -> String {
    let mut out = String::new();
    let mut in_space = false;
    for ch in text.chars() {
        if ch == ' ' || ch == '\t' {
            if !in_space {
                out.push_str(r"[ \t]+");
                in_space = true;
            }
        } else {
            in_space = false;
            out.push_str(&regex::escape(&ch.to_string()));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_millis(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> i64 {
        Local
            .with_ymd_and_hms(y, mo, d, h, mi, s)
            .earliest()
            .unwrap()
            .timestamp_millis()
    }

    #[test]
    fn test_default_pattern() {
        let format = TimestampFormat::compile("yyyy-MM-dd HH:mm:ss,SSS").unwrap();
        let millis = format.parse("2024-03-05 10:20:30,123").unwrap();
        assert_eq!(millis, local_millis(2024, 3, 5, 10, 20, 30) + 123);
    }

    #[test]
    fn test_explicit_zone() {
        let format = TimestampFormat::compile("yyyy-MM-dd'T'HH:mm:ssZ").unwrap();
        let millis = format.parse("2024-01-01T00:00:00+0000").unwrap();
        assert_eq!(millis, 1_704_067_200_000);
    }

    #[test]
    fn test_missing_year_uses_current_year() {
        let format = TimestampFormat::compile("MMM dd HH:mm:ss").unwrap();
        let millis = format.parse("Mar 05 10:20:30").unwrap();
        let year = Local::now().year();
        assert_eq!(millis, local_millis(year, 3, 5, 10, 20, 30));
    }

    #[test]
    fn test_time_only_uses_epoch_date() {
        let format = TimestampFormat::compile("HH:mm:ss").unwrap();
        let millis = format.parse("00:00:01").unwrap();
        assert_eq!(millis, local_millis(1970, 1, 1, 0, 0, 1));
    }

    #[test]
    fn test_twelve_hour_clock() {
        let format = TimestampFormat::compile("yyyy/MM/dd hh:mm a").unwrap();
        let millis = format.parse("2024/03/05 02:15 PM").unwrap();
        assert_eq!(millis, local_millis(2024, 3, 5, 14, 15, 0));
    }

    #[test]
    fn test_date_only() {
        let format = TimestampFormat::compile("yyyy-MM-dd").unwrap();
        let millis = format.parse("2024-03-05").unwrap();
        assert_eq!(millis, local_millis(2024, 3, 5, 0, 0, 0));
    }

    #[test]
    fn test_unsupported_letter() {
        let err = TimestampFormat::compile("yyyy-MM-dd Q").unwrap_err();
        assert_eq!(err, TimestampError::UnsupportedPattern('Q'));
    }

    #[test]
    fn test_unterminated_quote() {
        let err = TimestampFormat::compile("HH:mm 'at").unwrap_err();
        assert_eq!(err, TimestampError::UnterminatedQuote);
    }

    #[test]
    fn test_garbage_value_is_parse_error() {
        let format = TimestampFormat::compile("yyyy-MM-dd HH:mm:ss").unwrap();
        assert!(matches!(
            format.parse("not a date"),
            Err(TimestampError::Parse { .. })
        ));
    }

    #[test]
    fn test_regex_fragment_keeps_literals() {
        let format = TimestampFormat::compile("yyyy-MM-dd HH:mm:ss,SSS").unwrap();
        assert_eq!(
            format.regex_fragment(),
            r"\S+\-\S+\-\S+[ \t]+\S+:\S+:\S+,\S+"
        );
    }

    #[test]
    fn test_relative_anchor_is_fixed() {
        let mut parser = TimestampParser::compile(RELATIVE_TIME).unwrap();
        assert_eq!(parser.parse_at("100", 10_000).unwrap(), 10_100);
        // later records keep the first anchor, even with a smaller offset
        assert_eq!(parser.parse_at("50", 99_999).unwrap(), 10_050);
        assert!(matches!(
            parser.parse_at("abc", 10_000),
            Err(TimestampError::InvalidRelativeTime(_))
        ));
    }
}
