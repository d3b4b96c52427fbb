//! Log-format templates.
//!
//! A template such as `TIMESTAMP LEVEL [THREAD] CLASS (FILE:LINE) - MESSAGE` is
//! compiled into one anchored regex with a capture group per field. Keywords are
//! recognised wherever they are not glued to other identifier characters, `*` is
//! a non-greedy wildcard and everything else is literal text.

use crate::error::FormatError;
use crate::timestamp::TimestampParser;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;

/// a field a template can capture
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Field {
    Timestamp,
    Logger,
    Level,
    Thread,
    Class,
    File,
    Line,
    Method,
    RelativeTime,
    Message,
    Ndc,
    Prop(String),
}

/// captured text per field for one logical record
pub type ParsedFields = HashMap<Field, String>;

// longest first so no keyword shadows another
const KEYWORDS: &[(&str, Field)] = &[
    ("RELATIVETIME", Field::RelativeTime),
    ("TIMESTAMP", Field::Timestamp),
    ("MESSAGE", Field::Message),
    ("LOGGER", Field::Logger),
    ("THREAD", Field::Thread),
    ("METHOD", Field::Method),
    ("LEVEL", Field::Level),
    ("CLASS", Field::Class),
    ("FILE", Field::File),
    ("LINE", Field::Line),
    ("NDC", Field::Ndc),
];

const PROP_PREFIX: &str = "PROP(";

impl Field {
    fn capture_regex<'a>(&self, timestamp: Option<&'a str>) -> &'a str {
        match self {
            Field::Message => "(.*)",
            Field::Thread | Field::Ndc | Field::Method | Field::Prop(_) => "(.*?)",
            Field::Timestamp => timestamp.unwrap_or("(.*?)"),
            Field::RelativeTime => r"(\d+)",
            Field::Logger | Field::Level | Field::Class | Field::File | Field::Line => r"(\S*?)",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Field::Prop(key) = self {
            return write!(f, "PROP({})", key);
        }
        let name = KEYWORDS
            .iter()
            .find(|(_, field)| field == self)
            .map(|(name, _)| *name)
            .unwrap_or("?");
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Field(Field),
    Wildcard,
    Whitespace,
    Literal(String),
}

/// a compiled template ready to match lines
#[derive(Debug, Clone)]
pub struct CompiledFormat {
    template: String,
    regex: Regex,
    fields: Vec<Field>,
}

impl CompiledFormat {
    /// compile a template; TIMESTAMP matches any text lazily
    pub fn compile(template: &str) -> Result<Self, FormatError> {
        Self::build(template, None)
    }

    /// compile a template whose TIMESTAMP field takes the shape of `timestamp`
    pub fn compile_with_timestamp(
        template: &str,
        timestamp: &TimestampParser,
    ) -> Result<Self, FormatError> {
        Self::build(template, Some(timestamp.regex_fragment()))
    }

    fn build(template: &str, timestamp_fragment: Option<&str>) -> Result<Self, FormatError> {
        if template.trim().is_empty() {
            return Err(FormatError::Empty);
        }
        let tokens = tokenize(template)?;

        let fields: Vec<Field> = tokens
            .iter()
            .filter_map(|t| match t {
                Token::Field(field) => Some(field.clone()),
                _ => None,
            })
            .collect();
        validate_fields(&fields)?;

        let timestamp_group = timestamp_fragment.map(|fragment| format!("({})", fragment));
        let mut pattern = String::from("^");
        for token in &tokens {
            match token {
                Token::Field(field) => {
                    pattern.push_str(field.capture_regex(timestamp_group.as_deref()))
                }
                Token::Wildcard => pattern.push_str(".*?"),
                Token::Whitespace => pattern.push_str(r"[ \t]+"),
                Token::Literal(text) => pattern.push_str(&regex::escape(text)),
            }
        }
        pattern.push('$');

        let regex = Regex::new(&pattern).map_err(|e| FormatError::Regex(e.to_string()))?;
        log::debug!("FormatParser: compiled '{}' to {}", template, pattern);

        Ok(Self {
            template: template.to_string(),
            regex,
            fields,
        })
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// fields in template order
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn has_field(&self, field: &Field) -> bool {
        self.fields.contains(field)
    }

    pub fn matches(&self, line: &str) -> bool {
        self.regex.is_match(line)
    }

    /// match one line; `None` when the line does not fit the template
    pub fn parse(&self, line: &str) -> Option<ParsedFields> {
        let caps = self.regex.captures(line)?;
        let mut parsed = ParsedFields::with_capacity(self.fields.len());
        for (index, field) in self.fields.iter().enumerate() {
            if let Some(m) = caps.get(index + 1) {
                parsed.insert(field.clone(), m.as_str().to_string());
            }
        }
        Some(parsed)
    }
}

fn validate_fields(fields: &[Field]) -> Result<(), FormatError> {
    if fields.is_empty() {
        return Err(FormatError::NoFields);
    }
    for (index, field) in fields.iter().enumerate() {
        if fields[..index].contains(field) {
            return Err(FormatError::DuplicateField(field.to_string()));
        }
    }
    if let Some(position) = fields.iter().position(|f| *f == Field::Message)
        && position + 1 != fields.len()
    {
        return Err(FormatError::MessageNotLast);
    }
    Ok(())
}

fn is_ident_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}

fn tokenize(template: &str) -> Result<Vec<Token>, FormatError> {
    let mut tokens = Vec::new();
    let mut literal = String::new();
    let mut rest = template;
    let mut prev: Option<char> = None;

    let flush = |literal: &mut String, tokens: &mut Vec<Token>| {
        if !literal.is_empty() {
            tokens.push(Token::Literal(std::mem::take(literal)));
        }
    };

    while let Some(ch) = rest.chars().next() {
        let at_boundary = !prev.is_some_and(is_ident_char);

        if at_boundary && rest.starts_with(PROP_PREFIX) {
            let after = &rest[PROP_PREFIX.len()..];
            let close = after.find(')').ok_or(FormatError::UnterminatedProperty)?;
            let key = after[..close].trim();
            if key.is_empty() {
                return Err(FormatError::EmptyPropertyKey);
            }
            flush(&mut literal, &mut tokens);
            tokens.push(Token::Field(Field::Prop(key.to_string())));
            rest = &after[close + 1..];
            prev = Some(')');
            continue;
        }

        if at_boundary
            && let Some((name, field)) = KEYWORDS.iter().find(|(name, _)| {
                rest.starts_with(name) && !rest[name.len()..].chars().next().is_some_and(is_ident_char)
            })
        {
            flush(&mut literal, &mut tokens);
            tokens.push(Token::Field(field.clone()));
            rest = &rest[name.len()..];
            prev = name.chars().last();
            continue;
        }

        if ch == '*' {
            flush(&mut literal, &mut tokens);
            tokens.push(Token::Wildcard);
        } else if ch == ' ' || ch == '\t' {
            if tokens.last() != Some(&Token::Whitespace) || !literal.is_empty() {
                flush(&mut literal, &mut tokens);
                tokens.push(Token::Whitespace);
            }
        } else {
            literal.push(ch);
        }
        rest = &rest[ch.len_utf8()..];
        prev = Some(ch);
    }
    flush(&mut literal, &mut tokens);
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE_TEMPLATE: &str = "TIMESTAMP LEVEL [THREAD] CLASS (FILE:LINE) - MESSAGE";

    fn field(parsed: &ParsedFields, field: Field) -> &str {
        parsed.get(&field).map(String::as_str).unwrap_or("<missing>")
    }

    #[test]
    fn test_example_line() {
        let ts = TimestampParser::compile("yyyy-MM-dd HH:mm:ss,SSS").unwrap();
        let format = CompiledFormat::compile_with_timestamp(EXAMPLE_TEMPLATE, &ts).unwrap();
        let parsed = format
            .parse("2024-01-01 10:00:00,000 INFO [main] Foo (Foo.java:10) - hello world")
            .unwrap();

        assert_eq!(parsed.len(), 7);
        assert_eq!(field(&parsed, Field::Timestamp), "2024-01-01 10:00:00,000");
        assert_eq!(field(&parsed, Field::Level), "INFO");
        assert_eq!(field(&parsed, Field::Thread), "main");
        assert_eq!(field(&parsed, Field::Class), "Foo");
        assert_eq!(field(&parsed, Field::File), "Foo.java");
        assert_eq!(field(&parsed, Field::Line), "10");
        assert_eq!(field(&parsed, Field::Message), "hello world");
    }

    #[test]
    fn test_example_line_without_timestamp_pattern() {
        let format = CompiledFormat::compile(EXAMPLE_TEMPLATE).unwrap();
        let parsed = format
            .parse("2024-01-01 10:00:00,000 INFO [main] Foo (Foo.java:10) - hello world")
            .unwrap();
        assert_eq!(field(&parsed, Field::Timestamp), "2024-01-01 10:00:00,000");
        assert_eq!(field(&parsed, Field::Message), "hello world");
    }

    #[test]
    fn test_round_trip_substituted_values() {
        let cases: &[(&str, &[(Field, &str)])] = &[
            (
                "LOGGER - LEVEL - MESSAGE",
                &[
                    (Field::Logger, "com.acme.Billing"),
                    (Field::Level, "WARN"),
                    (Field::Message, "card declined - retrying"),
                ],
            ),
            (
                "[THREAD] NDC PROP(user) METHOD: MESSAGE",
                &[
                    (Field::Thread, "pool-1 worker 3"),
                    (Field::Ndc, "req-42"),
                    (Field::Prop("user".to_string()), "alice"),
                    (Field::Method, "charge"),
                    (Field::Message, "ok: done"),
                ],
            ),
            (
                "RELATIVETIME LEVEL CLASS.METHOD(FILE:LINE) MESSAGE",
                &[
                    (Field::RelativeTime, "1234"),
                    (Field::Level, "DEBUG"),
                    (Field::Class, "Foo"),
                    (Field::Method, "bar"),
                    (Field::File, "Foo.java"),
                    (Field::Line, "77"),
                    (Field::Message, "x"),
                ],
            ),
        ];

        for (template, values) in cases {
            let mut line = template.to_string();
            for (field, value) in values.iter() {
                line = line.replacen(&field.to_string(), value, 1);
            }
            let format = CompiledFormat::compile(template).unwrap();
            let parsed = format
                .parse(&line)
                .unwrap_or_else(|| panic!("'{}' should match '{}'", line, template));
            for (field, value) in values.iter() {
                assert_eq!(parsed.get(field).map(String::as_str), Some(*value), "{}", template);
            }
        }
    }

    #[test]
    fn test_message_not_last_is_rejected() {
        for template in ["MESSAGE LEVEL", "TIMESTAMP MESSAGE [THREAD]", "MESSAGE - PROP(x)"] {
            assert_eq!(
                CompiledFormat::compile(template).unwrap_err(),
                FormatError::MessageNotLast,
                "{}",
                template
            );
        }
        // literal text and wildcards may follow MESSAGE
        assert!(CompiledFormat::compile("LEVEL MESSAGE *").is_ok());
        assert!(CompiledFormat::compile("LEVEL MESSAGE;").is_ok());
    }

    #[test]
    fn test_template_errors() {
        assert_eq!(CompiledFormat::compile("  ").unwrap_err(), FormatError::Empty);
        assert_eq!(CompiledFormat::compile("just text").unwrap_err(), FormatError::NoFields);
        assert_eq!(
            CompiledFormat::compile("LEVEL LEVEL MESSAGE").unwrap_err(),
            FormatError::DuplicateField("LEVEL".to_string())
        );
        assert_eq!(
            CompiledFormat::compile("PROP(user MESSAGE").unwrap_err(),
            FormatError::UnterminatedProperty
        );
        assert_eq!(
            CompiledFormat::compile("PROP() MESSAGE").unwrap_err(),
            FormatError::EmptyPropertyKey
        );
    }

    #[test]
    fn test_glued_keywords_are_literal() {
        let format = CompiledFormat::compile("MYLEVEL=LEVEL MESSAGE").unwrap();
        assert_eq!(format.fields(), &[Field::Level, Field::Message]);
        let parsed = format.parse("MYLEVEL=INFO hi").unwrap();
        assert_eq!(field(&parsed, Field::Level), "INFO");
        assert!(format.parse("OTHER=INFO hi").is_none());
    }

    #[test]
    fn test_whitespace_runs_and_wildcard() {
        let format = CompiledFormat::compile("LEVEL * MESSAGE").unwrap();
        let parsed = format.parse("INFO   ignored stuff here  the message").unwrap();
        assert_eq!(field(&parsed, Field::Level), "INFO");
        // the wildcard is lazy, so MESSAGE takes everything after the first gap it can
        assert_eq!(field(&parsed, Field::Message), "stuff here  the message");
    }

    #[test]
    fn test_no_match() {
        let format = CompiledFormat::compile("[LEVEL] MESSAGE").unwrap();
        assert!(format.parse("\tat com.acme.Foo.bar(Foo.java:1)").is_none());
        assert!(!format.matches("plain continuation"));
    }
}
