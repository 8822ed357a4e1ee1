use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::{Captures, Regex};

use crate::error::ParseError;
use crate::model::LogEntry;

/// Server id assigned to lines that carry no `serverID:` prefix.
pub const DEFAULT_SERVER_ID: &str = "server_default";

const TIMESTAMP_FORMAT: &str = "%d/%b/%Y:%H:%M:%S %z";

// srv1: 192.168.1.1 - - [22/Apr/2025:13:37:42 +0000] "GET /home HTTP/1.1" 200 532 "-" "Mozilla/5.0"
static TAGGED_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^([^:]+): ([\d\.]+) - \S+ \[([^\]]+)\] "([A-Z]+) ([^"]+) HTTP/\d\.\d" (\d{3}) \d+ "[^"]*" "([^"]+)"$"#,
    )
    .unwrap()
});

static UNTAGGED_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^([\d\.]+) - \S+ \[([^\]]+)\] "([A-Z]+) ([^"]+) HTTP/\d\.\d" (\d{3}) \d+ "[^"]*" "([^"]+)"$"#,
    )
    .unwrap()
});

// chrono accepts single-digit fields and `+hh:mm` offsets, so the layout is checked first.
static TIMESTAMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{2}/[A-Z][a-z]{2}/\d{4}:\d{2}:\d{2}:\d{2} [+-]\d{4}$").unwrap()
});

/// Parses raw access-log lines into [`LogEntry`] values.
#[derive(Clone, Debug)]
pub struct LogParser {
    default_server_id: String,
}

impl Default for LogParser {
    fn default() -> Self {
        Self::new(DEFAULT_SERVER_ID)
    }
}

impl LogParser {
    /// Creates a parser that assigns `default_server_id` to untagged lines.
    pub fn new(default_server_id: impl Into<String>) -> Self {
        Self {
            default_server_id: default_server_id.into(),
        }
    }

    /// Parses one line.
    ///
    /// The server-tagged shape is tried first. A shape that matches but
    /// carries an unconvertible timestamp fails immediately.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::Unrecognized`] when neither shape matches, or the
    /// conversion error for the timestamp or status code.
    pub fn parse(&self, line: &str) -> Result<LogEntry, ParseError> {
        if let Some(captures) = TAGGED_LINE.captures(line) {
            return build_entry(field(&captures, 1).to_string(), &captures, 2);
        }

        if let Some(captures) = UNTAGGED_LINE.captures(line) {
            return build_entry(self.default_server_id.clone(), &captures, 1);
        }

        Err(ParseError::Unrecognized(line.to_string()))
    }
}

/// Parses one line with the default server id for untagged lines.
///
/// # Errors
///
/// See [`LogParser::parse`].
pub fn parse_line(line: &str) -> Result<LogEntry, ParseError> {
    LogParser::default().parse(line)
}

// Fields after the optional server id appear in the same order in both shapes.
fn build_entry(
    server_id: String,
    captures: &Captures<'_>,
    first: usize,
) -> Result<LogEntry, ParseError> {
    let raw_timestamp = field(captures, first + 1);
    if !TIMESTAMP.is_match(raw_timestamp) {
        return Err(ParseError::TimestampLayout(raw_timestamp.to_string()));
    }

    let timestamp = DateTime::parse_from_str(raw_timestamp, TIMESTAMP_FORMAT)?;
    let status_code = field(captures, first + 4).parse::<u16>()?;

    Ok(LogEntry {
        server_id,
        client_ip: field(captures, first).to_string(),
        timestamp: timestamp.with_timezone(&Utc),
        method: field(captures, first + 2).to_string(),
        endpoint: field(captures, first + 3).to_string(),
        status_code,
        user_agent: field(captures, first + 5).to_string(),
    })
}

fn field<'h>(captures: &Captures<'h>, index: usize) -> &'h str {
    captures.get(index).map_or("", |m| m.as_str())
}
