//! RFC 5322 头部：折叠、展开、头部块解析以及日期格式

use std::fmt::Display;

use chrono::{DateTime, TimeZone};

/// Longest physical header line, not counting the CRLF.
pub const MAX_HEADER_LINE_LENGTH: usize = 76;

/// A header field as found in a message, with its value unfolded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// Ordered header list with case-insensitive lookup.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Headers {
    fields: Vec<Header>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: &str, value: &str) {
        self.fields.push(Header {
            name: name.to_string(),
            value: value.to_string(),
        });
    }

    /// First value of the named header.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Removes every line break that is immediately followed by whitespace
/// (RFC 5322 §2.2.3). The whitespace itself is kept.
pub fn unfold_header_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\r' if chars.peek() == Some(&'\n') => {
                chars.next();
                if !matches!(chars.peek(), Some(' ') | Some('\t')) {
                    result.push_str("\r\n");
                }
            }
            '\n' if !matches!(chars.peek(), Some(' ') | Some('\t')) => result.push('\n'),
            '\n' => {}
            _ => result.push(c),
        }
    }

    result
}

/// Formats `Name: value`, folding at whitespace so that no physical line
/// exceeds 76 columns where the value allows it.
pub fn fold_header(name: &str, value: &str) -> String {
    let mut result = format!("{}:", name);
    let mut line_len = result.len();

    for word in value.split(' ').filter(|w| !w.is_empty()) {
        if line_len + 1 + word.len() > MAX_HEADER_LINE_LENGTH && line_len > name.len() + 1 {
            result.push_str("\r\n");
            line_len = 0;
        }
        result.push(' ');
        result.push_str(word);
        line_len += 1 + word.len();
    }

    result
}

/// Formats a header whose value has no whitespace to fold at (such as a
/// URI), breaking it into continuation lines. Readers must remove all
/// whitespace from the unfolded value (RFC 2557 §4.3).
pub fn fold_uri_header(name: &str, uri: &str) -> String {
    let mut result = format!("{}: ", name);
    let mut line_len = result.len();

    for c in uri.chars() {
        if line_len + c.len_utf8() > MAX_HEADER_LINE_LENGTH {
            result.push_str("\r\n ");
            line_len = 1;
        }
        result.push(c);
        line_len += c.len_utf8();
    }

    result
}

/// Decodes raw header bytes: UTF-8 when valid, ISO-8859-1 otherwise.
fn header_bytes_to_string(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

/// Parses a header block. Returns the headers and the offset of the body,
/// which starts after the first empty line (or at the end of the input).
pub fn parse_header_block(data: &[u8]) -> (Headers, usize) {
    let mut headers = Headers::new();
    let mut current: Option<(String, String)> = None;
    let mut pos = 0;

    while pos < data.len() {
        let line_end = data[pos..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|i| pos + i)
            .unwrap_or(data.len());
        let next = (line_end + 1).min(data.len());
        let mut line = &data[pos..line_end];
        if line.last() == Some(&b'\r') {
            line = &line[..line.len() - 1];
        }

        if line.is_empty() {
            pos = next;
            break;
        }

        if line[0] == b' ' || line[0] == b'\t' {
            if let Some((_, value)) = current.as_mut() {
                value.push_str(&header_bytes_to_string(line));
            }
        } else if let Some(colon) = line.iter().position(|&b| b == b':') {
            if let Some((name, value)) = current.take() {
                headers.push(&name, value.trim());
            }
            let name = header_bytes_to_string(&line[..colon]).trim().to_string();
            let value = header_bytes_to_string(&line[colon + 1..]);
            current = Some((name, value));
        }
        // Lines that are neither fields nor continuations are ignored

        pos = next;
    }

    if let Some((name, value)) = current.take() {
        headers.push(&name, value.trim());
    }

    (headers, pos)
}

/// Formats a date/time as RFC 5322 requires: `Dow, DD Mon YYYY HH:MM:SS ±ZZZZ`.
pub fn get_date_time_specification<Tz>(date_time: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    date_time.format("%a, %d %b %Y %H:%M:%S %z").to_string()
}
