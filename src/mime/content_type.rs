//! Content-Type 值解析 (RFC 2045 §5.1, RFC 2231)
//!
//! 支持嵌套注释、引号字符串、非标准的 `<...>` 参数值，
//! 以及按序号重组的 RFC 2231 参数续行。

use std::collections::BTreeMap;

use encoding_rs::{Encoding, UTF_8};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};

use super::MimeError;

/// Characters escaped in RFC 2231 extended values.
const ATTRIBUTE_CHAR: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'*')
    .add(b'\'')
    .add(b'%')
    .add(b'(')
    .add(b')')
    .add(b'<')
    .add(b'>')
    .add(b'@')
    .add(b',')
    .add(b';')
    .add(b':')
    .add(b'\\')
    .add(b'"')
    .add(b'/')
    .add(b'[')
    .add(b']')
    .add(b'?')
    .add(b'=');

const TSPECIALS: &str = "()<>@,;:\\\"/[]?=";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentType {
    /// Lower-cased `type/subtype`.
    pub media_type: String,
    /// Parameters in first-occurrence order, names lower-cased.
    pub params: Vec<(String, String)>,
}

impl ContentType {
    pub fn new(media_type: &str) -> Self {
        Self {
            media_type: media_type.to_ascii_lowercase(),
            params: Vec::new(),
        }
    }

    pub fn with_param(mut self, name: &str, value: &str) -> Self {
        self.params.push((name.to_ascii_lowercase(), value.to_string()));
        self
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn charset(&self) -> Option<&str> {
        self.param("charset")
    }

    pub fn is_multipart(&self) -> bool {
        self.media_type.starts_with("multipart/")
    }

    /// Formats the value for a `Content-Type` header. Non-ASCII parameter
    /// values are written in RFC 2231 extended form.
    pub fn to_header_value(&self) -> String {
        let mut result = self.media_type.clone();

        for (name, value) in &self.params {
            result.push_str("; ");
            if !value.is_ascii() {
                result.push_str(&format!(
                    "{}*=utf-8''{}",
                    name,
                    utf8_percent_encode(value, ATTRIBUTE_CHAR)
                ));
            } else if !value.is_empty()
                && value
                    .chars()
                    .all(|c| c.is_ascii_graphic() && !TSPECIALS.contains(c))
            {
                result.push_str(&format!("{}={}", name, value));
            } else {
                let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
                result.push_str(&format!("{}=\"{}\"", name, escaped));
            }
        }

        result
    }
}

struct Tokenizer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl<'a> Tokenizer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().peekable(),
        }
    }

    /// Skips whitespace and (possibly nested) comments.
    fn skip_cfws(&mut self) {
        loop {
            match self.chars.peek() {
                Some(c) if c.is_whitespace() => {
                    self.chars.next();
                }
                Some('(') => {
                    self.chars.next();
                    let mut depth = 1;
                    while depth > 0 {
                        match self.chars.next() {
                            Some('\\') => {
                                self.chars.next();
                            }
                            Some('(') => depth += 1,
                            Some(')') => depth -= 1,
                            Some(_) => {}
                            None => break,
                        }
                    }
                }
                _ => break,
            }
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_cfws();
        self.chars.peek().copied()
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.chars.next();
            true
        } else {
            false
        }
    }

    fn token(&mut self) -> String {
        self.skip_cfws();
        let mut result = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_whitespace() || c.is_control() || TSPECIALS.contains(c) {
                break;
            }
            result.push(c);
            self.chars.next();
        }
        result
    }

    fn quoted_string(&mut self) -> String {
        let mut result = String::new();
        while let Some(c) = self.chars.next() {
            match c {
                '\\' => {
                    if let Some(escaped) = self.chars.next() {
                        result.push(escaped);
                    }
                }
                '"' => break,
                // Folding inside a quoted string
                '\r' | '\n' => {}
                _ => result.push(c),
            }
        }
        result
    }

    /// Parameter value: quoted string, `<...>`, or everything up to the next
    /// `;`, whitespace or comment (lenient about tspecials such as `=`).
    fn value(&mut self) -> String {
        match self.peek() {
            Some('"') => {
                self.chars.next();
                self.quoted_string()
            }
            Some('<') => {
                let mut result = String::new();
                for c in self.chars.by_ref() {
                    result.push(c);
                    if c == '>' {
                        break;
                    }
                }
                result
            }
            _ => {
                let mut result = String::new();
                while let Some(&c) = self.chars.peek() {
                    if c == ';' || c == '(' || c.is_whitespace() {
                        break;
                    }
                    result.push(c);
                    self.chars.next();
                }
                result
            }
        }
    }

    fn skip_to_semicolon(&mut self) {
        while let Some(&c) = self.chars.peek() {
            if c == ';' {
                break;
            }
            match c {
                '"' => {
                    self.chars.next();
                    self.quoted_string();
                }
                '(' => self.skip_cfws(),
                _ => {
                    self.chars.next();
                }
            }
        }
    }
}

struct Section {
    extended: bool,
    value: String,
}

/// Splits `name*3*` into (`name`, Some(3), true).
fn split_parameter_name(raw: &str) -> (String, Option<u32>, bool) {
    let lower = raw.to_ascii_lowercase();
    let (rest, extended) = match lower.strip_suffix('*') {
        Some(rest) => (rest.to_string(), true),
        None => (lower.clone(), false),
    };

    if let Some(star) = rest.rfind('*') {
        if let Ok(index) = rest[star + 1..].parse::<u32>() {
            return (rest[..star].to_string(), Some(index), extended);
        }
    }

    (rest, None, extended)
}

fn decode_bytes(bytes: &[u8], charset: Option<&str>) -> String {
    let encoding = charset
        .and_then(|label| Encoding::for_label(label.as_bytes()))
        .unwrap_or(UTF_8);
    let (decoded, _, _) = encoding.decode(bytes);
    decoded.into_owned()
}

/// Joins RFC 2231 sections in index order. Sections after the first gap
/// are ignored. Percent-decoding and the charset apply to extended sections only.
fn assemble_sections(sections: &BTreeMap<u32, Section>) -> String {
    let mut result = String::new();
    let mut charset: Option<String> = None;
    let mut pending: Vec<u8> = Vec::new();

    for (expected, (index, section)) in sections.iter().enumerate() {
        if *index != expected as u32 {
            break;
        }

        if !section.extended {
            result.push_str(&decode_bytes(&pending, charset.as_deref()));
            pending.clear();
            result.push_str(&section.value);
            continue;
        }

        let mut encoded = section.value.as_str();
        if *index == 0 {
            let mut parts = encoded.splitn(3, '\'');
            if let (Some(cs), Some(_language), Some(rest)) = (parts.next(), parts.next(), parts.next()) {
                if !cs.is_empty() {
                    charset = Some(cs.to_string());
                }
                encoded = rest;
            }
        }
        pending.extend(percent_decode_str(encoded));
    }

    result.push_str(&decode_bytes(&pending, charset.as_deref()));
    result
}

/// Parses a `Content-Type` header value into media type and parameters.
pub fn parse_content_type_value(value: &str) -> Result<ContentType, MimeError> {
    let mut tokenizer = Tokenizer::new(value);

    let main_type = tokenizer.token();
    if main_type.is_empty() || !tokenizer.eat('/') {
        return Err(MimeError::MalformedContentType(value.to_string()));
    }
    let sub_type = tokenizer.token();
    if sub_type.is_empty() {
        return Err(MimeError::MalformedContentType(value.to_string()));
    }

    let mut order: Vec<String> = Vec::new();
    let mut simple: BTreeMap<String, String> = BTreeMap::new();
    let mut continued: BTreeMap<String, BTreeMap<u32, Section>> = BTreeMap::new();

    while tokenizer.peek().is_some() {
        if !tokenizer.eat(';') {
            tokenizer.skip_to_semicolon();
            continue;
        }

        let raw_name = tokenizer.token();
        if raw_name.is_empty() || !tokenizer.eat('=') {
            tokenizer.skip_to_semicolon();
            continue;
        }
        let raw_value = tokenizer.value();

        let (name, index, extended) = split_parameter_name(&raw_name);
        if !order.contains(&name) {
            order.push(name.clone());
        }

        match (index, extended) {
            (None, false) => {
                simple.entry(name).or_insert(raw_value);
            }
            (index, extended) => {
                continued.entry(name).or_default().insert(
                    index.unwrap_or(0),
                    Section {
                        extended,
                        value: raw_value,
                    },
                );
            }
        }
    }

    let mut content_type = ContentType::new(&format!("{}/{}", main_type, sub_type));
    for name in order {
        let value = match continued.get(&name) {
            Some(sections) => assemble_sections(sections),
            None => match simple.get(&name) {
                Some(value) => value.clone(),
                None => continue,
            },
        };
        content_type.params.push((name, value));
    }

    Ok(content_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_value() {
        let ct = parse_content_type_value("Text/HTML; Charset=UTF-8").unwrap();
        assert_eq!(ct.media_type, "text/html");
        assert_eq!(ct.charset(), Some("UTF-8"));
    }

    #[test]
    fn comments_and_quoted_strings() {
        let ct = parse_content_type_value(
            "multipart/related (a (nested \\) comment)); boundary=\"a;b \\\"c\\\"\" (x); type=text/html",
        )
        .unwrap();
        assert_eq!(ct.media_type, "multipart/related");
        assert_eq!(ct.param("boundary"), Some("a;b \"c\""));
        assert_eq!(ct.param("type"), Some("text/html"));
    }

    #[test]
    fn message_id_like_value() {
        let ct = parse_content_type_value("multipart/related; start=<part2@example>; type=\"text/html\"").unwrap();
        assert_eq!(ct.param("start"), Some("<part2@example>"));
    }

    #[test]
    fn lenient_unquoted_boundary() {
        let ct = parse_content_type_value("multipart/related; boundary=----=_NextPart_01").unwrap();
        assert_eq!(ct.param("boundary"), Some("----=_NextPart_01"));
    }

    #[test]
    fn rfc2231_continuations_in_index_order() {
        let ct = parse_content_type_value(
            "application/x-stuff; title*2=\"another\"; title*0*=us-ascii'en'This%20is%20even%20more%20; title*1*=%2A%2A%2Afun%2A%2A%2A%20",
        )
        .unwrap();
        assert_eq!(ct.param("title"), Some("This is even more ***fun*** another"));
    }

    #[test]
    fn rfc2231_charset_applies_to_extended_sections_only() {
        let ct = parse_content_type_value("text/plain; name*0*=iso-8859-1''caf%E9; name*1=%20plain").unwrap();
        assert_eq!(ct.param("name"), Some("café%20plain"));
    }

    #[test]
    fn rfc2231_single_extended_value() {
        let ct = parse_content_type_value("text/plain; name*=utf-8'fr'%C3%A9t%C3%A9").unwrap();
        assert_eq!(ct.param("name"), Some("été"));
    }

    #[test]
    fn rfc2231_gap_stops_assembly() {
        let ct = parse_content_type_value("text/plain; n*0=a; n*2=c").unwrap();
        assert_eq!(ct.param("n"), Some("a"));
    }

    #[test]
    fn malformed_values_are_rejected() {
        assert!(parse_content_type_value("").is_err());
        assert!(parse_content_type_value("text").is_err());
        assert!(parse_content_type_value("text/").is_err());
    }

    #[test]
    fn formats_header_value() {
        let ct = ContentType::new("multipart/related")
            .with_param("type", "text/html")
            .with_param("boundary", "----=_Part_1")
            .with_param("title", "été");
        assert_eq!(
            ct.to_header_value(),
            "multipart/related; type=\"text/html\"; boundary=\"----=_Part_1\"; title*=utf-8''%C3%A9t%C3%A9"
        );
        let parsed = parse_content_type_value(&ct.to_header_value()).unwrap();
        assert_eq!(parsed, ct);
    }
}
