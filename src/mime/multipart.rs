//! multipart/related 消息的解析与生成 (RFC 2046 §5.1, RFC 2387)

use super::base64::{decode_base64, encode_base64};
use super::content_type::{parse_content_type_value, ContentType};
use super::header::{fold_header, parse_header_block, Headers};
use super::quoted_printable::{decode_quoted_printable, encode_quoted_printable_text};
use super::MimeError;

/// Multipart nesting deeper than this is rejected.
const MAX_NESTING: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferEncoding {
    SevenBit,
    EightBit,
    Binary,
    QuotedPrintable,
    Base64,
}

impl TransferEncoding {
    pub fn from_header(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("quoted-printable") => TransferEncoding::QuotedPrintable,
            Some("base64") => TransferEncoding::Base64,
            Some("8bit") => TransferEncoding::EightBit,
            Some("binary") => TransferEncoding::Binary,
            _ => TransferEncoding::SevenBit,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferEncoding::SevenBit => "7bit",
            TransferEncoding::EightBit => "8bit",
            TransferEncoding::Binary => "binary",
            TransferEncoding::QuotedPrintable => "quoted-printable",
            TransferEncoding::Base64 => "base64",
        }
    }

    /// Picks the encoding for a body about to be written: textual bodies
    /// that are already short-lined CRLF ASCII go as 7bit, other textual
    /// bodies as quoted-printable, everything else as base64.
    pub fn choose(data: &[u8], textual: bool) -> Self {
        if !textual {
            return TransferEncoding::Base64;
        }
        if is_seven_bit_safe(data) {
            TransferEncoding::SevenBit
        } else {
            TransferEncoding::QuotedPrintable
        }
    }

    pub fn encode(&self, data: &[u8]) -> Vec<u8> {
        match self {
            TransferEncoding::QuotedPrintable => encode_quoted_printable_text(data).into_bytes(),
            TransferEncoding::Base64 => encode_base64(data).into_bytes(),
            _ => data.to_vec(),
        }
    }

    pub fn decode(&self, raw: &[u8]) -> Vec<u8> {
        match self {
            TransferEncoding::QuotedPrintable => {
                decode_quoted_printable(&String::from_utf8_lossy(raw))
            }
            TransferEncoding::Base64 => decode_base64(&String::from_utf8_lossy(raw)),
            _ => raw.to_vec(),
        }
    }
}

fn is_seven_bit_safe(data: &[u8]) -> bool {
    let mut column = 0;
    let mut i = 0;

    while i < data.len() {
        match data[i] {
            b'\r' if data.get(i + 1) == Some(&b'\n') => {
                column = 0;
                i += 2;
                continue;
            }
            b'\r' | b'\n' | 0 => return false,
            byte if byte >= 0x80 => return false,
            _ => column += 1,
        }
        if column > 76 {
            return false;
        }
        i += 1;
    }

    // A final line starting with the boundary prefix could be confused with a delimiter
    !data.starts_with(b"--") && !data.windows(4).any(|w| w == b"\r\n--")
}

/// A parsed MIME entity. Multipart entities carry their children in `parts`
/// and keep the raw body (preamble through epilogue) in `body`.
#[derive(Clone, Debug, Default)]
pub struct MimeEntity {
    pub headers: Headers,
    pub body: Vec<u8>,
    pub parts: Vec<MimeEntity>,
}

impl MimeEntity {
    pub fn content_type(&self) -> Option<ContentType> {
        self.headers
            .get("Content-Type")
            .and_then(|v| parse_content_type_value(v).ok())
    }

    pub fn transfer_encoding(&self) -> TransferEncoding {
        TransferEncoding::from_header(self.headers.get("Content-Transfer-Encoding"))
    }

    /// Body with the transfer encoding removed.
    pub fn decoded_body(&self) -> Vec<u8> {
        self.transfer_encoding().decode(&self.body)
    }
}

/// Parses a complete MIME message, recursing into multipart bodies.
pub fn parse_entity(data: &[u8]) -> Result<MimeEntity, MimeError> {
    parse_entity_at_depth(data, 0)
}

fn parse_entity_at_depth(data: &[u8], depth: usize) -> Result<MimeEntity, MimeError> {
    if depth > MAX_NESTING {
        return Err(MimeError::TooDeeplyNested);
    }

    let (headers, body_offset) = parse_header_block(data);
    let mut entity = MimeEntity {
        headers,
        body: data[body_offset..].to_vec(),
        parts: Vec::new(),
    };

    // An unparsable Content-Type is treated as a leaf part
    let content_type = match entity.content_type() {
        Some(content_type) => content_type,
        None => return Ok(entity),
    };

    if content_type.is_multipart() {
        let boundary = content_type
            .param("boundary")
            .filter(|b| !b.is_empty())
            .ok_or(MimeError::MissingBoundary)?;

        for part in split_multipart_body(&entity.body, boundary)? {
            entity.parts.push(parse_entity_at_depth(part, depth + 1)?);
        }
    }

    Ok(entity)
}

/// Returns the raw bytes of every body part between boundary delimiters.
/// A missing closing delimiter is tolerated; a body with no delimiter at all is not.
pub fn split_multipart_body<'a>(body: &'a [u8], boundary: &str) -> Result<Vec<&'a [u8]>, MimeError> {
    let delimiter = format!("--{}", boundary);
    let delimiter = delimiter.as_bytes();
    let mut parts = Vec::new();
    let mut part_start: Option<usize> = None;
    let mut seen_delimiter = false;
    let mut pos = 0;

    while pos < body.len() {
        let line_end = body[pos..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|i| pos + i)
            .unwrap_or(body.len());
        let next = (line_end + 1).min(body.len());
        let line = trim_line_end(&body[pos..line_end]);

        if line.starts_with(delimiter) {
            let rest = &line[delimiter.len()..];
            let closing = rest.starts_with(b"--");
            let rest = if closing { &rest[2..] } else { rest };

            if rest.iter().all(|b| *b == b' ' || *b == b'\t') {
                seen_delimiter = true;
                if let Some(start) = part_start.take() {
                    parts.push(strip_preceding_line_break(&body[start..pos.max(start)]));
                }
                if closing {
                    return Ok(parts);
                }
                part_start = Some(next);
            }
        }

        pos = next;
    }

    if !seen_delimiter {
        return Err(MimeError::MissingDelimiter(boundary.to_string()));
    }
    if let Some(start) = part_start {
        if start < body.len() {
            parts.push(&body[start..]);
        }
    }

    Ok(parts)
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    match line.last() {
        Some(b'\r') => &line[..line.len() - 1],
        _ => line,
    }
}

/// The line break before a delimiter belongs to the delimiter.
fn strip_preceding_line_break(part: &[u8]) -> &[u8] {
    if part.ends_with(b"\r\n") {
        &part[..part.len() - 2]
    } else if part.ends_with(b"\n") {
        &part[..part.len() - 1]
    } else {
        part
    }
}

/// One body part ready to be written.
pub struct OutgoingPart {
    /// Header lines without the trailing CRLF, already folded.
    pub header_lines: Vec<String>,
    pub content_type: ContentType,
    pub encoding: TransferEncoding,
    /// Body before transfer encoding.
    pub data: Vec<u8>,
}

/// Writes a multipart message into a byte buffer.
pub struct MultipartWriter {
    boundary: String,
    out: Vec<u8>,
}

impl MultipartWriter {
    /// Starts the message with the given top-level header lines; the
    /// `Content-Type` header is generated from `content_type`, which must
    /// carry the boundary parameter.
    pub fn new(header_lines: &[String], content_type: &ContentType) -> Result<Self, MimeError> {
        let boundary = content_type
            .param("boundary")
            .ok_or(MimeError::MissingBoundary)?
            .to_string();
        let mut out = Vec::new();

        for line in header_lines {
            out.extend_from_slice(line.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(fold_header("Content-Type", &content_type.to_header_value()).as_bytes());
        out.extend_from_slice(b"\r\n\r\nThis is a multi-part message in MIME format.\r\n");

        Ok(Self { boundary, out })
    }

    pub fn add_part(&mut self, part: &OutgoingPart) {
        self.out.extend_from_slice(b"\r\n--");
        self.out.extend_from_slice(self.boundary.as_bytes());
        self.out.extend_from_slice(b"\r\n");

        self.out.extend_from_slice(
            fold_header("Content-Type", &part.content_type.to_header_value()).as_bytes(),
        );
        self.out.extend_from_slice(b"\r\nContent-Transfer-Encoding: ");
        self.out.extend_from_slice(part.encoding.as_str().as_bytes());
        self.out.extend_from_slice(b"\r\n");
        for line in &part.header_lines {
            self.out.extend_from_slice(line.as_bytes());
            self.out.extend_from_slice(b"\r\n");
        }
        self.out.extend_from_slice(b"\r\n");
        self.out.extend_from_slice(&part.encoding.encode(&part.data));
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.out.extend_from_slice(b"\r\n--");
        self.out.extend_from_slice(self.boundary.as_bytes());
        self.out.extend_from_slice(b"--\r\n");
        self.out
    }
}
