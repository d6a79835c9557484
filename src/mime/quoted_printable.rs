//! Quoted-Printable 传输编码 (RFC 2045 §6.7)
//!
//! 编码器对二进制数据是安全的：只有原始数据中的 CRLF 才会成为硬换行，
//! 单独出现的 CR 或 LF 会被转义。文本部分在编码前先通过
//! [`normalize_line_endings`] 统一为 CRLF。

/// Longest physical line, counted without the trailing CRLF.
pub const MAX_LINE_LENGTH: usize = 76;

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

/// Octets that may appear literally: `[!-<>-~ \t]`.
fn is_literal(byte: u8) -> bool {
    matches!(byte, b'!'..=b'<' | b'>'..=b'~' | b' ' | b'\t')
}

/// Rewrites every CR, LF and CRLF line ending into CRLF.
pub fn normalize_line_endings(data: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(data.len() + data.len() / 32);
    let mut i = 0;

    while i < data.len() {
        match data[i] {
            b'\r' => {
                result.extend_from_slice(b"\r\n");
                if data.get(i + 1) == Some(&b'\n') {
                    i += 1;
                }
            }
            b'\n' => result.extend_from_slice(b"\r\n"),
            byte => result.push(byte),
        }
        i += 1;
    }

    result
}

/// Encodes bytes as quoted-printable.
///
/// Every octet outside `[!-<>-~ \t]` is escaped as `=XX`. Output lines never
/// exceed 76 visible columns; longer lines are wrapped with soft line breaks
/// (`=\r\n`). A space or tab right before a hard line break (or at the very end
/// of the data) is escaped so that transports cannot strip it.
pub fn encode_quoted_printable(data: &[u8]) -> String {
    let mut result = String::with_capacity(data.len() * 3 / 2);

    for (index, line) in split_hard_lines(data).iter().enumerate() {
        if index > 0 {
            result.push_str("\r\n");
        }
        encode_line(line, &mut result);
    }

    result
}

/// Normalizes line endings to CRLF, then encodes as quoted-printable.
pub fn encode_quoted_printable_text(data: &[u8]) -> String {
    encode_quoted_printable(&normalize_line_endings(data))
}

/// Splits on CRLF only; lone CR or LF stay inside the line and get escaped.
fn split_hard_lines(data: &[u8]) -> Vec<&[u8]> {
    let mut lines = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i + 1 < data.len() {
        if data[i] == b'\r' && data[i + 1] == b'\n' {
            lines.push(&data[start..i]);
            i += 2;
            start = i;
        } else {
            i += 1;
        }
    }
    lines.push(&data[start..]);

    lines
}

fn encode_line(line: &[u8], result: &mut String) {
    let mut column = 0;

    for (i, &byte) in line.iter().enumerate() {
        let is_last = i + 1 == line.len();
        let needs_escape = !is_literal(byte) || (is_last && (byte == b' ' || byte == b'\t'));
        let width = if needs_escape { 3 } else { 1 };

        // The last token of a line may use the column otherwise reserved for the soft break
        let limit = if is_last {
            MAX_LINE_LENGTH
        } else {
            MAX_LINE_LENGTH - 1
        };
        if column + width > limit {
            result.push_str("=\r\n");
            column = 0;
        }

        if needs_escape {
            result.push('=');
            result.push(HEX_DIGITS[(byte >> 4) as usize] as char);
            result.push(HEX_DIGITS[(byte & 0x0F) as usize] as char);
        } else {
            result.push(byte as char);
        }
        column += width;
    }
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        _ => None,
    }
}

/// Decodes quoted-printable text.
///
/// Soft line breaks (`=` followed by CRLF or LF, optionally with transport
/// padding in between) are removed and `=XX` escapes are decoded. Malformed
/// sequences are passed through unchanged.
pub fn decode_quoted_printable(encoded: &str) -> Vec<u8> {
    let bytes = encoded.as_bytes();
    let mut result = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'=' {
            result.push(bytes[i]);
            i += 1;
            continue;
        }

        // Soft line break, possibly padded with whitespace before the EOL
        let mut j = i + 1;
        while j < bytes.len() && (bytes[j] == b' ' || bytes[j] == b'\t') {
            j += 1;
        }
        if bytes.get(j) == Some(&b'\r') && bytes.get(j + 1) == Some(&b'\n') {
            i = j + 2;
            continue;
        }
        if bytes.get(j) == Some(&b'\n') {
            i = j + 1;
            continue;
        }

        match (
            bytes.get(i + 1).copied().and_then(hex_value),
            bytes.get(i + 2).copied().and_then(hex_value),
        ) {
            (Some(high), Some(low)) => {
                result.push((high << 4) | low);
                i += 3;
            }
            _ => {
                result.push(b'=');
                i += 1;
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_ascii_is_untouched() {
        assert_eq!(encode_quoted_printable(b"Hello, World!"), "Hello, World!");
    }

    #[test]
    fn escapes_equals_sign_and_high_octets() {
        assert_eq!(encode_quoted_printable(b"a=b\xff"), "a=3Db=FF");
    }

    #[test]
    fn escapes_trailing_whitespace_before_hard_break() {
        assert_eq!(encode_quoted_printable(b"end \r\nnext\t"), "end=20\r\nnext=09");
    }

    #[test]
    fn wraps_long_lines_at_76_columns() {
        let data = vec![b'x'; 200];
        let encoded = encode_quoted_printable(&data);

        for line in encoded.split("\r\n") {
            assert!(line.len() <= MAX_LINE_LENGTH, "line too long: {}", line.len());
        }
        assert_eq!(decode_quoted_printable(&encoded), data);
    }

    #[test]
    fn never_splits_an_escape_sequence() {
        let data = vec![0xE9; 60];
        let encoded = encode_quoted_printable(&data);

        for line in encoded.split("\r\n") {
            let body = line.strip_suffix('=').unwrap_or(line);
            assert_eq!(body.len() % 3, 0);
        }
    }

    #[test]
    fn lone_line_feeds_survive_round_trip() {
        let data = b"one\ntwo\rthree\r\nfour";
        assert_eq!(decode_quoted_printable(&encode_quoted_printable(data)), data);
    }

    #[test]
    fn text_mode_normalizes_line_endings() {
        assert_eq!(encode_quoted_printable_text(b"a\nb\rc"), "a\r\nb\r\nc");
    }

    #[test]
    fn decode_removes_soft_breaks() {
        assert_eq!(decode_quoted_printable("abc=\r\ndef=  \r\nghi=\nj"), b"abcdefghij");
    }

    #[test]
    fn decode_passes_malformed_sequences_through() {
        assert_eq!(decode_quoted_printable("100%=zz=4"), b"100%=zz=4");
        assert_eq!(decode_quoted_printable("=4a=4A"), b"JJ");
    }

    #[test]
    fn round_trip_every_octet() {
        let data: Vec<u8> = (0..=255u8).cycle().take(1024).collect();
        assert_eq!(decode_quoted_printable(&encode_quoted_printable(&data)), data);
    }
}
