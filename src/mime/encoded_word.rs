//! RFC 2047 "encoded word" 头部编码与解码
//!
//! 构建器按照以下顺序尝试放置需要编码的文本：
//!
//! 1. 与同一行上相邻的已编码单词合并
//! 2. 单独放在当前行
//! 3. 单独放在下一行
//! 4. 拆分成多个已编码单词，用标准的头部折叠规则（CRLF + 一个空格）连接
//!
//! 解析器是构建器的逆运算，并按照 RFC 2047 §5 删除两个已解码单词之间的空白。

use encoding_rs::{Encoding, UTF_8};

use super::base64::{decode_base64, encode_base64_unwrapped};
use super::header::{unfold_header_value, MAX_HEADER_LINE_LENGTH};

/// Upper bound for a single encoded word (RFC 2047 §2).
pub const MAX_ENCODED_WORD_LENGTH: usize = 75;

/// Widest encoding of one character: four octets as `=XX` in Q encoding.
const WIDEST_ENCODED_CHAR: usize = 12;

/// Encodes octets with the RFC 2047 "Q" encoding.
///
/// Space becomes `_`; non-printable octets, `=`, `?` and `_` are escaped as `=XX`.
pub fn encode_q(data: &[u8]) -> String {
    let mut result = String::with_capacity(data.len() * 2);

    for &byte in data {
        match byte {
            b' ' => result.push('_'),
            b'=' | b'?' | b'_' => push_escaped(&mut result, byte),
            0x21..=0x7E => result.push(byte as char),
            _ => push_escaped(&mut result, byte),
        }
    }

    result
}

fn push_escaped(result: &mut String, byte: u8) {
    result.push_str(&format!("={:02X}", byte));
}

fn q_encoded_len(data: &[u8]) -> usize {
    data.iter()
        .map(|&byte| match byte {
            b' ' => 1,
            b'=' | b'?' | b'_' => 3,
            0x21..=0x7E => 1,
            _ => 3,
        })
        .sum()
}

/// Decodes RFC 2047 "Q" encoded text; malformed escapes are kept literally.
pub fn decode_q(text: &str) -> Vec<u8> {
    let bytes = text.as_bytes();
    let mut result = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'_' => {
                result.push(b' ');
                i += 1;
            }
            b'=' if i + 2 < bytes.len() && is_hex_pair(bytes[i + 1], bytes[i + 2]) => {
                let hex = &text[i + 1..i + 3];
                result.push(u8::from_str_radix(hex, 16).unwrap_or(b'?'));
                i += 3;
            }
            byte => {
                result.push(byte);
                i += 1;
            }
        }
    }

    result
}

fn is_hex_pair(high: u8, low: u8) -> bool {
    high.is_ascii_hexdigit() && low.is_ascii_hexdigit()
}

/// Words that can be written literally: printable ASCII that cannot be
/// mistaken for the start of an encoded word.
fn is_literal_word(word: &str) -> bool {
    !word.is_empty() && word.bytes().all(|b| (0x21..=0x7E).contains(&b)) && !word.contains("=?")
}

/// One source token: a run of spaces/tabs followed by a run of anything else.
struct Token<'a> {
    whitespace: &'a str,
    word: &'a str,
}

fn tokenize(text: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        let ws_end = rest
            .find(|c: char| c != ' ' && c != '\t')
            .unwrap_or(rest.len());
        let after_ws = &rest[ws_end..];
        let word_end = after_ws
            .find(|c: char| c == ' ' || c == '\t')
            .unwrap_or(after_ws.len());

        tokens.push(Token {
            whitespace: &rest[..ws_end],
            word: &after_ws[..word_end],
        });
        rest = &after_ws[word_end..];
    }

    tokens
}

/// The encoded word most recently written, still open for merging.
struct OpenWord {
    start: usize,
    len: usize,
    raw: String,
}

struct WordBuilder {
    out: String,
    line_len: usize,
    open: Option<OpenWord>,
    encoding: &'static Encoding,
    max_word_len: usize,
}

impl WordBuilder {
    fn overhead(&self) -> usize {
        // =?charset?X?...?=
        self.encoding.name().len() + 7
    }

    fn encoded_len(&self, raw: &str) -> usize {
        let (bytes, _, _) = self.encoding.encode(raw);
        let q_len = q_encoded_len(&bytes);
        let b_len = bytes.len().div_ceil(3) * 4;
        q_len.min(b_len) + self.overhead()
    }

    fn encode_word(&self, raw: &str) -> String {
        let (bytes, _, _) = self.encoding.encode(raw);
        let q = encode_q(&bytes);
        let b = encode_base64_unwrapped(&bytes);

        if q.len() <= b.len() {
            format!("=?{}?Q?{}?=", self.encoding.name(), q)
        } else {
            format!("=?{}?B?{}?=", self.encoding.name(), b)
        }
    }

    fn at_start(&self) -> bool {
        self.out.is_empty()
    }

    fn push_literal(&mut self, whitespace: &str, word: &str) {
        let width = whitespace.len() + word.len();

        if self.at_start() || self.line_len + width <= MAX_HEADER_LINE_LENGTH {
            self.line_len += width;
            self.out.push_str(whitespace);
        } else {
            // Fold at the existing whitespace so unfolding restores it exactly
            self.out.push_str("\r\n");
            self.out.push_str(whitespace);
            self.line_len = width;
        }
        self.out.push_str(word);
        self.open = None;
    }

    fn push_word(&mut self, separator: &str, raw: &str) {
        self.out.push_str(separator);
        let start = self.out.len();
        let word = self.encode_word(raw);
        self.line_len += separator.len() + word.len();
        self.out.push_str(&word);
        self.open = Some(OpenWord {
            start,
            len: word.len(),
            raw: raw.to_string(),
        });
    }

    fn fold(&mut self, separator: char) {
        self.out.push_str("\r\n");
        self.out.push(separator);
        self.line_len = 1;
        self.open = None;
    }

    /// Places `payload` as encoded text. `separator` is the literal whitespace
    /// character that must precede it, when the previous output is not an
    /// encoded word.
    fn push_encoded(&mut self, separator: Option<char>, payload: &str) {
        // 1. Merge with the adjacent encoded word on the same line
        if let Some((start, len, raw)) = self
            .open
            .as_ref()
            .map(|open| (open.start, open.len, open.raw.clone()))
        {
            let combined = format!("{}{}", raw, payload);
            let combined_len = self.encoded_len(&combined);
            let line_start = self.line_len - len;

            if combined_len <= self.max_word_len
                && line_start + combined_len <= MAX_HEADER_LINE_LENGTH
            {
                let word = self.encode_word(&combined);
                self.out.truncate(start);
                self.out.push_str(&word);
                self.line_len = line_start + combined_len;
                self.open = Some(OpenWord {
                    start,
                    len: combined_len,
                    raw: combined,
                });
                return;
            }
        }

        let separator_text = match separator {
            Some(c) => c.to_string(),
            None if self.at_start() => String::new(),
            None => " ".to_string(),
        };
        let fold_char = separator.unwrap_or(' ');
        let word_len = self.encoded_len(payload);

        // 2. Alone on the current line
        if word_len <= self.max_word_len
            && self.line_len + separator_text.len() + word_len <= MAX_HEADER_LINE_LENGTH
        {
            self.push_word(&separator_text, payload);
            return;
        }

        // 3. Alone on the next line
        if word_len <= self.max_word_len {
            self.fold(fold_char);
            self.push_word("", payload);
            return;
        }

        // 4. Split across several encoded words, one per physical line
        let chars: Vec<char> = payload.chars().collect();
        let mut consumed = 0;

        while consumed < chars.len() {
            let first = consumed == 0;
            if !first {
                self.fold(' ');
            }

            let mut separator = if first { separator_text.as_str() } else { "" };
            let available = MAX_HEADER_LINE_LENGTH.saturating_sub(self.line_len + separator.len());
            let mut take =
                self.longest_fitting_prefix(&chars[consumed..], self.max_word_len.min(available));

            if take == 0 && first {
                self.fold(fold_char);
                separator = "";
                take = self.longest_fitting_prefix(
                    &chars[consumed..],
                    self.max_word_len.min(MAX_HEADER_LINE_LENGTH - 1),
                );
            }

            // A fresh line always holds one character
            let take = take.max(1);
            let raw: String = chars[consumed..consumed + take].iter().collect();
            self.push_word(separator, &raw);
            consumed += take;
        }
    }

    fn longest_fitting_prefix(&self, chars: &[char], limit: usize) -> usize {
        let mut best = 0;
        let mut raw = String::new();

        for (i, c) in chars.iter().enumerate() {
            raw.push(*c);
            if self.encoded_len(&raw) > limit {
                break;
            }
            best = i + 1;
        }

        best
    }
}

/// Builds an unstructured header value, encoding what cannot be written
/// literally as RFC 2047 encoded words in `charset`.
///
/// `first_line_used` is the number of columns already taken on the first
/// physical line (typically the header name, colon and space). When not even
/// one encoded character fits there, the value starts with a fold.
pub fn build_unstructured_value(text: &str, charset: &str, first_line_used: usize) -> String {
    build_unstructured_value_with_limit(text, charset, first_line_used, MAX_ENCODED_WORD_LENGTH)
}

/// Same as [`build_unstructured_value`] with a caller-specified maximum
/// encoded word length (capped at 75).
pub fn build_unstructured_value_with_limit(
    text: &str,
    charset: &str,
    first_line_used: usize,
    max_word_len: usize,
) -> String {
    let encoding = Encoding::for_label(charset.as_bytes())
        .unwrap_or(UTF_8)
        .output_encoding();
    let overhead = encoding.name().len() + 7;
    let max_word_len = max_word_len
        .min(MAX_ENCODED_WORD_LENGTH)
        .max(overhead + WIDEST_ENCODED_CHAR);

    let mut builder = WordBuilder {
        out: String::new(),
        line_len: first_line_used,
        open: None,
        encoding,
        max_word_len,
    };
    for token in tokenize(text) {
        let at_start = builder.at_start();
        let literal = is_literal_word(token.word)
            && token.whitespace.len() + token.word.len() < MAX_HEADER_LINE_LENGTH
            && if at_start {
                token.whitespace.is_empty() && first_line_used + token.word.len() <= MAX_HEADER_LINE_LENGTH
            } else {
                !token.whitespace.is_empty()
            };

        if literal {
            builder.push_literal(token.whitespace, token.word);
        } else if builder.open.is_some() || at_start {
            let payload = format!("{}{}", token.whitespace, token.word);
            builder.push_encoded(None, &payload);
        } else {
            // Previous output is literal: one whitespace character stays as the separator
            let mut whitespace = token.whitespace.chars();
            let separator = whitespace.next();
            let payload = format!("{}{}", whitespace.as_str(), token.word);
            builder.push_encoded(separator, &payload);
        }
    }

    builder.out
}

/// Decodes a single `=?charset?X?text?=` word.
pub fn decode_encoded_word(word: &str) -> Option<String> {
    let inner = word.strip_prefix("=?")?.strip_suffix("?=")?;
    let mut parts = inner.splitn(3, '?');
    let charset = parts.next()?;
    let encoding_tag = parts.next()?;
    let text = parts.next()?;

    if charset.is_empty() || text.contains('?') || text.contains(char::is_whitespace) {
        return None;
    }
    // RFC 2231 §5 allows a language suffix: charset*lang
    let charset = charset.split('*').next().unwrap_or(charset);
    let encoding = Encoding::for_label(charset.as_bytes())?;

    let bytes = match encoding_tag {
        "Q" | "q" => decode_q(text),
        "B" | "b" => decode_base64(text),
        _ => return None,
    };
    let (decoded, _) = encoding.decode_without_bom_handling(&bytes);

    Some(decoded.into_owned())
}

enum Piece {
    Text(String),
    Word(String),
}

/// Finds the end of an encoded word starting at `start`, if there is one.
fn encoded_word_end(value: &str, start: usize) -> Option<usize> {
    let rest = &value[start + 2..];
    let charset_end = rest.find('?')?;
    let after_charset = &rest[charset_end + 1..];
    let tag_end = after_charset.find('?')?;
    if tag_end != 1 {
        return None;
    }
    let text = &after_charset[2..];
    let text_end = text.find("?=")?;

    Some(start + 2 + charset_end + 1 + 2 + text_end + 2)
}

/// Parses an unstructured header value: unfolds it, decodes encoded words and
/// removes whitespace separating two decoded words (RFC 2047 §5).
pub fn parse_unstructured_value(value: &str) -> String {
    let value = unfold_header_value(value);
    let mut pieces: Vec<Piece> = Vec::new();
    let mut text = String::new();
    let mut pos = 0;

    while pos < value.len() {
        if value[pos..].starts_with("=?") {
            if let Some(end) = encoded_word_end(&value, pos) {
                if let Some(decoded) = decode_encoded_word(&value[pos..end]) {
                    if !text.is_empty() {
                        pieces.push(Piece::Text(std::mem::take(&mut text)));
                    }
                    pieces.push(Piece::Word(decoded));
                    pos = end;
                    continue;
                }
            }
        }

        let c = value[pos..].chars().next().unwrap_or(' ');
        text.push(c);
        pos += c.len_utf8();
    }
    if !text.is_empty() {
        pieces.push(Piece::Text(text));
    }

    let mut result = String::new();
    for (i, piece) in pieces.iter().enumerate() {
        match piece {
            Piece::Word(decoded) => result.push_str(decoded),
            Piece::Text(text) => {
                let between_words = i > 0
                    && matches!(pieces[i - 1], Piece::Word(_))
                    && matches!(pieces.get(i + 1), Some(Piece::Word(_)))
                    && text.chars().all(|c| c == ' ' || c == '\t');
                if !between_words {
                    result.push_str(text);
                }
            }
        }
    }

    result
}
