//! Base64 传输编码 (RFC 2045 §6.8)

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use base64::Engine;

/// Characters per encoded line, not counting the CRLF.
pub const LINE_LENGTH: usize = 76;

/// Decoder used after stripping everything outside the alphabet, padding included.
const PERMISSIVE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::RequireNone)
        .with_decode_allow_trailing_bits(true),
);

/// Encodes bytes with the standard alphabet, broken into CRLF-separated
/// lines of 76 characters.
pub fn encode_base64(data: &[u8]) -> String {
    let encoded = STANDARD.encode(data);
    let mut result = String::with_capacity(encoded.len() + encoded.len() / LINE_LENGTH * 2);

    // Base64 output is pure ASCII, so byte chunks are valid char boundaries
    for (i, chunk) in encoded.as_bytes().chunks(LINE_LENGTH).enumerate() {
        if i > 0 {
            result.push_str("\r\n");
        }
        result.push_str(&String::from_utf8_lossy(chunk));
    }

    result
}

/// Encodes bytes on a single line, as used inside RFC 2047 encoded words.
pub fn encode_base64_unwrapped(data: &[u8]) -> String {
    STANDARD.encode(data)
}

fn is_alphabet(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'+' || byte == b'/'
}

/// Decodes base64 permissively: line breaks, padding and any other
/// characters outside the alphabet are ignored, and a dangling sextet at the
/// end of the input is dropped.
pub fn decode_base64(encoded: &str) -> Vec<u8> {
    let mut filtered: Vec<u8> = encoded.bytes().filter(|b| is_alphabet(*b)).collect();

    if filtered.len() % 4 == 1 {
        filtered.pop();
    }

    PERMISSIVE.decode(&filtered).unwrap_or_default()
}
