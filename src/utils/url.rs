use std::borrow::Cow;

use base64::{prelude::BASE64_STANDARD, Engine};
use encoding_rs::Encoding;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
pub use url::Url;

/// Characters escaped when a local file path is written into a reference.
const LOCAL_PATH: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'\'')
    .add(b'(')
    .add(b')')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`');

/// Removes the fragment, returning the bare URL and the fragment if any.
pub fn strip_fragment(url: &Url) -> (Url, Option<String>) {
    let fragment = url.fragment().map(str::to_string);
    let mut bare = url.clone();
    bare.set_fragment(None);
    (bare, fragment)
}

/// Key used to deduplicate resources: the URL without its fragment.
pub fn normalize_url(url: &Url) -> String {
    strip_fragment(url).0.to_string()
}

/// Resolves `href` against `base`. Leading and trailing whitespace is
/// ignored, as browsers do.
pub fn resolve_url(base: &Url, href: &str) -> Result<Url, url::ParseError> {
    base.join(href.trim())
}

/// Resolves `href` against `base`, encoding the query with the given
/// document charset instead of UTF-8.
pub fn resolve_url_with_encoding(
    base: &Url,
    href: &str,
    encoding: &'static Encoding,
) -> Result<Url, url::ParseError> {
    if encoding == encoding_rs::UTF_8 {
        return resolve_url(base, href);
    }

    let encode: &dyn Fn(&str) -> Cow<'_, [u8]> =
        &|input| Cow::Owned(encoding.encode(input).0.into_owned());
    Url::options()
        .base_url(Some(base))
        .encoding_override(Some(encode))
        .parse(href.trim())
}

pub fn is_url_and_has_protocol(input: &str) -> bool {
    match Url::parse(input) {
        Ok(parsed_url) => !parsed_url.scheme().is_empty(),
        Err(_) => false,
    }
}

/// True for URLs that name a resource worth acquiring.
pub fn is_fetchable(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https" | "file" | "data")
}

/// Splits a `data:` URL into media type, charset and decoded payload.
pub fn parse_data_url(url: &Url) -> (String, String, Vec<u8>) {
    let path: String = url.path().to_string();
    let comma_loc: usize = path.find(',').unwrap_or(path.len());
    let meta_data: String = path.chars().take(comma_loc).collect();
    let raw_data: String = path.chars().skip(comma_loc + 1).collect();
    let text: String = percent_decode_str(&raw_data).decode_utf8_lossy().to_string();

    let mut media_type = String::new();
    let mut charset = String::new();
    let mut is_base64 = false;

    for (index, part) in meta_data.split(';').enumerate() {
        let part = part.trim();
        if index == 0 {
            media_type = part.to_lowercase();
        } else if let Some(value) = part.strip_prefix("charset=") {
            charset = value.trim_matches('"').to_string();
        } else if part.eq_ignore_ascii_case("base64") {
            is_base64 = true;
        }
    }
    if media_type.is_empty() {
        media_type = "text/plain".to_string();
    }

    let data: Vec<u8> = if is_base64 {
        BASE64_STANDARD
            .decode(text.split_whitespace().collect::<String>())
            .unwrap_or_default()
    } else {
        percent_decode_str(&raw_data).collect()
    };

    (media_type, charset, data)
}

/// Relative reference from one local file to another, both given relative to
/// the same root folder (`/`-separated).
pub fn relative_path(from_file: &str, to_file: &str) -> String {
    let from_dirs: Vec<&str> = from_file.split('/').collect();
    let from_dirs = &from_dirs[..from_dirs.len().saturating_sub(1)];
    let to_parts: Vec<&str> = to_file.split('/').collect();

    let common = from_dirs
        .iter()
        .zip(to_parts.iter())
        .take_while(|(a, b)| a == b)
        .count()
        .min(to_parts.len().saturating_sub(1));

    let mut result: Vec<&str> = vec![".."; from_dirs.len() - common];
    result.extend_from_slice(&to_parts[common..]);
    result.join("/")
}

/// Escapes a `/`-separated local path for use as a relative URL.
pub fn encode_local_path(path: &str) -> String {
    utf8_percent_encode(path, LOCAL_PATH).to_string()
}
