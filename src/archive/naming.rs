//! 本地文件名分配
//!
//! 从 URI 推导候选名称，替换非法字符，按 MIME 类型强制扩展名，
//! 并在同一目录内以不区分大小写的方式避免冲突。

use std::collections::HashSet;

use percent_encoding::percent_decode_str;
use url::Url;

use crate::core::SnapshotError;

/// Longest stem kept before truncation, in characters.
const MAX_STEM_LENGTH: usize = 60;
const TRUNCATED_HEAD: usize = 40;
const TRUNCATED_TAIL: usize = 19;
const MAX_COLLISION_SUFFIX: u32 = 9999;
const FALLBACK_NAME: &str = "file";

const RESERVED_DEVICE_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Known extensions per media type; the first one is preferred.
const MEDIA_TYPE_EXTENSIONS: &[(&str, &[&str])] = &[
    ("text/html", &["html", "htm", "shtml"]),
    ("application/xhtml+xml", &["xhtml", "xht"]),
    ("text/css", &["css"]),
    ("text/plain", &["txt", "text"]),
    ("text/xml", &["xml"]),
    ("application/xml", &["xml"]),
    ("text/javascript", &["js", "mjs"]),
    ("application/javascript", &["js", "mjs"]),
    ("application/json", &["json"]),
    ("image/png", &["png"]),
    ("image/jpeg", &["jpg", "jpeg", "jpe"]),
    ("image/gif", &["gif"]),
    ("image/webp", &["webp"]),
    ("image/svg+xml", &["svg"]),
    ("image/x-icon", &["ico"]),
    ("image/vnd.microsoft.icon", &["ico"]),
    ("image/avif", &["avif"]),
    ("image/bmp", &["bmp"]),
    ("audio/mpeg", &["mp3"]),
    ("audio/ogg", &["ogg", "oga"]),
    ("audio/wav", &["wav"]),
    ("audio/x-flac", &["flac"]),
    ("video/mp4", &["mp4", "m4v"]),
    ("video/webm", &["webm"]),
    ("video/ogg", &["ogv"]),
    ("video/quicktime", &["mov"]),
    ("video/avi", &["avi"]),
    ("video/mpeg", &["mpeg", "mpg"]),
    ("font/woff", &["woff"]),
    ("font/woff2", &["woff2"]),
    ("font/ttf", &["ttf"]),
    ("font/otf", &["otf"]),
    ("text/vtt", &["vtt"]),
    ("application/pdf", &["pdf"]),
];

pub fn extensions_for_media_type(media_type: &str) -> &'static [&'static str] {
    let media_type = media_type.trim().to_ascii_lowercase();
    MEDIA_TYPE_EXTENSIONS
        .iter()
        .find(|(mt, _)| *mt == media_type)
        .map(|(_, exts)| *exts)
        .unwrap_or(&[])
}

/// Candidate name for a resource: the last path segment, else the last
/// directory segment, else the host.
pub fn candidate_name_from_url(url: &Url) -> String {
    if url.scheme() == "data" {
        return FALLBACK_NAME.to_string();
    }
    if url.cannot_be_a_base() {
        // cid:, urn: and the like
        let path = percent_decode_str(url.path()).decode_utf8_lossy().to_string();
        return if path.is_empty() { FALLBACK_NAME.to_string() } else { path };
    }

    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();

    match segments.last() {
        Some(segment) => percent_decode_str(segment).decode_utf8_lossy().to_string(),
        None => url.host_str().unwrap_or(FALLBACK_NAME).to_string(),
    }
}

fn is_invalid_char(c: char) -> bool {
    c.is_control() || matches!(c, '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|')
}

/// Replaces every character that common file systems reject. Characters are
/// substituted, never removed, so distinct names stay distinct.
pub fn sanitize_file_name(name: &str) -> String {
    let mut sanitized: String = name
        .chars()
        .map(|c| if is_invalid_char(c) { '_' } else { c })
        .collect();

    // Windows drops trailing dots and spaces
    let trailing = sanitized.len() - sanitized.trim_end_matches(['.', ' ']).len();
    if trailing > 0 {
        sanitized.truncate(sanitized.len() - trailing);
        sanitized.push_str(&"_".repeat(trailing));
    }

    let device = sanitized.split('.').next().unwrap_or("").to_ascii_uppercase();
    if RESERVED_DEVICE_NAMES.contains(&device.as_str()) {
        sanitized.insert(0, '_');
    }

    sanitized
}

/// Shortens a stem by keeping its head and tail.
fn truncate_stem(stem: &str) -> String {
    let chars: Vec<char> = stem.chars().collect();
    if chars.len() <= MAX_STEM_LENGTH {
        return stem.to_string();
    }

    let head: String = chars[..TRUNCATED_HEAD].iter().collect();
    let tail: String = chars[chars.len() - TRUNCATED_TAIL..].iter().collect();
    format!("{}_{}", head, tail)
}

/// Splits off the extension that `media_type` expects, if present. Returns
/// the stem and the extension to use.
fn split_extension(name: &str, media_type: &str) -> (String, Option<String>) {
    let expected = extensions_for_media_type(media_type);

    if let Some((stem, ext)) = name.rsplit_once('.') {
        if !stem.is_empty() {
            if let Some(known) = expected.iter().find(|e| e.eq_ignore_ascii_case(ext)) {
                return (stem.to_string(), Some(known.to_string()));
            }
        }
    }

    (name.to_string(), expected.first().map(|e| e.to_string()))
}

fn join_name(stem: &str, extension: Option<&str>) -> String {
    match extension {
        Some(ext) => format!("{}.{}", stem, ext),
        None => stem.to_string(),
    }
}

/// Allocates unique local names within one folder.
#[derive(Debug, Default)]
pub struct NameAllocator {
    used: HashSet<String>,
}

impl NameAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a name as taken without allocating it.
    pub fn reserve(&mut self, name: &str) {
        self.used.insert(name.to_lowercase());
    }

    pub fn is_taken(&self, name: &str) -> bool {
        self.used.contains(&name.to_lowercase())
    }

    /// Derives a safe, unique name from `candidate` with an extension that
    /// matches `media_type`. Colliding names get `-1` .. `-9999` before the
    /// extension.
    pub fn allocate(&mut self, candidate: &str, media_type: &str) -> Result<String, SnapshotError> {
        let sanitized = sanitize_file_name(candidate.trim());
        let (stem, extension) = split_extension(&sanitized, media_type);
        let stem = match truncate_stem(&stem) {
            stem if stem.is_empty() => FALLBACK_NAME.to_string(),
            stem => stem,
        };

        let first = join_name(&stem, extension.as_deref());
        if !self.is_taken(&first) {
            self.reserve(&first);
            return Ok(first);
        }

        for n in 1..=MAX_COLLISION_SUFFIX {
            let name = join_name(&format!("{}-{}", stem, n), extension.as_deref());
            if !self.is_taken(&name) {
                self.reserve(&name);
                return Ok(name);
            }
        }

        Err(SnapshotError::NameAllocationExhausted { name: first })
    }

    pub fn allocate_for_url(&mut self, url: &Url, media_type: &str) -> Result<String, SnapshotError> {
        self.allocate(&candidate_name_from_url(url), media_type)
    }
}
