use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::env::EnvVar;
use crate::mime::MimeError;

/// Errors that can occur while saving or reading a snapshot
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("Cannot resolve reference {reference:?} against {base}")]
    UnresolvableReference { reference: String, base: String },

    #[error("Failed to download {url}: {reason}")]
    DownloadFailure {
        url: String,
        status: Option<u16>,
        reason: String,
    },

    #[error("Failed to write {path}: {reason}")]
    WriteFailure { path: String, reason: String },

    #[error("No free file name left for {name}")]
    NameAllocationExhausted { name: String },

    #[error("Malformed archive: {0}")]
    MimeParseFailure(String),

    #[error("Snapshot canceled")]
    Canceled,

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Unsupported root media type: {media_type}")]
    UnsupportedRoot { media_type: String },
}

impl SnapshotError {
    /// Fatal errors abort the run. Unresolvable references and failed
    /// downloads only degrade the output, unless they concern the root.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            SnapshotError::UnresolvableReference { .. } | SnapshotError::DownloadFailure { .. }
        )
    }

    pub fn write_failure(path: impl std::fmt::Display, error: impl std::fmt::Display) -> Self {
        SnapshotError::WriteFailure {
            path: path.to_string(),
            reason: error.to_string(),
        }
    }
}

impl From<MimeError> for SnapshotError {
    fn from(error: MimeError) -> Self {
        SnapshotError::MimeParseFailure(error.to_string())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Mhtml,
    Folder,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MhtmlLayout {
    /// Absolute `Content-Location` values, as browsers write them.
    #[default]
    Standard,
    /// The folder layout inside the MIME container, with relative
    /// `Content-Location` values.
    Grouped,
}

#[derive(Clone, Debug)]
pub struct SnapshotOptions {
    pub format: OutputFormat,
    pub mhtml_layout: MhtmlLayout,
    pub save_media: bool,
    pub save_images: bool,
    pub remove_unused_styles: bool,
    pub strip_event_handlers: bool,
    pub max_concurrent: usize,
    pub files_suffix: String,
    pub extra_files_suffixes: Vec<String>,
    pub user_agent: Option<String>,
    /// Per-request timeout; zero disables it.
    pub timeout: Duration,
    pub pending_events_wait: Option<Duration>,
    pub max_encoded_word_len: usize,
}

impl Default for SnapshotOptions {
    fn default() -> Self {
        Self {
            format: OutputFormat::Mhtml,
            mhtml_layout: MhtmlLayout::Standard,
            save_media: true,
            save_images: true,
            remove_unused_styles: false,
            strip_event_handlers: true,
            max_concurrent: 4,
            files_suffix: "_files".to_string(),
            extra_files_suffixes: Vec::new(),
            user_agent: None,
            timeout: Duration::from_secs(60),
            pending_events_wait: None,
            max_encoded_word_len: crate::mime::encoded_word::MAX_ENCODED_WORD_LENGTH,
        }
    }
}

impl SnapshotOptions {
    /// Defaults overridden by `PAGESNAP_*` environment variables. Invalid
    /// values are logged and ignored one by one.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`SnapshotOptions::from_env`], reading values through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        use crate::env::snapshot::{FilesSuffix, MaxConcurrent, Timeout, UserAgent};

        let defaults = Self::default();
        Self {
            max_concurrent: env_setting::<_, MaxConcurrent>(&lookup, defaults.max_concurrent),
            files_suffix: env_setting::<_, FilesSuffix>(&lookup, defaults.files_suffix.clone()),
            user_agent: lookup(UserAgent::NAME).and_then(|value| match UserAgent::parse(&value) {
                Ok(agent) => Some(agent),
                Err(error) => {
                    tracing::warn!("{}", error);
                    None
                }
            }),
            timeout: env_setting::<_, Timeout>(&lookup, defaults.timeout),
            ..defaults
        }
    }

    /// Every folder suffix an archive reader should accept, the configured
    /// one first.
    pub fn files_suffixes(&self) -> Vec<String> {
        let mut suffixes = vec![self.files_suffix.clone()];
        for suffix in &self.extra_files_suffixes {
            if !suffixes.contains(suffix) {
                suffixes.push(suffix.clone());
            }
        }
        suffixes
    }
}

fn env_setting<T, V: EnvVar<T>>(lookup: &dyn Fn(&str) -> Option<String>, default: T) -> T {
    match V::resolve(lookup(V::NAME).as_deref()) {
        Ok(value) => value,
        Err(error) => {
            tracing::warn!("{}", error);
            default
        }
    }
}

/// One saved resource, as listed in the run report.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct ResourceSummary {
    pub uri: String,
    pub local_name: Option<String>,
    pub media_type: String,
    pub saved: bool,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub format: OutputFormat,
    pub path: String,
    pub resources: Vec<ResourceSummary>,
}

/// Terminal summary of a run.
#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct SnapshotReport {
    pub success: bool,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub archive: Option<ArchiveSummary>,
}

impl SnapshotReport {
    pub fn failed(error: &SnapshotError) -> Self {
        Self {
            success: false,
            errors: vec![error.to_string()],
            ..Self::default()
        }
    }
}

const ANSI_COLOR_RED: &str = "\x1b[31m";
const ANSI_COLOR_YELLOW: &str = "\x1b[33m";
const ANSI_COLOR_RESET: &str = "\x1b[0m";
const FILE_SIGNATURES: [[&[u8]; 2]; 19] = [
    // Image
    [b"GIF87a", b"image/gif"],
    [b"GIF89a", b"image/gif"],
    [b"\xFF\xD8\xFF", b"image/jpeg"],
    [b"\x89PNG\x0D\x0A\x1A\x0A", b"image/png"],
    [b"<svg ", b"image/svg+xml"],
    [b"RIFF....WEBPVP8 ", b"image/webp"],
    [b"\x00\x00\x01\x00", b"image/x-icon"],
    // Audio
    [b"ID3", b"audio/mpeg"],
    [b"\xFF\x0E", b"audio/mpeg"],
    [b"\xFF\x0F", b"audio/mpeg"],
    [b"OggS", b"audio/ogg"],
    [b"RIFF....WAVEfmt ", b"audio/wav"],
    [b"fLaC", b"audio/x-flac"],
    // Video
    [b"RIFF....AVI LIST", b"video/avi"],
    [b"....ftyp", b"video/mp4"],
    [b"\x00\x00\x01\x0B", b"video/mpeg"],
    [b"....moov", b"video/quicktime"],
    [b"\x1A\x45\xDF\xA3", b"video/webm"],
    // Font
    [b"wOF2", b"font/woff2"],
];
// All known non-"text/..." plaintext media types
const PLAINTEXT_MEDIA_TYPES: &[&str] = &[
    "application/javascript",          // .js
    "application/json",                // .json
    "application/ld+json",             // .jsonld
    "application/x-sh",                // .sh
    "application/xhtml+xml",           // .xhtml
    "application/xml",                 // .xml
    "application/vnd.mozilla.xul+xml", // .xul
    "image/svg+xml",                   // .svg
];

fn matches_signature(data: &[u8], signature: &[u8]) -> bool {
    data.len() >= signature.len()
        && signature
            .iter()
            .zip(data.iter())
            .all(|(s, d)| *s == b'.' || s == d)
}

/// Determines the media type of data based on its content signature
pub fn detect_media_type(data: &[u8], url: &Url) -> String {
    // First try to detect by magic bytes
    for signature in &FILE_SIGNATURES {
        if matches_signature(data, signature[0]) {
            return String::from_utf8_lossy(signature[1]).to_string();
        }
    }

    // Fall back to detecting by file extension
    detect_media_type_by_file_name(url.path())
}

/// Determines the media type based on file extension
pub fn detect_media_type_by_file_name(filename: &str) -> String {
    let filename_lowercased = filename.to_lowercase();
    let extension = filename_lowercased
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .unwrap_or("");

    match extension {
        "html" | "htm" | "shtml" => "text/html",
        "xhtml" | "xht" => "application/xhtml+xml",
        "css" => "text/css",
        "js" | "mjs" => "application/javascript",
        "json" => "application/json",
        "txt" => "text/plain",
        "xml" => "application/xml",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "mp3" => "audio/mpeg",
        "ogg" => "audio/ogg",
        "wav" => "audio/wav",
        "flac" => "audio/x-flac",
        "mp4" => "video/mp4",
        "avi" => "video/avi",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "mpeg" | "mpg" => "video/mpeg",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "vtt" => "text/vtt",
        _ => "application/octet-stream",
    }
    .to_string()
}

/// Checks if the given media type represents plaintext content
pub fn is_plaintext_media_type(media_type: &str) -> bool {
    media_type.starts_with("text/") || PLAINTEXT_MEDIA_TYPES.contains(&media_type)
}

/// Media types whose resources are parsed and rewritten as documents.
pub fn is_document_media_type(media_type: &str) -> bool {
    matches!(media_type, "text/html" | "application/xhtml+xml")
}

/// Prints an error message to stderr
pub fn print_error_message(msg: &str, color: bool) {
    if color {
        eprintln!("{ANSI_COLOR_RED}{msg}{ANSI_COLOR_RESET}");
    } else {
        eprintln!("{msg}");
    }
}

/// Prints a warning message to stderr
pub fn print_warning_message(msg: &str, color: bool) {
    if color {
        eprintln!("{ANSI_COLOR_YELLOW}{msg}{ANSI_COLOR_RESET}");
    } else {
        eprintln!("{msg}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let download = SnapshotError::DownloadFailure {
            url: "https://a/x.png".to_string(),
            status: Some(404),
            reason: "Not Found".to_string(),
        };
        assert!(!download.is_fatal());
        assert!(SnapshotError::NameAllocationExhausted { name: "a".to_string() }.is_fatal());
        assert!(SnapshotError::write_failure("out.mhtml", "disk full").is_fatal());
        assert_eq!(
            SnapshotError::from(MimeError::MissingBoundary).to_string(),
            "Malformed archive: Multipart entity without a boundary parameter"
        );
    }

    #[test]
    fn test_detect_media_type() {
        let url = Url::parse("https://example.com/unknown").unwrap();
        assert_eq!(detect_media_type(b"\x89PNG\x0D\x0A\x1A\x0Arest", &url), "image/png");
        assert_eq!(detect_media_type(b"RIFF\x00\x00\x00\x00WEBPVP8 ", &url), "image/webp");
        assert_eq!(detect_media_type(b"\x00\x00\x00\x18ftypmp42", &url), "video/mp4");

        let url = Url::parse("https://example.com/style.CSS?v=2").unwrap();
        assert_eq!(detect_media_type(b"body {}", &url), "text/css");
    }

    #[test]
    fn test_plaintext_media_types() {
        assert!(is_plaintext_media_type("text/css"));
        assert!(is_plaintext_media_type("image/svg+xml"));
        assert!(!is_plaintext_media_type("image/png"));
        assert!(is_document_media_type("application/xhtml+xml"));
        assert!(!is_document_media_type("text/plain"));
    }

    #[test]
    fn test_env_values_are_read_independently() {
        let vars = std::collections::HashMap::from([
            ("PAGESNAP_MAX_CONCURRENT", "many"),
            ("PAGESNAP_FILES_SUFFIX", "_data"),
            ("PAGESNAP_USER_AGENT", "pagesnap-test"),
            ("PAGESNAP_TIMEOUT", "5"),
        ]);
        let options = SnapshotOptions::from_lookup(|name| vars.get(name).map(|value| value.to_string()));

        assert_eq!(options.max_concurrent, 4);
        assert_eq!(options.files_suffix, "_data");
        assert_eq!(options.user_agent.as_deref(), Some("pagesnap-test"));
        assert_eq!(options.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_env_defaults_when_unset() {
        let options = SnapshotOptions::from_lookup(|_| None);
        assert_eq!(options.files_suffix, "_files");
        assert_eq!(options.user_agent, None);
        assert_eq!(options.timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_files_suffixes_put_configured_first() {
        let options = SnapshotOptions {
            files_suffix: "_data".to_string(),
            extra_files_suffixes: vec!["_fichiers".to_string(), "_data".to_string()],
            ..SnapshotOptions::default()
        };
        assert_eq!(options.files_suffixes(), vec!["_data", "_fichiers"]);
    }

    #[test]
    fn test_report_serializes() {
        let report = SnapshotReport::failed(&SnapshotError::Canceled);
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["errors"][0], "Snapshot canceled");
    }
}
