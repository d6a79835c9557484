//! MHTML 读取
//!
//! 解析 multipart/related 归档，按 `start` 参数确定根部件，建立
//! Content-Location 与 Content-ID 两个索引，并将 HTML/CSS 中指向其他
//! 部件的 `cid:` 与绝对 URL 改写为解出文件的相对路径。

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use encoding_rs::{Encoding, UTF_8};
use regex::{Captures, Regex, RegexBuilder};
use tracing::{debug, info, warn};
use url::Url;

use super::bundle::{ResourceBundle, ResourceId, ResourceStatus};
use super::naming::{extensions_for_media_type, sanitize_file_name, NameAllocator};
use super::writer::{GROUPED_LAYOUT, LAYOUT_HEADER};
use crate::core::{detect_media_type, SnapshotError, SnapshotOptions};
use crate::mime::{parse_entity, MimeEntity, MimeError};
use crate::utils::fs::FileSystem;
use crate::utils::ids::IdSource;
use crate::utils::url::{encode_local_path, relative_path, strip_fragment};

/// Base for parts whose location is relative or missing.
const SYNTHETIC_BASE: &str = "http://archive.pagesnap.invalid/";
const EXTRACTED_FILES_DIR: &str = "index_files";
const REWRITTEN_MEDIA_TYPES: &[&str] = &["text/html", "application/xhtml+xml", "text/css", "image/svg+xml"];
const REGEX_SIZE_LIMIT: usize = 64 * 1024 * 1024;

/// An archive unpacked into a folder.
pub struct ExtractedArchive {
    /// Path of the extracted root document.
    pub root: PathBuf,
    /// The parts, root first, with rewritten bodies and local names.
    pub bundle: ResourceBundle,
    pub files: Vec<PathBuf>,
}

struct Part<'a> {
    entity: &'a MimeEntity,
    location: Option<String>,
    content_id: Option<String>,
}

fn strip_whitespace(value: &str) -> String {
    value.chars().filter(|c| !c.is_whitespace()).collect()
}

fn debracket(value: &str) -> String {
    let value = strip_whitespace(value);
    value
        .strip_prefix('<')
        .and_then(|v| v.strip_suffix('>'))
        .map(str::to_string)
        .unwrap_or(value)
}

fn without_fragment(location: &str) -> String {
    location.split('#').next().unwrap_or(location).to_string()
}

/// Leaf parts in document order; nested multiparts are flattened.
fn collect_leaves<'a>(entity: &'a MimeEntity, out: &mut Vec<&'a MimeEntity>) {
    for part in &entity.parts {
        if part.parts.is_empty() {
            out.push(part);
        } else {
            collect_leaves(part, out);
        }
    }
}

/// Character after a match that ends a reference.
fn ends_reference(c: Option<char>) -> bool {
    match c {
        None => true,
        Some(c) => c.is_whitespace() || matches!(c, '"' | '\'' | '(' | ')' | '<' | '>' | '#' | ',' | ';' | '\\'),
    }
}

/// A safe relative path made of the segments of `location`.
fn grouped_local_name(location: &str) -> Option<String> {
    let segments: Vec<String> = location
        .split('/')
        .map(|segment| percent_encoding::percent_decode_str(segment).decode_utf8_lossy().to_string())
        .collect();
    if segments.iter().any(|segment| segment.is_empty() || segment == "." || segment == "..") {
        return None;
    }
    Some(
        segments
            .iter()
            .map(|segment| sanitize_file_name(segment))
            .collect::<Vec<_>>()
            .join("/"),
    )
}

pub struct ArchiveReader {
    fs: Rc<dyn FileSystem>,
    ids: Rc<dyn IdSource>,
    files_suffixes: Vec<String>,
}

impl ArchiveReader {
    pub fn new(fs: Rc<dyn FileSystem>, ids: Rc<dyn IdSource>) -> Self {
        Self {
            fs,
            ids,
            files_suffixes: vec!["_files".to_string()],
        }
    }

    /// A reader accepting the configured folder suffix and every extra one.
    pub fn from_options(options: &SnapshotOptions, fs: Rc<dyn FileSystem>, ids: Rc<dyn IdSource>) -> Self {
        Self::new(fs, ids).with_files_suffixes(options.files_suffixes())
    }

    /// Folder suffixes accepted for the resource folder of grouped archives.
    pub fn with_files_suffixes(mut self, suffixes: impl IntoIterator<Item = String>) -> Self {
        self.files_suffixes = suffixes.into_iter().collect();
        self
    }

    pub async fn extract_file(&self, archive: &Path, output_dir: &Path) -> Result<ExtractedArchive, SnapshotError> {
        let data = self.fs.read(archive).await.map_err(|error| {
            SnapshotError::InvalidTarget(format!("cannot read {}: {}", archive.display(), error))
        })?;
        self.extract(&data, output_dir).await
    }

    /// Unpacks an archive into `output_dir` as `index.<ext>` plus its
    /// resource folder.
    pub async fn extract(&self, data: &[u8], output_dir: &Path) -> Result<ExtractedArchive, SnapshotError> {
        let bundle = self.parse(data)?;

        let mut created = Vec::new();
        let mut files = Vec::new();
        if let Err(error) = self.write_parts(&bundle, output_dir, &mut created, &mut files).await {
            self.remove_partial_output(&created, &files).await;
            return Err(error);
        }

        let root = files
            .first()
            .cloned()
            .ok_or_else(|| SnapshotError::from(MimeError::Empty))?;
        info!("extracted {} parts to {}", files.len(), output_dir.display());

        Ok(ExtractedArchive { root, bundle, files })
    }

    async fn write_parts(
        &self,
        bundle: &ResourceBundle,
        output_dir: &Path,
        created: &mut Vec<PathBuf>,
        files: &mut Vec<PathBuf>,
    ) -> Result<(), SnapshotError> {
        let write = |path: &Path, error: std::io::Error| SnapshotError::write_failure(path.display(), error);
        self.create_dir(output_dir, created).await.map_err(|error| write(output_dir, error))?;

        for resource in bundle.iter() {
            let Some(name) = &resource.local_name else {
                continue;
            };
            let path = output_dir.join(name);
            if let Some(parent) = path.parent() {
                self.create_dir(parent, created).await.map_err(|error| write(parent, error))?;
            }
            self.fs.write(&path, &resource.data).await.map_err(|error| write(&path, error))?;
            files.push(path);
        }
        Ok(())
    }

    /// Creates `dir` and records the outermost directory that did not exist.
    async fn create_dir(&self, dir: &Path, created: &mut Vec<PathBuf>) -> std::io::Result<()> {
        let mut outermost = None;
        for ancestor in dir.ancestors() {
            if ancestor.as_os_str().is_empty() || self.fs.exists(ancestor).await {
                break;
            }
            outermost = Some(ancestor.to_path_buf());
        }
        if let Some(outermost) = outermost {
            self.fs.create_dir_all(dir).await?;
            created.push(outermost);
        }
        Ok(())
    }

    async fn remove_partial_output(&self, created: &[PathBuf], files: &[PathBuf]) {
        warn!("extraction failed, removing {} written files", files.len());
        for file in files {
            let _ = self.fs.remove_file(file).await;
        }
        for dir in created.iter().rev() {
            if self.fs.exists(dir).await {
                let _ = self.fs.remove_dir_all(dir).await;
            }
        }
    }

    /// Parses an archive into a bundle whose resources carry local names
    /// and bodies rewritten to point at each other's local files.
    pub fn parse(&self, data: &[u8]) -> Result<ResourceBundle, SnapshotError> {
        let message = parse_entity(data)?;
        let content_type = message.content_type().ok_or(MimeError::NotMultipart)?;
        if !content_type.is_multipart() {
            return Err(MimeError::NotMultipart.into());
        }

        let mut leaves = Vec::new();
        collect_leaves(&message, &mut leaves);
        if leaves.is_empty() {
            return Err(MimeError::Empty.into());
        }

        let grouped = message
            .headers
            .get(LAYOUT_HEADER)
            .map(|value| value.trim().eq_ignore_ascii_case(GROUPED_LAYOUT))
            .unwrap_or(false);

        let mut parts: Vec<Part> = leaves
            .into_iter()
            .map(|entity| Part {
                entity,
                location: entity
                    .headers
                    .get("Content-Location")
                    .map(strip_whitespace)
                    .filter(|location| !location.is_empty()),
                content_id: entity
                    .headers
                    .get("Content-ID")
                    .map(debracket)
                    .filter(|id| !id.is_empty()),
            })
            .collect();

        // The root is the `start` part among the immediate children, else the first part
        let start = content_type.param("start").map(debracket);
        let root_index = start
            .and_then(|start| {
                message.parts.iter().position(|child| {
                    child.headers.get("Content-ID").map(debracket).as_deref() == Some(start.as_str())
                })
            })
            .and_then(|child| {
                let entity = &message.parts[child];
                parts.iter().position(|part| std::ptr::eq(part.entity, entity))
            })
            .unwrap_or(0);
        let root = parts.remove(root_index);
        parts.insert(0, root);
        debug!("archive with {} parts, grouped: {}", parts.len(), grouped);

        let synthetic_base = Url::parse(SYNTHETIC_BASE).map_err(|error| SnapshotError::MimeParseFailure(error.to_string()))?;
        let base = message
            .headers
            .get("Content-Location")
            .or_else(|| parts[0].location.as_deref())
            .and_then(|location| Url::parse(&strip_whitespace(location)).ok())
            .filter(|_| !grouped)
            .unwrap_or_else(|| synthetic_base.clone());

        let mut bundle = ResourceBundle::new(self.ids.clone());
        let mut names = NameAllocator::new();
        let mut taken: HashSet<String> = HashSet::new();

        for (index, part) in parts.iter().enumerate() {
            let url = match (&part.location, &part.content_id) {
                (Some(location), _) => base.join(location).ok(),
                (None, Some(content_id)) => Url::parse(&format!("cid:{}", content_id)).ok(),
                (None, None) => None,
            }
            .or_else(|| synthetic_base.join(&format!("part-{}", index)).ok())
            .ok_or_else(|| SnapshotError::MimeParseFailure(format!("part {} has no usable location", index)))?;

            let (mut id, created) = bundle.get_or_create(&url, false);
            if !created {
                id = bundle.get_or_create(&url, true).0;
            }

            let content_type = part.entity.content_type();
            let data = part.entity.decoded_body();
            let media_type = content_type
                .as_ref()
                .map(|content_type| content_type.media_type.clone())
                .unwrap_or_else(|| detect_media_type(&data, &url));
            let charset = content_type
                .as_ref()
                .and_then(|content_type| content_type.charset().map(str::to_string));

            let local_name = if index == 0 {
                let name = match (grouped, part.location.as_deref().and_then(grouped_local_name)) {
                    (true, Some(name)) if !name.contains('/') => name,
                    _ => {
                        let extension = extensions_for_media_type(&media_type).first().copied().unwrap_or("html");
                        format!("index.{}", extension)
                    }
                };
                names.reserve(&name);
                name
            } else {
                let accepted = part
                    .location
                    .as_deref()
                    .filter(|_| grouped)
                    .and_then(grouped_local_name)
                    .filter(|name| self.in_files_dir(name, bundle.get(ResourceId::ROOT).local_name.as_deref()))
                    .filter(|name| !taken.contains(&name.to_lowercase()));
                match accepted {
                    Some(name) => {
                        if let Some(file) = name
                            .strip_prefix(EXTRACTED_FILES_DIR)
                            .and_then(|rest| rest.strip_prefix('/'))
                        {
                            names.reserve(file);
                        }
                        name
                    }
                    None => loop {
                        let name = format!("{}/{}", EXTRACTED_FILES_DIR, names.allocate_for_url(&url, &media_type)?);
                        if !taken.contains(&name.to_lowercase()) {
                            break name;
                        }
                    },
                }
            };
            taken.insert(local_name.to_lowercase());

            let resource = bundle.get_mut(id);
            resource.media_type = media_type;
            resource.charset = charset;
            resource.data = data;
            resource.local_name = Some(local_name);
            resource.content_location = part.location.clone();
            resource.content_id = part.content_id.clone();
            resource.status = ResourceStatus::Saved;
        }

        self.rewrite_references(&mut bundle, &base)?;
        Ok(bundle)
    }

    /// True when `name` lives in the root's resource folder under one of
    /// the recognized suffixes.
    fn in_files_dir(&self, name: &str, root_name: Option<&str>) -> bool {
        let Some((dir, _)) = name.split_once('/') else {
            return false;
        };
        let stem = root_name
            .map(|root| root.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(root))
            .unwrap_or("index");
        self.files_suffixes
            .iter()
            .any(|suffix| dir == format!("{}{}", stem, suffix))
    }

    fn rewrite_references(&self, bundle: &mut ResourceBundle, base: &Url) -> Result<(), SnapshotError> {
        let mut index: HashMap<String, ResourceId> = HashMap::new();
        for resource in bundle.iter() {
            let mut keys = Vec::new();
            if let Some(location) = &resource.content_location {
                let location = without_fragment(location);
                if let Ok(url) = Url::parse(&location) {
                    keys.push(strip_fragment(&url).0.to_string());
                    keys.push(location);
                } else if let Ok(url) = base.join(&location) {
                    if base.as_str() != SYNTHETIC_BASE {
                        keys.push(strip_fragment(&url).0.to_string());
                    }
                }
            }
            if let Some(content_id) = &resource.content_id {
                keys.push(format!("cid:{}", content_id));
            }
            for key in keys {
                if key.contains('&') {
                    index.entry(key.replace('&', "&amp;")).or_insert(resource.id);
                }
                index.entry(key).or_insert(resource.id);
            }
        }
        if index.is_empty() {
            return Ok(());
        }

        let mut keys: Vec<&String> = index.keys().collect();
        keys.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        let pattern = keys
            .iter()
            .map(|key| regex::escape(key))
            .collect::<Vec<_>>()
            .join("|");
        let regex = RegexBuilder::new(&pattern)
            .size_limit(REGEX_SIZE_LIMIT)
            .build()
            .map_err(|error| SnapshotError::MimeParseFailure(error.to_string()))?;

        let targets: HashMap<ResourceId, String> = bundle
            .iter()
            .filter_map(|resource| resource.local_name.clone().map(|name| (resource.id, name)))
            .collect();
        let rewritable: Vec<ResourceId> = bundle
            .iter()
            .filter(|resource| REWRITTEN_MEDIA_TYPES.contains(&resource.media_type.as_str()))
            .map(|resource| resource.id)
            .collect();

        for id in rewritable {
            let resource = bundle.get(id);
            let Some(from) = resource.local_name.clone() else {
                continue;
            };
            let encoding = resource
                .charset
                .as_deref()
                .and_then(|label| Encoding::for_label(label.as_bytes()))
                .unwrap_or(UTF_8);
            let (text, _, _) = encoding.decode(&resource.data);

            let rewritten = rewrite_text(&text, &regex, |key| {
                let target = index.get(key)?;
                let to = targets.get(target)?;
                Some(encode_local_path(&relative_path(&from, to)))
            });
            if let Some(rewritten) = rewritten {
                debug!("rewrote references in {}", from);
                let (data, _, unmappable) = encoding.output_encoding().encode(&rewritten);
                if unmappable {
                    warn!("{} has characters its charset cannot carry", from);
                }
                bundle.get_mut(id).data = data.into_owned();
            }
        }

        Ok(())
    }
}

/// Replaces every whole-reference match of `regex` for which `target`
/// returns a path. Returns `None` when nothing changed.
fn rewrite_text(text: &str, regex: &Regex, target: impl Fn(&str) -> Option<String>) -> Option<String> {
    let mut changed = false;
    let rewritten = regex.replace_all(text, |captures: &Captures| {
        let Some(found) = captures.get(0) else {
            return String::new();
        };
        let next = text[found.end()..].chars().next();
        match target(found.as_str()).filter(|_| ends_reference(next)) {
            Some(path) => {
                changed = true;
                path
            }
            None => found.as_str().to_string(),
        }
    });
    changed.then(|| rewritten.into_owned())
}
