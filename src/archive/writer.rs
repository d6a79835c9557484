use std::path::{Path, PathBuf};
use std::rc::Rc;

use chrono::Local;
use tracing::{debug, info, warn};

use super::bundle::{Resource, ResourceBundle, ResourceId};
use super::naming::extensions_for_media_type;
use crate::core::{
    is_plaintext_media_type, ArchiveSummary, MhtmlLayout, OutputFormat, ResourceSummary, SnapshotError,
    SnapshotOptions,
};
use crate::mime::encoded_word::build_unstructured_value_with_limit;
use crate::mime::header::{fold_header, fold_uri_header};
use crate::mime::{get_date_time_specification, ContentType, MultipartWriter, OutgoingPart, TransferEncoding};
use crate::utils::fs::FileSystem;
use crate::utils::ids::IdSource;

/// Header marking archives that carry the folder layout with relative
/// `Content-Location` values.
pub const LAYOUT_HEADER: &str = "X-Pagesnap-Layout";
pub const GROUPED_LAYOUT: &str = "grouped-relative";

const FROM: &str = "<Saved by pagesnap>";

/// Where each saved resource lands and how references to it are written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveLayout {
    pub format: OutputFormat,
    pub mhtml_layout: MhtmlLayout,
    /// The archive file (MHTML) or the root document (folder).
    pub output: PathBuf,
    /// Folder holding every resource but the root, relative to the root's folder.
    pub files_dir: String,
}

impl ArchiveLayout {
    pub fn new(options: &SnapshotOptions, output: &Path) -> Self {
        let files_dir = match options.format {
            OutputFormat::Mhtml => format!("index{}", options.files_suffix),
            OutputFormat::Folder => {
                let stem = output
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().to_string())
                    .filter(|stem| !stem.is_empty())
                    .unwrap_or_else(|| "index".to_string());
                format!("{}{}", stem, options.files_suffix)
            }
        };

        Self {
            format: options.format,
            mhtml_layout: options.mhtml_layout,
            output: output.to_path_buf(),
            files_dir,
        }
    }

    /// References point at absolute `Content-Location` values instead of
    /// relative paths.
    pub fn uses_absolute_locations(&self) -> bool {
        self.format == OutputFormat::Mhtml && self.mhtml_layout == MhtmlLayout::Standard
    }

    /// Local name of the root resource.
    pub fn root_name(&self, media_type: &str) -> String {
        match self.format {
            OutputFormat::Folder => self
                .output
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_else(|| "index.html".to_string()),
            OutputFormat::Mhtml => {
                let extension = extensions_for_media_type(media_type).first().copied().unwrap_or("html");
                format!("index.{}", extension)
            }
        }
    }

    /// Local name of a non-root resource allocated as `name`.
    pub fn local_name(&self, name: &str) -> String {
        format!("{}/{}", self.files_dir, name)
    }

    fn root_dir(&self) -> PathBuf {
        self.output
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }
}

/// Persists a finished bundle as MHTML or as a folder.
pub struct ArchiveWriter {
    fs: Rc<dyn FileSystem>,
    ids: Rc<dyn IdSource>,
    max_encoded_word_len: usize,
}

impl ArchiveWriter {
    pub fn new(fs: Rc<dyn FileSystem>, ids: Rc<dyn IdSource>) -> Self {
        Self {
            fs,
            ids,
            max_encoded_word_len: crate::mime::encoded_word::MAX_ENCODED_WORD_LENGTH,
        }
    }

    pub fn with_encoded_word_len(mut self, max_encoded_word_len: usize) -> Self {
        self.max_encoded_word_len = max_encoded_word_len;
        self
    }

    /// Writes every saved resource that has a local name. The root
    /// resource must be saved.
    pub async fn write(
        &self,
        bundle: &ResourceBundle,
        layout: &ArchiveLayout,
        title: Option<&str>,
    ) -> Result<ArchiveSummary, SnapshotError> {
        let resources: Vec<&Resource> = bundle
            .iter()
            .filter(|resource| resource.is_saved() && resource.local_name.is_some())
            .collect();
        if resources.first().map(|resource| resource.id) != Some(ResourceId::ROOT) {
            return Err(SnapshotError::InvalidTarget("root resource was not saved".to_string()));
        }

        let root_dir = layout.root_dir();
        if !root_dir.as_os_str().is_empty() && !self.fs.exists(&root_dir).await {
            self.fs
                .create_dir_all(&root_dir)
                .await
                .map_err(|error| SnapshotError::write_failure(root_dir.display(), error))?;
        }

        let result = match layout.format {
            OutputFormat::Mhtml => self.write_mhtml(&resources, layout, title).await,
            OutputFormat::Folder => self.write_folder(&resources, layout).await,
        };
        if let Err(error) = result {
            warn!("removing partial output after: {}", error);
            self.remove_partial_output(layout).await;
            return Err(error);
        }
        info!("wrote {} resources to {}", resources.len(), layout.output.display());

        Ok(ArchiveSummary {
            format: layout.format,
            path: layout.output.display().to_string(),
            resources: bundle
                .iter()
                .map(|resource| ResourceSummary {
                    uri: resource.uri.clone(),
                    local_name: resource.local_name.clone().filter(|_| resource.is_saved()),
                    media_type: resource.media_type.clone(),
                    saved: resource.is_saved(),
                })
                .collect(),
        })
    }

    async fn write_mhtml(
        &self,
        resources: &[&Resource],
        layout: &ArchiveLayout,
        title: Option<&str>,
    ) -> Result<(), SnapshotError> {
        let data = self.build_mhtml(resources, layout, title)?;
        self.fs
            .write(&layout.output, &data)
            .await
            .map_err(|error| SnapshotError::write_failure(layout.output.display(), error))
    }

    /// Serializes the resources as a multipart/related message.
    pub fn build_mhtml(
        &self,
        resources: &[&Resource],
        layout: &ArchiveLayout,
        title: Option<&str>,
    ) -> Result<Vec<u8>, SnapshotError> {
        let root_type = resources
            .first()
            .map(|resource| resource.media_type.clone())
            .unwrap_or_else(|| "text/html".to_string());

        let boundary = loop {
            let candidate = format!("----=_NextPart_pagesnap_{}_{}", self.ids.next_token(), self.ids.next_token());
            let needle = candidate.as_bytes();
            if !resources
                .iter()
                .any(|resource| resource.data.windows(needle.len()).any(|window| window == needle))
            {
                break candidate;
            }
        };

        let mut header_lines = vec![format!("From: {}", FROM)];
        if let Some(title) = title.filter(|title| !title.trim().is_empty()) {
            header_lines.push(format!(
                "Subject: {}",
                build_unstructured_value_with_limit(title.trim(), "utf-8", "Subject: ".len(), self.max_encoded_word_len)
            ));
        }
        header_lines.push(fold_header("Date", &get_date_time_specification(&Local::now())));
        header_lines.push("MIME-Version: 1.0".to_string());
        if layout.mhtml_layout == MhtmlLayout::Grouped {
            header_lines.push(format!("{}: {}", LAYOUT_HEADER, GROUPED_LAYOUT));
        }

        let content_type = ContentType::new("multipart/related")
            .with_param("type", &root_type)
            .with_param("boundary", &boundary);
        let mut writer = MultipartWriter::new(&header_lines, &content_type)?;

        for resource in resources {
            let textual = is_plaintext_media_type(&resource.media_type);
            let mut part_type = ContentType::new(&resource.media_type);
            if let (true, Some(charset)) = (textual, resource.charset.as_deref()) {
                part_type = part_type.with_param("charset", charset);
            }

            let location = match layout.mhtml_layout {
                MhtmlLayout::Standard => resource.uri.clone(),
                MhtmlLayout::Grouped => resource.local_name.clone().unwrap_or_default(),
            };
            let mut part_headers = vec![fold_uri_header("Content-Location", &location)];
            if let Some(content_id) = &resource.content_id {
                part_headers.push(format!("Content-ID: <{}>", content_id));
            }
            debug!("part {} as {}", location, resource.media_type);

            writer.add_part(&OutgoingPart {
                header_lines: part_headers,
                content_type: part_type,
                encoding: TransferEncoding::choose(&resource.data, textual),
                data: resource.data.clone(),
            });
        }

        Ok(writer.finish())
    }

    async fn write_folder(&self, resources: &[&Resource], layout: &ArchiveLayout) -> Result<(), SnapshotError> {
        let root_dir = layout.root_dir();

        if resources.len() > 1 {
            let files_dir = root_dir.join(&layout.files_dir);
            self.fs
                .create_dir_all(&files_dir)
                .await
                .map_err(|error| SnapshotError::write_failure(files_dir.display(), error))?;
        }

        for resource in resources {
            let path = if resource.id == ResourceId::ROOT {
                layout.output.clone()
            } else {
                match &resource.local_name {
                    Some(name) => root_dir.join(name),
                    None => continue,
                }
            };
            self.fs
                .write(&path, &resource.data)
                .await
                .map_err(|error| SnapshotError::write_failure(path.display(), error))?;
        }

        Ok(())
    }

    async fn remove_partial_output(&self, layout: &ArchiveLayout) {
        if self.fs.exists(&layout.output).await {
            let _ = self.fs.remove_file(&layout.output).await;
        }
        if layout.format == OutputFormat::Folder {
            let files_dir = layout.root_dir().join(&layout.files_dir);
            if self.fs.exists(&files_dir).await {
                let _ = self.fs.remove_dir_all(&files_dir).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::bundle::ResourceStatus;
    use crate::mime::parse_entity;
    use crate::utils::fs::MemoryFileSystem;
    use crate::utils::ids::SequentialIds;
    use url::Url;

    fn bundle() -> ResourceBundle {
        let mut bundle = ResourceBundle::new(Rc::new(SequentialIds::new()));
        let files = [
            ("https://a.example/page", "text/html", "index.html", "<img src=\"https://a.example/i.png\">"),
            ("https://a.example/i.png", "image/png", "index_files/i.png", "\u{89}PNG"),
        ];
        for (url, media_type, name, data) in files {
            let (id, _) = bundle.get_or_create(&Url::parse(url).unwrap(), false);
            let resource = bundle.get_mut(id);
            resource.media_type = media_type.to_string();
            resource.local_name = Some(name.to_string());
            resource.data = data.as_bytes().to_vec();
            resource.status = ResourceStatus::Saved;
        }
        let (failed, _) = bundle.get_or_create(&Url::parse("https://a.example/gone.png").unwrap(), false);
        bundle.get_mut(failed).status = ResourceStatus::Failed { status: Some(404) };
        bundle
    }

    fn writer(fs: Rc<MemoryFileSystem>) -> ArchiveWriter {
        ArchiveWriter::new(fs, Rc::new(SequentialIds::new()))
    }

    #[test]
    fn layout_names() {
        let mut options = SnapshotOptions::default();
        let layout = ArchiveLayout::new(&options, Path::new("out/page.mht"));
        assert_eq!(layout.files_dir, "index_files");
        assert_eq!(layout.root_name("application/xhtml+xml"), "index.xhtml");
        assert!(layout.uses_absolute_locations());

        options.format = OutputFormat::Folder;
        options.files_suffix = "-assets".to_string();
        let layout = ArchiveLayout::new(&options, Path::new("out/page.html"));
        assert_eq!(layout.files_dir, "page-assets");
        assert_eq!(layout.root_name("text/html"), "page.html");
        assert_eq!(layout.local_name("a.png"), "page-assets/a.png");
        assert!(!layout.uses_absolute_locations());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn writes_standard_mhtml() {
        let fs = Rc::new(MemoryFileSystem::new());
        let layout = ArchiveLayout::new(&SnapshotOptions::default(), Path::new("page.mht"));
        let summary = writer(fs.clone())
            .write(&bundle(), &layout, Some("Caf\u{e9} menu"))
            .await
            .unwrap();

        assert_eq!(summary.resources.len(), 3);
        assert!(!summary.resources[2].saved);

        let data = fs.get("page.mht").unwrap();
        let text = String::from_utf8_lossy(&data);
        assert!(text.starts_with("From: <Saved by pagesnap>\r\nSubject: =?UTF-8?"));
        assert!(text.contains("MIME-Version: 1.0\r\n"));
        assert!(!text.contains(LAYOUT_HEADER));

        let entity = parse_entity(&data).unwrap();
        assert_eq!(entity.content_type().unwrap().param("type"), Some("text/html"));
        assert_eq!(entity.parts.len(), 2);
        assert_eq!(entity.parts[0].headers.get("Content-Location"), Some("https://a.example/page"));
        assert_eq!(entity.parts[1].headers.get("Content-Transfer-Encoding"), Some("base64"));
        assert_eq!(entity.parts[1].decoded_body(), "\u{89}PNG".as_bytes());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn writes_grouped_mhtml_with_relative_locations() {
        let fs = Rc::new(MemoryFileSystem::new());
        let options = SnapshotOptions {
            mhtml_layout: MhtmlLayout::Grouped,
            ..SnapshotOptions::default()
        };
        let layout = ArchiveLayout::new(&options, Path::new("page.mht"));
        writer(fs.clone()).write(&bundle(), &layout, None).await.unwrap();

        let entity = parse_entity(&fs.get("page.mht").unwrap()).unwrap();
        assert_eq!(entity.headers.get(LAYOUT_HEADER), Some(GROUPED_LAYOUT));
        assert!(entity.headers.get("Subject").is_none());
        assert_eq!(entity.parts[1].headers.get("Content-Location"), Some("index_files/i.png"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn writes_folder() {
        let fs = Rc::new(MemoryFileSystem::new());
        fs.create_dir_all(Path::new("out")).await.unwrap();
        let options = SnapshotOptions {
            format: OutputFormat::Folder,
            ..SnapshotOptions::default()
        };
        let mut bundle = bundle();
        bundle.get_mut(ResourceId(1)).local_name = Some("index_files/i.png".to_string());
        let layout = ArchiveLayout::new(&options, Path::new("out/index.html"));
        writer(fs.clone()).write(&bundle, &layout, None).await.unwrap();

        assert_eq!(
            fs.paths(),
            vec![PathBuf::from("out/index.html"), PathBuf::from("out/index_files/i.png")]
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn write_failure_is_reported() {
        let fs = Rc::new(MemoryFileSystem::read_only());
        let layout = ArchiveLayout::new(&SnapshotOptions::default(), Path::new("page.mht"));
        let error = writer(fs).write(&bundle(), &layout, None).await.unwrap_err();

        assert!(matches!(error, SnapshotError::WriteFailure { .. }));
        assert!(error.is_fatal());
    }
}
