//! # 快照引擎
//!
//! 把提取、调度与归档串成一次完整的保存：根资源作为第一个获取作业，
//! 解析出的引用继续派生获取作业，全部获取结束后逐个重写已解析单元，
//! 最后由 [`ArchiveWriter`] 一次性写出归档。

mod session;

use std::path::Path;
use std::rc::Rc;

use tracing::{error, info};
use url::Url;

use crate::archive::bundle::{ResourceBundle, ResourceId};
use crate::archive::writer::{ArchiveLayout, ArchiveWriter};
use crate::core::{SnapshotError, SnapshotOptions, SnapshotReport};
use crate::jobs::{CancelToken, JobKind, JobListener, JobScheduler, LeafJob, Purpose};
use crate::network::{ByteSource, Fetched, HttpSource};
use crate::utils::fs::{FileSystem, LocalFileSystem};
use crate::utils::ids::{IdSource, RandomIds};
use crate::utils::url::is_url_and_has_protocol;

pub use session::DOWNLOAD_ERROR_PREFIX;

use session::Session;

/// Turns a command-line target into a URL: URLs are taken as they are,
/// anything else is a path to a local file.
pub fn parse_target(target: &str) -> Result<Url, SnapshotError> {
    let target = target.trim();
    if target.is_empty() {
        return Err(SnapshotError::InvalidTarget("empty target".to_string()));
    }
    if is_url_and_has_protocol(target) && !Path::new(target).exists() {
        return Url::parse(target).map_err(|error| SnapshotError::InvalidTarget(error.to_string()));
    }

    let path = Path::new(target);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|error| SnapshotError::InvalidTarget(error.to_string()))?
            .join(path)
    };
    Url::from_file_path(&absolute)
        .map_err(|_| SnapshotError::InvalidTarget(format!("not a valid path: {}", absolute.display())))
}

/// Saves pages with injected acquisition, file system and id capabilities.
pub struct Snapshotter {
    options: SnapshotOptions,
    source: Rc<dyn ByteSource>,
    fs: Rc<dyn FileSystem>,
    ids: Rc<dyn IdSource>,
    cancel: CancelToken,
}

impl Snapshotter {
    pub fn new(
        options: SnapshotOptions,
        source: Rc<dyn ByteSource>,
        fs: Rc<dyn FileSystem>,
        ids: Rc<dyn IdSource>,
    ) -> Self {
        Self {
            options,
            source,
            fs,
            ids,
            cancel: CancelToken::new(),
        }
    }

    /// A snapshotter that acquires over HTTP and writes to the local disk.
    pub fn with_http(options: SnapshotOptions) -> Result<Self, SnapshotError> {
        let source = HttpSource::new(options.user_agent.clone(), options.timeout)?;
        Ok(Self::new(
            options,
            Rc::new(source),
            Rc::new(LocalFileSystem),
            Rc::new(RandomIds),
        ))
    }

    pub fn options(&self) -> &SnapshotOptions {
        &self.options
    }

    /// Token that cancels the running snapshot, or single jobs of it.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Saves the page at `target` (a URL or a local path) to `output`.
    pub async fn save_url(&self, target: &str, output: &Path, listener: &mut dyn JobListener) -> SnapshotReport {
        match parse_target(target) {
            Ok(url) => self.run(url, None, output, listener).await,
            Err(error) => SnapshotReport::failed(&error),
        }
    }

    /// Saves a document whose bytes the caller already has. Its
    /// subresources are still acquired.
    pub async fn save_document(
        &self,
        url: &Url,
        data: &[u8],
        charset: Option<&str>,
        output: &Path,
        listener: &mut dyn JobListener,
    ) -> SnapshotReport {
        let mut final_url = url.clone();
        final_url.set_fragment(None);
        let preloaded = Fetched {
            data: data.to_vec(),
            final_url,
            media_type: "text/html".to_string(),
            charset: charset.map(str::to_string),
            status: 200,
        };
        self.run(url.clone(), Some(preloaded), output, listener).await
    }

    async fn run(
        &self,
        url: Url,
        preloaded: Option<Fetched>,
        output: &Path,
        listener: &mut dyn JobListener,
    ) -> SnapshotReport {
        info!("saving {} to {}", url, output.display());

        let mut bundle = ResourceBundle::new(Rc::clone(&self.ids));
        let (root, _) = bundle.get_or_create(&url, false);
        debug_assert_eq!(root, ResourceId::ROOT);

        let layout = ArchiveLayout::new(&self.options, output);
        let mut session = Session::new(&self.options, Rc::clone(&self.source), bundle, layout, preloaded);
        let mut scheduler = JobScheduler::new(self.options.max_concurrent, self.cancel.clone());
        scheduler.add(JobKind::LeafAcquisition(LeafJob {
            resource: root,
            url: url.clone(),
            purpose: Purpose::Root,
        }));

        if let Err(error) = scheduler.run(&mut session, listener).await {
            error!("snapshot of {} aborted: {}", url, error);
            return SnapshotReport {
                success: false,
                warnings: session.warnings,
                errors: vec![error.to_string()],
                archive: None,
            };
        }

        if let Some(wait) = self.options.pending_events_wait {
            if tokio::time::timeout(wait, self.source.settle()).await.is_err() {
                info!("pending events still outstanding after {:?}", wait);
            }
        }

        let writer = ArchiveWriter::new(Rc::clone(&self.fs), Rc::clone(&self.ids))
            .with_encoded_word_len(self.options.max_encoded_word_len);
        let title = session.title();
        match writer.write(&session.bundle, &session.layout, title.as_deref()).await {
            Ok(archive) => {
                info!(
                    "saved {} ({} resources, {} warnings)",
                    url,
                    archive.resources.len(),
                    session.warnings.len()
                );
                SnapshotReport {
                    success: true,
                    warnings: session.warnings,
                    errors: Vec::new(),
                    archive: Some(archive),
                }
            }
            Err(error) => {
                error!("writing {} failed: {}", output.display(), error);
                SnapshotReport {
                    success: false,
                    warnings: session.warnings,
                    errors: vec![error.to_string()],
                    archive: None,
                }
            }
        }
    }
}
