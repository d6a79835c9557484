use std::collections::HashMap;
use std::rc::Rc;

use async_trait::async_trait;
use futures::future::{FutureExt, LocalBoxFuture};
use tracing::{debug, info, warn};

use crate::archive::bundle::{ResourceBundle, ResourceId, ResourceStatus};
use crate::archive::naming::NameAllocator;
use crate::archive::writer::ArchiveLayout;
use crate::core::{is_document_media_type, SnapshotError, SnapshotOptions};
use crate::extract::{
    extract_document, extract_stylesheet, selector_is_unused, ParsedUnit, Reference, Resolution, SaveMode,
    TargetKind,
};
use crate::jobs::{JobHost, JobId, JobKind, JobOutcome, LeafJob, ProgressSink, Purpose, RewriteJob, UnitId};
use crate::network::{with_detected_media_type, AcquireError, ByteSource, Fetched};
use crate::utils::integrity::check_integrity;
use crate::utils::url::{encode_local_path, is_fetchable, normalize_url, relative_path, strip_fragment};

/// Marker written in place of references whose target could not be acquired.
pub const DOWNLOAD_ERROR_PREFIX: &str = "urn:download-error:";

/// Everything one run mutates: the bundle, the allocated names and the
/// parsed units. Only the scheduler loop touches it.
pub(crate) struct Session<'a> {
    options: &'a SnapshotOptions,
    source: Rc<dyn ByteSource>,
    pub(crate) bundle: ResourceBundle,
    pub(crate) layout: ArchiveLayout,
    names: NameAllocator,
    units: Vec<ParsedUnit>,
    /// Parsed copies by target and charset hint, so that a stylesheet
    /// linked twice is fetched and rewritten once.
    substitutes: HashMap<(String, Option<String>, bool), ResourceId>,
    /// Documents that style rules are matched against, by unit.
    documents: HashMap<UnitId, scraper::Html>,
    /// Root bytes supplied by the caller instead of acquired.
    preloaded: Option<Fetched>,
    pub(crate) warnings: Vec<String>,
}

impl<'a> Session<'a> {
    pub(crate) fn new(
        options: &'a SnapshotOptions,
        source: Rc<dyn ByteSource>,
        bundle: ResourceBundle,
        layout: ArchiveLayout,
        preloaded: Option<Fetched>,
    ) -> Self {
        Self {
            options,
            source,
            bundle,
            layout,
            names: NameAllocator::new(),
            units: Vec::new(),
            substitutes: HashMap::new(),
            documents: HashMap::new(),
            preloaded,
            warnings: Vec::new(),
        }
    }

    /// Title of the root document, if it has one.
    pub(crate) fn title(&self) -> Option<String> {
        self.units
            .iter()
            .find(|unit| unit.resource == ResourceId::ROOT)
            .and_then(|unit| unit.title.clone())
    }

    fn warn(&mut self, error: &SnapshotError) {
        warn!("{}", error);
        self.warnings.push(error.to_string());
    }

    fn store(&mut self, resource: ResourceId, fetched: &Fetched, media_type: &str) -> Result<(), SnapshotError> {
        let local_name = if resource == ResourceId::ROOT {
            self.layout.root_name(media_type)
        } else {
            let url = self.bundle.get(resource).original_url.clone();
            let name = self.names.allocate_for_url(&url, media_type)?;
            self.layout.local_name(&name)
        };
        debug!("{} stored as {}", fetched.final_url, local_name);

        let entry = self.bundle.get_mut(resource);
        entry.media_type = media_type.to_string();
        entry.charset = fetched.charset.clone();
        entry.data = fetched.data.clone();
        entry.local_name = Some(local_name);
        entry.status = ResourceStatus::Saved;
        Ok(())
    }

    fn fail(&mut self, resource: ResourceId, error: SnapshotError) -> Result<JobOutcome, SnapshotError> {
        let status = match &error {
            SnapshotError::DownloadFailure { status, .. } => *status,
            _ => None,
        };
        self.bundle.get_mut(resource).status = ResourceStatus::Failed { status };

        if resource == ResourceId::ROOT {
            return Err(error);
        }
        self.warn(&error);
        Ok(JobOutcome::Failed)
    }

    /// Adds a parsed unit, registers its references and queues its rewrite.
    fn add_unit(&mut self, unit: ParsedUnit, discovered: &mut Vec<JobKind>) {
        let id = unit.id;
        let resource = unit.resource;

        if self.options.remove_unused_styles && unit.is_document() {
            let entry = self.bundle.get(resource);
            let encoding = encoding_rs::Encoding::for_label(unit.charset.as_bytes()).unwrap_or(encoding_rs::UTF_8);
            let (text, _, _) = encoding.decode(&entry.data);
            self.documents.insert(id, scraper::Html::parse_document(&text));
        }

        self.units.push(unit);
        self.register_references(id, discovered);
        discovered.push(JobKind::ParsedRewrite(RewriteJob { unit: id, resource }));
    }

    fn register_references(&mut self, unit: UnitId, discovered: &mut Vec<JobKind>) {
        let own = self.units[unit.0].resource;
        let document = if self.units[unit.0].is_document() {
            unit
        } else {
            self.units[unit.0].owner.unwrap_or(unit)
        };

        for index in 0..self.units[unit.0].references.len() {
            let reference = &self.units[unit.0].references[index];
            let Some(target) = reference.target.clone() else {
                let error = SnapshotError::UnresolvableReference {
                    reference: reference.spec.clone(),
                    base: reference.base.to_string(),
                };
                self.warn(&error);
                continue;
            };
            if !is_fetchable(&target) || target.scheme() == "data" {
                continue;
            }
            if self.bundle.get(own).is_located_at(&target) {
                self.units[unit.0].references[index].resource = Some(own);
                continue;
            }

            let (target, _) = strip_fragment(&target);
            let bound = match reference.mode {
                SaveMode::SaveAlways => {
                    let (id, created) = self.bundle.get_or_create(&target, false);
                    if created {
                        discovered.push(JobKind::LeafAcquisition(LeafJob {
                            resource: id,
                            url: target,
                            purpose: Purpose::Media,
                        }));
                    }
                    Some(id)
                }
                SaveMode::ReplaceWithParsedSubstitute => {
                    let is_frame = reference.kind == TargetKind::Frame;
                    let key = (normalize_url(&target), reference.charset_hint.clone(), is_frame);
                    match self.substitutes.get(&key) {
                        Some(id) => Some(*id),
                        None => {
                            let purpose = if is_frame {
                                Purpose::Frame { owner: unit }
                            } else {
                                Purpose::Stylesheet {
                                    charset_hint: reference.charset_hint.clone(),
                                    integrity: reference.integrity.clone(),
                                    owner: document,
                                }
                            };
                            let (id, _) = self.bundle.get_or_create(&target, true);
                            self.substitutes.insert(key, id);
                            discovered.push(JobKind::LeafAcquisition(LeafJob {
                                resource: id,
                                url: target,
                                purpose,
                            }));
                            Some(id)
                        }
                    }
                }
                SaveMode::ResolveOnly | SaveMode::ReplaceWithEmptyPlaceholder => None,
            };
            self.units[unit.0].references[index].resource = bound;
        }
    }

    async fn parse_document(
        &mut self,
        resource: ResourceId,
        fetched: &Fetched,
        discovered: &mut Vec<JobKind>,
    ) {
        let id = UnitId(self.units.len());
        let mut unit = extract_document(
            id,
            resource,
            &fetched.data,
            &fetched.final_url,
            fetched.charset.as_deref(),
            self.options,
        )
        .await;
        if resource != ResourceId::ROOT {
            unit.title = None;
        }
        self.add_unit(unit, discovered);
    }

    async fn parse_stylesheet(
        &mut self,
        resource: ResourceId,
        fetched: &Fetched,
        charset_hint: Option<&str>,
        owner: UnitId,
        discovered: &mut Vec<JobKind>,
    ) {
        let id = UnitId(self.units.len());
        let owner_charset = self
            .units
            .get(owner.0)
            .map(|unit| unit.charset.clone())
            .unwrap_or_else(|| "utf-8".to_string());
        let unit = extract_stylesheet(
            id,
            resource,
            &fetched.data,
            &fetched.final_url,
            fetched.charset.as_deref(),
            charset_hint,
            Some((owner, owner_charset.as_str())),
            self.options,
        )
        .await;
        self.add_unit(unit, discovered);
    }

    /// Decides what a reference becomes in the rewritten unit.
    fn resolve(&self, unit: &ParsedUnit, reference: &Reference) -> Resolution {
        if reference.mode == SaveMode::ReplaceWithEmptyPlaceholder {
            return Resolution::Remove;
        }
        let Some(target) = &reference.target else {
            return Resolution::Keep;
        };
        if !is_fetchable(target) || target.scheme() == "data" {
            return Resolution::Keep;
        }

        let fragment = target.fragment().map(|fragment| format!("#{}", fragment)).unwrap_or_default();
        let own = self.bundle.get(unit.resource);
        if own.is_located_at(target) {
            return Resolution::Replace(if fragment.is_empty() { "#".to_string() } else { fragment });
        }

        let bare = strip_fragment(target).0;
        let resource = reference.resource.or_else(|| self.bundle.find(&bare)).map(|id| self.bundle.get(id));
        match resource {
            Some(resource) if resource.is_saved() => match (&resource.local_name, &own.local_name) {
                _ if self.layout.uses_absolute_locations() => {
                    Resolution::Replace(format!("{}{}", resource.uri, fragment))
                }
                (Some(to), Some(from)) => {
                    Resolution::Replace(format!("{}{}", encode_local_path(&relative_path(from, to)), fragment))
                }
                _ => Resolution::Replace(target.to_string()),
            },
            Some(resource) if matches!(resource.status, ResourceStatus::Failed { .. }) && reference.mode != SaveMode::ResolveOnly => {
                Resolution::Replace(format!("{}{}", DOWNLOAD_ERROR_PREFIX, bare))
            }
            _ => Resolution::Replace(target.to_string()),
        }
    }
}

#[async_trait(?Send)]
impl JobHost for Session<'_> {
    type Acquired = Result<Fetched, AcquireError>;

    fn begin_acquisition(
        &mut self,
        _id: JobId,
        job: &LeafJob,
        progress: ProgressSink,
    ) -> LocalBoxFuture<'static, Self::Acquired> {
        if job.purpose == Purpose::Root {
            if let Some(fetched) = self.preloaded.take() {
                return async move { Ok(fetched) }.boxed_local();
            }
        }

        let source = Rc::clone(&self.source);
        let url = job.url.clone();
        async move { source.fetch(&url, progress).await }.boxed_local()
    }

    async fn finish_acquisition(
        &mut self,
        id: JobId,
        job: &LeafJob,
        acquired: Self::Acquired,
        discovered: &mut Vec<JobKind>,
    ) -> Result<JobOutcome, SnapshotError> {
        let fetched = match acquired {
            Ok(fetched) => with_detected_media_type(fetched),
            Err(error) => return self.fail(job.resource, error.into_snapshot_error(&job.url)),
        };
        debug!("{} acquired {} ({} bytes, {})", id, job.url, fetched.data.len(), fetched.media_type);

        {
            let resource = self.bundle.get_mut(job.resource);
            resource.final_url = Some(fetched.final_url.clone());
        }
        if normalize_url(&fetched.final_url) != normalize_url(&job.url) && !self.bundle.get(job.resource).modified {
            self.bundle.add_alias(job.resource, &fetched.final_url);
        }

        match &job.purpose {
            Purpose::Root => {
                if fetched.media_type.starts_with("multipart/") {
                    return Err(SnapshotError::UnsupportedRoot {
                        media_type: fetched.media_type.clone(),
                    });
                }
                self.store(job.resource, &fetched, &fetched.media_type)?;
                if is_document_media_type(&fetched.media_type) {
                    self.parse_document(job.resource, &fetched, discovered).await;
                } else if fetched.media_type == "text/css" {
                    let unit = extract_stylesheet(
                        UnitId(self.units.len()),
                        job.resource,
                        &fetched.data,
                        &fetched.final_url,
                        fetched.charset.as_deref(),
                        None,
                        None,
                        self.options,
                    )
                    .await;
                    self.add_unit(unit, discovered);
                }
                info!("root {} acquired as {}", fetched.final_url, fetched.media_type);
            }
            Purpose::Media => self.store(job.resource, &fetched, &fetched.media_type)?,
            Purpose::Stylesheet {
                charset_hint,
                integrity,
                owner,
            } => {
                if let Some(integrity) = integrity {
                    if !check_integrity(&fetched.data, integrity) {
                        let error = SnapshotError::DownloadFailure {
                            url: job.url.to_string(),
                            status: Some(fetched.status),
                            reason: "integrity check failed".to_string(),
                        };
                        return self.fail(job.resource, error);
                    }
                }
                self.store(job.resource, &fetched, "text/css")?;
                self.parse_stylesheet(job.resource, &fetched, charset_hint.as_deref(), *owner, discovered)
                    .await;
            }
            Purpose::Frame { .. } => {
                self.store(job.resource, &fetched, &fetched.media_type)?;
                if is_document_media_type(&fetched.media_type) {
                    self.parse_document(job.resource, &fetched, discovered).await;
                }
            }
        }

        Ok(JobOutcome::Completed)
    }

    async fn run_rewrite(&mut self, id: JobId, job: &RewriteJob) -> Result<JobOutcome, SnapshotError> {
        let unit = &self.units[job.unit.0];
        let rules_document = if unit.is_document() { Some(unit.id) } else { unit.owner };
        let document = rules_document.and_then(|document| self.documents.get(&document));

        let is_unused = |selectors: &str| document.map(|document| selector_is_unused(document, selectors)).unwrap_or(false);
        let rendered = unit.render(
            |reference| self.resolve(unit, reference),
            document.map(|_| &is_unused as &dyn Fn(&str) -> bool),
        )?;
        let charset = unit.output_charset().to_string();
        debug!("{} rewrote {} ({} references)", id, unit.url, unit.references.len());

        let resource = self.bundle.get_mut(job.resource);
        resource.data = rendered;
        resource.charset = Some(charset);
        Ok(JobOutcome::Completed)
    }
}
