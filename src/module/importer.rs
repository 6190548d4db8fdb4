//! Module version import: fetch, extract, parse, store, commit.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;

use super::extractor::{self, ArchiveFormat, ExtractLimits, ExtractedTree};
use super::git;
use super::locks::{ImportGuard, ImportLocks};
use super::metadata::{self, ModuleMetadata};
use super::terraform;
use super::version::{LatestCache, is_prerelease, parse_version};
use crate::config::{ModuleHosting, ServerConfig};
use crate::error::{Error, Result};
use crate::storage::{self, BlobStore};
use crate::store::{ArchiveInfo, ImportedSubtree, ModuleImport, Store};
use crate::types::{ModuleDetails, ModuleProvider, ModuleVersion, SubmoduleKind};

/// Bumped whenever parsing changes enough that stored details should be rebuilt.
pub const EXTRACTION_VERSION: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStatus {
    Imported,
    Unchanged,
}

#[derive(Debug, Clone)]
pub struct ImportOutcome {
    pub version: ModuleVersion,
    pub status: ImportStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct TagFailure {
    pub tag: String,
    pub message: String,
}

/// Per-tag results of a webhook event, in payload order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TagImportSummary {
    pub imported: Vec<String>,
    pub failed: Vec<TagFailure>,
}

impl TagImportSummary {
    fn fail(&mut self, tag: &str, error: &Error) {
        tracing::warn!("Import of tag {} failed: {}", tag, error);
        self.failed.push(TagFailure {
            tag: tag.to_string(),
            message: error.public_message(),
        });
    }
}

/// Scratch directory removed on drop.
struct WorkDir(PathBuf);

impl WorkDir {
    fn create() -> Result<Self> {
        let path = std::env::temp_dir().join(format!("terrareg-import-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&path)?;
        Ok(Self(path))
    }

    fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.0) {
            tracing::debug!("Failed to remove {}: {}", self.0.display(), e);
        }
    }
}

/// An import that has been parsed but not yet stored or committed.
struct PreparedImport {
    import: ModuleImport,
    archive: Option<(PathBuf, ArchiveFormat)>,
    previous_archive_ext: Option<String>,
    is_new: bool,
    _workdir: WorkDir,
}

/// Source selector for Git imports.
#[derive(Debug, Clone, Default)]
pub struct GitImportRequest {
    pub version: Option<String>,
    pub git_tag: Option<String>,
}

pub struct Importer {
    store: Arc<dyn Store>,
    blobs: Arc<dyn BlobStore>,
    config: Arc<ServerConfig>,
    latest: Arc<LatestCache>,
    locks: Arc<ImportLocks>,
}

impl Importer {
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        blobs: Arc<dyn BlobStore>,
        config: Arc<ServerConfig>,
        latest: Arc<LatestCache>,
        locks: Arc<ImportLocks>,
    ) -> Self {
        Self {
            store,
            blobs,
            config,
            latest,
            locks,
        }
    }

    #[must_use]
    pub fn locks(&self) -> &Arc<ImportLocks> {
        &self.locks
    }

    fn limits(&self) -> ExtractLimits {
        ExtractLimits {
            max_file_size: self.config.max_extracted_file_size,
            max_total_size: self.config.max_extracted_total_size,
        }
    }

    /// Imports an uploaded archive already spooled to `archive`.
    pub async fn import_upload(
        &self,
        module_provider: &ModuleProvider,
        version: &str,
        archive: &Path,
    ) -> Result<ImportOutcome> {
        if self.config.allow_module_hosting == ModuleHosting::Disallow {
            return Err(Error::bad_request("Module hosting is disabled on this registry"));
        }
        let parsed = parse_version(version)?;
        let _guard = self.locks.try_acquire(module_provider.id, version)?;

        tracing::info!("Importing upload {} {}", module_provider.address(), version);

        let sha256 = hash_file(archive).await?;
        let existing = self.store.get_module_version(module_provider.id, version)?;
        if let Some(existing) = &existing {
            if existing.archive_sha256.as_deref() == Some(sha256.as_str())
                && existing.extraction_version == EXTRACTION_VERSION
            {
                return Ok(ImportOutcome {
                    version: existing.clone(),
                    status: ImportStatus::Unchanged,
                });
            }
            if existing.published {
                return Err(Error::conflict(format!(
                    "Version {version} is already published; unpublish or delete it first"
                )));
            }
        }

        let workdir = WorkDir::create()?;
        let extract_to = workdir.path().join("source");
        let source = archive.to_path_buf();
        let limits = self.limits();
        let (format, tree) = tokio::task::spawn_blocking(move || {
            let format = extractor::extract_archive(&source, &extract_to, limits)?;
            let tree = extractor::scan_tree(&extract_to, "")?;
            Ok::<_, Error>((format, tree))
        })
        .await
        .map_err(join_error)??;

        let (details, subtrees, metadata) = parse_tree(tree).await?;
        let import = ModuleImport {
            module_provider_id: module_provider.id,
            version: version.to_string(),
            beta: is_prerelease(&parsed),
            git_sha: None,
            git_tag: None,
            git_path: None,
            extraction_version: EXTRACTION_VERSION,
            description: metadata.description,
            owner: metadata.owner,
            archive: None,
            details,
            subtrees,
            publish: self.config.auto_publish_module_versions,
        };

        let prepared = PreparedImport {
            import,
            archive: Some((archive.to_path_buf(), format)),
            previous_archive_ext: existing.as_ref().and_then(|v| v.archive_ext.clone()),
            is_new: existing.is_none(),
            _workdir: workdir,
        };

        let mut results = self.store_and_commit(module_provider, vec![prepared]).await?;
        let version = results
            .pop()
            .ok_or_else(|| Error::internal("import commit returned no result"))??;
        Ok(ImportOutcome {
            version,
            status: ImportStatus::Imported,
        })
    }

    /// Imports one version from the module-provider's Git repository.
    pub async fn import_git(
        &self,
        module_provider: &ModuleProvider,
        request: &GitImportRequest,
    ) -> Result<ImportOutcome> {
        let (version, tag) = match (&request.version, &request.git_tag) {
            (Some(version), None) => {
                let tag = tag_for_version(&module_provider.git.tag_format, version)?;
                (version.clone(), tag)
            }
            (None, Some(tag)) => (version_from_tag(&module_provider.git.tag_format, tag)?, tag.clone()),
            _ => {
                return Err(Error::bad_request(
                    "Exactly one of version or git_tag must be provided",
                ));
            }
        };
        parse_version(&version)?;
        let url = self.clone_url(module_provider)?;

        let _guard = self
            .locks
            .acquire(module_provider.id, &version, self.config.import_lock_timeout())
            .await?;

        if let Some(existing) = self.already_imported(module_provider, &version, &tag)? {
            return Ok(ImportOutcome {
                version: existing,
                status: ImportStatus::Unchanged,
            });
        }

        let prepared = self.prepare_git(module_provider, &url, &version, &tag).await?;
        let mut results = self.store_and_commit(module_provider, vec![prepared]).await?;
        let version = results
            .pop()
            .ok_or_else(|| Error::internal("import commit returned no result"))??;
        Ok(ImportOutcome {
            version,
            status: ImportStatus::Imported,
        })
    }

    /// Imports every tag of a webhook event under one transaction, a savepoint per tag.
    pub async fn import_git_tags(
        &self,
        module_provider: &ModuleProvider,
        tags: &[String],
    ) -> Result<TagImportSummary> {
        let mut summary = TagImportSummary::default();
        let url = self.clone_url(module_provider)?;

        let mut resolved: Vec<(String, String)> = Vec::new();
        for tag in tags {
            if resolved.iter().any(|(t, _)| t == tag) {
                continue;
            }
            match version_from_tag(&module_provider.git.tag_format, tag)
                .and_then(|v| parse_version(&v).map(|_| v))
            {
                Ok(version) => resolved.push((tag.clone(), version)),
                Err(e) => summary.fail(tag, &e),
            }
        }

        // Sorted acquisition keeps concurrent multi-tag events from deadlocking.
        let mut lock_order: Vec<&str> = resolved.iter().map(|(_, v)| v.as_str()).collect();
        lock_order.sort_unstable();
        lock_order.dedup();
        let mut guards: Vec<ImportGuard> = Vec::with_capacity(lock_order.len());
        for version in lock_order {
            guards.push(
                self.locks
                    .acquire(module_provider.id, version, self.config.import_lock_timeout())
                    .await?,
            );
        }

        let mut prepared = Vec::new();
        let mut prepared_tags = Vec::new();
        for (tag, version) in &resolved {
            match self.already_imported(module_provider, version, tag) {
                Ok(Some(_)) => {
                    tracing::info!("Tag {} already imported, skipping", tag);
                    summary.imported.push(tag.clone());
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    summary.fail(tag, &e);
                    continue;
                }
            }
            match self.prepare_git(module_provider, &url, version, tag).await {
                Ok(p) => {
                    prepared.push(p);
                    prepared_tags.push(tag.clone());
                }
                Err(e) => summary.fail(tag, &e),
            }
        }

        if !prepared.is_empty() {
            let results = self.store_and_commit(module_provider, prepared).await?;
            for (tag, result) in prepared_tags.into_iter().zip(results) {
                match result {
                    Ok(_) => summary.imported.push(tag),
                    Err(e) => summary.fail(&tag, &e),
                }
            }
        }

        drop(guards);
        summary.imported.sort_by_key(|t| tags.iter().position(|x| x == t));
        summary.failed.sort_by_key(|f| tags.iter().position(|x| *x == f.tag));
        Ok(summary)
    }

    fn clone_url(&self, module_provider: &ModuleProvider) -> Result<String> {
        let git_provider = match module_provider.git.git_provider_id {
            Some(id) => self.store.get_git_provider(id)?,
            None => None,
        };
        git::clone_url(module_provider, git_provider.as_ref()).ok_or_else(|| {
            Error::bad_request("Module provider has no Git clone URL configured")
        })
    }

    fn already_imported(
        &self,
        module_provider: &ModuleProvider,
        version: &str,
        tag: &str,
    ) -> Result<Option<ModuleVersion>> {
        let existing = self.store.get_module_version(module_provider.id, version)?;
        Ok(existing.filter(|v| {
            v.extraction_version == EXTRACTION_VERSION && v.git_tag.as_deref() == Some(tag)
        }))
    }

    async fn prepare_git(
        &self,
        module_provider: &ModuleProvider,
        url: &str,
        version: &str,
        tag: &str,
    ) -> Result<PreparedImport> {
        tracing::info!("Importing {} {} from tag {}", module_provider.address(), version, tag);

        let existing = self.store.get_module_version(module_provider.id, version)?;
        if existing.as_ref().is_some_and(|v| v.published) {
            return Err(Error::conflict(format!(
                "Version {version} is already published; unpublish or delete it first"
            )));
        }

        let workdir = WorkDir::create()?;
        let checkout = workdir.path().join("repo");
        let sha = git::clone_tag(url, tag, &checkout, self.config.git_clone_timeout()).await?;

        let module_path = module_provider.git.path.trim_matches('/').to_string();
        let hosting = self.config.allow_module_hosting;
        let archive_git_path = module_provider.git.archive_git_path;
        let archive_path = workdir.path().join("source.tar.gz");
        let archive_out = archive_path.clone();
        let scan_root = checkout.clone();
        let scan_path = module_path.clone();

        let tree = tokio::task::spawn_blocking(move || {
            let tree = extractor::scan_tree(&scan_root, &scan_path)?;
            if hosting != ModuleHosting::Disallow {
                let archive_root = if archive_git_path { tree.root.as_path() } else { scan_root.as_path() };
                extractor::create_tar_gz(archive_root, &archive_out)?;
            }
            Ok::<_, Error>(tree)
        })
        .await
        .map_err(join_error)??;

        let (details, subtrees, metadata) = parse_tree(tree).await?;
        let parsed = parse_version(version)?;
        let git_path = (!module_path.is_empty()).then_some(module_path);

        let archive = (hosting != ModuleHosting::Disallow).then_some((archive_path, ArchiveFormat::TarGz));
        let stored_git_path = if archive_git_path { None } else { git_path.clone() };

        let import = ModuleImport {
            module_provider_id: module_provider.id,
            version: version.to_string(),
            beta: is_prerelease(&parsed),
            git_sha: Some(sha),
            git_tag: Some(tag.to_string()),
            git_path: if archive.is_some() { stored_git_path } else { git_path },
            extraction_version: EXTRACTION_VERSION,
            description: metadata.description,
            owner: metadata.owner,
            archive: None,
            details,
            subtrees,
            publish: self.config.auto_publish_module_versions,
        };

        Ok(PreparedImport {
            import,
            archive,
            previous_archive_ext: existing.as_ref().and_then(|v| v.archive_ext.clone()),
            is_new: existing.is_none(),
            _workdir: workdir,
        })
    }

    /// Stores each archive, then commits the whole batch in one transaction.
    ///
    /// An entry whose archive cannot be stored fails on its own; blobs of
    /// entries that fail to commit are removed when the version was new.
    async fn store_and_commit(
        &self,
        module_provider: &ModuleProvider,
        mut prepared: Vec<PreparedImport>,
    ) -> Result<Vec<Result<ModuleVersion>>> {
        let mut stored: Vec<Option<String>> = Vec::with_capacity(prepared.len());
        let mut store_errors: Vec<Option<Error>> = Vec::with_capacity(prepared.len());

        for entry in &mut prepared {
            let Some((path, format)) = &entry.archive else {
                stored.push(None);
                store_errors.push(None);
                continue;
            };
            let blob_path = storage::module_archive_path(
                &module_provider.namespace,
                &module_provider.module,
                &module_provider.provider,
                &entry.import.version,
                format.extension(),
            );
            match self.put_archive(&blob_path, path).await {
                Ok(info) => {
                    entry.import.archive = Some(ArchiveInfo {
                        ext: format.extension().to_string(),
                        sha256: info.sha256,
                        size: i64::try_from(info.size).unwrap_or(i64::MAX),
                    });
                    stored.push(Some(blob_path));
                    store_errors.push(None);
                }
                Err(e) => {
                    stored.push(None);
                    store_errors.push(Some(e));
                }
            }
        }

        let (committable, indices): (Vec<ModuleImport>, Vec<usize>) = prepared
            .iter()
            .enumerate()
            .filter(|(i, _)| store_errors[*i].is_none())
            .map(|(i, p)| (p.import.clone(), i))
            .unzip();

        let committed = if committable.is_empty() {
            Vec::new()
        } else {
            self.store.commit_module_imports(&committable)?
        };
        self.latest.invalidate(module_provider.id);

        let mut results: Vec<Option<Result<ModuleVersion>>> =
            store_errors.into_iter().map(|e| e.map(Err)).collect();
        for (index, result) in indices.into_iter().zip(committed) {
            let entry = &prepared[index];
            match &result {
                Ok(version) => {
                    tracing::info!(
                        "Committed {} {} (published: {})",
                        module_provider.address(),
                        version.version,
                        version.published
                    );
                    self.remove_stale_archive(module_provider, entry).await;
                }
                Err(_) if entry.is_new => {
                    if let Some(path) = &stored[index] {
                        if let Err(e) = self.blobs.delete(path).await {
                            tracing::warn!("Failed to remove orphaned archive {}: {}", path, e);
                        }
                    }
                }
                Err(_) => {}
            }
            results[index] = Some(result);
        }

        Ok(results
            .into_iter()
            .map(|r| r.unwrap_or_else(|| Err(Error::internal("import entry was not committed"))))
            .collect())
    }

    async fn put_archive(&self, blob_path: &str, local: &Path) -> Result<storage::PutOutcome> {
        let mut file = tokio::fs::File::open(local).await?;
        Ok(self.blobs.put(blob_path, &mut file).await?)
    }

    /// A re-import with a different archive format leaves the old blob behind.
    async fn remove_stale_archive(&self, module_provider: &ModuleProvider, entry: &PreparedImport) {
        let Some(previous) = &entry.previous_archive_ext else {
            return;
        };
        let current = entry.import.archive.as_ref().map(|a| a.ext.as_str());
        if current == Some(previous.as_str()) {
            return;
        }
        let path = storage::module_archive_path(
            &module_provider.namespace,
            &module_provider.module,
            &module_provider.provider,
            &entry.import.version,
            previous,
        );
        if let Err(e) = self.blobs.delete(&path).await {
            tracing::warn!("Failed to remove stale archive {}: {}", path, e);
        }
    }
}

fn join_error(e: tokio::task::JoinError) -> Error {
    Error::internal(format!("Import task failed: {e}"))
}

async fn hash_file(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let outcome = storage::copy_hashed(&mut file, &mut tokio::io::sink(), u64::MAX).await?;
    Ok(outcome.sha256)
}

fn parse_workers() -> usize {
    std::thread::available_parallelism().map_or(1, |n| n.get())
}

type ParsedTree = (ModuleDetails, Vec<ImportedSubtree>, ModuleMetadata);

/// Parses the module root and every submodule/example on a bounded worker pool.
async fn parse_tree(tree: ExtractedTree) -> Result<ParsedTree> {
    let tree = Arc::new(tree);
    let mut jobs: Vec<(Option<SubmoduleKind>, String)> = vec![(None, String::new())];
    jobs.extend(tree.submodules.iter().map(|p| (Some(SubmoduleKind::Submodule), p.clone())));
    jobs.extend(tree.examples.iter().map(|p| (Some(SubmoduleKind::Example), p.clone())));

    let workers = Arc::new(Semaphore::new(parse_workers()));
    let cancel = CancellationToken::new();
    let (tx, mut rx) = mpsc::channel(jobs.len());
    let job_count = jobs.len();

    for (index, (kind, dir)) in jobs.into_iter().enumerate() {
        let tree = Arc::clone(&tree);
        let workers = Arc::clone(&workers);
        let cancel = cancel.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let Ok(_permit) = workers.acquire_owned().await else {
                return;
            };
            if cancel.is_cancelled() {
                return;
            }
            let result = tokio::task::spawn_blocking(move || {
                terraform::parse_module_dir(&tree.root, &dir, &tree.files).map(|d| (kind, dir, d))
            })
            .await
            .unwrap_or_else(|e| Err(join_error(e)));
            if result.is_err() {
                cancel.cancel();
            }
            // The receiver only goes away once the import has already failed.
            let _ = tx.send((index, result)).await;
        });
    }
    drop(tx);

    let mut slots: Vec<Option<(Option<SubmoduleKind>, String, ModuleDetails)>> =
        (0..job_count).map(|_| None).collect();
    let mut first_error = None;
    while let Some((index, result)) = rx.recv().await {
        match result {
            Ok(parsed) => slots[index] = Some(parsed),
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }
    if let Some(e) = first_error {
        return Err(e);
    }

    let mut root_details = None;
    let mut subtrees = Vec::new();
    for slot in slots {
        match slot {
            Some((None, _, details)) => root_details = Some(details),
            Some((Some(kind), path, details)) => subtrees.push(ImportedSubtree { kind, path, details }),
            None => return Err(Error::internal("module parse was cancelled")),
        }
    }
    let details = root_details.ok_or_else(|| Error::internal("module root was not parsed"))?;

    let root = tree.root.clone();
    let metadata = tokio::task::spawn_blocking(move || metadata::read_metadata(&root))
        .await
        .map_err(join_error)??;

    Ok((details, subtrees, metadata))
}

enum TagToken {
    Literal(String),
    Version,
    Major,
    Minor,
    Patch,
}

fn tokenize_tag_format(format: &str) -> Result<Vec<TagToken>> {
    let mut tokens = Vec::new();
    let mut rest = format;
    while let Some(start) = rest.find('{') {
        if start > 0 {
            tokens.push(TagToken::Literal(rest[..start].to_string()));
        }
        let end = rest[start..]
            .find('}')
            .map(|e| start + e)
            .ok_or_else(|| Error::bad_request(format!("Invalid tag format '{format}'")))?;
        tokens.push(match &rest[start + 1..end] {
            "version" => TagToken::Version,
            "major" => TagToken::Major,
            "minor" => TagToken::Minor,
            "patch" => TagToken::Patch,
            other => {
                return Err(Error::bad_request(format!(
                    "Unknown placeholder '{{{other}}}' in tag format"
                )));
            }
        });
        rest = &rest[end + 1..];
    }
    if !rest.is_empty() {
        tokens.push(TagToken::Literal(rest.to_string()));
    }
    Ok(tokens)
}

#[derive(Default, Clone)]
struct TagCaptures<'a> {
    version: Option<&'a str>,
    major: Option<&'a str>,
    minor: Option<&'a str>,
    patch: Option<&'a str>,
}

fn match_tokens<'a>(tokens: &[TagToken], input: &'a str, captures: TagCaptures<'a>) -> Option<TagCaptures<'a>> {
    let Some((first, rest)) = tokens.split_first() else {
        return input.is_empty().then_some(captures);
    };
    match first {
        TagToken::Literal(lit) => match_tokens(rest, input.strip_prefix(lit.as_str())?, captures),
        TagToken::Version => (1..=input.len()).rev().filter(|n| input.is_char_boundary(*n)).find_map(|n| {
            let mut next = captures.clone();
            next.version = Some(&input[..n]);
            match_tokens(rest, &input[n..], next)
        }),
        TagToken::Major | TagToken::Minor | TagToken::Patch => {
            let digits = input.bytes().take_while(u8::is_ascii_digit).count();
            (1..=digits).rev().find_map(|n| {
                let mut next = captures.clone();
                let value = Some(&input[..n]);
                match first {
                    TagToken::Major => next.major = value,
                    TagToken::Minor => next.minor = value,
                    _ => next.patch = value,
                }
                match_tokens(rest, &input[n..], next)
            })
        }
    }
}

/// Extracts the version a tag encodes under `format` (e.g. `v{version}`).
pub fn version_from_tag(format: &str, tag: &str) -> Result<String> {
    let tokens = tokenize_tag_format(format)?;
    let captures = match_tokens(&tokens, tag, TagCaptures::default())
        .ok_or_else(|| Error::BadTagFormat(format!("{tag} (expected {format})")))?;

    if let Some(version) = captures.version {
        return Ok(version.to_string());
    }
    let Some(major) = captures.major else {
        return Err(Error::BadTagFormat(format!(
            "{tag}: tag format {format} does not capture a version"
        )));
    };
    Ok(format!(
        "{major}.{}.{}",
        captures.minor.unwrap_or("0"),
        captures.patch.unwrap_or("0")
    ))
}

/// Renders the tag for `version` under `format`.
pub fn tag_for_version(format: &str, version: &str) -> Result<String> {
    let parsed = parse_version(version)?;
    let mut tag = String::new();
    for token in tokenize_tag_format(format)? {
        match token {
            TagToken::Literal(lit) => tag.push_str(&lit),
            TagToken::Version => tag.push_str(version),
            TagToken::Major => tag.push_str(&parsed.major.to_string()),
            TagToken::Minor => tag.push_str(&parsed.minor.to_string()),
            TagToken::Patch => tag.push_str(&parsed.patch.to_string()),
        }
    }
    Ok(tag)
}
