use std::path::{Path, PathBuf};

use ade_core::{ConfigurationId, WorkspaceId};
use ade_storage::PathManager;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;

use crate::digest::{content_digest, dependency_digest};

/// File names rejected from editable-CRUD operations regardless of
/// extension, per spec.md §4.3's file-listing contract.
const EXCLUDED_FILE_NAMES: &[&str] = &[".DS_Store"];

/// Size cap for an editable file outside `assets/` (§4.3).
const CODE_FILE_MAX_BYTES: u64 = 512 * 1024;

/// Size cap for an editable file under `assets/` (§4.3).
const ASSET_FILE_MAX_BYTES: u64 = 5 * 1024 * 1024;

fn max_bytes_for(relative: &str) -> u64 {
    if relative.starts_with("assets/") {
        ASSET_FILE_MAX_BYTES
    } else {
        CODE_FILE_MAX_BYTES
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    File,
    Directory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListDepth {
    Zero,
    One,
    Infinite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Path,
    Name,
    Mtime,
    Size,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileEntry {
    pub path: String,
    pub name: String,
    pub parent: Option<String>,
    pub kind: EntryKind,
    pub depth: usize,
    pub size: Option<u64>,
    pub mtime: DateTime<Utc>,
    pub etag: Option<String>,
    pub content_type: Option<String>,
    pub has_children: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ListFilesQuery {
    pub prefix: Option<String>,
    pub depth: Option<ListDepth>,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub limit: usize,
    pub cursor: Option<String>,
    pub sort: Option<SortKey>,
    pub order: Option<SortOrder>,
}

pub struct FileListing {
    pub entries: Vec<FileEntry>,
    pub next_cursor: Option<String>,
    pub fileset_hash: String,
}

/// Name of the Python package every configuration's dependency manifest
/// must declare. A `pyproject.toml` lacking it fails materialize/import
/// with `engine_dependency_missing` before the package is ever used.
const ENGINE_DEPENDENCY_NAME: &str = "ade-engine";

/// Entry names excluded from archive import regardless of where they occur
/// in the tree — caches and VCS metadata a template should never carry.
const EXCLUDED_ENTRY_NAMES: &[&str] = &[".git", "__pycache__", ".venv", "node_modules"];

/// Caps enforced during archive import, defending against zip bombs and
/// path traversal before any bytes are written to disk.
#[derive(Debug, Clone, Copy)]
pub struct ImportLimits {
    pub max_archive_bytes: u64,
    pub max_entries: usize,
    pub max_entry_bytes: u64,
    pub max_total_uncompressed_bytes: u64,
}

impl Default for ImportLimits {
    fn default() -> Self {
        Self {
            max_archive_bytes: 64 * 1024 * 1024,
            max_entries: 5000,
            max_entry_bytes: 16 * 1024 * 1024,
            max_total_uncompressed_bytes: 200 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    pub name: String,
    #[serde(default)]
    pub engine_spec: Option<String>,
}

#[derive(Clone)]
pub struct ConfigStorage {
    paths: PathManager,
    limits: ImportLimits,
}

impl ConfigStorage {
    pub fn new(paths: PathManager, limits: ImportLimits) -> Self {
        Self { paths, limits }
    }

    fn root(
        &self,
        workspace_id: WorkspaceId,
        configuration_id: ConfigurationId,
    ) -> ade_core::Result<PathBuf> {
        self.paths.configuration_root(workspace_id, configuration_id)
    }

    /// Materializes a new configuration package from a template directory
    /// by staging into a sibling `.staging-<uuid>` directory, validating,
    /// then atomically renaming into place. Fails with `PublishConflict` if
    /// the destination already exists.
    pub async fn materialize_from_template(
        &self,
        workspace_id: WorkspaceId,
        configuration_id: ConfigurationId,
        template_root: &Path,
    ) -> ade_core::Result<()> {
        let destination = self.root(workspace_id, configuration_id)?;
        if fs::try_exists(&destination).await? {
            return Err(ade_core::Error::PublishConflict(format!(
                "configuration {configuration_id} already has a package"
            )));
        }

        let staging = destination.with_file_name(format!(
            ".staging-{}",
            uuid::Uuid::new_v4()
        ));
        copy_tree(template_root, &staging).await?;
        self.validate_path(&staging).await?;

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).await?;
        }
        match fs::rename(&staging, &destination).await {
            Ok(()) => Ok(()),
            Err(err) => {
                let _ = remove_tree(&staging).await;
                Err(err.into())
            }
        }
    }

    /// Clones an existing configuration's package into a new configuration
    /// id, same staging-then-rename approach.
    pub async fn clone_configuration(
        &self,
        workspace_id: WorkspaceId,
        source: ConfigurationId,
        destination: ConfigurationId,
    ) -> ade_core::Result<()> {
        let source_root = self.root(workspace_id, source)?;
        self.materialize_from_template(workspace_id, destination, &source_root)
            .await
    }

    /// Imports a zip archive as a configuration package, defending against
    /// zip-slip (per-entry path validated through `PathManager::safe_join`),
    /// zip bombs (compressed archive size cap, per-entry uncompressed size
    /// cap, entry count cap), and a single top-level wrapper directory
    /// (stripped if every entry shares one).
    pub async fn import_archive(
        &self,
        workspace_id: WorkspaceId,
        configuration_id: ConfigurationId,
        archive_bytes: Vec<u8>,
    ) -> ade_core::Result<()> {
        if archive_bytes.len() as u64 > self.limits.max_archive_bytes {
            return Err(ade_core::Error::ArchiveTooLarge(format!(
                "archive is {} bytes, max is {}",
                archive_bytes.len(),
                self.limits.max_archive_bytes
            )));
        }

        let destination = self.root(workspace_id, configuration_id)?;
        if fs::try_exists(&destination).await? {
            return Err(ade_core::Error::PublishConflict(format!(
                "configuration {configuration_id} already has a package"
            )));
        }
        let staging = destination.with_file_name(format!(".staging-{}", uuid::Uuid::new_v4()));

        let limits = self.limits;
        let staging_for_blocking = staging.clone();
        let extraction = tokio::task::spawn_blocking(move || {
            extract_zip_sync(&archive_bytes, &staging_for_blocking, limits)
        })
        .await
        .map_err(|err| ade_core::Error::Internal(err.to_string()))?;

        if let Err(err) = extraction {
            let _ = remove_tree(&staging).await;
            return Err(err);
        }

        self.validate_path(&staging).await?;
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).await?;
        }
        match fs::rename(&staging, &destination).await {
            Ok(()) => Ok(()),
            Err(err) => {
                let _ = remove_tree(&staging).await;
                Err(err.into())
            }
        }
    }

    /// Validates that a configuration package has the expected shape:
    /// `pyproject.toml` and `manifest.json` present and parseable.
    pub async fn validate(
        &self,
        workspace_id: WorkspaceId,
        configuration_id: ConfigurationId,
    ) -> ade_core::Result<Manifest> {
        let root = self.root(workspace_id, configuration_id)?;
        self.validate_path(&root).await
    }

    async fn validate_path(&self, root: &Path) -> ade_core::Result<Manifest> {
        let pyproject_path = root.join("pyproject.toml");
        let pyproject_bytes = fs::read(&pyproject_path).await.map_err(|_| {
            ade_core::Error::InvalidSourceShape("missing pyproject.toml".to_string())
        })?;
        let pyproject_text = String::from_utf8_lossy(&pyproject_bytes);
        let pyproject: toml::Value = pyproject_text.parse().map_err(|err| {
            ade_core::Error::InvalidSourceShape(format!("invalid pyproject.toml: {err}"))
        })?;
        if !declares_engine_dependency(&pyproject) {
            return Err(ade_core::Error::EngineDependencyMissing(format!(
                "pyproject.toml does not declare {ENGINE_DEPENDENCY_NAME}"
            )));
        }

        let manifest_path = root.join("manifest.json");
        let manifest_bytes = fs::read(&manifest_path).await.map_err(|_| {
            ade_core::Error::InvalidSourceShape("missing manifest.json".to_string())
        })?;
        let manifest: Manifest = serde_json::from_slice(&manifest_bytes).map_err(|err| {
            ade_core::Error::InvalidSourceShape(format!("invalid manifest.json: {err}"))
        })?;
        Ok(manifest)
    }

    pub async fn content_digest(
        &self,
        workspace_id: WorkspaceId,
        configuration_id: ConfigurationId,
    ) -> ade_core::Result<String> {
        content_digest(&self.root(workspace_id, configuration_id)?).await
    }

    pub async fn dependency_digest(
        &self,
        workspace_id: WorkspaceId,
        configuration_id: ConfigurationId,
    ) -> ade_core::Result<String> {
        dependency_digest(&self.root(workspace_id, configuration_id)?).await
    }

    /// Reads a single file's bytes and its ETag (`sha256:<hex>` over the
    /// file's bytes).
    pub async fn read_file(
        &self,
        workspace_id: WorkspaceId,
        configuration_id: ConfigurationId,
        relative: &str,
    ) -> ade_core::Result<(Vec<u8>, String)> {
        let path = self
            .paths
            .configuration_file(workspace_id, configuration_id, relative)?;
        let bytes = fs::read(&path)
            .await
            .map_err(|_| ade_core::Error::NotFound(relative.to_string()))?;
        Ok((bytes.clone(), etag_of(&bytes)))
    }

    /// Writes a file, enforcing an optimistic-concurrency precondition:
    /// `if_match` must equal the current ETag (or be `Some("*")` for
    /// create-only semantics meaning "must not exist"), else
    /// `PreconditionFailed`/`PreconditionRequired`.
    pub async fn write_file(
        &self,
        workspace_id: WorkspaceId,
        configuration_id: ConfigurationId,
        relative: &str,
        bytes: &[u8],
        if_match: Option<&str>,
    ) -> ade_core::Result<String> {
        reject_excluded(relative)?;
        let max_bytes = max_bytes_for(relative);
        if bytes.len() as u64 > max_bytes {
            return Err(ade_core::Error::FileTooLarge(format!(
                "{relative} exceeds {max_bytes} bytes"
            )));
        }
        let path = self
            .paths
            .configuration_file(workspace_id, configuration_id, relative)?;

        let existing = fs::read(&path).await.ok();
        match (if_match, &existing) {
            (None, _) => {
                return Err(ade_core::Error::PreconditionRequired(
                    "If-Match header is required".to_string(),
                ));
            }
            (Some("*"), Some(_)) => {
                return Err(ade_core::Error::PreconditionFailed(format!(
                    "{relative} already exists"
                )));
            }
            (Some(tag), Some(current)) if tag != "*" => {
                let current_tag = etag_of(current);
                if tag != current_tag {
                    return Err(ade_core::Error::PreconditionFailed(format!(
                        "etag mismatch for {relative}"
                    )));
                }
            }
            (Some(tag), None) if tag != "*" => {
                return Err(ade_core::Error::PreconditionFailed(format!(
                    "{relative} does not exist"
                )));
            }
            _ => {}
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, bytes).await?;
        Ok(etag_of(bytes))
    }

    /// Renames/moves a file or directory. `dest_if_match` allows
    /// overwriting an existing destination *file* when it equals the
    /// destination's current ETag; directories can never be overwritten,
    /// and a destination under an excluded name is always rejected.
    pub async fn rename_file(
        &self,
        workspace_id: WorkspaceId,
        configuration_id: ConfigurationId,
        from: &str,
        to: &str,
        dest_if_match: Option<&str>,
    ) -> ade_core::Result<()> {
        reject_excluded(to)?;
        let from_path = self
            .paths
            .configuration_file(workspace_id, configuration_id, from)?;
        let to_path = self
            .paths
            .configuration_file(workspace_id, configuration_id, to)?;

        if let Ok(metadata) = fs::metadata(&to_path).await {
            if metadata.is_dir() {
                return Err(ade_core::Error::Conflict(format!("{to} already exists")));
            }
            let current = fs::read(&to_path).await?;
            match dest_if_match {
                Some(tag) if tag == etag_of(&current) => {}
                _ => {
                    return Err(ade_core::Error::PreconditionFailed(format!(
                        "{to} already exists"
                    )));
                }
            }
        }
        if let Some(parent) = to_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(&from_path, &to_path).await?;
        Ok(())
    }

    /// Deletes a single file, requiring `if_match` to equal the file's
    /// current ETag (optimistic concurrency, same contract as writes).
    pub async fn delete_file(
        &self,
        workspace_id: WorkspaceId,
        configuration_id: ConfigurationId,
        relative: &str,
        if_match: &str,
    ) -> ade_core::Result<()> {
        let path = self
            .paths
            .configuration_file(workspace_id, configuration_id, relative)?;
        let current = fs::read(&path)
            .await
            .map_err(|_| ade_core::Error::NotFound(relative.to_string()))?;
        if etag_of(&current) != if_match {
            return Err(ade_core::Error::PreconditionFailed(format!(
                "etag mismatch for {relative}"
            )));
        }
        fs::remove_file(&path).await?;
        Ok(())
    }

    pub async fn create_directory(
        &self,
        workspace_id: WorkspaceId,
        configuration_id: ConfigurationId,
        relative: &str,
    ) -> ade_core::Result<()> {
        reject_excluded(relative)?;
        let path = self
            .paths
            .configuration_file(workspace_id, configuration_id, relative)?;
        if fs::try_exists(&path).await? {
            return Err(ade_core::Error::Conflict(format!("{relative} already exists")));
        }
        fs::create_dir_all(&path).await?;
        Ok(())
    }

    /// Deletes a directory and everything under it. Callers are expected
    /// to confirm draft status before calling; this method only enforces
    /// path safety.
    pub async fn delete_directory(
        &self,
        workspace_id: WorkspaceId,
        configuration_id: ConfigurationId,
        relative: &str,
    ) -> ade_core::Result<()> {
        let path = self
            .paths
            .configuration_file(workspace_id, configuration_id, relative)?;
        if !fs::try_exists(&path).await? {
            return Err(ade_core::Error::NotFound(relative.to_string()));
        }
        fs::remove_dir_all(&path).await?;
        Ok(())
    }

    /// Produces a flat, sorted listing under `prefix`, honoring
    /// `depth`/`include`/`exclude`/`limit`/`cursor`/`sort`/`order` and
    /// returning a weak `fileset_hash` over (path, etag, size) for every
    /// entry *that matched the filters*, so a client can `If-None-Match`
    /// against it and get `304` when nothing in its view changed.
    pub async fn list_files(
        &self,
        workspace_id: WorkspaceId,
        configuration_id: ConfigurationId,
        query: &ListFilesQuery,
    ) -> ade_core::Result<FileListing> {
        let root = self.root(workspace_id, configuration_id)?;
        let start = match &query.prefix {
            Some(prefix) if !prefix.is_empty() => self
                .paths
                .configuration_file(workspace_id, configuration_id, prefix)?,
            _ => root.clone(),
        };

        let include: Vec<glob::Pattern> = query
            .include
            .iter()
            .filter_map(|p| glob::Pattern::new(p).ok())
            .collect();
        let exclude: Vec<glob::Pattern> = query
            .exclude
            .iter()
            .filter_map(|p| glob::Pattern::new(p).ok())
            .collect();
        let depth_limit = query.depth.unwrap_or(ListDepth::Infinite);

        let mut entries = Vec::new();
        if fs::try_exists(&start).await? {
            walk(&root, &start, 0, depth_limit, &include, &exclude, &mut entries).await?;
        }

        let sort = query.sort.unwrap_or(SortKey::Path);
        let order = query.order.unwrap_or(SortOrder::Ascending);
        entries.sort_by(|a, b| {
            let ordering = match sort {
                SortKey::Path => a.path.cmp(&b.path),
                SortKey::Name => a.name.cmp(&b.name),
                SortKey::Mtime => a.mtime.cmp(&b.mtime),
                SortKey::Size => a.size.unwrap_or(0).cmp(&b.size.unwrap_or(0)),
            };
            match order {
                SortOrder::Ascending => ordering,
                SortOrder::Descending => ordering.reverse(),
            }
        });

        let fileset_hash = fileset_hash_of(&entries);

        let offset = query
            .cursor
            .as_deref()
            .and_then(|c| c.parse::<usize>().ok())
            .unwrap_or(0);
        let limit = query.limit.clamp(1, 5000);
        let page: Vec<FileEntry> = entries.into_iter().skip(offset).take(limit).collect();
        let next_cursor = if page.len() == limit {
            Some((offset + limit).to_string())
        } else {
            None
        };

        Ok(FileListing { entries: page, next_cursor, fileset_hash })
    }

    /// Builds a zip archive of the entire configuration package in memory,
    /// for the export contract (spec.md §4.3's "export-to-zip-in-memory").
    pub async fn export_zip(
        &self,
        workspace_id: WorkspaceId,
        configuration_id: ConfigurationId,
    ) -> ade_core::Result<Vec<u8>> {
        let root = self.root(workspace_id, configuration_id)?;
        tokio::task::spawn_blocking(move || export_zip_sync(&root))
            .await
            .map_err(|err| ade_core::Error::Internal(err.to_string()))?
    }
}

/// Rejects `.DS_Store`/`*.pyc` and any path with a segment under an
/// excluded directory name (`.git`, `__pycache__`, `.venv`,
/// `node_modules`, …), not just as the final path component.
fn reject_excluded(relative: &str) -> ade_core::Result<()> {
    if relative.ends_with(".pyc") {
        return Err(ade_core::Error::PathNotAllowed(relative.to_string()));
    }
    for segment in relative.split('/') {
        if EXCLUDED_FILE_NAMES.contains(&segment) || EXCLUDED_ENTRY_NAMES.contains(&segment) {
            return Err(ade_core::Error::PathNotAllowed(relative.to_string()));
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn walk<'a>(
    root: &'a Path,
    dir: &'a Path,
    depth: usize,
    depth_limit: ListDepth,
    include: &'a [glob::Pattern],
    exclude: &'a [glob::Pattern],
    out: &'a mut Vec<FileEntry>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = ade_core::Result<()>> + Send + 'a>> {
    Box::pin(async move {
        let mut entries = fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if EXCLUDED_FILE_NAMES.contains(&name.as_str())
                || EXCLUDED_ENTRY_NAMES.contains(&name.as_str())
            {
                continue;
            }
            let path = entry.path();
            let relative = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            if !exclude.is_empty() && exclude.iter().any(|p| p.matches(&relative)) {
                continue;
            }
            let metadata = entry.metadata().await?;
            let is_dir = metadata.is_dir();
            let matched = include.is_empty() || include.iter().any(|p| p.matches(&relative));

            if matched {
                let parent = path
                    .parent()
                    .and_then(|p| p.strip_prefix(root).ok())
                    .map(|p| p.to_string_lossy().replace('\\', "/"))
                    .filter(|p| !p.is_empty());
                let mtime: DateTime<Utc> = metadata
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now());
                let (size, etag, content_type) = if is_dir {
                    (None, None, None)
                } else {
                    let bytes = fs::read(&path).await?;
                    (
                        Some(metadata.len()),
                        Some(etag_of(&bytes)),
                        Some(content_type_of(&name)),
                    )
                };
                let has_children = if is_dir {
                    let mut children = fs::read_dir(&path).await?;
                    children.next_entry().await?.is_some()
                } else {
                    false
                };
                out.push(FileEntry {
                    path: relative,
                    name,
                    parent,
                    kind: if is_dir { EntryKind::Directory } else { EntryKind::File },
                    depth,
                    size,
                    mtime,
                    etag,
                    content_type,
                    has_children,
                });
            }

            if is_dir {
                let next_depth_allowed = match depth_limit {
                    ListDepth::Zero => false,
                    ListDepth::One => depth == 0,
                    ListDepth::Infinite => true,
                };
                if next_depth_allowed {
                    walk(root, &path, depth + 1, depth_limit, include, exclude, out).await?;
                }
            }
        }
        Ok(())
    })
}

fn content_type_of(name: &str) -> String {
    match name.rsplit_once('.').map(|(_, ext)| ext) {
        Some("json") => "application/json",
        Some("toml") => "application/toml",
        Some("py") => "text/x-python",
        Some("txt" | "md") => "text/plain",
        _ => "application/octet-stream",
    }
    .to_string()
}

fn fileset_hash_of(entries: &[FileEntry]) -> String {
    let mut hasher = Sha256::new();
    for entry in entries {
        hasher.update(entry.path.as_bytes());
        hasher.update([0u8]);
        hasher.update(entry.etag.as_deref().unwrap_or("").as_bytes());
        hasher.update([0u8]);
        hasher.update(entry.size.unwrap_or(0).to_le_bytes());
        hasher.update([0u8]);
    }
    format!("W/\"sha256:{}\"", hex::encode(hasher.finalize()))
}

fn export_zip_sync(root: &Path) -> ade_core::Result<Vec<u8>> {
    let mut buffer = std::io::Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut buffer);
        let options = zip::write::FileOptions::default();
        let mut stack = vec![(root.to_path_buf(), String::new())];
        while let Some((dir, prefix)) = stack.pop() {
            for entry in std::fs::read_dir(&dir)? {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().to_string();
                if EXCLUDED_FILE_NAMES.contains(&name.as_str())
                    || EXCLUDED_ENTRY_NAMES.contains(&name.as_str())
                {
                    continue;
                }
                let relative = if prefix.is_empty() { name.clone() } else { format!("{prefix}/{name}") };
                let file_type = entry.file_type()?;
                if file_type.is_dir() {
                    stack.push((entry.path(), relative));
                } else if file_type.is_file() {
                    writer
                        .start_file(relative, options)
                        .map_err(|err| ade_core::Error::Internal(err.to_string()))?;
                    let bytes = std::fs::read(entry.path())?;
                    std::io::Write::write_all(&mut writer, &bytes)?;
                }
            }
        }
        writer
            .finish()
            .map_err(|err| ade_core::Error::Internal(err.to_string()))?;
    }
    Ok(buffer.into_inner())
}

/// Checks `[project].dependencies` (PEP 621) for an entry naming the
/// engine package, ignoring any version specifier or extras suffix.
fn declares_engine_dependency(pyproject: &toml::Value) -> bool {
    let Some(dependencies) = pyproject
        .get("project")
        .and_then(|p| p.get("dependencies"))
        .and_then(|d| d.as_array())
    else {
        return false;
    };
    dependencies.iter().any(|dep| {
        dep.as_str()
            .map(|s| dependency_name(s) == ENGINE_DEPENDENCY_NAME)
            .unwrap_or(false)
    })
}

/// Strips version specifiers and extras (`ade-engine[x]>=1.0` -> `ade-engine`)
/// from a PEP 508 requirement string.
fn dependency_name(requirement: &str) -> &str {
    let name = requirement
        .split(|c: char| c == '[' || c == '=' || c == '>' || c == '<' || c == '!' || c == '~' || c == ';')
        .next()
        .unwrap_or(requirement);
    name.trim()
}

fn etag_of(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

async fn copy_tree(source: &Path, destination: &Path) -> ade_core::Result<()> {
    fs::create_dir_all(destination).await?;
    let mut stack = vec![(source.to_path_buf(), destination.to_path_buf())];
    while let Some((src, dst)) = stack.pop() {
        let mut entries = fs::read_dir(&src).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            let target = dst.join(entry.file_name());
            if file_type.is_dir() {
                fs::create_dir_all(&target).await?;
                stack.push((entry.path(), target));
            } else if file_type.is_file() {
                fs::copy(entry.path(), &target).await?;
            }
        }
    }
    Ok(())
}

async fn remove_tree(path: &Path) -> ade_core::Result<()> {
    if fs::try_exists(path).await? {
        fs::remove_dir_all(path).await?;
    }
    Ok(())
}

/// Synchronous zip extraction run inside `spawn_blocking`: the `zip` crate's
/// reader API is not async. Every entry's path is routed through
/// `safe_join` before any file is created, so no entry can escape
/// `destination` regardless of `../` sequences or absolute paths in the
/// archive.
fn extract_zip_sync(
    archive_bytes: &[u8],
    destination: &Path,
    limits: ImportLimits,
) -> ade_core::Result<()> {
    let cursor = std::io::Cursor::new(archive_bytes);
    let mut archive = zip::ZipArchive::new(cursor)
        .map_err(|err| ade_core::Error::InvalidArchive(err.to_string()))?;

    if archive.len() > limits.max_entries {
        return Err(ade_core::Error::TooManyEntries(format!(
            "archive has {} entries, max is {}",
            archive.len(),
            limits.max_entries
        )));
    }

    let prefix = common_top_level_prefix(&mut archive)?;

    std::fs::create_dir_all(destination)?;
    let mut total_uncompressed: u64 = 0;
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| ade_core::Error::InvalidArchive(err.to_string()))?;
        if entry.is_dir() {
            continue;
        }
        if entry.size() > limits.max_entry_bytes {
            return Err(ade_core::Error::FileTooLarge(format!(
                "{} is {} bytes, max is {}",
                entry.name(),
                entry.size(),
                limits.max_entry_bytes
            )));
        }
        total_uncompressed = total_uncompressed.saturating_add(entry.size());
        if total_uncompressed > limits.max_total_uncompressed_bytes {
            return Err(ade_core::Error::ArchiveTooLarge(format!(
                "archive expands past {} bytes uncompressed",
                limits.max_total_uncompressed_bytes
            )));
        }

        let raw_name = entry.name();
        let relative = match &prefix {
            Some(p) => raw_name.strip_prefix(p.as_str()).unwrap_or(raw_name),
            None => raw_name,
        };
        if relative.is_empty() {
            continue;
        }
        if relative
            .split('/')
            .any(|segment| EXCLUDED_ENTRY_NAMES.contains(&segment))
        {
            continue;
        }

        let target = ade_storage::paths::safe_join(destination, &[relative])?;
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = std::fs::File::create(&target)?;
        std::io::copy(&mut entry, &mut out)?;
    }
    Ok(())
}

/// If every entry in the archive shares one top-level directory, returns
/// that directory name with a trailing slash, so callers can strip it.
fn common_top_level_prefix(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
) -> ade_core::Result<Option<String>> {
    let mut candidate: Option<String> = None;
    for i in 0..archive.len() {
        let entry = archive
            .by_index(i)
            .map_err(|err| ade_core::Error::InvalidArchive(err.to_string()))?;
        let name = entry.name();
        let top = match name.split_once('/') {
            Some((top, _)) => top,
            None => return Ok(None),
        };
        match &candidate {
            None => candidate = Some(top.to_string()),
            Some(existing) if existing == top => {}
            Some(_) => return Ok(None),
        }
    }
    Ok(candidate.map(|c| format!("{c}/")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const VALID_PYPROJECT: &[u8] =
        b"[project]\nname = \"t\"\ndependencies = [\"ade-engine>=1.0\"]\n";

    fn storage() -> (ConfigStorage, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let paths = PathManager::new(
            root.clone(),
            root.clone(),
            root.clone(),
            root.clone(),
            root,
        );
        (ConfigStorage::new(paths, ImportLimits::default()), dir)
    }

    #[tokio::test]
    async fn materialize_then_write_then_read_roundtrips_etag() {
        let (storage, dir) = storage();
        let workspace_id = WorkspaceId::new();
        let configuration_id = ConfigurationId::new();

        let template = dir.path().join("template");
        fs::create_dir_all(&template).await.unwrap();
        fs::write(template.join("pyproject.toml"), VALID_PYPROJECT)
            .await
            .unwrap();
        fs::write(template.join("manifest.json"), br#"{"name":"t"}"#)
            .await
            .unwrap();

        storage
            .materialize_from_template(workspace_id, configuration_id, &template)
            .await
            .unwrap();

        let etag = storage
            .write_file(
                workspace_id,
                configuration_id,
                "mapping.py",
                b"x = 1\n",
                Some("*"),
            )
            .await
            .unwrap();

        let (bytes, read_etag) = storage
            .read_file(workspace_id, configuration_id, "mapping.py")
            .await
            .unwrap();
        assert_eq!(bytes, b"x = 1\n");
        assert_eq!(etag, read_etag);
    }

    #[tokio::test]
    async fn write_without_if_match_is_rejected() {
        let (storage, dir) = storage();
        let workspace_id = WorkspaceId::new();
        let configuration_id = ConfigurationId::new();
        let template = dir.path().join("template");
        fs::create_dir_all(&template).await.unwrap();
        fs::write(template.join("pyproject.toml"), VALID_PYPROJECT).await.unwrap();
        fs::write(template.join("manifest.json"), br#"{"name":"t"}"#).await.unwrap();
        storage
            .materialize_from_template(workspace_id, configuration_id, &template)
            .await
            .unwrap();

        let err = storage
            .write_file(workspace_id, configuration_id, "a.py", b"1", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ade_core::Error::PreconditionRequired(_)));
    }

    #[tokio::test]
    async fn write_rejects_pyc_and_excluded_directory_paths() {
        let (storage, dir) = storage();
        let (workspace_id, configuration_id) = draft(&storage, &dir).await;

        let err = storage
            .write_file(workspace_id, configuration_id, "mapping.pyc", b"1", Some("*"))
            .await
            .unwrap_err();
        assert!(matches!(err, ade_core::Error::PathNotAllowed(_)));

        let err = storage
            .write_file(workspace_id, configuration_id, ".git/config", b"1", Some("*"))
            .await
            .unwrap_err();
        assert!(matches!(err, ade_core::Error::PathNotAllowed(_)));
    }

    #[tokio::test]
    async fn write_enforces_two_tier_size_limit() {
        let (storage, dir) = storage();
        let (workspace_id, configuration_id) = draft(&storage, &dir).await;

        let over_code_limit = vec![0u8; 512 * 1024 + 1];
        let err = storage
            .write_file(workspace_id, configuration_id, "mapping.py", &over_code_limit, Some("*"))
            .await
            .unwrap_err();
        assert!(matches!(err, ade_core::Error::FileTooLarge(_)));

        let under_asset_limit = vec![0u8; 512 * 1024 + 1];
        storage
            .write_file(
                workspace_id,
                configuration_id,
                "assets/logo.png",
                &under_asset_limit,
                Some("*"),
            )
            .await
            .unwrap();

        let over_asset_limit = vec![0u8; 5 * 1024 * 1024 + 1];
        let err = storage
            .write_file(
                workspace_id,
                configuration_id,
                "assets/logo.png",
                &over_asset_limit,
                Some(&etag_of(&under_asset_limit)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ade_core::Error::FileTooLarge(_)));
    }

    #[tokio::test]
    async fn materialize_rejects_existing_destination() {
        let (storage, dir) = storage();
        let workspace_id = WorkspaceId::new();
        let configuration_id = ConfigurationId::new();
        let template = dir.path().join("template");
        fs::create_dir_all(&template).await.unwrap();
        fs::write(template.join("pyproject.toml"), VALID_PYPROJECT).await.unwrap();
        fs::write(template.join("manifest.json"), br#"{"name":"t"}"#).await.unwrap();

        storage
            .materialize_from_template(workspace_id, configuration_id, &template)
            .await
            .unwrap();
        let err = storage
            .materialize_from_template(workspace_id, configuration_id, &template)
            .await
            .unwrap_err();
        assert!(matches!(err, ade_core::Error::PublishConflict(_)));
    }

    #[tokio::test]
    async fn validate_rejects_missing_engine_dependency() {
        let (storage, dir) = storage();
        let workspace_id = WorkspaceId::new();
        let configuration_id = ConfigurationId::new();
        let template = dir.path().join("template");
        fs::create_dir_all(&template).await.unwrap();
        fs::write(template.join("pyproject.toml"), b"[project]\nname = \"t\"\ndependencies = []\n")
            .await
            .unwrap();
        fs::write(template.join("manifest.json"), br#"{"name":"t"}"#).await.unwrap();

        let err = storage
            .materialize_from_template(workspace_id, configuration_id, &template)
            .await
            .unwrap_err();
        assert!(matches!(err, ade_core::Error::EngineDependencyMissing(_)));
    }

    #[tokio::test]
    async fn validate_rejects_missing_manifest() {
        let (storage, dir) = storage();
        let workspace_id = WorkspaceId::new();
        let configuration_id = ConfigurationId::new();
        let template = dir.path().join("template");
        fs::create_dir_all(&template).await.unwrap();
        fs::write(template.join("pyproject.toml"), VALID_PYPROJECT).await.unwrap();

        let err = storage
            .materialize_from_template(workspace_id, configuration_id, &template)
            .await
            .unwrap_err();
        assert!(matches!(err, ade_core::Error::InvalidSourceShape(_)));
    }

    async fn draft(storage: &ConfigStorage, dir: &tempfile::TempDir) -> (WorkspaceId, ConfigurationId) {
        let workspace_id = WorkspaceId::new();
        let configuration_id = ConfigurationId::new();
        let template = dir.path().join("template");
        fs::create_dir_all(&template).await.unwrap();
        fs::write(template.join("pyproject.toml"), VALID_PYPROJECT).await.unwrap();
        fs::write(template.join("manifest.json"), br#"{"name":"t"}"#).await.unwrap();
        storage
            .materialize_from_template(workspace_id, configuration_id, &template)
            .await
            .unwrap();
        (workspace_id, configuration_id)
    }

    #[tokio::test]
    async fn delete_file_requires_matching_etag() {
        let (storage, dir) = storage();
        let (workspace_id, configuration_id) = draft(&storage, &dir).await;
        let etag = storage
            .write_file(workspace_id, configuration_id, "a.py", b"1", Some("*"))
            .await
            .unwrap();

        let err = storage
            .delete_file(workspace_id, configuration_id, "a.py", "sha256:wrong")
            .await
            .unwrap_err();
        assert!(matches!(err, ade_core::Error::PreconditionFailed(_)));

        storage.delete_file(workspace_id, configuration_id, "a.py", &etag).await.unwrap();
        let err = storage.read_file(workspace_id, configuration_id, "a.py").await.unwrap_err();
        assert!(matches!(err, ade_core::Error::NotFound(_)));
    }

    #[tokio::test]
    async fn create_directory_then_delete_directory_roundtrips() {
        let (storage, dir) = storage();
        let (workspace_id, configuration_id) = draft(&storage, &dir).await;

        storage.create_directory(workspace_id, configuration_id, "fixtures").await.unwrap();
        let err = storage
            .create_directory(workspace_id, configuration_id, "fixtures")
            .await
            .unwrap_err();
        assert!(matches!(err, ade_core::Error::Conflict(_)));

        storage
            .write_file(workspace_id, configuration_id, "fixtures/a.csv", b"x", Some("*"))
            .await
            .unwrap();
        storage.delete_directory(workspace_id, configuration_id, "fixtures").await.unwrap();
        let err = storage
            .read_file(workspace_id, configuration_id, "fixtures/a.csv")
            .await
            .unwrap_err();
        assert!(matches!(err, ade_core::Error::NotFound(_)));
    }

    #[tokio::test]
    async fn list_files_applies_include_filter_and_fileset_hash_is_stable() {
        let (storage, dir) = storage();
        let (workspace_id, configuration_id) = draft(&storage, &dir).await;
        storage
            .write_file(workspace_id, configuration_id, "mapping.py", b"x = 1\n", Some("*"))
            .await
            .unwrap();
        storage
            .write_file(workspace_id, configuration_id, "notes.txt", b"hi\n", Some("*"))
            .await
            .unwrap();

        let query = ListFilesQuery {
            include: vec!["*.py".to_string()],
            limit: 100,
            ..Default::default()
        };
        let first = storage.list_files(workspace_id, configuration_id, &query).await.unwrap();
        assert!(first.entries.iter().all(|e| e.name.ends_with(".py")));
        assert!(first.entries.iter().any(|e| e.name == "mapping.py"));

        let second = storage.list_files(workspace_id, configuration_id, &query).await.unwrap();
        assert_eq!(first.fileset_hash, second.fileset_hash);
    }

    #[tokio::test]
    async fn rename_file_rejects_overwrite_without_matching_dest_etag() {
        let (storage, dir) = storage();
        let (workspace_id, configuration_id) = draft(&storage, &dir).await;
        storage
            .write_file(workspace_id, configuration_id, "a.py", b"1", Some("*"))
            .await
            .unwrap();
        storage
            .write_file(workspace_id, configuration_id, "b.py", b"2", Some("*"))
            .await
            .unwrap();

        let err = storage
            .rename_file(workspace_id, configuration_id, "a.py", "b.py", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ade_core::Error::PreconditionFailed(_)));
    }

    #[tokio::test]
    async fn export_zip_contains_written_files() {
        let (storage, dir) = storage();
        let (workspace_id, configuration_id) = draft(&storage, &dir).await;
        storage
            .write_file(workspace_id, configuration_id, "mapping.py", b"x = 1\n", Some("*"))
            .await
            .unwrap();

        let bytes = storage.export_zip(workspace_id, configuration_id).await.unwrap();
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert!(names.contains(&"mapping.py".to_string()));
        assert!(names.contains(&"pyproject.toml".to_string()));
    }
}
