//! Archive extraction and tree scanning for module imports.
//!
//! Everything here is blocking filesystem work; callers run it on the
//! blocking pool.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::Serialize;

use crate::error::{Error, Result};

const BINARY_SNIFF_LEN: usize = 8192;
const ZIP_SYMLINK_MODE: u32 = 0o120_000;
const ZIP_FILE_TYPE_MASK: u32 = 0o170_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    TarGz,
    Zip,
}

impl ArchiveFormat {
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::TarGz => "tar.gz",
            Self::Zip => "zip",
        }
    }

    #[must_use]
    pub const fn content_type(self) -> &'static str {
        match self {
            Self::TarGz => "application/gzip",
            Self::Zip => "application/zip",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "tar.gz" | "tgz" => Some(Self::TarGz),
            "zip" => Some(Self::Zip),
            _ => None,
        }
    }

    /// Sniffs the magic bytes of an archive on disk.
    pub fn detect(path: &Path) -> Result<Self> {
        let mut magic = [0u8; 4];
        let mut file = File::open(path)?;
        let read = file.read(&mut magic)?;
        match &magic[..read] {
            [0x1f, 0x8b, ..] => Ok(Self::TarGz),
            [b'P', b'K', 0x03, 0x04] => Ok(Self::Zip),
            _ => Err(Error::bad_request(
                "Unsupported archive format, expected .tar.gz or .zip",
            )),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ExtractLimits {
    pub max_file_size: u64,
    pub max_total_size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileClass {
    Tf,
    Json,
    Md,
    Yaml,
    Binary,
    Other,
}

/// Result of scanning an extracted working tree.
#[derive(Debug, Clone)]
pub struct ExtractedTree {
    /// Module root inside the extraction directory.
    pub root: PathBuf,
    /// Paths relative to `root`, using `/` separators.
    pub files: BTreeMap<String, FileClass>,
    pub submodules: Vec<String>,
    pub examples: Vec<String>,
}

impl ExtractedTree {
    #[must_use]
    pub fn class_of(&self, relative: &str) -> Option<FileClass> {
        self.files.get(relative).copied()
    }
}

fn traversal(raw: &Path) -> Error {
    Error::bad_request(format!(
        "Archive entry '{}' escapes the extraction root",
        raw.display()
    ))
}

/// Normalizes an archive entry path, rejecting anything that could leave the root.
pub(crate) fn safe_relative_path(raw: &Path) -> Result<PathBuf> {
    let mut clean = PathBuf::new();
    for component in raw.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(traversal(raw));
            }
        }
    }
    Ok(clean)
}

/// True when a link stored at `entry` pointing at `target` stays inside the tree.
fn link_stays_inside(entry: &Path, target: &Path) -> bool {
    if target.is_absolute() {
        return false;
    }
    let mut depth: usize = entry.components().count().saturating_sub(1);
    for component in target.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return false;
                }
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => return false,
        }
    }
    true
}

struct SizeBudget {
    limits: ExtractLimits,
    total: u64,
}

impl SizeBudget {
    fn new(limits: ExtractLimits) -> Self {
        Self { limits, total: 0 }
    }

    fn check_declared(&self, path: &Path, size: u64) -> Result<()> {
        if size > self.limits.max_file_size {
            return Err(Error::PayloadTooLarge(format!(
                "Archive entry '{}' exceeds the extracted file size limit",
                path.display()
            )));
        }
        Ok(())
    }

    /// Copies one entry, enforcing both caps on the bytes actually read.
    fn copy(&mut self, path: &Path, reader: &mut dyn Read, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::create(dest)?;
        let mut limited = reader.take(self.limits.max_file_size + 1);
        let written = io::copy(&mut limited, &mut file)?;
        file.flush()?;

        if written > self.limits.max_file_size {
            return Err(Error::PayloadTooLarge(format!(
                "Archive entry '{}' exceeds the extracted file size limit",
                path.display()
            )));
        }
        self.total += written;
        if self.total > self.limits.max_total_size {
            return Err(Error::PayloadTooLarge(
                "Archive exceeds the total extracted size limit".to_string(),
            ));
        }
        Ok(())
    }
}

/// Extracts `archive` into `dest`, returning the detected format.
pub fn extract_archive(archive: &Path, dest: &Path, limits: ExtractLimits) -> Result<ArchiveFormat> {
    let format = ArchiveFormat::detect(archive)?;
    fs::create_dir_all(dest)?;
    match format {
        ArchiveFormat::TarGz => extract_tar_gz(archive, dest, limits)?,
        ArchiveFormat::Zip => extract_zip(archive, dest, limits)?,
    }
    Ok(format)
}

fn invalid_archive(kind: &str, e: impl std::fmt::Display) -> Error {
    Error::bad_request(format!("Invalid {kind} archive: {e}"))
}

fn extract_tar_gz(archive: &Path, dest: &Path, limits: ExtractLimits) -> Result<()> {
    let mut tar = tar::Archive::new(GzDecoder::new(File::open(archive)?));
    let mut budget = SizeBudget::new(limits);

    for entry in tar.entries().map_err(|e| invalid_archive("tar.gz", e))? {
        let mut entry = entry.map_err(|e| invalid_archive("tar.gz", e))?;
        let raw = entry
            .path()
            .map_err(|e| invalid_archive("tar.gz", e))?
            .into_owned();
        let relative = safe_relative_path(&raw)?;
        if relative.as_os_str().is_empty() {
            continue;
        }

        let entry_type = entry.header().entry_type();
        if entry_type.is_symlink() || entry_type.is_hard_link() {
            let target = entry
                .link_name()
                .map_err(|e| invalid_archive("tar.gz", e))?
                .map(|t| t.into_owned())
                .unwrap_or_default();
            let inside = if entry_type.is_hard_link() {
                safe_relative_path(&target).is_ok()
            } else {
                link_stays_inside(&relative, &target)
            };
            if !inside {
                return Err(Error::bad_request(format!(
                    "Archive entry '{}' links outside the extraction root",
                    raw.display()
                )));
            }
            tracing::debug!("Skipping link entry {}", raw.display());
            continue;
        }

        if entry_type.is_dir() {
            fs::create_dir_all(dest.join(&relative))?;
            continue;
        }
        if !entry_type.is_file() {
            continue;
        }

        let declared = entry.header().size().unwrap_or_default();
        budget.check_declared(&raw, declared)?;
        budget.copy(&raw, &mut entry, &dest.join(&relative))?;
    }
    Ok(())
}

fn extract_zip(archive: &Path, dest: &Path, limits: ExtractLimits) -> Result<()> {
    let mut zip = zip::ZipArchive::new(File::open(archive)?).map_err(|e| invalid_archive("zip", e))?;
    let mut budget = SizeBudget::new(limits);

    for index in 0..zip.len() {
        let mut file = zip.by_index(index).map_err(|e| invalid_archive("zip", e))?;
        let raw = PathBuf::from(file.name());
        let relative = safe_relative_path(&raw)?;
        if file.enclosed_name().is_none() {
            return Err(traversal(&raw));
        }
        if relative.as_os_str().is_empty() {
            continue;
        }

        let is_symlink = file
            .unix_mode()
            .is_some_and(|mode| mode & ZIP_FILE_TYPE_MASK == ZIP_SYMLINK_MODE);
        if is_symlink {
            let mut target = String::new();
            file.read_to_string(&mut target)?;
            if !link_stays_inside(&relative, Path::new(&target)) {
                return Err(Error::bad_request(format!(
                    "Archive entry '{}' links outside the extraction root",
                    raw.display()
                )));
            }
            continue;
        }

        if file.is_dir() {
            fs::create_dir_all(dest.join(&relative))?;
            continue;
        }

        budget.check_declared(&raw, file.size())?;
        budget.copy(&raw, &mut file, &dest.join(&relative))?;
    }
    Ok(())
}

/// Lists regular files under `root` relative to it, skipping `.git` and symlinks.
pub(crate) fn walk_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![PathBuf::new()];

    while let Some(relative) = pending.pop() {
        for entry in fs::read_dir(root.join(&relative))? {
            let entry = entry?;
            let name = entry.file_name();
            if name == ".git" {
                continue;
            }
            let file_type = entry.file_type()?;
            let child = relative.join(&name);
            if file_type.is_dir() {
                pending.push(child);
            } else if file_type.is_file() {
                files.push(child);
            }
        }
    }

    files.sort();
    Ok(files)
}

fn to_slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// True when the first bytes of the file contain a NUL.
pub fn is_binary(path: &Path) -> Result<bool> {
    let mut buf = vec![0u8; BINARY_SNIFF_LEN];
    let mut file = File::open(path)?;
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(buf[..filled].contains(&0))
}

pub fn classify(path: &Path) -> Result<FileClass> {
    if is_binary(path)? {
        return Ok(FileClass::Binary);
    }
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    let class = if name.ends_with(".tf") {
        FileClass::Tf
    } else if name.ends_with(".json") {
        FileClass::Json
    } else if name.ends_with(".md") {
        FileClass::Md
    } else if name.ends_with(".yaml") || name.ends_with(".yml") {
        FileClass::Yaml
    } else {
        FileClass::Other
    };
    Ok(class)
}

fn is_terraform_file(relative: &str) -> bool {
    relative.ends_with(".tf") || relative.ends_with(".tf.json")
}

/// Direct children of `parent` that hold Terraform files of their own.
fn terraform_children(files: &BTreeMap<String, FileClass>, parent: &str) -> Vec<String> {
    let prefix = format!("{parent}/");
    let mut children: Vec<String> = files
        .keys()
        .filter_map(|path| {
            let rest = path.strip_prefix(&prefix)?;
            let (child, file) = rest.split_once('/')?;
            (!file.contains('/') && is_terraform_file(file)).then(|| format!("{prefix}{child}"))
        })
        .collect();
    children.dedup();
    children
}

/// Scans an extracted tree, selecting `module_path` as the module root.
pub fn scan_tree(extraction_root: &Path, module_path: &str) -> Result<ExtractedTree> {
    let relative = safe_relative_path(Path::new(module_path.trim_matches('/')))?;
    let root = extraction_root.join(&relative);
    if !root.is_dir() {
        return Err(Error::bad_request(format!(
            "Module path '{module_path}' not found in source"
        )));
    }

    let mut files = BTreeMap::new();
    for file in walk_files(&root)? {
        let class = classify(&root.join(&file))?;
        files.insert(to_slash_path(&file), class);
    }

    let submodules = terraform_children(&files, "modules");
    let examples = terraform_children(&files, "examples");

    Ok(ExtractedTree {
        root,
        files,
        submodules,
        examples,
    })
}

/// Writes a deterministic `.tar.gz` of `src`, excluding `.git`.
pub fn create_tar_gz(src: &Path, dest: &Path) -> Result<()> {
    let encoder = GzEncoder::new(File::create(dest)?, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.mode(tar::HeaderMode::Deterministic);
    builder.follow_symlinks(false);

    for file in walk_files(src)? {
        builder.append_path_with_name(src.join(&file), &file)?;
    }

    builder.into_inner()?.finish()?.sync_all()?;
    Ok(())
}
