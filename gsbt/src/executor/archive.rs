//! `.tar.gz` archives of a staging directory.
//!
//! Entry names are paths relative to the staged root with `/` separators.
//! Archives are written to a `.partial` sibling and renamed into place, so a
//! failed run never leaves a truncated archive behind.

use crate::utils::errors::{GsbtError, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

pub const ARCHIVE_EXTENSION: &str = ".tar.gz";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H%M%S";

/// One entry of an existing archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub path: String,
    pub size: u64,
    pub is_dir: bool,
}

/// An archive already sitting in a backup location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArchive {
    pub path: PathBuf,
    pub created: DateTime<Utc>,
    pub size: u64,
}

/// Archive file name for the current UTC time, e.g. `2024-05-01_134502.tar.gz`.
pub fn timestamped_filename() -> String {
    timestamped_filename_at(Utc::now())
}

pub fn timestamped_filename_at(at: DateTime<Utc>) -> String {
    format!("{}{}", at.format(TIMESTAMP_FORMAT), ARCHIVE_EXTENSION)
}

/// Recover the creation time from an archive file name.
pub fn parse_archive_timestamp(file_name: &str) -> Option<DateTime<Utc>> {
    let stem = file_name.strip_suffix(ARCHIVE_EXTENSION)?;
    NaiveDateTime::parse_from_str(stem, TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Timestamped archives in `dir`, oldest first. Other files are ignored and
/// a missing directory yields an empty list.
pub fn find_archives(dir: &Path) -> Result<Vec<StoredArchive>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut out = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(created) = name.to_str().and_then(parse_archive_timestamp) else {
            continue;
        };
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        out.push(StoredArchive {
            path: entry.path(),
            created,
            size: metadata.len(),
        });
    }
    out.sort_by_key(|a| a.created);
    Ok(out)
}

fn entry_name(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Compress everything under `src_dir` into `dest`. Returns the number of
/// files written.
pub fn create_archive(src_dir: &Path, dest: &Path) -> Result<usize> {
    if !src_dir.is_dir() {
        return Err(GsbtError::Archive(format!(
            "source directory does not exist: {}",
            src_dir.display()
        )));
    }

    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            GsbtError::Archive(format!("failed to create archive directory: {}", e))
        })?;
    }

    let partial = partial_path(dest);
    let result = write_archive(src_dir, &partial);
    match result {
        Ok(count) => {
            std::fs::rename(&partial, dest).map_err(|e| {
                GsbtError::Archive(format!("failed to finalize {}: {}", dest.display(), e))
            })?;
            Ok(count)
        }
        Err(e) => {
            let _ = std::fs::remove_file(&partial);
            Err(e)
        }
    }
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".partial");
    PathBuf::from(name)
}

fn write_archive(src_dir: &Path, dest: &Path) -> Result<usize> {
    let file = File::create(dest)
        .map_err(|e| GsbtError::Archive(format!("failed to create archive file: {}", e)))?;
    let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);

    let mut files = 0usize;
    for entry in WalkDir::new(src_dir).sort_by_file_name() {
        let entry = entry.map_err(|e| GsbtError::Archive(format!("walk failed: {}", e)))?;
        let Some(name) = entry_name(src_dir, entry.path()) else {
            continue;
        };

        let file_type = entry.file_type();
        if file_type.is_dir() {
            builder
                .append_dir(&name, entry.path())
                .map_err(|e| GsbtError::Archive(format!("add {}: {}", name, e)))?;
        } else if file_type.is_file() {
            builder
                .append_path_with_name(entry.path(), &name)
                .map_err(|e| GsbtError::Archive(format!("add {}: {}", name, e)))?;
            files += 1;
        }
    }

    let encoder = builder
        .into_inner()
        .map_err(|e| GsbtError::Archive(format!("finish tar stream: {}", e)))?;
    let writer = encoder
        .finish()
        .map_err(|e| GsbtError::Archive(format!("finish gzip stream: {}", e)))?;
    let file = writer
        .into_inner()
        .map_err(|e| GsbtError::Archive(format!("flush archive: {}", e.error())))?;
    file.sync_all()?;

    Ok(files)
}

fn open_archive(path: &Path) -> Result<tar::Archive<GzDecoder<File>>> {
    let file = File::open(path).map_err(|e| {
        GsbtError::Archive(format!("failed to open {}: {}", path.display(), e))
    })?;
    Ok(tar::Archive::new(GzDecoder::new(file)))
}

/// Entries of `archive` in stored order.
pub fn list_entries(archive: &Path) -> Result<Vec<ArchiveEntry>> {
    let mut tar = open_archive(archive)?;
    let mut out = Vec::new();
    for entry in tar
        .entries()
        .map_err(|e| GsbtError::Archive(format!("read archive: {}", e)))?
    {
        let entry = entry.map_err(|e| GsbtError::Archive(format!("read entry: {}", e)))?;
        let path = entry
            .path()
            .map_err(|e| GsbtError::Archive(format!("bad entry path: {}", e)))?
            .to_string_lossy()
            .trim_end_matches('/')
            .to_string();
        out.push(ArchiveEntry {
            path,
            size: entry.header().size().unwrap_or(0),
            is_dir: entry.header().entry_type().is_dir(),
        });
    }
    Ok(out)
}

/// Unpack `archive` below `dest`. Entries that would escape `dest` are
/// skipped. Returns the number of files extracted.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<usize> {
    std::fs::create_dir_all(dest)?;
    let mut tar = open_archive(archive)?;
    let mut files = 0usize;
    for entry in tar
        .entries()
        .map_err(|e| GsbtError::Archive(format!("read archive: {}", e)))?
    {
        let mut entry = entry.map_err(|e| GsbtError::Archive(format!("read entry: {}", e)))?;
        let is_file = entry.header().entry_type().is_file();
        let unpacked = entry
            .unpack_in(dest)
            .map_err(|e| GsbtError::Archive(format!("extract failed: {}", e)))?;
        if unpacked && is_file {
            files += 1;
        }
    }
    Ok(files)
}
