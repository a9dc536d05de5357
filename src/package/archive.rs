// src/package/archive.rs
//! Deployment archive writer
//!
//! Produces a deflate-compressed zip whose entry names are paths relative to
//! the assembled package directory, with `/` separators. Entries are written
//! in sorted order with a fixed modification time, so the same tree always
//! produces the same bytes.

use crate::error::{Error, Result};
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Component, Path};
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Summary of a written archive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveStats {
    /// Number of entries written
    pub entries: usize,
    /// Uncompressed bytes of regular file content
    pub content_bytes: u64,
}

/// Zip every file under `src_dir` into `archive_path`
///
/// A partially written archive is removed before the error is returned.
pub fn build_archive(src_dir: &Path, archive_path: &Path) -> Result<ArchiveStats> {
    info!("Creating archive {}", archive_path.display());

    match write_archive(src_dir, archive_path) {
        Ok(stats) => {
            info!("Archived {} entries ({} bytes)", stats.entries, stats.content_bytes);
            Ok(stats)
        }
        Err(e) => {
            if let Err(rm) = fs::remove_file(archive_path)
                && rm.kind() != io::ErrorKind::NotFound
            {
                warn!("Could not remove partial archive {}: {}", archive_path.display(), rm);
            }
            Err(Error::ArchiveWriteFailed {
                path: archive_path.to_path_buf(),
                reason: e.to_string(),
            })
        }
    }
}

fn write_archive(src_dir: &Path, archive_path: &Path) -> anyhow::Result<ArchiveStats> {
    let file = File::create(archive_path)?;
    let mut zip = ZipWriter::new(BufWriter::new(file));

    let base = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(archive_mtime());

    let mut stats = ArchiveStats::default();

    for entry in WalkDir::new(src_dir).min_depth(1).follow_links(false).sort_by_file_name() {
        let entry = entry?;
        let file_type = entry.file_type();
        if file_type.is_dir() {
            continue;
        }

        let relative = entry.path().strip_prefix(src_dir)?;
        let name = entry_name(relative)?;
        debug!("Zipping {} as {}", entry.path().display(), name);

        if file_type.is_symlink() {
            let target = fs::read_link(entry.path())?;
            let target = target.to_string_lossy().replace('\\', "/");
            zip.add_symlink(name, target, base)?;
        } else {
            let options = base.unix_permissions(file_mode(&entry.metadata()?));
            zip.start_file(name, options)?;
            let mut input = File::open(entry.path())?;
            stats.content_bytes += io::copy(&mut input, &mut zip)?;
        }
        stats.entries += 1;
    }

    let mut writer = zip.finish()?;
    io::Write::flush(&mut writer)?;
    Ok(stats)
}

/// Archive entry name for a relative path: normal components joined by `/`
fn entry_name(relative: &Path) -> anyhow::Result<String> {
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            other => anyhow::bail!("unexpected path component {:?} in {}", other, relative.display()),
        }
    }
    if parts.is_empty() {
        anyhow::bail!("empty entry name");
    }
    Ok(parts.join("/"))
}

/// Modification time stamped on every entry
///
/// Honours `SOURCE_DATE_EPOCH`; otherwise the zip epoch (1980-01-01).
fn archive_mtime() -> zip::DateTime {
    std::env::var("SOURCE_DATE_EPOCH")
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
        .and_then(|ts| {
            use chrono::{Datelike, Timelike};
            let year = u16::try_from(ts.year()).ok()?;
            zip::DateTime::from_date_and_time(
                year,
                ts.month() as u8,
                ts.day() as u8,
                ts.hour() as u8,
                ts.minute() as u8,
                ts.second() as u8,
            )
            .ok()
        })
        .unwrap_or_default()
}

#[cfg(unix)]
fn file_mode(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(meta: &fs::Metadata) -> u32 {
    if meta.permissions().readonly() { 0o444 } else { 0o644 }
}
