// src/package/copy.rs
//! Recursive tree copy with exclusion patterns
//!
//! Mirrors a source directory into a destination. Files are matched against
//! the exclusion set by their path relative to the source root, so a pattern
//! that happens to match a piece of the absolute source path never drops
//! unrelated files. Symbolic links are recreated as links.

use crate::error::{Error, Result};
use crate::package::matcher::ExcludeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Counters from a single tree copy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyStats {
    /// Regular files copied
    pub files: usize,
    /// Symbolic links recreated
    pub symlinks: usize,
    /// Entries skipped by the exclusion set; a pruned directory counts once
    pub excluded: usize,
}

/// Copy every non-excluded file under `src` into `dest`
///
/// With `include_parent_dir` the tree lands in `dest/<basename of src>`
/// instead of being merged into `dest` directly. Intermediate directories are
/// created on demand, so directories holding only excluded files are not
/// recreated. An existing entry at a destination path is replaced.
pub fn copy_tree(
    src: &Path,
    dest: &Path,
    exclude: &ExcludeSet,
    include_parent_dir: bool,
) -> Result<CopyStats> {
    if !src.is_dir() {
        return Err(Error::InvalidSource(src.to_path_buf()));
    }

    let dest = if include_parent_dir {
        let name = parent_dir_name(src)?;
        dest.join(name)
    } else {
        dest.to_path_buf()
    };
    fs::create_dir_all(&dest)?;

    info!("Copying {} into {}", src.display(), dest.display());

    let linker = LinkRetarget::new(src, &dest);
    let mut stats = CopyStats::default();

    let mut pruned = 0;
    let walker = WalkDir::new(src)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if !entry.file_type().is_dir() {
                return true;
            }
            match entry.path().strip_prefix(src) {
                Ok(relative) if exclude.is_pruned(relative) => {
                    debug!("Pruning {}", relative.display());
                    pruned += 1;
                    false
                }
                _ => true,
            }
        });

    for entry in walker {
        let entry = entry.map_err(|e| Error::Io(e.into()))?;
        let file_type = entry.file_type();

        if file_type.is_dir() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|_| Error::InvalidSource(entry.path().to_path_buf()))?;

        if exclude.is_excluded(relative) {
            debug!("Excluding {}", relative.display());
            stats.excluded += 1;
            continue;
        }

        let target = dest.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        remove_existing(&target)?;

        if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            let link = linker.retarget(&link);
            debug!("Linking {} -> {}", target.display(), link.display());
            create_symlink(&link, &target)?;
            stats.symlinks += 1;
        } else {
            debug!("Copying {} to {}", entry.path().display(), target.display());
            fs::copy(entry.path(), &target)?;
            stats.files += 1;
        }
    }

    stats.excluded += pruned;
    Ok(stats)
}

/// Copy a single file into a directory, keeping its name
pub fn copy_file_into(src: &Path, dest_dir: &Path) -> Result<PathBuf> {
    let name = src
        .file_name()
        .ok_or_else(|| Error::InvalidSource(src.to_path_buf()))?;

    fs::create_dir_all(dest_dir)?;
    let target = dest_dir.join(name);
    remove_existing(&target)?;

    let meta = fs::symlink_metadata(src)?;
    if meta.file_type().is_symlink() {
        create_symlink(&fs::read_link(src)?, &target)?;
    } else {
        fs::copy(src, &target)?;
    }

    debug!("Copied {} to {}", src.display(), target.display());
    Ok(target)
}

fn parent_dir_name(src: &Path) -> Result<std::ffi::OsString> {
    if let Some(name) = src.file_name() {
        return Ok(name.to_os_string());
    }

    // Paths like "." or "lib/.." have no final component until resolved
    src.canonicalize()?
        .file_name()
        .map(|n| n.to_os_string())
        .ok_or_else(|| Error::InvalidSource(src.to_path_buf()))
}

fn remove_existing(target: &Path) -> Result<()> {
    match fs::symlink_metadata(target) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(target)?,
        Ok(_) => fs::remove_file(target)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Rewrites link targets that point into the source tree
///
/// A target spelled with the source root as its prefix (either as given or
/// in canonical form) is re-rooted under the destination. Relative targets
/// are kept as-is: inside the tree they already resolve to the copy.
struct LinkRetarget {
    src: PathBuf,
    src_canonical: Option<PathBuf>,
    dest: PathBuf,
    dest_absolute: PathBuf,
}

impl LinkRetarget {
    fn new(src: &Path, dest: &Path) -> Self {
        Self {
            src: src.to_path_buf(),
            src_canonical: src.canonicalize().ok(),
            dest: dest.to_path_buf(),
            dest_absolute: std::path::absolute(dest).unwrap_or_else(|_| dest.to_path_buf()),
        }
    }

    fn retarget(&self, link: &Path) -> PathBuf {
        if let Ok(rest) = link.strip_prefix(&self.src) {
            return self.dest.join(rest);
        }

        if link.is_absolute()
            && let Some(canonical) = &self.src_canonical
            && let Ok(rest) = link.strip_prefix(canonical)
        {
            return self.dest_absolute.join(rest);
        }

        link.to_path_buf()
    }
}

#[cfg(unix)]
fn create_symlink(original: &Path, link: &Path) -> Result<()> {
    std::os::unix::fs::symlink(original, link)?;
    Ok(())
}

#[cfg(windows)]
fn create_symlink(original: &Path, link: &Path) -> Result<()> {
    let resolved = link.parent().map(|p| p.join(original)).unwrap_or_default();
    if resolved.is_dir() {
        std::os::windows::fs::symlink_dir(original, link)?;
    } else {
        std::os::windows::fs::symlink_file(original, link)?;
    }
    Ok(())
}
