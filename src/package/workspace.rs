// src/package/workspace.rs
//! Staging workspace management
//!
//! The staging directory lives at a fixed name under the project root and is
//! owned by one packaging run at a time. Cleanup is idempotent so it can run
//! before a build to recover from a crashed run.

use crate::error::{Error, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Staging directory name under the project root
pub const TEMP_WORKSPACE_NAME: &str = ".lambda_package";

/// Default archive file name under the project root
pub const ZIPFILE_NAME: &str = "lambda_function.zip";

/// Name of the assembled package directory inside the staging directory
pub const PACKAGE_DIR_NAME: &str = "lambda_package";

/// Owner of the staging directory and archive paths for one project
#[derive(Debug, Clone)]
pub struct Workspace {
    staging_dir: PathBuf,
    archive_path: PathBuf,
}

impl Workspace {
    /// Workspace with the conventional staging and archive names
    pub fn new(project_root: &Path) -> Self {
        Self::with_names(project_root, TEMP_WORKSPACE_NAME, Path::new(ZIPFILE_NAME))
    }

    /// Workspace with explicit names
    ///
    /// `archive` is joined onto the project root, so an absolute path
    /// replaces the root entirely.
    pub fn with_names(project_root: &Path, staging_name: &str, archive: &Path) -> Self {
        Self {
            staging_dir: project_root.join(staging_name),
            archive_path: project_root.join(archive),
        }
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    /// Directory that accumulates the archive contents
    pub fn package_dir(&self) -> PathBuf {
        self.staging_dir.join(PACKAGE_DIR_NAME)
    }

    /// Remove the staging directory if present
    pub fn clean_workspace(&self) -> Result<()> {
        match fs::symlink_metadata(&self.staging_dir) {
            Ok(meta) if meta.is_dir() => {
                info!("Cleaning workspace {}", self.staging_dir.display());
                fs::remove_dir_all(&self.staging_dir).map_err(|e| self.conflict(e))?;
            }
            Ok(_) => {
                // A stray file or link squatting on the staging name
                debug!("Removing non-directory at {}", self.staging_dir.display());
                fs::remove_file(&self.staging_dir).map_err(|e| self.conflict(e))?;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No workspace to clean at {}", self.staging_dir.display());
            }
            Err(e) => return Err(e.into()),
        }

        if fs::symlink_metadata(&self.staging_dir).is_ok() {
            return Err(Error::WorkspaceConflict {
                path: self.staging_dir.clone(),
                reason: "still present after cleanup".to_string(),
            });
        }

        Ok(())
    }

    /// Remove the archive if present
    pub fn clean_artifact(&self) -> Result<()> {
        match fs::symlink_metadata(&self.archive_path) {
            Ok(meta) if meta.is_dir() => Err(Error::WorkspaceConflict {
                path: self.archive_path.clone(),
                reason: "archive path is a directory".to_string(),
            }),
            Ok(_) => {
                info!("Removing previous archive {}", self.archive_path.display());
                fs::remove_file(&self.archive_path)?;
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Clean then recreate an empty staging directory
    pub fn prepare_workspace(&self) -> Result<()> {
        self.clean_workspace()?;
        fs::create_dir_all(&self.staging_dir).map_err(|e| self.conflict(e))?;
        debug!("Prepared workspace {}", self.staging_dir.display());
        Ok(())
    }

    fn conflict(&self, err: io::Error) -> Error {
        Error::WorkspaceConflict {
            path: self.staging_dir.clone(),
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_paths() {
        let ws = Workspace::new(Path::new(".testing_temp"));
        assert_eq!(ws.archive_path(), Path::new(".testing_temp/lambda_function.zip"));
        assert_eq!(ws.staging_dir(), Path::new(".testing_temp/.lambda_package"));
        assert_eq!(ws.package_dir(), Path::new(".testing_temp/.lambda_package/lambda_package"));
    }

    #[test]
    fn test_archive_override() {
        let ws = Workspace::with_names(Path::new("/proj"), TEMP_WORKSPACE_NAME, Path::new("out.zip"));
        assert_eq!(ws.archive_path(), Path::new("/proj/out.zip"));

        let ws = Workspace::with_names(Path::new("/proj"), TEMP_WORKSPACE_NAME, Path::new("/tmp/out.zip"));
        assert_eq!(ws.archive_path(), Path::new("/tmp/out.zip"));
    }

    #[test]
    fn test_clean_workspace() {
        let temp = TempDir::new().unwrap();
        let ws = Workspace::new(temp.path());
        fs::create_dir_all(ws.staging_dir().join("venv/lib")).unwrap();
        fs::write(ws.staging_dir().join("venv/lib/stale.py"), "x").unwrap();

        ws.clean_workspace().unwrap();
        assert!(!ws.staging_dir().exists());

        // Second call is a no-op
        ws.clean_workspace().unwrap();
        assert!(!ws.staging_dir().exists());
    }

    #[test]
    fn test_clean_workspace_removes_stray_file() {
        let temp = TempDir::new().unwrap();
        let ws = Workspace::new(temp.path());
        fs::write(ws.staging_dir(), "not a dir").unwrap();

        ws.prepare_workspace().unwrap();
        assert!(ws.staging_dir().is_dir());
    }

    #[test]
    fn test_prepare_workspace_starts_empty() {
        let temp = TempDir::new().unwrap();
        let ws = Workspace::new(temp.path());
        fs::create_dir_all(ws.package_dir()).unwrap();
        fs::write(ws.package_dir().join("leftover.py"), "x").unwrap();

        ws.prepare_workspace().unwrap();

        assert!(ws.staging_dir().is_dir());
        assert_eq!(fs::read_dir(ws.staging_dir()).unwrap().count(), 0);
    }

    #[test]
    fn test_clean_artifact() {
        let temp = TempDir::new().unwrap();
        let ws = Workspace::new(temp.path());
        fs::write(ws.archive_path(), b"PK").unwrap();

        ws.clean_artifact().unwrap();
        assert!(!ws.archive_path().exists());
        ws.clean_artifact().unwrap();
    }

    #[test]
    fn test_clean_artifact_directory_conflict() {
        let temp = TempDir::new().unwrap();
        let ws = Workspace::new(temp.path());
        fs::create_dir(ws.archive_path()).unwrap();

        let err = ws.clean_artifact().unwrap_err();
        assert!(matches!(err, Error::WorkspaceConflict { .. }));
    }
}
