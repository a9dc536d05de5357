// src/error.rs
//! Error types for the packaging engine
//!
//! Every variant is fatal to the current packaging run. Nothing here is
//! retried; the caller decides whether to run the whole invocation again.

use crate::config::ConfigError;
use crate::publish::PublishError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Copy source is a file (or missing), not a directory
    #[error("Cannot copy tree from {0}: not a directory")]
    InvalidSource(PathBuf),

    /// Caller-supplied environment directory does not exist
    #[error("Virtual environment {0} not found")]
    EnvironmentNotFound(PathBuf),

    /// Environment creation or package installation failed
    #[error("Dependency installation failed: {0}")]
    DependencyInstallFailed(String),

    /// Staging state that cleanup could not resolve
    #[error("Workspace conflict at {path}: {reason}")]
    WorkspaceConflict { path: PathBuf, reason: String },

    /// I/O or encoding failure while writing the archive
    #[error("Failed to write archive {path}: {reason}")]
    ArchiveWriteFailed { path: PathBuf, reason: String },

    #[error("Invalid exclusion pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Publish(#[from] PublishError),
}

pub type Result<T> = std::result::Result<T, Error>;
