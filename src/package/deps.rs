// src/package/deps.rs
//! Dependency materialization
//!
//! Resolving and installing dependencies is an external step. The packaging
//! engine only needs to know where the installed packages ended up, or that
//! there are none. The virtualenv implementation shells out to `virtualenv`
//! and `pip`; both are blocking and have no timeout.

use crate::error::{Error, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

/// Name of the environment directory created inside the staging directory
pub const VENV_DIR_NAME: &str = "venv";

/// Produces a directory of installed packages for the archive
pub trait DependencyMaterializer {
    /// Populate dependencies using `staging_dir` as scratch space
    ///
    /// Returns the directory whose contents are merged into the package,
    /// or `None` when there is nothing to merge.
    fn materialize(&self, staging_dir: &Path) -> Result<Option<PathBuf>>;

    /// Pre-existing environment directory the dependencies are read from
    ///
    /// When it lives inside the project root it is kept out of the source
    /// copy.
    fn environment_root(&self) -> Option<&Path> {
        None
    }
}

/// What to install
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DependencySpec {
    /// Explicit requirement strings, passed to the installer as-is
    Requirements(Vec<String>),
    /// A requirements file
    File(PathBuf),
    #[default]
    None,
}

impl DependencySpec {
    pub fn is_none(&self) -> bool {
        match self {
            Self::Requirements(reqs) => reqs.is_empty(),
            Self::File(_) => false,
            Self::None => true,
        }
    }
}

/// Where the isolated environment comes from
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EnvironmentDirective {
    /// Create a fresh environment inside the staging directory
    #[default]
    Build,
    /// Reuse a pre-built environment
    Existing(PathBuf),
    /// No environment; nothing is merged
    Skip,
}

/// A materializer that never provides dependencies
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDependencies;

impl DependencyMaterializer for NoDependencies {
    fn materialize(&self, _staging_dir: &Path) -> Result<Option<PathBuf>> {
        debug!("Dependency materialization disabled");
        Ok(None)
    }
}

/// Python virtualenv + pip materializer
#[derive(Debug, Clone)]
pub struct VirtualenvMaterializer {
    directive: EnvironmentDirective,
    spec: DependencySpec,
    python: String,
    virtualenv_bin: String,
}

impl VirtualenvMaterializer {
    pub fn new(directive: EnvironmentDirective, spec: DependencySpec) -> Self {
        Self {
            directive,
            spec,
            python: "python3".to_string(),
            virtualenv_bin: "virtualenv".to_string(),
        }
    }

    /// Interpreter passed to `virtualenv -p`
    pub fn with_python(mut self, python: impl Into<String>) -> Self {
        self.python = python.into();
        self
    }

    /// Override the `virtualenv` executable
    pub fn with_virtualenv_bin(mut self, bin: impl Into<String>) -> Self {
        self.virtualenv_bin = bin.into();
        self
    }

    pub fn directive(&self) -> &EnvironmentDirective {
        &self.directive
    }

    fn create_virtualenv(&self, venv: &Path) -> Result<()> {
        info!("Creating virtualenv at {}", venv.display());
        let mut cmd = Command::new(&self.virtualenv_bin);
        cmd.arg("-p").arg(&self.python).arg(venv);
        run_checked("virtualenv", &mut cmd)
    }

    fn install(&self, venv: &Path) -> Result<()> {
        let args: Vec<OsString> = match &self.spec {
            DependencySpec::Requirements(reqs) if !reqs.is_empty() => {
                info!("Installing requirements: {}", reqs.join(", "));
                reqs.iter().map(OsString::from).collect()
            }
            DependencySpec::File(path) => {
                info!("Installing requirements from {}", path.display());
                vec!["-r".into(), path.as_os_str().to_os_string()]
            }
            _ => {
                debug!("No requirements to install");
                return Ok(());
            }
        };

        let pip = pip_path(venv);
        if !pip.is_file() {
            return Err(Error::DependencyInstallFailed(format!(
                "pip not found at {}",
                pip.display()
            )));
        }

        let mut cmd = Command::new(&pip);
        cmd.arg("install").args(&args);
        run_checked("pip", &mut cmd)
    }
}

impl DependencyMaterializer for VirtualenvMaterializer {
    fn materialize(&self, staging_dir: &Path) -> Result<Option<PathBuf>> {
        let venv = match &self.directive {
            EnvironmentDirective::Skip => {
                info!("Skipping virtualenv, no dependencies will be packaged");
                return Ok(None);
            }
            EnvironmentDirective::Existing(path) => {
                if !path.is_dir() {
                    return Err(Error::EnvironmentNotFound(path.clone()));
                }
                info!("Using existing virtualenv {}", path.display());
                path.clone()
            }
            EnvironmentDirective::Build => {
                let venv = staging_dir.join(VENV_DIR_NAME);
                self.create_virtualenv(&venv)?;
                venv
            }
        };

        self.install(&venv)?;

        let site_packages = find_site_packages(&venv)?;
        if site_packages.is_none() {
            warn!("No site-packages directory found in {}", venv.display());
        }
        Ok(site_packages)
    }
    fn environment_root(&self) -> Option<&Path> {
        match &self.directive {
            EnvironmentDirective::Existing(path) => Some(path.as_path()),
            _ => None,
        }
    }
}

/// Location of pip inside a virtualenv
pub fn pip_path(venv: &Path) -> PathBuf {
    if cfg!(windows) {
        venv.join("Scripts").join("pip.exe")
    } else {
        venv.join("bin").join("pip")
    }
}

/// Find the installed-packages directory of a virtualenv
///
/// Checks `Lib/site-packages` (Windows layout) first, then the first match of
/// `lib/python*/site-packages` in sorted order.
pub fn find_site_packages(venv: &Path) -> Result<Option<PathBuf>> {
    let windows_layout = venv.join("Lib").join("site-packages");
    if cfg!(windows) && windows_layout.is_dir() {
        return Ok(Some(windows_layout));
    }

    let root = venv.to_str().ok_or_else(|| {
        Error::DependencyInstallFailed(format!("non UTF-8 virtualenv path {}", venv.display()))
    })?;
    let pattern = format!("{}/lib/python*/site-packages", glob::Pattern::escape(root));

    let mut matches: Vec<PathBuf> = glob::glob(&pattern)
        .map_err(|e| Error::DependencyInstallFailed(e.to_string()))?
        .filter_map(|entry| entry.ok())
        .filter(|path| path.is_dir())
        .collect();
    matches.sort();

    Ok(matches.into_iter().next())
}

/// Run a command to completion, logging its output and failing on non-zero exit
fn run_checked(tool: &str, cmd: &mut Command) -> Result<()> {
    debug!("Running {:?}", cmd);
    let output = cmd
        .output()
        .map_err(|e| Error::DependencyInstallFailed(format!("failed to run {}: {}", tool, e)))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    debug!("{} stdout: {}", tool, stdout.trim_end());
    debug!("{} stderr: {}", tool, stderr.trim_end());

    if !output.status.success() {
        return Err(Error::DependencyInstallFailed(format!(
            "{} exited with {:?}\nstderr: {}",
            tool,
            output.status.code(),
            stderr.trim_end()
        )));
    }

    Ok(())
}
