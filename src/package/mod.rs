// src/package/mod.rs
//! Packaging engine
//!
//! Turns a function project into a deployable archive. A run goes through
//! fixed phases, each gated on the previous one:
//!
//! 1. Clean any staging directory left by an earlier run
//! 2. Remove the previous archive
//! 3. Create a fresh staging directory
//! 4. Materialize dependencies (external step)
//! 5. Assemble the package tree: dependencies, then the source tree, then
//!    extra paths. Later copies overwrite earlier ones at the same path.
//! 6. Zip the assembled tree
//!
//! Any failure aborts the run with the underlying error. Staging files are
//! left in place for inspection; the archive is not.
//!
//! Runs are single-threaded and assume exclusive use of the project root,
//! since the staging directory name is fixed.

pub mod archive;
pub mod copy;
pub mod deps;
pub mod matcher;
pub mod workspace;

pub use archive::{build_archive, ArchiveStats};
pub use copy::{copy_file_into, copy_tree, CopyStats};
pub use deps::{
    DependencyMaterializer, DependencySpec, EnvironmentDirective, NoDependencies,
    VirtualenvMaterializer,
};
pub use matcher::{is_excluded, ExcludeSet};
pub use workspace::{Workspace, PACKAGE_DIR_NAME, TEMP_WORKSPACE_NAME, ZIPFILE_NAME};

use crate::error::{Error, Result};
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

/// Progress of a packaging run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PackagePhase {
    NotStarted,
    CleanedWorkspace,
    CleanedArtifact,
    WorkspacePrepared,
    DependenciesResolved,
    TreeAssembled,
    ArchiveBuilt,
}

impl PackagePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not-started",
            Self::CleanedWorkspace => "cleaned-workspace",
            Self::CleanedArtifact => "cleaned-artifact",
            Self::WorkspacePrepared => "workspace-prepared",
            Self::DependenciesResolved => "dependencies-resolved",
            Self::TreeAssembled => "tree-assembled",
            Self::ArchiveBuilt => "archive-built",
        }
    }
}

impl fmt::Display for PackagePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs to a packaging run that do not concern dependencies
#[derive(Debug, Clone)]
pub struct PackageOptions {
    /// Exclusion patterns applied to every copy
    pub exclude: Vec<String>,
    /// Files or directories merged in after the source tree, in order.
    /// Relative paths are taken from the project root.
    pub extra_paths: Vec<PathBuf>,
    /// Archive location, relative to the project root unless absolute
    pub archive_name: PathBuf,
    /// Staging directory name under the project root
    pub staging_name: String,
}

impl Default for PackageOptions {
    fn default() -> Self {
        Self {
            exclude: Vec::new(),
            extra_paths: Vec::new(),
            archive_name: PathBuf::from(ZIPFILE_NAME),
            staging_name: TEMP_WORKSPACE_NAME.to_string(),
        }
    }
}

impl PackageOptions {
    pub fn with_exclude(mut self, patterns: Vec<String>) -> Self {
        self.exclude = patterns;
        self
    }

    pub fn with_extra_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.extra_paths = paths;
        self
    }

    pub fn with_archive_name(mut self, name: impl Into<PathBuf>) -> Self {
        self.archive_name = name.into();
        self
    }
}

/// Result of a completed packaging run
#[derive(Debug, Clone)]
pub struct PackageResult {
    pub archive_path: PathBuf,
    /// Directory the dependencies were merged from, if any
    pub dependencies: Option<PathBuf>,
    pub dependency_stats: CopyStats,
    pub source_stats: CopyStats,
    pub extra_stats: CopyStats,
    pub archive_stats: ArchiveStats,
}

/// Packages a project directory into a deployable archive
pub struct Package {
    root: PathBuf,
    workspace: Workspace,
    options: PackageOptions,
    materializer: Box<dyn DependencyMaterializer>,
    phase: PackagePhase,
}

impl Package {
    /// Create a packager for `root`
    pub fn new(
        root: &Path,
        options: PackageOptions,
        materializer: Box<dyn DependencyMaterializer>,
    ) -> Self {
        let workspace = Workspace::with_names(root, &options.staging_name, &options.archive_name);
        Self {
            root: root.to_path_buf(),
            workspace,
            options,
            materializer,
            phase: PackagePhase::NotStarted,
        }
    }

    /// Packager with default options and no dependencies
    pub fn without_dependencies(root: &Path) -> Self {
        Self::new(root, PackageOptions::default(), Box::new(NoDependencies))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn phase(&self) -> PackagePhase {
        self.phase
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn archive_path(&self) -> &Path {
        self.workspace.archive_path()
    }

    /// Remove the staging directory
    pub fn clean_workspace(&self) -> Result<()> {
        self.workspace.clean_workspace()
    }

    /// Remove the archive
    pub fn clean_artifact(&self) -> Result<()> {
        self.workspace.clean_artifact()
    }

    /// Run every phase and produce the archive
    pub fn build(&mut self) -> Result<PackageResult> {
        self.phase = PackagePhase::NotStarted;
        // Patterns are compiled up front so a bad pattern fails before any
        // filesystem changes
        let exclude = ExcludeSet::new(self.options.exclude.as_slice())?;

        self.workspace.clean_workspace()?;
        self.advance(PackagePhase::CleanedWorkspace);

        self.workspace.clean_artifact()?;
        self.advance(PackagePhase::CleanedArtifact);

        self.workspace.prepare_workspace()?;
        self.advance(PackagePhase::WorkspacePrepared);

        let dependencies = self.materializer.materialize(self.workspace.staging_dir())?;
        self.advance(PackagePhase::DependenciesResolved);

        let (dependency_stats, source_stats, extra_stats) =
            self.assemble(&exclude, dependencies.as_deref())?;
        self.advance(PackagePhase::TreeAssembled);

        let archive_stats = build_archive(&self.workspace.package_dir(), self.archive_path())?;
        self.advance(PackagePhase::ArchiveBuilt);

        Ok(PackageResult {
            archive_path: self.archive_path().to_path_buf(),
            dependencies,
            dependency_stats,
            source_stats,
            extra_stats,
            archive_stats,
        })
    }

    fn advance(&mut self, phase: PackagePhase) {
        debug!("Packaging phase: {} -> {}", self.phase, phase);
        self.phase = phase;
    }

    fn assemble(
        &self,
        exclude: &ExcludeSet,
        dependencies: Option<&Path>,
    ) -> Result<(CopyStats, CopyStats, CopyStats)> {
        let package_dir = self.workspace.package_dir();
        fs::create_dir_all(&package_dir)?;

        let dependency_stats = match dependencies {
            Some(dir) => {
                info!("Copying dependencies from {}", dir.display());
                copy_tree(dir, &package_dir, exclude, false)?
            }
            None => {
                debug!("No dependency directory to merge");
                CopyStats::default()
            }
        };

        info!("Copying source files");
        let source_exclude = self.source_exclude(exclude)?;
        let source_stats = copy_tree(&self.root, &package_dir, &source_exclude, false)?;

        let mut extra_stats = CopyStats::default();
        let mut copied_extras: Vec<PathBuf> = Vec::new();
        for extra in &self.options.extra_paths {
            let path = self.resolve(extra);
            info!("Copying extra {} into package", path.display());

            if path.is_dir() {
                let extra_exclude = earlier_extras_exclude(exclude, &path, &copied_extras)?;
                let stats = copy_tree(&path, &package_dir, &extra_exclude, true)?;
                extra_stats.files += stats.files;
                extra_stats.symlinks += stats.symlinks;
                extra_stats.excluded += stats.excluded;
            } else if fs::symlink_metadata(&path).is_ok() {
                copy_file_into(&path, &package_dir)?;
                extra_stats.files += 1;
            } else {
                return Err(Error::InvalidSource(path));
            }
            copied_extras.push(path);
        }

        Ok((dependency_stats, source_stats, extra_stats))
    }

    /// Exclusions for the primary source copy
    ///
    /// Adds the staging directory, the archive, a pre-existing dependency
    /// environment and any extra path that lives inside the project root, so
    /// none of those are pulled in twice.
    fn source_exclude(&self, base: &ExcludeSet) -> Result<ExcludeSet> {
        let mut set = base.with_subtree(Path::new(&self.options.staging_name))?;

        if let Some(relative) = relative_under(self.archive_path(), &self.root) {
            set = set.with_subtree(&relative)?;
        }

        if let Some(env) = self.materializer.environment_root()
            && let Some(relative) = relative_under(env, &self.root)
        {
            debug!("Excluding dependency environment {} from source", relative.display());
            set = set.with_subtree(&relative)?;
        }

        for extra in &self.options.extra_paths {
            if let Some(relative) = relative_under(&self.resolve(extra), &self.root) {
                set = set.with_subtree(&relative)?;
            }
        }

        Ok(set)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

/// Exclusions for an extra directory: extras copied before it that lie
/// inside it are not copied a second time
fn earlier_extras_exclude(
    base: &ExcludeSet,
    extra_dir: &Path,
    copied: &[PathBuf],
) -> Result<ExcludeSet> {
    let mut set = base.clone();
    for earlier in copied {
        if let Some(relative) = relative_under(earlier, extra_dir) {
            set = set.with_subtree(&relative)?;
        }
    }
    Ok(set)
}

/// `path` relative to `base`, if it lies strictly below it
///
/// Falls back to canonical paths so a relative path and an absolute base
/// (or paths through symlinks) still compare.
fn relative_under(path: &Path, base: &Path) -> Option<PathBuf> {
    let relative = match path.strip_prefix(base) {
        Ok(relative) => relative.to_path_buf(),
        Err(_) => {
            let path = path.canonicalize().ok()?;
            let base = base.canonicalize().ok()?;
            path.strip_prefix(&base).ok()?.to_path_buf()
        }
    };

    let relative: PathBuf = relative
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();
    if relative.as_os_str().is_empty() {
        None
    } else {
        Some(relative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    /// Writes a fixed set of files as if an installer had produced them
    struct FakeInstall(Vec<(&'static str, &'static str)>);

    impl DependencyMaterializer for FakeInstall {
        fn materialize(&self, staging_dir: &Path) -> Result<Option<PathBuf>> {
            let site = staging_dir.join("venv/lib/python3.12/site-packages");
            for (name, content) in &self.0 {
                let path = site.join(name);
                fs::create_dir_all(path.parent().unwrap())?;
                fs::write(path, content)?;
            }
            Ok(Some(site))
        }
    }

    struct FailingInstall;

    impl DependencyMaterializer for FailingInstall {
        fn materialize(&self, _staging_dir: &Path) -> Result<Option<PathBuf>> {
            Err(Error::DependencyInstallFailed("pip exited with 1".to_string()))
        }
    }

    fn entry_names(archive: &Path) -> Vec<String> {
        let zip = zip::ZipArchive::new(File::open(archive).unwrap()).unwrap();
        let mut names: Vec<String> = zip.file_names().map(String::from).collect();
        names.sort();
        names
    }

    fn read_entry(archive: &Path, name: &str) -> String {
        use std::io::Read;
        let mut zip = zip::ZipArchive::new(File::open(archive).unwrap()).unwrap();
        let mut content = String::new();
        zip.by_name(name).unwrap().read_to_string(&mut content).unwrap();
        content
    }

    #[test]
    fn test_single_handler_project() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("handler.py"), "def handler(e, c): pass").unwrap();

        let mut pkg = Package::without_dependencies(temp.path());
        let result = pkg.build().unwrap();

        assert_eq!(pkg.phase(), PackagePhase::ArchiveBuilt);
        assert_eq!(result.archive_path, temp.path().join(ZIPFILE_NAME));
        assert_eq!(entry_names(&result.archive_path), vec!["handler.py"]);
        assert!(result.dependencies.is_none());
    }

    #[test]
    fn test_source_overrides_dependencies() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("handler.py"), "from source").unwrap();

        let mut pkg = Package::new(
            temp.path(),
            PackageOptions::default(),
            Box::new(FakeInstall(vec![
                ("handler.py", "from dependencies"),
                ("requests/__init__.py", "requests"),
            ])),
        );
        let result = pkg.build().unwrap();

        assert_eq!(
            entry_names(&result.archive_path),
            vec!["handler.py", "requests/__init__.py"]
        );
        assert_eq!(read_entry(&result.archive_path, "handler.py"), "from source");
        assert_eq!(result.dependency_stats.files, 2);
    }

    #[test]
    fn test_extra_directory_nested_under_its_name() {
        let temp = TempDir::new().unwrap();
        let project = temp.path().join("project");
        let extra = temp.path().join("libextra");
        fs::create_dir_all(&project).unwrap();
        fs::create_dir_all(extra.join("sub")).unwrap();
        fs::write(project.join("handler.py"), "h").unwrap();
        fs::write(extra.join("sub/helper.py"), "x").unwrap();
        fs::write(temp.path().join("settings.ini"), "s").unwrap();

        let options = PackageOptions::default()
            .with_extra_paths(vec![extra.clone(), temp.path().join("settings.ini")]);
        let mut pkg = Package::new(&project, options, Box::new(NoDependencies));
        let result = pkg.build().unwrap();

        assert_eq!(
            entry_names(&result.archive_path),
            vec!["handler.py", "libextra/sub/helper.py", "settings.ini"]
        );
        assert_eq!(result.extra_stats.files, 2);
    }

    #[test]
    fn test_extra_inside_root_not_copied_twice() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("vendor/shared")).unwrap();
        fs::write(temp.path().join("handler.py"), "h").unwrap();
        fs::write(temp.path().join("vendor/shared/lib.py"), "l").unwrap();

        let options =
            PackageOptions::default().with_extra_paths(vec![PathBuf::from("vendor/shared")]);
        let mut pkg = Package::new(temp.path(), options, Box::new(NoDependencies));
        let result = pkg.build().unwrap();

        assert_eq!(
            entry_names(&result.archive_path),
            vec!["handler.py", "shared/lib.py"]
        );
    }

    #[test]
    fn test_extra_keeps_files_sharing_its_name() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("lib")).unwrap();
        fs::write(temp.path().join("handler.py"), "h").unwrap();
        fs::write(temp.path().join("lib/libfoo.py"), "f").unwrap();
        fs::write(temp.path().join("lib/util.py"), "u").unwrap();

        let options = PackageOptions::default().with_extra_paths(vec![PathBuf::from("lib")]);
        let mut pkg = Package::new(temp.path(), options, Box::new(NoDependencies));
        let result = pkg.build().unwrap();

        assert_eq!(
            entry_names(&result.archive_path),
            vec!["handler.py", "lib/libfoo.py", "lib/util.py"]
        );
        assert_eq!(result.extra_stats.files, 2);
    }

    #[test]
    fn test_later_extra_skips_earlier_extra() {
        let temp = TempDir::new().unwrap();
        let project = temp.path().join("project");
        let outer = temp.path().join("outer");
        fs::create_dir_all(&project).unwrap();
        fs::create_dir_all(outer.join("inner")).unwrap();
        fs::write(project.join("handler.py"), "h").unwrap();
        fs::write(outer.join("inner/a.py"), "a").unwrap();
        fs::write(outer.join("b.py"), "b").unwrap();

        let options = PackageOptions::default()
            .with_extra_paths(vec![outer.join("inner"), outer.clone()]);
        let mut pkg = Package::new(&project, options, Box::new(NoDependencies));
        let result = pkg.build().unwrap();

        assert_eq!(
            entry_names(&result.archive_path),
            vec!["handler.py", "inner/a.py", "outer/b.py"]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_existing_environment_inside_root_not_copied_as_source() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("handler.py"), "h").unwrap();
        let site = temp.path().join("venv/lib/python3.12/site-packages");
        fs::create_dir_all(site.join("requests")).unwrap();
        fs::write(site.join("requests/__init__.py"), "requests").unwrap();

        let materializer = VirtualenvMaterializer::new(
            EnvironmentDirective::Existing(temp.path().join("venv")),
            DependencySpec::None,
        );
        let mut pkg = Package::new(temp.path(), PackageOptions::default(), Box::new(materializer));
        let result = pkg.build().unwrap();

        assert_eq!(
            entry_names(&result.archive_path),
            vec!["handler.py", "requests/__init__.py"]
        );
        assert_eq!(result.source_stats.files, 1);
    }

    #[test]
    fn test_relative_under() {
        assert_eq!(
            relative_under(Path::new("./venv"), Path::new(".")),
            Some(PathBuf::from("venv"))
        );
        assert_eq!(
            relative_under(Path::new("/a/b/c"), Path::new("/a")),
            Some(PathBuf::from("b/c"))
        );
        assert_eq!(relative_under(Path::new("/a"), Path::new("/a")), None);
        assert_eq!(relative_under(Path::new("/elsewhere/x"), Path::new("/a")), None);
    }

    #[test]
    fn test_exclusions_and_staging_never_packaged() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("tests")).unwrap();
        fs::write(temp.path().join("handler.py"), "h").unwrap();
        fs::write(temp.path().join("handler.pyc"), "c").unwrap();
        fs::write(temp.path().join("tests/test_handler.py"), "t").unwrap();

        let options = PackageOptions::default()
            .with_exclude(vec![r".*\.pyc$".to_string(), "^tests/".to_string()]);
        let mut pkg = Package::new(temp.path(), options, Box::new(NoDependencies));
        let result = pkg.build().unwrap();

        let names = entry_names(&result.archive_path);
        assert_eq!(names, vec!["handler.py"]);
        assert!(names.iter().all(|n| !n.contains(TEMP_WORKSPACE_NAME)));
    }

    #[test]
    fn test_rebuild_replaces_archive() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("old.py"), "o").unwrap();

        let mut pkg = Package::without_dependencies(temp.path());
        pkg.build().unwrap();

        fs::remove_file(temp.path().join("old.py")).unwrap();
        fs::write(temp.path().join("new.py"), "n").unwrap();
        let result = pkg.build().unwrap();

        assert_eq!(entry_names(&result.archive_path), vec!["new.py"]);
    }

    #[test]
    fn test_stale_staging_does_not_bleed_through() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("handler.py"), "h").unwrap();
        let stale = temp.path().join(TEMP_WORKSPACE_NAME).join(PACKAGE_DIR_NAME);
        fs::create_dir_all(&stale).unwrap();
        fs::write(stale.join("stale.py"), "s").unwrap();

        let mut pkg = Package::without_dependencies(temp.path());
        let result = pkg.build().unwrap();

        assert_eq!(entry_names(&result.archive_path), vec!["handler.py"]);
    }

    #[test]
    fn test_dependency_failure_aborts() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("handler.py"), "h").unwrap();
        fs::write(temp.path().join(ZIPFILE_NAME), "previous").unwrap();

        let mut pkg = Package::new(temp.path(), PackageOptions::default(), Box::new(FailingInstall));
        let err = pkg.build().unwrap_err();

        assert!(matches!(err, Error::DependencyInstallFailed(_)));
        assert_eq!(pkg.phase(), PackagePhase::WorkspacePrepared);
        assert!(!temp.path().join(ZIPFILE_NAME).exists());
    }

    #[test]
    fn test_missing_extra_path() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("handler.py"), "h").unwrap();

        let options = PackageOptions::default().with_extra_paths(vec![temp.path().join("nope")]);
        let mut pkg = Package::new(temp.path(), options, Box::new(NoDependencies));
        let err = pkg.build().unwrap_err();

        assert!(matches!(err, Error::InvalidSource(_)));
        assert_eq!(pkg.phase(), PackagePhase::DependenciesResolved);
    }

    #[test]
    fn test_archive_name_override() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("handler.py"), "h").unwrap();

        let options = PackageOptions::default().with_archive_name("build.zip");
        let mut pkg = Package::new(temp.path(), options, Box::new(NoDependencies));
        let result = pkg.build().unwrap();

        assert_eq!(result.archive_path, temp.path().join("build.zip"));
        assert_eq!(entry_names(&result.archive_path), vec!["handler.py"]);
    }

    #[test]
    fn test_clean_after_build() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("handler.py"), "h").unwrap();

        let mut pkg = Package::without_dependencies(temp.path());
        pkg.build().unwrap();
        pkg.clean_workspace().unwrap();
        pkg.clean_workspace().unwrap();
        pkg.clean_artifact().unwrap();

        assert!(!pkg.workspace().staging_dir().exists());
        assert!(!pkg.archive_path().exists());
    }

    #[test]
    fn test_invalid_pattern_fails_before_touching_disk() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(ZIPFILE_NAME), "previous").unwrap();

        let options = PackageOptions::default().with_exclude(vec!["[".to_string()]);
        let mut pkg = Package::new(temp.path(), options, Box::new(NoDependencies));

        assert!(matches!(pkg.build().unwrap_err(), Error::InvalidPattern { .. }));
        assert_eq!(pkg.phase(), PackagePhase::NotStarted);
        assert!(temp.path().join(ZIPFILE_NAME).exists());
    }
}
