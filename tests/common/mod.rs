// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use std::fs::{self, File};
use std::path::{Path, PathBuf};

/// Path to a JSON config fixture under `tests/configs`
pub fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("configs")
        .join(name)
}

/// Create files (and their parent directories) under `root`.
///
/// Each file's content is its own relative path, so copies can be traced
/// back to their origin.
pub fn write_tree(root: &Path, files: &[&str]) {
    for file in files {
        write_file(root, file, file);
    }
}

pub fn write_file(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

/// Sorted entry names of a zip archive
pub fn archive_entries(archive: &Path) -> Vec<String> {
    let zip = zip::ZipArchive::new(File::open(archive).unwrap()).unwrap();
    let mut names: Vec<String> = zip.file_names().map(String::from).collect();
    names.sort();
    names
}

/// Content of a single archive entry
pub fn archive_entry(archive: &Path, name: &str) -> String {
    use std::io::Read;

    let mut zip = zip::ZipArchive::new(File::open(archive).unwrap()).unwrap();
    let mut entry = zip.by_name(name).unwrap();
    let mut content = String::new();
    entry.read_to_string(&mut content).unwrap();
    content
}
