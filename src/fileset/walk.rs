//! Local directory walking and digesting.

use super::exclude::ExcludeMatcher;
use super::manifest::{FileEntry, FilesetManifest};
use crate::errors::{Error, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use walkdir::WalkDir;

/// Walk `source_dir_abs` depth-first, skip excluded files, and hash the
/// rest, returning entries sorted by `relative_path`.
pub fn build_local_manifest(source_dir_abs: &Path, excludes: &ExcludeMatcher) -> Result<FilesetManifest> {
    let mut entries = Vec::new();

    for walked in WalkDir::new(source_dir_abs)
        .follow_links(false)
        .into_iter()
    {
        let walked = walked.map_err(|e| {
            Error::internal("walk fileset source", format!("{source_dir_abs:?}: {e}"))
        })?;
        if !walked.file_type().is_file() {
            continue;
        }

        let relative = walked
            .path()
            .strip_prefix(source_dir_abs)
            .map_err(|e| Error::internal("walk fileset source", e.to_string()))?;
        let relative_path = to_unix_relative(relative);

        if excludes.is_excluded(&relative_path) {
            continue;
        }

        let metadata = walked
            .metadata()
            .map_err(|e| Error::internal("stat fileset entry", e.to_string()))?;
        let digest = hash_file(walked.path())?;

        entries.push(FileEntry {
            relative_path,
            size: metadata.len(),
            mode: unix_mode(&metadata),
            content_digest: digest,
        });
    }

    Ok(FilesetManifest::from_entries(entries))
}

fn hash_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| {
        Error::internal("read fileset entry", format!("{path:?}: {e}"))
    })?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let read = file
            .read(&mut buf)
            .map_err(|e| Error::internal("read fileset entry", format!("{path:?}: {e}")))?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn to_unix_relative(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(unix)]
fn unix_mode(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn unix_mode(_metadata: &std::fs::Metadata) -> u32 {
    0o644
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fileset::exclude::ExcludeMatcher;
    use std::fs;

    #[test]
    fn walks_and_hashes_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.txt"), b"hello").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/a.txt"), b"world").unwrap();

        let manifest = build_local_manifest(dir.path(), &ExcludeMatcher::empty()).unwrap();
        let paths: Vec<&str> = manifest
            .entries()
            .iter()
            .map(|e| e.relative_path.as_str())
            .collect();
        assert_eq!(paths, vec!["b.txt", "sub/a.txt"]);
    }

    #[test]
    fn excluded_directory_contents_never_appear() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("node_modules")).unwrap();
        fs::write(dir.path().join("node_modules/pkg.js"), b"x").unwrap();
        fs::write(dir.path().join("keep.txt"), b"y").unwrap();

        let excludes = ExcludeMatcher::compile(&["node_modules/**".to_string()]).unwrap();
        let manifest = build_local_manifest(dir.path(), &excludes).unwrap();
        let paths: Vec<&str> = manifest
            .entries()
            .iter()
            .map(|e| e.relative_path.as_str())
            .collect();
        assert_eq!(paths, vec!["keep.txt"]);
    }

    #[test]
    fn identical_directory_hashes_identically_across_runs() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"stable").unwrap();
        let first = build_local_manifest(dir.path(), &ExcludeMatcher::empty()).unwrap();
        let second = build_local_manifest(dir.path(), &ExcludeMatcher::empty()).unwrap();
        assert_eq!(first, second);
    }
}
