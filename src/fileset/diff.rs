//! Sorted-merge diff between a local and remote [`FilesetManifest`].

use super::manifest::{compare_paths, FileEntry, FilesetManifest};
use std::cmp::Ordering;

/// The three buckets a diff partitions files into. Bucket membership is not
/// semantically ordered; *application* order is delete → upload → touch
/// (see [`crate::fileset::sync`]).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilesetDiff {
    /// Local-only files, or files whose digest differs from remote.
    pub upload: Vec<FileEntry>,
    /// Remote-only files.
    pub delete: Vec<FileEntry>,
    /// Files with identical digests but differing mode bits.
    pub touch: Vec<FileEntry>,
}

impl FilesetDiff {
    /// True when there is nothing to reconcile.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.upload.is_empty() && self.delete.is_empty() && self.touch.is_empty()
    }
}

/// Diff a local manifest against a remote one. Both must already be sorted
/// by `relative_path` (as every [`FilesetManifest`] is by construction).
#[must_use]
pub fn diff(local: &FilesetManifest, remote: &FilesetManifest) -> FilesetDiff {
    let mut result = FilesetDiff::default();
    let mut l = local.entries().iter().peekable();
    let mut r = remote.entries().iter().peekable();

    loop {
        match (l.peek(), r.peek()) {
            (Some(lhs), Some(rhs)) => {
                match compare_paths(&lhs.relative_path, &rhs.relative_path) {
                    Ordering::Less => {
                        result.upload.push((*l.next().unwrap()).clone());
                    }
                    Ordering::Greater => {
                        result.delete.push((*r.next().unwrap()).clone());
                    }
                    Ordering::Equal => {
                        let lhs = l.next().unwrap();
                        let rhs = r.next().unwrap();
                        if lhs.content_digest != rhs.content_digest {
                            result.upload.push(lhs.clone());
                        } else if lhs.mode != rhs.mode {
                            result.touch.push(lhs.clone());
                        }
                    }
                }
            }
            (Some(_), None) => {
                result.upload.push((*l.next().unwrap()).clone());
            }
            (None, Some(_)) => {
                result.delete.push((*r.next().unwrap()).clone());
            }
            (None, None) => break,
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, digest: &str, mode: u32) -> FileEntry {
        FileEntry {
            relative_path: path.to_string(),
            size: 1,
            mode,
            content_digest: digest.to_string(),
        }
    }

    #[test]
    fn identical_manifests_diff_empty() {
        let manifest = FilesetManifest::from_entries(vec![entry("a.txt", "h1", 0o644)]);
        let d = diff(&manifest, &manifest);
        assert!(d.is_empty());
    }

    #[test]
    fn local_only_file_uploads() {
        let local = FilesetManifest::from_entries(vec![entry("a.txt", "h1", 0o644)]);
        let remote = FilesetManifest::default();
        let d = diff(&local, &remote);
        assert_eq!(d.upload.len(), 1);
        assert!(d.delete.is_empty());
    }

    #[test]
    fn remote_only_file_deletes() {
        let local = FilesetManifest::default();
        let remote = FilesetManifest::from_entries(vec![entry("a.txt", "h1", 0o644)]);
        let d = diff(&local, &remote);
        assert_eq!(d.delete.len(), 1);
        assert!(d.upload.is_empty());
    }

    #[test]
    fn digest_mismatch_uploads_not_touches() {
        let local = FilesetManifest::from_entries(vec![entry("a.txt", "new", 0o644)]);
        let remote = FilesetManifest::from_entries(vec![entry("a.txt", "old", 0o644)]);
        let d = diff(&local, &remote);
        assert_eq!(d.upload.len(), 1);
        assert!(d.touch.is_empty());
    }

    #[test]
    fn mode_only_difference_touches() {
        let local = FilesetManifest::from_entries(vec![entry("a.txt", "same", 0o600)]);
        let remote = FilesetManifest::from_entries(vec![entry("a.txt", "same", 0o644)]);
        let d = diff(&local, &remote);
        assert_eq!(d.touch.len(), 1);
        assert!(d.upload.is_empty());
    }

    #[test]
    fn rename_is_delete_plus_upload() {
        let local = FilesetManifest::from_entries(vec![entry("new.txt", "same", 0o644)]);
        let remote = FilesetManifest::from_entries(vec![entry("old.txt", "same", 0o644)]);
        let d = diff(&local, &remote);
        assert_eq!(d.upload.len(), 1);
        assert_eq!(d.delete.len(), 1);
    }
}
