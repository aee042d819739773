//! [`FileEntry`] / [`FilesetManifest`]: the content-addressed inventory
//! compared between a local directory and its remote counterpart inside a
//! volume.

use crate::errors::{Error, Result};
use std::cmp::Ordering;

/// One file tracked by a [`FilesetManifest`].
///
/// Directories are not represented as entries. Only regular files carry a
/// digest; membership is implied by any file existing under that directory,
/// so the core never needs a directory entry of its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Path relative to the fileset root, `/`-separated, no leading `./`.
    pub relative_path: String,
    /// File size in bytes.
    pub size: u64,
    /// POSIX permission bits, masked to `0o7777`.
    pub mode: u32,
    /// SHA-256 digest of the file's contents, lowercase hex.
    pub content_digest: String,
}

/// A totally ordered collection of [`FileEntry`], sorted by
/// `relative_path` using byte-lexicographic comparison. Both the diff
/// algorithm (sorted merge) and the wire format depend on this ordering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilesetManifest {
    entries: Vec<FileEntry>,
}

impl FilesetManifest {
    /// Build a manifest from entries in any order, sorting them by
    /// `relative_path` byte order.
    #[must_use]
    pub fn from_entries(mut entries: Vec<FileEntry>) -> Self {
        entries.sort_by(|a, b| a.relative_path.as_bytes().cmp(b.relative_path.as_bytes()));
        Self { entries }
    }

    /// Entries in sorted order.
    #[must_use]
    pub fn entries(&self) -> &[FileEntry] {
        &self.entries
    }

    /// Encode using the wire format the helper container emits:
    /// `<sha256-hex>\t<mode-octal>\t<size-decimal>\t<relative-path>\n`
    /// one line per file, in sorted order.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for entry in &self.entries {
            out.extend_from_slice(
                format!(
                    "{}\t{:o}\t{}\t{}\n",
                    entry.content_digest, entry.mode, entry.size, entry.relative_path
                )
                .as_bytes(),
            );
        }
        out
    }

    /// Decode the helper's wire format back into a manifest. Tolerates a
    /// trailing blank line; any other malformed line is an `Internal` error.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| Error::internal("decode fileset manifest", e.to_string()))?;
        let mut entries = Vec::new();
        for line in text.lines() {
            if line.is_empty() {
                continue;
            }
            let mut fields = line.splitn(4, '\t');
            let digest = fields
                .next()
                .ok_or_else(|| malformed(line))?
                .to_string();
            let mode = u32::from_str_radix(fields.next().ok_or_else(|| malformed(line))?, 8)
                .map_err(|_| malformed(line))?;
            let size: u64 = fields
                .next()
                .ok_or_else(|| malformed(line))?
                .parse()
                .map_err(|_| malformed(line))?;
            let relative_path = fields.next().ok_or_else(|| malformed(line))?.to_string();
            entries.push(FileEntry {
                relative_path,
                size,
                mode: mode & 0o7777,
                content_digest: digest,
            });
        }
        Ok(Self::from_entries(entries))
    }
}

fn malformed(line: &str) -> Error {
    Error::internal(
        "decode fileset manifest",
        format!("malformed manifest line: {line:?}"),
    )
}

/// Lexicographic byte comparison of two relative paths, the ordering the
/// whole module relies on for deterministic diffs.
#[must_use]
pub fn compare_paths(a: &str, b: &str) -> Ordering {
    a.as_bytes().cmp(b.as_bytes())
}
