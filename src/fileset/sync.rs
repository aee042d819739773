//! Fileset apply: delete → upload → touch, each via one or more helper
//! container invocations against the target volume.

use super::diff::FilesetDiff;
use super::manifest::{FileEntry, FilesetManifest};
use crate::config::RuntimeConfig;
use crate::engine::{Engine, HelperSpec};
use crate::errors::{Error, Result};
use crate::manifest::Fileset;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const DST: &str = "/dst";

/// Fetch the remote manifest by running the find/sha256sum/awk pipeline
/// (§4.3) inside a single helper invocation with the fileset's volume
/// mounted at `/dst`.
pub async fn fetch_remote_manifest(
    engine: &dyn Engine,
    fileset: &Fileset,
    config: &RuntimeConfig,
    labels: &HashMap<String, String>,
) -> Result<FilesetManifest> {
    let script = format!(
        "cd {DST} && mkdir -p {target} && cd {target} && \
         find . -type f -printf '%s\\t%m\\t%p\\n' | sed 's/^\\.\\///' > /tmp/stat.tsv; \
         find . -type f -print0 | xargs -0 -r sha256sum | sed 's/ \\*\\?/\\t/' > /tmp/sha.tsv; \
         awk -F'\\t' 'NR==FNR{{size[$3]=$1; mode[$3]=$2; next}} {{ \
           path=$2; sub(/^\\.\\//,\"\",path); print $1\"\\t\"mode[path]\"\\t\"size[path]\"\\t\"path }}' \
         /tmp/stat.tsv /tmp/sha.tsv",
        target = shell_quote(&relative_target(fileset)),
    );

    let spec = HelperSpec {
        image: config.helper_image.clone(),
        volume_mounts: vec![(fileset.target_volume.clone(), PathBuf::from(DST))],
        workdir: PathBuf::from(DST),
        argv: vec!["sh".to_string(), "-c".to_string(), script],
        stdin: None,
        labels: labels.clone(),
    };

    let result = engine.run_helper(spec).await?;
    if !result.success() {
        return Err(Error::external(
            "fetch remote fileset manifest",
            String::from_utf8_lossy(&result.stderr).into_owned(),
        ));
    }
    FilesetManifest::decode(&result.stdout)
}

/// Apply a diff in the mandated order (delete → upload → touch), chunking
/// uploads to `config.tar_chunk_bytes`. Returns `Ok(())` only once every
/// bucket has been applied.
pub async fn apply(
    engine: &dyn Engine,
    fileset: &Fileset,
    diff: &FilesetDiff,
    config: &RuntimeConfig,
    labels: &HashMap<String, String>,
) -> Result<()> {
    if !diff.delete.is_empty() {
        apply_delete(engine, fileset, &diff.delete, config, labels).await?;
    }
    if !diff.upload.is_empty() {
        apply_upload(engine, fileset, &diff.upload, config, labels).await?;
    }
    if !diff.touch.is_empty() {
        apply_touch(engine, fileset, &diff.touch, config, labels).await?;
    }
    Ok(())
}

async fn apply_delete(
    engine: &dyn Engine,
    fileset: &Fileset,
    entries: &[FileEntry],
    config: &RuntimeConfig,
    labels: &HashMap<String, String>,
) -> Result<()> {
    debug!(count = entries.len(), fileset = %fileset.name, "deleting remote files");
    let mut stdin = Vec::new();
    for entry in entries {
        stdin.extend_from_slice(entry.relative_path.as_bytes());
        stdin.push(0);
    }
    let target = relative_target(fileset);
    let spec = HelperSpec {
        image: config.helper_image.clone(),
        volume_mounts: vec![(fileset.target_volume.clone(), PathBuf::from(DST))],
        workdir: PathBuf::from(format!("{DST}/{target}")),
        argv: vec!["xargs".to_string(), "-0".to_string(), "rm".to_string(), "-f".to_string()],
        stdin: Some(stdin),
        labels: labels.clone(),
    };
    run_and_check(engine, spec, "delete fileset entries").await
}

async fn apply_upload(
    engine: &dyn Engine,
    fileset: &Fileset,
    entries: &[FileEntry],
    config: &RuntimeConfig,
    labels: &HashMap<String, String>,
) -> Result<()> {
    for chunk in chunk_by_bytes(entries, config.tar_chunk_bytes) {
        let tar_bytes = build_tar(&fileset.source_dir_abs, &chunk)?;
        info!(
            files = chunk.len(),
            bytes = tar_bytes.len(),
            fileset = %fileset.name,
            "uploading fileset chunk"
        );
        let target = relative_target(fileset);
        let spec = HelperSpec {
            image: config.helper_image.clone(),
            volume_mounts: vec![(fileset.target_volume.clone(), PathBuf::from(DST))],
            workdir: PathBuf::from(format!("{DST}/{target}")),
            argv: vec![
                "sh".to_string(),
                "-c".to_string(),
                format!("mkdir -p {DST}/{target} && tar -xpf - -C {DST}/{target}"),
            ],
            stdin: Some(tar_bytes),
            labels: labels.clone(),
        };
        run_and_check(engine, spec, "upload fileset chunk").await?;
    }
    Ok(())
}

async fn apply_touch(
    engine: &dyn Engine,
    fileset: &Fileset,
    entries: &[FileEntry],
    config: &RuntimeConfig,
    labels: &HashMap<String, String>,
) -> Result<()> {
    let target = relative_target(fileset);
    let mut script = String::new();
    for entry in entries {
        script.push_str(&format!(
            "chmod {:o} {}\n",
            entry.mode,
            shell_quote(&entry.relative_path)
        ));
    }
    let spec = HelperSpec {
        image: config.helper_image.clone(),
        volume_mounts: vec![(fileset.target_volume.clone(), PathBuf::from(DST))],
        workdir: PathBuf::from(format!("{DST}/{target}")),
        argv: vec!["sh".to_string(), "-c".to_string(), script],
        stdin: None,
        labels: labels.clone(),
    };
    run_and_check(engine, spec, "update fileset modes").await
}

async fn run_and_check(engine: &dyn Engine, spec: HelperSpec, operation: &str) -> Result<()> {
    let result = engine.run_helper(spec).await?;
    if !result.success() {
        return Err(Error::external(
            operation,
            String::from_utf8_lossy(&result.stderr).into_owned(),
        ));
    }
    Ok(())
}

/// Split entries into tar-chunk batches bounded by `tar_chunk_bytes` (by the
/// sum of file sizes, which approximates the archive size closely enough to
/// bound helper memory; exact tar framing overhead is not accounted for).
fn chunk_by_bytes(entries: &[FileEntry], budget: usize) -> Vec<Vec<FileEntry>> {
    let mut chunks = Vec::new();
    let mut current = Vec::new();
    let mut current_bytes: usize = 0;

    for entry in entries {
        let size = entry.size as usize;
        if !current.is_empty() && current_bytes + size > budget {
            chunks.push(std::mem::take(&mut current));
            current_bytes = 0;
        }
        current_bytes += size;
        current.push(entry.clone());
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Build a deterministically ordered tar archive (entries in the order
/// given, which callers pass already sorted) from files under
/// `source_dir_abs`.
fn build_tar(source_dir_abs: &Path, entries: &[FileEntry]) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    for entry in entries {
        let path = source_dir_abs.join(&entry.relative_path);
        let mut file = File::open(&path)
            .map_err(|e| Error::internal("read fileset entry for upload", format!("{path:?}: {e}")))?;
        let mut header = tar::Header::new_gnu();
        header.set_size(entry.size);
        header.set_mode(entry.mode);
        header.set_cksum();
        builder
            .append_data(&mut header, &entry.relative_path, &mut file)
            .map_err(|e| Error::internal("build fileset tar", e.to_string()))?;
    }
    builder
        .into_inner()
        .map_err(|e| Error::internal("build fileset tar", e.to_string()))
}

fn relative_target(fileset: &Fileset) -> String {
    fileset
        .target_path_abs
        .strip_prefix("/")
        .unwrap_or(&fileset.target_path_abs)
        .display()
        .to_string()
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, size: u64) -> FileEntry {
        FileEntry {
            relative_path: path.to_string(),
            size,
            mode: 0o644,
            content_digest: "x".to_string(),
        }
    }

    #[test]
    fn chunking_respects_budget() {
        let entries = vec![entry("a", 40), entry("b", 40), entry("c", 40)];
        let chunks = chunk_by_bytes(&entries, 50);
        assert_eq!(chunks.len(), 3);
    }

    #[test]
    fn chunking_packs_under_budget_together() {
        let entries = vec![entry("a", 10), entry("b", 10), entry("c", 10)];
        let chunks = chunk_by_bytes(&entries, 25);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 2);
        assert_eq!(chunks[1].len(), 1);
    }

    #[test]
    fn single_oversized_file_gets_its_own_chunk() {
        let entries = vec![entry("huge", 1000)];
        let chunks = chunk_by_bytes(&entries, 10);
        assert_eq!(chunks.len(), 1);
    }
}
