//! The desired-state input to the Planner.
//!
//! A [`Manifest`] is produced by the configuration subsystem (a collaborator,
//! out of scope for this crate): all placeholder interpolation and
//! path normalization is assumed complete by the time it reaches us. Missing
//! environment variables appear as empty strings; the Planner never
//! re-interpolates.

use crate::errors::{Error, Result};
use crate::identifier::Identifier;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// An opaque reference into the secret provider (a collaborator). The core
/// never decrypts it; see [`crate::secrets::SecretProvider`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SecretRef(pub String);

/// A compose project declared in the manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stack {
    /// Stack name, used as the default compose project name.
    pub name: String,
    /// Directory every relative path in this stack resolves against.
    pub root_dir: PathBuf,
    /// Compose files, in `--file` order. Each must resolve under `root_dir`.
    pub compose_files: Vec<PathBuf>,
    /// Compose profiles to activate.
    pub profiles: Vec<String>,
    /// `--env-file` arguments, in order.
    pub env_files: Vec<PathBuf>,
    /// Inline `KEY=VALUE` environment entries, applied after `env_files`.
    pub inline_env: Vec<(String, String)>,
    /// References resolved through the secret provider before `compose up`.
    pub sops_refs: Vec<SecretRef>,
    /// Overrides the compose `--project-name`; defaults to `name`.
    pub project_name: Option<String>,
}

impl Stack {
    /// The effective compose project name.
    #[must_use]
    pub fn project_name(&self) -> &str {
        self.project_name.as_deref().unwrap_or(&self.name)
    }

    /// Validate the invariants `root_dir` exists and every compose file
    /// resolves underneath it.
    pub fn validate(&self) -> Result<()> {
        if !self.root_dir.is_dir() {
            return Err(Error::invalid_input(
                format!("validate stack {}", self.name),
                format!("root_dir {:?} does not exist", self.root_dir),
            ));
        }
        for file in &self.compose_files {
            let resolved = self.root_dir.join(file);
            if !resolved.starts_with(&self.root_dir) {
                return Err(Error::invalid_input(
                    format!("validate stack {}", self.name),
                    format!("compose file {file:?} escapes root_dir"),
                ));
            }
        }
        Ok(())
    }
}

/// A named Docker network the manifest wants to exist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    /// Network name.
    pub name: String,
}

/// A named Docker volume the manifest wants to exist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Volume {
    /// Volume name.
    pub name: String,
}

/// A local directory tree mirrored into a volume at a target path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fileset {
    /// Fileset name, used in plan rendering and as a dependency key.
    pub name: String,
    /// Absolute path to the local source directory.
    pub source_dir_abs: PathBuf,
    /// Name of the volume this fileset targets; must appear in
    /// [`Manifest::volumes`].
    pub target_volume: String,
    /// Absolute target path inside the volume. Must not be `/`.
    pub target_path_abs: PathBuf,
    /// Exclude glob patterns, evaluated in order (last match wins).
    pub excludes: Vec<String>,
    /// Services to mark for recreate after this fileset syncs, even if
    /// their compose hash is unchanged.
    pub restart_services: Vec<String>,
}

impl Fileset {
    fn validate(&self) -> Result<()> {
        if !self.target_path_abs.is_absolute() || self.target_path_abs == Path::new("/") {
            return Err(Error::invalid_input(
                format!("validate fileset {}", self.name),
                format!(
                    "target_path_abs {:?} must be absolute and not '/'",
                    self.target_path_abs
                ),
            ));
        }
        Ok(())
    }
}

/// The full desired-state input: stacks, networks, volumes, and filesets,
/// scoped under one deployment [`Identifier`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// The deployment identifier stamped on every managed resource.
    pub identifier: Identifier,
    /// Compose projects to reconcile.
    pub stacks: Vec<Stack>,
    /// Networks to reconcile.
    pub networks: Vec<Network>,
    /// Volumes to reconcile.
    pub volumes: Vec<Volume>,
    /// Filesets to reconcile.
    pub filesets: Vec<Fileset>,
}

impl Manifest {
    /// Validate every structural invariant the Planner relies on:
    /// stack roots exist, fileset targets are well-formed, filesets
    /// reference declared volumes, and no two filesets target the same
    /// volume at overlapping paths.
    pub fn validate(&self) -> Result<()> {
        for stack in &self.stacks {
            stack.validate()?;
        }

        let volume_names: HashSet<&str> =
            self.volumes.iter().map(|v| v.name.as_str()).collect();

        for fileset in &self.filesets {
            fileset.validate()?;
            if !volume_names.contains(fileset.target_volume.as_str()) {
                return Err(Error::invalid_input(
                    format!("validate fileset {}", fileset.name),
                    format!(
                        "target_volume {:?} is not declared in manifest volumes",
                        fileset.target_volume
                    ),
                ));
            }
        }

        for (i, a) in self.filesets.iter().enumerate() {
            for b in self.filesets.iter().skip(i + 1) {
                if a.target_volume == b.target_volume && paths_overlap(&a.target_path_abs, &b.target_path_abs) {
                    return Err(Error::invalid_input(
                        "validate manifest",
                        format!(
                            "filesets {:?} and {:?} target overlapping paths in volume {:?}",
                            a.name, b.name, a.target_volume
                        ),
                    ));
                }
            }
        }

        Ok(())
    }

    /// All services declared by a stack's compose files cannot be known
    /// without invoking the engine; this returns the stacks for iteration by
    /// the State Probe.
    #[must_use]
    pub fn stack(&self, name: &str) -> Option<&Stack> {
        self.stacks.iter().find(|s| s.name == name)
    }
}

/// Two absolute paths "overlap" if one is an ancestor of (or equal to) the
/// other.
fn paths_overlap(a: &Path, b: &Path) -> bool {
    a == b || a.starts_with(b) || b.starts_with(a)
}
