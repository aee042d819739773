//! The Engine Client: the sole point of contact with the container runtime.
//!
//! Expressed as a trait so the Planner, Applier, State Probe, and Fileset
//! Engine can be exercised against an in-memory fake
//! ([`crate::testing::FakeEngine`]) without a live daemon. [`DockerEngine`]
//! is the concrete implementation that shells out to the `docker` (or
//! docker-compatible) CLI via [`process::ProcessExecutor`].
//!
//! Any engine implementing the compose subcommand vocabulary plus the
//! docker-compatible `network`, `volume`, `ps`, `inspect`, and `run` verbs
//! satisfies this contract.

mod docker;
mod process;

pub use docker::DockerEngine;
pub use process::{find_engine_binary, ExecutionConfig, HelperStream, ProcessExecutor};

use crate::errors::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;

/// A running or stopped container, as returned by `list_containers`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    /// Compose project name.
    pub project: String,
    /// Compose service name.
    pub service: String,
    /// Container name.
    pub name: String,
    /// Raw engine state string (`running`, `exited`, ...).
    pub state: String,
    /// Container ID.
    pub id: String,
}

/// The subset of `docker inspect` this core consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInspect {
    /// Value of the [`crate::labels::SERVICE_CONFIG_HASH`] label, if set.
    pub config_hash_label: Option<String>,
    /// Image reference the container was created from.
    pub image: String,
    /// Raw creation timestamp as reported by the engine.
    pub created_at: String,
    /// Whether the container is currently running.
    pub running: bool,
}

/// One row of `compose ps`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposePsEntry {
    /// Container ID.
    pub container_id: String,
    /// Raw engine state string.
    pub state: String,
}

/// `docker volume inspect` detail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeInspect {
    /// Volume driver name.
    pub driver: String,
    /// Driver options.
    pub options: HashMap<String, String>,
    /// Labels on the volume.
    pub labels: HashMap<String, String>,
    /// Host mountpoint, if the driver exposes one.
    pub mountpoint: Option<String>,
}

/// A filter applied to list operations; currently only label-based.
#[derive(Debug, Clone, Default)]
pub struct LabelFilter {
    /// `key=value` label filters, ANDed together.
    pub labels: Vec<String>,
}

impl LabelFilter {
    /// Scope a list operation to a single deployment identifier.
    #[must_use]
    pub fn for_identifier(identifier: &crate::identifier::Identifier) -> Self {
        Self {
            labels: vec![crate::labels::identifier_filter(identifier)],
        }
    }
}

/// One end of a volume mount for a helper-container invocation:
/// `(volume_name, mount_path)`.
pub type VolumeMount = (String, PathBuf);

/// A one-shot helper container invocation: a small known-good image with a
/// volume mounted, running a fixed argv, optionally streaming bytes in and
/// capturing bytes out.
#[derive(Debug, Clone)]
pub struct HelperSpec {
    /// Image reference (see [`crate::config::RuntimeConfig::helper_image`]).
    pub image: String,
    /// Volumes to mount, keyed by target path inside the container.
    pub volume_mounts: Vec<VolumeMount>,
    /// Working directory inside the container.
    pub workdir: PathBuf,
    /// Full argv, e.g. `["sh", "-c", "tar -xpf - -C /dst"]`.
    pub argv: Vec<String>,
    /// Bytes written to the container's stdin, if any.
    pub stdin: Option<Vec<u8>>,
    /// Labels applied to the helper container itself.
    pub labels: HashMap<String, String>,
}

/// Outcome of a [`HelperSpec`] invocation.
#[derive(Debug, Clone)]
pub struct HelperResult {
    /// Process exit code.
    pub exit_code: i32,
    /// Captured standard output.
    pub stdout: Vec<u8>,
    /// Captured standard error.
    pub stderr: Vec<u8>,
}

impl HelperResult {
    /// True when the helper exited zero.
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// The engine client's public contract (§4.1).
#[async_trait]
pub trait Engine: Send + Sync {
    /// `ok` if the daemon responds, `Unavailable` otherwise.
    async fn check_daemon(&self) -> Result<()>;

    /// List containers carrying the given label filter.
    async fn list_containers(&self, filter: &LabelFilter) -> Result<Vec<ContainerSummary>>;

    /// Inspect a single container by ID.
    async fn inspect_container(&self, id: &str) -> Result<ContainerInspect>;

    /// Force-remove a single container by ID. `NotFound` if it's already
    /// gone.
    async fn remove_container(&self, id: &str) -> Result<()>;

    /// List the services declared by a stack's compose files.
    async fn compose_list_services(&self, stack: &crate::manifest::Stack) -> Result<Vec<String>>;

    /// Compute the compose-computed config hash for one service, given its
    /// fully materialized environment (inline env plus resolved secrets).
    async fn compose_config_hash(
        &self,
        stack: &crate::manifest::Stack,
        service: &str,
        env: &[(String, String)],
    ) -> Result<String>;

    /// `compose ps` for one service.
    async fn compose_ps(
        &self,
        stack: &crate::manifest::Stack,
        service: &str,
    ) -> Result<Vec<ComposePsEntry>>;

    /// `compose up`, optionally scoped to a subset of services.
    async fn compose_up(
        &self,
        stack: &crate::manifest::Stack,
        services: &[String],
        env: &[(String, String)],
        labels: &HashMap<String, String>,
    ) -> Result<()>;

    /// `compose down`, optionally scoped to a subset of services.
    async fn compose_down(&self, stack: &crate::manifest::Stack, services: &[String]) -> Result<()>;

    /// List networks matching the filter.
    async fn list_networks(&self, filter: &LabelFilter) -> Result<Vec<String>>;

    /// Create a network with the given labels.
    async fn create_network(&self, name: &str, labels: &HashMap<String, String>) -> Result<()>;

    /// Remove a network by name.
    async fn remove_network(&self, name: &str) -> Result<()>;

    /// List volumes matching the filter.
    async fn list_volumes(&self, filter: &LabelFilter) -> Result<Vec<String>>;

    /// Create a volume with the given labels.
    async fn create_volume(&self, name: &str, labels: &HashMap<String, String>) -> Result<()>;

    /// Remove a volume by name.
    async fn remove_volume(&self, name: &str) -> Result<()>;

    /// Inspect a volume.
    async fn inspect_volume(&self, name: &str) -> Result<VolumeInspect>;

    /// Run a one-shot helper container to completion, returning its exit
    /// status and captured stdio.
    async fn run_helper(&self, spec: HelperSpec) -> Result<HelperResult>;
}
