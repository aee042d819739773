//! The State Probe: discovers the *actual* state of every resource the
//! manifest names, by calling out to the [`Engine`].

use crate::cancellation::CancellationToken;
use crate::config::RuntimeConfig;
use crate::engine::{Engine, LabelFilter};
use crate::errors::{Error, Result};
use crate::fileset::FilesetEngine;
use crate::identifier::Identifier;
use crate::manifest::Manifest;
use futures::future::try_join_all;
use tokio::sync::Semaphore;
use tracing::{debug, instrument};

/// Actual state of one compose service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceState {
    /// Owning stack name.
    pub stack: String,
    /// Service name within the stack.
    pub service: String,
    /// Compose-computed hash of the service's desired configuration.
    pub desired_config_hash: String,
    /// ID of the currently running container, if any.
    pub running_container_id: Option<String>,
    /// The config-hash label on the running container, if any. Absence is
    /// never treated as "matches desired" (see [`crate::planner`]).
    pub running_config_hash: Option<String>,
}

/// Actual state of one fileset, as of the last diff against its remote
/// volume contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilesetState {
    /// Fileset name.
    pub name: String,
    /// Whether the local tree and the remote volume contents differ.
    pub changed: bool,
}

/// Snapshot of every identifier-scoped resource currently known to the
/// engine, plus the desired/actual state of every manifest service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CurrentState {
    /// Names of networks carrying the deployment's identifier label.
    pub networks: Vec<String>,
    /// Names of volumes carrying the deployment's identifier label.
    pub volumes: Vec<String>,
    /// Per-service state, sorted by `(stack, service)`.
    pub services: Vec<ServiceState>,
    /// Per-fileset diff state, sorted by name.
    pub filesets: Vec<FilesetState>,
}

/// Probe `manifest` against `engine`, bounding per-stack concurrency by
/// `config.parallelism` and honoring `cancellation`.
#[instrument(skip(engine, manifest, config, cancellation))]
pub async fn probe(
    engine: &dyn Engine,
    manifest: &Manifest,
    config: &RuntimeConfig,
    cancellation: &CancellationToken,
) -> Result<CurrentState> {
    let filter = LabelFilter::for_identifier(&manifest.identifier);

    let semaphore = Semaphore::new(config.parallelism.max(1));
    let stack_futures = manifest.stacks.iter().map(|stack| {
        let semaphore = &semaphore;
        let cancellation = cancellation.clone();
        async move {
            let _permit = semaphore
                .acquire()
                .await
                .map_err(|e| Error::internal("probe stack state", e.to_string()))?;
            if cancellation.is_cancelled() {
                return Err(Error::internal("probe stack state", "cancelled"));
            }
            probe_stack(engine, stack).await
        }
    });

    let (networks, volumes, mut stack_results, mut filesets) = tokio::try_join!(
        probe_networks(engine, &filter),
        probe_volumes(engine, &manifest.identifier),
        try_join_all(stack_futures),
        probe_filesets(engine, manifest, config),
    )?;

    let mut services: Vec<ServiceState> = stack_results.drain(..).flatten().collect();
    services.sort_by(|a, b| (a.stack.as_str(), a.service.as_str()).cmp(&(b.stack.as_str(), b.service.as_str())));

    let mut networks = networks;
    networks.sort();
    let mut volumes = volumes;
    volumes.sort();
    filesets.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(CurrentState {
        networks,
        volumes,
        services,
        filesets,
    })
}

async fn probe_networks(engine: &dyn Engine, filter: &LabelFilter) -> Result<Vec<String>> {
    engine.list_networks(filter).await
}

async fn probe_volumes(engine: &dyn Engine, identifier: &Identifier) -> Result<Vec<String>> {
    let filter = LabelFilter::for_identifier(identifier);
    engine.list_volumes(&filter).await
}

async fn probe_stack(engine: &dyn Engine, stack: &crate::manifest::Stack) -> Result<Vec<ServiceState>> {
    let services = engine.compose_list_services(stack).await?;
    debug!(stack = %stack.name, count = services.len(), "listed compose services");

    let mut states = Vec::with_capacity(services.len());
    for service in services {
        let env = materialize_env(stack);
        let desired_config_hash = engine.compose_config_hash(stack, &service, &env).await?;

        let ps_entries = engine.compose_ps(stack, &service).await?;
        let running = ps_entries
            .into_iter()
            .find(|entry| entry.state == "running");

        let (running_container_id, running_config_hash) = match running {
            Some(entry) => {
                let inspect = engine.inspect_container(&entry.container_id).await?;
                (Some(entry.container_id), inspect.config_hash_label)
            }
            None => (None, None),
        };

        states.push(ServiceState {
            stack: stack.name.clone(),
            service,
            desired_config_hash,
            running_container_id,
            running_config_hash,
        });
    }
    Ok(states)
}

fn materialize_env(stack: &crate::manifest::Stack) -> Vec<(String, String)> {
    stack.inline_env.clone()
}

/// Diff every manifest fileset against its remote volume contents, without
/// applying anything. The Planner decides whether that diff warrants an
/// `Update` action.
async fn probe_filesets(
    engine: &dyn Engine,
    manifest: &Manifest,
    config: &RuntimeConfig,
) -> Result<Vec<FilesetState>> {
    let fileset_engine = FilesetEngine::new(engine, config, &manifest.identifier);
    let mut states = Vec::with_capacity(manifest.filesets.len());
    for fileset in &manifest.filesets {
        let diff = fileset_engine.diff(fileset).await?;
        debug!(fileset = %fileset.name, changed = !diff.is_empty(), "fileset diff probed");
        states.push(FilesetState {
            name: fileset.name.clone(),
            changed: !diff.is_empty(),
        });
    }
    Ok(states)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeEngine;

    #[tokio::test]
    async fn probe_sorts_services_deterministically() {
        let engine = FakeEngine::new();
        let manifest = Manifest {
            identifier: Identifier::new("demo").unwrap(),
            stacks: vec![],
            networks: vec![],
            volumes: vec![],
            filesets: vec![],
        };
        let config = RuntimeConfig::sequential();
        let token = CancellationToken::new();
        let state = probe(&engine, &manifest, &config, &token).await.unwrap();
        assert!(state.services.is_empty());
        assert!(state.networks.is_empty());
        assert!(state.volumes.is_empty());
    }
}
