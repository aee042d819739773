//! The Destroy Pipeline: removes every resource bearing a deployment's
//! identifier, regardless of what the current manifest contains.

use crate::applier::{NoopProgressSink, ProgressSink};
use crate::cancellation::CancellationToken;
use crate::config::RuntimeConfig;
use crate::engine::{Engine, LabelFilter};
use crate::errors::{Error, Result};
use crate::identifier::Identifier;
use std::collections::HashSet;
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

/// Outcome of a destroy run: what was removed, and what (if anything)
/// could not be.
#[derive(Debug, Clone, Default)]
pub struct DestroyOutcome {
    /// Services whose containers were removed, one entry per distinct
    /// `project/service` pair (a service may have had several containers).
    pub removed_services: Vec<String>,
    /// Networks removed.
    pub removed_networks: Vec<String>,
    /// Volumes removed.
    pub removed_volumes: Vec<String>,
    /// Volumes that could not be removed after exhausting
    /// `volume_busy_retries`.
    pub stuck_volumes: Vec<String>,
}

/// Discover and remove every resource labeled with `identifier`, in
/// dependency-reverse order: services, then networks, then volumes.
///
/// `NotFound` is treated as success throughout, since destruction is
/// idempotent by definition. A volume still in use after
/// `config.volume_busy_retries` retries (2s apart) is reported in
/// [`DestroyOutcome::stuck_volumes`] rather than failing the whole run.
pub async fn destroy(
    engine: &dyn Engine,
    identifier: &Identifier,
    config: &RuntimeConfig,
    cancellation: &CancellationToken,
) -> Result<DestroyOutcome> {
    destroy_with_sink(engine, identifier, config, cancellation, &NoopProgressSink).await
}

/// As [`destroy`], but reporting through a caller-supplied sink.
pub async fn destroy_with_sink(
    engine: &dyn Engine,
    identifier: &Identifier,
    config: &RuntimeConfig,
    cancellation: &CancellationToken,
    sink: &dyn ProgressSink,
) -> Result<DestroyOutcome> {
    let _ = sink;
    let filter = LabelFilter::for_identifier(identifier);
    let mut outcome = DestroyOutcome::default();

    let containers = engine.list_containers(&filter).await?;
    let mut seen_services = HashSet::new();
    for container in &containers {
        if cancellation.is_cancelled() {
            return Err(Error::internal("destroy", "cancelled"));
        }
        let key = format!("{}/{}", container.project, container.service);
        info!(service = %key, container = %container.id, "destroying container");
        match engine.remove_container(&container.id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        if seen_services.insert(key.clone()) {
            outcome.removed_services.push(key);
        }
    }

    let networks = engine.list_networks(&filter).await?;
    for name in networks {
        if cancellation.is_cancelled() {
            return Err(Error::internal("destroy", "cancelled"));
        }
        match engine.remove_network(&name).await {
            Ok(()) => outcome.removed_networks.push(name),
            Err(e) if e.is_not_found() => outcome.removed_networks.push(name),
            Err(e) => return Err(e),
        }
    }

    let volumes = engine.list_volumes(&filter).await?;
    for name in volumes {
        if cancellation.is_cancelled() {
            return Err(Error::internal("destroy", "cancelled"));
        }
        match remove_volume_with_retry(engine, &name, config.volume_busy_retries).await {
            Ok(true) => outcome.removed_volumes.push(name),
            Ok(false) => {
                warn!(volume = %name, "volume still in use after retries");
                outcome.stuck_volumes.push(name);
            }
            Err(e) => return Err(e),
        }
    }

    Ok(outcome)
}

/// Remove a volume, retrying up to `retries` times (2s apart) if the engine
/// reports it's still in use. Returns `Ok(false)` (not an error) if still
/// stuck after exhausting retries. A `NotFound` is success.
async fn remove_volume_with_retry(engine: &dyn Engine, name: &str, retries: u32) -> Result<bool> {
    let mut attempt = 0;
    loop {
        match engine.remove_volume(name).await {
            Ok(()) => return Ok(true),
            Err(e) if e.is_not_found() => return Ok(true),
            Err(e) if e.kind == crate::errors::Kind::Conflict && attempt < retries => {
                attempt += 1;
                sleep(Duration::from_secs(2)).await;
            }
            Err(e) if e.kind == crate::errors::Kind::Conflict => return Ok(false),
            Err(e) => return Err(e),
        }
    }
}
