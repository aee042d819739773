//! An in-memory [`Engine`] for exercising the State Probe, Planner,
//! Applier, and Fileset Engine without a live daemon.
//!
//! A single `Mutex`-guarded state bag, seeded by the test, and a call log
//! for assertions about what the core actually invoked.

use crate::engine::{
    ComposePsEntry, ContainerInspect, ContainerSummary, Engine, HelperResult, HelperSpec,
    LabelFilter, VolumeInspect,
};
use crate::errors::{Error, Result};
use crate::manifest::Stack;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// One container tracked by a [`FakeEngine`].
#[derive(Debug, Clone)]
pub struct FakeContainer {
    /// Container ID.
    pub id: String,
    /// Compose project name.
    pub project: String,
    /// Compose service name.
    pub service: String,
    /// Raw state string (`running`, `exited`, ...).
    pub state: String,
    /// Value of the config-hash label, if any.
    pub config_hash_label: Option<String>,
    /// Image reference.
    pub image: String,
}

#[derive(Default)]
struct FakeState {
    daemon_available: bool,
    networks: HashSet<String>,
    volumes: HashMap<String, VolumeInspect>,
    containers: HashMap<String, FakeContainer>,
    compose_services: HashMap<String, Vec<String>>,
    compose_hashes: HashMap<(String, String), String>,
    compose_ps: HashMap<(String, String), Vec<ComposePsEntry>>,
    helper_results: VecDeque<HelperResult>,
    calls: Vec<String>,
    next_id: u64,
    create_volume_delay: Option<Duration>,
}

/// An in-memory stand-in for a live container engine.
///
/// Every mutating call (`compose_up`, `create_network`, ...) updates the
/// same state a real engine would expose back through `list_*`/`inspect_*`,
/// so planner/applier round-trips can assert on engine state, not just
/// return values.
pub struct FakeEngine {
    state: Mutex<FakeState>,
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self {
            state: Mutex::new(FakeState {
                daemon_available: true,
                ..FakeState::default()
            }),
        }
    }
}

impl FakeEngine {
    /// An available, empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make [`Engine::check_daemon`] fail as if the daemon were unreachable.
    pub fn set_daemon_available(&self, available: bool) {
        self.state.lock().unwrap().daemon_available = available;
    }

    /// Declare the services a stack's compose files would report.
    pub fn seed_compose_services(&self, stack: &str, services: &[&str]) {
        self.state.lock().unwrap().compose_services.insert(
            stack.to_string(),
            services.iter().map(|s| s.to_string()).collect(),
        );
    }

    /// Set the desired config hash `compose_config_hash` returns for a
    /// service.
    pub fn seed_desired_hash(&self, stack: &str, service: &str, hash: &str) {
        self.state
            .lock()
            .unwrap()
            .compose_hashes
            .insert((stack.to_string(), service.to_string()), hash.to_string());
    }

    /// Seed a running container for a service, with the given config-hash
    /// label (`None` simulates a pre-upgrade deployment with no label).
    pub fn seed_running_container(
        &self,
        stack: &str,
        service: &str,
        config_hash_label: Option<&str>,
    ) -> String {
        let mut guard = self.state.lock().unwrap();
        guard.next_id += 1;
        let id = format!("fake-{}", guard.next_id);
        guard.containers.insert(
            id.clone(),
            FakeContainer {
                id: id.clone(),
                project: stack.to_string(),
                service: service.to_string(),
                state: "running".to_string(),
                config_hash_label: config_hash_label.map(str::to_string),
                image: "fake/image:latest".to_string(),
            },
        );
        guard.compose_ps.insert(
            (stack.to_string(), service.to_string()),
            vec![ComposePsEntry {
                container_id: id.clone(),
                state: "running".to_string(),
            }],
        );
        id
    }

    /// Pre-register a network as already existing in the engine.
    pub fn seed_network(&self, name: &str) {
        self.state.lock().unwrap().networks.insert(name.to_string());
    }

    /// Pre-register a volume as already existing in the engine.
    pub fn seed_volume(&self, name: &str) {
        self.state.lock().unwrap().volumes.insert(
            name.to_string(),
            VolumeInspect {
                driver: "local".to_string(),
                options: HashMap::new(),
                labels: HashMap::new(),
                mountpoint: None,
            },
        );
    }

    /// Queue a canned result for the next `run_helper` invocation.
    pub fn queue_helper_result(&self, result: HelperResult) {
        self.state.lock().unwrap().helper_results.push_back(result);
    }

    /// Make `create_volume` sleep before completing, to give tests a window
    /// in which the operation is genuinely in flight (e.g. for cancellation
    /// mid-apply).
    pub fn set_create_volume_delay(&self, delay: Duration) {
        self.state.lock().unwrap().create_volume_delay = Some(delay);
    }

    /// The operations invoked so far, in call order, for assertions.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn log(&self, call: impl Into<String>) {
        self.state.lock().unwrap().calls.push(call.into());
    }
}

#[async_trait]
impl Engine for FakeEngine {
    async fn check_daemon(&self) -> Result<()> {
        self.log("check_daemon");
        if self.state.lock().unwrap().daemon_available {
            Ok(())
        } else {
            Err(Error::unavailable("check daemon", "fake daemon offline"))
        }
    }

    async fn list_containers(&self, filter: &LabelFilter) -> Result<Vec<ContainerSummary>> {
        self.log("list_containers");
        let _ = filter;
        let guard = self.state.lock().unwrap();
        let mut out: Vec<ContainerSummary> = guard
            .containers
            .values()
            .map(|c| ContainerSummary {
                project: c.project.clone(),
                service: c.service.clone(),
                name: format!("{}-{}", c.project, c.service),
                state: c.state.clone(),
                id: c.id.clone(),
            })
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerInspect> {
        self.log(format!("inspect_container({id})"));
        let guard = self.state.lock().unwrap();
        let container = guard
            .containers
            .get(id)
            .ok_or_else(|| Error::not_found("inspect container", format!("no such container {id}")))?;
        Ok(ContainerInspect {
            config_hash_label: container.config_hash_label.clone(),
            image: container.image.clone(),
            created_at: "1970-01-01T00:00:00Z".to_string(),
            running: container.state == "running",
        })
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        self.log(format!("remove_container({id})"));
        let mut guard = self.state.lock().unwrap();
        match guard.containers.remove(id) {
            Some(container) => {
                guard
                    .compose_ps
                    .remove(&(container.project, container.service));
                Ok(())
            }
            None => Err(Error::not_found("remove container", format!("no such container {id}"))),
        }
    }

    async fn compose_list_services(&self, stack: &Stack) -> Result<Vec<String>> {
        self.log(format!("compose_list_services({})", stack.name));
        let guard = self.state.lock().unwrap();
        Ok(guard
            .compose_services
            .get(&stack.name)
            .cloned()
            .unwrap_or_default())
    }

    async fn compose_config_hash(
        &self,
        stack: &Stack,
        service: &str,
        _env: &[(String, String)],
    ) -> Result<String> {
        self.log(format!("compose_config_hash({}/{service})", stack.name));
        let guard = self.state.lock().unwrap();
        Ok(guard
            .compose_hashes
            .get(&(stack.name.clone(), service.to_string()))
            .cloned()
            .unwrap_or_else(|| "0".repeat(64)))
    }

    async fn compose_ps(&self, stack: &Stack, service: &str) -> Result<Vec<ComposePsEntry>> {
        self.log(format!("compose_ps({}/{service})", stack.name));
        let guard = self.state.lock().unwrap();
        Ok(guard
            .compose_ps
            .get(&(stack.name.clone(), service.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn compose_up(
        &self,
        stack: &Stack,
        services: &[String],
        _env: &[(String, String)],
        labels: &HashMap<String, String>,
    ) -> Result<()> {
        self.log(format!("compose_up({})", stack.name));
        let _ = labels;
        let mut guard = self.state.lock().unwrap();
        let targets = if services.is_empty() {
            guard
                .compose_services
                .get(&stack.name)
                .cloned()
                .unwrap_or_default()
        } else {
            services.to_vec()
        };
        for service in targets {
            guard.next_id += 1;
            let id = format!("fake-{}", guard.next_id);
            let config_hash = guard
                .compose_hashes
                .get(&(stack.name.clone(), service.clone()))
                .cloned();
            guard.containers.insert(
                id.clone(),
                FakeContainer {
                    id: id.clone(),
                    project: stack.name.clone(),
                    service: service.clone(),
                    state: "running".to_string(),
                    config_hash_label: config_hash,
                    image: "fake/image:latest".to_string(),
                },
            );
            guard.compose_ps.insert(
                (stack.name.clone(), service.clone()),
                vec![ComposePsEntry {
                    container_id: id,
                    state: "running".to_string(),
                }],
            );
        }
        Ok(())
    }

    async fn compose_down(&self, stack: &Stack, services: &[String]) -> Result<()> {
        self.log(format!("compose_down({})", stack.name));
        let mut guard = self.state.lock().unwrap();
        let ids: Vec<String> = guard
            .containers
            .values()
            .filter(|c| c.project == stack.name && (services.is_empty() || services.contains(&c.service)))
            .map(|c| c.id.clone())
            .collect();
        for id in ids {
            if let Some(container) = guard.containers.remove(&id) {
                guard
                    .compose_ps
                    .remove(&(container.project.clone(), container.service.clone()));
            }
        }
        Ok(())
    }

    async fn list_networks(&self, filter: &LabelFilter) -> Result<Vec<String>> {
        self.log("list_networks");
        let _ = filter;
        let guard = self.state.lock().unwrap();
        let mut out: Vec<String> = guard.networks.iter().cloned().collect();
        out.sort();
        Ok(out)
    }

    async fn create_network(&self, name: &str, _labels: &HashMap<String, String>) -> Result<()> {
        self.log(format!("create_network({name})"));
        self.state.lock().unwrap().networks.insert(name.to_string());
        Ok(())
    }

    async fn remove_network(&self, name: &str) -> Result<()> {
        self.log(format!("remove_network({name})"));
        let removed = self.state.lock().unwrap().networks.remove(name);
        if removed {
            Ok(())
        } else {
            Err(Error::not_found("remove network", format!("no such network {name}")))
        }
    }

    async fn list_volumes(&self, filter: &LabelFilter) -> Result<Vec<String>> {
        self.log("list_volumes");
        let _ = filter;
        let guard = self.state.lock().unwrap();
        let mut out: Vec<String> = guard.volumes.keys().cloned().collect();
        out.sort();
        Ok(out)
    }

    async fn create_volume(&self, name: &str, labels: &HashMap<String, String>) -> Result<()> {
        self.log(format!("create_volume({name})"));
        let delay = self.state.lock().unwrap().create_volume_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.state.lock().unwrap().volumes.insert(
            name.to_string(),
            VolumeInspect {
                driver: "local".to_string(),
                options: HashMap::new(),
                labels: labels.clone(),
                mountpoint: None,
            },
        );
        Ok(())
    }

    async fn remove_volume(&self, name: &str) -> Result<()> {
        self.log(format!("remove_volume({name})"));
        let removed = self.state.lock().unwrap().volumes.remove(name);
        if removed.is_some() {
            Ok(())
        } else {
            Err(Error::not_found("remove volume", format!("no such volume {name}")))
        }
    }

    async fn inspect_volume(&self, name: &str) -> Result<VolumeInspect> {
        self.log(format!("inspect_volume({name})"));
        self.state
            .lock()
            .unwrap()
            .volumes
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found("inspect volume", format!("no such volume {name}")))
    }

    async fn run_helper(&self, spec: HelperSpec) -> Result<HelperResult> {
        self.log(format!("run_helper({})", spec.image));
        let mut guard = self.state.lock().unwrap();
        Ok(guard.helper_results.pop_front().unwrap_or(HelperResult {
            exit_code: 0,
            stdout: Vec::new(),
            stderr: Vec::new(),
        }))
    }
}
