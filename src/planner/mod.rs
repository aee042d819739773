//! The Planner: turns `(Manifest, CurrentState)` into a typed, renderable
//! [`Plan`].

pub mod render;

pub use render::render_plan;

use crate::manifest::Manifest;
use crate::state::CurrentState;
use std::collections::HashSet;

/// What an [`Operation`] targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// A compose service within a stack.
    Service,
    /// A named network.
    Network,
    /// A named volume.
    Volume,
    /// A fileset sync.
    Fileset,
}

/// What an [`Operation`] does to its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// The target doesn't exist and must be created.
    Create,
    /// The target exists but must be torn down and recreated.
    Recreate,
    /// The target's content (not its existence) must be pushed (fileset
    /// sync).
    Update,
    /// The target exists in the engine but not the manifest.
    Delete,
    /// The target already matches desired state; nothing to do.
    Noop,
}

/// A reference to the operation's target, qualified by [`Kind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Resource kind.
    pub kind: Kind,
    /// Owning stack, for `Kind::Service`; empty otherwise.
    pub stack: String,
    /// Resource name (service/network/volume/fileset name).
    pub name: String,
}

impl Target {
    /// A dependency key identifying this target uniquely across the Plan.
    #[must_use]
    pub fn key(&self) -> (Kind, String, String) {
        (self.kind, self.stack.clone(), self.name.clone())
    }
}

/// One unit of planned work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    /// What this operation targets.
    pub target: Target,
    /// What it does.
    pub action: Action,
    /// Human-readable justification, shown in the rendered plan.
    pub reason: String,
    /// Targets (by key) that must complete before this operation starts.
    pub deps: Vec<(Kind, String, String)>,
}

/// The full set of operations the Applier will execute, grouped for
/// rendering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    /// Service-targeted operations.
    pub services: Vec<Operation>,
    /// Fileset-targeted operations.
    pub filesets: Vec<Operation>,
    /// Network-targeted operations.
    pub networks: Vec<Operation>,
    /// Volume-targeted operations.
    pub volumes: Vec<Operation>,
}

impl Plan {
    /// All operations, in the deterministic rendering order: networks,
    /// volumes, filesets, services. This is also the order the Applier's
    /// dependency graph requires them satisfiable in.
    #[must_use]
    pub fn all_operations(&self) -> Vec<&Operation> {
        self.networks
            .iter()
            .chain(self.volumes.iter())
            .chain(self.filesets.iter())
            .chain(self.services.iter())
            .collect()
    }

    /// True if every operation is a noop.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.all_operations().iter().all(|op| op.action == Action::Noop)
    }
}

/// Produce a Plan reconciling `manifest` against `current`.
///
/// Missing config-hash labels are always treated as "recreate required",
/// never as an implicit noop, since a pre-upgrade deployment may have no
/// label history at all.
#[must_use]
pub fn plan(manifest: &Manifest, current: &CurrentState) -> Plan {
    let mut result = Plan::default();

    let current_networks: HashSet<&str> = current.networks.iter().map(String::as_str).collect();
    let desired_networks: HashSet<&str> = manifest.networks.iter().map(|n| n.name.as_str()).collect();

    for network in &manifest.networks {
        if !current_networks.contains(network.name.as_str()) {
            result.networks.push(Operation {
                target: Target {
                    kind: Kind::Network,
                    stack: String::new(),
                    name: network.name.clone(),
                },
                action: Action::Create,
                reason: "absent from engine".to_string(),
                deps: Vec::new(),
            });
        }
    }
    for name in &current.networks {
        if !desired_networks.contains(name.as_str()) {
            result.networks.push(Operation {
                target: Target {
                    kind: Kind::Network,
                    stack: String::new(),
                    name: name.clone(),
                },
                action: Action::Delete,
                reason: "not in manifest".to_string(),
                deps: Vec::new(),
            });
        }
    }

    let current_volumes: HashSet<&str> = current.volumes.iter().map(String::as_str).collect();
    let desired_volumes: HashSet<&str> = manifest.volumes.iter().map(|v| v.name.as_str()).collect();

    for volume in &manifest.volumes {
        if !current_volumes.contains(volume.name.as_str()) {
            result.volumes.push(Operation {
                target: Target {
                    kind: Kind::Volume,
                    stack: String::new(),
                    name: volume.name.clone(),
                },
                action: Action::Create,
                reason: "absent from engine".to_string(),
                deps: Vec::new(),
            });
        }
    }
    for name in &current.volumes {
        if !desired_volumes.contains(name.as_str()) {
            result.volumes.push(Operation {
                target: Target {
                    kind: Kind::Volume,
                    stack: String::new(),
                    name: name.clone(),
                },
                action: Action::Delete,
                reason: "not in manifest".to_string(),
                deps: Vec::new(),
            });
        }
    }

    // Filesets depend on their target volume's create (if one is planned);
    // sibling filesets on the same volume are deliberately left unordered.
    let volume_create_dep = |volume_name: &str| -> Vec<(Kind, String, String)> {
        if result
            .volumes
            .iter()
            .any(|op| op.action == Action::Create && op.target.name == volume_name)
        {
            vec![(Kind::Volume, String::new(), volume_name.to_string())]
        } else {
            Vec::new()
        }
    };

    // Absent from `current.filesets` (never probed) defaults to "changed",
    // the conservative choice.
    let fileset_changed: std::collections::HashMap<&str, bool> = current
        .filesets
        .iter()
        .map(|f| (f.name.as_str(), f.changed))
        .collect();

    for fileset in &manifest.filesets {
        let changed = fileset_changed.get(fileset.name.as_str()).copied().unwrap_or(true);
        let (action, reason) = if changed {
            (Action::Update, "diff against remote volume contents".to_string())
        } else {
            (Action::Noop, "remote already matches local tree".to_string())
        };
        result.filesets.push(Operation {
            target: Target {
                kind: Kind::Fileset,
                stack: String::new(),
                name: fileset.name.clone(),
            },
            action,
            reason,
            deps: volume_create_dep(&fileset.target_volume),
        });
    }

    let restarting: HashSet<(&str, &str)> = manifest
        .filesets
        .iter()
        .flat_map(|f| f.restart_services.iter().map(move |s| (f.name.as_str(), s.as_str())))
        .collect();

    for service_state in &current.services {
        let mut deps = Vec::new();
        let triggering_fileset = manifest.filesets.iter().find(|f| {
            restarting
                .iter()
                .any(|(fname, sname)| *fname == f.name && *sname == service_state.service)
                && fileset_changed.get(f.name.as_str()).copied().unwrap_or(true)
        });
        if let Some(fileset) = triggering_fileset {
            deps.push((Kind::Fileset, String::new(), fileset.name.clone()));
        }

        let (action, reason) = match &service_state.running_container_id {
            None => (Action::Create, "no running container".to_string()),
            Some(_) => match &service_state.running_config_hash {
                None => (
                    Action::Recreate,
                    "running container has no config-hash label".to_string(),
                ),
                Some(running_hash) if running_hash != &service_state.desired_config_hash => (
                    Action::Recreate,
                    "config hash changed".to_string(),
                ),
                Some(_) if triggering_fileset.is_some() => (
                    Action::Recreate,
                    format!(
                        "fileset {} changed",
                        triggering_fileset.map(|f| f.name.as_str()).unwrap_or_default()
                    ),
                ),
                Some(_) => (Action::Noop, "up to date".to_string()),
            },
        };

        result.services.push(Operation {
            target: Target {
                kind: Kind::Service,
                stack: service_state.stack.clone(),
                name: service_state.service.clone(),
            },
            action,
            reason,
            deps,
        });
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::Identifier;
    use crate::manifest::{Network, Volume};
    use crate::state::{FilesetState, ServiceState};

    fn empty_manifest() -> Manifest {
        Manifest {
            identifier: Identifier::new("demo").unwrap(),
            stacks: vec![],
            networks: vec![],
            volumes: vec![],
            filesets: vec![],
        }
    }

    #[test]
    fn new_network_is_created() {
        let mut manifest = empty_manifest();
        manifest.networks.push(Network {
            name: "net-a".to_string(),
        });
        let current = CurrentState::default();
        let result = plan(&manifest, &current);
        assert_eq!(result.networks.len(), 1);
        assert_eq!(result.networks[0].action, Action::Create);
    }

    #[test]
    fn foreign_network_is_deleted() {
        let manifest = empty_manifest();
        let current = CurrentState {
            networks: vec!["net-old".to_string()],
            ..Default::default()
        };
        let result = plan(&manifest, &current);
        assert_eq!(result.networks.len(), 1);
        assert_eq!(result.networks[0].action, Action::Delete);
    }

    #[test]
    fn service_with_no_container_is_created() {
        let manifest = empty_manifest();
        let current = CurrentState {
            services: vec![ServiceState {
                stack: "web".to_string(),
                service: "nginx".to_string(),
                desired_config_hash: "h1".to_string(),
                running_container_id: None,
                running_config_hash: None,
            }],
            ..Default::default()
        };
        let result = plan(&manifest, &current);
        assert_eq!(result.services[0].action, Action::Create);
    }

    #[test]
    fn missing_config_hash_label_forces_recreate_not_noop() {
        let manifest = empty_manifest();
        let current = CurrentState {
            services: vec![ServiceState {
                stack: "web".to_string(),
                service: "nginx".to_string(),
                desired_config_hash: "h1".to_string(),
                running_container_id: Some("c1".to_string()),
                running_config_hash: None,
            }],
            ..Default::default()
        };
        let result = plan(&manifest, &current);
        assert_eq!(result.services[0].action, Action::Recreate);
    }

    #[test]
    fn matching_hash_is_noop() {
        let manifest = empty_manifest();
        let current = CurrentState {
            services: vec![ServiceState {
                stack: "web".to_string(),
                service: "nginx".to_string(),
                desired_config_hash: "h1".to_string(),
                running_container_id: Some("c1".to_string()),
                running_config_hash: Some("h1".to_string()),
            }],
            ..Default::default()
        };
        let result = plan(&manifest, &current);
        assert_eq!(result.services[0].action, Action::Noop);
    }

    #[test]
    fn changed_hash_recreates() {
        let manifest = empty_manifest();
        let current = CurrentState {
            services: vec![ServiceState {
                stack: "web".to_string(),
                service: "nginx".to_string(),
                desired_config_hash: "h2".to_string(),
                running_container_id: Some("c1".to_string()),
                running_config_hash: Some("h1".to_string()),
            }],
            ..Default::default()
        };
        let result = plan(&manifest, &current);
        assert_eq!(result.services[0].action, Action::Recreate);
    }

    #[test]
    fn fileset_sync_depends_on_its_volume_create() {
        let mut manifest = empty_manifest();
        manifest.volumes.push(Volume {
            name: "data".to_string(),
        });
        manifest.filesets.push(crate::manifest::Fileset {
            name: "assets".to_string(),
            source_dir_abs: "/tmp/assets".into(),
            target_volume: "data".to_string(),
            target_path_abs: "/srv/assets".into(),
            excludes: vec![],
            restart_services: vec![],
        });
        let current = CurrentState::default();
        let result = plan(&manifest, &current);
        assert_eq!(result.volumes[0].action, Action::Create);
        assert_eq!(
            result.filesets[0].deps,
            vec![(Kind::Volume, String::new(), "data".to_string())]
        );
    }

    fn fileset_manifest_with_restart() -> Manifest {
        let mut manifest = empty_manifest();
        manifest.volumes.push(Volume {
            name: "data".to_string(),
        });
        manifest.filesets.push(crate::manifest::Fileset {
            name: "assets".to_string(),
            source_dir_abs: "/tmp/assets".into(),
            target_volume: "data".to_string(),
            target_path_abs: "/srv/assets".into(),
            excludes: vec![],
            restart_services: vec!["nginx".to_string()],
        });
        manifest
    }

    fn service_on_hash(hash: &str) -> ServiceState {
        ServiceState {
            stack: "web".to_string(),
            service: "nginx".to_string(),
            desired_config_hash: hash.to_string(),
            running_container_id: Some("c1".to_string()),
            running_config_hash: Some(hash.to_string()),
        }
    }

    #[test]
    fn restart_services_fileset_forces_recreate_when_changed() {
        let manifest = fileset_manifest_with_restart();
        let current = CurrentState {
            volumes: vec!["data".to_string()],
            filesets: vec![FilesetState {
                name: "assets".to_string(),
                changed: true,
            }],
            services: vec![service_on_hash("h1")],
            ..Default::default()
        };
        let result = plan(&manifest, &current);
        assert_eq!(result.services[0].action, Action::Recreate);
        assert_eq!(result.services[0].reason, "fileset assets changed");
        assert_eq!(result.filesets[0].action, Action::Update);
    }

    #[test]
    fn restart_services_fileset_unchanged_is_noop() {
        let manifest = fileset_manifest_with_restart();
        let current = CurrentState {
            volumes: vec!["data".to_string()],
            filesets: vec![FilesetState {
                name: "assets".to_string(),
                changed: false,
            }],
            services: vec![service_on_hash("h1")],
            ..Default::default()
        };
        let result = plan(&manifest, &current);
        assert_eq!(result.services[0].action, Action::Noop);
        assert_eq!(result.filesets[0].action, Action::Noop);
    }

    #[test]
    fn fileset_diff_not_yet_probed_defaults_to_update() {
        let manifest = fileset_manifest_with_restart();
        let current = CurrentState {
            volumes: vec!["data".to_string()],
            services: vec![service_on_hash("h1")],
            ..Default::default()
        };
        let result = plan(&manifest, &current);
        assert_eq!(result.filesets[0].action, Action::Update);
        assert_eq!(result.services[0].action, Action::Recreate);
    }
}
