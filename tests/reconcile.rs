//! End-to-end reconciliation scenarios driven against [`FakeEngine`]:
//! probe → plan → apply, exercising the seams the unit tests don't connect.

use dockform_core::applier::{Applier, NoopProgressSink, OutcomeStatus};
use dockform_core::cancellation::CancellationToken;
use dockform_core::config::RuntimeConfig;
use dockform_core::identifier::Identifier;
use dockform_core::manifest::{Manifest, Network, Stack, Volume};
use dockform_core::planner::{plan, render_plan, Action};
use dockform_core::testing::FakeEngine;
use dockform_core::{destroy, state};

fn stack(name: &str) -> Stack {
    Stack {
        name: name.to_string(),
        root_dir: std::env::temp_dir(),
        compose_files: vec![],
        profiles: vec![],
        env_files: vec![],
        inline_env: vec![],
        sops_refs: vec![],
        project_name: None,
    }
}

fn manifest(stacks: Vec<Stack>, networks: Vec<&str>, volumes: Vec<&str>) -> Manifest {
    Manifest {
        identifier: Identifier::new("demo").unwrap(),
        stacks,
        networks: networks
            .into_iter()
            .map(|n| Network { name: n.to_string() })
            .collect(),
        volumes: volumes
            .into_iter()
            .map(|v| Volume { name: v.to_string() })
            .collect(),
        filesets: vec![],
    }
}

#[tokio::test]
async fn cold_apply_creates_everything_from_scratch() {
    let engine = FakeEngine::new();
    engine.seed_compose_services("web", &["nginx"]);
    engine.seed_desired_hash("web", "nginx", "hash-1");

    let m = manifest(vec![stack("web")], vec!["net-a"], vec!["data"]);
    let config = RuntimeConfig::sequential();
    let token = CancellationToken::new();

    let current = state::probe(&engine, &m, &config, &token).await.unwrap();
    let p = plan(&m, &current);
    assert!(!p.is_empty());
    assert_eq!(p.networks[0].action, Action::Create);
    assert_eq!(p.volumes[0].action, Action::Create);
    assert_eq!(p.services[0].action, Action::Create);

    let sink = NoopProgressSink;
    let applier = Applier::new(&engine, &m, &config, &m.identifier, &sink, &token);
    let outcome = applier.apply(&p).await.unwrap();
    assert!(outcome.succeeded());

    let current_after = state::probe(&engine, &m, &config, &token).await.unwrap();
    assert_eq!(current_after.networks, vec!["net-a"]);
    assert_eq!(current_after.volumes, vec!["data"]);
    assert_eq!(current_after.services[0].running_container_id.is_some(), true);
}

#[tokio::test]
async fn reapplying_unchanged_state_is_a_full_noop() {
    let engine = FakeEngine::new();
    engine.seed_network("net-a");
    engine.seed_volume("data");
    engine.seed_compose_services("web", &["nginx"]);
    engine.seed_desired_hash("web", "nginx", "hash-1");
    engine.seed_running_container("web", "nginx", Some("hash-1"));

    let m = manifest(vec![stack("web")], vec!["net-a"], vec!["data"]);
    let config = RuntimeConfig::sequential();
    let token = CancellationToken::new();

    let current = state::probe(&engine, &m, &config, &token).await.unwrap();
    let p = plan(&m, &current);
    assert!(p.is_empty());
    assert_eq!(p.services[0].action, Action::Noop);

    let sink = NoopProgressSink;
    let applier = Applier::new(&engine, &m, &config, &m.identifier, &sink, &token);
    let outcome = applier.apply(&p).await.unwrap();
    assert!(outcome.succeeded());
    assert!(outcome.operations.is_empty(), "noop ops are never dispatched");
}

#[tokio::test]
async fn changed_compose_hash_recreates_the_service() {
    let engine = FakeEngine::new();
    engine.seed_compose_services("web", &["nginx"]);
    engine.seed_desired_hash("web", "nginx", "hash-2");
    engine.seed_running_container("web", "nginx", Some("hash-1"));

    let m = manifest(vec![stack("web")], vec![], vec![]);
    let config = RuntimeConfig::sequential();
    let token = CancellationToken::new();

    let current = state::probe(&engine, &m, &config, &token).await.unwrap();
    let p = plan(&m, &current);
    assert_eq!(p.services[0].action, Action::Recreate);
    assert_eq!(p.services[0].reason, "config hash changed");

    let sink = NoopProgressSink;
    let applier = Applier::new(&engine, &m, &config, &m.identifier, &sink, &token);
    let outcome = applier.apply(&p).await.unwrap();
    assert!(outcome.succeeded());
    assert!(engine.calls().iter().any(|c| c.starts_with("compose_up")));
}

#[tokio::test]
async fn missing_config_hash_label_forces_recreate_end_to_end() {
    let engine = FakeEngine::new();
    engine.seed_compose_services("web", &["nginx"]);
    engine.seed_desired_hash("web", "nginx", "hash-1");
    // Pre-upgrade container: running, but never labeled.
    engine.seed_running_container("web", "nginx", None);

    let m = manifest(vec![stack("web")], vec![], vec![]);
    let config = RuntimeConfig::sequential();
    let token = CancellationToken::new();

    let current = state::probe(&engine, &m, &config, &token).await.unwrap();
    let p = plan(&m, &current);
    assert_eq!(p.services[0].action, Action::Recreate);
    assert_eq!(p.services[0].reason, "running container has no config-hash label");
}

#[tokio::test]
async fn destroy_removes_every_labeled_resource_and_leaves_render_empty() {
    let engine = FakeEngine::new();
    engine.seed_network("net-a");
    engine.seed_volume("data");
    engine.seed_compose_services("web", &["nginx"]);
    engine.seed_desired_hash("web", "nginx", "hash-1");
    engine.seed_running_container("web", "nginx", Some("hash-1"));

    let identifier = Identifier::new("demo").unwrap();
    let config = RuntimeConfig::sequential();
    let token = CancellationToken::new();

    let outcome = destroy(&engine, &identifier, &config, &token).await.unwrap();
    assert_eq!(outcome.removed_services, vec!["web/nginx"]);
    assert_eq!(outcome.removed_networks, vec!["net-a"]);
    assert_eq!(outcome.removed_volumes, vec!["data"]);
    assert!(outcome.stuck_volumes.is_empty());
    assert!(engine
        .list_containers(&dockform_core::engine::LabelFilter::default())
        .await
        .unwrap()
        .is_empty());

    let empty_manifest = manifest(vec![], vec![], vec![]);
    let current = state::probe(&engine, &empty_manifest, &config, &token).await.unwrap();
    assert!(current.networks.is_empty());
    assert!(current.volumes.is_empty());
    assert_eq!(render_plan(&plan(&empty_manifest, &current)), "");
}

#[tokio::test]
async fn independent_stacks_converge_concurrently() {
    let engine = FakeEngine::new();
    engine.seed_compose_services("web", &["nginx"]);
    engine.seed_desired_hash("web", "nginx", "hash-1");
    engine.seed_compose_services("api", &["app"]);
    engine.seed_desired_hash("api", "app", "hash-2");

    let m = manifest(vec![stack("web"), stack("api")], vec![], vec![]);
    let config = RuntimeConfig::default();
    let token = CancellationToken::new();

    let current = state::probe(&engine, &m, &config, &token).await.unwrap();
    let p = plan(&m, &current);
    assert_eq!(p.services.len(), 2);
    assert!(p.services.iter().all(|op| op.action == Action::Create));

    let sink = NoopProgressSink;
    let applier = Applier::new(&engine, &m, &config, &m.identifier, &sink, &token);
    let outcome = applier.apply(&p).await.unwrap();
    assert!(outcome.succeeded());
    assert!(outcome
        .operations
        .iter()
        .all(|o| o.status == OutcomeStatus::Ok));

    let current_after = state::probe(&engine, &m, &config, &token).await.unwrap();
    assert_eq!(current_after.services.len(), 2);
    assert!(current_after
        .services
        .iter()
        .all(|s| s.running_container_id.is_some()));
}
