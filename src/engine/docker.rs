//! Concrete [`Engine`] implementation over the `docker` CLI (or any
//! docker-compatible binary resolved at construction time).

use super::process::{find_engine_binary, ProcessExecutor};
use super::{
    ComposePsEntry, ContainerInspect, ContainerSummary, Engine, HelperResult, HelperSpec,
    LabelFilter, VolumeInspect,
};
use crate::cancellation::CancellationToken;
use crate::errors::{Error, Result};
use crate::manifest::Stack;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// Shells out to `docker` (or a compatible binary) for every [`Engine`]
/// operation. Stateless with respect to engine resources: the only state it
/// carries is the cancellation token every subprocess watches, per §5's
/// "Engine Client is stateless" guarantee.
#[derive(Debug, Clone)]
pub struct DockerEngine {
    executor: ProcessExecutor,
}

impl DockerEngine {
    /// Resolve `docker` on `PATH` and build a client around it, signalling
    /// `cancellation` to every subprocess it spawns.
    pub fn new(command_timeout: Duration, cancellation: CancellationToken) -> Result<Self> {
        let binary = find_engine_binary("docker")?;
        Self::with_binary(binary, command_timeout, cancellation)
    }

    /// Build a client around an explicit binary path (e.g. a `podman` shim).
    pub fn with_binary(
        binary: std::path::PathBuf,
        command_timeout: Duration,
        cancellation: CancellationToken,
    ) -> Result<Self> {
        Ok(Self {
            executor: ProcessExecutor::new(binary, cancellation).with_default_timeout(command_timeout),
        })
    }

    fn compose_base_args(stack: &Stack) -> Vec<String> {
        let mut args = vec![
            "compose".to_string(),
            "--project-name".to_string(),
            stack.project_name().to_string(),
        ];
        for file in &stack.compose_files {
            args.push("--file".to_string());
            args.push(stack.root_dir.join(file).display().to_string());
        }
        for profile in &stack.profiles {
            args.push("--profile".to_string());
            args.push(profile.clone());
        }
        for env_file in &stack.env_files {
            args.push("--env-file".to_string());
            args.push(stack.root_dir.join(env_file).display().to_string());
        }
        args
    }

    fn labels_args(labels: &HashMap<String, String>) -> Vec<String> {
        let mut keys: Vec<&String> = labels.keys().collect();
        keys.sort();
        keys.into_iter()
            .flat_map(|k| vec!["--label".to_string(), format!("{k}={}", labels[k])])
            .collect()
    }

    fn volume_mount_args(spec: &HelperSpec) -> Vec<String> {
        spec.volume_mounts
            .iter()
            .flat_map(|(volume, path)| {
                vec![
                    "--volume".to_string(),
                    format!("{volume}:{}", path.display()),
                ]
            })
            .collect()
    }
}

#[async_trait]
impl Engine for DockerEngine {
    async fn check_daemon(&self) -> Result<()> {
        self.executor
            .execute(
                "check daemon",
                &[
                    "system".to_string(),
                    "info".to_string(),
                    "--format".to_string(),
                    "{{.ServerVersion}}".to_string(),
                ],
                None,
            )
            .await
            .map(|_| ())
            .map_err(|e| Error::unavailable("check daemon", e.message))
    }

    async fn list_containers(&self, filter: &LabelFilter) -> Result<Vec<ContainerSummary>> {
        let mut args = vec![
            "ps".to_string(),
            "--all".to_string(),
            "--format".to_string(),
            "{{json .}}".to_string(),
        ];
        for label in &filter.labels {
            args.push("--filter".to_string());
            args.push(format!("label={label}"));
        }
        let out = self.executor.execute("list containers", &args, None).await?;

        #[derive(serde::Deserialize)]
        struct Row {
            #[serde(rename = "ID")]
            id: String,
            #[serde(rename = "Names")]
            names: String,
            #[serde(rename = "State")]
            state: String,
            #[serde(rename = "Labels")]
            #[serde(default)]
            labels: String,
        }

        let mut summaries = Vec::new();
        for line in out.stdout.lines().filter(|l| !l.trim().is_empty()) {
            let row: Row = serde_json::from_str(line)
                .map_err(|e| Error::internal("parse ps output", e.to_string()))?;
            let labels = parse_label_string(&row.labels);
            let (project, service) = match (
                labels.get("com.docker.compose.project"),
                labels.get("com.docker.compose.service"),
            ) {
                (Some(p), Some(s)) => (p.clone(), s.clone()),
                _ => split_compose_name(&row.names),
            };
            summaries.push(ContainerSummary {
                project,
                service,
                name: row.names,
                state: row.state,
                id: row.id,
            });
        }
        Ok(summaries)
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerInspect> {
        let out = self
            .executor
            .execute(
                "inspect container",
                &[
                    "inspect".to_string(),
                    "--format".to_string(),
                    format!(
                        "{{{{index .Config.Labels \"{}\"}}}}\t{{{{.Config.Image}}}}\t{{{{.Created}}}}\t{{{{.State.Running}}}}",
                        crate::labels::SERVICE_CONFIG_HASH
                    ),
                    id.to_string(),
                ],
                None,
            )
            .await
            .map_err(|e| {
                if e.message.contains("No such") {
                    Error::not_found("inspect container", format!("container {id} not found"))
                } else {
                    e
                }
            })?;

        let mut parts = out.stdout.trim().splitn(4, '\t');
        let hash = parts.next().unwrap_or("").to_string();
        let image = parts.next().unwrap_or("").to_string();
        let created_at = parts.next().unwrap_or("").to_string();
        let running = parts.next().unwrap_or("false") == "true";

        Ok(ContainerInspect {
            config_hash_label: if hash.is_empty() { None } else { Some(hash) },
            image,
            created_at,
            running,
        })
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        self.executor
            .execute(
                &format!("remove container ({id})"),
                &["rm".to_string(), "--force".to_string(), id.to_string()],
                None,
            )
            .await
            .map(|_| ())
            .map_err(|e| map_not_found(e, "container"))
    }

    async fn compose_list_services(&self, stack: &Stack) -> Result<Vec<String>> {
        let mut args = Self::compose_base_args(stack);
        args.extend(["config".to_string(), "--services".to_string()]);
        let out = self
            .executor
            .execute(&format!("compose list services ({})", stack.name), &args, None)
            .await?;
        Ok(out
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn compose_config_hash(
        &self,
        stack: &Stack,
        service: &str,
        env: &[(String, String)],
    ) -> Result<String> {
        let mut args = Self::compose_base_args(stack);
        args.extend(["config".to_string(), service.to_string()]);
        let mut config = super::ExecutionConfig::default();
        for (k, v) in env {
            config.environment.insert(k.clone(), v.clone());
        }
        let out = self
            .executor
            .execute(
                &format!("compose config hash ({}/{service})", stack.name),
                &args,
                Some(config),
            )
            .await?;
        Ok(hex::encode(sha256(out.stdout.as_bytes())))
    }

    async fn compose_ps(&self, stack: &Stack, service: &str) -> Result<Vec<ComposePsEntry>> {
        let mut args = Self::compose_base_args(stack);
        args.extend([
            "ps".to_string(),
            "--all".to_string(),
            "--format".to_string(),
            "{{json .}}".to_string(),
            service.to_string(),
        ]);
        let out = self
            .executor
            .execute(&format!("compose ps ({}/{service})", stack.name), &args, None)
            .await?;

        #[derive(serde::Deserialize)]
        struct Row {
            #[serde(rename = "ID")]
            id: String,
            #[serde(rename = "State")]
            state: String,
        }

        let mut entries = Vec::new();
        for line in out.stdout.lines().filter(|l| !l.trim().is_empty()) {
            let row: Row = serde_json::from_str(line)
                .map_err(|e| Error::internal("parse compose ps output", e.to_string()))?;
            entries.push(ComposePsEntry {
                container_id: row.id,
                state: row.state,
            });
        }
        Ok(entries)
    }

    async fn compose_up(
        &self,
        stack: &Stack,
        services: &[String],
        env: &[(String, String)],
        labels: &HashMap<String, String>,
    ) -> Result<()> {
        let mut args = Self::compose_base_args(stack);
        args.extend(["up".to_string(), "--detach".to_string()]);
        for (k, v) in labels {
            args.push("--label".to_string());
            args.push(format!("{k}={v}"));
        }
        args.extend(services.iter().cloned());

        let mut config = super::ExecutionConfig::default();
        for (k, v) in env {
            config.environment.insert(k.clone(), v.clone());
        }
        self.executor
            .execute(&format!("compose up ({})", stack.name), &args, Some(config))
            .await
            .map(|_| ())
    }

    async fn compose_down(&self, stack: &Stack, services: &[String]) -> Result<()> {
        let mut args = Self::compose_base_args(stack);
        args.push("rm".to_string());
        args.push("--force".to_string());
        args.push("--stop".to_string());
        args.extend(services.iter().cloned());
        self.executor
            .execute(&format!("compose down ({})", stack.name), &args, None)
            .await
            .map(|_| ())
    }

    async fn list_networks(&self, filter: &LabelFilter) -> Result<Vec<String>> {
        let mut args = vec![
            "network".to_string(),
            "ls".to_string(),
            "--format".to_string(),
            "{{.Name}}".to_string(),
        ];
        for label in &filter.labels {
            args.push("--filter".to_string());
            args.push(format!("label={label}"));
        }
        let out = self.executor.execute("list networks", &args, None).await?;
        Ok(out.stdout.lines().map(str::to_string).collect())
    }

    async fn create_network(&self, name: &str, labels: &HashMap<String, String>) -> Result<()> {
        let mut args = vec!["network".to_string(), "create".to_string()];
        args.extend(Self::labels_args(labels));
        args.push(name.to_string());
        self.executor
            .execute(&format!("create network ({name})"), &args, None)
            .await
            .map(|_| ())
    }

    async fn remove_network(&self, name: &str) -> Result<()> {
        self.executor
            .execute(
                &format!("remove network ({name})"),
                &["network".to_string(), "rm".to_string(), name.to_string()],
                None,
            )
            .await
            .map(|_| ())
            .map_err(|e| map_not_found(e, "network"))
    }

    async fn list_volumes(&self, filter: &LabelFilter) -> Result<Vec<String>> {
        let mut args = vec![
            "volume".to_string(),
            "ls".to_string(),
            "--format".to_string(),
            "{{.Name}}".to_string(),
        ];
        for label in &filter.labels {
            args.push("--filter".to_string());
            args.push(format!("label={label}"));
        }
        let out = self.executor.execute("list volumes", &args, None).await?;
        Ok(out.stdout.lines().map(str::to_string).collect())
    }

    async fn create_volume(&self, name: &str, labels: &HashMap<String, String>) -> Result<()> {
        let mut args = vec!["volume".to_string(), "create".to_string()];
        args.extend(Self::labels_args(labels));
        args.push(name.to_string());
        self.executor
            .execute(&format!("create volume ({name})"), &args, None)
            .await
            .map(|_| ())
    }

    async fn remove_volume(&self, name: &str) -> Result<()> {
        self.executor
            .execute(
                &format!("remove volume ({name})"),
                &["volume".to_string(), "rm".to_string(), name.to_string()],
                None,
            )
            .await
            .map(|_| ())
            .map_err(|e| {
                if e.message.contains("volume is in use") {
                    Error::conflict("remove volume", e.message)
                } else {
                    map_not_found(e, "volume")
                }
            })
    }

    async fn inspect_volume(&self, name: &str) -> Result<VolumeInspect> {
        let out = self
            .executor
            .execute(
                "inspect volume",
                &[
                    "volume".to_string(),
                    "inspect".to_string(),
                    "--format".to_string(),
                    "{{json .}}".to_string(),
                    name.to_string(),
                ],
                None,
            )
            .await
            .map_err(|e| map_not_found(e, "volume"))?;

        #[derive(serde::Deserialize)]
        struct Row {
            #[serde(rename = "Driver")]
            driver: String,
            #[serde(rename = "Options", default)]
            options: Option<HashMap<String, String>>,
            #[serde(rename = "Labels", default)]
            labels: Option<HashMap<String, String>>,
            #[serde(rename = "Mountpoint", default)]
            mountpoint: Option<String>,
        }
        let row: Row = serde_json::from_str(out.stdout.trim())
            .map_err(|e| Error::internal("parse volume inspect", e.to_string()))?;
        Ok(VolumeInspect {
            driver: row.driver,
            options: row.options.unwrap_or_default(),
            labels: row.labels.unwrap_or_default(),
            mountpoint: row.mountpoint,
        })
    }

    async fn run_helper(&self, spec: HelperSpec) -> Result<HelperResult> {
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "--interactive".to_string(),
            "--workdir".to_string(),
            spec.workdir.display().to_string(),
        ];
        args.extend(Self::volume_mount_args(&spec));
        args.extend(Self::labels_args(&spec.labels));
        args.push(spec.image.clone());
        args.extend(spec.argv.iter().cloned());

        let stream = self
            .executor
            .execute_binary("run helper", &args, spec.stdin, None)
            .await?;
        Ok(HelperResult {
            exit_code: stream.exit_code,
            stdout: stream.stdout,
            stderr: stream.stderr,
        })
    }
}

fn map_not_found(e: Error, kind: &str) -> Error {
    if e.message.contains("No such") || e.message.contains("not found") {
        Error::not_found(e.operation, format!("{kind} not found"))
    } else {
        e
    }
}

fn parse_label_string(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Fallback when compose labels are unavailable: `docker ps` reports
/// compose containers as `<project>-<service>-<n>`.
fn split_compose_name(name: &str) -> (String, String) {
    let trimmed = name.trim_start_matches('/');
    let mut parts = trimmed.rsplitn(3, '-');
    let _instance = parts.next();
    let service = parts.next().unwrap_or(trimmed).to_string();
    let project = parts.next().unwrap_or("").to_string();
    (project, service)
}

fn sha256(bytes: &[u8]) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_compose_container_name() {
        assert_eq!(
            split_compose_name("web-nginx-1"),
            ("web".to_string(), "nginx".to_string())
        );
    }

    #[test]
    fn splits_compose_name_with_hyphenated_service() {
        assert_eq!(
            split_compose_name("web-my-service-1"),
            ("web-my".to_string(), "service".to_string())
        );
    }
}
