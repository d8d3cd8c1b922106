//! Container runtime seam and its Docker implementation

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::container::LogOutput;
use bollard::errors::Error as BollardError;
use bollard::models::{ContainerCreateBody, HostConfig, PortBinding};
use bollard::query_parameters::{
    CreateContainerOptions, InspectContainerOptions, LogsOptions, RemoveContainerOptions,
    StartContainerOptions,
};
use bollard::Docker;
use futures_util::stream::StreamExt;
use tracing::{debug, warn};

/// Path the project tree is mounted at inside the container
pub const CONTAINER_WORKDIR: &str = "/app";

/// Everything needed to start one dev-server container
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Unique container name, also its hostname on the internal network
    pub name: String,
    pub image: String,
    /// Host directory mounted at [`CONTAINER_WORKDIR`]
    pub workdir: PathBuf,
    /// Shell command run with `sh -c`
    pub command: String,
    pub env: Vec<(String, String)>,
    pub port: u16,
    pub network: String,
    pub memory_mb: u64,
    pub cpus: f64,
    /// Publish `port` on 127.0.0.1 of the host
    pub publish_on_loopback: bool,
}

/// Operations the orchestrator needs from a container engine
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create and start a container, returning its id
    async fn launch(&self, spec: &LaunchSpec) -> Result<String>;

    async fn is_running(&self, id: &str) -> Result<bool>;

    /// Combined stdout/stderr, last `tail` lines
    async fn logs(&self, id: &str, tail: usize) -> Result<String>;

    /// Force-remove the container. Removing a container that no longer exists succeeds.
    async fn remove(&self, id: &str) -> Result<()>;
}

pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn connect() -> Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().context("Failed to connect to docker daemon")?;
        Ok(Self { docker })
    }

    fn create_body(spec: &LaunchSpec) -> ContainerCreateBody {
        let port_bindings = spec.publish_on_loopback.then(|| {
            let mut bindings = HashMap::new();
            bindings.insert(
                format!("{}/tcp", spec.port),
                Some(vec![PortBinding {
                    host_ip: Some("127.0.0.1".to_string()),
                    host_port: Some(spec.port.to_string()),
                }]),
            );
            bindings
        });

        let mut labels = HashMap::new();
        labels.insert("codeshot.managed".to_string(), "true".to_string());

        ContainerCreateBody {
            image: Some(spec.image.clone()),
            hostname: Some(spec.name.clone()),
            cmd: Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                spec.command.clone(),
            ]),
            env: Some(
                spec.env
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect(),
            ),
            working_dir: Some(CONTAINER_WORKDIR.to_string()),
            labels: Some(labels),
            host_config: Some(HostConfig {
                binds: Some(vec![format!(
                    "{}:{}",
                    spec.workdir.display(),
                    CONTAINER_WORKDIR
                )]),
                network_mode: Some(spec.network.clone()),
                port_bindings,
                memory: Some((spec.memory_mb * 1024 * 1024) as i64),
                nano_cpus: Some((spec.cpus * 1_000_000_000.0) as i64),
                pids_limit: Some(512),
                cap_drop: Some(vec!["ALL".to_string()]),
                security_opt: Some(vec!["no-new-privileges".to_string()]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

fn is_not_found(err: &BollardError) -> bool {
    matches!(
        err,
        BollardError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn launch(&self, spec: &LaunchSpec) -> Result<String> {
        let options = Some(CreateContainerOptions {
            name: Some(spec.name.clone()),
            ..Default::default()
        });

        let container = self
            .docker
            .create_container(options, Self::create_body(spec))
            .await
            .with_context(|| format!("Failed to create container {}", spec.name))?;
        debug!(id = %container.id, name = %spec.name, "Container created");

        if let Err(e) = self
            .docker
            .start_container(&container.id, None::<StartContainerOptions>)
            .await
        {
            if let Err(remove_err) = self.remove(&container.id).await {
                warn!(id = %container.id, "Failed to remove unstarted container: {:#}", remove_err);
            }
            return Err(e).with_context(|| format!("Failed to start container {}", spec.name));
        }

        Ok(container.id)
    }

    async fn is_running(&self, id: &str) -> Result<bool> {
        match self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
        {
            Ok(info) => Ok(info
                .state
                .and_then(|state| state.running)
                .unwrap_or(false)),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(e).context("Failed to inspect container"),
        }
    }

    async fn logs(&self, id: &str, tail: usize) -> Result<String> {
        let mut stream = self.docker.logs(
            id,
            Some(LogsOptions {
                stdout: true,
                stderr: true,
                ..Default::default()
            }),
        );

        let mut output = String::new();
        while let Some(item) = stream.next().await {
            match item {
                Ok(LogOutput::StdOut { message })
                | Ok(LogOutput::StdErr { message })
                | Ok(LogOutput::Console { message }) => {
                    output.push_str(&String::from_utf8_lossy(&message));
                }
                Ok(_) => {}
                Err(e) if is_not_found(&e) => break,
                Err(e) => return Err(e).context("Failed to read container logs"),
            }
        }

        Ok(tail_lines(&output, tail))
    }

    async fn remove(&self, id: &str) -> Result<()> {
        match self
            .docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    v: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove container {}", id)),
        }
    }
}

/// Keep the last `n` lines of `text`
pub fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(loopback: bool) -> LaunchSpec {
        LaunchSpec {
            name: "codeshot-test".to_string(),
            image: "node:20-alpine".to_string(),
            workdir: PathBuf::from("/tmp/codeshot-projects/p1"),
            command: "npx vite".to_string(),
            env: vec![("PORT".to_string(), "24000".to_string())],
            port: 24000,
            network: "codeshot-internal".to_string(),
            memory_mb: 1024,
            cpus: 1.5,
            publish_on_loopback: loopback,
        }
    }

    #[test]
    fn test_create_body_limits_and_mount() {
        let body = DockerRuntime::create_body(&spec(false));
        let host = body.host_config.unwrap();

        assert_eq!(host.memory, Some(1024 * 1024 * 1024));
        assert_eq!(host.nano_cpus, Some(1_500_000_000));
        assert_eq!(
            host.binds.unwrap(),
            vec!["/tmp/codeshot-projects/p1:/app".to_string()]
        );
        assert_eq!(host.network_mode.as_deref(), Some("codeshot-internal"));
        assert!(host.port_bindings.is_none());
        assert_eq!(body.env.unwrap(), vec!["PORT=24000".to_string()]);
        assert_eq!(body.hostname.as_deref(), Some("codeshot-test"));
    }

    #[test]
    fn test_loopback_publishes_port() {
        let body = DockerRuntime::create_body(&spec(true));
        let bindings = body.host_config.unwrap().port_bindings.unwrap();
        let binding = bindings["24000/tcp"].as_ref().unwrap();
        assert_eq!(binding[0].host_ip.as_deref(), Some("127.0.0.1"));
        assert_eq!(binding[0].host_port.as_deref(), Some("24000"));
    }

    #[test]
    fn test_tail_lines() {
        assert_eq!(tail_lines("a\nb\nc\n", 2), "b\nc");
        assert_eq!(tail_lines("a", 10), "a");
        assert_eq!(tail_lines("", 3), "");
    }
}
