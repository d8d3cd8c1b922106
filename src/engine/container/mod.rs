//! Container orchestrator for project-style languages
//!
//! `serve` reserves a port, writes the project tree, launches a dev-server
//! container and waits for it to become ready. The returned [`SandboxHandle`]
//! owns the container and its working directory; `teardown` removes both, and
//! dropping an un-torn-down handle schedules the same cleanup.

pub mod port;
pub mod project;
pub mod readiness;
pub mod runtime;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tempfile::TempDir;
use tokio::fs;
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::config::{ContainerConfig, ProbeMode};
use crate::core::{Language, PipelineError};

use port::reserve_port;
use project::ProjectLayout;
use readiness::wait_until_ready;
pub use runtime::{ContainerRuntime, DockerRuntime, LaunchSpec};

/// Live dev-server container owned by one request
pub struct SandboxHandle {
    id: String,
    name: String,
    port: u16,
    base_url: String,
    workdir: Option<TempDir>,
    runtime: Arc<dyn ContainerRuntime>,
}

impl SandboxHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Address the dev server is reachable at, without a trailing slash
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn workdir(&self) -> Option<&std::path::Path> {
        self.workdir.as_ref().map(|dir| dir.path())
    }

    /// Remove the container and delete the working directory.
    ///
    /// Both steps are attempted even if the first fails.
    pub async fn teardown(mut self) -> anyhow::Result<()> {
        let removed = self.runtime.remove(&self.id).await;
        let deleted = match self.workdir.take() {
            Some(dir) => dir.close().context("Failed to delete project directory"),
            None => Ok(()),
        };
        info!(id = %self.id, name = %self.name, "Sandbox torn down");
        // Marks the handle as done for Drop
        self.id.clear();
        removed.and(deleted)
    }
}

impl Drop for SandboxHandle {
    fn drop(&mut self) {
        if self.id.is_empty() {
            return;
        }
        warn!(id = %self.id, "Sandbox dropped without teardown, removing in background");
        let runtime = Arc::clone(&self.runtime);
        let id = std::mem::take(&mut self.id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = runtime.remove(&id).await {
                        warn!(%id, "Background container removal failed: {:#}", e);
                    }
                });
            }
            Err(_) => warn!(%id, "No runtime available, container left behind"),
        }
        // workdir is deleted when the TempDir drops
    }
}

pub struct ContainerOrchestrator {
    config: ContainerConfig,
    runtime: Arc<dyn ContainerRuntime>,
    layout: ProjectLayout,
    client: reqwest::Client,
}

impl ContainerOrchestrator {
    pub fn new(config: ContainerConfig, runtime: Arc<dyn ContainerRuntime>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            config,
            runtime,
            layout: ProjectLayout::new()?,
            client,
        })
    }

    /// Launch a dev server for `files` and wait until it serves markup.
    ///
    /// On any failure everything created so far is torn down before returning.
    pub async fn serve(
        &self,
        language: Language,
        files: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<SandboxHandle, PipelineError> {
        let reservation = reserve_port(self.config.port_range, self.config.port_attempts)?;

        fs::create_dir_all(&self.config.work_root)
            .await
            .with_context(|| format!("Failed to create {:?}", self.config.work_root))?;
        let workdir = tempfile::Builder::new()
            .prefix("codeshot-project-")
            .tempdir_in(&self.config.work_root)
            .context("Failed to create project directory")?;

        self.layout
            .materialize(language, files, workdir.path())
            .await?;

        let name = format!("codeshot-{}", Uuid::new_v4().simple());
        let port = reservation.release();
        let spec = LaunchSpec {
            name: name.clone(),
            image: self.config.image.clone(),
            workdir: workdir.path().to_path_buf(),
            command: self.config.start_command.clone(),
            env: vec![
                ("PORT".to_string(), port.to_string()),
                ("ALLOWED_HOSTS".to_string(), name.clone()),
                ("__VITE_ADDITIONAL_SERVER_ALLOWED_HOSTS".to_string(), name.clone()),
                ("CI".to_string(), "true".to_string()),
            ],
            port,
            network: self.config.network.clone(),
            memory_mb: self.config.memory_mb,
            cpus: self.config.cpus,
            publish_on_loopback: self.config.probe_mode == ProbeMode::Loopback,
        };

        let id = self.runtime.launch(&spec).await?;
        let base_url = match self.config.probe_mode {
            ProbeMode::Network => format!("http://{}:{}", name, port),
            ProbeMode::Loopback => format!("http://127.0.0.1:{}", port),
        };
        info!(%id, %name, port, %base_url, "Container launched");

        let handle = SandboxHandle {
            id,
            name,
            port,
            base_url,
            workdir: Some(workdir),
            runtime: Arc::clone(&self.runtime),
        };

        let budget = self.config.readiness.capped(timeout);
        let ready = wait_until_ready(
            self.runtime.as_ref(),
            &self.client,
            handle.id(),
            &format!("{}/", handle.base_url()),
            budget,
            self.config.log_tail_lines,
        )
        .await;

        match ready {
            Ok(()) => Ok(handle),
            Err(err) => {
                if let Err(e) = handle.teardown().await {
                    warn!("Teardown after failed serve: {:#}", e);
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory container runtime that serves markup from a local axum server

    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use axum::response::Html;
    use axum::Router;
    use tokio::task::JoinHandle;

    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Behavior {
        /// Serves a page whose mount node has content
        Serve,
        /// Exits right after launch
        Crash,
        /// Stays up but never answers
        Hang,
    }

    pub struct FakeRuntime {
        behavior: Behavior,
        live: Mutex<HashMap<String, Option<JoinHandle<()>>>>,
        pub launched: Mutex<Vec<LaunchSpec>>,
    }

    impl FakeRuntime {
        pub fn new(behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                live: Mutex::new(HashMap::new()),
                launched: Mutex::new(Vec::new()),
            })
        }

        pub fn live_count(&self) -> usize {
            self.live.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ContainerRuntime for FakeRuntime {
        async fn launch(&self, spec: &LaunchSpec) -> anyhow::Result<String> {
            self.launched.lock().unwrap().push(spec.clone());
            let server = match self.behavior {
                Behavior::Serve => {
                    let listener = tokio::net::TcpListener::bind(("127.0.0.1", spec.port)).await?;
                    let app = Router::new().fallback(|| async {
                        Html("<!doctype html><html><body><div id=\"root\"><h1>Hello</h1></div></body></html>")
                    });
                    Some(tokio::spawn(async move {
                        let _ = axum::serve(listener, app).await;
                    }))
                }
                _ => None,
            };
            let id = format!("fake-{}", spec.name);
            self.live.lock().unwrap().insert(id.clone(), server);
            Ok(id)
        }

        async fn is_running(&self, id: &str) -> anyhow::Result<bool> {
            Ok(self.behavior != Behavior::Crash && self.live.lock().unwrap().contains_key(id))
        }

        async fn logs(&self, _id: &str, _tail: usize) -> anyhow::Result<String> {
            Ok(match self.behavior {
                Behavior::Crash => "npm ERR! code E404\nnpm ERR! 404 Not Found".to_string(),
                _ => "installing dependencies...".to_string(),
            })
        }

        async fn remove(&self, id: &str) -> anyhow::Result<()> {
            if let Some(Some(server)) = self.live.lock().unwrap().remove(id) {
                server.abort();
            }
            Ok(())
        }
    }

    pub fn loopback_config(work_root: &std::path::Path) -> ContainerConfig {
        ContainerConfig {
            probe_mode: ProbeMode::Loopback,
            work_root: work_root.to_path_buf(),
            port_range: (42000, 48000),
            readiness: crate::core::config::PollBudget::new(5, Duration::from_millis(100)),
            ..Default::default()
        }
    }
}
