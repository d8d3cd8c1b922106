//! Pipeline configuration
//!
//! Loaded once from the environment at start-up and passed to every component.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

/// How the worker reaches a project container's dev server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMode {
    /// Address the container by name on the shared internal network
    Network,
    /// Publish the port on 127.0.0.1 and probe through the host
    Loopback,
}

impl FromStr for ProbeMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "network" => Ok(ProbeMode::Network),
            "loopback" => Ok(ProbeMode::Loopback),
            other => anyhow::bail!("unknown probe mode: {}", other),
        }
    }
}

/// Bounded retry loop parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBudget {
    pub attempts: u32,
    pub interval: Duration,
}

impl PollBudget {
    pub fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }

    pub fn total(&self) -> Duration {
        self.interval * self.attempts
    }

    /// Shrink the budget so it never outlasts `limit`
    pub fn capped(&self, limit: Duration) -> Self {
        if self.interval.is_zero() || self.total() <= limit {
            return *self;
        }
        let attempts = (limit.as_millis() / self.interval.as_millis().max(1)) as u32;
        Self {
            attempts: attempts.max(1),
            interval: self.interval,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Maximum source length in characters
    pub max_source_length: usize,
    /// Maximum total characters across all files of a project
    pub max_project_length: usize,
    /// Wall-clock limit for a program run (default: 30s)
    pub run_timeout: Duration,
    /// Wall-clock limit for compilation (default: 30s)
    pub compile_timeout: Duration,
    /// Address space limit for programs in MB (default: 512MB)
    pub memory_limit_mb: u32,
    /// Largest file a program may create in KB
    pub fsize_kb: u64,
    /// RLIMIT_NPROC for programs; counts every process of the worker's user
    pub process_limit: u64,
    /// Root under which per-call scratch directories are created
    pub work_root: PathBuf,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_source_length: 5000,
            max_project_length: 200_000,
            run_timeout: Duration::from_secs(30),
            compile_timeout: Duration::from_secs(30),
            memory_limit_mb: 512,
            fsize_kb: 16 * 1024,
            process_limit: 64,
            work_root: std::env::temp_dir(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContainerConfig {
    /// Image with node and the dev-server toolchain
    pub image: String,
    /// Docker network the containers are attached to
    pub network: String,
    pub memory_mb: u64,
    pub cpus: f64,
    pub probe_mode: ProbeMode,
    /// Shell command that installs dependencies and starts the dev server
    pub start_command: String,
    /// Host directory for project trees; must be visible to the docker daemon
    pub work_root: PathBuf,
    pub port_range: (u16, u16),
    pub port_attempts: u32,
    pub readiness: PollBudget,
    /// Lines of container log kept for diagnostics
    pub log_tail_lines: usize,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            image: "node:20-alpine".to_string(),
            network: "codeshot-internal".to_string(),
            memory_mb: 1024,
            cpus: 1.0,
            probe_mode: ProbeMode::Network,
            start_command: "npm install --no-audit --no-fund --loglevel=error && npx vite --host 0.0.0.0 --port \"$PORT\" --strictPort".to_string(),
            work_root: std::env::temp_dir().join("codeshot-projects"),
            port_range: (20000, 40000),
            port_attempts: 50,
            readiness: PollBudget::new(60, Duration::from_millis(2000)),
            log_tail_lines: 200,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Browser executable
    pub chromium_path: PathBuf,
    pub viewport: (u32, u32),
    /// Viewport used for code screenshots
    pub code_viewport: (u32, u32),
    pub readiness: PollBudget,
    /// Limit for a single navigation or DevTools call
    pub command_timeout: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            chromium_path: PathBuf::from("chromium"),
            viewport: (1200, 800),
            code_viewport: (900, 600),
            readiness: PollBudget::new(30, Duration::from_millis(1000)),
            command_timeout: Duration::from_secs(30),
        }
    }
}

/// Full pipeline configuration
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub runner: RunnerConfig,
    pub container: ContainerConfig,
    pub capture: CaptureConfig,
    /// Jobs processed concurrently by the worker
    pub max_concurrent_jobs: usize,
}

impl PipelineConfig {
    /// Read configuration from environment variables, falling back to defaults
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut config = PipelineConfig {
            max_concurrent_jobs: 4,
            ..Default::default()
        };

        let runner = &mut config.runner;
        set_parsed(&lookup, "MAX_SOURCE_LENGTH", &mut runner.max_source_length)?;
        set_parsed(&lookup, "MAX_PROJECT_LENGTH", &mut runner.max_project_length)?;
        set_secs(&lookup, "RUN_TIMEOUT_SECS", &mut runner.run_timeout)?;
        set_secs(&lookup, "COMPILE_TIMEOUT_SECS", &mut runner.compile_timeout)?;
        set_parsed(&lookup, "RUN_MEMORY_LIMIT_MB", &mut runner.memory_limit_mb)?;
        set_parsed(&lookup, "RUN_PROCESS_LIMIT", &mut runner.process_limit)?;
        if let Some(root) = lookup("WORK_ROOT") {
            runner.work_root = PathBuf::from(root);
        }

        let container = &mut config.container;
        if let Some(image) = lookup("CONTAINER_IMAGE") {
            container.image = image;
        }
        if let Some(network) = lookup("CONTAINER_NETWORK") {
            container.network = network;
        }
        if let Some(command) = lookup("PROJECT_START_COMMAND") {
            container.start_command = command;
        }
        if let Some(root) = lookup("CONTAINER_WORK_ROOT") {
            container.work_root = PathBuf::from(root);
        }
        set_parsed(&lookup, "CONTAINER_MEMORY_MB", &mut container.memory_mb)?;
        set_parsed(&lookup, "CONTAINER_CPUS", &mut container.cpus)?;
        set_parsed(&lookup, "CONTAINER_PROBE_MODE", &mut container.probe_mode)?;
        set_parsed(&lookup, "PORT_RANGE_START", &mut container.port_range.0)?;
        set_parsed(&lookup, "PORT_RANGE_END", &mut container.port_range.1)?;
        set_parsed(&lookup, "PORT_ALLOCATION_ATTEMPTS", &mut container.port_attempts)?;
        set_parsed(&lookup, "SERVE_POLL_ATTEMPTS", &mut container.readiness.attempts)?;
        set_millis(&lookup, "SERVE_POLL_INTERVAL_MS", &mut container.readiness.interval)?;

        if container.port_range.0 < 1024 || container.port_range.0 > container.port_range.1 {
            anyhow::bail!(
                "Invalid port range {}-{}: must be non-privileged and ordered",
                container.port_range.0,
                container.port_range.1
            );
        }

        let capture = &mut config.capture;
        if let Some(path) = lookup("CHROMIUM_PATH") {
            capture.chromium_path = PathBuf::from(path);
        }
        set_parsed(&lookup, "VIEWPORT_WIDTH", &mut capture.viewport.0)?;
        set_parsed(&lookup, "VIEWPORT_HEIGHT", &mut capture.viewport.1)?;
        set_parsed(&lookup, "CAPTURE_POLL_ATTEMPTS", &mut capture.readiness.attempts)?;
        set_millis(&lookup, "CAPTURE_POLL_INTERVAL_MS", &mut capture.readiness.interval)?;

        set_parsed(&lookup, "MAX_CONCURRENT_JOBS", &mut config.max_concurrent_jobs)?;
        config.max_concurrent_jobs = config.max_concurrent_jobs.max(1);

        Ok(config)
    }
}

fn set_parsed<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) -> anyhow::Result<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(key) {
        *target = raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{}", e))
            .with_context(|| format!("Invalid value for {}: {:?}", key, raw))?;
    }
    Ok(())
}

fn set_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut Duration,
) -> anyhow::Result<()> {
    let mut secs = target.as_secs();
    set_parsed(lookup, key, &mut secs)?;
    *target = Duration::from_secs(secs);
    Ok(())
}

fn set_millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut Duration,
) -> anyhow::Result<()> {
    let mut millis = target.as_millis() as u64;
    set_parsed(lookup, key, &mut millis)?;
    *target = Duration::from_millis(millis);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::from_lookup(|_| None).unwrap();

        assert_eq!(config.runner.max_source_length, 5000);
        assert_eq!(config.runner.run_timeout, Duration::from_secs(30));
        assert_eq!(config.container.readiness.total(), Duration::from_secs(120));
        assert_eq!(config.capture.readiness.total(), Duration::from_secs(30));
        assert_eq!(config.container.probe_mode, ProbeMode::Network);
        assert_eq!(config.max_concurrent_jobs, 4);
    }

    #[test]
    fn test_overrides() {
        let config = PipelineConfig::from_lookup(lookup_from(&[
            ("RUN_TIMEOUT_SECS", "5"),
            ("CONTAINER_PROBE_MODE", "loopback"),
            ("SERVE_POLL_INTERVAL_MS", "250"),
            ("VIEWPORT_WIDTH", "1440"),
        ]))
        .unwrap();

        assert_eq!(config.runner.run_timeout, Duration::from_secs(5));
        assert_eq!(config.container.probe_mode, ProbeMode::Loopback);
        assert_eq!(
            config.container.readiness.interval,
            Duration::from_millis(250)
        );
        assert_eq!(config.capture.viewport, (1440, 800));
    }

    #[test]
    fn test_invalid_values_are_reported() {
        let err = PipelineConfig::from_lookup(lookup_from(&[("RUN_TIMEOUT_SECS", "soon")]))
            .unwrap_err();
        assert!(format!("{:#}", err).contains("RUN_TIMEOUT_SECS"));

        let err = PipelineConfig::from_lookup(lookup_from(&[("PORT_RANGE_START", "80")]))
            .unwrap_err();
        assert!(err.to_string().contains("port range"));
    }

    #[test]
    fn test_poll_budget_cap() {
        let budget = PollBudget::new(60, Duration::from_secs(2));
        assert_eq!(budget.capped(Duration::from_secs(10)).attempts, 5);
        assert_eq!(budget.capped(Duration::from_secs(600)), budget);
        assert_eq!(budget.capped(Duration::from_millis(1)).attempts, 1);
    }
}
