//! Jobs consumed from the queue and the results written back

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::{CaptureMode, ExecutionResult, Language, PipelineConfig, ValidationVerdict};
use crate::engine::coordinator::Coordinator;

/// Worker job enum - represents different types of jobs the worker can process
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "job_type")]
pub enum WorkerJob {
    /// Run a single source file
    #[serde(rename = "execute")]
    Execute(ExecuteJob),
    /// Serve a multi-file project and capture its routes
    #[serde(rename = "execute_project")]
    ExecuteProject(ProjectJob),
    /// Static validation only
    #[serde(rename = "validate")]
    Validate(ValidateJob),
}

impl WorkerJob {
    pub fn job_id(&self) -> &str {
        match self {
            WorkerJob::Execute(job) => &job.job_id,
            WorkerJob::ExecuteProject(job) => &job.job_id,
            WorkerJob::Validate(job) => &job.job_id,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExecuteJob {
    pub job_id: String,
    pub code: String,
    pub language: String,
    /// Stylesheet and script rendered with an html fragment
    #[serde(default)]
    pub css: Option<String>,
    #[serde(default)]
    pub js: Option<String>,
    /// Seconds; the configured run timeout when absent
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub capture: CaptureMode,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProjectJob {
    pub job_id: String,
    pub language: String,
    /// Relative path -> file content
    pub files: BTreeMap<String, String>,
    #[serde(default)]
    pub routes: Vec<String>,
    /// Document a static html project is loaded from
    #[serde(default)]
    pub main_file: Option<String>,
    /// Seconds; the configured serve budget when absent
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub capture: CaptureMode,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ValidateJob {
    pub job_id: String,
    pub code: String,
    pub language: String,
}

/// What a job produced
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "result_type", rename_all = "snake_case")]
pub enum JobOutcome {
    Execution(ExecutionResult),
    Validation(ValidationVerdict),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: String,
    #[serde(flatten)]
    pub outcome: JobOutcome,
}

/// Timeouts applied when a job does not name one
#[derive(Debug, Clone, Copy)]
pub struct JobDefaults {
    pub run_timeout: Duration,
    pub serve_timeout: Duration,
}

impl From<&PipelineConfig> for JobDefaults {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            run_timeout: config.runner.run_timeout,
            serve_timeout: config.container.readiness.total(),
        }
    }
}

/// Run a job to completion; every job yields a result
pub async fn process_job(coordinator: &Coordinator, job: WorkerJob, defaults: JobDefaults) -> JobResult {
    match job {
        WorkerJob::Execute(job) => {
            info!(job_id = %job.job_id, language = %job.language, "Received execute job");
            let timeout = job
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.run_timeout);
            let has_assets = job.css.is_some() || job.js.is_some();
            let result = if has_assets && Language::from_tag(&job.language) == Some(Language::Html) {
                coordinator
                    .execute_web(&job.code, job.css.as_deref(), job.js.as_deref(), timeout, job.capture)
                    .await
            } else {
                coordinator
                    .execute_source(&job.code, &job.language, timeout, job.capture)
                    .await
            };
            JobResult {
                job_id: job.job_id,
                outcome: JobOutcome::Execution(result),
            }
        }
        WorkerJob::ExecuteProject(job) => {
            info!(
                job_id = %job.job_id,
                language = %job.language,
                files = job.files.len(),
                routes = job.routes.len(),
                "Received project job"
            );
            let timeout = job
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.serve_timeout);
            let (result, _) = coordinator
                .execute_project(
                    &job.language,
                    job.files,
                    &job.routes,
                    timeout,
                    job.capture,
                    job.main_file.as_deref(),
                )
                .await;
            JobResult {
                job_id: job.job_id,
                outcome: JobOutcome::Execution(result),
            }
        }
        WorkerJob::Validate(job) => {
            info!(job_id = %job.job_id, language = %job.language, "Received validate job");
            JobResult {
                outcome: JobOutcome::Validation(coordinator.validate(&job.code, &job.language)),
                job_id: job.job_id,
            }
        }
    }
}
