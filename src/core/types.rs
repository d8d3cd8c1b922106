//! Request and result envelopes shared by every pipeline stage

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::{ErrorKind, PipelineError, ValidationError};
use super::languages::Language;

/// Exit code reported when a process is killed for exceeding its timeout
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// What visual artifact, if any, the caller wants back
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CaptureMode {
    /// Text output only
    #[default]
    None,
    /// Fully realized DOM markup
    Markup,
    /// Rasterized full-page PNG
    Screenshot {
        #[serde(default)]
        theme: Option<String>,
    },
}

/// A single submitted task, alive for one execution call
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub source_text: String,
    pub language: Language,
    /// Extra stylesheet and script embedded into a markup fragment
    pub stylesheet: Option<String>,
    pub script: Option<String>,
    /// Multi-file tree; required for project-style runtimes, optional for markup
    pub project_files: Option<BTreeMap<String, String>>,
    /// Document loaded from a static markup project (default `index.html`)
    pub entry_file: Option<String>,
    /// Normalized routes, never empty
    pub routes: Vec<String>,
    pub timeout: Duration,
    pub capture: CaptureMode,
}

impl ExecutionRequest {
    pub fn single(
        source_text: impl Into<String>,
        language: Language,
        timeout: Duration,
    ) -> Self {
        Self {
            source_text: source_text.into(),
            language,
            stylesheet: None,
            script: None,
            project_files: None,
            entry_file: None,
            routes: normalize_routes(&[]),
            timeout,
            capture: CaptureMode::None,
        }
    }

    pub fn project(
        language: Language,
        files: BTreeMap<String, String>,
        routes: &[String],
        timeout: Duration,
    ) -> Self {
        Self {
            source_text: String::new(),
            language,
            stylesheet: None,
            script: None,
            project_files: Some(files),
            entry_file: None,
            routes: normalize_routes(routes),
            timeout,
            capture: CaptureMode::Markup,
        }
    }

    pub fn with_capture(mut self, capture: CaptureMode) -> Self {
        self.capture = capture;
        self
    }

    pub fn with_assets(mut self, stylesheet: Option<String>, script: Option<String>) -> Self {
        self.stylesheet = stylesheet;
        self.script = script;
        self
    }

    pub fn with_entry_file(mut self, entry_file: Option<String>) -> Self {
        self.entry_file = entry_file;
        self
    }
}

/// Trim, prefix with `/` and de-duplicate routes, keeping first occurrence order.
/// An empty list becomes `["/"]`.
pub fn normalize_routes(routes: &[String]) -> Vec<String> {
    let mut normalized: Vec<String> = Vec::with_capacity(routes.len().max(1));
    for route in routes {
        let trimmed = route.trim();
        let route = if trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{}", trimmed)
        };
        if !normalized.contains(&route) {
            normalized.push(route);
        }
    }
    if normalized.is_empty() {
        normalized.push("/".to_string());
    }
    normalized
}

/// Output captured for one route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum RouteOutput {
    /// Realized DOM markup
    Markup(String),
    /// Base64-encoded PNG
    Image(String),
    /// Capture of this route failed; the rest of the batch is unaffected
    Error(String),
}

impl RouteOutput {
    pub fn is_error(&self) -> bool {
        matches!(self, RouteOutput::Error(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteCapture {
    pub route: String,
    pub output: RouteOutput,
}

/// Per-route outputs in request order, one entry per route
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouteOutputs(Vec<RouteCapture>);

impl RouteOutputs {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Insert or replace the output for `route`, keeping its original position
    pub fn insert(&mut self, route: impl Into<String>, output: RouteOutput) {
        let route = route.into();
        match self.0.iter_mut().find(|c| c.route == route) {
            Some(existing) => existing.output = output,
            None => self.0.push(RouteCapture { route, output }),
        }
    }

    pub fn get(&self, route: &str) -> Option<&RouteOutput> {
        self.0.iter().find(|c| c.route == route).map(|c| &c.output)
    }

    pub fn routes(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|c| c.route.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &RouteCapture> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn failed_routes(&self) -> Vec<&str> {
        self.0
            .iter()
            .filter(|c| c.output.is_error())
            .map(|c| c.route.as_str())
            .collect()
    }
}

/// Rendered visual artifact for a run-to-completion or markup execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Artifact {
    Markup(String),
    /// Base64-encoded PNG
    Png(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureInfo {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&PipelineError> for FailureInfo {
    fn from(err: &PipelineError) -> Self {
        FailureInfo {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Normalized outcome of one execution call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration_ms: u64,
    /// Present only for project-style runtimes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_route_output: Option<RouteOutputs>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Artifact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<FailureInfo>,
}

impl ExecutionResult {
    /// Map a pipeline failure into the result shape
    pub fn failed(err: &PipelineError, duration: Duration) -> Self {
        let (stderr, exit_code) = match err {
            PipelineError::CompileFailed {
                exit_code,
                diagnostics,
            } => (diagnostics.clone(), *exit_code),
            PipelineError::RuntimeCrashed { exit_code, stderr } => (stderr.clone(), *exit_code),
            PipelineError::RuntimeTimeout { .. } => (err.to_string(), TIMEOUT_EXIT_CODE),
            PipelineError::ContainerCrashed { logs } | PipelineError::ServeTimeout { logs } => {
                (logs.clone(), 1)
            }
            _ => (err.to_string(), 1),
        };

        ExecutionResult {
            success: false,
            stdout: String::new(),
            stderr,
            exit_code,
            duration_ms: duration.as_millis() as u64,
            per_route_output: None,
            artifact: None,
            error: Some(FailureInfo::from(err)),
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

/// Outcome of static validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ValidationVerdict {
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn rejected(err: &ValidationError) -> Self {
        Self {
            allowed: false,
            reason: Some(err.to_string()),
        }
    }
}

impl From<Result<(), ValidationError>> for ValidationVerdict {
    fn from(result: Result<(), ValidationError>) -> Self {
        match result {
            Ok(()) => ValidationVerdict::allowed(),
            Err(err) => ValidationVerdict::rejected(&err),
        }
    }
}
