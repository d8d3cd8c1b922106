//! Per-request pipeline: validate, run or serve, capture, normalize
//!
//! Every entry point answers with an [`ExecutionResult`]; failures of any
//! stage are folded into it instead of escaping.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use tracing::{info, warn};

use crate::core::types::{Artifact, FailureInfo};
use crate::core::utils::{is_safe_path, normalize_path};
use crate::core::{
    CaptureMode, ExecutionRequest, ExecutionResult, Language, LanguageKind, LanguageTable,
    PipelineConfig, PipelineError, RouteOutput, RouteOutputs, ValidationError,
    ValidationVerdict,
};
use crate::engine::capture::render::{render_code_page, wrap_fragment, CodeTheme};
use crate::engine::capture::{
    capture_error, BrowserLauncher, CaptureEngine, CaptureKind, CaptureOptions, CaptureTarget,
    ReadyProbe,
};
use crate::engine::container::project::{mount_selector, write_tree};
use crate::engine::container::{ContainerOrchestrator, ContainerRuntime};
use crate::engine::runner::{LanguageRunner, RunOutput, RunPhase};
use crate::engine::validator::Validator;

/// Route key used for single-document captures
const ROOT_ROUTE: &str = "/";

/// Document loaded from a static markup project when none is named
const DEFAULT_ENTRY_FILE: &str = "index.html";

pub struct Coordinator {
    validator: Validator,
    runner: LanguageRunner,
    orchestrator: ContainerOrchestrator,
    capture: CaptureEngine,
}

impl Coordinator {
    pub fn new(
        config: PipelineConfig,
        languages: Arc<LanguageTable>,
        runtime: Arc<dyn ContainerRuntime>,
        launcher: Arc<dyn BrowserLauncher>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            validator: Validator::new(&config.runner)?,
            runner: LanguageRunner::new(config.runner, languages),
            orchestrator: ContainerOrchestrator::new(config.container, runtime)?,
            capture: CaptureEngine::new(config.capture, launcher),
        })
    }

    /// Standalone pre-flight check
    pub fn validate(&self, source: &str, tag: &str) -> ValidationVerdict {
        self.validator.verdict(source, tag)
    }

    /// Execute single-file source given a caller language tag
    pub async fn execute_source(
        &self,
        source: &str,
        tag: &str,
        timeout: Duration,
        capture: CaptureMode,
    ) -> ExecutionResult {
        match parse_tag(tag) {
            Ok(language) => {
                let request = ExecutionRequest::single(source, language, timeout).with_capture(capture);
                self.execute(&request).await
            }
            Err(err) => ExecutionResult::failed(&err, Duration::ZERO),
        }
    }

    /// Render a markup fragment with a separate stylesheet and script
    pub async fn execute_web(
        &self,
        html: &str,
        css: Option<&str>,
        js: Option<&str>,
        timeout: Duration,
        capture: CaptureMode,
    ) -> ExecutionResult {
        let request = ExecutionRequest::single(html, Language::Html, timeout)
            .with_assets(css.map(str::to_string), js.map(str::to_string))
            .with_capture(capture);
        self.execute(&request).await
    }

    /// Capture each route of a multi-file project.
    ///
    /// React and Vue projects are served from a dev-server container; static
    /// markup projects are written to disk and loaded from `entry`
    /// (`index.html` by default). The returned outputs hold one entry per
    /// normalized route, or nothing when the project never rendered.
    pub async fn execute_project(
        &self,
        tag: &str,
        files: BTreeMap<String, String>,
        routes: &[String],
        timeout: Duration,
        capture: CaptureMode,
        entry: Option<&str>,
    ) -> (ExecutionResult, RouteOutputs) {
        let language = match parse_tag(tag) {
            Ok(language) => language,
            Err(err) => return (ExecutionResult::failed(&err, Duration::ZERO), RouteOutputs::new()),
        };
        let capture = match capture {
            CaptureMode::None => CaptureMode::Markup,
            other => other,
        };

        let request = ExecutionRequest::project(language, files, routes, timeout)
            .with_capture(capture)
            .with_entry_file(entry.map(str::to_string));
        let result = self.execute(&request).await;
        let outputs = result.per_route_output.clone().unwrap_or_default();
        (result, outputs)
    }

    /// Run one request through the whole pipeline
    pub async fn execute(&self, request: &ExecutionRequest) -> ExecutionResult {
        let started = Instant::now();
        let language = request.language;

        let result = match self.dispatch(request).await {
            Ok(mut result) => {
                result.duration_ms = started.elapsed().as_millis() as u64;
                result
            }
            Err(err) => {
                warn!(%language, kind = %err.kind(), "Execution failed: {}", err);
                ExecutionResult::failed(&err, started.elapsed())
            }
        };

        info!(
            %language,
            success = result.success,
            exit_code = result.exit_code,
            duration_ms = result.duration_ms,
            "Execution finished"
        );
        result
    }

    async fn dispatch(&self, request: &ExecutionRequest) -> Result<ExecutionResult, PipelineError> {
        let language = request.language;

        match (&request.project_files, language.is_project()) {
            (Some(files), _) => self.validator.validate_project(files, language)?,
            (None, true) => {
                return Err(ValidationError::UnsupportedLanguage(format!(
                    "{} requires project files",
                    language
                ))
                .into())
            }
            (None, false) => {
                self.validator.validate(&request.source_text, language)?;
                for extra in [&request.stylesheet, &request.script].into_iter().flatten() {
                    self.validator.validate(extra, language)?;
                }
            }
        }

        match language.kind() {
            LanguageKind::Interpreted | LanguageKind::Compiled => self.execute_runnable(request).await,
            LanguageKind::Markup => match &request.project_files {
                Some(files) => self.execute_static_site(request, files).await,
                None => self.execute_markup(request).await,
            },
            LanguageKind::Project => match &request.project_files {
                Some(files) => self.execute_served(request, files).await,
                None => Err(PipelineError::Unexpected("project files missing".to_string())),
            },
        }
    }

    async fn execute_runnable(&self, request: &ExecutionRequest) -> Result<ExecutionResult, PipelineError> {
        let output = self
            .runner
            .run(&request.source_text, request.language, request.timeout)
            .await?;

        if output.compile_failed() {
            return Err(PipelineError::CompileFailed {
                exit_code: output.exit_code,
                diagnostics: output.stderr,
            });
        }

        let mut result = runtime_result(&output, request.timeout);

        match &request.capture {
            CaptureMode::None => {}
            CaptureMode::Markup => {
                let page = self.code_page(request, &output, None);
                result.artifact = Some(Artifact::Markup(page));
            }
            CaptureMode::Screenshot { theme } => {
                let page = self.code_page(request, &output, theme.as_deref());
                match self.code_screenshot(page).await {
                    Ok(png) => result.artifact = Some(Artifact::Png(png)),
                    Err(err) => {
                        warn!(language = %request.language, "Code screenshot failed: {}", err);
                        if !result.stderr.is_empty() && !result.stderr.ends_with('\n') {
                            result.stderr.push('\n');
                        }
                        result.stderr.push_str(&err.to_string());
                    }
                }
            }
        }

        Ok(result)
    }

    fn code_page(&self, request: &ExecutionRequest, output: &RunOutput, theme: Option<&str>) -> String {
        let filename = self
            .runner
            .source_file_name(&request.source_text, request.language)
            .unwrap_or_else(|| request.language.name().to_string());
        let shown = if output.stderr.trim().is_empty() {
            output.stdout.clone()
        } else {
            format!("{}\n{}", output.stdout, output.stderr)
        };
        render_code_page(&request.source_text, &shown, CodeTheme::from_name(theme), &filename)
    }

    async fn code_screenshot(&self, page: String) -> Result<String, PipelineError> {
        let options = CaptureOptions {
            kind: CaptureKind::Screenshot,
            probe: ReadyProbe::DocumentComplete,
            viewport: self.capture.config().code_viewport,
        };
        let outputs = self
            .capture
            .capture(&CaptureTarget::Markup { html: page }, &root_route(), &options)
            .await;

        match outputs.get(ROOT_ROUTE) {
            Some(RouteOutput::Image(png)) => Ok(png.clone()),
            other => Err(capture_error(ROOT_ROUTE, other)),
        }
    }

    async fn execute_markup(&self, request: &ExecutionRequest) -> Result<ExecutionResult, PipelineError> {
        let html = wrap_fragment(
            &request.source_text,
            request.stylesheet.as_deref(),
            request.script.as_deref(),
        );
        let options = CaptureOptions {
            kind: capture_kind(&request.capture),
            probe: ReadyProbe::DocumentComplete,
            viewport: self.capture.config().viewport,
        };

        let outputs = self
            .capture
            .capture(&CaptureTarget::Markup { html }, &root_route(), &options)
            .await;

        let artifact = match outputs.get(ROOT_ROUTE) {
            Some(RouteOutput::Markup(markup)) => Artifact::Markup(markup.clone()),
            Some(RouteOutput::Image(png)) => Artifact::Png(png.clone()),
            other => return Err(capture_error(ROOT_ROUTE, other)),
        };

        Ok(ExecutionResult {
            success: true,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: 0,
            duration_ms: 0,
            per_route_output: None,
            artifact: Some(artifact),
            error: None,
        })
    }

    async fn execute_served(
        &self,
        request: &ExecutionRequest,
        files: &BTreeMap<String, String>,
    ) -> Result<ExecutionResult, PipelineError> {
        let language = request.language;
        let handle = self
            .orchestrator
            .serve(language, files, request.timeout)
            .await?;

        let options = CaptureOptions {
            kind: capture_kind(&request.capture),
            probe: mount_selector(language)
                .map(|selector| ReadyProbe::MountNode(selector.to_string()))
                .unwrap_or(ReadyProbe::DocumentComplete),
            viewport: self.capture.config().viewport,
        };
        let target = CaptureTarget::Endpoint {
            base_url: handle.base_url().to_string(),
        };

        let outputs = self.capture.capture(&target, &request.routes, &options).await;

        if let Err(e) = handle.teardown().await {
            warn!(%language, "Teardown failed: {:#}", e);
        }

        Ok(project_result(outputs))
    }

    /// Load a static multi-file site straight from disk, no server involved
    async fn execute_static_site(
        &self,
        request: &ExecutionRequest,
        files: &BTreeMap<String, String>,
    ) -> Result<ExecutionResult, PipelineError> {
        let entry = request
            .entry_file
            .as_deref()
            .map(normalize_path)
            .unwrap_or_else(|| DEFAULT_ENTRY_FILE.to_string());
        if !is_safe_path(&entry) {
            return Err(ValidationError::UnsafePath(entry).into());
        }
        if !files.keys().any(|path| normalize_path(path) == entry) {
            return Err(ValidationError::MissingEntry(entry).into());
        }

        let site = tempfile::Builder::new()
            .prefix("codeshot-site-")
            .tempdir()
            .context("Failed to create site directory")?;
        write_tree(files, site.path()).await?;

        let options = CaptureOptions {
            kind: capture_kind(&request.capture),
            probe: ReadyProbe::DocumentComplete,
            viewport: self.capture.config().viewport,
        };
        let target = CaptureTarget::File {
            path: site.path().join(&entry),
        };
        let outputs = self.capture.capture(&target, &request.routes, &options).await;

        if let Err(e) = site.close() {
            warn!("Failed to delete site directory: {}", e);
        }

        Ok(project_result(outputs))
    }
}

fn capture_kind(capture: &CaptureMode) -> CaptureKind {
    match capture {
        CaptureMode::Screenshot { .. } => CaptureKind::Screenshot,
        CaptureMode::None | CaptureMode::Markup => CaptureKind::Markup,
    }
}

fn parse_tag(tag: &str) -> Result<Language, PipelineError> {
    Language::from_tag(tag)
        .ok_or_else(|| ValidationError::UnsupportedLanguage(tag.trim().to_string()).into())
}

fn root_route() -> Vec<String> {
    vec![ROOT_ROUTE.to_string()]
}

/// Result of a program that ran, whatever its exit
fn runtime_result(output: &RunOutput, timeout: Duration) -> ExecutionResult {
    let error = match output.phase {
        RunPhase::TimedOut => Some(PipelineError::RuntimeTimeout { timeout }),
        _ if !output.success => Some(PipelineError::RuntimeCrashed {
            exit_code: output.exit_code,
            stderr: output.stderr.clone(),
        }),
        _ => None,
    };

    let mut stderr = output.stderr.clone();
    if let Some(err @ PipelineError::RuntimeTimeout { .. }) = &error {
        if !stderr.is_empty() && !stderr.ends_with('\n') {
            stderr.push('\n');
        }
        stderr.push_str(&err.to_string());
    }

    ExecutionResult {
        success: output.success,
        stdout: output.stdout.clone(),
        stderr,
        exit_code: output.exit_code,
        duration_ms: output.duration.as_millis() as u64,
        per_route_output: None,
        artifact: None,
        error: error.as_ref().map(FailureInfo::from),
    }
}

/// A project succeeds when at least one route was captured
fn project_result(outputs: RouteOutputs) -> ExecutionResult {
    let failed: Vec<String> = outputs
        .iter()
        .filter(|c| c.output.is_error())
        .map(|c| c.route.clone())
        .collect();

    let stderr = outputs
        .iter()
        .filter_map(|c| match &c.output {
            RouteOutput::Error(reason) => Some(format!("{}: {}", c.route, reason)),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n");

    let error = match failed.first() {
        Some(route) if failed.len() == outputs.len() => {
            Some(FailureInfo::from(&capture_error(route, outputs.get(route))))
        }
        _ => None,
    };

    ExecutionResult {
        success: error.is_none(),
        stdout: String::new(),
        stderr,
        exit_code: if error.is_none() { 0 } else { 1 },
        duration_ms: 0,
        per_route_output: Some(outputs),
        artifact: None,
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::PollBudget;
    use crate::core::ErrorKind;
    use crate::engine::capture::testing::FakeLauncher;
    use crate::engine::container::testing::{loopback_config, Behavior, FakeRuntime};

    struct Harness {
        coordinator: Coordinator,
        runtime: Arc<FakeRuntime>,
        launcher: Arc<FakeLauncher>,
        _root: tempfile::TempDir,
    }

    fn harness(behavior: Behavior, launcher: FakeLauncher) -> Harness {
        let root = tempfile::tempdir().unwrap();
        let mut config = PipelineConfig::default();
        config.runner.work_root = root.path().join("runs");
        config.container = loopback_config(&root.path().join("projects"));
        config.capture.readiness = PollBudget::new(3, Duration::from_millis(10));

        let runtime = FakeRuntime::new(behavior);
        let launcher = Arc::new(launcher);
        let coordinator = Coordinator::new(
            config,
            Arc::new(LanguageTable::embedded().unwrap()),
            runtime.clone(),
            launcher.clone(),
        )
        .unwrap();

        Harness {
            coordinator,
            runtime,
            launcher,
            _root: root,
        }
    }

    fn has_python() -> bool {
        has_tool("python3")
    }

    fn has_tool(name: &str) -> bool {
        std::process::Command::new(name)
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn react_files() -> BTreeMap<String, String> {
        let mut files = BTreeMap::new();
        files.insert(
            "src/App.jsx".to_string(),
            "export default function App() { return <h1>Hello</h1> }".to_string(),
        );
        files
    }

    fn routes(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_rejected_source_never_runs() {
        let h = harness(Behavior::Serve, FakeLauncher::default());
        let result = h
            .coordinator
            .execute_source("import os\nos.system('id')", "python", Duration::from_secs(5), CaptureMode::None)
            .await;

        assert!(!result.success);
        assert_eq!(result.error_kind(), Some(ErrorKind::ValidationRejected));
        assert!(result.stderr.contains("os"));
        assert!(result.stdout.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_language_is_rejected() {
        let h = harness(Behavior::Serve, FakeLauncher::default());
        let result = h
            .coordinator
            .execute_source("puts 1", "ruby", Duration::from_secs(5), CaptureMode::None)
            .await;

        assert_eq!(result.error_kind(), Some(ErrorKind::ValidationRejected));
        assert!(result.error.unwrap().message.contains("ruby"));

        let verdict = h.coordinator.validate("puts 1", "ruby");
        assert!(!verdict.allowed);
    }

    #[tokio::test]
    async fn test_python_hello() {
        if !has_python() {
            return;
        }
        let h = harness(Behavior::Serve, FakeLauncher::default());
        let result = h
            .coordinator
            .execute_source("print(\"hi\")", "python", Duration::from_secs(30), CaptureMode::None)
            .await;

        assert!(result.success, "{}", result.stderr);
        assert_eq!(result.stdout, "hi\n");
        assert_eq!(result.exit_code, 0);
        assert!(result.error.is_none());
        assert!(result.per_route_output.is_none());
    }

    #[tokio::test]
    async fn test_python_crash_keeps_output() {
        if !has_python() {
            return;
        }
        let h = harness(Behavior::Serve, FakeLauncher::default());
        let result = h
            .coordinator
            .execute_source("print('partial')\nraise SystemExit(3)", "python", Duration::from_secs(30), CaptureMode::None)
            .await;

        assert!(!result.success);
        assert_eq!(result.exit_code, 3);
        assert_eq!(result.stdout, "partial\n");
        assert_eq!(result.error_kind(), Some(ErrorKind::RuntimeCrashed));
    }

    #[tokio::test]
    async fn test_c_compile_error_skips_run() {
        if !has_tool("gcc") {
            return;
        }
        let h = harness(Behavior::Serve, FakeLauncher::default());
        let source = "#include <stdio.h>\nint main(void) {\n    printf(\"ran\\n\")\n    return 0;\n}\n";
        let result = h
            .coordinator
            .execute_source(source, "c", Duration::from_secs(30), CaptureMode::Screenshot { theme: None })
            .await;

        assert!(!result.success);
        assert_eq!(result.error_kind(), Some(ErrorKind::CompileFailed));
        assert_eq!(result.exit_code, 1);
        assert!(result.stderr.contains("error"), "{}", result.stderr);
        assert!(result.stdout.is_empty());
        assert!(result.artifact.is_none());
        assert_eq!(h.launcher.state.launches.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_code_screenshot_attached() {
        if !has_python() {
            return;
        }
        let h = harness(Behavior::Serve, FakeLauncher::default());
        let result = h
            .coordinator
            .execute_source(
                "print(2 + 2)",
                "python",
                Duration::from_secs(30),
                CaptureMode::Screenshot {
                    theme: Some("notepad".to_string()),
                },
            )
            .await;

        assert!(result.success);
        assert!(matches!(result.artifact, Some(Artifact::Png(_))));
        let visited = h.launcher.state.visited.lock().unwrap().clone();
        assert!(visited[0].starts_with("file://"));
    }

    #[tokio::test]
    async fn test_failed_code_screenshot_does_not_fail_run() {
        if !has_python() {
            return;
        }
        let h = harness(
            Behavior::Serve,
            FakeLauncher {
                fail_launch: true,
                ..Default::default()
            },
        );
        let result = h
            .coordinator
            .execute_source(
                "print('ok')",
                "python",
                Duration::from_secs(30),
                CaptureMode::Screenshot { theme: None },
            )
            .await;

        assert!(result.success);
        assert_eq!(result.stdout, "ok\n");
        assert!(result.artifact.is_none());
        assert!(result.stderr.contains("browser launch failed"));
    }

    #[tokio::test]
    async fn test_html_fragment_markup() {
        let h = harness(Behavior::Serve, FakeLauncher::default());
        let result = h
            .coordinator
            .execute_source("<h1>Hi</h1>", "html", Duration::from_secs(5), CaptureMode::Markup)
            .await;

        assert!(result.success);
        assert!(result.per_route_output.is_none());
        match result.artifact {
            Some(Artifact::Markup(markup)) => assert!(markup.starts_with("<!DOCTYPE html>")),
            other => panic!("unexpected artifact: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_web_assets_are_validated() {
        let h = harness(Behavior::Serve, FakeLauncher::default());
        let result = h
            .coordinator
            .execute_web(
                "<h1>Hi</h1>",
                Some("h1 { color: teal; }"),
                Some("document.querySelector('h1').textContent = 'Hello';"),
                Duration::from_secs(5),
                CaptureMode::Screenshot { theme: None },
            )
            .await;
        assert!(result.success, "{}", result.stderr);
        assert!(matches!(result.artifact, Some(Artifact::Png(_))));

        let result = h
            .coordinator
            .execute_web(
                "<h1>Hi</h1>",
                None,
                Some("new WebSocket('wss://evil.example')"),
                Duration::from_secs(5),
                CaptureMode::Markup,
            )
            .await;
        assert_eq!(result.error_kind(), Some(ErrorKind::ValidationRejected));
        assert!(result.stderr.contains("WebSocket"));
        assert_eq!(h.launcher.state.launches.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_html_capture_failure_is_reported() {
        let h = harness(
            Behavior::Serve,
            FakeLauncher {
                fail_launch: true,
                ..Default::default()
            },
        );
        let result = h
            .coordinator
            .execute_source("<p>x</p>", "html", Duration::from_secs(5), CaptureMode::Markup)
            .await;

        assert!(!result.success);
        assert_eq!(result.error_kind(), Some(ErrorKind::CaptureFailed));
        assert!(!result.stderr.is_empty());
    }

    #[tokio::test]
    async fn test_project_routes_and_teardown() {
        let h = harness(Behavior::Serve, FakeLauncher::default());
        let (result, outputs) = h
            .coordinator
            .execute_project(
                "react",
                react_files(),
                &routes(&["/", "about", "/"]),
                Duration::from_secs(10),
                CaptureMode::None,
                None,
            )
            .await;

        assert!(result.success, "{}", result.stderr);
        assert_eq!(outputs.routes().collect::<Vec<_>>(), vec!["/", "/about"]);
        assert!(outputs.failed_routes().is_empty());
        assert_eq!(result.per_route_output.as_ref(), Some(&outputs));
        assert_eq!(h.runtime.live_count(), 0);

        let visited = h.launcher.state.visited.lock().unwrap().clone();
        assert!(visited[1].ends_with("/about"));
    }

    #[tokio::test]
    async fn test_project_partial_capture_is_success() {
        let h = harness(
            Behavior::Serve,
            FakeLauncher {
                broken_urls: vec!["/missing".to_string()],
                ..Default::default()
            },
        );
        let (result, outputs) = h
            .coordinator
            .execute_project(
                "react",
                react_files(),
                &routes(&["/", "/missing"]),
                Duration::from_secs(10),
                CaptureMode::Markup,
                None,
            )
            .await;

        assert!(result.success);
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs.failed_routes(), vec!["/missing"]);
        assert!(result.stderr.starts_with("/missing: "));
    }

    #[tokio::test]
    async fn test_project_serve_timeout() {
        let h = harness(Behavior::Hang, FakeLauncher::default());
        let (result, outputs) = h
            .coordinator
            .execute_project(
                "vue",
                BTreeMap::new(),
                &routes(&["/", "/about"]),
                Duration::from_secs(10),
                CaptureMode::Markup,
                None,
            )
            .await;

        assert!(!result.success);
        assert_eq!(result.error_kind(), Some(ErrorKind::ServeTimeout));
        assert!(!result.stderr.is_empty());
        assert!(outputs.is_empty());
        assert!(result.per_route_output.is_none());
        assert_eq!(h.launcher.state.launches.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(h.runtime.live_count(), 0);
    }

    fn site_files() -> BTreeMap<String, String> {
        let mut files = BTreeMap::new();
        files.insert(
            "index.html".to_string(),
            "<link rel=\"stylesheet\" href=\"css/site.css\"><h1>Home</h1>".to_string(),
        );
        files.insert("css/site.css".to_string(), "h1 { color: navy; }".to_string());
        files.insert("pages/about.html".to_string(), "<h1>About</h1>".to_string());
        files
    }

    #[tokio::test]
    async fn test_static_site_loads_from_disk() {
        let h = harness(Behavior::Serve, FakeLauncher::default());
        let (result, outputs) = h
            .coordinator
            .execute_project("html", site_files(), &[], Duration::from_secs(10), CaptureMode::None, None)
            .await;

        assert!(result.success, "{}", result.stderr);
        assert_eq!(outputs.routes().collect::<Vec<_>>(), vec!["/"]);
        assert!(matches!(outputs.get("/"), Some(RouteOutput::Markup(_))));
        assert!(h.runtime.launched.lock().unwrap().is_empty());

        let visited = h.launcher.state.visited.lock().unwrap().clone();
        assert!(visited[0].starts_with("file://"));
        assert!(visited[0].ends_with("/index.html"));
    }

    #[tokio::test]
    async fn test_static_site_honors_entry_file() {
        let h = harness(Behavior::Serve, FakeLauncher::default());
        let (result, outputs) = h
            .coordinator
            .execute_project(
                "html",
                site_files(),
                &[],
                Duration::from_secs(10),
                CaptureMode::Screenshot { theme: None },
                Some("./pages/about.html"),
            )
            .await;

        assert!(result.success, "{}", result.stderr);
        assert!(matches!(outputs.get("/"), Some(RouteOutput::Image(_))));
        let visited = h.launcher.state.visited.lock().unwrap().clone();
        assert!(visited[0].ends_with("/pages/about.html"));
    }

    #[tokio::test]
    async fn test_static_site_without_entry_is_rejected() {
        let h = harness(Behavior::Serve, FakeLauncher::default());
        let (result, outputs) = h
            .coordinator
            .execute_project("html", site_files(), &[], Duration::from_secs(10), CaptureMode::Markup, Some("main.html"))
            .await;

        assert_eq!(result.error_kind(), Some(ErrorKind::ValidationRejected));
        assert!(result.stderr.contains("main.html"));
        assert!(outputs.is_empty());
        assert_eq!(h.launcher.state.launches.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_project_with_unsafe_path_is_rejected() {
        let h = harness(Behavior::Serve, FakeLauncher::default());
        let mut files = react_files();
        files.insert("../escape.js".to_string(), "x".to_string());

        let (result, _) = h
            .coordinator
            .execute_project("react", files, &[], Duration::from_secs(10), CaptureMode::Markup, None)
            .await;

        assert_eq!(result.error_kind(), Some(ErrorKind::ValidationRejected));
        assert!(h.runtime.launched.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_project_language_without_files_is_rejected() {
        let h = harness(Behavior::Serve, FakeLauncher::default());
        let result = h
            .coordinator
            .execute_source("<App />", "react", Duration::from_secs(5), CaptureMode::None)
            .await;
        assert_eq!(result.error_kind(), Some(ErrorKind::ValidationRejected));
    }
}
