//! Capture engine
//!
//! Loads an execution target in a headless browser and extracts either the
//! realized DOM or a full-page PNG for each requested route. One browser
//! session serves the whole batch; routes are captured one page at a time and
//! a failing route only marks its own entry.

pub mod browser;
pub mod cdp;
pub mod chromium;
pub mod render;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::core::config::{CaptureConfig, PollBudget};
use crate::core::{PipelineError, RouteOutput, RouteOutputs};

pub use browser::{BrowserLauncher, BrowserSession, PageId};
pub use chromium::ChromiumLauncher;

const MARKUP_EXPRESSION: &str = "document.documentElement.outerHTML";
const DOCTYPE: &str = "<!DOCTYPE html>\n";

/// What the browser loads
#[derive(Debug, Clone)]
pub enum CaptureTarget {
    /// Live server; each route is appended to the base URL
    Endpoint { base_url: String },
    /// Local document, the same for every route
    File { path: PathBuf },
    /// Markup written to a scratch file before loading
    Markup { html: String },
}

/// Signal that a page finished rendering
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadyProbe {
    DocumentComplete,
    /// Element matching the selector has at least one child element
    MountNode(String),
}

impl ReadyProbe {
    fn expression(&self) -> String {
        match self {
            ReadyProbe::DocumentComplete => "document.readyState === 'complete'".to_string(),
            ReadyProbe::MountNode(selector) => format!(
                "(() => {{ const el = document.querySelector({}); \
                 return document.readyState !== 'loading' && !!el && el.children.length > 0; }})()",
                Value::String(selector.clone())
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureKind {
    Markup,
    Screenshot,
}

/// Per-batch capture settings
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    pub kind: CaptureKind,
    pub probe: ReadyProbe,
    pub viewport: (u32, u32),
}

pub struct CaptureEngine {
    config: CaptureConfig,
    launcher: Arc<dyn BrowserLauncher>,
}

impl CaptureEngine {
    pub fn new(config: CaptureConfig, launcher: Arc<dyn BrowserLauncher>) -> Self {
        Self { config, launcher }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Capture every route of `target`. The result holds exactly one entry
    /// per route, in order; failures become [`RouteOutput::Error`].
    pub async fn capture(
        &self,
        target: &CaptureTarget,
        routes: &[String],
        options: &CaptureOptions,
    ) -> RouteOutputs {
        let mut outputs = RouteOutputs::new();

        // Keeps the scratch file alive until the batch is done
        let (base, _scratch) = match resolve_target(target).await {
            Ok(resolved) => resolved,
            Err(e) => {
                fail_all(&mut outputs, routes, &format!("{:#}", e));
                return outputs;
            }
        };

        let mut session = match self.launcher.launch().await {
            Ok(session) => session,
            Err(e) => {
                warn!("Browser launch failed: {:#}", e);
                fail_all(&mut outputs, routes, &format!("browser launch failed: {:#}", e));
                return outputs;
            }
        };

        for route in routes {
            let url = base.url_for(route);
            let output = match self
                .capture_route(session.as_mut(), &url, options)
                .await
            {
                Ok(output) => {
                    debug!(route = %route, %url, "Route captured");
                    output
                }
                Err(e) => {
                    warn!(route = %route, %url, "Route capture failed: {:#}", e);
                    RouteOutput::Error(format!("{}: {:#}", url, e))
                }
            };
            outputs.insert(route.clone(), output);
        }

        if let Err(e) = session.close().await {
            warn!("Failed to close browser: {:#}", e);
        }

        info!(
            routes = outputs.len(),
            failed = outputs.failed_routes().len(),
            "Capture batch finished"
        );
        outputs
    }

    async fn capture_route(
        &self,
        session: &mut dyn BrowserSession,
        url: &str,
        options: &CaptureOptions,
    ) -> Result<RouteOutput> {
        let page = session.open_page(options.viewport).await?;
        let result = self.render_page(session, &page, url, options).await;
        if let Err(e) = session.close_page(&page).await {
            debug!("Failed to close page: {:#}", e);
        }
        result
    }

    async fn render_page(
        &self,
        session: &mut dyn BrowserSession,
        page: &PageId,
        url: &str,
        options: &CaptureOptions,
    ) -> Result<RouteOutput> {
        session.navigate(page, url).await?;
        wait_for_render(session, page, &options.probe, self.config.readiness).await?;

        match options.kind {
            CaptureKind::Markup => {
                let markup = session.evaluate(page, MARKUP_EXPRESSION).await?;
                let markup = markup
                    .as_str()
                    .context("Page did not return its markup")?;
                Ok(RouteOutput::Markup(format!("{}{}", DOCTYPE, markup)))
            }
            CaptureKind::Screenshot => {
                let png = session.screenshot(page).await?;
                Ok(RouteOutput::Image(STANDARD.encode(png)))
            }
        }
    }
}

/// Poll the readiness probe until it holds or the budget runs out.
///
/// The budget bounds wall-clock time as well as attempts; a probe that stalls
/// is abandoned once the deadline passes.
async fn wait_for_render(
    session: &mut dyn BrowserSession,
    page: &PageId,
    probe: &ReadyProbe,
    budget: PollBudget,
) -> Result<()> {
    let expression = probe.expression();
    let deadline = Instant::now() + budget.total();
    let mut last_error = None;
    let mut attempts = 0;

    while attempts < budget.attempts {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if attempts > 0 && remaining.is_zero() {
            break;
        }
        attempts += 1;

        match tokio::time::timeout(remaining, session.evaluate(page, &expression)).await {
            Ok(Ok(Value::Bool(true))) => return Ok(()),
            Ok(Ok(_)) => {}
            Ok(Err(e)) => last_error = Some(e),
            Err(_) => {
                last_error = Some(anyhow::anyhow!(
                    "readiness check still pending after {:?}",
                    budget.total()
                ));
                break;
            }
        }

        if attempts < budget.attempts {
            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep(budget.interval.min(remaining)).await;
        }
    }

    match last_error {
        Some(e) => Err(e.context(format!("page not rendered after {} attempts", attempts))),
        None => anyhow::bail!("page not rendered after {} attempts", attempts),
    }
}

enum BaseLocation {
    Http(String),
    File(String),
}

impl BaseLocation {
    fn url_for(&self, route: &str) -> String {
        match self {
            BaseLocation::Http(base) => format!("{}{}", base.trim_end_matches('/'), route),
            BaseLocation::File(url) => url.clone(),
        }
    }
}

async fn resolve_target(target: &CaptureTarget) -> Result<(BaseLocation, Option<tempfile::TempDir>)> {
    match target {
        CaptureTarget::Endpoint { base_url } => Ok((BaseLocation::Http(base_url.clone()), None)),
        CaptureTarget::File { path } => Ok((BaseLocation::File(file_url(path)?), None)),
        CaptureTarget::Markup { html } => {
            let dir = tempfile::Builder::new()
                .prefix("codeshot-render-")
                .tempdir()
                .context("Failed to create render directory")?;
            let path = dir.path().join("index.html");
            tokio::fs::write(&path, html)
                .await
                .context("Failed to write render file")?;
            Ok((BaseLocation::File(file_url(&path)?), Some(dir)))
        }
    }
}

fn file_url(path: &std::path::Path) -> Result<String> {
    let absolute = std::path::absolute(path)
        .with_context(|| format!("Cannot resolve {:?}", path))?;
    Ok(format!("file://{}", absolute.display()))
}

fn fail_all(outputs: &mut RouteOutputs, routes: &[String], reason: &str) {
    for route in routes {
        outputs.insert(route.clone(), RouteOutput::Error(reason.to_string()));
    }
}

/// Turn the marker of a failed route back into a pipeline error
pub fn capture_error(route: &str, output: Option<&RouteOutput>) -> PipelineError {
    let reason = match output {
        Some(RouteOutput::Error(reason)) => reason.clone(),
        Some(_) => "unexpected output kind".to_string(),
        None => "route was not captured".to_string(),
    };
    PipelineError::CaptureFailed {
        route: route.to_string(),
        reason,
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use super::testing::FakeLauncher;
    use super::*;

    fn engine(launcher: Arc<FakeLauncher>) -> CaptureEngine {
        let config = CaptureConfig {
            readiness: PollBudget::new(3, Duration::from_millis(10)),
            ..Default::default()
        };
        CaptureEngine::new(config, launcher)
    }

    fn routes(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn markup_options() -> CaptureOptions {
        CaptureOptions {
            kind: CaptureKind::Markup,
            probe: ReadyProbe::MountNode("#root".to_string()),
            viewport: (1200, 800),
        }
    }

    #[tokio::test]
    async fn test_one_session_for_all_routes() {
        let launcher = FakeLauncher::new();
        let target = CaptureTarget::Endpoint {
            base_url: "http://codeshot-abc:24000/".to_string(),
        };

        let outputs = engine(launcher.clone())
            .capture(&target, &routes(&["/", "/about"]), &markup_options())
            .await;

        assert_eq!(outputs.routes().collect::<Vec<_>>(), vec!["/", "/about"]);
        match outputs.get("/about") {
            Some(RouteOutput::Markup(html)) => {
                assert!(html.starts_with("<!DOCTYPE html>\n<html>"));
                assert!(html.contains("http://codeshot-abc:24000/about"));
            }
            other => panic!("unexpected output: {:?}", other),
        }
        assert_eq!(launcher.state.launches.load(Ordering::SeqCst), 1);
        assert_eq!(launcher.state.closed_sessions.load(Ordering::SeqCst), 1);
        assert_eq!(launcher.state.open_pages.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_route_does_not_abort_batch() {
        let launcher = Arc::new(FakeLauncher {
            broken_urls: vec!["/broken".to_string()],
            ..Default::default()
        });
        let target = CaptureTarget::Endpoint {
            base_url: "http://127.0.0.1:24000".to_string(),
        };

        let outputs = engine(launcher.clone())
            .capture(&target, &routes(&["/", "/broken", "/contact"]), &markup_options())
            .await;

        assert_eq!(outputs.len(), 3);
        assert_eq!(outputs.failed_routes(), vec!["/broken"]);
        match outputs.get("/broken") {
            Some(RouteOutput::Error(message)) => {
                assert!(message.starts_with("http://127.0.0.1:24000/broken"));
                assert!(message.contains("ERR_CONNECTION_REFUSED"));
            }
            other => panic!("unexpected output: {:?}", other),
        }
        assert!(matches!(outputs.get("/contact"), Some(RouteOutput::Markup(_))));
        assert_eq!(launcher.state.closed_sessions.load(Ordering::SeqCst), 1);
        assert_eq!(launcher.state.open_pages.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_never_ready_marks_route() {
        let launcher = Arc::new(FakeLauncher {
            never_ready: true,
            ..Default::default()
        });
        let target = CaptureTarget::Endpoint {
            base_url: "http://127.0.0.1:24000".to_string(),
        };

        let outputs = engine(launcher)
            .capture(&target, &routes(&["/"]), &markup_options())
            .await;

        match outputs.get("/") {
            Some(RouteOutput::Error(message)) => assert!(message.contains("not rendered after 3 attempts")),
            other => panic!("unexpected output: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stalled_readiness_check_respects_budget() {
        let launcher = Arc::new(FakeLauncher {
            probe_delay: Some(Duration::from_millis(300)),
            ..Default::default()
        });
        let config = CaptureConfig {
            readiness: PollBudget::new(10, Duration::from_millis(10)),
            ..Default::default()
        };
        let target = CaptureTarget::Endpoint {
            base_url: "http://127.0.0.1:24000".to_string(),
        };

        let started = std::time::Instant::now();
        let outputs = CaptureEngine::new(config, launcher.clone())
            .capture(&target, &routes(&["/"]), &markup_options())
            .await;
        let elapsed = started.elapsed();

        assert!(elapsed < Duration::from_millis(250), "took {:?}", elapsed);
        match outputs.get("/") {
            Some(RouteOutput::Error(message)) => {
                assert!(message.contains("page not rendered after 1 attempts"), "{}", message);
                assert!(message.contains("still pending"), "{}", message);
            }
            other => panic!("unexpected output: {:?}", other),
        }
        assert_eq!(launcher.state.closed_sessions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_launch_failure_marks_every_route() {
        let launcher = Arc::new(FakeLauncher {
            fail_launch: true,
            ..Default::default()
        });
        let target = CaptureTarget::Endpoint {
            base_url: "http://127.0.0.1:24000".to_string(),
        };

        let outputs = engine(launcher)
            .capture(&target, &routes(&["/", "/about"]), &markup_options())
            .await;

        assert_eq!(outputs.failed_routes(), vec!["/", "/about"]);
        let err = capture_error("/about", outputs.get("/about"));
        assert_eq!(err.kind(), crate::core::ErrorKind::CaptureFailed);
        assert!(err.to_string().contains("browser launch failed: no browser installed"));
    }

    #[tokio::test]
    async fn test_markup_target_is_loaded_from_file() {
        let launcher = FakeLauncher::new();
        let target = CaptureTarget::Markup {
            html: "<html><body><h1>Hi</h1></body></html>".to_string(),
        };
        let options = CaptureOptions {
            kind: CaptureKind::Screenshot,
            probe: ReadyProbe::DocumentComplete,
            viewport: (900, 600),
        };

        let outputs = engine(launcher.clone())
            .capture(&target, &routes(&["/"]), &options)
            .await;

        let visited = launcher.state.visited.lock().unwrap().clone();
        assert_eq!(visited.len(), 1);
        assert!(visited[0].starts_with("file://"));
        assert!(visited[0].ends_with("/index.html"));
        match outputs.get("/") {
            Some(RouteOutput::Image(data)) => {
                assert_eq!(STANDARD.decode(data).unwrap(), b"\x89PNG\r\n\x1a\nfake");
            }
            other => panic!("unexpected output: {:?}", other),
        }
    }

    #[test]
    fn test_probe_expression_quotes_selector() {
        let expr = ReadyProbe::MountNode("#app".to_string()).expression();
        assert!(expr.contains("document.querySelector(\"#app\")"));
        assert_eq!(
            ReadyProbe::DocumentComplete.expression(),
            "document.readyState === 'complete'"
        );
    }
}
