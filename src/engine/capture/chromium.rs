//! Headless Chromium driven over the DevTools protocol

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tracing::{debug, info, warn};

use super::browser::{BrowserLauncher, BrowserSession, PageId};
use super::cdp::CdpConnection;

const DEVTOOLS_PREFIX: &str = "DevTools listening on ";

/// Grace period for the browser to exit after `Browser.close`
const EXIT_GRACE: Duration = Duration::from_secs(5);

pub struct ChromiumLauncher {
    path: PathBuf,
    command_timeout: Duration,
}

impl ChromiumLauncher {
    pub fn new(path: impl Into<PathBuf>, command_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            command_timeout,
        }
    }

    fn args(profile: &TempDir) -> Vec<String> {
        vec![
            "--headless=new".to_string(),
            "--remote-debugging-port=0".to_string(),
            format!("--user-data-dir={}", profile.path().display()),
            "--no-sandbox".to_string(),
            "--disable-setuid-sandbox".to_string(),
            "--disable-gpu".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--no-first-run".to_string(),
            "--no-default-browser-check".to_string(),
            "--hide-scrollbars".to_string(),
            "--mute-audio".to_string(),
            "about:blank".to_string(),
        ]
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>> {
        let profile = tempfile::Builder::new()
            .prefix("codeshot-browser-")
            .tempdir()
            .context("Failed to create browser profile directory")?;

        let mut child = Command::new(&self.path)
            .args(Self::args(&profile))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn browser {:?}", self.path))?;

        let stderr = child.stderr.take().context("Browser stderr not captured")?;
        let ws_url = match tokio::time::timeout(self.command_timeout, devtools_url(stderr)).await {
            Ok(Ok(url)) => url,
            Ok(Err(e)) => {
                let _ = child.kill().await;
                return Err(e);
            }
            Err(_) => {
                let _ = child.kill().await;
                anyhow::bail!("Browser did not expose DevTools within {:?}", self.command_timeout);
            }
        };

        let conn = match CdpConnection::connect(&ws_url, self.command_timeout).await {
            Ok(conn) => conn,
            Err(e) => {
                let _ = child.kill().await;
                return Err(e);
            }
        };
        info!(pid = child.id(), "Browser launched");

        Ok(Box::new(ChromiumSession {
            child,
            _profile: profile,
            conn,
        }))
    }
}

/// Read stderr until the DevTools endpoint is announced, then keep draining it
async fn devtools_url(stderr: ChildStderr) -> Result<String> {
    let mut lines = BufReader::new(stderr).lines();
    while let Some(line) = lines.next_line().await? {
        if let Some(url) = parse_devtools_line(&line) {
            tokio::spawn(async move {
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "codeshot::browser", "{}", line);
                }
            });
            return Ok(url);
        }
        debug!(target: "codeshot::browser", "{}", line);
    }
    anyhow::bail!("Browser exited before exposing DevTools")
}

fn parse_devtools_line(line: &str) -> Option<String> {
    line.trim()
        .strip_prefix(DEVTOOLS_PREFIX)
        .filter(|url| url.starts_with("ws://"))
        .map(str::to_string)
}

pub struct ChromiumSession {
    child: Child,
    // Profile directory lives as long as the browser
    _profile: TempDir,
    conn: CdpConnection,
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn open_page(&mut self, viewport: (u32, u32)) -> Result<PageId> {
        let created = self
            .conn
            .call("Target.createTarget", json!({ "url": "about:blank" }), None)
            .await?;
        let target_id = str_field(&created, "targetId")?;

        let attached = self
            .conn
            .call(
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
                None,
            )
            .await?;
        let session_id = str_field(&attached, "sessionId")?;
        let session = Some(session_id.as_str());

        self.conn.call("Page.enable", json!({}), session).await?;
        self.conn
            .call(
                "Emulation.setDeviceMetricsOverride",
                json!({
                    "width": viewport.0,
                    "height": viewport.1,
                    "deviceScaleFactor": 1,
                    "mobile": false,
                }),
                session,
            )
            .await?;

        debug!(%target_id, width = viewport.0, height = viewport.1, "Page opened");
        Ok(PageId {
            target_id,
            session_id,
        })
    }

    async fn navigate(&mut self, page: &PageId, url: &str) -> Result<()> {
        let session = Some(page.session_id.as_str());
        // Load events from an earlier navigation must not satisfy this one
        self.conn.discard_events(&page.session_id);

        let navigated = self
            .conn
            .call("Page.navigate", json!({ "url": url }), session)
            .await?;
        if let Some(error) = navigated.get("errorText").and_then(Value::as_str) {
            if !error.is_empty() {
                anyhow::bail!("Navigation to {} failed: {}", url, error);
            }
        }

        self.conn.wait_event("Page.loadEventFired", session).await?;
        Ok(())
    }

    async fn evaluate(&mut self, page: &PageId, expression: &str) -> Result<Value> {
        let mut reply = self
            .conn
            .call(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
                Some(page.session_id.as_str()),
            )
            .await?;

        if let Some(details) = reply.get("exceptionDetails") {
            let text = details
                .pointer("/exception/description")
                .or_else(|| details.get("text"))
                .and_then(Value::as_str)
                .unwrap_or("uncaught exception");
            anyhow::bail!("Evaluation failed: {}", text);
        }

        Ok(reply
            .pointer_mut("/result/value")
            .map(Value::take)
            .unwrap_or(Value::Null))
    }

    async fn screenshot(&mut self, page: &PageId) -> Result<Vec<u8>> {
        let session = Some(page.session_id.as_str());
        let metrics = self
            .conn
            .call("Page.getLayoutMetrics", json!({}), session)
            .await?;
        let size = metrics
            .get("cssContentSize")
            .or_else(|| metrics.get("contentSize"))
            .context("Layout metrics missing content size")?;
        let width = size.get("width").and_then(Value::as_f64).unwrap_or(0.0).ceil();
        let height = size.get("height").and_then(Value::as_f64).unwrap_or(0.0).ceil();

        let shot = self
            .conn
            .call(
                "Page.captureScreenshot",
                json!({
                    "format": "png",
                    "captureBeyondViewport": true,
                    "clip": { "x": 0, "y": 0, "width": width, "height": height, "scale": 1 },
                }),
                session,
            )
            .await?;

        let data = shot
            .get("data")
            .and_then(Value::as_str)
            .context("Screenshot reply missing data")?;
        STANDARD.decode(data).context("Screenshot is not valid base64")
    }

    async fn close_page(&mut self, page: &PageId) -> Result<()> {
        self.conn.discard_events(&page.session_id);
        self.conn
            .call(
                "Target.closeTarget",
                json!({ "targetId": page.target_id }),
                None,
            )
            .await?;
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let mut this = self;
        if let Err(e) = this.conn.call("Browser.close", json!({}), None).await {
            debug!("Browser.close failed: {:#}", e);
        }

        match tokio::time::timeout(EXIT_GRACE, this.child.wait()).await {
            Ok(Ok(status)) => debug!(?status, "Browser exited"),
            Ok(Err(e)) => warn!("Failed to wait for browser: {}", e),
            Err(_) => {
                warn!("Browser did not exit in time, killing it");
                this.child.kill().await.context("Failed to kill browser")?;
            }
        }
        Ok(())
    }
}

fn str_field(value: &Value, field: &str) -> Result<String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .with_context(|| format!("DevTools reply missing {}", field))
}
