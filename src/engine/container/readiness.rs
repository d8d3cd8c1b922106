use std::time::Duration;

use tracing::{debug, info};

use super::runtime::ContainerRuntime;
use crate::core::config::PollBudget;
use crate::core::PipelineError;

/// Placeholder used when a container produced no output at all
const NO_LOGS: &str = "(container produced no output)";

/// Result of one probe attempt
#[derive(Debug, PartialEq, Eq)]
pub enum Probe {
    Ready,
    /// Endpoint is not serving markup yet
    NotReady(String),
    /// Container is gone
    Dead,
}

/// Poll the container until its endpoint serves markup.
///
/// Liveness is checked before every readiness probe so that a crashed
/// install fails fast instead of waiting out the whole budget.
pub async fn wait_until_ready(
    runtime: &dyn ContainerRuntime,
    client: &reqwest::Client,
    id: &str,
    url: &str,
    budget: PollBudget,
    log_tail: usize,
) -> Result<(), PipelineError> {
    let mut last_reason = String::from("not probed");

    for attempt in 1..=budget.attempts {
        match probe(runtime, client, id, url, budget.interval).await {
            Probe::Ready => {
                info!(id, url, attempt, "Dev server ready");
                return Ok(());
            }
            Probe::Dead => {
                let logs = collect_logs(runtime, id, log_tail).await;
                return Err(PipelineError::ContainerCrashed { logs });
            }
            Probe::NotReady(reason) => {
                debug!(id, attempt, "Not ready yet: {}", reason);
                last_reason = reason;
            }
        }
        if attempt < budget.attempts {
            tokio::time::sleep(budget.interval).await;
        }
    }

    info!(id, url, "Dev server not ready after {} attempts: {}", budget.attempts, last_reason);
    let logs = collect_logs(runtime, id, log_tail).await;
    Err(PipelineError::ServeTimeout { logs })
}

async fn probe(
    runtime: &dyn ContainerRuntime,
    client: &reqwest::Client,
    id: &str,
    url: &str,
    interval: Duration,
) -> Probe {
    match runtime.is_running(id).await {
        Ok(true) => {}
        Ok(false) => return Probe::Dead,
        Err(e) => return Probe::NotReady(format!("inspect failed: {:#}", e)),
    }

    let request_timeout = interval.max(Duration::from_secs(1));
    let response = match client.get(url).timeout(request_timeout).send().await {
        Ok(response) => response,
        Err(e) => return Probe::NotReady(e.to_string()),
    };

    let status = response.status();
    if !status.is_success() {
        return Probe::NotReady(format!("status {}", status));
    }

    match response.text().await {
        Ok(body) if is_markup(&body) => Probe::Ready,
        Ok(_) => Probe::NotReady("response is not an HTML document".to_string()),
        Err(e) => Probe::NotReady(e.to_string()),
    }
}

fn is_markup(body: &str) -> bool {
    body.to_ascii_lowercase().contains("<html")
}

/// Container logs for diagnostics, never empty
pub async fn collect_logs(runtime: &dyn ContainerRuntime, id: &str, tail: usize) -> String {
    match runtime.logs(id, tail).await {
        Ok(logs) if !logs.trim().is_empty() => logs,
        Ok(_) => NO_LOGS.to_string(),
        Err(e) => format!("(logs unavailable: {:#})", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_markup_detection() {
        assert!(is_markup("<!doctype html>\n<HTML lang=\"en\"></HTML>"));
        assert!(!is_markup("Cannot GET /"));
        assert!(!is_markup(""));
    }
}
