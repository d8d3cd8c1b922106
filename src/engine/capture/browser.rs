//! Headless browser seam

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

/// A page opened in a browser session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageId {
    pub target_id: String,
    pub session_id: String,
}

/// Starts browser sessions; one session serves a whole capture batch
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>>;
}

#[async_trait]
pub trait BrowserSession: Send {
    /// Open a blank page with the given viewport
    async fn open_page(&mut self, viewport: (u32, u32)) -> Result<PageId>;

    /// Navigate and wait for the load event
    async fn navigate(&mut self, page: &PageId, url: &str) -> Result<()>;

    /// Evaluate an expression in the page and return its JSON value
    async fn evaluate(&mut self, page: &PageId, expression: &str) -> Result<Value>;

    /// Full-page PNG
    async fn screenshot(&mut self, page: &PageId) -> Result<Vec<u8>>;

    async fn close_page(&mut self, page: &PageId) -> Result<()>;

    /// Shut the browser down
    async fn close(self: Box<Self>) -> Result<()>;
}
