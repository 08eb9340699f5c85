use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single browser automation request (navigate, click, read DOM, ...).
/// The concrete action vocabulary belongs to whatever drives a real browser
/// and is out of scope here — this crate only defines the boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserRequest {
    pub action: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserResponse {
    pub result: serde_json::Value,
}

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("browser automation is not configured")]
    NotConfigured,
    #[error("browser request failed: {0}")]
    Execution(String),
}

/// The boundary between the gateway's `browser.request` method and whatever
/// drives an actual browser. Concrete implementations (a CDP client, a
/// sidecar process) live on the other side of this trait.
#[async_trait]
pub trait BrowserHandler: Send + Sync {
    async fn request(&self, req: BrowserRequest) -> Result<BrowserResponse, BrowserError>;
}

/// Default handler used when no browser backend is configured: every
/// request fails with `NotConfigured` rather than panicking or silently
/// succeeding.
pub struct NullBrowser;

#[async_trait]
impl BrowserHandler for NullBrowser {
    async fn request(&self, _req: BrowserRequest) -> Result<BrowserResponse, BrowserError> {
        Err(BrowserError::NotConfigured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_browser_always_reports_not_configured() {
        let browser = NullBrowser;
        let err = browser
            .request(BrowserRequest {
                action: "navigate".into(),
                params: serde_json::json!({"url": "https://example.com"}),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BrowserError::NotConfigured));
    }
}
