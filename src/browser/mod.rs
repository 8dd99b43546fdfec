//! Remote browser sessions and the CDP driver used by the local step loop.

mod browserbase;
mod cdp;

pub use browserbase::BrowserbaseClient;
pub use cdp::{BrowserAction, BrowserConnector, BrowserDriver, CdpConnector};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::providers::ProviderError;

/// A provisioned remote browser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserSession {
    pub id: String,
    /// CDP WebSocket endpoint
    pub cdp_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live_view_url: Option<String>,
}

/// Creates and releases remote browser sessions.
#[async_trait]
pub trait BrowserSessionProvider: Send + Sync {
    async fn create_session(&self) -> Result<BrowserSession, ProviderError>;

    async fn release_session(&self, session_id: &str) -> Result<(), ProviderError>;
}
