//! Client configuration.

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Maximum number of requests in one batch call.
pub const MAX_BATCH_SIZE: usize = 50;

/// Configuration for a [`Client`](crate::Client).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the remote store, e.g. `https://api.example.com/1/`.
    pub server_url: String,
    /// Application identifier sent with every command.
    pub application_id: String,
    /// Client key, sent when no master key is configured.
    pub client_key: Option<String>,
    /// Master key. Grants unrestricted access; keep it off end-user devices.
    pub master_key: Option<String>,
    /// Client version string.
    pub client_version: String,
    /// Ask the server for revocable sessions.
    pub revocable_session: bool,
    /// Additional headers sent with every command.
    pub extra_headers: BTreeMap<String, String>,
    /// Requests per batch call.
    pub batch_size: usize,
    /// Per-request timeout (ms).
    pub timeout_ms: u64,
    pub app_build_version: Option<String>,
    pub app_display_version: Option<String>,
    pub os_version: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:1337/1/".to_string(),
            application_id: String::new(),
            client_key: None,
            master_key: None,
            client_version: concat!("rust", env!("CARGO_PKG_VERSION")).to_string(),
            revocable_session: false,
            extra_headers: BTreeMap::new(),
            batch_size: MAX_BATCH_SIZE,
            timeout_ms: 30_000,
            app_build_version: None,
            app_display_version: None,
            os_version: None,
        }
    }
}

impl ClientConfig {
    /// A configuration for `application_id` against `server_url`.
    pub fn new(server_url: impl Into<String>, application_id: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            application_id: application_id.into(),
            ..Default::default()
        }
    }

    /// Checks the configuration before a client is built from it.
    pub fn validate(&self) -> SyncResult<()> {
        if self.application_id.is_empty() {
            return Err(SyncError::Config("application_id is required".into()));
        }
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(SyncError::Config(format!(
                "batch_size must be within 1..={MAX_BATCH_SIZE}, got {}",
                self.batch_size
            )));
        }
        reqwest::Url::parse(&self.server_url)
            .map_err(|e| SyncError::Config(format!("invalid server_url {}: {e}", self.server_url)))?;
        Ok(())
    }
}
