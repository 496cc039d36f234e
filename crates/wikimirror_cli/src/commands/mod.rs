//! CLI command implementations.

pub mod content;
pub mod status;
pub mod sync;
pub mod verify;

use crate::client::ReqwestClient;
use std::path::Path;
use std::time::Duration;
use wikimirror_store::{Mirror, MirrorConfig};
use wikimirror_sync::ApiTransport;

/// Where and how to reach the remote wiki.
pub struct Remote {
    /// Action API endpoint.
    pub api_url: String,
    /// Request timeout.
    pub timeout: Duration,
    /// User agent override.
    pub user_agent: Option<String>,
}

impl Remote {
    /// Returns the user agent to send.
    pub fn user_agent(&self) -> String {
        self.user_agent
            .clone()
            .unwrap_or_else(|| format!("wikimirror/{}", env!("CARGO_PKG_VERSION")))
    }

    /// Opens a transport to the remote.
    pub fn connect(&self) -> Result<ApiTransport<ReqwestClient>, Box<dyn std::error::Error>> {
        let client = ReqwestClient::new(&self.user_agent(), self.timeout)?;
        Ok(ApiTransport::new(self.api_url.clone(), client))
    }
}

/// Opens the mirror at `path`, creating it only if `create` is set.
pub fn open_mirror(path: &Path, create: bool) -> Result<Mirror, Box<dyn std::error::Error>> {
    if !create && !path.exists() {
        return Err(format!("No mirror found at {:?}", path).into());
    }
    Ok(Mirror::open_with_config(
        path,
        MirrorConfig::new().create_if_missing(create),
    )?)
}
