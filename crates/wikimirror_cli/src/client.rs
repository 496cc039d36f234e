//! Blocking HTTP client for the action API.

use reqwest::blocking::Client;
use std::time::Duration;
use wikimirror_sync::HttpClient;

/// `HttpClient` backed by `reqwest`.
pub struct ReqwestClient {
    client: Client,
}

impl ReqwestClient {
    /// Creates a client sending `user_agent` and giving up after `timeout`.
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl HttpClient for ReqwestClient {
    fn get(&self, url: &str, params: &[(String, String)]) -> Result<String, String> {
        let response = self
            .client
            .get(url)
            .query(params)
            .send()
            .map_err(|e| e.to_string())?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP {status} from {url}"));
        }
        response.text().map_err(|e| e.to_string())
    }

    fn is_healthy(&self) -> bool {
        true
    }
}
