// Shared transport configuration for building reqwest::Client instances.
//
// The token endpoint and the cloud client share timeout and user-agent
// settings through this module.

use std::time::Duration;

/// Default User-Agent sent with every request.
pub const DEFAULT_USER_AGENT: &str = concat!("BasisPanelSync/", env!("CARGO_PKG_VERSION"));

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Bound on every request. Exceeding it yields `Error::Transient`.
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` from this config.
    pub fn build_client(&self) -> Result<reqwest::Client, crate::error::Error> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.timeout)
            .user_agent(self.user_agent.as_str())
            .build()?;
        Ok(client)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}
