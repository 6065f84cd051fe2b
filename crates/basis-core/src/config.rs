// ── Runtime sync configuration ──
//
// Describes *how* to reach the Basis cloud and how often to poll it.
// Never touches disk: the host (CLI, config crate) builds a
// `ControllerConfig` and hands it in.

use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use crate::error::CoreError;

/// Production API endpoint.
pub const DEFAULT_API_URL: &str = "https://api.wearebasis.io";

/// Production OAuth2 token endpoint.
pub const DEFAULT_TOKEN_URL: &str = "https://auth.wearebasis.com/oauth/token";

/// OAuth2 client registration used for the refresh grant.
#[derive(Debug, Clone)]
pub struct OAuthClientConfig {
    pub token_url: Url,
    pub client_id: String,
    pub client_secret: Option<SecretString>,
}

/// Configuration for one cloud account.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Cloud REST base URL.
    pub api_url: Url,
    pub oauth: OAuthClientConfig,
    /// Bound on every HTTP request.
    pub timeout: Duration,
    /// Real-time telemetry cadence.
    pub fast_interval: Duration,
    /// Energy statistics cadence.
    pub slow_interval: Duration,
    /// Panel re-discovery cadence. `Duration::ZERO` disables it.
    pub discovery_interval: Duration,
    /// A panel with no successful telemetry for this many fast intervals
    /// is marked disconnected.
    pub stale_after_intervals: u32,
    /// Refresh the access token this long before it expires.
    pub refresh_margin: Duration,
    pub user_agent: String,
}

impl ControllerConfig {
    pub fn new(api_url: Url, oauth: OAuthClientConfig) -> Self {
        Self {
            api_url,
            oauth,
            timeout: Duration::from_secs(30),
            fast_interval: Duration::from_secs(30),
            slow_interval: Duration::from_secs(5 * 60),
            discovery_interval: Duration::from_secs(5 * 60),
            stale_after_intervals: 3,
            refresh_margin: basis_api::DEFAULT_REFRESH_MARGIN,
            user_agent: basis_api::DEFAULT_USER_AGENT.to_owned(),
        }
    }

    /// How long a panel may go without a successful fetch before it is
    /// considered disconnected.
    pub fn stale_after(&self) -> Duration {
        self.fast_interval
            .saturating_mul(self.stale_after_intervals.max(1))
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.fast_interval.is_zero() {
            return Err(CoreError::Config {
                message: "fast_interval must be greater than zero".into(),
            });
        }
        if self.slow_interval.is_zero() {
            return Err(CoreError::Config {
                message: "slow_interval must be greater than zero".into(),
            });
        }
        if self.timeout.is_zero() {
            return Err(CoreError::Config {
                message: "timeout must be greater than zero".into(),
            });
        }
        Ok(())
    }

    pub(crate) fn transport(&self) -> basis_api::TransportConfig {
        basis_api::TransportConfig {
            timeout: self.timeout,
            user_agent: self.user_agent.clone(),
        }
    }

    pub(crate) fn oauth_settings(&self) -> basis_api::OAuthSettings {
        basis_api::OAuthSettings {
            token_url: self.oauth.token_url.clone(),
            client_id: self.oauth.client_id.clone(),
            client_secret: self.oauth.client_secret.clone(),
        }
    }
}
