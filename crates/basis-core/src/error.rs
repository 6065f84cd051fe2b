// ── Core error types ──
//
// User-facing errors from basis-core. Consumers never see HTTP status
// codes or JSON parse failures directly; `From<basis_api::Error>`
// translates transport-layer errors into domain variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Authentication ───────────────────────────────────────────────
    /// The refresh token is dead. The host must rerun the OAuth2 flow and
    /// call `Controller::reconfigure`.
    #[error("Re-authentication required -- stored credentials were rejected")]
    ReauthRequired,

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Panel not found: {panel_id}")]
    PanelNotFound { panel_id: String },

    #[error("Circuit not found: {circuit_id} on panel {panel_id}")]
    CircuitNotFound { panel_id: String, circuit_id: String },

    // ── Operation errors ─────────────────────────────────────────────
    #[error("Circuit {circuit_id} does not support standby")]
    StandbyUnsupported { circuit_id: String },

    #[error("Controller is not running -- call start() first")]
    NotStarted,

    // ── API errors (wrapped, not exposed raw) ────────────────────────
    #[error("API error: {message}")]
    Api {
        message: String,
        /// HTTP status code (if applicable).
        status: Option<u16>,
        /// Worth retrying later.
        transient: bool,
    },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl CoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Api { transient: true, .. })
    }
}

/// Why a standby command did not take effect.
///
/// Delivered through a `StandbyTicket` and broadcast as a
/// `ControlEvent`; the visible value has already been rolled back when
/// this is observed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ControlError {
    #[error("Standby command rejected: {message}")]
    Rejected { message: String },

    #[error("Standby command timed out or the cloud was unreachable")]
    Timeout,
}

impl From<&basis_api::Error> for ControlError {
    fn from(err: &basis_api::Error) -> Self {
        if err.is_transient() {
            Self::Timeout
        } else {
            Self::Rejected {
                message: err.to_string(),
            }
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<basis_api::Error> for CoreError {
    fn from(err: basis_api::Error) -> Self {
        let transient = err.is_transient();
        match err {
            basis_api::Error::Auth(basis_api::AuthError::ReauthRequired) => CoreError::ReauthRequired,
            basis_api::Error::Auth(basis_api::AuthError::Transient { message }) => CoreError::Api {
                message: format!("Token refresh failed: {message}"),
                status: None,
                transient,
            },
            basis_api::Error::Unauthorized => CoreError::Api {
                message: "Access token rejected by the cloud API".into(),
                status: Some(401),
                transient,
            },
            basis_api::Error::RateLimited { retry_after_secs } => CoreError::Api {
                message: format!("Rate limited -- retry after {retry_after_secs}s"),
                status: Some(429),
                transient,
            },
            basis_api::Error::NotFound { resource } => CoreError::Api {
                message: format!("Not found: {resource}"),
                status: Some(404),
                transient,
            },
            basis_api::Error::Rejected { status, message } => CoreError::Api {
                message,
                status: Some(status),
                transient,
            },
            basis_api::Error::Transient { message } => CoreError::Api {
                message,
                status: None,
                transient,
            },
            basis_api::Error::Malformed { message, body: _ } => CoreError::Api {
                message: format!("Malformed response: {message}"),
                status: None,
                transient,
            },
            basis_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            basis_api::Error::Transport(e) => CoreError::Config {
                message: format!("HTTP client setup failed: {e}"),
            },
            basis_api::Error::CredentialStore(message) => CoreError::Config {
                message: format!("Credential store: {message}"),
            },
        }
    }
}
