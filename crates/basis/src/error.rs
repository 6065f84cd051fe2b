//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError`, `ControlError` and `ConfigError` into user-facing
//! errors with actionable help text and stable exit codes.

use miette::Diagnostic;
use thiserror::Error;

use basis_config::ConfigError;
use basis_core::{ControlError, CoreError};

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const REJECTED: i32 = 5;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Authentication ───────────────────────────────────────────────
    #[error("No tokens stored for profile '{profile}'")]
    #[diagnostic(
        code(basis::no_credentials),
        help(
            "Complete the Basis sign-in flow, then run:\n\
             basis auth set-tokens --access-token <A> --refresh-token <R> --profile {profile}"
        )
    )]
    NoCredentials { profile: String },

    #[error("Stored credentials were rejected -- re-authentication required")]
    #[diagnostic(
        code(basis::reauth_required),
        help("Sign in again and store the new pair with: basis auth set-tokens")
    )]
    ReauthRequired,

    // ── Resources ────────────────────────────────────────────────────
    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(
        code(basis::not_found),
        help("Run: basis {list_command} to see available {resource_type}s")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
        list_command: String,
    },

    #[error("Circuit id '{circuit}' exists on several panels")]
    #[diagnostic(code(basis::ambiguous), help("Pass --panel with one of: {panels}"))]
    AmbiguousCircuit { circuit: String, panels: String },

    // ── Control ──────────────────────────────────────────────────────
    #[error("Circuit '{circuit}' does not support standby")]
    #[diagnostic(
        code(basis::standby_unsupported),
        help("Spare and standby-locked circuits cannot be toggled.")
    )]
    StandbyUnsupported { circuit: String },

    #[error("Standby change for circuit '{circuit}' was rejected: {message}")]
    #[diagnostic(code(basis::standby_rejected))]
    StandbyRejected { circuit: String, message: String },

    #[error("Standby change for circuit '{circuit}' timed out")]
    #[diagnostic(
        code(basis::standby_timeout),
        help("The cloud did not answer; the circuit kept its previous state.")
    )]
    StandbyTimeout { circuit: String },

    // ── API ──────────────────────────────────────────────────────────
    #[error("Basis cloud is unavailable: {message}")]
    #[diagnostic(
        code(basis::unavailable),
        help("Try again shortly, or raise --timeout.")
    )]
    Unavailable { message: String },

    #[error("API error{}: {message}", status.map(|s| format!(" ({s})")).unwrap_or_default())]
    #[diagnostic(code(basis::api_error))]
    ApiError { status: Option<u16>, message: String },

    // ── Validation / configuration ───────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(basis::validation))]
    Validation { field: String, reason: String },

    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(basis::profile_not_found),
        help("Config file: {path}\nRun: basis config show")
    )]
    ProfileNotFound { name: String, path: String },

    #[error("Configuration error: {message}")]
    #[diagnostic(code(basis::config))]
    Config { message: String },

    #[error("Credential store error: {message}")]
    #[diagnostic(
        code(basis::credential_store),
        help("Try --token-store file on machines without a system keyring.")
    )]
    CredentialStore { message: String },

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize output: {0}")]
    #[diagnostic(code(basis::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NoCredentials { .. } | Self::ReauthRequired => exit_code::AUTH,
            Self::NotFound { .. } | Self::ProfileNotFound { .. } => exit_code::NOT_FOUND,
            Self::StandbyUnsupported { .. } | Self::StandbyRejected { .. } => exit_code::REJECTED,
            Self::StandbyTimeout { .. } => exit_code::TIMEOUT,
            Self::Unavailable { .. } => exit_code::CONNECTION,
            Self::Validation { .. } | Self::AmbiguousCircuit { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }

    pub fn from_control(circuit: &str, err: ControlError) -> Self {
        match err {
            ControlError::Rejected { message } => Self::StandbyRejected {
                circuit: circuit.into(),
                message,
            },
            ControlError::Timeout => Self::StandbyTimeout {
                circuit: circuit.into(),
            },
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ReauthRequired => CliError::ReauthRequired,

            CoreError::PanelNotFound { panel_id } => CliError::NotFound {
                resource_type: "panel".into(),
                identifier: panel_id,
                list_command: "panels".into(),
            },

            CoreError::CircuitNotFound {
                panel_id: _,
                circuit_id,
            } => CliError::NotFound {
                resource_type: "circuit".into(),
                identifier: circuit_id,
                list_command: "circuits".into(),
            },

            CoreError::StandbyUnsupported { circuit_id } => CliError::StandbyUnsupported {
                circuit: circuit_id,
            },

            CoreError::NotStarted => CliError::ApiError {
                status: None,
                message: "controller stopped before the command ran".into(),
            },

            CoreError::Api {
                message,
                transient: true,
                ..
            } => CliError::Unavailable { message },

            CoreError::Api {
                message, status, ..
            } => CliError::ApiError { status, message },

            CoreError::Config { message } => CliError::Config { message },
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::UnknownProfile { profile } => CliError::ProfileNotFound {
                name: profile,
                path: basis_config::config_path().display().to_string(),
            },
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            other => CliError::Config {
                message: other.to_string(),
            },
        }
    }
}

impl From<basis_api::Error> for CliError {
    fn from(err: basis_api::Error) -> Self {
        match err {
            basis_api::Error::CredentialStore(message) => CliError::CredentialStore { message },
            other => CoreError::from(other).into(),
        }
    }
}
