use thiserror::Error;

/// Failure to produce a valid access token.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    /// The refresh token was rejected (`invalid_grant` and friends).
    /// Stored credentials have been cleared; the host must rerun the
    /// OAuth2 authorization flow.
    #[error("Re-authentication required -- stored credentials were rejected")]
    ReauthRequired,

    /// The token endpoint could not be reached or answered with 5xx.
    /// The stored credentials are untouched; retry later.
    #[error("Token refresh failed transiently: {message}")]
    Transient { message: String },
}

/// Top-level error type for the `basis-api` crate.
///
/// Every cloud call resolves to a payload or exactly one of these.
/// `basis-core` decides what to retry; this crate never retries.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// No valid token could be obtained before issuing the request.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The API rejected the bearer token (HTTP 401/403).
    #[error("Unauthorized -- access token rejected by the cloud API")]
    Unauthorized,

    // ── Provider responses ──────────────────────────────────────────
    /// HTTP 429. Includes the server's retry-after hint in seconds.
    #[error("Rate limited -- retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// HTTP 404 for the addressed panel or circuit.
    #[error("Not found: {resource}")]
    NotFound { resource: String },

    /// A non-auth 4xx the provider refused (bad command, locked circuit).
    #[error("Request rejected (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    /// Timeouts, connection failures and 5xx responses.
    #[error("Transient failure: {message}")]
    Transient { message: String },

    /// The response body violated the expected schema.
    #[error("Malformed response: {message}")]
    Malformed { message: String, body: String },

    // ── Local setup ─────────────────────────────────────────────────
    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The HTTP client could not be constructed.
    #[error("HTTP client setup failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The injected credential store failed to load or save tokens.
    #[error("Credential store error: {0}")]
    CredentialStore(String),
}

impl Error {
    /// Returns `true` for failures worth retrying on the next tick.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transient { .. }
                | Self::RateLimited { .. }
                | Self::Auth(AuthError::Transient { .. })
        )
    }

    /// Returns `true` if the bearer token was rejected.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }

    /// Returns `true` if the user must re-authenticate.
    pub fn is_reauth_required(&self) -> bool {
        matches!(self, Self::Auth(AuthError::ReauthRequired))
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// The server-provided retry delay, if rate limited.
    pub fn retry_after(&self) -> Option<std::time::Duration> {
        match self {
            Self::RateLimited { retry_after_secs } => {
                Some(std::time::Duration::from_secs(*retry_after_secs))
            }
            _ => None,
        }
    }

    /// Map a `reqwest` send/read failure into the taxonomy.
    ///
    /// Anything that happens on the wire is transient from the caller's
    /// point of view: the request may succeed on the next attempt.
    pub(crate) fn from_request(err: &reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            format!("request timed out: {err}")
        } else if err.is_connect() {
            format!("connection failed: {err}")
        } else {
            err.to_string()
        };
        Self::Transient { message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(Error::Transient { message: "x".into() }.is_transient());
        assert!(Error::RateLimited { retry_after_secs: 5 }.is_transient());
        assert!(Error::Auth(AuthError::Transient { message: "x".into() }).is_transient());
        assert!(!Error::Unauthorized.is_transient());
        assert!(!Error::Auth(AuthError::ReauthRequired).is_transient());
    }

    #[test]
    fn retry_after_only_for_rate_limit() {
        assert_eq!(
            Error::RateLimited { retry_after_secs: 12 }.retry_after(),
            Some(std::time::Duration::from_secs(12))
        );
        assert_eq!(Error::Unauthorized.retry_after(), None);
    }
}
