// OAuth2 token lifecycle primitives
//
// Token pair representation, the refresh-token grant against the
// provider's token endpoint, and the injected persistence capability.
// The authorization-code exchange is the host's business; this module
// only keeps an already-issued pair alive.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::{AuthError, Error};

/// OAuth2 error codes that mean the grant itself is dead.
const REAUTH_ERROR_CODES: &[&str] = &["invalid_grant", "invalid_client", "unauthorized_client"];

/// Default access-token lifetime when the endpoint omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// Upper bound on an advertised access-token lifetime.
const MAX_EXPIRES_IN_SECS: i64 = 30 * 24 * 3600;

/// Token endpoint coordinates for the refresh grant.
#[derive(Debug, Clone)]
pub struct OAuthSettings {
    pub token_url: Url,
    pub client_id: String,
    pub client_secret: Option<SecretString>,
}

/// An access + refresh token pair with its absolute expiry.
///
/// Replaced as a whole on refresh; never mutated in place.
#[derive(Debug, Clone)]
pub struct TokenSet {
    pub access_token: SecretString,
    pub refresh_token: SecretString,
    pub expires_at: DateTime<Utc>,
}

impl TokenSet {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: SecretString::from(access_token.into()),
            refresh_token: SecretString::from(refresh_token.into()),
            expires_at,
        }
    }

    /// `true` while `now` is before `expires_at - margin`.
    pub fn is_fresh(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        now < self.expires_at - margin
    }

    /// Force the token to look expired so the next caller refreshes it.
    pub(crate) fn expired(&self) -> Self {
        Self {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            expires_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

/// Plain serializable form of a [`TokenSet`] for credential stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl From<&TokenSet> for PersistedTokens {
    fn from(tokens: &TokenSet) -> Self {
        Self {
            access_token: tokens.access_token.expose_secret().to_owned(),
            refresh_token: tokens.refresh_token.expose_secret().to_owned(),
            expires_at: tokens.expires_at,
        }
    }
}

impl From<PersistedTokens> for TokenSet {
    fn from(p: PersistedTokens) -> Self {
        Self::new(p.access_token, p.refresh_token, p.expires_at)
    }
}

// ── Credential persistence ──────────────────────────────────────────

/// Host-provided secure storage for the token pair.
///
/// The session manager saves after every successful refresh and clears
/// on an irrecoverable auth failure. What "secure" means (keyring, HA
/// config entry, encrypted file) is up to the implementor.
pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Result<Option<TokenSet>, Error>;
    fn save(&self, tokens: &TokenSet) -> Result<(), Error>;
    fn clear(&self) -> Result<(), Error>;
}

/// Process-local store. Useful for tests and for hosts that persist
/// tokens themselves.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    tokens: Mutex<Option<PersistedTokens>>,
}

impl MemoryCredentialStore {
    pub fn new(initial: Option<&TokenSet>) -> Self {
        Self {
            tokens: Mutex::new(initial.map(PersistedTokens::from)),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Option<PersistedTokens>>, Error> {
        self.tokens
            .lock()
            .map_err(|_| Error::CredentialStore("memory store lock poisoned".into()))
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<Option<TokenSet>, Error> {
        Ok(self.lock()?.clone().map(TokenSet::from))
    }

    fn save(&self, tokens: &TokenSet) -> Result<(), Error> {
        *self.lock()? = Some(PersistedTokens::from(tokens));
        Ok(())
    }

    fn clear(&self) -> Result<(), Error> {
        *self.lock()? = None;
        Ok(())
    }
}

// ── Refresh grant ───────────────────────────────────────────────────

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Exchange a refresh token for a new pair (`grant_type=refresh_token`).
///
/// Providers that do not rotate refresh tokens omit `refresh_token`
/// from the response; the previous one is carried over.
pub(crate) async fn refresh_grant(
    http: &reqwest::Client,
    settings: &OAuthSettings,
    current: &TokenSet,
) -> Result<TokenSet, AuthError> {
    let mut form: Vec<(&str, &str)> = vec![
        ("grant_type", "refresh_token"),
        ("refresh_token", current.refresh_token.expose_secret()),
        ("client_id", settings.client_id.as_str()),
    ];
    if let Some(secret) = settings.client_secret.as_ref() {
        form.push(("client_secret", secret.expose_secret()));
    }

    debug!("POST {} (refresh_token grant)", settings.token_url);

    let resp = http
        .post(settings.token_url.clone())
        .form(&form)
        .send()
        .await
        .map_err(|e| AuthError::Transient {
            message: Error::from_request(&e).to_string(),
        })?;

    let status = resp.status();
    let body = resp.text().await.map_err(|e| AuthError::Transient {
        message: Error::from_request(&e).to_string(),
    })?;

    if status.is_success() {
        let parsed: TokenResponse =
            serde_json::from_str(&body).map_err(|e| AuthError::Transient {
                message: format!("unreadable token response: {e}"),
            })?;
        let expires_at = expiry_from(parsed.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS), Utc::now())?;
        let refresh_token = parsed
            .refresh_token
            .map_or_else(|| current.refresh_token.clone(), SecretString::from);
        return Ok(TokenSet {
            access_token: SecretString::from(parsed.access_token),
            refresh_token,
            expires_at,
        });
    }

    Err(classify_token_error(status, &body))
}

/// Absolute expiry for a lifetime in seconds, clamped to
/// `0..=MAX_EXPIRES_IN_SECS`.
fn expiry_from(expires_in: i64, now: DateTime<Utc>) -> Result<DateTime<Utc>, AuthError> {
    Duration::try_seconds(expires_in.clamp(0, MAX_EXPIRES_IN_SECS))
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .ok_or_else(|| AuthError::Transient {
            message: format!("token lifetime out of range: {expires_in}s"),
        })
}

fn classify_token_error(status: reqwest::StatusCode, body: &str) -> AuthError {
    if let Ok(err) = serde_json::from_str::<TokenErrorResponse>(body) {
        if REAUTH_ERROR_CODES.contains(&err.error.as_str()) {
            debug!(error = %err.error, description = ?err.error_description, "refresh grant rejected");
            return AuthError::ReauthRequired;
        }
    }

    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return AuthError::ReauthRequired;
    }

    AuthError::Transient {
        message: format!("token endpoint returned HTTP {status}"),
    }
}
