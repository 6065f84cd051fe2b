// OAuth2 session manager
//
// Single owner of the token pair. Readers load the current pair
// lock-free; refreshes are single-flight behind an async mutex, so a
// burst of callers near expiry produces exactly one refresh request.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::auth::{CredentialStore, OAuthSettings, TokenSet, refresh_grant};
use crate::error::{AuthError, Error};
use crate::transport::TransportConfig;

/// Default safety margin before true expiry at which a refresh kicks in.
pub const DEFAULT_REFRESH_MARGIN: std::time::Duration = std::time::Duration::from_secs(60);

/// Observable authentication state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Authenticated,
    Refreshing,
    /// Credentials were rejected and cleared. Nothing will work until
    /// the host supplies a new pair via [`SessionManager::replace`].
    ReauthRequired,
}

/// Owns the token pair and hands out guaranteed-valid access tokens.
pub struct SessionManager {
    http: reqwest::Client,
    settings: OAuthSettings,
    margin: chrono::Duration,
    tokens: ArcSwapOption<TokenSet>,
    refresh_lock: Mutex<()>,
    store: Arc<dyn CredentialStore>,
    state: watch::Sender<AuthState>,
}

impl SessionManager {
    /// Build a session manager seeded from the credential store.
    pub fn new(
        settings: OAuthSettings,
        store: Arc<dyn CredentialStore>,
        transport: &TransportConfig,
        margin: std::time::Duration,
    ) -> Result<Self, Error> {
        let http = transport.build_client()?;
        let initial = store.load()?;
        let state = if initial.is_some() {
            AuthState::Authenticated
        } else {
            AuthState::ReauthRequired
        };
        let margin = chrono::Duration::from_std(margin)
            .map_err(|e| Error::CredentialStore(format!("invalid refresh margin: {e}")))?;

        Ok(Self {
            http,
            settings,
            margin,
            tokens: ArcSwapOption::new(initial.map(Arc::new)),
            refresh_lock: Mutex::new(()),
            store,
            state: watch::channel(state).0,
        })
    }

    /// Return an access token valid for at least the safety margin,
    /// refreshing first if needed.
    pub async fn valid_token(&self) -> Result<SecretString, AuthError> {
        if let Some(tokens) = self.tokens.load_full() {
            if tokens.is_fresh(Utc::now(), self.margin) {
                return Ok(tokens.access_token.clone());
            }
        }

        let _guard = self.refresh_lock.lock().await;

        // Whoever held the lock before us may already have refreshed.
        let Some(current) = self.tokens.load_full() else {
            return Err(AuthError::ReauthRequired);
        };
        if current.is_fresh(Utc::now(), self.margin) {
            return Ok(current.access_token.clone());
        }

        self.state.send_replace(AuthState::Refreshing);
        debug!(expires_at = %current.expires_at, "access token near expiry, refreshing");

        match refresh_grant(&self.http, &self.settings, &current).await {
            Ok(fresh) => {
                let access = fresh.access_token.clone();
                if let Err(e) = self.store.save(&fresh) {
                    warn!(error = %e, "failed to persist refreshed tokens");
                }
                info!(expires_at = %fresh.expires_at, "access token refreshed");
                self.tokens.store(Some(Arc::new(fresh)));
                self.state.send_replace(AuthState::Authenticated);
                Ok(access)
            }
            Err(AuthError::ReauthRequired) => {
                warn!("refresh token rejected, clearing stored credentials");
                self.tokens.store(None);
                if let Err(e) = self.store.clear() {
                    warn!(error = %e, "failed to clear stored credentials");
                }
                self.state.send_replace(AuthState::ReauthRequired);
                Err(AuthError::ReauthRequired)
            }
            Err(err) => {
                debug!(error = %err, "token refresh failed transiently");
                self.state.send_replace(AuthState::Authenticated);
                Err(err)
            }
        }
    }

    /// Mark `rejected` as unusable so the next caller refreshes.
    ///
    /// A no-op if the current token already differs (someone refreshed
    /// between the rejected request and this call).
    pub fn invalidate(&self, rejected: &SecretString) {
        self.tokens.rcu(|current| match current {
            Some(t) if t.access_token.expose_secret() == rejected.expose_secret() => {
                Some(Arc::new(t.expired()))
            }
            other => other.clone(),
        });
        debug!("access token invalidated");
    }

    /// Install a new token pair (reconfiguration after re-auth).
    pub async fn replace(&self, tokens: TokenSet) -> Result<(), Error> {
        let _guard = self.refresh_lock.lock().await;
        self.store.save(&tokens)?;
        self.tokens.store(Some(Arc::new(tokens)));
        self.state.send_replace(AuthState::Authenticated);
        info!("session credentials replaced");
        Ok(())
    }

    pub fn has_credentials(&self) -> bool {
        self.tokens.load().is_some()
    }

    pub fn auth_state(&self) -> AuthState {
        *self.state.borrow()
    }

    /// Watch the auth state.
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    /// Resolve once credentials are usable again.
    pub async fn wait_for_credentials(&self) {
        let mut rx = self.state.subscribe();
        // Only fails if the sender is gone, which means `self` is gone.
        let _ = rx.wait_for(|s| *s != AuthState::ReauthRequired).await;
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("token_url", &self.settings.token_url.as_str())
            .field("state", &self.auth_state())
            .finish_non_exhaustive()
    }
}
