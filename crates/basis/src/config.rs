//! CLI-side configuration resolution: profile + global flag overrides,
//! and the credential store selected by `--token-store`.

use std::sync::Arc;

use basis_config::{Config, FileCredentialStore, KeyringCredentialStore};
use basis_core::{ControllerConfig, CredentialStore};

use crate::cli::{GlobalOpts, TokenStoreKind};
use crate::error::CliError;

/// Everything a controller-bound command needs.
pub struct Resolved {
    pub profile_name: String,
    pub controller: ControllerConfig,
    pub credentials: Arc<dyn CredentialStore>,
}

/// Profile name selected by `--profile` or the config's default.
pub fn active_profile_name(global: &GlobalOpts, cfg: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| cfg.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

pub fn credential_store(kind: TokenStoreKind, profile_name: &str) -> Arc<dyn CredentialStore> {
    match kind {
        TokenStoreKind::Keyring => Arc::new(KeyringCredentialStore::new(profile_name)),
        TokenStoreKind::File => Arc::new(FileCredentialStore::for_profile(profile_name)),
    }
}

/// Build a `ControllerConfig` from the config file, profile, and CLI overrides.
pub fn resolve(global: &GlobalOpts) -> Result<Resolved, CliError> {
    let cfg = basis_config::load_config()?;
    let (profile_name, mut profile) = cfg.profile(global.profile.as_deref())?;

    if let Some(url) = &global.api_url {
        profile.api_url.clone_from(url);
    }
    if let Some(timeout) = global.timeout {
        profile.timeout = Some(timeout);
    }

    let controller =
        basis_config::profile_to_controller_config(&profile, &profile_name, &cfg.defaults)?;
    let credentials = credential_store(global.token_store, &profile_name);

    tracing::debug!(
        profile = %profile_name,
        api_url = %controller.api_url,
        "configuration resolved"
    );

    Ok(Resolved {
        profile_name,
        controller,
        credentials,
    })
}

/// Fail early with a helpful message instead of a reauth error from the
/// first request.
pub fn require_tokens(resolved: &Resolved) -> Result<(), CliError> {
    match resolved.credentials.load()? {
        Some(_) => Ok(()),
        None => Err(CliError::NoCredentials {
            profile: resolved.profile_name.clone(),
        }),
    }
}
