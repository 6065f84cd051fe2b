// Token persistence for the session manager.
//
// Both stores hold the pair as `PersistedTokens` JSON. The keyring is the
// default; the file store exists for headless hosts without a secret
// service.

use std::io::Write;
use std::path::{Path, PathBuf};

use basis_api::{CredentialStore, Error, PersistedTokens, TokenSet};
use tracing::debug;

use crate::KEYRING_SERVICE;

fn store_error(context: &str, err: impl std::fmt::Display) -> Error {
    Error::CredentialStore(format!("{context}: {err}"))
}

fn decode(raw: &str) -> Result<TokenSet, Error> {
    serde_json::from_str::<PersistedTokens>(raw)
        .map(TokenSet::from)
        .map_err(|e| store_error("stored tokens are unreadable", e))
}

fn encode(tokens: &TokenSet) -> Result<String, Error> {
    serde_json::to_string(&PersistedTokens::from(tokens))
        .map_err(|e| store_error("failed to encode tokens", e))
}

// ── Keyring ─────────────────────────────────────────────────────────

/// Tokens in the system keyring under `basis` / `<profile>/tokens`.
#[derive(Debug, Clone)]
pub struct KeyringCredentialStore {
    account: String,
}

impl KeyringCredentialStore {
    pub fn new(profile_name: &str) -> Self {
        Self {
            account: format!("{profile_name}/tokens"),
        }
    }

    fn entry(&self) -> Result<keyring::Entry, Error> {
        keyring::Entry::new(KEYRING_SERVICE, &self.account)
            .map_err(|e| store_error("keyring unavailable", e))
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn load(&self) -> Result<Option<TokenSet>, Error> {
        match self.entry()?.get_password() {
            Ok(raw) => decode(&raw).map(Some),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(store_error("keyring read failed", e)),
        }
    }

    fn save(&self, tokens: &TokenSet) -> Result<(), Error> {
        self.entry()?
            .set_password(&encode(tokens)?)
            .map_err(|e| store_error("keyring write failed", e))?;
        debug!(account = %self.account, "tokens saved to keyring");
        Ok(())
    }

    fn clear(&self) -> Result<(), Error> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(store_error("keyring delete failed", e)),
        }
    }
}

// ── File ────────────────────────────────────────────────────────────

/// Tokens in a JSON file, written with owner-only permissions on Unix.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<data dir>/<profile>.tokens.json`
    pub fn for_profile(profile_name: &str) -> Self {
        Self::new(crate::data_dir().join(format!("{profile_name}.tokens.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<TokenSet>, Error> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => decode(&raw).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(store_error("token file read failed", e)),
        }
    }

    fn save(&self, tokens: &TokenSet) -> Result<(), Error> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| store_error("token dir create failed", e))?;
        }
        let raw = encode(tokens)?;

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options
            .open(&self.path)
            .map_err(|e| store_error("token file open failed", e))?;

        // `mode` applies only when the file is created.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600))
                .map_err(|e| store_error("token file chmod failed", e))?;
        }

        file.write_all(raw.as_bytes())
            .map_err(|e| store_error("token file write failed", e))?;

        debug!(path = %self.path.display(), "tokens saved to file");
        Ok(())
    }

    fn clear(&self) -> Result<(), Error> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(store_error("token file delete failed", e)),
        }
    }
}
