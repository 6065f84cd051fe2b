// basis-api: Async Rust client for the Basis smart panel cloud API

pub mod auth;
pub mod client;
pub mod error;
pub mod session;
pub mod transport;
pub mod types;

pub use auth::{CredentialStore, MemoryCredentialStore, OAuthSettings, PersistedTokens, TokenSet};
pub use client::CloudClient;
pub use error::{AuthError, Error};
pub use session::{AuthState, DEFAULT_REFRESH_MARGIN, SessionManager};
pub use transport::{DEFAULT_USER_AGENT, TransportConfig};
pub use types::{Batch, Period};
