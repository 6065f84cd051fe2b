// basis-core: Sync core between basis-api and hosts (CLI, home automation).

pub mod config;
pub mod control;
pub mod controller;
pub mod convert;
pub mod error;
pub mod model;
mod poller;
pub mod store;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{ControllerConfig, OAuthClientConfig};
pub use control::{ControlEvent, ControlGateway, StandbyOutcome, StandbyTicket};
pub use controller::{Controller, ControllerState};
pub use error::{ControlError, CoreError};
pub use store::{Delta, Snapshot, SnapshotStore};
pub use stream::SnapshotStream;

pub use model::{Circuit, CircuitId, CircuitKey, EnergyStat, Panel, PanelId, Period};

// Credential plumbing hosts need alongside the controller.
pub use basis_api::{AuthState, CredentialStore, MemoryCredentialStore, PersistedTokens, TokenSet};
