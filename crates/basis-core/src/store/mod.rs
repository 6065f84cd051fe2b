// ── Snapshot store ──
//
// Versioned, copy-on-write state with a single serialized merge path.

pub mod delta;
mod snapshot;
mod snapshot_store;

pub use delta::{
    CircuitDelta, CircuitInfo, CircuitReadings, ControlAck, Delta, PanelReadings,
    PanelRegistryDelta, PanelStatsDelta, PanelTelemetryDelta, RegisteredPanel, StandbyUpdate,
};
pub use snapshot::Snapshot;
pub use snapshot_store::SnapshotStore;
