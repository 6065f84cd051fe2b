// ── Domain model ──
//
// Canonical representation of panels, circuits and energy statistics.
// Wire types from basis-api are translated into these in `convert`.

pub mod circuit;
pub mod ids;
pub mod panel;
pub mod stats;

pub use circuit::{Circuit, display_name, label_name};
pub use ids::{CircuitId, CircuitKey, PanelId};
pub use panel::{DEFAULT_MODEL, Panel};
pub use stats::{EnergyStat, Period};
