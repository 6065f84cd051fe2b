// ── Snapshot deltas ──
//
// The only way state enters the snapshot. Each variant names the fields
// it carries; everything else on the target record is left alone.

use chrono::{DateTime, Utc};

use crate::model::{CircuitKey, EnergyStat, PanelId};

/// A unit of change applied atomically by `SnapshotStore::merge`.
#[derive(Debug, Clone, PartialEq)]
pub enum Delta {
    PanelTelemetry(PanelTelemetryDelta),
    Circuit(CircuitDelta),
    PanelStats(PanelStatsDelta),
    ControlAck(ControlAck),
    Registry(PanelRegistryDelta),
    /// Staleness marking. Touches only `Panel::connected`.
    Connectivity { panel_id: PanelId, connected: bool },
}

/// Panel-level fields from one telemetry fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct PanelTelemetryDelta {
    pub panel_id: PanelId,
    pub fetched_at: DateTime<Utc>,
    pub model: String,
    pub firmware_version: Option<String>,
    pub connected: bool,
    pub disconnect_reason: Option<String>,
    pub last_seen_at: Option<DateTime<Utc>>,
    /// `None` when the panel has not reported live readings yet.
    pub readings: Option<PanelReadings>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PanelReadings {
    pub current_power_w: f64,
    pub import_power_w: f64,
    pub export_power_w: f64,
    pub primary_current_a: f64,
}

/// Circuit-level fields, from telemetry or from an optimistic toggle.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitDelta {
    pub key: CircuitKey,
    /// Present for telemetry; `None` for optimistic updates, which do not
    /// count as a successful read.
    pub fetched_at: Option<DateTime<Utc>>,
    pub info: Option<CircuitInfo>,
    pub readings: Option<CircuitReadings>,
    pub standby: Option<StandbyUpdate>,
}

/// Static circuit description carried with every telemetry fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitInfo {
    pub number: u32,
    pub label: String,
    pub standby_locked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircuitReadings {
    pub power_w: f64,
    pub current_a: f64,
    pub voltage_v: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StandbyUpdate {
    /// Value read from the cloud. Ignored while a command is pending.
    Reported(bool),
    /// Local intent applied ahead of the cloud; marks the circuit pending.
    Optimistic(bool),
}

/// Whole-record replacement of one `(panel_id, period)` statistic.
#[derive(Debug, Clone, PartialEq)]
pub struct PanelStatsDelta {
    pub stat: EnergyStat,
}

/// Resolution of a pending standby command: either the cloud-confirmed
/// value or the rollback target. Clears `standby_pending`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlAck {
    pub key: CircuitKey,
    pub standby: bool,
}

/// The account's full panel listing.
///
/// New panels are added disconnected; panels missing from the listing
/// are removed together with their circuits and statistics.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PanelRegistryDelta {
    pub panels: Vec<RegisteredPanel>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredPanel {
    pub id: PanelId,
    pub name: Option<String>,
    pub site_id: Option<String>,
}

impl PanelRegistryDelta {
    pub fn ids(&self) -> Vec<PanelId> {
        self.panels.iter().map(|p| p.id.clone()).collect()
    }
}

impl CircuitDelta {
    pub(crate) fn optimistic(key: CircuitKey, standby: bool) -> Self {
        Self {
            key,
            fetched_at: None,
            info: None,
            readings: None,
            standby: Some(StandbyUpdate::Optimistic(standby)),
        }
    }
}
