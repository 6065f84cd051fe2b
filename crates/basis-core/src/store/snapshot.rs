// ── Snapshot aggregate ──
//
// Immutable once published. `SnapshotStore` clones the current value,
// applies deltas to the copy and swaps it in.

use std::collections::BTreeMap;

use serde::{Serialize, Serializer};
use tracing::trace;

use super::delta::{
    CircuitDelta, ControlAck, Delta, PanelRegistryDelta, PanelStatsDelta, PanelTelemetryDelta,
    StandbyUpdate,
};
use crate::model::{Circuit, CircuitKey, EnergyStat, Panel, PanelId, Period};

/// Versioned view of every panel, circuit and statistic on the account.
///
/// Serializes as flat `panels`, `circuits` and `stats` lists.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub(crate) panels: BTreeMap<PanelId, Panel>,
    pub(crate) circuits: BTreeMap<CircuitKey, Circuit>,
    pub(crate) stats: BTreeMap<(PanelId, Period), EnergyStat>,
    pub(crate) version: u64,
}

impl Snapshot {
    /// Strictly increases with every merge.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn panels(&self) -> impl Iterator<Item = &Panel> {
        self.panels.values()
    }

    pub fn panel(&self, id: &str) -> Option<&Panel> {
        self.panels.get(id)
    }

    pub fn panel_ids(&self) -> Vec<PanelId> {
        self.panels.keys().cloned().collect()
    }

    pub fn circuits(&self) -> impl Iterator<Item = &Circuit> {
        self.circuits.values()
    }

    pub fn circuit(&self, key: &CircuitKey) -> Option<&Circuit> {
        self.circuits.get(key)
    }

    /// Circuits of one panel, in circuit-id order.
    pub fn circuits_of<'a>(&'a self, panel_id: &'a PanelId) -> impl Iterator<Item = &'a Circuit> {
        self.circuits
            .values()
            .filter(move |c| &c.panel_id == panel_id)
    }

    pub fn stats(&self) -> impl Iterator<Item = &EnergyStat> {
        self.stats.values()
    }

    pub fn stat(&self, panel_id: &PanelId, period: Period) -> Option<&EnergyStat> {
        self.stats.get(&(panel_id.clone(), period))
    }

    // ── Delta application ────────────────────────────────────────────

    pub(crate) fn apply(&mut self, delta: Delta) {
        match delta {
            Delta::PanelTelemetry(d) => self.apply_panel_telemetry(d),
            Delta::Circuit(d) => self.apply_circuit(d),
            Delta::PanelStats(d) => self.apply_stats(d),
            Delta::ControlAck(d) => self.apply_ack(d),
            Delta::Registry(d) => self.apply_registry(d),
            Delta::Connectivity {
                panel_id,
                connected,
            } => {
                if let Some(panel) = self.panels.get_mut(&panel_id) {
                    panel.connected = connected;
                }
            }
        }
    }

    fn apply_panel_telemetry(&mut self, d: PanelTelemetryDelta) {
        let panel = self
            .panels
            .entry(d.panel_id.clone())
            .or_insert_with(|| Panel::registered(d.panel_id, None, None));

        panel.model = d.model;
        panel.firmware_version = d.firmware_version;
        panel.connected = d.connected;
        panel.disconnect_reason = d.disconnect_reason;
        if d.last_seen_at.is_some() {
            panel.last_seen_at = d.last_seen_at;
        }
        if let Some(r) = d.readings {
            panel.current_power_w = Some(r.current_power_w);
            panel.import_power_w = Some(r.import_power_w);
            panel.export_power_w = Some(r.export_power_w);
            panel.primary_current_a = Some(r.primary_current_a);
        }
        panel.last_updated_at = Some(d.fetched_at);
    }

    fn apply_circuit(&mut self, d: CircuitDelta) {
        if !self.circuits.contains_key(&d.key) {
            let Some(info) = &d.info else {
                trace!(circuit = %d.key, "delta for unknown circuit ignored");
                return;
            };
            let circuit = Circuit::new(d.key.clone(), info.number, info.label.clone());
            self.circuits.insert(d.key.clone(), circuit);
        }
        let Some(circuit) = self.circuits.get_mut(&d.key) else {
            return;
        };

        if let Some(info) = d.info {
            if circuit.number != info.number || circuit.label != info.label {
                circuit.name = crate::model::display_name(info.number, &info.label);
            }
            circuit.standby_supported =
                !info.standby_locked && info.label != crate::model::circuit::SPARE_LABEL;
            circuit.number = info.number;
            circuit.label = info.label;
        }

        if let Some(r) = d.readings {
            circuit.power_w = Some(r.power_w);
            circuit.current_a = Some(r.current_a);
            circuit.voltage_v = Some(r.voltage_v);
        }

        match d.standby {
            Some(StandbyUpdate::Reported(value)) if !circuit.standby_pending => {
                circuit.standby = value;
            }
            Some(StandbyUpdate::Optimistic(value)) => {
                circuit.standby = value;
                circuit.standby_pending = true;
            }
            _ => {}
        }

        if let Some(at) = d.fetched_at {
            circuit.last_updated_at = Some(at);
        }
    }

    fn apply_stats(&mut self, d: PanelStatsDelta) {
        let key = (d.stat.panel_id.clone(), d.stat.period);
        self.stats.insert(key, d.stat);
    }

    fn apply_ack(&mut self, d: ControlAck) {
        if let Some(circuit) = self.circuits.get_mut(&d.key) {
            circuit.standby = d.standby;
            circuit.standby_pending = false;
        }
    }

    fn apply_registry(&mut self, d: PanelRegistryDelta) {
        let listed: std::collections::BTreeSet<PanelId> = d.ids().into_iter().collect();

        self.panels.retain(|id, _| listed.contains(id));
        self.circuits.retain(|key, _| listed.contains(&key.panel_id));
        self.stats.retain(|(id, _), _| listed.contains(id));

        for entry in d.panels {
            match self.panels.get_mut(&entry.id) {
                Some(panel) => {
                    panel.name = entry.name;
                    panel.site_id = entry.site_id;
                }
                None => {
                    let panel = Panel::registered(entry.id.clone(), entry.name, entry.site_id);
                    self.panels.insert(entry.id, panel);
                }
            }
        }
    }
}

impl Serialize for Snapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct View<'a> {
            version: u64,
            panels: Vec<&'a Panel>,
            circuits: Vec<&'a Circuit>,
            stats: Vec<&'a EnergyStat>,
        }

        View {
            version: self.version,
            panels: self.panels.values().collect(),
            circuits: self.circuits.values().collect(),
            stats: self.stats.values().collect(),
        }
        .serialize(serializer)
    }
}
