// ── Circuit domain type ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{CircuitId, CircuitKey, PanelId};

/// Label the provider uses for unassigned circuits.
pub const SPARE_LABEL: &str = "spare";

/// Provider label keys and their human names.
const LABEL_NAMES: &[(&str, &str)] = &[
    ("spare", "Spare"),
    ("power", "Power"),
    ("lights", "Lights"),
    ("range", "Range"),
    ("oven", "Oven"),
    ("hob", "Hob"),
    ("airCon", "Air Conditioning"),
    ("hvac", "HVAC"),
    ("hwc", "Hot Water Cylinder"),
    ("ufh", "Underfloor Heating"),
    ("evCharger", "EV Charger"),
    ("pool", "Pool"),
    ("spa", "Spa"),
    ("waterPump", "Water Pump"),
    ("septicPump", "Septic Pump"),
    ("alarm", "Alarm"),
    ("solar", "Solar"),
];

/// Human name for a provider label key. Unknown keys pass through.
pub fn label_name(label: &str) -> &str {
    LABEL_NAMES
        .iter()
        .find(|(key, _)| *key == label)
        .map_or(label, |&(_, name)| name)
}

/// `"[03] Hot Water Cylinder"`.
pub fn display_name(number: u32, label: &str) -> String {
    format!("[{number:02}] {}", label_name(label))
}

/// An individually monitored circuit within a panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Circuit {
    pub id: CircuitId,
    pub panel_id: PanelId,
    /// Slot number within the panel.
    pub number: u32,
    /// Provider label key (`hwc`, `evCharger`, ...).
    pub label: String,
    pub name: String,

    pub power_w: Option<f64>,
    pub current_a: Option<f64>,
    pub voltage_v: Option<f64>,

    pub standby: bool,
    pub standby_supported: bool,
    /// A standby command for this circuit is unresolved; `standby` holds
    /// the optimistic value until it is.
    pub standby_pending: bool,

    pub last_updated_at: Option<DateTime<Utc>>,
}

impl Circuit {
    pub fn new(key: CircuitKey, number: u32, label: String) -> Self {
        let name = display_name(number, &label);
        let standby_supported = label != SPARE_LABEL;
        Self {
            id: key.circuit_id,
            panel_id: key.panel_id,
            number,
            label,
            name,
            power_w: None,
            current_a: None,
            voltage_v: None,
            standby: false,
            standby_supported,
            standby_pending: false,
            last_updated_at: None,
        }
    }

    pub fn key(&self) -> CircuitKey {
        CircuitKey {
            panel_id: self.panel_id.clone(),
            circuit_id: self.id.clone(),
        }
    }

    pub fn is_spare(&self) -> bool {
        self.label == SPARE_LABEL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_labels_get_human_names() {
        assert_eq!(display_name(3, "hwc"), "[03] Hot Water Cylinder");
        assert_eq!(display_name(12, "evCharger"), "[12] EV Charger");
    }

    #[test]
    fn unknown_labels_pass_through() {
        assert_eq!(display_name(7, "sauna"), "[07] sauna");
    }

    #[test]
    fn spare_circuits_cannot_standby() {
        let spare = Circuit::new(CircuitKey::new("P1", "C1"), 1, SPARE_LABEL.into());
        assert!(spare.is_spare());
        assert!(!spare.standby_supported);
        assert_eq!(spare.name, "[01] Spare");
    }
}
