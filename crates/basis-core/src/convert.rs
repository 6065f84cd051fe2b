// ── API-to-delta conversions ──
//
// Bridges raw `basis_api` response types into snapshot deltas. Field
// names are normalized and defaults filled here so the store only ever
// sees domain values.

use chrono::{DateTime, Utc};

use basis_api::types::{
    CircuitState, CircuitTelemetry, EnergyUsage, PanelSummary, PanelTelemetry,
};

use crate::model::{CircuitKey, DEFAULT_MODEL, EnergyStat, PanelId};
use crate::model::circuit::SPARE_LABEL;
use crate::store::{
    CircuitDelta, CircuitInfo, CircuitReadings, Delta, PanelReadings, PanelRegistryDelta,
    PanelStatsDelta, PanelTelemetryDelta, RegisteredPanel, StandbyUpdate,
};

/// Provider model string, or the first-generation default when the
/// provider reports none.
fn normalize_model(raw: Option<&str>) -> String {
    match raw.map(str::trim) {
        Some(m) if !m.is_empty() && !m.eq_ignore_ascii_case("unknown") => m.to_owned(),
        _ => DEFAULT_MODEL.to_owned(),
    }
}

/// One panel delta followed by one delta per reported circuit.
///
/// Circuits the provider omitted produce nothing, so their last-known
/// values stay in place.
pub fn telemetry_deltas(telemetry: PanelTelemetry, fetched_at: DateTime<Utc>) -> Vec<Delta> {
    let panel_id = PanelId::from(telemetry.panel_id);
    let mut deltas = Vec::with_capacity(telemetry.circuits.len() + 1);

    let readings = telemetry.live_state.as_ref().map(|live| PanelReadings {
        current_power_w: live.power,
        import_power_w: live.power_usage.import_power,
        export_power_w: live.power_usage.export_power,
        primary_current_a: live.primary_current,
    });

    deltas.push(Delta::PanelTelemetry(PanelTelemetryDelta {
        panel_id: panel_id.clone(),
        fetched_at,
        model: normalize_model(telemetry.model.as_deref()),
        firmware_version: telemetry.firmware_version,
        connected: telemetry.connectivity.connected,
        disconnect_reason: telemetry.connectivity.disconnect_reason,
        last_seen_at: telemetry.connectivity.updated_timestamp,
        readings,
    }));

    deltas.extend(
        telemetry
            .circuits
            .into_iter()
            .map(|c| circuit_delta(&panel_id, c, fetched_at)),
    );
    deltas
}

fn circuit_delta(panel_id: &PanelId, c: CircuitTelemetry, fetched_at: DateTime<Utc>) -> Delta {
    let readings = c.live_state.as_ref().map(|live| CircuitReadings {
        power_w: live.power,
        current_a: live.primary_current,
        voltage_v: live.phase_voltage,
    });
    let standby = c.live_state.as_ref().and_then(|live| match live.state {
        CircuitState::Live => Some(StandbyUpdate::Reported(false)),
        CircuitState::Standby => Some(StandbyUpdate::Reported(true)),
        CircuitState::Unknown => None,
    });

    Delta::Circuit(CircuitDelta {
        key: CircuitKey::new(panel_id.clone(), c.id),
        fetched_at: Some(fetched_at),
        info: Some(CircuitInfo {
            number: c.number,
            label: c.label.unwrap_or_else(|| SPARE_LABEL.to_owned()),
            standby_locked: c.standby_locked,
        }),
        readings,
        standby,
    })
}

pub fn stats_delta(usage: EnergyUsage, fetched_at: DateTime<Utc>) -> Delta {
    Delta::PanelStats(PanelStatsDelta {
        stat: EnergyStat {
            panel_id: PanelId::from(usage.panel_id),
            period: usage.period,
            import_kwh: usage.import_kwh,
            export_kwh: usage.export_kwh,
            period_start: usage.period_start,
            last_updated_at: fetched_at,
        },
    })
}

pub fn registry_delta(panels: Vec<PanelSummary>) -> PanelRegistryDelta {
    PanelRegistryDelta {
        panels: panels
            .into_iter()
            .map(|p| RegisteredPanel {
                id: PanelId::from(p.id),
                name: p.name,
                site_id: p.site_id,
            })
            .collect(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn telemetry(model: serde_json::Value) -> PanelTelemetry {
        serde_json::from_value(json!({
            "panelId": "P1",
            "model": model,
            "connectivity": { "connected": true },
            "circuits": [
                { "id": "C1", "number": 1, "label": "hwc",
                  "liveState": { "state": "STANDBY", "power": 0.0,
                                 "primaryCurrent": 0.0, "phaseVoltage": 240.0 } },
                { "id": "C2", "number": 2 }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn unknown_model_defaults_to_gen1() {
        let deltas = telemetry_deltas(telemetry(json!("unknown")), Utc::now());
        let Delta::PanelTelemetry(panel) = &deltas[0] else {
            panic!("first delta should be the panel");
        };
        assert_eq!(panel.model, "GEN1");
        assert!(panel.readings.is_none());
    }

    #[test]
    fn circuit_state_maps_to_standby() {
        let deltas = telemetry_deltas(telemetry(json!("GEN2")), Utc::now());
        assert_eq!(deltas.len(), 3);

        let Delta::Circuit(c1) = &deltas[1] else {
            panic!("expected circuit delta");
        };
        assert_eq!(c1.standby, Some(StandbyUpdate::Reported(true)));

        let Delta::Circuit(c2) = &deltas[2] else {
            panic!("expected circuit delta");
        };
        assert_eq!(c2.standby, None);
        assert_eq!(c2.readings, None);
        assert_eq!(c2.info.as_ref().unwrap().label, "spare");
    }
}
