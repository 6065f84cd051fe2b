// Wire types for the Basis cloud REST surface.
//
// Required fields are required: a body missing one fails deserialization
// and surfaces as `Error::Malformed` instead of leaking half-typed data
// into the core.

use chrono::{DateTime, Datelike, Local, Utc};
use serde::{Deserialize, Serialize};

// ── Panels ──────────────────────────────────────────────────────────

/// `GET /panels`
#[derive(Debug, Clone, Deserialize)]
pub struct PanelList {
    pub panels: Vec<PanelSummary>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelSummary {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub site_id: Option<String>,
    #[serde(default)]
    pub connected: bool,
}

// ── Telemetry ───────────────────────────────────────────────────────

/// `GET /panels/{id}/telemetry`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelTelemetry {
    pub panel_id: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub firmware_version: Option<String>,
    pub connectivity: Connectivity,
    /// Absent while the panel has never reported.
    #[serde(default)]
    pub live_state: Option<PanelLiveState>,
    #[serde(default)]
    pub circuits: Vec<CircuitTelemetry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connectivity {
    pub connected: bool,
    #[serde(default)]
    pub updated_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub disconnect_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelLiveState {
    /// Net power through the panel in watts.
    pub power: f64,
    pub power_usage: PowerUsage,
    pub primary_current: f64,
    #[serde(default)]
    pub updated_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerUsage {
    pub import_power: f64,
    pub export_power: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitTelemetry {
    pub id: String,
    pub number: u32,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub standby_locked: bool,
    /// `None` when the provider failed to read this circuit this cycle.
    #[serde(default)]
    pub live_state: Option<CircuitLiveState>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitLiveState {
    pub state: CircuitState,
    pub power: f64,
    pub primary_current: f64,
    pub phase_voltage: f64,
    #[serde(default)]
    pub updated_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Live,
    Standby,
    #[serde(other)]
    Unknown,
}

// ── Statistics ──────────────────────────────────────────────────────

/// Aggregation window for energy statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Day,
    Month,
}

impl Period {
    pub const ALL: [Period; 2] = [Period::Day, Period::Month];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Month => "month",
        }
    }

    /// Start of the period containing `now`, in local time: midnight
    /// today, or midnight on the first of the month.
    pub fn start_at(self, now: DateTime<Local>) -> DateTime<Local> {
        let date = match self {
            Self::Day => Some(now.date_naive()),
            Self::Month => now.date_naive().with_day(1),
        };
        date.and_then(|d| d.and_hms_opt(0, 0, 0))
            .and_then(|naive| naive.and_local_timezone(Local).earliest())
            .unwrap_or(now)
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `GET /panels/{id}/statistics?period=`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnergyUsage {
    pub panel_id: String,
    pub period: Period,
    #[serde(default)]
    pub period_start: Option<DateTime<Utc>>,
    pub import_kwh: f64,
    pub export_kwh: f64,
}

// ── Control ─────────────────────────────────────────────────────────

/// `POST /circuits/{id}/standby` body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StandbyRequest<'a> {
    pub panel_id: &'a str,
    pub standby: bool,
}

/// Authoritative circuit state returned after a standby command.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StandbyAck {
    pub circuit_id: String,
    pub standby: bool,
}

// ── Batches ─────────────────────────────────────────────────────────

/// Result of a fan-out over several panels: whatever succeeded, plus
/// the per-panel failures.
#[derive(Debug)]
pub struct Batch<T> {
    pub items: Vec<T>,
    pub failures: Vec<(String, crate::Error)>,
}

impl<T> Batch<T> {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// `true` if any panel request was rejected for auth reasons.
    pub fn has_unauthorized(&self) -> bool {
        self.failures.iter().any(|(_, e)| e.is_unauthorized())
    }

    /// Longest retry-after hint among rate-limited failures.
    pub fn retry_after(&self) -> Option<std::time::Duration> {
        self.failures.iter().filter_map(|(_, e)| e.retry_after()).max()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{TimeZone, Timelike};
    use serde_json::json;

    use super::*;

    #[test]
    fn day_and_month_start_at_local_midnight() {
        let now = Local.with_ymd_and_hms(2025, 3, 17, 14, 22, 5).earliest().unwrap();

        let day = Period::Day.start_at(now);
        assert_eq!((day.day(), day.hour(), day.minute()), (17, 0, 0));

        let month = Period::Month.start_at(now);
        assert_eq!((month.month(), month.day(), month.hour()), (3, 1, 0));
    }

    #[test]
    fn circuit_state_tolerates_unknown_values() {
        let live: CircuitState = serde_json::from_value(json!("LIVE")).unwrap();
        let other: CircuitState = serde_json::from_value(json!("TRIPPED")).unwrap();
        assert_eq!(live, CircuitState::Live);
        assert_eq!(other, CircuitState::Unknown);
    }

    #[test]
    fn telemetry_without_connectivity_is_rejected() {
        let body = json!({ "panelId": "P1", "circuits": [] });
        assert!(serde_json::from_value::<PanelTelemetry>(body).is_err());
    }
}
