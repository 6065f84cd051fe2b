// ── Aggregated energy statistics ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use basis_api::Period;

use super::ids::PanelId;

/// Energy totals for one panel over one period.
///
/// At most one per `(panel_id, period)`; each slow-loop fetch replaces
/// the record as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyStat {
    pub panel_id: PanelId,
    pub period: Period,
    pub import_kwh: f64,
    pub export_kwh: f64,
    pub period_start: Option<DateTime<Utc>>,
    pub last_updated_at: DateTime<Utc>,
}

impl EnergyStat {
    pub fn net_kwh(&self) -> f64 {
        self.import_kwh - self.export_kwh
    }
}
