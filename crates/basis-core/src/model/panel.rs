// ── Panel domain type ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::PanelId;

/// Model reported for panels whose telemetry carries none.
pub const DEFAULT_MODEL: &str = "GEN1";

/// A physical Basis panel.
///
/// Created when the panel first appears in the account listing
/// (`connected = false` until its first successful telemetry fetch) and
/// updated field-wise by every telemetry merge after that.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Panel {
    pub id: PanelId,
    pub name: Option<String>,
    pub site_id: Option<String>,
    pub model: String,
    pub firmware_version: Option<String>,

    pub connected: bool,
    pub disconnect_reason: Option<String>,

    /// Net power through the panel in watts.
    pub current_power_w: Option<f64>,
    pub import_power_w: Option<f64>,
    pub export_power_w: Option<f64>,
    pub primary_current_a: Option<f64>,

    /// When the cloud last heard from the panel itself.
    pub last_seen_at: Option<DateTime<Utc>>,
    /// When telemetry for this panel was last fetched successfully.
    pub last_updated_at: Option<DateTime<Utc>>,
}

impl Panel {
    pub fn registered(id: PanelId, name: Option<String>, site_id: Option<String>) -> Self {
        Self {
            id,
            name,
            site_id,
            model: DEFAULT_MODEL.to_owned(),
            firmware_version: None,
            connected: false,
            disconnect_reason: None,
            current_power_w: None,
            import_power_w: None,
            export_power_w: None,
            primary_current_a: None,
            last_seen_at: None,
            last_updated_at: None,
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.id.as_str())
    }
}
