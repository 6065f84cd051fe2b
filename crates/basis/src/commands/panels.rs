//! Panel list handler.

use tabled::Tabled;

use basis_core::Panel;

use crate::cli::GlobalOpts;
use crate::config::Resolved;
use crate::error::CliError;
use crate::output;

use super::util;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
pub(crate) struct PanelRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Model")]
    model: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Power")]
    power: String,
    #[tabled(rename = "Import")]
    import: String,
    #[tabled(rename = "Export")]
    export: String,
    #[tabled(rename = "Current")]
    current: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

impl PanelRow {
    pub(crate) fn new(p: &Panel, color: bool) -> Self {
        Self {
            id: p.id.to_string(),
            name: p.display_name().to_owned(),
            model: p.model.clone(),
            status: output::connectivity(p.connected, color),
            power: output::watts(p.current_power_w),
            import: output::watts(p.import_power_w),
            export: output::watts(p.export_power_w),
            current: output::amps(p.primary_current_a),
            updated: util::local_time(p.last_updated_at),
        }
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(resolved: Resolved, global: &GlobalOpts) -> Result<(), CliError> {
    let controller = util::controller(resolved)?;
    controller.refresh().await?;

    let snapshot = controller.snapshot();
    let panels: Vec<Panel> = snapshot.panels().cloned().collect();
    let color = output::should_color(&global.color);

    let out = output::render_list(
        &global.output,
        &panels,
        |p| PanelRow::new(p, color),
        |p| p.id.to_string(),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}
