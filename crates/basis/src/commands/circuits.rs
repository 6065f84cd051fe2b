//! Circuit list handler.

use tabled::Tabled;

use basis_core::{Circuit, PanelId};

use crate::cli::{CircuitsArgs, GlobalOpts};
use crate::config::Resolved;
use crate::error::CliError;
use crate::output;

use super::util;

#[derive(Tabled)]
pub(crate) struct CircuitRow {
    #[tabled(rename = "Panel")]
    panel: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Power")]
    power: String,
    #[tabled(rename = "Current")]
    current: String,
    #[tabled(rename = "Voltage")]
    voltage: String,
}

impl CircuitRow {
    pub(crate) fn new(c: &Circuit, color: bool) -> Self {
        let state = if c.standby_supported {
            output::standby(c.standby, c.standby_pending, color)
        } else {
            format!("{} (locked)", output::standby(c.standby, false, false))
        };
        Self {
            panel: c.panel_id.to_string(),
            id: c.id.to_string(),
            name: c.name.clone(),
            state,
            power: output::watts(c.power_w),
            current: output::amps(c.current_a),
            voltage: output::volts(c.voltage_v),
        }
    }
}

pub async fn handle(
    resolved: Resolved,
    args: CircuitsArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let controller = util::controller(resolved)?;
    controller.refresh().await?;
    let snapshot = controller.snapshot();

    let circuits: Vec<Circuit> = match &args.panel {
        Some(panel) => {
            let panel_id = PanelId::from(panel.as_str());
            if snapshot.panel(panel).is_none() {
                return Err(basis_core::CoreError::PanelNotFound {
                    panel_id: panel.clone(),
                }
                .into());
            }
            snapshot.circuits_of(&panel_id).cloned().collect()
        }
        None => snapshot.circuits().cloned().collect(),
    };
    let circuits: Vec<Circuit> = circuits
        .into_iter()
        .filter(|c| !(args.hide_spare && c.is_spare()))
        .collect();

    let color = output::should_color(&global.color);
    let out = output::render_list(
        &global.output,
        &circuits,
        |c| CircuitRow::new(c, color),
        |c| c.key().to_string(),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}
