//! Energy statistics handler.

use tabled::Tabled;

use basis_core::{EnergyStat, Period};

use crate::cli::{GlobalOpts, PeriodArg, StatsArgs};
use crate::config::Resolved;
use crate::error::CliError;
use crate::output;

use super::util;

#[derive(Tabled)]
struct StatRow {
    #[tabled(rename = "Panel")]
    panel: String,
    #[tabled(rename = "Period")]
    period: String,
    #[tabled(rename = "Since")]
    since: String,
    #[tabled(rename = "Import kWh")]
    import: String,
    #[tabled(rename = "Export kWh")]
    export: String,
    #[tabled(rename = "Net kWh")]
    net: String,
}

impl From<&EnergyStat> for StatRow {
    fn from(s: &EnergyStat) -> Self {
        Self {
            panel: s.panel_id.to_string(),
            period: s.period.to_string(),
            since: s
                .period_start
                .map(|t| t.with_timezone(&chrono::Local).format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
            import: format!("{:.2}", s.import_kwh),
            export: format!("{:.2}", s.export_kwh),
            net: format!("{:.2}", s.net_kwh()),
        }
    }
}

fn wanted(arg: Option<PeriodArg>, period: Period) -> bool {
    match arg {
        None => true,
        Some(PeriodArg::Day) => period == Period::Day,
        Some(PeriodArg::Month) => period == Period::Month,
    }
}

pub async fn handle(resolved: Resolved, args: StatsArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let controller = util::controller(resolved)?;
    controller.refresh().await?;

    let stats: Vec<EnergyStat> = controller
        .snapshot()
        .stats()
        .filter(|s| wanted(args.period, s.period))
        .cloned()
        .collect();

    let out = output::render_list(
        &global.output,
        &stats,
        |s| StatRow::from(s),
        |s| format!("{}\t{}\t{:.2}", s.panel_id, s.period, s.net_kwh()),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}
