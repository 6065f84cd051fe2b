//! Live snapshot follower.
//!
//! Starts the controller with its background loops and prints every new
//! snapshot version until Ctrl-C. JSON formats emit one compact document
//! per line.

use std::time::Duration;

use chrono::Local;
use tabled::{Table, settings::Style};
use tracing::{info, warn};

use basis_core::{AuthState, ControlEvent, Snapshot};

use crate::cli::{GlobalOpts, OutputFormat, WatchArgs};
use crate::commands::circuits::CircuitRow;
use crate::commands::panels::PanelRow;
use crate::config::Resolved;
use crate::error::CliError;
use crate::output;

use super::util;

fn render(snapshot: &Snapshot, args: &WatchArgs, global: &GlobalOpts) -> Result<String, CliError> {
    let color = output::should_color(&global.color);
    Ok(match global.output {
        OutputFormat::Json | OutputFormat::JsonCompact => serde_json::to_string(snapshot)?,
        OutputFormat::Plain => snapshot
            .panels()
            .map(|p| {
                format!(
                    "{}\t{}\t{}",
                    p.id,
                    if p.connected { "online" } else { "offline" },
                    p.current_power_w.map(|w| format!("{w:.0}")).unwrap_or_default()
                )
            })
            .collect::<Vec<_>>()
            .join("\n"),
        OutputFormat::Table => {
            let panels: Vec<PanelRow> = snapshot.panels().map(|p| PanelRow::new(p, color)).collect();
            let mut out = format!(
                "── {} · version {} ──\n{}",
                Local::now().format("%H:%M:%S"),
                snapshot.version(),
                Table::new(panels).with(Style::rounded())
            );
            if args.circuits {
                let circuits: Vec<CircuitRow> =
                    snapshot.circuits().map(|c| CircuitRow::new(c, color)).collect();
                out.push('\n');
                out.push_str(&Table::new(circuits).with(Style::rounded()).to_string());
            }
            out
        }
    })
}

pub async fn handle(mut resolved: Resolved, args: WatchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    if let Some(secs) = args.interval {
        if secs == 0 {
            return Err(CliError::Validation {
                field: "interval".into(),
                reason: "must be at least 1 second".into(),
            });
        }
        resolved.controller.fast_interval = Duration::from_secs(secs);
    }

    let controller = util::controller(resolved)?;
    controller.start().await?;
    info!("watching, press Ctrl-C to stop");

    let mut snapshots = controller.subscribe();
    let mut auth = controller.auth_state();
    let mut events = controller.control_events();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let result = loop {
        tokio::select! {
            _ = &mut ctrl_c => break Ok(()),
            next = snapshots.changed() => match next {
                Some(snapshot) => match render(&snapshot, &args, global) {
                    Ok(out) => output::print_output(&out, global.quiet),
                    Err(e) => break Err(e),
                },
                None => break Ok(()),
            },
            changed = auth.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                if *auth.borrow_and_update() == AuthState::ReauthRequired {
                    break Err(CliError::ReauthRequired);
                }
            }
            Ok(event) = events.recv() => {
                if let ControlEvent::Failed { key, error, .. } = event {
                    warn!(circuit = %key, %error, "standby change failed");
                }
            }
        }
    };

    controller.stop().await;
    result
}
