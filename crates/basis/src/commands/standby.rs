//! Circuit standby toggle.
//!
//! Runs the controller just long enough for the circuit to appear in the
//! snapshot, issues the command and waits for the cloud's answer.
//! `Controller::oneshot` drains the command before returning.

use std::time::Duration;

use basis_core::{Controller, StandbyOutcome};

use crate::cli::{GlobalOpts, StandbyArgs, StandbyState};
use crate::config::{self, Resolved};
use crate::error::CliError;

use super::util;

/// Extra time on top of the HTTP timeout for the first telemetry merge.
const LOAD_GRACE: Duration = Duration::from_secs(5);

pub async fn handle(resolved: Resolved, args: StandbyArgs, global: &GlobalOpts) -> Result<(), CliError> {
    config::require_tokens(&resolved)?;
    let desired = args.state == StandbyState::On;
    let load_limit = resolved.controller.timeout + LOAD_GRACE;

    let circuit_id = args.circuit.clone();
    let panel_id = args.panel.clone();

    let outcome = Controller::oneshot(resolved.controller, resolved.credentials, |controller| async move {
        let snapshot = util::wait_for_snapshot(&controller, load_limit, |s| {
            util::telemetry_loaded(s)
                || util::resolve_circuit(s, &circuit_id, panel_id.as_deref()).is_ok()
        })
        .await;

        let key = match util::resolve_circuit(&snapshot, &circuit_id, panel_id.as_deref()) {
            Ok(key) => key,
            Err(e) => return Ok(Err(e)),
        };
        let name = snapshot
            .circuit(&key)
            .map_or_else(|| key.to_string(), |c| c.name.clone());

        let ticket = controller.set_standby(key.clone(), desired)?;
        tracing::debug!(circuit = %key, generation = ticket.generation(), "standby issued");
        Ok(ticket
            .outcome()
            .await
            .map(|o| (name, key, o))
            .map_err(|e| CliError::from_control(&circuit_id, e)))
    })
    .await??;

    let (name, key, result) = outcome;
    if !global.quiet && result == StandbyOutcome::Confirmed {
        let state = if desired { "standby" } else { "live" };
        eprintln!("{name} on panel {} is now {state}", key.panel_id);
    }
    Ok(())
}
