//! Shared helpers for command handlers.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};

use basis_core::{CircuitKey, Controller, Snapshot};

use crate::config::{self, Resolved};
use crate::error::CliError;

/// Controller for the resolved profile, after checking tokens exist.
pub fn controller(resolved: Resolved) -> Result<Controller, CliError> {
    config::require_tokens(&resolved)?;
    Ok(Controller::new(resolved.controller, resolved.credentials)?)
}

/// Resolve a circuit id to its key, optionally scoped to one panel.
pub fn resolve_circuit(
    snapshot: &Snapshot,
    circuit_id: &str,
    panel_id: Option<&str>,
) -> Result<CircuitKey, CliError> {
    let matches: Vec<CircuitKey> = snapshot
        .circuits()
        .filter(|c| c.id.as_str() == circuit_id)
        .filter(|c| panel_id.is_none_or(|p| c.panel_id.as_str() == p))
        .map(basis_core::Circuit::key)
        .collect();

    match matches.as_slice() {
        [key] => Ok(key.clone()),
        [] => Err(CliError::NotFound {
            resource_type: "circuit".into(),
            identifier: circuit_id.into(),
            list_command: "circuits".into(),
        }),
        keys => Err(CliError::AmbiguousCircuit {
            circuit: circuit_id.into(),
            panels: keys
                .iter()
                .map(|k| k.panel_id.to_string())
                .collect::<Vec<_>>()
                .join(", "),
        }),
    }
}

/// Wait until `done` holds for the latest snapshot, or until `limit`
/// elapses. Returns the last snapshot seen either way.
pub async fn wait_for_snapshot(
    controller: &Controller,
    limit: Duration,
    done: impl Fn(&Snapshot) -> bool,
) -> Arc<Snapshot> {
    let mut stream = controller.subscribe();
    let mut snap = stream.latest();
    let deadline = tokio::time::sleep(limit);
    tokio::pin!(deadline);

    while !done(&snap) {
        tokio::select! {
            () = &mut deadline => break,
            next = stream.changed() => match next {
                Some(next) => snap = next,
                None => break,
            },
        }
    }
    snap
}

/// Every registered panel has answered a telemetry fetch at least once.
pub fn telemetry_loaded(snapshot: &Snapshot) -> bool {
    snapshot.panels().all(|p| p.last_updated_at.is_some())
}

pub fn local_time(at: Option<DateTime<Utc>>) -> String {
    at.map(|t| t.with_timezone(&Local).format("%H:%M:%S").to_string())
        .unwrap_or_default()
}
