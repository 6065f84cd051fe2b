//! Command dispatch: bridges CLI args -> controller -> output formatting.

pub mod auth;
pub mod circuits;
pub mod config_cmd;
pub mod panels;
pub mod standby;
pub mod stats;
pub mod util;
pub mod watch;

use crate::cli::{Command, GlobalOpts};
use crate::config::Resolved;
use crate::error::CliError;

/// Dispatch a cloud-bound command to its handler.
pub async fn dispatch(cmd: Command, resolved: Resolved, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Panels => panels::handle(resolved, global).await,
        Command::Circuits(args) => circuits::handle(resolved, args, global).await,
        Command::Stats(args) => stats::handle(resolved, args, global).await,
        Command::Watch(args) => watch::handle(resolved, args, global).await,
        Command::Standby(args) => standby::handle(resolved, args, global).await,
        Command::Auth(_) | Command::Config(_) | Command::Completions(_) => Err(CliError::Config {
            message: "command does not talk to the cloud".into(),
        }),
    }
}
