//! Token storage commands. None of these talk to the cloud.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use basis_core::TokenSet;

use crate::cli::{AuthArgs, AuthCommand, GlobalOpts};
use crate::config;
use crate::error::CliError;
use crate::output;

#[derive(Debug, Serialize)]
struct TokenStatus {
    profile: String,
    stored: bool,
    expires_at: Option<DateTime<Utc>>,
    access_token_expired: Option<bool>,
}

fn status_detail(s: &TokenStatus) -> String {
    match (s.expires_at, s.access_token_expired) {
        (Some(at), Some(expired)) => format!(
            "Profile:       {}\nTokens stored: yes\nAccess token:  {} ({})",
            s.profile,
            if expired { "expired" } else { "valid" },
            at.to_rfc3339(),
        ),
        _ => format!("Profile:       {}\nTokens stored: no", s.profile),
    }
}

pub fn handle(args: AuthArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = basis_config::load_config_or_default();
    let profile = config::active_profile_name(global, &cfg);
    let store = config::credential_store(global.token_store, &profile);

    match args.command {
        AuthCommand::SetTokens {
            access_token,
            refresh_token,
            expires_in,
        } => {
            if expires_in <= 0 {
                return Err(CliError::Validation {
                    field: "expires-in".into(),
                    reason: "must be a positive number of seconds".into(),
                });
            }
            let tokens = TokenSet::new(
                access_token,
                refresh_token,
                Utc::now() + Duration::seconds(expires_in),
            );
            store.save(&tokens)?;
            if !global.quiet {
                eprintln!("Tokens stored for profile '{profile}'");
            }
            Ok(())
        }

        AuthCommand::Status => {
            let tokens = store.load()?;
            let now = Utc::now();
            let status = TokenStatus {
                profile,
                stored: tokens.is_some(),
                expires_at: tokens.as_ref().map(|t| t.expires_at),
                access_token_expired: tokens.as_ref().map(|t| !t.is_fresh(now, Duration::zero())),
            };
            let out = output::render_single(&global.output, &status, status_detail, |s| {
                s.stored.to_string()
            });
            output::print_output(&out, global.quiet);
            Ok(())
        }

        AuthCommand::Logout => {
            store.clear()?;
            if !global.quiet {
                eprintln!("Tokens removed for profile '{profile}'");
            }
            Ok(())
        }
    }
}
