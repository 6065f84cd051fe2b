//! Config inspection commands.

use basis_config::{Config, Profile};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

const REDACTED: &str = "<redacted>";

fn redacted(mut profile: Profile) -> Profile {
    if profile.client_secret.is_some() {
        profile.client_secret = Some(REDACTED.into());
    }
    profile
}

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            output::print_output(&basis_config::config_path().display().to_string(), false);
            Ok(())
        }

        ConfigCommand::Show => {
            let cfg = basis_config::load_config()?;
            let (name, profile) = cfg.profile(global.profile.as_deref())?;
            let profile = redacted(profile);
            let out = output::render_single(
                &global.output,
                &profile,
                |p| {
                    let body = toml::to_string_pretty(p)
                        .unwrap_or_else(|e| format!("# unable to render profile: {e}"));
                    format!("# profile: {name}\n{body}")
                },
                |_| name.clone(),
            );
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ConfigCommand::Init => {
            let path = basis_config::config_path();
            if path.exists() {
                eprintln!("Config already exists at {}", path.display());
                return Ok(());
            }
            let mut cfg = Config::default();
            cfg.profiles.insert("default".into(), Profile::default());
            basis_config::save_config(&cfg)?;
            if !global.quiet {
                eprintln!("Wrote {}", path.display());
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_are_redacted() {
        let profile = Profile {
            client_secret: Some("hunter2".into()),
            ..Profile::default()
        };
        assert_eq!(redacted(profile).client_secret.as_deref(), Some(REDACTED));
        assert_eq!(redacted(Profile::default()).client_secret, None);
    }
}
