use clap::Subcommand;
use studygroup_core::{Config, ConfigError};

type CliResult = Result<(), Box<dyn std::error::Error>>;

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print one setting, e.g. `timer.study_duration_secs`
    Get { key: String },
    /// Change one setting. List values take JSON or comma-separated labels.
    Set { key: String, value: String },
    /// Print every setting as JSON
    List,
    /// Print where the config file lives
    Path,
    /// Overwrite the config file with the defaults
    Reset,
}

pub fn run(action: ConfigAction) -> CliResult {
    match action {
        ConfigAction::Get { key } => {
            let value = Config::load()?
                .get(&key)
                .ok_or(ConfigError::UnknownKey(key))?;
            println!("{value}");
        }
        ConfigAction::Set { key, value } => {
            // `set` validates the whole config before anything is written.
            Config::load()?.set(&key, &value)?;
            tracing::info!(key = %key, value = %value, "setting changed");
            println!("ok");
        }
        ConfigAction::List => {
            println!("{}", serde_json::to_string_pretty(&Config::load()?)?);
        }
        ConfigAction::Path => {
            println!("{}", Config::path()?.display());
        }
        ConfigAction::Reset => {
            let defaults = Config::default();
            defaults.save()?;
            tracing::info!("config reset to defaults");
            println!("{}", serde_json::to_string_pretty(&defaults)?);
        }
    }
    Ok(())
}
