//! Command-line interface for the directory node.
//!
//! Every option here overrides the corresponding setting of the configuration
//! file.

use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;

/// Command line arguments parsed from user input.
#[derive(Debug, Clone)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for the host link listener address
    pub bind_address: Option<String>,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
    /// Extra session host URLs dialled at startup
    pub hosts: Vec<String>,
}

/// Builds the clap command definition.
fn command() -> Command {
    Command::new("Session Directory Node")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Directory and replication node for a fleet of multiplayer session hosts")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("config.toml"),
        )
        .arg(
            Arg::new("bind")
                .short('b')
                .long("bind")
                .value_name("ADDRESS")
                .help("Host link listener address (e.g., 0.0.0.0:7400)"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .help("Output logs in JSON format")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("host")
                .short('H')
                .long("host")
                .value_name("URL")
                .help("Session host link URL to dial (ws:// or wss://); may be repeated")
                .action(ArgAction::Append),
        )
}

impl CliArgs {
    /// Parses the process arguments.
    ///
    /// Exits with a usage message when the arguments are malformed.
    pub fn parse() -> Self {
        Self::from_matches(&command().get_matches())
    }

    #[cfg(test)]
    pub fn try_parse_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Ok(Self::from_matches(&command().try_get_matches_from(args)?))
    }

    fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("config.toml")),
            bind_address: matches.get_one::<String>("bind").cloned(),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
            hosts: matches
                .get_many::<String>("host")
                .map(|hosts| hosts.cloned().collect())
                .unwrap_or_default(),
        }
    }
}
