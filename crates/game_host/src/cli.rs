//! Command-line arguments.
//!
//! Every flag overrides the matching value of the configuration file.

use clap::{Arg, ArgAction, Command};
use std::path::PathBuf;

#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub config_path: PathBuf,
    /// Replaces `[services] enabled`, comma separated.
    pub services: Option<Vec<String>>,
    pub seed_file: Option<PathBuf>,
    pub replay_file: Option<PathBuf>,
    pub log_level: Option<String>,
    pub json_logs: bool,
}

impl CliArgs {
    pub fn parse() -> Self {
        Self::from_matches(command().get_matches())
    }

    fn from_matches(matches: clap::ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("game_host.toml")),
            services: matches.get_one::<String>("services").map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect()
            }),
            seed_file: matches.get_one::<String>("seed").map(PathBuf::from),
            replay_file: matches.get_one::<String>("replay").map(PathBuf::from),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
        }
    }
}

fn command() -> Command {
    Command::new("Game Host")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Runs the game services against an in-memory engine")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("game_host.toml"),
        )
        .arg(
            Arg::new("services")
                .short('s')
                .long("services")
                .value_name("LIST")
                .help("Services to enable, in order (e.g. session,reference)"),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .value_name("FILE")
                .help("JSON seed for the in-memory engine"),
        )
        .arg(
            Arg::new("replay")
                .short('r')
                .long("replay")
                .value_name("FILE")
                .help("Push envelopes to replay after startup, one JSON object per line"),
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
}
