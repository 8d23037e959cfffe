use std::path::PathBuf;

use clap::{ArgAction, Parser};
use tracing::level_filters::LevelFilter;

fn parse_log_level(value: &str) -> Result<LevelFilter, String> {
    value
        .trim()
        .parse::<LevelFilter>()
        .map_err(|error| format!("failed to parse log level: {error}"))
}

#[derive(Debug, Parser)]
#[command(
    name = "archivist",
    about = "Channel history cataloging bot over a JSON-lines chat transport",
    version
)]
/// Public struct `Cli` used by the archivist binary.
pub struct Cli {
    #[arg(
        long,
        env = "ARCHIVIST_CONFIG",
        default_value = "archivist.toml",
        help = "TOML config file. A missing file falls back to built-in defaults."
    )]
    pub config: PathBuf,

    #[arg(
        long = "fixtures-dir",
        env = "ARCHIVIST_FIXTURES_DIR",
        default_value = ".archivist/fixtures",
        help = "Directory of <channel>.json message fixtures served as channel history."
    )]
    pub fixtures_dir: PathBuf,

    #[arg(
        long = "asynchronous-history",
        action = ArgAction::SetTrue,
        help = "Detach started history jobs instead of awaiting them inline."
    )]
    pub asynchronous_history: bool,

    #[arg(
        long = "log-level",
        env = "ARCHIVIST_LOG_LEVEL",
        default_value = "info",
        value_parser = parse_log_level,
        help = "Default tracing level; RUST_LOG directives take precedence."
    )]
    pub log_level: LevelFilter,
}
