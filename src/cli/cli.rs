use std::path::PathBuf;

use clap::Parser;

use crate::application::data::LogLevel;
use crate::config::MirrorConfig;

/// Mirror a source directory tree into a destination directory
#[derive(Parser, Debug, Clone)]
#[command(version)]
pub struct Cli {
    /// Directory to mirror from
    pub source: Option<PathBuf>,
    /// Directory to mirror into, created if missing
    pub destination: Option<PathBuf>,

    /// YAML file providing defaults for any of these options
    #[clap(long, short)]
    pub config: Option<PathBuf>,

    #[clap(long, short, default_value = "info", value_enum)]
    pub log_level: LogLevel,

    /// Append the log to this file instead of printing it
    #[clap(long)]
    pub log_file: Option<PathBuf>,

    /// Actions each queue holds before a scanner waits for the dispatcher
    #[clap(long)]
    pub queue_capacity: Option<usize>,

    /// Copy every file, even when the destination copy looks up to date
    #[clap(long)]
    pub always_copy: bool,
}

impl From<&Cli> for MirrorConfig {
    fn from(cli: &Cli) -> Self {
        MirrorConfig {
            source: cli.source.clone(),
            destination: cli.destination.clone(),
            queue_capacity: cli.queue_capacity,
            always_copy: cli.always_copy.then_some(true),
        }
    }
}
