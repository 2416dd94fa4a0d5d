use std::io;
use std::path::PathBuf;

use compio::runtime::spawn;
use snafu::Snafu;
use snafu::prelude::*;
use supports_color::Stream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::application::RuntimeConfig;
use crate::cli::Cli;
use crate::config::{MirrorConfig, MirrorConfigError};
use crate::ext::BestEffortPathExt;
use crate::filesystem::LocalFilesystem;
use crate::synchronizer::{SyncError, Synchronizer};

pub struct Application;

impl Application {
    pub async fn run(cli: Cli) -> Result<(), ApplicationError> {
        let file_config = match &cli.config {
            Some(path) => MirrorConfig::from_path(path).await.context(ConfigSnafu)?,
            None => MirrorConfig::default(),
        };
        let runtime_config = RuntimeConfig::try_from(file_config.merge(MirrorConfig::from(&cli)))
            .context(ConfigSnafu)?;
        debug!("Resolved runtime config: {:?}", runtime_config);

        let cancellation = CancellationToken::new();
        Self::cancel_on_ctrl_c(cancellation.clone());

        let report = Synchronizer::new(LocalFilesystem, runtime_config.options)
            .synchronize(
                &cancellation,
                &runtime_config.source,
                &runtime_config.destination,
            )
            .await
            .context(SynchronizationSnafu)?;

        if supports_color::on(Stream::Stdout).is_none() {
            colored::control::set_override(false);
        }
        println!("{}", report.summary_line());

        Ok(())
    }

    fn cancel_on_ctrl_c(cancellation: CancellationToken) {
        spawn(async move {
            match compio::signal::ctrl_c().await {
                Ok(()) => {
                    warn!("Interrupted, stopping the synchronization");
                    cancellation.cancel();
                }
                Err(error) => {
                    warn!("Cannot listen for Ctrl-C, the run cannot be interrupted: {error}")
                }
            }
        })
        .detach();
    }
}

#[derive(Debug, Snafu)]
pub enum ApplicationError {
    #[snafu(display("Critical failure encountered during configuration stage"))]
    ConfigError { source: MirrorConfigError },
    #[snafu(display("Cannot open log file {}", path.best_effort_path_display()))]
    LogFileError { path: PathBuf, source: io::Error },
    #[snafu(display("Synchronization did not complete"))]
    SynchronizationError { source: SyncError },
}
