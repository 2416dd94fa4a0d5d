use std::path::PathBuf;

use crate::config::{MirrorConfig, MirrorConfigError};
use crate::synchronizer::{ChangeDetection, SyncOptions};

/// Fully resolved settings of one run
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub options: SyncOptions,
}

impl TryFrom<MirrorConfig> for RuntimeConfig {
    type Error = MirrorConfigError;

    fn try_from(config: MirrorConfig) -> Result<Self, Self::Error> {
        let source = config
            .source
            .ok_or(MirrorConfigError::MissingSettingError { key: "source" })?;
        let destination = config
            .destination
            .ok_or(MirrorConfigError::MissingSettingError { key: "destination" })?;
        let change_detection = if config.always_copy.unwrap_or(false) {
            ChangeDetection::Always
        } else {
            ChangeDetection::SizeAndModified
        };

        Ok(Self {
            source,
            destination,
            options: SyncOptions {
                queue_capacity: config.queue_capacity.unwrap_or(0),
                change_detection,
            },
        })
    }
}
