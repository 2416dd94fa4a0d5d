use compio::{fs::File, io::AsyncReadExt, io::BufReader};
use hashlink::LinkedHashMap;
use saphyr::{LoadableYamlNode, Scalar, Yaml};
use snafu::prelude::*;
use std::{
    borrow::Cow,
    io::Cursor,
    path::{Path, PathBuf},
};
use tracing::debug;

use crate::ext::BestEffortPathExt;

const SOURCE_KEY: &str = "source";
const DESTINATION_KEY: &str = "destination";
const QUEUE_CAPACITY_KEY: &str = "queueCapacity";
const ALWAYS_COPY_KEY: &str = "alwaysCopy";

/// Settings for one run, every one of them optional.
///
/// Read from a YAML file or built from command line flags; [`MirrorConfig::merge`]
/// layers one over the other.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MirrorConfig {
    pub source: Option<PathBuf>,
    pub destination: Option<PathBuf>,
    pub queue_capacity: Option<usize>,
    pub always_copy: Option<bool>,
}

impl MirrorConfig {
    /// Reads a config file. Relative roots in it are taken relative to the file's
    /// directory.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, MirrorConfigError> {
        let path = path.as_ref();
        debug!("Opening config file: {}", path.best_effort_path_display());
        let file = File::open(path).await.context(ReadSnafu {
            file_path: path.best_effort_path_display(),
        })?;

        let cursor = Cursor::new(file);
        let mut reader = BufReader::new(cursor);
        let res = reader.read_to_string(String::new()).await;
        match res.0 {
            Ok(n) => debug!("Read config file: {n} bytes"),
            Err(error) => {
                return Err(error).context(ReadSnafu {
                    file_path: path.best_effort_path_display(),
                });
            }
        }

        let config = Self::try_from(res.1.as_str())?;
        Ok(match path.parent() {
            Some(base) => config.relative_to(base),
            None => config,
        })
    }

    /// Values set in `overrides` win over the ones in `self`
    pub fn merge(self, overrides: MirrorConfig) -> MirrorConfig {
        MirrorConfig {
            source: overrides.source.or(self.source),
            destination: overrides.destination.or(self.destination),
            queue_capacity: overrides.queue_capacity.or(self.queue_capacity),
            always_copy: overrides.always_copy.or(self.always_copy),
        }
    }

    fn relative_to(self, base: &Path) -> MirrorConfig {
        let anchor = |path: PathBuf| {
            if path.is_relative() {
                base.join(path)
            } else {
                path
            }
        };
        MirrorConfig {
            source: self.source.map(anchor),
            destination: self.destination.map(anchor),
            ..self
        }
    }

    fn get<'a, 'input>(
        top_level: &'a LinkedHashMap<Yaml<'input>, Yaml<'input>>,
        key: &'static str,
    ) -> Option<&'a Yaml<'input>> {
        top_level
            .get(&Yaml::Value(Scalar::String(Cow::Borrowed(key))))
            .filter(|value| !matches!(value, Yaml::Value(Scalar::Null)))
    }

    fn parse_path(
        top_level: &LinkedHashMap<Yaml, Yaml>,
        key: &'static str,
    ) -> Result<Option<PathBuf>, MirrorConfigError> {
        match Self::get(top_level, key) {
            None => Ok(None),
            Some(Yaml::Value(Scalar::String(value))) if !value.is_empty() => {
                Ok(Some(PathBuf::from(&**value)))
            }
            Some(_) => InvalidValueSnafu {
                key,
                expected: "a non-empty path",
            }
            .fail(),
        }
    }

    fn parse_queue_capacity(
        top_level: &LinkedHashMap<Yaml, Yaml>,
    ) -> Result<Option<usize>, MirrorConfigError> {
        match Self::get(top_level, QUEUE_CAPACITY_KEY) {
            None => Ok(None),
            Some(Yaml::Value(Scalar::Integer(value))) => usize::try_from(*value)
                .map(Some)
                .ok()
                .context(InvalidValueSnafu {
                    key: QUEUE_CAPACITY_KEY,
                    expected: "a non-negative integer",
                }),
            Some(_) => InvalidValueSnafu {
                key: QUEUE_CAPACITY_KEY,
                expected: "a non-negative integer",
            }
            .fail(),
        }
    }

    fn parse_always_copy(
        top_level: &LinkedHashMap<Yaml, Yaml>,
    ) -> Result<Option<bool>, MirrorConfigError> {
        match Self::get(top_level, ALWAYS_COPY_KEY) {
            None => Ok(None),
            Some(Yaml::Value(Scalar::Boolean(value))) => Ok(Some(*value)),
            Some(_) => InvalidValueSnafu {
                key: ALWAYS_COPY_KEY,
                expected: "true or false",
            }
            .fail(),
        }
    }
}

impl TryFrom<&str> for MirrorConfig {
    type Error = MirrorConfigError;

    fn try_from(contents: &str) -> Result<Self, Self::Error> {
        let contents_vec = Yaml::load_from_str(contents).context(ParseSnafu)?;
        let contents = contents_vec.first().context(MalformedConfigSnafu)?;
        let top_level = contents.as_mapping().context(TopLevelNotMapSnafu)?;

        for key in top_level.keys() {
            match key {
                Yaml::Value(Scalar::String(name))
                    if [SOURCE_KEY, DESTINATION_KEY, QUEUE_CAPACITY_KEY, ALWAYS_COPY_KEY]
                        .contains(&&**name) => {}
                other => debug!("Ignoring unknown config key: {:?}", other),
            }
        }

        Ok(MirrorConfig {
            source: Self::parse_path(top_level, SOURCE_KEY)?,
            destination: Self::parse_path(top_level, DESTINATION_KEY)?,
            queue_capacity: Self::parse_queue_capacity(top_level)?,
            always_copy: Self::parse_always_copy(top_level)?,
        })
    }
}

#[derive(Debug, Snafu)]
pub enum MirrorConfigError {
    #[snafu(display("Failed to read the config file: {}", file_path))]
    ReadError {
        file_path: String,
        source: std::io::Error,
    },
    #[snafu(display("Failed to parse the config file"))]
    ParseError { source: saphyr::ScanError },
    #[snafu(display("Improperly formatted config file"))]
    MalformedConfig,
    #[snafu(display("Top level of config should be a map"))]
    TopLevelNotMap,
    #[snafu(display("'{}' should be {}", key, expected))]
    InvalidValueError {
        key: &'static str,
        expected: &'static str,
    },
    #[snafu(display("No {} directory given, pass it as an argument or set '{}' in the config file", key, key))]
    MissingSettingError { key: &'static str },
}
