use chrono::Duration;
use rewind_persist::codec::{DEFAULT_COMPRESSION_LEVEL, DEFAULT_PAYLOAD_LIMIT};
use rewind_persist::{PayloadCodec, Retention};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Errors from loading engine configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("retention.minimum_age_secs {0} is out of range")]
    MinimumAgeOutOfRange(u64),
}

/// Default retention applied by `UndoEngine::apply_retention`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub limit: Option<usize>,
    pub minimum_age_secs: Option<u64>,
}

impl RetentionConfig {
    pub fn to_retention(&self) -> Result<Retention, ConfigError> {
        let minimum_age = match self.minimum_age_secs {
            Some(secs) => Some(
                i64::try_from(secs)
                    .ok()
                    .and_then(Duration::try_seconds)
                    .ok_or(ConfigError::MinimumAgeOutOfRange(secs))?,
            ),
            None => None,
        };
        Ok(Retention {
            limit: self.limit,
            minimum_age,
        })
    }
}

/// Engine settings, loadable from YAML. Every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub payload_limit_bytes: usize,
    pub compression_level: i32,
    /// Treat a vanished reference target as an undo failure.
    pub strict_references: bool,
    pub retention: RetentionConfig,
    /// Extra types never captured, on top of the schema's own list.
    pub exclusions: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            payload_limit_bytes: DEFAULT_PAYLOAD_LIMIT,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            strict_references: false,
            retention: RetentionConfig::default(),
            exclusions: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.retention.to_retention()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&data)
    }

    pub fn codec(&self) -> PayloadCodec {
        PayloadCodec::new(self.payload_limit_bytes, self.compression_level)
    }
}
