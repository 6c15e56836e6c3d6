use crate::error::WorkflowTriggerError;
use anyhow::Result;
use serde::Deserialize;
use std::{fs::OpenOptions, path::PathBuf, sync::Mutex};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Logging settings
///
/// # Environment Variables
/// - `LOG_LEVEL`: default filter directive when `RUST_LOG` is not set (default: info)
/// - `LOG_FILE_NAME`: write logs to this file in addition to (or instead of) stdout
/// - `LOG_FILE_DIR`: directory for `LOG_FILE_NAME` (default: current dir)
/// - `LOG_USE_JSON`: emit json lines (default: false)
/// - `LOG_USE_STDOUT`: write to stdout (default: true)
#[derive(Deserialize, Clone, Debug)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    pub file_name: Option<String>,
    pub file_dir: Option<String>,
    #[serde(default)]
    pub use_json: bool,
    #[serde(default = "default_use_stdout")]
    pub use_stdout: bool,
}

fn default_level() -> String {
    "info".to_string()
}
fn default_use_stdout() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_name: None,
            file_dir: None,
            use_json: false,
            use_stdout: default_use_stdout(),
        }
    }
}

impl LoggingConfig {
    pub fn file_path(&self) -> Option<PathBuf> {
        self.file_name.as_ref().map(|name| {
            self.file_dir
                .as_ref()
                .map(PathBuf::from)
                .unwrap_or_default()
                .join(name)
        })
    }
}

pub fn load_tracing_config_from_env() -> Result<LoggingConfig> {
    envy::prefixed("LOG_")
        .from_env::<LoggingConfig>()
        .map_err(|e| {
            WorkflowTriggerError::ParseError(format!("cannot read logging config from env: {e:?}"))
                .into()
        })
}

/// Install the global subscriber. `RUST_LOG` wins over `LoggingConfig::level`.
pub fn tracing_init(conf: LoggingConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(conf.level.as_str()))?;

    let stdout_layer = conf.use_stdout.then(|| {
        if conf.use_json {
            fmt::layer().json().boxed()
        } else {
            fmt::layer().boxed()
        }
    });
    let file_layer = match conf.file_path() {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            let layer = fmt::layer().with_ansi(false).with_writer(Mutex::new(file));
            Some(if conf.use_json {
                layer.json().boxed()
            } else {
                layer.boxed()
            })
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()?;
    tracing::debug!("tracing initialized: {:?}", conf);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let conf = LoggingConfig::default();
        assert_eq!(conf.level, "info");
        assert!(conf.use_stdout);
        assert!(!conf.use_json);
        assert!(conf.file_path().is_none());
    }

    #[test]
    fn test_file_path_joins_dir() {
        let conf = LoggingConfig {
            file_name: Some("trigger.log".to_string()),
            file_dir: Some("/var/log/entity-workflow".to_string()),
            ..Default::default()
        };
        assert_eq!(
            conf.file_path(),
            Some(PathBuf::from("/var/log/entity-workflow/trigger.log"))
        );
        let conf = LoggingConfig {
            file_name: Some("trigger.log".to_string()),
            ..Default::default()
        };
        assert_eq!(conf.file_path(), Some(PathBuf::from("trigger.log")));
    }
}
