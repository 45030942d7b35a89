use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer};

pub use tracing::{debug, error, info, instrument, trace, warn};

/// How often the log file rolls over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rotation {
    Hourly,
    Daily,
    Never,
}

impl From<Rotation> for rolling::Rotation {
    fn from(r: Rotation) -> Self {
        match r {
            Rotation::Hourly => rolling::Rotation::HOURLY,
            Rotation::Daily => rolling::Rotation::DAILY,
            Rotation::Never => rolling::Rotation::NEVER,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is unset (e.g. `info`,
    /// `ethfs_namespace=debug`).
    pub level: String,

    /// Directory for log files. File logging is off when unset.
    pub log_dir: Option<PathBuf>,

    pub file_prefix: String,

    pub rotation: Rotation,

    pub json_format: bool,

    /// Mirror logs to stderr. Filesystem daemons keep stdout clean.
    pub console_output: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: "info".into(),
            log_dir: None,
            file_prefix: "ethfs".into(),
            rotation: Rotation::Daily,
            json_format: false,
            console_output: true,
        }
    }
}

type BoxedLayer = Box<dyn Layer<tracing_subscriber::Registry> + Send + Sync>;

fn format_layer<W>(json: bool, writer: W) -> BoxedLayer
where
    W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    if json {
        fmt::layer().json().with_writer(writer).boxed()
    } else {
        fmt::layer().with_writer(writer).boxed()
    }
}

/// Install the global subscriber. Call once at startup and keep the returned
/// guard alive for as long as file logging should flush.
pub fn init_logging(config: &LogConfig) -> io::Result<Option<WorkerGuard>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let mut layers: Vec<BoxedLayer> = Vec::new();
    if config.console_output {
        layers.push(format_layer(config.json_format, io::stderr));
    }

    let guard = match config.log_dir {
        Some(ref log_dir) => {
            let appender = rolling::RollingFileAppender::builder()
                .rotation(config.rotation.into())
                .filename_prefix(&config.file_prefix)
                .filename_suffix("log")
                .build(log_dir)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            layers.push(format_layer(config.json_format, non_blocking));
            Some(guard)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(layers.with_filter(env_filter))
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::AlreadyExists, e))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = LogConfig::default();
        assert_eq!(cfg.level, "info");
        assert_eq!(cfg.rotation, Rotation::Daily);
        assert!(cfg.log_dir.is_none());
        assert!(cfg.console_output);
    }

    #[test]
    fn test_partial_toml() {
        let cfg: LogConfig = toml::from_str("level = \"debug\"\nrotation = \"hourly\"").unwrap();
        assert_eq!(cfg.level, "debug");
        assert_eq!(cfg.rotation, Rotation::Hourly);
        assert_eq!(cfg.file_prefix, "ethfs");
    }
}
