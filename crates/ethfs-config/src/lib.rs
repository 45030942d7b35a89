//! Configuration plumbing shared by ethfs components.
//!
//! A [`Config`] knows how to build itself from a TOML value, validate its
//! ranges, merge hot-updatable fields from a newer copy, and render itself
//! back to TOML. [`ConfigManager`] holds the live copy behind `arc-swap` so
//! readers never block a reload.

mod manager;

pub use manager::ConfigManager;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("toml parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("toml render error: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("field `{field}` expects {expected}")]
    TypeMismatch { field: String, expected: String },

    #[error("field `{field}` value {value} out of range [{min:?}, {max:?}]")]
    OutOfRange {
        field: String,
        value: String,
        min: Option<String>,
        max: Option<String>,
    },

    #[error("invalid value for `{field}`: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// A configuration section.
pub trait Config: Sized + Send + Sync + 'static {
    /// Build the config from a parsed TOML document. Missing keys take their
    /// defaults.
    fn from_toml(value: &toml::Value) -> Result<Self, ConfigError>;

    /// Copy the hot-updatable fields of `other` into `self`.
    fn hot_update(&mut self, other: &Self);

    /// Render as TOML text.
    fn render(&self) -> String;

    /// Check value ranges and cross-field constraints.
    fn validate(&self) -> Result<(), ConfigError> {
        Ok(())
    }

    /// Parse TOML text and validate the result.
    fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let value: toml::Value = text.parse()?;
        let config = Self::from_toml(&value)?;
        config.validate()?;
        Ok(config)
    }
}

/// `from_toml` for serde types whose missing fields fall back to defaults.
pub fn from_toml_serde<T: DeserializeOwned>(value: &toml::Value) -> Result<T, ConfigError> {
    Ok(value.clone().try_into()?)
}

/// `render` for serde types. Falls back to an error comment so a broken
/// render never panics a dump command.
pub fn render_serde<T: Serialize>(config: &T) -> String {
    match toml::to_string_pretty(config) {
        Ok(text) => text,
        Err(e) => format!("# failed to render config: {}\n", e),
    }
}

/// Fail with `OutOfRange` unless `min <= value <= max`.
pub fn check_range<V>(field: &str, value: V, min: V, max: V) -> Result<(), ConfigError>
where
    V: PartialOrd + ToString,
{
    if value < min || value > max {
        return Err(ConfigError::OutOfRange {
            field: field.to_string(),
            value: value.to_string(),
            min: Some(min.to_string()),
            max: Some(max.to_string()),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(default)]
    struct ProbeConfig {
        workers: u32,
        label: String,
    }

    impl Default for ProbeConfig {
        fn default() -> Self {
            Self {
                workers: 4,
                label: "probe".into(),
            }
        }
    }

    impl Config for ProbeConfig {
        fn from_toml(value: &toml::Value) -> Result<Self, ConfigError> {
            from_toml_serde(value)
        }

        fn hot_update(&mut self, other: &Self) {
            self.workers = other.workers;
        }

        fn render(&self) -> String {
            render_serde(self)
        }

        fn validate(&self) -> Result<(), ConfigError> {
            check_range("workers", self.workers, 1, 64)
        }
    }

    #[test]
    fn test_missing_keys_take_defaults() {
        let cfg = ProbeConfig::from_toml_str("workers = 8").unwrap();
        assert_eq!(cfg.workers, 8);
        assert_eq!(cfg.label, "probe");
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let err = ProbeConfig::from_toml_str("workers = 0").unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { ref field, .. } if field == "workers"));
    }

    #[test]
    fn test_type_mismatch_is_parse_error() {
        assert!(ProbeConfig::from_toml_str("workers = \"many\"").is_err());
    }

    #[test]
    fn test_render_round_trip() {
        let cfg = ProbeConfig {
            workers: 9,
            label: "x".into(),
        };
        let parsed = ProbeConfig::from_toml_str(&cfg.render()).unwrap();
        assert_eq!(parsed.workers, 9);
        assert_eq!(parsed.label, "x");
    }
}
