#![forbid(unsafe_code)]

//! Engine configuration.
//!
//! Every field defaults to the behavior the dashboard ships with, so
//! `EngineConfig::default()` needs no file at all. Deployments that stock
//! other package sizes override the step rules:
//!
//! ```toml
//! namespace = "packplan"
//! legacy_id_fallback = true
//!
//! [[step_rules]]
//! patterns = ["gallon"]
//! excludes = ["5gal"]
//! step = 4
//!
//! [[step_rules]]
//! patterns = ["8oz"]
//! standalone = true
//! step = 60
//! ```
//!
//! ```rust,ignore
//! let config = EngineConfig::from_toml_file("packplan.toml")?;
//! let config = EngineConfig::from_json_str(json)?;
//! ```

use std::path::Path;

use packplan_core::StepRules;
use serde::{Deserialize, Serialize};

/// Tunables for [`Engine`](crate::Engine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Prefix of every storage key (`<namespace>:<shipment>:<record>`).
    pub namespace: String,
    /// Size-class split increments, first match wins.
    pub step_rules: StepRules,
    /// Match saved order entries against raw unit ids when no stable id
    /// matches (records written before stable ids existed).
    pub legacy_id_fallback: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            namespace: "packplan".to_owned(),
            step_rules: StepRules::default(),
            legacy_id_fallback: true,
        }
    }
}

impl EngineConfig {
    /// Load from a JSON string and validate.
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(s)?;
        config.validated()
    }

    /// Load from a JSON file on disk.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content)
    }

    /// Load from a TOML string and validate.
    #[cfg(feature = "config-toml")]
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validated()
    }

    /// Load from a TOML file on disk.
    #[cfg(feature = "config-toml")]
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Check every parameter. An empty list means the config is valid.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.namespace.trim().is_empty() {
            errors.push("namespace must not be empty".into());
        }
        if self.namespace.contains(':') {
            errors.push(format!(
                "namespace must not contain ':', got {:?}",
                self.namespace
            ));
        }
        for (i, rule) in self.step_rules.0.iter().enumerate() {
            if rule.step == 0 {
                errors.push(format!("step_rules[{i}].step must be > 0"));
            }
            if rule.patterns.iter().all(|p| p.trim().is_empty()) {
                errors.push(format!("step_rules[{i}] needs at least one non-empty pattern"));
            }
        }

        errors
    }

    fn validated(self) -> Result<Self, ConfigError> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(self)
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

/// Errors from loading an [`EngineConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid JSON config: {0}")]
    Json(#[from] serde_json::Error),
    #[cfg(feature = "config-toml")]
    #[error("invalid TOML config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("config validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert!(EngineConfig::default().validate().is_empty());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config = EngineConfig::from_json_str(r#"{"namespace":"plant-2"}"#).unwrap();
        assert_eq!(config.namespace, "plant-2");
        assert_eq!(config.step_rules, StepRules::default());
        assert!(config.legacy_id_fallback);
    }

    #[test]
    fn custom_step_rules_from_json() {
        let config = EngineConfig::from_json_str(
            r#"{"step_rules":[{"patterns":["case"],"step":6}]}"#,
        )
        .unwrap();
        assert_eq!(config.step_rules.step_for("Case of 6"), 6);
        assert_eq!(config.step_rules.step_for("Gallon"), 1);
    }

    #[test]
    fn invalid_values_are_reported() {
        let err = EngineConfig::from_json_str(
            r#"{"namespace":"a:b","step_rules":[{"patterns":[""],"step":0}]}"#,
        )
        .unwrap_err();
        let ConfigError::Validation(errors) = err else {
            panic!("expected validation error, got {err:?}");
        };
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            EngineConfig::from_json_str("{not json"),
            Err(ConfigError::Json(_))
        ));
    }

    #[cfg(feature = "config-toml")]
    #[test]
    fn toml_round_trip() {
        let config = EngineConfig::from_toml_str(
            r#"
namespace = "dock"

[[step_rules]]
patterns = ["gallon"]
excludes = ["5gal"]
step = 4
"#,
        )
        .unwrap();
        assert_eq!(config.namespace, "dock");
        assert_eq!(config.step_rules.step_for("Gallon"), 4);
        assert_eq!(config.step_rules.step_for("Quart"), 1);
    }
}
