//! Queue configuration.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// When submissions start draining.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Every submission drains immediately.
    #[default]
    Auto,

    /// Submissions only link into the chain; `Queue::run` drains the batch.
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Attached to log lines; group sub-queues use their key.
    pub label: String,
    pub run_mode: RunMode,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            label: "default".to_string(),
            run_mode: RunMode::Auto,
        }
    }
}

impl QueueConfig {
    pub fn manual() -> Self {
        Self {
            run_mode: RunMode::Manual,
            ..Self::default()
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: QueueConfig = serde_json::from_str(json)?;
        if config.label.trim().is_empty() {
            return Err(ConfigError::Invalid("label must not be empty".to_string()));
        }
        Ok(config)
    }

    pub fn is_manual(&self) -> bool {
        self.run_mode == RunMode::Manual
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config = QueueConfig::from_json(r#"{ "run_mode": "manual" }"#).unwrap();
        assert_eq!(config.label, "default");
        assert!(config.is_manual());
    }

    #[test]
    fn empty_label_is_rejected() {
        let err = QueueConfig::from_json(r#"{ "label": "  " }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn unknown_run_mode_is_a_parse_error() {
        let err = QueueConfig::from_json(r#"{ "run_mode": "sometimes" }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
