//! Engine configuration
//!
//! Every field is defaulted, so an empty JSON object is a valid config and a
//! partial document only overrides what it names.

use crate::decision::DecisionConfig;
use crate::error::EngageError;
use crate::gaze::GazeConfig;
use crate::model::ModelConfig;
use crate::types::{DEFAULT_GRID_SIZE, DEFAULT_MFCC_COEFFICIENTS, DEFAULT_TARGET_LENGTH};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Featurization settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub grid_size: usize,
    pub target_length: usize,
    /// Coefficient count assumed when a sequence has no frames
    pub coefficients: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            grid_size: DEFAULT_GRID_SIZE,
            target_length: DEFAULT_TARGET_LENGTH,
            coefficients: DEFAULT_MFCC_COEFFICIENTS,
        }
    }
}

/// Top-level configuration for [`crate::pipeline::EngagementProcessor`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub features: FeatureConfig,
    pub model: ModelConfig,
    pub gaze: GazeConfig,
    pub decision: DecisionConfig,
    /// Artifact stem to load at startup (`<stem>.bin` + `<stem>_config.json`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_path: Option<PathBuf>,
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self, EngageError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, EngageError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn to_json(&self) -> Result<String, EngageError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), EngageError> {
        let features = &self.features;
        if features.grid_size == 0 || features.target_length == 0 || features.coefficients == 0 {
            return Err(EngageError::InvalidConfig(format!(
                "feature sizes must be positive, got grid {} length {} coefficients {}",
                features.grid_size, features.target_length, features.coefficients
            )));
        }

        self.model.validate()?;

        // The featurizers must produce exactly what the network consumes
        if features.grid_size != self.model.grid_size() {
            return Err(EngageError::InvalidConfig(format!(
                "feature grid {} does not match model scanpath shape {:?}",
                features.grid_size, self.model.scanpath_shape
            )));
        }
        if [features.target_length, features.coefficients] != self.model.mfcc_shape {
            return Err(EngageError::InvalidConfig(format!(
                "feature sequence [{}, {}] does not match model mfcc shape {:?}",
                features.target_length, features.coefficients, self.model.mfcc_shape
            )));
        }

        let gaze = &self.gaze;
        if !(0.0..=1.0).contains(&gaze.min_confidence) {
            return Err(EngageError::InvalidConfig(format!(
                "gaze min_confidence must be within [0, 1], got {}",
                gaze.min_confidence
            )));
        }
        for (name, value) in [
            ("pixels_per_degree", gaze.pixels_per_degree),
            ("velocity_threshold_dps", gaze.velocity_threshold_dps),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(EngageError::InvalidConfig(format!(
                    "gaze {name} must be positive, got {value}"
                )));
            }
        }
        if !(gaze.min_fixation_ms.is_finite() && gaze.min_fixation_ms >= 0.0) {
            return Err(EngageError::InvalidConfig(format!(
                "gaze min_fixation_ms must be non-negative, got {}",
                gaze.min_fixation_ms
            )));
        }

        let decision = &self.decision;
        if !(decision.model_weight.is_finite() && decision.model_weight > 0.0) {
            return Err(EngageError::InvalidConfig(format!(
                "decision model_weight must be positive, got {}",
                decision.model_weight
            )));
        }
        for (name, value) in [
            ("microexpression_weight", decision.microexpression_weight),
            ("gesture_weight", decision.gesture_weight),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(EngageError::InvalidConfig(format!(
                    "decision {name} must be non-negative, got {value}"
                )));
            }
        }
        if decision
            .class_ordinal
            .iter()
            .any(|v| !(0.0..=1.0).contains(v))
        {
            return Err(EngageError::InvalidConfig(format!(
                "decision class_ordinal values must be within [0, 1], got {:?}",
                decision.class_ordinal
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_is_default() {
        let config = EngineConfig::from_json("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.features.grid_size, 50);
        assert_eq!(config.model.mfcc_shape, [100, 13]);
        assert!(config.model_path.is_none());
    }

    #[test]
    fn test_partial_override() {
        let json = r#"{
            "gaze": {"min_confidence": 0.8},
            "decision": {"gesture_weight": 0.0},
            "model_path": "models/engagement"
        }"#;
        let config = EngineConfig::from_json(json).unwrap();
        assert_eq!(config.gaze.min_confidence, 0.8);
        assert_eq!(config.gaze.pixels_per_degree, 35.0);
        assert_eq!(config.decision.gesture_weight, 0.0);
        assert_eq!(config.model_path, Some(PathBuf::from("models/engagement")));
    }

    #[test]
    fn test_rejects_mismatched_shapes() {
        let mut config = EngineConfig::default();
        config.features.grid_size = 32;
        assert!(matches!(
            config.validate(),
            Err(EngageError::InvalidConfig(_))
        ));

        let mut config = EngineConfig::default();
        config.features.coefficients = 20;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.features.grid_size = 16;
        config.model.scanpath_shape = [16, 16, 3];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_weights() {
        let mut config = EngineConfig::default();
        config.decision.model_weight = 0.0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.model.loss_weights.attention_score = -1.0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.gaze.velocity_threshold_dps = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_roundtrip_through_file() {
        let mut config = EngineConfig::default();
        config.model.seed = 7;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, config.to_json().unwrap()).unwrap();

        let loaded = EngineConfig::from_file(&path).unwrap();
        assert_eq!(loaded.model.seed, 7);
    }
}
