//! scanvox.session_batch.v1 schema definition
//!
//! One batch carries everything needed to analyze a viewing window:
//! - Screen geometry for rasterization
//! - Pre-segmented fixations and saccades, or raw gaze samples to segment
//! - Per-frame cepstral coefficients from the audio stream
//! - The learner's diagnosed conditions
//! - Optional externally computed microexpression/gesture scores

use crate::gaze::GazeSegmenter;
use crate::profile::DiagnosedConditions;
use crate::types::{AuxiliarySignals, FixationEvent, GazeEvent, SaccadeEvent, Scanpath};
use serde::{Deserialize, Serialize};

/// Current schema version
pub const SCHEMA_VERSION: &str = "scanvox.session_batch.v1";

fn default_schema_version() -> String {
    SCHEMA_VERSION.to_string()
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Screen size in pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreenSize {
    pub width: f64,
    pub height: f64,
}

impl Default for ScreenSize {
    fn default() -> Self {
        Self {
            width: 1920.0,
            height: 1080.0,
        }
    }
}

/// Sensor batch for one session window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionBatch {
    /// Schema version identifier
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Capture time, milliseconds since the Unix epoch
    #[serde(default = "now_millis")]
    pub timestamp: i64,
    #[serde(default)]
    pub screen: ScreenSize,
    #[serde(default)]
    pub fixations: Vec<FixationEvent>,
    #[serde(default)]
    pub saccades: Vec<SaccadeEvent>,
    /// Raw samples, segmented only when no fixations or saccades are given
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gaze: Vec<GazeEvent>,
    #[serde(default)]
    pub mfcc_frames: Vec<Vec<f64>>,
    #[serde(default)]
    pub conditions: DiagnosedConditions,
    #[serde(default)]
    pub auxiliary: AuxiliarySignals,
}

impl SessionBatch {
    /// Empty batch for a session on a screen of the given size
    pub fn new(session_id: impl Into<String>, width: f64, height: f64) -> Self {
        Self {
            schema_version: default_schema_version(),
            session_id: session_id.into(),
            user_id: None,
            timestamp: now_millis(),
            screen: ScreenSize { width, height },
            fixations: Vec::new(),
            saccades: Vec::new(),
            gaze: Vec::new(),
            mfcc_frames: Vec::new(),
            conditions: DiagnosedConditions::default(),
            auxiliary: AuxiliarySignals::default(),
        }
    }

    pub fn with_scanpath(mut self, scanpath: Scanpath) -> Self {
        self.fixations = scanpath.fixations;
        self.saccades = scanpath.saccades;
        self
    }

    pub fn with_gaze(mut self, gaze: Vec<GazeEvent>) -> Self {
        self.gaze = gaze;
        self
    }

    pub fn with_mfcc_frames(mut self, frames: Vec<Vec<f64>>) -> Self {
        self.mfcc_frames = frames;
        self
    }

    pub fn with_conditions(mut self, conditions: DiagnosedConditions) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn with_auxiliary(mut self, auxiliary: AuxiliarySignals) -> Self {
        self.auxiliary = auxiliary;
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Scanpath for this batch: the given events, or the raw gaze segmented
    /// when no events were supplied
    pub fn scanpath(&self, segmenter: &GazeSegmenter) -> Scanpath {
        if self.fixations.is_empty() && self.saccades.is_empty() && !self.gaze.is_empty() {
            return segmenter.segment(&self.gaze);
        }
        Scanpath {
            fixations: self.fixations.clone(),
            saccades: self.saccades.clone(),
        }
    }

    /// Validate the batch
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(ValidationError::InvalidSchemaVersion {
                expected: SCHEMA_VERSION.to_string(),
                actual: self.schema_version.clone(),
            });
        }
        if self.session_id.trim().is_empty() {
            return Err(ValidationError::EmptySessionId);
        }

        let ScreenSize { width, height } = self.screen;
        if !(width.is_finite() && height.is_finite() && width > 0.0 && height > 0.0) {
            return Err(ValidationError::InvalidScreen { width, height });
        }

        for (index, fix) in self.fixations.iter().enumerate() {
            if !(fix.x.is_finite() && fix.y.is_finite()) {
                return Err(ValidationError::NonFiniteCoordinate {
                    field: "fixations".to_string(),
                    index,
                });
            }
            check_non_negative("fixations.durationMs", index, fix.duration_ms)?;
        }

        for (index, sacc) in self.saccades.iter().enumerate() {
            if !(sacc.to_x.is_finite() && sacc.to_y.is_finite()) {
                return Err(ValidationError::NonFiniteCoordinate {
                    field: "saccades".to_string(),
                    index,
                });
            }
            check_non_negative("saccades.velocity", index, sacc.velocity)?;
        }

        for (index, point) in self.gaze.iter().enumerate() {
            if !(point.x.is_finite() && point.y.is_finite()) {
                return Err(ValidationError::NonFiniteCoordinate {
                    field: "gaze".to_string(),
                    index,
                });
            }
            if !(0.0..=1.0).contains(&point.confidence) {
                return Err(ValidationError::ConfidenceOutOfRange {
                    index,
                    value: point.confidence,
                });
            }
        }

        if let Some(width) = self.mfcc_frames.first().map(Vec::len) {
            for (index, frame) in self.mfcc_frames.iter().enumerate() {
                if frame.len() != width {
                    return Err(ValidationError::RaggedFrames {
                        index,
                        expected: width,
                        actual: frame.len(),
                    });
                }
                if frame.iter().any(|v| !v.is_finite()) {
                    return Err(ValidationError::NonFiniteCoordinate {
                        field: "mfccFrames".to_string(),
                        index,
                    });
                }
            }
        }

        if let Some(gesture) = self.auxiliary.gesture_score {
            check_unit("auxiliary.gestureScore", gesture)?;
        }
        if let Some(micro) = self.auxiliary.microexpression {
            if !(-1.0..=1.0).contains(&micro.valence) {
                return Err(ValidationError::ScoreOutOfRange {
                    field: "auxiliary.microexpression.valence".to_string(),
                    value: micro.valence,
                });
            }
            check_unit("auxiliary.microexpression.arousal", micro.arousal)?;
            check_unit("auxiliary.microexpression.frustration", micro.frustration)?;
            check_unit("auxiliary.microexpression.confusion", micro.confusion)?;
            check_unit("auxiliary.microexpression.engagement", micro.engagement)?;
        }

        Ok(())
    }
}

fn check_non_negative(field: &str, index: usize, value: f64) -> Result<(), ValidationError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ValidationError::NegativeValue {
            field: field.to_string(),
            index,
            value,
        })
    }
}

fn check_unit(field: &str, value: f64) -> Result<(), ValidationError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::ScoreOutOfRange {
            field: field.to_string(),
            value,
        })
    }
}

/// Validation errors for session batches
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid schema version: expected {expected}, got {actual}")]
    InvalidSchemaVersion { expected: String, actual: String },

    #[error("Session id is empty")]
    EmptySessionId,

    #[error("Invalid screen size {width}x{height}")]
    InvalidScreen { width: f64, height: f64 },

    #[error("Non-finite value in {field}[{index}]")]
    NonFiniteCoordinate { field: String, index: usize },

    #[error("{field}[{index}] must be a finite non-negative number, got {value}")]
    NegativeValue {
        field: String,
        index: usize,
        value: f64,
    },

    #[error("gaze[{index}] confidence {value} outside [0, 1]")]
    ConfidenceOutOfRange { index: usize, value: f64 },

    #[error("mfccFrames[{index}] has {actual} coefficients, expected {expected}")]
    RaggedFrames {
        index: usize,
        expected: usize,
        actual: usize,
    },

    #[error("{field} = {value} is out of range")]
    ScoreOutOfRange { field: String, value: f64 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::Condition;
    use crate::types::MicroexpressionScores;

    fn batch() -> SessionBatch {
        SessionBatch::new("session-1", 1920.0, 1080.0)
            .with_scanpath(Scanpath {
                fixations: vec![FixationEvent { x: 10.0, y: 20.0, duration_ms: 250.0 }],
                saccades: vec![SaccadeEvent { to_x: 10.0, to_y: 20.0, velocity: 320.0 }],
            })
            .with_mfcc_frames(vec![vec![0.1; 13]; 4])
    }

    #[test]
    fn test_deserialize_batch() {
        let json = r#"{
            "sessionId": "abc",
            "timestamp": 1700000000000,
            "screen": {"width": 1280, "height": 720},
            "fixations": [{"x": 100, "y": 200, "duration": 300}],
            "saccades": [{"toX": 400, "toY": 100, "velocity": 250}],
            "mfccFrames": [[1.0, 2.0], [3.0, 4.0]],
            "conditions": {"adhd": true, "dyslexia": true},
            "auxiliary": {"gestureScore": 0.4}
        }"#;

        let batch: SessionBatch = serde_json::from_str(json).unwrap();
        assert_eq!(batch.schema_version, SCHEMA_VERSION);
        assert_eq!(batch.fixations[0].duration_ms, 300.0);
        assert_eq!(Condition::select(&batch.conditions), Condition::Adhd);
        assert_eq!(batch.auxiliary.gesture_score, Some(0.4));
        assert!(batch.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        assert!(batch().validate().is_ok());

        let mut wrong_version = batch();
        wrong_version.schema_version = "v0".to_string();
        assert!(matches!(
            wrong_version.validate(),
            Err(ValidationError::InvalidSchemaVersion { .. })
        ));

        let zero_screen = SessionBatch::new("s", 0.0, 1080.0);
        assert!(matches!(
            zero_screen.validate(),
            Err(ValidationError::InvalidScreen { .. })
        ));

        let mut negative = batch();
        negative.fixations[0].duration_ms = -1.0;
        assert!(matches!(
            negative.validate(),
            Err(ValidationError::NegativeValue { .. })
        ));

        let mut ragged = batch();
        ragged.mfcc_frames[2] = vec![0.0; 12];
        assert_eq!(
            ragged.validate(),
            Err(ValidationError::RaggedFrames {
                index: 2,
                expected: 13,
                actual: 12
            })
        );

        let blank = SessionBatch::new("  ", 100.0, 100.0);
        assert_eq!(blank.validate(), Err(ValidationError::EmptySessionId));
    }

    #[test]
    fn test_auxiliary_ranges() {
        let mut bad = batch();
        bad.auxiliary.microexpression = Some(MicroexpressionScores {
            valence: -1.5,
            arousal: 0.5,
            frustration: 0.5,
            confusion: 0.5,
            engagement: 0.5,
        });
        assert!(matches!(
            bad.validate(),
            Err(ValidationError::ScoreOutOfRange { .. })
        ));

        let mut gesture = batch();
        gesture.auxiliary.gesture_score = Some(f64::NAN);
        assert!(gesture.validate().is_err());
    }

    #[test]
    fn test_gaze_segmented_only_without_events() {
        let gaze: Vec<GazeEvent> = (0..20)
            .map(|i| GazeEvent {
                x: 500.0,
                y: 500.0,
                timestamp: i * 10,
                confidence: 1.0,
            })
            .collect();
        let segmenter = GazeSegmenter::default();

        let raw_only = SessionBatch::new("s", 1920.0, 1080.0).with_gaze(gaze.clone());
        assert_eq!(raw_only.scanpath(&segmenter).fixations.len(), 1);

        let with_events = batch().with_gaze(gaze);
        assert_eq!(with_events.scanpath(&segmenter).fixations[0].x, 10.0);
    }
}
