//! Analysis record encoding
//!
//! This module turns branch scores and a verdict into the
//! [`HybridEngagementAnalysis`] record the request layer persists.
//! All scores in the record are on a 0-100 scale.

use crate::decision::DecisionEngine;
use crate::error::EngageError;
use crate::model::BranchScores;
use crate::profile::ThresholdProfile;
use crate::types::{
    AnalysisProducer, AuxiliarySignals, HybridEngagementAnalysis, InterventionVerdict,
};
use crate::{PRODUCER_NAME, SCANVOX_VERSION};
use chrono::Utc;
use uuid::Uuid;

/// Everything one analysis record is built from
#[derive(Debug, Clone, Copy)]
pub struct AnalysisInput<'a> {
    pub session_id: &'a str,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    pub scores: &'a BranchScores,
    pub verdict: &'a InterventionVerdict,
    pub profile: &'a ThresholdProfile,
    pub auxiliary: Option<&'a AuxiliarySignals>,
}

/// Encoder for producing analysis records
pub struct AnalysisEncoder {
    instance_id: String,
}

impl Default for AnalysisEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalysisEncoder {
    /// Create a new encoder with a unique instance ID
    pub fn new() -> Self {
        Self {
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    /// Create an encoder with a specific instance ID
    pub fn with_instance_id(instance_id: String) -> Self {
        Self { instance_id }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Build the record; branch scores use the same engagement derivation as
    /// the decision, without auxiliary signals
    pub fn encode(
        &self,
        engine: &DecisionEngine,
        input: &AnalysisInput<'_>,
    ) -> HybridEngagementAnalysis {
        let fused = &input.scores.fused;
        let aux = input.auxiliary;

        HybridEngagementAnalysis {
            session_id: input.session_id.to_string(),
            timestamp: input.timestamp,
            computed_at_utc: Utc::now().to_rfc3339(),
            producer: AnalysisProducer {
                name: PRODUCER_NAME.to_string(),
                version: SCANVOX_VERSION.to_string(),
                instance_id: self.instance_id.clone(),
            },
            cnn_score: engine.derived_engagement(&input.scores.visual, None),
            lstm_score: engine.derived_engagement(&input.scores.temporal, None),
            microexpression_score: aux
                .and_then(|a| a.microexpression)
                .map(|m| percent(m.engagement)),
            gesture_score: aux.and_then(|a| a.gesture_score).map(percent),
            hybrid_engagement_score: engine.derived_engagement(fused, aux),
            attention_score: percent(fused.attention_score),
            frustration_level: engine.effective_frustration(fused, aux),
            engagement_level: fused.level(),
            condition: input.profile.condition.as_str().to_string(),
            intervention_needed: input.verdict.intervention_needed,
            recommended_break_time: input.verdict.recommended_break_seconds,
            adaptive_difficulty_adjustment: input.verdict.difficulty_adjustment,
            severity: input.verdict.severity,
        }
    }

    /// Encode to JSON string
    pub fn encode_to_json(
        &self,
        engine: &DecisionEngine,
        input: &AnalysisInput<'_>,
    ) -> Result<String, EngageError> {
        let record = self.encode(engine, input);
        serde_json::to_string_pretty(&record).map_err(EngageError::JsonError)
    }
}

fn percent(value: f64) -> f64 {
    if value.is_finite() {
        (value * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::Condition;
    use crate::types::{
        ClassDistribution, EngagementLevel, EngagementScores, InterventionSeverity,
        MicroexpressionScores,
    };

    fn scores(level: EngagementLevel, attention: f64, frustration: f64) -> EngagementScores {
        EngagementScores {
            engagement_class: ClassDistribution::certain(level),
            attention_score: attention,
            frustration_score: frustration,
        }
    }

    fn branch_scores() -> BranchScores {
        BranchScores {
            fused: scores(EngagementLevel::Medium, 0.62, 0.2),
            visual: scores(EngagementLevel::High, 0.7, 0.1),
            temporal: scores(EngagementLevel::Critical, 0.3, 0.6),
        }
    }

    #[test]
    fn test_encode_record() {
        let encoder = AnalysisEncoder::with_instance_id("test-instance".to_string());
        let engine = DecisionEngine::default();
        let branches = branch_scores();
        let profile = ThresholdProfile::standard(Condition::Adhd);
        let verdict = InterventionVerdict::no_action();
        let input = AnalysisInput {
            session_id: "session-9",
            timestamp: 1_700_000_000_000,
            scores: &branches,
            verdict: &verdict,
            profile: &profile,
            auxiliary: None,
        };

        let record = encoder.encode(&engine, &input);
        assert_eq!(record.producer.name, PRODUCER_NAME);
        assert_eq!(record.producer.version, SCANVOX_VERSION);
        assert_eq!(record.producer.instance_id, "test-instance");
        assert_eq!(record.session_id, "session-9");
        assert!((record.cnn_score - 100.0).abs() < 1e-9);
        assert!(record.lstm_score.abs() < 1e-9);
        assert!((record.hybrid_engagement_score - 200.0 / 3.0).abs() < 1e-9);
        assert!((record.attention_score - 62.0).abs() < 1e-9);
        assert!((record.frustration_level - 20.0).abs() < 1e-9);
        assert_eq!(record.engagement_level, EngagementLevel::Medium);
        assert_eq!(record.condition, "adhd");
        assert_eq!(record.severity, InterventionSeverity::None);
        assert!(record.microexpression_score.is_none());
    }

    #[test]
    fn test_auxiliary_scores_reported() {
        let encoder = AnalysisEncoder::new();
        let engine = DecisionEngine::default();
        let branches = branch_scores();
        let profile = ThresholdProfile::standard(Condition::Typical);
        let verdict = InterventionVerdict::no_action();
        let aux = AuxiliarySignals {
            microexpression: Some(MicroexpressionScores {
                valence: 0.1,
                arousal: 0.4,
                frustration: 0.5,
                confusion: 0.2,
                engagement: 0.3,
            }),
            gesture_score: Some(0.9),
        };
        let input = AnalysisInput {
            session_id: "s",
            timestamp: 0,
            scores: &branches,
            verdict: &verdict,
            profile: &profile,
            auxiliary: Some(&aux),
        };

        let record = encoder.encode(&engine, &input);
        assert!((record.microexpression_score.unwrap() - 30.0).abs() < 1e-9);
        assert!((record.gesture_score.unwrap() - 90.0).abs() < 1e-9);
        // max(model 0.2, observed 0.5)
        assert!((record.frustration_level - 50.0).abs() < 1e-9);
        assert!(!encoder.instance_id().is_empty());
    }

    #[test]
    fn test_encode_to_json() {
        let encoder = AnalysisEncoder::new();
        let engine = DecisionEngine::default();
        let branches = branch_scores();
        let profile = ThresholdProfile::standard(Condition::Anxiety);
        let verdict = InterventionVerdict::no_action();
        let input = AnalysisInput {
            session_id: "s",
            timestamp: 0,
            scores: &branches,
            verdict: &verdict,
            profile: &profile,
            auxiliary: None,
        };

        let json = encoder.encode_to_json(&engine, &input).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["condition"], "anxietyDisorder");
        assert_eq!(parsed["engagementLevel"], "medium");
        assert!(parsed.get("hybridEngagementScore").is_some());
        assert!(parsed.get("gestureScore").is_none());
        assert!(parsed["recommendedBreakTime"].is_null());
    }
}
