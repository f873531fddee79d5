//! Intervention decisions
//!
//! Maps fused scores onto a [`ThresholdProfile`] with three ordered rules,
//! first match wins:
//! 1. Any critical breach: intervene with a forced break of the profile's
//!    break duration
//! 2. Any non-critical breach: intervene with a negative difficulty
//!    adjustment sized by the worst breach
//! 3. Otherwise: no action
//!
//! The engine is a pure function of its inputs and keeps no session memory.
//! Consecutive-breach hysteresis belongs to the caller.

use crate::profile::ThresholdProfile;
use crate::types::{
    AuxiliarySignals, EngagementScores, InterventionSeverity, InterventionVerdict, Metric,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Weights and class values used to derive a single engagement score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    /// Engagement value of each class (high, medium, low, critical), 0-1
    pub class_ordinal: [f64; 4],
    pub model_weight: f64,
    pub microexpression_weight: f64,
    pub gesture_weight: f64,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            class_ordinal: [1.0, 2.0 / 3.0, 1.0 / 3.0, 0.0],
            model_weight: 1.0,
            microexpression_weight: 0.5,
            gesture_weight: 0.5,
        }
    }
}

/// Rule-based decision engine
#[derive(Debug, Clone, Default)]
pub struct DecisionEngine {
    config: DecisionConfig,
}

impl DecisionEngine {
    pub fn new(config: DecisionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DecisionConfig {
        &self.config
    }

    /// Engagement on a 0-100 scale: the model's ordinal expected value blended
    /// with whichever auxiliary engagement readings are present
    pub fn derived_engagement(
        &self,
        scores: &EngagementScores,
        aux: Option<&AuxiliarySignals>,
    ) -> f64 {
        let mut weighted = self.config.model_weight
            * scores.engagement_class.expected_value(&self.config.class_ordinal);
        let mut total = self.config.model_weight;

        if let Some(aux) = aux {
            if let Some(micro) = aux.microexpression.filter(|m| m.engagement.is_finite()) {
                weighted += self.config.microexpression_weight * micro.engagement.clamp(0.0, 1.0);
                total += self.config.microexpression_weight;
            }
            if let Some(gesture) = aux.gesture_score.filter(|g| g.is_finite()) {
                weighted += self.config.gesture_weight * gesture.clamp(0.0, 1.0);
                total += self.config.gesture_weight;
            }
        }

        if total <= 0.0 {
            return 0.0;
        }
        (weighted / total * 100.0).clamp(0.0, 100.0)
    }

    /// Frustration on a 0-100 scale; a microexpression reading can raise it
    pub fn effective_frustration(
        &self,
        scores: &EngagementScores,
        aux: Option<&AuxiliarySignals>,
    ) -> f64 {
        let model = unit(scores.frustration_score);
        let observed = aux
            .and_then(|a| a.microexpression)
            .map(|m| unit(m.frustration))
            .unwrap_or(0.0);
        model.max(observed) * 100.0
    }

    pub fn decide(
        &self,
        scores: &EngagementScores,
        profile: &ThresholdProfile,
        aux: Option<&AuxiliarySignals>,
    ) -> InterventionVerdict {
        let frustration = self.effective_frustration(scores, aux);
        let attention = unit(scores.attention_score) * 100.0;
        let engagement = self.derived_engagement(scores, aux);

        let critical: Vec<Metric> = [
            (Metric::Frustration, frustration >= profile.critical_frustration_level),
            (Metric::Attention, attention <= profile.critical_attention_score),
            (Metric::Engagement, engagement <= profile.critical_engagement_score),
        ]
        .into_iter()
        .filter_map(|(metric, hit)| hit.then_some(metric))
        .collect();

        if !critical.is_empty() {
            debug!(
                condition = profile.condition.key(),
                frustration,
                attention,
                engagement,
                "critical threshold breached"
            );
            return InterventionVerdict {
                intervention_needed: true,
                recommended_break_seconds: Some(profile.break_seconds()),
                difficulty_adjustment: None,
                severity: InterventionSeverity::Critical,
                triggers: critical,
            };
        }

        let breaches: Vec<(Metric, f64)> = [
            (
                Metric::Frustration,
                frustration > profile.max_frustration_level,
                overshoot(
                    frustration - profile.max_frustration_level,
                    profile.critical_frustration_level - profile.max_frustration_level,
                ),
            ),
            (
                Metric::Attention,
                attention < profile.min_attention_score,
                overshoot(
                    profile.min_attention_score - attention,
                    profile.min_attention_score - profile.critical_attention_score,
                ),
            ),
            (
                Metric::Engagement,
                engagement < profile.min_engagement_score,
                overshoot(
                    profile.min_engagement_score - engagement,
                    profile.min_engagement_score - profile.critical_engagement_score,
                ),
            ),
        ]
        .into_iter()
        .filter_map(|(metric, hit, severity)| hit.then_some((metric, severity)))
        .collect();

        if breaches.is_empty() {
            return InterventionVerdict::no_action();
        }

        let worst = breaches.iter().map(|(_, s)| *s).fold(0.0f64, f64::max);
        debug!(
            condition = profile.condition.key(),
            worst, "threshold breached, easing difficulty"
        );
        InterventionVerdict {
            intervention_needed: true,
            recommended_break_seconds: None,
            difficulty_adjustment: Some(-worst.clamp(0.0, 1.0)),
            severity: InterventionSeverity::Advisory,
            triggers: breaches.into_iter().map(|(m, _)| m).collect(),
        }
    }
}

/// Scores outside 0-1 are clamped; non-finite scores read as 0
fn unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// How far past a soft threshold a value is, as a fraction of the distance to
/// the matching critical threshold
fn overshoot(distance: f64, span: f64) -> f64 {
    if span <= 0.0 {
        return 1.0;
    }
    (distance / span).clamp(0.0, 1.0)
}

/// Session pacing outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PacingStatus {
    Continue,
    BreakDue {
        #[serde(rename = "breakSeconds")]
        break_seconds: u32,
    },
    SessionLimitReached,
}

/// Checks elapsed session time against a profile's pacing parameters
#[derive(Debug, Clone, Copy, Default)]
pub struct PacingAdvisor;

impl PacingAdvisor {
    /// `elapsed_minutes` since the session started and `since_break_minutes`
    /// since the last break (or the start)
    pub fn check(
        profile: &ThresholdProfile,
        elapsed_minutes: f64,
        since_break_minutes: f64,
    ) -> PacingStatus {
        if elapsed_minutes >= f64::from(profile.max_session_length) {
            PacingStatus::SessionLimitReached
        } else if since_break_minutes >= f64::from(profile.break_frequency) {
            PacingStatus::BreakDue {
                break_seconds: profile.break_seconds(),
            }
        } else {
            PacingStatus::Continue
        }
    }
}

/// Response time band relative to a profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatencyBand {
    Normal,
    Slow,
    VerySlow,
}

/// Band a response latency in seconds; non-finite latencies land in `VerySlow`
pub fn classify_response_latency(profile: &ThresholdProfile, seconds: f64) -> LatencyBand {
    if seconds <= profile.normal_response_time {
        LatencyBand::Normal
    } else if seconds <= profile.slow_response_time {
        LatencyBand::Slow
    } else {
        LatencyBand::VerySlow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::Condition;
    use crate::types::{ClassDistribution, EngagementLevel, MicroexpressionScores};
    use pretty_assertions::assert_eq;

    fn scores(level: EngagementLevel, attention: f64, frustration: f64) -> EngagementScores {
        EngagementScores {
            engagement_class: ClassDistribution::certain(level),
            attention_score: attention,
            frustration_score: frustration,
        }
    }

    fn profile(condition: Condition) -> ThresholdProfile {
        ThresholdProfile::standard(condition)
    }

    #[test]
    fn test_critical_breach_forces_break() {
        let engine = DecisionEngine::default();
        let verdict = engine.decide(
            &scores(EngagementLevel::High, 0.10, 0.95),
            &profile(Condition::Asd),
            None,
        );

        assert!(verdict.intervention_needed);
        assert_eq!(verdict.recommended_break_seconds, Some(420));
        assert_eq!(verdict.difficulty_adjustment, None);
        assert_eq!(verdict.severity, InterventionSeverity::Critical);
        assert_eq!(verdict.triggers, vec![Metric::Frustration, Metric::Attention]);
    }

    #[test]
    fn test_critical_boundaries_are_inclusive() {
        let engine = DecisionEngine::default();
        let typical = profile(Condition::Typical);

        // Attention exactly at the critical score (30)
        let verdict = engine.decide(&scores(EngagementLevel::High, 0.30, 0.0), &typical, None);
        assert_eq!(verdict.severity, InterventionSeverity::Critical);
        assert_eq!(verdict.triggers, vec![Metric::Attention]);

        // Frustration exactly at the critical level (80)
        let verdict = engine.decide(&scores(EngagementLevel::High, 0.9, 0.80), &typical, None);
        assert_eq!(verdict.triggers, vec![Metric::Frustration]);
    }

    #[test]
    fn test_critical_engagement_class() {
        let engine = DecisionEngine::default();
        let verdict = engine.decide(
            &scores(EngagementLevel::Critical, 0.9, 0.1),
            &profile(Condition::Typical),
            None,
        );
        assert_eq!(verdict.triggers, vec![Metric::Engagement]);
        assert_eq!(verdict.recommended_break_seconds, Some(300));
    }

    #[test]
    fn test_soft_breach_adjusts_difficulty() {
        let engine = DecisionEngine::default();
        // Typical: max frustration 60, critical 80; 70 is halfway
        let verdict = engine.decide(
            &scores(EngagementLevel::High, 0.9, 0.70),
            &profile(Condition::Typical),
            None,
        );

        assert!(verdict.intervention_needed);
        assert_eq!(verdict.recommended_break_seconds, None);
        assert_eq!(verdict.severity, InterventionSeverity::Advisory);
        assert_eq!(verdict.triggers, vec![Metric::Frustration]);
        let adjustment = verdict.difficulty_adjustment.unwrap();
        assert!((adjustment + 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_worst_breach_drives_adjustment() {
        let engine = DecisionEngine::default();
        // Typical attention: min 50, critical 30; 35 is 75% of the way.
        // Frustration 65 is 25% of the way from 60 to 80.
        let verdict = engine.decide(
            &scores(EngagementLevel::High, 0.35, 0.65),
            &profile(Condition::Typical),
            None,
        );
        assert_eq!(verdict.triggers, vec![Metric::Frustration, Metric::Attention]);
        assert!((verdict.difficulty_adjustment.unwrap() + 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_healthy_scores_need_no_action() {
        let engine = DecisionEngine::default();
        let verdict = engine.decide(
            &scores(EngagementLevel::High, 0.85, 0.2),
            &profile(Condition::Typical),
            None,
        );
        assert_eq!(verdict, InterventionVerdict::no_action());
    }

    #[test]
    fn test_soft_threshold_boundaries_are_strict() {
        let engine = DecisionEngine::default();
        // Exactly at min attention (50) and max frustration (60): no breach
        let verdict = engine.decide(
            &scores(EngagementLevel::High, 0.50, 0.60),
            &profile(Condition::Typical),
            None,
        );
        assert!(!verdict.intervention_needed);
    }

    #[test]
    fn test_derived_engagement_blends_auxiliary() {
        let engine = DecisionEngine::default();
        let s = scores(EngagementLevel::Medium, 0.8, 0.1);
        assert!((engine.derived_engagement(&s, None) - 200.0 / 3.0).abs() < 1e-9);

        let aux = AuxiliarySignals {
            microexpression: None,
            gesture_score: Some(0.0),
        };
        // (1.0 * 2/3 + 0.5 * 0) / 1.5
        let blended = engine.derived_engagement(&s, Some(&aux));
        assert!((blended - 400.0 / 9.0).abs() < 1e-9);

        let ignored = AuxiliarySignals {
            microexpression: None,
            gesture_score: Some(f64::NAN),
        };
        assert!((engine.derived_engagement(&s, Some(&ignored)) - 200.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_microexpression_raises_frustration() {
        let engine = DecisionEngine::default();
        let aux = AuxiliarySignals {
            microexpression: Some(MicroexpressionScores {
                valence: -0.6,
                arousal: 0.8,
                frustration: 0.9,
                confusion: 0.4,
                engagement: 0.7,
            }),
            gesture_score: None,
        };
        let s = scores(EngagementLevel::High, 0.9, 0.1);
        assert!((engine.effective_frustration(&s, Some(&aux)) - 90.0).abs() < 1e-9);

        let verdict = engine.decide(&s, &profile(Condition::Typical), Some(&aux));
        assert_eq!(verdict.triggers, vec![Metric::Frustration]);
        assert_eq!(verdict.severity, InterventionSeverity::Critical);
    }

    #[test]
    fn test_decide_is_idempotent() {
        let engine = DecisionEngine::default();
        let s = scores(EngagementLevel::Low, 0.45, 0.55);
        let p = profile(Condition::Dyslexia);
        assert_eq!(engine.decide(&s, &p, None), engine.decide(&s, &p, None));
    }

    #[test]
    fn test_non_finite_scores_fail_safe() {
        let engine = DecisionEngine::default();
        let verdict = engine.decide(
            &scores(EngagementLevel::High, f64::NAN, f64::NAN),
            &profile(Condition::Typical),
            None,
        );
        assert_eq!(verdict.triggers, vec![Metric::Attention]);

        let nan_distribution = EngagementScores {
            engagement_class: ClassDistribution::new([f64::NAN; 4]),
            attention_score: 0.9,
            frustration_score: 0.1,
        };
        assert_eq!(engine.derived_engagement(&nan_distribution, None), 0.0);
        let verdict = engine.decide(&nan_distribution, &profile(Condition::Typical), None);
        assert_eq!(verdict.severity, InterventionSeverity::Critical);
        assert_eq!(verdict.triggers, vec![Metric::Engagement]);
    }

    #[test]
    fn test_pacing() {
        let adhd = profile(Condition::Adhd);
        assert_eq!(PacingAdvisor::check(&adhd, 5.0, 5.0), PacingStatus::Continue);
        assert_eq!(
            PacingAdvisor::check(&adhd, 12.0, 10.0),
            PacingStatus::BreakDue { break_seconds: 300 }
        );
        assert_eq!(
            PacingAdvisor::check(&adhd, 25.0, 2.0),
            PacingStatus::SessionLimitReached
        );
    }

    #[test]
    fn test_response_latency_bands() {
        let asd = profile(Condition::Asd);
        assert_eq!(classify_response_latency(&asd, 4.0), LatencyBand::Normal);
        assert_eq!(classify_response_latency(&asd, 5.0), LatencyBand::Normal);
        assert_eq!(classify_response_latency(&asd, 12.0), LatencyBand::Slow);
        assert_eq!(classify_response_latency(&asd, 15.5), LatencyBand::VerySlow);
        assert_eq!(classify_response_latency(&asd, f64::NAN), LatencyBand::VerySlow);

        let typical = profile(Condition::Typical);
        assert_eq!(classify_response_latency(&typical, 4.0), LatencyBand::Slow);
    }

    #[test]
    fn test_pacing_status_serializes_tagged() {
        let json = serde_json::to_value(PacingStatus::BreakDue { break_seconds: 420 }).unwrap();
        assert_eq!(json["status"], "break_due");
        assert_eq!(json["breakSeconds"], 420);
    }
}
