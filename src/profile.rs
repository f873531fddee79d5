//! Condition-specific threshold profiles
//!
//! Six profiles are calibrated ahead of time from published pacing guidance
//! (APA, AAP): typical, adhd, asd, dyslexia, dyscalculia, and anxiety.
//! A [`ProfileRegistry`] owns them for the life of the process and hands out
//! shared references; nothing mutates a profile after construction.
//!
//! When a learner has several diagnosed conditions the most specific one
//! wins, in the order asd > adhd > anxiety > dyslexia > dyscalculia, falling
//! back to typical.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Conditions with a dedicated threshold profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Condition {
    #[serde(rename = "typical")]
    Typical,
    #[serde(rename = "adhd")]
    Adhd,
    #[serde(rename = "asd")]
    Asd,
    #[serde(rename = "dyslexia")]
    Dyslexia,
    #[serde(rename = "dyscalculia")]
    Dyscalculia,
    #[serde(rename = "anxietyDisorder", alias = "anxiety")]
    Anxiety,
}

impl Condition {
    /// Registry order
    pub const ALL: [Condition; 6] = [
        Condition::Typical,
        Condition::Adhd,
        Condition::Asd,
        Condition::Dyslexia,
        Condition::Dyscalculia,
        Condition::Anxiety,
    ];

    /// Selection order, most specific first
    pub const PRIORITY: [Condition; 5] = [
        Condition::Asd,
        Condition::Adhd,
        Condition::Anxiety,
        Condition::Dyslexia,
        Condition::Dyscalculia,
    ];

    /// Short registry key
    pub fn key(&self) -> &'static str {
        match self {
            Condition::Typical => "typical",
            Condition::Adhd => "adhd",
            Condition::Asd => "asd",
            Condition::Dyslexia => "dyslexia",
            Condition::Dyscalculia => "dyscalculia",
            Condition::Anxiety => "anxiety",
        }
    }

    /// Label as reported in analysis records
    pub fn as_str(&self) -> &'static str {
        match self {
            Condition::Anxiety => "anxietyDisorder",
            other => other.key(),
        }
    }

    fn index(&self) -> usize {
        match self {
            Condition::Typical => 0,
            Condition::Adhd => 1,
            Condition::Asd => 2,
            Condition::Dyslexia => 3,
            Condition::Dyscalculia => 4,
            Condition::Anxiety => 5,
        }
    }

    /// Highest-priority condition flagged in `conditions`
    pub fn select(conditions: &DiagnosedConditions) -> Condition {
        Condition::PRIORITY
            .into_iter()
            .find(|c| conditions.has(*c))
            .unwrap_or(Condition::Typical)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Condition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "typical" => Ok(Condition::Typical),
            "adhd" => Ok(Condition::Adhd),
            "asd" => Ok(Condition::Asd),
            "dyslexia" => Ok(Condition::Dyslexia),
            "dyscalculia" => Ok(Condition::Dyscalculia),
            "anxiety" | "anxietydisorder" => Ok(Condition::Anxiety),
            other => Err(format!("unknown condition: {other}")),
        }
    }
}

/// Diagnosed condition flags for one learner
///
/// Only five flags take part in profile selection; dysgraphia, processing
/// disorders and free-text conditions fall through to the typical profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DiagnosedConditions {
    pub dyslexia: bool,
    pub dyscalculia: bool,
    pub adhd: bool,
    pub asd: bool,
    pub dysgraphia: bool,
    pub processing_disorder: bool,
    pub anxiety_disorder: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub other: Option<String>,
}

impl DiagnosedConditions {
    pub fn none() -> Self {
        Self::default()
    }

    /// Flags with just one profiled condition set
    pub fn only(condition: Condition) -> Self {
        let mut flags = Self::default();
        flags.set(condition, true);
        flags
    }

    pub fn has(&self, condition: Condition) -> bool {
        match condition {
            Condition::Typical => !Condition::PRIORITY.iter().any(|c| self.has(*c)),
            Condition::Adhd => self.adhd,
            Condition::Asd => self.asd,
            Condition::Dyslexia => self.dyslexia,
            Condition::Dyscalculia => self.dyscalculia,
            Condition::Anxiety => self.anxiety_disorder,
        }
    }

    pub fn set(&mut self, condition: Condition, value: bool) {
        match condition {
            Condition::Typical => {}
            Condition::Adhd => self.adhd = value,
            Condition::Asd => self.asd = value,
            Condition::Dyslexia => self.dyslexia = value,
            Condition::Dyscalculia => self.dyscalculia = value,
            Condition::Anxiety => self.anxiety_disorder = value,
        }
    }
}

/// Score boundaries and pacing parameters for one condition
///
/// Score thresholds are on a 0-100 scale. Session lengths and break timing
/// are in minutes, response times in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdProfile {
    pub condition: Condition,
    pub min_attention_score: f64,
    pub critical_attention_score: f64,
    pub min_engagement_score: f64,
    pub critical_engagement_score: f64,
    pub max_frustration_level: f64,
    pub critical_frustration_level: f64,
    pub recommended_session_length: u32,
    pub max_session_length: u32,
    pub break_frequency: u32,
    pub break_duration: u32,
    pub normal_response_time: f64,
    pub slow_response_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

const NORMAL_RESPONSE_SECONDS: f64 = 3.0;
const SLOW_RESPONSE_SECONDS: f64 = 10.0;

impl ThresholdProfile {
    /// Built-in calibration for `condition`
    pub fn standard(condition: Condition) -> Self {
        let base = Self {
            condition,
            min_attention_score: 50.0,
            critical_attention_score: 30.0,
            min_engagement_score: 55.0,
            critical_engagement_score: 35.0,
            max_frustration_level: 60.0,
            critical_frustration_level: 80.0,
            recommended_session_length: 25,
            max_session_length: 45,
            break_frequency: 20,
            break_duration: 5,
            normal_response_time: NORMAL_RESPONSE_SECONDS,
            slow_response_time: SLOW_RESPONSE_SECONDS,
            notes: None,
        };

        match condition {
            Condition::Typical => base,
            // Lower attention floor for expected variability, shorter sessions
            Condition::Adhd => Self {
                min_attention_score: 40.0,
                critical_attention_score: 20.0,
                min_engagement_score: 45.0,
                critical_engagement_score: 25.0,
                max_frustration_level: 50.0,
                critical_frustration_level: 70.0,
                recommended_session_length: 15,
                max_session_length: 25,
                break_frequency: 10,
                notes: Some(
                    "APA recommends shorter, more frequent sessions with movement breaks"
                        .to_string(),
                ),
                ..base
            },
            // Longer regulation breaks and more processing time
            Condition::Asd => Self {
                min_attention_score: 45.0,
                critical_attention_score: 25.0,
                min_engagement_score: 50.0,
                critical_engagement_score: 30.0,
                max_frustration_level: 50.0,
                critical_frustration_level: 75.0,
                recommended_session_length: 20,
                max_session_length: 30,
                break_frequency: 15,
                break_duration: 7,
                normal_response_time: 5.0,
                slow_response_time: 15.0,
                notes: Some(
                    "AAP/APA guidelines emphasize predictable structure and sensory breaks"
                        .to_string(),
                ),
                ..base
            },
            Condition::Dyslexia => Self {
                min_attention_score: 45.0,
                critical_attention_score: 25.0,
                min_engagement_score: 50.0,
                critical_engagement_score: 30.0,
                max_frustration_level: 65.0,
                critical_frustration_level: 85.0,
                max_session_length: 40,
                normal_response_time: 4.0,
                slow_response_time: 12.0,
                ..base
            },
            Condition::Dyscalculia => Self {
                min_attention_score: 45.0,
                critical_attention_score: 25.0,
                min_engagement_score: 50.0,
                critical_engagement_score: 30.0,
                max_frustration_level: 65.0,
                critical_frustration_level: 85.0,
                recommended_session_length: 20,
                max_session_length: 35,
                break_frequency: 15,
                normal_response_time: 4.0,
                slow_response_time: 12.0,
                ..base
            },
            // Most sensitive frustration ceiling of all profiles
            Condition::Anxiety => Self {
                min_attention_score: 40.0,
                critical_attention_score: 20.0,
                min_engagement_score: 45.0,
                critical_engagement_score: 25.0,
                max_frustration_level: 45.0,
                critical_frustration_level: 65.0,
                recommended_session_length: 20,
                max_session_length: 30,
                break_frequency: 15,
                notes: Some(
                    "Monitor for anxiety signals; provide frequent positive reinforcement"
                        .to_string(),
                ),
                ..base
            },
        }
    }

    /// Break length in seconds
    pub fn break_seconds(&self) -> u32 {
        self.break_duration.saturating_mul(60)
    }
}

/// Read-only set of the six condition profiles
#[derive(Debug, Clone)]
pub struct ProfileRegistry {
    profiles: Vec<ThresholdProfile>,
}

impl Default for ProfileRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl ProfileRegistry {
    /// Registry with the built-in calibration
    pub fn standard() -> Self {
        Self {
            profiles: Condition::ALL
                .iter()
                .map(|c| ThresholdProfile::standard(*c))
                .collect(),
        }
    }

    /// Replace the profile for its condition, consuming the registry
    pub fn with_profile(mut self, profile: ThresholdProfile) -> Self {
        let idx = profile.condition.index();
        self.profiles[idx] = profile;
        self
    }

    pub fn get(&self, condition: Condition) -> &ThresholdProfile {
        &self.profiles[condition.index()]
    }

    pub fn select(&self, conditions: &DiagnosedConditions) -> &ThresholdProfile {
        self.get(Condition::select(conditions))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ThresholdProfile> {
        self.profiles.iter()
    }
}
