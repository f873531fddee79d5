//! Core types for the scanvox pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: raw gaze events, featurized tensors, embeddings, fused scores,
//! intervention verdicts, and the encoded analysis record.

use serde::{Deserialize, Serialize};

/// Number of channels in a rasterized scanpath (density, duration, velocity)
pub const SCANPATH_CHANNELS: usize = 3;

/// Default raster grid edge length
pub const DEFAULT_GRID_SIZE: usize = 50;

/// Default number of timesteps after sequence normalization
pub const DEFAULT_TARGET_LENGTH: usize = 100;

/// Default number of cepstral coefficients per frame
pub const DEFAULT_MFCC_COEFFICIENTS: usize = 13;

/// Default embedding width emitted by each encoder branch
pub const DEFAULT_EMBEDDING_DIM: usize = 128;

/// Width of the categorical engagement head
pub const NUM_ENGAGEMENT_CLASSES: usize = 4;

/// Single gaze sample from an external tracker
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GazeEvent {
    /// Screen x coordinate (pixels)
    pub x: f64,
    /// Screen y coordinate (pixels)
    pub y: f64,
    /// Capture time (milliseconds)
    pub timestamp: i64,
    /// Tracker confidence (0-1)
    pub confidence: f64,
}

/// A gaze dwell at a screen location
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixationEvent {
    pub x: f64,
    pub y: f64,
    /// Dwell time in milliseconds
    #[serde(alias = "duration")]
    pub duration_ms: f64,
}

/// A gaze transition ending at a screen location
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaccadeEvent {
    pub to_x: f64,
    pub to_y: f64,
    /// Peak velocity (degrees per second)
    pub velocity: f64,
}

/// Fixations and saccades of one viewing window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scanpath {
    pub fixations: Vec<FixationEvent>,
    pub saccades: Vec<SaccadeEvent>,
}

/// `grid x grid x 3` raster of a scanpath, stored row-major with channels last
#[derive(Debug, Clone, PartialEq)]
pub struct ScanpathTensor {
    grid_size: usize,
    data: Vec<f32>,
}

impl ScanpathTensor {
    /// All-zero raster of the given edge length
    pub fn zeros(grid_size: usize) -> Self {
        Self {
            grid_size,
            data: vec![0.0; grid_size * grid_size * SCANPATH_CHANNELS],
        }
    }

    /// Wrap an existing HWC buffer; the length must match the grid
    pub fn from_vec(grid_size: usize, data: Vec<f32>) -> Option<Self> {
        (data.len() == grid_size * grid_size * SCANPATH_CHANNELS).then_some(Self { grid_size, data })
    }

    pub fn grid_size(&self) -> usize {
        self.grid_size
    }

    /// `[height, width, channels]`
    pub fn shape(&self) -> [usize; 3] {
        [self.grid_size, self.grid_size, SCANPATH_CHANNELS]
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub(crate) fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    fn offset(&self, row: usize, col: usize, channel: usize) -> usize {
        (row * self.grid_size + col) * SCANPATH_CHANNELS + channel
    }

    /// Cell value at `(row, col)` for `channel`
    pub fn get(&self, row: usize, col: usize, channel: usize) -> f32 {
        self.data[self.offset(row, col, channel)]
    }

    /// Iterate one channel's values in row-major order
    pub fn channel(&self, channel: usize) -> impl Iterator<Item = f32> + '_ {
        self.data
            .iter()
            .skip(channel)
            .step_by(SCANPATH_CHANNELS)
            .copied()
    }

    pub fn is_all_zero(&self) -> bool {
        self.data.iter().all(|v| *v == 0.0)
    }
}

/// Fixed `T x F` audio feature matrix, standardized per coefficient
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedSequence {
    timesteps: usize,
    features: usize,
    data: Vec<f32>,
}

impl NormalizedSequence {
    pub fn zeros(timesteps: usize, features: usize) -> Self {
        Self {
            timesteps,
            features,
            data: vec![0.0; timesteps * features],
        }
    }

    /// Wrap an existing row-major buffer; the length must match the shape
    pub fn from_vec(timesteps: usize, features: usize, data: Vec<f32>) -> Option<Self> {
        (data.len() == timesteps * features).then_some(Self {
            timesteps,
            features,
            data,
        })
    }

    pub fn timesteps(&self) -> usize {
        self.timesteps
    }

    pub fn features(&self) -> usize {
        self.features
    }

    /// `[timesteps, features]`
    pub fn shape(&self) -> [usize; 2] {
        [self.timesteps, self.features]
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn row(&self, t: usize) -> &[f32] {
        &self.data[t * self.features..(t + 1) * self.features]
    }

    pub fn get(&self, t: usize, f: usize) -> f32 {
        self.data[t * self.features + f]
    }

    pub fn is_all_zero(&self) -> bool {
        self.data.iter().all(|v| *v == 0.0)
    }
}

/// Dense per-modality embedding, consumed immediately by the fusion head
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingVector(pub Vec<f32>);

impl EmbeddingVector {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }
}

/// Engagement classes predicted by the categorical head, in output order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngagementLevel {
    High,
    Medium,
    Low,
    Critical,
}

impl EngagementLevel {
    pub const ALL: [EngagementLevel; 4] = [
        EngagementLevel::High,
        EngagementLevel::Medium,
        EngagementLevel::Low,
        EngagementLevel::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EngagementLevel::High => "high",
            EngagementLevel::Medium => "medium",
            EngagementLevel::Low => "low",
            EngagementLevel::Critical => "critical",
        }
    }

    /// Position of this class in the categorical head output
    pub fn index(&self) -> usize {
        match self {
            EngagementLevel::High => 0,
            EngagementLevel::Medium => 1,
            EngagementLevel::Low => 2,
            EngagementLevel::Critical => 3,
        }
    }
}

/// Probability distribution over the four engagement classes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassDistribution {
    /// Probabilities indexed by [`EngagementLevel::index`]
    pub probabilities: [f64; NUM_ENGAGEMENT_CLASSES],
}

impl ClassDistribution {
    pub fn new(probabilities: [f64; 4]) -> Self {
        Self { probabilities }
    }

    /// Distribution with all mass on one class
    pub fn certain(level: EngagementLevel) -> Self {
        let mut probabilities = [0.0; 4];
        probabilities[level.index()] = 1.0;
        Self { probabilities }
    }

    pub fn probability(&self, level: EngagementLevel) -> f64 {
        self.probabilities[level.index()]
    }

    /// Most likely class; ties resolve toward the higher engagement class
    pub fn most_likely(&self) -> EngagementLevel {
        let mut best = EngagementLevel::High;
        for level in EngagementLevel::ALL {
            if self.probability(level) > self.probability(best) {
                best = level;
            }
        }
        best
    }

    /// Expected value over an ordinal scale (one value per class, 0-1).
    /// Non-finite or empty distributions read as 0.
    pub fn expected_value(&self, ordinal: &[f64; 4]) -> f64 {
        let total: f64 = self.probabilities.iter().sum();
        if !total.is_finite() || total <= 0.0 {
            return 0.0;
        }
        let weighted: f64 = self
            .probabilities
            .iter()
            .zip(ordinal.iter())
            .map(|(p, v)| p * v)
            .sum();
        let value = weighted / total;
        if !value.is_finite() {
            return 0.0;
        }
        value.clamp(0.0, 1.0)
    }
}

/// Fused multi-task prediction for one sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngagementScores {
    pub engagement_class: ClassDistribution,
    /// Attention (0-1)
    pub attention_score: f64,
    /// Frustration (0-1)
    pub frustration_score: f64,
}

impl EngagementScores {
    pub fn level(&self) -> EngagementLevel {
        self.engagement_class.most_likely()
    }
}

/// Facial microexpression readings supplied by an external detector
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MicroexpressionScores {
    /// Negative to positive (-1 to 1)
    pub valence: f64,
    /// Calm to excited (0-1)
    pub arousal: f64,
    pub frustration: f64,
    pub confusion: f64,
    pub engagement: f64,
}

/// Externally supplied scores that refine the model output at decision time
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuxiliarySignals {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub microexpression: Option<MicroexpressionScores>,
    /// Gesture-derived engagement (0-1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gesture_score: Option<f64>,
}

impl AuxiliarySignals {
    pub fn is_empty(&self) -> bool {
        self.microexpression.is_none() && self.gesture_score.is_none()
    }
}

/// Metric that breached a profile threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Attention,
    Engagement,
    Frustration,
}

/// How urgently the learner needs an intervention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterventionSeverity {
    None,
    Advisory,
    Critical,
}

/// Actionable output of the decision engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterventionVerdict {
    pub intervention_needed: bool,
    /// Break length in seconds, set on critical breaches
    pub recommended_break_seconds: Option<u32>,
    /// Signed difficulty change (-1 to 1, negative eases off)
    pub difficulty_adjustment: Option<f64>,
    pub severity: InterventionSeverity,
    /// Metrics that crossed a threshold, in evaluation order
    pub triggers: Vec<Metric>,
}

impl InterventionVerdict {
    pub fn no_action() -> Self {
        Self {
            intervention_needed: false,
            recommended_break_seconds: None,
            difficulty_adjustment: None,
            severity: InterventionSeverity::None,
            triggers: Vec::new(),
        }
    }
}

/// Aggregate eye-tracking metrics for a scanpath
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EyeTrackingMetrics {
    /// Milliseconds
    pub avg_fixation_duration: f64,
    pub fixation_count: usize,
    pub saccade_count: usize,
    /// Degrees per second
    pub avg_saccade_velocity: f64,
    /// Spread of fixations relative to the screen diagonal (0-1)
    pub gaze_dispersion: f64,
}

/// Producer metadata embedded in every analysis record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisProducer {
    pub name: String,
    pub version: String,
    pub instance_id: String,
}

/// Encoded result of one hybrid analysis, handed to the request layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HybridEngagementAnalysis {
    pub session_id: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    pub computed_at_utc: String,
    pub producer: AnalysisProducer,
    /// Gaze branch engagement (0-100)
    pub cnn_score: f64,
    /// Audio branch engagement (0-100)
    pub lstm_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub microexpression_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gesture_score: Option<f64>,
    /// Fused engagement (0-100)
    pub hybrid_engagement_score: f64,
    /// Attention (0-100)
    pub attention_score: f64,
    /// Frustration (0-100)
    pub frustration_level: f64,
    pub engagement_level: EngagementLevel,
    pub condition: String,
    pub intervention_needed: bool,
    pub recommended_break_time: Option<u32>,
    pub adaptive_difficulty_adjustment: Option<f64>,
    pub severity: InterventionSeverity,
}
