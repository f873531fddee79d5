//! Multi-task loss and training-loop policies
//!
//! Nothing here runs an optimizer. An external training driver computes the
//! weighted loss per batch and consults three policy objects after each epoch:
//! - [`EarlyStopping`]: stop when the monitored value stops improving
//! - [`ReduceLrOnPlateau`]: shrink the learning rate on plateaus
//! - [`CheckpointPolicy`]: save weights when the monitored value improves

use crate::error::EngageError;
use crate::types::{EngagementLevel, EngagementScores};
use serde::{Deserialize, Serialize};

/// Probabilities are clipped to `[EPSILON, 1 - EPSILON]` before taking logs
pub const EPSILON: f64 = 1e-7;

/// Relative weight of each head in the total loss
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LossWeights {
    pub engagement_class: f64,
    pub attention_score: f64,
    pub frustration_level: f64,
}

impl Default for LossWeights {
    fn default() -> Self {
        Self {
            engagement_class: 1.0,
            attention_score: 0.5,
            frustration_level: 0.5,
        }
    }
}

impl LossWeights {
    pub fn validate(&self) -> Result<(), EngageError> {
        for (name, weight) in [
            ("engagement_class", self.engagement_class),
            ("attention_score", self.attention_score),
            ("frustration_level", self.frustration_level),
        ] {
            if !weight.is_finite() || weight <= 0.0 {
                return Err(EngageError::InvalidConfig(format!(
                    "loss weight {name} must be positive, got {weight}"
                )));
            }
        }
        Ok(())
    }
}

/// Ground truth for one training sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingTarget {
    pub level: EngagementLevel,
    pub attention: f64,
    pub frustration: f64,
}

/// Per-head loss terms and their weighted total
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LossBreakdown {
    pub engagement_class: f64,
    pub attention_score: f64,
    pub frustration_level: f64,
    pub total: f64,
}

/// Categorical cross-entropy on the class head plus binary cross-entropy on
/// each scalar head
#[derive(Debug, Clone, Copy, Default)]
pub struct MultiTaskLoss {
    weights: LossWeights,
}

impl MultiTaskLoss {
    pub fn new(weights: LossWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> LossWeights {
        self.weights
    }

    pub fn compute(&self, predicted: &EngagementScores, target: &TrainingTarget) -> LossBreakdown {
        let p_true = predicted.engagement_class.probability(target.level);
        let engagement_class = -clip(p_true).ln();
        let attention_score = binary_cross_entropy(predicted.attention_score, target.attention);
        let frustration_level =
            binary_cross_entropy(predicted.frustration_score, target.frustration);

        LossBreakdown {
            engagement_class,
            attention_score,
            frustration_level,
            total: self.weights.engagement_class * engagement_class
                + self.weights.attention_score * attention_score
                + self.weights.frustration_level * frustration_level,
        }
    }

    /// Mean loss over a batch; empty batches give zero
    pub fn batch(&self, samples: &[(EngagementScores, TrainingTarget)]) -> LossBreakdown {
        if samples.is_empty() {
            return LossBreakdown::default();
        }
        let n = samples.len() as f64;
        let mut sum = LossBreakdown::default();
        for (predicted, target) in samples {
            let loss = self.compute(predicted, target);
            sum.engagement_class += loss.engagement_class;
            sum.attention_score += loss.attention_score;
            sum.frustration_level += loss.frustration_level;
            sum.total += loss.total;
        }
        LossBreakdown {
            engagement_class: sum.engagement_class / n,
            attention_score: sum.attention_score / n,
            frustration_level: sum.frustration_level / n,
            total: sum.total / n,
        }
    }
}

fn clip(p: f64) -> f64 {
    if p.is_nan() {
        return EPSILON;
    }
    p.clamp(EPSILON, 1.0 - EPSILON)
}

fn binary_cross_entropy(predicted: f64, target: f64) -> f64 {
    let p = clip(predicted);
    -(target * p.ln() + (1.0 - target) * (1.0 - p).ln())
}

/// Whether smaller or larger monitored values are better
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorMode {
    Min,
    Max,
}

impl MonitorMode {
    fn improves(&self, current: f64, best: Option<f64>, min_delta: f64) -> bool {
        if !current.is_finite() {
            return false;
        }
        match (self, best) {
            (_, None) => true,
            (MonitorMode::Min, Some(best)) => current < best - min_delta,
            (MonitorMode::Max, Some(best)) => current > best + min_delta,
        }
    }
}

/// Stop once `patience` epochs pass without improvement
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: u32,
    min_delta: f64,
    mode: MonitorMode,
    restore_best_weights: bool,
    best: Option<f64>,
    best_epoch: u32,
    wait: u32,
    stopped_epoch: Option<u32>,
}

impl Default for EarlyStopping {
    fn default() -> Self {
        Self::new(10, MonitorMode::Min)
    }
}

impl EarlyStopping {
    pub fn new(patience: u32, mode: MonitorMode) -> Self {
        Self {
            patience,
            min_delta: 0.0,
            mode,
            restore_best_weights: true,
            best: None,
            best_epoch: 0,
            wait: 0,
            stopped_epoch: None,
        }
    }

    pub fn with_min_delta(mut self, min_delta: f64) -> Self {
        self.min_delta = min_delta.abs();
        self
    }

    pub fn with_restore_best_weights(mut self, restore: bool) -> Self {
        self.restore_best_weights = restore;
        self
    }

    /// Record an epoch's monitored value. Returns true when training should stop.
    pub fn update(&mut self, epoch: u32, value: f64) -> bool {
        if self.mode.improves(value, self.best, self.min_delta) {
            self.best = Some(value);
            self.best_epoch = epoch;
            self.wait = 0;
            return false;
        }
        self.wait += 1;
        if self.wait >= self.patience {
            self.stopped_epoch = Some(epoch);
            return true;
        }
        false
    }

    pub fn best(&self) -> Option<f64> {
        self.best
    }

    pub fn best_epoch(&self) -> u32 {
        self.best_epoch
    }

    pub fn stopped_epoch(&self) -> Option<u32> {
        self.stopped_epoch
    }

    /// Whether the driver should roll back to the best epoch's weights on stop
    pub fn restore_best_weights(&self) -> bool {
        self.restore_best_weights
    }
}

/// Multiply the learning rate by `factor` after `patience` flat epochs
#[derive(Debug, Clone)]
pub struct ReduceLrOnPlateau {
    factor: f64,
    patience: u32,
    min_lr: f64,
    mode: MonitorMode,
    best: Option<f64>,
    wait: u32,
    lr: f64,
}

impl ReduceLrOnPlateau {
    pub fn new(initial_lr: f64) -> Self {
        Self {
            factor: 0.5,
            patience: 5,
            min_lr: 1e-7,
            mode: MonitorMode::Min,
            best: None,
            wait: 0,
            lr: initial_lr,
        }
    }

    pub fn with_factor(mut self, factor: f64) -> Self {
        self.factor = factor;
        self
    }

    pub fn with_patience(mut self, patience: u32) -> Self {
        self.patience = patience;
        self
    }

    pub fn with_min_lr(mut self, min_lr: f64) -> Self {
        self.min_lr = min_lr;
        self
    }

    pub fn with_mode(mut self, mode: MonitorMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn lr(&self) -> f64 {
        self.lr
    }

    /// Record an epoch's monitored value and return the learning rate to use next
    pub fn step(&mut self, value: f64) -> f64 {
        if self.mode.improves(value, self.best, 0.0) {
            self.best = Some(value);
            self.wait = 0;
            return self.lr;
        }
        self.wait += 1;
        if self.wait >= self.patience && self.lr > self.min_lr {
            self.lr = (self.lr * self.factor).max(self.min_lr);
            self.wait = 0;
        }
        self.lr
    }
}

/// Save-on-improvement predicate over a named metric
#[derive(Debug, Clone)]
pub struct CheckpointPolicy {
    monitor: String,
    mode: MonitorMode,
    best: Option<f64>,
}

impl Default for CheckpointPolicy {
    fn default() -> Self {
        Self::new("val_engagement_class_accuracy", MonitorMode::Max)
    }
}

impl CheckpointPolicy {
    pub fn new(monitor: impl Into<String>, mode: MonitorMode) -> Self {
        Self {
            monitor: monitor.into(),
            mode,
            best: None,
        }
    }

    pub fn monitor(&self) -> &str {
        &self.monitor
    }

    pub fn best(&self) -> Option<f64> {
        self.best
    }

    /// True when `value` beats every value seen so far
    pub fn should_save(&mut self, value: f64) -> bool {
        if self.mode.improves(value, self.best, 0.0) {
            self.best = Some(value);
            true
        } else {
            false
        }
    }
}
