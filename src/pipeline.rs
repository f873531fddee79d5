//! Pipeline orchestration
//!
//! This module provides the public API for scanvox.
//! It runs the full path from sensor events to an intervention verdict:
//! rasterize + normalize → encode + fuse → profile selection → decision.

use crate::config::EngineConfig;
use crate::decision::DecisionEngine;
use crate::encoder::{AnalysisEncoder, AnalysisInput};
use crate::error::EngageError;
use crate::features::ScanpathRasterizer;
use crate::gaze::GazeSegmenter;
use crate::model::{BranchScores, EngagementModel, ModelInput};
use crate::normalizer::SequenceNormalizer;
use crate::profile::{DiagnosedConditions, ProfileRegistry, ThresholdProfile};
use crate::schema::SessionBatch;
use crate::types::{
    AuxiliarySignals, EngagementScores, EyeTrackingMetrics, FixationEvent,
    HybridEngagementAnalysis, InterventionVerdict, SaccadeEvent,
};
use rayon::prelude::*;
use std::path::Path;
use tracing::{debug, info, warn};

/// Score one window of gaze and audio with an already built model.
///
/// Featurizer shapes follow the model's own configuration.
///
/// # Example
/// ```ignore
/// let model = EngagementModel::from_artifact("models/engagement")?;
/// let scores = analyze(&model, &fixations, &saccades, &frames, 1920.0, 1080.0)?;
/// ```
pub fn analyze<F: AsRef<[f64]>>(
    model: &EngagementModel,
    fixations: &[FixationEvent],
    saccades: &[SaccadeEvent],
    frames: &[F],
    screen_width: f64,
    screen_height: f64,
) -> Result<EngagementScores, EngageError> {
    let input = featurize_for(model, fixations, saccades, frames, screen_width, screen_height);
    model.predict(&input.scanpath, &input.sequence)
}

/// Decide on an intervention using the built-in profiles.
///
/// # Example
/// ```ignore
/// let verdict = decide(&scores, &DiagnosedConditions::only(Condition::Asd));
/// ```
pub fn decide(scores: &EngagementScores, conditions: &DiagnosedConditions) -> InterventionVerdict {
    let registry = ProfileRegistry::standard();
    DecisionEngine::default().decide(scores, registry.select(conditions), None)
}

fn featurize_for<F: AsRef<[f64]>>(
    model: &EngagementModel,
    fixations: &[FixationEvent],
    saccades: &[SaccadeEvent],
    frames: &[F],
    screen_width: f64,
    screen_height: f64,
) -> ModelInput {
    let config = model.config();
    let [timesteps, coefficients] = config.mfcc_shape;
    ModelInput {
        scanpath: ScanpathRasterizer::new(config.grid_size()).rasterize(
            fixations,
            saccades,
            screen_width,
            screen_height,
        ),
        sequence: SequenceNormalizer::new(timesteps)
            .with_default_features(coefficients)
            .normalize(frames),
    }
}

/// Stateful processor holding the model, profile registry and decision engine.
///
/// Safe to share across threads once constructed; only model loading needs
/// `&mut self`.
pub struct EngagementProcessor {
    config: EngineConfig,
    rasterizer: ScanpathRasterizer,
    normalizer: SequenceNormalizer,
    segmenter: GazeSegmenter,
    model: EngagementModel,
    registry: ProfileRegistry,
    engine: DecisionEngine,
    encoder: AnalysisEncoder,
}

impl EngagementProcessor {
    /// Create a processor from a validated config.
    ///
    /// Loads the model artifact when `model_path` is set, otherwise builds
    /// fresh weights from the configured seed.
    pub fn new(config: EngineConfig) -> Result<Self, EngageError> {
        config.validate()?;
        let model = match &config.model_path {
            Some(stem) => EngagementModel::from_artifact(stem)?,
            None => EngagementModel::built(config.model.clone())?,
        };
        Ok(Self::with_model(config, model))
    }

    /// Create a processor around an existing model
    pub fn with_model(config: EngineConfig, model: EngagementModel) -> Self {
        let mut processor = Self {
            rasterizer: ScanpathRasterizer::new(config.features.grid_size),
            normalizer: SequenceNormalizer::new(config.features.target_length)
                .with_default_features(config.features.coefficients),
            segmenter: GazeSegmenter::new(config.gaze),
            engine: DecisionEngine::new(config.decision),
            registry: ProfileRegistry::standard(),
            encoder: AnalysisEncoder::new(),
            model,
            config,
        };
        processor.sync_featurizers();
        processor
    }

    /// Replace the built-in profile registry
    pub fn with_registry(mut self, registry: ProfileRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_encoder(mut self, encoder: AnalysisEncoder) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn model(&self) -> &EngagementModel {
        &self.model
    }

    pub fn registry(&self) -> &ProfileRegistry {
        &self.registry
    }

    pub fn engine(&self) -> &DecisionEngine {
        &self.engine
    }

    /// Featurizer shapes always follow the model that will consume them
    fn sync_featurizers(&mut self) {
        let model = self.model.config();
        let [timesteps, coefficients] = model.mfcc_shape;
        if model.grid_size() != self.rasterizer.grid_size()
            || timesteps != self.normalizer.target_length()
        {
            debug!(
                grid = model.grid_size(),
                timesteps, coefficients, "featurizers resized to model shape"
            );
        }
        self.rasterizer = ScanpathRasterizer::new(model.grid_size());
        self.normalizer = SequenceNormalizer::new(timesteps).with_default_features(coefficients);
    }

    /// Load model artifacts; on failure the current model keeps serving
    pub fn load_model(&mut self, stem: impl AsRef<Path>) -> Result<(), EngageError> {
        self.model.load(stem)?;
        self.sync_featurizers();
        Ok(())
    }

    pub fn save_model(&self, stem: impl AsRef<Path>) -> Result<(), EngageError> {
        self.model.save(stem)
    }

    /// Rasterize and normalize one window
    pub fn featurize<F: AsRef<[f64]>>(
        &self,
        fixations: &[FixationEvent],
        saccades: &[SaccadeEvent],
        frames: &[F],
        screen_width: f64,
        screen_height: f64,
    ) -> ModelInput {
        ModelInput {
            scanpath: self
                .rasterizer
                .rasterize(fixations, saccades, screen_width, screen_height),
            sequence: self.normalizer.normalize(frames),
        }
    }

    pub fn analyze<F: AsRef<[f64]>>(
        &self,
        fixations: &[FixationEvent],
        saccades: &[SaccadeEvent],
        frames: &[F],
        screen_width: f64,
        screen_height: f64,
    ) -> Result<EngagementScores, EngageError> {
        let input = self.featurize(fixations, saccades, frames, screen_width, screen_height);
        self.model.predict(&input.scanpath, &input.sequence)
    }

    /// Fused scores plus the single-branch readouts
    pub fn analyze_branches<F: AsRef<[f64]>>(
        &self,
        fixations: &[FixationEvent],
        saccades: &[SaccadeEvent],
        frames: &[F],
        screen_width: f64,
        screen_height: f64,
    ) -> Result<BranchScores, EngageError> {
        let input = self.featurize(fixations, saccades, frames, screen_width, screen_height);
        self.model.predict_branches(&input.scanpath, &input.sequence)
    }

    /// Score many featurized samples in parallel
    pub fn predict_batch(&self, samples: &[ModelInput]) -> Result<Vec<EngagementScores>, EngageError> {
        self.model.predict_batch(samples)
    }

    pub fn profile(&self, conditions: &DiagnosedConditions) -> &ThresholdProfile {
        self.registry.select(conditions)
    }

    pub fn decide(
        &self,
        scores: &EngagementScores,
        conditions: &DiagnosedConditions,
    ) -> InterventionVerdict {
        self.engine.decide(scores, self.profile(conditions), None)
    }

    /// Decide with externally supplied microexpression/gesture scores
    pub fn decide_with_auxiliary(
        &self,
        scores: &EngagementScores,
        conditions: &DiagnosedConditions,
        auxiliary: &AuxiliarySignals,
    ) -> InterventionVerdict {
        let aux = (!auxiliary.is_empty()).then_some(auxiliary);
        self.engine.decide(scores, self.profile(conditions), aux)
    }

    /// Eye-tracking summary for a batch
    pub fn metrics(&self, batch: &SessionBatch) -> EyeTrackingMetrics {
        let scanpath = batch.scanpath(&self.segmenter);
        EyeTrackingMetrics::from_scanpath(&scanpath, batch.screen.width, batch.screen.height)
    }

    /// Full analysis of one session batch
    pub fn assess(&self, batch: &SessionBatch) -> Result<HybridEngagementAnalysis, EngageError> {
        batch.validate()?;

        let scanpath = batch.scanpath(&self.segmenter);
        let scores = self.analyze_branches(
            &scanpath.fixations,
            &scanpath.saccades,
            &batch.mfcc_frames,
            batch.screen.width,
            batch.screen.height,
        )?;

        let profile = self.profile(&batch.conditions);
        let aux = (!batch.auxiliary.is_empty()).then_some(&batch.auxiliary);
        let verdict = self.engine.decide(&scores.fused, profile, aux);

        info!(
            session_id = %batch.session_id,
            condition = profile.condition.key(),
            fixations = scanpath.fixations.len(),
            frames = batch.mfcc_frames.len(),
            level = scores.fused.level().as_str(),
            intervention = verdict.intervention_needed,
            "session assessed"
        );

        Ok(self.encoder.encode(
            &self.engine,
            &AnalysisInput {
                session_id: &batch.session_id,
                timestamp: batch.timestamp,
                scores: &scores,
                verdict: &verdict,
                profile,
                auxiliary: aux,
            },
        ))
    }

    /// Parse, assess and encode a session batch JSON document
    pub fn assess_json(&self, json: &str) -> Result<String, EngageError> {
        let batch: SessionBatch =
            serde_json::from_str(json).map_err(|e| EngageError::ParseError(e.to_string()))?;
        let record = self.assess(&batch)?;
        serde_json::to_string_pretty(&record).map_err(EngageError::JsonError)
    }

    /// Assess many batches in parallel; output order follows input order
    pub fn assess_many(
        &self,
        batches: &[SessionBatch],
    ) -> Vec<Result<HybridEngagementAnalysis, EngageError>> {
        batches
            .par_iter()
            .map(|batch| {
                self.assess(batch).map_err(|e| {
                    warn!(session_id = %batch.session_id, error = %e, "session assessment failed");
                    e
                })
            })
            .collect()
    }
}
