//! Two-branch hybrid engagement model
//!
//! The model fuses a convolutional view of the scanpath with a recurrent view
//! of the audio sequence:
//! - [`VisualEncoder`]: `grid x grid x 3` raster to a dense embedding
//! - [`TemporalEncoder`]: `T x F` sequence to a dense embedding
//! - [`FusionHead`]: both embeddings to [`EngagementScores`]
//!
//! A built model is immutable during inference and may be shared across
//! threads; `predict_batch` fans samples out on the rayon pool.

mod fusion;
mod io;
mod temporal;
mod visual;

pub use fusion::FusionHead;
pub use io::{artifact_paths, ModelMetadata};
pub use temporal::TemporalEncoder;
pub use visual::{VisualEncoder, VISUAL_DROPOUT};

use crate::error::EngageError;
use crate::nn::{Module, Parameter};
use crate::training::LossWeights;
use crate::types::{
    EmbeddingVector, EngagementScores, NormalizedSequence, ScanpathTensor,
    DEFAULT_EMBEDDING_DIM, DEFAULT_GRID_SIZE, DEFAULT_MFCC_COEFFICIENTS, DEFAULT_TARGET_LENGTH,
    NUM_ENGAGEMENT_CLASSES, SCANPATH_CHANNELS,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Smallest raster edge that survives three 2x poolings
pub const MIN_GRID_SIZE: usize = 8;

/// Architecture and initialization settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// `[height, width, channels]` of the rasterized scanpath
    pub scanpath_shape: [usize; 3],
    /// `[timesteps, coefficients]` of the normalized sequence
    pub mfcc_shape: [usize; 2],
    pub num_classes: usize,
    pub embedding_dim: usize,
    /// Seed for deterministic weight initialization
    pub seed: u64,
    pub loss_weights: LossWeights,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            scanpath_shape: [DEFAULT_GRID_SIZE, DEFAULT_GRID_SIZE, SCANPATH_CHANNELS],
            mfcc_shape: [DEFAULT_TARGET_LENGTH, DEFAULT_MFCC_COEFFICIENTS],
            num_classes: NUM_ENGAGEMENT_CLASSES,
            embedding_dim: DEFAULT_EMBEDDING_DIM,
            seed: 42,
            loss_weights: LossWeights::default(),
        }
    }
}

impl ModelConfig {
    pub fn grid_size(&self) -> usize {
        self.scanpath_shape[0]
    }

    pub fn metadata(&self) -> ModelMetadata {
        ModelMetadata {
            scanpath_shape: self.scanpath_shape,
            mfcc_shape: self.mfcc_shape,
            num_classes: self.num_classes,
        }
    }

    pub fn validate(&self) -> Result<(), EngageError> {
        let [height, width, channels] = self.scanpath_shape;
        if height != width {
            return Err(EngageError::InvalidConfig(format!(
                "scanpath raster must be square, got {height}x{width}"
            )));
        }
        if height < MIN_GRID_SIZE {
            return Err(EngageError::InvalidConfig(format!(
                "scanpath grid must be at least {MIN_GRID_SIZE}, got {height}"
            )));
        }
        if channels != SCANPATH_CHANNELS {
            return Err(EngageError::InvalidConfig(format!(
                "scanpath raster has {SCANPATH_CHANNELS} channels, got {channels}"
            )));
        }
        if self.mfcc_shape.contains(&0) {
            return Err(EngageError::InvalidConfig(format!(
                "mfcc shape must be non-empty, got {:?}",
                self.mfcc_shape
            )));
        }
        if self.num_classes != NUM_ENGAGEMENT_CLASSES {
            return Err(EngageError::InvalidConfig(format!(
                "engagement head has {NUM_ENGAGEMENT_CLASSES} classes, got {}",
                self.num_classes
            )));
        }
        if self.embedding_dim == 0 {
            return Err(EngageError::InvalidConfig(
                "embedding dimension must be positive".to_string(),
            ));
        }
        self.loss_weights.validate()
    }
}

/// One featurized sample
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInput {
    pub scanpath: ScanpathTensor,
    pub sequence: NormalizedSequence,
}

/// Fused scores plus single-branch readouts
///
/// Branch readouts run the fusion head with the other branch's embedding
/// zeroed, so they show what each modality alone pushes the heads toward.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BranchScores {
    pub fused: EngagementScores,
    pub visual: EngagementScores,
    pub temporal: EngagementScores,
}

/// Encoders and fusion head with concrete weights
#[derive(Debug, Clone)]
pub struct HybridNetwork {
    visual: VisualEncoder,
    temporal: TemporalEncoder,
    fusion: FusionHead,
}

impl HybridNetwork {
    pub fn new(config: &ModelConfig) -> Result<Self, EngageError> {
        config.validate()?;
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let [timesteps, features] = config.mfcc_shape;
        Ok(Self {
            visual: VisualEncoder::new(config.grid_size(), config.embedding_dim, &mut rng)?,
            temporal: TemporalEncoder::new(timesteps, features, config.embedding_dim, &mut rng)?,
            fusion: FusionHead::new(config.embedding_dim, &mut rng)?,
        })
    }

    pub fn visual(&self) -> &VisualEncoder {
        &self.visual
    }

    pub fn temporal(&self) -> &TemporalEncoder {
        &self.temporal
    }

    pub fn fusion(&self) -> &FusionHead {
        &self.fusion
    }

    fn embed(
        &self,
        scanpath: &ScanpathTensor,
        sequence: &NormalizedSequence,
    ) -> Result<(EmbeddingVector, EmbeddingVector), EngageError> {
        Ok((self.visual.encode(scanpath)?, self.temporal.encode(sequence)?))
    }

    pub fn forward(
        &self,
        scanpath: &ScanpathTensor,
        sequence: &NormalizedSequence,
    ) -> Result<EngagementScores, EngageError> {
        let (visual, temporal) = self.embed(scanpath, sequence)?;
        self.fusion.forward(&visual, &temporal)
    }

    pub fn forward_branches(
        &self,
        scanpath: &ScanpathTensor,
        sequence: &NormalizedSequence,
    ) -> Result<BranchScores, EngageError> {
        let (visual, temporal) = self.embed(scanpath, sequence)?;
        let silent = EmbeddingVector(vec![0.0; self.fusion.branch_dim()]);
        Ok(BranchScores {
            fused: self.fusion.forward(&visual, &temporal)?,
            visual: self.fusion.forward(&visual, &silent)?,
            temporal: self.fusion.forward(&silent, &temporal)?,
        })
    }
}

impl Module for HybridNetwork {
    fn name(&self) -> &str {
        "hybrid"
    }

    fn visit_parameters(&self, visitor: &mut dyn FnMut(&Parameter)) {
        self.visual.visit_parameters(visitor);
        self.temporal.visit_parameters(visitor);
        self.fusion.visit_parameters(visitor);
    }

    fn visit_parameters_mut(&mut self, visitor: &mut dyn FnMut(&mut Parameter)) {
        self.visual.visit_parameters_mut(visitor);
        self.temporal.visit_parameters_mut(visitor);
        self.fusion.visit_parameters_mut(visitor);
    }
}

/// Per-parameter entry of a model summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSummary {
    pub name: String,
    pub shape: Vec<usize>,
    pub count: usize,
}

/// Architecture overview for diagnostics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub metadata: ModelMetadata,
    pub embedding_dim: usize,
    pub visual_dropout: Vec<f32>,
    pub fusion_dropout: Vec<f32>,
    pub loss_weights: LossWeights,
    pub parameters: Vec<ParameterSummary>,
    pub total_parameters: usize,
}

/// Hybrid model handle; unbuilt until [`EngagementModel::build`] or a
/// successful load
#[derive(Debug, Clone)]
pub struct EngagementModel {
    config: ModelConfig,
    network: Option<HybridNetwork>,
}

impl Default for EngagementModel {
    fn default() -> Self {
        Self::new(ModelConfig::default())
    }
}

impl EngagementModel {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            config,
            network: None,
        }
    }

    /// Construct and immediately build
    pub fn built(config: ModelConfig) -> Result<Self, EngageError> {
        let mut model = Self::new(config);
        model.build()?;
        Ok(model)
    }

    /// Initialize fresh weights from the configured seed
    pub fn build(&mut self) -> Result<(), EngageError> {
        let network = HybridNetwork::new(&self.config)?;
        info!(
            seed = self.config.seed,
            grid = self.config.grid_size(),
            parameters = network.parameter_count(),
            "hybrid engagement model built"
        );
        self.network = Some(network);
        Ok(())
    }

    pub fn is_built(&self) -> bool {
        self.network.is_some()
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn network(&self) -> Result<&HybridNetwork, EngageError> {
        self.network.as_ref().ok_or(EngageError::ModelNotBuilt)
    }

    pub(crate) fn install(&mut self, config: ModelConfig, network: HybridNetwork) {
        self.config = config;
        self.network = Some(network);
    }

    pub fn parameter_count(&self) -> usize {
        self.network.as_ref().map_or(0, |n| n.parameter_count())
    }

    pub fn predict(
        &self,
        scanpath: &ScanpathTensor,
        sequence: &NormalizedSequence,
    ) -> Result<EngagementScores, EngageError> {
        let scores = self.network()?.forward(scanpath, sequence)?;
        debug!(
            attention = scores.attention_score,
            frustration = scores.frustration_score,
            level = scores.level().as_str(),
            "prediction"
        );
        Ok(scores)
    }

    pub fn predict_branches(
        &self,
        scanpath: &ScanpathTensor,
        sequence: &NormalizedSequence,
    ) -> Result<BranchScores, EngageError> {
        self.network()?.forward_branches(scanpath, sequence)
    }

    /// Score many samples in parallel; output order follows input order
    pub fn predict_batch(&self, samples: &[ModelInput]) -> Result<Vec<EngagementScores>, EngageError> {
        let network = self.network()?;
        debug!(samples = samples.len(), "batch prediction");
        samples
            .par_iter()
            .map(|sample| network.forward(&sample.scanpath, &sample.sequence))
            .collect()
    }

    pub fn summary(&self) -> Result<ModelSummary, EngageError> {
        let network = self.network()?;
        let mut parameters = Vec::new();
        network.visit_parameters(&mut |p| {
            parameters.push(ParameterSummary {
                name: p.name().to_string(),
                shape: p.shape().to_vec(),
                count: p.len(),
            })
        });
        Ok(ModelSummary {
            metadata: self.config.metadata(),
            embedding_dim: self.config.embedding_dim,
            visual_dropout: network.visual().dropout_schedule(),
            fusion_dropout: network.fusion().dropout_schedule(),
            loss_weights: self.config.loss_weights,
            total_parameters: parameters.iter().map(|p| p.count).sum(),
            parameters,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> ModelConfig {
        ModelConfig {
            scanpath_shape: [8, 8, 3],
            mfcc_shape: [6, 4],
            embedding_dim: 16,
            ..ModelConfig::default()
        }
    }

    fn sample(seed: f32) -> ModelInput {
        let scanpath =
            ScanpathTensor::from_vec(8, (0..192).map(|i| ((i as f32 * seed) % 1.0).abs()).collect())
                .unwrap();
        let sequence =
            NormalizedSequence::from_vec(6, 4, (0..24).map(|i| (i as f32 * seed).sin()).collect())
                .unwrap();
        ModelInput { scanpath, sequence }
    }

    #[test]
    fn test_predict_before_build_fails() {
        let model = EngagementModel::new(small_config());
        let input = sample(0.1);
        let err = model.predict(&input.scanpath, &input.sequence).unwrap_err();
        assert!(matches!(err, EngageError::ModelNotBuilt));
        assert_eq!(err.to_string(), "Model not built or loaded");
    }

    #[test]
    fn test_build_is_deterministic() {
        let a = EngagementModel::built(small_config()).unwrap();
        let b = EngagementModel::built(small_config()).unwrap();
        let input = sample(0.37);

        assert_eq!(
            a.predict(&input.scanpath, &input.sequence).unwrap(),
            b.predict(&input.scanpath, &input.sequence).unwrap()
        );
    }

    #[test]
    fn test_predict_rejects_wrong_shapes() {
        let model = EngagementModel::built(small_config()).unwrap();
        let input = sample(0.2);
        let wrong_seq = NormalizedSequence::zeros(6, 5);

        assert!(matches!(
            model.predict(&ScanpathTensor::zeros(10), &input.sequence),
            Err(EngageError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            model.predict(&input.scanpath, &wrong_seq),
            Err(EngageError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_batch_matches_sequential() {
        let model = EngagementModel::built(small_config()).unwrap();
        let samples: Vec<ModelInput> = (1..6).map(|i| sample(i as f32 * 0.13)).collect();

        let batched = model.predict_batch(&samples).unwrap();
        for (sample, scores) in samples.iter().zip(&batched) {
            let single = model.predict(&sample.scanpath, &sample.sequence).unwrap();
            assert!((single.attention_score - scores.attention_score).abs() < 1e-9);
            assert!((single.frustration_score - scores.frustration_score).abs() < 1e-9);
        }
    }

    #[test]
    fn test_branch_scores_are_distributions() {
        let model = EngagementModel::built(small_config()).unwrap();
        let input = sample(0.5);
        let branches = model.predict_branches(&input.scanpath, &input.sequence).unwrap();

        for scores in [branches.fused, branches.visual, branches.temporal] {
            let total: f64 = scores.engagement_class.probabilities.iter().sum();
            assert!((total - 1.0).abs() < 1e-5);
        }
        assert_eq!(
            branches.fused,
            model.predict(&input.scanpath, &input.sequence).unwrap()
        );
    }

    #[test]
    fn test_config_validation() {
        assert!(ModelConfig::default().validate().is_ok());
        assert!(ModelConfig { scanpath_shape: [50, 40, 3], ..ModelConfig::default() }
            .validate()
            .is_err());
        assert!(ModelConfig { num_classes: 3, ..ModelConfig::default() }.validate().is_err());
        assert!(ModelConfig { mfcc_shape: [0, 13], ..ModelConfig::default() }
            .validate()
            .is_err());
    }

    #[test]
    fn test_summary_counts_parameters() {
        let model = EngagementModel::built(small_config()).unwrap();
        let summary = model.summary().unwrap();

        assert_eq!(summary.total_parameters, model.parameter_count());
        assert_eq!(summary.metadata.num_classes, 4);
        assert!(summary
            .parameters
            .iter()
            .any(|p| p.name == "fusion::engagement_class::kernel" && p.shape == vec![128, 4]));
    }
}
