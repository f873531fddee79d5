//! Multi-task fusion head
//!
//! The two branch embeddings are concatenated (visual first) and refined by a
//! shared trunk: dense 256 (relu), dropout 0.4, dense 128 (relu), dropout 0.3.
//! Three heads read the trunk output independently:
//! - `engagement_class`: softmax over {high, medium, low, critical}
//! - `attention_score`: sigmoid scalar
//! - `frustration_score`: sigmoid scalar

use crate::error::EngageError;
use crate::nn::{Activation, Dense, Dropout, Module, Parameter};
use crate::types::{ClassDistribution, EmbeddingVector, EngagementScores, NUM_ENGAGEMENT_CLASSES};
use rand_chacha::ChaCha8Rng;

const TRUNK_UNITS: [usize; 2] = [256, 128];
const TRUNK_DROPOUT: [f32; 2] = [0.4, 0.3];

#[derive(Debug, Clone)]
pub struct FusionHead {
    branch_dim: usize,
    trunk: Vec<Dense>,
    dropouts: Vec<Dropout>,
    engagement_class: Dense,
    attention: Dense,
    frustration: Dense,
}

impl FusionHead {
    pub fn new(branch_dim: usize, rng: &mut ChaCha8Rng) -> Result<Self, EngageError> {
        let mut trunk = Vec::with_capacity(TRUNK_UNITS.len());
        let mut width = branch_dim * 2;
        for (idx, units) in TRUNK_UNITS.iter().enumerate() {
            trunk.push(Dense::new(
                format!("fusion::dense{}", idx + 1),
                width,
                *units,
                Activation::Relu,
                rng,
            ));
            width = *units;
        }
        let dropouts = TRUNK_DROPOUT
            .iter()
            .map(|rate| Dropout::new(*rate))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            branch_dim,
            trunk,
            dropouts,
            engagement_class: Dense::new(
                "fusion::engagement_class",
                width,
                NUM_ENGAGEMENT_CLASSES,
                Activation::Softmax,
                rng,
            ),
            attention: Dense::new("fusion::attention_score", width, 1, Activation::Sigmoid, rng),
            frustration: Dense::new(
                "fusion::frustration_level",
                width,
                1,
                Activation::Sigmoid,
                rng,
            ),
        })
    }

    pub fn branch_dim(&self) -> usize {
        self.branch_dim
    }

    pub fn dropout_schedule(&self) -> Vec<f32> {
        self.dropouts.iter().map(Dropout::rate).collect()
    }

    /// Shared trunk output for a visual/temporal embedding pair
    pub fn trunk(
        &self,
        visual: &EmbeddingVector,
        temporal: &EmbeddingVector,
    ) -> Result<Vec<f32>, EngageError> {
        if visual.len() != self.branch_dim || temporal.len() != self.branch_dim {
            return Err(EngageError::shape_mismatch(
                "fusion input",
                vec![self.branch_dim, self.branch_dim],
                vec![visual.len(), temporal.len()],
            ));
        }

        let mut joint = Vec::with_capacity(self.branch_dim * 2);
        joint.extend_from_slice(visual.as_slice());
        joint.extend_from_slice(temporal.as_slice());

        self.trunk
            .iter()
            .try_fold(joint, |activations, layer| layer.forward(&activations))
    }

    pub fn forward(
        &self,
        visual: &EmbeddingVector,
        temporal: &EmbeddingVector,
    ) -> Result<EngagementScores, EngageError> {
        let shared = self.trunk(visual, temporal)?;

        let class = self.engagement_class.forward(&shared)?;
        let mut probabilities = [0.0f64; NUM_ENGAGEMENT_CLASSES];
        for (slot, p) in probabilities.iter_mut().zip(&class) {
            *slot = f64::from(*p);
        }

        Ok(EngagementScores {
            engagement_class: ClassDistribution::new(probabilities),
            attention_score: scalar(&self.attention.forward(&shared)?),
            frustration_score: scalar(&self.frustration.forward(&shared)?),
        })
    }
}

fn scalar(output: &[f32]) -> f64 {
    output.first().copied().map(f64::from).unwrap_or_default()
}

impl Module for FusionHead {
    fn name(&self) -> &str {
        "fusion"
    }

    fn visit_parameters(&self, visitor: &mut dyn FnMut(&Parameter)) {
        for layer in &self.trunk {
            layer.visit_parameters(visitor);
        }
        self.engagement_class.visit_parameters(visitor);
        self.attention.visit_parameters(visitor);
        self.frustration.visit_parameters(visitor);
    }

    fn visit_parameters_mut(&mut self, visitor: &mut dyn FnMut(&mut Parameter)) {
        for layer in &mut self.trunk {
            layer.visit_parameters_mut(visitor);
        }
        self.engagement_class.visit_parameters_mut(visitor);
        self.attention.visit_parameters_mut(visitor);
        self.frustration.visit_parameters_mut(visitor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn head() -> FusionHead {
        FusionHead::new(8, &mut ChaCha8Rng::seed_from_u64(5)).unwrap()
    }

    #[test]
    fn test_outputs_are_bounded() {
        let head = head();
        let visual = EmbeddingVector((0..8).map(|v| v as f32 * 0.3).collect());
        let temporal = EmbeddingVector(vec![0.7; 8]);
        let scores = head.forward(&visual, &temporal).unwrap();

        let total: f64 = scores.engagement_class.probabilities.iter().sum();
        assert!((total - 1.0).abs() < 1e-5);
        assert!((0.0..=1.0).contains(&scores.attention_score));
        assert!((0.0..=1.0).contains(&scores.frustration_score));
    }

    #[test]
    fn test_mismatched_embeddings_rejected() {
        let head = head();
        let err = head
            .forward(&EmbeddingVector(vec![0.0; 8]), &EmbeddingVector(vec![0.0; 7]))
            .unwrap_err();
        assert!(matches!(err, EngageError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_trunk_width_and_schedule() {
        let head = head();
        let shared = head
            .trunk(&EmbeddingVector(vec![1.0; 8]), &EmbeddingVector(vec![1.0; 8]))
            .unwrap();
        assert_eq!(shared.len(), 128);
        assert_eq!(head.dropout_schedule(), vec![0.4, 0.3]);
    }
}
