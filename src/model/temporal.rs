//! Recurrent encoder over the normalized cepstral sequence

use crate::error::EngageError;
use crate::nn::{Activation, Dense, Dropout, Lstm, Module, Parameter};
use crate::types::{EmbeddingVector, NormalizedSequence};
use rand_chacha::ChaCha8Rng;

const SEQUENCE_UNITS: usize = 128;
const SUMMARY_UNITS: usize = 64;
const HIDDEN_UNITS: usize = 128;
const RECURRENT_DROPOUT: f32 = 0.2;
const HIDDEN_DROPOUT: f32 = 0.3;

/// Stacked LSTM (128 per-step, 64 terminal) followed by a dense 128 (relu),
/// dropout 0.3, and the embedding projection
#[derive(Debug, Clone)]
pub struct TemporalEncoder {
    timesteps: usize,
    features: usize,
    sequence: Lstm,
    summary: Lstm,
    hidden: Dense,
    dropout: Dropout,
    projection: Dense,
}

/// Stored shape of `temporal::lstm1::kernel` for `features` cepstral coefficients
pub(crate) fn sequence_kernel_shape(features: usize) -> Option<[usize; 2]> {
    Some([features, SEQUENCE_UNITS.checked_mul(4)?])
}

impl TemporalEncoder {
    pub fn new(
        timesteps: usize,
        features: usize,
        embedding_dim: usize,
        rng: &mut ChaCha8Rng,
    ) -> Result<Self, EngageError> {
        if timesteps == 0 || features == 0 {
            return Err(EngageError::InvalidShape(format!(
                "temporal encoder needs a non-empty sequence shape, got [{timesteps}, {features}]"
            )));
        }
        Ok(Self {
            timesteps,
            features,
            sequence: Lstm::new("temporal::lstm1", features, SEQUENCE_UNITS, true, rng)
                .with_dropout(RECURRENT_DROPOUT, RECURRENT_DROPOUT),
            summary: Lstm::new("temporal::lstm2", SEQUENCE_UNITS, SUMMARY_UNITS, false, rng)
                .with_dropout(RECURRENT_DROPOUT, RECURRENT_DROPOUT),
            hidden: Dense::new(
                "temporal::dense1",
                SUMMARY_UNITS,
                HIDDEN_UNITS,
                Activation::Relu,
                rng,
            ),
            dropout: Dropout::new(HIDDEN_DROPOUT)?,
            projection: Dense::new(
                "temporal::dense2",
                HIDDEN_UNITS,
                embedding_dim,
                Activation::Relu,
                rng,
            ),
        })
    }

    /// `[timesteps, features]`
    pub fn input_shape(&self) -> [usize; 2] {
        [self.timesteps, self.features]
    }

    pub fn embedding_dim(&self) -> usize {
        self.projection.units()
    }

    pub fn hidden_dropout(&self) -> f32 {
        self.dropout.rate()
    }

    pub fn encode(&self, sequence: &NormalizedSequence) -> Result<EmbeddingVector, EngageError> {
        if sequence.shape() != self.input_shape() {
            return Err(EngageError::shape_mismatch(
                "temporal encoder input",
                self.input_shape().to_vec(),
                sequence.shape().to_vec(),
            ));
        }

        let states = self.sequence.forward(sequence.data(), self.timesteps)?;
        let summary = self.summary.forward(&states, self.timesteps)?;
        let hidden = self.hidden.forward(&summary)?;
        Ok(EmbeddingVector(self.projection.forward(&hidden)?))
    }
}

impl Module for TemporalEncoder {
    fn name(&self) -> &str {
        "temporal"
    }

    fn visit_parameters(&self, visitor: &mut dyn FnMut(&Parameter)) {
        self.sequence.visit_parameters(visitor);
        self.summary.visit_parameters(visitor);
        self.hidden.visit_parameters(visitor);
        self.projection.visit_parameters(visitor);
    }

    fn visit_parameters_mut(&mut self, visitor: &mut dyn FnMut(&mut Parameter)) {
        self.sequence.visit_parameters_mut(visitor);
        self.summary.visit_parameters_mut(visitor);
        self.hidden.visit_parameters_mut(visitor);
        self.projection.visit_parameters_mut(visitor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_encode_shape() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let encoder = TemporalEncoder::new(10, 13, 32, &mut rng).unwrap();
        let embedding = encoder.encode(&NormalizedSequence::zeros(10, 13)).unwrap();

        assert_eq!(embedding.len(), 32);
        assert!(embedding.as_slice().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_wrong_sequence_shape_rejected() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let encoder = TemporalEncoder::new(10, 13, 32, &mut rng).unwrap();
        let err = encoder.encode(&NormalizedSequence::zeros(10, 12)).unwrap_err();
        assert!(matches!(err, EngageError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_recurrent_layers_carry_dropout() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let encoder = TemporalEncoder::new(4, 2, 8, &mut rng).unwrap();
        assert_eq!(encoder.sequence.dropout(), (0.2, 0.2));
        assert_eq!(encoder.summary.dropout(), (0.2, 0.2));
        assert!(encoder.sequence.returns_sequences());
        assert!(!encoder.summary.returns_sequences());
        assert!((encoder.hidden_dropout() - 0.3).abs() < 1e-6);
    }
}
