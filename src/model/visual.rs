//! Convolutional encoder over the rasterized scanpath
//!
//! Three `conv3x3 -> relu -> maxpool2 -> dropout` stages (32, 64, 128 filters),
//! then flatten, dense 256 (relu), dropout, dense embedding (relu).

use crate::error::EngageError;
use crate::nn::{Activation, Conv2d, Dense, Dropout, MaxPool2d, Module, Parameter};
use crate::types::{EmbeddingVector, ScanpathTensor, SCANPATH_CHANNELS};
use rand_chacha::ChaCha8Rng;

const STAGE_FILTERS: [usize; 3] = [32, 64, 128];
const HIDDEN_UNITS: usize = 256;

/// Dropout after each pooling stage, then after the hidden dense layer.
/// Rates grow with depth so the widest layers are regularized hardest.
pub const VISUAL_DROPOUT: [f32; 4] = [0.2, 0.2, 0.3, 0.4];

#[derive(Debug, Clone)]
pub struct VisualEncoder {
    grid_size: usize,
    convs: Vec<Conv2d>,
    pool: MaxPool2d,
    dropouts: Vec<Dropout>,
    hidden: Dense,
    projection: Dense,
}

/// Stored shape of `visual::dense1::kernel` for a square raster of `grid_size`
pub(crate) fn hidden_kernel_shape(grid_size: usize) -> Option<[usize; 2]> {
    let side = STAGE_FILTERS.iter().fold(grid_size, |side, _| side / 2);
    let channels = *STAGE_FILTERS.last()?;
    let flat = side.checked_mul(side)?.checked_mul(channels)?;
    Some([flat, HIDDEN_UNITS])
}

impl VisualEncoder {
    pub fn new(
        grid_size: usize,
        embedding_dim: usize,
        rng: &mut ChaCha8Rng,
    ) -> Result<Self, EngageError> {
        let pool = MaxPool2d::new(2);
        let mut convs = Vec::with_capacity(STAGE_FILTERS.len());
        let mut in_channels = SCANPATH_CHANNELS;
        let mut side = grid_size;
        for (stage, filters) in STAGE_FILTERS.iter().enumerate() {
            convs.push(Conv2d::new(
                format!("visual::conv{}", stage + 1),
                in_channels,
                *filters,
                3,
                Activation::Relu,
                rng,
            ));
            in_channels = *filters;
            side = pool.output_size(side, side).0;
        }
        if side == 0 {
            return Err(EngageError::InvalidShape(format!(
                "grid size {grid_size} collapses to nothing after {} pooling stages",
                STAGE_FILTERS.len()
            )));
        }

        let flat = side * side * in_channels;
        let dropouts = VISUAL_DROPOUT
            .iter()
            .map(|rate| Dropout::new(*rate))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            grid_size,
            convs,
            pool,
            dropouts,
            hidden: Dense::new("visual::dense1", flat, HIDDEN_UNITS, Activation::Relu, rng),
            projection: Dense::new(
                "visual::dense2",
                HIDDEN_UNITS,
                embedding_dim,
                Activation::Relu,
                rng,
            ),
        })
    }

    pub fn grid_size(&self) -> usize {
        self.grid_size
    }

    pub fn embedding_dim(&self) -> usize {
        self.projection.units()
    }

    pub fn dropout_schedule(&self) -> Vec<f32> {
        self.dropouts.iter().map(Dropout::rate).collect()
    }

    pub fn encode(&self, tensor: &ScanpathTensor) -> Result<EmbeddingVector, EngageError> {
        if tensor.grid_size() != self.grid_size {
            return Err(EngageError::shape_mismatch(
                "visual encoder input",
                vec![self.grid_size, self.grid_size, SCANPATH_CHANNELS],
                tensor.shape().to_vec(),
            ));
        }

        let mut activations = tensor.data().to_vec();
        let (mut height, mut width) = (self.grid_size, self.grid_size);
        for conv in &self.convs {
            let convolved = conv.forward(&activations, height, width)?;
            let (pooled, h, w) = self.pool.forward(&convolved, height, width, conv.filters())?;
            activations = pooled;
            height = h;
            width = w;
        }

        let hidden = self.hidden.forward(&activations)?;
        Ok(EmbeddingVector(self.projection.forward(&hidden)?))
    }
}

impl Module for VisualEncoder {
    fn name(&self) -> &str {
        "visual"
    }

    fn visit_parameters(&self, visitor: &mut dyn FnMut(&Parameter)) {
        for conv in &self.convs {
            conv.visit_parameters(visitor);
        }
        self.hidden.visit_parameters(visitor);
        self.projection.visit_parameters(visitor);
    }

    fn visit_parameters_mut(&mut self, visitor: &mut dyn FnMut(&mut Parameter)) {
        for conv in &mut self.convs {
            conv.visit_parameters_mut(visitor);
        }
        self.hidden.visit_parameters_mut(visitor);
        self.projection.visit_parameters_mut(visitor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_default_grid_flattens_to_six_by_six() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let encoder = VisualEncoder::new(50, 128, &mut rng).unwrap();

        let mut names = Vec::new();
        encoder.visit_parameters(&mut |p| names.push((p.name().to_string(), p.shape().to_vec())));
        assert!(names.contains(&("visual::dense1::kernel".to_string(), vec![6 * 6 * 128, 256])));
        assert!(names.contains(&("visual::conv1::kernel".to_string(), vec![3, 3, 3, 32])));
        assert_eq!(encoder.dropout_schedule(), vec![0.2, 0.2, 0.3, 0.4]);
    }

    #[test]
    fn test_encode_small_grid() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let encoder = VisualEncoder::new(8, 16, &mut rng).unwrap();
        let embedding = encoder.encode(&ScanpathTensor::zeros(8)).unwrap();

        assert_eq!(embedding.len(), 16);
        assert!(embedding.as_slice().iter().all(|v| v.is_finite() && *v >= 0.0));
        assert!(encoder.encode(&ScanpathTensor::zeros(10)).is_err());
    }

    #[test]
    fn test_tiny_grid_rejected() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert!(VisualEncoder::new(4, 16, &mut rng).is_err());
    }
}
