//! Cepstral sequence normalization
//!
//! This module fixes a variable-length audio feature sequence to `T x F`:
//! - Short sequences are zero-padded at the end
//! - Long sequences keep only their first `T` frames
//! - Every coefficient column is z-scored with the sample's own mean and
//!   standard deviation, using `std + 1e-8` as the denominator

use crate::types::{NormalizedSequence, DEFAULT_MFCC_COEFFICIENTS, DEFAULT_TARGET_LENGTH};

/// Added to every column's standard deviation before dividing
pub const STD_EPSILON: f64 = 1e-8;

/// Normalizer for per-frame cepstral coefficient sequences
#[derive(Debug, Clone, Copy)]
pub struct SequenceNormalizer {
    target_length: usize,
    default_features: usize,
}

impl Default for SequenceNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_TARGET_LENGTH)
    }
}

impl SequenceNormalizer {
    /// Create a normalizer producing `target_length` timesteps
    pub fn new(target_length: usize) -> Self {
        Self {
            target_length,
            default_features: DEFAULT_MFCC_COEFFICIENTS,
        }
    }

    /// Override the frame width used when there are no frames to infer it from
    pub fn with_default_features(mut self, features: usize) -> Self {
        self.default_features = features;
        self
    }

    pub fn target_length(&self) -> usize {
        self.target_length
    }

    /// Frame width for this input: the first frame's width, or the default
    /// when the sequence is empty or starts with an empty frame
    pub fn feature_width<F: AsRef<[f64]>>(&self, frames: &[F]) -> usize {
        match frames.first().map(|f| f.as_ref().len()) {
            Some(width) if width > 0 => width,
            _ => self.default_features,
        }
    }

    /// Fix the sequence to exactly `target_length x width` rows before
    /// standardization. Ragged frames are zero-padded or cut to the width,
    /// and non-finite values are replaced with zero.
    pub fn pad_or_truncate<F: AsRef<[f64]>>(&self, frames: &[F]) -> Vec<Vec<f64>> {
        let width = self.feature_width(frames);
        let mut rows: Vec<Vec<f64>> = frames
            .iter()
            .take(self.target_length)
            .map(|frame| {
                let mut row: Vec<f64> = frame
                    .as_ref()
                    .iter()
                    .take(width)
                    .map(|v| if v.is_finite() { *v } else { 0.0 })
                    .collect();
                row.resize(width, 0.0);
                row
            })
            .collect();
        rows.resize(self.target_length, vec![0.0; width]);
        rows
    }

    /// Normalize a frame sequence to a fixed, standardized `T x F` tensor
    pub fn normalize<F: AsRef<[f64]>>(&self, frames: &[F]) -> NormalizedSequence {
        let width = self.feature_width(frames);
        if frames.is_empty() || self.target_length == 0 {
            return NormalizedSequence::zeros(self.target_length, width);
        }

        let rows = self.pad_or_truncate(frames);
        let t = self.target_length as f64;

        let mut data = vec![0.0f32; self.target_length * width];
        for col in 0..width {
            let mean = rows.iter().map(|r| r[col]).sum::<f64>() / t;
            let variance = rows.iter().map(|r| (r[col] - mean).powi(2)).sum::<f64>() / t;
            let denom = variance.sqrt() + STD_EPSILON;
            for (row_idx, row) in rows.iter().enumerate() {
                data[row_idx * width + col] = ((row[col] - mean) / denom) as f32;
            }
        }

        NormalizedSequence::from_vec(self.target_length, width, data)
            .unwrap_or_else(|| NormalizedSequence::zeros(self.target_length, width))
    }
}

/// Normalize with the default fallback width of 13 coefficients
pub fn normalize<F: AsRef<[f64]>>(frames: &[F], target_length: usize) -> NormalizedSequence {
    SequenceNormalizer::new(target_length).normalize(frames)
}
