//! Inference-only neural network building blocks
//!
//! Layers hold plain owned buffers so a built network is `Send + Sync` and can
//! be shared read-only across worker threads. Weight layouts follow the
//! channels-last convention used by the rasterized scanpath:
//! - Dense kernels: `[in, out]`
//! - Conv kernels: `[kh, kw, in, out]`
//! - LSTM kernels: `[in, 4 * units]`, gate order input, forget, cell, output

mod layers;

pub use layers::{Conv2d, Dense, Dropout, Lstm, MaxPool2d};

use crate::error::EngageError;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Named, shaped weight buffer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    name: String,
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Parameter {
    pub fn zeros(name: impl Into<String>, shape: Vec<usize>) -> Self {
        let len: usize = shape.iter().product();
        Self {
            name: name.into(),
            shape,
            data: vec![0.0; len],
        }
    }

    /// Glorot-uniform initialization with limit `sqrt(6 / (fan_in + fan_out))`
    pub fn glorot_uniform(
        name: impl Into<String>,
        shape: Vec<usize>,
        fan_in: usize,
        fan_out: usize,
        rng: &mut ChaCha8Rng,
    ) -> Self {
        let limit = (6.0 / (fan_in + fan_out).max(1) as f32).sqrt();
        let len: usize = shape.iter().product();
        let data = (0..len).map(|_| rng.gen_range(-limit..=limit)).collect();
        Self {
            name: name.into(),
            shape,
            data,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Replace the values, keeping the declared shape
    pub fn assign(&mut self, shape: &[usize], data: &[f32]) -> Result<(), EngageError> {
        if shape != self.shape.as_slice() || data.len() != self.data.len() {
            return Err(EngageError::shape_mismatch(
                self.name.clone(),
                self.shape.clone(),
                shape.to_vec(),
            ));
        }
        self.data.copy_from_slice(data);
        Ok(())
    }
}

/// Parameter-owning component of a network
pub trait Module {
    /// Layer name, used as the prefix of its parameter names
    fn name(&self) -> &str;

    /// Visits immutable parameters
    fn visit_parameters(&self, visitor: &mut dyn FnMut(&Parameter));

    /// Visits mutable parameters
    fn visit_parameters_mut(&mut self, visitor: &mut dyn FnMut(&mut Parameter));

    fn parameter_count(&self) -> usize {
        let mut count = 0;
        self.visit_parameters(&mut |p| count += p.len());
        count
    }
}

/// Element-wise output activation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Linear,
    Relu,
    Sigmoid,
    Tanh,
    Softmax,
}

impl Activation {
    pub fn apply(&self, values: &mut [f32]) {
        match self {
            Activation::Linear => {}
            Activation::Relu => values.iter_mut().for_each(|v| *v = v.max(0.0)),
            Activation::Sigmoid => values.iter_mut().for_each(|v| *v = sigmoid(*v)),
            Activation::Tanh => values.iter_mut().for_each(|v| *v = v.tanh()),
            Activation::Softmax => softmax(values),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Activation::Linear => "linear",
            Activation::Relu => "relu",
            Activation::Sigmoid => "sigmoid",
            Activation::Tanh => "tanh",
            Activation::Softmax => "softmax",
        }
    }
}

pub(crate) fn sigmoid(value: f32) -> f32 {
    1.0 / (1.0 + (-value).exp())
}

/// Numerically stable softmax (max-shifted)
pub(crate) fn softmax(values: &mut [f32]) {
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0;
    for v in values.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }
    if sum > 0.0 {
        values.iter_mut().for_each(|v| *v /= sum);
    }
}
