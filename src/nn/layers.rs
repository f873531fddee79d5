use super::{sigmoid, Activation, Module, Parameter};
use crate::error::EngageError;
use rand::Rng;
use rand_chacha::ChaCha8Rng;

fn guard_len(context: &str, expected: usize, actual: usize) -> Result<(), EngageError> {
    if expected != actual {
        return Err(EngageError::shape_mismatch(context, vec![expected], vec![actual]));
    }
    Ok(())
}

/// Fully connected layer, `y = act(x W + b)`
#[derive(Debug, Clone)]
pub struct Dense {
    name: String,
    input_dim: usize,
    units: usize,
    activation: Activation,
    kernel: Parameter,
    bias: Parameter,
}

impl Dense {
    pub fn new(
        name: impl Into<String>,
        input_dim: usize,
        units: usize,
        activation: Activation,
        rng: &mut ChaCha8Rng,
    ) -> Self {
        let name = name.into();
        Self {
            kernel: Parameter::glorot_uniform(
                format!("{name}::kernel"),
                vec![input_dim, units],
                input_dim,
                units,
                rng,
            ),
            bias: Parameter::zeros(format!("{name}::bias"), vec![units]),
            name,
            input_dim,
            units,
            activation,
        }
    }

    pub fn units(&self) -> usize {
        self.units
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }

    pub fn forward(&self, input: &[f32]) -> Result<Vec<f32>, EngageError> {
        guard_len(&self.name, self.input_dim, input.len())?;
        let mut output = self.bias.data().to_vec();
        let kernel = self.kernel.data();
        for (row, x) in input.iter().enumerate() {
            if *x == 0.0 {
                continue;
            }
            let weights = &kernel[row * self.units..(row + 1) * self.units];
            for (out, w) in output.iter_mut().zip(weights) {
                *out += x * w;
            }
        }
        self.activation.apply(&mut output);
        Ok(output)
    }
}

impl Module for Dense {
    fn name(&self) -> &str {
        &self.name
    }

    fn visit_parameters(&self, visitor: &mut dyn FnMut(&Parameter)) {
        visitor(&self.kernel);
        visitor(&self.bias);
    }

    fn visit_parameters_mut(&mut self, visitor: &mut dyn FnMut(&mut Parameter)) {
        visitor(&mut self.kernel);
        visitor(&mut self.bias);
    }
}

/// Square-kernel 2D convolution over channels-last input with "same" padding
#[derive(Debug, Clone)]
pub struct Conv2d {
    name: String,
    in_channels: usize,
    filters: usize,
    kernel_size: usize,
    activation: Activation,
    kernel: Parameter,
    bias: Parameter,
}

impl Conv2d {
    pub fn new(
        name: impl Into<String>,
        in_channels: usize,
        filters: usize,
        kernel_size: usize,
        activation: Activation,
        rng: &mut ChaCha8Rng,
    ) -> Self {
        let name = name.into();
        let receptive = kernel_size * kernel_size;
        Self {
            kernel: Parameter::glorot_uniform(
                format!("{name}::kernel"),
                vec![kernel_size, kernel_size, in_channels, filters],
                receptive * in_channels,
                receptive * filters,
                rng,
            ),
            bias: Parameter::zeros(format!("{name}::bias"), vec![filters]),
            name,
            in_channels,
            filters,
            kernel_size,
            activation,
        }
    }

    pub fn filters(&self) -> usize {
        self.filters
    }

    /// Convolve an `height x width x in_channels` buffer; output keeps the
    /// spatial size and has `filters` channels
    pub fn forward(
        &self,
        input: &[f32],
        height: usize,
        width: usize,
    ) -> Result<Vec<f32>, EngageError> {
        if input.len() != height * width * self.in_channels {
            return Err(EngageError::shape_mismatch(
                self.name.clone(),
                vec![height, width, self.in_channels],
                vec![input.len()],
            ));
        }

        let k = self.kernel_size;
        let pad = (k - 1) / 2;
        let cin = self.in_channels;
        let cout = self.filters;
        let kernel = self.kernel.data();
        let mut output = vec![0.0f32; height * width * cout];

        for row in 0..height {
            for col in 0..width {
                let out = &mut output[(row * width + col) * cout..(row * width + col + 1) * cout];
                out.copy_from_slice(self.bias.data());
                for ky in 0..k {
                    let Some(src_row) = (row + ky).checked_sub(pad).filter(|r| *r < height) else {
                        continue;
                    };
                    for kx in 0..k {
                        let Some(src_col) = (col + kx).checked_sub(pad).filter(|c| *c < width)
                        else {
                            continue;
                        };
                        let pixel = &input[(src_row * width + src_col) * cin..][..cin];
                        let taps = &kernel[(ky * k + kx) * cin * cout..][..cin * cout];
                        for (ci, x) in pixel.iter().enumerate() {
                            if *x == 0.0 {
                                continue;
                            }
                            for (o, w) in out.iter_mut().zip(&taps[ci * cout..(ci + 1) * cout]) {
                                *o += x * w;
                            }
                        }
                    }
                }
            }
        }

        self.activation.apply(&mut output);
        Ok(output)
    }
}

impl Module for Conv2d {
    fn name(&self) -> &str {
        &self.name
    }

    fn visit_parameters(&self, visitor: &mut dyn FnMut(&Parameter)) {
        visitor(&self.kernel);
        visitor(&self.bias);
    }

    fn visit_parameters_mut(&mut self, visitor: &mut dyn FnMut(&mut Parameter)) {
        visitor(&mut self.kernel);
        visitor(&mut self.bias);
    }
}

/// Non-overlapping max pooling; trailing rows/columns that don't fill a
/// window are dropped
#[derive(Debug, Clone, Copy)]
pub struct MaxPool2d {
    pool: usize,
}

impl MaxPool2d {
    pub fn new(pool: usize) -> Self {
        Self { pool: pool.max(1) }
    }

    pub fn output_size(&self, height: usize, width: usize) -> (usize, usize) {
        (height / self.pool, width / self.pool)
    }

    /// Returns the pooled buffer and its `(height, width)`
    pub fn forward(
        &self,
        input: &[f32],
        height: usize,
        width: usize,
        channels: usize,
    ) -> Result<(Vec<f32>, usize, usize), EngageError> {
        if input.len() != height * width * channels {
            return Err(EngageError::shape_mismatch(
                "max_pool",
                vec![height, width, channels],
                vec![input.len()],
            ));
        }
        let (oh, ow) = self.output_size(height, width);
        let mut output = vec![f32::NEG_INFINITY; oh * ow * channels];
        for orow in 0..oh {
            for ocol in 0..ow {
                let out = &mut output[(orow * ow + ocol) * channels..][..channels];
                for dy in 0..self.pool {
                    for dx in 0..self.pool {
                        let r = orow * self.pool + dy;
                        let c = ocol * self.pool + dx;
                        let pixel = &input[(r * width + c) * channels..][..channels];
                        for (o, v) in out.iter_mut().zip(pixel) {
                            *o = o.max(*v);
                        }
                    }
                }
            }
        }
        Ok((output, oh, ow))
    }
}

/// Inverted dropout; inference passes values through unchanged
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dropout {
    rate: f32,
}

impl Dropout {
    pub fn new(rate: f32) -> Result<Self, EngageError> {
        if !(0.0..1.0).contains(&rate) {
            return Err(EngageError::InvalidConfig(format!(
                "dropout rate must be in [0, 1), got {rate}"
            )));
        }
        Ok(Self { rate })
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }

    /// Zero each value with probability `rate` and scale survivors by `1 / (1 - rate)`
    pub fn apply_train(&self, values: &mut [f32], rng: &mut ChaCha8Rng) {
        if self.rate == 0.0 {
            return;
        }
        let scale = 1.0 / (1.0 - self.rate);
        for v in values.iter_mut() {
            if rng.gen::<f32>() < self.rate {
                *v = 0.0;
            } else {
                *v *= scale;
            }
        }
    }
}

/// Long short-term memory layer
///
/// Gates are packed as input, forget, cell, output along the last kernel axis,
/// with a single bias whose forget slice starts at 1.0. Input and recurrent
/// dropout rates are recorded for training drivers; inference ignores them.
#[derive(Debug, Clone)]
pub struct Lstm {
    name: String,
    input_dim: usize,
    units: usize,
    return_sequences: bool,
    dropout: f32,
    recurrent_dropout: f32,
    kernel: Parameter,
    recurrent_kernel: Parameter,
    bias: Parameter,
}

impl Lstm {
    pub fn new(
        name: impl Into<String>,
        input_dim: usize,
        units: usize,
        return_sequences: bool,
        rng: &mut ChaCha8Rng,
    ) -> Self {
        let name = name.into();
        let gates = 4 * units;
        let mut bias = Parameter::zeros(format!("{name}::bias"), vec![gates]);
        bias.data_mut()[units..2 * units].fill(1.0);
        Self {
            kernel: Parameter::glorot_uniform(
                format!("{name}::kernel"),
                vec![input_dim, gates],
                input_dim,
                gates,
                rng,
            ),
            recurrent_kernel: Parameter::glorot_uniform(
                format!("{name}::recurrent_kernel"),
                vec![units, gates],
                units,
                gates,
                rng,
            ),
            bias,
            name,
            input_dim,
            units,
            return_sequences,
            dropout: 0.0,
            recurrent_dropout: 0.0,
        }
    }

    pub fn with_dropout(mut self, dropout: f32, recurrent_dropout: f32) -> Self {
        self.dropout = dropout;
        self.recurrent_dropout = recurrent_dropout;
        self
    }

    pub fn units(&self) -> usize {
        self.units
    }

    pub fn returns_sequences(&self) -> bool {
        self.return_sequences
    }

    pub fn dropout(&self) -> (f32, f32) {
        (self.dropout, self.recurrent_dropout)
    }

    /// Run over `timesteps x input_dim` rows from a zero initial state.
    ///
    /// Returns `timesteps x units` when returning sequences, otherwise the
    /// final hidden state.
    pub fn forward(&self, input: &[f32], timesteps: usize) -> Result<Vec<f32>, EngageError> {
        if input.len() != timesteps * self.input_dim {
            return Err(EngageError::shape_mismatch(
                self.name.clone(),
                vec![timesteps, self.input_dim],
                vec![input.len()],
            ));
        }

        let units = self.units;
        let gates_len = 4 * units;
        let kernel = self.kernel.data();
        let recurrent = self.recurrent_kernel.data();

        let mut hidden = vec![0.0f32; units];
        let mut cell = vec![0.0f32; units];
        let mut sequence = if self.return_sequences {
            Vec::with_capacity(timesteps * units)
        } else {
            Vec::new()
        };
        let mut gates = vec![0.0f32; gates_len];

        for t in 0..timesteps {
            let x = &input[t * self.input_dim..(t + 1) * self.input_dim];
            gates.copy_from_slice(self.bias.data());
            for (row, value) in x.iter().enumerate() {
                let weights = &kernel[row * gates_len..(row + 1) * gates_len];
                for (g, w) in gates.iter_mut().zip(weights) {
                    *g += value * w;
                }
            }
            for (row, value) in hidden.iter().enumerate() {
                let weights = &recurrent[row * gates_len..(row + 1) * gates_len];
                for (g, w) in gates.iter_mut().zip(weights) {
                    *g += value * w;
                }
            }
            for unit in 0..units {
                let gi = sigmoid(gates[unit]);
                let gf = sigmoid(gates[units + unit]);
                let gc = gates[2 * units + unit].tanh();
                let go = sigmoid(gates[3 * units + unit]);
                cell[unit] = gf * cell[unit] + gi * gc;
                hidden[unit] = go * cell[unit].tanh();
            }
            if self.return_sequences {
                sequence.extend_from_slice(&hidden);
            }
        }

        Ok(if self.return_sequences { sequence } else { hidden })
    }
}

impl Module for Lstm {
    fn name(&self) -> &str {
        &self.name
    }

    fn visit_parameters(&self, visitor: &mut dyn FnMut(&Parameter)) {
        visitor(&self.kernel);
        visitor(&self.recurrent_kernel);
        visitor(&self.bias);
    }

    fn visit_parameters_mut(&mut self, visitor: &mut dyn FnMut(&mut Parameter)) {
        visitor(&mut self.kernel);
        visitor(&mut self.recurrent_kernel);
        visitor(&mut self.bias);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(42)
    }

    #[test]
    fn test_dense_forward_known_weights() {
        let mut dense = Dense::new("d", 2, 2, Activation::Linear, &mut rng());
        dense.visit_parameters_mut(&mut |p| {
            let values: Vec<f32> = match p.shape().len() {
                2 => vec![1.0, 2.0, 3.0, 4.0],
                _ => vec![0.5, -0.5],
            };
            let shape = p.shape().to_vec();
            p.assign(&shape, &values).unwrap();
        });

        let out = dense.forward(&[1.0, 1.0]).unwrap();
        assert_eq!(out, vec![4.5, 5.5]);
        assert!(dense.forward(&[1.0]).is_err());
        assert_eq!(dense.parameter_count(), 6);
    }

    #[test]
    fn test_conv_same_padding_keeps_size() {
        let conv = Conv2d::new("c", 3, 8, 3, Activation::Relu, &mut rng());
        let input = vec![0.5f32; 5 * 5 * 3];
        let out = conv.forward(&input, 5, 5).unwrap();

        assert_eq!(out.len(), 5 * 5 * 8);
        assert!(out.iter().all(|v| *v >= 0.0));
        assert!(conv.forward(&input, 4, 5).is_err());
    }

    #[test]
    fn test_conv_identity_kernel() {
        let mut conv = Conv2d::new("c", 1, 1, 3, Activation::Linear, &mut rng());
        conv.visit_parameters_mut(&mut |p| {
            let shape = p.shape().to_vec();
            let mut values = vec![0.0; p.len()];
            if shape.len() == 4 {
                values[4] = 1.0; // center tap
            }
            p.assign(&shape, &values).unwrap();
        });
        let input: Vec<f32> = (0..9).map(|v| v as f32).collect();
        assert_eq!(conv.forward(&input, 3, 3).unwrap(), input);
    }

    #[test]
    fn test_max_pool_floors_odd_sizes() {
        let pool = MaxPool2d::new(2);
        let input: Vec<f32> = (0..25).map(|v| v as f32).collect();
        let (out, h, w) = pool.forward(&input, 5, 5, 1).unwrap();

        assert_eq!((h, w), (2, 2));
        assert_eq!(out, vec![6.0, 8.0, 16.0, 18.0]);
        assert_eq!(pool.output_size(50, 50), (25, 25));
        assert_eq!(pool.output_size(25, 25), (12, 12));
    }

    #[test]
    fn test_dropout_rate_bounds() {
        assert!(Dropout::new(0.4).is_ok());
        assert!(Dropout::new(1.0).is_err());
        assert!(Dropout::new(-0.1).is_err());

        let dropout = Dropout::new(0.5).unwrap();
        let mut values = vec![1.0f32; 1000];
        dropout.apply_train(&mut values, &mut rng());
        assert!(values.iter().all(|v| *v == 0.0 || (*v - 2.0).abs() < 1e-6));
        let kept = values.iter().filter(|v| **v > 0.0).count();
        assert!(kept > 400 && kept < 600);
    }

    #[test]
    fn test_lstm_output_shapes() {
        let seq = Lstm::new("l1", 3, 4, true, &mut rng());
        let last = Lstm::new("l2", 4, 2, false, &mut rng());
        let input = vec![0.1f32; 5 * 3];

        let hidden = seq.forward(&input, 5).unwrap();
        assert_eq!(hidden.len(), 5 * 4);
        let state = last.forward(&hidden, 5).unwrap();
        assert_eq!(state.len(), 2);
        assert!(state.iter().all(|v| v.abs() < 1.0));
    }

    #[test]
    fn test_lstm_forget_bias_starts_at_one() {
        let lstm = Lstm::new("l", 2, 3, false, &mut rng());
        let mut bias = Vec::new();
        lstm.visit_parameters(&mut |p| {
            if p.name().ends_with("::bias") {
                bias = p.data().to_vec();
            }
        });
        assert_eq!(&bias[0..3], &[0.0, 0.0, 0.0]);
        assert_eq!(&bias[3..6], &[1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_lstm_zero_timesteps_returns_zero_state() {
        let lstm = Lstm::new("l", 2, 3, false, &mut rng());
        assert_eq!(lstm.forward(&[], 0).unwrap(), vec![0.0; 3]);
    }
}
