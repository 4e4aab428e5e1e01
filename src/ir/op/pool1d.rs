use crate::config::MaxPoolMxtsMode;
use crate::error::{DeepLiftError, Result};
use crate::tensor::{Shape, Tensor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    Max,
    Average,
}

/// Valid-padding 1-D pooling over `[length, channels]` samples, per channel
#[derive(Debug, Clone, PartialEq)]
pub struct Pool1dOp {
    pub(crate) kind: PoolKind,
    pub(crate) pool_length: usize,
    pub(crate) stride: usize,
}

impl Pool1dOp {
    pub fn new(kind: PoolKind, pool_length: usize, stride: usize) -> Result<Self> {
        if pool_length == 0 || stride == 0 {
            return Err(DeepLiftError::Structural(format!(
                "pool length ({}) and stride ({}) must be positive",
                pool_length, stride
            )));
        }
        Ok(Self {
            kind,
            pool_length,
            stride,
        })
    }

    pub(crate) fn output_shape(&self, name: &str, parents: &[&Shape]) -> Result<Shape> {
        let [parent] = parents else {
            return Err(DeepLiftError::Structural(format!(
                "pool '{}' needs exactly one parent",
                name
            )));
        };
        match parent.dims() {
            &[length, channels] if length >= self.pool_length => Ok(Shape::new(vec![
                (length - self.pool_length) / self.stride + 1,
                channels,
            ])),
            dims => Err(DeepLiftError::Structural(format!(
                "pool '{}' of length {} cannot consume input of shape {:?}",
                name, self.pool_length, dims
            ))),
        }
    }

    fn output_length(&self, input_length: usize) -> usize {
        (input_length - self.pool_length) / self.stride + 1
    }

    /// Flat offset of the winning element of one pooling window
    fn argmax(&self, input: &Tensor<f32>, window_start: usize, channels: usize) -> usize {
        (0..self.pool_length)
            .map(|k| window_start + k * channels)
            .fold(window_start, |best, idx| {
                if input.data[idx] > input.data[best] {
                    idx
                } else {
                    best
                }
            })
    }

    pub(crate) fn forward(&self, input: &Tensor<f32>) -> Tensor<f32> {
        let (batch, length, channels) = (input.dims()[0], input.dims()[1], input.dims()[2]);
        let out_len = self.output_length(length);

        let mut output = Tensor::zeros(Shape::new(vec![batch, out_len, channels]));
        for b in 0..batch {
            for t in 0..out_len {
                for c in 0..channels {
                    let start = (b * length + t * self.stride) * channels + c;
                    output.data[(b * out_len + t) * channels + c] = match self.kind {
                        PoolKind::Max => input.data[self.argmax(input, start, channels)],
                        PoolKind::Average => {
                            (0..self.pool_length)
                                .map(|k| input.data[start + k * channels])
                                .sum::<f32>()
                                / self.pool_length as f32
                        }
                    };
                }
            }
        }
        output
    }

    /// Max pooling routes each multiplier to the arg-max of the actual input,
    /// average pooling spreads it evenly over the window.
    pub(crate) fn multipliers(
        &self,
        multiplier: &Tensor<f32>,
        input_actual: &Tensor<f32>,
        mode: MaxPoolMxtsMode,
    ) -> Vec<Tensor<f32>> {
        let (batch, length, channels) = (
            input_actual.dims()[0],
            input_actual.dims()[1],
            input_actual.dims()[2],
        );
        let out_len = multiplier.dims()[1];

        let mut result = Tensor::zeros(input_actual.shape().clone());
        for b in 0..batch {
            for t in 0..out_len {
                for c in 0..channels {
                    let m = multiplier.data[(b * out_len + t) * channels + c];
                    let start = (b * length + t * self.stride) * channels + c;
                    match (self.kind, mode) {
                        (PoolKind::Max, MaxPoolMxtsMode::Gradient) => {
                            result.data[self.argmax(input_actual, start, channels)] += m;
                        }
                        (PoolKind::Average, _) => {
                            let share = m / self.pool_length as f32;
                            for k in 0..self.pool_length {
                                result.data[start + k * channels] += share;
                            }
                        }
                    }
                }
            }
        }
        vec![result]
    }
}
