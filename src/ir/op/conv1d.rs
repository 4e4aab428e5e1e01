use crate::error::{DeepLiftError, Result};
use crate::tensor::{Shape, Tensor};

/// Valid-padding 1-D convolution over `[length, channels]` samples.
///
/// The kernel is laid out `[kernel_width, in_channels, out_channels]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Conv1dOp {
    pub(crate) kernel: Tensor<f32>,
    pub(crate) bias: Vec<f32>,
    pub(crate) stride: usize,
}

impl Conv1dOp {
    pub fn new(kernel: Tensor<f32>, bias: Vec<f32>, stride: usize) -> Result<Self> {
        if kernel.shape().rank() != 3 {
            return Err(DeepLiftError::Structural(format!(
                "conv1d kernel must be rank 3, got {:?}",
                kernel.dims()
            )));
        }
        if stride == 0 {
            return Err(DeepLiftError::Structural("conv1d stride must be positive".into()));
        }
        if bias.len() != kernel.dims()[2] {
            return Err(DeepLiftError::shape_mismatch(
                "conv1d bias",
                &[kernel.dims()[2]],
                &[bias.len()],
            ));
        }
        Ok(Self {
            kernel,
            bias,
            stride,
        })
    }

    fn kernel_width(&self) -> usize {
        self.kernel.dims()[0]
    }

    fn in_channels(&self) -> usize {
        self.kernel.dims()[1]
    }

    fn out_channels(&self) -> usize {
        self.kernel.dims()[2]
    }

    fn output_length(&self, input_length: usize) -> usize {
        (input_length - self.kernel_width()) / self.stride + 1
    }

    pub(crate) fn output_shape(&self, name: &str, parents: &[&Shape]) -> Result<Shape> {
        let [parent] = parents else {
            return Err(DeepLiftError::Structural(format!(
                "conv1d '{}' needs exactly one parent",
                name
            )));
        };
        match parent.dims() {
            &[length, channels]
                if channels == self.in_channels() && length >= self.kernel_width() =>
            {
                Ok(Shape::new(vec![self.output_length(length), self.out_channels()]))
            }
            dims => Err(DeepLiftError::Structural(format!(
                "conv1d '{}' with kernel {:?} cannot consume input of shape {:?}",
                name,
                self.kernel.dims(),
                dims
            ))),
        }
    }

    pub(crate) fn forward(&self, input: &Tensor<f32>) -> Tensor<f32> {
        let (batch, length) = (input.dims()[0], input.dims()[1]);
        let (width, cin, cout) = (self.kernel_width(), self.in_channels(), self.out_channels());
        let out_len = self.output_length(length);

        let mut output = Tensor::zeros(Shape::new(vec![batch, out_len, cout]));
        for b in 0..batch {
            for t in 0..out_len {
                for o in 0..cout {
                    let mut acc = self.bias[o];
                    for k in 0..width {
                        let row = (b * length + t * self.stride + k) * cin;
                        for c in 0..cin {
                            acc += input.data[row + c] * self.kernel.data[(k * cin + c) * cout + o];
                        }
                    }
                    output.data[(b * out_len + t) * cout + o] = acc;
                }
            }
        }
        output
    }

    /// Transposed convolution of the incoming multiplier
    pub(crate) fn multipliers(
        &self,
        multiplier: &Tensor<f32>,
        input: &Tensor<f32>,
    ) -> Vec<Tensor<f32>> {
        let (batch, length) = (input.dims()[0], input.dims()[1]);
        let (width, cin, cout) = (self.kernel_width(), self.in_channels(), self.out_channels());
        let out_len = multiplier.dims()[1];

        let mut result = Tensor::zeros(input.shape().clone());
        for b in 0..batch {
            for t in 0..out_len {
                for o in 0..cout {
                    let m = multiplier.data[(b * out_len + t) * cout + o];
                    if m == 0.0 {
                        continue;
                    }
                    for k in 0..width {
                        let row = (b * length + t * self.stride + k) * cin;
                        for c in 0..cin {
                            result.data[row + c] += m * self.kernel.data[(k * cin + c) * cout + o];
                        }
                    }
                }
            }
        }
        vec![result]
    }
}
