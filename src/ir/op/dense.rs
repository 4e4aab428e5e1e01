use crate::error::{DeepLiftError, Result};
use crate::ir::op::einsum::einsum;
use crate::tensor::{Shape, Tensor};

/// Fully connected layer, `y = x · W + b` with `W` laid out `[in, out]`
#[derive(Debug, Clone, PartialEq)]
pub struct DenseOp {
    pub(crate) weights: Tensor<f32>,
    pub(crate) bias: Vec<f32>,
}

impl DenseOp {
    pub fn new(weights: Tensor<f32>, bias: Vec<f32>) -> Result<Self> {
        if weights.shape().rank() != 2 {
            return Err(DeepLiftError::Structural(format!(
                "dense weights must be rank 2, got {:?}",
                weights.dims()
            )));
        }
        if bias.len() != weights.dims()[1] {
            return Err(DeepLiftError::shape_mismatch(
                "dense bias",
                &[weights.dims()[1]],
                &[bias.len()],
            ));
        }
        Ok(Self { weights, bias })
    }

    pub fn input_dim(&self) -> usize {
        self.weights.dims()[0]
    }

    pub fn output_dim(&self) -> usize {
        self.weights.dims()[1]
    }

    pub(crate) fn output_shape(&self, name: &str, parents: &[&Shape]) -> Result<Shape> {
        let [parent] = parents else {
            return Err(DeepLiftError::Structural(format!(
                "dense '{}' needs exactly one parent",
                name
            )));
        };
        if parent.dims() != [self.input_dim()] {
            return Err(DeepLiftError::Structural(format!(
                "dense '{}' expects a flat input of width {}, parent produces {:?}",
                name,
                self.input_dim(),
                parent.dims()
            )));
        }
        Ok(Shape::new(vec![self.output_dim()]))
    }

    pub(crate) fn forward(&self, input: &Tensor<f32>) -> Result<Tensor<f32>> {
        let mut output = einsum("bi,io->bo", &[input, &self.weights])?;
        let width = self.output_dim();
        for row in output.data.chunks_mut(width) {
            for (value, bias) in row.iter_mut().zip(self.bias.iter()) {
                *value += bias;
            }
        }
        Ok(output)
    }

    /// Chain rule through the linear map: `m_x = m_y · Wᵀ`
    pub(crate) fn multipliers(&self, multiplier: &Tensor<f32>) -> Result<Vec<Tensor<f32>>> {
        Ok(vec![einsum("bo,io->bi", &[multiplier, &self.weights])?])
    }
}
