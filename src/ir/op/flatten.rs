use crate::error::{DeepLiftError, Result};
use crate::tensor::{Shape, Tensor};

/// Collapses every per-sample axis into one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlattenOp;

impl FlattenOp {
    pub(crate) fn output_shape(&self, name: &str, parents: &[&Shape]) -> Result<Shape> {
        match parents {
            [parent] => Ok(Shape::new(vec![parent.volume()])),
            _ => Err(DeepLiftError::Structural(format!(
                "flatten '{}' needs exactly one parent",
                name
            ))),
        }
    }

    pub(crate) fn forward(&self, input: &Tensor<f32>) -> Tensor<f32> {
        let batch = input.batch_size();
        let width = input.shape().without_batch().volume();
        input.clone().reshape(Shape::new(vec![batch, width]))
    }

    pub(crate) fn multipliers(
        &self,
        multiplier: &Tensor<f32>,
        input: &Tensor<f32>,
    ) -> Vec<Tensor<f32>> {
        vec![multiplier.clone().reshape(input.shape().clone())]
    }
}
