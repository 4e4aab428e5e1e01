use crate::error::{DeepLiftError, Result};
use crate::tensor::{Shape, Tensor};

/// Joins parents along a per-sample `axis` (the batch axis is not counted)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcatOp {
    pub(crate) axis: usize,
}

impl ConcatOp {
    pub fn new(axis: usize) -> Self {
        Self { axis }
    }

    pub fn axis(&self) -> usize {
        self.axis
    }

    pub(crate) fn output_shape(&self, name: &str, parents: &[&Shape]) -> Result<Shape> {
        let Some(first) = parents.first() else {
            return Err(DeepLiftError::Structural(format!(
                "concat '{}' has no parents",
                name
            )));
        };
        if self.axis >= first.rank() {
            return Err(DeepLiftError::Structural(format!(
                "concat '{}' axis {} out of range for rank {}",
                name,
                self.axis,
                first.rank()
            )));
        }

        let mut dims = first.dims().to_vec();
        dims[self.axis] = 0;
        for parent in parents {
            let compatible = parent.rank() == first.rank()
                && parent
                    .dims()
                    .iter()
                    .zip(first.dims())
                    .enumerate()
                    .all(|(axis, (a, b))| axis == self.axis || a == b);
            if !compatible {
                return Err(DeepLiftError::Structural(format!(
                    "concat '{}' along axis {}: parent shapes {:?} and {:?} are incompatible",
                    name,
                    self.axis,
                    first.dims(),
                    parent.dims()
                )));
            }
            dims[self.axis] += parent.dims()[self.axis];
        }
        Ok(Shape::new(dims))
    }

    pub(crate) fn forward(&self, inputs: &[&Tensor<f32>]) -> Tensor<f32> {
        Tensor::concat(inputs, self.axis + 1)
    }

    /// Slices the multiplier back into each parent's span of the concat axis
    pub(crate) fn multipliers(
        &self,
        multiplier: &Tensor<f32>,
        inputs: &[&Tensor<f32>],
    ) -> Vec<Tensor<f32>> {
        let batched_axis = self.axis + 1;
        let mut offset = 0;
        inputs
            .iter()
            .map(|input| {
                let width = input.dims()[batched_axis];
                let slice = multiplier.slice_axis(batched_axis, offset, offset + width);
                offset += width;
                slice
            })
            .collect()
    }
}
