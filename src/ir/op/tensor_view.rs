use crate::error::{DeepLiftError, Result};
use crate::tensor::{Shape, Tensor};

/// Graph entry and exit points. Inputs carry the declared per-sample shape,
/// outputs pass their single parent through unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorViewOp {
    pub(crate) view: ViewType,
    pub(crate) shape: Option<Shape>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewType {
    Input,
    Output,
}

impl TensorViewOp {
    pub fn input(dims: Vec<usize>) -> Self {
        Self {
            view: ViewType::Input,
            shape: Some(Shape::new(dims)),
        }
    }

    pub fn output() -> Self {
        Self {
            view: ViewType::Output,
            shape: None,
        }
    }

    pub(crate) fn output_shape(&self, name: &str, parents: &[&Shape]) -> Result<Shape> {
        match (self.view, &self.shape) {
            (ViewType::Input, Some(shape)) if parents.is_empty() => Ok(shape.clone()),
            (ViewType::Input, _) => Err(DeepLiftError::Structural(format!(
                "input '{}' must declare a shape and have no parents",
                name
            ))),
            (ViewType::Output, _) => match parents {
                [parent] => Ok((*parent).clone()),
                _ => Err(DeepLiftError::Structural(format!(
                    "output '{}' needs exactly one parent, got {}",
                    name,
                    parents.len()
                ))),
            },
        }
    }

    pub(crate) fn forward(&self, name: &str, inputs: &[&Tensor<f32>]) -> Result<Tensor<f32>> {
        match (self.view, inputs) {
            (ViewType::Output, [parent]) => Ok((*parent).clone()),
            _ => Err(DeepLiftError::UnsupportedNodeKind(format!(
                "input '{}' has no forward rule; its batch is supplied by the caller",
                name
            ))),
        }
    }

    pub(crate) fn multipliers(&self, multiplier: &Tensor<f32>) -> Vec<Tensor<f32>> {
        match self.view {
            ViewType::Input => vec![],
            ViewType::Output => vec![multiplier.clone()],
        }
    }
}
