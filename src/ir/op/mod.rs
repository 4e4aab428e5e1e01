//! Node kinds and their forward / multiplier rules.
//!
//! Every kind is a variant of the closed [`NodeOp`] sum type; the `match`
//! tables in this module are the single place where kinds are dispatched.

use std::fmt;

use crate::config::PropagationConfig;
use crate::error::Result;
use crate::tensor::{Shape, Tensor};

pub mod activation;
pub mod concat;
pub mod conv1d;
pub mod dense;
pub(crate) mod einsum;
pub mod flatten;
pub mod pool1d;
pub mod tensor_view;

pub use activation::{ActivationFn, ActivationOp};
pub use concat::ConcatOp;
pub use conv1d::Conv1dOp;
pub use dense::DenseOp;
pub use flatten::FlattenOp;
pub use pool1d::{Pool1dOp, PoolKind};
pub use tensor_view::{TensorViewOp, ViewType};

#[derive(Debug, Clone, PartialEq)]
pub enum NodeOp {
    TensorView(TensorViewOp),
    Conv1d(Conv1dOp),
    Pool1d(Pool1dOp),
    Dense(DenseOp),
    Activation(ActivationOp),
    Concat(ConcatOp),
    Flatten(FlattenOp),
}

/// Coarse node classification, mostly for logging and error messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Input,
    Output,
    Conv1d,
    Pool1d,
    Dense,
    Activation,
    Concat,
    Flatten,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Tensors a multiplier rule may read for one node
pub(crate) struct RuleInputs<'a> {
    pub(crate) name: &'a str,
    /// Incoming multiplier of the node itself
    pub(crate) multiplier: &'a Tensor<f32>,
    pub(crate) actual: &'a Tensor<f32>,
    pub(crate) reference: &'a Tensor<f32>,
    pub(crate) parents_actual: Vec<&'a Tensor<f32>>,
    pub(crate) parents_reference: Vec<&'a Tensor<f32>>,
    pub(crate) config: &'a PropagationConfig,
}

impl NodeOp {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeOp::TensorView(op) => match op.view {
                ViewType::Input => NodeKind::Input,
                ViewType::Output => NodeKind::Output,
            },
            NodeOp::Conv1d(_) => NodeKind::Conv1d,
            NodeOp::Pool1d(_) => NodeKind::Pool1d,
            NodeOp::Dense(_) => NodeKind::Dense,
            NodeOp::Activation(_) => NodeKind::Activation,
            NodeOp::Concat(_) => NodeKind::Concat,
            NodeOp::Flatten(_) => NodeKind::Flatten,
        }
    }

    /// Per-sample output shape given the per-sample shapes of the parents
    pub(crate) fn output_shape(&self, name: &str, parents: &[&Shape]) -> Result<Shape> {
        match self {
            NodeOp::TensorView(op) => op.output_shape(name, parents),
            NodeOp::Conv1d(op) => op.output_shape(name, parents),
            NodeOp::Pool1d(op) => op.output_shape(name, parents),
            NodeOp::Dense(op) => op.output_shape(name, parents),
            NodeOp::Activation(op) => op.output_shape(name, parents),
            NodeOp::Concat(op) => op.output_shape(name, parents),
            NodeOp::Flatten(op) => op.output_shape(name, parents),
        }
    }

    /// Batched forward evaluation. Parent shapes were validated when the
    /// graph was built.
    pub(crate) fn forward(&self, name: &str, inputs: &[&Tensor<f32>]) -> Result<Tensor<f32>> {
        match self {
            NodeOp::TensorView(op) => op.forward(name, inputs),
            NodeOp::Conv1d(op) => Ok(op.forward(inputs[0])),
            NodeOp::Pool1d(op) => Ok(op.forward(inputs[0])),
            NodeOp::Dense(op) => op.forward(inputs[0]),
            NodeOp::Activation(op) => Ok(op.forward(inputs[0])),
            NodeOp::Concat(op) => Ok(op.forward(inputs)),
            NodeOp::Flatten(op) => Ok(op.forward(inputs[0])),
        }
    }

    /// Multipliers of each parent, in parent order
    pub(crate) fn multipliers(&self, rule: &RuleInputs<'_>) -> Result<Vec<Tensor<f32>>> {
        tracing::trace!("multiplier rule {} for '{}'", self.kind(), rule.name);
        let m = rule.multiplier;
        let parents = &rule.parents_actual;
        match self {
            NodeOp::TensorView(op) => Ok(op.multipliers(m)),
            NodeOp::Conv1d(op) => Ok(op.multipliers(m, parents[0])),
            NodeOp::Pool1d(op) => Ok(op.multipliers(m, parents[0], rule.config.maxpool_mxts_mode)),
            NodeOp::Dense(op) => op.multipliers(m),
            NodeOp::Activation(op) => Ok(op.multipliers(
                m,
                parents[0],
                rule.parents_reference[0],
                rule.actual,
                rule.reference,
                rule.config,
            )),
            NodeOp::Concat(op) => Ok(op.multipliers(m, parents)),
            NodeOp::Flatten(op) => Ok(op.multipliers(m, parents[0])),
        }
    }
}
