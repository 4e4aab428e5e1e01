//! Forward evaluation of actual and reference activations.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{DeepLiftError, Result};
use crate::ir::op::NodeKind;
use crate::ir::{Graph, NodeId};
use crate::tensor::Tensor;

/// Batched tensors keyed by node name
pub type TensorMap = HashMap<String, Tensor<f32>>;

/// Actual and reference activations of every node for one batch
#[derive(Debug, Clone)]
pub struct ActivationRecord {
    actual: Vec<Tensor<f32>>,
    reference: Vec<Tensor<f32>>,
    batch_size: usize,
}

impl ActivationRecord {
    pub fn actual(&self, id: NodeId) -> &Tensor<f32> {
        &self.actual[id]
    }

    pub fn reference(&self, id: NodeId) -> &Tensor<f32> {
        &self.reference[id]
    }

    /// `actual - reference` for one node
    pub fn difference(&self, id: NodeId) -> Tensor<f32> {
        self.actual[id].sub(&self.reference[id])
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

/// Runs inputs and references through the graph in one topological pass.
///
/// References flow through exactly the same node functions as the actual
/// inputs.
pub fn forward(
    graph: &Graph,
    inputs: &TensorMap,
    references: &TensorMap,
) -> Result<ActivationRecord> {
    let batch_size = validate_batches(graph, &[inputs, references])?;
    let mut streams = evaluate(graph, &[inputs, references])?;
    let reference = streams.pop().unwrap_or_default();
    let actual = streams.pop().unwrap_or_default();
    Ok(ActivationRecord {
        actual,
        reference,
        batch_size,
    })
}

/// Forward pass of the actual inputs only
pub(crate) fn forward_actual(graph: &Graph, inputs: &TensorMap) -> Result<Vec<Tensor<f32>>> {
    validate_batches(graph, &[inputs])?;
    Ok(evaluate(graph, &[inputs])?.pop().unwrap_or_default())
}

/// Checks that every batch covers exactly the graph inputs with matching
/// per-sample shapes and one shared batch size, which is returned.
pub(crate) fn validate_batches(graph: &Graph, batches: &[&TensorMap]) -> Result<usize> {
    let mut batch_size: Option<usize> = None;

    for batch in batches {
        for name in batch.keys() {
            let node = graph.get_node(name)?;
            if node.kind() != NodeKind::Input {
                return Err(DeepLiftError::NotFound(format!(
                    "'{}' is a {} node, not a graph input",
                    name,
                    node.kind()
                )));
            }
        }

        for &id in graph.inputs() {
            let node = graph.node(id);
            let tensor = batch
                .get(node.name())
                .ok_or_else(|| DeepLiftError::MissingInput(node.name().to_string()))?;

            let per_sample = &tensor.dims()[tensor.dims().len().min(1)..];
            if tensor.dims().is_empty() || per_sample != node.shape().dims() {
                return Err(DeepLiftError::shape_mismatch(
                    format!("per-sample shape of input '{}'", node.name()),
                    node.shape().dims(),
                    per_sample,
                ));
            }

            match batch_size {
                None => batch_size = Some(tensor.batch_size()),
                Some(expected) if expected != tensor.batch_size() => {
                    return Err(DeepLiftError::shape_mismatch(
                        format!("batch size of input '{}'", node.name()),
                        &[expected],
                        &[tensor.batch_size()],
                    ));
                }
                Some(_) => {}
            }
        }
    }

    Ok(batch_size.unwrap_or(0))
}

/// One topological pass evaluating every stream side by side
fn evaluate(graph: &Graph, batches: &[&TensorMap]) -> Result<Vec<Vec<Tensor<f32>>>> {
    let node_count = graph.nodes().len();
    let mut slots: Vec<Vec<Option<Tensor<f32>>>> = vec![vec![None; node_count]; batches.len()];

    for &id in graph.topological_order() {
        let node = graph.node(id);
        for (stream, batch) in slots.iter_mut().zip(batches.iter()) {
            let value = if node.kind() == NodeKind::Input {
                batch
                    .get(node.name())
                    .cloned()
                    .ok_or_else(|| DeepLiftError::MissingInput(node.name().to_string()))?
            } else {
                let parents = node
                    .parents()
                    .iter()
                    .map(|&p| {
                        stream[p].as_ref().ok_or_else(|| {
                            DeepLiftError::Structural(format!(
                                "parent of '{}' evaluated out of order",
                                node.name()
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                node.op().forward(node.name(), &parents)?
            };
            stream[id] = Some(value);
        }
        debug!("forward '{}' done", node.name());
    }

    Ok(slots
        .into_iter()
        .map(|stream| stream.into_iter().flatten().collect())
        .collect())
}
