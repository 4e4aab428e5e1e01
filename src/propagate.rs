//! Backward multiplier propagation.
//!
//! Starting from a one-hot multiplier on the target node, multipliers are
//! pushed to parents in reverse topological order through each node kind's
//! rule, summing wherever a node feeds several children. Only nodes that lie
//! between a requested source and the target are visited.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{DeepLiftError, Result};
use crate::forward::{ActivationRecord, TensorMap};
use crate::ir::op::RuleInputs;
use crate::ir::{Graph, NodeId};
use crate::tensor::{Shape, Tensor};

/// What a scoring call returns for each source node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ScoreKind {
    /// `multiplier ⊙ (actual − reference)`
    #[default]
    Contributions,
    /// The raw multipliers
    Multipliers,
}

/// Contribution of each source node to `target`'s feature `task_index`.
///
/// A source that is not an ancestor of the target receives all-zero scores.
pub fn propagate(
    graph: &Graph,
    target_name: &str,
    task_index: usize,
    source_names: &[&str],
    record: &ActivationRecord,
) -> Result<TensorMap> {
    propagate_scores(
        graph,
        target_name,
        task_index,
        source_names,
        record,
        ScoreKind::Contributions,
    )
}

pub fn propagate_scores(
    graph: &Graph,
    target_name: &str,
    task_index: usize,
    source_names: &[&str],
    record: &ActivationRecord,
    kind: ScoreKind,
) -> Result<TensorMap> {
    let target = graph.node_id(target_name)?;
    let sources = source_names
        .iter()
        .map(|name| graph.node_id(name))
        .collect::<Result<Vec<_>>>()?;

    let features = graph.node(target).shape().volume();
    if task_index >= features {
        return Err(DeepLiftError::InvalidTask {
            target: target_name.to_string(),
            task_index,
            features,
        });
    }

    let multipliers = backward(graph, target, task_index, &sources, record)?;

    let mut result = TensorMap::with_capacity(sources.len());
    for (&source, name) in sources.iter().zip(source_names) {
        let multiplier = match &multipliers[source] {
            Some(m) => m.clone(),
            None => {
                warn!(
                    "source '{}' is not upstream of target '{}'; scores are zero",
                    name, target_name
                );
                Tensor::zeros(record.actual(source).shape().clone())
            }
        };
        let scores = match kind {
            ScoreKind::Multipliers => multiplier,
            ScoreKind::Contributions => multiplier.mul(&record.difference(source)),
        };
        result.insert(name.to_string(), scores);
    }
    Ok(result)
}

/// Multipliers of every node between the sources and the target
fn backward(
    graph: &Graph,
    target: NodeId,
    task_index: usize,
    sources: &[NodeId],
    record: &ActivationRecord,
) -> Result<Vec<Option<Tensor<f32>>>> {
    let upstream = graph.ancestors(target);
    let downstream = graph.descendants(sources);
    let active = upstream
        .iter()
        .zip(downstream.iter())
        .map(|(&up, &down)| up && down)
        .collect::<Vec<_>>();

    let mut multipliers: Vec<Option<Tensor<f32>>> = vec![None; graph.nodes().len()];
    if !active[target] {
        return Ok(multipliers);
    }
    multipliers[target] = Some(one_hot(
        record.batch_size(),
        graph.node(target).shape(),
        task_index,
    ));

    let mut visited = 0;
    for &id in graph.topological_order().iter().rev() {
        if !active[id] {
            continue;
        }
        let node = graph.node(id);
        if !node.parents().iter().any(|&p| active[p]) {
            continue;
        }
        // every child has already contributed, so this multiplier is final
        let Some(multiplier) = multipliers[id].take() else {
            continue;
        };

        let rule = RuleInputs {
            name: node.name(),
            multiplier: &multiplier,
            actual: record.actual(id),
            reference: record.reference(id),
            parents_actual: node.parents().iter().map(|&p| record.actual(p)).collect(),
            parents_reference: node.parents().iter().map(|&p| record.reference(p)).collect(),
            config: graph.config(),
        };
        let parent_multipliers = node.op().multipliers(&rule)?;

        for (&parent, parent_multiplier) in node.parents().iter().zip(parent_multipliers) {
            if !active[parent] {
                continue;
            }
            match multipliers[parent].as_mut() {
                Some(acc) => acc.add_assign(&parent_multiplier),
                None => multipliers[parent] = Some(parent_multiplier),
            }
        }
        multipliers[id] = Some(multiplier);
        visited += 1;
    }

    debug!(
        "propagated multipliers from '{}' task {} through {} node(s)",
        graph.node(target).name(),
        task_index,
        visited
    );
    Ok(multipliers)
}

/// Batched selector with a single 1 at flat feature `task_index` in every row
fn one_hot(batch_size: usize, shape: &Shape, task_index: usize) -> Tensor<f32> {
    let features = shape.volume();
    let mut seed = Tensor::zeros(shape.with_batch(batch_size));
    for row in seed.data.chunks_mut(features) {
        row[task_index] = 1.0;
    }
    seed
}
