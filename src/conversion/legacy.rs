//! `0.x` graph descriptions: named inputs, nodes fed by `input` or by
//! several `inputs` merged first, and named outputs.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    channels_first_kernel, check_declared, check_padding, dim, kernel_and_bias, Lowering,
    WeightArray,
};
use crate::error::{DeepLiftError, Result};
use crate::ir::op::{
    ActivationFn, ActivationOp, ConcatOp, Conv1dOp, DenseOp, FlattenOp, NodeOp, Pool1dOp, PoolKind,
    TensorViewOp,
};
use crate::ir::LayerSpec;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyGraph {
    pub inputs: Vec<LegacyInput>,
    #[serde(default)]
    pub nodes: Vec<LegacyNode>,
    #[serde(default)]
    pub outputs: Vec<LegacyOutput>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyInput {
    pub name: String,
    /// Per-sample shape
    pub shape: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyNode {
    pub name: String,
    pub class_name: String,
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub merge_mode: Option<String>,
    /// Counted including the batch axis
    #[serde(default)]
    pub concat_axis: Option<i64>,
    #[serde(default)]
    pub config: LegacyLayerConfig,
    #[serde(default)]
    pub weights: Vec<WeightArray>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LegacyLayerConfig {
    pub nb_filter: Option<usize>,
    pub filter_length: Option<usize>,
    pub subsample_length: Option<usize>,
    pub pool_length: Option<usize>,
    pub stride: Option<usize>,
    pub output_dim: Option<usize>,
    pub activation: Option<String>,
    pub border_mode: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyOutput {
    pub name: String,
    pub input: String,
}

pub(crate) fn lower(graph: LegacyGraph) -> Result<Vec<LayerSpec>> {
    let mut lowering = Lowering::default();

    for input in &graph.inputs {
        let rank = input.shape.len();
        lowering.push(
            &input.name,
            NodeOp::TensorView(TensorViewOp::input(input.shape.clone())),
            &[],
            rank,
        );
    }

    for node in graph.nodes {
        let source = merged_input(&mut lowering, &node)?;
        debug!("lowering {} '{}' from '{}'", node.class_name, node.name, source);
        lower_node(&mut lowering, node, &source)?;
    }

    for output in &graph.outputs {
        let input = lowering.resolve(&output.input);
        let rank = lowering.rank(&input)?;
        lowering.push(
            &output.name,
            NodeOp::TensorView(TensorViewOp::output()),
            &[input.as_str()],
            rank,
        );
    }

    Ok(lowering.finish())
}

/// Name of the tensor a node reads, inserting a `<node>_merge` concat when
/// the node has several inputs.
fn merged_input(lowering: &mut Lowering, node: &LegacyNode) -> Result<String> {
    match (&node.input, node.inputs.as_slice()) {
        (Some(input), []) | (None, [input]) => Ok(lowering.resolve(input)),
        (None, inputs) if inputs.len() > 1 => {
            let mode = node.merge_mode.as_deref().unwrap_or("concat");
            if mode != "concat" {
                return Err(DeepLiftError::UnsupportedNodeKind(format!(
                    "merge mode '{}' on node '{}'",
                    mode, node.name
                )));
            }
            let resolved = inputs.iter().map(|i| lowering.resolve(i)).collect::<Vec<_>>();
            let parents = resolved.iter().map(String::as_str).collect::<Vec<_>>();
            let axis = lowering.concat_axis(&node.name, &parents, node.concat_axis.unwrap_or(-1))?;
            let rank = lowering.rank(parents[0])?;
            let merge_name = format!("{}_merge", node.name);
            lowering.push(&merge_name, NodeOp::Concat(ConcatOp::new(axis)), &parents, rank);
            Ok(merge_name)
        }
        _ => Err(DeepLiftError::Structural(format!(
            "node '{}' needs either `input` or a non-empty `inputs`",
            node.name
        ))),
    }
}

fn lower_node(lowering: &mut Lowering, node: LegacyNode, source: &str) -> Result<()> {
    let name = node.name.as_str();
    let config = &node.config;
    let parents = [source];
    let activation = config.activation.as_deref();

    match node.class_name.as_str() {
        "Convolution1D" => {
            check_padding(name, config.border_mode.as_deref())?;
            let (kernel, bias) = kernel_and_bias(name, node.weights, |k| dim(k, 0))?;
            let kernel = channels_first_kernel(&kernel)?;
            check_declared(name, "nb_filter", config.nb_filter, dim(&kernel, 2))?;
            check_declared(name, "filter_length", config.filter_length, dim(&kernel, 0))?;
            let op = Conv1dOp::new(kernel, bias, config.subsample_length.unwrap_or(1))?;
            lowering.push_activated(name, NodeOp::Conv1d(op), &parents, 2, activation)?;
        }
        "MaxPooling1D" | "AveragePooling1D" => {
            check_padding(name, config.border_mode.as_deref())?;
            let kind = if node.class_name == "MaxPooling1D" {
                PoolKind::Max
            } else {
                PoolKind::Average
            };
            let pool_length = config.pool_length.unwrap_or(2);
            let op = Pool1dOp::new(kind, pool_length, config.stride.unwrap_or(pool_length))?;
            lowering.push(name, NodeOp::Pool1d(op), &parents, 2);
        }
        "Dense" => {
            let (weights, bias) = kernel_and_bias(name, node.weights, |w| dim(w, 1))?;
            check_declared(name, "output_dim", config.output_dim, dim(&weights, 1))?;
            let op = DenseOp::new(weights, bias)?;
            lowering.push_activated(name, NodeOp::Dense(op), &parents, 1, activation)?;
        }
        "Activation" => {
            let function = activation.ok_or_else(|| {
                DeepLiftError::Structural(format!("activation node '{}' names no function", name))
            })?;
            let rank = lowering.rank(source)?;
            let op = ActivationOp::new(ActivationFn::from_name(function)?);
            lowering.push(name, NodeOp::Activation(op), &parents, rank);
        }
        "Flatten" => lowering.push(name, NodeOp::Flatten(FlattenOp), &parents, 1),
        other => {
            return Err(DeepLiftError::UnsupportedNodeKind(format!(
                "layer class '{}' of node '{}'",
                other, name
            )))
        }
    }
    Ok(())
}
