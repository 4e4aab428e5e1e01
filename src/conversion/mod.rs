//! Import of trained network descriptions.
//!
//! A [`TrainedNetwork`] is a schema version plus an opaque JSON body. The
//! version is resolved once into a [`SchemaVersion`] and the body is then
//! deserialised by the matching format module and lowered to
//! [`LayerSpec`]s for [`Graph::build`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::PropagationConfig;
use crate::error::{DeepLiftError, Result};
use crate::ir::op::{ActivationFn, ActivationOp, NodeOp};
use crate::ir::{Graph, LayerSpec};
use crate::tensor::Tensor;

pub mod functional;
pub mod legacy;

/// Serialized trained network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedNetwork {
    pub schema_version: String,
    pub body: serde_json::Value,
}

impl TrainedNetwork {
    pub fn new(schema_version: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            schema_version: schema_version.into(),
            body,
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Description formats understood by [`convert`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaVersion {
    /// `0.x`: explicit inputs / nodes / outputs with merge-mode nodes
    LegacyGraph,
    /// `1.x` and `2.x`: layer list with inbound node references
    Functional,
}

impl SchemaVersion {
    pub fn resolve(version: &str) -> Result<Self> {
        let major = version.split('.').next().unwrap_or_default();
        match major {
            "0" => Ok(SchemaVersion::LegacyGraph),
            "1" | "2" => Ok(SchemaVersion::Functional),
            _ => Err(DeepLiftError::UnsupportedSchemaVersion(version.to_string())),
        }
    }
}

/// Builds the graph described by `network`.
///
/// Fused layer activations become separate `<layer>_act` nodes, so scores
/// can be requested either before or after the nonlinearity.
pub fn convert(network: &TrainedNetwork, config: PropagationConfig) -> Result<Graph> {
    let version = SchemaVersion::resolve(&network.schema_version)?;
    let body = network.body.clone();
    let specs = match version {
        SchemaVersion::LegacyGraph => legacy::lower(serde_json::from_value(body)?)?,
        SchemaVersion::Functional => functional::lower(serde_json::from_value(body)?)?,
    };
    info!(
        "Converted {:?} network (schema {}) into {} layer(s)",
        version,
        network.schema_version,
        specs.len()
    );
    Graph::build(specs, config)
}

/// Dense array as stored in a network description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightArray {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl WeightArray {
    pub(crate) fn into_tensor(self) -> Result<Tensor<f32>> {
        Tensor::from_vec(self.data, self.shape)
    }

    pub(crate) fn into_vector(self, layer: &str) -> Result<Vec<f32>> {
        if self.shape.len() != 1 || self.shape[0] != self.data.len() {
            return Err(DeepLiftError::Structural(format!(
                "bias of '{}' must be a vector, got shape {:?}",
                layer, self.shape
            )));
        }
        Ok(self.data)
    }
}

/// Kernel and bias of a parametrised layer. A missing bias is all zeros.
pub(crate) fn kernel_and_bias(
    layer: &str,
    weights: Vec<WeightArray>,
    out_dim: impl Fn(&Tensor<f32>) -> usize,
) -> Result<(Tensor<f32>, Vec<f32>)> {
    let mut weights = weights.into_iter();
    let kernel = weights
        .next()
        .ok_or_else(|| DeepLiftError::Structural(format!("layer '{}' has no kernel", layer)))?
        .into_tensor()?;
    let bias = match weights.next() {
        Some(bias) => bias.into_vector(layer)?,
        None => vec![0.0; out_dim(&kernel)],
    };
    Ok((kernel, bias))
}

pub(crate) fn check_padding(layer: &str, padding: Option<&str>) -> Result<()> {
    match padding {
        None | Some("valid") => Ok(()),
        Some(other) => Err(DeepLiftError::UnsupportedNodeKind(format!(
            "padding '{}' on layer '{}'",
            other, layer
        ))),
    }
}

pub(crate) fn check_declared(
    layer: &str,
    what: &str,
    declared: Option<usize>,
    actual: usize,
) -> Result<()> {
    match declared {
        Some(declared) if declared != actual => Err(DeepLiftError::Structural(format!(
            "layer '{}' declares {} {} but its weights have {}",
            layer, what, declared, actual
        ))),
        _ => Ok(()),
    }
}

/// Layer specs under construction, with the per-sample rank of every layer
/// pushed so far so that negative axes can be resolved.
///
/// A layer with a fused activation is referred to by its own name in the
/// description but consumers must read the activated `<layer>_act` node;
/// `aliases` holds that redirection.
#[derive(Debug, Default)]
pub(crate) struct Lowering {
    specs: Vec<LayerSpec>,
    ranks: HashMap<String, usize>,
    aliases: HashMap<String, String>,
}

impl Lowering {
    pub(crate) fn push(&mut self, name: &str, op: NodeOp, parents: &[&str], rank: usize) {
        self.ranks.insert(name.to_string(), rank);
        self.specs.push(LayerSpec::new(name, op, parents));
    }

    /// Pushes `op` and, for a non-linear fused activation, a following
    /// `<name>_act` node. Returns the name downstream layers should read from.
    pub(crate) fn push_activated(
        &mut self,
        name: &str,
        op: NodeOp,
        parents: &[&str],
        rank: usize,
        activation: Option<&str>,
    ) -> Result<String> {
        self.push(name, op, parents, rank);
        match activation {
            None | Some("linear") => Ok(name.to_string()),
            Some(function) => {
                let act_name = format!("{}_act", name);
                let op = NodeOp::Activation(ActivationOp::new(ActivationFn::from_name(function)?));
                self.push(&act_name, op, &[name], rank);
                self.aliases.insert(name.to_string(), act_name.clone());
                Ok(act_name)
            }
        }
    }

    /// Node a reference to layer `name` reads from
    pub(crate) fn resolve(&self, name: &str) -> String {
        self.aliases
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.ranks.contains_key(name)
    }

    pub(crate) fn rank(&self, name: &str) -> Result<usize> {
        self.ranks
            .get(name)
            .copied()
            .ok_or_else(|| {
                DeepLiftError::Structural(format!("reference to undefined layer '{}'", name))
            })
    }

    /// Resolves a concat axis counted with the batch axis (negative from the
    /// end) into a per-sample axis.
    pub(crate) fn concat_axis(&self, layer: &str, parents: &[&str], axis: i64) -> Result<usize> {
        let first = parents
            .first()
            .ok_or_else(|| DeepLiftError::Structural(format!("concat '{}' has no inputs", layer)))?;
        let full_rank = self.rank(first)? as i64 + 1;
        let resolved = if axis < 0 { full_rank + axis } else { axis };
        if resolved < 1 || resolved >= full_rank {
            return Err(DeepLiftError::Structural(format!(
                "concat axis {} of '{}' is out of range for rank {} inputs",
                axis, layer, full_rank
            )));
        }
        Ok(resolved as usize - 1)
    }

    pub(crate) fn finish(self) -> Vec<LayerSpec> {
        self.specs
    }
}

/// The single parent of a layer that takes one input
pub(crate) fn single_parent<'a>(layer: &str, parents: &[&'a str]) -> Result<&'a str> {
    match parents {
        [parent] => Ok(*parent),
        _ => Err(DeepLiftError::Structural(format!(
            "layer '{}' expects one input, got {}",
            layer,
            parents.len()
        ))),
    }
}

/// Size of `axis` of a weight tensor, zero when the tensor is too small
pub(crate) fn dim(kernel: &Tensor<f32>, axis: usize) -> usize {
    kernel.dims().get(axis).copied().unwrap_or(0)
}

/// `[out, in, k]` kernel reordered to `[k, in, out]`
pub(crate) fn channels_first_kernel(kernel: &Tensor<f32>) -> Result<Tensor<f32>> {
    if kernel.shape().rank() != 3 {
        return Err(DeepLiftError::Structural(format!(
            "conv kernel must be rank 3, got {:?}",
            kernel.dims()
        )));
    }
    let (out_channels, in_channels, width) = (kernel.dims()[0], kernel.dims()[1], kernel.dims()[2]);
    let mut data = Vec::with_capacity(kernel.data().len());
    for k in 0..width {
        for c in 0..in_channels {
            for o in 0..out_channels {
                data.push(*kernel.get(&[o, c, k]));
            }
        }
    }
    Tensor::from_vec(data, vec![width, in_channels, out_channels])
}
