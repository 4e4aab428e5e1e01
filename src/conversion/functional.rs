//! `1.x` / `2.x` functional model descriptions: a flat layer list where each
//! layer names the layers it is called on.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{
    check_declared, check_padding, dim, kernel_and_bias, single_parent, Lowering, WeightArray,
};
use crate::error::{DeepLiftError, Result};
use crate::ir::op::{
    ActivationFn, ActivationOp, ConcatOp, Conv1dOp, DenseOp, FlattenOp, NodeOp, Pool1dOp, PoolKind,
    TensorViewOp,
};
use crate::ir::LayerSpec;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionalModel {
    pub layers: Vec<FunctionalLayer>,
    /// `[layer_name, node_index, tensor_index]` triples
    #[serde(default)]
    pub output_layers: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionalLayer {
    pub class_name: String,
    pub name: String,
    #[serde(default)]
    pub config: FunctionalLayerConfig,
    /// One entry per call of the layer, each a list of
    /// `[layer_name, node_index, tensor_index, kwargs]`
    #[serde(default)]
    pub inbound_nodes: Vec<Vec<Vec<Value>>>,
    #[serde(default)]
    pub weights: Vec<WeightArray>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionalLayerConfig {
    #[serde(alias = "batch_shape")]
    pub batch_input_shape: Option<Vec<Option<usize>>>,
    pub filters: Option<usize>,
    pub kernel_size: Option<Window>,
    pub strides: Option<Window>,
    pub pool_size: Option<Window>,
    pub units: Option<usize>,
    pub activation: Option<String>,
    pub padding: Option<String>,
    /// Counted including the batch axis, negative from the end
    pub axis: Option<i64>,
}

/// 1-D window parameter, stored either bare or as a one-element list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Window {
    Scalar(usize),
    List(Vec<usize>),
}

impl Window {
    fn value(&self, layer: &str) -> Result<usize> {
        match self {
            Window::Scalar(v) => Ok(*v),
            Window::List(values) => match values.as_slice() {
                [v] => Ok(*v),
                _ => Err(DeepLiftError::Structural(format!(
                    "layer '{}' has a {}-d window, only 1-d layers are supported",
                    layer,
                    values.len()
                ))),
            },
        }
    }
}

fn window(layer: &str, window: &Option<Window>) -> Result<Option<usize>> {
    window.as_ref().map(|w| w.value(layer)).transpose()
}

/// Names of the layers a layer is called on
fn inbound_names(layer: &FunctionalLayer) -> Result<Vec<String>> {
    match layer.inbound_nodes.as_slice() {
        [] => Ok(vec![]),
        [call] => call
            .iter()
            .map(|entry| layer_reference(&layer.name, entry))
            .collect(),
        _ => Err(DeepLiftError::UnsupportedNodeKind(format!(
            "layer '{}' is shared across {} calls",
            layer.name,
            layer.inbound_nodes.len()
        ))),
    }
}

fn layer_reference(layer: &str, entry: &[Value]) -> Result<String> {
    entry
        .first()
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            DeepLiftError::Structural(format!("malformed inbound reference in layer '{}'", layer))
        })
}

pub(crate) fn lower(model: FunctionalModel) -> Result<Vec<LayerSpec>> {
    let mut lowering = Lowering::default();

    for layer in model.layers {
        let inbound = inbound_names(&layer)?
            .iter()
            .map(|name| lowering.resolve(name))
            .collect::<Vec<_>>();
        let parents = inbound.iter().map(String::as_str).collect::<Vec<_>>();
        debug!("lowering {} '{}' from {:?}", layer.class_name, layer.name, parents);
        lower_layer(&mut lowering, layer, &parents)?;
    }

    for entry in &model.output_layers {
        let name = layer_reference("output_layers", entry)?;
        if !lowering.contains(&name) {
            return Err(DeepLiftError::Structural(format!(
                "output layer '{}' is not defined",
                name
            )));
        }
        let output_name = format!("{}_output", name);
        if lowering.contains(&output_name) {
            return Err(DeepLiftError::Structural(format!(
                "output node '{}' clashes with an existing layer",
                output_name
            )));
        }
        let source = lowering.resolve(&name);
        let rank = lowering.rank(&source)?;
        let op = NodeOp::TensorView(TensorViewOp::output());
        lowering.push(&output_name, op, &[source.as_str()], rank);
    }

    Ok(lowering.finish())
}

fn lower_layer(lowering: &mut Lowering, layer: FunctionalLayer, parents: &[&str]) -> Result<()> {
    let name = layer.name.as_str();
    let config = &layer.config;
    let activation = config.activation.as_deref();

    match layer.class_name.as_str() {
        "InputLayer" => {
            let batch_shape = config.batch_input_shape.as_deref().unwrap_or_default();
            let dims = batch_shape
                .iter()
                .skip(1)
                .copied()
                .collect::<Option<Vec<_>>>()
                .filter(|_| !batch_shape.is_empty())
                .ok_or_else(|| {
                    DeepLiftError::Structural(format!(
                        "input layer '{}' needs a fixed batch_input_shape",
                        name
                    ))
                })?;
            let rank = dims.len();
            lowering.push(name, NodeOp::TensorView(TensorViewOp::input(dims)), &[], rank);
        }
        "Conv1D" | "Convolution1D" => {
            let parent = single_parent(name, parents)?;
            check_padding(name, config.padding.as_deref())?;
            let (kernel, bias) = kernel_and_bias(name, layer.weights, |k| dim(k, 2))?;
            check_declared(name, "filters", config.filters, dim(&kernel, 2))?;
            let kernel_size = window(name, &config.kernel_size)?;
            check_declared(name, "kernel_size", kernel_size, dim(&kernel, 0))?;
            let stride = window(name, &config.strides)?.unwrap_or(1);
            let op = Conv1dOp::new(kernel, bias, stride)?;
            lowering.push_activated(name, NodeOp::Conv1d(op), &[parent], 2, activation)?;
        }
        "MaxPooling1D" | "MaxPool1D" | "AveragePooling1D" | "AvgPool1D" => {
            let parent = single_parent(name, parents)?;
            check_padding(name, config.padding.as_deref())?;
            let kind = if layer.class_name.starts_with("Max") {
                PoolKind::Max
            } else {
                PoolKind::Average
            };
            let pool_size = window(name, &config.pool_size)?.unwrap_or(2);
            let stride = window(name, &config.strides)?.unwrap_or(pool_size);
            let op = Pool1dOp::new(kind, pool_size, stride)?;
            lowering.push(name, NodeOp::Pool1d(op), &[parent], 2);
        }
        "Dense" => {
            let parent = single_parent(name, parents)?;
            let (weights, bias) = kernel_and_bias(name, layer.weights, |w| dim(w, 1))?;
            check_declared(name, "units", config.units, dim(&weights, 1))?;
            let op = DenseOp::new(weights, bias)?;
            lowering.push_activated(name, NodeOp::Dense(op), &[parent], 1, activation)?;
        }
        "Activation" => {
            let parent = single_parent(name, parents)?;
            let function = activation.ok_or_else(|| {
                DeepLiftError::Structural(format!("activation layer '{}' names no function", name))
            })?;
            let rank = lowering.rank(parent)?;
            let op = ActivationOp::new(ActivationFn::from_name(function)?);
            lowering.push(name, NodeOp::Activation(op), &[parent], rank);
        }
        "Flatten" => {
            let parent = single_parent(name, parents)?;
            lowering.push(name, NodeOp::Flatten(FlattenOp), &[parent], 1);
        }
        "Concatenate" => {
            let axis = lowering.concat_axis(name, parents, config.axis.unwrap_or(-1))?;
            let rank = lowering.rank(parents[0])?;
            lowering.push(name, NodeOp::Concat(ConcatOp::new(axis)), parents, rank);
        }
        other => {
            return Err(DeepLiftError::UnsupportedNodeKind(format!(
                "layer class '{}' of layer '{}'",
                other, name
            )))
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use crate::config::PropagationConfig;
    use crate::conversion::{convert, TrainedNetwork};
    use crate::error::DeepLiftError;
    use crate::ir::op::NodeKind;

    fn inbound(names: &[&str]) -> Value {
        json!([names.iter().map(|n| json!([n, 0, 0, {}])).collect::<Vec<_>>()])
    }

    fn model() -> TrainedNetwork {
        TrainedNetwork::new(
            "2.1.6",
            json!({
                "layers": [
                    {"class_name": "InputLayer", "name": "a",
                     "config": {"batch_input_shape": [null, 6, 2]}, "inbound_nodes": []},
                    {"class_name": "InputLayer", "name": "b",
                     "config": {"batch_input_shape": [null, 6, 2]}, "inbound_nodes": []},
                    {"class_name": "Conv1D", "name": "conv",
                     "config": {"filters": 1, "kernel_size": [3], "strides": [1],
                                "padding": "valid", "activation": "relu"},
                     "inbound_nodes": inbound(&["a"]),
                     "weights": [{"shape": [3, 2, 1], "data": [1.0, 0.0, 0.0, 1.0, 1.0, 0.0]},
                                 {"shape": [1], "data": [0.5]}]},
                    {"class_name": "MaxPooling1D", "name": "pool",
                     "config": {"pool_size": 2, "strides": 2},
                     "inbound_nodes": inbound(&["conv"])},
                    {"class_name": "AveragePooling1D", "name": "avg",
                     "config": {"pool_size": [3]},
                     "inbound_nodes": inbound(&["b"])},
                    {"class_name": "Concatenate", "name": "merged", "config": {"axis": -1},
                     "inbound_nodes": inbound(&["pool", "avg"])},
                    {"class_name": "Flatten", "name": "flat", "config": {},
                     "inbound_nodes": inbound(&["merged"])},
                    {"class_name": "Dense", "name": "out",
                     "config": {"units": 1, "activation": "linear"},
                     "inbound_nodes": inbound(&["flat"]),
                     "weights": [{"shape": [6, 1], "data": [1.0, 2.0, 3.0, 4.0, 5.0, 6.0]}]},
                    {"class_name": "Activation", "name": "prob",
                     "config": {"activation": "sigmoid"},
                     "inbound_nodes": inbound(&["out"])}
                ],
                "output_layers": [["prob", 0, 0]]
            }),
        )
    }

    #[test]
    fn test_lowers_functional_model() {
        let graph = convert(&model(), PropagationConfig::default()).unwrap();

        assert_eq!(graph.input_names(), vec!["a", "b"]);
        assert_eq!(graph.output_names(), vec!["prob_output"]);
        assert_eq!(graph.get_node("conv").unwrap().shape().dims(), &[4, 1]);
        assert_eq!(graph.get_node("conv_act").unwrap().kind(), NodeKind::Activation);
        assert_eq!(graph.get_node("pool").unwrap().shape().dims(), &[2, 1]);
        assert_eq!(graph.get_node("avg").unwrap().shape().dims(), &[2, 2]);
        assert_eq!(graph.get_node("merged").unwrap().shape().dims(), &[2, 3]);
        assert_eq!(graph.get_node("flat").unwrap().shape().dims(), &[6]);
        assert!(graph.get_node("out_act").is_err());
    }

    #[test]
    fn test_positive_concat_axis_counts_batch() {
        let mut network = model();
        // axis 2 of [batch, length, channels]
        network.body["layers"][5]["config"]["axis"] = json!(2);
        let graph = convert(&network, PropagationConfig::default()).unwrap();
        assert_eq!(graph.get_node("merged").unwrap().shape().dims(), &[2, 3]);

        network.body["layers"][5]["config"]["axis"] = json!(0);
        assert!(matches!(
            convert(&network, PropagationConfig::default()),
            Err(DeepLiftError::Structural(_))
        ));
    }

    #[test]
    fn test_unknown_output_layer() {
        let mut network = model();
        network.body["output_layers"] = json!([["nope", 0, 0]]);
        assert!(matches!(
            convert(&network, PropagationConfig::default()),
            Err(DeepLiftError::Structural(_))
        ));
    }

    #[test]
    fn test_every_output_layer_becomes_an_output() {
        let network = TrainedNetwork::new(
            "2.0",
            json!({
                "layers": [
                    {"class_name": "InputLayer", "name": "x",
                     "config": {"batch_input_shape": [null, 2]}, "inbound_nodes": []},
                    {"class_name": "Dense", "name": "a",
                     "config": {"units": 2, "activation": "relu"},
                     "inbound_nodes": inbound(&["x"]),
                     "weights": [{"shape": [2, 2], "data": [1.0, 0.0, 0.0, 1.0]}]},
                    {"class_name": "Dense", "name": "b", "config": {"units": 1},
                     "inbound_nodes": inbound(&["a"]),
                     "weights": [{"shape": [2, 1], "data": [1.0, 1.0]}]}
                ],
                "output_layers": [["a", 0, 0], ["b", 0, 0]]
            }),
        );
        let graph = convert(&network, PropagationConfig::default()).unwrap();

        assert_eq!(graph.output_names(), vec!["a_output", "b_output"]);
        let a_output = graph.get_node("a_output").unwrap();
        assert_eq!(a_output.kind(), NodeKind::Output);
        // the fused relu is what the layer outputs
        assert_eq!(a_output.parents(), &[graph.node_id("a_act").unwrap()]);
        assert_eq!(a_output.shape().dims(), &[2]);
    }

    #[test]
    fn test_unsupported_layers() {
        let mut network = model();
        network.body["layers"][6]["class_name"] = json!("Dropout");
        assert!(matches!(
            convert(&network, PropagationConfig::default()),
            Err(DeepLiftError::UnsupportedNodeKind(_))
        ));

        let mut network = model();
        network.body["layers"][2]["config"]["padding"] = json!("causal");
        assert!(matches!(
            convert(&network, PropagationConfig::default()),
            Err(DeepLiftError::UnsupportedNodeKind(_))
        ));

        let mut network = model();
        network.body["layers"][3]["inbound_nodes"] =
            json!([[["conv_act", 0, 0, {}]], [["conv", 0, 0, {}]]]);
        assert!(matches!(
            convert(&network, PropagationConfig::default()),
            Err(DeepLiftError::UnsupportedNodeKind(_))
        ));
    }

    #[test]
    fn test_input_layer_needs_fixed_shape() {
        let mut network = model();
        network.body["layers"][0]["config"]["batch_input_shape"] = json!([null, null, 2]);
        assert!(matches!(
            convert(&network, PropagationConfig::default()),
            Err(DeepLiftError::Structural(_))
        ));
    }
}
