//! Arena-backed computation graph.
//!
//! Nodes are stored in a `Vec` and refer to each other by [`NodeId`]. The
//! graph is validated and topologically sorted once in [`Graph::build`] and is
//! read-only afterwards, so it can be shared freely across scoring threads.

use std::collections::{HashMap, VecDeque};

use tracing::{debug, info};

use crate::config::PropagationConfig;
use crate::error::{DeepLiftError, Result};
use crate::tensor::Shape;

pub mod op;

use op::{NodeKind, NodeOp};

/// Index of a node in its graph's arena
pub type NodeId = usize;

/// One layer as handed to [`Graph::build`]: a named op and the names of the
/// nodes feeding it, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerSpec {
    pub name: String,
    pub op: NodeOp,
    pub parents: Vec<String>,
}

impl LayerSpec {
    pub fn new(name: impl Into<String>, op: NodeOp, parents: &[&str]) -> Self {
        Self {
            name: name.into(),
            op,
            parents: parents.iter().map(|p| p.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) name: String,
    pub(crate) parents: Vec<NodeId>,
    pub(crate) children: Vec<NodeId>,
    /// Per-sample output shape (batch axis excluded)
    pub(crate) shape: Shape,
    pub(crate) op: NodeOp,
}

impl Node {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parents(&self) -> &[NodeId] {
        &self.parents
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn op(&self) -> &NodeOp {
        &self.op
    }

    pub fn kind(&self) -> NodeKind {
        self.op.kind()
    }
}

#[derive(Debug, Clone)]
pub struct Graph {
    nodes: Vec<Node>,
    name_to_id: HashMap<String, NodeId>,
    topo_order: Vec<NodeId>,
    inputs: Vec<NodeId>,
    outputs: Vec<NodeId>,
    config: PropagationConfig,
}

impl Graph {
    /// Validates connectivity and shapes and fixes the topological order.
    ///
    /// Outputs are the `Output` nodes if there are any, otherwise every node
    /// without children.
    pub fn build(layer_specs: Vec<LayerSpec>, config: PropagationConfig) -> Result<Graph> {
        let mut name_to_id = HashMap::with_capacity(layer_specs.len());
        for (id, spec) in layer_specs.iter().enumerate() {
            if name_to_id.insert(spec.name.clone(), id).is_some() {
                return Err(DeepLiftError::Structural(format!(
                    "duplicate node name '{}'",
                    spec.name
                )));
            }
        }

        let mut nodes = Vec::with_capacity(layer_specs.len());
        for (id, spec) in layer_specs.into_iter().enumerate() {
            let parents = spec
                .parents
                .iter()
                .map(|parent| {
                    name_to_id.get(parent).copied().ok_or_else(|| {
                        DeepLiftError::Structural(format!(
                            "node '{}' references undefined node '{}'",
                            spec.name, parent
                        ))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            nodes.push(Node {
                id,
                name: spec.name,
                parents,
                children: vec![],
                shape: Shape::default(),
                op: spec.op,
            });
        }

        for id in 0..nodes.len() {
            for parent in nodes[id].parents.clone() {
                if !nodes[parent].children.contains(&id) {
                    nodes[parent].children.push(id);
                }
            }
        }

        let topo_order = topological_order(&nodes)?;

        for &id in &topo_order {
            let shape = {
                let node = &nodes[id];
                let parent_shapes = node
                    .parents
                    .iter()
                    .map(|&p| &nodes[p].shape)
                    .collect::<Vec<_>>();
                node.op.output_shape(&node.name, &parent_shapes)?
            };
            debug!("node '{}' ({}) -> {:?}", nodes[id].name, nodes[id].kind(), shape.dims());
            nodes[id].shape = shape;
        }

        let inputs = nodes
            .iter()
            .filter(|n| n.kind() == NodeKind::Input)
            .map(|n| n.id)
            .collect::<Vec<_>>();
        if inputs.is_empty() {
            return Err(DeepLiftError::Structural("graph has no input nodes".into()));
        }

        let mut outputs = nodes
            .iter()
            .filter(|n| n.kind() == NodeKind::Output)
            .map(|n| n.id)
            .collect::<Vec<_>>();
        if outputs.is_empty() {
            outputs = nodes
                .iter()
                .filter(|n| n.children.is_empty())
                .map(|n| n.id)
                .collect();
        }

        info!(
            "Built graph: {} nodes, {} input(s), {} output(s), mode {:?}",
            nodes.len(),
            inputs.len(),
            outputs.len(),
            config.nonlinear_mxts_mode
        );

        Ok(Graph {
            nodes,
            name_to_id,
            topo_order,
            inputs,
            outputs,
            config,
        })
    }

    pub fn get_node(&self, name: &str) -> Result<&Node> {
        self.node_id(name).map(|id| &self.nodes[id])
    }

    pub fn node_id(&self, name: &str) -> Result<NodeId> {
        self.name_to_id
            .get(name)
            .copied()
            .ok_or_else(|| DeepLiftError::NotFound(name.to_string()))
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn topological_order(&self) -> &[NodeId] {
        &self.topo_order
    }

    pub fn inputs(&self) -> &[NodeId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[NodeId] {
        &self.outputs
    }

    pub fn input_names(&self) -> Vec<&str> {
        self.inputs.iter().map(|&id| self.nodes[id].name()).collect()
    }

    pub fn output_names(&self) -> Vec<&str> {
        self.outputs.iter().map(|&id| self.nodes[id].name()).collect()
    }

    pub fn config(&self) -> &PropagationConfig {
        &self.config
    }

    /// Marks `id` and every node it depends on
    pub fn ancestors(&self, id: NodeId) -> Vec<bool> {
        self.mark_reachable(&[id], |node| node.parents.as_slice())
    }

    /// Marks every node in `ids` and everything downstream of them
    pub fn descendants(&self, ids: &[NodeId]) -> Vec<bool> {
        self.mark_reachable(ids, |node| node.children.as_slice())
    }

    fn mark_reachable(&self, start: &[NodeId], next: impl Fn(&Node) -> &[NodeId]) -> Vec<bool> {
        let mut seen = vec![false; self.nodes.len()];
        let mut stack = start.to_vec();
        while let Some(id) = stack.pop() {
            if seen[id] {
                continue;
            }
            seen[id] = true;
            stack.extend(next(&self.nodes[id]).iter().copied().filter(|&n| !seen[n]));
        }
        seen
    }
}

/// Kahn's algorithm, seeded in declaration order so the result is stable
fn topological_order(nodes: &[Node]) -> Result<Vec<NodeId>> {
    let mut in_degree = nodes.iter().map(|n| n.parents.len()).collect::<Vec<_>>();
    let mut queue = (0..nodes.len())
        .filter(|&id| in_degree[id] == 0)
        .collect::<VecDeque<_>>();
    let mut order = Vec::with_capacity(nodes.len());

    while let Some(id) = queue.pop_front() {
        order.push(id);
        for &child in &nodes[id].children {
            // a child listing the same parent twice holds two in-degree units
            let edges = nodes[child].parents.iter().filter(|&&p| p == id).count();
            in_degree[child] -= edges;
            if in_degree[child] == 0 {
                queue.push_back(child);
            }
        }
    }

    if order.len() != nodes.len() {
        let stuck = nodes
            .iter()
            .filter(|n| in_degree[n.id] > 0)
            .map(|n| n.name.as_str())
            .collect::<Vec<_>>();
        return Err(DeepLiftError::Structural(format!(
            "graph contains a cycle through {:?}",
            stuck
        )));
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::{Graph, LayerSpec};
    use crate::config::PropagationConfig;
    use crate::error::DeepLiftError;
    use crate::ir::op::{
        ActivationFn, ActivationOp, ConcatOp, DenseOp, FlattenOp, NodeKind, NodeOp, TensorViewOp,
    };
    use crate::tensor::{Shape, Tensor};

    fn input(name: &str, dims: Vec<usize>) -> LayerSpec {
        LayerSpec::new(name, NodeOp::TensorView(TensorViewOp::input(dims)), &[])
    }

    fn relu(name: &str, parent: &str) -> LayerSpec {
        LayerSpec::new(
            name,
            NodeOp::Activation(ActivationOp::new(ActivationFn::Relu)),
            &[parent],
        )
    }

    fn diamond() -> Vec<LayerSpec> {
        vec![
            input("x", vec![2, 3]),
            relu("left", "x"),
            relu("right", "x"),
            LayerSpec::new("joined", NodeOp::Concat(ConcatOp::new(1)), &["left", "right"]),
            LayerSpec::new("flat", NodeOp::Flatten(FlattenOp), &["joined"]),
            LayerSpec::new(
                "dense",
                NodeOp::Dense(
                    DenseOp::new(Tensor::zeros(Shape::new(vec![12, 1])), vec![0.0]).unwrap(),
                ),
                &["flat"],
            ),
            LayerSpec::new("out", NodeOp::TensorView(TensorViewOp::output()), &["dense"]),
        ]
    }

    #[test]
    fn test_build_diamond() {
        let graph = Graph::build(diamond(), PropagationConfig::default()).unwrap();
        assert_eq!(graph.input_names(), vec!["x"]);
        assert_eq!(graph.output_names(), vec!["out"]);
        assert_eq!(graph.get_node("joined").unwrap().shape().dims(), &[2, 6]);
        assert_eq!(graph.get_node("flat").unwrap().shape().dims(), &[12]);
        assert_eq!(graph.get_node("out").unwrap().kind(), NodeKind::Output);

        let order = graph.topological_order();
        let pos = |name: &str| {
            let id = graph.node_id(name).unwrap();
            order.iter().position(|&n| n == id).unwrap()
        };
        assert!(pos("x") < pos("left"));
        assert!(pos("left") < pos("joined"));
        assert!(pos("right") < pos("joined"));
        assert!(pos("dense") < pos("out"));
    }

    #[test]
    fn test_reachability() {
        let graph = Graph::build(diamond(), PropagationConfig::default()).unwrap();
        let left = graph.node_id("left").unwrap();
        let ancestors = graph.ancestors(graph.node_id("joined").unwrap());
        assert!(ancestors[left]);
        assert!(!ancestors[graph.node_id("dense").unwrap()]);

        let descendants = graph.descendants(&[left]);
        assert!(descendants[graph.node_id("out").unwrap()]);
        assert!(!descendants[graph.node_id("right").unwrap()]);
    }

    #[test]
    fn test_get_node_not_found() {
        let graph = Graph::build(diamond(), PropagationConfig::default()).unwrap();
        assert!(matches!(graph.get_node("missing"), Err(DeepLiftError::NotFound(_))));
    }

    #[test]
    fn test_cycle_is_structural_error() {
        let specs = vec![input("x", vec![3]), relu("a", "b"), relu("b", "a")];
        let err = Graph::build(specs, PropagationConfig::default()).unwrap_err();
        assert!(matches!(err, DeepLiftError::Structural(msg) if msg.contains("cycle")));
    }

    #[test]
    fn test_undefined_parent_and_duplicate_names() {
        let specs = vec![input("x", vec![3]), relu("a", "nope")];
        assert!(matches!(
            Graph::build(specs, PropagationConfig::default()),
            Err(DeepLiftError::Structural(_))
        ));

        let specs = vec![input("x", vec![3]), relu("x", "x")];
        assert!(matches!(
            Graph::build(specs, PropagationConfig::default()),
            Err(DeepLiftError::Structural(_))
        ));
    }

    #[test]
    fn test_incompatible_concat_is_structural_error() {
        let specs = vec![
            input("a", vec![4, 2]),
            input("b", vec![5, 2]),
            LayerSpec::new("c", NodeOp::Concat(ConcatOp::new(1)), &["a", "b"]),
        ];
        assert!(matches!(
            Graph::build(specs, PropagationConfig::default()),
            Err(DeepLiftError::Structural(_))
        ));
    }

    #[test]
    fn test_sinks_become_outputs_without_output_nodes() {
        let specs = vec![input("x", vec![3]), relu("a", "x"), relu("b", "x")];
        let graph = Graph::build(specs, PropagationConfig::default()).unwrap();
        assert_eq!(graph.output_names(), vec!["a", "b"]);
    }
}
