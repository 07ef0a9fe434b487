// Node isolation
//
// Runs one node of a model on its own. The node is lifted into a fresh
// one-node model whose input declarations are derived from the concrete
// values the caller passed (element type and shape of the data, never the
// declarations of the source model). Outputs are declared untyped and left
// for the engine to infer.
//
// Node inputs the caller does not supply are taken from the source model's
// initializers and copied into the minimal model as constants. Anything
// else missing is an error.

use std::sync::Arc;

use tracing::debug;

use vole_core::onnx::{OnnxModel, OnnxNode, OnnxTensor, OnnxValueInfo};
use vole_core::{tensor_map, Engine, EngineInputs, EngineTensor, Error, Result};

use crate::inputs::{Inputs, Outputs};
use crate::options::RunOptions;
use crate::session::{bind_inputs, GraphSession, NodeRef};
use crate::HostArray;

/// Name given to isolated nodes that have none.
const ANONYMOUS_NODE: &str = "isolated_node";

/// Build the one-node model for `node`, with `inputs` keyed by the node's
/// input names.
pub fn isolate_node(
    model: &OnnxModel,
    node: &OnnxNode,
    inputs: &[(String, HostArray)],
) -> Result<OnnxModel> {
    let tensors = tensor_map(inputs)?;
    build_isolated(model, node, &tensors)
}

fn node_name(node: &OnnxNode) -> &str {
    if node.name.is_empty() {
        ANONYMOUS_NODE
    } else {
        &node.name
    }
}

fn distinct_inputs(node: &OnnxNode) -> Vec<&str> {
    let mut names: Vec<&str> = Vec::new();
    for name in node.present_inputs() {
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

fn build_isolated(
    model: &OnnxModel,
    node: &OnnxNode,
    inputs: &[(String, EngineTensor)],
) -> Result<OnnxModel> {
    let wired = distinct_inputs(node);
    if let Some((name, _)) = inputs.iter().find(|(n, _)| !wired.contains(&n.as_str())) {
        return Err(Error::InvalidArgument(format!(
            "'{name}' is not an input of node '{}'",
            node.name
        )));
    }

    let mut lifted = node.clone();
    lifted.name = node_name(node).to_string();

    let mut minimal = OnnxModel::new(&format!("{}_isolated", lifted.name));
    minimal.ir_version = model.ir_version;
    minimal.opset_imports = model.opset_imports.clone();

    for name in wired {
        if let Some((_, tensor)) = inputs.iter().find(|(n, _)| n == name) {
            let dims: Vec<i64> = tensor.dims().iter().map(|&d| d as i64).collect();
            minimal
                .graph
                .inputs
                .push(OnnxValueInfo::tensor(name, tensor.elem_type(), &dims));
        } else if let Some(init) = model.graph.initializer(name) {
            minimal.graph.initializers.push(OnnxTensor {
                name: name.to_string(),
                ..init.clone()
            });
        } else {
            return Err(Error::InvalidArgument(format!(
                "no value for input '{name}' of node '{}'",
                lifted.name
            )));
        }
    }
    for output in lifted.outputs.iter().filter(|o| !o.is_empty()) {
        minimal.graph.outputs.push(OnnxValueInfo::untyped(output));
    }
    minimal.graph.nodes.push(lifted);
    Ok(minimal)
}

/// Key bound inputs by the node's input names.
///
/// A positional list covering every wired input binds to all of them in
/// order; a shorter list binds to the inputs the source model has no
/// initializer for.
fn key_by_node_inputs(
    model: &OnnxModel,
    node: &OnnxNode,
    bound: EngineInputs,
) -> Result<Vec<(String, EngineTensor)>> {
    match bound {
        EngineInputs::Named(pairs) => Ok(pairs),
        EngineInputs::Positional(tensors) => {
            let wired = distinct_inputs(node);
            let targets: Vec<&str> = if tensors.len() == wired.len() {
                wired
            } else {
                wired
                    .into_iter()
                    .filter(|n| model.graph.initializer(n).is_none())
                    .collect()
            };
            if targets.len() != tensors.len() {
                return Err(Error::InvalidArgument(format!(
                    "node '{}' takes {} inputs {:?}, got {}",
                    node.name,
                    targets.len(),
                    targets,
                    tensors.len()
                )));
            }
            Ok(targets
                .into_iter()
                .zip(tensors)
                .map(|(name, t)| (name.to_string(), t.with_name(name)))
                .collect())
        }
    }
}

fn run_isolated(
    engine: Arc<dyn Engine>,
    model: &OnnxModel,
    node: &OnnxNode,
    inputs: Inputs,
    options: &RunOptions,
) -> Result<Outputs> {
    // file arguments are resolved here, so the isolated run gets plain tensors
    let bound = bind_inputs(engine.as_ref(), inputs, options)?;
    let keyed = key_by_node_inputs(model, node, bound)?;
    let minimal = build_isolated(model, node, &keyed)?;
    let name = node_name(node);
    debug!(
        node = %name,
        op = %node.op_type,
        inputs = keyed.len(),
        constants = minimal.graph.initializers.len(),
        "running isolated node"
    );

    let mut session = GraphSession::prepare(engine, &minimal)?;
    session.run_node_bound(name, EngineInputs::Named(keyed), options.use_initializers)
}

/// Run one node of `model` in isolation.
pub fn run_node<'n>(
    engine: Arc<dyn Engine>,
    model: &OnnxModel,
    node: impl Into<NodeRef<'n>>,
    inputs: impl Into<Inputs>,
    options: &RunOptions,
) -> Result<Outputs> {
    let name = node.into().name();
    let node = model
        .graph
        .node(name)
        .ok_or_else(|| Error::NodeNotFound(name.to_string()))?;
    run_isolated(engine, model, node, inputs.into(), options)
}

/// Run a bare node definition that belongs to no model.
pub fn run_node_def(
    engine: Arc<dyn Engine>,
    node: &OnnxNode,
    inputs: impl Into<Inputs>,
    options: &RunOptions,
) -> Result<Outputs> {
    let empty = OnnxModel::new("");
    run_isolated(engine, &empty, node, inputs.into(), options)
}
