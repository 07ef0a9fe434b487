use std::collections::HashMap;

use tracing::{debug, trace, warn};

use vole_core::onnx::{OnnxAttribute, OnnxModel, OnnxNode};
use vole_core::{
    array_from_tensor, bail, tensor_from_array, EngineInputs, EngineTensor, Error, GraphHandle,
    HostArray, Result,
};

use crate::ops::{self, BinaryOp, UnaryOp};

/// Op types the CPU graph can execute.
pub const SUPPORTED_OPS: &[&str] = &[
    "Add", "Sub", "Mul", "Div", "Neg", "Abs", "Relu", "Sigmoid", "Identity", "Dropout", "Constant",
];

type Env = HashMap<String, HostArray>;

/// A loaded graph executed node by node on the CPU.
///
/// Initializers that are not declared graph inputs are constants and are
/// always visible. Initializers that are also declared inputs act as
/// default input values only when execution asks for `use_initializers`.
pub struct CpuGraph {
    model: OnnxModel,
    initializers: Vec<(String, EngineTensor)>,
    outputs: Vec<(String, EngineTensor)>,
    last_error: Option<String>,
    debug: bool,
}

impl CpuGraph {
    pub fn new(model: OnnxModel, debug: bool) -> Result<Self> {
        let initializers = model
            .graph
            .initializers
            .iter()
            .map(|t| Ok((t.name.clone(), t.to_engine_tensor()?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            model,
            initializers,
            outputs: Vec::new(),
            last_error: None,
            debug,
        })
    }

    pub fn model(&self) -> &OnnxModel {
        &self.model
    }

    fn is_declared_input(&self, name: &str) -> bool {
        self.model.graph.inputs.iter().any(|vi| vi.name == name)
    }

    fn seed_env(&self, use_initializers: bool) -> Result<Env> {
        let mut env = Env::new();
        for (name, tensor) in &self.initializers {
            if use_initializers || !self.is_declared_input(name) {
                env.insert(name.clone(), array_from_tensor(tensor)?);
            }
        }
        Ok(env)
    }

    /// Bind caller inputs. Positional inputs fill `required` in order;
    /// named inputs must be among `allowed`, and every required name must
    /// end up bound.
    fn bind(
        env: &mut Env,
        inputs: EngineInputs,
        required: &[String],
        allowed: &[String],
    ) -> Result<()> {
        match inputs {
            EngineInputs::Positional(tensors) => {
                if tensors.len() != required.len() {
                    return Err(Error::InvalidArgument(format!(
                        "expected {} inputs {:?}, got {}",
                        required.len(),
                        required,
                        tensors.len()
                    )));
                }
                for (name, tensor) in required.iter().zip(&tensors) {
                    env.insert(name.clone(), array_from_tensor(tensor)?);
                }
            }
            EngineInputs::Named(pairs) => {
                for (name, tensor) in pairs {
                    if !allowed.contains(&name) {
                        return Err(Error::InvalidArgument(format!("'{name}' is not an input")));
                    }
                    env.insert(name, array_from_tensor(&tensor)?);
                }
                if let Some(missing) = required.iter().find(|n| !env.contains_key(n.as_str())) {
                    return Err(Error::InvalidArgument(format!("missing input '{missing}'")));
                }
            }
        }
        Ok(())
    }

    fn run_graph(
        &self,
        inputs: EngineInputs,
        use_initializers: bool,
    ) -> Result<Vec<(String, EngineTensor)>> {
        let mut env = self.seed_env(use_initializers)?;
        let declared: Vec<String> =
            self.model.graph.inputs.iter().map(|vi| vi.name.clone()).collect();
        let required: Vec<String> = declared
            .iter()
            .filter(|n| !env.contains_key(n.as_str()))
            .cloned()
            .collect();
        Self::bind(&mut env, inputs, &required, &declared)?;

        for node in &self.model.graph.nodes {
            self.execute_in(node, &mut env)?;
        }
        collect(&env, self.model.graph.outputs.iter().map(|vi| vi.name.as_str()))
    }

    fn run_single(
        &self,
        inputs: EngineInputs,
        node_name: &str,
        use_initializers: bool,
    ) -> Result<Vec<(String, EngineTensor)>> {
        let node = self
            .model
            .graph
            .node(node_name)
            .ok_or_else(|| Error::NodeNotFound(node_name.to_string()))?;
        let mut env = self.seed_env(use_initializers)?;
        let mut wired: Vec<String> = Vec::new();
        for name in node.present_inputs() {
            if !wired.iter().any(|w| w == name) {
                wired.push(name.to_string());
            }
        }
        let required: Vec<String> = wired
            .iter()
            .filter(|n| !env.contains_key(n.as_str()))
            .cloned()
            .collect();
        Self::bind(&mut env, inputs, &required, &wired)?;

        self.execute_in(node, &mut env)?;
        collect(&env, node.outputs.iter().map(String::as_str).filter(|s| !s.is_empty()))
    }

    fn execute_in(&self, node: &OnnxNode, env: &mut Env) -> Result<()> {
        if self.debug {
            debug!(node = %node.name, op = %node.op_type, inputs = ?node.inputs, "executing node");
        } else {
            trace!(node = %node.name, op = %node.op_type, "executing node");
        }
        let out = match node.op_type.as_str() {
            "Add" => ops::binary(BinaryOp::Add, input(node, env, 0)?, input(node, env, 1)?)?,
            "Sub" => ops::binary(BinaryOp::Sub, input(node, env, 0)?, input(node, env, 1)?)?,
            "Mul" => ops::binary(BinaryOp::Mul, input(node, env, 0)?, input(node, env, 1)?)?,
            "Div" => ops::binary(BinaryOp::Div, input(node, env, 0)?, input(node, env, 1)?)?,
            "Neg" => ops::unary(UnaryOp::Neg, input(node, env, 0)?)?,
            "Abs" => ops::unary(UnaryOp::Abs, input(node, env, 0)?)?,
            "Relu" => ops::unary(UnaryOp::Relu, input(node, env, 0)?)?,
            "Sigmoid" => ops::unary(UnaryOp::Sigmoid, input(node, env, 0)?)?,
            // Dropout is an identity at inference time
            "Identity" | "Dropout" => input(node, env, 0)?.clone(),
            "Constant" => match node.attribute("value") {
                Some(OnnxAttribute::Tensor(t)) => array_from_tensor(&t.to_engine_tensor()?)?,
                _ => bail!("Constant node '{}' has no tensor 'value' attribute", node.name),
            },
            other => bail!("unsupported op '{other}' in node '{}'", node.name),
        };
        let target = node
            .outputs
            .first()
            .filter(|o| !o.is_empty())
            .ok_or_else(|| Error::msg(format!("node '{}' declares no output", node.name)))?;
        if self.debug {
            debug!(node = %node.name, output = %target, shape = ?out.shape(), "node done");
        }
        env.insert(target.clone(), out);
        Ok(())
    }

    fn finish(&mut self, result: Result<Vec<(String, EngineTensor)>>) -> bool {
        match result {
            Ok(outputs) => {
                self.outputs = outputs;
                self.last_error = None;
                true
            }
            Err(e) => {
                warn!(graph = %self.model.graph.name, error = %e, "execution failed");
                self.outputs.clear();
                self.last_error = Some(e.to_string());
                false
            }
        }
    }
}

/// Helper: the i-th wired input of a node, looked up in the environment.
fn input<'a>(node: &OnnxNode, env: &'a Env, i: usize) -> Result<&'a HostArray> {
    let name = node
        .inputs
        .get(i)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| Error::msg(format!("node '{}' is missing input #{i}", node.name)))?;
    env.get(name)
        .ok_or_else(|| Error::msg(format!("tensor '{name}' not found")))
}

fn collect<'a>(
    env: &Env,
    names: impl Iterator<Item = &'a str>,
) -> Result<Vec<(String, EngineTensor)>> {
    names
        .map(|name| {
            let array = env
                .get(name)
                .ok_or_else(|| Error::msg(format!("output '{name}' was not produced")))?;
            Ok((name.to_string(), tensor_from_array(array)?.with_name(name)))
        })
        .collect()
}

impl GraphHandle for CpuGraph {
    fn execute(&mut self, inputs: EngineInputs, use_initializers: bool) -> bool {
        let result = self.run_graph(inputs, use_initializers);
        self.finish(result)
    }

    fn execute_node(
        &mut self,
        inputs: EngineInputs,
        node_name: &str,
        use_initializers: bool,
    ) -> bool {
        let result = self.run_single(inputs, node_name, use_initializers);
        self.finish(result)
    }

    fn reset(&mut self) {
        self.outputs.clear();
        self.last_error = None;
    }

    fn outputs(&self) -> &[(String, EngineTensor)] {
        &self.outputs
    }

    fn initializers(&self) -> &[(String, EngineTensor)] {
        &self.initializers
    }

    fn node_names(&self) -> Vec<String> {
        self.model.graph.nodes.iter().map(|n| n.name.clone()).collect()
    }

    fn input_names(&self) -> Vec<String> {
        self.model.graph.inputs.iter().map(|vi| vi.name.clone()).collect()
    }

    fn output_names(&self) -> Vec<String> {
        self.model.graph.outputs.iter().map(|vi| vi.name.clone()).collect()
    }

    fn last_error(&self) -> Option<String> {
        self.last_error.clone()
    }

    fn debug_enabled(&self) -> bool {
        self.debug
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vole_core::onnx::{OnnxTensor, OnnxValueInfo};
    use vole_core::ElementType;

    fn tensor(name: &str, dims: Vec<usize>, data: Vec<f32>) -> EngineTensor {
        EngineTensor::from_vec(name, dims, data).unwrap()
    }

    /// Y = Relu(X * W + B), W is a constant initializer, B a defaulted input.
    fn linear_relu() -> CpuGraph {
        let mut model = OnnxModel::new("linear_relu");
        let g = &mut model.graph;
        g.inputs.push(OnnxValueInfo::tensor("X", ElementType::Float, &[3]));
        g.inputs.push(OnnxValueInfo::tensor("B", ElementType::Float, &[3]));
        g.outputs.push(OnnxValueInfo::tensor("Y", ElementType::Float, &[3]));
        g.initializers.push(OnnxTensor {
            float_data: vec![2.0, -1.0, 1.0],
            ..OnnxTensor::new("W", ElementType::Float, vec![3])
        });
        g.initializers.push(OnnxTensor {
            float_data: vec![1.0, 1.0, 1.0],
            ..OnnxTensor::new("B", ElementType::Float, vec![3])
        });
        g.nodes.push(OnnxNode::new("Mul", "mul_0", &["X", "W"], &["xw"]));
        g.nodes.push(OnnxNode::new("Add", "add_0", &["xw", "B"], &["pre"]));
        g.nodes.push(OnnxNode::new("Relu", "relu_0", &["pre"], &["Y"]));
        CpuGraph::new(model, false).unwrap()
    }

    fn output_values(graph: &CpuGraph) -> Vec<f32> {
        graph.outputs()[0].1.to_array::<f32>().unwrap().into_raw_vec()
    }

    #[test]
    fn test_execute_with_initializer_defaults() {
        let mut graph = linear_relu();
        let x = tensor("X", vec![3], vec![1.0, 1.0, -3.0]);
        assert!(graph.execute(EngineInputs::Positional(vec![x]), true));
        assert_eq!(graph.outputs()[0].0, "Y");
        assert_eq!(output_values(&graph), vec![3.0, 0.0, 0.0]);
    }

    #[test]
    fn test_execute_without_initializer_defaults_needs_all_inputs() {
        let mut graph = linear_relu();
        let x = tensor("X", vec![3], vec![1.0, 1.0, 1.0]);
        assert!(!graph.execute(EngineInputs::Positional(vec![x.clone()]), false));
        assert!(graph.last_error().unwrap().contains("expected 2 inputs"));

        let b = tensor("B", vec![3], vec![0.0, 0.0, 0.0]);
        assert!(graph.execute(EngineInputs::Positional(vec![x, b]), false));
        assert_eq!(output_values(&graph), vec![2.0, 0.0, 1.0]);
    }

    #[test]
    fn test_named_inputs() {
        let mut graph = linear_relu();
        let x = tensor("X", vec![3], vec![0.0, 0.0, 0.0]);
        let b = tensor("B", vec![3], vec![-1.0, 5.0, 0.5]);
        let named = vec![("X".to_string(), x.clone()), ("B".to_string(), b)];
        assert!(graph.execute(EngineInputs::Named(named), false));
        assert_eq!(output_values(&graph), vec![0.0, 5.0, 0.5]);

        let unknown = vec![("Z".to_string(), x)];
        assert!(!graph.execute(EngineInputs::Named(unknown), true));
        assert!(graph.outputs().is_empty());
    }

    #[test]
    fn test_execute_single_node() {
        let mut graph = linear_relu();
        let pre = tensor("pre", vec![3], vec![-1.0, 2.0, 0.0]);
        assert!(graph.execute_node(EngineInputs::Positional(vec![pre]), "relu_0", false));
        assert_eq!(graph.outputs()[0].0, "Y");
        assert_eq!(output_values(&graph), vec![0.0, 2.0, 0.0]);

        // W is a constant initializer, so only X has to be supplied
        let x = tensor("X", vec![3], vec![1.0, 2.0, 3.0]);
        assert!(graph.execute_node(EngineInputs::Positional(vec![x]), "mul_0", false));
        assert_eq!(output_values(&graph), vec![2.0, -2.0, 3.0]);

        assert!(!graph.execute_node(EngineInputs::Positional(vec![]), "nope", false));
        assert!(graph.last_error().unwrap().contains("nope"));
    }

    #[test]
    fn test_reset_clears_state() {
        let mut graph = linear_relu();
        let x = tensor("X", vec![3], vec![1.0, 1.0, 1.0]);
        assert!(graph.execute(EngineInputs::Positional(vec![x]), true));
        assert_eq!(graph.outputs().len(), 1);
        graph.reset();
        assert!(graph.outputs().is_empty());
        assert!(graph.last_error().is_none());
        assert_eq!(graph.initializers().len(), 2);
    }

    #[test]
    fn test_constant_and_unsupported_op() {
        let mut model = OnnxModel::new("const");
        model
            .graph
            .outputs
            .push(OnnxValueInfo::tensor("c", ElementType::Int64, &[2]));
        model.graph.nodes.push(
            OnnxNode::new("Constant", "k", &[], &["c"]).with_attribute(
                "value",
                OnnxAttribute::Tensor(OnnxTensor {
                    int64_data: vec![4, 5],
                    ..OnnxTensor::new("", ElementType::Int64, vec![2])
                }),
            ),
        );
        let mut graph = CpuGraph::new(model, true).unwrap();
        assert!(graph.execute(EngineInputs::Positional(vec![]), false));
        let c = graph.outputs()[0].1.to_array::<i64>().unwrap();
        assert_eq!(c.into_raw_vec(), vec![4, 5]);

        let mut model = OnnxModel::new("conv");
        model.graph.nodes.push(OnnxNode::new("Conv", "c0", &[], &["y"]));
        let mut graph = CpuGraph::new(model, false).unwrap();
        assert!(!graph.execute(EngineInputs::Positional(vec![]), false));
        assert!(graph.last_error().unwrap().contains("unsupported op"));
    }
}
