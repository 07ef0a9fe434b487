// GraphSession: one prepared graph plus the protocol around executing it
//
// A session owns a graph handle loaded by an engine and the decoded model
// it came from. Every run goes through the same steps:
//
//   1. validate file_args against the shape of the inputs
//   2. marshal arrays / resolve descriptors into engine tensors
//   3. execute (whole graph or one node)
//   4. read the outputs back into host arrays, in engine order
//   5. reset the handle, on success and on failure alike
//
// Step 2 never touches the handle, so a validation error leaves the
// session exactly as it was.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use vole_core::onnx::{OnnxModel, OnnxNode};
use vole_core::{
    array_from_tensor, array_map, tensor_from_array, Engine, EngineInputs, EngineTensor, Error,
    GraphHandle, HostArray, LoadOptions, ModelSource, Result,
};

use crate::inputs::{InputValue, Inputs, Outputs};
use crate::logging::{self, SessionConfig};
use crate::options::{FileArg, RunOptions};

/// Where a session is in its run cycle.
///
/// Every `run`/`run_node` resets before it returns, so `Executed` is only
/// held inside a call and callers always observe `Prepared`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Loaded and clean; ready to run.
    Prepared,
    /// Internal: outputs are being read back and the reset is pending.
    Executed,
}

/// A node addressed by name or by its definition.
#[derive(Debug, Clone, Copy)]
pub enum NodeRef<'a> {
    Name(&'a str),
    Node(&'a OnnxNode),
}

impl<'a> NodeRef<'a> {
    pub fn name(&self) -> &'a str {
        match self {
            NodeRef::Name(name) => name,
            NodeRef::Node(node) => node.name.as_str(),
        }
    }
}

impl<'a> From<&'a str> for NodeRef<'a> {
    fn from(name: &'a str) -> Self {
        NodeRef::Name(name)
    }
}

impl<'a> From<&'a String> for NodeRef<'a> {
    fn from(name: &'a String) -> Self {
        NodeRef::Name(name.as_str())
    }
}

impl<'a> From<&'a OnnxNode> for NodeRef<'a> {
    fn from(node: &'a OnnxNode) -> Self {
        NodeRef::Node(node)
    }
}

/// A prepared graph ready to run.
///
/// Runs take `&mut self`, so a session executes one thing at a time.
/// Share it across threads behind a `Mutex`.
pub struct GraphSession {
    engine: Arc<dyn Engine>,
    handle: Box<dyn GraphHandle>,
    model: OnnxModel,
    state: SessionState,
    config: SessionConfig,
}

impl GraphSession {
    /// Prepare a session from a decoded model.
    pub fn prepare(engine: Arc<dyn Engine>, model: &OnnxModel) -> Result<Self> {
        Self::prepare_with_config(engine, model, default_config())
    }

    /// Prepare a session from a decoded model with an explicit config.
    pub fn prepare_with_config(
        engine: Arc<dyn Engine>,
        model: &OnnxModel,
        config: SessionConfig,
    ) -> Result<Self> {
        let bytes = model.to_bytes();
        Self::open(engine, model.clone(), ModelSource::Bytes(&bytes), config)
    }

    /// Prepare a session from serialized model bytes.
    pub fn prepare_bytes(engine: Arc<dyn Engine>, bytes: &[u8]) -> Result<Self> {
        let model = OnnxModel::from_bytes(bytes).map_err(|e| Error::LoadError(e.to_string()))?;
        Self::open(engine, model, ModelSource::Bytes(bytes), default_config())
    }

    /// Prepare a session from a model file.
    pub fn prepare_file(engine: Arc<dyn Engine>, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let model = OnnxModel::load(path)
            .map_err(|e| Error::LoadError(format!("{}: {e}", path.display())))?;
        Self::open(engine, model, ModelSource::File(path), default_config())
    }

    fn open(
        engine: Arc<dyn Engine>,
        model: OnnxModel,
        source: ModelSource<'_>,
        config: SessionConfig,
    ) -> Result<Self> {
        let options = LoadOptions::default().with_debug(config.debug);
        let handle = engine.load(source, options).map_err(|e| match e {
            Error::LoadError(_) => e,
            other => Error::LoadError(other.to_string()),
        })?;
        info!(
            engine = engine.name(),
            graph = %model.graph.name,
            nodes = model.graph.nodes.len(),
            "prepared graph session"
        );
        Ok(Self {
            engine,
            handle,
            model,
            state: SessionState::Prepared,
            config,
        })
    }

    /// Execute the whole graph.
    pub fn run(&mut self, inputs: impl Into<Inputs>, options: &RunOptions) -> Result<Outputs> {
        let bound = bind_inputs(self.engine.as_ref(), inputs.into(), options)?;
        debug!(graph = %self.model.graph.name, inputs = bound.len(), "run");
        let ok = self.handle.execute(bound, options.use_initializers);
        self.finish(ok, None)
    }

    /// Execute a single node of the graph.
    pub fn run_node<'n>(
        &mut self,
        node: impl Into<NodeRef<'n>>,
        inputs: impl Into<Inputs>,
        options: &RunOptions,
    ) -> Result<Outputs> {
        let name = node.into().name();
        self.get_node(name)?;
        let bound = bind_inputs(self.engine.as_ref(), inputs.into(), options)?;
        self.run_node_bound(name, bound, options.use_initializers)
    }

    /// Execute one node with inputs that are already engine tensors.
    pub(crate) fn run_node_bound(
        &mut self,
        name: &str,
        bound: EngineInputs,
        use_initializers: bool,
    ) -> Result<Outputs> {
        debug!(graph = %self.model.graph.name, node = name, inputs = bound.len(), "run node");
        let ok = self.handle.execute_node(bound, name, use_initializers);
        self.finish(ok, Some(name))
    }

    fn finish(&mut self, ok: bool, node: Option<&str>) -> Result<Outputs> {
        self.state = SessionState::Executed;
        let result = if ok {
            array_map(self.handle.outputs()).map(Outputs::new)
        } else {
            let reason = self
                .handle
                .last_error()
                .unwrap_or_else(|| "engine reported failure".to_string());
            let reason = match node {
                Some(node) => format!("node '{node}': {reason}"),
                None => reason,
            };
            warn!(graph = %self.model.graph.name, %reason, "execution failed");
            Err(Error::ExecutionFailure(reason))
        };
        self.reset();
        result
    }

    /// Node definition by name.
    pub fn get_node(&self, name: &str) -> Result<&OnnxNode> {
        self.model
            .graph
            .node(name)
            .ok_or_else(|| Error::NodeNotFound(name.to_string()))
    }

    /// Initializer by name, as a host array.
    pub fn get_initializer(&self, name: &str) -> Result<HostArray> {
        let (_, tensor) = self
            .handle
            .initializers()
            .iter()
            .find(|(n, _)| n == name)
            .ok_or_else(|| Error::InitializerNotFound(name.to_string()))?;
        array_from_tensor(tensor)
    }

    /// Resolve a file-argument descriptor. `Ok(None)` when the resolver
    /// finds no data for it.
    pub fn get_input_from_file_arg(
        &self,
        descriptor: &str,
        persist: bool,
    ) -> Result<Option<HostArray>> {
        self.engine
            .resolve_file_arg(descriptor, persist)?
            .map(|t| array_from_tensor(&t))
            .transpose()
    }

    /// Discard execution state. Safe to call at any time.
    pub fn reset(&mut self) {
        self.handle.reset();
        self.state = SessionState::Prepared;
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn model(&self) -> &OnnxModel {
        &self.model
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Whether the loaded graph logs verbosely. Set from this session's
    /// config only; other sessions on the same engine do not affect it.
    pub fn debug_enabled(&self) -> bool {
        self.handle.debug_enabled()
    }

    pub fn input_names(&self) -> Vec<String> {
        self.handle.input_names()
    }

    pub fn output_names(&self) -> Vec<String> {
        self.handle.output_names()
    }

    pub fn node_names(&self) -> Vec<String> {
        self.handle.node_names()
    }

    pub fn initializer_names(&self) -> Vec<String> {
        self.handle
            .initializers()
            .iter()
            .map(|(n, _)| n.clone())
            .collect()
    }
}

impl fmt::Debug for GraphSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphSession")
            .field("engine", &self.engine.name())
            .field("graph", &self.model.graph.name)
            .field("state", &self.state)
            .field("config", &self.config)
            .finish()
    }
}

fn default_config() -> SessionConfig {
    SessionConfig::new().with_debug(logging::debug_enabled())
}

/// Validate `file_args` against `inputs` and turn every slot into an
/// engine tensor, resolving descriptors through `engine`.
pub(crate) fn bind_inputs(
    engine: &dyn Engine,
    inputs: Inputs,
    options: &RunOptions,
) -> Result<EngineInputs> {
    match inputs {
        Inputs::List(values) => {
            for arg in &options.file_args {
                match arg {
                    FileArg::Index(i) if *i < values.len() => {}
                    FileArg::Index(i) => {
                        return Err(Error::InvalidArgument(format!(
                            "file argument index {i} is out of range for {} inputs",
                            values.len()
                        )))
                    }
                    FileArg::Name(name) => {
                        return Err(Error::InvalidArgument(format!(
                            "file argument '{name}' is a name but the inputs are positional"
                        )))
                    }
                }
            }
            let tensors = values
                .into_iter()
                .enumerate()
                .map(|(i, value)| {
                    let listed = options.file_args.contains(&FileArg::Index(i));
                    bind_value(engine, &FileArg::Index(i), value, listed, options.save_file_arg)
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(EngineInputs::Positional(tensors))
        }
        Inputs::Map(entries) => {
            for (i, (name, _)) in entries.iter().enumerate() {
                if entries[..i].iter().any(|(n, _)| n == name) {
                    return Err(Error::DuplicateName(name.clone()));
                }
            }
            for arg in &options.file_args {
                match arg {
                    FileArg::Name(name) if entries.iter().any(|(n, _)| n == name) => {}
                    FileArg::Name(name) => {
                        return Err(Error::InvalidArgument(format!(
                            "file argument '{name}' is not one of the inputs"
                        )))
                    }
                    FileArg::Index(i) => {
                        return Err(Error::InvalidArgument(format!(
                            "file argument index {i} given but the inputs are named"
                        )))
                    }
                }
            }
            let tensors = entries
                .into_iter()
                .map(|(name, value)| {
                    let slot = FileArg::Name(name.clone());
                    let listed = options.file_args.contains(&slot);
                    let tensor = bind_value(engine, &slot, value, listed, options.save_file_arg)?;
                    Ok((name.clone(), tensor.with_name(name)))
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(EngineInputs::Named(tensors))
        }
    }
}

fn bind_value(
    engine: &dyn Engine,
    slot: &FileArg,
    value: InputValue,
    listed: bool,
    save_file_arg: bool,
) -> Result<EngineTensor> {
    match (value, listed) {
        (InputValue::Array(array), false) => tensor_from_array(&array),
        (InputValue::Descriptor(descriptor), true) => {
            let tensor = engine
                .resolve_file_arg(&descriptor, save_file_arg)?
                .ok_or_else(|| Error::FileArgUnresolved(descriptor.clone()))?;
            debug!(input = %slot, %descriptor, dims = ?tensor.dims(), "resolved file argument");
            Ok(tensor)
        }
        (InputValue::Array(array), true) => Err(Error::TypeMismatch(format!(
            "input {slot} is listed in file_args but holds a {} array, not a descriptor",
            array.dtype_name()
        ))),
        (InputValue::Descriptor(descriptor), false) => Err(Error::TypeMismatch(format!(
            "input {slot} holds descriptor '{descriptor}' but is not listed in file_args"
        ))),
    }
}
