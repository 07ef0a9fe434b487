use std::path::Path;

use crate::error::Result;
use crate::tensor::EngineTensor;

// Engine: the external graph execution contract
//
// vole never computes anything itself. An engine loads a model into a
// graph handle and the handle executes it. Engines live in their own
// crates (vole-cpu is the reference one) and are used through trait
// objects, so a session can hold any engine without becoming generic.
//
// The contract is deliberately narrow:
//
//   Engine::load          -> GraphHandle or LoadError (per-load options)
//   GraphHandle::execute  -> bool (success), outputs readable afterwards
//   GraphHandle::reset    -> back to the freshly loaded state
//
// Failures inside execute are reported as `false` plus an optional
// diagnostic through `last_error`, the same way a foreign runtime would.
//
// Engines are shared between sessions, so anything session-specific
// (such as debug output) travels in `LoadOptions` and lives on the handle.

/// Where a model comes from.
#[derive(Debug, Clone, Copy)]
pub enum ModelSource<'a> {
    /// Serialized model bytes.
    Bytes(&'a [u8]),
    /// Path to a serialized model file.
    File(&'a Path),
}

/// Per-graph settings passed to `Engine::load`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOptions {
    /// Verbose diagnostics for this graph only.
    pub debug: bool,
}

impl LoadOptions {
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

/// Inputs handed to an engine: bound by position or by name.
#[derive(Debug, Clone)]
pub enum EngineInputs {
    Positional(Vec<EngineTensor>),
    Named(Vec<(String, EngineTensor)>),
}

impl EngineInputs {
    pub fn len(&self) -> usize {
        match self {
            EngineInputs::Positional(v) => v.len(),
            EngineInputs::Named(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A graph engine: loads models and resolves file arguments.
pub trait Engine: Send + Sync {
    /// A short human-readable engine name (e.g. `"cpu"`).
    fn name(&self) -> &str;

    /// Load a model into a fresh graph handle.
    fn load(&self, source: ModelSource<'_>, options: LoadOptions) -> Result<Box<dyn GraphHandle>>;

    /// Turn a resource descriptor (`"<path>::<selector>"`) into a tensor.
    ///
    /// `Ok(None)` means the descriptor was understood but yielded no data.
    /// With `persist`, the engine may keep a copy of the resolved tensor
    /// next to the source resource.
    fn resolve_file_arg(&self, descriptor: &str, persist: bool) -> Result<Option<EngineTensor>>;
}

/// A loaded computation graph.
pub trait GraphHandle: Send {
    /// Run the whole graph. Returns `false` on failure.
    fn execute(&mut self, inputs: EngineInputs, use_initializers: bool) -> bool;

    /// Run the single node called `node_name`. Returns `false` on failure,
    /// including when no such node exists.
    fn execute_node(&mut self, inputs: EngineInputs, node_name: &str, use_initializers: bool)
        -> bool;

    /// Discard all state from the last execution.
    fn reset(&mut self);

    /// Outputs of the last successful execution, in declared order.
    fn outputs(&self) -> &[(String, EngineTensor)];

    /// Initializer tensors of the loaded graph, keyed by name.
    fn initializers(&self) -> &[(String, EngineTensor)];

    fn node_names(&self) -> Vec<String>;

    fn input_names(&self) -> Vec<String>;

    fn output_names(&self) -> Vec<String>;

    /// Diagnostic for the last failed execution, if any.
    fn last_error(&self) -> Option<String> {
        None
    }

    /// Whether this graph was loaded with verbose diagnostics.
    fn debug_enabled(&self) -> bool {
        false
    }
}
