//! # vole
//!
//! Drive an ONNX graph engine with host arrays.
//!
//! vole marshals N-dimensional host arrays into an engine's tensors, runs a
//! prepared graph (or one node of it) and hands the outputs back as host
//! arrays. The engine itself is a plug-in behind the [`Engine`] trait;
//! `vole-cpu` provides a reference one.
//!
//! ## Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use vole::prelude::*;
//! use vole_cpu::CpuEngine;
//!
//! let engine = Arc::new(CpuEngine::new());
//! let mut session = GraphSession::prepare_file(engine, "add.onnx")?;
//! let outputs = session.run(Inputs::list([a, b]), &RunOptions::default())?;
//! println!("{:?}", outputs["sum"]);
//! ```
//!
//! ## Modules
//!
//! - [`session`]: prepared graphs, whole-graph and single-node runs
//! - [`isolate`]: lift one node into its own model and run it
//! - [`options`]: run options and file arguments
//! - [`inputs`]: input and output collections
//! - [`logging`]: tracing setup and debug mode

pub mod inputs;
pub mod isolate;
pub mod logging;
pub mod options;
pub mod session;

pub use vole_core::onnx;
pub use vole_core::{
    array_from_tensor, array_list, array_map, engine_to_host_array, host_to_engine_array,
    tensor_from_array, tensor_list, tensor_map, to_engine_type, to_host_dtype, DType, Element,
    ElementType, Engine, EngineArray, EngineInputs, EngineTensor, Error, GraphHandle, HostArray,
    LoadOptions, ModelSource, Result,
};
pub use vole_core::{half, ndarray, num_complex};

pub use inputs::{InputValue, Inputs, Outputs};
pub use isolate::{isolate_node, run_node, run_node_def};
pub use logging::{
    debug_enabled, init_logging, set_debug_mode, LogLevel, LoggingConfig, SessionConfig,
};
pub use options::{FileArg, RunOptions};
pub use session::{GraphSession, NodeRef, SessionState};

/// Prelude: import this for the most common types.
pub mod prelude {
    pub use crate::onnx::{OnnxModel, OnnxNode, OnnxTensor, OnnxValueInfo};
    pub use crate::{
        isolate_node, run_node, run_node_def, set_debug_mode, DType, Engine, Error, FileArg,
        GraphSession, HostArray, InputValue, Inputs, NodeRef, Outputs, Result, RunOptions,
        SessionConfig, SessionState,
    };
}
