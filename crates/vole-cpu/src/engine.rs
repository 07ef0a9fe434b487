// CpuEngine: loads ONNX models into CpuGraph handles
//
// Loading decodes the model once and checks that every node uses an op the
// CPU graph knows. Anything that goes wrong while loading surfaces as
// LoadError, so a session never holds a graph that cannot run at all.
//
// The engine itself is stateless. Debug output is a property of each
// loaded graph, so sessions sharing one engine never see each other's
// settings.

use tracing::info;

use vole_core::onnx::OnnxModel;
use vole_core::{Engine, EngineTensor, Error, GraphHandle, LoadOptions, ModelSource, Result};

use crate::file_arg;
use crate::graph::{CpuGraph, SUPPORTED_OPS};

/// The reference CPU engine.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpuEngine;

impl CpuEngine {
    pub fn new() -> Self {
        Self
    }

    fn decode(source: ModelSource<'_>) -> Result<OnnxModel> {
        let model = match source {
            ModelSource::Bytes(bytes) => OnnxModel::from_bytes(bytes),
            ModelSource::File(path) => OnnxModel::load(path),
        }
        .map_err(|e| Error::LoadError(e.to_string()))?;

        if let Some(node) = model
            .graph
            .nodes
            .iter()
            .find(|n| !SUPPORTED_OPS.contains(&n.op_type.as_str()))
        {
            return Err(Error::LoadError(format!(
                "node '{}' uses unsupported op '{}'",
                node.name, node.op_type
            )));
        }
        Ok(model)
    }
}

impl Engine for CpuEngine {
    fn name(&self) -> &str {
        "cpu"
    }

    fn load(&self, source: ModelSource<'_>, options: LoadOptions) -> Result<Box<dyn GraphHandle>> {
        let model = Self::decode(source)?;
        info!(
            graph = %model.graph.name,
            nodes = model.graph.nodes.len(),
            initializers = model.graph.initializers.len(),
            debug = options.debug,
            "loaded graph"
        );
        let graph = CpuGraph::new(model, options.debug)
            .map_err(|e| Error::LoadError(e.to_string()))?;
        Ok(Box::new(graph))
    }

    fn resolve_file_arg(&self, descriptor: &str, persist: bool) -> Result<Option<EngineTensor>> {
        file_arg::resolve(descriptor, persist)
    }
}
