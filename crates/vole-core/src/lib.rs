//! # vole-core
//!
//! Core types shared by the vole bridge and the engines it drives.
//!
//! This crate provides:
//! - [`DType`] / [`ElementType`]: host dtypes, engine element types and the table between them
//! - [`HostArray`]: owned N-dimensional host arrays
//! - [`EngineArray`]: engine-native buffers, filled by one bulk copy under a pin guard
//! - [`EngineTensor`]: the engine tensor abstraction plus list/map adapters
//! - [`Engine`] / [`GraphHandle`]: the external execution contract
//! - [`onnx`]: encode/decode of ONNX model descriptions
// - dtype: type mapping table and the Element trait
// - host: HostArray plus dispatch macros
// - buffer: host <-> engine marshalling
// - tensor: tensor adapter
// - engine: engine/graph traits
// - onnx: protobuf model codec

pub mod buffer;
pub mod dtype;
pub mod engine;
pub mod error;
pub mod host;
pub mod onnx;
pub mod tensor;

pub use buffer::{
    element_count, engine_to_host_array, host_to_engine_array, EngineArray, PinnedBytes,
    PinnedBytesMut,
};
pub use dtype::{to_engine_type, to_host_dtype, DType, Element, ElementType, TYPE_TABLE};
pub use engine::{Engine, EngineInputs, GraphHandle, LoadOptions, ModelSource};
pub use error::{Error, Result};
pub use host::HostArray;
pub use tensor::{
    array_from_tensor, array_list, array_map, tensor_from_array, tensor_from_marshalled,
    tensor_list, tensor_map, EngineTensor,
};

pub use half;
pub use ndarray;
pub use num_complex;
