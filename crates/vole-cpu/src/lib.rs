//! # vole-cpu
//!
//! Reference CPU engine for vole.
//!
//! Executes a small set of elementwise ONNX ops (`Add`, `Sub`, `Mul`, `Div`,
//! `Neg`, `Abs`, `Relu`, `Sigmoid`, `Identity`, `Dropout`, `Constant`) with
//! NumPy-style broadcasting, and resolves `.pb` / `.onnx` file arguments.
//!
//! ```ignore
//! use std::sync::Arc;
//! use vole_cpu::CpuEngine;
//!
//! let engine = Arc::new(CpuEngine::new());
//! ```

pub mod engine;
pub mod file_arg;
pub mod graph;
pub mod ops;

pub use engine::CpuEngine;
pub use graph::{CpuGraph, SUPPORTED_OPS};
pub use ops::{BinaryOp, UnaryOp};
