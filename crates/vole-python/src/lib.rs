// vole-python: PyO3 bindings for vole
//
// Exposes to Python:
//   - Session: run, run_node, get_node, get_initializer,
//     get_input_from_file_arg, reset, name listings
//   - prepare(model), prepare_file(path)
//   - run_node(node_def, inputs, ...) to run a bare node definition
//   - run_model_node(model, node, inputs, ...) to isolate a node of a model
//   - set_debug_mode()
//
// Models and node definitions are given as serialized bytes or as any
// object with SerializeToString() (onnx.ModelProto, onnx.NodeProto). A node
// definition may also be a dict with op_type/inputs/outputs and optional
// name/domain/attributes.
//
// Inputs are a list or a dict of NumPy arrays (any of the eleven bridged
// dtypes, or complex64/complex128); slots listed in `file_args` hold
// descriptor strings instead. Outputs come back as an Outputs object,
// indexable by position and by name in the order the graph declares them.
// Sessions run on the reference CPU engine.
//
// Build: `maturin develop --release` or `pip install .`
// Usage: `import vole`

use std::path::PathBuf;
use std::sync::Arc;

use numpy::{
    Complex32, Complex64, IntoPyArray, PyArrayDyn, PyArrayMethods, PyUntypedArray,
    PyUntypedArrayMethods,
};
use pyo3::exceptions::{
    PyAttributeError, PyIndexError, PyKeyError, PyRuntimeError, PyTypeError, PyValueError,
};
use pyo3::prelude::*;
use pyo3::types::{PyBool, PyBytes, PyDict, PyFloat, PyIterator, PyList, PyLong, PyString, PyTuple};

use vole::onnx::{OnnxAttribute, OnnxModel, OnnxNode, OnnxTensor};
use vole::{
    tensor_from_array, Engine, Error, FileArg, GraphSession, HostArray, InputValue, Inputs,
    Outputs, RunOptions,
};
use vole_cpu::CpuEngine;

// Helpers

fn to_py_err(e: Error) -> PyErr {
    let msg = e.to_string();
    match e {
        Error::UnsupportedType(_)
        | Error::UnsupportedDType(_)
        | Error::TypeMismatch(_)
        | Error::DTypeMismatch { .. } => PyTypeError::new_err(msg),
        Error::ShapeMismatch { .. }
        | Error::LoadError(_)
        | Error::DuplicateName(_)
        | Error::InvalidArgument(_)
        | Error::Decode(_) => PyValueError::new_err(msg),
        Error::NodeNotFound(_) | Error::InitializerNotFound(_) => PyKeyError::new_err(msg),
        Error::ExecutionFailure(_)
        | Error::AllocationError { .. }
        | Error::FileArgUnresolved(_)
        | Error::Io(_)
        | Error::Msg(_) => PyRuntimeError::new_err(msg),
    }
}

fn engine() -> Arc<dyn Engine> {
    Arc::new(CpuEngine::new())
}

macro_rules! try_numpy {
    ($obj:expr, $($ty:ty),*) => {
        $(
            if let Ok(arr) = $obj.downcast::<PyArrayDyn<$ty>>() {
                let view = arr
                    .try_readonly()
                    .map_err(|e| PyRuntimeError::new_err(format!("cannot read array: {e}")))?;
                return Ok(HostArray::from(view.as_array().to_owned()));
            }
        )*
    };
}

/// Copy a NumPy array into a host array.
fn to_host(obj: &Bound<'_, PyAny>) -> PyResult<HostArray> {
    try_numpy!(obj, i8, u8, i16, u16, i32, u32, i64, u64, f32, f64, bool, Complex32, Complex64);
    if let Ok(arr) = obj.downcast::<PyUntypedArray>() {
        return Err(PyTypeError::new_err(format!("unsupported dtype: {}", arr.dtype())));
    }
    Err(PyTypeError::new_err(format!(
        "expected a numpy array, got {}",
        obj.get_type().name()?
    )))
}

fn to_value(obj: &Bound<'_, PyAny>) -> PyResult<InputValue> {
    if let Ok(s) = obj.downcast::<PyString>() {
        return Ok(InputValue::Descriptor(s.to_str()?.to_string()));
    }
    Ok(InputValue::Array(to_host(obj)?))
}

fn to_inputs(obj: &Bound<'_, PyAny>) -> PyResult<Inputs> {
    if let Ok(dict) = obj.downcast::<PyDict>() {
        let mut entries = Vec::with_capacity(dict.len());
        for (key, value) in dict.iter() {
            let name = key
                .downcast::<PyString>()
                .map_err(|_| PyTypeError::new_err("input names must be strings"))?
                .to_str()?
                .to_string();
            entries.push((name, to_value(&value)?));
        }
        return Ok(Inputs::Map(entries));
    }
    if obj.is_instance_of::<PyList>() || obj.is_instance_of::<PyTuple>() {
        let values = obj
            .iter()?
            .map(|item| to_value(&item?))
            .collect::<PyResult<Vec<_>>>()?;
        return Ok(Inputs::List(values));
    }
    Err(PyTypeError::new_err("inputs must be a list or a dict"))
}

fn flag(obj: Option<&Bound<'_, PyAny>>, name: &str) -> PyResult<bool> {
    match obj {
        None => Ok(false),
        Some(v) if v.is_instance_of::<PyBool>() => v.extract(),
        Some(_) => Err(PyTypeError::new_err(format!("{name} must be a bool"))),
    }
}

fn run_options(
    file_args: Option<&Bound<'_, PyAny>>,
    save_file_arg: Option<&Bound<'_, PyAny>>,
    use_initializers: Option<&Bound<'_, PyAny>>,
) -> PyResult<RunOptions> {
    let mut args = Vec::new();
    if let Some(obj) = file_args {
        let list = obj
            .downcast::<PyList>()
            .map_err(|_| PyTypeError::new_err("file_args must be a list"))?;
        for item in list.iter() {
            if item.is_instance_of::<PyBool>() {
                return Err(PyTypeError::new_err("file_args entries must be int or str"));
            }
            if let Ok(s) = item.downcast::<PyString>() {
                args.push(FileArg::Name(s.to_str()?.to_string()));
            } else if let Ok(i) = item.extract::<usize>() {
                args.push(FileArg::Index(i));
            } else {
                return Err(PyTypeError::new_err("file_args entries must be int or str"));
            }
        }
    }
    Ok(RunOptions::new()
        .with_file_args(args)
        .with_save_file_arg(flag(save_file_arg, "save_file_arg")?)
        .with_use_initializers(flag(use_initializers, "use_initializers")?))
}

/// Bytes of a serialized message: `bytes`, or the result of
/// `SerializeToString()`.
fn serialized(obj: &Bound<'_, PyAny>, what: &str) -> PyResult<Vec<u8>> {
    if let Ok(bytes) = obj.downcast::<PyBytes>() {
        return Ok(bytes.as_bytes().to_vec());
    }
    if obj.hasattr("SerializeToString")? {
        let out = obj.call_method0("SerializeToString")?;
        let bytes = out.downcast::<PyBytes>()?;
        return Ok(bytes.as_bytes().to_vec());
    }
    Err(PyTypeError::new_err(format!(
        "{what} must be bytes or an object with SerializeToString()"
    )))
}

/// A node name from a string, a `get_node` dict or a NodeProto.
fn node_name(obj: &Bound<'_, PyAny>) -> PyResult<String> {
    if let Ok(s) = obj.downcast::<PyString>() {
        return Ok(s.to_str()?.to_string());
    }
    if let Ok(dict) = obj.downcast::<PyDict>() {
        return match dict.get_item("name")? {
            Some(name) => name.extract(),
            None => Err(PyKeyError::new_err("node dict has no 'name'")),
        };
    }
    if let Ok(name) = obj.getattr("name") {
        if let Ok(name) = name.extract::<String>() {
            return Ok(name);
        }
    }
    Err(PyTypeError::new_err(
        "node must be a name, a node dict or a NodeProto",
    ))
}

fn to_attribute(name: &str, value: &Bound<'_, PyAny>) -> PyResult<OnnxAttribute> {
    if value.is_instance_of::<PyBool>() {
        return Ok(OnnxAttribute::Int(i64::from(value.extract::<bool>()?)));
    }
    if value.is_instance_of::<PyLong>() {
        return Ok(OnnxAttribute::Int(value.extract()?));
    }
    if value.is_instance_of::<PyFloat>() {
        return Ok(OnnxAttribute::Float(value.extract::<f64>()? as f32));
    }
    if let Ok(s) = value.downcast::<PyString>() {
        return Ok(OnnxAttribute::String(s.to_str()?.to_string()));
    }
    if value.is_instance_of::<PyList>() || value.is_instance_of::<PyTuple>() {
        if let Ok(ints) = value.extract::<Vec<i64>>() {
            return Ok(OnnxAttribute::Ints(ints));
        }
        if let Ok(floats) = value.extract::<Vec<f32>>() {
            return Ok(OnnxAttribute::Floats(floats));
        }
        if let Ok(strings) = value.extract::<Vec<String>>() {
            return Ok(OnnxAttribute::Strings(strings));
        }
        return Err(PyTypeError::new_err(format!(
            "attribute '{name}' must be a list of ints, floats or strings"
        )));
    }
    let tensor = tensor_from_array(&to_host(value)?).map_err(to_py_err)?;
    let mut tensor = OnnxTensor::from_engine_tensor(&tensor);
    tensor.name = name.to_string();
    Ok(OnnxAttribute::Tensor(tensor))
}

fn node_from_dict(dict: &Bound<'_, PyDict>) -> PyResult<OnnxNode> {
    let text = |key: &str| -> PyResult<Option<String>> {
        dict.get_item(key)?.map(|v| v.extract()).transpose()
    };
    let names = |key: &str| -> PyResult<Vec<String>> {
        Ok(dict
            .get_item(key)?
            .map(|v| v.extract())
            .transpose()?
            .unwrap_or_default())
    };
    let mut node = OnnxNode {
        op_type: text("op_type")?
            .ok_or_else(|| PyKeyError::new_err("node definition needs an 'op_type'"))?,
        name: text("name")?.unwrap_or_default(),
        domain: text("domain")?.unwrap_or_default(),
        inputs: names("inputs")?,
        outputs: names("outputs")?,
        attributes: Vec::new(),
    };
    if let Some(attrs) = dict.get_item("attributes")? {
        let attrs = attrs
            .downcast::<PyDict>()
            .map_err(|_| PyTypeError::new_err("attributes must be a dict"))?;
        for (key, value) in attrs.iter() {
            let key: String = key.extract()?;
            let value = to_attribute(&key, &value)?;
            node.attributes.push((key, value));
        }
    }
    Ok(node)
}

/// A node definition from a dict, NodeProto bytes or a NodeProto.
fn node_def(obj: &Bound<'_, PyAny>) -> PyResult<OnnxNode> {
    if let Ok(dict) = obj.downcast::<PyDict>() {
        return node_from_dict(dict);
    }
    let bytes = serialized(obj, "node_def")?;
    OnnxNode::from_bytes(&bytes).map_err(to_py_err)
}

fn to_py(py: Python<'_>, array: HostArray) -> PyResult<PyObject> {
    Ok(match array {
        HostArray::I8(a) => a.into_pyarray_bound(py).into_any().unbind(),
        HostArray::U8(a) => a.into_pyarray_bound(py).into_any().unbind(),
        HostArray::I16(a) => a.into_pyarray_bound(py).into_any().unbind(),
        HostArray::U16(a) => a.into_pyarray_bound(py).into_any().unbind(),
        HostArray::I32(a) => a.into_pyarray_bound(py).into_any().unbind(),
        HostArray::U32(a) => a.into_pyarray_bound(py).into_any().unbind(),
        HostArray::I64(a) => a.into_pyarray_bound(py).into_any().unbind(),
        HostArray::U64(a) => a.into_pyarray_bound(py).into_any().unbind(),
        HostArray::F32(a) => a.into_pyarray_bound(py).into_any().unbind(),
        HostArray::F64(a) => a.into_pyarray_bound(py).into_any().unbind(),
        HostArray::Bool(a) => a.into_pyarray_bound(py).into_any().unbind(),
        HostArray::C64(a) => a.into_pyarray_bound(py).into_any().unbind(),
        HostArray::C128(a) => a.into_pyarray_bound(py).into_any().unbind(),
        HostArray::F16(_) => return Err(PyTypeError::new_err("unsupported dtype: float16")),
    })
}

// PyOutputs

/// Run results, indexable by position and by output name.
#[pyclass(name = "Outputs")]
struct PyOutputs {
    names: Vec<String>,
    values: Vec<PyObject>,
}

impl PyOutputs {
    fn from_outputs(py: Python<'_>, outputs: Outputs) -> PyResult<Self> {
        let mut names = Vec::with_capacity(outputs.len());
        let mut values = Vec::with_capacity(outputs.len());
        for (name, array) in outputs {
            names.push(name);
            values.push(to_py(py, array)?);
        }
        Ok(Self { names, values })
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }
}

#[pymethods]
impl PyOutputs {
    fn __len__(&self) -> usize {
        self.values.len()
    }

    fn __getitem__(&self, py: Python<'_>, key: &Bound<'_, PyAny>) -> PyResult<PyObject> {
        if let Ok(name) = key.downcast::<PyString>() {
            let name = name.to_str()?;
            return self
                .position(name)
                .map(|i| self.values[i].clone_ref(py))
                .ok_or_else(|| PyKeyError::new_err(name.to_string()));
        }
        let index: isize = key
            .extract()
            .map_err(|_| PyTypeError::new_err("outputs are indexed by int or str"))?;
        let len = self.values.len() as isize;
        let i = if index < 0 { index + len } else { index };
        if (0..len).contains(&i) {
            Ok(self.values[i as usize].clone_ref(py))
        } else {
            Err(PyIndexError::new_err(format!("output index {index} out of range")))
        }
    }

    fn __getattr__(&self, py: Python<'_>, name: &str) -> PyResult<PyObject> {
        self.position(name)
            .map(|i| self.values[i].clone_ref(py))
            .ok_or_else(|| PyAttributeError::new_err(format!("no output named '{name}'")))
    }

    fn __contains__(&self, key: &Bound<'_, PyAny>) -> PyResult<bool> {
        match key.downcast::<PyString>() {
            Ok(name) => Ok(self.position(name.to_str()?).is_some()),
            Err(_) => Ok(false),
        }
    }

    /// Iterates over the values, like a tuple.
    fn __iter__<'py>(slf: PyRef<'py, Self>) -> PyResult<Bound<'py, PyIterator>> {
        let py = slf.py();
        let values = PyTuple::new_bound(py, slf.values.iter().map(|v| v.clone_ref(py)));
        values.into_any().iter()
    }

    fn keys(&self) -> Vec<String> {
        self.names.clone()
    }

    fn values(&self, py: Python<'_>) -> Vec<PyObject> {
        self.values.iter().map(|v| v.clone_ref(py)).collect()
    }

    fn items(&self, py: Python<'_>) -> Vec<(String, PyObject)> {
        self.names
            .iter()
            .cloned()
            .zip(self.values.iter().map(|v| v.clone_ref(py)))
            .collect()
    }

    fn __repr__(&self) -> String {
        format!("Outputs({})", self.names.join(", "))
    }
}

// PySession

/// A prepared graph.
#[pyclass(name = "Session")]
struct PySession {
    inner: GraphSession,
}

#[pymethods]
impl PySession {
    /// Run the whole graph.
    #[pyo3(signature = (inputs, file_args=None, save_file_arg=None, use_initializers=None))]
    fn run(
        &mut self,
        py: Python<'_>,
        inputs: &Bound<'_, PyAny>,
        file_args: Option<&Bound<'_, PyAny>>,
        save_file_arg: Option<&Bound<'_, PyAny>>,
        use_initializers: Option<&Bound<'_, PyAny>>,
    ) -> PyResult<PyOutputs> {
        let options = run_options(file_args, save_file_arg, use_initializers)?;
        let inputs = to_inputs(inputs)?;
        let outputs = self.inner.run(inputs, &options).map_err(to_py_err)?;
        PyOutputs::from_outputs(py, outputs)
    }

    /// Run a single node, given by name, by a `get_node` dict or by a
    /// NodeProto.
    #[pyo3(signature = (node, inputs, file_args=None, save_file_arg=None, use_initializers=None))]
    fn run_node(
        &mut self,
        py: Python<'_>,
        node: &Bound<'_, PyAny>,
        inputs: &Bound<'_, PyAny>,
        file_args: Option<&Bound<'_, PyAny>>,
        save_file_arg: Option<&Bound<'_, PyAny>>,
        use_initializers: Option<&Bound<'_, PyAny>>,
    ) -> PyResult<PyOutputs> {
        let name = node_name(node)?;
        let options = run_options(file_args, save_file_arg, use_initializers)?;
        let inputs = to_inputs(inputs)?;
        let outputs = self
            .inner
            .run_node(&name, inputs, &options)
            .map_err(to_py_err)?;
        PyOutputs::from_outputs(py, outputs)
    }

    /// Node definition as a dict: name, op_type, domain, inputs, outputs.
    fn get_node<'py>(&self, py: Python<'py>, name: &str) -> PyResult<Bound<'py, PyDict>> {
        let node = self.inner.get_node(name).map_err(to_py_err)?;
        let dict = PyDict::new_bound(py);
        dict.set_item("name", &node.name)?;
        dict.set_item("op_type", &node.op_type)?;
        dict.set_item("domain", &node.domain)?;
        dict.set_item("inputs", node.inputs.clone())?;
        dict.set_item("outputs", node.outputs.clone())?;
        Ok(dict)
    }

    fn get_initializer(&self, py: Python<'_>, name: &str) -> PyResult<PyObject> {
        let array = self.inner.get_initializer(name).map_err(to_py_err)?;
        to_py(py, array)
    }

    /// Resolve a descriptor; `None` when it yields no data.
    #[pyo3(signature = (descriptor, persist=false))]
    fn get_input_from_file_arg(
        &self,
        py: Python<'_>,
        descriptor: &str,
        persist: bool,
    ) -> PyResult<Option<PyObject>> {
        self.inner
            .get_input_from_file_arg(descriptor, persist)
            .map_err(to_py_err)?
            .map(|a| to_py(py, a))
            .transpose()
    }

    fn reset(&mut self) {
        self.inner.reset();
    }

    #[getter]
    fn input_names(&self) -> Vec<String> {
        self.inner.input_names()
    }

    #[getter]
    fn output_names(&self) -> Vec<String> {
        self.inner.output_names()
    }

    #[getter]
    fn node_names(&self) -> Vec<String> {
        self.inner.node_names()
    }

    #[getter]
    fn initializer_names(&self) -> Vec<String> {
        self.inner.initializer_names()
    }

    fn __repr__(&self) -> String {
        format!("Session(graph={:?})", self.inner.model().graph.name)
    }
}

// Module functions

/// Prepare a session from model bytes or an onnx.ModelProto.
#[pyfunction]
fn prepare(model: &Bound<'_, PyAny>) -> PyResult<PySession> {
    let bytes = serialized(model, "model")?;
    let inner = GraphSession::prepare_bytes(engine(), &bytes).map_err(to_py_err)?;
    Ok(PySession { inner })
}

/// Prepare a session from a model file.
#[pyfunction]
fn prepare_file(path: PathBuf) -> PyResult<PySession> {
    let inner = GraphSession::prepare_file(engine(), path).map_err(to_py_err)?;
    Ok(PySession { inner })
}

/// Run a bare node definition in a model of its own.
#[pyfunction]
#[pyo3(signature = (node_def, inputs, file_args=None, save_file_arg=None, use_initializers=None))]
fn run_node(
    py: Python<'_>,
    node_def: &Bound<'_, PyAny>,
    inputs: &Bound<'_, PyAny>,
    file_args: Option<&Bound<'_, PyAny>>,
    save_file_arg: Option<&Bound<'_, PyAny>>,
    use_initializers: Option<&Bound<'_, PyAny>>,
) -> PyResult<PyOutputs> {
    let node = self::node_def(node_def)?;
    let options = run_options(file_args, save_file_arg, use_initializers)?;
    let inputs = to_inputs(inputs)?;
    let outputs = vole::run_node_def(engine(), &node, inputs, &options).map_err(to_py_err)?;
    PyOutputs::from_outputs(py, outputs)
}

/// Run one node of a model in isolation; initializers come from the model.
#[pyfunction]
#[pyo3(signature = (
    model, node, inputs, file_args=None, save_file_arg=None, use_initializers=None
))]
fn run_model_node(
    py: Python<'_>,
    model: &Bound<'_, PyAny>,
    node: &Bound<'_, PyAny>,
    inputs: &Bound<'_, PyAny>,
    file_args: Option<&Bound<'_, PyAny>>,
    save_file_arg: Option<&Bound<'_, PyAny>>,
    use_initializers: Option<&Bound<'_, PyAny>>,
) -> PyResult<PyOutputs> {
    let name = node_name(node)?;
    let options = run_options(file_args, save_file_arg, use_initializers)?;
    let inputs = to_inputs(inputs)?;
    let model = OnnxModel::from_bytes(&serialized(model, "model")?)
        .map_err(|e| to_py_err(Error::LoadError(e.to_string())))?;
    let outputs =
        vole::run_node(engine(), &model, name.as_str(), inputs, &options).map_err(to_py_err)?;
    PyOutputs::from_outputs(py, outputs)
}

/// Turn on debug logging for the rest of the process.
#[pyfunction]
fn set_debug_mode() {
    vole::set_debug_mode();
}

#[pymodule]
#[pyo3(name = "vole")]
fn vole_python(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PySession>()?;
    m.add_class::<PyOutputs>()?;
    m.add_function(wrap_pyfunction!(prepare, m)?)?;
    m.add_function(wrap_pyfunction!(prepare_file, m)?)?;
    m.add_function(wrap_pyfunction!(run_node, m)?)?;
    m.add_function(wrap_pyfunction!(run_model_node, m)?)?;
    m.add_function(wrap_pyfunction!(set_debug_mode, m)?)?;
    m.add("__version__", env!("CARGO_PKG_VERSION"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_py<F: for<'py> FnOnce(Python<'py>)>(f: F) {
        pyo3::prepare_freethreaded_python();
        Python::with_gil(f);
    }

    fn eval<'py>(py: Python<'py>, code: &str) -> Bound<'py, PyAny> {
        py.eval_bound(code, None, None).unwrap()
    }

    #[test]
    fn test_error_mapping() {
        with_py(|py| {
            let type_errors = [
                Error::UnsupportedType("x".into()),
                Error::UnsupportedDType("float16".into()),
                Error::TypeMismatch("x".into()),
            ];
            for e in type_errors {
                assert!(to_py_err(e).is_instance_of::<PyTypeError>(py));
            }
            let value_errors = [
                Error::LoadError("x".into()),
                Error::InvalidArgument("x".into()),
                Error::DuplicateName("x".into()),
                Error::Decode("x".into()),
            ];
            for e in value_errors {
                assert!(to_py_err(e).is_instance_of::<PyValueError>(py));
            }
            assert!(to_py_err(Error::NodeNotFound("n".into())).is_instance_of::<PyKeyError>(py));
            assert!(
                to_py_err(Error::InitializerNotFound("w".into())).is_instance_of::<PyKeyError>(py)
            );
            let failure = to_py_err(Error::ExecutionFailure("boom".into()));
            assert!(failure.is_instance_of::<PyRuntimeError>(py));
            assert!(failure.to_string().contains("boom"));
            assert!(to_py_err(Error::FileArgUnresolved("a.pb::x".into()))
                .is_instance_of::<PyRuntimeError>(py));
        });
    }

    #[test]
    fn test_run_options_from_python() {
        with_py(|py| {
            let args = eval(py, "[0, 'w']");
            let yes = eval(py, "True");
            let opts = run_options(Some(&args), Some(&yes), None).unwrap();
            assert_eq!(
                opts.file_args,
                vec![FileArg::Index(0), FileArg::Name("w".into())]
            );
            assert!(opts.save_file_arg);
            assert!(!opts.use_initializers);
            assert_eq!(run_options(None, None, None).unwrap(), RunOptions::default());
        });
    }

    #[test]
    fn test_run_options_validation() {
        with_py(|py| {
            for bad in ["(0,)", "0", "'0'", "[True]", "[1.5]", "[-1]", "[None]"] {
                let args = eval(py, bad);
                let err = run_options(Some(&args), None, None).unwrap_err();
                assert!(err.is_instance_of::<PyTypeError>(py), "file_args={bad}");
            }
            for bad in ["1", "'yes'", "None"] {
                let value = eval(py, bad);
                let err = run_options(None, Some(&value), None).unwrap_err();
                assert!(err.is_instance_of::<PyTypeError>(py), "save_file_arg={bad}");
                let err = run_options(None, None, Some(&value)).unwrap_err();
                assert!(err.is_instance_of::<PyTypeError>(py), "use_initializers={bad}");
            }
        });
    }

    #[test]
    fn test_inputs_from_python() {
        with_py(|py| {
            let map = to_inputs(&eval(py, "{'x': 'a.pb::0:1'}")).unwrap();
            assert_eq!(
                map,
                Inputs::Map(vec![(
                    "x".into(),
                    InputValue::Descriptor("a.pb::0:1".into())
                )])
            );
            let list = to_inputs(&eval(py, "('a.pb',)")).unwrap();
            assert_eq!(list, Inputs::List(vec![InputValue::Descriptor("a.pb".into())]));

            let err = to_inputs(&eval(py, "{1: 'a.pb'}")).unwrap_err();
            assert!(err.is_instance_of::<PyTypeError>(py));
            let err = to_inputs(&eval(py, "3")).unwrap_err();
            assert!(err.is_instance_of::<PyTypeError>(py));
        });
    }

    #[test]
    fn test_node_name_forms() {
        with_py(|py| {
            assert_eq!(node_name(&eval(py, "'add_0'")).unwrap(), "add_0");
            assert_eq!(
                node_name(&eval(py, "{'name': 'add_0', 'op_type': 'Add'}")).unwrap(),
                "add_0"
            );
            let proto = eval(py, "type('NodeProto', (), {'name': 'mul_0'})()");
            assert_eq!(node_name(&proto).unwrap(), "mul_0");

            let err = node_name(&eval(py, "{'op_type': 'Add'}")).unwrap_err();
            assert!(err.is_instance_of::<PyKeyError>(py));
            let err = node_name(&eval(py, "7")).unwrap_err();
            assert!(err.is_instance_of::<PyTypeError>(py));
        });
    }

    #[test]
    fn test_node_def_forms() {
        with_py(|py| {
            let expected = OnnxNode::new("Add", "add", &["X", "Y"], &["Z"])
                .with_attribute("axis", OnnxAttribute::Int(1))
                .with_attribute("alpha", OnnxAttribute::Float(0.5))
                .with_attribute("mode", OnnxAttribute::String("constant".into()))
                .with_attribute("perm", OnnxAttribute::Ints(vec![1, 0]));
            let dict = eval(
                py,
                "{'op_type': 'Add', 'name': 'add', 'inputs': ['X', 'Y'], 'outputs': ['Z'], \
                 'attributes': {'axis': 1, 'alpha': 0.5, 'mode': 'constant', 'perm': [1, 0]}}",
            );
            assert_eq!(node_def(&dict).unwrap(), expected);

            let bytes = PyBytes::new_bound(py, &expected.to_bytes());
            assert_eq!(node_def(bytes.as_any()).unwrap(), expected);

            let globals = PyDict::new_bound(py);
            globals.set_item("data", bytes).unwrap();
            let proto = py
                .eval_bound(
                    "type('NodeProto', (), {'SerializeToString': lambda self: data})()",
                    Some(&globals),
                    None,
                )
                .unwrap();
            assert_eq!(node_def(&proto).unwrap(), expected);

            let err = node_def(&eval(py, "{'inputs': ['X']}")).unwrap_err();
            assert!(err.is_instance_of::<PyKeyError>(py));
            let err = node_def(&eval(py, "42")).unwrap_err();
            assert!(err.is_instance_of::<PyTypeError>(py));
        });
    }

    #[test]
    fn test_model_bytes_from_serializable() {
        with_py(|py| {
            let model = OnnxModel::new("g").to_bytes();
            let bytes = PyBytes::new_bound(py, &model);
            assert_eq!(serialized(bytes.as_any(), "model").unwrap(), model);

            let globals = PyDict::new_bound(py);
            globals.set_item("data", bytes).unwrap();
            let proto = py
                .eval_bound(
                    "type('ModelProto', (), {'SerializeToString': lambda self: data})()",
                    Some(&globals),
                    None,
                )
                .unwrap();
            assert_eq!(serialized(&proto, "model").unwrap(), model);
            assert!(serialized(&eval(py, "'g.onnx'"), "model")
                .unwrap_err()
                .is_instance_of::<PyTypeError>(py));
        });
    }

    #[test]
    fn test_outputs_by_index_and_name() {
        with_py(|py| {
            let outputs = PyOutputs {
                names: vec!["y".into(), "z".into()],
                values: vec![10i64.into_py(py), 20i64.into_py(py)],
            };
            let outputs = Bound::new(py, outputs).unwrap().into_any();

            let get = |key: &str| -> PyResult<i64> { outputs.get_item(eval(py, key))?.extract() };
            assert_eq!(get("0").unwrap(), 10);
            assert_eq!(get("-1").unwrap(), 20);
            assert_eq!(get("'z'").unwrap(), 20);
            assert!(get("2").unwrap_err().is_instance_of::<PyIndexError>(py));
            assert!(get("'w'").unwrap_err().is_instance_of::<PyKeyError>(py));
            assert!(get("1.0").unwrap_err().is_instance_of::<PyTypeError>(py));

            assert_eq!(outputs.len().unwrap(), 2);
            assert_eq!(outputs.getattr("y").unwrap().extract::<i64>().unwrap(), 10);
            assert!(outputs.contains("z").unwrap());
            assert!(!outputs.contains(0).unwrap());
            let values: Vec<i64> = outputs
                .iter()
                .unwrap()
                .map(|v| v.unwrap().extract().unwrap())
                .collect();
            assert_eq!(values, vec![10, 20]);
            let keys: Vec<String> = outputs.call_method0("keys").unwrap().extract().unwrap();
            assert_eq!(keys, vec!["y", "z"]);
        });
    }
}
