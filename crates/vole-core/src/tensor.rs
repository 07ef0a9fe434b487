use ndarray::ArrayD;

use crate::buffer::{
    element_count, engine_to_host_array, host_to_engine_array, typed_to_engine, EngineArray,
};
use crate::dtype::{DType, Element, ElementType};
use crate::error::{Error, Result};
use crate::host::HostArray;
use crate::with_host_array;

/// The engine's tensor abstraction: a name, declared dims and a flat
/// element buffer.
///
/// Building one from a host array always copies; the tensor never aliases
/// host memory.
#[derive(Debug, Clone)]
pub struct EngineTensor {
    name: String,
    dims: Vec<usize>,
    buffer: EngineArray,
}

impl EngineTensor {
    /// Wrap an engine array. The dims are taken as declared and are only
    /// checked against the element count when the tensor is read back.
    pub fn new(name: impl Into<String>, dims: Vec<usize>, buffer: EngineArray) -> Self {
        Self {
            name: name.into(),
            dims,
            buffer: buffer.flatten(),
        }
    }

    /// Typed constructor from an ndarray.
    pub fn from_array<T: Element>(name: impl Into<String>, array: &ArrayD<T>) -> Result<Self> {
        let buffer = typed_to_engine(array)?;
        let dims = buffer.dims().to_vec();
        Ok(Self::new(name, dims, buffer))
    }

    /// Typed constructor from a flat row-major vector.
    pub fn from_vec<T: Element>(
        name: impl Into<String>,
        dims: Vec<usize>,
        data: Vec<T>,
    ) -> Result<Self> {
        let expected = element_count(&dims)?;
        if expected != data.len() {
            return Err(Error::ShapeMismatch {
                dims,
                expected,
                got: data.len(),
            });
        }
        let buffer = EngineArray::from_bytes(
            T::DTYPE.element_type(),
            vec![data.len()],
            bytemuck::cast_slice(&data).to_vec(),
        )?;
        Ok(Self::new(name, dims, buffer))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn elem_type(&self) -> ElementType {
        self.buffer.elem_type()
    }

    /// The host dtype of the elements, if the type table maps it.
    pub fn dtype(&self) -> Result<DType> {
        self.buffer.elem_type().to_dtype()
    }

    /// Number of elements in the buffer.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn buffer(&self) -> &EngineArray {
        &self.buffer
    }

    /// Read the tensor back as a typed ndarray shaped by `dims`. Fails with
    /// `DTypeMismatch` if the elements are not `T`.
    pub fn to_array<T: Element>(&self) -> Result<ArrayD<T>> {
        let got = self.dtype()?;
        if got != T::DTYPE {
            return Err(Error::DTypeMismatch {
                expected: T::DTYPE,
                got,
            });
        }
        T::from_host(array_from_tensor(self)?)
    }
}

/// Copy a host array into an engine tensor.
///
/// Only the eleven bridged dtypes are accepted; half precision and complex
/// arrays fail with `UnsupportedDType`.
pub fn tensor_from_array(array: &HostArray) -> Result<EngineTensor> {
    with_host_array!(array, a => EngineTensor::from_array("", a), other => {
        Err(Error::UnsupportedDType(other.dtype_name().to_string()))
    })
}

/// Copy an engine tensor back into a host array shaped by its dims.
pub fn array_from_tensor(tensor: &EngineTensor) -> Result<HostArray> {
    let flat = engine_to_host_array(tensor.buffer())?;
    flat.reshape(tensor.dims())
}

/// Convert an ordered list of host arrays.
pub fn tensor_list(arrays: &[HostArray]) -> Result<Vec<EngineTensor>> {
    arrays.iter().map(tensor_from_array).collect()
}

/// Convert a name-keyed collection, keeping insertion order. Names must be
/// unique.
pub fn tensor_map(arrays: &[(String, HostArray)]) -> Result<Vec<(String, EngineTensor)>> {
    let mut out: Vec<(String, EngineTensor)> = Vec::with_capacity(arrays.len());
    for (name, array) in arrays {
        if out.iter().any(|(n, _)| n == name) {
            return Err(Error::DuplicateName(name.clone()));
        }
        out.push((name.clone(), tensor_from_array(array)?.with_name(name.as_str())));
    }
    Ok(out)
}

pub fn array_list(tensors: &[EngineTensor]) -> Result<Vec<HostArray>> {
    tensors.iter().map(array_from_tensor).collect()
}

pub fn array_map(tensors: &[(String, EngineTensor)]) -> Result<Vec<(String, HostArray)>> {
    tensors
        .iter()
        .map(|(name, t)| Ok((name.clone(), array_from_tensor(t)?)))
        .collect()
}

/// Lower-level escape hatch: marshal any host array (complex included)
/// into an engine tensor, using the expanded shape as dims.
pub fn tensor_from_marshalled(name: &str, array: &HostArray) -> Result<EngineTensor> {
    let buffer = host_to_engine_array(array)?;
    let dims = buffer.dims().to_vec();
    Ok(EngineTensor::new(name, dims, buffer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use half::f16;
    use ndarray::IxDyn;
    use num_complex::Complex;

    #[test]
    fn test_tensor_from_array_keeps_dims() {
        let host = HostArray::from_shape_vec(&[2, 3], (0..6i64).collect()).unwrap();
        let t = tensor_from_array(&host).unwrap();
        assert_eq!(t.dims(), &[2, 3]);
        assert_eq!(t.buffer().dims(), &[6]);
        assert_eq!(t.elem_type(), ElementType::Int64);
        assert_eq!(array_from_tensor(&t).unwrap(), host);
    }

    #[test]
    fn test_unsupported_dtypes() {
        let half = HostArray::from(ArrayD::from_elem(IxDyn(&[1]), f16::ONE));
        assert!(matches!(
            tensor_from_array(&half),
            Err(Error::UnsupportedDType(_))
        ));
        let complex = HostArray::from(ArrayD::from_elem(IxDyn(&[1]), Complex::new(0.0f32, 1.0)));
        assert!(matches!(
            tensor_from_array(&complex),
            Err(Error::UnsupportedDType(ref d)) if d == "complex64"
        ));
        let t = tensor_from_marshalled("c", &complex).unwrap();
        assert_eq!(t.dims(), &[1, 2]);
    }

    #[test]
    fn test_declared_dims_must_match_buffer() {
        let buffer =
            EngineArray::from_bytes(ElementType::UInt8, vec![4], vec![1, 2, 3, 4]).unwrap();
        let t = EngineTensor::new("x", vec![3, 2], buffer);
        let err = array_from_tensor(&t).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { expected: 6, got: 4, .. }));
    }

    #[test]
    fn test_from_vec() {
        let t = EngineTensor::from_vec("w", vec![2, 2], vec![1.0f32, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(t.name(), "w");
        let a = t.to_array::<f32>().unwrap();
        assert_eq!(a[[1, 0]], 3.0);
        assert!(matches!(
            t.to_array::<f64>(),
            Err(Error::DTypeMismatch {
                expected: DType::F64,
                got: DType::F32
            })
        ));
        assert!(EngineTensor::from_vec("w", vec![3], vec![1u8, 2]).is_err());
    }

    #[test]
    fn test_tensor_map_preserves_order_and_rejects_duplicates() {
        let a = HostArray::from_shape_vec(&[1], vec![1i32]).unwrap();
        let b = HostArray::from_shape_vec(&[1], vec![2i32]).unwrap();
        let named = vec![("z".to_string(), a.clone()), ("a".to_string(), b)];
        let tensors = tensor_map(&named).unwrap();
        let names: Vec<&str> = tensors.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["z", "a"]);
        assert_eq!(tensors[0].1.name(), "z");
        assert_eq!(array_map(&tensors).unwrap(), named);

        let dup = vec![("x".to_string(), a.clone()), ("x".to_string(), a)];
        assert!(matches!(tensor_map(&dup), Err(Error::DuplicateName(_))));
    }

    #[test]
    fn test_tensor_list_roundtrip() {
        let arrays = vec![
            HostArray::from_shape_vec(&[2], vec![true, false]).unwrap(),
            HostArray::from_shape_vec(&[1, 1], vec![9u16]).unwrap(),
        ];
        let tensors = tensor_list(&arrays).unwrap();
        assert_eq!(array_list(&tensors).unwrap(), arrays);
    }
}
