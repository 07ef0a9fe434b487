use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};

use ndarray::{ArrayD, IxDyn};
use num_complex::Complex;
use tracing::trace;

use crate::dtype::{to_host_dtype, Element, ElementType};
use crate::error::{Error, Result};
use crate::host::HostArray;
use crate::{with_dtype, with_host_array};

// Buffer marshalling
//
// Host arrays and engine arrays never share memory. Every crossing is one
// bulk byte copy sized to the exact buffer length:
//
//   host -> engine: normalize to C order, expand complex to [..., 2],
//                   allocate the engine buffer, copy once
//   engine -> host: look up the dtype from the element type name,
//                   allocate a typed vector, copy once, attach the shape
//
// While bytes are being copied the engine buffer is pinned through a RAII
// guard. The guard drops on every exit path, so a failed copy never leaves
// the array pinned.

/// Engine-native array: element type, extents and an exactly-sized
/// little-endian byte buffer.
pub struct EngineArray {
    elem_type: ElementType,
    dims: Vec<usize>,
    bytes: Vec<u8>,
    pins: AtomicUsize,
}

impl EngineArray {
    /// Allocate a zero-filled array. Fails with `AllocationError` if the
    /// buffer cannot be reserved.
    pub fn allocate(elem_type: ElementType, dims: Vec<usize>) -> Result<Self> {
        let byte_len = byte_len_for(elem_type, &dims)?;
        Ok(Self {
            elem_type,
            dims,
            bytes: try_zeroed_vec(byte_len)?,
            pins: AtomicUsize::new(0),
        })
    }

    /// Wrap an existing byte buffer. The length must match the extents.
    pub fn from_bytes(elem_type: ElementType, dims: Vec<usize>, bytes: Vec<u8>) -> Result<Self> {
        let byte_len = byte_len_for(elem_type, &dims)?;
        if bytes.len() != byte_len {
            let size = elem_type.size_in_bytes().unwrap_or(1);
            return Err(Error::ShapeMismatch {
                expected: dims.iter().product(),
                got: bytes.len() / size,
                dims,
            });
        }
        Ok(Self {
            elem_type,
            dims,
            bytes,
            pins: AtomicUsize::new(0),
        })
    }

    pub fn elem_type(&self) -> ElementType {
        self.elem_type
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }

    /// Collapse to rank 1 without touching the bytes.
    pub fn flatten(mut self) -> Self {
        self.dims = vec![self.len()];
        self
    }

    /// Reinterpret the extents. The element count must not change.
    pub fn reshape(mut self, dims: Vec<usize>) -> Result<Self> {
        let expected = element_count(&dims)?;
        if expected != self.len() {
            return Err(Error::ShapeMismatch {
                got: self.len(),
                expected,
                dims,
            });
        }
        self.dims = dims;
        Ok(self)
    }

    /// Pin the buffer for reading.
    pub fn pin(&self) -> PinnedBytes<'_> {
        self.pins.fetch_add(1, Ordering::AcqRel);
        PinnedBytes { array: self }
    }

    /// Pin the buffer for writing.
    pub fn pin_mut(&mut self) -> PinnedBytesMut<'_> {
        self.pins.fetch_add(1, Ordering::AcqRel);
        PinnedBytesMut { array: self }
    }

    /// Whether a pin guard is currently alive.
    pub fn is_pinned(&self) -> bool {
        self.pins.load(Ordering::Acquire) > 0
    }

    /// Overwrite the whole buffer from `src` in one copy.
    pub fn fill_from(&mut self, src: &[u8]) -> Result<()> {
        let mut pinned = self.pin_mut();
        if pinned.len() != src.len() {
            return Err(Error::msg(format!(
                "buffer copy size mismatch: engine array holds {} bytes, source has {}",
                pinned.len(),
                src.len()
            )));
        }
        pinned.copy_from_slice(src);
        Ok(())
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl Clone for EngineArray {
    fn clone(&self) -> Self {
        Self {
            elem_type: self.elem_type,
            dims: self.dims.clone(),
            bytes: self.bytes.clone(),
            pins: AtomicUsize::new(0),
        }
    }
}

impl fmt::Debug for EngineArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineArray")
            .field("elem_type", &self.elem_type)
            .field("dims", &self.dims)
            .field("byte_len", &self.bytes.len())
            .finish()
    }
}

/// Read guard over an engine buffer. Unpins on drop.
pub struct PinnedBytes<'a> {
    array: &'a EngineArray,
}

impl Deref for PinnedBytes<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.array.bytes
    }
}

impl Drop for PinnedBytes<'_> {
    fn drop(&mut self) {
        self.array.pins.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Write guard over an engine buffer. Unpins on drop.
pub struct PinnedBytesMut<'a> {
    array: &'a mut EngineArray,
}

impl Deref for PinnedBytesMut<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.array.bytes
    }
}

impl DerefMut for PinnedBytesMut<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.array.bytes
    }
}

impl Drop for PinnedBytesMut<'_> {
    fn drop(&mut self) {
        self.array.pins.fetch_sub(1, Ordering::AcqRel);
    }
}

fn byte_len_for(elem_type: ElementType, dims: &[usize]) -> Result<usize> {
    let size = elem_type.size_in_bytes().ok_or_else(|| {
        Error::UnsupportedType(format!("engine type '{elem_type}' has no fixed width"))
    })?;
    dims.iter()
        .try_fold(size, |acc, &d| acc.checked_mul(d))
        .ok_or(Error::AllocationError { bytes: usize::MAX })
}

/// Number of elements described by `dims`. Fails with `InvalidArgument`
/// when the product does not fit in `usize`.
pub fn element_count(dims: &[usize]) -> Result<usize> {
    dims.iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| Error::InvalidArgument(format!("dims {dims:?} overflow the element count")))
}

/// A zero-filled vector of exactly `len` elements, or `AllocationError`.
pub(crate) fn try_zeroed_vec<T: bytemuck::Zeroable + Clone>(len: usize) -> Result<Vec<T>> {
    let mut out = Vec::new();
    out.try_reserve_exact(len).map_err(|_| Error::AllocationError {
        bytes: len.saturating_mul(std::mem::size_of::<T>()),
    })?;
    out.resize(len, T::zeroed());
    Ok(out)
}

/// Copy a host array into a freshly allocated engine array.
///
/// Non-contiguous arrays are copied into C order first. Complex arrays
/// become float arrays with a trailing axis of 2. Half precision has no
/// engine counterpart and fails with `UnsupportedType`.
pub fn host_to_engine_array(host: &HostArray) -> Result<EngineArray> {
    with_host_array!(host, a => typed_to_engine(a), other => match other {
        HostArray::C64(c) => complex_to_engine(c, ElementType::Float),
        HostArray::C128(c) => complex_to_engine(c, ElementType::Double),
        unsupported => Err(Error::UnsupportedType(unsupported.dtype_name().to_string())),
    })
}

pub(crate) fn typed_to_engine<T: Element>(array: &ArrayD<T>) -> Result<EngineArray> {
    let contiguous = array.as_standard_layout();
    let src = contiguous
        .as_slice()
        .ok_or_else(|| Error::msg("standard-layout array is not contiguous"))?;
    copy_into_engine(
        T::DTYPE.element_type(),
        array.shape().to_vec(),
        bytemuck::cast_slice(src),
    )
}

fn complex_to_engine<F>(array: &ArrayD<Complex<F>>, elem_type: ElementType) -> Result<EngineArray>
where
    Complex<F>: bytemuck::Pod,
{
    let contiguous = array.as_standard_layout();
    let src = contiguous
        .as_slice()
        .ok_or_else(|| Error::msg("standard-layout array is not contiguous"))?;
    let mut dims = array.shape().to_vec();
    dims.push(2);
    copy_into_engine(elem_type, dims, bytemuck::cast_slice(src))
}

fn copy_into_engine(elem_type: ElementType, dims: Vec<usize>, src: &[u8]) -> Result<EngineArray> {
    let mut array = EngineArray::allocate(elem_type, dims)?;
    array.fill_from(src)?;
    trace!(elem_type = %elem_type, dims = ?array.dims(), bytes = src.len(), "host -> engine copy");
    Ok(array)
}

/// Copy an engine array back into a host array of the mapped dtype.
pub fn engine_to_host_array(array: &EngineArray) -> Result<HostArray> {
    let dtype = to_host_dtype(array.elem_type().name())?;
    with_dtype!(dtype, T => read_typed::<T>(array))
}

fn read_typed<T: Element>(array: &EngineArray) -> Result<HostArray> {
    let data = {
        let pinned = array.pin();
        let expected = array.len() * T::DTYPE.size_in_bytes();
        if pinned.len() != expected {
            return Err(Error::ShapeMismatch {
                dims: array.dims().to_vec(),
                expected: array.len(),
                got: pinned.len() / T::DTYPE.size_in_bytes(),
            });
        }
        T::vec_from_bytes(&pinned)?
    };
    let got = data.len();
    let host = ArrayD::from_shape_vec(IxDyn(array.dims()), data).map_err(|_| {
        Error::ShapeMismatch {
            dims: array.dims().to_vec(),
            expected: array.len(),
            got,
        }
    })?;
    trace!(dtype = %T::DTYPE, dims = ?array.dims(), "engine -> host copy");
    Ok(T::into_host(host))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::DType;
    use half::f16;
    use ndarray::Array;

    fn roundtrip(host: &HostArray) -> HostArray {
        let engine = host_to_engine_array(host).unwrap();
        assert!(!engine.is_pinned());
        engine_to_host_array(&engine).unwrap()
    }

    #[test]
    fn test_roundtrip_every_dtype() {
        for dtype in DType::ALL {
            let host = with_dtype!(dtype, T => {
                let data: Vec<T> = (0..12).map(|i| sample::<T>(i)).collect();
                HostArray::from_shape_vec(&[3, 4], data).unwrap()
            });
            let engine = host_to_engine_array(&host).unwrap();
            assert_eq!(engine.elem_type(), dtype.element_type());
            assert_eq!(engine.dims(), &[3, 4]);
            assert_eq!(engine.byte_len(), 12 * dtype.size_in_bytes());
            assert_eq!(engine_to_host_array(&engine).unwrap(), host);
        }
    }

    fn sample<T: Element>(i: usize) -> T {
        let bytes = vec![(i % 2) as u8; std::mem::size_of::<T>()];
        T::vec_from_bytes(&bytes).unwrap()[0]
    }

    #[test]
    fn test_roundtrip_scalar_and_empty() {
        let scalar = HostArray::from_shape_vec(&[], vec![7.5f64]).unwrap();
        assert_eq!(roundtrip(&scalar), scalar);
        let empty = HostArray::from_shape_vec(&[0, 3], Vec::<i32>::new()).unwrap();
        assert_eq!(roundtrip(&empty), empty);
    }

    #[test]
    fn test_non_contiguous_matches_contiguous_copy() {
        let base = Array::from_shape_vec((3, 4), (0..12).map(|v| v as f32).collect())
            .unwrap()
            .into_dyn();
        let transposed = HostArray::from(base.t().to_owned());
        assert!(!transposed.is_standard_layout());
        let contiguous = transposed.clone().into_standard_layout();

        let a = host_to_engine_array(&transposed).unwrap();
        let b = host_to_engine_array(&contiguous).unwrap();
        assert_eq!(a.dims(), &[4, 3]);
        assert_eq!(&*a.pin(), &*b.pin());
        assert_eq!(engine_to_host_array(&a).unwrap(), contiguous);
    }

    #[test]
    fn test_complex64_expands_trailing_axis() {
        let values: Vec<Complex<f32>> = (0..6)
            .map(|i| Complex::new(i as f32, -(i as f32) * 0.5))
            .collect();
        let host = HostArray::from(ArrayD::from_shape_vec(IxDyn(&[2, 3]), values).unwrap());
        let engine = host_to_engine_array(&host).unwrap();
        assert_eq!(engine.elem_type(), ElementType::Float);
        assert_eq!(engine.dims(), &[2, 3, 2]);

        let back = engine_to_host_array(&engine).unwrap();
        assert_eq!(back.shape(), &[2, 3, 2]);
        assert_eq!(back.into_complex().unwrap(), host);
    }

    #[test]
    fn test_complex128_maps_to_double() {
        let host = HostArray::from(ArrayD::from_elem(IxDyn(&[4]), Complex::new(1.5f64, 2.5)));
        let engine = host_to_engine_array(&host).unwrap();
        assert_eq!(engine.elem_type(), ElementType::Double);
        assert_eq!(engine.dims(), &[4, 2]);
        let back = engine_to_host_array(&engine).unwrap().into_complex().unwrap();
        assert_eq!(back, host);
    }

    #[test]
    fn test_float16_rejected() {
        let host = HostArray::from(ArrayD::from_elem(IxDyn(&[2]), f16::from_f32(0.5)));
        let err = host_to_engine_array(&host).unwrap_err();
        assert!(matches!(err, Error::UnsupportedType(ref t) if t == "float16"));
    }

    #[test]
    fn test_unmapped_engine_type_rejected() {
        let engine = EngineArray::allocate(ElementType::Float16, vec![2]).unwrap();
        assert!(matches!(
            engine_to_host_array(&engine),
            Err(Error::UnsupportedType(_))
        ));
        assert!(!engine.is_pinned());
    }

    #[test]
    fn test_pin_released_on_copy_error() {
        let mut engine = EngineArray::allocate(ElementType::Int32, vec![2]).unwrap();
        assert!(engine.fill_from(&[0u8; 3]).is_err());
        assert!(!engine.is_pinned());
        engine.fill_from(&[1, 0, 0, 0, 2, 0, 0, 0]).unwrap();
        assert!(!engine.is_pinned());
    }

    #[test]
    fn test_pin_guard_counts() {
        let engine = EngineArray::allocate(ElementType::UInt8, vec![4]).unwrap();
        let first = engine.pin();
        let second = engine.pin();
        assert!(engine.is_pinned());
        drop(first);
        assert!(engine.is_pinned());
        drop(second);
        assert!(!engine.is_pinned());
    }

    #[test]
    fn test_from_bytes_validates_length() {
        assert!(EngineArray::from_bytes(ElementType::Double, vec![2], vec![0; 16]).is_ok());
        assert!(matches!(
            EngineArray::from_bytes(ElementType::Double, vec![2], vec![0; 12]),
            Err(Error::ShapeMismatch { .. })
        ));
        assert!(EngineArray::allocate(ElementType::String, vec![1]).is_err());
    }

    #[test]
    fn test_element_count_overflow() {
        assert_eq!(element_count(&[]).unwrap(), 1);
        assert_eq!(element_count(&[0, usize::MAX, usize::MAX]).unwrap(), 0);
        assert!(matches!(
            element_count(&[1 << 32, 1 << 32, 1 << 32]),
            Err(Error::InvalidArgument(_))
        ));
        let engine = EngineArray::allocate(ElementType::UInt8, vec![4]).unwrap();
        assert!(engine.reshape(vec![usize::MAX, 3]).is_err());
    }

    #[test]
    fn test_bool_roundtrip_preserves_values() {
        let host = HostArray::from_shape_vec(&[2, 2], vec![true, false, false, true]).unwrap();
        let engine = host_to_engine_array(&host).unwrap();
        assert_eq!(&*engine.pin(), &[1, 0, 0, 1]);
        assert_eq!(engine_to_host_array(&engine).unwrap(), host);
    }
}
