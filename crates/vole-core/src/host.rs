use half::f16;
use ndarray::{ArrayD, IxDyn};
use num_complex::Complex;

use crate::buffer::element_count;
use crate::dtype::{DType, Element};
use crate::error::{Error, Result};

// HostArray: an owned N-dimensional host buffer
//
// One variant per bridged dtype, plus three that exist only so callers can
// hand them to the marshaller: half precision (always rejected) and the two
// complex widths (expanded to a trailing real/imaginary axis).
//
// Arrays may arrive in any memory order; the marshaller normalizes to
// C order before copying.

/// An owned host array of any supported element type.
#[derive(Debug, Clone, PartialEq)]
pub enum HostArray {
    I8(ArrayD<i8>),
    U8(ArrayD<u8>),
    I16(ArrayD<i16>),
    U16(ArrayD<u16>),
    I32(ArrayD<i32>),
    U32(ArrayD<u32>),
    I64(ArrayD<i64>),
    U64(ArrayD<u64>),
    F32(ArrayD<f32>),
    F64(ArrayD<f64>),
    Bool(ArrayD<bool>),
    F16(ArrayD<f16>),
    C64(ArrayD<Complex<f32>>),
    C128(ArrayD<Complex<f64>>),
}

/// Run an expression against the typed array inside a `HostArray`.
///
/// The first arm is expanded once per bridged dtype with `$a` bound to the
/// concrete `ArrayD<T>`; everything else (half, complex) goes to the
/// fallback arm.
///
/// ```ignore
/// let n = with_host_array!(&host, a => a.len(), other => other.shape().iter().product());
/// ```
#[macro_export]
macro_rules! with_host_array {
    ($host:expr, $a:ident => $body:expr, $other:ident => $fallback:expr) => {
        match $host {
            $crate::HostArray::I8($a) => $body,
            $crate::HostArray::U8($a) => $body,
            $crate::HostArray::I16($a) => $body,
            $crate::HostArray::U16($a) => $body,
            $crate::HostArray::I32($a) => $body,
            $crate::HostArray::U32($a) => $body,
            $crate::HostArray::I64($a) => $body,
            $crate::HostArray::U64($a) => $body,
            $crate::HostArray::F32($a) => $body,
            $crate::HostArray::F64($a) => $body,
            $crate::HostArray::Bool($a) => $body,
            $other => $fallback,
        }
    };
}

/// Bind `$t` to the Rust scalar type of a `DType` and evaluate `$body`.
#[macro_export]
macro_rules! with_dtype {
    ($dtype:expr, $t:ident => $body:expr) => {
        match $dtype {
            $crate::DType::I8 => {
                type $t = i8;
                $body
            }
            $crate::DType::U8 => {
                type $t = u8;
                $body
            }
            $crate::DType::I16 => {
                type $t = i16;
                $body
            }
            $crate::DType::U16 => {
                type $t = u16;
                $body
            }
            $crate::DType::I32 => {
                type $t = i32;
                $body
            }
            $crate::DType::U32 => {
                type $t = u32;
                $body
            }
            $crate::DType::I64 => {
                type $t = i64;
                $body
            }
            $crate::DType::U64 => {
                type $t = u64;
                $body
            }
            $crate::DType::F32 => {
                type $t = f32;
                $body
            }
            $crate::DType::F64 => {
                type $t = f64;
                $body
            }
            $crate::DType::Bool => {
                type $t = bool;
                $body
            }
        }
    };
}

macro_rules! map_all {
    ($host:expr, $a:ident => $body:expr) => {
        match $host {
            HostArray::I8($a) => $body,
            HostArray::U8($a) => $body,
            HostArray::I16($a) => $body,
            HostArray::U16($a) => $body,
            HostArray::I32($a) => $body,
            HostArray::U32($a) => $body,
            HostArray::I64($a) => $body,
            HostArray::U64($a) => $body,
            HostArray::F32($a) => $body,
            HostArray::F64($a) => $body,
            HostArray::Bool($a) => $body,
            HostArray::F16($a) => $body,
            HostArray::C64($a) => $body,
            HostArray::C128($a) => $body,
        }
    };
}

impl HostArray {
    /// Build an array of a bridged dtype from a flat row-major vector.
    pub fn from_shape_vec<T: Element>(dims: &[usize], data: Vec<T>) -> Result<Self> {
        let expected = element_count(dims)?;
        let got = data.len();
        let array = ArrayD::from_shape_vec(IxDyn(dims), data).map_err(|_| {
            Error::ShapeMismatch {
                dims: dims.to_vec(),
                expected,
                got,
            }
        })?;
        Ok(T::into_host(array))
    }

    pub fn shape(&self) -> &[usize] {
        map_all!(self, a => a.shape())
    }

    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    /// Total number of elements.
    pub fn len(&self) -> usize {
        map_all!(self, a => a.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The bridged dtype, or `None` for half/complex arrays.
    pub fn dtype(&self) -> Option<DType> {
        with_host_array!(self, a => Some(element_dtype(a)), _other => None)
    }

    /// NumPy name of the element type, including the non-bridged ones.
    pub fn dtype_name(&self) -> &'static str {
        match self {
            HostArray::F16(_) => "float16",
            HostArray::C64(_) => "complex64",
            HostArray::C128(_) => "complex128",
            other => other.dtype().map(|d| d.name()).unwrap_or("unknown"),
        }
    }

    /// Whether the array is laid out in C order without gaps.
    pub fn is_standard_layout(&self) -> bool {
        map_all!(self, a => a.is_standard_layout())
    }

    /// Copy into C order if the array is not already laid out that way.
    pub fn into_standard_layout(self) -> Self {
        if self.is_standard_layout() {
            return self;
        }
        map_all!(self, a => HostArray::from(a.as_standard_layout().into_owned()))
    }

    /// Reshape to `dims`; the element count must match exactly.
    pub fn reshape(self, dims: &[usize]) -> Result<Self> {
        let expected = element_count(dims)?;
        let got = self.len();
        if expected != got {
            return Err(Error::ShapeMismatch {
                dims: dims.to_vec(),
                expected,
                got,
            });
        }
        let mismatch = |_| Error::ShapeMismatch {
            dims: dims.to_vec(),
            expected,
            got,
        };
        let array = self.into_standard_layout();
        map_all!(array, a => a.into_shape(IxDyn(dims)).map(HostArray::from).map_err(mismatch))
    }

    /// Rebuild complex values from a float array whose last axis holds
    /// `[real, imaginary]` pairs. `F32` gives `C64`, `F64` gives `C128`.
    pub fn into_complex(self) -> Result<Self> {
        match self {
            HostArray::F32(a) => Ok(HostArray::C64(pairs_to_complex(a)?)),
            HostArray::F64(a) => Ok(HostArray::C128(pairs_to_complex(a)?)),
            other => Err(Error::TypeMismatch(format!(
                "complex reconstruction needs a float32 or float64 array, got {}",
                other.dtype_name()
            ))),
        }
    }
}

fn element_dtype<T: Element>(_: &ArrayD<T>) -> DType {
    T::DTYPE
}

fn pairs_to_complex<F>(array: ArrayD<F>) -> Result<ArrayD<Complex<F>>>
where
    F: bytemuck::Pod,
    Complex<F>: bytemuck::Pod,
{
    let shape = array.shape().to_vec();
    let Some((&last, outer)) = shape.split_last() else {
        return Err(Error::InvalidArgument(
            "complex reconstruction needs at least one axis".to_string(),
        ));
    };
    if last != 2 {
        return Err(Error::InvalidArgument(format!(
            "complex reconstruction needs a trailing axis of 2, got shape {shape:?}"
        )));
    }
    let contiguous = array.as_standard_layout();
    let flat = contiguous
        .as_slice()
        .ok_or_else(|| Error::msg("standard-layout array is not contiguous"))?;
    let values: Vec<Complex<F>> = bytemuck::cast_slice(flat).to_vec();
    let got = values.len();
    ArrayD::from_shape_vec(IxDyn(outer), values).map_err(|_| Error::ShapeMismatch {
        dims: outer.to_vec(),
        expected: outer.iter().product(),
        got,
    })
}

macro_rules! impl_from_array {
    ($ty:ty, $variant:ident) => {
        impl From<ArrayD<$ty>> for HostArray {
            fn from(array: ArrayD<$ty>) -> Self {
                HostArray::$variant(array)
            }
        }
    };
}

impl_from_array!(i8, I8);
impl_from_array!(u8, U8);
impl_from_array!(i16, I16);
impl_from_array!(u16, U16);
impl_from_array!(i32, I32);
impl_from_array!(u32, U32);
impl_from_array!(i64, I64);
impl_from_array!(u64, U64);
impl_from_array!(f32, F32);
impl_from_array!(f64, F64);
impl_from_array!(bool, Bool);
impl_from_array!(f16, F16);
impl_from_array!(Complex<f32>, C64);
impl_from_array!(Complex<f64>, C128);
