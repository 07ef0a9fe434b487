use std::fmt;

use ndarray::ArrayD;

use crate::buffer::try_zeroed_vec;
use crate::error::{Error, Result};
use crate::host::HostArray;

// DType: host element types
//
// The host side (NumPy arrays on the Python side, ndarray on the Rust side)
// names its element types the NumPy way. Exactly eleven of them cross the
// bridge unchanged:
//
//   I8  U8  I16  U16  I32  U32  I64  U64  F32  F64  Bool
//
// Complex arrays are expanded to F32/F64 with a trailing axis of 2 before
// they reach the type table, and half precision is rejected outright.

/// Host element data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    Bool,
}

impl DType {
    /// Every host dtype, in table order.
    pub const ALL: [DType; 11] = [
        DType::I8,
        DType::U8,
        DType::I16,
        DType::U16,
        DType::I32,
        DType::U32,
        DType::I64,
        DType::U64,
        DType::F32,
        DType::F64,
        DType::Bool,
    ];

    /// Size of one element in bytes.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DType::I8 | DType::U8 | DType::Bool => 1,
            DType::I16 | DType::U16 => 2,
            DType::I32 | DType::U32 | DType::F32 => 4,
            DType::I64 | DType::U64 | DType::F64 => 8,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DType::F32 | DType::F64)
    }

    /// NumPy name of this dtype (`"int8"`, `"float32"`, `"bool"`, ...).
    pub fn name(&self) -> &'static str {
        match self {
            DType::I8 => "int8",
            DType::U8 => "uint8",
            DType::I16 => "int16",
            DType::U16 => "uint16",
            DType::I32 => "int32",
            DType::U32 => "uint32",
            DType::I64 => "int64",
            DType::U64 => "uint64",
            DType::F32 => "float32",
            DType::F64 => "float64",
            DType::Bool => "bool",
        }
    }

    /// Parse a NumPy dtype name.
    pub fn from_name(name: &str) -> Result<Self> {
        DType::ALL
            .iter()
            .copied()
            .find(|d| d.name() == name)
            .ok_or_else(|| Error::UnsupportedType(name.to_string()))
    }

    /// The engine element type this dtype maps to.
    pub fn element_type(&self) -> ElementType {
        to_engine_type(*self)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ElementType: engine element types
//
// Mirrors TensorProto.DataType. The discriminants are the wire codes, so a
// decoded `data_type` / `elem_type` field converts with `from_code`.

/// Engine-side tensor element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ElementType {
    Undefined = 0,
    Float = 1,
    UInt8 = 2,
    Int8 = 3,
    UInt16 = 4,
    Int16 = 5,
    Int32 = 6,
    Int64 = 7,
    String = 8,
    Bool = 9,
    Float16 = 10,
    Double = 11,
    UInt32 = 12,
    UInt64 = 13,
    Complex64 = 14,
    Complex128 = 15,
    BFloat16 = 16,
}

impl ElementType {
    const ALL: [ElementType; 17] = [
        ElementType::Undefined,
        ElementType::Float,
        ElementType::UInt8,
        ElementType::Int8,
        ElementType::UInt16,
        ElementType::Int16,
        ElementType::Int32,
        ElementType::Int64,
        ElementType::String,
        ElementType::Bool,
        ElementType::Float16,
        ElementType::Double,
        ElementType::UInt32,
        ElementType::UInt64,
        ElementType::Complex64,
        ElementType::Complex128,
        ElementType::BFloat16,
    ];

    /// Wire code (`TensorProto.DataType`).
    pub fn code(&self) -> i32 {
        *self as i32
    }

    pub fn from_code(code: i32) -> Result<Self> {
        ElementType::ALL
            .iter()
            .copied()
            .find(|t| t.code() == code)
            .ok_or_else(|| Error::UnsupportedType(format!("element type code {code}")))
    }

    /// Engine type name (`"Float"`, `"UInt8"`, `"Bool"`, ...).
    pub fn name(&self) -> &'static str {
        match self {
            ElementType::Undefined => "Undefined",
            ElementType::Float => "Float",
            ElementType::UInt8 => "UInt8",
            ElementType::Int8 => "Int8",
            ElementType::UInt16 => "UInt16",
            ElementType::Int16 => "Int16",
            ElementType::Int32 => "Int32",
            ElementType::Int64 => "Int64",
            ElementType::String => "String",
            ElementType::Bool => "Bool",
            ElementType::Float16 => "Float16",
            ElementType::Double => "Double",
            ElementType::UInt32 => "UInt32",
            ElementType::UInt64 => "UInt64",
            ElementType::Complex64 => "Complex64",
            ElementType::Complex128 => "Complex128",
            ElementType::BFloat16 => "BFloat16",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        ElementType::ALL
            .iter()
            .copied()
            .find(|t| t.name() == name)
            .ok_or_else(|| Error::UnsupportedType(format!("engine type '{name}'")))
    }

    /// Size of one element in bytes; `None` for variable-width and undefined types.
    pub fn size_in_bytes(&self) -> Option<usize> {
        match self {
            ElementType::Undefined | ElementType::String => None,
            ElementType::UInt8 | ElementType::Int8 | ElementType::Bool => Some(1),
            ElementType::UInt16
            | ElementType::Int16
            | ElementType::Float16
            | ElementType::BFloat16 => Some(2),
            ElementType::Float | ElementType::Int32 | ElementType::UInt32 => Some(4),
            ElementType::Int64
            | ElementType::UInt64
            | ElementType::Double
            | ElementType::Complex64 => Some(8),
            ElementType::Complex128 => Some(16),
        }
    }

    /// The host dtype for this element type, if the table has one.
    pub fn to_dtype(&self) -> Result<DType> {
        TYPE_TABLE
            .iter()
            .find(|(_, e)| e == self)
            .map(|(d, _)| *d)
            .ok_or_else(|| Error::UnsupportedType(format!("engine type '{}'", self.name())))
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// The type mapping table. Extending type support means adding a row here
/// and a `DType` variant; nothing is inferred.
pub const TYPE_TABLE: [(DType, ElementType); 11] = [
    (DType::I8, ElementType::Int8),
    (DType::U8, ElementType::UInt8),
    (DType::I16, ElementType::Int16),
    (DType::U16, ElementType::UInt16),
    (DType::I32, ElementType::Int32),
    (DType::U32, ElementType::UInt32),
    (DType::I64, ElementType::Int64),
    (DType::U64, ElementType::UInt64),
    (DType::F32, ElementType::Float),
    (DType::F64, ElementType::Double),
    (DType::Bool, ElementType::Bool),
];

/// Map a host dtype to its engine element type.
pub fn to_engine_type(dtype: DType) -> ElementType {
    match dtype {
        DType::I8 => ElementType::Int8,
        DType::U8 => ElementType::UInt8,
        DType::I16 => ElementType::Int16,
        DType::U16 => ElementType::UInt16,
        DType::I32 => ElementType::Int32,
        DType::U32 => ElementType::UInt32,
        DType::I64 => ElementType::Int64,
        DType::U64 => ElementType::UInt64,
        DType::F32 => ElementType::Float,
        DType::F64 => ElementType::Double,
        DType::Bool => ElementType::Bool,
    }
}

/// Map an engine element type name back to a host dtype.
pub fn to_host_dtype(engine_type_name: &str) -> Result<DType> {
    ElementType::from_name(engine_type_name)?.to_dtype()
}

// Element: ties a Rust scalar type to its DType
//
// Generic marshalling code is written once over `T: Element` and the
// concrete dtype falls out of `T::DTYPE`.

/// Rust scalar types that can cross the bridge.
pub trait Element:
    Copy + Send + Sync + 'static + fmt::Debug + PartialEq + Default + bytemuck::NoUninit
{
    /// The corresponding DType enum variant.
    const DTYPE: DType;

    /// Copy a little-endian byte buffer into a typed vector in one pass.
    fn vec_from_bytes(bytes: &[u8]) -> Result<Vec<Self>>;

    /// Wrap a typed array in the matching `HostArray` variant.
    fn into_host(array: ArrayD<Self>) -> HostArray;

    /// Unwrap a `HostArray`, failing if it holds another dtype.
    fn from_host(array: HostArray) -> Result<ArrayD<Self>>;
}

fn pod_vec_from_bytes<T: bytemuck::Pod>(bytes: &[u8]) -> Result<Vec<T>> {
    let size = std::mem::size_of::<T>();
    if bytes.len() % size != 0 {
        return Err(Error::msg(format!(
            "byte length {} is not a multiple of element size {size}",
            bytes.len()
        )));
    }
    let mut out: Vec<T> = try_zeroed_vec(bytes.len() / size)?;
    bytemuck::cast_slice_mut::<T, u8>(&mut out).copy_from_slice(bytes);
    Ok(out)
}

macro_rules! impl_element {
    ($ty:ty, $dtype:ident) => {
        impl Element for $ty {
            const DTYPE: DType = DType::$dtype;

            fn vec_from_bytes(bytes: &[u8]) -> Result<Vec<Self>> {
                pod_vec_from_bytes(bytes)
            }

            fn into_host(array: ArrayD<Self>) -> HostArray {
                HostArray::$dtype(array)
            }

            fn from_host(array: HostArray) -> Result<ArrayD<Self>> {
                match array {
                    HostArray::$dtype(a) => Ok(a),
                    other => Err(Error::TypeMismatch(format!(
                        "expected {} array, got {}",
                        DType::$dtype,
                        other.dtype_name()
                    ))),
                }
            }
        }
    };
}

impl_element!(i8, I8);
impl_element!(u8, U8);
impl_element!(i16, I16);
impl_element!(u16, U16);
impl_element!(i32, I32);
impl_element!(u32, U32);
impl_element!(i64, I64);
impl_element!(u64, U64);
impl_element!(f32, F32);
impl_element!(f64, F64);

impl Element for bool {
    const DTYPE: DType = DType::Bool;

    fn vec_from_bytes(bytes: &[u8]) -> Result<Vec<Self>> {
        let flags: &[bool] = bytemuck::checked::try_cast_slice(bytes)
            .map_err(|e| Error::TypeMismatch(format!("invalid bool buffer: {e:?}")))?;
        let mut out = Vec::new();
        out.try_reserve_exact(flags.len())
            .map_err(|_| Error::AllocationError { bytes: bytes.len() })?;
        out.extend_from_slice(flags);
        Ok(out)
    }

    fn into_host(array: ArrayD<Self>) -> HostArray {
        HostArray::Bool(array)
    }

    fn from_host(array: HostArray) -> Result<ArrayD<Self>> {
        match array {
            HostArray::Bool(a) => Ok(a),
            other => Err(Error::TypeMismatch(format!(
                "expected bool array, got {}",
                other.dtype_name()
            ))),
        }
    }
}
