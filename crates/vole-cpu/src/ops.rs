use ndarray::{ArrayD, IxDyn, Zip};

use vole_core::{Element, Error, HostArray, Result};

// Elementwise kernels
//
// Binary ops broadcast NumPy-style. Integer arithmetic wraps; integer
// division by zero is an error rather than a panic. Ops that have no
// meaning for a dtype (negating unsigned ints, sigmoid on ints, anything
// on bool) fail with TypeMismatch.

/// Element-wise binary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// Element-wise unary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Abs,
    Relu,
    Sigmoid,
}

/// Scalar arithmetic; `None` means the op is undefined for the value/type.
pub trait Arith: Element {
    fn binary(op: BinaryOp, a: Self, b: Self) -> Option<Self>;
    fn unary(op: UnaryOp, a: Self) -> Option<Self>;
}

macro_rules! impl_arith_signed {
    ($($ty:ty),*) => {$(
        impl Arith for $ty {
            fn binary(op: BinaryOp, a: Self, b: Self) -> Option<Self> {
                match op {
                    BinaryOp::Add => Some(a.wrapping_add(b)),
                    BinaryOp::Sub => Some(a.wrapping_sub(b)),
                    BinaryOp::Mul => Some(a.wrapping_mul(b)),
                    BinaryOp::Div => a.checked_div(b),
                }
            }

            fn unary(op: UnaryOp, a: Self) -> Option<Self> {
                match op {
                    UnaryOp::Neg => Some(a.wrapping_neg()),
                    UnaryOp::Abs => Some(a.wrapping_abs()),
                    UnaryOp::Relu => Some(a.max(0)),
                    UnaryOp::Sigmoid => None,
                }
            }
        }
    )*};
}

macro_rules! impl_arith_unsigned {
    ($($ty:ty),*) => {$(
        impl Arith for $ty {
            fn binary(op: BinaryOp, a: Self, b: Self) -> Option<Self> {
                match op {
                    BinaryOp::Add => Some(a.wrapping_add(b)),
                    BinaryOp::Sub => Some(a.wrapping_sub(b)),
                    BinaryOp::Mul => Some(a.wrapping_mul(b)),
                    BinaryOp::Div => a.checked_div(b),
                }
            }

            fn unary(op: UnaryOp, a: Self) -> Option<Self> {
                match op {
                    UnaryOp::Abs | UnaryOp::Relu => Some(a),
                    UnaryOp::Neg | UnaryOp::Sigmoid => None,
                }
            }
        }
    )*};
}

macro_rules! impl_arith_float {
    ($($ty:ty),*) => {$(
        impl Arith for $ty {
            fn binary(op: BinaryOp, a: Self, b: Self) -> Option<Self> {
                Some(match op {
                    BinaryOp::Add => a + b,
                    BinaryOp::Sub => a - b,
                    BinaryOp::Mul => a * b,
                    BinaryOp::Div => a / b,
                })
            }

            fn unary(op: UnaryOp, a: Self) -> Option<Self> {
                Some(match op {
                    UnaryOp::Neg => -a,
                    UnaryOp::Abs => a.abs(),
                    UnaryOp::Relu => if a > 0.0 { a } else { 0.0 },
                    UnaryOp::Sigmoid => 1.0 / (1.0 + (-a).exp()),
                })
            }
        }
    )*};
}

impl_arith_signed!(i8, i16, i32, i64);
impl_arith_unsigned!(u8, u16, u32, u64);
impl_arith_float!(f32, f64);

macro_rules! numeric_arms {
    ($value:expr, $a:ident => $body:expr, $other:ident => $fallback:expr) => {
        match $value {
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
            $other => $fallback,
        }
    };
}

/// Result shape of broadcasting `a` against `b`.
pub fn broadcast_shape(a: &[usize], b: &[usize]) -> Result<Vec<usize>> {
    let rank = a.len().max(b.len());
    let mut out = vec![0; rank];
    for i in 0..rank {
        let da = if i < rank - a.len() { 1 } else { a[i - (rank - a.len())] };
        let db = if i < rank - b.len() { 1 } else { b[i - (rank - b.len())] };
        out[i] = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => {
                return Err(Error::msg(format!(
                    "cannot broadcast shapes {a:?} and {b:?}"
                )))
            }
        };
    }
    Ok(out)
}

fn binary_typed<T: Arith>(op: BinaryOp, a: &ArrayD<T>, b: &ArrayD<T>) -> Result<ArrayD<T>> {
    let shape = broadcast_shape(a.shape(), b.shape())?;
    let not_broadcastable = || Error::msg(format!("{op:?}: broadcast failed"));
    let av = a.broadcast(IxDyn(&shape)).ok_or_else(not_broadcastable)?;
    let bv = b.broadcast(IxDyn(&shape)).ok_or_else(not_broadcastable)?;
    let mut undefined = false;
    let out = Zip::from(&av).and(&bv).map_collect(|&x, &y| {
        T::binary(op, x, y).unwrap_or_else(|| {
            undefined = true;
            T::default()
        })
    });
    if undefined {
        return Err(Error::msg(format!(
            "{op:?}: undefined result for {} (division by zero)",
            T::DTYPE
        )));
    }
    Ok(out)
}

fn unary_typed<T: Arith>(op: UnaryOp, a: &ArrayD<T>) -> Result<ArrayD<T>> {
    let mut undefined = false;
    let out = a.mapv(|x| {
        T::unary(op, x).unwrap_or_else(|| {
            undefined = true;
            T::default()
        })
    });
    if undefined {
        return Err(Error::TypeMismatch(format!("{op:?} is not defined for {}", T::DTYPE)));
    }
    Ok(out)
}

/// Apply a binary op to two arrays of the same numeric dtype.
pub fn binary(op: BinaryOp, a: &HostArray, b: &HostArray) -> Result<HostArray> {
    macro_rules! same_dtype {
        ($($variant:ident),*) => {
            match (a, b) {
                $((HostArray::$variant(x), HostArray::$variant(y)) => {
                    binary_typed(op, x, y).map(HostArray::from)
                })*
                _ => Err(Error::TypeMismatch(format!(
                    "{op:?} needs two numeric arrays of the same dtype, got {} and {}",
                    a.dtype_name(),
                    b.dtype_name()
                ))),
            }
        };
    }
    same_dtype!(I8, U8, I16, U16, I32, U32, I64, U64, F32, F64)
}

/// Apply a unary op to a numeric array.
pub fn unary(op: UnaryOp, a: &HostArray) -> Result<HostArray> {
    numeric_arms!(a, x => unary_typed(op, x).map(HostArray::from), other => {
        Err(Error::TypeMismatch(format!("{op:?} is not defined for {}", other.dtype_name())))
    })
}
