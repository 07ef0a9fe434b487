use crate::dtype::DType;

/// All errors that can occur while bridging host arrays and a graph engine.
///
/// A single error type covers type mapping, buffer marshalling, model
/// loading, execution and file-argument resolution, so that every layer
/// (core, engine implementations, session, bindings) propagates with `?`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A host dtype or engine element type has no counterpart in the type table.
    #[error("unsupported type: {0}")]
    UnsupportedType(String),

    /// The tensor adapter received an array whose dtype it cannot wrap.
    #[error("unsupported dtype for engine tensor: {0}")]
    UnsupportedDType(String),

    /// A value of the wrong kind was supplied (e.g. an array where a
    /// file-argument descriptor was expected).
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// Element count does not match the declared dimensions.
    #[error("shape mismatch: dims {dims:?} require {expected} elements, got {got}")]
    ShapeMismatch {
        dims: Vec<usize>,
        expected: usize,
        got: usize,
    },

    /// Two typed values disagree on dtype.
    #[error("dtype mismatch: expected {expected}, got {got}")]
    DTypeMismatch { expected: DType, got: DType },

    /// The engine or the model codec could not load a model.
    #[error("failed to load model: {0}")]
    LoadError(String),

    /// No node with the given name exists in the loaded model.
    #[error("node not found: '{0}'")]
    NodeNotFound(String),

    /// No initializer with the given name exists in the loaded graph.
    #[error("initializer not found: '{0}'")]
    InitializerNotFound(String),

    /// The engine reported that execution did not succeed.
    #[error("the graph did not execute successfully: {0}")]
    ExecutionFailure(String),

    /// The engine-side buffer could not be allocated.
    #[error("failed to allocate {bytes} bytes for engine array")]
    AllocationError { bytes: usize },

    /// The file-argument resolver returned no data for a descriptor.
    #[error("could not resolve file argument '{0}'")]
    FileArgUnresolved(String),

    /// The same name was supplied twice in a name-keyed collection.
    #[error("duplicate name: '{0}'")]
    DuplicateName(String),

    /// A caller-supplied argument is malformed or out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Malformed protobuf data.
    #[error("protobuf: {0}")]
    Decode(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Generic message for cases not covered above.
    #[error("{0}")]
    Msg(String),
}

impl Error {
    /// Create an error from any string message.
    pub fn msg(s: impl Into<String>) -> Self {
        Error::Msg(s.into())
    }

    pub(crate) fn decode(s: impl Into<String>) -> Self {
        Error::Decode(s.into())
    }
}

/// Convenience Result type used throughout vole.
pub type Result<T> = std::result::Result<T, Error>;

/// Macro for early return with a formatted error message.
/// Usage: `bail!("something went wrong: {}", detail)`
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::Msg(format!($($arg)*)))
    };
}
