// Run options
//
// Options shared by whole-graph runs, single-node runs and node isolation.
// A file argument marks one input slot as holding a resource descriptor
// instead of an array. Slots are addressed the same way the inputs are
// keyed: by position for list inputs, by name for map inputs.

use std::fmt;

/// One input slot that carries a file-argument descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FileArg {
    /// Position in a list of inputs.
    Index(usize),
    /// Key in a map of inputs.
    Name(String),
}

impl From<usize> for FileArg {
    fn from(index: usize) -> Self {
        FileArg::Index(index)
    }
}

impl From<&str> for FileArg {
    fn from(name: &str) -> Self {
        FileArg::Name(name.to_string())
    }
}

impl From<String> for FileArg {
    fn from(name: String) -> Self {
        FileArg::Name(name)
    }
}

impl fmt::Display for FileArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileArg::Index(i) => write!(f, "#{i}"),
            FileArg::Name(n) => write!(f, "'{n}'"),
        }
    }
}

/// Options for [`GraphSession::run`](crate::GraphSession::run) and friends.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOptions {
    /// Input slots whose values are descriptors to resolve.
    pub file_args: Vec<FileArg>,
    /// Ask the resolver to persist what it resolved.
    pub save_file_arg: bool,
    /// Let the engine use graph initializers as default input values.
    pub use_initializers: bool,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark one more input slot as a file argument.
    pub fn with_file_arg(mut self, arg: impl Into<FileArg>) -> Self {
        self.file_args.push(arg.into());
        self
    }

    /// Replace the file-argument slots.
    pub fn with_file_args<A: Into<FileArg>>(mut self, args: impl IntoIterator<Item = A>) -> Self {
        self.file_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_save_file_arg(mut self, save: bool) -> Self {
        self.save_file_arg = save;
        self
    }

    pub fn with_use_initializers(mut self, use_initializers: bool) -> Self {
        self.use_initializers = use_initializers;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let opts = RunOptions::new()
            .with_file_arg(0)
            .with_file_arg("x")
            .with_use_initializers(true);
        assert_eq!(
            opts.file_args,
            vec![FileArg::Index(0), FileArg::Name("x".into())]
        );
        assert!(opts.use_initializers);
        assert!(!opts.save_file_arg);

        let opts = opts.with_file_args([2usize, 3]).with_save_file_arg(true);
        assert_eq!(opts.file_args, vec![FileArg::Index(2), FileArg::Index(3)]);
        assert!(opts.save_file_arg);
    }

    #[test]
    fn test_display() {
        assert_eq!(FileArg::Index(1).to_string(), "#1");
        assert_eq!(FileArg::from("w").to_string(), "'w'");
    }
}
