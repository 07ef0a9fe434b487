use std::ops::Index;

use vole_core::ndarray::ArrayD;
use vole_core::HostArray;

/// A single caller-supplied input value.
#[derive(Debug, Clone, PartialEq)]
pub enum InputValue {
    /// A host array, marshalled as is.
    Array(HostArray),
    /// A file-argument descriptor (`"<path>::<selector>"`).
    Descriptor(String),
}

impl InputValue {
    pub fn as_array(&self) -> Option<&HostArray> {
        match self {
            InputValue::Array(a) => Some(a),
            InputValue::Descriptor(_) => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            InputValue::Array(_) => "array",
            InputValue::Descriptor(_) => "descriptor",
        }
    }
}

impl From<HostArray> for InputValue {
    fn from(a: HostArray) -> Self {
        InputValue::Array(a)
    }
}

impl<T> From<ArrayD<T>> for InputValue
where
    HostArray: From<ArrayD<T>>,
{
    fn from(a: ArrayD<T>) -> Self {
        InputValue::Array(HostArray::from(a))
    }
}

impl From<&str> for InputValue {
    fn from(d: &str) -> Self {
        InputValue::Descriptor(d.to_string())
    }
}

impl From<String> for InputValue {
    fn from(d: String) -> Self {
        InputValue::Descriptor(d)
    }
}

/// Inputs to a run: an ordered list or a name-keyed map.
///
/// The map keeps insertion order; keys must be unique.
#[derive(Debug, Clone, PartialEq)]
pub enum Inputs {
    List(Vec<InputValue>),
    Map(Vec<(String, InputValue)>),
}

impl Inputs {
    /// Positional inputs.
    pub fn list<V: Into<InputValue>>(values: impl IntoIterator<Item = V>) -> Self {
        Inputs::List(values.into_iter().map(Into::into).collect())
    }

    /// Named inputs.
    pub fn map<K: Into<String>, V: Into<InputValue>>(
        entries: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        Inputs::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        match self {
            Inputs::List(v) => v.len(),
            Inputs::Map(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Vec<InputValue>> for Inputs {
    fn from(values: Vec<InputValue>) -> Self {
        Inputs::List(values)
    }
}

impl From<Vec<HostArray>> for Inputs {
    fn from(values: Vec<HostArray>) -> Self {
        Inputs::list(values)
    }
}

impl From<Vec<(String, InputValue)>> for Inputs {
    fn from(entries: Vec<(String, InputValue)>) -> Self {
        Inputs::Map(entries)
    }
}

/// Outputs of a run, in the order the engine declares them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outputs {
    entries: Vec<(String, HostArray)>,
}

impl Outputs {
    pub fn new(entries: Vec<(String, HostArray)>) -> Self {
        Self { entries }
    }

    /// Output by name.
    pub fn get(&self, name: &str) -> Option<&HostArray> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, a)| a)
    }

    /// Output by position.
    pub fn get_index(&self, index: usize) -> Option<&HostArray> {
        self.entries.get(index).map(|(_, a)| a)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HostArray)> {
        self.entries.iter().map(|(n, a)| (n.as_str(), a))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_vec(self) -> Vec<(String, HostArray)> {
        self.entries
    }
}

impl Index<usize> for Outputs {
    type Output = HostArray;

    fn index(&self, index: usize) -> &HostArray {
        &self.entries[index].1
    }
}

impl Index<&str> for Outputs {
    type Output = HostArray;

    fn index(&self, name: &str) -> &HostArray {
        match self.get(name) {
            Some(a) => a,
            None => panic!("no output named '{name}'"),
        }
    }
}

impl IntoIterator for Outputs {
    type Item = (String, HostArray);
    type IntoIter = std::vec::IntoIter<(String, HostArray)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arr(v: Vec<i32>) -> HostArray {
        HostArray::from_shape_vec(&[v.len()], v).unwrap()
    }

    #[test]
    fn test_inputs_constructors() {
        let list = Inputs::list([InputValue::from(arr(vec![1])), "w.pb".into()]);
        assert_eq!(list.len(), 2);
        match &list {
            Inputs::List(v) => {
                assert_eq!(v[0].kind(), "array");
                assert_eq!(v[1], InputValue::Descriptor("w.pb".into()));
            }
            Inputs::Map(_) => panic!("expected a list"),
        }

        let map = Inputs::map([("b", arr(vec![2])), ("a", arr(vec![1]))]);
        match map {
            Inputs::Map(entries) => {
                assert_eq!(entries[0].0, "b");
                assert_eq!(entries[1].0, "a");
            }
            Inputs::List(_) => panic!("expected a map"),
        }
        assert!(Inputs::list(Vec::<InputValue>::new()).is_empty());
    }

    #[test]
    fn test_outputs_lookup() {
        let out = Outputs::new(vec![("z".into(), arr(vec![1])), ("a".into(), arr(vec![2]))]);
        assert_eq!(out.names().collect::<Vec<_>>(), vec!["z", "a"]);
        assert_eq!(out["a"], arr(vec![2]));
        assert_eq!(out[0], arr(vec![1]));
        assert_eq!(out.get_index(1), out.get("a"));
        assert!(out.get("missing").is_none());
        assert_eq!(out.len(), 2);
        assert_eq!(out.into_iter().next().unwrap().0, "z");
    }
}
