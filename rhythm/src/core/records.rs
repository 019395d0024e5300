//! In-memory record types produced by modules.
//!
//! Config and run-info records are small JSON-compatible mappings whose key
//! order is preserved. Run data is a [`DataTree`]: an ordered hierarchy of
//! named n-dimensional arrays.

use std::fmt;

use indexmap::IndexMap;
use ndarray::{Array, ArrayD, Dimension};
use serde::{Deserialize, Serialize};

/// Ordered mapping of parameter names to JSON values.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Element type of a stored array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Bool,
    U8,
    I32,
    I64,
    F32,
    F64,
}

impl DType {
    /// Bytes per element in the on-disk encoding.
    pub const fn width(self) -> usize {
        match self {
            Self::Bool | Self::U8 => 1,
            Self::I32 | Self::F32 => 4,
            Self::I64 | Self::F64 => 8,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::U8 => "u8",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::F32 => "f32",
            Self::F64 => "f64",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A dynamically-shaped array of one of the supported element types.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    Bool(ArrayD<bool>),
    U8(ArrayD<u8>),
    I32(ArrayD<i32>),
    I64(ArrayD<i64>),
    F32(ArrayD<f32>),
    F64(ArrayD<f64>),
}

impl ArrayData {
    pub fn dtype(&self) -> DType {
        match self {
            Self::Bool(_) => DType::Bool,
            Self::U8(_) => DType::U8,
            Self::I32(_) => DType::I32,
            Self::I64(_) => DType::I64,
            Self::F32(_) => DType::F32,
            Self::F64(_) => DType::F64,
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            Self::Bool(a) => a.shape(),
            Self::U8(a) => a.shape(),
            Self::I32(a) => a.shape(),
            Self::I64(a) => a.shape(),
            Self::F32(a) => a.shape(),
            Self::F64(a) => a.shape(),
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bool(&self) -> Option<&ArrayD<bool>> {
        match self {
            Self::Bool(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<&ArrayD<f64>> {
        match self {
            Self::F64(a) => Some(a),
            _ => None,
        }
    }
}

macro_rules! impl_from_array {
    ($($elem:ty => $variant:ident),* $(,)?) => {
        $(
            impl<D: Dimension> From<Array<$elem, D>> for ArrayData {
                fn from(array: Array<$elem, D>) -> Self {
                    Self::$variant(array.into_dyn())
                }
            }

            impl<D: Dimension> From<Array<$elem, D>> for DataNode {
                fn from(array: Array<$elem, D>) -> Self {
                    Self::Array(array.into())
                }
            }
        )*
    };
}

impl_from_array! {
    bool => Bool,
    u8 => U8,
    i32 => I32,
    i64 => I64,
    f32 => F32,
    f64 => F64,
}

/// One node of a run-data hierarchy.
#[derive(Debug, Clone, PartialEq)]
pub enum DataNode {
    Array(ArrayData),
    Group(DataTree),
    /// Ordered sequence of nodes, e.g. one mask per region.
    List(Vec<DataNode>),
}

impl DataNode {
    pub fn as_array(&self) -> Option<&ArrayData> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_group(&self) -> Option<&DataTree> {
        match self {
            Self::Group(g) => Some(g),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[DataNode]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }
}

impl From<ArrayData> for DataNode {
    fn from(array: ArrayData) -> Self {
        Self::Array(array)
    }
}

impl From<DataTree> for DataNode {
    fn from(tree: DataTree) -> Self {
        Self::Group(tree)
    }
}

/// Insertion-ordered mapping of names to data nodes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataTree {
    entries: IndexMap<String, DataNode>,
}

impl DataTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entry. A replaced entry keeps its position.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        node: impl Into<DataNode>,
    ) -> Option<DataNode> {
        self.entries.insert(name.into(), node.into())
    }

    pub fn get(&self, name: &str) -> Option<&DataNode> {
        self.entries.get(name)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DataNode)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Sort keys lexicographically at every group level. List order is kept.
    pub fn sort_keys(&mut self) {
        self.entries.sort_keys();
        for node in self.entries.values_mut() {
            sort_node(node);
        }
    }

    /// One line per array: `path: dtype (d0, d1, ...)`.
    pub fn describe(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for (name, node) in self.iter() {
            describe_node(name, node, &mut lines);
        }
        lines
    }
}

fn sort_node(node: &mut DataNode) {
    match node {
        DataNode::Array(_) => {}
        DataNode::Group(tree) => tree.sort_keys(),
        DataNode::List(items) => items.iter_mut().for_each(sort_node),
    }
}

fn describe_node(path: &str, node: &DataNode, lines: &mut Vec<String>) {
    match node {
        DataNode::Array(array) => {
            let dims = array
                .shape()
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            lines.push(format!("{path}: {} ({dims})", array.dtype()));
        }
        DataNode::Group(tree) => {
            for (name, child) in tree.iter() {
                describe_node(&format!("{path}/{name}"), child, lines);
            }
        }
        DataNode::List(items) => {
            for (idx, child) in items.iter().enumerate() {
                describe_node(&format!("{path}[{idx}]"), child, lines);
            }
        }
    }
}

impl<K: Into<String>, V: Into<DataNode>> FromIterator<(K, V)> for DataTree {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut tree = Self::new();
        for (k, v) in iter {
            tree.insert(k, v);
        }
        tree
    }
}
