//! Tensor metadata and raw buffer helpers.
//!
//! A [`TensorDescriptor`] describes one input or output slot of a loaded model. Buffers crossing
//! the inference boundary are plain bytes laid out the way the engine expects them; the helpers
//! at the bottom of this module convert between those bytes and typed slices.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// The data type all values of a tensor are represented in.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    Bool,
    Uint8,
    Int8,
    Int16,
    Int32,
    Int64,
    Float16,
    Float32,
    Float64,
    /// Any engine type this core cannot describe (strings, complex numbers, resources...).
    Invalid,
}

impl ElementType {
    /// Size of a single element in bytes, `None` for [`ElementType::Invalid`].
    pub const fn width(self) -> Option<usize> {
        match self {
            ElementType::Bool | ElementType::Uint8 | ElementType::Int8 => Some(1),
            ElementType::Int16 | ElementType::Float16 => Some(2),
            ElementType::Int32 | ElementType::Float32 => Some(4),
            ElementType::Int64 | ElementType::Float64 => Some(8),
            ElementType::Invalid => None,
        }
    }
}

/// Static metadata of one input/output slot of a model.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorDescriptor {
    name: String,
    element_type: ElementType,
    shape: Vec<usize>,
}

impl TensorDescriptor {
    pub fn new(name: impl Into<String>, element_type: ElementType, shape: Vec<usize>) -> Self {
        Self {
            name: name.into(),
            element_type,
            shape,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of elements. A scalar (empty shape) holds one element.
    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }

    /// Number of bytes a buffer for this tensor must have.
    pub fn byte_len(&self) -> Option<usize> {
        self.element_type
            .width()
            .and_then(|width| self.element_count().checked_mul(width))
    }
}

impl Display for TensorDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let dims = self
            .shape
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(",");
        write!(f, "{}: {}[{}]", self.name, self.element_type, dims)
    }
}

/// View a typed slice as the raw bytes an input buffer expects.
pub fn as_bytes<T: bytemuck::Pod>(values: &[T]) -> &[u8] {
    bytemuck::cast_slice(values)
}

/// Copy a raw output buffer into typed values.
///
/// Copies rather than casts so that buffers with any alignment are accepted. Trailing bytes that
/// do not form a whole element are ignored.
pub fn to_values<T: bytemuck::Pod>(bytes: &[u8]) -> Vec<T> {
    let width = std::mem::size_of::<T>();
    if width == 0 {
        return Vec::new();
    }
    let whole = bytes.len() - bytes.len() % width;
    bytemuck::pod_collect_to_vec(&bytes[..whole])
}
