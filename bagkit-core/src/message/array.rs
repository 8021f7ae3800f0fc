//! Typed multi-dimensional array messages

use serde::{Deserialize, Serialize};

/// One named dimension of an array layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimension {
    /// Dimension label (e.g. "rows", "data")
    pub label: String,
    /// Number of elements along this dimension
    pub size: u32,
    /// Number of flat elements spanned by one step of the enclosing dimension
    pub stride: u32,
}

impl Dimension {
    /// Create a new dimension
    pub fn new(label: impl Into<String>, size: u32, stride: u32) -> Self {
        Self {
            label: label.into(),
            size,
            stride,
        }
    }
}

/// Describes how to reshape a flat buffer
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ArrayLayout {
    /// Dimensions, outermost first
    pub dim: Vec<Dimension>,
    /// Padding elements at the front of the flat buffer
    pub data_offset: u32,
}

impl ArrayLayout {
    /// Single-dimension layout spanning `len` elements
    pub fn vector(label: impl Into<String>, len: u32) -> Self {
        Self {
            dim: vec![Dimension::new(label, len, len)],
            data_offset: 0,
        }
    }

    /// Sizes of each dimension
    pub fn shape(&self) -> Vec<u32> {
        self.dim.iter().map(|d| d.size).collect()
    }
}

/// Element type of an array buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ElementType {
    Int8 = 1,
    Int16 = 2,
    Int32 = 3,
    Int64 = 4,
    UInt8 = 5,
    UInt16 = 6,
    UInt32 = 7,
    UInt64 = 8,
    Float32 = 9,
    Float64 = 10,
}

impl ElementType {
    /// Width of one element in bytes
    pub fn width(&self) -> usize {
        match self {
            ElementType::Int8 | ElementType::UInt8 => 1,
            ElementType::Int16 | ElementType::UInt16 => 2,
            ElementType::Int32 | ElementType::UInt32 | ElementType::Float32 => 4,
            ElementType::Int64 | ElementType::UInt64 | ElementType::Float64 => 8,
        }
    }

    /// Name prefix used for the message type ("Float64" for Float64MultiArray)
    pub fn name(&self) -> &'static str {
        match self {
            ElementType::Int8 => "Int8",
            ElementType::Int16 => "Int16",
            ElementType::Int32 => "Int32",
            ElementType::Int64 => "Int64",
            ElementType::UInt8 => "UInt8",
            ElementType::UInt16 => "UInt16",
            ElementType::UInt32 => "UInt32",
            ElementType::UInt64 => "UInt64",
            ElementType::Float32 => "Float32",
            ElementType::Float64 => "Float64",
        }
    }

    /// Element type keyword in the message definition
    pub(crate) fn definition_keyword(&self) -> &'static str {
        match self {
            ElementType::Int8 => "int8",
            ElementType::Int16 => "int16",
            ElementType::Int32 => "int32",
            ElementType::Int64 => "int64",
            ElementType::UInt8 => "uint8",
            ElementType::UInt16 => "uint16",
            ElementType::UInt32 => "uint32",
            ElementType::UInt64 => "uint64",
            ElementType::Float32 => "float32",
            ElementType::Float64 => "float64",
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(ElementType::Int8),
            2 => Some(ElementType::Int16),
            3 => Some(ElementType::Int32),
            4 => Some(ElementType::Int64),
            5 => Some(ElementType::UInt8),
            6 => Some(ElementType::UInt16),
            7 => Some(ElementType::UInt32),
            8 => Some(ElementType::UInt64),
            9 => Some(ElementType::Float32),
            10 => Some(ElementType::Float64),
            _ => None,
        }
    }
}

/// Flat element buffer of an array message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArrayData {
    Int8(Vec<i8>),
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    UInt8(Vec<u8>),
    UInt16(Vec<u16>),
    UInt32(Vec<u32>),
    UInt64(Vec<u64>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
}

impl ArrayData {
    /// Element type of the buffer
    pub fn element_type(&self) -> ElementType {
        match self {
            ArrayData::Int8(_) => ElementType::Int8,
            ArrayData::Int16(_) => ElementType::Int16,
            ArrayData::Int32(_) => ElementType::Int32,
            ArrayData::Int64(_) => ElementType::Int64,
            ArrayData::UInt8(_) => ElementType::UInt8,
            ArrayData::UInt16(_) => ElementType::UInt16,
            ArrayData::UInt32(_) => ElementType::UInt32,
            ArrayData::UInt64(_) => ElementType::UInt64,
            ArrayData::Float32(_) => ElementType::Float32,
            ArrayData::Float64(_) => ElementType::Float64,
        }
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        match self {
            ArrayData::Int8(v) => v.len(),
            ArrayData::Int16(v) => v.len(),
            ArrayData::Int32(v) => v.len(),
            ArrayData::Int64(v) => v.len(),
            ArrayData::UInt8(v) => v.len(),
            ArrayData::UInt16(v) => v.len(),
            ArrayData::UInt32(v) => v.len(),
            ArrayData::UInt64(v) => v.len(),
            ArrayData::Float32(v) => v.len(),
            ArrayData::Float64(v) => v.len(),
        }
    }

    /// Check if the buffer has no elements
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Elements widened to f64, for numeric inspection
    pub fn to_f64_vec(&self) -> Vec<f64> {
        match self {
            ArrayData::Int8(v) => v.iter().map(|&x| x as f64).collect(),
            ArrayData::Int16(v) => v.iter().map(|&x| x as f64).collect(),
            ArrayData::Int32(v) => v.iter().map(|&x| x as f64).collect(),
            ArrayData::Int64(v) => v.iter().map(|&x| x as f64).collect(),
            ArrayData::UInt8(v) => v.iter().map(|&x| x as f64).collect(),
            ArrayData::UInt16(v) => v.iter().map(|&x| x as f64).collect(),
            ArrayData::UInt32(v) => v.iter().map(|&x| x as f64).collect(),
            ArrayData::UInt64(v) => v.iter().map(|&x| x as f64).collect(),
            ArrayData::Float32(v) => v.iter().map(|&x| x as f64).collect(),
            ArrayData::Float64(v) => v.clone(),
        }
    }
}

macro_rules! array_data_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<Vec<$ty>> for ArrayData {
                fn from(v: Vec<$ty>) -> Self {
                    ArrayData::$variant(v)
                }
            }
        )*
    };
}

array_data_from!(
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u8 => UInt8,
    u16 => UInt16,
    u32 => UInt32,
    u64 => UInt64,
    f32 => Float32,
    f64 => Float64,
);

/// Array message: layout plus flat typed buffer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayMessage {
    /// Layout describing how to reshape `data`
    pub layout: ArrayLayout,
    /// Flat element buffer
    pub data: ArrayData,
}

impl ArrayMessage {
    /// Create an array message with an explicit layout
    pub fn new(layout: ArrayLayout, data: impl Into<ArrayData>) -> Self {
        Self {
            layout,
            data: data.into(),
        }
    }

    /// One-dimensional array labelled "data"
    pub fn vector(data: impl Into<ArrayData>) -> Self {
        let data = data.into();
        let layout = ArrayLayout::vector("data", data.len() as u32);
        Self { layout, data }
    }

    /// Element type of the buffer
    pub fn element_type(&self) -> ElementType {
        self.data.element_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_layout() {
        let msg = ArrayMessage::vector(vec![0.0f64; 3]);
        assert_eq!(msg.layout.dim, vec![Dimension::new("data", 3, 3)]);
        assert_eq!(msg.element_type(), ElementType::Float64);
        assert_eq!(msg.layout.shape(), vec![3]);
    }

    #[test]
    fn test_element_tags() {
        for tag in 1..=10u8 {
            let ty = ElementType::from_tag(tag).unwrap();
            assert_eq!(ty as u8, tag);
        }
        assert!(ElementType::from_tag(0).is_none());
        assert_eq!(ElementType::UInt16.width(), 2);
    }

    #[test]
    fn test_widen_to_f64() {
        let data = ArrayData::from(vec![1i16, -2, 3]);
        assert_eq!(data.to_f64_vec(), vec![1.0, -2.0, 3.0]);
        assert_eq!(data.len(), 3);
    }
}
