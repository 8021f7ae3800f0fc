//! Message model
//!
//! Messages are a closed sum type over the payload encodings the engine
//! understands natively (scalars, strings, typed arrays with a layout), plus
//! an opaque variant carrying caller-serialized bytes and their own type
//! descriptor for anything else.

mod array;
mod payload;

pub use array::{ArrayData, ArrayLayout, ArrayMessage, Dimension, ElementType};
pub use payload::{decode_payload, encode_payload};

use crate::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Type name + schema bound to a channel
///
/// Two descriptors are identical only if both the name and the schema bytes
/// match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeDescriptor {
    /// Stable type name (e.g. "std_msgs/String")
    pub type_name: String,
    /// Opaque serialized layout / message definition
    pub schema: Vec<u8>,
}

impl TypeDescriptor {
    /// Create a new type descriptor
    pub fn new(type_name: impl Into<String>, schema: impl Into<Vec<u8>>) -> Self {
        Self {
            type_name: type_name.into(),
            schema: schema.into(),
        }
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name)
    }
}

/// Single-value message
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    Time(Timestamp),
}

impl Scalar {
    fn type_suffix(&self) -> &'static str {
        match self {
            Scalar::Bool(_) => "Bool",
            Scalar::Int8(_) => "Int8",
            Scalar::Int16(_) => "Int16",
            Scalar::Int32(_) => "Int32",
            Scalar::Int64(_) => "Int64",
            Scalar::UInt8(_) => "UInt8",
            Scalar::UInt16(_) => "UInt16",
            Scalar::UInt32(_) => "UInt32",
            Scalar::UInt64(_) => "UInt64",
            Scalar::Float32(_) => "Float32",
            Scalar::Float64(_) => "Float64",
            Scalar::Time(_) => "Time",
        }
    }

    fn definition(&self) -> &'static str {
        match self {
            Scalar::Bool(_) => "bool data",
            Scalar::Int8(_) => "int8 data",
            Scalar::Int16(_) => "int16 data",
            Scalar::Int32(_) => "int32 data",
            Scalar::Int64(_) => "int64 data",
            Scalar::UInt8(_) => "uint8 data",
            Scalar::UInt16(_) => "uint16 data",
            Scalar::UInt32(_) => "uint32 data",
            Scalar::UInt64(_) => "uint64 data",
            Scalar::Float32(_) => "float32 data",
            Scalar::Float64(_) => "float64 data",
            Scalar::Time(_) => "time data",
        }
    }
}

/// A message written to or read from a bag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Single scalar value
    Scalar(Scalar),
    /// UTF-8 string
    Text(String),
    /// Typed array with an explicit layout
    Array(ArrayMessage),
    /// Caller-serialized payload with its own descriptor
    Opaque {
        descriptor: TypeDescriptor,
        bytes: Vec<u8>,
    },
}

const TYPE_NAMESPACE: &str = "std_msgs";

impl Message {
    /// Create an opaque message
    pub fn opaque(descriptor: TypeDescriptor, bytes: impl Into<Vec<u8>>) -> Self {
        Message::Opaque {
            descriptor,
            bytes: bytes.into(),
        }
    }

    /// Type descriptor that binds this message's channel
    pub fn descriptor(&self) -> TypeDescriptor {
        match self {
            Message::Scalar(s) => TypeDescriptor::new(
                format!("{}/{}", TYPE_NAMESPACE, s.type_suffix()),
                s.definition(),
            ),
            Message::Text(_) => {
                TypeDescriptor::new(format!("{}/String", TYPE_NAMESPACE), "string data")
            }
            Message::Array(a) => {
                let ty = a.element_type();
                TypeDescriptor::new(
                    format!("{}/{}MultiArray", TYPE_NAMESPACE, ty.name()),
                    format!(
                        "MultiArrayLayout layout\n{}[] data\n\
                         ===\nMultiArrayDimension[] dim\nuint32 data_offset\n\
                         ===\nstring label\nuint32 size\nuint32 stride",
                        ty.definition_keyword()
                    ),
                )
            }
            Message::Opaque { descriptor, .. } => descriptor.clone(),
        }
    }

    /// Type name of this message
    pub fn type_name(&self) -> String {
        match self {
            Message::Opaque { descriptor, .. } => descriptor.type_name.clone(),
            other => other.descriptor().type_name,
        }
    }

    /// Get as i64 if this is an integer scalar that fits
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Message::Scalar(s) => match *s {
                Scalar::Int8(v) => Some(v as i64),
                Scalar::Int16(v) => Some(v as i64),
                Scalar::Int32(v) => Some(v as i64),
                Scalar::Int64(v) => Some(v),
                Scalar::UInt8(v) => Some(v as i64),
                Scalar::UInt16(v) => Some(v as i64),
                Scalar::UInt32(v) => Some(v as i64),
                Scalar::UInt64(v) => i64::try_from(v).ok(),
                _ => None,
            },
            _ => None,
        }
    }

    /// Get as f64 if this is a numeric scalar
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Message::Scalar(Scalar::Float32(v)) => Some(*v as f64),
            Message::Scalar(Scalar::Float64(v)) => Some(*v),
            Message::Scalar(Scalar::UInt64(v)) => Some(*v as f64),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    /// Get as bool if this is a boolean scalar
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Message::Scalar(Scalar::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    /// Get as timestamp if this is a time scalar
    pub fn as_time(&self) -> Option<Timestamp> {
        match self {
            Message::Scalar(Scalar::Time(t)) => Some(*t),
            _ => None,
        }
    }

    /// Get as str if this is a text message
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Message::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get as array if this is an array message
    pub fn as_array(&self) -> Option<&ArrayMessage> {
        match self {
            Message::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Raw bytes of an opaque message
    pub fn as_opaque(&self) -> Option<&[u8]> {
        match self {
            Message::Opaque { bytes, .. } => Some(bytes),
            _ => None,
        }
    }
}

macro_rules! message_from_scalar {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Message {
                fn from(v: $ty) -> Self {
                    Message::Scalar(Scalar::$variant(v))
                }
            }
        )*
    };
}

message_from_scalar!(
    bool => Bool,
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
    Timestamp => Time,
);

impl From<String> for Message {
    fn from(v: String) -> Self {
        Message::Text(v)
    }
}

impl From<&str> for Message {
    fn from(v: &str) -> Self {
        Message::Text(v.to_string())
    }
}

impl From<ArrayMessage> for Message {
    fn from(v: ArrayMessage) -> Self {
        Message::Array(v)
    }
}

impl From<Scalar> for Message {
    fn from(v: Scalar) -> Self {
        Message::Scalar(v)
    }
}
