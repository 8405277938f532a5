//! Values on both sides of the boundary
//!
//! `NativeValue` is what the native caller hands in or gets back, tagged by
//! `ValueKind`. `ManagedValue` is what object fields and script calls hold.

use crate::object::{ObjectHandle, ObjectRef};

/// Tag of a marshalled value. Discriminants are part of the C ABI.
#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueKind {
    Unknown = 0,
    SByte = 1,
    Byte = 2,
    Short = 3,
    UShort = 4,
    Int = 5,
    UInt = 6,
    Long = 7,
    ULong = 8,
    Float = 9,
    Double = 10,
    Bool = 11,
    String = 12,
    Pointer = 13,
    Array = 14,
    Struct = 15,
}

impl ValueKind {
    pub fn from_raw(raw: u32) -> Option<Self> {
        use ValueKind::*;
        Some(match raw {
            0 => Unknown,
            1 => SByte,
            2 => Byte,
            3 => Short,
            4 => UShort,
            5 => Int,
            6 => UInt,
            7 => Long,
            8 => ULong,
            9 => Float,
            10 => Double,
            11 => Bool,
            12 => String,
            13 => Pointer,
            14 => Array,
            15 => Struct,
            _ => return None,
        })
    }

    /// Wire width of the fixed-size kinds.
    pub fn primitive_size(self) -> Option<usize> {
        use ValueKind::*;
        match self {
            SByte | Byte | Bool => Some(1),
            Short | UShort => Some(2),
            Int | UInt | Float => Some(4),
            Long | ULong | Double => Some(8),
            Pointer => Some(std::mem::size_of::<usize>()),
            Unknown | String | Array | Struct => None,
        }
    }

    pub fn is_integer(self) -> bool {
        use ValueKind::*;
        matches!(self, SByte | Byte | Short | UShort | Int | UInt | Long | ULong)
    }
}

/// A value as the native side sees it.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeValue {
    Null,
    SByte(i8),
    Byte(u8),
    Short(i16),
    UShort(u16),
    Int(i32),
    UInt(u32),
    Long(i64),
    ULong(u64),
    Float(f32),
    Double(f64),
    Bool(bool),
    String(String),
    Pointer(usize),
    Array(Vec<NativeValue>),
    /// Raw bytes in the struct's sequential C layout.
    Struct(Vec<u8>),
    Handle(ObjectHandle),
}

impl NativeValue {
    /// The kind used for overload matching. References travel as pointers.
    pub fn kind(&self) -> ValueKind {
        match self {
            NativeValue::Null | NativeValue::Pointer(_) | NativeValue::Handle(_) => {
                ValueKind::Pointer
            }
            NativeValue::SByte(_) => ValueKind::SByte,
            NativeValue::Byte(_) => ValueKind::Byte,
            NativeValue::Short(_) => ValueKind::Short,
            NativeValue::UShort(_) => ValueKind::UShort,
            NativeValue::Int(_) => ValueKind::Int,
            NativeValue::UInt(_) => ValueKind::UInt,
            NativeValue::Long(_) => ValueKind::Long,
            NativeValue::ULong(_) => ValueKind::ULong,
            NativeValue::Float(_) => ValueKind::Float,
            NativeValue::Double(_) => ValueKind::Double,
            NativeValue::Bool(_) => ValueKind::Bool,
            NativeValue::String(_) => ValueKind::String,
            NativeValue::Array(_) => ValueKind::Array,
            NativeValue::Struct(_) => ValueKind::Struct,
        }
    }

    pub fn as_handle(&self) -> Option<ObjectHandle> {
        match self {
            NativeValue::Handle(handle) => Some(*handle),
            _ => None,
        }
    }
}

/// A struct value held on the managed side, fields in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct StructValue {
    pub type_name: String,
    pub fields: Vec<(String, ManagedValue)>,
}

impl StructValue {
    pub fn field(&self, name: &str) -> Option<&ManagedValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

/// A value as the managed side holds it.
#[derive(Debug, Clone, PartialEq)]
pub enum ManagedValue {
    Null,
    SByte(i8),
    Byte(u8),
    Short(i16),
    UShort(u16),
    Int(i32),
    UInt(u32),
    Long(i64),
    ULong(u64),
    Float(f32),
    Double(f64),
    Bool(bool),
    String(String),
    Pointer(usize),
    Array(Vec<ManagedValue>),
    Struct(StructValue),
    Object(ObjectRef),
}

impl ManagedValue {
    pub fn zero_of(kind: ValueKind) -> Self {
        match kind {
            ValueKind::SByte => ManagedValue::SByte(0),
            ValueKind::Byte => ManagedValue::Byte(0),
            ValueKind::Short => ManagedValue::Short(0),
            ValueKind::UShort => ManagedValue::UShort(0),
            ValueKind::Int => ManagedValue::Int(0),
            ValueKind::UInt => ManagedValue::UInt(0),
            ValueKind::Long => ManagedValue::Long(0),
            ValueKind::ULong => ManagedValue::ULong(0),
            ValueKind::Float => ManagedValue::Float(0.0),
            ValueKind::Double => ManagedValue::Double(0.0),
            ValueKind::Bool => ManagedValue::Bool(false),
            ValueKind::Pointer => ManagedValue::Pointer(0),
            ValueKind::Unknown | ValueKind::String | ValueKind::Array | ValueKind::Struct => {
                ManagedValue::Null
            }
        }
    }

    /// Builds an integer-kinded value. `None` when `value` does not fit the
    /// target width or `kind` is not an integer kind.
    pub fn integer(kind: ValueKind, value: i64) -> Option<Self> {
        Some(match kind {
            ValueKind::SByte => ManagedValue::SByte(i8::try_from(value).ok()?),
            ValueKind::Byte => ManagedValue::Byte(u8::try_from(value).ok()?),
            ValueKind::Short => ManagedValue::Short(i16::try_from(value).ok()?),
            ValueKind::UShort => ManagedValue::UShort(u16::try_from(value).ok()?),
            ValueKind::Int => ManagedValue::Int(i32::try_from(value).ok()?),
            ValueKind::UInt => ManagedValue::UInt(u32::try_from(value).ok()?),
            ValueKind::Long => ManagedValue::Long(value),
            ValueKind::ULong => ManagedValue::ULong(u64::try_from(value).ok()?),
            _ => return None,
        })
    }

    /// Numeric view used by scripts and enum conversions.
    pub fn as_f64(&self) -> Option<f64> {
        Some(match self {
            ManagedValue::SByte(v) => f64::from(*v),
            ManagedValue::Byte(v) => f64::from(*v),
            ManagedValue::Short(v) => f64::from(*v),
            ManagedValue::UShort(v) => f64::from(*v),
            ManagedValue::Int(v) => f64::from(*v),
            ManagedValue::UInt(v) => f64::from(*v),
            ManagedValue::Long(v) => *v as f64,
            ManagedValue::ULong(v) => *v as f64,
            ManagedValue::Float(v) => f64::from(*v),
            ManagedValue::Double(v) => *v,
            ManagedValue::Pointer(v) => *v as f64,
            _ => return None,
        })
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            ManagedValue::Object(object) => Some(object),
            _ => None,
        }
    }
}
