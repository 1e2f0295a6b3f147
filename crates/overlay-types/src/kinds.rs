use crate::{ClassTag, TypeDescriptor};
use enum_dispatch::enum_dispatch;
use overlay_utils::POINTER_SIZE;
use std::{
    fmt::{self, Debug, Formatter},
    sync::{Arc, OnceLock},
};

#[enum_dispatch]
pub trait HasLayout {
    /// Size in bytes, or `None` while the type is only forward-declared.
    fn size(&self) -> Option<usize>;
    fn alignment(&self) -> usize;
}

#[enum_dispatch(HasLayout)]
#[derive(Clone, Debug)]
pub enum TypeKind {
    Scalar,
    PointerType,
    ArrayType,
    VectorType,
    CountedString,
    ClassType,
    ForwardType,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Scalar {
    Void,
    Bool,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
    /// Untyped pointer (`void*`).
    Pointer,
}

impl HasLayout for Scalar {
    fn size(&self) -> Option<usize> {
        Some(self.size_const())
    }

    fn alignment(&self) -> usize {
        self.size_const().max(1)
    }
}

impl Scalar {
    pub const fn size_const(&self) -> usize {
        match self {
            Scalar::Void => 0,
            Scalar::Bool | Scalar::Int8 | Scalar::UInt8 => 1,
            Scalar::Int16 | Scalar::UInt16 => 2,
            Scalar::Int32 | Scalar::UInt32 | Scalar::Float32 => 4,
            Scalar::Int64 | Scalar::UInt64 | Scalar::Float64 => 8,
            Scalar::Pointer => POINTER_SIZE,
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Scalar::Void => "void",
            Scalar::Bool => "bool",
            Scalar::Int8 => "int8",
            Scalar::UInt8 => "uint8",
            Scalar::Int16 => "int16",
            Scalar::UInt16 => "uint16",
            Scalar::Int32 => "int32",
            Scalar::UInt32 => "uint32",
            Scalar::Int64 => "int64",
            Scalar::UInt64 => "uint64",
            Scalar::Float32 => "float",
            Scalar::Float64 => "double",
            Scalar::Pointer => "pointer",
        }
    }

    pub const ALL: [Scalar; 13] = [
        Scalar::Void,
        Scalar::Bool,
        Scalar::Int8,
        Scalar::UInt8,
        Scalar::Int16,
        Scalar::UInt16,
        Scalar::Int32,
        Scalar::UInt32,
        Scalar::Int64,
        Scalar::UInt64,
        Scalar::Float32,
        Scalar::Float64,
        Scalar::Pointer,
    ];

    pub const fn is_float(&self) -> bool {
        matches!(self, Scalar::Float32 | Scalar::Float64)
    }

    /// Inclusive value range of an integer scalar.
    pub const fn int_range(&self) -> Option<(i128, i128)> {
        match self {
            Scalar::Int8 => Some((i8::MIN as i128, i8::MAX as i128)),
            Scalar::UInt8 => Some((0, u8::MAX as i128)),
            Scalar::Int16 => Some((i16::MIN as i128, i16::MAX as i128)),
            Scalar::UInt16 => Some((0, u16::MAX as i128)),
            Scalar::Int32 => Some((i32::MIN as i128, i32::MAX as i128)),
            Scalar::UInt32 => Some((0, u32::MAX as i128)),
            Scalar::Int64 => Some((i64::MIN as i128, i64::MAX as i128)),
            Scalar::UInt64 => Some((0, u64::MAX as i128)),
            _ => None,
        }
    }

    pub const fn is_signed(&self) -> bool {
        matches!(
            self,
            Scalar::Int8 | Scalar::Int16 | Scalar::Int32 | Scalar::Int64
        )
    }
}

#[derive(Clone, Debug)]
pub struct PointerType {
    pub pointee: TypeDescriptor,
}

impl HasLayout for PointerType {
    fn size(&self) -> Option<usize> {
        Some(POINTER_SIZE)
    }

    fn alignment(&self) -> usize {
        POINTER_SIZE
    }
}

/// Fixed-length inline array.
#[derive(Clone, Debug)]
pub struct ArrayType {
    pub element: TypeDescriptor,
    pub length: usize,
    pub stride: usize,
}

impl HasLayout for ArrayType {
    fn size(&self) -> Option<usize> {
        Some(self.stride * self.length)
    }

    fn alignment(&self) -> usize {
        self.element.alignment()
    }
}

/// Native growable vector: `{ begin, end, capacity_end }`.
#[derive(Clone, Debug)]
pub struct VectorType {
    pub element: TypeDescriptor,
    pub stride: usize,
}

impl VectorType {
    pub const BEGIN: usize = 0;
    pub const END: usize = POINTER_SIZE;
    pub const CAPACITY: usize = 2 * POINTER_SIZE;
}

impl HasLayout for VectorType {
    fn size(&self) -> Option<usize> {
        Some(3 * POINTER_SIZE)
    }

    fn alignment(&self) -> usize {
        POINTER_SIZE
    }
}

/// UTF-8 counted string: `{ data, length }`.
#[derive(Clone, Copy, Debug)]
pub struct CountedString;

impl CountedString {
    pub const DATA: usize = 0;
    pub const LENGTH: usize = POINTER_SIZE;
}

impl HasLayout for CountedString {
    fn size(&self) -> Option<usize> {
        Some(2 * POINTER_SIZE)
    }

    fn alignment(&self) -> usize {
        POINTER_SIZE
    }
}

/// A compiled class embedded by value.
#[derive(Clone, Debug)]
pub struct ClassType {
    pub tag: ClassTag,
    pub size: usize,
    pub alignment: usize,
}

impl HasLayout for ClassType {
    fn size(&self) -> Option<usize> {
        Some(self.size)
    }

    fn alignment(&self) -> usize {
        self.alignment
    }
}

/// A class named before its layout exists. Resolved once the class is compiled.
#[derive(Clone)]
pub struct ForwardType {
    pub name: Arc<str>,
    pub(crate) target: Arc<OnceLock<TypeDescriptor>>,
}

impl Debug for ForwardType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.target.get() {
            Some(t) => write!(f, "forward {} => {}", self.name, t.name()),
            None => write!(f, "forward {} (unresolved)", self.name),
        }
    }
}

impl ForwardType {
    pub fn resolved(&self) -> Option<&TypeDescriptor> {
        self.target.get()
    }
}

impl HasLayout for ForwardType {
    fn size(&self) -> Option<usize> {
        self.target.get().and_then(|t| t.size())
    }

    fn alignment(&self) -> usize {
        self.target.get().map(|t| t.alignment()).unwrap_or(1)
    }
}
