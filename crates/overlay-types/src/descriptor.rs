use crate::{
    error::TypeRegistrationError,
    kinds::{
        ArrayType, ClassType, CountedString, ForwardType, HasLayout, PointerType, Scalar,
        TypeKind, VectorType,
    },
    ClassTag, Value,
};
use overlay_utils::align_up;
use std::{
    fmt::{self, Debug, Display, Formatter},
    hash::{Hash, Hasher},
    sync::{Arc, OnceLock},
};

/// Which argument register bank a value travels in.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RegisterClass {
    Integer,
    Float,
}

/// How a value crosses a call boundary.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PassMode {
    /// Copied into a register or stack slot.
    Direct,
    /// Passed as a pointer to a copy; as a return value, written through a
    /// hidden structure-return pointer.
    Indirect,
}

/// Semantic identity of a type. Two descriptors with the same key are the
/// same type, whichever instance they came from.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeKey {
    Scalar(Scalar),
    Pointer(Box<TypeKey>),
    Array(Box<TypeKey>, usize),
    Vector(Box<TypeKey>),
    String,
    Class(Arc<str>),
}

struct TypeInner {
    name: String,
    kind: TypeKind,
    key: TypeKey,
}

/// Canonical descriptor of one native type. Cheap to clone; immutable.
#[derive(Clone)]
pub struct TypeDescriptor(Arc<TypeInner>);

impl PartialEq for TypeDescriptor {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0.key == other.0.key
    }
}

impl Eq for TypeDescriptor {}

impl Hash for TypeDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.key.hash(state)
    }
}

impl Debug for TypeDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.name)
    }
}

impl Display for TypeDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.name)
    }
}

impl TypeDescriptor {
    fn make(name: String, kind: impl Into<TypeKind>, key: TypeKey) -> Self {
        Self(Arc::new(TypeInner {
            name,
            kind: kind.into(),
            key,
        }))
    }

    pub fn scalar(s: Scalar) -> Self {
        Self::make(s.name().to_string(), s, TypeKey::Scalar(s))
    }

    pub fn void() -> Self {
        Self::scalar(Scalar::Void)
    }
    pub fn boolean() -> Self {
        Self::scalar(Scalar::Bool)
    }
    pub fn i8() -> Self {
        Self::scalar(Scalar::Int8)
    }
    pub fn u8() -> Self {
        Self::scalar(Scalar::UInt8)
    }
    pub fn i16() -> Self {
        Self::scalar(Scalar::Int16)
    }
    pub fn u16() -> Self {
        Self::scalar(Scalar::UInt16)
    }
    pub fn i32() -> Self {
        Self::scalar(Scalar::Int32)
    }
    pub fn u32() -> Self {
        Self::scalar(Scalar::UInt32)
    }
    pub fn i64() -> Self {
        Self::scalar(Scalar::Int64)
    }
    pub fn u64() -> Self {
        Self::scalar(Scalar::UInt64)
    }
    pub fn f32() -> Self {
        Self::scalar(Scalar::Float32)
    }
    pub fn f64() -> Self {
        Self::scalar(Scalar::Float64)
    }
    pub fn raw_pointer() -> Self {
        Self::scalar(Scalar::Pointer)
    }

    pub fn string() -> Self {
        Self::make("string".to_string(), CountedString, TypeKey::String)
    }

    fn sized_element(element: &TypeDescriptor) -> Result<usize, TypeRegistrationError> {
        match element.size() {
            Some(size) if !element.is_void() => Ok(align_up(size, element.alignment())),
            _ => Err(TypeRegistrationError::UnsizedElement {
                element: element.name().to_string(),
            }),
        }
    }

    /// Pointer to a type whose size is already known.
    pub fn pointer_to(pointee: &TypeDescriptor) -> Result<Self, TypeRegistrationError> {
        Self::sized_element(pointee)?;
        Ok(Self::deferred_pointer(pointee))
    }

    /// Pointer whose pointee may still be a forward declaration; the pointee is
    /// consulted lazily when the pointer is read.
    pub fn deferred_pointer(pointee: &TypeDescriptor) -> Self {
        Self::make(
            format!("ptr<{}>", pointee.name()),
            PointerType {
                pointee: pointee.clone(),
            },
            TypeKey::Pointer(Box::new(pointee.key().clone())),
        )
    }

    pub fn array_of(element: &TypeDescriptor, length: usize) -> Result<Self, TypeRegistrationError> {
        let stride = Self::sized_element(element)?;
        Ok(Self::make(
            format!("{}[{}]", element.name(), length),
            ArrayType {
                element: element.clone(),
                length,
                stride,
            },
            TypeKey::Array(Box::new(element.key().clone()), length),
        ))
    }

    pub fn vector_of(element: &TypeDescriptor) -> Result<Self, TypeRegistrationError> {
        let stride = Self::sized_element(element)?;
        Ok(Self::make(
            format!("vector<{}>", element.name()),
            VectorType {
                element: element.clone(),
                stride,
            },
            TypeKey::Vector(Box::new(element.key().clone())),
        ))
    }

    pub fn class(tag: ClassTag, size: usize, alignment: usize) -> Self {
        let name = tag.name.clone();
        Self::make(
            name.to_string(),
            ClassType {
                tag,
                size,
                alignment,
            },
            TypeKey::Class(name),
        )
    }

    pub(crate) fn forward(name: &str) -> Self {
        let name: Arc<str> = name.into();
        Self::make(
            name.to_string(),
            ForwardType {
                name: name.clone(),
                target: Arc::new(OnceLock::new()),
            },
            TypeKey::Class(name),
        )
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn kind(&self) -> &TypeKind {
        &self.0.kind
    }

    pub fn key(&self) -> &TypeKey {
        &self.0.key
    }

    pub fn size(&self) -> Option<usize> {
        self.0.kind.size()
    }

    pub fn alignment(&self) -> usize {
        self.0.kind.alignment()
    }

    pub fn is_void(&self) -> bool {
        matches!(self.0.kind, TypeKind::Scalar(Scalar::Void))
    }

    /// Follows a resolved forward declaration to its class type.
    pub fn resolved(&self) -> Option<&TypeDescriptor> {
        match &self.0.kind {
            TypeKind::ForwardType(f) => f.resolved(),
            _ => Some(self),
        }
    }

    /// Class identity of a by-value class (or a resolved forward declaration of one).
    pub fn class_tag(&self) -> Option<&ClassTag> {
        match &self.resolved()?.0.kind {
            TypeKind::ClassType(c) => Some(&c.tag),
            _ => None,
        }
    }

    /// Class identity of the pointee, for pointers to classes.
    pub fn pointee_class(&self) -> Option<&ClassTag> {
        match &self.0.kind {
            TypeKind::PointerType(p) => p.pointee.class_tag(),
            _ => None,
        }
    }

    pub fn register_class(&self) -> Result<RegisterClass, TypeRegistrationError> {
        match &self.0.kind {
            TypeKind::Scalar(Scalar::Void) => Err(self.ambiguous()),
            TypeKind::Scalar(s) if s.is_float() => Ok(RegisterClass::Float),
            TypeKind::ForwardType(f) => f
                .resolved()
                .ok_or_else(|| self.ambiguous())?
                .register_class(),
            _ => Ok(RegisterClass::Integer),
        }
    }

    pub fn pass_mode(&self) -> Result<PassMode, TypeRegistrationError> {
        match &self.0.kind {
            TypeKind::Scalar(Scalar::Void) => Err(self.ambiguous()),
            TypeKind::Scalar(_) | TypeKind::PointerType(_) => Ok(PassMode::Direct),
            TypeKind::ClassType(c) => Ok(match c.size {
                1 | 2 | 4 | 8 => PassMode::Direct,
                _ => PassMode::Indirect,
            }),
            TypeKind::ArrayType(_) | TypeKind::VectorType(_) | TypeKind::CountedString(_) => {
                Ok(PassMode::Indirect)
            }
            TypeKind::ForwardType(f) => f.resolved().ok_or_else(|| self.ambiguous())?.pass_mode(),
        }
    }

    fn ambiguous(&self) -> TypeRegistrationError {
        TypeRegistrationError::AmbiguousRegisterClass(self.name().to_string())
    }

    /// Fast, conservative check used to filter overload candidates. A positive
    /// answer only means the value can be written as this type.
    pub fn is_type_of(&self, value: &Value) -> bool {
        match &self.0.kind {
            TypeKind::Scalar(s) => match s {
                Scalar::Void => matches!(value, Value::Void),
                Scalar::Bool => matches!(value, Value::Bool(_)),
                Scalar::Float32 | Scalar::Float64 => {
                    matches!(value, Value::Float(_) | Value::Int(_) | Value::UInt(_))
                }
                Scalar::Pointer => matches!(
                    value,
                    Value::Null | Value::Pointer(_) | Value::Object(_)
                ),
                int => match (value.as_integer(), int.int_range()) {
                    (Some(v), Some((lo, hi))) => lo <= v && v <= hi,
                    _ => false,
                },
            },
            TypeKind::PointerType(p) => match value {
                Value::Null | Value::Pointer(_) => true,
                Value::Object(o) => match p.pointee.class_tag() {
                    Some(tag) => o.class.is_a(tag.id),
                    None => false,
                },
                _ => false,
            },
            TypeKind::ArrayType(a) => match value {
                Value::List(items) => {
                    items.len() == a.length && items.iter().all(|v| a.element.is_type_of(v))
                }
                _ => false,
            },
            TypeKind::VectorType(v) => match value {
                Value::List(items) => items.iter().all(|i| v.element.is_type_of(i)),
                _ => false,
            },
            TypeKind::CountedString(_) => matches!(value, Value::Str(_)),
            TypeKind::ClassType(c) => match value {
                Value::Object(o) => o.class.is_a(c.tag.id),
                _ => false,
            },
            TypeKind::ForwardType(f) => f.resolved().is_some_and(|t| t.is_type_of(value)),
        }
    }

    /// Equality under this type's semantics: numbers compare at this type's
    /// precision, pointers by address and by-value objects by their bytes.
    ///
    /// # Safety
    ///
    /// Every object address reachable from `a` and `b` through by-value
    /// class slots must be valid for reads of the class size.
    pub unsafe fn values_equal(&self, a: &Value, b: &Value) -> bool {
        match &self.0.kind {
            TypeKind::Scalar(Scalar::Float32) => match (a.as_number(), b.as_number()) {
                (Some(x), Some(y)) => (x as f32) == (y as f32) || (x.is_nan() && y.is_nan()),
                _ => a == b,
            },
            TypeKind::Scalar(Scalar::Float64) => match (a.as_number(), b.as_number()) {
                (Some(x), Some(y)) => x == y || (x.is_nan() && y.is_nan()),
                _ => a == b,
            },
            TypeKind::Scalar(Scalar::Pointer) | TypeKind::PointerType(_) => {
                match (a.as_address(), b.as_address()) {
                    (Some(x), Some(y)) => x == y,
                    _ => a == b,
                }
            }
            TypeKind::ClassType(c) => match (a, b) {
                (Value::Object(x), Value::Object(y)) if x.address == y.address => true,
                (Value::Object(x), Value::Object(y)) => {
                    if x.address.is_null() || y.address.is_null() {
                        return false;
                    }
                    let left = std::slice::from_raw_parts(x.address.as_ptr::<u8>(), c.size);
                    let right = std::slice::from_raw_parts(y.address.as_ptr::<u8>(), c.size);
                    left == right
                }
                _ => a == b,
            },
            TypeKind::ArrayType(ArrayType { element, .. })
            | TypeKind::VectorType(VectorType { element, .. }) => match (a, b) {
                (Value::List(x), Value::List(y)) => {
                    x.len() == y.len()
                        && x.iter().zip(y).all(|(x, y)| element.values_equal(x, y))
                }
                _ => a == b,
            },
            TypeKind::ForwardType(f) => match f.resolved() {
                Some(t) => t.values_equal(a, b),
                None => a == b,
            },
            _ => a == b,
        }
    }
}
