use overlay_utils::NativeAddress;
use std::{
    any::Any,
    fmt::{self, Debug, Formatter},
    rc::Rc,
    sync::Arc,
};

/// Identifier of a compiled class, unique within one [`TypeRegistry`](crate::TypeRegistry).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub u32);

/// Runtime identity of a class: its id, name and the ids of every class it
/// derives from (itself first, root last).
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ClassTag {
    pub id: ClassId,
    pub name: Arc<str>,
    ancestry: Arc<[ClassId]>,
}

impl Debug for ClassTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.id.0)
    }
}

impl ClassTag {
    pub fn new(id: ClassId, name: impl Into<Arc<str>>, base: Option<&ClassTag>) -> Self {
        let mut ancestry = vec![id];
        if let Some(base) = base {
            ancestry.extend(base.ancestry.iter().copied());
        }
        Self {
            id,
            name: name.into(),
            ancestry: ancestry.into(),
        }
    }

    /// True if this class is `id` or derives from it.
    pub fn is_a(&self, id: ClassId) -> bool {
        self.ancestry.contains(&id)
    }

    pub fn ancestry(&self) -> &[ClassId] {
        &self.ancestry
    }

    /// Number of classes between this one and the root.
    pub fn depth(&self) -> usize {
        self.ancestry.len() - 1
    }
}

/// A managed view of a native object: an address plus its class. The optional
/// keepalive pins whatever owns the memory (usually a memory handle) for as
/// long as the value is alive.
#[derive(Clone)]
pub struct ObjectValue {
    pub address: NativeAddress,
    pub class: ClassTag,
    keepalive: Option<Rc<dyn Any>>,
}

impl ObjectValue {
    pub fn new(address: NativeAddress, class: ClassTag) -> Self {
        Self {
            address,
            class,
            keepalive: None,
        }
    }

    pub fn with_keepalive(address: NativeAddress, class: ClassTag, owner: Rc<dyn Any>) -> Self {
        Self {
            address,
            class,
            keepalive: Some(owner),
        }
    }

    pub fn keepalive(&self) -> Option<&Rc<dyn Any>> {
        self.keepalive.as_ref()
    }
}

impl Debug for ObjectValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}@{}", self.class, self.address)
    }
}

/// Objects compare by native identity.
impl PartialEq for ObjectValue {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

/// A managed-side value crossing into or out of native memory.
#[derive(Clone, Debug)]
pub enum Value {
    Void,
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Pointer(NativeAddress),
    Object(ObjectValue),
    List(Vec<Value>),
}

impl Value {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Void => "void",
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) | Value::UInt(_) => "integer",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Pointer(_) => "pointer",
            Value::Object(_) => "object",
            Value::List(_) => "list",
        }
    }

    pub fn as_integer(&self) -> Option<i128> {
        match self {
            Value::Int(i) => Some(*i as i128),
            Value::UInt(u) => Some(*u as i128),
            _ => None,
        }
    }

    /// Numeric view used by float-typed slots: floats and integers both qualify.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            Value::UInt(u) => Some(*u as f64),
            _ => None,
        }
    }

    pub fn as_address(&self) -> Option<NativeAddress> {
        match self {
            Value::Null => Some(NativeAddress::NULL),
            Value::Pointer(p) => Some(*p),
            Value::Object(o) => Some(o.address),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectValue> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Void, Value::Void) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(_) | Value::UInt(_), Value::Int(_) | Value::UInt(_)) => {
                self.as_integer() == other.as_integer()
            }
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Pointer(a), Value::Pointer(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            _ => false,
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::UInt(v as u64)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v as f64)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<NativeAddress> for Value {
    fn from(v: NativeAddress) -> Self {
        if v.is_null() {
            Value::Null
        } else {
            Value::Pointer(v)
        }
    }
}

impl From<ObjectValue> for Value {
    fn from(v: ObjectValue) -> Self {
        Value::Object(v)
    }
}
