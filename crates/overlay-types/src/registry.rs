use crate::{
    error::TypeRegistrationError,
    kinds::{Scalar, TypeKind},
    ClassId, ClassTag, TypeDescriptor,
};
use parking_lot::RwLock;
use std::{
    collections::HashMap,
    sync::atomic::{AtomicU32, Ordering},
};
use tracing::debug;

/// Interns named descriptors, hands out class identifiers, and tracks
/// classes that have been named but not yet defined.
pub struct TypeRegistry {
    named: RwLock<HashMap<String, TypeDescriptor>>,
    forwards: RwLock<HashMap<String, TypeDescriptor>>,
    next_class: AtomicU32,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    pub fn new() -> Self {
        let mut named: HashMap<String, TypeDescriptor> = Scalar::ALL
            .iter()
            .map(|s| (s.name().to_string(), TypeDescriptor::scalar(*s)))
            .collect();
        named.insert("string".to_string(), TypeDescriptor::string());
        Self {
            named: RwLock::new(named),
            forwards: RwLock::new(HashMap::new()),
            next_class: AtomicU32::new(1),
        }
    }

    pub fn get(&self, name: &str) -> Option<TypeDescriptor> {
        self.named.read().get(name).cloned()
    }

    pub fn lookup(&self, name: &str) -> Result<TypeDescriptor, TypeRegistrationError> {
        self.get(name)
            .ok_or_else(|| TypeRegistrationError::UnknownType(name.to_string()))
    }

    /// Registers `ty` under an additional name.
    pub fn register(&self, name: &str, ty: TypeDescriptor) -> Result<(), TypeRegistrationError> {
        let mut named = self.named.write();
        if named.contains_key(name) {
            return Err(TypeRegistrationError::DuplicateType(name.to_string()));
        }
        named.insert(name.to_string(), ty);
        Ok(())
    }

    /// Returns the class called `name` if it is defined, otherwise a forward
    /// declaration that resolves once it is.
    pub fn forward(&self, name: &str) -> TypeDescriptor {
        if let Some(defined) = self.get(name) {
            return defined;
        }
        self.forwards
            .write()
            .entry(name.to_string())
            .or_insert_with(|| TypeDescriptor::forward(name))
            .clone()
    }

    /// Names still referenced through forward declarations but never defined.
    pub fn pending_forwards(&self) -> Vec<String> {
        let mut names: Vec<_> = self.forwards.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Reserves an identity for a class about to be compiled.
    pub fn allocate_class(
        &self,
        name: &str,
        base: Option<&ClassTag>,
    ) -> Result<ClassTag, TypeRegistrationError> {
        if self.named.read().contains_key(name) {
            return Err(TypeRegistrationError::DuplicateType(name.to_string()));
        }
        let id = ClassId(self.next_class.fetch_add(1, Ordering::Relaxed));
        Ok(ClassTag::new(id, name, base))
    }

    /// Publishes a compiled class as a by-value type and resolves any forward
    /// declarations waiting on it.
    pub fn define_class(
        &self,
        tag: ClassTag,
        size: usize,
        alignment: usize,
    ) -> Result<TypeDescriptor, TypeRegistrationError> {
        let name = tag.name.to_string();
        let ty = TypeDescriptor::class(tag, size, alignment);
        self.register(&name, ty.clone())?;

        if let Some(pending) = self.forwards.write().remove(&name) {
            if let TypeKind::ForwardType(f) = pending.kind() {
                // Only this registry creates forwards, and each is resolved once.
                let _ = f.target.set(ty.clone());
            }
        }
        debug!(class = %name, size, alignment, "defined class type");
        Ok(ty)
    }

    /// Parses a type expression: a primitive or class name, `string`,
    /// `ptr<T>`, `vector<T>` or `T[N]`. Inside `ptr<...>` an unknown name
    /// becomes a forward declaration.
    pub fn parse(&self, expr: &str) -> Result<TypeDescriptor, TypeRegistrationError> {
        self.parse_inner(expr.trim(), false, expr)
    }

    fn parse_inner(
        &self,
        text: &str,
        behind_pointer: bool,
        whole: &str,
    ) -> Result<TypeDescriptor, TypeRegistrationError> {
        let malformed = || TypeRegistrationError::MalformedExpression(whole.to_string());

        if let Some(head) = text.strip_suffix(']') {
            let open = head.rfind('[').ok_or_else(malformed)?;
            let length = head[open + 1..].trim().parse().map_err(|_| malformed())?;
            let element = self.parse_inner(head[..open].trim(), false, whole)?;
            return TypeDescriptor::array_of(&element, length);
        }

        if let Some(inner) = generic_argument(text, "ptr") {
            let pointee = self.parse_inner(inner, true, whole)?;
            return Ok(if pointee.is_void() {
                TypeDescriptor::raw_pointer()
            } else if pointee.size().is_some() {
                TypeDescriptor::pointer_to(&pointee)?
            } else {
                TypeDescriptor::deferred_pointer(&pointee)
            });
        }

        if let Some(inner) = generic_argument(text, "vector") {
            let element = self.parse_inner(inner, false, whole)?;
            return TypeDescriptor::vector_of(&element);
        }

        if !is_identifier(text) {
            return Err(malformed());
        }
        match self.get(text) {
            Some(ty) => Ok(ty),
            None if behind_pointer => Ok(self.forward(text)),
            None => Err(TypeRegistrationError::UnknownType(text.to_string())),
        }
    }
}

fn generic_argument<'a>(text: &'a str, head: &str) -> Option<&'a str> {
    text.strip_prefix(head)?
        .trim_start()
        .strip_prefix('<')?
        .strip_suffix('>')
        .map(str::trim)
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}
