//! Compiled classes by id, name and vtable address.
use dashmap::DashMap;
use overlay_types::ClassId;
use overlay_utils::{NativeAddress, POINTER_SIZE};
use overlay_value::{ClassLayout, MemoryHandle, ObjectRef};
use parking_lot::RwLock;
use std::{collections::HashMap, ptr, sync::Arc};

/// Builds the handle for an object of one class. Called only with addresses
/// already vouched for by the caller of [`crate::NativeRuntime::wrap`].
pub type ClassFactory = Arc<dyn Fn(NativeAddress, &Arc<ClassLayout>) -> ObjectRef + Send + Sync>;

struct ClassEntry {
    layout: Arc<ClassLayout>,
    vtable: Option<NativeAddress>,
    factory: Option<ClassFactory>,
}

#[derive(Default)]
pub struct ClassRegistry {
    classes: RwLock<HashMap<ClassId, ClassEntry>>,
    by_name: RwLock<HashMap<String, ClassId>>,
    vtables: DashMap<NativeAddress, ClassId>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a compiled class. Polymorphic classes pass the address of
    /// their vtable, which objects of exactly that class store at offset 0.
    pub fn register(&self, layout: Arc<ClassLayout>, vtable: Option<NativeAddress>) {
        let id = layout.tag().id;
        if let Some(vtable) = vtable {
            self.vtables.insert(vtable, id);
        }
        self.by_name.write().insert(layout.name().to_string(), id);
        self.classes.write().insert(
            id,
            ClassEntry {
                layout,
                vtable,
                factory: None,
            },
        );
    }

    /// Replaces the default aliasing constructor for one class. Returns false
    /// if the class is not registered.
    pub fn set_factory(
        &self,
        id: ClassId,
        factory: impl Fn(NativeAddress, &Arc<ClassLayout>) -> ObjectRef + Send + Sync + 'static,
    ) -> bool {
        match self.classes.write().get_mut(&id) {
            Some(entry) => {
                entry.factory = Some(Arc::new(factory));
                true
            }
            None => false,
        }
    }

    pub fn by_id(&self, id: ClassId) -> Option<Arc<ClassLayout>> {
        self.classes.read().get(&id).map(|e| e.layout.clone())
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<ClassLayout>> {
        let id = *self.by_name.read().get(name)?;
        self.by_id(id)
    }

    pub fn by_vtable(&self, vtable: NativeAddress) -> Option<Arc<ClassLayout>> {
        let id = *self.vtables.get(&vtable)?;
        self.by_id(id)
    }

    pub fn vtable_of(&self, id: ClassId) -> Option<NativeAddress> {
        self.classes.read().get(&id).and_then(|e| e.vtable)
    }

    pub fn len(&self) -> usize {
        self.classes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.read().is_empty()
    }

    /// The most derived registered class of the object at `address` that is
    /// still a `declared`. Falls back to `declared` when the vtable word is
    /// unknown or belongs to an unrelated class.
    ///
    /// # Safety
    ///
    /// `address` must be valid for reads of `declared.size()` bytes.
    pub unsafe fn most_derived(&self, address: NativeAddress, declared: &Arc<ClassLayout>) -> Arc<ClassLayout> {
        if self.vtables.is_empty() || declared.size() < POINTER_SIZE {
            return declared.clone();
        }
        let vtable = NativeAddress(unsafe { ptr::read_unaligned(address.as_ptr::<usize>()) });
        match self.by_vtable(vtable) {
            Some(actual) if actual.is_subclass_of(declared) => actual,
            _ => declared.clone(),
        }
    }

    /// Builds a fresh handle for `address` through the class factory, or an
    /// aliasing handle when the class has none.
    ///
    /// # Safety
    ///
    /// `address` must point to a live object laid out as `layout`.
    pub unsafe fn instantiate(&self, address: NativeAddress, layout: &Arc<ClassLayout>) -> ObjectRef {
        let factory = self
            .classes
            .read()
            .get(&layout.tag().id)
            .and_then(|e| e.factory.clone());
        match factory {
            Some(factory) => factory(address, layout),
            None => unsafe { MemoryHandle::alias(address, layout) },
        }
    }
}
