use crate::{
    error::{LayoutError, LifetimeError, OverlayError},
    layout::{ClassLayout, FieldLayout},
};
use overlay_types::{ObjectValue, TypeKind, Value};
use overlay_utils::{NativeAddress, ProcessAllocator, SystemAllocator};
use std::{
    cell::Cell,
    fmt::{self, Debug, Formatter},
    rc::{Rc, Weak},
    sync::Arc,
};
use tracing::{trace, warn};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Ownership {
    /// The handle allocated the block and must release it exactly once.
    Owned,
    /// The block belongs to the native side; the handle never frees it.
    Alias,
}

/// A managed view of one native object. Shared as an [`ObjectRef`].
pub struct MemoryHandle {
    address: NativeAddress,
    layout: Arc<ClassLayout>,
    ownership: Ownership,
    released: Cell<bool>,
    allocator: Option<Rc<dyn ProcessAllocator>>,
    this: Weak<MemoryHandle>,
}

pub type ObjectRef = Rc<MemoryHandle>;

impl Debug for MemoryHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{} ({:?}{})",
            self.layout.name(),
            self.address,
            self.ownership,
            if self.released.get() { ", released" } else { "" }
        )
    }
}

impl MemoryHandle {
    /// Allocates a zeroed block sized to `layout` and returns the owning handle.
    pub fn allocate(
        layout: &Arc<ClassLayout>,
        allocator: Rc<dyn ProcessAllocator>,
    ) -> Result<ObjectRef, OverlayError> {
        if layout.is_open() {
            return Err(LayoutError::OpenLayout(layout.name().to_string()).into());
        }
        let address = allocator.allocate(layout.size(), layout.alignment())?;
        trace!(class = layout.name(), %address, size = layout.size(), "allocated object");
        Ok(Rc::new_cyclic(|this| MemoryHandle {
            address,
            layout: layout.clone(),
            ownership: Ownership::Owned,
            released: Cell::new(false),
            allocator: Some(allocator),
            this: this.clone(),
        }))
    }

    /// Wraps native memory without taking ownership of it.
    ///
    /// # Safety
    ///
    /// `address` must point to a live object laid out as `layout` for as long
    /// as the handle is used to read or write fields.
    pub unsafe fn alias(address: NativeAddress, layout: &Arc<ClassLayout>) -> ObjectRef {
        Rc::new_cyclic(|this| MemoryHandle {
            address,
            layout: layout.clone(),
            ownership: Ownership::Alias,
            released: Cell::new(false),
            allocator: None,
            this: this.clone(),
        })
    }

    pub fn address(&self) -> NativeAddress {
        self.address
    }

    pub fn layout(&self) -> &Arc<ClassLayout> {
        &self.layout
    }

    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    pub fn is_released(&self) -> bool {
        self.released.get()
    }

    fn live_field(&self, name: &str) -> Result<&FieldLayout, OverlayError> {
        if self.released.get() {
            return Err(LifetimeError::UseAfterRelease(self.address).into());
        }
        Ok(self.layout.require_field(name)?)
    }

    /// Address of a field inside this object.
    pub fn field_address(&self, name: &str) -> Result<NativeAddress, OverlayError> {
        Ok(self.address + self.live_field(name)?.offset)
    }

    pub fn get(&self, name: &str) -> Result<Value, OverlayError> {
        let field = self.live_field(name)?;
        // SAFETY: owned blocks are sized to the layout; alias callers vouched
        // for the address when the handle was created.
        let value = unsafe { field.ty.read(self.address, field.offset)? };
        // Embedded objects live inside this block, so they keep it alive.
        Ok(match (value, field.ty.resolved().map(|t| t.kind())) {
            (Value::Object(o), Some(TypeKind::ClassType(_))) => match self.this.upgrade() {
                Some(this) => Value::Object(ObjectValue::with_keepalive(o.address, o.class, this)),
                None => Value::Object(o),
            },
            (value, _) => value,
        })
    }

    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<(), OverlayError> {
        let field = self.live_field(name)?;
        let value = value.into();
        // SAFETY: see `get`.
        unsafe {
            match &self.allocator {
                Some(alloc) => field
                    .ty
                    .write_with(self.address, field.offset, &value, alloc.as_ref())?,
                None => field
                    .ty
                    .write_with(self.address, field.offset, &value, &SystemAllocator)?,
            }
        }
        Ok(())
    }

    /// Runs the destructor hook and frees the block of an owning handle.
    /// Aliasing handles are left untouched.
    pub fn release(&self) -> Result<(), OverlayError> {
        match (&self.allocator, self.ownership) {
            (Some(allocator), Ownership::Owned) => {
                if self.released.replace(true) {
                    return Err(LifetimeError::DoubleRelease(self.address).into());
                }
                if let Some(hook) = self.layout.destructor() {
                    hook(self.address);
                }
                trace!(class = self.layout.name(), address = %self.address, "releasing object");
                // SAFETY: the block came from this allocator and `released` guards reuse.
                unsafe { allocator.free(self.address)? };
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Managed value for this object. The value keeps the handle alive.
    pub fn to_value(&self) -> Value {
        match self.this.upgrade() {
            Some(this) => Value::Object(ObjectValue::with_keepalive(
                self.address,
                self.layout.tag().clone(),
                this,
            )),
            None => Value::Object(ObjectValue::new(self.address, self.layout.tag().clone())),
        }
    }

    /// Recovers the handle that produced `value` through [`MemoryHandle::to_value`].
    pub fn from_value(value: &Value) -> Option<ObjectRef> {
        value
            .as_object()?
            .keepalive()?
            .clone()
            .downcast::<MemoryHandle>()
            .ok()
    }
}

impl Drop for MemoryHandle {
    fn drop(&mut self) {
        if self.ownership == Ownership::Owned && !self.released.get() {
            if let Err(e) = self.release() {
                warn!(address = %self.address, "failed to release object on drop: {e}");
            }
        }
    }
}
