//! # overlay-value
//!
//! Class layouts and the memory overlay layer.
//!
//! - **[`LayoutCompiler`]** turns a [`ClassDeclaration`] into an immutable
//!   [`ClassLayout`].
//! - **[`MemoryHandle`]** binds a layout to a native address, either owning a
//!   fresh block or aliasing foreign memory.
//! - **[`AddressCache`]** keeps one handle per wrapped address and evicts it
//!   after it has sat unreferenced for a while.
pub mod cache;
pub mod error;
pub mod layout;
pub mod object;


pub use cache::{AddressCache, CacheLookup};
pub use error::{LayoutError, LifetimeError, OverlayError};
pub use layout::{
    ClassDeclaration, ClassLayout, DestructorHook, FieldDeclaration, FieldLayout, FieldPlacement,
    LayoutCompiler,
};
pub use object::{MemoryHandle, ObjectRef, Ownership};
