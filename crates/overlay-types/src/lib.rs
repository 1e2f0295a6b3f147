//! # overlay-types
//!
//! Canonical descriptors for native types and the values that cross into them.
//!
//! ## Core Types
//!
//! - **[`TypeDescriptor`]**: one semantic native type, with its size, alignment,
//!   register class, pass mode and raw read/write accessors.
//! - **[`TypeRegistry`]**: interns named descriptors, allocates class identities
//!   and resolves forward declarations.
//! - **[`Value`]**: a managed-side value, including [`ObjectValue`] views of
//!   native objects tagged with a [`ClassTag`].
pub mod access;
pub mod descriptor;
pub mod error;
pub mod kinds;
pub mod registry;
pub mod value;

#[cfg(test)]
mod descriptor_tests;

pub use descriptor::{PassMode, RegisterClass, TypeDescriptor, TypeKey};
pub use error::{AccessError, TypeRegistrationError};
pub use kinds::{HasLayout, Scalar, TypeKind};
pub use registry::TypeRegistry;
pub use value::{ClassId, ClassTag, ObjectValue, Value};
