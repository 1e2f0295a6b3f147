use overlay_types::{AccessError, TypeRegistrationError};
use overlay_utils::{AllocError, NativeAddress};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LayoutError {
    #[error("class '{class}' declares size {declared} but its fields need {computed} bytes")]
    DeclaredSizeTooSmall {
        class: String,
        declared: usize,
        computed: usize,
    },
    #[error("class '{class}' declares alignment {alignment}, which is not a power of two")]
    InvalidAlignment { class: String, alignment: usize },
    #[error("field '{class}::{field}' has type '{ty}' with no known size")]
    UnsizedField {
        class: String,
        field: String,
        ty: String,
    },
    #[error("ghost field '{class}::{field}' refers to '{target}', which is not placed yet")]
    UnknownGhostTarget {
        class: String,
        field: String,
        target: String,
    },
    #[error("class '{0}' has no declared size and cannot be allocated")]
    OpenLayout(String),
    #[error("class '{class}' has no field '{field}'")]
    UnknownField { class: String, field: String },
    #[error(transparent)]
    Type(#[from] TypeRegistrationError),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LifetimeError {
    #[error("owning handle at {0} was released twice")]
    DoubleRelease(NativeAddress),
    #[error("handle at {0} was used after release")]
    UseAfterRelease(NativeAddress),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum OverlayError {
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error(transparent)]
    Lifetime(#[from] LifetimeError),
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error(transparent)]
    Alloc(#[from] AllocError),
}
