use overlay_utils::{AllocError, NativeAddress};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TypeRegistrationError {
    #[error("element type '{element}' has no known size yet")]
    UnsizedElement { element: String },
    #[error("type '{0}' has no unambiguous register class")]
    AmbiguousRegisterClass(String),
    #[error("type '{0}' is already defined")]
    DuplicateType(String),
    #[error("unknown type '{0}'")]
    UnknownType(String),
    #[error("malformed type expression '{0}'")]
    MalformedExpression(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AccessError {
    #[error("access to '{ty}' through a null address")]
    NullAddress { ty: String },
    #[error("value of kind {actual} is not a valid '{expected}'")]
    ValueMismatch {
        expected: String,
        actual: &'static str,
    },
    #[error("expected {expected} elements, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("string at {0} is not valid UTF-8")]
    InvalidUtf8(NativeAddress),
    #[error("forward-declared type '{0}' was never defined")]
    UnresolvedForward(String),
    #[error(transparent)]
    Alloc(#[from] AllocError),
}
