use overlay_types::{AccessError, TypeRegistrationError};
use overlay_utils::AllocError;
use overlay_value::{LayoutError, LifetimeError, OverlayError};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("symbol resolution failed: {0}")]
    Resolve(#[from] ResolveError),

    #[error("native call failed: {0}")]
    Call(#[from] CallError),

    #[error(transparent)]
    Overlay(#[from] OverlayError),

    #[error("type registration failed: {0}")]
    Type(#[from] TypeRegistrationError),

    #[error("unknown class '{0}'")]
    UnknownClass(String),

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("cannot wrap a null address as '{0}'")]
    NullObject(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid declaration: {0}")]
    Declaration(String),
}

impl From<LayoutError> for RuntimeError {
    fn from(e: LayoutError) -> Self {
        RuntimeError::Overlay(e.into())
    }
}

impl From<LifetimeError> for RuntimeError {
    fn from(e: LifetimeError) -> Self {
        RuntimeError::Overlay(e.into())
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DispatchError {
    #[error("no overload of '{function}' accepts ({arguments})")]
    OverloadNotFound { function: String, arguments: String },

    #[error("'{0}' has no registered overloads")]
    NoOverloads(String),

    #[error("'{function}' must be called on an instance of '{expected}'")]
    UnboundThis { function: String, expected: String },

    #[error("'{function}' takes {expected} arguments, got {actual}")]
    ArityMismatch {
        function: String,
        expected: usize,
        actual: usize,
    },

    #[error("overload of '{function}' cannot be registered: {source}")]
    Registration {
        function: String,
        #[source]
        source: TypeRegistrationError,
    },
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ResolveError {
    #[error("unable to find symbol '{0}'")]
    SymbolNotFound(String),

    #[error("failed to load library '{library}': {message}")]
    LoadError { library: String, message: String },

    #[error("symbol '{0}' resolved to a null address")]
    NullAddress(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CallError {
    #[error("argument {index} of kind {actual} is not a valid '{expected}'")]
    ArgumentMismatch {
        index: usize,
        expected: String,
        actual: &'static str,
    },

    #[error("'this' of kind {actual} is not a valid '{expected}'")]
    ThisMismatch {
        expected: String,
        actual: &'static str,
    },

    #[error("cannot call through null address for '{0}'")]
    NullTarget(String),

    #[error("by-value class '{0}' has no layout to materialize it into")]
    UnmaterializedClass(String),

    #[error("intercepted frame has no word for {0}")]
    MissingWord(String),

    #[error(transparent)]
    Marshal(#[from] AccessError),

    #[error(transparent)]
    Alloc(#[from] AllocError),
}
