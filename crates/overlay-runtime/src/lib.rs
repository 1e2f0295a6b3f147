//! # overlay-runtime
//!
//! Calls into a native process and overlays its objects.
//!
//! ## Subsystems
//!
//! - **Calling convention** (`abi`): table-driven register and stack
//!   assignment, producing a [`CallPlan`] per overload.
//! - **Marshalling** (`marshal`): values to argument words and back, plus
//!   decoding of intercepted call frames.
//! - **Trampolines** (`trampoline`): the seam to machine-level calls, backed
//!   by `libffi` by default.
//! - **Dispatch** (`dispatch/`): deferred functions and overload selection.
//! - **Symbols** (`resolver`): cached `name -> address` resolution.
//! - **Runtime state** (`state`): the [`NativeRuntime`] context tying the
//!   registries, the wrapped-address cache and the call machinery together.
pub mod abi;
pub mod classes;
pub mod config;
pub mod decl;
pub mod dispatch;
pub mod error;
#[macro_use]
mod macros;
pub mod marshal;
pub mod metrics;
pub mod resolver;
pub mod state;
pub mod trampoline;

#[cfg(test)]
mod state_tests;

pub use abi::{AbiTable, ArgLocation, CallPlan, RegisterFile, ReturnLocation, MSVC_X64};
pub use classes::{ClassFactory, ClassRegistry};
pub use config::RuntimeConfig;
pub use decl::{Declarations, Loaded};
pub use dispatch::{CallSite, DeferredFunction, EntryPoint, Invocation, OverloadEntry, Signature};
pub use error::{CallError, DispatchError, ResolveError, RuntimeError};
pub use marshal::DecodedCall;
pub use metrics::{CacheStats, RuntimeMetrics};
pub use resolver::{CachedResolver, LibraryResolver, SymbolResolver, SymbolTable};
pub use state::{NativeRuntime, RuntimeBuilder};
pub use trampoline::{LibffiTrampoline, NativeCall, RawArg, RawReturn, TrampolineProvider};
