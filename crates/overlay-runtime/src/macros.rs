/// Traces an interop event (symbol resolution, native calls, marshalling)
/// under the `overlay::interop` target.
#[macro_export]
macro_rules! interop_trace {
    ($op:expr, $($arg:tt)*) => {
        ::tracing::trace!(target: "overlay::interop", op = $op, $($arg)*)
    };
}

#[macro_export]
macro_rules! interop_debug {
    ($op:expr, $($arg:tt)*) => {
        ::tracing::debug!(target: "overlay::interop", op = $op, $($arg)*)
    };
}
