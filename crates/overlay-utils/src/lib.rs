//! # overlay-utils
//!
//! Shared utilities for the overlay-rs workspace: address and offset newtypes,
//! the process allocator seam, an injectable clock, and alignment helpers.
pub mod alloc;
pub mod newtypes;
pub mod time;

pub use alloc::{AllocError, ProcessAllocator, SystemAllocator};
pub use newtypes::{ByteOffset, NativeAddress};
pub use time::{Clock, ManualClock, SystemClock};

/// Pointer width of the target ABI, in bytes.
pub const POINTER_SIZE: usize = 8;

pub const fn align_up(value: usize, align: usize) -> usize {
    let misalignment = value % align;
    if misalignment == 0 {
        value
    } else {
        value + align - misalignment
    }
}

pub const fn is_valid_alignment(align: usize) -> bool {
    align != 0 && align.is_power_of_two()
}

/// Checks whether an offset honours an alignment. Only active with the
/// `memory-validation` feature; explicit native offsets are otherwise trusted.
#[cfg(feature = "memory-validation")]
pub fn validate_alignment(offset: usize, align: usize) -> bool {
    align == 0 || offset.is_multiple_of(align)
}

#[cfg(not(feature = "memory-validation"))]
#[inline(always)]
pub fn validate_alignment(_offset: usize, _align: usize) -> bool {
    true
}
