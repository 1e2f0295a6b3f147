//! The process allocator seam used by owning memory handles.
use crate::{align_up, is_valid_alignment, NativeAddress};
use std::alloc::{alloc_zeroed, dealloc, Layout};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AllocError {
    #[error("allocation of {size} bytes (align {align}) failed")]
    OutOfMemory { size: usize, align: usize },
    #[error("invalid allocation request: size {size}, align {align}")]
    InvalidRequest { size: usize, align: usize },
    #[error("attempted to free null address")]
    NullFree,
}

/// Allocates and frees blocks in the native process.
pub trait ProcessAllocator {
    /// Returns a zero-filled block of at least `size` bytes aligned to `align`.
    fn allocate(&self, size: usize, align: usize) -> Result<NativeAddress, AllocError>;

    /// Releases a block previously returned by [`ProcessAllocator::allocate`].
    ///
    /// # Safety
    ///
    /// `address` must have come from this allocator and must not have been freed.
    unsafe fn free(&self, address: NativeAddress) -> Result<(), AllocError>;
}

/// Allocator backed by the Rust global allocator. A 16-byte header in front of
/// each block records the requested size and alignment so `free` only needs
/// the address, like `malloc`/`free`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAllocator;

const HEADER: usize = 16;

impl SystemAllocator {
    fn layout_for(size: usize, align: usize) -> Result<(Layout, usize), AllocError> {
        if !is_valid_alignment(align) {
            return Err(AllocError::InvalidRequest { size, align });
        }
        let align = align.max(HEADER);
        let prefix = align_up(HEADER, align);
        let layout = Layout::from_size_align(prefix + size.max(1), align)
            .map_err(|_| AllocError::InvalidRequest { size, align })?;
        Ok((layout, prefix))
    }
}

impl ProcessAllocator for SystemAllocator {
    fn allocate(&self, size: usize, align: usize) -> Result<NativeAddress, AllocError> {
        let (layout, prefix) = Self::layout_for(size, align)?;
        // SAFETY: layout has non-zero size.
        let base = unsafe { alloc_zeroed(layout) };
        if base.is_null() {
            return Err(AllocError::OutOfMemory { size, align });
        }
        // SAFETY: the header words lie inside the block, immediately before the payload.
        unsafe {
            let payload = base.add(prefix);
            let header = payload.sub(HEADER) as *mut usize;
            header.write_unaligned(size);
            header.add(1).write_unaligned(layout.align());
            Ok(NativeAddress::from_ptr(payload))
        }
    }

    unsafe fn free(&self, address: NativeAddress) -> Result<(), AllocError> {
        if address.is_null() {
            return Err(AllocError::NullFree);
        }
        unsafe {
            let payload = address.as_ptr::<u8>();
            let header = payload.sub(HEADER) as *const usize;
            let size = header.read_unaligned();
            let align = header.add(1).read_unaligned();
            let (layout, prefix) = Self::layout_for(size, align)?;
            dealloc(payload.sub(prefix), layout);
        }
        Ok(())
    }
}
