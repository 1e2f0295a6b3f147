use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug, Display, Formatter};
use std::ops::{Add, AddAssign, Sub};

/// A byte offset relative to some base address.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ByteOffset(pub usize);

impl Display for ByteOffset {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<usize> for ByteOffset {
    fn from(offset: usize) -> Self {
        ByteOffset(offset)
    }
}

impl From<ByteOffset> for usize {
    fn from(offset: ByteOffset) -> Self {
        offset.0
    }
}

impl ByteOffset {
    pub const ZERO: Self = ByteOffset(0);

    pub const fn new(offset: usize) -> Self {
        ByteOffset(offset)
    }

    pub fn checked_add(self, other: impl Into<usize>) -> Option<Self> {
        self.0.checked_add(other.into()).map(ByteOffset)
    }

    pub const fn as_usize(self) -> usize {
        self.0
    }
}

impl Add<usize> for ByteOffset {
    type Output = Self;
    fn add(self, rhs: usize) -> Self {
        ByteOffset(self.0 + rhs)
    }
}

impl Add<ByteOffset> for ByteOffset {
    type Output = Self;
    fn add(self, rhs: ByteOffset) -> Self {
        ByteOffset(self.0 + rhs.0)
    }
}

impl AddAssign<usize> for ByteOffset {
    fn add_assign(&mut self, rhs: usize) {
        self.0 += rhs;
    }
}

/// An address in the native process. Stable for the lifetime of whatever
/// native object lives there; the engine never interprets it beyond that.
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NativeAddress(pub usize);

impl Debug for NativeAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "NativeAddress({:#x})", self.0)
    }
}

impl Display for NativeAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<usize> for NativeAddress {
    fn from(addr: usize) -> Self {
        NativeAddress(addr)
    }
}

impl NativeAddress {
    pub const NULL: Self = NativeAddress(0);

    pub const fn new(addr: usize) -> Self {
        NativeAddress(addr)
    }

    pub fn from_ptr<T>(ptr: *const T) -> Self {
        NativeAddress(ptr as usize)
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    pub const fn as_usize(self) -> usize {
        self.0
    }

    pub fn as_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }

    /// `self + offset`, wrapping like raw pointer arithmetic in the native process.
    pub const fn offset(self, offset: ByteOffset) -> Self {
        NativeAddress(self.0.wrapping_add(offset.0))
    }

    /// Parses `0x`-prefixed hexadecimal or plain decimal text.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let value = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
            Some(hex) => usize::from_str_radix(hex, 16).ok()?,
            None => text.parse().ok()?,
        };
        Some(NativeAddress(value))
    }
}

impl Add<ByteOffset> for NativeAddress {
    type Output = Self;
    fn add(self, rhs: ByteOffset) -> Self {
        self.offset(rhs)
    }
}

impl Sub<NativeAddress> for NativeAddress {
    type Output = ByteOffset;
    fn sub(self, rhs: NativeAddress) -> ByteOffset {
        ByteOffset(self.0.wrapping_sub(rhs.0))
    }
}
