//! Raw memory access for [`TypeDescriptor`]s.
use crate::{
    error::AccessError,
    kinds::{ArrayType, CountedString, Scalar, TypeKind, VectorType},
    ObjectValue, TypeDescriptor, Value,
};
use overlay_utils::{ByteOffset, NativeAddress, ProcessAllocator, SystemAllocator};
use std::ptr;

unsafe fn read_raw<T: Copy>(at: NativeAddress) -> T {
    unsafe { ptr::read_unaligned(at.as_ptr::<T>()) }
}

unsafe fn write_raw<T: Copy>(at: NativeAddress, value: T) {
    unsafe { ptr::write_unaligned(at.as_ptr::<T>(), value) }
}

unsafe fn read_address(at: NativeAddress) -> NativeAddress {
    NativeAddress(unsafe { read_raw::<usize>(at) })
}

impl TypeDescriptor {
    /// Reads a value of this type from `base + offset`.
    ///
    /// # Safety
    ///
    /// `base + offset` must be valid for reads of `self.size()` bytes, and any
    /// pointers stored there that this type follows (string data, vector
    /// storage) must be valid as well.
    pub unsafe fn read(&self, base: NativeAddress, offset: ByteOffset) -> Result<Value, AccessError> {
        if base.is_null() {
            return Err(self.null_access());
        }
        let at = base + offset;
        unsafe {
            Ok(match self.kind() {
                TypeKind::Scalar(s) => read_scalar(*s, at),
                TypeKind::PointerType(p) => {
                    let target = read_address(at);
                    match p.pointee.class_tag() {
                        _ if target.is_null() => Value::Null,
                        Some(tag) => Value::Object(ObjectValue::new(target, tag.clone())),
                        None => Value::Pointer(target),
                    }
                }
                TypeKind::ArrayType(ArrayType {
                    element,
                    length,
                    stride,
                }) => Value::List(
                    (0..*length)
                        .map(|i| element.read(at, ByteOffset(i * stride)))
                        .collect::<Result<_, _>>()?,
                ),
                TypeKind::VectorType(VectorType { element, stride }) => {
                    let begin = read_address(at + ByteOffset(VectorType::BEGIN));
                    let end = read_address(at + ByteOffset(VectorType::END));
                    if begin.is_null() || *stride == 0 {
                        Value::List(vec![])
                    } else {
                        let count = (end - begin).as_usize() / stride;
                        Value::List(
                            (0..count)
                                .map(|i| element.read(begin, ByteOffset(i * stride)))
                                .collect::<Result<_, _>>()?,
                        )
                    }
                }
                TypeKind::CountedString(_) => {
                    let data = read_address(at + ByteOffset(CountedString::DATA));
                    let length = read_raw::<u64>(at + ByteOffset(CountedString::LENGTH)) as usize;
                    if data.is_null() || length == 0 {
                        Value::Str(String::new())
                    } else {
                        let bytes = std::slice::from_raw_parts(data.as_ptr::<u8>(), length);
                        let text = std::str::from_utf8(bytes)
                            .map_err(|_| AccessError::InvalidUtf8(data))?;
                        Value::Str(text.to_string())
                    }
                }
                TypeKind::ClassType(c) => Value::Object(ObjectValue::new(at, c.tag.clone())),
                TypeKind::ForwardType(f) => match f.resolved() {
                    Some(t) => t.read(at, ByteOffset::ZERO)?,
                    None => return Err(AccessError::UnresolvedForward(f.name.to_string())),
                },
            })
        }
    }

    /// Writes `value` to `base + offset`, allocating string and vector storage
    /// from the system allocator.
    ///
    /// # Safety
    ///
    /// `base + offset` must be valid for writes of `self.size()` bytes.
    pub unsafe fn write(
        &self,
        base: NativeAddress,
        offset: ByteOffset,
        value: &Value,
    ) -> Result<(), AccessError> {
        unsafe { self.write_with(base, offset, value, &SystemAllocator) }
    }

    /// Like [`TypeDescriptor::write`], with out-of-line storage (string bytes,
    /// vector elements) taken from `alloc`. That storage belongs to the native
    /// side afterwards.
    ///
    /// # Safety
    ///
    /// `base + offset` must be valid for writes of `self.size()` bytes.
    pub unsafe fn write_with(
        &self,
        base: NativeAddress,
        offset: ByteOffset,
        value: &Value,
        alloc: &dyn ProcessAllocator,
    ) -> Result<(), AccessError> {
        if base.is_null() {
            return Err(self.null_access());
        }
        if !self.is_type_of(value) {
            return Err(AccessError::ValueMismatch {
                expected: self.name().to_string(),
                actual: value.kind_name(),
            });
        }
        let at = base + offset;
        unsafe {
            match self.kind() {
                TypeKind::Scalar(s) => write_scalar(*s, at, value),
                TypeKind::PointerType(_) => {
                    write_raw::<usize>(at, value.as_address().unwrap_or_default().as_usize())
                }
                TypeKind::ArrayType(ArrayType {
                    element,
                    length,
                    stride,
                }) => {
                    let Value::List(items) = value else {
                        unreachable!("checked by is_type_of")
                    };
                    if items.len() != *length {
                        return Err(AccessError::LengthMismatch {
                            expected: *length,
                            actual: items.len(),
                        });
                    }
                    for (i, item) in items.iter().enumerate() {
                        element.write_with(at, ByteOffset(i * stride), item, alloc)?;
                    }
                }
                TypeKind::VectorType(VectorType { element, stride }) => {
                    let Value::List(items) = value else {
                        unreachable!("checked by is_type_of")
                    };
                    let bytes = items.len() * stride;
                    let begin = if bytes == 0 {
                        NativeAddress::NULL
                    } else {
                        alloc.allocate(bytes, element.alignment().max(1))?
                    };
                    for (i, item) in items.iter().enumerate() {
                        element.write_with(begin, ByteOffset(i * stride), item, alloc)?;
                    }
                    let end = begin + ByteOffset(bytes);
                    write_raw::<usize>(at + ByteOffset(VectorType::BEGIN), begin.as_usize());
                    write_raw::<usize>(at + ByteOffset(VectorType::END), end.as_usize());
                    write_raw::<usize>(at + ByteOffset(VectorType::CAPACITY), end.as_usize());
                }
                TypeKind::CountedString(_) => {
                    let Value::Str(text) = value else {
                        unreachable!("checked by is_type_of")
                    };
                    // NUL-terminated as a courtesy to C consumers; the length excludes it.
                    let data = alloc.allocate(text.len() + 1, 1)?;
                    ptr::copy_nonoverlapping(text.as_ptr(), data.as_ptr::<u8>(), text.len());
                    write_raw::<usize>(at + ByteOffset(CountedString::DATA), data.as_usize());
                    write_raw::<u64>(at + ByteOffset(CountedString::LENGTH), text.len() as u64);
                }
                TypeKind::ClassType(c) => {
                    let Value::Object(source) = value else {
                        unreachable!("checked by is_type_of")
                    };
                    if source.address != at {
                        ptr::copy(source.address.as_ptr::<u8>(), at.as_ptr::<u8>(), c.size);
                    }
                }
                TypeKind::ForwardType(f) => match f.resolved() {
                    Some(t) => t.write_with(at, ByteOffset::ZERO, value, alloc)?,
                    None => return Err(AccessError::UnresolvedForward(f.name.to_string())),
                },
            }
        }
        Ok(())
    }

    fn null_access(&self) -> AccessError {
        AccessError::NullAddress {
            ty: self.name().to_string(),
        }
    }
}

unsafe fn read_scalar(s: Scalar, at: NativeAddress) -> Value {
    unsafe {
        match s {
            Scalar::Void => Value::Void,
            Scalar::Bool => Value::Bool(read_raw::<u8>(at) != 0),
            Scalar::Int8 => Value::Int(read_raw::<i8>(at) as i64),
            Scalar::UInt8 => Value::UInt(read_raw::<u8>(at) as u64),
            Scalar::Int16 => Value::Int(read_raw::<i16>(at) as i64),
            Scalar::UInt16 => Value::UInt(read_raw::<u16>(at) as u64),
            Scalar::Int32 => Value::Int(read_raw::<i32>(at) as i64),
            Scalar::UInt32 => Value::UInt(read_raw::<u32>(at) as u64),
            Scalar::Int64 => Value::Int(read_raw::<i64>(at)),
            Scalar::UInt64 => Value::UInt(read_raw::<u64>(at)),
            Scalar::Float32 => Value::Float(read_raw::<f32>(at) as f64),
            Scalar::Float64 => Value::Float(read_raw::<f64>(at)),
            Scalar::Pointer => read_address(at).into(),
        }
    }
}

/// Callers have already checked `value` with `is_type_of`.
unsafe fn write_scalar(s: Scalar, at: NativeAddress, value: &Value) {
    let int = value.as_integer().unwrap_or_default();
    let float = value.as_number().unwrap_or_default();
    unsafe {
        match s {
            Scalar::Void => {}
            Scalar::Bool => write_raw::<u8>(at, matches!(value, Value::Bool(true)) as u8),
            Scalar::Int8 | Scalar::UInt8 => write_raw::<u8>(at, int as u8),
            Scalar::Int16 | Scalar::UInt16 => write_raw::<u16>(at, int as u16),
            Scalar::Int32 | Scalar::UInt32 => write_raw::<u32>(at, int as u32),
            Scalar::Int64 | Scalar::UInt64 => write_raw::<u64>(at, int as u64),
            Scalar::Float32 => write_raw::<f32>(at, float as f32),
            Scalar::Float64 => write_raw::<f64>(at, float),
            Scalar::Pointer => write_raw::<usize>(
                at,
                value.as_address().unwrap_or_default().as_usize(),
            ),
        }
    }
}
