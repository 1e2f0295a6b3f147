//! Conversion between [`Value`]s and the raw words a [`CallPlan`] places in
//! registers and stack slots.
use crate::{
    abi::{AbiTable, ArgSource, CallPlan, RegisterFile},
    error::CallError,
    trampoline::{RawArg, RawReturn},
};
use overlay_types::{ObjectValue, PassMode, Scalar, TypeDescriptor, TypeKind, Value};
use overlay_utils::{AllocError, ByteOffset, NativeAddress, ProcessAllocator, SystemAllocator, POINTER_SIZE};
use std::{cell::RefCell, ptr};
use tracing::warn;

/// Blocks that live for one call: copies of indirect arguments, their
/// out-of-line storage, and sret buffers for non-class returns. Everything
/// still held is freed when the arena drops.
#[derive(Default)]
pub struct Scratch {
    blocks: RefCell<Vec<NativeAddress>>,
}

impl Scratch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blocks.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.borrow().is_empty()
    }
}

impl ProcessAllocator for Scratch {
    fn allocate(&self, size: usize, align: usize) -> Result<NativeAddress, AllocError> {
        let address = SystemAllocator.allocate(size, align)?;
        self.blocks.borrow_mut().push(address);
        Ok(address)
    }

    unsafe fn free(&self, address: NativeAddress) -> Result<(), AllocError> {
        let mut blocks = self.blocks.borrow_mut();
        match blocks.iter().position(|b| *b == address) {
            Some(i) => {
                blocks.swap_remove(i);
                unsafe { SystemAllocator.free(address) }
            }
            None => Ok(()),
        }
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        for block in self.blocks.get_mut().drain(..) {
            // SAFETY: recorded blocks came from SystemAllocator and are removed when freed.
            if let Err(e) = unsafe { SystemAllocator.free(block) } {
                warn!("failed to free scratch block {}: {}", block, e);
            }
        }
    }
}

/// Lowers the values of one call to argument words, in plan order.
///
/// # Safety
///
/// Objects passed by value must point at live objects of their class.
pub unsafe fn lower_arguments(
    plan: &CallPlan,
    this: Option<&Value>,
    args: &[Value],
    sret: Option<NativeAddress>,
    scratch: &Scratch,
) -> Result<Vec<RawArg>, CallError> {
    let mut words = Vec::with_capacity(plan.args.len());
    for arg in &plan.args {
        let word = match arg.source {
            ArgSource::This => {
                let value = this.unwrap_or(&Value::Null);
                if !arg.ty.is_type_of(value) {
                    return Err(CallError::ThisMismatch {
                        expected: arg.ty.name().to_string(),
                        actual: value.kind_name(),
                    });
                }
                address_word(value)
            }
            ArgSource::StructReturn => RawArg::Int(sret.unwrap_or_default().as_usize() as u64),
            ArgSource::Param(index) => {
                let value = args.get(index).unwrap_or(&Value::Void);
                if !arg.ty.is_type_of(value) {
                    return Err(CallError::ArgumentMismatch {
                        index,
                        expected: arg.ty.name().to_string(),
                        actual: value.kind_name(),
                    });
                }
                match arg.mode {
                    PassMode::Direct => unsafe { lower_direct(&arg.ty, value) },
                    PassMode::Indirect => {
                        let size = arg.ty.size().unwrap_or(POINTER_SIZE);
                        let block = scratch.allocate(size, arg.ty.alignment())?;
                        unsafe { arg.ty.write_with(block, ByteOffset::ZERO, value, scratch)? };
                        RawArg::Int(block.as_usize() as u64)
                    }
                }
            }
        };
        words.push(word);
    }
    Ok(words)
}

fn address_word(value: &Value) -> RawArg {
    RawArg::Int(value.as_address().unwrap_or_default().as_usize() as u64)
}

unsafe fn lower_direct(ty: &TypeDescriptor, value: &Value) -> RawArg {
    let Some(ty) = ty.resolved() else {
        return address_word(value);
    };
    match ty.kind() {
        TypeKind::Scalar(Scalar::Float32) => RawArg::F32(value.as_number().unwrap_or_default() as f32),
        TypeKind::Scalar(Scalar::Float64) => RawArg::F64(value.as_number().unwrap_or_default()),
        TypeKind::Scalar(Scalar::Bool) => RawArg::Int(matches!(value, Value::Bool(true)) as u64),
        TypeKind::Scalar(Scalar::Pointer) | TypeKind::PointerType(_) => address_word(value),
        TypeKind::Scalar(_) => RawArg::Int(value.as_integer().unwrap_or_default() as u64),
        // Register-sized aggregates travel as their bytes.
        TypeKind::ClassType(c) => {
            let mut bytes = [0u8; 8];
            if let Some(object) = value.as_object() {
                unsafe {
                    ptr::copy_nonoverlapping(
                        object.address.as_ptr::<u8>(),
                        bytes.as_mut_ptr(),
                        c.size.min(bytes.len()),
                    )
                };
            }
            RawArg::Int(u64::from_le_bytes(bytes))
        }
        _ => address_word(value),
    }
}

/// Interprets a register word as a value of `ty`. By-value classes need a
/// layout to be copied into and are left to the caller.
pub fn lift_word(ty: &TypeDescriptor, word: u64) -> Result<Value, CallError> {
    let resolved = ty.resolved().unwrap_or(ty);
    match resolved.kind() {
        TypeKind::Scalar(Scalar::Void) => Ok(Value::Void),
        TypeKind::Scalar(Scalar::Float32) => Ok(Value::Float(f32::from_bits(word as u32) as f64)),
        TypeKind::Scalar(Scalar::Float64) => Ok(Value::Float(f64::from_bits(word))),
        TypeKind::ClassType(c) => Err(CallError::UnmaterializedClass(c.tag.name.to_string())),
        _ => {
            let bytes = word.to_le_bytes();
            // SAFETY: register-passed scalars and pointers fit in the eight bytes read.
            Ok(unsafe { resolved.read(NativeAddress::from_ptr(bytes.as_ptr()), ByteOffset::ZERO)? })
        }
    }
}

pub fn lift_return(ty: &TypeDescriptor, raw: RawReturn) -> Result<Value, CallError> {
    match raw {
        RawReturn::Void => Ok(Value::Void),
        RawReturn::F32(f) => Ok(Value::Float(f as f64)),
        RawReturn::F64(f) => Ok(Value::Float(f)),
        RawReturn::Int(word) => lift_word(ty, word),
    }
}

/// Values recovered from an intercepted call frame.
#[derive(Debug, Default)]
pub struct DecodedCall {
    pub this: Option<Value>,
    pub sret: Option<NativeAddress>,
    pub args: Vec<Value>,
}

fn object_or_pointer(ty: &TypeDescriptor, word: u64) -> Value {
    let address = NativeAddress(word as usize);
    match ty.class_tag().or(ty.pointee_class()) {
        _ if address.is_null() => Value::Null,
        Some(tag) => Value::Object(ObjectValue::new(address, tag.clone())),
        None => Value::Pointer(address),
    }
}

/// Reconstructs the values of an intercepted call from the words captured at
/// its entry. Classes passed by pointer come back as views of the caller's
/// copy; register-sized classes are handed to `materialize` as raw bytes.
///
/// # Safety
///
/// `frame` must be the entry state of a call matching `plan`, captured while
/// the caller's frame is still live.
pub unsafe fn decode_frame<E: From<CallError>>(
    plan: &CallPlan,
    abi: &AbiTable,
    frame: &RegisterFile,
    mut materialize: impl FnMut(&TypeDescriptor, [u8; 8]) -> Result<Value, E>,
) -> Result<DecodedCall, E> {
    let mut decoded = DecodedCall {
        args: Vec::with_capacity(plan.arity()),
        ..DecodedCall::default()
    };
    for arg in &plan.args {
        let word = frame
            .word(abi, arg.location)
            .ok_or_else(|| CallError::MissingWord(format!("{} at {}", arg.source, arg.location)))?;
        match arg.source {
            ArgSource::This => decoded.this = Some(object_or_pointer(&arg.ty, word)),
            ArgSource::StructReturn => decoded.sret = Some(NativeAddress(word as usize)),
            ArgSource::Param(_) => {
                let is_class = arg.ty.class_tag().is_some();
                let value = match arg.mode {
                    PassMode::Indirect if is_class => object_or_pointer(&arg.ty, word),
                    PassMode::Indirect => unsafe {
                        arg.ty
                            .read(NativeAddress(word as usize), ByteOffset::ZERO)
                            .map_err(CallError::from)?
                    },
                    PassMode::Direct if is_class => materialize(&arg.ty, word.to_le_bytes())?,
                    PassMode::Direct => lift_word(&arg.ty, word)?,
                };
                decoded.args.push(value);
            }
        }
    }
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::MSVC_X64;
    use overlay_types::{ClassId, ClassTag};

    fn plan(this: Option<&TypeDescriptor>, params: &[TypeDescriptor], returns: &TypeDescriptor) -> CallPlan {
        CallPlan::build(&MSVC_X64, this, params, returns, false).unwrap()
    }

    #[test]
    fn test_lower_mixed_arguments() {
        let plan = plan(
            None,
            &[TypeDescriptor::i32(), TypeDescriptor::f64(), TypeDescriptor::string()],
            &TypeDescriptor::void(),
        );
        let scratch = Scratch::new();
        let words = unsafe {
            lower_arguments(
                &plan,
                None,
                &[Value::Int(-2), Value::Int(3), Value::from("hi")],
                None,
                &scratch,
            )
        }
        .unwrap();

        assert_eq!(words[0], RawArg::Int(-2i64 as u64));
        assert_eq!(words[1], RawArg::F64(3.0));
        let RawArg::Int(block) = words[2] else {
            panic!("string should travel by pointer");
        };
        let text = unsafe { TypeDescriptor::string().read(NativeAddress(block as usize), ByteOffset::ZERO) };
        assert_eq!(text, Ok(Value::from("hi")));
        // The copy and its character data.
        assert_eq!(scratch.len(), 2);
    }

    #[test]
    fn test_lower_rejects_mismatched_values() {
        let plan = plan(Some(&TypeDescriptor::raw_pointer()), &[TypeDescriptor::u8()], &TypeDescriptor::void());
        let scratch = Scratch::new();
        let this = Value::Pointer(NativeAddress(0x1000));

        let err = unsafe { lower_arguments(&plan, Some(&this), &[Value::Int(300)], None, &scratch) };
        assert_eq!(
            err,
            Err(CallError::ArgumentMismatch {
                index: 0,
                expected: "uint8".into(),
                actual: "integer"
            })
        );

        let err = unsafe { lower_arguments(&plan, Some(&Value::from("x")), &[Value::Int(1)], None, &scratch) };
        assert!(matches!(err, Err(CallError::ThisMismatch { .. })));
    }

    #[test]
    fn test_sret_word_follows_this() {
        let returns = TypeDescriptor::array_of(&TypeDescriptor::i64(), 4).unwrap();
        let plan = plan(Some(&TypeDescriptor::raw_pointer()), &[TypeDescriptor::i32()], &returns);
        let scratch = Scratch::new();
        let words = unsafe {
            lower_arguments(
                &plan,
                Some(&Value::Pointer(NativeAddress(0x10))),
                &[Value::Int(7)],
                Some(NativeAddress(0x20)),
                &scratch,
            )
        }
        .unwrap();
        assert_eq!(words, vec![RawArg::Int(0x10), RawArg::Int(0x20), RawArg::Int(7)]);
    }

    #[test]
    fn test_lift_words() {
        assert_eq!(lift_word(&TypeDescriptor::i8(), -3i64 as u64), Ok(Value::Int(-3)));
        assert_eq!(lift_word(&TypeDescriptor::boolean(), 1), Ok(Value::Bool(true)));
        assert_eq!(
            lift_word(&TypeDescriptor::f32(), 1.5f32.to_bits() as u64),
            Ok(Value::Float(1.5))
        );
        assert_eq!(lift_word(&TypeDescriptor::raw_pointer(), 0), Ok(Value::Null));
        assert_eq!(lift_return(&TypeDescriptor::f64(), RawReturn::F64(2.25)), Ok(Value::Float(2.25)));

        let small = TypeDescriptor::class(ClassTag::new(ClassId(1), "Small", None), 8, 8);
        assert_eq!(
            lift_word(&small, 0),
            Err(CallError::UnmaterializedClass("Small".into()))
        );
    }

    #[test]
    fn test_decode_intercepted_frame() {
        let params = [TypeDescriptor::i32(), TypeDescriptor::f32(), TypeDescriptor::string(), TypeDescriptor::u16()];
        let plan = plan(Some(&TypeDescriptor::raw_pointer()), &params, &TypeDescriptor::void());

        let scratch = Scratch::new();
        let text = scratch.allocate(16, 8).unwrap();
        unsafe {
            TypeDescriptor::string()
                .write_with(text, ByteOffset::ZERO, &Value::from("frame"), &scratch)
                .unwrap()
        };

        // this in rcx, arg0 in rdx, arg1 in xmm2, arg2 in r9, arg3 on the stack.
        let frame = RegisterFile {
            int: [0xabc0, -5i64 as u64, 0, text.as_usize() as u64],
            float: [0, 0, 0.5f32.to_bits() as u64, 0],
            stack: vec![0, 0, 0, 0, 9],
        };
        let decoded = unsafe { decode_frame(&plan, &MSVC_X64, &frame, |_, _| -> Result<Value, CallError> {
            unreachable!("no by-value classes in this frame")
        }) }.unwrap();
        assert_eq!(decoded.this, Some(Value::Pointer(NativeAddress(0xabc0))));
        assert_eq!(decoded.sret, None);
        assert_eq!(
            decoded.args,
            vec![Value::Int(-5), Value::Float(0.5), Value::from("frame"), Value::UInt(9)]
        );
    }

    #[test]
    fn test_decode_reports_missing_stack_words() {
        let params = vec![TypeDescriptor::i64(); 5];
        let plan = plan(None, &params, &TypeDescriptor::void());
        let frame = RegisterFile::default();
        let err = unsafe { decode_frame(&plan, &MSVC_X64, &frame, |_, _| -> Result<Value, CallError> { Ok(Value::Void) }) };
        assert!(matches!(err, Err(CallError::MissingWord(_))));
    }

    #[test]
    fn test_scratch_frees_on_drop() {
        let scratch = Scratch::new();
        let a = scratch.allocate(8, 8).unwrap();
        scratch.allocate(8, 8).unwrap();
        unsafe { scratch.free(a).unwrap() };
        assert_eq!(scratch.len(), 1);
        // Unknown blocks are ignored rather than handed to the system allocator.
        unsafe { scratch.free(a).unwrap() };
        assert_eq!(scratch.len(), 1);
    }
}
