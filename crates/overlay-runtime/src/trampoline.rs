//! The seam between call plans and machine-level calls.
//!
//! A [`TrampolineProvider`] turns a [`CallPlan`] and a target address into a
//! [`NativeCall`] that accepts raw argument words. [`LibffiTrampoline`] is the
//! provider used by default; it builds the call with the host's default ABI,
//! which is the Microsoft x64 convention on Windows x64 hosts.
use crate::{
    abi::{ArgAssignment, ArgSource, CallPlan, ReturnLocation},
    error::CallError,
};
use libffi::middle::{Arg, Cif, CodePtr, Type};
use overlay_types::{PassMode, Scalar, TypeDescriptor, TypeKind};
use overlay_utils::NativeAddress;
use std::rc::Rc;

/// One argument word, as placed in a register or stack slot.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum RawArg {
    Int(u64),
    F32(f32),
    F64(f64),
}

impl RawArg {
    pub fn bits(self) -> u64 {
        match self {
            RawArg::Int(v) => v,
            RawArg::F32(f) => f.to_bits() as u64,
            RawArg::F64(f) => f.to_bits(),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum RawReturn {
    Void,
    /// Integer register contents, sign- or zero-extended from the declared width.
    Int(u64),
    F32(f32),
    F64(f64),
}

/// A callable bound to one target address.
pub trait NativeCall {
    fn target(&self) -> NativeAddress;

    /// # Safety
    ///
    /// The target must be a function whose signature matches the plan this
    /// call was built from, and pointer arguments must be valid for it.
    unsafe fn invoke(&self, args: &[RawArg]) -> RawReturn;
}

pub trait TrampolineProvider {
    fn build(&self, plan: &CallPlan, target: NativeAddress) -> Result<Rc<dyn NativeCall>, CallError>;
}

/// Machine type of one argument or return slot.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SlotKind {
    Void,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    Pointer,
}

impl SlotKind {
    fn of_direct(ty: &TypeDescriptor) -> SlotKind {
        let Some(ty) = ty.resolved() else {
            return SlotKind::Pointer;
        };
        match ty.kind() {
            TypeKind::Scalar(s) => match s {
                Scalar::Void => SlotKind::Void,
                Scalar::Bool | Scalar::UInt8 => SlotKind::U8,
                Scalar::Int8 => SlotKind::I8,
                Scalar::Int16 => SlotKind::I16,
                Scalar::UInt16 => SlotKind::U16,
                Scalar::Int32 => SlotKind::I32,
                Scalar::UInt32 => SlotKind::U32,
                Scalar::Int64 => SlotKind::I64,
                Scalar::UInt64 => SlotKind::U64,
                Scalar::Float32 => SlotKind::F32,
                Scalar::Float64 => SlotKind::F64,
                Scalar::Pointer => SlotKind::Pointer,
            },
            // Register-sized aggregates travel as plain integers.
            TypeKind::ClassType(c) => match c.size {
                1 => SlotKind::U8,
                2 => SlotKind::U16,
                4 => SlotKind::U32,
                _ => SlotKind::U64,
            },
            _ => SlotKind::Pointer,
        }
    }

    pub fn of_arg(arg: &ArgAssignment) -> SlotKind {
        match (arg.source, arg.mode) {
            (ArgSource::This | ArgSource::StructReturn, _) | (_, PassMode::Indirect) => {
                SlotKind::Pointer
            }
            (ArgSource::Param(_), PassMode::Direct) => Self::of_direct(&arg.ty),
        }
    }

    pub fn of_return(plan: &CallPlan) -> SlotKind {
        match plan.ret {
            ReturnLocation::Void => SlotKind::Void,
            ReturnLocation::StructReturn { .. } => SlotKind::Pointer,
            ReturnLocation::Integer(_) | ReturnLocation::Float(_) => Self::of_direct(&plan.returns),
        }
    }

    fn ffi_type(self) -> Type {
        match self {
            SlotKind::Void => Type::void(),
            SlotKind::I8 => Type::i8(),
            SlotKind::U8 => Type::u8(),
            SlotKind::I16 => Type::i16(),
            SlotKind::U16 => Type::u16(),
            SlotKind::I32 => Type::i32(),
            SlotKind::U32 => Type::u32(),
            SlotKind::I64 => Type::i64(),
            SlotKind::U64 => Type::u64(),
            SlotKind::F32 => Type::f32(),
            SlotKind::F64 => Type::f64(),
            SlotKind::Pointer => Type::pointer(),
        }
    }
}

/// Typed storage for one argument for the duration of a call.
enum Slot {
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
}

impl Slot {
    fn new(kind: SlotKind, raw: RawArg) -> Slot {
        let bits = raw.bits();
        let float = match raw {
            RawArg::Int(v) => v as f64,
            RawArg::F32(f) => f as f64,
            RawArg::F64(f) => f,
        };
        match kind {
            SlotKind::I8 => Slot::I8(bits as i8),
            SlotKind::U8 => Slot::U8(bits as u8),
            SlotKind::I16 => Slot::I16(bits as i16),
            SlotKind::U16 => Slot::U16(bits as u16),
            SlotKind::I32 => Slot::I32(bits as i32),
            SlotKind::U32 => Slot::U32(bits as u32),
            SlotKind::I64 => Slot::I64(bits as i64),
            SlotKind::U64 | SlotKind::Pointer | SlotKind::Void => Slot::U64(bits),
            SlotKind::F32 => Slot::F32(float as f32),
            SlotKind::F64 => Slot::F64(float),
        }
    }

    fn as_arg(&self) -> Arg {
        match self {
            Slot::I8(v) => Arg::new(v),
            Slot::U8(v) => Arg::new(v),
            Slot::I16(v) => Arg::new(v),
            Slot::U16(v) => Arg::new(v),
            Slot::I32(v) => Arg::new(v),
            Slot::U32(v) => Arg::new(v),
            Slot::I64(v) => Arg::new(v),
            Slot::U64(v) => Arg::new(v),
            Slot::F32(v) => Arg::new(v),
            Slot::F64(v) => Arg::new(v),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LibffiTrampoline;

impl TrampolineProvider for LibffiTrampoline {
    fn build(&self, plan: &CallPlan, target: NativeAddress) -> Result<Rc<dyn NativeCall>, CallError> {
        if target.is_null() {
            return Err(CallError::NullTarget(plan.to_string()));
        }
        let params: Vec<SlotKind> = plan.args.iter().map(SlotKind::of_arg).collect();
        let ret = SlotKind::of_return(plan);
        let cif = Cif::new(params.iter().map(|k| k.ffi_type()), ret.ffi_type());
        interop_trace!("BIND", "{} args, returns {:?} at {}", params.len(), ret, target);
        Ok(Rc::new(LibffiCall {
            cif,
            code: CodePtr(target.as_ptr()),
            target,
            params,
            ret,
        }))
    }
}

struct LibffiCall {
    cif: Cif,
    code: CodePtr,
    target: NativeAddress,
    params: Vec<SlotKind>,
    ret: SlotKind,
}

impl NativeCall for LibffiCall {
    fn target(&self) -> NativeAddress {
        self.target
    }

    unsafe fn invoke(&self, args: &[RawArg]) -> RawReturn {
        let storage: Vec<Slot> = self
            .params
            .iter()
            .zip(args)
            .map(|(kind, raw)| Slot::new(*kind, *raw))
            .collect();
        let ffi_args: Vec<Arg> = storage.iter().map(Slot::as_arg).collect();

        macro_rules! call {
            ($t:ty) => {
                unsafe { self.cif.call::<$t>(self.code, &ffi_args) }
            };
        }

        match self.ret {
            SlotKind::Void => {
                call!(());
                RawReturn::Void
            }
            SlotKind::I8 => RawReturn::Int(call!(i8) as i64 as u64),
            SlotKind::U8 => RawReturn::Int(call!(u8) as u64),
            SlotKind::I16 => RawReturn::Int(call!(i16) as i64 as u64),
            SlotKind::U16 => RawReturn::Int(call!(u16) as u64),
            SlotKind::I32 => RawReturn::Int(call!(i32) as i64 as u64),
            SlotKind::U32 => RawReturn::Int(call!(u32) as u64),
            SlotKind::I64 => RawReturn::Int(call!(i64) as u64),
            SlotKind::U64 | SlotKind::Pointer => RawReturn::Int(call!(u64)),
            SlotKind::F32 => RawReturn::F32(call!(f32)),
            SlotKind::F64 => RawReturn::F64(call!(f64)),
        }
    }
}
