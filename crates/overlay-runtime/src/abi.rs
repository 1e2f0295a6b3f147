//! Argument placement for native calls.
//!
//! The placement algorithm is fixed; everything convention-specific lives in an
//! [`AbiTable`]. [`MSVC_X64`] is the only table the runtime ships with.
use overlay_types::{PassMode, RegisterClass, TypeDescriptor, TypeRegistrationError};
use overlay_utils::POINTER_SIZE;
use std::fmt::{self, Display, Formatter};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Register {
    Rax,
    Rcx,
    Rdx,
    Rsi,
    Rdi,
    R8,
    R9,
    Xmm0,
    Xmm1,
    Xmm2,
    Xmm3,
    Xmm4,
    Xmm5,
    Xmm6,
    Xmm7,
}

impl Display for Register {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            Register::Rax => "rax",
            Register::Rcx => "rcx",
            Register::Rdx => "rdx",
            Register::Rsi => "rsi",
            Register::Rdi => "rdi",
            Register::R8 => "r8",
            Register::R9 => "r9",
            Register::Xmm0 => "xmm0",
            Register::Xmm1 => "xmm1",
            Register::Xmm2 => "xmm2",
            Register::Xmm3 => "xmm3",
            Register::Xmm4 => "xmm4",
            Register::Xmm5 => "xmm5",
            Register::Xmm6 => "xmm6",
            Register::Xmm7 => "xmm7",
        };
        f.write_str(name)
    }
}

/// Everything about a calling convention that argument placement depends on.
#[derive(Debug)]
pub struct AbiTable {
    pub name: &'static str,
    pub int_registers: &'static [Register],
    pub float_registers: &'static [Register],
    /// When set, the n-th argument uses the n-th register of its bank and
    /// consumes that position in both banks.
    pub positional_slots: bool,
    /// Bytes reserved by the caller below the stack arguments.
    pub shadow_space: usize,
    pub stack_slot_size: usize,
    pub int_return: Register,
    pub float_return: Register,
}

/// Microsoft x64: four positional slots shared by `rcx/rdx/r8/r9` and
/// `xmm0-3`, 32 bytes of shadow space, 8-byte stack slots.
pub static MSVC_X64: AbiTable = AbiTable {
    name: "msvc-x64",
    int_registers: &[Register::Rcx, Register::Rdx, Register::R8, Register::R9],
    float_registers: &[Register::Xmm0, Register::Xmm1, Register::Xmm2, Register::Xmm3],
    positional_slots: true,
    shadow_space: 32,
    stack_slot_size: 8,
    int_return: Register::Rax,
    float_return: Register::Xmm0,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ArgLocation {
    IntRegister(Register),
    FloatRegister(Register),
    /// Byte offset into the outgoing argument area, shadow space included.
    Stack(usize),
}

impl Display for ArgLocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ArgLocation::IntRegister(r) | ArgLocation::FloatRegister(r) => write!(f, "{r}"),
            ArgLocation::Stack(offset) => write!(f, "[rsp+{offset:#x}]"),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ArgSource {
    This,
    StructReturn,
    Param(usize),
}

impl Display for ArgSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ArgSource::This => f.write_str("this"),
            ArgSource::StructReturn => f.write_str("sret"),
            ArgSource::Param(i) => write!(f, "arg{i}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ArgAssignment {
    pub source: ArgSource,
    pub ty: TypeDescriptor,
    pub class: RegisterClass,
    /// Indirect arguments travel as a pointer to a caller-owned copy.
    pub mode: PassMode,
    pub location: ArgLocation,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ReturnLocation {
    Void,
    Integer(Register),
    Float(Register),
    /// Written through the hidden pointer, which the callee echoes in `register`.
    StructReturn { size: usize, register: Register },
}

/// Placement of every argument of one overload, in ABI order.
#[derive(Clone, Debug, PartialEq)]
pub struct CallPlan {
    pub abi: &'static str,
    pub args: Vec<ArgAssignment>,
    pub returns: TypeDescriptor,
    pub ret: ReturnLocation,
    /// Size of the outgoing argument area, shadow space included.
    pub stack_bytes: usize,
}

impl CallPlan {
    pub fn build(
        abi: &'static AbiTable,
        this: Option<&TypeDescriptor>,
        params: &[TypeDescriptor],
        returns: &TypeDescriptor,
        force_sret: bool,
    ) -> Result<CallPlan, TypeRegistrationError> {
        let sret = !returns.is_void() && (force_sret || returns.pass_mode()? == PassMode::Indirect);

        let mut logical: Vec<(ArgSource, TypeDescriptor)> = vec![];
        if let Some(this) = this {
            logical.push((ArgSource::This, this.clone()));
        }
        if sret {
            logical.push((ArgSource::StructReturn, TypeDescriptor::raw_pointer()));
        }
        logical.extend(
            params
                .iter()
                .enumerate()
                .map(|(i, ty)| (ArgSource::Param(i), ty.clone())),
        );

        let mut next_int = 0;
        let mut next_float = 0;
        let mut stack = 0;
        let mut args = Vec::with_capacity(logical.len());

        for (source, ty) in logical {
            let mode = match source {
                ArgSource::Param(_) => ty.pass_mode()?,
                _ => PassMode::Direct,
            };
            // An indirect argument is a pointer, whatever it points at.
            let class = match mode {
                PassMode::Direct => ty.register_class()?,
                PassMode::Indirect => RegisterClass::Integer,
            };

            let register = match class {
                RegisterClass::Integer => abi.int_registers.get(next_int),
                RegisterClass::Float => abi.float_registers.get(next_float),
            };
            let location = match (register, class) {
                (Some(r), RegisterClass::Integer) => ArgLocation::IntRegister(*r),
                (Some(r), RegisterClass::Float) => ArgLocation::FloatRegister(*r),
                (None, _) => {
                    let at = abi.shadow_space + stack * abi.stack_slot_size;
                    stack += 1;
                    ArgLocation::Stack(at)
                }
            };

            if abi.positional_slots {
                next_int += 1;
                next_float += 1;
            } else {
                match class {
                    RegisterClass::Integer => next_int += 1,
                    RegisterClass::Float => next_float += 1,
                }
            }

            args.push(ArgAssignment {
                source,
                ty,
                class,
                mode,
                location,
            });
        }

        let ret = if returns.is_void() {
            ReturnLocation::Void
        } else if sret {
            ReturnLocation::StructReturn {
                size: returns.size().unwrap_or(0),
                register: abi.int_return,
            }
        } else {
            match returns.register_class()? {
                RegisterClass::Integer => ReturnLocation::Integer(abi.int_return),
                RegisterClass::Float => ReturnLocation::Float(abi.float_return),
            }
        };

        Ok(CallPlan {
            abi: abi.name,
            args,
            returns: returns.clone(),
            ret,
            stack_bytes: abi.shadow_space + stack * abi.stack_slot_size,
        })
    }

    pub fn has_sret(&self) -> bool {
        matches!(self.ret, ReturnLocation::StructReturn { .. })
    }

    pub fn assignment(&self, source: ArgSource) -> Option<&ArgAssignment> {
        self.args.iter().find(|a| a.source == source)
    }

    /// Number of declared parameters, hidden arguments excluded.
    pub fn arity(&self) -> usize {
        self.args
            .iter()
            .filter(|a| matches!(a.source, ArgSource::Param(_)))
            .count()
    }
}

impl Display for CallPlan {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} ({} bytes of stack)", self.abi, self.stack_bytes)?;
        for arg in &self.args {
            let mode = match arg.mode {
                PassMode::Direct => "",
                PassMode::Indirect => " (by pointer)",
            };
            writeln!(f, "  {:<10} {:<6} {}{}", arg.location, arg.source, arg.ty, mode)?;
        }
        match &self.ret {
            ReturnLocation::Void => write!(f, "  returns void"),
            ReturnLocation::Integer(r) | ReturnLocation::Float(r) => {
                write!(f, "  returns {} in {r}", self.returns)
            }
            ReturnLocation::StructReturn { size, register } => write!(
                f,
                "  returns {} ({size} bytes) through sret, pointer echoed in {register}",
                self.returns
            ),
        }
    }
}

/// Raw argument words captured at the entry of an intercepted call, laid out
/// the way the plan's table assigns them.
#[derive(Clone, Debug, Default)]
pub struct RegisterFile {
    pub int: [u64; 4],
    /// Low 64 bits of each float argument register.
    pub float: [u64; 4],
    /// Outgoing argument area of the caller (shadow space first).
    pub stack: Vec<u64>,
}

impl RegisterFile {
    /// The raw word a plan assigned to `location`.
    pub fn word(&self, abi: &AbiTable, location: ArgLocation) -> Option<u64> {
        match location {
            ArgLocation::IntRegister(r) => {
                let i = abi.int_registers.iter().position(|x| *x == r)?;
                self.int.get(i).copied()
            }
            ArgLocation::FloatRegister(r) => {
                let i = abi.float_registers.iter().position(|x| *x == r)?;
                self.float.get(i).copied()
            }
            ArgLocation::Stack(offset) => self.stack.get(offset / POINTER_SIZE).copied(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use overlay_types::{ClassId, ClassTag};

    fn class(size: usize) -> TypeDescriptor {
        TypeDescriptor::class(ClassTag::new(ClassId(size as u32), format!("C{size}"), None), size, 8)
    }

    fn locations(plan: &CallPlan) -> Vec<String> {
        plan.args.iter().map(|a| a.location.to_string()).collect()
    }

    #[test]
    fn test_mixed_args_share_positional_slots() {
        let params = [
            TypeDescriptor::i32(),
            TypeDescriptor::f64(),
            TypeDescriptor::i64(),
            TypeDescriptor::f32(),
            TypeDescriptor::i8(),
            TypeDescriptor::f64(),
        ];
        let plan =
            CallPlan::build(&MSVC_X64, None, &params, &TypeDescriptor::void(), false).unwrap();
        assert_eq!(
            locations(&plan),
            ["rcx", "xmm1", "r8", "xmm3", "[rsp+0x20]", "[rsp+0x28]"]
        );
        assert_eq!(plan.stack_bytes, 48);
        assert_eq!(plan.ret, ReturnLocation::Void);
    }

    #[test]
    fn test_this_then_sret_then_params() {
        let this = TypeDescriptor::raw_pointer();
        let params = [TypeDescriptor::f32(), TypeDescriptor::f32(), TypeDescriptor::f32()];
        let plan = CallPlan::build(&MSVC_X64, Some(&this), &params, &class(24), false).unwrap();

        let sources: Vec<_> = plan.args.iter().map(|a| a.source).collect();
        assert_eq!(
            sources,
            [
                ArgSource::This,
                ArgSource::StructReturn,
                ArgSource::Param(0),
                ArgSource::Param(1),
                ArgSource::Param(2)
            ]
        );
        assert_eq!(locations(&plan), ["rcx", "rdx", "xmm2", "xmm3", "[rsp+0x20]"]);
        assert_eq!(
            plan.ret,
            ReturnLocation::StructReturn {
                size: 24,
                register: Register::Rax
            }
        );
        assert_eq!(plan.arity(), 3);
    }

    #[test]
    fn test_small_class_direct_large_class_indirect() {
        let params = [class(8), class(16)];
        let plan = CallPlan::build(&MSVC_X64, None, &params, &class(8), false).unwrap();
        assert_eq!(plan.args[0].mode, PassMode::Direct);
        assert_eq!(plan.args[1].mode, PassMode::Indirect);
        assert_eq!(plan.args[1].location, ArgLocation::IntRegister(Register::Rdx));
        assert_eq!(plan.ret, ReturnLocation::Integer(Register::Rax));

        let forced = CallPlan::build(&MSVC_X64, None, &[], &class(8), true).unwrap();
        assert!(forced.has_sret());
        assert_eq!(forced.args[0].location, ArgLocation::IntRegister(Register::Rcx));
    }

    #[test]
    fn test_float_return_and_string_param() {
        let plan = CallPlan::build(
            &MSVC_X64,
            None,
            &[TypeDescriptor::string()],
            &TypeDescriptor::f32(),
            false,
        )
        .unwrap();
        assert_eq!(plan.args[0].class, RegisterClass::Integer);
        assert_eq!(plan.args[0].mode, PassMode::Indirect);
        assert_eq!(plan.ret, ReturnLocation::Float(Register::Xmm0));
    }

    #[test]
    fn test_void_param_is_rejected() {
        let err =
            CallPlan::build(&MSVC_X64, None, &[TypeDescriptor::void()], &TypeDescriptor::void(), false)
                .unwrap_err();
        assert!(matches!(err, TypeRegistrationError::AmbiguousRegisterClass(_)));
    }

    static SEPARATE_BANKS: AbiTable = AbiTable {
        name: "separate-banks",
        int_registers: &[Register::Rdi, Register::Rsi],
        float_registers: &[Register::Xmm0, Register::Xmm1],
        positional_slots: false,
        shadow_space: 0,
        stack_slot_size: 8,
        int_return: Register::Rax,
        float_return: Register::Xmm0,
    };

    #[test]
    fn test_swapping_the_table_changes_placement() {
        let params = [
            TypeDescriptor::f64(),
            TypeDescriptor::i32(),
            TypeDescriptor::f64(),
            TypeDescriptor::i32(),
            TypeDescriptor::i32(),
        ];
        let plan =
            CallPlan::build(&SEPARATE_BANKS, None, &params, &TypeDescriptor::void(), false).unwrap();
        assert_eq!(locations(&plan), ["xmm0", "rdi", "xmm1", "rsi", "[rsp+0x0]"]);
        assert_eq!(plan.stack_bytes, 8);
    }

    #[test]
    fn test_register_file_lookup() {
        let frame = RegisterFile {
            int: [1, 2, 3, 4],
            float: [10, 20, 30, 40],
            stack: vec![0, 0, 0, 0, 5, 6],
        };
        assert_eq!(frame.word(&MSVC_X64, ArgLocation::IntRegister(Register::R8)), Some(3));
        assert_eq!(frame.word(&MSVC_X64, ArgLocation::FloatRegister(Register::Xmm1)), Some(20));
        assert_eq!(frame.word(&MSVC_X64, ArgLocation::Stack(0x28)), Some(6));
    }
}
