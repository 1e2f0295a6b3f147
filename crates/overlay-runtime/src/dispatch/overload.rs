use crate::{
    abi::{AbiTable, CallPlan, MSVC_X64},
    error::RuntimeError,
    state::NativeRuntime,
    trampoline::NativeCall,
};
use overlay_types::{TypeDescriptor, TypeRegistrationError, Value};
use overlay_utils::{ByteOffset, NativeAddress};
use std::{
    cell::OnceCell,
    fmt::{self, Display, Formatter},
    rc::Rc,
};

/// Where an overload's code lives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntryPoint {
    /// Offset from the runtime's module base.
    Relative(ByteOffset),
    Absolute(NativeAddress),
    /// Looked up through the symbol resolver on first call.
    Symbol(String),
}

impl Display for EntryPoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            EntryPoint::Relative(offset) => write!(f, "base+{offset}"),
            EntryPoint::Absolute(address) => write!(f, "{address}"),
            EntryPoint::Symbol(name) => write!(f, "'{name}'"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Signature {
    pub params: Vec<TypeDescriptor>,
    pub this: Option<TypeDescriptor>,
    pub returns: TypeDescriptor,
    /// Return through a hidden pointer even when the type would fit a register.
    pub sret: bool,
    /// Explicit template arguments this instantiation was declared with.
    pub template: Option<Vec<TypeDescriptor>>,
}

impl Signature {
    pub fn new(params: impl IntoIterator<Item = TypeDescriptor>) -> Self {
        Self {
            params: params.into_iter().collect(),
            this: None,
            returns: TypeDescriptor::void(),
            sret: false,
            template: None,
        }
    }

    pub fn method(this: TypeDescriptor, params: impl IntoIterator<Item = TypeDescriptor>) -> Self {
        Self {
            this: Some(this),
            ..Self::new(params)
        }
    }

    pub fn returning(mut self, returns: TypeDescriptor) -> Self {
        self.returns = returns;
        self
    }

    pub fn with_sret(mut self) -> Self {
        self.sret = true;
        self
    }

    pub fn with_template(mut self, args: impl IntoIterator<Item = TypeDescriptor>) -> Self {
        self.template = Some(args.into_iter().collect());
        self
    }

    /// True if the values can be passed to this signature.
    pub fn accepts(&self, this: Option<&Value>, args: &[Value]) -> bool {
        let this_ok = match (&self.this, this) {
            (Some(ty), Some(value)) => ty.is_type_of(value),
            (Some(_), None) => false,
            (None, _) => true,
        };
        this_ok
            && args.len() == self.params.len()
            && self.params.iter().zip(args).all(|(ty, v)| ty.is_type_of(v))
    }
}

impl Display for Signature {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if let Some(this) = &self.this {
            write!(f, "{this}::")?;
        }
        if let Some(template) = &self.template {
            let args: Vec<&str> = template.iter().map(|t| t.name()).collect();
            write!(f, "<{}>", args.join(", "))?;
        }
        let params: Vec<&str> = self.params.iter().map(|t| t.name()).collect();
        write!(f, "({}) -> {}", params.join(", "), self.returns)
    }
}

/// One registered overload. The call plan is computed at registration; the
/// native entry is resolved and bound on first call and reused afterwards.
pub struct OverloadEntry {
    abi: &'static AbiTable,
    entry: EntryPoint,
    signature: Signature,
    plan: CallPlan,
    bound: OnceCell<Rc<dyn NativeCall>>,
}

impl OverloadEntry {
    pub fn new(entry: EntryPoint, signature: Signature) -> Result<Self, TypeRegistrationError> {
        Self::with_abi(&MSVC_X64, entry, signature)
    }

    pub fn with_abi(
        abi: &'static AbiTable,
        entry: EntryPoint,
        signature: Signature,
    ) -> Result<Self, TypeRegistrationError> {
        let plan = CallPlan::build(
            abi,
            signature.this.as_ref(),
            &signature.params,
            &signature.returns,
            signature.sret,
        )?;
        Ok(Self {
            abi,
            entry,
            signature,
            plan,
            bound: OnceCell::new(),
        })
    }

    pub fn abi(&self) -> &'static AbiTable {
        self.abi
    }

    pub fn entry(&self) -> &EntryPoint {
        &self.entry
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn plan(&self) -> &CallPlan {
        &self.plan
    }

    pub fn is_bound(&self) -> bool {
        self.bound.get().is_some()
    }

    pub(crate) fn bind(&self, runtime: &NativeRuntime) -> Result<Rc<dyn NativeCall>, RuntimeError> {
        if let Some(call) = self.bound.get() {
            return Ok(call.clone());
        }
        let target = runtime.entry_address(&self.entry)?;
        let call = runtime.trampolines().build(&self.plan, target)?;
        Ok(self.bound.get_or_init(|| call).clone())
    }
}

impl fmt::Debug for OverloadEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverloadEntry")
            .field("entry", &self.entry)
            .field("signature", &self.signature.to_string())
            .field("bound", &self.is_bound())
            .finish()
    }
}
