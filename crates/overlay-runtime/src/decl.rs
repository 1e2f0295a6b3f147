//! JSON declaration files: classes and functions described as data.
//!
//! ```json
//! {
//!   "classes": [
//!     { "name": "Player", "size": 16, "vtable": "0x7ff600001000",
//!       "fields": [ { "name": "health", "type": "float", "offset": 8 } ] }
//!   ],
//!   "functions": [
//!     { "name": "Player::Heal",
//!       "overloads": [ { "this": "ptr<Player>", "params": ["float"], "rva": "0x1a2b0" } ] }
//!   ]
//! }
//! ```
use crate::{
    dispatch::{DeferredFunction, EntryPoint, Signature},
    error::RuntimeError,
    state::NativeRuntime,
};
use overlay_types::TypeDescriptor;
use overlay_utils::{ByteOffset, NativeAddress};
use overlay_value::{ClassDeclaration, ClassLayout, FieldDeclaration};
use serde::{Deserialize, Serialize};
use std::{path::Path, rc::Rc, sync::Arc};
use tracing::{debug, warn};

/// An address or offset written either as a JSON number or as text
/// (decimal or `0x` hexadecimal).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AddressLiteral {
    Number(usize),
    Text(String),
}

impl AddressLiteral {
    pub fn value(&self) -> Result<usize, RuntimeError> {
        match self {
            AddressLiteral::Number(n) => Ok(*n),
            AddressLiteral::Text(text) => NativeAddress::parse(text)
                .map(NativeAddress::as_usize)
                .ok_or_else(|| RuntimeError::Declaration(format!("'{text}' is not an address"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
    #[serde(default)]
    pub ghost: bool,
    /// For ghost fields, the field whose storage is reused.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassDecl {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alignment: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vtable: Option<AddressLiteral>,
    #[serde(default)]
    pub fields: Vec<FieldDecl>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverloadDecl {
    #[serde(default)]
    pub params: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub this: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returns: Option<String>,
    #[serde(default)]
    pub sret: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rva: Option<AddressLiteral>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<AddressLiteral>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub name: String,
    pub overloads: Vec<OverloadDecl>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Declarations {
    #[serde(default)]
    pub classes: Vec<ClassDecl>,
    #[serde(default)]
    pub functions: Vec<FunctionDecl>,
}

/// What [`Declarations::load_into`] registered, in declaration order.
#[derive(Debug, Default)]
pub struct Loaded {
    pub classes: Vec<Arc<ClassLayout>>,
    pub functions: Vec<Rc<DeferredFunction>>,
}

impl Declarations {
    pub fn from_json(text: &str) -> Result<Self, RuntimeError> {
        serde_json::from_str(text).map_err(|e| RuntimeError::Declaration(e.to_string()))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, RuntimeError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| RuntimeError::Declaration(format!("{}: {e}", path.display())))?;
        Self::from_json(&text)
    }

    /// Compiles the classes in order, then registers the functions.
    pub fn load_into(&self, runtime: &NativeRuntime) -> Result<Loaded, RuntimeError> {
        let mut loaded = Loaded::default();
        for class in &self.classes {
            loaded.classes.push(class.define(runtime)?);
        }
        for function in &self.functions {
            loaded.functions.push(runtime.define_function(function.build(runtime)?));
        }
        for name in runtime.types().pending_forwards() {
            warn!("'{}' is referenced through a pointer but never declared", name);
        }
        debug!(
            classes = loaded.classes.len(),
            functions = loaded.functions.len(),
            "loaded declarations"
        );
        Ok(loaded)
    }
}

impl ClassDecl {
    fn define(&self, runtime: &NativeRuntime) -> Result<Arc<ClassLayout>, RuntimeError> {
        let mut decl = ClassDeclaration::new(&self.name);
        if let Some(base) = &self.base {
            decl = decl.extends(&runtime.class(base)?);
        }
        if let Some(size) = self.size {
            decl = decl.size(size);
        }
        if let Some(alignment) = self.alignment {
            decl = decl.alignment(alignment);
        }
        for field in &self.fields {
            decl = decl.field(field.declaration(runtime)?);
        }
        match &self.vtable {
            Some(vtable) => runtime.define_polymorphic_class(decl, NativeAddress(vtable.value()?)),
            None => runtime.define_class(decl),
        }
    }
}

impl FieldDecl {
    fn declaration(&self, runtime: &NativeRuntime) -> Result<FieldDeclaration, RuntimeError> {
        let ty = runtime.types().parse(&self.ty)?;
        Ok(match (self.ghost, &self.alias, self.offset) {
            (true, _, Some(_)) => {
                return Err(RuntimeError::Declaration(format!(
                    "ghost field '{}' takes its alias's offset and cannot have its own",
                    self.name
                )))
            }
            (true, Some(target), None) => FieldDeclaration::ghost(&self.name, ty, target),
            (true, None, None) => {
                return Err(RuntimeError::Declaration(format!(
                    "ghost field '{}' needs an alias",
                    self.name
                )))
            }
            (false, _, Some(offset)) => FieldDeclaration::at(&self.name, ty, offset),
            (false, _, None) => FieldDeclaration::auto(&self.name, ty),
        })
    }
}

impl FunctionDecl {
    fn build(&self, runtime: &NativeRuntime) -> Result<DeferredFunction, RuntimeError> {
        let mut function = DeferredFunction::new(&self.name);
        for overload in &self.overloads {
            let entry = overload.entry_point(&self.name)?;
            function.overload(entry, overload.signature(runtime)?)?;
        }
        Ok(function)
    }
}

impl OverloadDecl {
    fn entry_point(&self, function: &str) -> Result<EntryPoint, RuntimeError> {
        match (&self.symbol, &self.rva, &self.address) {
            (Some(symbol), None, None) => Ok(EntryPoint::Symbol(symbol.clone())),
            (None, Some(rva), None) => Ok(EntryPoint::Relative(ByteOffset(rva.value()?))),
            (None, None, Some(address)) => Ok(EntryPoint::Absolute(NativeAddress(address.value()?))),
            _ => Err(RuntimeError::Declaration(format!(
                "overload of '{function}' needs exactly one of symbol, rva or address"
            ))),
        }
    }

    fn signature(&self, runtime: &NativeRuntime) -> Result<Signature, RuntimeError> {
        let types = runtime.types();
        let parse_all = |exprs: &[String]| -> Result<Vec<TypeDescriptor>, RuntimeError> {
            exprs.iter().map(|e| Ok(types.parse(e)?)).collect()
        };
        let mut signature = Signature::new(parse_all(&self.params)?);
        if let Some(this) = &self.this {
            signature.this = Some(types.parse(this)?);
        }
        if let Some(returns) = &self.returns {
            signature = signature.returning(types.parse(returns)?);
        }
        if self.sret {
            signature = signature.with_sret();
        }
        if let Some(template) = &self.template {
            signature = signature.with_template(parse_all(template)?);
        }
        Ok(signature)
    }
}
