//! Overload selection for deferred native functions.
//!
//! A [`DeferredFunction`] collects overloads and picks one per call. The
//! dispatcher is built on first use: a function with a single overload binds
//! it directly, otherwise selection searches the overloads in registration
//! order. Searches keyed by declared or template types are memoized, since
//! the same site always resolves the same way; searches by runtime values are
//! repeated per call.
use crate::{error::DispatchError, metrics::RuntimeMetrics};
use overlay_types::{TypeDescriptor, TypeKey, Value};
use std::{
    cell::{OnceCell, RefCell},
    collections::HashMap,
    rc::Rc,
};

mod overload;

pub use overload::{EntryPoint, OverloadEntry, Signature};

/// What the caller knows about the types at a call site.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum CallSite {
    /// Only the argument values; overloads are filtered by `is_type_of`.
    #[default]
    Values,
    /// Statically declared parameter types; must match a signature exactly.
    Declared {
        params: Vec<TypeDescriptor>,
        this: Option<TypeDescriptor>,
    },
    /// Explicit template arguments naming one instantiation.
    Template {
        args: Vec<TypeDescriptor>,
        this: Option<TypeDescriptor>,
    },
}

/// Arguments of one call to a deferred function.
#[derive(Clone, Debug, Default)]
pub struct Invocation {
    pub this: Option<Value>,
    pub args: Vec<Value>,
    pub site: CallSite,
}

impl Invocation {
    pub fn new(args: impl IntoIterator<Item = Value>) -> Self {
        Self {
            args: args.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn on(mut self, this: impl Into<Value>) -> Self {
        self.this = Some(this.into());
        self
    }

    pub fn declared(mut self, params: impl IntoIterator<Item = TypeDescriptor>) -> Self {
        self.site = CallSite::Declared {
            params: params.into_iter().collect(),
            this: None,
        };
        self
    }

    pub fn template(mut self, args: impl IntoIterator<Item = TypeDescriptor>) -> Self {
        self.site = CallSite::Template {
            args: args.into_iter().collect(),
            this: None,
        };
        self
    }

    /// Declares the static type of `this` for a declared or template site.
    pub fn this_type(mut self, ty: TypeDescriptor) -> Self {
        match &mut self.site {
            CallSite::Declared { this, .. } | CallSite::Template { this, .. } => *this = Some(ty),
            CallSite::Values => {}
        }
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum SiteKey {
    Declared(Vec<TypeKey>, Option<TypeKey>),
    Template(Vec<TypeKey>, Option<TypeKey>),
}

impl SiteKey {
    fn of(site: &CallSite) -> Option<SiteKey> {
        let keys = |types: &[TypeDescriptor]| -> Vec<TypeKey> { types.iter().map(|t| t.key().clone()).collect() };
        match site {
            CallSite::Values => None,
            CallSite::Declared { params, this } => Some(SiteKey::Declared(
                keys(params),
                this.as_ref().map(|t| t.key().clone()),
            )),
            CallSite::Template { args, this } => Some(SiteKey::Template(
                keys(args),
                this.as_ref().map(|t| t.key().clone()),
            )),
        }
    }
}

enum Dispatcher {
    Single(Rc<OverloadEntry>),
    Multi(RefCell<HashMap<SiteKey, usize>>),
}

/// A named native function with one or more overloads.
pub struct DeferredFunction {
    name: String,
    overloads: Vec<Rc<OverloadEntry>>,
    dispatcher: OnceCell<Dispatcher>,
}

impl DeferredFunction {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            overloads: vec![],
            dispatcher: OnceCell::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn overloads(&self) -> &[Rc<OverloadEntry>] {
        &self.overloads
    }

    pub fn len(&self) -> usize {
        self.overloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overloads.is_empty()
    }

    /// Registers an overload, computing its call plan now.
    pub fn overload(&mut self, entry: EntryPoint, signature: Signature) -> Result<&mut Self, DispatchError> {
        let entry = OverloadEntry::new(entry, signature).map_err(|source| DispatchError::Registration {
            function: self.name.clone(),
            source,
        })?;
        Ok(self.register(entry))
    }

    pub fn register(&mut self, entry: OverloadEntry) -> &mut Self {
        self.overloads.push(Rc::new(entry));
        self.dispatcher = OnceCell::new();
        self
    }

    fn dispatcher(&self) -> &Dispatcher {
        self.dispatcher.get_or_init(|| match self.overloads.as_slice() {
            [only] => Dispatcher::Single(only.clone()),
            _ => Dispatcher::Multi(RefCell::new(HashMap::new())),
        })
    }

    /// Number of memoized call sites.
    pub fn memoized(&self) -> usize {
        match self.dispatcher.get() {
            Some(Dispatcher::Multi(memo)) => memo.borrow().len(),
            _ => 0,
        }
    }

    /// Picks the overload for `invocation`.
    pub fn select(&self, invocation: &Invocation, metrics: &RuntimeMetrics) -> Result<Rc<OverloadEntry>, DispatchError> {
        if self.overloads.is_empty() {
            return Err(DispatchError::NoOverloads(self.name.clone()));
        }
        let entry = match self.dispatcher() {
            Dispatcher::Single(only) => only.clone(),
            Dispatcher::Multi(memo) => match SiteKey::of(&invocation.site) {
                None => {
                    metrics.record_dispatch_search();
                    self.search(invocation)?
                }
                Some(key) => {
                    let cached = memo.borrow().get(&key).copied();
                    match cached {
                        Some(index) => {
                            metrics.record_dispatcher_cache_hit();
                            self.overloads[index].clone()
                        }
                        None => {
                            metrics.record_dispatcher_cache_miss();
                            metrics.record_dispatch_search();
                            let index = self.search_index(invocation)?;
                            memo.borrow_mut().insert(key, index);
                            self.overloads[index].clone()
                        }
                    }
                }
            },
        };
        self.check_shape(&entry, invocation)?;
        Ok(entry)
    }

    fn check_shape(&self, entry: &OverloadEntry, invocation: &Invocation) -> Result<(), DispatchError> {
        let signature = entry.signature();
        if let (Some(expected), None) = (&signature.this, &invocation.this) {
            return Err(DispatchError::UnboundThis {
                function: self.name.clone(),
                expected: expected.name().to_string(),
            });
        }
        if signature.params.len() != invocation.args.len() {
            return Err(DispatchError::ArityMismatch {
                function: self.name.clone(),
                expected: signature.params.len(),
                actual: invocation.args.len(),
            });
        }
        Ok(())
    }

    fn search(&self, invocation: &Invocation) -> Result<Rc<OverloadEntry>, DispatchError> {
        self.search_index(invocation).map(|i| self.overloads[i].clone())
    }

    fn search_index(&self, invocation: &Invocation) -> Result<usize, DispatchError> {
        let found = self.overloads.iter().position(|entry| {
            let signature = entry.signature();
            match &invocation.site {
                CallSite::Values => signature.accepts(invocation.this.as_ref(), &invocation.args),
                CallSite::Declared { params, this } => {
                    signature.params == *params && (signature.this.is_none() || signature.this == *this)
                }
                CallSite::Template { args, this } => {
                    signature.template.as_deref() == Some(args.as_slice())
                        && (signature.this.is_none() || signature.this == *this)
                }
            }
        });
        found.ok_or_else(|| self.not_found(invocation))
    }

    fn not_found(&self, invocation: &Invocation) -> DispatchError {
        // A method overload that only lacks its receiver is the likelier mistake.
        if invocation.this.is_none() {
            let unbound = self.overloads.iter().find_map(|entry| {
                let signature = entry.signature();
                let this = signature.this.as_ref()?;
                let fits = signature.params.len() == invocation.args.len()
                    && signature
                        .params
                        .iter()
                        .zip(&invocation.args)
                        .all(|(ty, v)| ty.is_type_of(v));
                fits.then(|| this.name().to_string())
            });
            if let Some(expected) = unbound {
                return DispatchError::UnboundThis {
                    function: self.name.clone(),
                    expected,
                };
            }
        }
        let arguments: Vec<String> = match &invocation.site {
            CallSite::Values => invocation.args.iter().map(|v| v.kind_name().to_string()).collect(),
            CallSite::Declared { params, .. } => params.iter().map(|t| t.name().to_string()).collect(),
            CallSite::Template { args, .. } => {
                vec![format!("<{}>", args.iter().map(|t| t.name()).collect::<Vec<_>>().join(", "))]
            }
        };
        DispatchError::OverloadNotFound {
            function: self.name.clone(),
            arguments: arguments.join(", "),
        }
    }
}

impl std::fmt::Debug for DeferredFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredFunction")
            .field("name", &self.name)
            .field("overloads", &self.overloads)
            .finish()
    }
}
