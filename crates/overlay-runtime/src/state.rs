use crate::{
    abi::RegisterFile,
    classes::ClassRegistry,
    config::RuntimeConfig,
    dispatch::{DeferredFunction, EntryPoint, Invocation, OverloadEntry},
    error::{CallError, RuntimeError},
    marshal::{self, DecodedCall, Scratch},
    metrics::{CacheSizes, CacheStats, RuntimeMetrics},
    resolver::{CachedResolver, LibraryResolver, SymbolResolver, SymbolTable},
    trampoline::{LibffiTrampoline, RawReturn, TrampolineProvider},
};
use overlay_types::{ClassTag, TypeRegistry, Value};
use overlay_utils::{
    ByteOffset, Clock, NativeAddress, ProcessAllocator, SystemAllocator, SystemClock, POINTER_SIZE,
};
use overlay_value::{AddressCache, ClassDeclaration, ClassLayout, LayoutCompiler, MemoryHandle, ObjectRef};
use std::{cell::RefCell, collections::HashMap, ptr, rc::Rc, sync::Arc};

/// Everything one embedding needs to overlay and call into a native process:
/// the type and class registries, the wrapped-address cache, symbol
/// resolution and the native call machinery.
///
/// The runtime is single-threaded; handles and deferred functions are `Rc`s.
pub struct NativeRuntime {
    config: RuntimeConfig,
    types: TypeRegistry,
    classes: ClassRegistry,
    addresses: AddressCache,
    resolver: CachedResolver,
    trampolines: Box<dyn TrampolineProvider>,
    allocator: Rc<dyn ProcessAllocator>,
    functions: RefCell<HashMap<String, Rc<DeferredFunction>>>,
    metrics: RuntimeMetrics,
}

#[derive(Default)]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    clock: Option<Arc<dyn Clock>>,
    resolver: Option<Box<dyn SymbolResolver>>,
    trampolines: Option<Box<dyn TrampolineProvider>>,
    allocator: Option<Rc<dyn ProcessAllocator>>,
}

impl RuntimeBuilder {
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Overrides the resolver otherwise derived from the configured library.
    pub fn resolver(mut self, resolver: impl SymbolResolver + 'static) -> Self {
        self.resolver = Some(Box::new(resolver));
        self
    }

    pub fn trampolines(mut self, provider: impl TrampolineProvider + 'static) -> Self {
        self.trampolines = Some(Box::new(provider));
        self
    }

    pub fn allocator(mut self, allocator: Rc<dyn ProcessAllocator>) -> Self {
        self.allocator = Some(allocator);
        self
    }

    pub fn build(self) -> Result<NativeRuntime, RuntimeError> {
        let resolver: Box<dyn SymbolResolver> = match (self.resolver, &self.config.library) {
            (Some(resolver), _) => resolver,
            (None, Some(path)) => Box::new(LibraryResolver::open(path)?),
            (None, None) => Box::new(SymbolTable::new()),
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        interop_debug!(
            "INIT",
            "runtime ready: eviction delay {:?}, module base {}",
            self.config.eviction_delay(),
            self.config.module_base
        );
        Ok(NativeRuntime {
            addresses: AddressCache::new(self.config.eviction_delay(), clock),
            config: self.config,
            types: TypeRegistry::new(),
            classes: ClassRegistry::new(),
            resolver: CachedResolver::boxed(resolver),
            trampolines: self.trampolines.unwrap_or_else(|| Box::new(LibffiTrampoline)),
            allocator: self.allocator.unwrap_or_else(|| Rc::new(SystemAllocator)),
            functions: RefCell::new(HashMap::new()),
            metrics: RuntimeMetrics::new(),
        })
    }
}

impl NativeRuntime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }

    pub fn new(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        Self::builder().config(config).build()
    }

    pub fn from_env() -> Result<Self, RuntimeError> {
        Self::new(RuntimeConfig::from_env()?)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    pub fn classes(&self) -> &ClassRegistry {
        &self.classes
    }

    pub fn metrics(&self) -> &RuntimeMetrics {
        &self.metrics
    }

    pub fn trampolines(&self) -> &dyn TrampolineProvider {
        self.trampolines.as_ref()
    }

    pub fn allocator(&self) -> &Rc<dyn ProcessAllocator> {
        &self.allocator
    }

    // Classes and objects

    /// Compiles and registers a class.
    pub fn define_class(&self, decl: ClassDeclaration) -> Result<Arc<ClassLayout>, RuntimeError> {
        self.register_class(decl, None)
    }

    /// Compiles and registers a class whose objects start with a pointer to `vtable`.
    pub fn define_polymorphic_class(
        &self,
        decl: ClassDeclaration,
        vtable: NativeAddress,
    ) -> Result<Arc<ClassLayout>, RuntimeError> {
        self.register_class(decl, Some(vtable))
    }

    fn register_class(
        &self,
        decl: ClassDeclaration,
        vtable: Option<NativeAddress>,
    ) -> Result<Arc<ClassLayout>, RuntimeError> {
        let layout = LayoutCompiler::new(&self.types).compile(decl)?;
        self.classes.register(layout.clone(), vtable);
        Ok(layout)
    }

    pub fn class(&self, name: &str) -> Result<Arc<ClassLayout>, RuntimeError> {
        self.classes
            .by_name(name)
            .ok_or_else(|| RuntimeError::UnknownClass(name.to_string()))
    }

    fn class_of(&self, tag: &ClassTag) -> Result<Arc<ClassLayout>, RuntimeError> {
        self.classes
            .by_id(tag.id)
            .ok_or_else(|| RuntimeError::UnknownClass(tag.name.to_string()))
    }

    /// Allocates a zeroed, owned object of `layout`.
    pub fn allocate(&self, layout: &Arc<ClassLayout>) -> Result<ObjectRef, RuntimeError> {
        Ok(MemoryHandle::allocate(layout, self.allocator.clone())?)
    }

    /// The handle for the native object at `address`. Every wrap of the same
    /// address as the same class (or a base of it) yields the same handle
    /// until it has been unreferenced for the eviction delay. The handle's
    /// class is the most derived registered subclass of `declared` its vtable
    /// identifies; wrapping as an unrelated class, such as an embedded first
    /// member, caches a separate handle.
    ///
    /// # Safety
    ///
    /// `address` must point to a live object of class `declared` (or a
    /// subclass) for as long as the handle is used.
    pub unsafe fn wrap(&self, address: NativeAddress, declared: &Arc<ClassLayout>) -> Result<ObjectRef, RuntimeError> {
        if address.is_null() {
            return Err(RuntimeError::NullObject(declared.name().to_string()));
        }
        let lookup = self.addresses.get_or_insert_with(address, declared, || -> Result<ObjectRef, RuntimeError> {
            // SAFETY: forwarded from the caller.
            let layout = unsafe { self.classes.most_derived(address, declared) };
            Ok(unsafe { self.classes.instantiate(address, &layout) })
        })?;
        self.metrics.record_address_cache_evictions(lookup.evicted);
        if lookup.hit {
            self.metrics.record_address_cache_hit();
        } else {
            self.metrics.record_address_cache_miss();
            interop_trace!("WRAP", "{} as {}", address, lookup.handle.layout().name());
        }
        Ok(lookup.handle)
    }

    /// Handle behind an object value: the owning handle it came from, or a
    /// wrap of its address.
    ///
    /// # Safety
    ///
    /// See [`NativeRuntime::wrap`].
    pub unsafe fn wrap_value(&self, value: &Value) -> Result<Option<ObjectRef>, RuntimeError> {
        let Some(object) = value.as_object() else {
            return Ok(None);
        };
        if let Some(handle) = MemoryHandle::from_value(value) {
            return Ok(Some(handle));
        }
        let layout = self.class_of(&object.class)?;
        unsafe { self.wrap(object.address, &layout) }.map(Some)
    }

    /// Evicts idle wrapped handles now rather than on the next wrap.
    pub fn sweep(&self) -> usize {
        let evicted = self.addresses.sweep();
        self.metrics.record_address_cache_evictions(evicted);
        evicted
    }

    pub fn is_wrapped(&self, address: NativeAddress) -> bool {
        self.addresses.contains(address)
    }

    // Symbols and functions

    pub fn resolve(&self, name: &str) -> Result<NativeAddress, RuntimeError> {
        let (address, hit) = self.resolver.resolve_cached(name)?;
        if hit {
            self.metrics.record_symbol_cache_hit();
        } else {
            self.metrics.record_symbol_cache_miss();
        }
        Ok(address)
    }

    pub fn entry_address(&self, entry: &EntryPoint) -> Result<NativeAddress, RuntimeError> {
        match entry {
            EntryPoint::Relative(offset) => {
                if self.config.module_base.is_null() {
                    return Err(RuntimeError::Config(format!(
                        "entry point {entry} needs a module base"
                    )));
                }
                Ok(self.config.module_base + *offset)
            }
            EntryPoint::Absolute(address) => Ok(*address),
            EntryPoint::Symbol(name) => self.resolve(name),
        }
    }

    /// Publishes a function under its name, replacing any previous one.
    pub fn define_function(&self, function: DeferredFunction) -> Rc<DeferredFunction> {
        let function = Rc::new(function);
        self.functions
            .borrow_mut()
            .insert(function.name().to_string(), function.clone());
        function
    }

    pub fn function(&self, name: &str) -> Result<Rc<DeferredFunction>, RuntimeError> {
        self.functions
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownFunction(name.to_string()))
    }

    /// Calls the function published as `name`.
    ///
    /// # Safety
    ///
    /// See [`NativeRuntime::invoke`].
    pub unsafe fn call(&self, name: &str, invocation: Invocation) -> Result<Value, RuntimeError> {
        let function = self.function(name)?;
        unsafe { self.invoke(&function, invocation) }
    }

    /// Selects an overload of `function` for `invocation` and calls it.
    ///
    /// # Safety
    ///
    /// The selected overload's entry point must be a function with exactly the
    /// registered signature, and objects passed must be live.
    pub unsafe fn invoke(&self, function: &DeferredFunction, invocation: Invocation) -> Result<Value, RuntimeError> {
        let entry = function.select(&invocation, &self.metrics)?;
        unsafe { self.call_overload(function.name(), &entry, invocation.this.as_ref(), &invocation.args) }
    }

    unsafe fn call_overload(
        &self,
        function: &str,
        entry: &OverloadEntry,
        this: Option<&Value>,
        args: &[Value],
    ) -> Result<Value, RuntimeError> {
        let call = entry.bind(self)?;
        let plan = entry.plan();
        let scratch = Scratch::new();

        // Class results land directly in an owned object; anything else
        // returned through memory is read back out of a scratch buffer.
        let mut result = None;
        let sret = if plan.has_sret() {
            Some(match plan.returns.class_tag() {
                Some(tag) => {
                    let handle = self.allocate(&self.class_of(tag)?)?;
                    let address = handle.address();
                    result = Some(handle);
                    address
                }
                None => scratch
                    .allocate(
                        plan.returns.size().unwrap_or(POINTER_SIZE),
                        plan.returns.alignment(),
                    )
                    .map_err(CallError::from)?,
            })
        } else {
            None
        };

        let words = unsafe { marshal::lower_arguments(plan, this, args, sret, &scratch)? };
        interop_trace!("CALL", "{} at {} with {} words", function, call.target(), words.len());
        self.metrics.record_native_call();
        let raw = unsafe { call.invoke(&words) };

        let value = match (result, sret) {
            (Some(handle), _) => handle.to_value(),
            (None, Some(buffer)) => unsafe {
                plan.returns
                    .read(buffer, ByteOffset::ZERO)
                    .map_err(CallError::from)?
            },
            (None, None) => match (plan.returns.class_tag(), raw) {
                (Some(tag), RawReturn::Int(word)) => self.materialize(tag, word.to_le_bytes())?,
                _ => marshal::lift_return(&plan.returns, raw)?,
            },
        };

        // Objects returned by pointer share the handle of every other wrap.
        match (&value, plan.returns.pointee_class()) {
            (Value::Object(object), Some(_)) => {
                let layout = self.class_of(&object.class)?;
                Ok(unsafe { self.wrap(object.address, &layout)? }.to_value())
            }
            _ => Ok(value),
        }
    }

    /// Copies a register-sized class into a fresh owned object.
    fn materialize(&self, tag: &ClassTag, bytes: [u8; 8]) -> Result<Value, RuntimeError> {
        let layout = self.class_of(tag)?;
        let handle = self.allocate(&layout)?;
        // SAFETY: the block holds at least `layout.size()` bytes.
        unsafe {
            ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                handle.address().as_ptr::<u8>(),
                layout.size().min(bytes.len()),
            )
        };
        Ok(handle.to_value())
    }

    /// Recovers the arguments of an intercepted call to `entry` from the words
    /// captured at its entry point.
    ///
    /// # Safety
    ///
    /// `frame` must be the live entry state of a call matching `entry`.
    pub unsafe fn decode_call(&self, entry: &OverloadEntry, frame: &RegisterFile) -> Result<DecodedCall, RuntimeError> {
        unsafe {
            marshal::decode_frame(entry.plan(), entry.abi(), frame, |ty, bytes| {
                let tag = ty
                    .class_tag()
                    .ok_or_else(|| RuntimeError::UnknownClass(ty.name().to_string()))?;
                self.materialize(tag, bytes)
            })
        }
    }

    pub fn cache_statistics(&self) -> CacheStats {
        let dispatcher_size = self.functions.borrow().values().map(|f| f.memoized()).sum();
        self.metrics.cache_statistics(CacheSizes {
            dispatcher_size,
            symbol_size: self.resolver.len(),
            address_size: self.addresses.len(),
        })
    }
}
