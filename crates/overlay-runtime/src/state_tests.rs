#[cfg(test)]
mod tests {
    use crate::{EntryPoint, NativeRuntime, OverloadEntry, RegisterFile, RuntimeConfig, RuntimeError, Signature};
    use overlay_types::{ObjectValue, TypeDescriptor, Value};
    use overlay_utils::{ManualClock, NativeAddress};
    use overlay_value::{ClassDeclaration, ClassLayout, FieldDeclaration, MemoryHandle, Ownership};
    use std::{rc::Rc, sync::Arc, time::Duration};

    fn node(runtime: &NativeRuntime) -> Arc<ClassLayout> {
        runtime
            .define_class(
                ClassDeclaration::new("Node")
                    .field(FieldDeclaration::auto("value", TypeDescriptor::i64()))
                    .size(8),
            )
            .unwrap()
    }

    fn manual_runtime(delay_ms: u64) -> (NativeRuntime, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let runtime = NativeRuntime::builder()
            .config(RuntimeConfig {
                eviction_delay_ms: delay_ms,
                ..RuntimeConfig::default()
            })
            .clock(clock.clone())
            .build()
            .unwrap();
        (runtime, clock)
    }

    #[test]
    fn test_wrap_is_stable_per_address() {
        let runtime = NativeRuntime::new(RuntimeConfig::default()).unwrap();
        let layout = node(&runtime);
        let memory = [7i64, 8];
        let first = NativeAddress::from_ptr(&memory[0]);
        let second = NativeAddress::from_ptr(&memory[1]);

        let a = unsafe { runtime.wrap(first, &layout) }.unwrap();
        let b = unsafe { runtime.wrap(first, &layout) }.unwrap();
        let c = unsafe { runtime.wrap(second, &layout) }.unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        assert!(!Rc::ptr_eq(&a, &c));
        assert_eq!(a.ownership(), Ownership::Alias);
        assert_eq!(a.get("value").unwrap(), Value::Int(7));
        assert_eq!(c.get("value").unwrap(), Value::Int(8));

        let stats = runtime.cache_statistics();
        assert_eq!(stats.address.hits, 1);
        assert_eq!(stats.address.misses, 2);
        assert_eq!(stats.address.size, 2);
    }

    #[test]
    fn test_writes_through_one_wrap_are_seen_by_the_next() {
        let runtime = NativeRuntime::new(RuntimeConfig::default()).unwrap();
        let layout = node(&runtime);
        let mut memory = [0i64];
        let address = NativeAddress::from_ptr(memory.as_mut_ptr());

        unsafe { runtime.wrap(address, &layout) }.unwrap().set("value", 99i64).unwrap();
        let again = unsafe { runtime.wrap(address, &layout) }.unwrap();
        assert_eq!(again.get("value").unwrap(), Value::Int(99));
    }

    #[test]
    fn test_idle_handles_are_evicted_after_delay() {
        let (runtime, clock) = manual_runtime(100);
        let layout = node(&runtime);
        let memory = [1i64, 2];
        let idle = NativeAddress::from_ptr(&memory[0]);
        let held = NativeAddress::from_ptr(&memory[1]);

        let weak = Rc::downgrade(&unsafe { runtime.wrap(idle, &layout) }.unwrap());
        clock.advance(Duration::from_millis(50));
        // Still cached: rewrapping within the delay returns the same handle.
        let again = unsafe { runtime.wrap(idle, &layout) }.unwrap();
        assert!(Rc::ptr_eq(&again, &weak.upgrade().unwrap()));
        drop(again);

        let kept = unsafe { runtime.wrap(held, &layout) }.unwrap();
        clock.advance(Duration::from_millis(150));
        assert_eq!(runtime.sweep(), 1);
        assert!(weak.upgrade().is_none());
        assert!(!runtime.is_wrapped(idle));

        // A handle still referenced outside the cache is never evicted.
        clock.advance(Duration::from_secs(10));
        assert_eq!(runtime.sweep(), 0);
        assert!(runtime.is_wrapped(held));
        let rewrapped = unsafe { runtime.wrap(held, &layout) }.unwrap();
        assert!(Rc::ptr_eq(&kept, &rewrapped));

        assert_eq!(runtime.cache_statistics().address_evictions, 1);
    }

    #[test]
    fn test_wrap_evicts_on_the_way_in() {
        let (runtime, clock) = manual_runtime(10);
        let layout = node(&runtime);
        let memory = [1i64, 2];
        let a = NativeAddress::from_ptr(&memory[0]);
        let b = NativeAddress::from_ptr(&memory[1]);

        drop(unsafe { runtime.wrap(a, &layout) }.unwrap());
        // The idle clock starts at the first sweep that sees no outside reference.
        assert_eq!(runtime.sweep(), 0);
        clock.advance(Duration::from_millis(20));
        let _b = unsafe { runtime.wrap(b, &layout) }.unwrap();
        assert!(!runtime.is_wrapped(a));
        assert!(runtime.is_wrapped(b));
    }

    #[test]
    fn test_handles_released_late_wait_the_full_delay() {
        let (runtime, clock) = manual_runtime(1000);
        let layout = node(&runtime);
        let memory = [3i64];
        let address = NativeAddress::from_ptr(&memory[0]);

        let held = unsafe { runtime.wrap(address, &layout) }.unwrap();
        let weak = Rc::downgrade(&held);
        clock.advance(Duration::from_secs(60));
        drop(held);
        assert_eq!(runtime.sweep(), 0);
        assert!(weak.upgrade().is_some());

        clock.advance(Duration::from_millis(999));
        assert_eq!(runtime.sweep(), 0);
        clock.advance(Duration::from_millis(1));
        assert_eq!(runtime.sweep(), 1);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_embedded_first_member_gets_its_own_handle() {
        let runtime = NativeRuntime::new(RuntimeConfig::default()).unwrap();
        let inner = runtime
            .define_class(
                ClassDeclaration::new("Inner")
                    .field(FieldDeclaration::auto("a", TypeDescriptor::i32()))
                    .size(4),
            )
            .unwrap();
        let outer = runtime
            .define_class(
                ClassDeclaration::new("Outer")
                    .field(FieldDeclaration::auto("inner", inner.ty().clone()))
                    .field(FieldDeclaration::auto("b", TypeDescriptor::i32()))
                    .size(8),
            )
            .unwrap();
        let memory = [11i32, 22];
        let address = NativeAddress::from_ptr(memory.as_ptr());

        let as_outer = unsafe { runtime.wrap(address, &outer) }.unwrap();
        let as_inner = unsafe { runtime.wrap(address, &inner) }.unwrap();
        assert_eq!(as_inner.layout().name(), "Inner");
        assert!(!Rc::ptr_eq(&as_outer, &as_inner));
        assert_eq!(as_inner.get("a").unwrap(), Value::Int(11));
        assert_eq!(as_outer.get("b").unwrap(), Value::Int(22));

        let again = unsafe { runtime.wrap(address, &outer) }.unwrap();
        assert!(Rc::ptr_eq(&as_outer, &again));
        assert_eq!(runtime.cache_statistics().address.size, 2);
    }

    #[test]
    fn test_wrap_null_is_an_error() {
        let runtime = NativeRuntime::new(RuntimeConfig::default()).unwrap();
        let layout = node(&runtime);
        assert_eq!(
            unsafe { runtime.wrap(NativeAddress::NULL, &layout) }.err(),
            Some(RuntimeError::NullObject("Node".into()))
        );
    }

    #[test]
    fn test_wrap_picks_most_derived_class() {
        let runtime = NativeRuntime::new(RuntimeConfig::default()).unwrap();
        let actor = runtime
            .define_polymorphic_class(
                ClassDeclaration::new("Actor")
                    .field(FieldDeclaration::at("id", TypeDescriptor::i32(), 8))
                    .size(16),
                NativeAddress(0x7000),
            )
            .unwrap();
        let pawn = runtime
            .define_polymorphic_class(
                ClassDeclaration::new("Pawn")
                    .extends(&actor)
                    .field(FieldDeclaration::auto("health", TypeDescriptor::i32()))
                    .size(24),
                NativeAddress(0x7100),
            )
            .unwrap();

        let pawn_memory = [0x7100u64, 3, 0x64];
        let actor_memory = [0x7000u64, 4, 0];
        let unknown_memory = [0x9999u64, 5, 0];

        let wrapped = unsafe { runtime.wrap(NativeAddress::from_ptr(&pawn_memory[0]), &actor) }.unwrap();
        assert_eq!(wrapped.layout().name(), "Pawn");
        assert_eq!(wrapped.get("health").unwrap(), Value::Int(100));
        assert_eq!(wrapped.get("id").unwrap(), Value::Int(3));

        let wrapped = unsafe { runtime.wrap(NativeAddress::from_ptr(&unknown_memory[0]), &actor) }.unwrap();
        assert_eq!(wrapped.layout().name(), "Actor");

        // A base-class vtable never narrows a declared subclass.
        let wrapped = unsafe { runtime.wrap(NativeAddress::from_ptr(&actor_memory[0]), &pawn) }.unwrap();
        assert_eq!(wrapped.layout().name(), "Pawn");
    }

    #[test]
    fn test_wrap_value() {
        let runtime = NativeRuntime::new(RuntimeConfig::default()).unwrap();
        let layout = node(&runtime);

        let owned = runtime.allocate(&layout).unwrap();
        let found = unsafe { runtime.wrap_value(&owned.to_value()) }.unwrap().unwrap();
        assert!(Rc::ptr_eq(&owned, &found));
        assert!(!runtime.is_wrapped(owned.address()));

        let memory = [5i64];
        let address = NativeAddress::from_ptr(&memory[0]);
        let bare = Value::Object(ObjectValue::new(address, layout.tag().clone()));
        let wrapped = unsafe { runtime.wrap_value(&bare) }.unwrap().unwrap();
        assert_eq!(wrapped.get("value").unwrap(), Value::Int(5));
        assert!(runtime.is_wrapped(address));

        assert!(unsafe { runtime.wrap_value(&Value::Int(1)) }.unwrap().is_none());
    }

    #[test]
    fn test_class_lookup() {
        let runtime = NativeRuntime::new(RuntimeConfig::default()).unwrap();
        let layout = node(&runtime);
        assert!(Arc::ptr_eq(&runtime.class("Node").unwrap(), &layout));
        assert_eq!(
            runtime.class("Missing").err(),
            Some(RuntimeError::UnknownClass("Missing".into()))
        );
    }

    #[test]
    fn test_decode_intercepted_method_call() {
        let runtime = NativeRuntime::new(RuntimeConfig::default()).unwrap();
        let actor = runtime
            .define_class(
                ClassDeclaration::new("Actor")
                    .field(FieldDeclaration::auto("id", TypeDescriptor::i64()))
                    .size(8),
            )
            .unwrap();
        let handle = runtime
            .define_class(
                ClassDeclaration::new("Handle")
                    .field(FieldDeclaration::auto("index", TypeDescriptor::i32()))
                    .field(FieldDeclaration::auto("generation", TypeDescriptor::i32()))
                    .size(8),
            )
            .unwrap();
        let entry = OverloadEntry::new(
            EntryPoint::Absolute(NativeAddress(0x1000)),
            Signature::method(
                TypeDescriptor::pointer_to(actor.ty()).unwrap(),
                [TypeDescriptor::i32(), handle.ty().clone(), TypeDescriptor::f64()],
            ),
        )
        .unwrap();

        let memory = [11i64];
        let this = NativeAddress::from_ptr(&memory[0]);
        // this in rcx, then rdx, r8 and xmm3.
        let frame = RegisterFile {
            int: [this.as_usize() as u64, 42, 0x0000_0003_0000_0009, 0],
            float: [0, 0, 0, 2.5f64.to_bits()],
            stack: vec![],
        };
        let decoded = unsafe { runtime.decode_call(&entry, &frame) }.unwrap();

        let receiver = decoded.this.unwrap();
        assert_eq!(receiver.as_object().unwrap().address, this);
        assert_eq!(decoded.args[0], Value::Int(42));
        let by_value = MemoryHandle::from_value(&decoded.args[1]).unwrap();
        assert_eq!(by_value.ownership(), Ownership::Owned);
        assert_eq!(by_value.get("index").unwrap(), Value::Int(9));
        assert_eq!(by_value.get("generation").unwrap(), Value::Int(3));
        assert_eq!(decoded.args[2], Value::Float(2.5));
    }

    #[test]
    fn test_default_runtime_has_no_symbols() {
        let runtime = NativeRuntime::new(RuntimeConfig::default()).unwrap();
        assert!(matches!(runtime.resolve("anything"), Err(RuntimeError::Resolve(_))));
        assert_eq!(runtime.cache_statistics().symbol.size, 0);
    }

    #[test]
    fn test_missing_library_fails_build() {
        let config = RuntimeConfig {
            library: Some("/nonexistent/libgame.so".into()),
            ..RuntimeConfig::default()
        };
        assert!(matches!(NativeRuntime::new(config), Err(RuntimeError::Resolve(_))));
    }
}
