#[cfg(test)]
mod tests {
    use crate::{
        ClassId, ClassTag, ObjectValue, PassMode, RegisterClass, TypeDescriptor,
        TypeRegistrationError, TypeRegistry, Value,
    };
    use overlay_utils::{ByteOffset, NativeAddress, ProcessAllocator, SystemAllocator};

    struct Scratch {
        base: NativeAddress,
    }

    impl Scratch {
        fn new(size: usize) -> Self {
            Self {
                base: SystemAllocator.allocate(size, 16).unwrap(),
            }
        }
    }

    impl Drop for Scratch {
        fn drop(&mut self) {
            unsafe { SystemAllocator.free(self.base).unwrap() };
        }
    }

    fn round_trip(ty: &TypeDescriptor, value: Value) {
        assert!(ty.is_type_of(&value), "{ty} should accept {value:?}");
        let scratch = Scratch::new(256);
        let offset = ByteOffset(8);
        unsafe {
            ty.write(scratch.base, offset, &value).unwrap();
            let back = ty.read(scratch.base, offset).unwrap();
            assert!(
                ty.values_equal(&value, &back),
                "{ty}: wrote {value:?}, read {back:?}"
            );
        }
    }

    #[test]
    fn test_scalar_round_trips() {
        round_trip(&TypeDescriptor::boolean(), Value::Bool(true));
        round_trip(&TypeDescriptor::i8(), Value::Int(-128));
        round_trip(&TypeDescriptor::u8(), Value::UInt(255));
        round_trip(&TypeDescriptor::i16(), Value::Int(-1234));
        round_trip(&TypeDescriptor::u16(), Value::Int(65535));
        round_trip(&TypeDescriptor::i32(), Value::Int(i32::MIN as i64));
        round_trip(&TypeDescriptor::u32(), Value::UInt(u32::MAX as u64));
        round_trip(&TypeDescriptor::i64(), Value::Int(i64::MIN));
        round_trip(&TypeDescriptor::u64(), Value::UInt(u64::MAX));
        round_trip(&TypeDescriptor::f32(), Value::Float(0.1));
        round_trip(&TypeDescriptor::f64(), Value::Float(-2.5e300));
        round_trip(&TypeDescriptor::f64(), Value::Int(3));
        round_trip(&TypeDescriptor::raw_pointer(), Value::Pointer(NativeAddress(0x1234)));
        round_trip(&TypeDescriptor::raw_pointer(), Value::Null);
    }

    #[test]
    fn test_composite_round_trips() {
        let ints = TypeDescriptor::array_of(&TypeDescriptor::i16(), 3).unwrap();
        round_trip(&ints, Value::List(vec![1.into(), (-2).into(), 3.into()]));

        let doubles = TypeDescriptor::vector_of(&TypeDescriptor::f64()).unwrap();
        round_trip(&doubles, Value::List(vec![1.5.into(), 2.25.into()]));
        round_trip(&doubles, Value::List(vec![]));

        round_trip(&TypeDescriptor::string(), Value::from("héllo"));
        round_trip(&TypeDescriptor::string(), Value::from(""));

        let strings = TypeDescriptor::vector_of(&TypeDescriptor::string()).unwrap();
        round_trip(&strings, Value::List(vec!["a".into(), "bc".into()]));
    }

    #[test]
    fn test_class_round_trips_compare_contents() {
        let tag = ClassTag::new(ClassId(3), "Pair", None);
        let pair = TypeDescriptor::class(tag.clone(), 8, 4);
        let left = [1i32, 2];
        let right = [3i32, 4];
        let object = |memory: &[i32; 2]| {
            Value::Object(ObjectValue::new(NativeAddress::from_ptr(memory.as_ptr()), tag.clone()))
        };

        round_trip(&pair, object(&left));

        let pairs = TypeDescriptor::array_of(&pair, 2).unwrap();
        round_trip(&pairs, Value::List(vec![object(&left), object(&right)]));

        let many = TypeDescriptor::vector_of(&pair).unwrap();
        round_trip(&many, Value::List(vec![object(&right), object(&left), object(&right)]));

        let copy = [1i32, 2];
        unsafe {
            assert!(pair.values_equal(&object(&left), &object(&copy)));
            assert!(!pair.values_equal(&object(&left), &object(&right)));
        }
    }

    #[test]
    fn test_class_pointer_reads_object() {
        let tag = ClassTag::new(ClassId(7), "Node", None);
        let node = TypeDescriptor::class(tag.clone(), 16, 8);
        let ptr = TypeDescriptor::pointer_to(&node).unwrap();

        let target = NativeAddress(0xdead_0000);
        let value = Value::Object(ObjectValue::new(target, tag.clone()));
        round_trip(&ptr, value);
        round_trip(&ptr, Value::Null);

        let scratch = Scratch::new(16);
        unsafe {
            ptr.write(scratch.base, ByteOffset::ZERO, &Value::Pointer(target)).unwrap();
            match ptr.read(scratch.base, ByteOffset::ZERO).unwrap() {
                Value::Object(o) => {
                    assert_eq!(o.address, target);
                    assert_eq!(o.class.id, tag.id);
                }
                other => panic!("expected object, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_is_type_of_integer_ranges() {
        assert!(TypeDescriptor::u8().is_type_of(&Value::Int(255)));
        assert!(!TypeDescriptor::u8().is_type_of(&Value::Int(256)));
        assert!(!TypeDescriptor::u32().is_type_of(&Value::Int(-1)));
        assert!(TypeDescriptor::i64().is_type_of(&Value::UInt(i64::MAX as u64)));
        assert!(!TypeDescriptor::i64().is_type_of(&Value::UInt(u64::MAX)));
        assert!(!TypeDescriptor::i32().is_type_of(&Value::Float(1.0)));
        assert!(!TypeDescriptor::i32().is_type_of(&Value::from("1")));
        assert!(TypeDescriptor::f32().is_type_of(&Value::Int(1)));
    }

    #[test]
    fn test_is_type_of_respects_subclassing() {
        let base = ClassTag::new(ClassId(1), "Base", None);
        let derived = ClassTag::new(ClassId(2), "Derived", Some(&base));
        let base_ty = TypeDescriptor::class(base.clone(), 8, 8);
        let derived_ty = TypeDescriptor::class(derived.clone(), 16, 8);

        let d = Value::Object(ObjectValue::new(NativeAddress(0x10), derived));
        let b = Value::Object(ObjectValue::new(NativeAddress(0x20), base));
        assert!(base_ty.is_type_of(&d));
        assert!(derived_ty.is_type_of(&d));
        assert!(!derived_ty.is_type_of(&b));
    }

    #[test]
    fn test_write_rejects_mismatched_value() {
        let scratch = Scratch::new(8);
        let err = unsafe {
            TypeDescriptor::i32()
                .write(scratch.base, ByteOffset::ZERO, &Value::from("nope"))
                .unwrap_err()
        };
        assert!(matches!(err, crate::AccessError::ValueMismatch { .. }));
    }

    #[test]
    fn test_register_classes() {
        assert_eq!(TypeDescriptor::f32().register_class(), Ok(RegisterClass::Float));
        assert_eq!(TypeDescriptor::f64().register_class(), Ok(RegisterClass::Float));
        assert_eq!(TypeDescriptor::i32().register_class(), Ok(RegisterClass::Integer));
        assert_eq!(TypeDescriptor::string().register_class(), Ok(RegisterClass::Integer));
        assert!(matches!(
            TypeDescriptor::void().register_class(),
            Err(TypeRegistrationError::AmbiguousRegisterClass(_))
        ));
    }

    #[test]
    fn test_pass_modes() {
        let tag = |id, name| ClassTag::new(ClassId(id), name, None);
        assert_eq!(TypeDescriptor::class(tag(1, "A"), 8, 8).pass_mode(), Ok(PassMode::Direct));
        assert_eq!(TypeDescriptor::class(tag(2, "B"), 12, 4).pass_mode(), Ok(PassMode::Indirect));
        assert_eq!(TypeDescriptor::class(tag(3, "C"), 3, 1).pass_mode(), Ok(PassMode::Indirect));
        assert_eq!(TypeDescriptor::string().pass_mode(), Ok(PassMode::Indirect));
        assert_eq!(TypeDescriptor::f64().pass_mode(), Ok(PassMode::Direct));
    }

    #[test]
    fn test_composites_need_sized_elements() {
        let registry = TypeRegistry::new();
        let later = registry.forward("Later");
        assert!(matches!(
            TypeDescriptor::array_of(&later, 2),
            Err(TypeRegistrationError::UnsizedElement { .. })
        ));
        assert!(TypeDescriptor::vector_of(&later).is_err());
        assert!(TypeDescriptor::pointer_to(&later).is_err());
        assert_eq!(TypeDescriptor::deferred_pointer(&later).size(), Some(8));
    }

    #[test]
    fn test_forward_resolves_on_definition() {
        let registry = TypeRegistry::new();
        let node_ptr = registry.parse("ptr<Node>").unwrap();
        assert_eq!(node_ptr.pointee_class(), None);
        assert_eq!(registry.pending_forwards(), vec!["Node".to_string()]);

        let tag = registry.allocate_class("Node", None).unwrap();
        let node = registry.define_class(tag.clone(), 16, 8).unwrap();
        assert_eq!(node_ptr.pointee_class(), Some(&tag));
        assert!(registry.pending_forwards().is_empty());
        assert_eq!(registry.parse("ptr<Node>").unwrap(), node_ptr);
        assert_eq!(registry.parse("Node").unwrap(), node);
    }

    #[test]
    fn test_parse_expressions() {
        let registry = TypeRegistry::new();
        assert_eq!(registry.parse("int32").unwrap(), TypeDescriptor::i32());
        assert_eq!(registry.parse("ptr<void>").unwrap(), TypeDescriptor::raw_pointer());

        let grid = registry.parse("float[4][2]").unwrap();
        assert_eq!(grid.size(), Some(32));
        assert_eq!(grid.name(), "float[4][2]");

        let nested = registry.parse("vector< ptr<uint8> >").unwrap();
        assert_eq!(nested.size(), Some(24));

        assert!(matches!(
            registry.parse("Missing"),
            Err(TypeRegistrationError::UnknownType(_))
        ));
        assert!(matches!(
            registry.parse("int32[x]"),
            Err(TypeRegistrationError::MalformedExpression(_))
        ));
    }

    #[test]
    fn test_semantic_identity_across_registries() {
        let a = TypeRegistry::new();
        let b = TypeRegistry::new();
        assert_eq!(a.parse("ptr<int64>").unwrap(), b.parse("ptr<int64>").unwrap());
        assert_ne!(a.parse("int64").unwrap(), a.parse("uint64").unwrap());
    }
}
