use super::*;
use crate::catalog::Accessibility;
use crate::diagnostics::MessageLevel;
use crate::domain::DomainState;
use crate::error::ModuleLoadStatus;
use crate::icall::InternalCallEntry;
use crate::ids::{DomainId, TypeId};
use crate::object::{CollectionMode, HandleKind, ObjectHandle};
use crate::settings::OverloadPolicy;
use crate::value::{NativeValue, ValueKind};
use parking_lot::Mutex;
use std::ffi::c_void;
use std::sync::atomic::{AtomicUsize, Ordering};

const DEMO: &str = r#"{
  "name": "Demo",
  "version": "1.0.0",
  "types": [
    {
      "name": "Demo.Tag",
      "base": "System.Attribute",
      "fields": [
        { "name": "Name", "type": "string" },
        { "name": "Weight", "type": "int" }
      ]
    },
    {
      "name": "Demo.Calc",
      "attributes": [{ "type": "Demo.Tag", "fields": { "Name": "calc", "Weight": 3 } }],
      "fields": [
        { "name": "total", "type": "int" },
        { "name": "label", "type": "string", "default": "calc" },
        { "name": "instances", "type": "int", "static": true, "default": 40 }
      ],
      "properties": [
        { "name": "Total", "type": "int", "get": { "field": "total" }, "set": { "field": "total" } },
        { "name": "Doubled", "type": "int", "get": "return this.total * 2;" },
        { "name": "Label", "type": "string", "get": "return this.label;", "set": "this.label = value.toUpperCase();" },
        { "name": "Instances", "type": "int", "static": true, "get": { "field": "instances" } }
      ],
      "constructors": [
        {},
        { "params": [{ "name": "start", "type": "int" }], "body": "this.total = start;" }
      ],
      "methods": [
        { "name": "IntTest", "params": [{ "name": "x", "type": "int" }], "returns": "int", "body": "return x * 2;" },
        { "name": "BoolTest", "params": [{ "name": "b", "type": "bool" }], "returns": "bool", "body": "return !b;" },
        { "name": "Double", "returns": "int", "body": "this.total = this.total * 2; return this.total;" },
        { "name": "Add", "params": [{ "name": "n", "type": "int" }], "body": "this.total += n;" },
        { "name": "Echo", "params": [{ "name": "s", "type": "string" }], "returns": "string", "body": "return s + '!';" },
        { "name": "OverloadTest", "params": [{ "name": "v", "type": "int" }], "returns": "int", "body": "return 1;" },
        { "name": "OverloadTest", "params": [{ "name": "v", "type": "double" }], "returns": "int", "body": "return 2;" },
        { "name": "Fail", "body": "throw new Error('boom');" },
        { "name": "Nothing", "returns": "int" },
        { "name": "Twice", "static": true, "params": [{ "name": "x", "type": "int" }], "returns": "int", "body": "return x * 2;" },
        { "name": "Bump", "static": true, "body": "this.instances += 1;" },
        { "name": "Wide", "static": true, "params": [{ "name": "x", "type": "long" }], "returns": "long", "body": "return x;" },
        { "name": "WideUnsigned", "static": true, "params": [{ "name": "x", "type": "ulong" }], "returns": "ulong", "body": "return x - 1n;" }
      ]
    },
    { "name": "Demo.Other" },
    {
      "name": "Demo.Picker",
      "methods": [
        { "name": "Take", "static": true, "params": [{ "name": "c", "type": "Demo.Calc" }], "returns": "int", "body": "return 1;" },
        { "name": "Take", "static": true, "params": [{ "name": "o", "type": "Demo.Other" }], "returns": "int", "body": "return 2;" }
      ]
    },
    {
      "name": "Demo.Base",
      "fields": [{ "name": "tag", "type": "int" }],
      "constructors": [{ "params": [{ "name": "tag", "type": "int" }], "body": "this.tag = tag;" }],
      "methods": [{ "name": "Describe", "returns": "int", "body": "return this.tag + 100;" }]
    },
    { "name": "Demo.Derived", "base": "Demo.Base" },
    {
      "name": "Demo.Native",
      "fields": [{ "name": "factor", "type": "int", "default": 3 }],
      "internal_calls": [
        { "name": "Add", "params": ["int", "int"], "returns": "int" },
        { "name": "Scale", "params": ["Demo.Native", "int"], "returns": "int" },
        { "name": "Hold", "returns": "int" },
        { "name": "Inspect", "params": ["Demo.Pair"], "returns": "int" }
      ],
      "methods": [
        { "name": "Sum", "static": true, "params": [{ "name": "a", "type": "int" }, { "name": "b", "type": "int" }],
          "returns": "int", "body": "return __icall('Demo.Native+Add', a, b);" },
        { "name": "Scale", "params": [{ "name": "x", "type": "int" }], "returns": "int", "internal_call": "Scale" },
        { "name": "Hold", "static": true, "returns": "int", "internal_call": "Hold" },
        { "name": "InspectPair", "static": true, "params": [{ "name": "o", "type": "Demo.Native" }],
          "returns": "int", "body": "return __icall('Demo.Native+Inspect', { owner: o, n: 3 });" }
      ]
    },
    {
      "name": "Demo.Pair",
      "kind": "struct",
      "fields": [{ "name": "owner", "type": "Demo.Native" }, { "name": "n", "type": "int" }]
    },
    {
      "name": "Demo.Tracked",
      "internal_calls": [{ "name": "Finalized" }],
      "methods": [{ "name": "Finalize", "body": "__icall('Demo.Tracked+Finalized');" }]
    }
  ]
}"#;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn bridge_with(settings: BridgeSettings) -> (Bridge, DomainId) {
    init_tracing();
    let bridge = Bridge::new(settings);
    let domain = bridge.create_domain("test", &[]).unwrap();
    bridge.load_module_from_memory(domain, DEMO.as_bytes()).unwrap();
    (bridge, domain)
}

fn demo() -> (Bridge, DomainId) {
    bridge_with(BridgeSettings::default())
}

fn ty(bridge: &Bridge, domain: DomainId, name: &str) -> TypeId {
    bridge.type_id(domain, name).unwrap()
}

#[test]
fn primitive_round_trips_through_script_bodies() {
    let (bridge, domain) = demo();
    let calc = ty(&bridge, domain, "Demo.Calc");
    let obj = bridge.create_object(calc, false, &[]).unwrap();

    assert_eq!(
        bridge.invoke_with_result(obj, "IntTest", &[NativeValue::Int(10)]).unwrap(),
        NativeValue::Int(20)
    );
    assert_eq!(
        bridge.invoke_with_result(obj, "BoolTest", &[NativeValue::Bool(true)]).unwrap(),
        NativeValue::Bool(false)
    );
    assert_eq!(
        bridge
            .invoke_with_result(obj, "Echo", &[NativeValue::String("hi".into())])
            .unwrap(),
        NativeValue::String("hi!".into())
    );

    for value in [i64::MAX, i64::MIN, 9_007_199_254_740_993] {
        assert_eq!(
            bridge.invoke_static_with_result(calc, "Wide", &[NativeValue::Long(value)]).unwrap(),
            NativeValue::Long(value)
        );
    }
    assert_eq!(
        bridge
            .invoke_static_with_result(calc, "WideUnsigned", &[NativeValue::ULong(u64::MAX)])
            .unwrap(),
        NativeValue::ULong(u64::MAX - 1)
    );
    assert!(matches!(
        bridge.invoke_static_with_result(calc, "WideUnsigned", &[NativeValue::ULong(0)]),
        Err(BridgeError::MarshalFailure(_))
    ));
}

#[test]
fn constructor_arguments_reach_the_instance() {
    let (bridge, domain) = demo();
    let calc = ty(&bridge, domain, "Demo.Calc");
    let obj = bridge.create_object(calc, false, &[NativeValue::Int(4)]).unwrap();

    assert_eq!(bridge.invoke_with_result(obj, "Double", &[]).unwrap(), NativeValue::Int(8));
    bridge.invoke(obj, "Add", &[NativeValue::Int(2)]).unwrap();
    assert_eq!(bridge.get_field(obj, "total").unwrap(), NativeValue::Int(10));

    let ctor = bridge.resolve_constructor(calc, &[ValueKind::Int]).unwrap().unwrap();
    assert_eq!(bridge.method_parameter_names(ctor).unwrap(), vec!["start".to_string()]);
    assert!(bridge.resolve_constructor(calc, &[ValueKind::String]).is_err());
}

#[test]
fn bodiless_members_return_the_zero_value() {
    let (bridge, domain) = demo();
    let obj = bridge.create_object(ty(&bridge, domain, "Demo.Calc"), false, &[]).unwrap();
    assert_eq!(bridge.invoke_with_result(obj, "Nothing", &[]).unwrap(), NativeValue::Int(0));
}

#[test]
fn handles_copy_and_compare_by_identity() {
    let (bridge, domain) = demo();
    let calc = ty(&bridge, domain, "Demo.Calc");
    let a = bridge.create_object(calc, false, &[]).unwrap();
    let b = bridge.create_object(calc, false, &[]).unwrap();
    let copy = bridge.copy_object(a).unwrap();

    assert_ne!(a, copy);
    assert!(bridge.same_object(a, copy).unwrap());
    assert!(!bridge.same_object(a, b).unwrap());
    assert_eq!(bridge.handle_kind(copy), Some(HandleKind::Strong));
    assert_eq!(bridge.object_type_id(copy).unwrap(), calc);

    bridge.destroy_object(a).unwrap();
    assert!(bridge.get_field(a, "total").is_err());
    assert_eq!(bridge.get_field(copy, "label").unwrap(), NativeValue::String("calc".into()));
    assert!(bridge.destroy_object(a).is_err());
    assert!(bridge.invoke(ObjectHandle::NULL, "Double", &[]).is_err());
}

#[test]
fn type_ids_are_stable() {
    let (bridge, domain) = demo();
    let first = ty(&bridge, domain, "Demo.Calc");
    assert_eq!(ty(&bridge, domain, "Demo.Calc"), first);
    assert_eq!(ty(&bridge, domain, "Demo.Calc, Demo"), first);
    assert_eq!(bridge.full_name(first).unwrap(), "Demo.Calc");
    assert_eq!(bridge.assembly_qualified_name(first).unwrap(), "Demo.Calc, Demo");

    let module = bridge.module_by_name(domain, "Demo").unwrap();
    assert_eq!(bridge.module_name(domain, module).unwrap(), "Demo");
    let types = bridge.module_types(domain, module).unwrap();
    assert_eq!(types.len(), 9);
    assert_eq!(types[1], first);

    let int = ty(&bridge, domain, "int");
    assert_eq!(int, ty(&bridge, domain, "System.Int32"));
    assert_eq!(bridge.managed_type(int).unwrap(), ValueKind::Int);
    assert_eq!(bridge.size(int).unwrap(), 4);
}

#[test]
fn type_queries_follow_the_hierarchy() {
    let (bridge, domain) = demo();
    let base = ty(&bridge, domain, "Demo.Base");
    let derived = ty(&bridge, domain, "Demo.Derived");
    let object = ty(&bridge, domain, "System.Object");

    assert_eq!(bridge.base_type(derived).unwrap(), Some(base));
    assert!(bridge.is_subclass_of(derived, base).unwrap());
    assert!(!bridge.is_subclass_of(base, derived).unwrap());
    assert!(bridge.is_assignable_to(derived, object).unwrap());
    assert!(bridge.is_assignable_from(base, derived).unwrap());

    let array = ty(&bridge, domain, "Demo.Calc[]");
    assert!(bridge.is_sz_array(array).unwrap());
    assert_eq!(bridge.element_type(array).unwrap(), ty(&bridge, domain, "Demo.Calc"));
}

#[test]
fn member_metadata_is_reported() {
    let (bridge, domain) = demo();
    let calc = ty(&bridge, domain, "Demo.Calc");

    let twice = bridge.resolve_method(calc, "Twice", &[ValueKind::Int], true).unwrap();
    assert_eq!(bridge.method_name(twice).unwrap(), "Twice");
    assert_eq!(bridge.method_signature(twice).unwrap(), "Int32 Twice(Int32)");
    assert!(bridge.method_is_static(twice).unwrap());
    assert_eq!(bridge.method_declaring_type(twice).unwrap(), calc);
    assert_eq!(bridge.method_accessibility(twice).unwrap(), Accessibility::Public);
    assert_eq!(
        bridge.method_parameter_types(twice).unwrap(),
        vec![ty(&bridge, domain, "int")]
    );
    assert_eq!(bridge.method_return_type(twice).unwrap(), ty(&bridge, domain, "int"));

    let fields = bridge.fields(calc).unwrap();
    let names: Vec<String> = fields.iter().map(|f| bridge.field_name(*f).unwrap()).collect();
    assert_eq!(names, ["total", "label", "instances"]);
    assert!(bridge.field_is_static(fields[2]).unwrap());
    assert_eq!(bridge.field_type(fields[1]).unwrap(), ty(&bridge, domain, "string"));

    let properties = bridge.properties(calc).unwrap();
    assert_eq!(properties.len(), 4);
    let doubled = properties[1];
    assert_eq!(bridge.property_name(doubled).unwrap(), "Doubled");
    assert!(bridge.property_can_read(doubled).unwrap());
    assert!(!bridge.property_can_write(doubled).unwrap());
    assert!(bridge.property_is_computed(doubled).unwrap());
    assert!(!bridge.property_is_computed(properties[0]).unwrap());

    assert_eq!(bridge.constructors(calc).unwrap().len(), 2);
    assert!(bridge.methods(calc).unwrap().len() >= 11);
}

#[test]
fn attributes_expose_their_values() {
    let (bridge, domain) = demo();
    let calc = ty(&bridge, domain, "Demo.Calc");
    let tag = ty(&bridge, domain, "Demo.Tag");

    assert!(bridge.has_attribute(calc, tag).unwrap());
    assert!(!bridge.has_attribute(tag, tag).unwrap());

    let attributes = bridge.attributes(calc).unwrap();
    assert_eq!(attributes.len(), 1);
    assert_eq!(bridge.attribute_type(attributes[0]).unwrap(), tag);
    assert_eq!(
        bridge.attribute_field_value(attributes[0], "Name").unwrap(),
        NativeValue::String("calc".into())
    );
    assert_eq!(
        bridge.attribute_field_value(attributes[0], "Weight").unwrap(),
        NativeValue::Int(3)
    );
    assert!(bridge.attribute_field_value(attributes[0], "Missing").is_err());
}

#[test]
fn fields_and_properties_read_and_write() {
    let (bridge, domain) = demo();
    let obj = bridge.create_object(ty(&bridge, domain, "Demo.Calc"), false, &[]).unwrap();

    bridge.set_field(obj, "total", NativeValue::Int(21)).unwrap();
    assert_eq!(bridge.get_property(obj, "Total").unwrap(), NativeValue::Int(21));
    assert_eq!(bridge.get_property(obj, "Doubled").unwrap(), NativeValue::Int(42));

    bridge.set_property(obj, "Total", NativeValue::Int(5)).unwrap();
    assert_eq!(bridge.get_field(obj, "total").unwrap(), NativeValue::Int(5));

    bridge.set_property(obj, "Label", NativeValue::String("shout".into())).unwrap();
    assert_eq!(bridge.get_field(obj, "label").unwrap(), NativeValue::String("SHOUT".into()));

    let err = bridge.set_property(obj, "Doubled", NativeValue::Int(1)).unwrap_err();
    assert!(matches!(err, BridgeError::InvalidArgument(_)));
    assert!(bridge.get_field(obj, "missing").unwrap_err().is_not_found());
    assert!(bridge.set_field(obj, "total", NativeValue::String("x".into())).is_err());
}

#[test]
fn concurrent_bodies_keep_every_field_store() {
    let (bridge, domain) = demo();
    let calc = ty(&bridge, domain, "Demo.Calc");
    let obj = bridge.create_object(calc, false, &[]).unwrap();
    std::thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                for _ in 0..25 {
                    bridge.invoke(obj, "Add", &[NativeValue::Int(1)]).unwrap();
                }
            });
        }
    });
    assert_eq!(bridge.get_field(obj, "total").unwrap(), NativeValue::Int(100));
}

#[test]
fn static_members_share_per_domain_state() {
    let (bridge, domain) = demo();
    let calc = ty(&bridge, domain, "Demo.Calc");

    assert_eq!(bridge.get_static_field(calc, "instances").unwrap(), NativeValue::Int(40));
    bridge.invoke_static(calc, "Bump", &[]).unwrap();
    bridge.invoke_static(calc, "Bump", &[]).unwrap();
    assert_eq!(bridge.get_static_property(calc, "Instances").unwrap(), NativeValue::Int(42));

    bridge.set_static_field(calc, "instances", NativeValue::Int(1)).unwrap();
    assert_eq!(bridge.get_static_field(calc, "instances").unwrap(), NativeValue::Int(1));
    assert_eq!(
        bridge.invoke_static_with_result(calc, "Twice", &[NativeValue::Int(8)]).unwrap(),
        NativeValue::Int(16)
    );
    assert!(bridge.get_static_field(calc, "total").is_err());
}

#[test]
fn domains_are_isolated() {
    let (bridge, first) = demo();
    let second = bridge.create_domain("second", &[]).unwrap();
    bridge.load_module_from_memory(second, DEMO.as_bytes()).unwrap();

    let a = ty(&bridge, first, "Demo.Calc");
    let b = ty(&bridge, second, "Demo.Calc");
    assert_ne!(a, b);

    bridge.set_static_field(a, "instances", NativeValue::Int(7)).unwrap();
    assert_eq!(bridge.get_static_field(b, "instances").unwrap(), NativeValue::Int(40));

    let picker = ty(&bridge, second, "Demo.Picker");
    let foreign = bridge.create_object(a, false, &[]).unwrap();
    let take = bridge.resolve_method(picker, "Int32 Take(Demo.Calc)", &[], true).unwrap();
    assert!(bridge.invoke_method(take, None, &[NativeValue::Handle(foreign)]).is_err());
    assert_eq!(bridge.domains(), vec![first, second]);
}

#[test]
fn unloading_invalidates_handles_and_ids() {
    let (bridge, domain) = demo();
    let calc = ty(&bridge, domain, "Demo.Calc");
    let obj = bridge.create_object(calc, false, &[]).unwrap();
    let twice = bridge.resolve_method(calc, "Twice", &[ValueKind::Int], true).unwrap();
    assert!(bridge.catalog().cached_resolutions() > 0);

    bridge.unload_domain(domain).unwrap();

    assert_eq!(bridge.domain_state(domain), DomainState::Gone);
    assert!(bridge.domains().is_empty());
    assert!(bridge.get_field(obj, "total").is_err());
    assert_eq!(bridge.handle_kind(obj), None);
    assert!(bridge.full_name(calc).unwrap_err().is_not_found());
    assert!(bridge.method_name(twice).unwrap_err().is_not_found());
    assert!(matches!(
        bridge.type_id(domain, "Demo.Calc").unwrap_err(),
        BridgeError::DomainInvalid(_)
    ));
    assert!(matches!(bridge.unload_domain(domain), Err(BridgeError::DomainInvalid(_))));
    assert_eq!(bridge.objects().live(), 0);

    // Resident types outlive every domain.
    let other = bridge.create_domain("after", &[]).unwrap();
    assert_eq!(bridge.full_name(ty(&bridge, other, "int")).unwrap(), "System.Int32");
}

#[test]
fn unload_waits_for_calls_in_flight() {
    let settings = BridgeSettings {
        unload_timeout_ms: 20,
        ..BridgeSettings::default()
    };
    let (bridge, domain) = bridge_with(settings);
    let outcome = Arc::new(Mutex::new(None));
    let inside = bridge.clone();
    let seen = Arc::clone(&outcome);
    bridge
        .register_internal_calls(
            domain,
            [InternalCallEntry::rust("Demo.Native+Hold", move |_| {
                *seen.lock() = Some(inside.unload_domain(domain));
                Ok(NativeValue::Int(1))
            })],
        )
        .unwrap();

    let native = ty(&bridge, domain, "Demo.Native");
    assert_eq!(
        bridge.invoke_static_with_result(native, "Hold", &[]).unwrap(),
        NativeValue::Int(1)
    );
    assert!(matches!(
        outcome.lock().take(),
        Some(Err(BridgeError::DomainBusy(_)))
    ));
    assert_eq!(bridge.domain_state(domain), DomainState::Populated);
    bridge.unload_domain(domain).unwrap();
}

#[test]
fn overloads_resolve_deterministically() {
    let (bridge, domain) = demo();
    let calc = ty(&bridge, domain, "Demo.Calc");
    let obj = bridge.create_object(calc, false, &[]).unwrap();

    let by_int = bridge.resolve_method(calc, "OverloadTest", &[ValueKind::Int], false).unwrap();
    assert_eq!(
        bridge.resolve_method(calc, "OverloadTest", &[ValueKind::Int], false).unwrap(),
        by_int
    );
    let by_double = bridge
        .resolve_method(calc, "OverloadTest", &[ValueKind::Double], false)
        .unwrap();
    assert_ne!(by_int, by_double);
    let by_signature = bridge
        .resolve_method(calc, "Int32 OverloadTest(Double)", &[], false)
        .unwrap();
    assert_eq!(by_signature, by_double);

    assert_eq!(
        bridge.invoke_with_result(obj, "OverloadTest", &[NativeValue::Int(0)]).unwrap(),
        NativeValue::Int(1)
    );
    assert_eq!(
        bridge.invoke_with_result(obj, "OverloadTest", &[NativeValue::Double(0.0)]).unwrap(),
        NativeValue::Int(2)
    );
    assert_eq!(
        bridge.invoke_method(by_double, Some(obj), &[NativeValue::Double(1.5)]).unwrap(),
        NativeValue::Int(2)
    );
    assert!(bridge.invoke_method(by_int, None, &[NativeValue::Int(0)]).is_err());
    assert!(bridge
        .resolve_method(calc, "OverloadTest", &[ValueKind::Long], false)
        .unwrap_err()
        .is_not_found());
}

#[test]
fn strict_policy_rejects_ambiguous_reference_overloads() {
    let (bridge, domain) = demo();
    let picker = ty(&bridge, domain, "Demo.Picker");
    let err = bridge
        .resolve_method(picker, "Take", &[ValueKind::Pointer], true)
        .unwrap_err();
    match err {
        BridgeError::OverloadAmbiguous { candidates, .. } => assert_eq!(candidates.len(), 2),
        other => panic!("unexpected {other:?}"),
    }

    let calc = bridge.create_object(ty(&bridge, domain, "Demo.Calc"), false, &[]).unwrap();
    let exact = bridge.resolve_method(picker, "Int32 Take(Demo.Other)", &[], true).unwrap();
    let other = bridge.create_object(ty(&bridge, domain, "Demo.Other"), false, &[]).unwrap();
    assert_eq!(
        bridge.invoke_method(exact, None, &[NativeValue::Handle(other)]).unwrap(),
        NativeValue::Int(2)
    );
    assert!(bridge.invoke_method(exact, None, &[NativeValue::Handle(calc)]).is_err());
}

#[test]
fn first_match_policy_takes_declaration_order() {
    let settings = BridgeSettings {
        overload_policy: OverloadPolicy::FirstMatch,
        ..BridgeSettings::default()
    };
    let (bridge, domain) = bridge_with(settings);
    let picker = ty(&bridge, domain, "Demo.Picker");
    let take = bridge.resolve_method(picker, "Take", &[ValueKind::Pointer], true).unwrap();
    assert_eq!(bridge.method_signature(take).unwrap(), "Int32 Take(Demo.Calc)");
}

#[test]
fn base_constructors_and_methods_are_inherited() {
    let (bridge, domain) = demo();
    let derived = ty(&bridge, domain, "Demo.Derived");
    let obj = bridge.create_object(derived, false, &[NativeValue::Int(7)]).unwrap();

    assert_eq!(bridge.get_field(obj, "tag").unwrap(), NativeValue::Int(7));
    assert_eq!(bridge.invoke_with_result(obj, "Describe", &[]).unwrap(), NativeValue::Int(107));
    assert!(bridge
        .create_object(derived, false, &[NativeValue::String("x".into())])
        .is_err());

    // Declaring no constructor gives the implicit parameterless one.
    let bare = bridge.create_object(derived, false, &[]).unwrap();
    assert_eq!(bridge.get_field(bare, "tag").unwrap(), NativeValue::Int(0));
    assert_eq!(bridge.resolve_constructor(derived, &[]).unwrap(), None);

    let ctor = bridge.resolve_constructor(derived, &[ValueKind::Int]).unwrap().unwrap();
    assert_eq!(bridge.method_declaring_type(ctor).unwrap(), ty(&bridge, domain, "Demo.Base"));
}

#[test]
fn script_exceptions_reach_the_exception_callback() {
    let (bridge, domain) = demo();
    let seen = Arc::new(Mutex::new(Vec::<String>::new()));
    let sink = Arc::clone(&seen);
    bridge
        .diagnostics()
        .set_exception_callback(Some(Arc::new(move |text: &str| sink.lock().push(text.to_string()))));

    let obj = bridge.create_object(ty(&bridge, domain, "Demo.Calc"), false, &[]).unwrap();
    let err = bridge.invoke(obj, "Fail", &[]).unwrap_err();
    assert!(matches!(err, BridgeError::RuntimeException(_)));
    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].contains("boom"));
}

#[test]
fn failures_reach_the_message_callback() {
    let (bridge, domain) = demo();
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    bridge.diagnostics().set_message_callback(Some(Arc::new(move |_: &str, level: MessageLevel| {
        assert_eq!(level, MessageLevel::Error);
        counter.fetch_add(1, Ordering::SeqCst);
    })));

    assert!(bridge.type_id(domain, "Demo.Missing").is_err());
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[test]
fn missing_module_files_report_their_status() {
    let dir = tempfile::tempdir().unwrap();
    let (bridge, domain) = demo();

    let err = bridge.load_module(domain, dir.path().join("Absent.json")).unwrap_err();
    assert_eq!(err.load_status(), ModuleLoadStatus::FileNotFound);
    assert!(bridge.type_id(domain, "Absent.Thing").unwrap_err().is_not_found());

    let broken = dir.path().join("Broken.json");
    std::fs::write(&broken, "{ not json").unwrap();
    let err = bridge.load_module(domain, &broken).unwrap_err();
    assert_eq!(err.load_status(), ModuleLoadStatus::InvalidModule);
}

#[test]
fn modules_load_from_files_and_references_resolve() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("Demo.json"), DEMO).unwrap();
    let game = r#"{ "name": "Game", "references": ["Demo"], "types": [{
        "name": "Game.Player", "base": "Demo.Calc, Demo",
        "methods": [{ "name": "Score", "returns": "int", "body": "return this.total + 1;" }] }] }"#;
    let game_path = dir.path().join("Game.json");
    std::fs::write(&game_path, game).unwrap();

    init_tracing();
    let bridge = Bridge::default();
    let domain = bridge.create_domain("files", &[dir.path().to_path_buf()]).unwrap();
    bridge.load_module(domain, &game_path).unwrap();

    assert!(bridge.module_by_name(domain, "Demo").is_ok());
    let player = ty(&bridge, domain, "Game.Player");
    let obj = bridge.create_object(player, false, &[NativeValue::Int(9)]).unwrap();
    assert_eq!(bridge.invoke_with_result(obj, "Score", &[]).unwrap(), NativeValue::Int(10));
    assert!(bridge
        .is_subclass_of(player, ty(&bridge, domain, "Demo.Calc"))
        .unwrap());
}

#[test]
fn weak_objects_are_collected_and_finalized() {
    let (bridge, domain) = demo();
    let finalized = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&finalized);
    let bound = bridge
        .register_internal_calls(
            domain,
            [InternalCallEntry::rust("Demo.Tracked+Finalized", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(NativeValue::Null)
            })],
        )
        .unwrap();
    assert_eq!(bound, 1);

    let tracked = ty(&bridge, domain, "Demo.Tracked");
    let kept = bridge.create_object(tracked, true, &[]).unwrap();
    let held = bridge.copy_object(kept).unwrap();
    let dropped = bridge.create_object(tracked, true, &[]).unwrap();
    assert_eq!(bridge.handle_kind(dropped), Some(HandleKind::Weak));

    let report = bridge.collect_garbage(-1, CollectionMode::Forced, true, false);
    assert_eq!(report.collected, 1);
    assert_eq!(report.queued_finalizers, 1);
    assert_eq!(report.promoted, 1);
    assert!(bridge.get_field(dropped, "missing").is_err());
    assert!(bridge.same_object(kept, held).unwrap());

    assert_eq!(finalized.load(Ordering::SeqCst), 0);
    assert_eq!(bridge.wait_for_pending_finalizers(), 1);
    assert_eq!(finalized.load(Ordering::SeqCst), 1);
    assert_eq!(bridge.wait_for_pending_finalizers(), 0);
}

#[test]
fn optimized_collections_skip_small_nurseries() {
    let (bridge, domain) = demo();
    let calc = ty(&bridge, domain, "Demo.Calc");
    bridge.create_object(calc, true, &[]).unwrap();
    let report = bridge.collect_garbage(0, CollectionMode::Optimized, false, false);
    assert_eq!(report.collected, 0);
    let report = bridge.collect_garbage(0, CollectionMode::Default, false, false);
    assert_eq!(report.collected, 1);
    assert_eq!(report.queued_finalizers, 0);
}

#[test]
fn rust_internal_calls_serve_scripts_and_methods() {
    let (bridge, domain) = demo();
    let inside = bridge.clone();
    let bound = bridge
        .register_internal_calls(
            domain,
            [
                InternalCallEntry::rust("Demo.Native+Add", |args| match args {
                    [NativeValue::Int(a), NativeValue::Int(b)] => Ok(NativeValue::Int(a + b)),
                    _ => Err(BridgeError::InvalidArgument("Add takes two ints".into())),
                }),
                InternalCallEntry::rust("Demo.Native+Scale, Demo", move |args| {
                    let [NativeValue::Handle(this), NativeValue::Int(x)] = args else {
                        return Err(BridgeError::InvalidArgument("Scale(this, int)".into()));
                    };
                    let NativeValue::Int(factor) = inside.get_field(*this, "factor")? else {
                        return Err(BridgeError::MarshalFailure("factor is an int".into()));
                    };
                    Ok(NativeValue::Int(factor * x))
                }),
                InternalCallEntry::rust("Demo.Native+Unknown", |_| Ok(NativeValue::Null)),
            ],
        )
        .unwrap();
    assert_eq!(bound, 2);

    let native = ty(&bridge, domain, "Demo.Native");
    assert_eq!(
        bridge
            .invoke_static_with_result(native, "Sum", &[NativeValue::Int(2), NativeValue::Int(3)])
            .unwrap(),
        NativeValue::Int(5)
    );

    let live_before = bridge.objects().live();
    let obj = bridge.create_object(native, false, &[]).unwrap();
    assert_eq!(
        bridge.invoke_with_result(obj, "Scale", &[NativeValue::Int(5)]).unwrap(),
        NativeValue::Int(15)
    );
    // The argument handle minted for the call is gone again.
    assert_eq!(bridge.objects().live(), live_before + 1);
}

#[test]
fn struct_arguments_release_their_embedded_handles() {
    let (bridge, domain) = demo();
    let inside = bridge.clone();
    bridge
        .register_internal_calls(
            domain,
            [InternalCallEntry::rust("Demo.Native+Inspect", move |args| {
                let [NativeValue::Struct(bytes)] = args else {
                    return Err(BridgeError::InvalidArgument("Inspect(Pair)".into()));
                };
                let mut bits = [0u8; 8];
                bits.copy_from_slice(&bytes[..8]);
                inside.get_field(ObjectHandle::from_bits(u64::from_ne_bytes(bits)), "factor")
            })],
        )
        .unwrap();

    let native = ty(&bridge, domain, "Demo.Native");
    let obj = bridge.create_object(native, false, &[]).unwrap();
    let live = bridge.objects().live();
    assert_eq!(
        bridge
            .invoke_static_with_result(native, "InspectPair", &[NativeValue::Handle(obj)])
            .unwrap(),
        NativeValue::Int(3)
    );
    assert_eq!(bridge.objects().live(), live);
}

#[test]
fn unbound_internal_calls_fail_cleanly() {
    let (bridge, domain) = demo();
    let native = ty(&bridge, domain, "Demo.Native");
    let err = bridge
        .invoke_static_with_result(native, "Sum", &[NativeValue::Int(1), NativeValue::Int(1)])
        .unwrap_err();
    assert!(matches!(err, BridgeError::RuntimeException(_)));
    assert!(bridge.invoke_static(native, "Hold", &[]).unwrap_err().is_not_found());
}

unsafe extern "C" fn add_thunk(args: *const *const c_void, count: i32, result: *mut c_void) {
    assert_eq!(count, 2);
    let a = *(*args as *const i32);
    let b = *(*args.add(1) as *const i32);
    *(result as *mut i32) = a + b;
}

#[test]
fn native_thunks_receive_wire_arguments() {
    let (bridge, domain) = demo();
    bridge
        .register_internal_calls(domain, [InternalCallEntry::native("Demo.Native+Add", add_thunk)])
        .unwrap();
    let native = ty(&bridge, domain, "Demo.Native");
    assert_eq!(
        bridge
            .invoke_static_with_result(native, "Sum", &[NativeValue::Int(40), NativeValue::Int(2)])
            .unwrap(),
        NativeValue::Int(42)
    );
}

#[test]
#[allow(deprecated)]
fn global_type_lookup_is_opt_in() {
    let (bridge, _) = demo();
    assert!(matches!(
        bridge.type_id_global("Demo.Calc"),
        Err(BridgeError::InvalidArgument(_))
    ));

    let settings = BridgeSettings {
        allow_global_type_lookup: true,
        ..BridgeSettings::default()
    };
    let (bridge, domain) = bridge_with(settings);
    assert_eq!(
        bridge.type_id_global("Demo.Calc").unwrap(),
        ty(&bridge, domain, "Demo.Calc")
    );
    assert_eq!(
        bridge.type_id_global("System.String").unwrap(),
        ty(&bridge, domain, "string")
    );
    assert!(bridge.type_id_global("Demo.Nope").unwrap_err().is_not_found());
}

#[test]
fn resolutions_are_memoised_per_member_class() {
    let (bridge, domain) = demo();
    let calc = ty(&bridge, domain, "Demo.Calc");
    let before = bridge.catalog().cached_resolutions();
    bridge.resolve_method(calc, "Twice", &[ValueKind::Int], true).unwrap();
    bridge.resolve_method(calc, "Twice", &[ValueKind::Int], true).unwrap();
    assert_eq!(bridge.catalog().cached_resolutions(), before + 1);
    assert!(bridge
        .resolve_method(calc, "Twice", &[ValueKind::Int], false)
        .unwrap_err()
        .is_not_found());
}
