//! Test suite for the interop module

use super::*;
use crate::config::{BridgeConfig, OverflowPolicy};
use crate::errors::{ErrorCategory, Result};
use crate::ffi::memory;
use crate::introspection::{
    ArrayKind, CallableDescriptor, CallbackScope, EnumInfo, InterfaceInfo, ObjectInfo,
    ParamDescriptor, Repository, StructInfo, StructKind, Transfer, TypeDescriptor,
};
use crate::runtime::{Runtime, ScriptFunction, Value};
use core::ffi::{c_char, c_void};
use std::cell::{Cell, RefCell};
use std::ffi::CStr;
use std::rc::Rc;

// Test helpers
fn runtime() -> Runtime {
    Runtime::new(Rc::new(Repository::new()))
}

fn strict_runtime() -> Runtime {
    let mut config = BridgeConfig::default();
    config.marshal.numeric_overflow = OverflowPolicy::Error;
    Runtime::with_config(Rc::new(Repository::new()), config)
}

fn convert(rt: &Runtime, value: Value, ty: &TypeDescriptor) -> Result<RawCell> {
    let mut scope = NativeScope::new();
    to_native(rt, &value, ty, &mut scope)
}

fn recorder(name: &str, seen: Rc<RefCell<Vec<Value>>>, result: Value) -> ScriptFunction {
    ScriptFunction::new(name, move |args| {
        seen.borrow_mut().extend(args.iter().cloned());
        Ok(result.clone())
    })
}

fn c_str(cell: RawCell) -> String {
    unsafe { CStr::from_ptr(cell.ptr as *const c_char) }
        .to_string_lossy()
        .into_owned()
}

// ============================================================================
// Raw cells
// ============================================================================

#[test]
fn test_raw_cell_layout() {
    assert_eq!(core::mem::size_of::<RawCell>(), 8);
    assert!(RawCell::zeroed().is_null());
    assert!(RawCell::default().is_null());

    let marker = 0x1234usize as *mut c_void;
    assert_eq!(RawCell::from_ptr(marker).as_ptr(), marker);
}

#[test]
fn test_abi_kind_mapping() {
    let enum_ty = TypeDescriptor::Interface(InterfaceInfo::Enum(Rc::new(EnumInfo::new("T", "E"))));
    let flags_ty = TypeDescriptor::Interface(InterfaceInfo::Flags(Rc::new(EnumInfo::new("T", "F"))));

    assert_eq!(abi_kind(&TypeDescriptor::Boolean), AbiKind::I32);
    assert_eq!(abi_kind(&TypeDescriptor::GType), AbiKind::USize);
    assert_eq!(abi_kind(&TypeDescriptor::Utf8), AbiKind::Pointer);
    assert_eq!(abi_kind(&enum_ty), AbiKind::I32);
    assert_eq!(abi_kind(&flags_ty), AbiKind::U32);
    assert_eq!(abi_kind(&TypeDescriptor::Void).size(), 0);
    assert_eq!(AbiKind::I16.integer_layout(), Some((16, true)));
    assert_eq!(AbiKind::F64.integer_layout(), None);
}

#[test]
fn test_widen_and_narrow_return() {
    let cell = RawCell { i8: -1 }.widen_return(&TypeDescriptor::Int8);
    unsafe {
        assert_eq!(cell.i64, -1);
    }
    let back = cell.narrow_return(&TypeDescriptor::Int8);
    unsafe {
        assert_eq!(back.i8, -1);
    }

    let wide = RawCell { u16: 0xffff }.widen_return(&TypeDescriptor::UInt16);
    unsafe {
        assert_eq!(wide.u64, 0xffff);
    }
}

// ============================================================================
// Scalars
// ============================================================================

#[test]
fn test_to_native_scalars() {
    let rt = runtime();
    unsafe {
        assert_eq!(convert(&rt, Value::from(42), &TypeDescriptor::Int32).unwrap().i32, 42);
        assert_eq!(convert(&rt, Value::from(true), &TypeDescriptor::Int32).unwrap().i32, 1);
        assert_eq!(convert(&rt, Value::from("42"), &TypeDescriptor::Int64).unwrap().i64, 42);
        assert_eq!(convert(&rt, Value::Null, &TypeDescriptor::UInt16).unwrap().u16, 0);
        assert_eq!(convert(&rt, Value::from(2.5), &TypeDescriptor::Double).unwrap().f64, 2.5);
        assert_eq!(convert(&rt, Value::from(1.5), &TypeDescriptor::Float).unwrap().f32, 1.5);
        assert_eq!(convert(&rt, Value::from(7), &TypeDescriptor::GType).unwrap().usize, 7);
    }
}

#[test]
fn test_boolean_truthiness() {
    let rt = runtime();
    let truthy = |value: Value| unsafe { convert(&rt, value, &TypeDescriptor::Boolean).unwrap().boolean };
    assert_eq!(truthy(Value::from("x")), 1);
    assert_eq!(truthy(Value::from("")), 0);
    assert_eq!(truthy(Value::from(0)), 0);
    assert_eq!(truthy(Value::Number(f64::NAN)), 0);
    assert_eq!(truthy(Value::array(Vec::new())), 1);
    assert_eq!(truthy(Value::Undefined), 0);
}

#[test]
fn test_truncate_policy_wraps() {
    let rt = runtime();
    unsafe {
        assert_eq!(convert(&rt, Value::from(300), &TypeDescriptor::UInt8).unwrap().u8, 44);
        assert_eq!(convert(&rt, Value::from(-1), &TypeDescriptor::UInt32).unwrap().u32, u32::MAX);
        assert_eq!(convert(&rt, Value::Undefined, &TypeDescriptor::Int32).unwrap().i32, 0);
        assert_eq!(convert(&rt, Value::from(1e30), &TypeDescriptor::Int64).unwrap().i64, i64::MAX);
    }
}

#[test]
fn test_error_policy_rejects_out_of_range() {
    let rt = strict_runtime();

    let err = convert(&rt, Value::from(300), &TypeDescriptor::Int8).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::RangeError);
    assert_eq!(err.to_string(), "value 300 is out of range for type 'gint8'");

    let err = convert(&rt, Value::Undefined, &TypeDescriptor::Int32).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::RangeError);

    let err = convert(&rt, Value::from(1e300), &TypeDescriptor::Float).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::RangeError);

    unsafe {
        assert_eq!(convert(&rt, Value::from(-128), &TypeDescriptor::Int8).unwrap().i8, -128);
        assert_eq!(convert(&rt, Value::from(255), &TypeDescriptor::UInt8).unwrap().u8, 255);
    }
}

#[test]
fn test_error_policy_64_bit_boundaries() {
    let rt = strict_runtime();
    let two_63 = 2f64.powi(63);
    let two_64 = 2f64.powi(64);

    for (n, ty) in [
        (two_63, TypeDescriptor::Int64),
        (-two_63 * 2.0, TypeDescriptor::Int64),
        (two_64, TypeDescriptor::UInt64),
        (-1.0, TypeDescriptor::UInt64),
    ] {
        let err = convert(&rt, Value::from(n), &ty).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::RangeError, "{} as {}", n, ty.tag_name());
    }

    unsafe {
        assert_eq!(convert(&rt, Value::from(-two_63), &TypeDescriptor::Int64).unwrap().i64, i64::MIN);
        assert_eq!(convert(&rt, Value::from(two_63), &TypeDescriptor::UInt64).unwrap().u64, 1u64 << 63);
        // Largest f64 below 2^63
        let below = 9223372036854774784.0;
        assert_eq!(
            convert(&rt, Value::from(below), &TypeDescriptor::Int64).unwrap().i64,
            9223372036854774784
        );
    }
}

#[test]
fn test_from_native_scalars() {
    let rt = runtime();
    let back = |cell: RawCell, ty: TypeDescriptor| from_native(&rt, cell, &ty, Transfer::Nothing).unwrap();

    assert_eq!(back(RawCell { i8: -5 }, TypeDescriptor::Int8), Value::from(-5));
    assert_eq!(back(RawCell { u32: u32::MAX }, TypeDescriptor::UInt32), Value::Number(u32::MAX as f64));
    assert_eq!(back(RawCell { boolean: 2 }, TypeDescriptor::Boolean), Value::from(true));
    assert_eq!(back(RawCell { f32: 0.5 }, TypeDescriptor::Float), Value::from(0.5));
    assert_eq!(back(RawCell::zeroed(), TypeDescriptor::Void), Value::Undefined);
}

#[test]
fn test_enum_and_flags() {
    let rt = runtime();
    let info = Rc::new(EnumInfo::new("Test", "Mode").with_member("fast", 3));
    let enum_ty = TypeDescriptor::Interface(InterfaceInfo::Enum(info.clone()));
    let flags_ty = TypeDescriptor::Interface(InterfaceInfo::Flags(info.clone()));

    let cell = convert(&rt, Value::from(info.value_of("fast").unwrap() as f64), &enum_ty).unwrap();
    unsafe {
        assert_eq!(cell.i32, 3);
    }
    assert_eq!(from_native(&rt, cell, &enum_ty, Transfer::Nothing).unwrap(), Value::from(3));

    let cell = convert(&rt, Value::from(0x80000000u32 as f64), &flags_ty).unwrap();
    assert_eq!(
        from_native(&rt, cell, &flags_ty, Transfer::Nothing).unwrap(),
        Value::Number(0x80000000u32 as f64)
    );
}

// ============================================================================
// Strings and arrays
// ============================================================================

#[test]
fn test_string_owned_by_scope() {
    let rt = runtime();
    let mut scope = NativeScope::new();
    let cell = to_native(&rt, &Value::from("héllo"), &TypeDescriptor::Utf8, &mut scope).unwrap();
    assert_eq!(c_str(cell), "héllo");
    assert_eq!(scope.owned_strings(), 1);
    assert_eq!(
        from_native(&rt, cell, &TypeDescriptor::Utf8, Transfer::Nothing).unwrap(),
        Value::from("héllo")
    );
}

#[test]
fn test_string_transferred_to_callee() {
    let rt = runtime();
    let mut scope = NativeScope::new();
    let cell = to_native_with(
        &rt,
        &Value::from("given away"),
        &TypeDescriptor::Utf8,
        Transfer::Everything,
        CallbackScope::Call,
        &mut scope,
    )
    .unwrap();
    assert_eq!(scope.owned_strings(), 0);

    // Taking it back with full transfer frees the buffer
    let value = from_native(&rt, cell, &TypeDescriptor::Utf8, Transfer::Everything).unwrap();
    assert_eq!(value, Value::from("given away"));
}

#[test]
fn test_string_errors() {
    let rt = runtime();

    let err = convert(&rt, Value::from(5), &TypeDescriptor::Utf8).unwrap_err();
    assert_eq!(err.to_string(), "Expected type 'utf8' but got type 'number'");

    let err = convert(&rt, Value::from("a\0b"), &TypeDescriptor::Filename).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::ValueConversionError);
}

#[test]
fn test_null_string_reads_as_null() {
    let rt = runtime();
    let value = from_native(&rt, RawCell::null(), &TypeDescriptor::Utf8, Transfer::Everything).unwrap();
    assert_eq!(value, Value::Null);
}

#[test]
fn test_string_vector_round_trip() {
    let rt = runtime();
    let ty = TypeDescriptor::c_array(TypeDescriptor::Utf8);
    let mut scope = NativeScope::new();
    let items = Value::array(vec![Value::from("one"), Value::from("two")]);

    let cell = to_native(&rt, &items, &ty, &mut scope).unwrap();
    assert_eq!(scope.owned_blocks(), 1);
    assert_eq!(scope.owned_strings(), 2);

    let back = from_native(&rt, cell, &ty, Transfer::Nothing).unwrap();
    assert_eq!(back.as_array().unwrap(), &[Value::from("one"), Value::from("two")][..]);
}

#[test]
fn test_string_vector_element_mismatch() {
    let rt = runtime();
    let ty = TypeDescriptor::c_array(TypeDescriptor::Utf8);
    let err = convert(&rt, Value::array(vec![Value::from("ok"), Value::from(1)]), &ty).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::TypeMismatch);
}

#[test]
fn test_non_string_arrays_fail_closed() {
    let rt = runtime();
    let err = convert(&rt, Value::array(vec![Value::from(1)]), &TypeDescriptor::c_array(TypeDescriptor::Int32))
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::UnsupportedType);

    let garray = TypeDescriptor::Array {
        element: Box::new(TypeDescriptor::Utf8),
        kind: ArrayKind::PtrArray,
        zero_terminated: false,
        fixed_size: None,
    };
    let err = convert(&rt, Value::array(Vec::new()), &garray).unwrap_err();
    assert_eq!(err.to_string(), "argument type \"array\" is unsupported.");
}

#[test]
fn test_fixed_size_array_from_native() {
    let rt = runtime();
    let data = [1i32, 0, 3];
    let ty = TypeDescriptor::Array {
        element: Box::new(TypeDescriptor::Int32),
        kind: ArrayKind::C,
        zero_terminated: false,
        fixed_size: Some(3),
    };
    let value = from_native(&rt, RawCell::from_ptr(data.as_ptr() as *mut c_void), &ty, Transfer::Nothing).unwrap();
    assert_eq!(value.as_array().unwrap(), &[Value::from(1), Value::from(0), Value::from(3)][..]);
}

#[test]
fn test_zero_terminated_scalars_from_native() {
    let rt = runtime();
    let data = [5i32, 6, 0, 9];
    let ty = TypeDescriptor::c_array(TypeDescriptor::Int32);
    let value = from_native(&rt, RawCell::from_ptr(data.as_ptr() as *mut c_void), &ty, Transfer::Nothing).unwrap();
    assert_eq!(value.as_array().unwrap(), &[Value::from(5), Value::from(6)][..]);

    let empty = from_native(&rt, RawCell::null(), &ty, Transfer::Nothing).unwrap();
    assert_eq!(empty.as_array().unwrap().len(), 0);
}

#[test]
fn test_unbounded_array_cannot_convert() {
    let rt = runtime();
    let ty = TypeDescriptor::Array {
        element: Box::new(TypeDescriptor::Int32),
        kind: ArrayKind::C,
        zero_terminated: false,
        fixed_size: None,
    };
    let data = [1i32];
    let err = from_native(&rt, RawCell::from_ptr(data.as_ptr() as *mut c_void), &ty, Transfer::Nothing)
        .unwrap_err();
    assert_eq!(err.to_string(), "cannot convert native array type");
}

// ============================================================================
// Unsupported kinds
// ============================================================================

#[test]
fn test_unsupported_kinds_fail_closed_on_input() {
    let rt = runtime();
    let list = TypeDescriptor::GList(Box::new(TypeDescriptor::Utf8));
    let err = convert(&rt, Value::array(Vec::new()), &list).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::UnsupportedType);
    assert_eq!(err.to_string(), "argument type \"GList\" is unsupported.");

    let err = convert(&rt, Value::from(65), &TypeDescriptor::Unichar).unwrap_err();
    assert_eq!(err.to_string(), "argument type \"gunichar\" is unsupported.");

    let err = convert(&rt, Value::Null, &TypeDescriptor::Error).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::UnsupportedType);
}

#[test]
fn test_unsupported_kinds_degrade_on_output() {
    let rt = runtime();
    let hash = TypeDescriptor::GHash(Box::new(TypeDescriptor::Utf8), Box::new(TypeDescriptor::Utf8));
    let marker = RawCell::from_ptr(0x10 as *mut c_void);
    assert_eq!(from_native(&rt, marker, &hash, Transfer::Nothing).unwrap(), Value::Undefined);
    assert_eq!(
        from_native(&rt, RawCell { u32: 65 }, &TypeDescriptor::Unichar, Transfer::Nothing).unwrap(),
        Value::Undefined
    );
    assert_eq!(
        from_native(&rt, marker, &TypeDescriptor::GSList(Box::new(TypeDescriptor::Int32)), Transfer::Nothing)
            .unwrap(),
        Value::Undefined
    );
}

// ============================================================================
// Objects, structs and generic values
// ============================================================================

#[test]
fn test_object_interface_round_trip() {
    let rt = runtime();
    let info = Rc::new(ObjectInfo::new("Test", "Widget"));
    let ty = TypeDescriptor::object(info.clone());
    let mut instance = 0u64;
    let ptr = &mut instance as *mut u64 as *mut c_void;

    let wrapped = from_native(&rt, RawCell::from_ptr(ptr), &ty, Transfer::Nothing).unwrap();
    let cell = convert(&rt, wrapped.clone(), &ty).unwrap();
    assert_eq!(cell.as_ptr(), ptr);

    let again = from_native(&rt, RawCell::from_ptr(ptr), &ty, Transfer::Nothing).unwrap();
    assert_eq!(again, wrapped);

    let err = convert(&rt, Value::from("widget"), &ty).unwrap_err();
    assert_eq!(err.to_string(), "Expected type 'interface' but got type 'string'");
}

#[test]
fn test_struct_interface_copies_borrowed_memory() {
    let rt = runtime();
    let info = Rc::new(StructInfo::new("Test", "Point", StructKind::Struct, 8));
    let ty = TypeDescriptor::structure(info);
    let point = [3i32, 4i32];

    let value = from_native(&rt, RawCell::from_ptr(point.as_ptr() as *mut c_void), &ty, Transfer::Nothing).unwrap();
    let wrapper = value.as_struct().unwrap();
    assert_ne!(wrapper.as_ptr(), point.as_ptr() as *mut c_void);
    unsafe {
        assert_eq!(wrapper.read::<i32>(0), 3);
        assert_eq!(wrapper.read::<i32>(4), 4);
    }

    wrapper.dispose();
    let err = convert(&rt, value.clone(), &ty).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::ArgumentError);
}

#[test]
fn test_guess_type() {
    assert!(matches!(guess_type(&Value::from(5)), ValueType::Int));
    assert!(matches!(guess_type(&Value::from(3e9)), ValueType::UInt));
    assert!(matches!(guess_type(&Value::from(-3e9)), ValueType::Double));
    assert!(matches!(guess_type(&Value::from(1.5)), ValueType::Double));
    assert!(matches!(guess_type(&Value::from("x")), ValueType::String));
    assert!(matches!(guess_type(&Value::from(false)), ValueType::Boolean));
    assert!(matches!(guess_type(&Value::array(Vec::new())), ValueType::Array));
    assert!(matches!(guess_type(&Value::Null), ValueType::Pointer));
    assert!(matches!(guess_type(&Value::Undefined), ValueType::Invalid));
}

#[test]
fn test_to_generic() {
    let rt = runtime();
    assert!(matches!(
        to_generic(&rt, &Value::from(7), &ValueType::Enum).unwrap(),
        GenericValue::Enum(7)
    ));
    assert!(matches!(
        to_generic(&rt, &Value::from(9), &ValueType::Invalid).unwrap(),
        GenericValue::Int(9)
    ));

    let err = to_generic(&rt, &Value::Undefined, &ValueType::Invalid).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::ValueConversionError);

    let err = to_generic(&rt, &Value::from(1), &ValueType::Pointer).unwrap_err();
    assert_eq!(err.to_string(), "Native value type 'gpointer' is not yet supported");

    let err = to_generic(&rt, &Value::array(Vec::new()), &ValueType::Value).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::UnsupportedType);
}

#[test]
fn test_from_generic() {
    let rt = runtime();
    assert_eq!(from_generic(&rt, &GenericValue::Char(65)).unwrap(), Value::from("A"));
    assert_eq!(from_generic(&rt, &GenericValue::UInt64(12)).unwrap(), Value::from(12));
    assert_eq!(from_generic(&rt, &GenericValue::string("s").unwrap()).unwrap(), Value::from("s"));
    assert_eq!(from_generic(&rt, &GenericValue::String(None)).unwrap(), Value::Null);

    let err = from_generic(&rt, &GenericValue::Pointer(core::ptr::null_mut())).unwrap_err();
    assert_eq!(err.to_string(), "conversion of input type 'gpointer' not supported");
    let err = from_generic(&rt, &GenericValue::Invalid).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::UnsupportedType);
}

#[test]
fn test_value_interface_uses_generic_path() {
    let rt = runtime();
    let ty = TypeDescriptor::Interface(InterfaceInfo::Value);
    let mut scope = NativeScope::new();

    let cell = to_native(&rt, &Value::from("boxed text"), &ty, &mut scope).unwrap();
    let generic = unsafe { &*(cell.ptr as *const GenericValue) };
    assert_eq!(generic.type_name(), "gchararray");
    assert_eq!(
        from_native(&rt, cell, &ty, Transfer::Nothing).unwrap(),
        Value::from("boxed text")
    );
}

// ============================================================================
// Argument preparation
// ============================================================================

#[test]
fn test_prepare_counts_only_in_params() {
    let rt = runtime();
    let callable = Rc::new(
        CallableDescriptor::function("mixed")
            .param(ParamDescriptor::new("a", TypeDescriptor::Int32))
            .param(ParamDescriptor::new("b", TypeDescriptor::Int32).out())
            .param(ParamDescriptor::new("c", TypeDescriptor::Int32).inout()),
    );
    let set = prepare(&rt, &callable, &[Value::from(1), Value::from(2), Value::from(99)], None).unwrap();

    assert_eq!(set.in_cells().len(), 2);
    assert_eq!(set.out_cells().len(), 2);
    assert_eq!(set.out_slots()[0], OutSlot { param: 1, caller_allocated: false });
    assert_eq!(set.out_slots()[1], OutSlot { param: 2, caller_allocated: false });
    unsafe {
        assert_eq!(set.in_cells()[1].i32, 2);
        assert_eq!(set.out_cells()[1].i32, 2);
    }
}

#[test]
fn test_prepare_missing_argument_reads_undefined() {
    let rt = runtime();
    let callable = Rc::new(
        CallableDescriptor::function("takes_string").param(ParamDescriptor::new("s", TypeDescriptor::Utf8)),
    );
    let err = prepare(&rt, &callable, &[], None).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::TypeMismatch);
    assert_eq!(err.to_string(), "Argument 's' may not be null or undefined");
}

#[test]
fn test_prepare_nullable_passes_null() {
    let rt = runtime();
    let callable = Rc::new(
        CallableDescriptor::function("takes_string")
            .param(ParamDescriptor::new("s", TypeDescriptor::Utf8).nullable()),
    );
    let set = prepare(&rt, &callable, &[Value::Null], None).unwrap();
    assert!(set.in_cells()[0].is_null());
    assert_eq!(set.scope().owned_strings(), 0);
}

#[test]
fn test_prepare_names_failing_argument() {
    let rt = runtime();
    let callable = Rc::new(
        CallableDescriptor::function("f")
            .param(ParamDescriptor::new("a", TypeDescriptor::Utf8))
            .param(ParamDescriptor::new("b", TypeDescriptor::Utf8)),
    );
    let err = prepare(&rt, &callable, &[Value::from("ok"), Value::from(3)], None).unwrap_err();
    assert_eq!(err.to_string(), "Expected type 'utf8' for Argument 'b' but got type 'number'");
}

#[test]
fn test_prepare_method_receiver() {
    let rt = runtime();
    let info = Rc::new(ObjectInfo::new("Test", "Widget"));
    let mut instance = 0u64;
    let ptr = &mut instance as *mut u64 as *mut c_void;
    let receiver = rt.wrap_object(ptr, &info, Transfer::Nothing);

    let method = Rc::new(
        CallableDescriptor::method("resize").param(ParamDescriptor::new("width", TypeDescriptor::Int32)),
    );
    let set = prepare(&rt, &method, &[Value::from(10)], Some(&receiver)).unwrap();
    assert!(set.has_receiver());
    assert_eq!(set.in_cells()[0].as_ptr(), ptr);
    unsafe {
        assert_eq!(set.in_cells()[1].i32, 10);
    }

    let err = prepare(&rt, &method, &[Value::from(10)], None).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::ArgumentError);

    let err = prepare(&rt, &method, &[Value::from(10)], Some(&Value::from(1))).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::TypeMismatch);
    assert_eq!(err.argument.as_deref(), Some("this"));
}

#[test]
fn test_prepare_caller_allocated_out_block() {
    let rt = runtime();
    let info = Rc::new(StructInfo::new("Test", "Rect", StructKind::Struct, 16));
    let callable = Rc::new(
        CallableDescriptor::function("get_rect")
            .param(ParamDescriptor::new("rect", TypeDescriptor::structure(info)).out().caller_allocates()),
    );
    let set = prepare(&rt, &callable, &[], None).unwrap();

    let block = set.out_cells()[0].as_ptr();
    assert!(!block.is_null());
    assert!(set.out_slots()[0].caller_allocated);
    assert!(set.scope().owns_block(block));
    let bytes = unsafe { core::slice::from_raw_parts(block as *const u8, 16) };
    assert!(bytes.iter().all(|b| *b == 0));
}

#[test]
fn test_prepare_caller_allocated_requires_struct() {
    let rt = runtime();
    let flags = TypeDescriptor::Interface(InterfaceInfo::Flags(Rc::new(EnumInfo::new("Test", "Bits"))));
    let callable = Rc::new(
        CallableDescriptor::function("get_bits")
            .param(ParamDescriptor::new("bits", flags).out().caller_allocates()),
    );
    let err = prepare(&rt, &callable, &[], None).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::UnsupportedType);
    assert!(err.to_string().contains("Expected a struct or union."));
    assert_eq!(err.argument.as_deref(), Some("bits"));
}

#[test]
fn test_prepare_inout_caller_allocated_copies_input() {
    let rt = runtime();
    let info = Rc::new(StructInfo::new("Test", "Point", StructKind::Struct, 8));
    let point = StructWrapperFixture::new(&info, 5, 6);
    let callable = Rc::new(
        CallableDescriptor::function("nudge").param(
            ParamDescriptor::new("point", TypeDescriptor::structure(info.clone()))
                .inout()
                .caller_allocates(),
        ),
    );
    let set = prepare(&rt, &callable, &[point.value.clone()], None).unwrap();
    let block = set.out_cells()[0].as_ptr();
    assert_eq!(set.in_cells()[0].as_ptr(), block);
    assert_ne!(block, point.ptr());
    let coords = unsafe { core::slice::from_raw_parts(block as *const i32, 2) };
    assert_eq!(coords, &[5, 6]);
}

#[test]
fn test_prepare_rejects_struct_of_another_type() {
    let rt = runtime();
    let big = Rc::new(StructInfo::new("Test", "Big", StructKind::Struct, 4096));
    let small = Rc::new(StructInfo::new("Test", "Small", StructKind::Struct, 8));
    let other = StructWrapperFixture::new(&small, 1, 2);
    let callable = Rc::new(
        CallableDescriptor::function("fill_big").param(
            ParamDescriptor::new("big", TypeDescriptor::structure(big.clone()))
                .inout()
                .caller_allocates(),
        ),
    );

    let before = memory::live_allocations();
    let err = prepare(&rt, &callable, &[other.value.clone()], None).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::TypeMismatch);
    assert_eq!(err.to_string(), "Expected type 'Big' for Argument 'big' but got type 'Small'");
    assert_eq!(memory::live_allocations(), before);

    // A separately built descriptor of the same type is accepted
    let same = Rc::new(StructInfo::new("Test", "Big", StructKind::Struct, 4096));
    let value = Value::Struct(crate::runtime::StructWrapper::allocate(&same).unwrap());
    assert!(prepare(&rt, &callable, &[value], None).is_ok());
}

#[test]
fn test_prepare_failure_releases_out_blocks() {
    let rt = runtime();
    let info = Rc::new(StructInfo::new("Test", "Rect", StructKind::Struct, 16));
    let callable = Rc::new(
        CallableDescriptor::function("describe_rect")
            .param(ParamDescriptor::new("rect", TypeDescriptor::structure(info)).out().caller_allocates())
            .param(ParamDescriptor::new("label", TypeDescriptor::Utf8)),
    );

    let before = memory::live_allocations();
    let err = prepare(&rt, &callable, &[Value::from(3)], None).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::TypeMismatch);
    assert_eq!(err.argument.as_deref(), Some("label"));
    assert_eq!(memory::live_allocations(), before);

    // The successful path holds the block and the string until the set drops
    let set = prepare(&rt, &callable, &[Value::from("origin")], None).unwrap();
    assert_eq!(memory::live_allocations(), before + 2);
    drop(set);
    assert_eq!(memory::live_allocations(), before);
}

struct StructWrapperFixture {
    value: Value,
}

impl StructWrapperFixture {
    fn new(info: &Rc<StructInfo>, x: i32, y: i32) -> Self {
        let wrapper = crate::runtime::StructWrapper::allocate(info).unwrap();
        unsafe {
            wrapper.write(0, x);
            wrapper.write(4, y);
        }
        Self { value: Value::Struct(wrapper) }
    }

    fn ptr(&self) -> *mut c_void {
        self.value.as_struct().unwrap().as_ptr()
    }
}

#[test]
fn test_scope_strv_ownership() {
    let mut scope = NativeScope::new();
    scope.strv(&["a", "b"], Transfer::Nothing).unwrap();
    assert_eq!((scope.owned_blocks(), scope.owned_strings()), (1, 2));

    let container = scope.strv(&["c"], Transfer::Container).unwrap();
    assert_eq!((scope.owned_blocks(), scope.owned_strings()), (1, 3));
    unsafe { memory::free(container) };

    let block = scope.alloc_block(4).unwrap();
    assert!(scope.release_block(block));
    assert!(!scope.release_block(block));
    unsafe { memory::free(block) };
}

// ============================================================================
// Trampolines
// ============================================================================

fn binary_callback() -> Rc<CallableDescriptor> {
    Rc::new(
        CallableDescriptor::callback("BinaryOp")
            .param(ParamDescriptor::new("a", TypeDescriptor::Int32))
            .param(ParamDescriptor::new("b", TypeDescriptor::Int32))
            .returns(TypeDescriptor::Int32),
    )
}

#[test]
fn test_trampoline_calls_script_function() {
    let rt = runtime();
    let multiply = ScriptFunction::new("multiply", |args| {
        Ok(Value::Number(args[0].to_number() * args[1].to_number()))
    });
    let trampoline = Trampoline::new(&rt, binary_callback(), multiply).unwrap();

    let native: extern "C" fn(i32, i32) -> i32 = unsafe { core::mem::transmute(trampoline.code_ptr()) };
    assert_eq!(native(6, 7), 42);
    assert_eq!(native(-2, 3), -6);
    assert_eq!(rt.stats().callbacks_invoked, 2);
    assert!(rt.take_pending_error().is_none());
}

#[test]
fn test_trampoline_failure_raises_and_zeroes() {
    let rt = runtime();
    let failing = ScriptFunction::new("failing", |_| Err(crate::errors::BridgeError::argument("nope")));
    let trampoline = Trampoline::new(&rt, binary_callback(), failing).unwrap();

    let native: extern "C" fn(i32, i32) -> i32 = unsafe { core::mem::transmute(trampoline.code_ptr()) };
    assert_eq!(native(1, 2), 0);
    assert_eq!(rt.take_pending_error().unwrap().to_string(), "nope");
}

#[test]
fn test_trampoline_bad_return_raises() {
    let rt = runtime();
    let wrong = ScriptFunction::new("wrong", |_| Ok(Value::from(5)));
    let signature = Rc::new(CallableDescriptor::callback("Namer").returns(TypeDescriptor::Utf8));
    let trampoline = Trampoline::new(&rt, signature, wrong).unwrap();

    let native: extern "C" fn() -> *const c_char = unsafe { core::mem::transmute(trampoline.code_ptr()) };
    assert!(native().is_null());
    assert_eq!(rt.take_pending_error().unwrap().category(), ErrorCategory::TypeMismatch);
}

#[test]
fn test_trampoline_string_return_outlives_call() {
    let rt = runtime();
    let greet = ScriptFunction::new("greet", |args| {
        Ok(Value::from(format!("hello {}", args[0].as_str().unwrap_or("?"))))
    });
    let signature = Rc::new(
        CallableDescriptor::callback("Greeter")
            .param(ParamDescriptor::new("name", TypeDescriptor::Utf8))
            .returns(TypeDescriptor::Utf8),
    );
    let trampoline = Trampoline::new(&rt, signature, greet).unwrap();

    let native: extern "C" fn(*const c_char) -> *const c_char =
        unsafe { core::mem::transmute(trampoline.code_ptr()) };
    let result = native(b"world\0".as_ptr() as *const c_char);
    assert_eq!(unsafe { CStr::from_ptr(result) }.to_str().unwrap(), "hello world");
}

#[test]
fn test_trampoline_inout_and_out_params() {
    let rt = runtime();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let signature = Rc::new(
        CallableDescriptor::callback("Visitor")
            .param(ParamDescriptor::new("count", TypeDescriptor::Int32).inout())
            .param(ParamDescriptor::new("result", TypeDescriptor::Int32).out())
            .param(ParamDescriptor::new("tag", TypeDescriptor::Boolean)),
    );
    let trampoline = Trampoline::new(&rt, signature, recorder("visit", seen.clone(), Value::Undefined)).unwrap();

    let native: extern "C" fn(*mut i32, *mut i32, i32) = unsafe { core::mem::transmute(trampoline.code_ptr()) };
    let mut count = 7;
    let mut result = 0;
    native(&mut count, &mut result, 1);
    assert_eq!(&*seen.borrow(), &[Value::from(7), Value::from(true)]);
}

#[test]
fn test_trampoline_after_runtime_dropped() {
    let rt = runtime();
    let called = Rc::new(Cell::new(false));
    let flag = called.clone();
    let function = ScriptFunction::new("late", move |_| {
        flag.set(true);
        Ok(Value::from(1))
    });
    let trampoline = Trampoline::new(&rt, binary_callback(), function).unwrap();
    drop(rt);

    let native: extern "C" fn(i32, i32) -> i32 = unsafe { core::mem::transmute(trampoline.code_ptr()) };
    assert_eq!(native(1, 1), 0);
    assert!(!called.get());
}

#[test]
fn test_callback_scope_controls_lifetime() {
    let rt = runtime();
    let ty = TypeDescriptor::callback(binary_callback());
    let function = Value::Function(ScriptFunction::new("noop", |_| Ok(Value::Undefined)));

    let mut scope = NativeScope::new();
    let cell = to_native(&rt, &function, &ty, &mut scope).unwrap();
    assert!(!cell.is_null());
    assert_eq!(scope.trampoline_count(), 1);
    assert_eq!(rt.retained_trampolines(), 0);

    let mut scope = NativeScope::new();
    to_native_with(&rt, &function, &ty, Transfer::Nothing, CallbackScope::Forever, &mut scope).unwrap();
    assert_eq!(scope.trampoline_count(), 0);
    assert_eq!(rt.retained_trampolines(), 1);

    let err = to_native(&rt, &Value::from(1), &ty, &mut scope).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::TypeMismatch);
}

#[test]
fn test_trampoline_binding() {
    let rt = runtime();
    let function = ScriptFunction::new("noop", |_| Ok(Value::Undefined));
    let trampoline = Trampoline::new(&rt, binary_callback(), function.clone()).unwrap();
    let binding = trampoline.binding();
    assert!(binding.function.ptr_eq(&function));
    assert_eq!(binding.descriptor.as_ref().unwrap().name, "BinaryOp");
    assert_eq!(function.strong_count(), 3);

    drop(binding);
    drop(trampoline);
    assert_eq!(function.strong_count(), 1);
}

// ============================================================================
// Signal closures
// ============================================================================

fn emitter() -> (Rc<ObjectInfo>, Box<u64>) {
    let info = Rc::new(
        ObjectInfo::new("Test", "Emitter").with_signal(
            "changed",
            CallableDescriptor::signal("changed")
                .param(ParamDescriptor::new("value", TypeDescriptor::Int32))
                .returns(TypeDescriptor::Int32),
        ),
    );
    (info, Box::new(0u64))
}

fn instance_param(info: &Rc<ObjectInfo>, storage: &mut Box<u64>) -> GenericValue {
    GenericValue::Object {
        info: info.clone(),
        ptr: &mut **storage as *mut u64 as *mut c_void,
    }
}

#[test]
fn test_typed_signal_converts_params() {
    let rt = runtime();
    let (info, mut storage) = emitter();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let closure = SignalClosure::new(
        &rt,
        "changed",
        info.find_signal("changed"),
        recorder("on_changed", seen.clone(), Value::from(9)),
    );
    assert!(closure.is_typed());

    let mut slot = GenericValue::Int(0);
    closure
        .invoke(Some(&mut slot), &[instance_param(&info, &mut storage), GenericValue::Int(4)])
        .unwrap();

    let seen = seen.borrow();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].as_object().unwrap().type_name(), "Emitter");
    assert_eq!(seen[1], Value::from(4));
    assert!(matches!(slot, GenericValue::Int(9)));
}

#[test]
fn test_typed_signal_nullish_result_clears_slot() {
    let rt = runtime();
    let (info, mut storage) = emitter();
    let closure = SignalClosure::new(
        &rt,
        "changed",
        info.find_signal("changed"),
        recorder("on_changed", Rc::default(), Value::Null),
    );
    let mut slot = GenericValue::Int(5);
    closure
        .invoke(Some(&mut slot), &[instance_param(&info, &mut storage), GenericValue::Int(1)])
        .unwrap();
    assert!(matches!(slot, GenericValue::Int(0)));
}

#[test]
fn test_typed_signal_argument_count_mismatch() {
    let rt = runtime();
    let (info, mut storage) = emitter();
    let called = Rc::new(RefCell::new(Vec::new()));
    let closure = SignalClosure::new(
        &rt,
        "changed",
        info.find_signal("changed"),
        recorder("on_changed", called.clone(), Value::Undefined),
    );
    let err = closure.invoke(None, &[instance_param(&info, &mut storage)]).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::ArgumentError);
    assert!(called.borrow().is_empty());
}

#[test]
fn test_untyped_signal_uses_generic_path() {
    let rt = runtime();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let closure = SignalClosure::new(&rt, "notify::label", None, recorder("on_notify", seen.clone(), Value::from(true)));
    assert!(!closure.is_typed());

    let mut slot = GenericValue::new(&ValueType::Boolean);
    closure
        .invoke(Some(&mut slot), &[GenericValue::Int(1), GenericValue::string("label").unwrap()])
        .unwrap();
    assert_eq!(&*seen.borrow(), &[Value::from(1), Value::from("label")]);
    assert!(matches!(slot, GenericValue::Boolean(true)));
}

#[test]
fn test_untyped_signal_nullish_result_leaves_slot() {
    let rt = runtime();
    let closure = SignalClosure::new(&rt, "notify", None, recorder("on_notify", Rc::default(), Value::Undefined));
    let mut slot = GenericValue::Double(2.5);
    closure.invoke(Some(&mut slot), &[GenericValue::Int(1)]).unwrap();
    assert!(matches!(slot, GenericValue::Double(v) if v == 2.5));
}

#[test]
fn test_finalized_signal_never_runs() {
    let rt = runtime();
    let function = ScriptFunction::new("on_changed", |_| Ok(Value::Undefined));
    let seen = Rc::new(RefCell::new(Vec::new()));
    let closure = SignalClosure::new(&rt, "changed", None, recorder("on_changed", seen.clone(), Value::Undefined));
    let probe = SignalClosure::new(&rt, "probe", None, function.clone());
    assert_eq!(function.strong_count(), 2);

    closure.finalize();
    closure.finalize();
    probe.finalize();
    assert!(closure.is_finalized());
    assert_eq!(function.strong_count(), 1);

    let err = closure.invoke(None, &[GenericValue::Int(1)]).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::ArgumentError);
    assert!(seen.borrow().is_empty());

    closure.marshal(None, &[GenericValue::Int(1)]);
    assert!(rt.take_pending_error().is_some());
    assert!(seen.borrow().is_empty());
}

#[test]
fn test_signal_marshal_raises_function_errors() {
    let rt = runtime();
    let failing = ScriptFunction::new("broken", |_| Err(crate::errors::BridgeError::argument("handler failed")));
    let closure = SignalClosure::new(&rt, "activate", None, failing);
    closure.marshal(None, &[]);
    assert_eq!(rt.take_pending_error().unwrap().to_string(), "handler failed");
    assert_eq!(rt.stats().callbacks_invoked, 1);
}
