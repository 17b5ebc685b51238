mod common;

use common::{bridge, sample, Sample, SAMPLE_FORMAT};
use pybridge::interop::{Directive, FieldValue};
use pybridge::{
    ArgList, ArrayDescriptor, BridgeError, ElementType, ForeignValue, NativeValue, RecordDescriptor, Scalar,
};
use pyo3::exceptions::PyValueError;
use pyo3::Python;

#[test]
fn test_load_image_round_trip() {
    let (_guard, bridge) = bridge();
    let pixels: Vec<u8> = (0..60).collect();
    let image = bridge
        .wrap_array(&ArrayDescriptor::image(4, 5, 3, ElementType::U8, &pixels))
        .unwrap();

    let mut args = ArgList::new();
    args.push_array(image).push(3i32).push("frame-0").push(0.5f64);

    let result = bridge.call_checked("load_image", &args).unwrap();
    let rows: Vec<Vec<f32>> = bridge.decode_list(&result, "f").unwrap();

    assert_eq!(rows.len(), 5);
    assert_eq!(rows[0], vec![10.0, 1011.0]);
    assert_eq!(rows[3], vec![3.0, 3.4]);
    assert_eq!(rows[4], vec![4.0, 5.0, 59.0]);
}

#[test]
fn test_unsupported_channels_return_none() {
    let (_guard, bridge) = bridge();
    let pixels = vec![0u8; 8];
    let image = bridge
        .wrap_array(&ArrayDescriptor::image(2, 2, 2, ElementType::U8, &pixels))
        .unwrap();

    let mut args = ArgList::new();
    args.push_array(image).push(2i32).push("two").push(0i32);

    let result = bridge.call_checked("load_image", &args).unwrap();
    assert!(result.is_none());
    assert!(matches!(
        bridge.decode_list::<f32>(&result, "f"),
        Err(BridgeError::NotAList { .. })
    ));
}

#[test]
fn test_get_tuple_with_nested_list() {
    let (_guard, bridge) = bridge();
    let result = bridge.call_checked("get_tuple", &ArgList::new()).unwrap();

    let fields = bridge.decode_tuple(&result, "sisO").unwrap();
    assert_eq!(fields[0].as_str(), Some("Hello world."));
    assert_eq!(fields[1].as_i64(), Some(1));
    assert_eq!(fields[2].as_str(), Some("good!"));

    let boxes: Vec<Vec<i32>> = bridge.decode_list(fields[3].as_object().unwrap(), "i").unwrap();
    assert_eq!(boxes, vec![vec![1, 2], vec![3, 4], vec![5, 6], vec![7, 8]]);

    assert!(matches!(
        bridge.decode_tuple(&result, "ssiO"),
        Err(BridgeError::ShapeMismatch { .. })
    ));
    assert!(bridge.report().is_none());
}

#[test]
fn test_struct_round_trip() {
    let (_guard, bridge) = bridge();
    let mut args = ArgList::new();
    args.push_struct(SAMPLE_FORMAT, 4, &sample()).unwrap();

    let result = bridge.call_checked("test_struct", &args).unwrap();
    let echoed: Sample = bridge.decode_record(&result).unwrap();

    let (a, b, c, d, e, f) = (echoed.a, echoed.b, echoed.c, echoed.d, echoed.e, echoed.f);
    assert_eq!(a, 2);
    assert!((b - 3.2).abs() < 1e-6);
    assert_eq!(&c, b"dfds1234");
    assert!((d - 4.45).abs() < 1e-12);
    assert_eq!(e, 7);
    assert_eq!(f, [8, 9]);
}

#[test]
fn test_struct_fields_without_record_type() {
    let (_guard, bridge) = bridge();
    let mut args = ArgList::new();
    args.push_struct(SAMPLE_FORMAT, 4, &sample()).unwrap();
    let result = bridge.call_checked("test_struct", &args).unwrap();

    let descriptor = RecordDescriptor::new(SAMPLE_FORMAT, 4).unwrap();
    let fields = bridge.decode_record_fields(&result, &descriptor).unwrap();
    assert_eq!(fields.len(), 7);
    assert_eq!(fields[0], FieldValue::Int(2));
    assert_eq!(fields[2], FieldValue::Bytes(b"dfds1234".to_vec()));
    assert!(matches!(fields[3], FieldValue::Float(d) if (d - 4.45).abs() < 1e-12));
    assert_eq!(fields[4], FieldValue::Int(7));
    assert_eq!(&fields[5..], &[FieldValue::Int(8), FieldValue::Int(9)]);

    let wider = RecordDescriptor::new(SAMPLE_FORMAT, 8).unwrap();
    assert!(matches!(
        bridge.decode_record_fields(&result, &wider),
        Err(BridgeError::ShapeMismatch { .. })
    ));

    let not_bytes = bridge.call_checked("nested", &ArgList::new()).unwrap();
    assert!(matches!(
        bridge.decode_record_fields(&not_bytes, &descriptor),
        Err(BridgeError::ShapeMismatch { .. })
    ));
}

#[test]
fn test_struct_alignment_must_be_four_or_eight() {
    let (_guard, _bridge) = bridge();
    let mut args = ArgList::new();
    for alignment in [1, 2, 16] {
        assert!(matches!(
            args.push_struct(SAMPLE_FORMAT, alignment, &sample()),
            Err(BridgeError::UnsupportedAlignment { .. })
        ));
    }
    assert!(args.is_empty());
}

#[test]
fn test_positional_order_is_preserved() {
    let (_guard, bridge) = bridge();
    let mut args = ArgList::new();
    args.push(1i64)
        .push("b")
        .push_tuple(&[NativeValue::Float(2.5), NativeValue::Bool(false)]);

    let result = bridge.call_checked("echo", &args).unwrap();
    assert_eq!(
        result.classify().unwrap(),
        ForeignValue::Tuple(vec![
            ForeignValue::Scalar(Scalar::Int(1)),
            ForeignValue::Scalar(Scalar::Str("b".into())),
            ForeignValue::Tuple(vec![
                ForeignValue::Scalar(Scalar::Float(2.5)),
                ForeignValue::Scalar(Scalar::Bool(false)),
            ]),
        ])
    );
}

#[test]
fn test_decode_failures_leave_no_pending_error() {
    let (_guard, bridge) = bridge();

    let dict = bridge.call_checked("not_a_list", &ArgList::new()).unwrap();
    assert!(matches!(
        bridge.decode_list::<f64>(&dict, "d"),
        Err(BridgeError::NotAList { .. })
    ));

    let mixed = bridge.call_checked("mixed_list", &ArgList::new()).unwrap();
    let err = bridge.decode_list::<f64>(&mixed, "d").unwrap_err();
    assert_eq!(err.exception().map(|e| e.type_name.as_str()), Some("TypeError"));
    assert!(bridge.report().is_none());

    let nested = bridge.call_checked("nested", &ArgList::new()).unwrap();
    let rows: Vec<Vec<f64>> = bridge.decode_list(&nested, "double").unwrap();
    assert_eq!(rows, vec![vec![1.0, 2.0], vec![3.0]]);
}

#[test]
fn test_classify_buffer_result() {
    let (_guard, bridge) = bridge();
    let result = bridge.call_checked("buffer_view", &ArgList::new()).unwrap();
    assert_eq!(
        bridge.classify(&result).unwrap(),
        ForeignValue::Array {
            dims: vec![2, 3],
            element: ElementType::U8,
            data: vec![0, 1, 2, 3, 4, 5],
        }
    );
}

#[test]
fn test_missing_symbol_checked() {
    let (_guard, bridge) = bridge();
    let err = bridge.call_checked("no_such_function", &ArgList::new()).unwrap_err();
    assert!(matches!(
        err,
        BridgeError::SymbolNotFound { ref symbol, .. } if symbol == "no_such_function"
    ));
    assert!(!err.is_fatal());
    assert!(bridge.report().is_none());
}

#[test]
fn test_missing_symbol_ambient_raises_name_error() {
    let (_guard, bridge) = bridge();
    assert!(bridge.call("no_such_function", &ArgList::new()).is_none());

    let state = bridge.report().unwrap();
    assert_eq!(state.type_name, "NameError");
    assert!(state.message.contains("no_such_function"));
    assert!(state.frames.is_empty());
}

#[test]
fn test_traceback_frames_innermost_first() {
    let (_guard, bridge) = bridge();
    assert!(bridge.call("nested_failure", &ArgList::new()).is_none());

    let state = bridge.report().unwrap();
    assert_eq!(state.type_name, "NameError");
    assert!(state.message.contains("printf"));

    let functions: Vec<&str> = state.frames.iter().map(|f| f.function.as_str()).collect();
    assert_eq!(functions, vec!["test_traceback", "nested_failure"]);
    assert!(state.frames[0].file.ends_with("bridge_fixture.py"));
    assert!(state.frames[0].line > 0);
}

#[test]
fn test_report_is_single_shot() {
    let (_guard, bridge) = bridge();
    assert!(bridge.call("fail", &ArgList::new()).is_none());

    let first = bridge.report().unwrap();
    assert_eq!(first.type_name, "ValueError");
    assert_eq!(first.message, "boom");
    assert!(bridge.report().is_none());
}

#[test]
fn test_checked_call_returns_exception() {
    let (_guard, bridge) = bridge();
    let err = bridge.call_checked("test_traceback", &ArgList::new()).unwrap_err();

    let state = err.exception().unwrap();
    assert_eq!(state.type_name, "NameError");
    assert_eq!(state.innermost().map(|f| f.function.as_str()), Some("test_traceback"));
    assert!(bridge.report().is_none());
}

#[test]
fn test_stale_error_survives_successful_call() {
    let (_guard, bridge) = bridge();
    Python::with_gil(|py| PyValueError::new_err("stale").restore(py));

    assert!(bridge.call("nested", &ArgList::new()).is_some());
    let state = bridge.report().unwrap();
    assert_eq!(state.message, "stale");
}

#[test]
fn test_stale_error_replaced_by_failed_call() {
    let (_guard, bridge) = bridge();
    Python::with_gil(|py| PyValueError::new_err("stale").restore(py));

    assert!(bridge.call("no_such_function", &ArgList::new()).is_none());
    let state = bridge.report().unwrap();
    assert_eq!(state.type_name, "NameError");
    assert!(bridge.report().is_none());
}

#[test]
fn test_checked_call_keeps_pending_error() {
    let (_guard, bridge) = bridge();
    Python::with_gil(|py| PyValueError::new_err("stale").restore(py));

    assert!(bridge.call_checked("fail", &ArgList::new()).is_err());
    assert_eq!(bridge.report().map(|s| s.message), Some("stale".to_string()));
}

#[test]
fn test_unchecked_call_discards_result() {
    let (_guard, bridge) = bridge();
    bridge.call_unchecked("nested", &ArgList::new());
    assert!(bridge.report().is_none());

    bridge.call_unchecked("fail", &ArgList::new());
    assert_eq!(bridge.report().map(|s| s.type_name), Some("ValueError".to_string()));
}

#[test]
fn test_named_format_vocabulary() {
    assert_eq!(
        Directive::parse_format("string,integer,string,object").unwrap(),
        Directive::parse_format("sisO").unwrap()
    );
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
struct Reading {
    value: f64,
    count: i32,
    flags: i32,
}

unsafe impl pybridge::Record for Reading {}

#[test]
fn test_record_round_trip_eight_byte_alignment() {
    let (_guard, bridge) = bridge();
    let reading = Reading {
        value: 0.5,
        count: 41,
        flags: 1,
    };

    let mut args = ArgList::new();
    args.push_struct("dii", 8, &reading).unwrap();
    let result = bridge.call_checked("increment", &args).unwrap();

    let bumped: Reading = bridge.decode_record(&result).unwrap();
    assert_eq!(
        bumped,
        Reading {
            value: 1.5,
            count: 42,
            flags: 2,
        }
    );

    // "di0i" encodes 12 bytes, not 16.
    let mut short = ArgList::new();
    assert!(matches!(
        short.push_struct("di", 4, &reading),
        Err(BridgeError::ShapeMismatch { .. })
    ));
}

#[test]
fn test_array_identity_for_every_element_type() {
    let (_guard, bridge) = bridge();

    for element in ElementType::ALL {
        let data: Vec<u8> = (0..(6 * element.size())).map(|b| b as u8).collect();
        let array = bridge
            .wrap_array(&ArrayDescriptor::new(&[2, 3], element, &data))
            .unwrap();

        let mut args = ArgList::new();
        args.push_array(array);
        let result = bridge.call_checked("array_info", &args).unwrap();

        let expected = ForeignValue::Tuple(vec![
            ForeignValue::List(vec![ForeignValue::Scalar(Scalar::Int(2)), ForeignValue::Scalar(Scalar::Int(3))]),
            ForeignValue::Scalar(Scalar::Str(element.format_char().to_string())),
            ForeignValue::Blob(data.clone()),
        ]);
        assert_eq!(result.classify().unwrap(), expected, "element {:?}", element);
    }
}

#[test]
fn test_channel_expanded_width() {
    let (_guard, bridge) = bridge();
    let pixels: Vec<u8> = (0..24).collect();
    let array = bridge
        .wrap_array(&ArrayDescriptor::image(2, 4, 3, ElementType::U8, &pixels))
        .unwrap();

    let mut args = ArgList::new();
    args.push_array(array);
    let result = bridge.call_checked("array_info", &args).unwrap();

    let fields = bridge.decode_tuple(&result, "OsO").unwrap();
    let shape = fields[0].as_object().unwrap().classify().unwrap();
    assert_eq!(
        shape,
        ForeignValue::List(vec![ForeignValue::Scalar(Scalar::Int(2)), ForeignValue::Scalar(Scalar::Int(12))])
    );
}
