use std::collections::BTreeMap;

use crate::*;

// ============================================================================
//  CALL LINES
// ============================================================================

#[test]
fn test_encode_call_single_line() {
    let args = vec![Value::from("a b\nc"), Value::from(1), Value::from(2.5)];
    let line = encode_call(7, "tick", "echo", &args).unwrap();

    assert_eq!(line, "?mc7 tick echo [\"a b\\nc\",1,2.5]\n");
    assert_eq!(line.matches('\n').count(), 1);
}

#[test]
fn test_encode_call_rejects_bad_tokens() {
    assert!(matches!(
        encode_call(1, "tick", "two words", &[]),
        Err(RpcError::InvalidFunctionName(_))
    ));
    assert!(matches!(encode_call(1, "tick", "", &[]), Err(RpcError::InvalidFunctionName(_))));
    assert!(matches!(encode_call(1, "", "f", &[]), Err(RpcError::InvalidExecutor(_))));
    assert!(matches!(encode_call(1, "tick tock", "f", &[]), Err(RpcError::InvalidExecutor(_))));
}

#[test]
fn test_encode_call_rejects_non_finite_floats() {
    for x in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
        assert!(matches!(
            encode_call(1, "script", "echo", &[Value::Float(x)]),
            Err(RpcError::InvalidField { field: "args", .. })
        ));
    }

    let mut nested = BTreeMap::new();
    nested.insert("pos".to_string(), Value::from(vec![Value::from(1.0), Value::Float(f64::NAN)]));
    assert!(encode_call(1, "script", "echo", &[Value::Map(nested)]).is_err());

    let line = encode_call(1, "script", "echo", &[Value::from(f64::MAX)]).unwrap();
    assert_eq!(decode_call(&line).unwrap().args, vec![Value::Float(f64::MAX)]);
}

#[test]
fn test_call_line_roundtrip() {
    let args = vec![Value::from(vec![1, 2, 3]), Value::Null, Value::from(true)];
    let line = encode_call(42, "render", "get_block", &args).unwrap();
    let call = decode_call(&line).unwrap();

    assert_eq!(call.id, 42);
    assert_eq!(call.executor, "render");
    assert_eq!(call.function, "get_block");
    assert_eq!(call.args, args);
    assert!(!call.is_fire_and_forget());
}

#[test]
fn test_decode_call_malformed() {
    assert!(decode_call("hello world").is_err());
    assert!(decode_call("?mcX tick f []").is_err());
    assert!(decode_call("?mc1 tick f").is_err());
    assert!(decode_call("?mc1 tick f {not json").is_err());
}

// ============================================================================
//  REPLIES
// ============================================================================

#[test]
fn test_decode_reply_value() {
    let reply = decode_reply(r#"{"fcid":7,"retval":20.0}"#).unwrap();
    assert_eq!(reply.call_id, 7);
    assert_eq!(reply.value, Some(Value::Float(20.0)));
    assert!(reply.error.is_none());
    assert!(!reply.closed);
}

#[test]
fn test_decode_reply_null_retval_is_present() {
    let reply = decode_reply(r#"{"fcid":3,"retval":null,"conn":"close"}"#).unwrap();
    assert_eq!(reply.value, Some(Value::Null));
    assert!(reply.closed);

    let reply = decode_reply(r#"{"fcid":3,"conn":"close"}"#).unwrap();
    assert_eq!(reply.value, None);
    assert!(reply.closed);
}

#[test]
fn test_decode_reply_nested_value() {
    let reply = decode_reply(r#"{"fcid":1,"retval":{"name":"Steve","pos":[1,-2,3.5],"ok":true}}"#).unwrap();
    let value = reply.value.unwrap();

    assert_eq!(value.get("name").and_then(Value::as_str), Some("Steve"));
    assert_eq!(
        value.get("pos"),
        Some(&Value::List(vec![Value::Int(1), Value::Int(-2), Value::Float(3.5)]))
    );
    assert_eq!(value.get("ok"), Some(&Value::Bool(true)));
}

#[test]
fn test_decode_reply_exception() {
    let line = r#"{"fcid":9,"except":{"type":"IllegalStateException","message":"no world","desc":"world not loaded","stack":[{"file":"Host.java","method":"run","line":42},{"file":"Loop.java","method":"tick","line":7}]},"conn":"close"}"#;
    let reply = decode_reply(line).unwrap();
    let error = reply.error.unwrap();

    assert_eq!(error.kind, "IllegalStateException");
    assert_eq!(error.message, "no world");
    assert_eq!(error.description, "world not loaded");
    assert_eq!(error.stack.len(), 2);
    assert_eq!(error.stack[1], StackFrame { file: "Loop.java".into(), method: "tick".into(), line: 7 });
    assert!(reply.closed);

    let text = error.to_string();
    assert!(text.starts_with("IllegalStateException: no world"));
    assert!(text.contains("world not loaded"));
    assert!(text.contains("at run (Host.java:42)"));
    assert!(text.contains("at tick (Loop.java:7)"));
}

#[test]
fn test_decode_reply_errors() {
    assert!(matches!(decode_reply("not json"), Err(RpcError::Json(_))));
    assert!(matches!(decode_reply("[1,2]"), Err(RpcError::Json(_))));
    assert!(matches!(decode_reply(r#"{"retval":1}"#), Err(RpcError::MissingField("fcid"))));
    assert!(matches!(
        decode_reply(r#"{"fcid":-1,"retval":1}"#),
        Err(RpcError::InvalidField { field: "fcid", .. })
    ));
    assert!(matches!(
        decode_reply(r#"{"fcid":1,"conn":"open"}"#),
        Err(RpcError::InvalidField { field: "conn", .. })
    ));
}

#[test]
fn test_encode_reply_rejects_non_finite_floats() {
    let reply = Reply::value(3, f64::NAN);
    assert!(matches!(
        encode_reply(&reply),
        Err(RpcError::InvalidField { field: "retval", .. })
    ));
}

#[test]
fn test_exit_ack() {
    assert!(decode_reply(r#"{"fcid":0,"retval":"exit!"}"#).unwrap().is_exit_ack());
    assert!(!decode_reply(r#"{"fcid":1,"retval":"exit!"}"#).unwrap().is_exit_ack());
    assert!(!decode_reply(r#"{"fcid":0,"retval":"hello"}"#).unwrap().is_exit_ack());
}

#[test]
fn test_value_survives_call_and_reply() {
    let mut map = BTreeMap::new();
    map.insert("health".to_string(), Value::Float(20.0));
    map.insert("name".to_string(), Value::from("Alex"));
    map.insert("inventory".to_string(), Value::from(vec![Value::from("stone"), Value::Null]));
    let original = Value::Map(map);

    // The host echoes our argument back as the return value.
    let line = encode_call(11, "script", "echo_back", std::slice::from_ref(&original)).unwrap();
    let call = decode_call(&line).unwrap();
    let reply_line = encode_reply(&Reply::value(call.id, call.args[0].clone()).closing()).unwrap();
    let reply = decode_reply(&reply_line).unwrap();

    assert_eq!(reply.call_id, 11);
    assert_eq!(reply.value, Some(original));
    assert!(reply.closed);
}

// ============================================================================
//  VALUES
// ============================================================================

#[test]
fn test_value_conversions() {
    assert_eq!(f64::try_from(Value::Int(3)).unwrap(), 3.0);
    assert_eq!(i64::try_from(Value::Int(3)).unwrap(), 3);
    assert!(i64::try_from(Value::Float(3.0)).is_err());
    assert_eq!(String::try_from(Value::from("x")).unwrap(), "x");
    assert!(matches!(
        bool::try_from(Value::from("x")),
        Err(RpcError::TypeMismatch { expected: "bool", .. })
    ));
    assert_eq!(Value::from(None::<i64>), Value::Null);
    assert_eq!(Value::from(u64::MAX), Value::Float(u64::MAX as f64));
}

#[test]
fn test_unsigned_conversions() {
    assert_eq!(Value::from(7u64), Value::Int(7));
    assert_eq!(Value::from(u64::MAX), Value::Float(u64::MAX as f64));
    assert_eq!(Value::try_from_u64(i64::MAX as u64).unwrap(), Value::Int(i64::MAX));
    assert!(matches!(Value::try_from_u64(u64::MAX), Err(RpcError::TypeMismatch { .. })));
}

#[test]
fn test_typed_payloads() {
    #[derive(serde::Serialize, serde::Deserialize, Debug, PartialEq)]
    struct Pos {
        x: i64,
        y: i64,
        z: i64,
    }

    let v = to_value(Pos { x: 1, y: 64, z: -3 }).unwrap();
    assert_eq!(v.get("y"), Some(&Value::Int(64)));
    let back: Pos = from_value(v).unwrap();
    assert_eq!(back, Pos { x: 1, y: 64, z: -3 });
}

// ============================================================================
//  BATCHES
// ============================================================================

#[test]
fn test_batch_keeps_forward_references() {
    let tasks = vec![
        TaskFrame { id: 1, function: "player_name".into(), args: vec![] },
        TaskFrame { id: 2, function: "player_position".into(), args: vec![] },
        TaskFrame {
            id: 3,
            function: "echo".into(),
            args: vec![TaskArg::Immediate(Value::from("hi")), TaskArg::Deferred(1)],
        },
    ];

    let encoded = encode_batch(&tasks);
    let Value::List(items) = &encoded else { panic!("expected list") };
    assert_eq!(
        items[2],
        Value::List(vec![
            Value::Int(3),
            Value::from("echo"),
            Value::List(vec![Value::from("hi"), Value::Null]),
            Value::List(vec![Value::Null, Value::Int(1)]),
        ])
    );

    assert_eq!(decode_batch(encoded).unwrap(), tasks);
}

#[test]
fn test_decode_batch_rejects_mismatched_lists() {
    let bad = Value::List(vec![Value::List(vec![
        Value::Int(1),
        Value::from("f"),
        Value::List(vec![Value::Null]),
        Value::List(vec![]),
    ])]);
    assert!(decode_batch(bad).is_err());
}
