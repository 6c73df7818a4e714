//! Unit tests for FSCP message encoding and strict decoding.

use serde_json::{json, Map, Value};

use fscp_host::protocol::message::{
    ConfirmRequest, Endpoint, InputRequest, LogLevel, Message, MessageKind, ProgressPayload,
    ResultPayload, ResultStatus,
};
use fscp_host::AppError;

fn protocol_error(line: &str) -> String {
    match Message::decode(line) {
        Err(AppError::Protocol(msg)) => msg,
        other => panic!("expected protocol error for {line}, got {other:?}"),
    }
}

#[test]
fn progress_rejects_non_finite_values() {
    for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
        assert!(matches!(ProgressPayload::new(bad), Err(AppError::Protocol(_))));
        let err = ProgressPayload::new(1.0).unwrap().with_total(bad).unwrap_err();
        assert!(err.to_string().contains("total must be finite"), "{err}");
    }
}

// ── Round trip ───────────────────────────────────────────────────────────────

#[test]
fn every_kind_survives_encode_then_decode() {
    let mut data = Map::new();
    data.insert("label".into(), json!("x"));
    data.insert("count".into(), json!(3));

    let messages = vec![
        Message::log(LogLevel::Warn, "disk almost full"),
        Message::Progress(ProgressPayload {
            current: 3.0,
            total: Some(10.0),
            unit: Some("files".into()),
            message: Some("copying".into()),
        }),
        Message::Progress(ProgressPayload::new(0.5).unwrap()),
        Message::Progress(ProgressPayload::new(1.0).unwrap().with_total(4.0).unwrap()),
        Message::RequestInput {
            id: "1".into(),
            request: InputRequest {
                prompt: "Name?".into(),
                default: Some("anon".into()),
                secret: true,
                suggestions: vec!["alice".into(), "bob".into()],
            },
        },
        Message::RequestConfirm {
            id: "2".into(),
            request: ConfirmRequest {
                prompt: "Overwrite?".into(),
                default: Some(false),
            },
        },
        Message::Response {
            id: "2".into(),
            value: Value::Bool(true),
        },
        Message::Result(ResultPayload {
            title: Some("Summary".into()),
            status: Some(ResultStatus::Warn),
            data,
        }),
        Message::Error {
            message: "boom".into(),
        },
        Message::Done { exit_code: 3 },
        Message::Cancel,
    ];

    for message in messages {
        let line = message.encode();
        assert!(!line.contains('\n'), "encoded message must be one line");
        let decoded = Message::decode(&line).expect("decode");
        assert_eq!(decoded, message, "round trip mismatch for {line}");
    }
}

// ── Wire shape ───────────────────────────────────────────────────────────────

#[test]
fn request_encoding_writes_id_at_top_level_and_in_payload() {
    let message = Message::RequestInput {
        id: "7".into(),
        request: InputRequest {
            prompt: "Name?".into(),
            default: None,
            secret: false,
            suggestions: Vec::new(),
        },
    };

    let value: Value = serde_json::from_str(&message.encode()).unwrap();
    assert_eq!(value["type"], "request_input");
    assert_eq!(value["id"], "7");
    assert_eq!(value["payload"]["id"], "7");
    assert_eq!(value["payload"]["prompt"], "Name?");
    assert!(value["payload"].get("secret").is_none());
}

#[test]
fn done_payload_uses_camel_case_exit_code() {
    let value = Message::Done { exit_code: 0 }.to_value();
    assert_eq!(value, json!({"type": "done", "payload": {"exitCode": 0}}));
}

#[test]
fn cancel_encodes_with_empty_payload() {
    let value = Message::Cancel.to_value();
    assert_eq!(value, json!({"type": "cancel", "payload": {}}));
}

#[test]
fn result_payload_keeps_free_form_keys() {
    let message =
        Message::decode(r#"{"type":"result","payload":{"label":"x","title":"T","status":"ok"}}"#)
            .unwrap();
    let Message::Result(result) = message else {
        panic!("expected result");
    };
    assert_eq!(result.title.as_deref(), Some("T"));
    assert_eq!(result.status, Some(ResultStatus::Ok));
    assert_eq!(result.data.get("label"), Some(&json!("x")));
    assert!(!result.data.contains_key("title"));
}

// ── Lenient forms ────────────────────────────────────────────────────────────

#[test]
fn correlation_id_may_live_only_in_payload() {
    let message =
        Message::decode(r#"{"type":"request_confirm","payload":{"id":"9","prompt":"Go?"}}"#)
            .unwrap();
    assert_eq!(message.correlation_id(), Some("9"));
}

#[test]
fn correlation_id_may_live_only_at_top_level() {
    let message =
        Message::decode(r#"{"type":"request_input","id":"4","payload":{"prompt":"Name?"}}"#)
            .unwrap();
    assert_eq!(message.correlation_id(), Some("4"));
}

#[test]
fn log_accepts_message_alias_for_text() {
    let message =
        Message::decode(r#"{"type":"log","payload":{"level":"info","message":"hi"}}"#).unwrap();
    assert_eq!(message, Message::log(LogLevel::Info, "hi"));
}

#[test]
fn cancel_without_payload_decodes() {
    assert_eq!(Message::decode(r#"{"type":"cancel"}"#).unwrap(), Message::Cancel);
}

// ── Strictness ───────────────────────────────────────────────────────────────

#[test]
fn unknown_type_is_rejected() {
    let msg = protocol_error(r#"{"type":"telemetry","payload":{}}"#);
    assert!(msg.starts_with("unknown message type"), "{msg}");
}

#[test]
fn invalid_json_is_rejected() {
    let msg = protocol_error("not json at all");
    assert!(msg.starts_with("malformed json"), "{msg}");
}

#[test]
fn missing_payload_is_rejected() {
    let msg = protocol_error(r#"{"type":"log"}"#);
    assert!(msg.starts_with("missing required field"), "{msg}");
}

#[test]
fn missing_payload_field_is_rejected() {
    let msg = protocol_error(r#"{"type":"log","payload":{"level":"info"}}"#);
    assert!(msg.starts_with("missing required field"), "{msg}");
}

#[test]
fn unknown_log_level_is_rejected() {
    protocol_error(r#"{"type":"log","payload":{"level":"trace","text":"x"}}"#);
}

#[test]
fn request_without_any_id_is_rejected() {
    protocol_error(r#"{"type":"request_input","payload":{"prompt":"Name?"}}"#);
}

#[test]
fn mismatched_ids_are_rejected() {
    let msg = protocol_error(
        r#"{"type":"request_input","id":"1","payload":{"id":"2","prompt":"Name?"}}"#,
    );
    assert!(msg.contains("mismatch"), "{msg}");
}

#[test]
fn non_object_payload_is_rejected() {
    protocol_error(r#"{"type":"error","payload":"boom"}"#);
}

#[test]
fn non_integer_exit_code_is_rejected() {
    protocol_error(r#"{"type":"done","payload":{"exitCode":"zero"}}"#);
}

// ── Kinds ────────────────────────────────────────────────────────────────────

#[test]
fn only_response_and_cancel_are_host_sent() {
    for kind in [
        MessageKind::Log,
        MessageKind::Progress,
        MessageKind::RequestInput,
        MessageKind::RequestConfirm,
        MessageKind::Result,
        MessageKind::Error,
        MessageKind::Done,
    ] {
        assert_eq!(kind.sender(), Endpoint::Script, "{kind:?}");
    }
    assert_eq!(MessageKind::Response.sender(), Endpoint::Host);
    assert_eq!(MessageKind::Cancel.sender(), Endpoint::Host);
}

#[test]
fn wire_names_round_trip() {
    for name in [
        "log",
        "progress",
        "request_input",
        "request_confirm",
        "response",
        "result",
        "error",
        "done",
        "cancel",
    ] {
        let kind = MessageKind::from_wire(name).expect(name);
        assert_eq!(kind.as_str(), name);
    }
    assert!(MessageKind::from_wire("Log").is_none());
}

#[test]
fn log_levels_are_ordered_by_severity() {
    assert!(LogLevel::Debug < LogLevel::Info);
    assert!(LogLevel::Info < LogLevel::Warn);
    assert!(LogLevel::Warn < LogLevel::Error);
}
