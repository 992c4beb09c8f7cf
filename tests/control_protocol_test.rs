/// Wire-format tests for the control channel: commands a controller sends
/// and events it expects back.
use chatwire::{ControlCommand, ControlEvent};
use serde_json::json;

#[test]
fn chat_command_carries_payload_and_request_id() {
    let raw = json!({
        "type": "chat",
        "payload": { "prompt": "Explain lifetimes", "temperature": 0.2 },
        "requestId": "7f3a"
    });
    let cmd: ControlCommand = serde_json::from_value(raw).unwrap();
    match cmd {
        ControlCommand::Chat {
            payload,
            request_id,
        } => {
            assert_eq!(payload.prompt, "Explain lifetimes");
            assert_eq!(payload.extra["temperature"], 0.2);
            assert_eq!(request_id, "7f3a");
        }
        other => panic!("unexpected command: {:?}", other),
    }
}

#[test]
fn optional_fields_default_cleanly() {
    let cmd: ControlCommand = serde_json::from_value(json!({"type": "new-chat"})).unwrap();
    assert!(matches!(cmd, ControlCommand::NewChat { request_id: None }));

    let cmd: ControlCommand = serde_json::from_value(json!({"type": "chat-reload"})).unwrap();
    assert!(matches!(cmd, ControlCommand::ChatReload { chat_id: None }));
}

#[test]
fn unknown_command_type_is_rejected() {
    let result = serde_json::from_value::<ControlCommand>(json!({"type": "self-destruct"}));
    assert!(result.is_err());
}

#[test]
fn answer_events_separate_data_from_error() {
    let ok = serde_json::to_value(ControlEvent::answer_ok("r1", json!({"phase": "DATA"}))).unwrap();
    assert_eq!(ok["type"], "answer");
    assert_eq!(ok["data"]["phase"], "DATA");
    assert!(ok.get("error").is_none());

    let err = serde_json::to_value(ControlEvent::answer_err("r1", "timeout")).unwrap();
    assert_eq!(err["error"], "timeout");
    assert!(err.get("data").is_none());
}

#[test]
fn stream_and_chat_id_events_use_wire_names() {
    let frag = serde_json::to_value(ControlEvent::AnswerStream {
        request_id: "r2".to_string(),
        fragment: "partial".to_string(),
    })
    .unwrap();
    assert_eq!(frag["type"], "answer-stream");
    assert_eq!(frag["requestId"], "r2");

    let id = serde_json::to_value(ControlEvent::ReturnChatId {
        chat_id: Some("9eb2e582".to_string()),
    })
    .unwrap();
    assert_eq!(id["type"], "return-chat-id");
    assert_eq!(id["chatId"], "9eb2e582");
}
