use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Phase model — lifecycle of one logical request as seen by the interceptor
// ---------------------------------------------------------------------------

/// Named stage in a logical operation's lifecycle.
///
/// `Init` is the only initial value. `Data` and `Error` are terminal;
/// `Fetch` may act as terminal when a watcher is configured with it as the
/// break phase (the redirected response is then itself the payload).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Phase {
    Init,
    Request,
    Headers,
    Fetch,
    Response,
    Data,
    Error,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Data | Phase::Error)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Init => "INIT",
            Phase::Request => "REQUEST",
            Phase::Headers => "HEADERS",
            Phase::Fetch => "FETCH",
            Phase::Response => "RESPONSE",
            Phase::Data => "DATA",
            Phase::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// One phase write: correlation ID, the phase itself, and whatever payload
/// the emitter attached. Stored in the shared store under
/// `data-<requestId>-<crc32(pattern)>` and mirrored on the phase bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub phase: Phase,
    #[serde(rename = "requestId")]
    pub request_id: String,
    #[serde(flatten)]
    pub payload: serde_json::Map<String, Value>,
}

impl PhaseRecord {
    pub fn new(request_id: &str, phase: Phase, payload: Value) -> Self {
        let payload = match payload {
            Value::Object(map) => map,
            Value::Null => serde_json::Map::new(),
            other => {
                // Scalar payloads (e.g. raw header maps serialized elsewhere)
                // are wrapped so the record stays an object.
                let mut map = serde_json::Map::new();
                map.insert("data".to_string(), other);
                map
            }
        };
        Self {
            phase,
            request_id: request_id.to_string(),
            payload,
        }
    }
}

// ---------------------------------------------------------------------------
// Request / response snapshots carried in phase payloads
// ---------------------------------------------------------------------------

/// Description of an outbound call, captured just before transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSnapshot {
    /// Wire-compatible discriminator: `fetch_request` or `xhr_request`.
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: i64,
    pub url: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// Description of a completed call, captured after the body is available.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseSnapshot {
    /// `fetch_response` or `xhr_response`.
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: i64,
    pub url: String,
    pub status: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<Value>,
    /// Buffered body for plain responses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Reassembled aggregate for streamed bodies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ---------------------------------------------------------------------------
// Control-plane message shapes
// ---------------------------------------------------------------------------

/// Inbound command from the controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlCommand {
    Chat {
        payload: ChatPayload,
        #[serde(rename = "requestId")]
        request_id: String,
    },
    NewChat {
        #[serde(rename = "requestId", default)]
        request_id: Option<String>,
    },
    ChatReload {
        #[serde(rename = "chatId", default)]
        chat_id: Option<String>,
    },
    GetChatId,
    Heartbeat,
    Connected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatPayload {
    pub prompt: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Outbound event to the controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlEvent {
    /// Operation settled; carries the terminal phase record (or an error).
    Answer {
        #[serde(rename = "requestId")]
        request_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Incremental UI-observed fragment.
    AnswerStream {
        #[serde(rename = "requestId")]
        request_id: String,
        fragment: String,
    },
    Heartbeat {
        #[serde(rename = "appName")]
        app_name: String,
    },
    ReturnChatId {
        #[serde(rename = "chatId")]
        chat_id: Option<String>,
    },
}

impl ControlEvent {
    pub fn answer_ok(request_id: &str, data: Value) -> Self {
        ControlEvent::Answer {
            request_id: request_id.to_string(),
            data: Some(data),
            error: None,
        }
    }

    pub fn answer_err(request_id: &str, error: impl std::fmt::Display) -> Self {
        ControlEvent::Answer {
            request_id: request_id.to_string(),
            data: None,
            error: Some(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_command_round_trip() {
        let raw = r#"{"type":"chat","payload":{"prompt":"hi"},"requestId":"r1"}"#;
        let cmd: ControlCommand = serde_json::from_str(raw).unwrap();
        match cmd {
            ControlCommand::Chat {
                payload,
                request_id,
            } => {
                assert_eq!(payload.prompt, "hi");
                assert_eq!(request_id, "r1");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn answer_event_shape() {
        let evt = ControlEvent::answer_ok("r1", serde_json::json!({"phase": "DATA"}));
        let v = serde_json::to_value(&evt).unwrap();
        assert_eq!(v["type"], "answer");
        assert_eq!(v["requestId"], "r1");
        assert_eq!(v["data"]["phase"], "DATA");
        assert!(v.get("error").is_none());
    }

    #[test]
    fn phase_serializes_uppercase() {
        assert_eq!(serde_json::to_value(Phase::Data).unwrap(), "DATA");
        assert_eq!(
            serde_json::from_value::<Phase>(serde_json::json!("FETCH")).unwrap(),
            Phase::Fetch
        );
    }

    #[test]
    fn phase_record_wraps_scalar_payload() {
        let rec = PhaseRecord::new("r9", Phase::Headers, serde_json::json!("raw"));
        let v = serde_json::to_value(&rec).unwrap();
        assert_eq!(v["requestId"], "r9");
        assert_eq!(v["phase"], "HEADERS");
        assert_eq!(v["data"], "raw");
    }
}
