//! Agent gateway wire frames.
//!
//! Outbound frames are `{"type":"req","id","method","params"}`. Inbound
//! frames are either `event` (unsolicited, carries `event` + `payload`) or
//! `res` (answers a request id, carries `ok` + `payload` or `error`).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use shimeji_core::{GatewaySession, ProviderError};

pub const PROTOCOL_VERSION: u32 = 3;
pub const CLIENT_ID: &str = "gateway-client";
pub const CLIENT_VERSION: &str = "1.0.0";
pub const CHALLENGE_EVENT: &str = "connect.challenge";

const SCOPES: [&str; 2] = ["operator.read", "operator.write"];

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InboundFrame {
    Event(EventFrame),
    Res(ResponseFrame),
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub struct EventFrame {
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub status: Value,
    #[serde(default)]
    pub done: Value,
}

impl EventFrame {
    pub fn is_challenge(&self) -> bool {
        self.event.as_deref() == Some(CHALLENGE_EVENT)
    }

    /// Explicit end-of-reply marker on the payload or on the frame itself.
    pub fn signals_completion(&self) -> bool {
        signals_completion(&self.payload) || is_terminal_status(&self.status) || self.done == Value::Bool(true)
    }
}

#[derive(Debug, Deserialize)]
pub struct ResponseFrame {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub ok: Option<bool>,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub error: Option<RpcError>,
}

impl ResponseFrame {
    /// `hello-ok` answer to the connect request.
    pub fn is_hello(&self) -> bool {
        self.ok == Some(true) || self.payload.get("type").and_then(Value::as_str) == Some("hello-ok")
    }

    /// Run-id acknowledgement for an accepted chat request; carries no text.
    pub fn is_run_ack(&self) -> bool {
        self.payload.get("runId").is_some_and(|v| !v.is_null())
    }

    /// Whether this frame answers request `id`. Frames without an id are
    /// accepted.
    pub fn answers(&self, id: &str) -> bool {
        self.id.as_deref().is_none_or(|own| own == id)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RpcError {
    #[serde(default)]
    pub code: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
}

impl RpcError {
    pub fn code(&self) -> Option<String> {
        match self.code.as_ref()? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// The message, else the code, else `fallback`.
    pub fn describe(&self, fallback: &str) -> String {
        self.message
            .clone()
            .filter(|m| !m.trim().is_empty())
            .or_else(|| self.code())
            .unwrap_or_else(|| fallback.to_string())
    }
}

fn is_terminal_status(status: &Value) -> bool {
    matches!(status.as_str(), Some("completed" | "done"))
}

/// `status: completed|done`, `type: done` or `done: true` on a payload.
pub fn signals_completion(payload: &Value) -> bool {
    payload.get("status").is_some_and(is_terminal_status)
        || payload.get("type").and_then(Value::as_str) == Some("done")
        || payload.get("done").and_then(Value::as_bool) == Some(true)
}

/// Pull reply text out of a payload.
///
/// Tried in order: the payload itself as a string, `content`, `text`,
/// `delta.content`, `delta.text`, `message.content` (string or parts), and
/// finally a top-level `content` parts array.
pub fn extract_text(payload: &Value) -> Option<String> {
    let text = match payload {
        Value::String(s) => s.clone(),
        Value::Object(_) => extract_from_object(payload),
        _ => String::new(),
    };
    (!text.is_empty()).then_some(text)
}

fn extract_from_object(payload: &Value) -> String {
    let str_at = |v: &Value, key: &str| v.get(key).and_then(Value::as_str).map(str::to_string);

    if let Some(s) = str_at(payload, "content").or_else(|| str_at(payload, "text")) {
        return s;
    }
    if let Some(delta) = payload.get("delta")
        && let Some(s) = str_at(delta, "content").or_else(|| str_at(delta, "text"))
    {
        return s;
    }
    if let Some(message) = payload.get("message") {
        match message.get("content") {
            Some(Value::String(s)) => return s.clone(),
            Some(Value::Array(parts)) => return join_parts(parts),
            _ => {}
        }
    }
    if let Some(Value::Array(parts)) = payload.get("content") {
        return join_parts(parts);
    }
    String::new()
}

fn join_parts(parts: &[Value]) -> String {
    parts
        .iter()
        .filter_map(|part| {
            ["text", "content", "value"]
                .iter()
                .find_map(|key| part.get(key).and_then(Value::as_str).filter(|s| !s.is_empty()))
        })
        .collect()
}

// --- Outbound ---

#[derive(Debug, Serialize)]
struct RequestFrame<'a, P> {
    #[serde(rename = "type")]
    kind: &'static str,
    id: &'a str,
    method: &'static str,
    params: P,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConnectParams<'a> {
    min_protocol: u32,
    max_protocol: u32,
    client: ClientInfo,
    role: &'static str,
    scopes: [&'static str; 2],
    auth: AuthParams<'a>,
}

#[derive(Debug, Serialize)]
struct ClientInfo {
    id: &'static str,
    version: &'static str,
    platform: &'static str,
    mode: &'static str,
}

#[derive(Debug, Serialize)]
struct AuthParams<'a> {
    token: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatSendParams<'a> {
    session_key: &'a str,
    message: &'a str,
    idempotency_key: &'a str,
}

fn encode<T: Serialize>(frame: &T) -> Result<String, ProviderError> {
    serde_json::to_string(frame).map_err(|e| ProviderError::Malformed(format!("Failed to encode frame: {e}")))
}

/// The `connect` request answering a challenge.
pub fn connect_request(id: &str, token: &str) -> Result<String, ProviderError> {
    encode(&RequestFrame {
        kind: "req",
        id,
        method: "connect",
        params: ConnectParams {
            min_protocol: PROTOCOL_VERSION,
            max_protocol: PROTOCOL_VERSION,
            client: ClientInfo {
                id: CLIENT_ID,
                version: CLIENT_VERSION,
                platform: "desktop",
                mode: "backend",
            },
            role: "operator",
            scopes: SCOPES,
            auth: AuthParams { token },
        },
    })
}

/// The single `chat.send` request of an attempt.
pub fn chat_request(id: &str, session: &GatewaySession, message: &str) -> Result<String, ProviderError> {
    encode(&RequestFrame {
        kind: "req",
        id,
        method: "chat.send",
        params: ChatSendParams {
            session_key: &session.session_key,
            message,
            idempotency_key: &session.idempotency_key,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(raw: Value) -> InboundFrame {
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn challenge_event_recognised() {
        match parse(json!({"type":"event","event":"connect.challenge","payload":{"nonce":"n"}})) {
            InboundFrame::Event(ev) => assert!(ev.is_challenge()),
            other => panic!("Expected event, got: {other:?}"),
        }
    }

    #[test]
    fn unknown_frame_type_is_other() {
        assert!(matches!(parse(json!({"type":"ping"})), InboundFrame::Other));
    }

    #[test]
    fn hello_ok_by_flag_or_payload() {
        let InboundFrame::Res(res) = parse(json!({"type":"res","id":"c1","ok":true})) else {
            panic!("Expected res");
        };
        assert!(res.is_hello());

        let InboundFrame::Res(res) = parse(json!({"type":"res","payload":{"type":"hello-ok"}})) else {
            panic!("Expected res");
        };
        assert!(res.is_hello());
    }

    #[test]
    fn response_id_matching() {
        let InboundFrame::Res(res) = parse(json!({"type":"res","id":"chat-1","ok":true})) else {
            panic!("Expected res");
        };
        assert!(res.answers("chat-1"));
        assert!(!res.answers("chat-2"));

        let InboundFrame::Res(res) = parse(json!({"type":"res","ok":true})) else {
            panic!("Expected res");
        };
        assert!(res.answers("anything"));
    }

    #[test]
    fn run_ack_detected() {
        let InboundFrame::Res(res) = parse(json!({"type":"res","ok":true,"payload":{"runId":"r1"}})) else {
            panic!("Expected res");
        };
        assert!(res.is_run_ack());
    }

    #[test]
    fn extract_text_precedence() {
        assert_eq!(extract_text(&json!("plain")).as_deref(), Some("plain"));
        assert_eq!(extract_text(&json!({"content":"c","text":"t"})).as_deref(), Some("c"));
        assert_eq!(extract_text(&json!({"text":"t"})).as_deref(), Some("t"));
        assert_eq!(extract_text(&json!({"delta":{"text":"d"}})).as_deref(), Some("d"));
        assert_eq!(extract_text(&json!({"message":{"content":"m"}})).as_deref(), Some("m"));
        assert_eq!(extract_text(&json!({"status":"done"})), None);
        assert_eq!(extract_text(&json!(42)), None);
    }

    #[test]
    fn extract_text_from_parts() {
        let payload = json!({"message":{"content":[{"type":"text","text":"Hel"},{"value":"lo"},{"x":1}]}});
        assert_eq!(extract_text(&payload).as_deref(), Some("Hello"));

        let payload = json!({"content":[{"content":"A"},{"text":"B"}]});
        assert_eq!(extract_text(&payload).as_deref(), Some("AB"));
    }

    #[test]
    fn completion_markers() {
        assert!(signals_completion(&json!({"status":"completed"})));
        assert!(signals_completion(&json!({"type":"done"})));
        assert!(signals_completion(&json!({"done":true})));
        assert!(!signals_completion(&json!({"status":"streaming"})));

        let InboundFrame::Event(ev) = parse(json!({"type":"event","event":"chat","status":"done","payload":{}})) else {
            panic!("Expected event");
        };
        assert!(ev.signals_completion());
    }

    #[test]
    fn connect_request_shape() {
        let frame: Value = serde_json::from_str(&connect_request("connect-1", "tok").unwrap()).unwrap();
        assert_eq!(frame["type"], "req");
        assert_eq!(frame["method"], "connect");
        assert_eq!(frame["params"]["minProtocol"], 3);
        assert_eq!(frame["params"]["maxProtocol"], 3);
        assert_eq!(frame["params"]["client"]["id"], "gateway-client");
        assert_eq!(frame["params"]["client"]["mode"], "backend");
        assert_eq!(frame["params"]["role"], "operator");
        assert_eq!(frame["params"]["scopes"], json!(["operator.read", "operator.write"]));
        assert_eq!(frame["params"]["auth"]["token"], "tok");
    }

    #[test]
    fn chat_request_shape() {
        let session = GatewaySession {
            session_key: "agent:main:main".into(),
            idempotency_key: "idem-1".into(),
        };
        let frame: Value = serde_json::from_str(&chat_request("chat-1", &session, "hi").unwrap()).unwrap();
        assert_eq!(frame["method"], "chat.send");
        assert_eq!(frame["params"]["sessionKey"], "agent:main:main");
        assert_eq!(frame["params"]["message"], "hi");
        assert_eq!(frame["params"]["idempotencyKey"], "idem-1");
    }

    #[test]
    fn rpc_error_description() {
        let err = RpcError {
            code: Some(json!(4001)),
            message: None,
        };
        assert_eq!(err.describe("x"), "4001");
        assert_eq!(RpcError::default().describe("Authentication failed"), "Authentication failed");
    }
}
