use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

pub const EVENT_JOIN: &str = "phx_join";
pub const EVENT_HEARTBEAT: &str = "heartbeat";
pub const EVENT_EVENT: &str = "event";
pub const EVENT_LIVE_PATCH: &str = "live_patch";
pub const EVENT_LEAVE: &str = "phx_leave";

pub const EVENT_REPLY: &str = "phx_reply";
pub const EVENT_DIFF: &str = "diff";
pub const EVENT_LIVE_REDIRECT: &str = "live_redirect";

/// One frame of the wire protocol: the ordered tuple
/// `[join_ref, msg_ref, topic, event, payload]`.
///
/// Replies echo the request's references; server-initiated pushes carry
/// null references.
#[derive(Debug, Clone, PartialEq)]
pub struct WireMessage {
    pub join_ref: Option<String>,
    pub msg_ref: Option<String>,
    pub topic: String,
    pub event: String,
    pub payload: Value,
}

impl WireMessage {
    pub fn decode(raw: &str) -> Result<Self, String> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| format!("invalid wire frame: {e}"))?;
        let arr = value
            .as_array()
            .ok_or_else(|| "wire frame must be a JSON array".to_string())?;
        if arr.len() != 5 {
            return Err(format!(
                "wire frame must be a 5-element tuple, got {}",
                arr.len()
            ));
        }

        let topic = arr[2]
            .as_str()
            .ok_or_else(|| "wire frame topic must be a string".to_string())?
            .to_string();
        let event = arr[3]
            .as_str()
            .ok_or_else(|| "wire frame event must be a string".to_string())?
            .to_string();

        Ok(Self {
            join_ref: decode_ref(&arr[0])?,
            msg_ref: decode_ref(&arr[1])?,
            topic,
            event,
            payload: arr[4].clone(),
        })
    }

    pub fn encode(&self) -> Result<String, String> {
        let tuple = json!([
            self.join_ref,
            self.msg_ref,
            self.topic,
            self.event,
            self.payload
        ]);
        serde_json::to_string(&tuple).map_err(|e| format!("failed to encode wire frame: {e}"))
    }

    /// An ok reply correlated to `request`.
    pub fn reply_ok(request: &WireMessage, response: Value) -> Self {
        Self {
            join_ref: request.join_ref.clone(),
            msg_ref: request.msg_ref.clone(),
            topic: request.topic.clone(),
            event: EVENT_REPLY.to_string(),
            payload: json!({ "response": response, "status": "ok" }),
        }
    }

    /// A server-initiated push with null join/message references.
    pub fn push(topic: impl Into<String>, event: impl Into<String>, payload: Value) -> Self {
        Self {
            join_ref: None,
            msg_ref: None,
            topic: topic.into(),
            event: event.into(),
            payload,
        }
    }
}

fn decode_ref(value: &Value) -> Result<Option<String>, String> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        other => Err(format!("wire frame reference must be string or null, got {other}")),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct JoinPayload {
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub session: String,
    #[serde(rename = "static", default)]
    pub static_token: Option<String>,
    pub url: Option<String>,
    pub redirect: Option<String>,
    #[serde(default)]
    pub flash: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventPayload {
    #[serde(rename = "type")]
    pub event_type: String,
    pub event: String,
    #[serde(default)]
    pub value: Value,
    pub cid: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivePatchPayload {
    pub url: String,
}

/// Decodes an event payload's typed value.
///
/// Form payloads arrive as an urlencoded `key=value` string and require a
/// decode step; keyup/keydown carry `{key, value?}`; every other type carries
/// the value directly.
pub fn decode_event_value(event_type: &str, value: Value) -> Result<Value, String> {
    match event_type {
        "form" => {
            let raw = value
                .as_str()
                .ok_or_else(|| "form event value must be an encoded string".to_string())?;
            Ok(Value::Object(decode_form(raw)))
        }
        _ => Ok(value),
    }
}

/// Decodes an urlencoded form body into a value map. Later occurrences of a
/// key overwrite earlier ones.
pub fn decode_form(raw: &str) -> Map<String, Value> {
    let mut out = Map::new();
    for pair in raw.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        out.insert(
            percent_decode(key),
            Value::String(percent_decode(value)),
        );
    }
    out
}

fn percent_decode(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' => {
                let hex = bytes.get(i + 1..i + 3).and_then(|h| {
                    std::str::from_utf8(h)
                        .ok()
                        .and_then(|s| u8::from_str_radix(s, 16).ok())
                });
                match hex {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    None => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}
