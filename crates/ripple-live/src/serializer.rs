use serde_json::{Map, Value};

/// Encodes and decodes the opaque session blob carried in join payloads.
///
/// The embedding application decides the real encoding (typically a signed
/// token minted during the HTTP render). The session state machine only needs
/// the decoded map back, with the CSRF token under `_csrf_token`.
pub trait SessionSerializer: Send + Sync {
    fn serialize(&self, session: &Map<String, Value>) -> Result<String, String>;
    fn deserialize(&self, blob: &str) -> Result<Map<String, Value>, String>;
}

/// Plain-JSON blob codec, used by the adapter and the test suite.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSessionSerializer;

impl SessionSerializer for JsonSessionSerializer {
    fn serialize(&self, session: &Map<String, Value>) -> Result<String, String> {
        serde_json::to_string(session).map_err(|e| format!("failed to serialize session: {e}"))
    }

    fn deserialize(&self, blob: &str) -> Result<Map<String, Value>, String> {
        let value: Value = serde_json::from_str(blob)
            .map_err(|e| format!("failed to deserialize session: {e}"))?;
        match value {
            Value::Object(map) => Ok(map),
            other => Err(format!("session blob must be a JSON object, got {other}")),
        }
    }
}
