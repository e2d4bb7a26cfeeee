use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::trace;

use super::types::ChangeEvent;
use crate::{Error, Result};

/// Decodes a raw message body into a [`ChangeEvent`].
///
/// Accepts both the bare `{before, after, source}` envelope and the
/// JSON-converter form that nests it under `payload` next to a `schema`
/// block. Unknown fields are ignored and absent optional fields decode
/// as `None`.
pub fn decode<S: DeserializeOwned>(raw: &[u8]) -> Result<ChangeEvent<S>> {
    let value: Value = serde_json::from_slice(raw).map_err(|e| Error::Decode {
        message: format!("invalid JSON: {}", e),
    })?;

    let envelope = match value {
        Value::Object(mut map) => {
            if !map.contains_key("before") && !map.contains_key("after") {
                if let Some(payload) = map.remove("payload") {
                    trace!("Unwrapping schema/payload envelope");
                    payload
                } else {
                    Value::Object(map)
                }
            } else {
                Value::Object(map)
            }
        }
        other => {
            return Err(Error::Decode {
                message: format!("expected a JSON object, got {}", json_kind(&other)),
            })
        }
    };

    if !envelope.is_object() {
        return Err(Error::Decode {
            message: format!("expected payload object, got {}", json_kind(&envelope)),
        });
    }

    serde_json::from_value(envelope).map_err(|e| Error::Decode {
        message: format!("invalid change event: {}", e),
    })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
