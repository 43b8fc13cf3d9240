//! Structured payloads in protobuf `Struct` object form.
//!
//! `{"user": "abc"}` encodes as `{"fields": {"user": {"stringValue": "abc"}}}`.
//! Truncation paths such as `jsonPayload.fields.message.stringValue` address
//! this form.

use serde_json::{Map, Value, json};

use crate::error::{LoggingError, Result};

/// Deepest nesting the service accepts inside a `Struct`.
pub const MAX_STRUCT_DEPTH: usize = 100;

/// Marker substituted for over-nested values when `remove_circular` is set.
pub const CIRCULAR_MARKER: &str = "[Circular]";

pub fn encode_struct(map: &Map<String, Value>, remove_circular: bool) -> Result<Value> {
    encode_fields(map, remove_circular, 0)
}

fn encode_fields(map: &Map<String, Value>, remove_circular: bool, depth: usize) -> Result<Value> {
    let fields = map
        .iter()
        .map(|(key, value)| Ok((key.clone(), encode_value(value, remove_circular, depth + 1)?)))
        .collect::<Result<Map<String, Value>>>()?;

    Ok(json!({ "fields": fields }))
}

fn encode_value(value: &Value, remove_circular: bool, depth: usize) -> Result<Value> {
    let nested = matches!(value, Value::Object(_) | Value::Array(_));
    if nested && depth >= MAX_STRUCT_DEPTH {
        return if remove_circular {
            Ok(json!({ "stringValue": CIRCULAR_MARKER }))
        } else {
            Err(LoggingError::PayloadTooDeep(MAX_STRUCT_DEPTH))
        };
    }

    Ok(match value {
        Value::Null => json!({ "nullValue": "NULL_VALUE" }),
        Value::Bool(b) => json!({ "boolValue": b }),
        Value::Number(n) => json!({ "numberValue": n }),
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => {
            let values = items
                .iter()
                .map(|item| encode_value(item, remove_circular, depth + 1))
                .collect::<Result<Vec<_>>>()?;
            json!({ "listValue": { "values": values } })
        }
        Value::Object(map) => json!({ "structValue": encode_fields(map, remove_circular, depth)? }),
    })
}

/// Inverse of [`encode_struct`]. Unknown shapes decode to `null`.
pub fn decode_struct(value: &Value) -> Map<String, Value> {
    value
        .get("fields")
        .and_then(Value::as_object)
        .map(|fields| {
            fields
                .iter()
                .map(|(key, value)| (key.clone(), decode_value(value)))
                .collect()
        })
        .unwrap_or_default()
}

fn decode_value(value: &Value) -> Value {
    let Some((kind, v)) = value.as_object().and_then(|obj| obj.iter().next()) else {
        return Value::Null;
    };

    match kind.as_str() {
        "boolValue" | "numberValue" | "stringValue" => v.clone(),
        "structValue" => Value::Object(decode_struct(v)),
        "listValue" => Value::Array(
            v.get("values")
                .and_then(Value::as_array)
                .map(|values| values.iter().map(decode_value).collect())
                .unwrap_or_default(),
        ),
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn encodes_scalars_and_nesting() {
        let payload = obj(json!({
            "message": "hi",
            "count": 3,
            "ok": true,
            "none": null,
            "err": {"stack": "trace"},
            "tags": ["a"],
        }));

        let encoded = encode_struct(&payload, false).unwrap();
        let fields = &encoded["fields"];
        assert_eq!(fields["message"], json!({"stringValue": "hi"}));
        assert_eq!(fields["count"], json!({"numberValue": 3}));
        assert_eq!(fields["ok"], json!({"boolValue": true}));
        assert_eq!(fields["none"], json!({"nullValue": "NULL_VALUE"}));
        assert_eq!(
            fields["err"]["structValue"]["fields"]["stack"]["stringValue"],
            "trace"
        );
        assert_eq!(fields["tags"]["listValue"]["values"][0]["stringValue"], "a");

        assert_eq!(decode_struct(&encoded), payload);
    }

    fn deeply_nested(levels: usize) -> Map<String, Value> {
        let mut value = json!("leaf");
        for _ in 0..levels {
            value = json!({ "inner": value });
        }
        obj(value)
    }

    #[test]
    fn rejects_over_nested_payload() {
        let err = encode_struct(&deeply_nested(MAX_STRUCT_DEPTH + 5), false).unwrap_err();
        assert!(matches!(err, LoggingError::PayloadTooDeep(MAX_STRUCT_DEPTH)));
    }

    #[test]
    fn marks_over_nested_payload_when_removing_circular() {
        let encoded = encode_struct(&deeply_nested(MAX_STRUCT_DEPTH + 5), true).unwrap();
        assert!(encoded.to_string().contains(CIRCULAR_MARKER));
    }
}
