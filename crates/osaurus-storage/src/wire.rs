//! JSON parameter binding and cell encoding.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rusqlite::types::{Value as SqlValue, ValueRef};
use serde_json::Value as JsonValue;

use crate::error::{DbError, DbResult};

/// Convert a JSON params array into owned SQLite values, in positional
/// order (`?1`, `?2`, ...).
///
/// Type mapping: `null` → NULL, integer → INTEGER, number → FLOAT,
/// string → TEXT (copied), boolean → INTEGER 0/1, nested arrays/objects →
/// their JSON text bound as TEXT.
pub(crate) fn params_to_values(params: &JsonValue) -> DbResult<Vec<SqlValue>> {
    let items = params
        .as_array()
        .ok_or_else(|| DbError::ExecFailed("params must be a JSON array".into()))?;

    items.iter().map(json_to_sql).collect()
}

fn json_to_sql(value: &JsonValue) -> DbResult<SqlValue> {
    Ok(match value {
        JsonValue::Null => SqlValue::Null,
        JsonValue::Bool(b) => SqlValue::Integer(i64::from(*b)),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                SqlValue::Integer(i)
            } else if let Some(f) = n.as_f64() {
                SqlValue::Real(f)
            } else {
                return Err(DbError::ExecFailed(format!("unbindable number: {n}")));
            }
        }
        JsonValue::String(s) => SqlValue::Text(s.clone()),
        // Nested structures round-trip as their JSON text.
        JsonValue::Array(_) | JsonValue::Object(_) => SqlValue::Text(value.to_string()),
    })
}

/// Encode one result cell for the wire.
///
/// NULL and numbers pass through as JSON scalars; TEXT is carried as a JSON
/// string *containing* the JSON-quoted text (so the consumer sees the exact
/// escaping SQLite stored); BLOB is carried as base64.
pub(crate) fn cell_to_json(cell: ValueRef<'_>) -> DbResult<JsonValue> {
    Ok(match cell {
        ValueRef::Null => JsonValue::Null,
        ValueRef::Integer(i) => JsonValue::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(JsonValue::Number)
            .ok_or_else(|| DbError::ExecFailed(format!("non-finite float in result: {f}")))?,
        ValueRef::Text(bytes) => {
            let text = std::str::from_utf8(bytes)
                .map_err(|e| DbError::ExecFailed(format!("invalid utf-8 in TEXT cell: {e}")))?;
            let quoted = serde_json::to_string(text)
                .map_err(|e| DbError::ExecFailed(e.to_string()))?;
            JsonValue::String(quoted)
        }
        ValueRef::Blob(bytes) => JsonValue::String(BASE64.encode(bytes)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_param_type_mapping() {
        let values =
            params_to_values(&json!([null, true, false, 7, 1.5, "text", [1, 2], {"k": "v"}]))
                .unwrap();
        assert!(matches!(values[0], SqlValue::Null));
        assert!(matches!(values[1], SqlValue::Integer(1)));
        assert!(matches!(values[2], SqlValue::Integer(0)));
        assert!(matches!(values[3], SqlValue::Integer(7)));
        assert!(matches!(values[4], SqlValue::Real(f) if (f - 1.5).abs() < f64::EPSILON));
        assert!(matches!(&values[5], SqlValue::Text(s) if s == "text"));
        assert!(matches!(&values[6], SqlValue::Text(s) if s == "[1,2]"));
        assert!(matches!(&values[7], SqlValue::Text(s) if s == "{\"k\":\"v\"}"));
    }

    #[test]
    fn test_non_array_params_are_rejected() {
        assert!(params_to_values(&json!({"k": 1})).is_err());
        assert!(params_to_values(&json!("scalar")).is_err());
    }

    #[test]
    fn test_text_cells_are_double_encoded() {
        let cell = cell_to_json(ValueRef::Text(b"a")).unwrap();
        assert_eq!(cell, JsonValue::String("\"a\"".into()));

        // Embedded quotes survive the inner encoding.
        let cell = cell_to_json(ValueRef::Text(b"say \"hi\"")).unwrap();
        assert_eq!(cell, JsonValue::String("\"say \\\"hi\\\"\"".into()));
    }

    #[test]
    fn test_scalar_cells_pass_through() {
        assert_eq!(cell_to_json(ValueRef::Null).unwrap(), JsonValue::Null);
        assert_eq!(cell_to_json(ValueRef::Integer(42)).unwrap(), json!(42));
        assert_eq!(cell_to_json(ValueRef::Real(2.5)).unwrap(), json!(2.5));
    }

    #[test]
    fn test_blob_cells_are_base64() {
        let cell = cell_to_json(ValueRef::Blob(b"hello")).unwrap();
        assert_eq!(cell, JsonValue::String("aGVsbG8=".into()));
    }
}
