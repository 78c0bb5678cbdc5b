//! Line-delimited record-array form (`jsonl`/`ndjson`/`prose`): one encoded
//! entity per line, no enclosing array syntax. The `Value` passed through
//! this serializer is always a top-level `Value::Array` of records.

use super::{unsupported, Serializer};
use crate::error::Result;
use crate::value::Value;

pub struct LinesSerializer;

impl Serializer for LinesSerializer {
    fn serialize(&self, value: &Value) -> Result<Vec<u8>> {
        let items = match value {
            Value::Array(items) => items,
            other => return Err(unsupported("jsonl", format!("expected array of records, got {other:?}"))),
        };
        let mut out = String::new();
        for item in items {
            out.push_str(&serde_json::to_string(&item.to_json())?);
            out.push('\n');
        }
        Ok(out.into_bytes())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Value> {
        let text = std::str::from_utf8(bytes).map_err(|e| unsupported("jsonl", e))?;
        let mut items = Vec::new();
        for line in text.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let json: serde_json::Value = serde_json::from_str(trimmed)?;
            items.push(Value::from_json(json));
        }
        Ok(Value::Array(items))
    }
}
