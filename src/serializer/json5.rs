use super::Serializer;
use crate::error::Result;
use crate::value::Value;

pub struct Json5Serializer;

impl Serializer for Json5Serializer {
    fn serialize(&self, value: &Value) -> Result<Vec<u8>> {
        // json5 has no dedicated serializer; its own grammar is a superset
        // of JSON, so a pretty JSON document is always valid json5.
        Ok(serde_json::to_vec_pretty(&value.to_json())?)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Value> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| super::unsupported("json5", e))?;
        let json: serde_json::Value = json5::from_str(text)
            .map_err(|e| super::unsupported("json5", e))?;
        Ok(Value::from_json(json))
    }
}
