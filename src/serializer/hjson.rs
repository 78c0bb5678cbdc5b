use super::Serializer;
use crate::error::Result;
use crate::value::Value;

pub struct HjsonSerializer;

impl Serializer for HjsonSerializer {
    fn serialize(&self, value: &Value) -> Result<Vec<u8>> {
        // deser-hjson is read-only; Hjson is a human-editing format, so we
        // write plain JSON, which is valid Hjson (Hjson is a JSON superset).
        Ok(serde_json::to_vec_pretty(&value.to_json())?)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Value> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| super::unsupported("hjson", e))?;
        let json: serde_json::Value =
            deser_hjson::from_str(text).map_err(|e| super::unsupported("hjson", e))?;
        Ok(Value::from_json(json))
    }
}
