use super::Serializer;
use crate::error::Result;
use crate::value::Value;

pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize(&self, value: &Value) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(&value.to_json())?)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Value> {
        let json: serde_json::Value = serde_json::from_slice(bytes)?;
        Ok(Value::from_json(json))
    }
}
