use super::Serializer;
use crate::error::Result;
use crate::value::Value;

pub struct YamlSerializer;

impl Serializer for YamlSerializer {
    fn serialize(&self, value: &Value) -> Result<Vec<u8>> {
        Ok(serde_yaml::to_string(&value.to_json())?.into_bytes())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Value> {
        let json: serde_json::Value = serde_yaml::from_slice(bytes)?;
        Ok(Value::from_json(json))
    }
}
