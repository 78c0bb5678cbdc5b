//! JSON-with-comments: strip comments with `json_comments`, then parse with
//! `serde_json`. Serializing back out drops comments — there is nowhere
//! to put them once the document is a `Value` tree.

use super::Serializer;
use crate::error::Result;
use crate::value::Value;
use json_comments::StripComments;
use std::io::Read;

pub struct JsoncSerializer;

impl Serializer for JsoncSerializer {
    fn serialize(&self, value: &Value) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(&value.to_json())?)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Value> {
        let mut stripped = String::new();
        StripComments::new(bytes)
            .read_to_string(&mut stripped)
            .map_err(|e| super::unsupported("jsonc", e))?;
        let json: serde_json::Value = serde_json::from_str(&stripped)?;
        Ok(Value::from_json(json))
    }
}
