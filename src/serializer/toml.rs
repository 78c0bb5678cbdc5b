//! TOML has no `null`; object fields whose value is `Value::Null` are
//! omitted on serialize (there is nothing sensible to round-trip them to),
//! and a `Value::Null` inside an array is rejected outright since position
//! would otherwise be lost.

use super::{unsupported, Serializer};
use crate::error::Result;
use crate::value::Value;
use indexmap::IndexMap;

pub struct TomlSerializer;

impl Serializer for TomlSerializer {
    fn serialize(&self, value: &Value) -> Result<Vec<u8>> {
        let toml_value = to_toml(value)?;
        Ok(toml::to_string_pretty(&toml_value)?.into_bytes())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Value> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| unsupported("toml", e))?;
        let toml_value: ::toml::Value = ::toml::from_str(text)?;
        Ok(from_toml(toml_value))
    }
}

fn to_toml(value: &Value) -> Result<::toml::Value> {
    Ok(match value {
        Value::Null => return Err(unsupported("toml", "null is not representable")),
        Value::Bool(b) => ::toml::Value::Boolean(*b),
        Value::Int(i) => ::toml::Value::Integer(*i),
        Value::Float(f) => ::toml::Value::Float(*f),
        Value::String(s) => ::toml::Value::String(s.clone()),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(to_toml(item)?);
            }
            ::toml::Value::Array(out)
        }
        Value::Object(map) => {
            let mut table = ::toml::map::Map::new();
            for (k, v) in map {
                if v.is_null() {
                    continue;
                }
                table.insert(k.clone(), to_toml(v)?);
            }
            ::toml::Value::Table(table)
        }
    })
}

fn from_toml(value: ::toml::Value) -> Value {
    match value {
        ::toml::Value::String(s) => Value::String(s),
        ::toml::Value::Integer(i) => Value::Int(i),
        ::toml::Value::Float(f) => Value::Float(f),
        ::toml::Value::Boolean(b) => Value::Bool(b),
        ::toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        ::toml::Value::Array(items) => Value::Array(items.into_iter().map(from_toml).collect()),
        ::toml::Value::Table(map) => {
            let mut out: IndexMap<String, Value> = IndexMap::new();
            for (k, v) in map {
                out.insert(k, from_toml(v));
            }
            Value::Object(out)
        }
    }
}
