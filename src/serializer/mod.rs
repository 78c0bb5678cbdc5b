//! Serializer registry (C4) — format <-> bytes, keyed by file extension.
//!
//! Each format is treated purely as a `(bytes -> value, value -> bytes)`
//! service, per the spec's "Serializer codecs per format" non-goal: the
//! engine depends only on the `Serializer` trait, never on a specific crate.

mod hjson;
mod json;
mod json5;
mod jsonc;
mod lines;
mod toml;
mod toon;
mod yaml;

use crate::error::{ProseError, Result};
use crate::value::Value;

/// A supported on-disk format, inferred from a file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Json,
    Yaml,
    Toml,
    Json5,
    Jsonc,
    Hjson,
    Toon,
    /// Line-delimited record-array form (`jsonl`/`ndjson`/`prose`).
    Lines,
}

impl Format {
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Format::Yaml,
            "toml" => Format::Toml,
            "json5" => Format::Json5,
            "jsonc" => Format::Jsonc,
            "hjson" => Format::Hjson,
            "toon" => Format::Toon,
            "jsonl" | "ndjson" | "prose" => Format::Lines,
            _ => Format::Json,
        }
    }

    /// Whether this format's top-level document is an array of records
    /// (line-delimited) rather than a map keyed by id.
    pub fn is_record_array(self) -> bool {
        matches!(self, Format::Lines)
    }
}

/// `serialize`/`deserialize` for one format.
pub trait Serializer: Send + Sync {
    fn serialize(&self, value: &Value) -> Result<Vec<u8>>;
    fn deserialize(&self, bytes: &[u8]) -> Result<Value>;
}

/// Resolves a `Format` to its `Serializer` implementation.
pub struct SerializerRegistry;

impl SerializerRegistry {
    pub fn for_format(format: Format) -> Result<Box<dyn Serializer>> {
        Ok(match format {
            Format::Json => Box::new(json::JsonSerializer),
            Format::Yaml => Box::new(yaml::YamlSerializer),
            Format::Toml => Box::new(toml::TomlSerializer),
            Format::Json5 => Box::new(json5::Json5Serializer),
            Format::Jsonc => Box::new(jsonc::JsoncSerializer),
            Format::Hjson => Box::new(hjson::HjsonSerializer),
            Format::Toon => Box::new(toon::ToonSerializer),
            Format::Lines => Box::new(lines::LinesSerializer),
        })
    }

    pub fn by_extension(ext: &str) -> Result<Box<dyn Serializer>> {
        Self::for_format(Format::from_extension(ext))
    }
}

pub(crate) fn unsupported(format: &str, detail: impl std::fmt::Display) -> ProseError {
    ProseError::UnsupportedFormat(format!("{format}: {detail}"))
}
