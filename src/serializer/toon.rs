//! TOON (Token-Oriented Object Notation) — a compact, indentation-based,
//! tabular-friendly text format. No published crate implements it for this
//! ecosystem, so — per Non-goals, the engine still needs *some* concrete
//! serializer for every format key it advertises — this one is hand-written
//! in-crate rather than imported, unlike every other format here.
//!
//! Grammar (our subset):
//!   object   := (key ":" (scalar | NEWLINE INDENT value)  NEWLINE)*
//!   array    := uniform array-of-objects as a header + comma rows
//!               (`key[N]{f1,f2}:` then N indented `v1,v2` lines), or a
//!               bracketed scalar list (`key[N]: v1,v2,v3`), or — for
//!               mixed/non-uniform arrays — an indented `- value` per item.
//!   scalar   := null | true | false | number | bare-word | "quoted string"

use super::{unsupported, Serializer};
use crate::error::Result;
use crate::value::Value;
use indexmap::IndexMap;

pub struct ToonSerializer;

impl Serializer for ToonSerializer {
    fn serialize(&self, value: &Value) -> Result<Vec<u8>> {
        let mut out = String::new();
        write_value(&mut out, value, 0);
        Ok(out.into_bytes())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Value> {
        let text = std::str::from_utf8(bytes).map_err(|e| unsupported("toon", e))?;
        let lines: Vec<Line> = text
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(Line::parse)
            .collect();
        let mut pos = 0;
        parse_object(&lines, &mut pos, 0)
    }
}

struct Line {
    indent: usize,
    content: String,
}

impl Line {
    fn parse(raw: &str) -> Self {
        let indent = raw.chars().take_while(|c| *c == ' ').count();
        Line {
            indent,
            content: raw[indent..].to_string(),
        }
    }
}

fn indent_str(depth: usize) -> String {
    "  ".repeat(depth)
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::String(s) => quote_if_needed(s),
        _ => unreachable!("scalar_to_string called on non-scalar"),
    }
}

fn needs_quoting(s: &str) -> bool {
    s.is_empty()
        || s.contains(':')
        || s.contains(',')
        || s.contains('\n')
        || s.starts_with(' ')
        || s.ends_with(' ')
        || matches!(s, "null" | "true" | "false")
        || s.parse::<f64>().is_ok()
}

fn quote_if_needed(s: &str) -> String {
    if needs_quoting(s) {
        format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        s.to_string()
    }
}

fn is_scalar(v: &Value) -> bool {
    !matches!(v, Value::Array(_) | Value::Object(_))
}

fn object_keys_uniform(items: &[Value]) -> Option<Vec<String>> {
    let first = match items.first()? {
        Value::Object(map) => map.keys().cloned().collect::<Vec<_>>(),
        _ => return None,
    };
    for item in items {
        match item {
            Value::Object(map) => {
                if map.len() != first.len() || !first.iter().all(|k| map.contains_key(k)) {
                    return None;
                }
                if !map.values().all(is_scalar) {
                    return None;
                }
            }
            _ => return None,
        }
    }
    Some(first)
}

fn write_value(out: &mut String, value: &Value, depth: usize) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                write_field(out, k, v, depth);
            }
        }
        other => {
            out.push_str(&indent_str(depth));
            out.push_str(&scalar_to_string(other));
            out.push('\n');
        }
    }
}

fn write_field(out: &mut String, key: &str, value: &Value, depth: usize) {
    let pad = indent_str(depth);
    match value {
        Value::Array(items) if items.is_empty() => {
            out.push_str(&format!("{pad}{key}[0]:\n"));
        }
        Value::Array(items) => {
            if let Some(cols) = object_keys_uniform(items) {
                out.push_str(&format!("{pad}{key}[{}]{{{}}}:\n", items.len(), cols.join(",")));
                for item in items {
                    if let Value::Object(map) = item {
                        let row: Vec<String> = cols
                            .iter()
                            .map(|c| scalar_to_string(map.get(c).unwrap_or(&Value::Null)))
                            .collect();
                        out.push_str(&format!("{}{}\n", indent_str(depth + 1), row.join(",")));
                    }
                }
            } else if items.iter().all(is_scalar) {
                let row: Vec<String> = items.iter().map(scalar_to_string).collect();
                out.push_str(&format!("{pad}{key}[{}]: {}\n", items.len(), row.join(",")));
            } else {
                out.push_str(&format!("{pad}{key}[{}]:\n", items.len()));
                for item in items {
                    out.push_str(&format!("{}- ", indent_str(depth + 1)));
                    match item {
                        Value::Object(_) => {
                            out.push('\n');
                            write_value(out, item, depth + 2);
                        }
                        other => out.push_str(&format!("{}\n", scalar_to_string(other))),
                    }
                }
            }
        }
        Value::Object(_) => {
            out.push_str(&format!("{pad}{key}:\n"));
            write_value(out, value, depth + 1);
        }
        scalar => {
            out.push_str(&format!("{pad}{key}: {}\n", scalar_to_string(scalar)));
        }
    }
}

fn parse_scalar(text: &str) -> Value {
    let t = text.trim();
    if t == "null" {
        Value::Null
    } else if t == "true" {
        Value::Bool(true)
    } else if t == "false" {
        Value::Bool(false)
    } else if let Some(stripped) = t.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        Value::String(stripped.replace("\\\"", "\"").replace("\\\\", "\\"))
    } else if let Ok(i) = t.parse::<i64>() {
        Value::Int(i)
    } else if let Ok(f) = t.parse::<f64>() {
        Value::Float(f)
    } else {
        Value::String(t.to_string())
    }
}

fn split_row(row: &str) -> Vec<String> {
    // No quoted-comma escaping in row context; fields containing commas
    // must use the non-tabular array or object form.
    row.split(',').map(|s| s.to_string()).collect()
}

fn parse_object(lines: &[Line], pos: &mut usize, depth: usize) -> Result<Value> {
    let mut map: IndexMap<String, Value> = IndexMap::new();
    while *pos < lines.len() && lines[*pos].indent == depth {
        let line = &lines[*pos];
        let (key, rest) = split_field_header(&line.content)
            .ok_or_else(|| unsupported("toon", format!("malformed line: {}", line.content)))?;
        *pos += 1;

        if let Some((count, cols)) = rest.tabular_header {
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                if *pos >= lines.len() {
                    break;
                }
                let row_line = &lines[*pos];
                *pos += 1;
                let values = split_row(&row_line.content);
                let mut obj: IndexMap<String, Value> = IndexMap::new();
                for (col, val) in cols.iter().zip(values.iter()) {
                    obj.insert(col.clone(), parse_scalar(val));
                }
                items.push(Value::Object(obj));
            }
            map.insert(key, Value::Array(items));
        } else if let Some(inline) = rest.inline_array {
            let items = if inline.trim().is_empty() {
                Vec::new()
            } else {
                split_row(&inline).iter().map(|s| parse_scalar(s)).collect()
            };
            map.insert(key, Value::Array(items));
        } else if let Some(list_count) = rest.dash_list_count {
            let mut items = Vec::with_capacity(list_count);
            for _ in 0..list_count {
                if *pos >= lines.len() {
                    break;
                }
                let item_line = &lines[*pos];
                let content = item_line.content.strip_prefix("- ").unwrap_or(&item_line.content);
                if content.trim().is_empty() {
                    *pos += 1;
                    let nested = parse_object(lines, pos, depth + 2)?;
                    items.push(nested);
                } else {
                    items.push(parse_scalar(content));
                    *pos += 1;
                }
            }
            map.insert(key, Value::Array(items));
        } else if let Some(inline_scalar) = rest.inline_scalar {
            map.insert(key, parse_scalar(&inline_scalar));
        } else {
            // Nested object: following lines at depth+1.
            let nested = parse_object(lines, pos, depth + 1)?;
            map.insert(key, nested);
        }
    }
    Ok(Value::Object(map))
}

struct FieldRest {
    tabular_header: Option<(usize, Vec<String>)>,
    inline_array: Option<String>,
    dash_list_count: Option<usize>,
    inline_scalar: Option<String>,
}

fn split_field_header(content: &str) -> Option<(String, FieldRest)> {
    // key[N]{c1,c2}:
    if let Some(bracket) = content.find('[') {
        let key = content[..bracket].to_string();
        let rest = &content[bracket + 1..];
        let close = rest.find(']')?;
        let count: usize = rest[..close].parse().ok()?;
        let after = &rest[close + 1..];
        if let Some(brace) = after.strip_prefix('{') {
            let end = brace.find('}')?;
            let cols: Vec<String> = brace[..end].split(',').map(|s| s.to_string()).collect();
            return Some((
                key,
                FieldRest {
                    tabular_header: Some((count, cols)),
                    inline_array: None,
                    dash_list_count: None,
                    inline_scalar: None,
                },
            ));
        }
        let after_colon = after.strip_prefix(':')?;
        let trimmed = after_colon.trim();
        if trimmed.is_empty() {
            return Some((
                key,
                FieldRest {
                    tabular_header: None,
                    inline_array: None,
                    dash_list_count: Some(count),
                    inline_scalar: None,
                },
            ));
        }
        return Some((
            key,
            FieldRest {
                tabular_header: None,
                inline_array: Some(trimmed.to_string()),
                dash_list_count: None,
                inline_scalar: None,
            },
        ));
    }

    let colon = content.find(':')?;
    let key = content[..colon].to_string();
    let value = content[colon + 1..].trim();
    if value.is_empty() {
        Some((
            key,
            FieldRest {
                tabular_header: None,
                inline_array: None,
                dash_list_count: None,
                inline_scalar: None,
            },
        ))
    } else {
        Some((
            key,
            FieldRest {
                tabular_header: None,
                inline_array: None,
                dash_list_count: None,
                inline_scalar: Some(value.to_string()),
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_flat_object() {
        let mut map = IndexMap::new();
        map.insert("title".to_string(), Value::String("Dune".to_string()));
        map.insert("year".to_string(), Value::Int(1965));
        map.insert("available".to_string(), Value::Bool(true));
        let value = Value::Object(map);

        let ser = ToonSerializer;
        let bytes = ser.serialize(&value).unwrap();
        let back = ser.deserialize(&bytes).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn round_trips_tabular_array() {
        let mut row1 = IndexMap::new();
        row1.insert("id".to_string(), Value::String("1".to_string()));
        row1.insert("name".to_string(), Value::String("Alice".to_string()));
        let mut row2 = IndexMap::new();
        row2.insert("id".to_string(), Value::String("2".to_string()));
        row2.insert("name".to_string(), Value::String("Bob".to_string()));

        let mut map = IndexMap::new();
        map.insert(
            "users".to_string(),
            Value::Array(vec![Value::Object(row1), Value::Object(row2)]),
        );
        let value = Value::Object(map);

        let ser = ToonSerializer;
        let bytes = ser.serialize(&value).unwrap();
        let back = ser.deserialize(&bytes).unwrap();
        assert_eq!(back, value);
    }
}
