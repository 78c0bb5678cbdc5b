//! Update operators (§4.5).
//!
//! An update value is either a direct replacement or an *operator object*,
//! distinguished by whether it is a `Value::Object` whose keys are
//! `$`-prefixed. Per the "dynamic operator dispatch -> tagged variants"
//! design note, each operator name is matched once against the current
//! field's runtime kind rather than re-inspected per call site.
//!
//! `$remove` doubles as value-equality removal and predicate removal:
//! `$remove(5)` / `$remove([5, 6])` drop elements equal to the literal(s),
//! while `$remove({"$gt": 5})` reuses the `where`-clause comparison
//! operators (`src/filter.rs`) evaluated directly against each element.

use indexmap::IndexMap;

use crate::filter::{apply_op, field_op_from_object};
use crate::value::Value;

/// Apply one field's update expression against its current value (`None` if
/// the field is absent), returning the new value.
pub fn apply_field_update(current: Option<&Value>, update: &Value) -> Value {
    match update {
        Value::Object(map) if is_operator_object(map) => apply_operators(current, map),
        other => other.clone(),
    }
}

fn is_operator_object(map: &IndexMap<String, Value>) -> bool {
    map.keys().next().map(|k| k.starts_with('$')).unwrap_or(false)
}

fn apply_operators(current: Option<&Value>, ops: &IndexMap<String, Value>) -> Value {
    let mut value = current.cloned().unwrap_or(Value::Null);
    for (op, arg) in ops {
        value = apply_one(&value, op, arg);
    }
    value
}

fn apply_one(current: &Value, op: &str, arg: &Value) -> Value {
    if op == "$set" {
        return arg.clone();
    }
    match current {
        Value::Int(_) | Value::Float(_) => match op {
            "$increment" => numeric_op(current, arg, |a, b| a + b),
            "$decrement" => numeric_op(current, arg, |a, b| a - b),
            "$multiply" => numeric_op(current, arg, |a, b| a * b),
            _ => current.clone(),
        },
        Value::String(s) => match op {
            "$append" => Value::String(format!("{s}{}", arg.as_str().unwrap_or_default())),
            "$prepend" => Value::String(format!("{}{s}", arg.as_str().unwrap_or_default())),
            _ => current.clone(),
        },
        Value::Array(items) => match op {
            "$append" => {
                let mut next = items.clone();
                extend_one_or_many(&mut next, arg);
                Value::Array(next)
            }
            "$prepend" => {
                let mut prefix = Vec::new();
                extend_one_or_many(&mut prefix, arg);
                prefix.extend(items.clone());
                Value::Array(prefix)
            }
            "$remove" => {
                // `arg` is either a literal (or array of literals) to drop by
                // value equality, or a single-key operator object (e.g.
                // `{"$gt": 5}`) evaluated as a predicate against each element.
                let predicate = match arg {
                    Value::Object(map) => field_op_from_object(map),
                    _ => None,
                };
                let kept: Vec<Value> = match predicate {
                    Some(field_op) => items.iter().filter(|item| !apply_op(item, &field_op)).cloned().collect(),
                    None => {
                        let targets: Vec<&Value> = match arg {
                            Value::Array(a) => a.iter().collect(),
                            other => vec![other],
                        };
                        items.iter().filter(|item| !targets.contains(item)).cloned().collect()
                    }
                };
                Value::Array(kept)
            }
            _ => current.clone(),
        },
        Value::Bool(b) => match op {
            "$toggle" => Value::Bool(!b),
            _ => current.clone(),
        },
        _ => current.clone(),
    }
}

fn extend_one_or_many(into: &mut Vec<Value>, arg: &Value) {
    match arg {
        Value::Array(items) => into.extend(items.clone()),
        other => into.push(other.clone()),
    }
}

fn numeric_op(current: &Value, delta: &Value, f: impl Fn(f64, f64) -> f64) -> Value {
    match (current, delta) {
        (Value::Int(a), Value::Int(b)) => Value::Int(f(*a as f64, *b as f64) as i64),
        _ => {
            let a = current.as_f64().unwrap_or(0.0);
            let b = delta.as_f64().unwrap_or(0.0);
            Value::Float(f(a, b))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op_obj(name: &str, arg: Value) -> Value {
        let mut m = IndexMap::new();
        m.insert(name.to_string(), arg);
        Value::Object(m)
    }

    #[test]
    fn increment_preserves_integer_kind() {
        let current = Value::Int(5);
        let update = op_obj("$increment", Value::Int(3));
        assert_eq!(apply_field_update(Some(&current), &update), Value::Int(8));
    }

    #[test]
    fn unrecognized_operator_is_noop() {
        let current = Value::Int(5);
        let update = op_obj("$append", Value::Int(3));
        assert_eq!(apply_field_update(Some(&current), &update), Value::Int(5));
    }

    #[test]
    fn set_works_on_any_kind() {
        let current = Value::String("a".to_string());
        let update = op_obj("$set", Value::Int(9));
        assert_eq!(apply_field_update(Some(&current), &update), Value::Int(9));
    }

    #[test]
    fn plain_object_without_dollar_keys_is_direct_replace() {
        let mut obj = IndexMap::new();
        obj.insert("nested".to_string(), Value::Bool(true));
        let update = Value::Object(obj.clone());
        assert_eq!(apply_field_update(Some(&Value::Null), &update), Value::Object(obj));
    }

    #[test]
    fn remove_drops_matching_values() {
        let current = Value::Array(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        let update = op_obj("$remove", Value::Int(2));
        assert_eq!(
            apply_field_update(Some(&current), &update),
            Value::Array(vec![Value::Int(1), Value::Int(3)])
        );
    }

    #[test]
    fn remove_drops_by_predicate() {
        let current = Value::Array(vec![Value::Int(1), Value::Int(2), Value::Int(3), Value::Int(4)]);
        let mut predicate = IndexMap::new();
        predicate.insert("$gte".to_string(), Value::Int(3));
        let update = op_obj("$remove", Value::Object(predicate));
        assert_eq!(
            apply_field_update(Some(&current), &update),
            Value::Array(vec![Value::Int(1), Value::Int(2)])
        );
    }

    #[test]
    fn toggle_flips_boolean() {
        let current = Value::Bool(true);
        let update = op_obj("$toggle", Value::Bool(true));
        assert_eq!(apply_field_update(Some(&current), &update), Value::Bool(false));
    }
}
