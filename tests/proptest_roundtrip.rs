//! Property tests for invariant 5 (`load(save(S)) = S`) and the
//! update-operator algebra (§4.5): `$increment`/`$decrement` compose with
//! plain replacement, and `$append`/`$prepend` compose with each other.

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use proptest::prelude::*;

use proseql::operators::apply_field_update;
use proseql::storage::MemoryAdapter;
use proseql::{CollectionConfig, Database, DatabaseConfig, Value};

fn leaf_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Int),
        (-1_000_000f64..1_000_000f64).prop_map(Value::Float),
        "[a-zA-Z0-9 ]{0,16}".prop_map(Value::String),
    ]
}

fn value_strategy() -> impl Strategy<Value = Value> {
    leaf_value().prop_recursive(3, 16, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::vec(("[a-z]{1,6}", inner), 0..4).prop_map(|pairs| {
                let mut map = IndexMap::new();
                for (k, v) in pairs {
                    map.insert(k, v);
                }
                Value::Object(map)
            }),
        ]
    })
}

fn fields_strategy() -> impl Strategy<Value = HashMap<String, Value>> {
    let key = "[a-z]{1,8}".prop_filter("not a reserved field name", |k| k != "id");
    prop::collection::hash_map(key, value_strategy(), 0..6)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Saving a collection's state and loading it back against the same
    /// storage yields the same entity set: same ids, same decoded fields,
    /// same timestamps (invariant 5, `load(save(S)) = S`).
    #[test]
    fn load_save_roundtrip(entries in prop::collection::vec(fields_strategy(), 0..8)) {
        common::init_tracing();
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let storage = Arc::new(MemoryAdapter::new());
            let config = DatabaseConfig::new()
                .with_collection(CollectionConfig::new("things").with_file("things.json"));
            let db = Database::open(config, storage.clone()).await.unwrap();
            let things = db.collection("things").unwrap();

            let mut created = HashMap::new();
            for (i, fields) in entries.into_iter().enumerate() {
                let id = format!("e{i}");
                let entity = things.create(fields, Some(id.clone())).unwrap();
                created.insert(id, entity);
            }
            db.flush().await.unwrap();

            let config2 = DatabaseConfig::new()
                .with_collection(CollectionConfig::new("things").with_file("things.json"));
            let reopened = Database::open(config2, storage.clone()).await.unwrap();
            let reloaded_things = reopened.collection("things").unwrap();

            assert_eq!(reloaded_things.len(), created.len());
            for (id, original) in &created {
                let reloaded = reloaded_things.get(id).unwrap_or_else(|| panic!("entity {id} missing after reload"));
                assert_eq!(reloaded.fields, original.fields);
                assert_eq!(reloaded.created_at, original.created_at);
                assert_eq!(reloaded.updated_at, original.updated_at);
            }
        });
    }
}

proptest! {
    /// `$increment` then `$set` collapses to the `$set` value, regardless of
    /// the starting number: `$set` always wins as the last operator applied.
    #[test]
    fn increment_then_set_collapses_to_set(start in any::<i64>(), delta in -1000i64..1000, set_to in any::<i64>()) {
        let update = Value::Object({
            let mut m = IndexMap::new();
            m.insert("$increment".to_string(), Value::Int(delta));
            m.insert("$set".to_string(), Value::Int(set_to));
            m
        });
        let result = apply_field_update(Some(&Value::Int(start)), &update);
        prop_assert_eq!(result, Value::Int(set_to));
    }

    /// `$append` followed by `$prepend` is associative with doing both in a
    /// single pass: the prepended element ends up first, the appended
    /// element last, original elements in between, regardless of starting
    /// array contents.
    #[test]
    fn append_then_prepend_preserves_middle(
        start in prop::collection::vec(any::<i64>(), 0..5),
        appended in any::<i64>(),
        prepended in any::<i64>(),
    ) {
        let start_value = Value::Array(start.iter().copied().map(Value::Int).collect());
        let update = Value::Object({
            let mut m = IndexMap::new();
            m.insert("$append".to_string(), Value::Int(appended));
            m.insert("$prepend".to_string(), Value::Int(prepended));
            m
        });
        let result = apply_field_update(Some(&start_value), &update);
        let Value::Array(items) = result else {
            panic!("expected array result");
        };
        prop_assert_eq!(items.len(), start.len() + 2);
        prop_assert_eq!(items.first(), Some(&Value::Int(prepended)));
        prop_assert_eq!(items.last(), Some(&Value::Int(appended)));
        let middle: Vec<i64> = items[1..items.len() - 1]
            .iter()
            .map(|v| v.as_i64().unwrap())
            .collect();
        prop_assert_eq!(middle, start);
    }
}
