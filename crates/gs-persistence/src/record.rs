//! Conversion between a [`GameObject`] and the opaque [`RawRecord`] the
//! storage driver persists, and the reference-stub walk used both when
//! loading (§4.2 `load`) and when resolving the unload dependency graph
//! (§4.2 `postRequestProc`, §9).

use std::collections::HashSet;

use gs_model::GameObject;
use gs_storage::RawRecord;
use gs_tsid::{Kind, Tsid};
use serde_json::Value;

use crate::PersistenceError;

/// Back-reference field names the unload walk must not follow, or every
/// object graph collapses into a cycle (spec §9 "Cyclic object graphs").
pub const BACKREF_FIELDS: &[&str] = &["owner", "container", "location"];

/// Dependent kinds the unload walk descends into (spec §9 Open Questions:
/// "Specified here: include `B`, `I`, `D`, `Q`").
pub const UNLOAD_CHILD_KINDS: &[Kind] = &[Kind::Bag, Kind::Item, Kind::DataContainer, Kind::Quest];

pub fn object_to_record(obj: &GameObject) -> RawRecord {
    let value = serde_json::to_value(obj).expect("GameObject always serializes");
    let fields = match value {
        Value::Object(map) => map,
        _ => unreachable!("GameObject serializes to a JSON object"),
    };
    RawRecord { tsid: obj.tsid, fields }
}

pub fn record_to_object(record: RawRecord) -> Result<GameObject, PersistenceError> {
    serde_json::from_value(Value::Object(record.fields))
        .map_err(|source| PersistenceError::Decode { tsid: record.tsid, source })
}

/// Find every `{tsid, objref:true}` reference stub reachable from `fields`,
/// skipping the named back-reference keys at the top level.
pub fn collect_refs(fields: &serde_json::Map<String, Value>, skip_keys: &[&str]) -> HashSet<Tsid> {
    let mut out = HashSet::new();
    for (key, value) in fields {
        if skip_keys.contains(&key.as_str()) {
            continue;
        }
        collect_refs_value(value, &mut out);
    }
    out
}

fn collect_refs_value(value: &Value, out: &mut HashSet<Tsid>) {
    match value {
        Value::Object(map) => {
            let is_stub = matches!(map.get("objref"), Some(Value::Bool(true)));
            if is_stub {
                if let Some(Value::String(s)) = map.get("tsid") {
                    if let Ok(tsid) = Tsid::parse(s) {
                        out.insert(tsid);
                    }
                }
                return;
            }
            for v in map.values() {
                collect_refs_value(v, out);
            }
        }
        Value::Array(items) => {
            for v in items {
                collect_refs_value(v, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn collects_nested_stubs_and_skips_backrefs() {
        let mut fields = serde_json::Map::new();
        fields.insert("owner".into(), json!({"tsid": "Pabc", "objref": true}));
        fields.insert(
            "items".into(),
            json!([{"tsid": "Ixyz", "objref": true}, {"tsid": "Bqqq", "objref": true}]),
        );
        fields.insert("nested".into(), json!({"inner": {"tsid": "Dzzz", "objref": true}}));

        let refs = collect_refs(&fields, BACKREF_FIELDS);
        assert!(!refs.contains(&Tsid::parse("Pabc").unwrap()));
        assert!(refs.contains(&Tsid::parse("Ixyz").unwrap()));
        assert!(refs.contains(&Tsid::parse("Bqqq").unwrap()));
        assert!(refs.contains(&Tsid::parse("Dzzz").unwrap()));
    }

    #[test]
    fn round_trips_through_record() {
        let mut obj = GameObject::new(Tsid::parse("Labc").unwrap(), "location", 42);
        obj.fields.insert("name".into(), json!("Spoke"));

        let record = object_to_record(&obj);
        let back = record_to_object(record).unwrap();
        assert_eq!(back.tsid, obj.tsid);
        assert_eq!(back.class_tag, obj.class_tag);
        assert_eq!(back.fields, obj.fields);
    }
}
