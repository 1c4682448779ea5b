//! Canonical owner/agent id resolution over records of mixed schema vintage.
//!
//! Older stored records name their owner `created_by` or `user_id`, newer ones
//! `owner_id`; agents appear as `agent_id`, `agentId` or `assigned_to`. Each
//! entity gets one explicit priority table and the first populated field in
//! that table is authoritative; later fields are never consulted once a value
//! is found.
//!
//! Values are compared as strings, so `42` and `"42"` are the same id.
//! Falsy values (`0`, `false`, `""`, `null`) count as absent. An id of `0`
//! can therefore never be resolved; existing records rely on this, so it stays.

use serde_json::{Map, Value};

/// Read-only view over a record's fields.
pub trait OwnershipSurface {
    fn field(&self, name: &str) -> Option<&Value>;
}

impl OwnershipSurface for Map<String, Value> {
    fn field(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}

impl OwnershipSurface for Value {
    fn field(&self, name: &str) -> Option<&Value> {
        self.as_object().and_then(|m| m.get(name))
    }
}

/// Priority-ordered candidate fields for one entity kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnershipTable {
    pub entity: &'static str,
    pub owner_fields: &'static [&'static str],
    pub agent_fields: &'static [&'static str],
}

pub const PROPERTY_OWNERSHIP: OwnershipTable = OwnershipTable {
    entity: "property",
    owner_fields: &["owner_id", "ownerId", "created_by", "user_id", "userId"],
    agent_fields: &["agent_id", "agentId", "assigned_to"],
};

/// Coerce a field value into its id string, or `None` when the value is falsy.
///
/// Numbers render the way a JSON client prints them (`42.0` becomes `"42"`).
/// Arrays and objects are not ids and count as absent.
pub fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Bool(false) => None,
        Value::Bool(true) => Some("true".to_string()),
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                if i == 0 { None } else { Some(i.to_string()) }
            } else if let Some(u) = n.as_u64() {
                Some(u.to_string())
            } else {
                let f = n.as_f64()?;
                if f == 0.0 || f.is_nan() {
                    None
                } else if f.fract() == 0.0 && f.abs() < 9.007_199_254_740_992e15 {
                    Some(format!("{}", f as i64))
                } else {
                    Some(f.to_string())
                }
            }
        }
        Value::Array(_) | Value::Object(_) => None,
    }
}

/// Resolves the canonical owner and agent ids of a record.
#[derive(Debug, Clone, Copy)]
pub struct IdentityNormalizer {
    table: OwnershipTable,
}

impl Default for IdentityNormalizer {
    fn default() -> Self { Self::new(PROPERTY_OWNERSHIP) }
}

impl IdentityNormalizer {
    pub fn new(table: OwnershipTable) -> Self { Self { table } }

    pub fn table(&self) -> &OwnershipTable { &self.table }

    pub fn resolve_owner<R: OwnershipSurface + ?Sized>(&self, record: &R) -> Option<String> {
        first_populated(record, self.table.owner_fields).map(|(_, id)| id)
    }

    pub fn resolve_agent<R: OwnershipSurface + ?Sized>(&self, record: &R) -> Option<String> {
        first_populated(record, self.table.agent_fields).map(|(_, id)| id)
    }

    /// Like `resolve_owner`, also naming the field that won.
    pub fn owner_source<R: OwnershipSurface + ?Sized>(&self, record: &R) -> Option<(&'static str, String)> {
        first_populated(record, self.table.owner_fields)
    }

    pub fn agent_source<R: OwnershipSurface + ?Sized>(&self, record: &R) -> Option<(&'static str, String)> {
        first_populated(record, self.table.agent_fields)
    }
}

fn first_populated<R: OwnershipSurface + ?Sized>(record: &R, fields: &'static [&'static str]) -> Option<(&'static str, String)> {
    fields
        .iter()
        .find_map(|name| record.field(name).and_then(id_string).map(|id| (*name, id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn earliest_populated_owner_field_wins() {
        let n = IdentityNormalizer::default();
        let rec = json!({"created_by": "9", "owner_id": 3, "user_id": "1"});
        assert_eq!(n.resolve_owner(&rec).as_deref(), Some("3"));
        assert_eq!(n.owner_source(&rec).map(|(f, _)| f), Some("owner_id"));

        let rec = json!({"userId": 5, "user_id": 4, "created_by": null});
        assert_eq!(n.resolve_owner(&rec).as_deref(), Some("4"));
    }

    #[test]
    fn every_subset_of_owner_fields_resolves_to_its_first_member() {
        let n = IdentityNormalizer::default();
        let fields = PROPERTY_OWNERSHIP.owner_fields;
        for mask in 0u32..(1 << fields.len()) {
            let mut obj = serde_json::Map::new();
            for (i, f) in fields.iter().enumerate() {
                if mask & (1 << i) != 0 {
                    obj.insert(f.to_string(), json!(format!("id-{}", i)));
                }
            }
            let expected = (0..fields.len()).find(|i| mask & (1 << i) != 0).map(|i| format!("id-{}", i));
            assert_eq!(n.resolve_owner(&obj), expected, "mask={:05b}", mask);
        }
    }

    #[test]
    fn falsy_values_are_skipped() {
        let n = IdentityNormalizer::default();
        let rec = json!({"owner_id": 0, "ownerId": "", "created_by": false, "user_id": 12});
        assert_eq!(n.resolve_owner(&rec).as_deref(), Some("12"));
        assert_eq!(n.resolve_owner(&json!({"owner_id": 0})), None);
        assert_eq!(n.resolve_agent(&json!({})), None);
    }

    #[test]
    fn agent_ids_coerce_numbers_to_strings() {
        let n = IdentityNormalizer::default();
        assert_eq!(n.resolve_agent(&json!({"agent_id": 42})).as_deref(), Some("42"));
        assert_eq!(n.resolve_agent(&json!({"agentId": 42.0})).as_deref(), Some("42"));
        assert_eq!(n.resolve_agent(&json!({"assigned_to": "a-7", "agent_id": null})).as_deref(), Some("a-7"));
    }

    #[test]
    fn non_object_records_resolve_nothing() {
        let n = IdentityNormalizer::default();
        assert_eq!(n.resolve_owner(&json!([1, 2])), None);
        assert_eq!(n.resolve_owner(&json!({"owner_id": {"id": 3}})), None);
    }
}
