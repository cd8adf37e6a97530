//! Legacy field names for membership references
//!
//! Membership documents were written by several generations of clients, so
//! the same logical value can live under different names. Every accepted name
//! is listed here once, in the order it is consulted.

use serde_json::{Map, Value};

/// Ordered list of field names carrying one logical attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldChain {
    names: &'static [&'static str],
}

/// Community reference, as read by the id migration
pub const COMMUNITY: FieldChain = FieldChain::new(&["cid", "communityId", "community_id"]);

/// User reference, as read by the id migration
pub const USER: FieldChain = FieldChain::new(&["uid", "userId", "user_id"]);

/// User reference, as read by the orphan cleanup. `user_id` was never
/// consulted there and adding it would change which records are deleted.
pub const MEMBER_USER: FieldChain = FieldChain::new(&["uid", "userId"]);

/// Field the community filter queries. Only the primary name is matched.
pub const COMMUNITY_FILTER_FIELD: &str = "cid";

impl FieldChain {
    pub const fn new(names: &'static [&'static str]) -> Self {
        Self { names }
    }

    /// First present value along the chain, as stored.
    pub fn find<'a>(&self, fields: &'a Map<String, Value>) -> Option<&'a Value> {
        self.names
            .iter()
            .filter_map(|name| fields.get(*name))
            .find(|value| is_present(value))
    }

    /// First present value along the chain, coerced to a string.
    pub fn extract(&self, fields: &Map<String, Value>) -> Option<String> {
        self.find(fields).map(reference_string)
    }
}

/// Non-empty strings, non-zero numbers and `true` count as a reference.
/// Everything else falls through to the next name in the chain.
fn is_present(value: &Value) -> bool {
    match value {
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64() != Some(0.0),
        Value::Bool(b) => *b,
        _ => false,
    }
}

// Integers above this are no longer exact as doubles.
const MAX_EXACT_DOUBLE: f64 = 9_007_199_254_740_992.0;

/// String form of a reference value. Whole doubles drop the fraction, so a
/// community stored as `1.0` keys the same as one stored as `1`.
pub fn reference_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < MAX_EXACT_DOUBLE => {
                format!("{}", f as i64)
            }
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_primary_name_wins() {
        let f = fields(json!({"uid": "a", "userId": "b", "user_id": "c"}));
        assert_eq!(USER.extract(&f).as_deref(), Some("a"));
    }

    #[test]
    fn test_falls_back_in_order() {
        let f = fields(json!({"userId": "b", "user_id": "c"}));
        assert_eq!(USER.extract(&f).as_deref(), Some("b"));
        let f = fields(json!({"user_id": "c"}));
        assert_eq!(USER.extract(&f).as_deref(), Some("c"));
        assert_eq!(MEMBER_USER.extract(&f), None);
    }

    #[test]
    fn test_empty_values_fall_through() {
        let f = fields(json!({"cid": "", "communityId": null, "community_id": "c9"}));
        assert_eq!(COMMUNITY.extract(&f).as_deref(), Some("c9"));

        let f = fields(json!({"uid": false, "userId": 0, "user_id": {}}));
        assert_eq!(USER.extract(&f), None);
    }

    #[test]
    fn test_numbers_are_coerced() {
        let f = fields(json!({"cid": 42, "uid": "u1"}));
        assert_eq!(COMMUNITY.extract(&f).as_deref(), Some("42"));

        let f = fields(json!({"cid": 1.0, "uid": 7.5}));
        assert_eq!(COMMUNITY.extract(&f).as_deref(), Some("1"));
        assert_eq!(USER.extract(&f).as_deref(), Some("7.5"));

        let f = fields(json!({"cid": -3.0, "uid": true}));
        assert_eq!(COMMUNITY.extract(&f).as_deref(), Some("-3"));
        assert_eq!(USER.extract(&f).as_deref(), Some("true"));
    }

    #[test]
    fn test_find_keeps_stored_type() {
        let f = fields(json!({"uid": 0, "userId": 42}));
        assert_eq!(MEMBER_USER.find(&f), Some(&json!(42)));
        assert_eq!(MEMBER_USER.find(&fields(json!({"uid": ""}))), None);
    }
}
