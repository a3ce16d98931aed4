//! Cache key derivation.
//!
//! A key is a plain string built from the call's verb, path and input. The
//! default generator joins the three with [`KEY_DELIMITER`]; callers can swap
//! in their own rule, including one that folds several inputs onto a single
//! key so they share one cache slot.

use axum::http::Method;
use serde::Serialize;
use serde_json::Value;

use super::error::CacheError;

/// Separator between the verb, path and input segments of a default key.
pub const KEY_DELIMITER: char = ':';

/// Produces the cache key for a call.
///
/// Implementations must be pure: the same arguments always yield the same key.
pub trait KeyGenerator: Send + Sync {
    fn generate(&self, verb: &Method, path: &str, input: Option<&Value>) -> String;
}

/// `VERB:path:json(input)`, with an empty input segment when no input is given.
///
/// Object members are serialized in the order the input produced them; two
/// inputs with the same members in a different order get different keys.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultKeyGenerator;

impl KeyGenerator for DefaultKeyGenerator {
    fn generate(&self, verb: &Method, path: &str, input: Option<&Value>) -> String {
        let serialized = input.map(Value::to_string).unwrap_or_default();
        format!("{verb}{KEY_DELIMITER}{path}{KEY_DELIMITER}{serialized}")
    }
}

impl<F> KeyGenerator for F
where
    F: Fn(&Method, &str, Option<&Value>) -> String + Send + Sync,
{
    fn generate(&self, verb: &Method, path: &str, input: Option<&Value>) -> String {
        self(verb, path, input)
    }
}

/// Convert a typed call input into the JSON form handed to key generators.
pub fn input_value<I: Serialize + ?Sized>(input: Option<&I>) -> Result<Option<Value>, CacheError> {
    input
        .map(serde_json::to_value)
        .transpose()
        .map_err(CacheError::from)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use super::*;

    #[derive(Serialize)]
    struct UserQuery {
        id: u32,
        expand: bool,
    }

    #[test]
    fn default_key_joins_segments() {
        let input = input_value(Some(&UserQuery {
            id: 7,
            expand: true,
        }))
        .expect("query serializes");

        let key = DefaultKeyGenerator.generate(&Method::GET, "/users", input.as_ref());
        assert_eq!(key, r#"GET:/users:{"id":7,"expand":true}"#);
    }

    #[test]
    fn absent_input_yields_empty_segment() {
        let key = DefaultKeyGenerator.generate(&Method::GET, "/health", None);
        assert_eq!(key, "GET:/health:");
    }

    #[test]
    fn null_input_differs_from_absent_input() {
        let absent = DefaultKeyGenerator.generate(&Method::GET, "/health", None);
        let null = DefaultKeyGenerator.generate(&Method::GET, "/health", Some(&Value::Null));
        assert_ne!(absent, null);
    }

    #[test]
    fn same_call_produces_same_key() {
        let a = json!({"page": 2});
        let b = json!({"page": 2});
        assert_eq!(
            DefaultKeyGenerator.generate(&Method::GET, "/posts", Some(&a)),
            DefaultKeyGenerator.generate(&Method::GET, "/posts", Some(&b)),
        );
    }

    #[test]
    fn verb_and_path_are_part_of_the_key() {
        let input = json!({"page": 2});
        let get = DefaultKeyGenerator.generate(&Method::GET, "/posts", Some(&input));
        let head = DefaultKeyGenerator.generate(&Method::HEAD, "/posts", Some(&input));
        let other = DefaultKeyGenerator.generate(&Method::GET, "/pages", Some(&input));
        assert_ne!(get, head);
        assert_ne!(get, other);
    }

    #[test]
    fn member_order_is_not_canonicalized() {
        let ab = json!({"a": 1, "b": 2});
        let ba = json!({"b": 2, "a": 1});
        assert_ne!(
            DefaultKeyGenerator.generate(&Method::GET, "/q", Some(&ab)),
            DefaultKeyGenerator.generate(&Method::GET, "/q", Some(&ba)),
        );
    }

    #[test]
    fn closures_can_collapse_inputs() {
        let by_path = |verb: &Method, path: &str, _input: Option<&Value>| format!("{verb} {path}");

        let first = by_path.generate(&Method::GET, "/feed", Some(&json!({"page": 1})));
        let second = by_path.generate(&Method::GET, "/feed", Some(&json!({"page": 9})));
        assert_eq!(first, second);
        assert_eq!(first, "GET /feed");
    }

    #[test]
    fn non_string_map_keys_fail_to_serialize() {
        let mut input = BTreeMap::new();
        input.insert(vec![1_u8], "x");
        let err = input_value(Some(&input)).expect_err("map with sequence keys is rejected");
        assert!(matches!(err, CacheError::Serialization(_)));
    }
}
