// Trigger predicate tree
//
// WorkflowTrigger and WorkflowAction rows carry a `conditions` JSON
// document. Parsed into a Condition it is evaluated against the event
// envelope document (and, for actions, the accumulated execution
// context). An empty or null document matches everything.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// A predicate over a JSON document.
///
/// Paths are dot-separated (`payload.comment.user.login`). Missing path
/// segments make leaf predicates false, never an error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    /// True when every child matches (vacuously true when empty)
    All { conditions: Vec<Condition> },

    /// True when at least one child matches
    Any { conditions: Vec<Condition> },

    Not { condition: Box<Condition> },

    /// Value at `path` equals `value` exactly
    Equals { path: String, value: Value },

    /// A value exists at `path`
    Exists { path: String },

    /// String at `path` contains `value` as a substring
    Contains { path: String, value: String },

    /// Value at `path` is one of `values`
    In { path: String, values: Vec<Value> },
}

impl Condition {
    /// Predicate that matches every document
    pub fn always() -> Self {
        Condition::All { conditions: vec![] }
    }

    /// Parse a stored `conditions` document.
    ///
    /// Null and `{}` mean "no conditions" and return None; anything else
    /// must be a well-formed predicate.
    pub fn from_value(value: &Value) -> Result<Option<Condition>> {
        match value {
            Value::Null => Ok(None),
            Value::Object(map) if map.is_empty() => Ok(None),
            other => serde_json::from_value(other.clone())
                .map(Some)
                .map_err(|e| Error::invalid_request(format!("malformed condition: {e}"))),
        }
    }

    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Condition::All { conditions } => conditions.iter().all(|c| c.matches(doc)),
            Condition::Any { conditions } => conditions.iter().any(|c| c.matches(doc)),
            Condition::Not { condition } => !condition.matches(doc),
            Condition::Equals { path, value } => lookup(doc, path) == Some(value),
            Condition::Exists { path } => lookup(doc, path).is_some(),
            Condition::Contains { path, value } => lookup(doc, path)
                .and_then(Value::as_str)
                .is_some_and(|s| s.contains(value.as_str())),
            Condition::In { path, values } => {
                lookup(doc, path).is_some_and(|v| values.contains(v))
            }
        }
    }
}

fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = doc;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> Value {
        json!({
            "event_type": "comment_created",
            "payload": {
                "action": "created",
                "comment": { "body": "please review", "user": { "login": "alice" } }
            }
        })
    }

    #[test]
    fn test_equals_and_exists() {
        let cond = Condition::Equals {
            path: "event_type".to_string(),
            value: json!("comment_created"),
        };
        assert!(cond.matches(&doc()));

        let cond = Condition::Exists {
            path: "payload.comment.user.login".to_string(),
        };
        assert!(cond.matches(&doc()));

        let cond = Condition::Exists {
            path: "payload.review".to_string(),
        };
        assert!(!cond.matches(&doc()));
    }

    #[test]
    fn test_combinators() {
        let cond = Condition::All {
            conditions: vec![
                Condition::Equals {
                    path: "payload.action".to_string(),
                    value: json!("created"),
                },
                Condition::Not {
                    condition: Box::new(Condition::Contains {
                        path: "payload.comment.body".to_string(),
                        value: "ignore".to_string(),
                    }),
                },
            ],
        };
        assert!(cond.matches(&doc()));
        assert!(Condition::always().matches(&doc()));

        let cond = Condition::In {
            path: "payload.comment.user.login".to_string(),
            values: vec![json!("alice"), json!("bob")],
        };
        assert!(cond.matches(&doc()));
    }

    #[test]
    fn test_from_value() {
        assert_eq!(Condition::from_value(&Value::Null).unwrap(), None);
        assert_eq!(Condition::from_value(&json!({})).unwrap(), None);

        let parsed = Condition::from_value(&json!({
            "op": "equals", "path": "event_type", "value": "push"
        }))
        .unwrap()
        .unwrap();
        assert_eq!(
            parsed,
            Condition::Equals {
                path: "event_type".to_string(),
                value: json!("push")
            }
        );

        assert!(Condition::from_value(&json!({"op": "bogus"})).is_err());
    }

    #[test]
    fn test_roundtrip_serialization() {
        let cond = Condition::Any {
            conditions: vec![Condition::Exists {
                path: "payload.pull_request".to_string(),
            }],
        };
        let value = serde_json::to_value(&cond).unwrap();
        let back: Condition = serde_json::from_value(value).unwrap();
        assert_eq!(cond, back);
    }
}
