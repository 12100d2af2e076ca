//! Argument bindings between actions.
//!
//! A string argument of the form `$key` or `$key.field.0` refers to the output
//! of an earlier completed action whose binding key (`store_as`, else `name`)
//! is `key`. Bindings are rebuilt from the persisted tree on every tick, so a
//! resumed run sees exactly what an uninterrupted one would.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::tree::{ActionState, Goal};

static BINDING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\$([A-Za-z_][A-Za-z0-9_-]*)((?:\.[A-Za-z0-9_-]+)*)$").unwrap()
});

/// Published outputs of completed actions, keyed by binding key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bindings {
    values: BTreeMap<String, Value>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect outputs of completed actions in declaration order; later keys win.
    pub fn from_goal(goal: &Goal) -> Self {
        let mut bindings = Self::new();
        for action in goal.actions() {
            if action.state != ActionState::Complete {
                continue;
            }
            if let Some(output) = &action.output {
                bindings.insert(action.binding_key(), output.clone());
            }
        }
        bindings
    }

    pub fn insert(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }
}

/// Return a copy of `args` with every reference replaced by its bound value.
///
/// Non-reference values are copied unchanged. An unresolvable reference is an error
/// naming the reference.
pub fn resolve_args(args: &Map<String, Value>, bindings: &Bindings) -> Result<Map<String, Value>, String> {
    let mut resolved = Map::with_capacity(args.len());
    for (key, value) in args {
        let value = match value.as_str().and_then(|s| BINDING_RE.captures(s)) {
            Some(caps) => {
                let root = &caps[1];
                let segments = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
                lookup(bindings, root, segments)
                    .ok_or_else(|| format!("unresolved binding '{}' for argument '{}'", &caps[0], key))?
            }
            None => value.clone(),
        };
        resolved.insert(key.clone(), value);
    }
    Ok(resolved)
}

fn lookup(bindings: &Bindings, root: &str, segments: &str) -> Option<Value> {
    let mut current = bindings.get(root)?;
    for segment in segments.split('.').filter(|s| !s.is_empty()) {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{action, goal_with_actions};
    use serde_json::json;

    fn position_bindings() -> Bindings {
        let mut bindings = Bindings::new();
        bindings.insert("find_button", json!({"position": {"x": 40, "y": 12}, "hits": [7, 9]}));
        bindings
    }

    #[test]
    fn resolves_nested_object_and_array_paths() {
        let args = json!({"x": "$find_button.position.x", "second": "$find_button.hits.1", "label": "ok"});
        let resolved =
            resolve_args(args.as_object().expect("object"), &position_bindings()).expect("resolve");
        assert_eq!(resolved["x"], json!(40));
        assert_eq!(resolved["second"], json!(9));
        assert_eq!(resolved["label"], json!("ok"));
    }

    #[test]
    fn unresolved_reference_is_reported() {
        let args = json!({"x": "$missing.position"});
        let err = resolve_args(args.as_object().expect("object"), &position_bindings())
            .expect_err("unresolved");
        assert!(err.contains("$missing.position"));
    }

    #[test]
    fn strings_that_are_not_references_are_left_alone() {
        let args = json!({"price": "$5.00 total", "label": "plain", "cost": "$"});
        let resolved =
            resolve_args(args.as_object().expect("object"), &Bindings::new()).expect("resolve");
        assert_eq!(&resolved, args.as_object().expect("object"));
    }

    #[test]
    fn from_goal_only_publishes_completed_outputs() {
        let mut done = action("vision", "locate", json!({}));
        done.state = ActionState::Complete;
        done.status = crate::tree::ActionStatus::Success;
        done.output = Some(json!({"x": 1}));
        done.store_as = Some("target".to_string());

        let mut pending = action("vision", "locate", json!({}));
        pending.output = Some(json!({"x": 2}));

        let goal = goal_with_actions(vec![done, pending]);
        let bindings = Bindings::from_goal(&goal);
        assert_eq!(bindings.get("target"), Some(&json!({"x": 1})));
        assert_eq!(bindings.get("locate"), None);
    }
}
