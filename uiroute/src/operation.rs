//! The instruction set executed by [`crate::interpreter::OperationInterpreter`].

use crate::selector::{deserialize_selector, Selector};
use crate::template;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One primitive automation step, or a [`Operation::Sequential`] wrapper.
///
/// In configuration JSON every operation carries a `type` discriminator, e.g.
/// `{"type": "click", "selector": "text:Chats"}` or
/// `{"type": "input", "selector": "id:search", "paramKey": "query"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Operation {
    #[serde(alias = "Click", alias = "CLICK")]
    Click {
        #[serde(deserialize_with = "deserialize_selector")]
        selector: Selector,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
    },
    /// Types `params[param_key]` into the element.
    #[serde(alias = "Input", alias = "INPUT")]
    Input {
        #[serde(deserialize_with = "deserialize_selector")]
        selector: Selector,
        param_key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
    },
    #[serde(alias = "Wait", alias = "WAIT")]
    Wait { duration_ms: u64 },
    #[serde(alias = "PressKey", alias = "PRESS_KEY")]
    PressKey {
        #[serde(alias = "keyCode")]
        code: i32,
    },
    #[serde(alias = "LaunchApp", alias = "LAUNCH_APP")]
    LaunchApp {
        #[serde(alias = "packageName")]
        app_id: String,
    },
    #[serde(alias = "KillApp", alias = "KILL_APP")]
    KillApp {
        #[serde(alias = "packageName")]
        app_id: String,
    },
    #[serde(alias = "Swipe", alias = "SWIPE")]
    Swipe {
        x1: i32,
        y1: i32,
        x2: i32,
        y2: i32,
        #[serde(default = "default_swipe_ms")]
        duration_ms: u64,
    },
    #[serde(alias = "ValidateElement", alias = "VALIDATE_ELEMENT")]
    ValidateElement {
        #[serde(deserialize_with = "deserialize_selector")]
        selector: Selector,
    },
    #[serde(alias = "ValidateState", alias = "VALIDATE_STATE")]
    ValidateState {
        #[serde(alias = "node")]
        node_name: String,
    },
    #[serde(alias = "WaitForPage", alias = "WAIT_FOR_PAGE")]
    WaitForPage {
        #[serde(default = "default_page_timeout_ms")]
        timeout_ms: u64,
    },
    #[serde(alias = "Sequential", alias = "SEQUENTIAL")]
    Sequential { operations: Vec<Operation> },
}

fn default_swipe_ms() -> u64 {
    300
}

fn default_page_timeout_ms() -> u64 {
    5_000
}

impl Operation {
    pub fn click(selector: Selector) -> Self {
        Operation::Click {
            selector,
            label: None,
        }
    }

    pub fn input(selector: Selector, param_key: impl Into<String>) -> Self {
        Operation::Input {
            selector,
            param_key: param_key.into(),
            label: None,
        }
    }

    pub fn launch(app_id: impl Into<String>) -> Self {
        Operation::LaunchApp {
            app_id: app_id.into(),
        }
    }

    pub fn validate_state(node_name: impl Into<String>) -> Self {
        Operation::ValidateState {
            node_name: node_name.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Click { .. } => "click",
            Operation::Input { .. } => "input",
            Operation::Wait { .. } => "wait",
            Operation::PressKey { .. } => "press_key",
            Operation::LaunchApp { .. } => "launch_app",
            Operation::KillApp { .. } => "kill_app",
            Operation::Swipe { .. } => "swipe",
            Operation::ValidateElement { .. } => "validate_element",
            Operation::ValidateState { .. } => "validate_state",
            Operation::WaitForPage { .. } => "wait_for_page",
            Operation::Sequential { .. } => "sequential",
        }
    }

    /// Whether this operation is a post-condition check rather than an action.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Operation::ValidateElement { .. } | Operation::ValidateState { .. }
        )
    }

    /// The first non-`Sequential` operation, depth first.
    pub fn first_primitive(&self) -> Option<&Operation> {
        match self {
            Operation::Sequential { operations } => {
                operations.iter().find_map(Operation::first_primitive)
            }
            other => Some(other),
        }
    }

    /// Starts from a clean app state regardless of what is on screen.
    pub fn is_reset(&self) -> bool {
        matches!(
            self.first_primitive(),
            Some(Operation::LaunchApp { .. } | Operation::KillApp { .. })
        )
    }

    /// Node names referenced by `ValidateState`, used for referential checks.
    pub fn referenced_nodes(&self) -> Vec<&str> {
        match self {
            Operation::ValidateState { node_name } => vec![node_name.as_str()],
            Operation::Sequential { operations } => operations
                .iter()
                .flat_map(Operation::referenced_nodes)
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn collect_parameter_keys(&self, keys: &mut BTreeSet<String>) {
        match self {
            Operation::Click { selector, .. } | Operation::ValidateElement { selector } => {
                selector.collect_parameter_keys(keys)
            }
            Operation::Input {
                selector,
                param_key,
                ..
            } => {
                selector.collect_parameter_keys(keys);
                keys.insert(param_key.clone());
            }
            Operation::LaunchApp { app_id } | Operation::KillApp { app_id } => {
                keys.extend(template::placeholder_keys(app_id))
            }
            Operation::Sequential { operations } => {
                for op in operations {
                    op.collect_parameter_keys(keys);
                }
            }
            Operation::Wait { .. }
            | Operation::PressKey { .. }
            | Operation::Swipe { .. }
            | Operation::ValidateState { .. }
            | Operation::WaitForPage { .. } => {}
        }
    }

    pub fn parameter_keys(&self) -> BTreeSet<String> {
        let mut keys = BTreeSet::new();
        self.collect_parameter_keys(&mut keys);
        keys
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Click { selector, label } => match label {
                Some(label) => write!(f, "click {label} ({selector})"),
                None => write!(f, "click {selector}"),
            },
            Operation::Input {
                selector,
                param_key,
                ..
            } => write!(f, "input {{{{{param_key}}}}} into {selector}"),
            Operation::Wait { duration_ms } => write!(f, "wait {duration_ms}ms"),
            Operation::PressKey { code } => write!(f, "press key {code}"),
            Operation::LaunchApp { app_id } => write!(f, "launch {app_id}"),
            Operation::KillApp { app_id } => write!(f, "kill {app_id}"),
            Operation::Swipe {
                x1, y1, x2, y2, ..
            } => write!(f, "swipe ({x1},{y1}) -> ({x2},{y2})"),
            Operation::ValidateElement { selector } => write!(f, "expect element {selector}"),
            Operation::ValidateState { node_name } => write!(f, "expect node {node_name}"),
            Operation::WaitForPage { timeout_ms } => write!(f, "wait for page ({timeout_ms}ms)"),
            Operation::Sequential { operations } => write!(f, "{} steps", operations.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_nested_sequence() {
        let op: Operation = serde_json::from_value(json!({
            "type": "Sequential",
            "operations": [
                {"type": "LAUNCH_APP", "packageName": "com.chat"},
                {"type": "click", "selector": "text:Chats", "label": "open chats"},
                {"type": "input", "selector": {"type": "id", "id": "search"}, "paramKey": "contact"},
                {"type": "wait_for_page"},
                {"type": "swipe", "x1": 10, "y1": 800, "x2": 10, "y2": 200}
            ]
        }))
        .unwrap();

        let Operation::Sequential { operations } = &op else {
            panic!("expected sequential, got {op:?}");
        };
        assert_eq!(operations.len(), 5);
        assert_eq!(operations[0], Operation::launch("com.chat"));
        assert_eq!(
            operations[3],
            Operation::WaitForPage { timeout_ms: 5_000 }
        );
        assert!(matches!(
            operations[4],
            Operation::Swipe {
                duration_ms: 300,
                ..
            }
        ));
    }

    #[test]
    fn reset_detection_looks_through_sequences() {
        let op = Operation::Sequential {
            operations: vec![
                Operation::Sequential { operations: vec![] },
                Operation::KillApp {
                    app_id: "com.chat".into(),
                },
                Operation::launch("com.chat"),
            ],
        };
        assert!(op.is_reset());
        assert!(!Operation::click(Selector::text("Chats")).is_reset());
    }

    #[test]
    fn parameter_keys_cover_selectors_inputs_and_app_ids() {
        let op = Operation::Sequential {
            operations: vec![
                Operation::click(Selector::text("{{contact}}")),
                Operation::input(Selector::id("message"), "message"),
                Operation::launch("{{app}}"),
            ],
        };
        let keys: Vec<_> = op.parameter_keys().into_iter().collect();
        assert_eq!(keys, vec!["app", "contact", "message"]);
    }

    #[test]
    fn unknown_type_is_rejected() {
        let result: Result<Operation, _> =
            serde_json::from_value(json!({"type": "teleport", "to": "Home"}));
        assert!(result.is_err());
    }
}
