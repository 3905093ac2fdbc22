//! `{{key}}` placeholder substitution.
//!
//! Everything that ends up on the device (selector values, typed text, app ids)
//! passes through [`substitute`] first. A missing key is an error, so a literal
//! `{{key}}` token can never reach the external UI.

use crate::errors::AutomationError;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

/// Caller-supplied parameter map. Values may be any JSON type; non-strings are
/// rendered with their JSON text form.
pub type Params = HashMap<String, Value>;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").expect("placeholder pattern is valid")
});

/// Keys referenced by `text`, in order of first appearance.
pub fn placeholder_keys(text: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    PLACEHOLDER
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().trim().to_string()))
        .filter(|key| seen.insert(key.clone()))
        .collect()
}

pub fn has_placeholders(text: &str) -> bool {
    PLACEHOLDER.is_match(text)
}

/// Render a parameter value the way it is sent to the device.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Replace every `{{key}}` in `text` with `params[key]`.
///
/// All referenced keys are checked before any replacement happens, so the
/// function either returns fully substituted text or
/// [`AutomationError::MissingParameter`] naming the first absent key.
pub fn substitute(text: &str, params: &Params) -> Result<String, AutomationError> {
    if !has_placeholders(text) {
        return Ok(text.to_string());
    }

    if let Some(missing) = placeholder_keys(text)
        .into_iter()
        .find(|key| !params.contains_key(key))
    {
        return Err(AutomationError::MissingParameter(missing));
    }

    let rendered = PLACEHOLDER.replace_all(text, |caps: &Captures| {
        params
            .get(caps[1].trim())
            .map(value_to_string)
            .unwrap_or_default()
    });
    Ok(rendered.into_owned())
}
