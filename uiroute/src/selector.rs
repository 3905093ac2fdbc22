use crate::errors::AutomationError;
use crate::state::{UiElement, UiSnapshot};
use crate::template::{self, Params};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;

/// How the children of a [`Selector::Compound`] are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Combinator {
    #[default]
    #[serde(alias = "AND")]
    And,
    #[serde(alias = "OR")]
    Or,
}

/// Represents ways to locate a UI element
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Selector {
    /// Select by resource id (`com.app:id/send` or just `send`)
    #[serde(alias = "ByResourceId", alias = "id")]
    ResourceId { id: String },
    /// Select by visible text
    #[serde(alias = "ByText")]
    Text { text: String },
    /// Select by content description
    #[serde(alias = "ByContentDesc", alias = "desc")]
    ContentDesc { desc: String },
    /// Select by widget class name
    #[serde(alias = "ByClassName", alias = "class")]
    ClassName { name: String },
    /// Combine several selectors
    #[serde(alias = "Compound")]
    Compound {
        #[serde(deserialize_with = "deserialize_selector_list")]
        selectors: Vec<Selector>,
        #[serde(default)]
        combinator: Combinator,
    },
}

impl Selector {
    pub fn id(id: impl Into<String>) -> Self {
        Selector::ResourceId { id: id.into() }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Selector::Text { text: text.into() }
    }

    pub fn desc(desc: impl Into<String>) -> Self {
        Selector::ContentDesc { desc: desc.into() }
    }

    pub fn class(name: impl Into<String>) -> Self {
        Selector::ClassName { name: name.into() }
    }

    pub fn all(selectors: Vec<Selector>) -> Self {
        Selector::Compound {
            selectors,
            combinator: Combinator::And,
        }
    }

    pub fn any(selectors: Vec<Selector>) -> Self {
        Selector::Compound {
            selectors,
            combinator: Combinator::Or,
        }
    }

    /// Whether `element` satisfies this selector. An empty compound matches nothing.
    pub fn matches(&self, element: &UiElement) -> bool {
        match self {
            Selector::ResourceId { id } => element
                .resource_id
                .as_deref()
                .is_some_and(|rid| resource_id_matches(rid, id)),
            Selector::Text { text } => element.text.as_deref() == Some(text.as_str()),
            Selector::ContentDesc { desc } => {
                element.content_desc.as_deref() == Some(desc.as_str())
            }
            Selector::ClassName { name } => element.class_name.as_deref() == Some(name.as_str()),
            Selector::Compound {
                selectors,
                combinator,
            } => {
                if selectors.is_empty() {
                    return false;
                }
                match combinator {
                    Combinator::And => selectors.iter().all(|s| s.matches(element)),
                    Combinator::Or => selectors.iter().any(|s| s.matches(element)),
                }
            }
        }
    }

    /// First element of the snapshot matching this selector, in tree order.
    pub fn find_in<'a>(&self, snapshot: &'a UiSnapshot) -> Option<&'a UiElement> {
        snapshot.elements.iter().find(|el| self.matches(el))
    }

    /// Copy of this selector with every `{{key}}` substituted.
    pub fn bind(&self, params: &Params) -> Result<Selector, AutomationError> {
        Ok(match self {
            Selector::ResourceId { id } => Selector::ResourceId {
                id: template::substitute(id, params)?,
            },
            Selector::Text { text } => Selector::Text {
                text: template::substitute(text, params)?,
            },
            Selector::ContentDesc { desc } => Selector::ContentDesc {
                desc: template::substitute(desc, params)?,
            },
            Selector::ClassName { name } => Selector::ClassName {
                name: template::substitute(name, params)?,
            },
            Selector::Compound {
                selectors,
                combinator,
            } => Selector::Compound {
                selectors: selectors
                    .iter()
                    .map(|s| s.bind(params))
                    .collect::<Result<_, _>>()?,
                combinator: *combinator,
            },
        })
    }

    pub fn collect_parameter_keys(&self, keys: &mut BTreeSet<String>) {
        match self {
            Selector::ResourceId { id: value }
            | Selector::Text { text: value }
            | Selector::ContentDesc { desc: value }
            | Selector::ClassName { name: value } => {
                keys.extend(template::placeholder_keys(value));
            }
            Selector::Compound { selectors, .. } => {
                for s in selectors {
                    s.collect_parameter_keys(keys);
                }
            }
        }
    }
}

// Android ids are fully qualified (`com.app:id/send`); configs often give the short form.
fn resource_id_matches(actual: &str, wanted: &str) -> bool {
    actual == wanted
        || actual
            .rsplit_once(":id/")
            .is_some_and(|(_, short)| short == wanted)
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Selector::ResourceId { id } => write!(f, "id:{id}"),
            Selector::Text { text } => write!(f, "text:{text}"),
            Selector::ContentDesc { desc } => write!(f, "desc:{desc}"),
            Selector::ClassName { name } => write!(f, "class:{name}"),
            Selector::Compound {
                selectors,
                combinator,
            } => {
                let sep = match combinator {
                    Combinator::And => " && ",
                    Combinator::Or => " || ",
                };
                let parts: Vec<String> = selectors.iter().map(|s| s.to_string()).collect();
                write!(f, "({})", parts.join(sep))
            }
        }
    }
}

impl FromStr for Selector {
    type Err = AutomationError;

    /// Parses the shorthand form used in configuration files, e.g.
    /// `id:send`, `text:Chats`, `desc:Back`, `class:android.widget.EditText`,
    /// `#send`, or compounds joined with `&&` / `||`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        if let Some(parts) = split_compound(s, "||") {
            let parts = parts
                .into_iter()
                .map(Selector::from_str)
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(Selector::any(parts));
        }
        if let Some(parts) = split_compound(s, "&&") {
            let parts = parts
                .into_iter()
                .map(Selector::from_str)
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(Selector::all(parts));
        }

        let lower = s.to_lowercase();
        let value = |prefix: &str| s[prefix.len()..].trim().to_string();
        match () {
            _ if lower.starts_with("id:") => Ok(Selector::id(value("id:"))),
            _ if lower.starts_with("text:") => Ok(Selector::text(value("text:"))),
            _ if lower.starts_with("desc:") => Ok(Selector::desc(value("desc:"))),
            _ if lower.starts_with("classname:") => Ok(Selector::class(value("classname:"))),
            _ if lower.starts_with("class:") => Ok(Selector::class(value("class:"))),
            _ if s.starts_with('#') && s.len() > 1 => Ok(Selector::id(value("#"))),
            _ => Err(AutomationError::InvalidArgument(format!(
                "Unknown selector format: \"{s}\". Use prefixes like 'id:', 'text:', 'desc:' or 'class:'."
            ))),
        }
    }
}

const PREFIXES: [&str; 5] = ["id:", "text:", "desc:", "classname:", "class:"];

fn starts_with_prefix(s: &str) -> bool {
    let s = s.trim_start();
    let lower = s.to_lowercase();
    PREFIXES.iter().any(|p| lower.starts_with(p)) || (s.starts_with('#') && s.len() > 1)
}

/// Splits on `op` only where the next part starts a new selector, so
/// `text:Rock && Roll` stays one text selector.
fn split_compound<'s>(s: &'s str, op: &str) -> Option<Vec<&'s str>> {
    let mut parts = Vec::new();
    let mut start = 0;
    for (at, _) in s.match_indices(op) {
        if starts_with_prefix(&s[at + op.len()..]) {
            parts.push(&s[start..at]);
            start = at + op.len();
        }
    }
    if parts.is_empty() {
        return None;
    }
    parts.push(&s[start..]);
    Some(parts)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SelectorRepr {
    Shorthand(String),
    Tagged(Selector),
}

impl SelectorRepr {
    fn into_selector<E: serde::de::Error>(self) -> Result<Selector, E> {
        match self {
            SelectorRepr::Shorthand(s) => Selector::from_str(&s).map_err(E::custom),
            SelectorRepr::Tagged(selector) => Ok(selector),
        }
    }
}

/// Accepts either a tagged selector object or the string shorthand.
pub fn deserialize_selector<'de, D>(deserializer: D) -> Result<Selector, D::Error>
where
    D: Deserializer<'de>,
{
    SelectorRepr::deserialize(deserializer)?.into_selector()
}

fn deserialize_selector_list<'de, D>(deserializer: D) -> Result<Vec<Selector>, D::Error>
where
    D: Deserializer<'de>,
{
    Vec::<SelectorRepr>::deserialize(deserializer)?
        .into_iter()
        .map(SelectorRepr::into_selector)
        .collect()
}

/// Like [`deserialize_selector`] for a list.
pub fn deserialize_selectors<'de, D>(deserializer: D) -> Result<Vec<Selector>, D::Error>
where
    D: Deserializer<'de>,
{
    deserialize_selector_list(deserializer)
}
