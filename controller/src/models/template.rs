//! Template field definitions

use serde::{Deserialize, Serialize};

/// Input type of a template field
///
/// Stored definitions carry a free-form `type` string; anything this
/// controller does not know about lands in [`FieldKind::Unknown`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FieldKind {
    Text,
    Number,
    Boolean,
    Select {
        #[serde(default)]
        options: Vec<String>,
    },
    Secret,
    #[serde(other)]
    Unknown,
}

impl FieldKind {
    /// Whether values of this field live in the secret configuration
    pub fn is_secret(&self) -> bool {
        matches!(self, FieldKind::Secret)
    }
}

/// A configurable field declared by a template
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateField {
    pub key: String,
    pub label: String,
    #[serde(flatten)]
    pub kind: FieldKind,
}

impl TemplateField {
    pub fn new(key: impl Into<String>, label: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            kind,
        }
    }
}

/// Look up the display label for a field key, falling back to the key
pub fn label_for<'a>(fields: &'a [TemplateField], key: &'a str) -> &'a str {
    fields
        .iter()
        .find(|f| f.key == key)
        .map(|f| f.label.as_str())
        .unwrap_or(key)
}
