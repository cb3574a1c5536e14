//! Field introspection records returned by `fields_get`.

use serde::{Deserialize, Serialize};

/// Description of one model field as exposed to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldInfo {
    /// Field type tag (`char`, `many2one`, ...).
    #[serde(rename = "type")]
    pub field_type: String,
    /// Human-readable label.
    pub string: String,
    pub required: bool,
    pub readonly: bool,
    /// Whether the value is persisted.
    pub store: bool,
    /// Related model for relational fields.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub relation: Option<String>,
    /// Inverse many-to-one for one-to-many fields.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub relation_field: Option<String>,
    /// Allowed `(key, label)` pairs for selection fields.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub selection: Option<Vec<(String, String)>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub help: Option<String>,
    /// Dependencies of a computed field.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub depends: Vec<String>,
}

impl FieldInfo {
    /// Create a record for a field of the given type.
    pub fn new(field_type: impl Into<String>, string: impl Into<String>) -> Self {
        Self {
            field_type: field_type.into(),
            string: string.into(),
            required: false,
            readonly: false,
            store: true,
            relation: None,
            relation_field: None,
            selection: None,
            help: None,
            depends: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_type_key() {
        let mut info = FieldInfo::new("many2one", "Customer");
        info.relation = Some("res.partner".into());
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["type"], "many2one");
        assert_eq!(json["relation"], "res.partner");
        assert!(json.get("selection").is_none());
        assert!(json.get("depends").is_none());
    }
}
