//! Untyped key/value documents as read from mod data files.
//!
//! Every data file, whatever its on-disk format, is parsed into a
//! [`Document`]: an ordered map from string keys to untyped values. Readers
//! and the populator work on documents, never on raw text.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Errors raised while building or reading a [`Document`].
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    /// The top-level value was not a key/value object.
    #[error("expected a key/value object at the top level, found {found}")]
    NotAnObject { found: &'static str },

    /// A field was present but could not be deserialized into the requested type.
    #[error("field '{key}' has the wrong shape: {source}")]
    Field {
        key: String,
        source: serde_json::Error,
    },

    /// The text was not valid JSON.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A parsed data file: ordered string keys mapped to untyped values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    fields: Map<String, Value>,
}

impl Document {
    /// The mandatory top-level key used for reader dispatch.
    pub const TYPE_KEY: &'static str = "type";

    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an untyped value. Fails unless the value is an object.
    pub fn from_value(value: Value) -> Result<Self, DocumentError> {
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(DocumentError::NotAnObject {
                found: kind_name(&other),
            }),
        }
    }

    /// Parse a JSON object.
    pub fn from_json_str(json: &str) -> Result<Self, DocumentError> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    /// The reader tag stored under `type`. A non-string tag counts as absent.
    pub fn type_tag(&self) -> Option<&str> {
        self.fields.get(Self::TYPE_KEY).and_then(Value::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Deserialize a single field. `Ok(None)` if the key is absent.
    pub fn field<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, DocumentError> {
        match self.fields.get(key) {
            None => Ok(None),
            Some(value) => T::deserialize(value)
                .map(Some)
                .map_err(|source| DocumentError::Field {
                    key: key.to_string(),
                    source,
                }),
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.fields.insert(key.into(), value)
    }

    /// Iterate fields in document order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl FromIterator<(String, Value)> for Document {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_object() {
        let doc = Document::from_json_str(r#"{"type": "item", "name": "Sword"}"#).unwrap();
        assert_eq!(doc.len(), 2);
        assert_eq!(doc.type_tag(), Some("item"));
        assert_eq!(doc.get("name"), Some(&json!("Sword")));
    }

    #[test]
    fn keys_keep_document_order() {
        let doc = Document::from_json_str(r#"{"zeta": 1, "alpha": 2, "mid": 3}"#).unwrap();
        let keys: Vec<&str> = doc.keys().collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn non_object_is_rejected() {
        let err = Document::from_json_str("[1, 2, 3]").unwrap_err();
        assert!(matches!(err, DocumentError::NotAnObject { found: "an array" }));
        assert!(err.to_string().contains("an array"));
    }

    #[test]
    fn invalid_json_is_rejected() {
        let err = Document::from_json_str("not json {{{").unwrap_err();
        assert!(matches!(err, DocumentError::Json(_)));
    }

    #[test]
    fn missing_type_tag() {
        let doc = Document::from_json_str(r#"{"name": "Sword"}"#).unwrap();
        assert_eq!(doc.type_tag(), None);
    }

    #[test]
    fn non_string_type_tag_counts_as_missing() {
        let doc = Document::from_json_str(r#"{"type": 7}"#).unwrap();
        assert_eq!(doc.type_tag(), None);
    }

    #[test]
    fn typed_field_access() {
        let doc = Document::from_json_str(r#"{"health": 50, "name": "Goblin"}"#).unwrap();
        assert_eq!(doc.field::<u32>("health").unwrap(), Some(50));
        assert_eq!(doc.field::<u32>("missing").unwrap(), None);
        let err = doc.field::<u32>("name").unwrap_err();
        assert!(matches!(err, DocumentError::Field { ref key, .. } if key == "name"));
    }

    #[test]
    fn collect_from_pairs() {
        let doc: Document = vec![
            ("type".to_string(), json!("item")),
            ("stack".to_string(), json!(99)),
        ]
        .into_iter()
        .collect();
        assert_eq!(doc.type_tag(), Some("item"));
        assert_eq!(doc.field::<u8>("stack").unwrap(), Some(99));
    }
}
