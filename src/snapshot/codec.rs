//! Tagged-attribute storage encoding.
//!
//! Stored records are maps from field name to a single-key object naming the
//! value's type: `{"S": "text"}` for strings, `{"N": "42"}` for numbers (kept
//! as decimal strings) and `{"NULL": true}` for absent optional values.
//! Conversion is driven by serde, so any flat struct of strings, numbers and
//! options can be encoded.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use thiserror::Error;

/// A single typed attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeValue {
    #[serde(rename = "S")]
    S(String),
    #[serde(rename = "N")]
    N(String),
    #[serde(rename = "NULL")]
    Null(bool),
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::S(value) => Some(value),
            _ => None,
        }
    }

    fn type_tag(&self) -> &'static str {
        match self {
            AttributeValue::S(_) => "S",
            AttributeValue::N(_) => "N",
            AttributeValue::Null(_) => "NULL",
        }
    }
}

/// A record in storage encoding, keyed by field name.
pub type Item = BTreeMap<String, AttributeValue>;

/// Raised when a value cannot be moved between its native and stored form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("expected a flat record, got {found}")]
    NotARecord { found: &'static str },

    #[error("field '{field}' has unsupported value type {found}")]
    UnsupportedValue { field: String, found: &'static str },

    #[error("field '{field}' holds non-numeric value '{value}'")]
    InvalidNumber { field: String, value: String },

    #[error("field '{field}' is missing")]
    MissingField { field: String },

    #[error("field '{field}' must be tagged {expected}, found {found}")]
    WrongTag {
        field: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("field '{field}' holds invalid timestamp '{value}'")]
    InvalidTimestamp { field: String, value: String },

    #[error("record does not match the expected shape: {0}")]
    Shape(String),
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Encodes a native value into its tagged storage form.
pub fn to_item<T: Serialize>(value: &T) -> Result<Item, ValidationError> {
    let json = serde_json::to_value(value).map_err(|e| ValidationError::Shape(e.to_string()))?;
    let Value::Object(fields) = json else {
        return Err(ValidationError::NotARecord {
            found: kind_of(&json),
        });
    };

    fields
        .into_iter()
        .map(|(field, value)| {
            let attribute = match value {
                Value::String(s) => AttributeValue::S(s),
                Value::Number(n) => AttributeValue::N(n.to_string()),
                Value::Null => AttributeValue::Null(true),
                other => {
                    return Err(ValidationError::UnsupportedValue {
                        field,
                        found: kind_of(&other),
                    });
                }
            };
            Ok((field, attribute))
        })
        .collect()
}

/// Decodes a tagged storage record into a native value.
///
/// Numeric strings are parsed before deserialization, so a field tagged with
/// the wrong type surfaces as a shape error instead of being coerced.
pub fn from_item<T: DeserializeOwned>(item: &Item) -> Result<T, ValidationError> {
    let mut fields = Map::with_capacity(item.len());
    for (field, attribute) in item {
        let value = match attribute {
            AttributeValue::S(s) => Value::String(s.clone()),
            AttributeValue::N(raw) => Value::Number(parse_number(field, raw)?),
            AttributeValue::Null(_) => Value::Null,
        };
        fields.insert(field.clone(), value);
    }

    serde_json::from_value(Value::Object(fields)).map_err(|e| ValidationError::Shape(e.to_string()))
}

/// Reads a required string attribute.
pub fn require_str<'a>(item: &'a Item, field: &str) -> Result<&'a str, ValidationError> {
    let attribute = item.get(field).ok_or_else(|| ValidationError::MissingField {
        field: field.to_string(),
    })?;
    attribute.as_str().ok_or_else(|| ValidationError::WrongTag {
        field: field.to_string(),
        expected: "S",
        found: attribute.type_tag(),
    })
}

fn parse_number(field: &str, raw: &str) -> Result<Number, ValidationError> {
    let trimmed = raw.trim();
    let invalid = || ValidationError::InvalidNumber {
        field: field.to_string(),
        value: raw.to_string(),
    };

    if let Ok(n) = trimmed.parse::<u64>() {
        return Ok(Number::from(n));
    }
    if let Ok(n) = trimmed.parse::<i64>() {
        return Ok(Number::from(n));
    }
    trimmed
        .parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u64,
        ratio: f64,
        note: Option<String>,
    }

    fn sample() -> Sample {
        Sample {
            name: "alpha".into(),
            count: 42,
            ratio: 0.5,
            note: None,
        }
    }

    #[test]
    fn encodes_with_type_tags() {
        let item = to_item(&sample()).unwrap();
        let rendered = serde_json::to_value(&item).unwrap();

        assert_eq!(
            rendered,
            json!({
                "name": { "S": "alpha" },
                "count": { "N": "42" },
                "ratio": { "N": "0.5" },
                "note": { "NULL": true }
            })
        );
    }

    #[test]
    fn decodes_numbers_from_strings() {
        let item = to_item(&sample()).unwrap();
        let decoded: Sample = from_item(&item).unwrap();
        assert_eq!(decoded, sample());
    }

    #[test]
    fn missing_optional_field_decodes_as_none() {
        let mut item = to_item(&sample()).unwrap();
        item.remove("note");
        let decoded: Sample = from_item(&item).unwrap();
        assert_eq!(decoded.note, None);
    }

    #[test]
    fn non_numeric_n_value_is_rejected() {
        let mut item = to_item(&sample()).unwrap();
        item.insert("count".into(), AttributeValue::N("many".into()));

        let err = from_item::<Sample>(&item).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::InvalidNumber { ref field, .. } if field == "count"
        ));
    }

    #[test]
    fn wrongly_tagged_number_is_rejected() {
        let mut item = to_item(&sample()).unwrap();
        item.insert("count".into(), AttributeValue::S("42".into()));

        assert!(matches!(
            from_item::<Sample>(&item),
            Err(ValidationError::Shape(_))
        ));
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let mut item = to_item(&sample()).unwrap();
        item.remove("name");
        assert!(from_item::<Sample>(&item).is_err());
    }

    #[test]
    fn nested_values_are_unsupported() {
        let err = to_item(&json!({ "tags": ["a", "b"] })).unwrap_err();
        assert_eq!(
            err,
            ValidationError::UnsupportedValue {
                field: "tags".into(),
                found: "array"
            }
        );
    }

    #[test]
    fn scalars_are_not_records() {
        assert_eq!(
            to_item(&"plain").unwrap_err(),
            ValidationError::NotARecord { found: "string" }
        );
    }

    #[test]
    fn require_str_checks_the_tag() {
        let item = to_item(&sample()).unwrap();
        assert_eq!(require_str(&item, "name").unwrap(), "alpha");
        assert!(matches!(
            require_str(&item, "count"),
            Err(ValidationError::WrongTag { expected: "S", found: "N", .. })
        ));
        assert!(matches!(
            require_str(&item, "absent"),
            Err(ValidationError::MissingField { .. })
        ));
    }

    #[test]
    fn parses_stored_json_shape() {
        let stored = json!({
            "name": { "S": "beta" },
            "count": { "N": "7" },
            "ratio": { "N": "1" },
            "note": { "S": "hi" }
        });
        let item: Item = serde_json::from_value(stored).unwrap();
        let decoded: Sample = from_item(&item).unwrap();
        assert_eq!(decoded.count, 7);
        assert_eq!(decoded.ratio, 1.0);
        assert_eq!(decoded.note.as_deref(), Some("hi"));
    }
}
