//! Field kinds and value conversion
//!
//! A field's declared type is one of three shapes:
//!
//! - `Simple`: a single value of a simple kind
//! - `List`: zero or more values of a simple component kind
//! - `Enum`: one value of a simple base kind, restricted to an allowed set
//!
//! Values arrive in their external representation (what a caller sends)
//! and are converted into the stored representation kept in the `fields`
//! column. Stored representations are canonical: converting a stored value
//! again yields the same value.

use std::fmt;

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Number, Value};
use thiserror::Error;
use uuid::Uuid;

/// Markup identifiers accepted for `markup` values
pub const MARKUP_PLAIN_TEXT: &str = "PlainText";
pub const MARKUP_MARKDOWN: &str = "Markdown";

/// Errors raised while converting field values
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConversionError {
    #[error("value {value} is not a valid {kind}")]
    InvalidValue { kind: Kind, value: String },

    #[error("value {value} is not among the allowed enum values")]
    NotAnEnumValue { value: String },

    #[error("value {value} should be a list")]
    NotAList { value: String },

    #[error("field '{0}' is required")]
    Required(String),

    #[error("invalid field type: {0}")]
    InvalidType(String),

    #[error("cannot convert {value} from {from} to {to}")]
    Incompatible {
        value: String,
        from: String,
        to: String,
    },
}

/// Simple (non-composite) field kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    String,
    Integer,
    Float,
    Boolean,
    Instant,
    Duration,
    Url,
    Markup,
    User,
    Iteration,
    Area,
    Codebase,
    Label,
    BoardColumn,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::String => "string",
            Kind::Integer => "integer",
            Kind::Float => "float",
            Kind::Boolean => "boolean",
            Kind::Instant => "instant",
            Kind::Duration => "duration",
            Kind::Url => "url",
            Kind::Markup => "markup",
            Kind::User => "user",
            Kind::Iteration => "iteration",
            Kind::Area => "area",
            Kind::Codebase => "codebase",
            Kind::Label => "label",
            Kind::BoardColumn => "boardcolumn",
        }
    }

    /// Relational kinds store the identity of a row in another table
    pub fn is_relational(&self) -> bool {
        matches!(
            self,
            Kind::User
                | Kind::Iteration
                | Kind::Area
                | Kind::Codebase
                | Kind::Label
                | Kind::BoardColumn
        )
    }

    /// Convert an external value into its stored representation
    pub fn convert_to_model(&self, value: &Value) -> Result<Value, ConversionError> {
        let invalid = || ConversionError::InvalidValue {
            kind: *self,
            value: value.to_string(),
        };

        match self {
            Kind::String => match value {
                Value::String(_) => Ok(value.clone()),
                _ => Err(invalid()),
            },
            Kind::Integer | Kind::Duration => integral(value).map(Value::from).ok_or_else(invalid),
            Kind::Float => value
                .as_f64()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(invalid),
            Kind::Boolean => match value {
                Value::Bool(_) => Ok(value.clone()),
                _ => Err(invalid()),
            },
            Kind::Instant => instant(value).map(Value::String).ok_or_else(invalid),
            Kind::Url => match value {
                Value::String(s) if has_scheme(s) => Ok(value.clone()),
                _ => Err(invalid()),
            },
            Kind::Markup => markup(value).ok_or_else(invalid),
            Kind::User
            | Kind::Iteration
            | Kind::Area
            | Kind::Codebase
            | Kind::Label
            | Kind::BoardColumn => value
                .as_str()
                .and_then(|s| Uuid::parse_str(s).ok())
                .map(|id| Value::String(id.to_string()))
                .ok_or_else(invalid),
        }
    }

    /// Convert a stored value into its external representation
    pub fn convert_from_model(&self, value: &Value) -> Result<Value, ConversionError> {
        self.convert_to_model(value)
    }

    /// Render a stored value of a non-relational kind for humans
    pub fn render(&self, value: &Value) -> String {
        match (self, value) {
            (Kind::Markup, _) => markup_content(value),
            (_, Value::String(s)) => s.clone(),
            _ => value.to_string(),
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn integral(value: &Value) -> Option<i64> {
    let Value::Number(number) = value else {
        return None;
    };
    if let Some(i) = number.as_i64() {
        return Some(i);
    }
    let f = number.as_f64()?;
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        return Some(f as i64);
    }
    None
}

fn instant(value: &Value) -> Option<String> {
    let parsed: DateTime<Utc> = match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s).ok()?.with_timezone(&Utc),
        Value::Number(n) => Utc.timestamp_opt(n.as_i64()?, 0).single()?,
        _ => return None,
    };
    Some(parsed.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

fn has_scheme(s: &str) -> bool {
    match s.split_once("://") {
        Some((scheme, rest)) => {
            !rest.is_empty()
                && scheme.starts_with(|c: char| c.is_ascii_alphabetic())
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

fn markup(value: &Value) -> Option<Value> {
    match value {
        Value::String(content) => Some(markup_value(content, MARKUP_PLAIN_TEXT)),
        Value::Object(map) => {
            let content = map.get("content")?.as_str()?;
            let markup = match map.get("markup") {
                None | Some(Value::Null) => MARKUP_PLAIN_TEXT,
                Some(Value::String(m)) if m == MARKUP_PLAIN_TEXT || m == MARKUP_MARKDOWN => m,
                Some(_) => return None,
            };
            Some(markup_value(content, markup))
        }
        _ => None,
    }
}

/// Build a stored markup value
pub fn markup_value(content: &str, markup: &str) -> Value {
    let mut map = Map::new();
    map.insert("content".to_string(), json!(content));
    map.insert("markup".to_string(), json!(markup));
    Value::Object(map)
}

/// Extract the text of a markup value (plain strings are returned as is)
pub fn markup_content(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// The declared type of a field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum FieldType {
    Simple {
        kind: Kind,
    },
    List {
        component: Kind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<Value>,
    },
    Enum {
        base: Kind,
        values: Vec<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<Value>,
        /// A subtype may redefine the allowed values of this field
        #[serde(default)]
        rewritable_values: bool,
    },
}

impl FieldType {
    pub fn simple(kind: Kind) -> Self {
        FieldType::Simple { kind }
    }

    pub fn list(component: Kind) -> Self {
        FieldType::List {
            component,
            default: None,
        }
    }

    pub fn enumeration(base: Kind, values: Vec<Value>) -> Self {
        FieldType::Enum {
            base,
            values,
            default: None,
            rewritable_values: false,
        }
    }

    /// The kind of the individual values this type holds
    pub fn base_kind(&self) -> Kind {
        match self {
            FieldType::Simple { kind } => *kind,
            FieldType::List { component, .. } => *component,
            FieldType::Enum { base, .. } => *base,
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self, FieldType::List { .. })
    }

    pub fn describe(&self) -> String {
        match self {
            FieldType::Simple { kind } => kind.to_string(),
            FieldType::List { component, .. } => format!("list<{}>", component),
            FieldType::Enum { base, .. } => format!("enum<{}>", base),
        }
    }

    /// Check that defaults and allowed values fit the declared kinds
    pub fn validate(&self) -> Result<(), ConversionError> {
        match self {
            FieldType::Simple { .. } => Ok(()),
            FieldType::List { component, default } => {
                if let Some(default) = default {
                    component.convert_to_model(default).map_err(|e| {
                        ConversionError::InvalidType(format!("invalid list default: {}", e))
                    })?;
                }
                Ok(())
            }
            FieldType::Enum {
                base,
                values,
                default,
                ..
            } => {
                if values.is_empty() {
                    return Err(ConversionError::InvalidType(
                        "enum type has no values".to_string(),
                    ));
                }
                for (i, value) in values.iter().enumerate() {
                    base.convert_to_model(value).map_err(|e| {
                        ConversionError::InvalidType(format!(
                            "enum value at position {} is invalid: {}",
                            i, e
                        ))
                    })?;
                }
                if let Some(default) = default {
                    self.convert_to_model(default).map_err(|e| {
                        ConversionError::InvalidType(format!("invalid enum default: {}", e))
                    })?;
                }
                Ok(())
            }
        }
    }

    /// The stored value used when a field is absent
    ///
    /// Enums fall back to their first allowed value when no explicit
    /// default is declared.
    pub fn default_value(&self) -> Option<Value> {
        match self {
            FieldType::Simple { .. } => None,
            FieldType::List { component, default } => default
                .as_ref()
                .and_then(|d| component.convert_to_model(d).ok())
                .map(|d| Value::Array(vec![d])),
            FieldType::Enum {
                base,
                values,
                default,
                ..
            } => default
                .as_ref()
                .or_else(|| values.first())
                .and_then(|d| base.convert_to_model(d).ok()),
        }
    }

    /// Convert an external value into its stored representation
    ///
    /// `null` and empty lists convert to `None` (field absent).
    pub fn convert_to_model(&self, value: &Value) -> Result<Option<Value>, ConversionError> {
        if value.is_null() {
            return Ok(None);
        }
        match self {
            FieldType::Simple { kind } => kind.convert_to_model(value).map(Some),
            FieldType::List { component, .. } => {
                convert_list(value, |item| component.convert_to_model(item))
            }
            FieldType::Enum { base, values, .. } => {
                let converted = base.convert_to_model(value)?;
                let allowed = values
                    .iter()
                    .filter_map(|v| base.convert_to_model(v).ok())
                    .any(|v| v == converted);
                if !allowed {
                    return Err(ConversionError::NotAnEnumValue {
                        value: value.to_string(),
                    });
                }
                Ok(Some(converted))
            }
        }
    }

    /// Convert a stored value into its external representation
    ///
    /// Enum membership is not re-checked so that values stay readable
    /// after the allowed set of a type has been rewritten.
    pub fn convert_from_model(&self, value: &Value) -> Result<Option<Value>, ConversionError> {
        if value.is_null() {
            return Ok(None);
        }
        match self {
            FieldType::Simple { kind } | FieldType::Enum { base: kind, .. } => {
                kind.convert_from_model(value).map(Some)
            }
            FieldType::List { component, .. } => {
                convert_list(value, |item| component.convert_from_model(item))
            }
        }
    }

    /// Convert a value stored under this type into a value stored under `target`
    ///
    /// A single value moving into a list is wrapped, a one-element list moving
    /// into a single-valued type is unwrapped.
    pub fn convert_to_type(
        &self,
        target: &FieldType,
        stored: &Value,
    ) -> Result<Option<Value>, ConversionError> {
        let Some(external) = self.convert_from_model(stored)? else {
            return Ok(None);
        };
        let incompatible = || ConversionError::Incompatible {
            value: stored.to_string(),
            from: self.describe(),
            to: target.describe(),
        };

        match (self.is_list(), target.is_list()) {
            (false, true) => target
                .convert_to_model(&Value::Array(vec![external]))
                .map_err(|_| incompatible()),
            (true, false) => match external {
                Value::Array(mut items) if items.len() == 1 => target
                    .convert_to_model(&items.remove(0))
                    .map_err(|_| incompatible()),
                _ => Err(incompatible()),
            },
            _ => target
                .convert_to_model(&external)
                .map_err(|_| incompatible()),
        }
    }
}

fn convert_list<F>(value: &Value, mut convert: F) -> Result<Option<Value>, ConversionError>
where
    F: FnMut(&Value) -> Result<Value, ConversionError>,
{
    let Value::Array(items) = value else {
        return Err(ConversionError::NotAList {
            value: value.to_string(),
        });
    };
    if items.is_empty() {
        return Ok(None);
    }
    let converted = items
        .iter()
        .map(&mut convert)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Some(Value::Array(converted)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_accepts_integral_numbers_only() {
        assert_eq!(Kind::Integer.convert_to_model(&json!(42)).unwrap(), json!(42));
        assert_eq!(Kind::Integer.convert_to_model(&json!(7.0)).unwrap(), json!(7));
        assert!(Kind::Integer.convert_to_model(&json!(7.5)).is_err());
        assert!(Kind::Integer.convert_to_model(&json!("7")).is_err());
    }

    #[test]
    fn test_float_and_boolean() {
        assert_eq!(Kind::Float.convert_to_model(&json!(3)).unwrap(), json!(3.0));
        assert_eq!(Kind::Boolean.convert_to_model(&json!(true)).unwrap(), json!(true));
        assert!(Kind::Boolean.convert_to_model(&json!(1)).is_err());
    }

    #[test]
    fn test_instant_is_normalized_to_utc() {
        let stored = Kind::Instant
            .convert_to_model(&json!("2024-03-01T12:00:00+02:00"))
            .unwrap();
        assert_eq!(stored, json!("2024-03-01T10:00:00Z"));
        assert_eq!(Kind::Instant.convert_to_model(&stored).unwrap(), stored);
        assert!(Kind::Instant.convert_to_model(&json!("yesterday")).is_err());
    }

    #[test]
    fn test_url_requires_scheme() {
        assert!(Kind::Url.convert_to_model(&json!("https://example.com")).is_ok());
        assert!(Kind::Url.convert_to_model(&json!("example.com")).is_err());
        assert!(Kind::Url.convert_to_model(&json!("://nothing")).is_err());
    }

    #[test]
    fn test_relational_kinds_normalize_uuids() {
        let id = Uuid::new_v4();
        let upper = id.to_string().to_uppercase();
        let stored = Kind::User.convert_to_model(&json!(upper)).unwrap();
        assert_eq!(stored, json!(id.to_string()));
        assert!(Kind::Iteration.convert_to_model(&json!("not-a-uuid")).is_err());
        assert!(Kind::Label.is_relational());
        assert!(!Kind::Markup.is_relational());
    }

    #[test]
    fn test_markup_from_string_and_object() {
        let stored = Kind::Markup.convert_to_model(&json!("hello")).unwrap();
        assert_eq!(stored, markup_value("hello", MARKUP_PLAIN_TEXT));

        let md = Kind::Markup
            .convert_to_model(&json!({"content": "# hi", "markup": "Markdown"}))
            .unwrap();
        assert_eq!(markup_content(&md), "# hi");

        let unsupported = json!({"content": "x", "markup": "AsciiDoc"});
        assert!(Kind::Markup.convert_to_model(&unsupported).is_err());
    }

    #[test]
    fn test_list_conversion() {
        let ft = FieldType::list(Kind::Integer);
        assert_eq!(ft.convert_to_model(&json!([1, 2])).unwrap(), Some(json!([1, 2])));
        assert_eq!(ft.convert_to_model(&json!([])).unwrap(), None);
        assert!(matches!(
            ft.convert_to_model(&json!(1)),
            Err(ConversionError::NotAList { .. })
        ));
        assert!(ft.convert_to_model(&json!([1, "x"])).is_err());
    }

    #[test]
    fn test_enum_conversion_checks_membership() {
        let ft = FieldType::enumeration(Kind::String, vec![json!("low"), json!("high")]);
        assert_eq!(ft.convert_to_model(&json!("high")).unwrap(), Some(json!("high")));
        assert!(matches!(
            ft.convert_to_model(&json!("urgent")),
            Err(ConversionError::NotAnEnumValue { .. })
        ));
        // reading back a value outside the allowed set still works
        assert_eq!(
            ft.convert_from_model(&json!("urgent")).unwrap(),
            Some(json!("urgent"))
        );
    }

    #[test]
    fn test_enum_default_falls_back_to_first_value() {
        let ft = FieldType::enumeration(Kind::String, vec![json!("new"), json!("closed")]);
        assert_eq!(ft.default_value(), Some(json!("new")));

        let with_default = FieldType::Enum {
            base: Kind::String,
            values: vec![json!("new"), json!("closed")],
            default: Some(json!("closed")),
            rewritable_values: false,
        };
        assert_eq!(with_default.default_value(), Some(json!("closed")));
    }

    #[test]
    fn test_validate() {
        assert!(FieldType::enumeration(Kind::String, vec![]).validate().is_err());
        assert!(FieldType::enumeration(Kind::Integer, vec![json!("a")])
            .validate()
            .is_err());
        let bad_default = FieldType::Enum {
            base: Kind::String,
            values: vec![json!("a")],
            default: Some(json!("b")),
            rewritable_values: false,
        };
        assert!(bad_default.validate().is_err());
        let list = FieldType::List {
            component: Kind::Integer,
            default: Some(json!(3)),
        };
        assert!(list.validate().is_ok());
        assert_eq!(list.default_value(), Some(json!([3])));
    }

    #[test]
    fn test_convert_to_type() {
        let string = FieldType::simple(Kind::String);
        let strings = FieldType::list(Kind::String);
        let integer = FieldType::simple(Kind::Integer);

        assert_eq!(
            string.convert_to_type(&strings, &json!("a")).unwrap(),
            Some(json!(["a"]))
        );
        assert_eq!(
            strings.convert_to_type(&string, &json!(["a"])).unwrap(),
            Some(json!("a"))
        );
        assert!(strings.convert_to_type(&string, &json!(["a", "b"])).is_err());
        assert!(string.convert_to_type(&integer, &json!("a")).is_err());

        let priority = FieldType::enumeration(Kind::String, vec![json!("p1"), json!("p2")]);
        assert_eq!(
            priority.convert_to_type(&string, &json!("p2")).unwrap(),
            Some(json!("p2"))
        );
    }

    #[test]
    fn test_field_type_serde_shape() {
        let ft = FieldType::enumeration(Kind::String, vec![json!("a")]);
        let json = serde_json::to_value(&ft).unwrap();
        assert_eq!(json["shape"], "enum");
        assert_eq!(json["base"], "string");
        let parsed: FieldType = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, ft);
    }
}
