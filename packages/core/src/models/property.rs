//! Typed property values
//!
//! Node properties hold one of a fixed set of primitive types. Reads go through
//! [`FromProperty`], which coerces between compatible representations (for
//! example a `Long` read as `f64`, or an RFC 3339 `String` read as a timestamp)
//! and reports `None` when no sensible coercion exists.

use crate::models::{NodeId, ValidationError};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Semantic type of a stored property value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    String,
    Long,
    Double,
    Boolean,
    Date,
    Binary,
    Reference,
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Long => "long",
            Self::Double => "double",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Binary => "binary",
            Self::Reference => "reference",
        };
        f.write_str(name)
    }
}

/// A single typed property value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum PropertyValue {
    String(String),
    Long(i64),
    Double(f64),
    Boolean(bool),
    Date(DateTime<Utc>),
    Binary(Vec<u8>),
    /// Weak edge to another node, resolved at dereference time
    Reference(NodeId),
}

impl PropertyValue {
    pub fn property_type(&self) -> PropertyType {
        match self {
            Self::String(_) => PropertyType::String,
            Self::Long(_) => PropertyType::Long,
            Self::Double(_) => PropertyType::Double,
            Self::Boolean(_) => PropertyType::Boolean,
            Self::Date(_) => PropertyType::Date,
            Self::Binary(_) => PropertyType::Binary,
            Self::Reference(_) => PropertyType::Reference,
        }
    }

    /// Numeric view used for cross-type comparisons
    fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Long(v) => Some(*v as f64),
            Self::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Compare two values, coercing between numeric types and between
    /// timestamps/references and their string forms
    ///
    /// Returns `None` for values that have no common ordering.
    pub fn compare(&self, other: &PropertyValue) -> Option<Ordering> {
        match (self, other) {
            (Self::String(a), Self::String(b)) => Some(a.cmp(b)),
            (Self::Long(a), Self::Long(b)) => Some(a.cmp(b)),
            (Self::Boolean(a), Self::Boolean(b)) => Some(a.cmp(b)),
            (Self::Date(a), Self::Date(b)) => Some(a.cmp(b)),
            (Self::Binary(a), Self::Binary(b)) => Some(a.cmp(b)),
            (Self::Reference(a), Self::Reference(b)) => Some(a.cmp(b)),
            (Self::Date(a), Self::String(_)) => {
                DateTime::<Utc>::from_property(other).map(|b| a.cmp(&b))
            }
            (Self::String(_), Self::Date(b)) => {
                DateTime::<Utc>::from_property(self).map(|a| a.cmp(b))
            }
            (Self::Reference(a), Self::String(_)) => {
                NodeId::from_property(other).map(|b| a.cmp(&b))
            }
            (Self::String(_), Self::Reference(b)) => {
                NodeId::from_property(self).map(|a| a.cmp(b))
            }
            _ => {
                let a = self.as_f64()?;
                let b = other.as_f64()?;
                a.partial_cmp(&b)
            }
        }
    }

    /// Build a value from a JSON scalar
    ///
    /// `null` is not a value and yields `Ok(None)`; arrays and objects are
    /// rejected.
    pub fn from_json(value: &serde_json::Value) -> Result<Option<Self>, ValidationError> {
        match value {
            serde_json::Value::Null => Ok(None),
            serde_json::Value::Bool(b) => Ok(Some(Self::Boolean(*b))),
            serde_json::Value::String(s) => Ok(Some(Self::String(s.clone()))),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(Some(Self::Long(i))),
                None => n.as_f64().map(|f| Some(Self::Double(f))).ok_or_else(|| {
                    ValidationError::InvalidProperties(format!("unsupported number {}", n))
                }),
            },
            other => Err(ValidationError::InvalidProperties(format!(
                "unsupported property value {}",
                other
            ))),
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Long(v) => write!(f, "{}", v),
            Self::Double(v) => write!(f, "{}", v),
            Self::Boolean(v) => write!(f, "{}", v),
            Self::Date(v) => f.write_str(&v.to_rfc3339()),
            Self::Binary(bytes) => write!(f, "<{} bytes>", bytes.len()),
            Self::Reference(id) => write!(f, "{}", id),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Long(value)
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        Self::Long(value.into())
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<DateTime<Utc>> for PropertyValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Date(value)
    }
}

impl From<NodeId> for PropertyValue {
    fn from(value: NodeId) -> Self {
        Self::Reference(value)
    }
}

impl From<Vec<u8>> for PropertyValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Binary(value)
    }
}

/// Coercion from a stored value to a requested semantic type
pub trait FromProperty: Sized {
    /// Semantic type reported in mismatch errors
    const TYPE: PropertyType;

    /// `None` when the stored value cannot be coerced
    fn from_property(value: &PropertyValue) -> Option<Self>;
}

impl FromProperty for String {
    const TYPE: PropertyType = PropertyType::String;

    fn from_property(value: &PropertyValue) -> Option<Self> {
        match value {
            PropertyValue::Binary(bytes) => String::from_utf8(bytes.clone()).ok(),
            other => Some(other.to_string()),
        }
    }
}

impl FromProperty for i64 {
    const TYPE: PropertyType = PropertyType::Long;

    fn from_property(value: &PropertyValue) -> Option<Self> {
        match value {
            PropertyValue::Long(v) => Some(*v),
            PropertyValue::Double(v) if v.fract() == 0.0 && v.abs() < i64::MAX as f64 => {
                Some(*v as i64)
            }
            PropertyValue::String(s) => s.trim().parse().ok(),
            PropertyValue::Date(d) => Some(d.timestamp_millis()),
            _ => None,
        }
    }
}

impl FromProperty for f64 {
    const TYPE: PropertyType = PropertyType::Double;

    fn from_property(value: &PropertyValue) -> Option<Self> {
        match value {
            PropertyValue::Double(v) => Some(*v),
            PropertyValue::Long(v) => Some(*v as f64),
            PropertyValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl FromProperty for bool {
    const TYPE: PropertyType = PropertyType::Boolean;

    fn from_property(value: &PropertyValue) -> Option<Self> {
        match value {
            PropertyValue::Boolean(v) => Some(*v),
            PropertyValue::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }
}

impl FromProperty for DateTime<Utc> {
    const TYPE: PropertyType = PropertyType::Date;

    fn from_property(value: &PropertyValue) -> Option<Self> {
        match value {
            PropertyValue::Date(d) => Some(*d),
            PropertyValue::String(s) => DateTime::parse_from_rfc3339(s.trim())
                .ok()
                .map(|d| d.with_timezone(&Utc)),
            PropertyValue::Long(millis) => Utc.timestamp_millis_opt(*millis).single(),
            _ => None,
        }
    }
}

impl FromProperty for NodeId {
    const TYPE: PropertyType = PropertyType::Reference;

    fn from_property(value: &PropertyValue) -> Option<Self> {
        match value {
            PropertyValue::Reference(id) => Some(*id),
            PropertyValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

impl FromProperty for Vec<u8> {
    const TYPE: PropertyType = PropertyType::Binary;

    fn from_property(value: &PropertyValue) -> Option<Self> {
        match value {
            PropertyValue::Binary(bytes) => Some(bytes.clone()),
            PropertyValue::String(s) => Some(s.as_bytes().to_vec()),
            _ => None,
        }
    }
}

impl FromProperty for PropertyValue {
    const TYPE: PropertyType = PropertyType::String;

    fn from_property(value: &PropertyValue) -> Option<Self> {
        Some(value.clone())
    }
}

/// Partial property update
///
/// Keys that are not mentioned are left untouched; a key mapped to `None`
/// is cleared.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyUpdates {
    entries: Vec<(String, Option<PropertyValue>)>,
}

impl PropertyUpdates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `name` to `value`
    pub fn set(mut self, name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.entries.push((name.into(), Some(value.into())));
        self
    }

    /// Clear `name`
    pub fn clear(mut self, name: impl Into<String>) -> Self {
        self.entries.push((name.into(), None));
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Option<PropertyValue>) {
        self.entries.push((name.into(), value));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&PropertyValue>)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_ref()))
    }

    /// Build updates from a JSON object, `null` clears the key
    pub fn from_json(value: &serde_json::Value) -> Result<Self, ValidationError> {
        let object = value.as_object().ok_or_else(|| {
            ValidationError::InvalidProperties("property updates must be a JSON object".into())
        })?;
        let mut updates = Self::new();
        for (name, value) in object {
            updates.insert(name.clone(), PropertyValue::from_json(value)?);
        }
        Ok(updates)
    }
}

impl<K: Into<String>, V: Into<PropertyValue>> FromIterator<(K, V)> for PropertyUpdates {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(name, value)| (name.into(), Some(value.into())))
                .collect(),
        }
    }
}
