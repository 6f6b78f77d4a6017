//! Filter strings
//!
//! Paged and aggregate entry points accept filters as text: comma-separated
//! `field op value` terms that must all hold. Operators are `==`, `!=`, `>=`,
//! `<=`, `>`, `<` and `=~` (case-insensitive contains). An `==` value of the
//! form `a|b|c` matches any of the alternatives.
//!
//! Values are typed by inference: integer, float, boolean, RFC 3339 timestamp,
//! otherwise string. Quoting a value (`'..'` or `".."`) keeps it a string.

use super::{FieldRef, FilterOperator, FilterValue, QueryFilter};
use crate::models::PropertyValue;
use crate::services::error::QueryError;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

const TERM_PATTERN: &str = r"^\s*([A-Za-z0-9_:@.\-]+)\s*(==|!=|>=|<=|=~|>|<)\s*(.*?)\s*$";

/// Maps user-facing filter field names onto query fields
#[derive(Debug, Clone, Default)]
pub struct FilterAliases {
    aliases: HashMap<String, FieldRef>,
}

impl FilterAliases {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `name` to `field` instead of the property of the same name
    pub fn alias(mut self, name: impl Into<String>, field: impl Into<FieldRef>) -> Self {
        self.aliases.insert(name.into(), field.into());
        self
    }

    fn resolve(&self, name: &str) -> FieldRef {
        self.aliases
            .get(name)
            .cloned()
            .unwrap_or_else(|| FieldRef::parse(name))
    }
}

/// Parse a filter string into query filters
///
/// An empty (or blank) string yields no filters.
///
/// # Examples
///
/// ```rust
/// use metastore_core::services::{parse_filter, FilterAliases, FilterOperator};
///
/// let aliases = FilterAliases::new().alias("status", "tba:status");
/// let filters = parse_filter("status==COMPLETED, exitCode=~fail", &aliases).unwrap();
/// assert_eq!(filters.len(), 2);
/// assert_eq!(filters[0].field.to_string(), "tba:status");
/// assert_eq!(filters[1].operator, FilterOperator::Contains);
/// assert!(!filters[1].case_sensitive);
/// ```
pub fn parse_filter(filter: &str, aliases: &FilterAliases) -> Result<Vec<QueryFilter>, QueryError> {
    static TERM_REGEX: OnceLock<Regex> = OnceLock::new();
    let term_regex = TERM_REGEX.get_or_init(|| Regex::new(TERM_PATTERN).expect("valid filter pattern"));

    let mut filters = Vec::new();
    for term in filter.split(',') {
        if term.trim().is_empty() {
            continue;
        }
        let captures = term_regex
            .captures(term)
            .ok_or_else(|| QueryError::invalid_filter(term.trim(), "expected <field><op><value>"))?;
        let field = aliases.resolve(&captures[1]);
        let raw = &captures[3];
        if raw.is_empty() {
            return Err(QueryError::invalid_filter(term.trim(), "missing value"));
        }

        let parsed = match &captures[2] {
            "==" if raw.contains('|') => QueryFilter::new(
                field,
                FilterOperator::In,
                FilterValue::List(raw.split('|').map(|v| infer_literal(v.trim())).collect()),
            ),
            "==" => QueryFilter::compare(field, FilterOperator::Equals, infer_literal(raw)),
            "!=" => QueryFilter::compare(field, FilterOperator::NotEquals, infer_literal(raw)),
            ">=" => QueryFilter::compare(field, FilterOperator::GreaterThanOrEqual, infer_literal(raw)),
            "<=" => QueryFilter::compare(field, FilterOperator::LessThanOrEqual, infer_literal(raw)),
            ">" => QueryFilter::compare(field, FilterOperator::GreaterThan, infer_literal(raw)),
            "<" => QueryFilter::compare(field, FilterOperator::LessThan, infer_literal(raw)),
            "=~" => QueryFilter::compare(field, FilterOperator::Contains, unquote(raw).to_string())
                .ignore_case(),
            other => return Err(QueryError::invalid_filter(term.trim(), format!("unknown operator {}", other))),
        };
        filters.push(parsed);
    }
    Ok(filters)
}

fn unquote(raw: &str) -> &str {
    for quote in ['\'', '"'] {
        if raw.len() >= 2 && raw.starts_with(quote) && raw.ends_with(quote) {
            return &raw[1..raw.len() - 1];
        }
    }
    raw
}

/// Type a literal by inference
fn infer_literal(raw: &str) -> PropertyValue {
    let unquoted = unquote(raw);
    if unquoted.len() != raw.len() {
        return PropertyValue::String(unquoted.to_string());
    }
    if let Ok(v) = raw.parse::<i64>() {
        return PropertyValue::Long(v);
    }
    if let Ok(v) = raw.parse::<f64>() {
        return PropertyValue::Double(v);
    }
    match raw {
        "true" => return PropertyValue::Boolean(true),
        "false" => return PropertyValue::Boolean(false),
        _ => {}
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return PropertyValue::Date(t.with_timezone(&Utc));
    }
    PropertyValue::String(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_filter_is_empty() {
        assert!(parse_filter("", &FilterAliases::new()).unwrap().is_empty());
        assert!(parse_filter("  , ", &FilterAliases::new()).unwrap().is_empty());
    }

    #[test]
    fn test_literal_inference() {
        assert_eq!(infer_literal("42"), PropertyValue::Long(42));
        assert_eq!(infer_literal("4.5"), PropertyValue::Double(4.5));
        assert_eq!(infer_literal("true"), PropertyValue::Boolean(true));
        assert_eq!(infer_literal("'42'"), PropertyValue::String("42".into()));
        assert_eq!(infer_literal("abc"), PropertyValue::String("abc".into()));
        assert!(matches!(
            infer_literal("2024-03-01T10:00:00Z"),
            PropertyValue::Date(_)
        ));
    }

    #[test]
    fn test_operators_and_aliases() {
        let aliases = FilterAliases::new().alias("name", "@name");
        let filters = parse_filter("name==f1, count>=3, size<10", &aliases).unwrap();

        assert_eq!(filters[0].field, FieldRef::Name);
        assert_eq!(filters[0].operator, FilterOperator::Equals);
        assert_eq!(filters[1].operator, FilterOperator::GreaterThanOrEqual);
        assert_eq!(filters[1].value, FilterValue::Literal(PropertyValue::Long(3)));
        assert_eq!(filters[2].operator, FilterOperator::LessThan);
    }

    #[test]
    fn test_alternatives_become_in() {
        let filters = parse_filter("status==FAILED|ABANDONED", &FilterAliases::new()).unwrap();
        assert_eq!(filters[0].operator, FilterOperator::In);
        assert_eq!(
            filters[0].value,
            FilterValue::List(vec!["FAILED".into(), "ABANDONED".into()])
        );
    }

    #[test]
    fn test_invalid_terms() {
        let aliases = FilterAliases::new();
        assert!(matches!(
            parse_filter("status", &aliases),
            Err(QueryError::InvalidFilter { .. })
        ));
        assert!(matches!(
            parse_filter("status==", &aliases),
            Err(QueryError::InvalidFilter { .. })
        ));
    }
}
