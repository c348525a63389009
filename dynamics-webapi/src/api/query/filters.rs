//! Typed OData filter expressions
//!
//! `Query::filter` accepts raw predicate text; these helpers build the same text
//! with correctly formatted literals.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A literal on the right-hand side of a comparison
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    String(String),
    Integer(i64),
    Number(f64),
    Boolean(bool),
    Guid(Uuid),
    DateTime(DateTime<Utc>),
    Null,
}

impl FilterValue {
    /// Render as an OData literal
    pub fn to_odata(&self) -> String {
        match self {
            Self::String(s) => format!("'{}'", s.replace('\'', "''")),
            Self::Integer(i) => i.to_string(),
            Self::Number(n) => n.to_string(),
            Self::Boolean(b) => b.to_string(),
            Self::Guid(g) => g.hyphenated().to_string(),
            Self::DateTime(dt) => dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            Self::Null => "null".to_string(),
        }
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for FilterValue {
    fn from(value: i32) -> Self {
        Self::Integer(value as i64)
    }
}

impl From<f64> for FilterValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<Uuid> for FilterValue {
    fn from(value: Uuid) -> Self {
        Self::Guid(value)
    }
}

impl From<DateTime<Utc>> for FilterValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::DateTime(value)
    }
}

/// Filter expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, FilterValue),
    Ne(String, FilterValue),
    Gt(String, FilterValue),
    Ge(String, FilterValue),
    Lt(String, FilterValue),
    Le(String, FilterValue),
    Contains(String, String),
    StartsWith(String, String),
    EndsWith(String, String),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    /// Pre-rendered predicate text
    Raw(String),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::Eq(field.into(), value.into())
    }

    pub fn ne(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::Ne(field.into(), value.into())
    }

    pub fn gt(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::Gt(field.into(), value.into())
    }

    pub fn ge(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::Ge(field.into(), value.into())
    }

    pub fn lt(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::Lt(field.into(), value.into())
    }

    pub fn le(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::Le(field.into(), value.into())
    }

    pub fn contains(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Contains(field.into(), value.into())
    }

    pub fn starts_with(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::StartsWith(field.into(), value.into())
    }

    pub fn ends_with(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::EndsWith(field.into(), value.into())
    }

    pub fn and(filters: Vec<Filter>) -> Self {
        Self::And(filters)
    }

    pub fn or(filters: Vec<Filter>) -> Self {
        Self::Or(filters)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(filter: Filter) -> Self {
        Self::Not(Box::new(filter))
    }

    /// Render to OData `$filter` syntax (unencoded)
    pub fn to_odata(&self) -> String {
        match self {
            Self::Eq(f, v) => format!("{} eq {}", f, v.to_odata()),
            Self::Ne(f, v) => format!("{} ne {}", f, v.to_odata()),
            Self::Gt(f, v) => format!("{} gt {}", f, v.to_odata()),
            Self::Ge(f, v) => format!("{} ge {}", f, v.to_odata()),
            Self::Lt(f, v) => format!("{} lt {}", f, v.to_odata()),
            Self::Le(f, v) => format!("{} le {}", f, v.to_odata()),
            Self::Contains(f, s) => format!("contains({},{})", f, FilterValue::from(s.as_str()).to_odata()),
            Self::StartsWith(f, s) => {
                format!("startswith({},{})", f, FilterValue::from(s.as_str()).to_odata())
            }
            Self::EndsWith(f, s) => format!("endswith({},{})", f, FilterValue::from(s.as_str()).to_odata()),
            Self::And(filters) => join_group(filters, " and "),
            Self::Or(filters) => join_group(filters, " or "),
            Self::Not(inner) => format!("not ({})", inner.to_odata()),
            Self::Raw(text) => text.clone(),
        }
    }
}

fn join_group(filters: &[Filter], separator: &str) -> String {
    match filters {
        [] => String::new(),
        [single] => single.to_odata(),
        many => many
            .iter()
            .map(|f| format!("({})", f.to_odata()))
            .collect::<Vec<_>>()
            .join(separator),
    }
}
