//! Server-defined actions and functions
//!
//! Metadata describes an operation's name, optional binding and ordered
//! parameters. [`ActionInvoker`] checks caller arguments against that metadata,
//! coerces them into typed [`ParameterValue`]s and produces the [`Operation`] the
//! request encoder turns into a wire request.
//!
//! Actions are POSTed with a JSON body of named parameters. Functions are GETs whose
//! parameters go through aliases: `Name(A=@A,B=@B)?@A=<literal>&@B=<literal>`.

use crate::api::constants::CRM_NAMESPACE;
use crate::api::error::{Result, WebApiError};
use crate::api::operations::{EntityId, Operation, RecordRef};
use crate::api::query::encoding::encode_query_value;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value, json};
use std::fmt;
use std::ops::Deref;
use uuid::Uuid;

/// Decimal text that is also a valid JSON number
static DECIMAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^-?(0|[1-9][0-9]*)(\.[0-9]+)?([eE][+-]?[0-9]+)?$").expect("valid regex"));

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Declared type of a parameter, used to coerce JSON arguments into OData literals
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TypeHint {
    String,
    Guid,
    Int32,
    Int64,
    Decimal,
    Double,
    Boolean,
    Date,
    DateTimeOffset,
    /// Entity type, e.g. `mscrm.account` or `Microsoft.Dynamics.CRM.account`
    Entity(String),
    Other(String),
}

impl From<String> for TypeHint {
    fn from(text: String) -> Self {
        TypeHint::from(text.as_str())
    }
}

impl From<&str> for TypeHint {
    fn from(text: &str) -> Self {
        match text {
            "Edm.String" => Self::String,
            "Edm.Guid" => Self::Guid,
            "Edm.Int16" | "Edm.Int32" => Self::Int32,
            "Edm.Int64" => Self::Int64,
            "Edm.Decimal" => Self::Decimal,
            "Edm.Double" | "Edm.Single" => Self::Double,
            "Edm.Boolean" => Self::Boolean,
            "Edm.Date" => Self::Date,
            "Edm.DateTimeOffset" => Self::DateTimeOffset,
            other if other.starts_with("mscrm.") || other.starts_with("Microsoft.Dynamics.CRM.") => {
                Self::Entity(other.to_string())
            }
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<TypeHint> for String {
    fn from(hint: TypeHint) -> Self {
        hint.to_string()
    }
}

impl fmt::Display for TypeHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => f.write_str("Edm.String"),
            Self::Guid => f.write_str("Edm.Guid"),
            Self::Int32 => f.write_str("Edm.Int32"),
            Self::Int64 => f.write_str("Edm.Int64"),
            Self::Decimal => f.write_str("Edm.Decimal"),
            Self::Double => f.write_str("Edm.Double"),
            Self::Boolean => f.write_str("Edm.Boolean"),
            Self::Date => f.write_str("Edm.Date"),
            Self::DateTimeOffset => f.write_str("Edm.DateTimeOffset"),
            Self::Entity(name) | Self::Other(name) => f.write_str(name),
        }
    }
}

/// A typed parameter value
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterValue {
    Null,
    String(String),
    Guid(Uuid),
    Integer(i64),
    /// Exact decimal text, see [`ParameterValue::decimal`]
    Decimal(String),
    Double(f64),
    Boolean(bool),
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
    /// Reference to an existing record
    Entity { entity_set: String, id: EntityId },
    /// Complex or collection value passed through as-is
    Json(Value),
}

impl ParameterValue {
    /// Edm.Decimal from its text, keeping every digit. `None` unless the text is a
    /// plain decimal number (optional sign, fraction and exponent).
    pub fn decimal(text: &str) -> Option<Self> {
        let text = text.trim();
        let text = text.strip_prefix('+').unwrap_or(text);
        DECIMAL.is_match(text).then(|| Self::Decimal(text.to_string()))
    }

    /// Literal form used in function parameter aliases: strings quoted, GUIDs and
    /// numbers bare, dates in extended ISO form.
    pub fn to_literal(&self) -> String {
        match self {
            Self::Null => "null".to_string(),
            Self::String(s) => format!("'{}'", s.replace('\'', "''")),
            Self::Guid(g) => g.hyphenated().to_string(),
            Self::Integer(i) => i.to_string(),
            Self::Decimal(text) => text.clone(),
            Self::Double(d) => d.to_string(),
            Self::Boolean(b) => b.to_string(),
            Self::Date(date) => date.format(DATE_FORMAT).to_string(),
            Self::DateTime(dt) => dt.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            Self::Entity { entity_set, id } => {
                json!({ "@odata.id": format!("{}({})", entity_set, id) }).to_string()
            }
            Self::Json(value) => value.to_string(),
        }
    }

    /// JSON form used in action bodies
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::String(s) => Value::String(s.clone()),
            Self::Guid(g) => Value::String(g.hyphenated().to_string()),
            Self::Integer(i) => json!(i),
            Self::Decimal(text) => text
                .parse::<Number>()
                .map(Value::Number)
                .unwrap_or_else(|_| Value::String(text.clone())),
            Self::Double(d) => json!(d),
            Self::Boolean(b) => Value::Bool(*b),
            Self::Date(date) => Value::String(date.format(DATE_FORMAT).to_string()),
            Self::DateTime(dt) => Value::String(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Self::Entity { entity_set, id } => {
                json!({ "@odata.id": format!("{}({})", entity_set, id) })
            }
            Self::Json(value) => value.clone(),
        }
    }

    /// Best-effort typing of an untyped JSON argument
    pub fn infer(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Boolean(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Integer(i),
                None => Self::decimal(&n.to_string())
                    .unwrap_or_else(|| Self::Double(n.as_f64().unwrap_or_default())),
            },
            Value::String(s) => Self::String(s.clone()),
            other => Self::Json(other.clone()),
        }
    }

    /// Coerce a JSON argument according to its declared type
    pub fn coerce(name: &str, value: &Value, hint: &TypeHint) -> Result<Self> {
        if value.is_null() {
            return Ok(Self::Null);
        }

        let mismatch = || {
            WebApiError::configuration(format!(
                "parameter '{}' expects {}, got {}",
                name, hint, value
            ))
        };

        match hint {
            TypeHint::String => match value {
                Value::String(s) => Ok(Self::String(s.clone())),
                Value::Number(n) => Ok(Self::String(n.to_string())),
                Value::Bool(b) => Ok(Self::String(b.to_string())),
                _ => Err(mismatch()),
            },
            TypeHint::Guid => value
                .as_str()
                .and_then(|s| EntityId::parse(s).ok())
                .and_then(|id| id.as_guid())
                .map(Self::Guid)
                .ok_or_else(mismatch),
            TypeHint::Int32 => match value {
                Value::Number(n) => n.as_i64(),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            }
            .filter(|i| i32::try_from(*i).is_ok())
            .map(Self::Integer)
            .ok_or_else(mismatch),
            TypeHint::Int64 => match value {
                Value::Number(n) => n.as_i64().map(Self::Integer).ok_or_else(mismatch),
                Value::String(s) => s.trim().parse().map(Self::Integer).map_err(|_| mismatch()),
                _ => Err(mismatch()),
            },
            TypeHint::Decimal => match value {
                Value::Number(n) => Self::decimal(&n.to_string()).ok_or_else(mismatch),
                Value::String(s) => Self::decimal(s).ok_or_else(mismatch),
                _ => Err(mismatch()),
            },
            TypeHint::Double => match value {
                Value::Number(n) => n.as_f64().map(Self::Double).ok_or_else(mismatch),
                Value::String(s) => s.trim().parse().map(Self::Double).map_err(|_| mismatch()),
                _ => Err(mismatch()),
            },
            TypeHint::Date => value
                .as_str()
                .and_then(|s| NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).ok())
                .map(Self::Date)
                .ok_or_else(mismatch),
            TypeHint::Boolean => match value {
                Value::Bool(b) => Ok(Self::Boolean(*b)),
                Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(Self::Boolean(true)),
                Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(Self::Boolean(false)),
                _ => Err(mismatch()),
            },
            TypeHint::DateTimeOffset => value
                .as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| Self::DateTime(dt.with_timezone(&Utc)))
                .ok_or_else(mismatch),
            TypeHint::Entity(_) => match value {
                Value::Object(_) => Ok(Self::Json(value.clone())),
                _ => Err(mismatch()),
            },
            TypeHint::Other(_) => Ok(Self::infer(value)),
        }
    }
}

impl From<&str> for ParameterValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<i64> for ParameterValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for ParameterValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<Uuid> for ParameterValue {
    fn from(value: Uuid) -> Self {
        Self::Guid(value)
    }
}

impl From<NaiveDate> for ParameterValue {
    fn from(value: NaiveDate) -> Self {
        Self::Date(value)
    }
}

impl From<DateTime<Utc>> for ParameterValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::DateTime(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterMetadata {
    pub name: String,
    pub type_hint: TypeHint,
    #[serde(default)]
    pub optional: bool,
}

/// Name, binding and parameters shared by actions and functions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationSignature {
    pub name: String,
    /// Prefix for the invocation path (`Microsoft.Dynamics.CRM` for built-ins)
    #[serde(default)]
    pub namespace: Option<String>,
    /// Entity type the operation is bound to; `None` for unbound operations
    #[serde(default)]
    pub bound_parameter_type: Option<String>,
    #[serde(default)]
    pub parameters: Vec<ParameterMetadata>,
}

impl OperationSignature {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            bound_parameter_type: None,
            parameters: Vec::new(),
        }
    }

    /// `{namespace}.{name}` or just `{name}`
    pub fn qualified_name(&self) -> String {
        match &self.namespace {
            Some(ns) if !ns.is_empty() => format!("{}.{}", ns, self.name),
            _ => self.name.clone(),
        }
    }

    pub fn is_bound(&self) -> bool {
        self.bound_parameter_type.is_some()
    }
}

macro_rules! signature_wrapper {
    ($name:ident, $what:literal) => {
        #[doc = concat!("Metadata for a server-defined ", $what)]
        #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub OperationSignature);

        impl $name {
            pub fn unbound(name: impl Into<String>) -> Self {
                Self(OperationSignature::new(name))
            }

            /// Bound to `binding_type`, invoked with the `Microsoft.Dynamics.CRM` prefix
            pub fn bound(name: impl Into<String>, binding_type: impl Into<String>) -> Self {
                let mut signature = OperationSignature::new(name);
                signature.namespace = Some(CRM_NAMESPACE.to_string());
                signature.bound_parameter_type = Some(binding_type.into());
                Self(signature)
            }

            pub fn namespace(mut self, namespace: Option<&str>) -> Self {
                self.0.namespace = namespace.map(str::to_string);
                self
            }

            pub fn parameter(mut self, name: impl Into<String>, type_hint: impl Into<TypeHint>) -> Self {
                self.0.parameters.push(ParameterMetadata {
                    name: name.into(),
                    type_hint: type_hint.into(),
                    optional: false,
                });
                self
            }

            pub fn optional_parameter(mut self, name: impl Into<String>, type_hint: impl Into<TypeHint>) -> Self {
                self.0.parameters.push(ParameterMetadata {
                    name: name.into(),
                    type_hint: type_hint.into(),
                    optional: true,
                });
                self
            }
        }

        impl Deref for $name {
            type Target = OperationSignature;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }
    };
}

signature_wrapper!(ActionMetadata, "action");
signature_wrapper!(FunctionMetadata, "function");

/// Render `Name(A=@A,B=@B)?@A=..&@B=..`, or `Name()` when there are no parameters
pub fn function_call_path(qualified_name: &str, parameters: &[(String, ParameterValue)]) -> String {
    if parameters.is_empty() {
        return format!("{}()", qualified_name);
    }

    let placeholders = parameters
        .iter()
        .map(|(name, _)| format!("{}=@{}", name, name))
        .collect::<Vec<_>>()
        .join(",");
    let aliases = parameters
        .iter()
        .map(|(name, value)| format!("@{}={}", name, encode_query_value(&value.to_literal())))
        .collect::<Vec<_>>()
        .join("&");

    format!("{}({})?{}", qualified_name, placeholders, aliases)
}

/// JSON body of named action parameters
pub fn action_body(parameters: &[(String, ParameterValue)]) -> Map<String, Value> {
    parameters
        .iter()
        .map(|(name, value)| (name.clone(), value.to_json()))
        .collect()
}

/// Arguments supplied by the caller
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Arguments {
    #[default]
    None,
    /// Matched to declared parameters by position
    Positional(Vec<Value>),
    /// Matched to declared parameters by name
    Named(Map<String, Value>),
}

impl From<Value> for Arguments {
    /// Objects become named arguments, arrays positional ones, `null` none
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::None,
            Value::Object(map) => Self::Named(map),
            Value::Array(items) => Self::Positional(items),
            single => Self::Positional(vec![single]),
        }
    }
}

/// Validates arguments against metadata and builds the matching [`Operation`]
#[derive(Debug, Clone, Copy, Default)]
pub struct ActionInvoker;

impl ActionInvoker {
    pub fn new() -> Self {
        Self
    }

    /// Match arguments to the signature, in declared order.
    ///
    /// Unknown or missing (non-optional) names raise `ParameterMismatch`.
    pub fn resolve(
        &self,
        signature: &OperationSignature,
        arguments: Arguments,
    ) -> Result<Vec<(String, ParameterValue)>> {
        let declared = &signature.parameters;
        let mut supplied: Vec<(&ParameterMetadata, Value)> = Vec::new();
        let mut missing = Vec::new();
        let mut extra = Vec::new();

        match arguments {
            Arguments::None => {
                missing.extend(declared.iter().filter(|p| !p.optional).map(|p| p.name.clone()));
            }
            Arguments::Positional(values) => {
                for (index, value) in values.into_iter().enumerate() {
                    match declared.get(index) {
                        Some(parameter) => supplied.push((parameter, value)),
                        None => extra.push(format!("#{}", index)),
                    }
                }
                let given = supplied.len();
                missing.extend(
                    declared
                        .iter()
                        .skip(given)
                        .filter(|p| !p.optional)
                        .map(|p| p.name.clone()),
                );
            }
            Arguments::Named(mut values) => {
                for parameter in declared {
                    match values.remove(&parameter.name) {
                        Some(value) => supplied.push((parameter, value)),
                        None if parameter.optional => {}
                        None => missing.push(parameter.name.clone()),
                    }
                }
                extra.extend(values.keys().cloned());
            }
        }

        if !missing.is_empty() || !extra.is_empty() {
            return Err(WebApiError::ParameterMismatch { missing, extra });
        }

        supplied
            .into_iter()
            .map(|(parameter, value)| {
                ParameterValue::coerce(&parameter.name, &value, &parameter.type_hint)
                    .map(|typed| (parameter.name.clone(), typed))
            })
            .collect()
    }

    pub fn bound_action(
        &self,
        entity_set: &str,
        id: impl Into<RecordRef>,
        action: &ActionMetadata,
        arguments: Arguments,
    ) -> Result<Operation> {
        require_entity_set(entity_set, &action.name)?;
        require_bound(action)?;
        let parameters = self.resolve(action, arguments)?;
        Ok(Operation::BoundAction {
            entity_set: entity_set.to_string(),
            id: id.into(),
            action: action.clone(),
            parameters,
        })
    }

    pub fn bound_function(
        &self,
        entity_set: &str,
        id: EntityId,
        function: &FunctionMetadata,
        arguments: Arguments,
    ) -> Result<Operation> {
        require_entity_set(entity_set, &function.name)?;
        require_bound(function)?;
        let parameters = self.resolve(function, arguments)?;
        Ok(Operation::BoundFunction {
            entity_set: entity_set.to_string(),
            id,
            function: function.clone(),
            parameters,
        })
    }

    pub fn unbound_action(&self, action: &ActionMetadata, arguments: Arguments) -> Result<Operation> {
        require_unbound(action)?;
        let parameters = self.resolve(action, arguments)?;
        Ok(Operation::UnboundAction {
            action: action.clone(),
            parameters,
        })
    }

    pub fn unbound_function(&self, function: &FunctionMetadata, arguments: Arguments) -> Result<Operation> {
        require_unbound(function)?;
        let parameters = self.resolve(function, arguments)?;
        Ok(Operation::UnboundFunction {
            function: function.clone(),
            parameters,
        })
    }
}

fn require_entity_set(entity_set: &str, operation: &str) -> Result<()> {
    if entity_set.trim().is_empty() {
        return Err(WebApiError::configuration(format!(
            "bound operation '{}' needs an entity set",
            operation
        )));
    }
    Ok(())
}

fn require_unbound(signature: &OperationSignature) -> Result<()> {
    match &signature.bound_parameter_type {
        Some(binding) => Err(WebApiError::configuration(format!(
            "'{}' is bound to {}; invoke it against a record",
            signature.name, binding
        ))),
        None => Ok(()),
    }
}

fn require_bound(signature: &OperationSignature) -> Result<()> {
    if signature.is_bound() {
        return Ok(());
    }
    Err(WebApiError::configuration(format!(
        "'{}' is not bound; invoke it without a record",
        signature.name
    )))
}
