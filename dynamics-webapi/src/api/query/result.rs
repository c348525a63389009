//! Decoded records and result pages

use crate::api::constants::{COUNT, ETAG, FORMATTED_VALUE_SUFFIX, MORE_RECORDS, NEXT_LINK, PAGING_COOKIE};
use crate::api::error::{Result, WebApiError};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A single entity record as returned by the Web API.
///
/// Raw attribute values stay in `attributes`. Formatted display values arrive as
/// sibling `prop@OData.Community.Display.V1.FormattedValue` properties and are
/// exposed through `formatted_value` next to the raw value, never in place of it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    pub attributes: Map<String, Value>,
    pub formatted_values: BTreeMap<String, String>,
    /// Any other `@` annotation, keyed by its full property name
    pub annotations: BTreeMap<String, Value>,
}

impl Record {
    pub fn from_json(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self::from_map(map)),
            other => Err(WebApiError::decode(format!(
                "expected a record object, got {}",
                json_kind(&other)
            ))),
        }
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        let mut record = Record::default();
        for (key, value) in map {
            if let Some(attribute) = key.strip_suffix(FORMATTED_VALUE_SUFFIX) {
                match value {
                    Value::String(text) => {
                        record.formatted_values.insert(attribute.to_string(), text);
                    }
                    other => {
                        record.formatted_values.insert(attribute.to_string(), other.to_string());
                    }
                }
            } else if key.contains('@') {
                record.annotations.insert(key, value);
            } else {
                record.attributes.insert(key, value);
            }
        }
        record
    }

    pub fn get(&self, attribute: &str) -> Option<&Value> {
        self.attributes.get(attribute)
    }

    pub fn get_str(&self, attribute: &str) -> Option<&str> {
        self.attributes.get(attribute).and_then(Value::as_str)
    }

    pub fn formatted_value(&self, attribute: &str) -> Option<&str> {
        self.formatted_values.get(attribute).map(String::as_str)
    }

    pub fn annotation(&self, key: &str) -> Option<&Value> {
        self.annotations.get(key)
    }

    pub fn etag(&self) -> Option<&str> {
        self.annotations.get(ETAG).and_then(Value::as_str)
    }
}

/// One page of a retrieve-multiple or FetchXML response
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryResult {
    pub records: Vec<Record>,
    pub next_link: Option<String>,
    /// Raw `@Microsoft.Dynamics.CRM.fetchxmlpagingcookie` annotation
    pub paging_cookie: Option<String>,
    /// `@Microsoft.Dynamics.CRM.morerecords`; `false` when the server omits it
    pub more_records: bool,
    pub total_count: Option<u64>,
}

impl QueryResult {
    /// Decode a collection envelope `{ "value": [...], "@odata.nextLink": ... }`
    pub fn from_json(value: Value) -> Result<Self> {
        let mut map = match value {
            Value::Object(map) => map,
            other => {
                return Err(WebApiError::decode(format!(
                    "expected a collection object, got {}",
                    json_kind(&other)
                )));
            }
        };

        let records = match map.remove("value") {
            Some(Value::Array(items)) => items
                .into_iter()
                .map(Record::from_json)
                .collect::<Result<Vec<_>>>()?,
            Some(other) => {
                return Err(WebApiError::decode(format!(
                    "collection 'value' must be an array, got {}",
                    json_kind(&other)
                )));
            }
            None => return Err(WebApiError::decode("collection response has no 'value' array")),
        };

        let next_link = map.get(NEXT_LINK).and_then(Value::as_str).map(str::to_string);
        let paging_cookie = map.get(PAGING_COOKIE).and_then(Value::as_str).map(str::to_string);
        let more_records = match map.get(MORE_RECORDS) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => false,
        };
        let total_count = map.get(COUNT).and_then(Value::as_u64);

        Ok(Self {
            records,
            next_link,
            paging_cookie,
            more_records,
            total_count,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Whether the server signalled another page, by link or by flag
    pub fn has_more(&self) -> bool {
        self.next_link.is_some() || self.more_records
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
