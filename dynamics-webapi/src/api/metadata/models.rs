//! Dynamics 365 metadata models

use crate::api::error::{Result, WebApiError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One allowed value of a picklist attribute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionSetEntry {
    /// The display label (e.g., "Active"); absent when no label is defined
    pub label: Option<String>,
    /// The numeric value (e.g., 1, 2, 3)
    pub value: i64,
}

/// `PicklistAttributeMetadata` with `OptionSet` and `GlobalOptionSet` expanded
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PicklistAttributeMetadata {
    #[serde(default)]
    pub logical_name: Option<String>,
    #[serde(default)]
    pub option_set: Option<OptionSetMetadata>,
    #[serde(default)]
    pub global_option_set: Option<OptionSetMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OptionSetMetadata {
    #[serde(default)]
    pub options: Vec<OptionMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OptionMetadata {
    pub value: i64,
    #[serde(default)]
    pub label: Option<Label>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Label {
    #[serde(default)]
    pub user_localized_label: Option<LocalizedLabel>,
    #[serde(default)]
    pub localized_labels: Vec<LocalizedLabel>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LocalizedLabel {
    pub label: String,
    #[serde(default)]
    pub language_code: Option<i32>,
}

impl Label {
    /// The user's label, else the first localized one
    pub fn text(&self) -> Option<&str> {
        self.user_localized_label
            .as_ref()
            .or_else(|| self.localized_labels.first())
            .map(|l| l.label.as_str())
    }
}

impl PicklistAttributeMetadata {
    /// Options of the local option set, or the global one when no local set came back
    pub fn entries(&self) -> Result<Vec<OptionSetEntry>> {
        let source = self
            .option_set
            .as_ref()
            .or(self.global_option_set.as_ref())
            .ok_or_else(|| {
                WebApiError::decode(format!(
                    "attribute '{}' has neither OptionSet nor GlobalOptionSet",
                    self.logical_name.as_deref().unwrap_or("?")
                ))
            })?;

        Ok(source
            .options
            .iter()
            .map(|option| OptionSetEntry {
                label: option.label.as_ref().and_then(Label::text).map(str::to_string),
                value: option.value,
            })
            .collect())
    }
}

/// Decode the picklist metadata response body into option set entries
pub fn parse_optionset(body: Value) -> Result<Vec<OptionSetEntry>> {
    let metadata: PicklistAttributeMetadata = serde_json::from_value(body)?;
    metadata.entries()
}
