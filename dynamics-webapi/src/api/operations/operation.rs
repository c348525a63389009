//! Core Operation types for Dynamics 365 Web API calls
//!
//! Every logical call (retrieve, save, delete, action, function, metadata lookup)
//! is one variant of [`Operation`]. The same value can be encoded on its own by the
//! `RequestEncoder` or grouped with others by the `BatchEncoder`.

use crate::api::actions::{ActionMetadata, FunctionMetadata, ParameterValue};
use crate::api::error::{Result, WebApiError};
use crate::api::query::Query;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Record identifier: a GUID or an alternate key expression
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityId {
    Guid(Uuid),
    /// e.g. `accountnumber='A-100'`, rendered verbatim inside the parentheses
    AlternateKey(String),
}

impl EntityId {
    /// Parse a GUID in any of its usual shapes (with or without braces and dashes,
    /// any case) or an alternate key containing `=`.
    pub fn parse(text: &str) -> Result<Self> {
        let trimmed = text.trim();
        let unbraced = trimmed.trim_start_matches('{').trim_end_matches('}');
        let compact: String = unbraced.chars().filter(|c| *c != '-').collect();
        if compact.len() == 32 {
            if let Ok(guid) = Uuid::parse_str(&compact) {
                return Ok(Self::Guid(guid));
            }
        }
        if trimmed.contains('=') {
            return Ok(Self::AlternateKey(trimmed.to_string()));
        }
        Err(WebApiError::configuration(format!(
            "'{}' is neither a GUID nor an alternate key",
            text
        )))
    }

    /// Build an alternate key `field='value'` (quotes in the value are doubled)
    pub fn alternate_key(field: &str, value: &str) -> Self {
        Self::AlternateKey(format!("{}='{}'", field, value.replace('\'', "''")))
    }

    pub fn as_guid(&self) -> Option<Uuid> {
        match self {
            Self::Guid(g) => Some(*g),
            Self::AlternateKey(_) => None,
        }
    }
}

impl From<Uuid> for EntityId {
    fn from(guid: Uuid) -> Self {
        Self::Guid(guid)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Guid(g) => write!(f, "{}", g.hyphenated()),
            Self::AlternateKey(key) => write!(f, "{}", key),
        }
    }
}

/// Reference to a record created earlier in the same batch changeset.
/// Rendered as `$<content_id>`; the server resolves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PendingReference {
    pub content_id: u32,
}

impl PendingReference {
    pub fn new(content_id: u32) -> Self {
        Self { content_id }
    }
}

impl fmt::Display for PendingReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.content_id)
    }
}

/// The record an operation targets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordRef {
    Existing(EntityId),
    Pending(PendingReference),
}

impl RecordRef {
    /// Path segment addressing the record: `{set}({id})` or `$n`
    pub fn path(&self, entity_set: &str) -> String {
        match self {
            Self::Existing(id) => format!("{}({})", entity_set, id),
            Self::Pending(reference) => reference.to_string(),
        }
    }

    pub fn pending(&self) -> Option<PendingReference> {
        match self {
            Self::Pending(reference) => Some(*reference),
            Self::Existing(_) => None,
        }
    }
}

impl From<EntityId> for RecordRef {
    fn from(id: EntityId) -> Self {
        Self::Existing(id)
    }
}

impl From<Uuid> for RecordRef {
    fn from(id: Uuid) -> Self {
        Self::Existing(EntityId::Guid(id))
    }
}

impl From<PendingReference> for RecordRef {
    fn from(reference: PendingReference) -> Self {
        Self::Pending(reference)
    }
}

/// A lookup value set through `{navigation_property}@odata.bind`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    /// Single-valued navigation property (schema-cased, e.g. `parentcustomerid_account`)
    pub navigation_property: String,
    /// Entity set of the target; ignored for pending references
    pub entity_set: String,
    pub target: RecordRef,
}

impl Binding {
    pub fn new(
        navigation_property: impl Into<String>,
        entity_set: impl Into<String>,
        target: impl Into<RecordRef>,
    ) -> Self {
        Self {
            navigation_property: navigation_property.into(),
            entity_set: entity_set.into(),
            target: target.into(),
        }
    }

    pub fn key(&self) -> String {
        format!("{}@odata.bind", self.navigation_property)
    }

    /// `/accounts(guid)` or `$1`
    pub fn value(&self) -> String {
        match &self.target {
            RecordRef::Existing(_) => format!("/{}", self.target.path(&self.entity_set)),
            RecordRef::Pending(reference) => reference.to_string(),
        }
    }
}

/// HTTP methods used by the Web API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    Get,
    Post,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    /// Writes go into changesets, reads never do
    pub fn is_write(&self) -> bool {
        !matches!(self, Self::Get)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Represents a single logical call against the Web API
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// `GET {set}({id})` with `$select`/`$expand` taken from the query
    Retrieve { query: Query, id: EntityId },
    /// `GET {set}?{query}`; page size goes into `Prefer: odata.maxpagesize`
    RetrieveMultiple {
        query: Query,
        max_page_size: Option<usize>,
    },
    /// Follow an absolute `@odata.nextLink`, repeating the original page size
    RetrieveNextPage {
        next_link: String,
        max_page_size: Option<usize>,
    },
    /// `GET {set}?fetchXml=...`
    FetchXml { entity_set: String, fetch_xml: String },
    /// `POST {set}`
    Create {
        entity_set: String,
        data: Map<String, Value>,
        bindings: Vec<Binding>,
    },
    /// `PATCH {set}({id})` with only the supplied fields; never creates
    Update {
        entity_set: String,
        id: RecordRef,
        data: Map<String, Value>,
        bindings: Vec<Binding>,
    },
    /// `PATCH {set}({id})` that creates the record when it does not exist
    Upsert {
        entity_set: String,
        id: EntityId,
        data: Map<String, Value>,
        bindings: Vec<Binding>,
    },
    /// `DELETE {set}({id})`
    Delete { entity_set: String, id: RecordRef },
    /// `POST {set}({id})/{nav}/$ref`
    Associate {
        entity_set: String,
        id: RecordRef,
        navigation_property: String,
        target: Binding,
    },
    /// `DELETE {set}({id})/{nav}({target})/$ref`
    Disassociate {
        entity_set: String,
        id: RecordRef,
        navigation_property: String,
        target_id: EntityId,
    },
    BoundAction {
        entity_set: String,
        id: RecordRef,
        action: ActionMetadata,
        parameters: Vec<(String, ParameterValue)>,
    },
    BoundFunction {
        entity_set: String,
        id: EntityId,
        function: FunctionMetadata,
        parameters: Vec<(String, ParameterValue)>,
    },
    UnboundAction {
        action: ActionMetadata,
        parameters: Vec<(String, ParameterValue)>,
    },
    UnboundFunction {
        function: FunctionMetadata,
        parameters: Vec<(String, ParameterValue)>,
    },
    /// Picklist metadata for one attribute
    OptionSet { entity: String, attribute: String },
}

impl Operation {
    pub fn retrieve(query: Query, id: impl Into<EntityId>) -> Self {
        Self::Retrieve {
            query,
            id: id.into(),
        }
    }

    pub fn retrieve_multiple(query: Query, max_page_size: Option<usize>) -> Self {
        Self::RetrieveMultiple {
            query,
            max_page_size,
        }
    }

    /// Create when `id` is `None`, partial update otherwise
    pub fn save(entity_set: impl Into<String>, data: Map<String, Value>, id: Option<RecordRef>) -> Self {
        match id {
            None => Self::Create {
                entity_set: entity_set.into(),
                data,
                bindings: Vec::new(),
            },
            Some(id) => Self::Update {
                entity_set: entity_set.into(),
                id,
                data,
                bindings: Vec::new(),
            },
        }
    }

    pub fn create(entity_set: impl Into<String>, data: Map<String, Value>) -> Self {
        Self::save(entity_set, data, None)
    }

    pub fn update(entity_set: impl Into<String>, id: impl Into<RecordRef>, data: Map<String, Value>) -> Self {
        Self::save(entity_set, data, Some(id.into()))
    }

    pub fn upsert(entity_set: impl Into<String>, id: EntityId, data: Map<String, Value>) -> Self {
        Self::Upsert {
            entity_set: entity_set.into(),
            id,
            data,
            bindings: Vec::new(),
        }
    }

    pub fn delete(entity_set: impl Into<String>, id: impl Into<RecordRef>) -> Self {
        Self::Delete {
            entity_set: entity_set.into(),
            id: id.into(),
        }
    }

    pub fn associate(
        entity_set: impl Into<String>,
        id: impl Into<RecordRef>,
        navigation_property: impl Into<String>,
        target_set: impl Into<String>,
        target_id: impl Into<RecordRef>,
    ) -> Self {
        let navigation_property = navigation_property.into();
        Self::Associate {
            entity_set: entity_set.into(),
            id: id.into(),
            target: Binding::new(navigation_property.clone(), target_set, target_id),
            navigation_property,
        }
    }

    pub fn disassociate(
        entity_set: impl Into<String>,
        id: impl Into<RecordRef>,
        navigation_property: impl Into<String>,
        target_id: EntityId,
    ) -> Self {
        Self::Disassociate {
            entity_set: entity_set.into(),
            id: id.into(),
            navigation_property: navigation_property.into(),
            target_id,
        }
    }

    pub fn fetch_xml(entity_set: impl Into<String>, fetch_xml: impl Into<String>) -> Self {
        Self::FetchXml {
            entity_set: entity_set.into(),
            fetch_xml: fetch_xml.into(),
        }
    }

    pub fn optionset(entity: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self::OptionSet {
            entity: entity.into(),
            attribute: attribute.into(),
        }
    }

    /// Attach a lookup binding to a create, update or upsert; ignored for other kinds
    pub fn with_binding(mut self, binding: Binding) -> Self {
        let kind = self.operation_type();
        match &mut self {
            Self::Create { bindings, .. }
            | Self::Update { bindings, .. }
            | Self::Upsert { bindings, .. } => bindings.push(binding),
            _ => log::warn!(
                "Ignoring binding '{}' on {} operation",
                binding.navigation_property,
                kind
            ),
        }
        self
    }

    pub fn method(&self) -> Method {
        match self {
            Self::Retrieve { .. }
            | Self::RetrieveMultiple { .. }
            | Self::RetrieveNextPage { .. }
            | Self::FetchXml { .. }
            | Self::BoundFunction { .. }
            | Self::UnboundFunction { .. }
            | Self::OptionSet { .. } => Method::Get,
            Self::Create { .. }
            | Self::Associate { .. }
            | Self::BoundAction { .. }
            | Self::UnboundAction { .. } => Method::Post,
            Self::Update { .. } | Self::Upsert { .. } => Method::Patch,
            Self::Delete { .. } | Self::Disassociate { .. } => Method::Delete,
        }
    }

    pub fn is_write(&self) -> bool {
        self.method().is_write()
    }

    /// Get the operation type as a string
    pub fn operation_type(&self) -> &'static str {
        match self {
            Self::Retrieve { .. } => "retrieve",
            Self::RetrieveMultiple { .. } => "retrieve_multiple",
            Self::RetrieveNextPage { .. } => "retrieve_next_page",
            Self::FetchXml { .. } => "fetch_xml",
            Self::Create { .. } => "create",
            Self::Update { .. } => "update",
            Self::Upsert { .. } => "upsert",
            Self::Delete { .. } => "delete",
            Self::Associate { .. } => "associate",
            Self::Disassociate { .. } => "disassociate",
            Self::BoundAction { .. } => "bound_action",
            Self::BoundFunction { .. } => "bound_function",
            Self::UnboundAction { .. } => "unbound_action",
            Self::UnboundFunction { .. } => "unbound_function",
            Self::OptionSet { .. } => "optionset",
        }
    }

    /// Every pending reference this operation uses, in the URL or in bindings
    pub fn pending_references(&self) -> Vec<PendingReference> {
        fn bound(bindings: &[Binding]) -> impl Iterator<Item = PendingReference> + '_ {
            bindings.iter().filter_map(|b| b.target.pending())
        }

        let mut references = Vec::new();
        match self {
            Self::Create { bindings, .. } | Self::Upsert { bindings, .. } => {
                references.extend(bound(bindings));
            }
            Self::Update { id, bindings, .. } => {
                references.extend(id.pending());
                references.extend(bound(bindings));
            }
            Self::Delete { id, .. } | Self::Disassociate { id, .. } | Self::BoundAction { id, .. } => {
                references.extend(id.pending());
            }
            Self::Associate { id, target, .. } => {
                references.extend(id.pending());
                references.extend(target.target.pending());
            }
            _ => {}
        }
        references
    }
}
