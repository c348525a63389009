//! Request encoding: logical [`Operation`] to wire-level [`RequestDescriptor`]
//!
//! Encoding is a pure function of the operation and the encoder's fixed settings
//! (service root, header overrides), so one encoder can be shared freely.

use super::operation::{Binding, Method, Operation, RecordRef};
use crate::api::actions::{action_body, function_call_path};
use crate::api::constants::*;
use crate::api::error::{Result, WebApiError};
use crate::api::query::encoding::encode_strict;
use serde_json::{Map, Value};

/// Ordered header list with case-insensitive, unique keys
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RequestHeaders(Vec<(String, String)>);

impl RequestHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a header; an existing header with the same name keeps its position
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(&name)) {
            Some(entry) => entry.1 = value,
            None => self.0.push((name, value)),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        let index = self.0.iter().position(|(n, _)| n.eq_ignore_ascii_case(name))?;
        Some(self.0.remove(index).1)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Apply every header from `other`, replacing same-named ones
    pub fn extend_from(&mut self, other: &RequestHeaders) {
        for (name, value) in other.iter() {
            self.insert(name, value);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A single wire-level request, relative to the service root
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    pub method: Method,
    /// Relative to the service root, or `$n...` for a pending reference
    pub relative_url: String,
    pub headers: RequestHeaders,
    pub body: Option<Value>,
    /// Only set inside a batch changeset
    pub content_id: Option<u32>,
}

impl RequestDescriptor {
    fn new(method: Method, relative_url: String, headers: RequestHeaders) -> Self {
        Self {
            method,
            relative_url,
            headers,
            body: None,
            content_id: None,
        }
    }

    fn with_body(mut self, body: Value) -> Self {
        self.headers.insert(CONTENT_TYPE, JSON_CONTENT_TYPE);
        self.body = Some(body);
        self
    }

    /// Absolute URL; `$n` references stay as they are
    pub fn absolute_url(&self, service_root: &str) -> String {
        if self.relative_url.starts_with('$') {
            self.relative_url.clone()
        } else {
            format!("{}{}", service_root, self.relative_url)
        }
    }

    pub fn body_text(&self) -> Option<String> {
        self.body.as_ref().map(Value::to_string)
    }
}

/// `Prefer` header contents
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Preferences {
    annotations: Option<&'static str>,
    max_page_size: Option<usize>,
}

impl Preferences {
    fn render(&self) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(annotations) = self.annotations {
            parts.push(annotations.to_string());
        }
        if let Some(size) = self.max_page_size {
            parts.push(format!("odata.maxpagesize={}", size));
        }
        (!parts.is_empty()).then(|| parts.join(","))
    }
}

/// Annotation preference for FetchXML: formatted values plus paging metadata
const FETCH_XML_ANNOTATIONS: &str = "odata.include-annotations=\"OData.Community.Display.V1.FormattedValue,Microsoft.Dynamics.CRM.fetchxmlpagingcookie,Microsoft.Dynamics.CRM.morerecords\"";

/// Turns [`Operation`]s into [`RequestDescriptor`]s
#[derive(Debug, Clone)]
pub struct RequestEncoder {
    service_root: String,
    include_formatted_values: bool,
    overrides: RequestHeaders,
}

impl RequestEncoder {
    /// `service_root` is the absolute Web API root ending in `/`
    /// (e.g. `https://org.crm.dynamics.com/api/data/v9.1/`)
    pub fn new(service_root: impl Into<String>) -> Self {
        let mut service_root = service_root.into();
        if !service_root.ends_with('/') {
            service_root.push('/');
        }
        Self {
            service_root,
            include_formatted_values: true,
            overrides: RequestHeaders::new(),
        }
    }

    /// Override (or add) a header on every encoded request
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.insert(name, value);
        self
    }

    pub fn include_formatted_values(mut self, include: bool) -> Self {
        self.include_formatted_values = include;
        self
    }

    pub fn service_root(&self) -> &str {
        &self.service_root
    }

    /// Fixed protocol headers plus caller overrides, used for the batch envelope too
    pub fn protocol_headers(&self) -> RequestHeaders {
        let mut headers = base_headers();
        headers.extend_from(&self.overrides);
        headers
    }

    pub fn encode(&self, operation: &Operation) -> Result<RequestDescriptor> {
        let mut preferences = Preferences {
            annotations: self.include_formatted_values.then_some(INCLUDE_FORMATTED_VALUES),
            max_page_size: None,
        };
        let mut headers = base_headers();

        let descriptor = match operation {
            Operation::Retrieve { query, id } => {
                let path = format!("{}({})", query.require_path()?, id);
                let query_string = query.to_single_record_query_string();
                let url = if query_string.is_empty() {
                    path
                } else {
                    format!("{}?{}", path, query_string)
                };
                RequestDescriptor::new(Method::Get, url, headers)
            }
            Operation::RetrieveMultiple { query, max_page_size } => {
                if max_page_size.is_some() && query.top_value().is_some() {
                    return Err(WebApiError::configuration(
                        "$top disables server-driven paging; use either top or a page size",
                    ));
                }
                preferences.max_page_size = validate_page_size(*max_page_size)?;
                RequestDescriptor::new(Method::Get, query.to_relative_url()?, headers)
            }
            Operation::RetrieveNextPage { next_link, max_page_size } => {
                preferences.max_page_size = validate_page_size(*max_page_size)?;
                let relative = next_link.strip_prefix(&self.service_root).ok_or_else(|| {
                    WebApiError::decode(format!(
                        "next link '{}' is outside the service root '{}'",
                        next_link, self.service_root
                    ))
                })?;
                RequestDescriptor::new(Method::Get, relative.to_string(), headers)
            }
            Operation::FetchXml { entity_set, fetch_xml } => {
                require_set(entity_set)?;
                if fetch_xml.trim().is_empty() {
                    return Err(WebApiError::configuration("FetchXML must not be empty"));
                }
                if self.include_formatted_values {
                    preferences.annotations = Some(FETCH_XML_ANNOTATIONS);
                }
                let url = format!("{}?fetchXml={}", entity_set, encode_strict(fetch_xml));
                RequestDescriptor::new(Method::Get, url, headers)
            }
            Operation::Create { entity_set, data, bindings } => {
                require_set(entity_set)?;
                RequestDescriptor::new(Method::Post, entity_set.clone(), headers)
                    .with_body(Value::Object(record_body(data, bindings)))
            }
            Operation::Update { entity_set, id, data, bindings } => {
                require_set(entity_set)?;
                headers.insert(IF_MATCH, "*");
                RequestDescriptor::new(Method::Patch, id.path(entity_set), headers)
                    .with_body(Value::Object(record_body(data, bindings)))
            }
            Operation::Upsert { entity_set, id, data, bindings } => {
                require_set(entity_set)?;
                let url = format!("{}({})", entity_set, id);
                RequestDescriptor::new(Method::Patch, url, headers)
                    .with_body(Value::Object(record_body(data, bindings)))
            }
            Operation::Delete { entity_set, id } => {
                require_set(entity_set)?;
                RequestDescriptor::new(Method::Delete, id.path(entity_set), headers)
            }
            Operation::Associate { entity_set, id, navigation_property, target } => {
                require_set(entity_set)?;
                let url = format!("{}/{}/$ref", id.path(entity_set), navigation_property);
                let target_id = match &target.target {
                    RecordRef::Existing(_) => {
                        format!("{}{}", self.service_root, target.target.path(&target.entity_set))
                    }
                    RecordRef::Pending(reference) => reference.to_string(),
                };
                let mut body = Map::new();
                body.insert(ODATA_ID.to_string(), Value::String(target_id));
                RequestDescriptor::new(Method::Post, url, headers).with_body(Value::Object(body))
            }
            Operation::Disassociate { entity_set, id, navigation_property, target_id } => {
                require_set(entity_set)?;
                let url = format!(
                    "{}/{}({})/$ref",
                    id.path(entity_set),
                    navigation_property,
                    target_id
                );
                RequestDescriptor::new(Method::Delete, url, headers)
            }
            Operation::BoundAction { entity_set, id, action, parameters } => {
                require_set(entity_set)?;
                let url = format!("{}/{}", id.path(entity_set), action.qualified_name());
                RequestDescriptor::new(Method::Post, url, headers)
                    .with_body(Value::Object(action_body(parameters)))
            }
            Operation::BoundFunction { entity_set, id, function, parameters } => {
                require_set(entity_set)?;
                let url = format!(
                    "{}({})/{}",
                    entity_set,
                    id,
                    function_call_path(&function.qualified_name(), parameters)
                );
                RequestDescriptor::new(Method::Get, url, headers)
            }
            Operation::UnboundAction { action, parameters } => {
                RequestDescriptor::new(Method::Post, action.qualified_name(), headers)
                    .with_body(Value::Object(action_body(parameters)))
            }
            Operation::UnboundFunction { function, parameters } => RequestDescriptor::new(
                Method::Get,
                function_call_path(&function.qualified_name(), parameters),
                headers,
            ),
            Operation::OptionSet { entity, attribute } => {
                if entity.trim().is_empty() || attribute.trim().is_empty() {
                    return Err(WebApiError::configuration(
                        "optionset lookup needs an entity and an attribute name",
                    ));
                }
                RequestDescriptor::new(Method::Get, optionset_url(entity, attribute), headers)
            }
        };

        let mut descriptor = descriptor;
        for (name, value) in self.overrides.iter() {
            if !name.eq_ignore_ascii_case(PREFER) {
                descriptor.headers.insert(name, value);
            }
        }
        let prefer = match (preferences.render(), self.overrides.get(PREFER)) {
            (Some(own), Some(caller)) => Some(merge_preferences(&own, caller)),
            (own, caller) => own.or_else(|| caller.map(str::to_string)),
        };
        if let Some(prefer) = prefer {
            descriptor.headers.insert(PREFER, prefer);
        }

        log::debug!(
            "Encoded {} operation: {} {}",
            operation.operation_type(),
            descriptor.method,
            descriptor.relative_url
        );
        Ok(descriptor)
    }
}

/// Picklist metadata lookup; local option set and global option set are both expanded
pub fn optionset_url(entity: &str, attribute: &str) -> String {
    format!(
        "EntityDefinitions(LogicalName='{}')/Attributes(LogicalName='{}')/{}.PicklistAttributeMetadata?$select=LogicalName&$expand=OptionSet($select=Options),GlobalOptionSet($select=Options)",
        entity.replace('\'', "''"),
        attribute.replace('\'', "''"),
        CRM_NAMESPACE
    )
}

/// Combine two `Prefer` values. A caller preference replaces the base one with
/// the same name and keeps its position; new names are appended.
pub(crate) fn merge_preferences(base: &str, caller: &str) -> String {
    let mut merged: Vec<&str> = split_preferences(base).collect();
    for preference in split_preferences(caller) {
        let name = preference_name(preference);
        match merged.iter_mut().find(|p| preference_name(p) == name) {
            Some(existing) => *existing = preference,
            None => merged.push(preference),
        }
    }
    merged.join(",")
}

/// Split on commas outside double quotes
fn split_preferences(value: &str) -> impl Iterator<Item = &str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in value.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&value[start..]);
    parts.into_iter().map(str::trim).filter(|p| !p.is_empty())
}

fn preference_name(preference: &str) -> String {
    preference
        .split(|c| c == '=' || c == ';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn base_headers() -> RequestHeaders {
    RequestHeaders::new()
        .with(ODATA_MAX_VERSION, ODATA_VERSION_VALUE)
        .with(ODATA_VERSION, ODATA_VERSION_VALUE)
        .with(ACCEPT, JSON_CONTENT_TYPE)
}

fn record_body(data: &Map<String, Value>, bindings: &[Binding]) -> Map<String, Value> {
    let mut body = data.clone();
    for binding in bindings {
        if body.insert(binding.key(), Value::String(binding.value())).is_some() {
            log::debug!("Binding '{}' replaces a value already in the payload", binding.key());
        }
    }
    body
}

fn require_set(entity_set: &str) -> Result<()> {
    if entity_set.trim().is_empty() {
        return Err(WebApiError::configuration("entity set name must not be empty"));
    }
    Ok(())
}

fn validate_page_size(size: Option<usize>) -> Result<Option<usize>> {
    match size {
        Some(0) => Err(WebApiError::configuration("page size must be at least 1")),
        Some(size) if size > MAX_PAGE_SIZE => {
            log::warn!("Page size {} exceeds the server maximum; using {}", size, MAX_PAGE_SIZE);
            Ok(Some(MAX_PAGE_SIZE))
        }
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::actions::{ActionInvoker, ActionMetadata, Arguments, FunctionMetadata};
    use crate::api::operations::{EntityId, PendingReference};
    use crate::api::query::Query;
    use serde_json::json;

    const ROOT: &str = "https://org.crm.dynamics.com/api/data/v9.1/";
    const GUID: &str = "123e4567-e89b-12d3-a456-426614174000";

    fn encoder() -> RequestEncoder {
        RequestEncoder::new(ROOT)
    }

    fn id() -> EntityId {
        EntityId::parse(GUID).unwrap()
    }

    fn data(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_protocol_headers_on_every_request() {
        let query = Query::new("account").path("accounts").unwrap();
        let descriptor = encoder().encode(&Operation::retrieve_multiple(query, None)).unwrap();

        assert_eq!(descriptor.headers.get("OData-MaxVersion"), Some("4.0"));
        assert_eq!(descriptor.headers.get("odata-version"), Some("4.0"));
        assert_eq!(descriptor.headers.get("Prefer"), Some(INCLUDE_FORMATTED_VALUES));
        assert_eq!(descriptor.relative_url, "accounts");
        assert_eq!(descriptor.content_id, None);
    }

    #[test]
    fn test_retrieve_by_id_uses_select_and_expand_only() {
        let query = Query::new("account")
            .path("accounts")
            .unwrap()
            .select(["name"])
            .filter("ignored eq 1");
        let descriptor = encoder().encode(&Operation::retrieve(query, id())).unwrap();
        assert_eq!(descriptor.method, Method::Get);
        assert_eq!(descriptor.relative_url, format!("accounts({})?$select=name", GUID));
    }

    #[test]
    fn test_max_page_size_goes_into_prefer() {
        let query = Query::new("account").path("accounts").unwrap().select(["name"]);
        let descriptor = encoder()
            .encode(&Operation::retrieve_multiple(query, Some(50)))
            .unwrap();
        assert_eq!(descriptor.relative_url, "accounts?$select=name");
        assert!(!descriptor.relative_url.contains("$top"));
        assert_eq!(
            descriptor.headers.get(PREFER),
            Some(format!("{},odata.maxpagesize=50", INCLUDE_FORMATTED_VALUES).as_str())
        );
    }

    #[test]
    fn test_top_and_page_size_conflict() {
        let query = Query::new("account").path("accounts").unwrap().top(5);
        let err = encoder()
            .encode(&Operation::retrieve_multiple(query, Some(10)))
            .unwrap_err();
        assert!(matches!(err, WebApiError::Configuration(_)));
    }

    #[test]
    fn test_create_posts_full_body() {
        let op = Operation::save("accounts", data(json!({"name": "Acme"})), None);
        let descriptor = encoder().encode(&op).unwrap();
        assert_eq!(descriptor.method, Method::Post);
        assert_eq!(descriptor.relative_url, "accounts");
        assert_eq!(descriptor.body, Some(json!({"name": "Acme"})));
        assert_eq!(descriptor.headers.get(CONTENT_TYPE), Some(JSON_CONTENT_TYPE));
    }

    #[test]
    fn test_update_patches_partial_body() {
        let op = Operation::save("accounts", data(json!({"telephone1": "555"})), Some(id().into()));
        let descriptor = encoder().encode(&op).unwrap();
        assert_eq!(descriptor.method, Method::Patch);
        assert_eq!(descriptor.relative_url, format!("accounts({})", GUID));
        assert_eq!(descriptor.body, Some(json!({"telephone1": "555"})));
        assert_eq!(descriptor.headers.get(IF_MATCH), Some("*"));
    }

    #[test]
    fn test_upsert_by_alternate_key_has_no_if_match() {
        let op = Operation::upsert(
            "accounts",
            EntityId::alternate_key("accountnumber", "A-1"),
            data(json!({"name": "Acme"})),
        );
        let descriptor = encoder().encode(&op).unwrap();
        assert_eq!(descriptor.relative_url, "accounts(accountnumber='A-1')");
        assert!(!descriptor.headers.contains(IF_MATCH));
    }

    #[test]
    fn test_bindings_in_body() {
        let op = Operation::create("contacts", data(json!({"lastname": "Smith"})))
            .with_binding(Binding::new("parentcustomerid_account", "accounts", id()));
        let descriptor = encoder().encode(&op).unwrap();
        assert_eq!(
            descriptor.body,
            Some(json!({
                "lastname": "Smith",
                "parentcustomerid_account@odata.bind": format!("/accounts({})", GUID)
            }))
        );
    }

    #[test]
    fn test_delete_and_pending_reference_urls() {
        let descriptor = encoder().encode(&Operation::delete("accounts", id())).unwrap();
        assert_eq!(descriptor.method, Method::Delete);
        assert_eq!(descriptor.relative_url, format!("accounts({})", GUID));
        assert!(descriptor.body.is_none());

        let pending = encoder()
            .encode(&Operation::update("accounts", PendingReference::new(1), Map::new()))
            .unwrap();
        assert_eq!(pending.relative_url, "$1");
        assert_eq!(pending.absolute_url(ROOT), "$1");
        assert_eq!(descriptor.absolute_url(ROOT), format!("{}accounts({})", ROOT, GUID));
    }

    #[test]
    fn test_associate_and_disassociate() {
        let op = Operation::associate("accounts", id(), "contact_customer_accounts", "contacts", id());
        let descriptor = encoder().encode(&op).unwrap();
        assert_eq!(
            descriptor.relative_url,
            format!("accounts({})/contact_customer_accounts/$ref", GUID)
        );
        assert_eq!(
            descriptor.body,
            Some(json!({"@odata.id": format!("{}contacts({})", ROOT, GUID)}))
        );

        let op = Operation::disassociate("accounts", id(), "contact_customer_accounts", id());
        let descriptor = encoder().encode(&op).unwrap();
        assert_eq!(descriptor.method, Method::Delete);
        assert_eq!(
            descriptor.relative_url,
            format!("accounts({0})/contact_customer_accounts({0})/$ref", GUID)
        );
    }

    #[test]
    fn test_bound_function_path() {
        let function = FunctionMetadata::bound("GetQuote", "account")
            .namespace(None)
            .parameter("Amount", "Edm.Decimal");
        let op = ActionInvoker::new()
            .bound_function("accounts", id(), &function, Arguments::from(json!({"Amount": 100})))
            .unwrap();
        let descriptor = encoder().encode(&op).unwrap();
        assert_eq!(descriptor.method, Method::Get);
        assert_eq!(
            descriptor.relative_url,
            format!("accounts({})/GetQuote(Amount=@Amount)?@Amount=100", GUID)
        );

        let prefixed = FunctionMetadata::bound("GetQuote", "account").parameter("Amount", "Edm.Decimal");
        let op = ActionInvoker::new()
            .bound_function("accounts", id(), &prefixed, Arguments::from(json!({"Amount": 100})))
            .unwrap();
        assert_eq!(
            encoder().encode(&op).unwrap().relative_url,
            format!(
                "accounts({})/Microsoft.Dynamics.CRM.GetQuote(Amount=@Amount)?@Amount=100",
                GUID
            )
        );
    }

    #[test]
    fn test_bound_action_uses_namespace() {
        let action = ActionMetadata::bound("QualifyLead", "lead")
            .parameter("CreateAccount", "Edm.Boolean")
            .parameter("Status", "Edm.Int32");
        let op = ActionInvoker::new()
            .bound_action(
                "leads",
                id(),
                &action,
                Arguments::from(json!({"CreateAccount": true, "Status": 3})),
            )
            .unwrap();
        let descriptor = encoder().encode(&op).unwrap();
        assert_eq!(descriptor.method, Method::Post);
        assert_eq!(
            descriptor.relative_url,
            format!("leads({})/Microsoft.Dynamics.CRM.QualifyLead", GUID)
        );
        assert_eq!(descriptor.body, Some(json!({"CreateAccount": true, "Status": 3})));
    }

    #[test]
    fn test_unbound_action_and_function() {
        let invoker = ActionInvoker::new();
        let action = ActionMetadata::unbound("PublishAllXml");
        let descriptor = encoder()
            .encode(&invoker.unbound_action(&action, Arguments::None).unwrap())
            .unwrap();
        assert_eq!(descriptor.relative_url, "PublishAllXml");
        assert_eq!(descriptor.body, Some(json!({})));

        let function = FunctionMetadata::unbound("WhoAmI");
        let descriptor = encoder()
            .encode(&invoker.unbound_function(&function, Arguments::None).unwrap())
            .unwrap();
        assert_eq!(descriptor.method, Method::Get);
        assert_eq!(descriptor.relative_url, "WhoAmI()");
    }

    #[test]
    fn test_optionset_url() {
        let descriptor = encoder()
            .encode(&Operation::optionset("account", "industrycode"))
            .unwrap();
        assert_eq!(
            descriptor.relative_url,
            "EntityDefinitions(LogicalName='account')/Attributes(LogicalName='industrycode')/Microsoft.Dynamics.CRM.PicklistAttributeMetadata?$select=LogicalName&$expand=OptionSet($select=Options),GlobalOptionSet($select=Options)"
        );
        assert!(encoder().encode(&Operation::optionset("", "x")).is_err());
    }

    #[test]
    fn test_next_link_must_be_under_root() {
        let op = Operation::RetrieveNextPage {
            next_link: format!("{}accounts?$skiptoken=abc", ROOT),
            max_page_size: Some(10),
        };
        let descriptor = encoder().encode(&op).unwrap();
        assert_eq!(descriptor.relative_url, "accounts?$skiptoken=abc");

        let foreign = Operation::RetrieveNextPage {
            next_link: "https://elsewhere/api/data/v9.1/accounts".to_string(),
            max_page_size: None,
        };
        assert!(matches!(
            encoder().encode(&foreign),
            Err(WebApiError::ProtocolDecode(_))
        ));
    }

    #[test]
    fn test_fetch_xml_is_strictly_encoded() {
        let op = Operation::fetch_xml("accounts", "<fetch><entity name='account'/></fetch>");
        let descriptor = encoder().encode(&op).unwrap();
        assert_eq!(
            descriptor.relative_url,
            "accounts?fetchXml=%3Cfetch%3E%3Centity%20name%3D%27account%27%2F%3E%3C%2Ffetch%3E"
        );
        assert_eq!(descriptor.headers.get(PREFER), Some(FETCH_XML_ANNOTATIONS));
    }

    #[test]
    fn test_caller_overrides_win() {
        let encoder = encoder()
            .with_header("OData-MaxVersion", "4.01")
            .with_header("Prefer", "return=representation");
        let descriptor = encoder
            .encode(&Operation::create("accounts", Map::new()))
            .unwrap();
        assert_eq!(descriptor.headers.get("OData-MaxVersion"), Some("4.01"));
        assert_eq!(
            descriptor.headers.get(PREFER),
            Some(format!("{},return=representation", INCLUDE_FORMATTED_VALUES).as_str())
        );
        assert_eq!(descriptor.headers.get(ODATA_VERSION), Some("4.0"));

        let plain = encoder
            .include_formatted_values(false)
            .encode(&Operation::delete("accounts", id()))
            .unwrap();
        assert_eq!(plain.headers.get(PREFER), Some("return=representation"));
    }

    #[test]
    fn test_prefer_override_keeps_page_size() {
        let query = Query::new("account").path("accounts").unwrap();
        let descriptor = encoder()
            .with_header("prefer", "return=representation")
            .encode(&Operation::retrieve_multiple(query, Some(50)))
            .unwrap();
        assert_eq!(
            descriptor.headers.get(PREFER),
            Some(
                format!(
                    "{},odata.maxpagesize=50,return=representation",
                    INCLUDE_FORMATTED_VALUES
                )
                .as_str()
            )
        );
    }

    #[test]
    fn test_prefer_override_keeps_fetch_xml_annotations() {
        let op = Operation::fetch_xml("accounts", "<fetch><entity name='account'/></fetch>");
        let descriptor = encoder()
            .with_header("Prefer", "odata.track-changes")
            .encode(&op)
            .unwrap();
        assert_eq!(
            descriptor.headers.get(PREFER),
            Some(format!("{},odata.track-changes", FETCH_XML_ANNOTATIONS).as_str())
        );
    }

    #[test]
    fn test_merge_preferences() {
        let base = format!("{},odata.maxpagesize=50", FETCH_XML_ANNOTATIONS);
        assert_eq!(
            merge_preferences(&base, "odata.maxpagesize=10, return=representation"),
            format!("{},odata.maxpagesize=10,return=representation", FETCH_XML_ANNOTATIONS)
        );
        assert_eq!(
            merge_preferences(INCLUDE_FORMATTED_VALUES, "odata.include-annotations=\"*\""),
            "odata.include-annotations=\"*\""
        );
        assert_eq!(merge_preferences("a=1", ""), "a=1");
    }

    #[test]
    fn test_headers_keep_order_and_unique_keys() {
        let mut headers = RequestHeaders::new().with("A", "1").with("B", "2");
        headers.insert("a", "3");
        assert_eq!(headers.iter().collect::<Vec<_>>(), vec![("A", "3"), ("B", "2")]);
        assert_eq!(headers.remove("b"), Some("2".to_string()));
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn test_formatted_values_can_be_disabled() {
        let descriptor = encoder()
            .include_formatted_values(false)
            .encode(&Operation::delete("accounts", id()))
            .unwrap();
        assert!(!descriptor.headers.contains(PREFER));
    }
}
