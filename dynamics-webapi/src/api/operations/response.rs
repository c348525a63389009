//! Response decoding for single requests and `$batch` envelopes
//!
//! Batch parts are matched to operations by position. The server keeps part order,
//! and a failed changeset comes back as a single error part carrying the Content-ID
//! of the write that failed.

use super::batch::{BatchPart, BatchRequest, BatchSegment};
use super::operation::{EntityId, Operation, RecordRef};
use super::request::RequestHeaders;
use crate::api::transport::HttpResponse;
use crate::api::constants::{CONTENT_TYPE, ODATA_EDIT_LINK, ODATA_ENTITY_ID, ODATA_ID};
use crate::api::error::{RemoteOperationError, Result, WebApiError};
use crate::api::metadata::{OptionSetEntry, parse_optionset};
use crate::api::query::{QueryResult, Record};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static ENTITY_SET_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|/)([A-Za-z_][A-Za-z0-9_]*)$").expect("valid regex"));

/// Address of a saved record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityReference {
    pub entity_set_name: String,
    pub id: EntityId,
}

impl EntityReference {
    /// Parse `https://.../api/data/v9.1/accounts(00000000-...)` or a relative `accounts(...)`
    ///
    /// Quoted alternate-key values may contain parentheses, slashes and `?`.
    pub fn parse(url: &str) -> Option<Self> {
        let url = url.trim();
        let (open, close) = key_group(url)?;
        let entity_set = ENTITY_SET_SUFFIX.captures(&url[..open])?.get(1)?.as_str();
        let id = EntityId::parse(&url[open + 1..close]).ok()?;
        Some(Self {
            entity_set_name: entity_set.to_string(),
            id,
        })
    }
}

/// Offsets of the parentheses around the key group that ends the path. Anything
/// inside single-quoted literals is ignored.
fn key_group(url: &str) -> Option<(usize, usize)> {
    let mut in_quote = false;
    let mut depth = 0usize;
    let mut open = None;
    let mut close = None;
    let mut path_end = url.len();
    for (i, c) in url.char_indices() {
        match c {
            '\'' => in_quote = !in_quote,
            _ if in_quote => {}
            '(' => {
                if depth == 0 {
                    open = Some(i);
                }
                depth += 1;
            }
            ')' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    close = Some(i);
                }
            }
            '?' if depth == 0 => {
                path_end = i;
                break;
            }
            _ => {}
        }
    }
    if in_quote || depth != 0 {
        return None;
    }
    let close = close?;
    (close + 1 == url[..path_end].trim_end_matches('/').len()).then_some((open?, close))
}

/// Typed result of one operation
#[derive(Debug, Clone, PartialEq)]
pub enum OperationResponse {
    Record(Record),
    Page(QueryResult),
    Saved(EntityReference),
    /// 204 from delete, associate and disassociate
    Empty,
    /// Action or function payload; `None` when the server returned no body
    ActionResult(Option<Value>),
    OptionSet(Vec<OptionSetEntry>),
}

impl OperationResponse {
    pub fn into_record(self) -> Result<Record> {
        match self {
            Self::Record(record) => Ok(record),
            other => Err(unexpected("a record", &other)),
        }
    }

    pub fn into_page(self) -> Result<QueryResult> {
        match self {
            Self::Page(page) => Ok(page),
            other => Err(unexpected("a page", &other)),
        }
    }

    pub fn into_reference(self) -> Result<EntityReference> {
        match self {
            Self::Saved(reference) => Ok(reference),
            other => Err(unexpected("an entity reference", &other)),
        }
    }

    pub fn into_action_result(self) -> Result<Option<Value>> {
        match self {
            Self::ActionResult(value) => Ok(value),
            Self::Empty => Ok(None),
            other => Err(unexpected("an action result", &other)),
        }
    }

    pub fn into_optionset(self) -> Result<Vec<OptionSetEntry>> {
        match self {
            Self::OptionSet(entries) => Ok(entries),
            other => Err(unexpected("option set entries", &other)),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Record(_) => "record",
            Self::Page(_) => "page",
            Self::Saved(_) => "entity reference",
            Self::Empty => "empty",
            Self::ActionResult(_) => "action result",
            Self::OptionSet(_) => "option set",
        }
    }
}

fn unexpected(expected: &str, got: &OperationResponse) -> WebApiError {
    WebApiError::decode(format!("expected {}, got {} response", expected, got.kind()))
}

/// Result of one operation inside a batch
#[derive(Debug)]
pub enum BatchOutcome {
    Succeeded(OperationResponse),
    /// This operation failed; remote errors carry the operation index
    Failed(WebApiError),
    /// Another write in the same changeset failed and this one was rolled back
    RolledBack { failed_operation: usize },
    /// The response ended before this operation's part
    NotExecuted,
}

impl BatchOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }
}

/// Per-operation outcomes, indexed like the operations given to the batch encoder
#[derive(Debug)]
pub struct BatchResponse {
    outcomes: Vec<BatchOutcome>,
}

impl BatchResponse {
    pub fn outcomes(&self) -> &[BatchOutcome] {
        &self.outcomes
    }

    pub fn outcome(&self, operation_index: usize) -> Option<&BatchOutcome> {
        self.outcomes.get(operation_index)
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(BatchOutcome::is_applied)
    }

    pub fn failures(&self) -> impl Iterator<Item = (usize, &WebApiError)> {
        self.outcomes.iter().enumerate().filter_map(|(i, o)| match o {
            BatchOutcome::Failed(err) => Some((i, err)),
            _ => None,
        })
    }

    /// All responses in order, or the first failure
    pub fn into_results(self) -> Result<Vec<OperationResponse>> {
        let mut responses = Vec::with_capacity(self.outcomes.len());
        let mut incomplete = None;
        for (index, outcome) in self.outcomes.into_iter().enumerate() {
            match outcome {
                BatchOutcome::Succeeded(response) => responses.push(response),
                BatchOutcome::Failed(err) => return Err(err),
                BatchOutcome::RolledBack { .. } | BatchOutcome::NotExecuted => {
                    incomplete.get_or_insert(index);
                }
            }
        }
        match incomplete {
            Some(index) => Err(WebApiError::decode(format!(
                "batch operation {} was not applied",
                index
            ))),
            None => Ok(responses),
        }
    }
}

/// Turns raw responses into [`OperationResponse`]s. Holds no state.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseDecoder;

impl ResponseDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Decode the response to a single operation
    pub fn decode(&self, operation: &Operation, response: &HttpResponse) -> Result<OperationResponse> {
        if !response.is_success() {
            let err = RemoteOperationError::from_response(response.status, &response.body);
            log::debug!(
                "{} operation failed with HTTP {}: {}",
                operation.operation_type(),
                response.status,
                err
            );
            return Err(err.into());
        }

        let decoded = match operation {
            Operation::Retrieve { .. } => OperationResponse::Record(Record::from_json(json_body(response)?)?),
            Operation::RetrieveMultiple { .. }
            | Operation::RetrieveNextPage { .. }
            | Operation::FetchXml { .. } => OperationResponse::Page(QueryResult::from_json(json_body(response)?)?),
            Operation::Create { entity_set, .. } => {
                OperationResponse::Saved(entity_reference(response, entity_set, None)?)
            }
            Operation::Update { entity_set, id, .. } => {
                let supplied = match id {
                    RecordRef::Existing(id) => Some(id),
                    RecordRef::Pending(_) => None,
                };
                OperationResponse::Saved(entity_reference(response, entity_set, supplied)?)
            }
            Operation::Upsert { entity_set, id, .. } => {
                OperationResponse::Saved(entity_reference(response, entity_set, Some(id))?)
            }
            Operation::Delete { .. } | Operation::Associate { .. } | Operation::Disassociate { .. } => {
                OperationResponse::Empty
            }
            Operation::BoundAction { .. }
            | Operation::BoundFunction { .. }
            | Operation::UnboundAction { .. }
            | Operation::UnboundFunction { .. } => OperationResponse::ActionResult(optional_json_body(response)?),
            Operation::OptionSet { .. } => OperationResponse::OptionSet(parse_optionset(json_body(response)?)?),
        };
        Ok(decoded)
    }

    /// Decode a `$batch` response against the request that produced it
    pub fn decode_batch(&self, request: &BatchRequest, response: &HttpResponse) -> Result<BatchResponse> {
        if !response.is_success() {
            return Err(RemoteOperationError::from_response(response.status, &response.body).into());
        }

        let content_type = response
            .header(CONTENT_TYPE)
            .ok_or_else(|| WebApiError::decode("batch response has no Content-Type"))?;
        let boundary = boundary_of(content_type).ok_or_else(|| {
            WebApiError::decode(format!("batch response Content-Type '{}' has no boundary", content_type))
        })?;

        let parts: Vec<MimePart> = split_multipart(&response.body, &boundary)
            .into_iter()
            .map(MimePart::parse)
            .collect();
        log::debug!(
            "Batch response has {} parts for {} segments",
            parts.len(),
            request.segments().len()
        );

        let mut outcomes: Vec<Option<BatchOutcome>> = (0..request.operation_count()).map(|_| None).collect();
        let mut parts = parts.into_iter();
        for segment in request.segments() {
            let Some(part) = parts.next() else {
                log::warn!("Batch response ended early; remaining operations were not executed");
                break;
            };
            match segment {
                BatchSegment::Read(member) => {
                    outcomes[member.operation_index] = Some(self.decode_member(member, &part));
                }
                BatchSegment::Changeset { parts: members, .. } => {
                    self.decode_changeset(members, &part, &mut outcomes);
                }
            }
        }

        Ok(BatchResponse {
            outcomes: outcomes
                .into_iter()
                .map(|o| o.unwrap_or(BatchOutcome::NotExecuted))
                .collect(),
        })
    }

    fn decode_member(&self, member: &BatchPart, part: &MimePart) -> BatchOutcome {
        match part.http_response() {
            Ok(raw) => self.outcome_of(member, &raw),
            Err(err) => BatchOutcome::Failed(err),
        }
    }

    fn outcome_of(&self, member: &BatchPart, raw: &HttpResponse) -> BatchOutcome {
        match self.decode(&member.operation, raw) {
            Ok(response) => BatchOutcome::Succeeded(response),
            Err(WebApiError::RemoteOperation(err)) => {
                BatchOutcome::Failed(err.at_index(member.operation_index).into())
            }
            Err(err) => BatchOutcome::Failed(err),
        }
    }

    fn decode_changeset(&self, members: &[BatchPart], part: &MimePart, outcomes: &mut [Option<BatchOutcome>]) {
        let nested = part
            .headers
            .get(CONTENT_TYPE)
            .filter(|ct| ct.to_ascii_lowercase().starts_with("multipart/"))
            .and_then(boundary_of);

        let responses: Vec<(Option<u32>, Result<HttpResponse>)> = match nested {
            Some(boundary) => split_multipart(&part.content, &boundary)
                .into_iter()
                .map(MimePart::parse)
                .map(|p| (p.content_id(), p.http_response()))
                .collect(),
            None => vec![(part.content_id(), part.http_response())],
        };

        let failure = responses.iter().enumerate().find_map(|(position, (content_id, raw))| match raw {
            Ok(raw) if raw.is_success() => None,
            _ => Some((position, *content_id)),
        });

        if let Some((position, content_id)) = failure {
            let failed = match content_id.and_then(|cid| members.iter().position(|m| m.request.content_id == Some(cid))) {
                Some(index) => index,
                None if responses.len() > 1 && position < members.len() => position,
                None => {
                    log::warn!("Changeset failure carries no Content-ID; attributing it to the first write");
                    0
                }
            };
            let failed_member = &members[failed];
            let failed_operation = failed_member.operation_index;
            let outcome = match responses.into_iter().nth(position) {
                Some((_, Ok(raw))) => self.outcome_of(failed_member, &raw),
                Some((_, Err(err))) => BatchOutcome::Failed(err),
                None => BatchOutcome::NotExecuted,
            };
            log::debug!("Changeset rolled back after operation {} failed", failed_operation);

            for member in members {
                if member.operation_index != failed_operation {
                    outcomes[member.operation_index] = Some(BatchOutcome::RolledBack { failed_operation });
                }
            }
            outcomes[failed_operation] = Some(outcome);
            return;
        }

        if responses.len() != members.len() {
            log::warn!(
                "Changeset has {} writes but the response has {} parts",
                members.len(),
                responses.len()
            );
        }
        let mut responses = responses.into_iter();
        for member in members {
            outcomes[member.operation_index] = Some(match responses.next() {
                Some((_, Ok(raw))) => self.outcome_of(member, &raw),
                Some((_, Err(err))) => BatchOutcome::Failed(err),
                None => BatchOutcome::NotExecuted,
            });
        }
    }
}

fn json_body(response: &HttpResponse) -> Result<Value> {
    optional_json_body(response)?
        .ok_or_else(|| WebApiError::decode(format!("HTTP {} response has no body", response.status)))
}

fn optional_json_body(response: &HttpResponse) -> Result<Option<Value>> {
    let body = response.body.trim();
    if body.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(body)?))
}

/// `OData-EntityId` header first, then `@odata.id`/`@odata.editLink` in the body,
/// then the id the caller supplied
fn entity_reference(
    response: &HttpResponse,
    entity_set: &str,
    supplied: Option<&EntityId>,
) -> Result<EntityReference> {
    if let Some(reference) = response.header(ODATA_ENTITY_ID).and_then(EntityReference::parse) {
        return Ok(reference);
    }

    if let Ok(Some(Value::Object(body))) = optional_json_body(response) {
        let from_body = [ODATA_ID, ODATA_EDIT_LINK]
            .iter()
            .filter_map(|key| body.get(*key).and_then(Value::as_str))
            .find_map(EntityReference::parse);
        if let Some(reference) = from_body {
            return Ok(reference);
        }
    }

    supplied
        .map(|id| EntityReference {
            entity_set_name: entity_set.to_string(),
            id: id.clone(),
        })
        .ok_or_else(|| {
            WebApiError::decode(format!(
                "HTTP {} response for '{}' carries no entity id",
                response.status, entity_set
            ))
        })
}

/// One body part of a multipart payload
#[derive(Debug, Clone, PartialEq, Eq)]
struct MimePart {
    headers: RequestHeaders,
    content: String,
}

impl MimePart {
    fn parse(text: &str) -> Self {
        let (head, content) = split_head(text);
        Self {
            headers: parse_header_lines(head),
            content: content.to_string(),
        }
    }

    fn content_id(&self) -> Option<u32> {
        self.headers.get("Content-ID").and_then(|v| v.trim().parse().ok())
    }

    /// The embedded `application/http` response
    fn http_response(&self) -> Result<HttpResponse> {
        let (head, body) = split_head(&self.content);
        let mut lines = head.lines();
        let status_line = lines
            .next()
            .ok_or_else(|| WebApiError::decode("batch part has no status line"))?;
        let status = status_line
            .split_whitespace()
            .nth(1)
            .and_then(|s| s.parse::<u16>().ok())
            .ok_or_else(|| WebApiError::decode(format!("malformed status line '{}'", status_line)))?;

        let mut headers = parse_header_lines(&lines.collect::<Vec<_>>().join("\n"));
        if !headers.contains("Content-ID") {
            if let Some(content_id) = self.headers.get("Content-ID") {
                headers.insert("Content-ID", content_id);
            }
        }
        Ok(HttpResponse {
            status,
            headers,
            body: body.trim_end_matches(['\r', '\n']).to_string(),
        })
    }
}

/// Split at the first blank line
fn split_head(text: &str) -> (&str, &str) {
    let text = text.trim_start_matches(['\r', '\n']);
    if let Some(pos) = text.find("\r\n\r\n") {
        (&text[..pos], &text[pos + 4..])
    } else if let Some(pos) = text.find("\n\n") {
        (&text[..pos], &text[pos + 2..])
    } else {
        (text, "")
    }
}

fn parse_header_lines(head: &str) -> RequestHeaders {
    let mut headers = RequestHeaders::new();
    for line in head.lines() {
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim(), value.trim());
        }
    }
    headers
}

fn boundary_of(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        name.trim()
            .eq_ignore_ascii_case("boundary")
            .then(|| value.trim().trim_matches('"').to_string())
    })
}

/// Body parts between `--boundary` delimiters, without the closing delimiter
fn split_multipart<'a>(body: &'a str, boundary: &str) -> Vec<&'a str> {
    let delimiter = format!("--{}", boundary);
    let mut parts = Vec::new();
    for chunk in body.split(delimiter.as_str()).skip(1) {
        if chunk.starts_with("--") {
            break;
        }
        let chunk = chunk.strip_prefix("\r\n").or_else(|| chunk.strip_prefix('\n')).unwrap_or(chunk);
        parts.push(chunk.trim_end_matches(['\r', '\n']));
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::operations::{BatchEncoder, PendingReference, RequestEncoder};
    use crate::api::query::Query;
    use serde_json::{Map, json};

    const ROOT: &str = "https://org.crm.dynamics.com/api/data/v9.1/";
    const GUID: &str = "123e4567-e89b-12d3-a456-426614174000";

    fn id() -> EntityId {
        EntityId::parse(GUID).unwrap()
    }

    fn read() -> Operation {
        Operation::retrieve_multiple(Query::new("account").path("accounts").unwrap(), None)
    }

    fn http_part(status_line: &str, headers: &[(&str, &str)], body: &str) -> String {
        let mut part = String::from("Content-Type: application/http\r\nContent-Transfer-Encoding: binary\r\n");
        for (name, value) in headers.iter().filter(|(n, _)| *n == "Content-ID") {
            part.push_str(&format!("{}: {}\r\n", name, value));
        }
        part.push_str(&format!("\r\nHTTP/1.1 {}\r\n", status_line));
        for (name, value) in headers.iter().filter(|(n, _)| *n != "Content-ID") {
            part.push_str(&format!("{}: {}\r\n", name, value));
        }
        part.push_str("\r\n");
        part.push_str(body);
        part.push_str("\r\n");
        part
    }

    fn multipart(boundary: &str, parts: &[String]) -> String {
        let mut body = String::new();
        for part in parts {
            body.push_str(&format!("--{}\r\n{}", boundary, part));
        }
        body.push_str(&format!("--{}--\r\n", boundary));
        body
    }

    fn batch_response(body: String) -> HttpResponse {
        HttpResponse::new(200, body).with_header("Content-Type", "multipart/mixed; boundary=batchresponse_1")
    }

    #[test]
    fn test_non_2xx_becomes_remote_error() {
        let response = HttpResponse::new(
            404,
            r#"{"error":{"code":"0x80040217","message":"account With Id = x Does Not Exist"}}"#,
        );
        let err = ResponseDecoder::new()
            .decode(&Operation::retrieve(Query::new("account").path("accounts").unwrap(), id()), &response)
            .unwrap_err();
        let remote = err.as_remote().unwrap();
        assert_eq!(remote.code, "0x80040217");
        assert_eq!(remote.http_status, 404);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_delete_204_is_empty_success() {
        let response = HttpResponse::new(204, "");
        let decoded = ResponseDecoder::new()
            .decode(&Operation::delete("accounts", id()), &response)
            .unwrap();
        assert_eq!(decoded, OperationResponse::Empty);
    }

    #[test]
    fn test_create_reads_entity_id_header() {
        let response = HttpResponse::new(204, "")
            .with_header("OData-EntityId", format!("{}accounts({})", ROOT, GUID));
        let reference = ResponseDecoder::new()
            .decode(&Operation::create("accounts", Map::new()), &response)
            .unwrap()
            .into_reference()
            .unwrap();
        assert_eq!(reference.entity_set_name, "accounts");
        assert_eq!(reference.id, id());
    }

    #[test]
    fn test_create_falls_back_to_body_then_errors() {
        let response = HttpResponse::new(201, json!({"@odata.id": format!("{}contacts({})", ROOT, GUID), "lastname": "x"}).to_string());
        let reference = ResponseDecoder::new()
            .decode(&Operation::create("contacts", Map::new()), &response)
            .unwrap()
            .into_reference()
            .unwrap();
        assert_eq!(reference.entity_set_name, "contacts");

        let bare = HttpResponse::new(204, "");
        let err = ResponseDecoder::new()
            .decode(&Operation::create("contacts", Map::new()), &bare)
            .unwrap_err();
        assert!(matches!(err, WebApiError::ProtocolDecode(_)));
    }

    #[test]
    fn test_update_without_header_uses_supplied_id() {
        let reference = ResponseDecoder::new()
            .decode(&Operation::update("accounts", id(), Map::new()), &HttpResponse::new(204, ""))
            .unwrap()
            .into_reference()
            .unwrap();
        assert_eq!(reference, EntityReference { entity_set_name: "accounts".into(), id: id() });
    }

    #[test]
    fn test_entity_reference_parse() {
        let reference = EntityReference::parse("accounts(accountnumber='A-1')").unwrap();
        assert_eq!(reference.id, EntityId::AlternateKey("accountnumber='A-1'".into()));
        assert!(EntityReference::parse("https://org/api/data/v9.1/accounts").is_none());
    }

    #[test]
    fn test_entity_reference_with_parentheses_in_key() {
        let reference =
            EntityReference::parse("https://org/api/data/v9.1/accounts(name='A (B)')").unwrap();
        assert_eq!(reference.entity_set_name, "accounts");
        assert_eq!(reference.id, EntityId::AlternateKey("name='A (B)'".into()));

        let quoted = EntityReference::parse("accounts(name='x)/y?''z',accountnumber='7')/").unwrap();
        assert_eq!(quoted.id, EntityId::AlternateKey("name='x)/y?''z',accountnumber='7'".into()));

        let nested = EntityReference::parse(&format!(
            "https://org/api/data/v9.1/accounts({0})/contact_customer_accounts({0})?$select=name",
            GUID
        ))
        .unwrap();
        assert_eq!(nested.entity_set_name, "contact_customer_accounts");
        assert_eq!(nested.id, id());

        assert!(EntityReference::parse("accounts(name='open)").is_none());
        assert!(EntityReference::parse("accounts(name='x'))").is_none());
    }

    #[test]
    fn test_page_keeps_formatted_values() {
        let body = json!({
            "value": [{"statecode": 0, "statecode@OData.Community.Display.V1.FormattedValue": "Active"}]
        });
        let page = ResponseDecoder::new()
            .decode(&read(), &HttpResponse::new(200, body.to_string()))
            .unwrap()
            .into_page()
            .unwrap();
        assert_eq!(page.records[0].get("statecode"), Some(&json!(0)));
        assert_eq!(page.records[0].formatted_value("statecode"), Some("Active"));
    }

    #[test]
    fn test_action_without_body() {
        let op = Operation::UnboundAction {
            action: crate::api::actions::ActionMetadata::unbound("PublishAllXml"),
            parameters: Vec::new(),
        };
        let decoded = ResponseDecoder::new().decode(&op, &HttpResponse::new(204, "")).unwrap();
        assert_eq!(decoded, OperationResponse::ActionResult(None));
    }

    #[test]
    fn test_optionset_global_only() {
        let body = json!({
            "LogicalName": "statuscode",
            "GlobalOptionSet": {"Options": [{"Value": 1, "Label": {"UserLocalizedLabel": {"Label": "Open"}}}]}
        });
        let entries = ResponseDecoder::new()
            .decode(&Operation::optionset("incident", "statuscode"), &HttpResponse::new(200, body.to_string()))
            .unwrap()
            .into_optionset()
            .unwrap();
        assert_eq!(entries, vec![OptionSetEntry { label: Some("Open".into()), value: 1 }]);
    }

    #[test]
    fn test_boundary_and_split() {
        assert_eq!(
            boundary_of("multipart/mixed; boundary=\"batchresponse_ab\"").as_deref(),
            Some("batchresponse_ab")
        );
        assert_eq!(boundary_of("application/json"), None);
        let parts = split_multipart("preamble\r\n--b\r\nA\r\n--b\r\nB\r\n--b--\r\nepilogue", "b");
        assert_eq!(parts, vec!["A", "B"]);
    }

    #[test]
    fn test_batch_all_succeed() {
        let operations = vec![
            read(),
            Operation::create("accounts", Map::new()),
            Operation::delete("accounts", id()),
        ];
        let request = BatchEncoder::new(RequestEncoder::new(ROOT)).encode(&operations).unwrap();
        let entity_id = format!("{}accounts({})", ROOT, GUID);
        let changeset = multipart(
            "changesetresponse_1",
            &[
                http_part("204 No Content", &[("Content-ID", "1"), ("OData-EntityId", entity_id.as_str())], ""),
                http_part("204 No Content", &[("Content-ID", "2")], ""),
            ],
        );
        let body = multipart(
            "batchresponse_1",
            &[
                http_part("200 OK", &[("Content-Type", "application/json")], r#"{"value":[{"name":"A"}]}"#),
                format!("Content-Type: multipart/mixed; boundary=changesetresponse_1\r\n\r\n{}", changeset),
            ],
        );

        let response = ResponseDecoder::new().decode_batch(&request, &batch_response(body)).unwrap();
        assert_eq!(response.len(), 3);
        assert!(response.is_success());
        let results = response.into_results().unwrap();
        assert_eq!(results[0].clone().into_page().unwrap().len(), 1);
        assert_eq!(results[1].clone().into_reference().unwrap().id, id());
        assert_eq!(results[2], OperationResponse::Empty);
    }

    #[test]
    fn test_changeset_failure_rolls_back_siblings_only() {
        let operations = vec![
            read(),
            Operation::create("accounts", Map::new()),
            Operation::update("accounts", PendingReference::new(1), Map::new()),
        ];
        let request = BatchEncoder::new(RequestEncoder::new(ROOT)).encode(&operations).unwrap();
        let body = multipart(
            "batchresponse_1",
            &[
                http_part("200 OK", &[], r#"{"value":[]}"#),
                http_part(
                    "400 Bad Request",
                    &[("Content-ID", "2")],
                    r#"{"error":{"code":"0x80048d19","message":"Invalid property"}}"#,
                ),
            ],
        );

        let response = ResponseDecoder::new().decode_batch(&request, &batch_response(body)).unwrap();
        assert!(matches!(response.outcome(0), Some(BatchOutcome::Succeeded(OperationResponse::Page(_)))));
        assert!(matches!(
            response.outcome(1),
            Some(BatchOutcome::RolledBack { failed_operation: 2 })
        ));
        match response.outcome(2) {
            Some(BatchOutcome::Failed(err)) => {
                let remote = err.as_remote().unwrap();
                assert_eq!(remote.operation_index, Some(2));
                assert_eq!(remote.http_status, 400);
                assert_eq!(remote.message, "Invalid property");
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(!response.outcome(1).unwrap().is_applied());
        assert_eq!(response.failures().count(), 1);
        assert!(!response.is_success());
    }

    #[test]
    fn test_changeset_failure_without_content_id_blames_first_write() {
        let operations = vec![
            Operation::create("accounts", Map::new()),
            Operation::create("contacts", Map::new()),
        ];
        let request = BatchEncoder::new(RequestEncoder::new(ROOT)).encode(&operations).unwrap();
        let body = multipart("batchresponse_1", &[http_part("500 Internal Server Error", &[], "")]);

        let response = ResponseDecoder::new().decode_batch(&request, &batch_response(body)).unwrap();
        assert!(matches!(response.outcome(0), Some(BatchOutcome::Failed(_))));
        assert!(matches!(response.outcome(1), Some(BatchOutcome::RolledBack { failed_operation: 0 })));
    }

    #[test]
    fn test_truncated_batch_marks_rest_not_executed() {
        let operations = vec![read(), read()];
        let request = BatchEncoder::new(RequestEncoder::new(ROOT)).encode(&operations).unwrap();
        let body = multipart(
            "batchresponse_1",
            &[http_part("429 Too Many Requests", &[], r#"{"error":{"code":"x","message":"slow down"}}"#)],
        );

        let response = ResponseDecoder::new().decode_batch(&request, &batch_response(body)).unwrap();
        match response.outcome(0) {
            Some(BatchOutcome::Failed(err)) => assert!(err.is_retryable()),
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(matches!(response.outcome(1), Some(BatchOutcome::NotExecuted)));
        assert!(response.into_results().is_err());
    }

    #[test]
    fn test_batch_response_without_boundary() {
        let request = BatchEncoder::new(RequestEncoder::new(ROOT)).encode(&[read()]).unwrap();
        let response = HttpResponse::new(200, "").with_header("Content-Type", "application/json");
        assert!(matches!(
            ResponseDecoder::new().decode_batch(&request, &response),
            Err(WebApiError::ProtocolDecode(_))
        ));
    }
}
