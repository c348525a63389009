//! `$batch` request encoding
//!
//! Operations are laid out in caller order. Every maximal run of writes becomes one
//! changeset (applied atomically by the server); every read is its own top-level part.
//! Writes get Content-IDs `1..N` across the whole batch so later writes in the same
//! changeset can address them as `$n`.

use super::operation::{Operation, PendingReference};
use super::request::{merge_preferences, RequestDescriptor, RequestEncoder, RequestHeaders};
use crate::api::constants::{CONTENT_TYPE, CONTINUE_ON_ERROR, ENTRY_CONTENT_TYPE, PREFER};
use crate::api::error::{Result, WebApiError};
use std::collections::HashSet;
use uuid::Uuid;

const CRLF: &str = "\r\n";

/// One encoded operation inside a batch
#[derive(Debug, Clone, PartialEq)]
pub struct BatchPart {
    /// Position of the operation in the caller's list
    pub operation_index: usize,
    pub operation: Operation,
    pub request: RequestDescriptor,
}

/// A top-level part of the batch envelope
#[derive(Debug, Clone, PartialEq)]
pub enum BatchSegment {
    Read(BatchPart),
    Changeset { boundary: String, parts: Vec<BatchPart> },
}

impl BatchSegment {
    pub fn parts(&self) -> &[BatchPart] {
        match self {
            Self::Read(part) => std::slice::from_ref(part),
            Self::Changeset { parts, .. } => parts,
        }
    }

    pub fn is_changeset(&self) -> bool {
        matches!(self, Self::Changeset { .. })
    }
}

/// A fully laid out `$batch` request, ready to serialize
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRequest {
    boundary: String,
    service_root: String,
    headers: RequestHeaders,
    segments: Vec<BatchSegment>,
}

impl BatchRequest {
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn segments(&self) -> &[BatchSegment] {
        &self.segments
    }

    /// Total number of operations across all segments
    pub fn operation_count(&self) -> usize {
        self.segments.iter().map(|s| s.parts().len()).sum()
    }

    pub fn relative_url(&self) -> &'static str {
        "$batch"
    }

    pub fn content_type(&self) -> String {
        format!("multipart/mixed;boundary={}", self.boundary)
    }

    /// Envelope headers, including the multipart content type
    pub fn headers(&self) -> &RequestHeaders {
        &self.headers
    }

    /// Serialize the multipart body
    pub fn body(&self) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            out.push_str(&format!("--{}{}", self.boundary, CRLF));
            match segment {
                BatchSegment::Read(part) => self.write_part(&mut out, part),
                BatchSegment::Changeset { boundary, parts } => {
                    out.push_str(&format!(
                        "{}: multipart/mixed;boundary={}{}{}",
                        CONTENT_TYPE, boundary, CRLF, CRLF
                    ));
                    for part in parts {
                        out.push_str(&format!("--{}{}", boundary, CRLF));
                        self.write_part(&mut out, part);
                    }
                    out.push_str(&format!("--{}--{}", boundary, CRLF));
                }
            }
        }
        out.push_str(&format!("--{}--{}", self.boundary, CRLF));
        out
    }

    fn write_part(&self, out: &mut String, part: &BatchPart) {
        let request = &part.request;
        out.push_str(&format!("{}: application/http{}", CONTENT_TYPE, CRLF));
        out.push_str("Content-Transfer-Encoding: binary");
        out.push_str(CRLF);
        if let Some(content_id) = request.content_id {
            out.push_str(&format!("Content-ID: {}{}", content_id, CRLF));
        }
        out.push_str(CRLF);

        out.push_str(&format!(
            "{} {} HTTP/1.1{}",
            request.method,
            request.absolute_url(&self.service_root),
            CRLF
        ));
        for (name, value) in request.headers.iter() {
            out.push_str(&format!("{}: {}{}", name, value, CRLF));
        }
        out.push_str(CRLF);
        if let Some(body) = request.body_text() {
            out.push_str(&body);
        }
        out.push_str(CRLF);
    }
}

/// Groups operations into a [`BatchRequest`]
#[derive(Debug, Clone)]
pub struct BatchEncoder {
    encoder: RequestEncoder,
    continue_on_error: bool,
}

impl BatchEncoder {
    pub fn new(encoder: RequestEncoder) -> Self {
        Self {
            encoder,
            continue_on_error: false,
        }
    }

    /// Ask the server to keep executing parts after a failed one
    pub fn continue_on_error(mut self, enabled: bool) -> Self {
        self.continue_on_error = enabled;
        self
    }

    pub fn encode(&self, operations: &[Operation]) -> Result<BatchRequest> {
        if operations.is_empty() {
            return Err(WebApiError::configuration("a batch needs at least one operation"));
        }

        let mut segments = Vec::new();
        let mut changeset: Vec<BatchPart> = Vec::new();
        let mut changeset_ids: HashSet<u32> = HashSet::new();
        let mut next_content_id = 1u32;

        for (index, operation) in operations.iter().enumerate() {
            let mut request = self.encoder.encode(operation)?;

            if !operation.is_write() {
                if !operation.pending_references().is_empty() {
                    return Err(WebApiError::configuration(format!(
                        "operation {} is a read and cannot use a pending reference",
                        index
                    )));
                }
                flush_changeset(&mut segments, &mut changeset, &mut changeset_ids);
                segments.push(BatchSegment::Read(BatchPart {
                    operation_index: index,
                    operation: operation.clone(),
                    request,
                }));
                continue;
            }

            for reference in operation.pending_references() {
                validate_reference(index, reference, &changeset_ids)?;
            }

            let content_id = next_content_id;
            next_content_id += 1;
            changeset_ids.insert(content_id);
            request.content_id = Some(content_id);
            if request.body.is_some() {
                request.headers.insert(CONTENT_TYPE, ENTRY_CONTENT_TYPE);
            }
            changeset.push(BatchPart {
                operation_index: index,
                operation: operation.clone(),
                request,
            });
        }
        flush_changeset(&mut segments, &mut changeset, &mut changeset_ids);

        let boundary = format!("batch_{}", Uuid::new_v4());
        let mut headers = self.encoder.protocol_headers();
        headers.insert(CONTENT_TYPE, format!("multipart/mixed;boundary={}", boundary));
        if self.continue_on_error {
            let prefer = match headers.get(PREFER) {
                Some(caller) => merge_preferences(CONTINUE_ON_ERROR, caller),
                None => CONTINUE_ON_ERROR.to_string(),
            };
            headers.insert(PREFER, prefer);
        }

        let batch = BatchRequest {
            boundary,
            service_root: self.encoder.service_root().to_string(),
            headers,
            segments,
        };
        log::debug!(
            "Encoded batch of {} operations in {} segments ({} changesets)",
            batch.operation_count(),
            batch.segments.len(),
            batch.segments.iter().filter(|s| s.is_changeset()).count()
        );
        Ok(batch)
    }
}

fn flush_changeset(
    segments: &mut Vec<BatchSegment>,
    changeset: &mut Vec<BatchPart>,
    changeset_ids: &mut HashSet<u32>,
) {
    if changeset.is_empty() {
        return;
    }
    segments.push(BatchSegment::Changeset {
        boundary: format!("changeset_{}", Uuid::new_v4()),
        parts: std::mem::take(changeset),
    });
    changeset_ids.clear();
}

/// A `$n` must name a write that precedes it in the same changeset
fn validate_reference(index: usize, reference: PendingReference, changeset_ids: &HashSet<u32>) -> Result<()> {
    if changeset_ids.contains(&reference.content_id) {
        Ok(())
    } else {
        Err(WebApiError::configuration(format!(
            "operation {} references {} which is not an earlier write in the same changeset",
            index, reference
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::operations::{Binding, EntityId, Method};
    use crate::api::query::Query;
    use serde_json::{Map, Value, json};

    const ROOT: &str = "https://org.crm.dynamics.com/api/data/v9.1/";
    const GUID: &str = "123e4567-e89b-12d3-a456-426614174000";

    fn encoder() -> BatchEncoder {
        BatchEncoder::new(RequestEncoder::new(ROOT))
    }

    fn id() -> EntityId {
        EntityId::parse(GUID).unwrap()
    }

    fn data(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn read() -> Operation {
        Operation::retrieve_multiple(Query::new("account").path("accounts").unwrap(), None)
    }

    fn methods(segment: &BatchSegment) -> Vec<Method> {
        segment.parts().iter().map(|p| p.request.method).collect()
    }

    #[test]
    fn test_reads_never_join_changesets() {
        let operations = vec![
            read(),
            Operation::create("accounts", data(json!({"name": "A"}))),
            Operation::update("accounts", id(), data(json!({"name": "B"}))),
            read(),
            Operation::delete("accounts", id()),
        ];
        let batch = encoder().encode(&operations).unwrap();
        let segments = batch.segments();

        assert_eq!(segments.len(), 4);
        assert!(!segments[0].is_changeset());
        assert_eq!(methods(&segments[0]), vec![Method::Get]);
        assert!(segments[1].is_changeset());
        assert_eq!(methods(&segments[1]), vec![Method::Post, Method::Patch]);
        assert!(!segments[2].is_changeset());
        assert!(segments[3].is_changeset());
        assert_eq!(methods(&segments[3]), vec![Method::Delete]);

        let indices: Vec<usize> = segments
            .iter()
            .flat_map(|s| s.parts().iter().map(|p| p.operation_index))
            .collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_content_ids_are_contiguous_over_writes() {
        let operations = vec![
            Operation::create("accounts", Map::new()),
            read(),
            Operation::create("contacts", Map::new()),
            Operation::delete("accounts", id()),
            read(),
            Operation::update("accounts", id(), Map::new()),
        ];
        let batch = encoder().encode(&operations).unwrap();
        let ids: Vec<Option<u32>> = batch
            .segments()
            .iter()
            .flat_map(|s| s.parts().iter().map(|p| p.request.content_id))
            .collect();
        assert_eq!(ids, vec![Some(1), None, Some(2), Some(3), None, Some(4)]);
        assert_eq!(batch.operation_count(), 6);
    }

    #[test]
    fn test_pending_reference_inside_changeset() {
        let operations = vec![
            Operation::create("accounts", data(json!({"name": "Parent"}))),
            Operation::create("contacts", data(json!({"lastname": "Child"})))
                .with_binding(Binding::new("parentcustomerid_account", "accounts", PendingReference::new(1))),
        ];
        let batch = encoder().encode(&operations).unwrap();
        let child = &batch.segments()[0].parts()[1].request;
        assert_eq!(child.body.as_ref().unwrap()["parentcustomerid_account@odata.bind"], json!("$1"));
    }

    #[test]
    fn test_pending_reference_must_precede_in_same_changeset() {
        // Forward reference
        let forward = vec![
            Operation::update("accounts", PendingReference::new(2), Map::new()),
            Operation::create("accounts", Map::new()),
        ];
        assert!(matches!(encoder().encode(&forward), Err(WebApiError::Configuration(_))));

        // Reference across a read boundary lands in another changeset
        let across = vec![
            Operation::create("accounts", Map::new()),
            read(),
            Operation::delete("accounts", PendingReference::new(1)),
        ];
        assert!(matches!(encoder().encode(&across), Err(WebApiError::Configuration(_))));

        assert!(encoder().encode(&[]).is_err());
    }

    #[test]
    fn test_body_serialization() {
        let operations = vec![
            Operation::retrieve(Query::new("account").path("accounts").unwrap().select(["name"]), id()),
            Operation::create("accounts", data(json!({"name": "Acme"}))),
            Operation::update("accounts", PendingReference::new(1), data(json!({"telephone1": "555"}))),
        ];
        let batch = encoder().continue_on_error(true).encode(&operations).unwrap();
        let body = batch.body();
        let boundary = batch.boundary().to_string();
        let changeset = match &batch.segments()[1] {
            BatchSegment::Changeset { boundary, .. } => boundary.clone(),
            other => panic!("expected changeset, got {:?}", other),
        };

        assert!(boundary.starts_with("batch_"));
        assert!(changeset.starts_with("changeset_"));
        assert_ne!(boundary, changeset);
        assert!(body.starts_with(&format!("--{}\r\nContent-Type: application/http\r\nContent-Transfer-Encoding: binary\r\n\r\nGET {}accounts({})?$select=name HTTP/1.1\r\n", boundary, ROOT, GUID)));
        assert!(body.contains(&format!("Content-Type: multipart/mixed;boundary={}\r\n\r\n--{}\r\n", changeset, changeset)));
        assert!(body.contains(&format!(
            "Content-ID: 1\r\n\r\nPOST {}accounts HTTP/1.1\r\n",
            ROOT
        )));
        assert!(body.contains("Content-ID: 2\r\n\r\nPATCH $1 HTTP/1.1\r\n"));
        assert!(body.contains("Content-Type: application/json;type=entry\r\n"));
        assert!(body.contains("\r\n\r\n{\"name\":\"Acme\"}\r\n"));
        assert!(body.ends_with(&format!("--{}--\r\n--{}--\r\n", changeset, boundary)));

        assert_eq!(batch.content_type(), format!("multipart/mixed;boundary={}", boundary));
        assert_eq!(batch.headers().get(CONTENT_TYPE), Some(batch.content_type().as_str()));
        assert_eq!(batch.headers().get(PREFER), Some(CONTINUE_ON_ERROR));
        assert_eq!(batch.headers().get("OData-Version"), Some("4.0"));
        assert_eq!(batch.relative_url(), "$batch");
    }

    #[test]
    fn test_continue_on_error_keeps_caller_preferences() {
        let encoder = BatchEncoder::new(
            RequestEncoder::new(ROOT).with_header("Prefer", "return=representation"),
        )
        .continue_on_error(true);
        let batch = encoder.encode(&[read()]).unwrap();
        assert_eq!(
            batch.headers().get(PREFER),
            Some("odata.continue-on-error,return=representation")
        );
    }

    #[test]
    fn test_every_line_ends_with_crlf() {
        let operations = vec![read(), Operation::delete("accounts", id())];
        let body = encoder().encode(&operations).unwrap().body();
        assert_eq!(body.matches('\n').count(), body.matches("\r\n").count());
    }
}
