//! Dynamics 365 Web API client
//!
//! Wires the pure encoders and decoder to a [`Transport`] and a [`TokenProvider`].
//! The client keeps no per-call state, so one instance can serve concurrent callers;
//! paging state lives in locals of the retrieval loops.

use crate::api::actions::{ActionInvoker, ActionMetadata, Arguments, FunctionMetadata};
use crate::api::auth::{StaticToken, TokenProvider};
use crate::api::constants::{AUTHORIZATION, MAX_PAGE_SIZE};
use crate::api::error::{Result, WebApiError};
use crate::api::metadata::{OptionSetCache, OptionSetEntry};
use crate::api::models::ConnectionOptions;
use crate::api::operations::{
    BatchEncoder, BatchRequest, BatchResponse, Binding, EntityId, EntityReference, Method, Operation,
    OperationResponse, RequestDescriptor, RequestEncoder, RequestHeaders, ResponseDecoder,
};
use crate::api::query::paging::{PagingCookie, apply_paging};
use crate::api::query::{Query, QueryResult, Record};
use crate::api::transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use uuid::Uuid;

/// Identity of the calling user, from the `WhoAmI` function
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WhoAmI {
    pub user_id: Uuid,
    pub business_unit_id: Uuid,
    pub organization_id: Uuid,
}

pub struct DynamicsClient {
    options: ConnectionOptions,
    encoder: RequestEncoder,
    decoder: ResponseDecoder,
    invoker: ActionInvoker,
    transport: Arc<dyn Transport>,
    tokens: Arc<dyn TokenProvider>,
}

impl DynamicsClient {
    pub fn new(
        options: ConnectionOptions,
        transport: Arc<dyn Transport>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Result<Self> {
        let mut encoder = RequestEncoder::new(options.service_root()?);
        for (name, value) in options.bypass.headers() {
            encoder = encoder.with_header(name, value);
        }
        log::debug!(
            "Client for '{}' at {} as {}",
            options.name,
            encoder.service_root(),
            options.credential.display_name()
        );
        Ok(Self {
            options,
            encoder,
            decoder: ResponseDecoder::new(),
            invoker: ActionInvoker::new(),
            transport,
            tokens,
        })
    }

    /// reqwest transport plus the token stored on the connection's credential
    pub fn connect(options: ConnectionOptions) -> Result<Self> {
        let transport = ReqwestTransport::new(options.timeout())?;
        let tokens = StaticToken::from_credential(&options.credential)?;
        Self::new(options, Arc::new(transport), Arc::new(tokens))
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    pub fn service_root(&self) -> &str {
        self.encoder.service_root()
    }

    pub fn encoder(&self) -> &RequestEncoder {
        &self.encoder
    }

    /// Start a query on `entity_set` for the entity `logical_name`
    pub fn query(&self, logical_name: &str, entity_set: &str) -> Result<Query> {
        Query::new(logical_name).path(entity_set)
    }

    /// Encode, send and decode one operation
    pub async fn execute(&self, operation: &Operation) -> Result<OperationResponse> {
        let descriptor = self.encoder.encode(operation)?;
        let response = self.send(&descriptor).await?;
        self.decoder.decode(operation, &response)
    }

    async fn send(&self, descriptor: &RequestDescriptor) -> Result<HttpResponse> {
        let request = HttpRequest {
            method: descriptor.method,
            url: descriptor.absolute_url(self.encoder.service_root()),
            headers: descriptor.headers.clone(),
            body: descriptor.body_text(),
        };
        self.dispatch(request).await
    }

    async fn dispatch(&self, mut request: HttpRequest) -> Result<HttpResponse> {
        let token = self.tokens.access_token().await?;
        request.headers.insert(AUTHORIZATION, format!("Bearer {}", token));
        log::debug!("{} {}", request.method, request.url);
        let response = self.transport.send(request).await?;
        log::debug!("HTTP {}", response.status);
        Ok(response)
    }

    pub async fn retrieve(&self, query: &Query, id: impl Into<EntityId>) -> Result<Record> {
        self.execute(&Operation::retrieve(query.clone(), id))
            .await?
            .into_record()
    }

    /// A single page; follow `next_link` with [`Self::next_page`]
    pub async fn retrieve_multiple(&self, query: &Query, max_page_size: Option<usize>) -> Result<QueryResult> {
        self.execute(&Operation::retrieve_multiple(query.clone(), max_page_size))
            .await?
            .into_page()
    }

    pub async fn next_page(&self, next_link: &str, max_page_size: Option<usize>) -> Result<QueryResult> {
        let operation = Operation::RetrieveNextPage {
            next_link: next_link.to_string(),
            max_page_size,
        };
        self.execute(&operation).await?.into_page()
    }

    /// Follow `@odata.nextLink` until `max_records` rows (default from the connection)
    pub async fn fetch(&self, query: &Query, max_records: Option<usize>) -> Result<Vec<Record>> {
        let limit = max_records.unwrap_or(self.options.max_records);
        if limit == 0 {
            return Ok(Vec::new());
        }
        // $top already bounds the result and cannot be combined with a page size
        let page_size = match query.top_value() {
            Some(_) => None,
            None => Some(limit.min(MAX_PAGE_SIZE)),
        };

        let mut records = Vec::new();
        let mut page = self.retrieve_multiple(query, page_size).await?;
        loop {
            records.extend(page.records);
            if records.len() >= limit {
                records.truncate(limit);
                break;
            }
            match page.next_link {
                Some(link) => page = self.next_page(&link, page_size).await?,
                None => break,
            }
        }
        log::debug!("Fetched {} records", records.len());
        Ok(records)
    }

    /// One page of a FetchXML query, sent as-is
    pub async fn fetch_xml(&self, entity_set: &str, fetch_xml: &str) -> Result<QueryResult> {
        self.execute(&Operation::fetch_xml(entity_set, fetch_xml))
            .await?
            .into_page()
    }

    /// Every page of a FetchXML query, following paging cookies while the server
    /// reports more records
    pub async fn fetch_xml_all(
        &self,
        entity_set: &str,
        fetch_xml: &str,
        page_size: Option<usize>,
    ) -> Result<Vec<Record>> {
        let mut page_number = 1u32;
        let mut cookie: Option<PagingCookie> = None;
        let mut records = Vec::new();

        loop {
            let paged = apply_paging(fetch_xml, page_number, page_size, cookie.as_ref())?;
            let page = self.fetch_xml(entity_set, &paged).await?;
            let more = page.more_records;
            let annotation = page.paging_cookie.unwrap_or_default();
            let empty = page.records.is_empty();
            records.extend(page.records);
            if !more {
                break;
            }
            if empty || page_number == u32::MAX {
                log::warn!(
                    "FetchXML page {} claims more records but cannot advance; stopping at {} records",
                    page_number,
                    records.len()
                );
                break;
            }

            let decoded = PagingCookie::decode(&annotation, page_number);
            page_number = decoded.next_page_number.max(page_number.saturating_add(1));
            cookie = Some(decoded);
            log::debug!("Requesting FetchXML page {} ({} records so far)", page_number, records.len());
        }
        Ok(records)
    }

    /// Create when `id` is `None`, update (never create) otherwise
    pub async fn save(
        &self,
        entity_set: &str,
        data: Map<String, Value>,
        id: Option<EntityId>,
    ) -> Result<EntityReference> {
        self.save_with_bindings(entity_set, data, id, Vec::new()).await
    }

    pub async fn save_with_bindings(
        &self,
        entity_set: &str,
        data: Map<String, Value>,
        id: Option<EntityId>,
        bindings: Vec<Binding>,
    ) -> Result<EntityReference> {
        let operation = bindings
            .into_iter()
            .fold(Operation::save(entity_set, data, id.map(Into::into)), Operation::with_binding);
        self.execute(&operation).await?.into_reference()
    }

    /// Create or update by id or alternate key
    pub async fn upsert(&self, entity_set: &str, id: EntityId, data: Map<String, Value>) -> Result<EntityReference> {
        self.execute(&Operation::upsert(entity_set, id, data))
            .await?
            .into_reference()
    }

    pub async fn delete(&self, entity_set: &str, id: impl Into<EntityId>) -> Result<()> {
        let id: EntityId = id.into();
        self.execute(&Operation::delete(entity_set, id)).await?;
        Ok(())
    }

    pub async fn associate(
        &self,
        entity_set: &str,
        id: impl Into<EntityId>,
        navigation_property: &str,
        target_set: &str,
        target_id: impl Into<EntityId>,
    ) -> Result<()> {
        let (id, target_id): (EntityId, EntityId) = (id.into(), target_id.into());
        let operation = Operation::associate(entity_set, id, navigation_property, target_set, target_id);
        self.execute(&operation).await?;
        Ok(())
    }

    pub async fn disassociate(
        &self,
        entity_set: &str,
        id: impl Into<EntityId>,
        navigation_property: &str,
        target_id: impl Into<EntityId>,
    ) -> Result<()> {
        let id: EntityId = id.into();
        let operation = Operation::disassociate(entity_set, id, navigation_property, target_id.into());
        self.execute(&operation).await?;
        Ok(())
    }

    pub async fn bound_action(
        &self,
        entity_set: &str,
        id: impl Into<EntityId>,
        action: &ActionMetadata,
        arguments: Arguments,
    ) -> Result<Option<Value>> {
        let id: EntityId = id.into();
        let operation = self.invoker.bound_action(entity_set, id, action, arguments)?;
        self.execute(&operation).await?.into_action_result()
    }

    pub async fn bound_function(
        &self,
        entity_set: &str,
        id: impl Into<EntityId>,
        function: &FunctionMetadata,
        arguments: Arguments,
    ) -> Result<Option<Value>> {
        let operation = self.invoker.bound_function(entity_set, id.into(), function, arguments)?;
        self.execute(&operation).await?.into_action_result()
    }

    pub async fn unbound_action(&self, action: &ActionMetadata, arguments: Arguments) -> Result<Option<Value>> {
        let operation = self.invoker.unbound_action(action, arguments)?;
        self.execute(&operation).await?.into_action_result()
    }

    pub async fn unbound_function(&self, function: &FunctionMetadata, arguments: Arguments) -> Result<Option<Value>> {
        let operation = self.invoker.unbound_function(function, arguments)?;
        self.execute(&operation).await?.into_action_result()
    }

    pub async fn who_am_i(&self) -> Result<WhoAmI> {
        let body = self
            .unbound_function(&FunctionMetadata::unbound("WhoAmI"), Arguments::None)
            .await?
            .ok_or_else(|| WebApiError::decode("WhoAmI returned no body"))?;
        Ok(serde_json::from_value(body)?)
    }

    /// Picklist options for `entity.attribute`
    pub async fn optionset(&self, entity: &str, attribute: &str) -> Result<Vec<OptionSetEntry>> {
        self.execute(&Operation::optionset(entity, attribute))
            .await?
            .into_optionset()
    }

    /// Like [`Self::optionset`], answering from `cache` when it already holds the attribute
    pub async fn optionset_cached(
        &self,
        cache: &OptionSetCache,
        entity: &str,
        attribute: &str,
    ) -> Result<Vec<OptionSetEntry>> {
        if let Some(entries) = cache.get(entity, attribute).await {
            log::debug!("Option set {}.{} served from cache", entity, attribute);
            return Ok(entries);
        }
        let entries = self.optionset(entity, attribute).await?;
        cache.insert(entity, attribute, entries.clone()).await;
        Ok(entries)
    }

    /// Lay out a batch without sending it
    pub fn encode_batch(&self, operations: &[Operation], continue_on_error: bool) -> Result<BatchRequest> {
        BatchEncoder::new(self.encoder.clone())
            .continue_on_error(continue_on_error)
            .encode(operations)
    }

    /// Send `operations` as one `$batch` request. Outcomes are indexed like `operations`.
    pub async fn execute_batch(&self, operations: &[Operation], continue_on_error: bool) -> Result<BatchResponse> {
        let batch = self.encode_batch(operations, continue_on_error)?;
        let request = HttpRequest {
            method: Method::Post,
            url: format!("{}{}", self.encoder.service_root(), batch.relative_url()),
            headers: batch.headers().clone(),
            body: Some(batch.body()),
        };
        let response = self.dispatch(request).await?;
        let decoded = self.decoder.decode_batch(&batch, &response)?;
        for (index, err) in decoded.failures() {
            log::warn!("Batch operation {} failed: {}", index, err);
        }
        Ok(decoded)
    }

    /// The request an operation would send, without sending it
    pub fn describe(&self, operation: &Operation) -> Result<(String, RequestHeaders, Option<String>)> {
        let descriptor = self.encoder.encode(operation)?;
        Ok((
            format!(
                "{} {}",
                descriptor.method,
                descriptor.absolute_url(self.encoder.service_root())
            ),
            descriptor.headers.clone(),
            descriptor.body_text(),
        ))
    }
}
