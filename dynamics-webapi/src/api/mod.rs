//! Dynamics 365 Web API module
//!
//! The protocol layer is pure: queries and operations are encoded into request
//! descriptors and raw responses are decoded into typed results. [`DynamicsClient`]
//! wires both ends to a [`Transport`] and a [`TokenProvider`].

pub mod actions;
pub mod auth;
pub mod client;
pub mod constants;
pub mod error;
pub mod metadata;
pub mod models;
pub mod operations;
pub mod query;
pub mod transport;

pub use actions::{ActionInvoker, ActionMetadata, Arguments, FunctionMetadata, ParameterValue, TypeHint};
pub use auth::{StaticToken, TokenProvider};
pub use client::{DynamicsClient, WhoAmI};
pub use error::{RemoteOperationError, Result, WebApiError};
pub use metadata::{OptionSetCache, OptionSetEntry};
pub use models::{BypassOptions, ConnectionOptions, Credential};
pub use operations::{
    BatchEncoder, BatchOutcome, BatchRequest, BatchResponse, Binding, EntityId, EntityReference, Method,
    Operation, OperationResponse, PendingReference, RecordRef, RequestDescriptor, RequestEncoder,
    ResponseDecoder,
};
pub use query::{Filter, FilterValue, OrderBy, PagingCookie, Query, QueryResult, Record};
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};
