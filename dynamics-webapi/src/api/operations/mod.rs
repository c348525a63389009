//! Dynamics 365 Operations Module
//!
//! Logical operations, their wire encoding (single or batched) and response decoding.

pub mod batch;
pub mod operation;
pub mod request;
pub mod response;

pub use batch::{BatchEncoder, BatchPart, BatchRequest, BatchSegment};
pub use operation::{Binding, EntityId, Method, Operation, PendingReference, RecordRef};
pub use request::{RequestDescriptor, RequestEncoder, RequestHeaders};
pub use response::{
    BatchOutcome, BatchResponse, EntityReference, OperationResponse, ResponseDecoder,
};
