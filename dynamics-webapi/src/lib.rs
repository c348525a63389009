//! OData protocol layer for the Microsoft Dynamics 365 (Dataverse) Web API
//!
//! Build queries and operations, encode them into Web API requests (single or
//! `$batch`), and decode responses into records, references and option sets.

pub mod api;
pub mod config;

pub use api::{DynamicsClient, Operation, Query, Result, WebApiError};
