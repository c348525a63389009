//! Wire-level constants shared by the encoders and decoders

/// Web API version used when a connection does not specify one
pub const DEFAULT_WEB_API_VERSION: &str = "v9.1";

/// Row cap applied by `fetch` when the caller gives none
pub const DEFAULT_MAX_RECORDS: usize = 100;

/// Upper bound the server accepts for `odata.maxpagesize`
pub const MAX_PAGE_SIZE: usize = 5000;

pub const ODATA_MAX_VERSION: &str = "OData-MaxVersion";
pub const ODATA_VERSION: &str = "OData-Version";
pub const ODATA_VERSION_VALUE: &str = "4.0";
pub const ODATA_ENTITY_ID: &str = "OData-EntityId";

pub const PREFER: &str = "Prefer";
pub const ACCEPT: &str = "Accept";
pub const CONTENT_TYPE: &str = "Content-Type";
pub const AUTHORIZATION: &str = "Authorization";
pub const IF_MATCH: &str = "If-Match";

pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const ENTRY_CONTENT_TYPE: &str = "application/json;type=entry";

/// Preference asking the server to return formatted display values
pub const INCLUDE_FORMATTED_VALUES: &str =
    "odata.include-annotations=\"OData.Community.Display.V1.FormattedValue\"";

pub const CONTINUE_ON_ERROR: &str = "odata.continue-on-error";

/// Annotation suffixes found on record properties
pub const FORMATTED_VALUE_SUFFIX: &str = "@OData.Community.Display.V1.FormattedValue";

pub const NEXT_LINK: &str = "@odata.nextLink";
pub const COUNT: &str = "@odata.count";
pub const ETAG: &str = "@odata.etag";
pub const ODATA_ID: &str = "@odata.id";
pub const ODATA_EDIT_LINK: &str = "@odata.editLink";
pub const ODATA_CONTEXT: &str = "@odata.context";
pub const PAGING_COOKIE: &str = "@Microsoft.Dynamics.CRM.fetchxmlpagingcookie";
pub const MORE_RECORDS: &str = "@Microsoft.Dynamics.CRM.morerecords";

/// Namespace prefix for server-defined operations and metadata casts
pub const CRM_NAMESPACE: &str = "Microsoft.Dynamics.CRM";
