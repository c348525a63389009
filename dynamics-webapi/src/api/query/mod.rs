//! OData query building and page results
//!
//! `Query` renders the system query options; `paging` handles FetchXML paging cookies.

pub mod encoding;
pub mod filters;
pub mod orderby;
pub mod paging;
pub mod query;
pub mod result;

pub use filters::{Filter, FilterValue};
pub use orderby::{Direction, OrderBy};
pub use paging::{PagingCookie, apply_paging};
pub use query::{Expand, Query};
pub use result::{QueryResult, Record};
