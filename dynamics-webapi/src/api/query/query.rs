//! OData query descriptor
//!
//! A `Query` is a value: every chained setter consumes it and hands back the
//! same logical query with the new setting merged in. Rendering never mutates,
//! so a query can be kept around and rendered (or cloned and refined) freely.

use super::encoding::encode_query_value;
use super::filters::Filter;
use super::orderby::OrderBy;
use crate::api::error::{Result, WebApiError};

/// Navigation property expansion with its own (one level deep) sub-query
#[derive(Debug, Clone, PartialEq)]
pub struct Expand {
    pub navigation_property: String,
    pub query: Query,
}

impl Expand {
    fn render(&self) -> String {
        let mut options = Vec::new();
        if let Some(select) = self.query.render_select() {
            options.push(format!("$select={}", select));
        }
        if let Some(filter) = self.query.render_filter() {
            options.push(format!("$filter={}", filter));
        }
        if let Some(order_by) = self.query.render_order_by() {
            options.push(format!("$orderby={}", order_by));
        }

        if options.is_empty() {
            self.navigation_property.clone()
        } else {
            format!("{}({})", self.navigation_property, options.join(";"))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Query {
    entity_logical_name: String,
    entity_set_path: Option<String>,
    filters: Vec<String>,
    select: Vec<String>,
    expand: Vec<Expand>,
    order_by: Vec<OrderBy>,
    top: Option<u32>,
}

impl Query {
    pub fn new(entity_logical_name: impl Into<String>) -> Self {
        Self {
            entity_logical_name: entity_logical_name.into(),
            ..Default::default()
        }
    }

    /// Sub-query for an `$expand`; carries no entity of its own
    pub fn sub() -> Self {
        Self::default()
    }

    /// Set the entity set path (e.g. `accounts`)
    pub fn path(mut self, entity_set_path: impl Into<String>) -> Result<Self> {
        let path = entity_set_path.into();
        let path = path.trim().trim_matches('/');
        if path.is_empty() {
            return Err(WebApiError::configuration(
                "query path must not be empty",
            ));
        }
        self.entity_set_path = Some(path.to_string());
        Ok(self)
    }

    /// Add a predicate; multiple predicates are combined with `and`
    pub fn filter(mut self, predicate: impl Into<String>) -> Self {
        let predicate = predicate.into();
        let predicate = predicate.trim();
        if !predicate.is_empty() {
            self.filters.push(predicate.to_string());
        }
        self
    }

    pub fn filter_by(self, filter: Filter) -> Self {
        self.filter(filter.to_odata())
    }

    /// Add attributes to `$select`; order of first appearance is kept, duplicates dropped
    pub fn select<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for attribute in attributes {
            let attribute = attribute.into();
            if !attribute.is_empty() && !self.select.contains(&attribute) {
                self.select.push(attribute);
            }
        }
        self
    }

    /// Expand a navigation property. The sub-query may only use select, filter and
    /// order-by: the Web API rejects nested `$expand` beyond one level.
    pub fn expand(mut self, navigation_property: impl Into<String>, sub_query: Query) -> Result<Self> {
        let navigation_property = navigation_property.into();
        if navigation_property.trim().is_empty() {
            return Err(WebApiError::configuration(
                "expand navigation property must not be empty",
            ));
        }
        if !sub_query.expand.is_empty() {
            return Err(WebApiError::configuration(format!(
                "expand of '{}' may not contain a nested $expand",
                navigation_property
            )));
        }
        if sub_query.top.is_some() {
            return Err(WebApiError::configuration(format!(
                "expand of '{}' may not set $top",
                navigation_property
            )));
        }

        self.expand.push(Expand {
            navigation_property,
            query: sub_query,
        });
        Ok(self)
    }

    pub fn order_by(mut self, order: impl Into<OrderBy>) -> Self {
        self.order_by.push(order.into());
        self
    }

    pub fn top(mut self, top: u32) -> Self {
        self.top = Some(top);
        self
    }

    pub fn entity_logical_name(&self) -> &str {
        &self.entity_logical_name
    }

    pub fn entity_set_path(&self) -> Option<&str> {
        self.entity_set_path.as_deref()
    }

    /// The entity set path, or a configuration error when none was set
    pub fn require_path(&self) -> Result<&str> {
        self.entity_set_path.as_deref().ok_or_else(|| {
            WebApiError::configuration(format!(
                "query for '{}' has no entity set path",
                self.entity_logical_name
            ))
        })
    }

    pub fn selected(&self) -> &[String] {
        &self.select
    }

    pub fn expansions(&self) -> &[Expand] {
        &self.expand
    }

    pub fn top_value(&self) -> Option<u32> {
        self.top
    }

    /// Render `$select`, `$filter`, `$orderby`, `$expand`, `$top` in that order.
    /// Unset clauses are omitted; an empty query renders to an empty string.
    pub fn to_query_string(&self) -> String {
        let mut clauses = Vec::new();
        if let Some(select) = self.render_select() {
            clauses.push(format!("$select={}", encode_query_value(&select)));
        }
        if let Some(filter) = self.render_filter() {
            clauses.push(format!("$filter={}", encode_query_value(&filter)));
        }
        if let Some(order_by) = self.render_order_by() {
            clauses.push(format!("$orderby={}", encode_query_value(&order_by)));
        }
        if let Some(expand) = self.render_expand() {
            clauses.push(format!("$expand={}", encode_query_value(&expand)));
        }
        if let Some(top) = self.top {
            clauses.push(format!("$top={}", top));
        }
        clauses.join("&")
    }

    /// Only the clauses meaningful for a single-record retrieve (`$select`, `$expand`)
    pub fn to_single_record_query_string(&self) -> String {
        let mut clauses = Vec::new();
        if let Some(select) = self.render_select() {
            clauses.push(format!("$select={}", encode_query_value(&select)));
        }
        if let Some(expand) = self.render_expand() {
            clauses.push(format!("$expand={}", encode_query_value(&expand)));
        }
        clauses.join("&")
    }

    /// `{path}` or `{path}?{query}`
    pub fn to_relative_url(&self) -> Result<String> {
        let path = self.require_path()?;
        let query = self.to_query_string();
        if query.is_empty() {
            Ok(path.to_string())
        } else {
            Ok(format!("{}?{}", path, query))
        }
    }

    fn render_select(&self) -> Option<String> {
        (!self.select.is_empty()).then(|| self.select.join(","))
    }

    fn render_filter(&self) -> Option<String> {
        match self.filters.as_slice() {
            [] => None,
            [single] => Some(single.clone()),
            many => Some(
                many.iter()
                    .map(|f| format!("({})", f))
                    .collect::<Vec<_>>()
                    .join(" and "),
            ),
        }
    }

    fn render_order_by(&self) -> Option<String> {
        (!self.order_by.is_empty()).then(|| {
            self.order_by
                .iter()
                .map(|o| o.to_string())
                .collect::<Vec<_>>()
                .join(",")
        })
    }

    fn render_expand(&self) -> Option<String> {
        (!self.expand.is_empty()).then(|| {
            self.expand
                .iter()
                .map(Expand::render)
                .collect::<Vec<_>>()
                .join(",")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accounts() -> Query {
        Query::new("account").path("accounts").unwrap()
    }

    #[test]
    fn test_path_only_renders_empty() {
        let query = accounts();
        assert_eq!(query.to_query_string(), "");
        assert_eq!(query.to_relative_url().unwrap(), "accounts");
    }

    #[test]
    fn test_empty_path_is_rejected() {
        let err = Query::new("account").path("").unwrap_err();
        assert!(matches!(err, WebApiError::Configuration(_)));
        assert!(Query::new("account").path("  / ").is_err());
    }

    #[test]
    fn test_missing_path_cannot_render_url() {
        let err = Query::new("account").to_relative_url().unwrap_err();
        assert!(matches!(err, WebApiError::Configuration(_)));
    }

    #[test]
    fn test_clause_order_is_fixed() {
        // Set in reverse order on purpose
        let query = accounts()
            .top(10)
            .expand("primarycontactid", Query::sub().select(["fullname"]))
            .unwrap()
            .order_by(OrderBy::desc("createdon"))
            .filter("statecode eq 0")
            .select(["name", "accountid"]);

        assert_eq!(
            query.to_query_string(),
            "$select=name,accountid&$filter=statecode%20eq%200&$orderby=createdon%20desc\
             &$expand=primarycontactid($select=fullname)&$top=10"
        );
    }

    #[test]
    fn test_rendering_is_idempotent() {
        let query = accounts()
            .select(["name"])
            .filter("contains(name,'a')")
            .order_by("name")
            .top(5);
        let first = query.to_query_string();
        let second = query.to_query_string();
        assert_eq!(first, second);
        assert_eq!(query.clone().to_query_string(), first);
    }

    #[test]
    fn test_filters_are_conjoined() {
        let query = accounts()
            .filter("statecode eq 0")
            .filter_by(Filter::starts_with("name", "A"));
        assert_eq!(
            query.to_query_string(),
            "$filter=(statecode%20eq%200)%20and%20(startswith(name,'A'))"
        );
    }

    #[test]
    fn test_select_is_an_ordered_set() {
        let query = accounts().select(["name", "accountid"]).select(["name", "revenue"]);
        assert_eq!(query.selected(), &["name", "accountid", "revenue"]);
    }

    #[test]
    fn test_nested_expand_is_rejected() {
        let inner = Query::sub()
            .expand("owninguser", Query::sub())
            .unwrap();
        let err = accounts().expand("primarycontactid", inner).unwrap_err();
        assert!(matches!(err, WebApiError::Configuration(_)));
    }

    #[test]
    fn test_expand_with_top_is_rejected() {
        assert!(accounts().expand("contact_customer_accounts", Query::sub().top(3)).is_err());
    }

    #[test]
    fn test_expand_with_all_sub_options() {
        let sub = Query::sub()
            .select(["fullname", "emailaddress1"])
            .filter("statecode eq 0")
            .order_by("fullname");
        let query = accounts()
            .expand("contact_customer_accounts", sub)
            .unwrap()
            .expand("primarycontactid", Query::sub())
            .unwrap();

        assert_eq!(
            query.to_query_string(),
            "$expand=contact_customer_accounts($select=fullname,emailaddress1;\
             $filter=statecode%20eq%200;$orderby=fullname%20asc),primarycontactid"
        );
    }

    #[test]
    fn test_single_record_query_string() {
        let query = accounts().select(["name"]).filter("x eq 1").top(1);
        assert_eq!(query.to_single_record_query_string(), "$select=name");
    }
}
