//! FetchXML paging cookies
//!
//! Complex (FetchXML-backed) queries page through an opaque cookie the server returns
//! in `@Microsoft.Dynamics.CRM.fetchxmlpagingcookie`. The annotation looks like
//!
//! ```text
//! <cookie pagenumber="2" pagingcookie="%253ccookie%2520page%253d%25221%2522%253e...%253c%252fcookie%253e" istracking="False" />
//! ```
//!
//! where `pagingcookie` is the real cookie, percent-encoded twice. The cookie is
//! passed back verbatim (XML-escaped into the `paging-cookie` attribute of the
//! `<fetch>` element) to request the next page.
//!
//! The server omits the cookie for some aggregate and grouped fetches. Decoding then
//! falls back to "the page after the current one" instead of failing. This is a
//! heuristic: whether another page actually exists must be read from the
//! more-records flag on the response, not from the cookie.

use crate::api::error::{Result, WebApiError};
use once_cell::sync::Lazy;
use regex::Regex;

static PAGING_COOKIE_FALLBACK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)pagingcookie="(<cookie page="(\d+)".*</cookie>)""#).expect("valid regex")
});

/// `<fetch>` attributes owned by the paging loop
const PAGING_ATTRIBUTES: [&str; 3] = ["page", "count", "paging-cookie"];

/// A decoded paging cookie
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagingCookie {
    /// Unescaped inner cookie (`<cookie page="N">...</cookie>`), empty when the server sent none
    pub cookie: String,
    /// Page the cookie describes (the page just returned), starting at 1
    pub page_number: u32,
    pub next_page_number: u32,
}

impl PagingCookie {
    /// The state before any page has been fetched
    pub fn first_page() -> Self {
        Self {
            cookie: String::new(),
            page_number: 1,
            next_page_number: 1,
        }
    }

    /// Decode the paging-cookie annotation of the page `current_page_number` was requesting.
    ///
    /// Never fails: an empty or malformed cookie yields an empty cookie for
    /// `current_page_number`, whose next page is `current_page_number + 1`.
    pub fn decode(cookie_text: &str, current_page_number: u32) -> Self {
        let current_page_number = current_page_number.max(1);

        if cookie_text.trim().is_empty() {
            log::debug!(
                "No paging cookie on page {}; assuming page {} follows",
                current_page_number,
                current_page_number.saturating_add(1)
            );
            return Self::fallback(current_page_number);
        }

        match decode_inner_cookie(cookie_text) {
            Some((cookie, page)) => Self {
                cookie,
                page_number: page,
                next_page_number: page.saturating_add(1),
            },
            None => {
                log::warn!(
                    "Paging cookie on page {} has no page indicator; assuming page {} follows",
                    current_page_number,
                    current_page_number.saturating_add(1)
                );
                Self::fallback(current_page_number)
            }
        }
    }

    /// Build the annotation the server would send for page `page_number`.
    /// `body` is the cookie's inner XML (e.g. `<accountid last="{..}" first="{..}" />`).
    pub fn encode(page_number: u32, body: &str) -> String {
        let inner = format!("<cookie page=\"{}\">{}</cookie>", page_number, body);
        let once = urlencoding::encode(&inner).into_owned();
        let twice = urlencoding::encode(&once).into_owned();
        format!(
            "<cookie pagenumber=\"{}\" pagingcookie=\"{}\" istracking=\"False\" />",
            page_number.saturating_add(1),
            twice
        )
    }

    pub fn has_cookie(&self) -> bool {
        !self.cookie.is_empty()
    }

    fn fallback(current_page_number: u32) -> Self {
        Self {
            cookie: String::new(),
            page_number: current_page_number,
            next_page_number: current_page_number.saturating_add(1),
        }
    }
}

/// Returns the unescaped inner cookie and its page number
fn decode_inner_cookie(cookie_text: &str) -> Option<(String, u32)> {
    let from_attribute = roxmltree::Document::parse(cookie_text).ok().and_then(|doc| {
        doc.root_element()
            .attribute("pagingcookie")
            .map(percent_decode_twice)
    });

    if let Some(inner) = from_attribute {
        return page_of(&inner).map(|page| (inner, page));
    }

    // Not a well-formed annotation element; scan the fully unescaped text instead
    let unescaped = percent_decode_twice(cookie_text);
    let captures = PAGING_COOKIE_FALLBACK.captures(&unescaped)?;
    let page = captures.get(2)?.as_str().parse().ok()?;
    Some((captures.get(1)?.as_str().to_string(), page))
}

fn page_of(inner_cookie: &str) -> Option<u32> {
    let doc = roxmltree::Document::parse(inner_cookie).ok()?;
    let root = doc.root_element();
    if root.tag_name().name() != "cookie" {
        return None;
    }
    root.attribute("page")?.parse().ok().filter(|page| *page > 0)
}

fn percent_decode_twice(text: &str) -> String {
    let once = urlencoding::decode(text)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| text.to_string());
    urlencoding::decode(&once)
        .map(|s| s.into_owned())
        .unwrap_or(once)
}

/// Set `page`, `count` and `paging-cookie` on the `<fetch>` element of a FetchXML document.
///
/// Paging is driven by the cookie, so a `<fetch top="...">` is rejected.
pub fn apply_paging(
    fetch_xml: &str,
    page_number: u32,
    count: Option<usize>,
    cookie: Option<&PagingCookie>,
) -> Result<String> {
    let doc = roxmltree::Document::parse(fetch_xml)
        .map_err(|e| WebApiError::configuration(format!("invalid FetchXML: {}", e)))?;
    let root = doc.root_element();
    if root.tag_name().name() != "fetch" {
        return Err(WebApiError::configuration(format!(
            "FetchXML root element must be <fetch>, found <{}>",
            root.tag_name().name()
        )));
    }
    if root.attribute("top").is_some() {
        return Err(WebApiError::configuration(
            "FetchXML with 'top' cannot be paged; remove 'top' or fetch a single page",
        ));
    }

    let start = root.range().start;
    let end = start_tag_end(fetch_xml, start)
        .ok_or_else(|| WebApiError::configuration("FetchXML <fetch> element is not closed"))?;
    let self_closing = if fetch_xml[..end].ends_with('/') { "/" } else { "" };

    let mut rebuilt = String::new();
    for attribute in root.attributes() {
        if PAGING_ATTRIBUTES.contains(&attribute.name()) {
            continue;
        }
        rebuilt.push_str(&format!(
            " {}=\"{}\"",
            attribute.name(),
            quick_xml::escape::escape(attribute.value())
        ));
    }
    rebuilt.push_str(&format!(" page=\"{}\"", page_number.max(1)));
    if let Some(count) = count {
        rebuilt.push_str(&format!(" count=\"{}\"", count));
    }
    if let Some(cookie) = cookie.filter(|c| c.has_cookie()) {
        rebuilt.push_str(&format!(" paging-cookie=\"{}\"", quick_xml::escape::escape(cookie.cookie.as_str())));
    }

    Ok(format!(
        "{}<{}{}{}>{}",
        &fetch_xml[..start],
        root.tag_name().name(),
        rebuilt,
        self_closing,
        &fetch_xml[end + 1..]
    ))
}

/// Byte offset of the `>` closing the start tag at `start`; `>` inside quoted
/// attribute values does not count
fn start_tag_end(xml: &str, start: usize) -> Option<usize> {
    let mut quote = None;
    for (offset, c) in xml[start..].char_indices() {
        match (quote, c) {
            (None, '"' | '\'') => quote = Some(c),
            (Some(open), _) if c == open => quote = None,
            (None, '>') => return Some(start + offset),
            _ => {}
        }
    }
    None
}
