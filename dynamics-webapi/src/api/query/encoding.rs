//! Percent-encoding for OData query option values
//!
//! Values are encoded per RFC 3986 query rules. The OData delimiters that may
//! legally appear inside a query component (`,` `(` `)` `'` `$` `=` `@` `:` `/` `*` `;`)
//! are left as-is so rendered URLs stay readable; everything that would
//! change how the query string splits (`&`, `+`, `#`, `%`, whitespace) is escaped.

/// Characters that are kept verbatim in addition to RFC 3986 unreserved ones
const ODATA_SAFE: &[u8] = b",()'$=@:/*;!";

/// Encode a single query option value.
pub fn encode_query_value(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for ch in value.chars() {
        if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '.' | '_' | '~') {
            encoded.push(ch);
        } else if ch.is_ascii() && ODATA_SAFE.contains(&(ch as u8)) {
            encoded.push(ch);
        } else {
            let mut buf = [0u8; 4];
            encoded.push_str(&urlencoding::encode(ch.encode_utf8(&mut buf)));
        }
    }
    encoded
}

/// Encode a value destined for a parameter alias or `fetchXml=`: nothing but
/// unreserved characters survive.
pub fn encode_strict(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}
