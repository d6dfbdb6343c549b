//! Index field names and value encodings
//!
//! Shared by the node specifications, which query these fields, and by the
//! document converter, which fills them.

use crate::models::Node;
use chrono::{DateTime, SecondsFormat, Utc};

pub const GRAPH_ID: &str = "type.graph.id";
pub const TYPE_ID: &str = "type.id";
pub const ID: &str = "id";
pub const CODE: &str = "code";
pub const URI: &str = "uri";
pub const NUMBER: &str = "number";
pub const CREATED_BY: &str = "createdBy";
pub const CREATED_DATE: &str = "createdDate";
pub const LAST_MODIFIED_BY: &str = "lastModifiedBy";
pub const LAST_MODIFIED_DATE: &str = "lastModifiedDate";

/// Wildcard over every reference attribute
pub const ANY_REFERENCE_ID: &str = "references.id";
/// Wildcard over every referrer attribute
pub const ANY_REFERRER_ID: &str = "referrers.id";

fn property_base(attribute_id: &str, lang: Option<&str>) -> String {
    match lang {
        Some(lang) if !lang.is_empty() => format!("properties.{}.{}", attribute_id, lang),
        _ => format!("properties.{}", attribute_id),
    }
}

/// Tokenized text field; also the sort field name for the property
pub fn property_text(attribute_id: &str, lang: Option<&str>) -> String {
    property_base(attribute_id, lang)
}

/// Exact-value keyword field
pub fn property_string(attribute_id: &str, lang: Option<&str>) -> String {
    format!("{}.string", property_base(attribute_id, lang))
}

pub fn reference_id(attribute_id: &str) -> String {
    format!("references.{}.id", attribute_id)
}

pub fn reference_type_id(attribute_id: &str) -> String {
    format!("references.{}.type.id", attribute_id)
}

pub fn reference_graph_id(attribute_id: &str) -> String {
    format!("references.{}.type.graph.id", attribute_id)
}

pub fn referrer_id(attribute_id: &str) -> String {
    format!("referrers.{}.id", attribute_id)
}

pub fn referrer_type_id(attribute_id: &str) -> String {
    format!("referrers.{}.type.id", attribute_id)
}

pub fn referrer_graph_id(attribute_id: &str) -> String {
    format!("referrers.{}.type.graph.id", attribute_id)
}

/// Zero-padded so that term order equals numeric order
pub fn encode_number(number: i64) -> String {
    format!("{:020}", number)
}

/// RFC 3339 with millisecond precision in UTC; term order equals time order.
/// The relational store keeps dates in the same form.
pub fn encode_date(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Lowercased alphanumeric runs
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_lowercase())
        .collect()
}

/// Sort value of `node` for a sort field name
///
/// Property sort fields (`properties.{attr}` or `properties.{attr}.{lang}`)
/// use the lowercased first value, optionally restricted to one language.
pub fn node_sort_value(node: &Node, field: &str) -> Option<String> {
    match field {
        NUMBER => Some(encode_number(node.number)),
        CODE => node.code.clone(),
        URI => node.uri.clone(),
        CREATED_BY => node.created_by.clone(),
        CREATED_DATE => node.created_date.as_ref().map(encode_date),
        LAST_MODIFIED_BY => node.last_modified_by.clone(),
        LAST_MODIFIED_DATE => node.last_modified_date.as_ref().map(encode_date),
        _ => {
            let property = field.strip_prefix("properties.")?;
            let (attribute_id, lang) = match property.split_once('.') {
                Some((attribute_id, lang)) => (attribute_id, Some(lang)),
                None => (property, None),
            };
            node.properties
                .get(attribute_id)?
                .iter()
                .find(|v| lang.map_or(true, |l| v.lang == l))
                .map(|v| v.value.to_lowercase())
        }
    }
}
