//! Row mappers for the store's tables
//!
//! UUIDs are stored as hyphenated text, dates as RFC 3339 text with
//! millisecond precision so that lexical order equals time order.

use crate::db::dao::{get_integer, get_opt_text, get_text, get_uuid, RowMapper};
use crate::db::error::DatabaseError;
use crate::models::{LangValue, Node, NodeAttributeValueId, NodeId, Revision, TypeId};
use crate::query::fields::encode_date;
use chrono::{DateTime, Utc};
use libsql::{Row, Value};

fn text(value: impl Into<String>) -> Value {
    Value::Text(value.into())
}

fn opt_text(value: Option<&str>) -> Value {
    value.map_or(Value::Null, |v| Value::Text(v.to_string()))
}

fn opt_date(value: Option<&DateTime<Utc>>) -> Value {
    value.map_or(Value::Null, |d| Value::Text(encode_date(d)))
}

fn parse_date(raw: &str, table: &str, idx: i32) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| DatabaseError::row_mapping(table, idx, e.to_string()))
}

fn get_opt_date(row: &Row, idx: i32, table: &str) -> Result<Option<DateTime<Utc>>, DatabaseError> {
    get_opt_text(row, idx, table)?
        .map(|raw| parse_date(&raw, table, idx))
        .transpose()
}

fn node_id_params(node_id: &NodeId) -> Vec<Value> {
    vec![
        text(node_id.graph_id().to_string()),
        text(node_id.type_id.id.as_str()),
        text(node_id.id.to_string()),
    ]
}

fn map_node_id(row: &Row, offset: i32, table: &str) -> Result<NodeId, DatabaseError> {
    let graph_id = get_uuid(row, offset, table)?;
    let type_id = get_text(row, offset + 1, table)?;
    let id = get_uuid(row, offset + 2, table)?;
    Ok(NodeId::new(id, TypeId::new(graph_id, type_id)))
}

fn value_id_params(key: &NodeAttributeValueId) -> Vec<Value> {
    let mut params = node_id_params(&key.node_id);
    params.push(text(key.attribute_id.as_str()));
    params.push(Value::Integer(key.index));
    params
}

fn map_value_id(row: &Row, table: &str) -> Result<NodeAttributeValueId, DatabaseError> {
    let node_id = map_node_id(row, 0, table)?;
    let attribute_id = get_text(row, 3, table)?;
    let index = get_integer(row, 4, table)?;
    Ok(NodeAttributeValueId::new(node_id, attribute_id, index))
}

const VALUE_KEY_COLUMNS: &[&str] = &[
    "node_graph_id",
    "node_type_id",
    "node_id",
    "attribute_id",
    "value_index",
];

/// `node` rows: node metadata without attribute values
pub struct NodeRowMapper;

impl RowMapper for NodeRowMapper {
    type Key = NodeId;
    type Value = Node;

    const TABLE: &'static str = "node";
    const ALIAS: &'static str = "n";
    const KEY_COLUMNS: &'static [&'static str] = &["graph_id", "type_id", "id"];
    const VALUE_COLUMNS: &'static [&'static str] = &[
        "code",
        "uri",
        "number",
        "created_by",
        "created_date",
        "last_modified_by",
        "last_modified_date",
    ];

    fn key_params(key: &NodeId) -> Vec<Value> {
        node_id_params(key)
    }

    fn value_params(node: &Node) -> Vec<Value> {
        vec![
            opt_text(node.code.as_deref()),
            opt_text(node.uri.as_deref()),
            Value::Integer(node.number),
            opt_text(node.created_by.as_deref()),
            opt_date(node.created_date.as_ref()),
            opt_text(node.last_modified_by.as_deref()),
            opt_date(node.last_modified_date.as_ref()),
        ]
    }

    fn map_key(row: &Row) -> Result<NodeId, DatabaseError> {
        map_node_id(row, 0, Self::TABLE)
    }

    fn map_value(key: &NodeId, row: &Row, offset: i32) -> Result<Node, DatabaseError> {
        let table = Self::TABLE;
        let mut node = Node::new(key.id, key.type_id.clone());
        node.code = get_opt_text(row, offset, table)?;
        node.uri = get_opt_text(row, offset + 1, table)?;
        node.number = get_integer(row, offset + 2, table)?;
        node.created_by = get_opt_text(row, offset + 3, table)?;
        node.created_date = get_opt_date(row, offset + 4, table)?;
        node.last_modified_by = get_opt_text(row, offset + 5, table)?;
        node.last_modified_date = get_opt_date(row, offset + 6, table)?;
        Ok(node)
    }
}

/// `node_text_attribute_value` rows
pub struct TextValueMapper;

impl RowMapper for TextValueMapper {
    type Key = NodeAttributeValueId;
    type Value = LangValue;

    const TABLE: &'static str = "node_text_attribute_value";
    const ALIAS: &'static str = "v";
    const KEY_COLUMNS: &'static [&'static str] = VALUE_KEY_COLUMNS;
    const VALUE_COLUMNS: &'static [&'static str] = &["lang", "value", "regex"];

    fn key_params(key: &NodeAttributeValueId) -> Vec<Value> {
        value_id_params(key)
    }

    fn value_params(value: &LangValue) -> Vec<Value> {
        vec![
            text(value.lang.as_str()),
            text(value.value.as_str()),
            text(value.regex.as_str()),
        ]
    }

    fn map_key(row: &Row) -> Result<NodeAttributeValueId, DatabaseError> {
        map_value_id(row, Self::TABLE)
    }

    fn map_value(
        _key: &NodeAttributeValueId,
        row: &Row,
        offset: i32,
    ) -> Result<LangValue, DatabaseError> {
        Ok(LangValue {
            lang: get_text(row, offset, Self::TABLE)?,
            value: get_text(row, offset + 1, Self::TABLE)?,
            regex: get_text(row, offset + 2, Self::TABLE)?,
        })
    }
}

/// `node_reference_attribute_value` rows; the value is the target node
pub struct ReferenceValueMapper;

impl RowMapper for ReferenceValueMapper {
    type Key = NodeAttributeValueId;
    type Value = NodeId;

    const TABLE: &'static str = "node_reference_attribute_value";
    const ALIAS: &'static str = "r";
    const KEY_COLUMNS: &'static [&'static str] = VALUE_KEY_COLUMNS;
    const VALUE_COLUMNS: &'static [&'static str] = &["value_graph_id", "value_type_id", "value_id"];

    fn key_params(key: &NodeAttributeValueId) -> Vec<Value> {
        value_id_params(key)
    }

    fn value_params(value: &NodeId) -> Vec<Value> {
        node_id_params(value)
    }

    fn map_key(row: &Row) -> Result<NodeAttributeValueId, DatabaseError> {
        map_value_id(row, Self::TABLE)
    }

    fn map_value(
        _key: &NodeAttributeValueId,
        row: &Row,
        offset: i32,
    ) -> Result<NodeId, DatabaseError> {
        map_node_id(row, offset, Self::TABLE)
    }
}

/// `revision` rows
pub struct RevisionMapper;

impl RowMapper for RevisionMapper {
    type Key = i64;
    type Value = Revision;

    const TABLE: &'static str = "revision";
    const ALIAS: &'static str = "rv";
    const KEY_COLUMNS: &'static [&'static str] = &["number"];
    const VALUE_COLUMNS: &'static [&'static str] = &["author", "date"];

    fn key_params(key: &i64) -> Vec<Value> {
        vec![Value::Integer(*key)]
    }

    fn value_params(value: &Revision) -> Vec<Value> {
        vec![text(value.author.as_str()), text(encode_date(&value.date))]
    }

    fn map_key(row: &Row) -> Result<i64, DatabaseError> {
        get_integer(row, 0, Self::TABLE)
    }

    fn map_value(key: &i64, row: &Row, offset: i32) -> Result<Revision, DatabaseError> {
        let author = get_text(row, offset, Self::TABLE)?;
        let raw_date = get_text(row, offset + 1, Self::TABLE)?;
        let date = parse_date(&raw_date, Self::TABLE, offset + 1)?;
        Ok(Revision::new(*key, author, date))
    }
}
