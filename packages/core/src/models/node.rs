//! Node Data Structures
//!
//! This module defines the `Node` struct and the identifiers used to address
//! nodes and their individual attribute slots.
//!
//! # Architecture
//!
//! - **Typed identity**: a node is addressed by `(id, type)` where the type is
//!   itself qualified by the graph it lives in
//! - **Multi-valued attributes**: `properties` and `references` map an attribute
//!   id to an ordered list of values
//! - **Derived referrers**: `referrers` is the inverse of other nodes'
//!   references; it is filled on read and never persisted
//!
//! # Examples
//!
//! ```rust
//! use nodegraph_core::models::{LangValue, Node, TypeId};
//! use uuid::Uuid;
//!
//! let person = TypeId::new(Uuid::new_v4(), "Person");
//! let node = Node::new(Uuid::new_v4(), person)
//!     .with_property("name", LangValue::new("en", "Ann"))
//!     .with_property("name", LangValue::new("fi", "Anna"));
//!
//! assert_eq!(node.properties["name"].len(), 2);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Regex accepted for values whose attribute declares no constraint
pub const ANY_REGEX: &str = "(?s)^.*$";

/// Errors raised while parsing identifiers from their string form
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdParseError {
    #[error("Invalid identifier format: {0}")]
    InvalidFormat(String),

    #[error("Invalid UUID in identifier '{input}': {reason}")]
    InvalidUuid { input: String, reason: String },
}

/// Identifies a node type within a graph
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeId {
    pub graph_id: Uuid,
    pub id: String,
}

impl TypeId {
    pub fn new(graph_id: Uuid, id: impl Into<String>) -> Self {
        Self {
            graph_id,
            id: id.into(),
        }
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.graph_id, self.id)
    }
}

/// Identifies a single node: `(graph, type, id)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeId {
    pub id: Uuid,
    pub type_id: TypeId,
}

impl NodeId {
    pub fn new(id: Uuid, type_id: TypeId) -> Self {
        Self { id, type_id }
    }

    pub fn graph_id(&self) -> Uuid {
        self.type_id.graph_id
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.type_id.graph_id, self.type_id.id, self.id)
    }
}

impl FromStr for NodeId {
    type Err = IdParseError;

    /// Parses the `graph:type:id` form produced by `Display`.
    ///
    /// Type ids may themselves contain `:`, so the graph id is split from the
    /// front and the node id from the back.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (graph, rest) = s
            .split_once(':')
            .ok_or_else(|| IdParseError::InvalidFormat(s.to_string()))?;
        let (type_id, id) = rest
            .rsplit_once(':')
            .ok_or_else(|| IdParseError::InvalidFormat(s.to_string()))?;

        if type_id.is_empty() {
            return Err(IdParseError::InvalidFormat(s.to_string()));
        }

        let parse = |value: &str| {
            Uuid::parse_str(value).map_err(|e| IdParseError::InvalidUuid {
                input: s.to_string(),
                reason: e.to_string(),
            })
        };

        Ok(NodeId::new(parse(id)?, TypeId::new(parse(graph)?, type_id)))
    }
}

/// A localized text value together with the regex it was validated against
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LangValue {
    pub lang: String,
    pub value: String,
    pub regex: String,
}

impl LangValue {
    pub fn new(lang: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            lang: lang.into(),
            value: value.into(),
            regex: ANY_REGEX.to_string(),
        }
    }

    pub fn with_regex(mut self, regex: impl Into<String>) -> Self {
        self.regex = regex.into();
        self
    }
}

/// Address of one attribute slot: `(node, attribute, index)`
///
/// `index` is the zero-based position of the value inside the attribute's
/// de-duplicated value list at the time it was written.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeAttributeValueId {
    pub node_id: NodeId,
    pub attribute_id: String,
    pub index: i64,
}

impl NodeAttributeValueId {
    pub fn new(node_id: NodeId, attribute_id: impl Into<String>, index: i64) -> Self {
        Self {
            node_id,
            attribute_id: attribute_id.into(),
            index,
        }
    }
}

/// Node data structure
///
/// # Fields
///
/// - `id` / `type_id`: identity, see [`NodeId`]
/// - `code`, `uri`: optional identifiers, unique within their type and graph
/// - `number`: per-type sequence number assigned on insert
/// - audit quad: creator and last modifier with timestamps
/// - `properties`: attribute id to ordered localized values
/// - `references`: attribute id to ordered target nodes
/// - `referrers`: attribute id to nodes referencing this one (read-only)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: Uuid,

    #[serde(rename = "type")]
    pub type_id: TypeId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,

    #[serde(default)]
    pub number: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_date: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified_by: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified_date: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Vec<LangValue>>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub references: BTreeMap<String, Vec<NodeId>>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub referrers: BTreeMap<String, Vec<NodeId>>,
}

impl Node {
    /// Create an empty node with the given identity
    pub fn new(id: Uuid, type_id: TypeId) -> Self {
        Self {
            id,
            type_id,
            code: None,
            uri: None,
            number: 0,
            created_by: None,
            created_date: None,
            last_modified_by: None,
            last_modified_date: None,
            properties: BTreeMap::new(),
            references: BTreeMap::new(),
            referrers: BTreeMap::new(),
        }
    }

    pub fn identifier(&self) -> NodeId {
        NodeId::new(self.id, self.type_id.clone())
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    pub fn with_number(mut self, number: i64) -> Self {
        self.number = number;
        self
    }

    pub fn with_property(mut self, attribute_id: impl Into<String>, value: LangValue) -> Self {
        self.properties
            .entry(attribute_id.into())
            .or_default()
            .push(value);
        self
    }

    pub fn with_reference(mut self, attribute_id: impl Into<String>, target: NodeId) -> Self {
        self.references
            .entry(attribute_id.into())
            .or_default()
            .push(target);
        self
    }

    /// First value of a property, if any
    pub fn first_property_value(&self, attribute_id: &str) -> Option<&str> {
        self.properties
            .get(attribute_id)
            .and_then(|values| values.first())
            .map(|v| v.value.as_str())
    }

    /// Copy of this node holding only the node-row columns
    ///
    /// Attribute maps are dropped; this is the value stored in the `node` table.
    pub fn without_attributes(&self) -> Node {
        Node {
            properties: BTreeMap::new(),
            references: BTreeMap::new(),
            referrers: BTreeMap::new(),
            ..self.clone()
        }
    }

    /// All node ids this node points at or is pointed at by
    pub fn neighbors(&self) -> impl Iterator<Item = &NodeId> {
        self.references
            .values()
            .chain(self.referrers.values())
            .flatten()
    }
}
