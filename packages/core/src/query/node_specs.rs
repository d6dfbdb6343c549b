//! Node specifications
//!
//! Leaf predicates over `(NodeId, Node)`. SQL renderings refer to the node
//! table as `n` and reach attribute values through `EXISTS` subqueries.

use super::fields;
use super::{SearchQuery, Specification, SqlFragment};
use crate::models::{Node, NodeId, TypeId};
use chrono::{DateTime, Utc};
use libsql::Value;
use uuid::Uuid;

fn text(value: impl Into<String>) -> Value {
    Value::Text(value.into())
}

fn matches_lang(lang: &Option<String>, candidate: &str) -> bool {
    lang.as_deref().map_or(true, |l| l == candidate)
}

const TEXT_VALUE_EXISTS: &str = "EXISTS (SELECT 1 FROM node_text_attribute_value v \
     WHERE v.node_graph_id = n.graph_id AND v.node_type_id = n.type_id AND v.node_id = n.id \
     AND v.attribute_id = ?";

/// `EXISTS` over the node's text values of one attribute plus `condition`
fn text_value_exists(
    attribute_id: &str,
    lang: &Option<String>,
    condition: &str,
    condition_params: Vec<Value>,
) -> SqlFragment {
    let mut clause = TEXT_VALUE_EXISTS.to_string();
    let mut params = vec![text(attribute_id)];
    if let Some(lang) = lang {
        clause.push_str(" AND v.lang = ?");
        params.push(text(lang.as_str()));
    }
    clause.push_str(" AND ");
    clause.push_str(condition);
    clause.push(')');
    params.extend(condition_params);
    SqlFragment::new(clause, params)
}

/// Node with the given identity
#[derive(Debug, Clone)]
pub struct NodeById(pub NodeId);

impl Specification<NodeId, Node> for NodeById {
    fn test(&self, key: &NodeId, _value: &Node) -> bool {
        *key == self.0
    }

    fn sql(&self) -> Option<SqlFragment> {
        Some(SqlFragment::new(
            "n.graph_id = ? AND n.type_id = ? AND n.id = ?",
            vec![
                text(self.0.graph_id().to_string()),
                text(self.0.type_id.id.as_str()),
                text(self.0.id.to_string()),
            ],
        ))
    }

    fn search_query(&self) -> Option<SearchQuery> {
        Some(SearchQuery::must(vec![
            SearchQuery::term(fields::GRAPH_ID, self.0.graph_id().to_string()),
            SearchQuery::term(fields::TYPE_ID, self.0.type_id.id.as_str()),
            SearchQuery::term(fields::ID, self.0.id.to_string()),
        ]))
    }
}

/// Nodes in a graph
#[derive(Debug, Clone)]
pub struct NodesByGraphId(pub Uuid);

impl Specification<NodeId, Node> for NodesByGraphId {
    fn test(&self, key: &NodeId, _value: &Node) -> bool {
        key.graph_id() == self.0
    }

    fn sql(&self) -> Option<SqlFragment> {
        Some(SqlFragment::new("n.graph_id = ?", vec![text(self.0.to_string())]))
    }

    fn search_query(&self) -> Option<SearchQuery> {
        Some(SearchQuery::term(fields::GRAPH_ID, self.0.to_string()))
    }
}

/// Nodes of a type
#[derive(Debug, Clone)]
pub struct NodesByTypeId(pub TypeId);

impl Specification<NodeId, Node> for NodesByTypeId {
    fn test(&self, key: &NodeId, _value: &Node) -> bool {
        key.type_id == self.0
    }

    fn sql(&self) -> Option<SqlFragment> {
        Some(SqlFragment::new(
            "n.graph_id = ? AND n.type_id = ?",
            vec![text(self.0.graph_id.to_string()), text(self.0.id.as_str())],
        ))
    }

    fn search_query(&self) -> Option<SearchQuery> {
        Some(SearchQuery::must(vec![
            SearchQuery::term(fields::GRAPH_ID, self.0.graph_id.to_string()),
            SearchQuery::term(fields::TYPE_ID, self.0.id.as_str()),
        ]))
    }
}

#[derive(Debug, Clone)]
pub struct NodesByCode(pub String);

impl Specification<NodeId, Node> for NodesByCode {
    fn test(&self, _key: &NodeId, value: &Node) -> bool {
        value.code.as_deref() == Some(self.0.as_str())
    }

    fn sql(&self) -> Option<SqlFragment> {
        Some(SqlFragment::new("n.code = ?", vec![text(self.0.as_str())]))
    }

    fn search_query(&self) -> Option<SearchQuery> {
        Some(SearchQuery::term(fields::CODE, self.0.as_str()))
    }
}

#[derive(Debug, Clone)]
pub struct NodesByUri(pub String);

impl Specification<NodeId, Node> for NodesByUri {
    fn test(&self, _key: &NodeId, value: &Node) -> bool {
        value.uri.as_deref() == Some(self.0.as_str())
    }

    fn sql(&self) -> Option<SqlFragment> {
        Some(SqlFragment::new("n.uri = ?", vec![text(self.0.as_str())]))
    }

    fn search_query(&self) -> Option<SearchQuery> {
        Some(SearchQuery::term(fields::URI, self.0.as_str()))
    }
}

#[derive(Debug, Clone)]
pub struct NodesByNumber(pub i64);

impl Specification<NodeId, Node> for NodesByNumber {
    fn test(&self, _key: &NodeId, value: &Node) -> bool {
        value.number == self.0
    }

    fn sql(&self) -> Option<SqlFragment> {
        Some(SqlFragment::new("n.number = ?", vec![Value::Integer(self.0)]))
    }

    fn search_query(&self) -> Option<SearchQuery> {
        Some(SearchQuery::term(fields::NUMBER, fields::encode_number(self.0)))
    }
}

/// Nodes having a property value equal to `value`, optionally in `lang`
#[derive(Debug, Clone)]
pub struct NodesByProperty {
    pub attribute_id: String,
    pub lang: Option<String>,
    pub value: String,
}

impl NodesByProperty {
    pub fn new(attribute_id: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            attribute_id: attribute_id.into(),
            lang: None,
            value: value.into(),
        }
    }

    pub fn in_lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = Some(lang.into());
        self
    }
}

impl Specification<NodeId, Node> for NodesByProperty {
    fn test(&self, _key: &NodeId, value: &Node) -> bool {
        value
            .properties
            .get(&self.attribute_id)
            .map_or(false, |values| {
                values
                    .iter()
                    .any(|v| matches_lang(&self.lang, &v.lang) && v.value == self.value)
            })
    }

    fn sql(&self) -> Option<SqlFragment> {
        Some(text_value_exists(
            &self.attribute_id,
            &self.lang,
            "v.value = ?",
            vec![text(self.value.as_str())],
        ))
    }

    fn search_query(&self) -> Option<SearchQuery> {
        Some(SearchQuery::term(
            fields::property_string(&self.attribute_id, self.lang.as_deref()),
            self.value.as_str(),
        ))
    }
}

/// Nodes having a property value starting with `prefix`
#[derive(Debug, Clone)]
pub struct NodesByPropertyPrefix {
    pub attribute_id: String,
    pub lang: Option<String>,
    pub prefix: String,
}

impl NodesByPropertyPrefix {
    pub fn new(attribute_id: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            attribute_id: attribute_id.into(),
            lang: None,
            prefix: prefix.into(),
        }
    }
}

impl Specification<NodeId, Node> for NodesByPropertyPrefix {
    fn test(&self, _key: &NodeId, value: &Node) -> bool {
        value
            .properties
            .get(&self.attribute_id)
            .map_or(false, |values| {
                values
                    .iter()
                    .any(|v| matches_lang(&self.lang, &v.lang) && v.value.starts_with(&self.prefix))
            })
    }

    fn sql(&self) -> Option<SqlFragment> {
        // substr avoids LIKE wildcard escaping
        Some(text_value_exists(
            &self.attribute_id,
            &self.lang,
            "substr(v.value, 1, length(?)) = ?",
            vec![text(self.prefix.as_str()), text(self.prefix.as_str())],
        ))
    }

    fn search_query(&self) -> Option<SearchQuery> {
        Some(SearchQuery::Prefix {
            field: fields::property_string(&self.attribute_id, self.lang.as_deref()),
            value: self.prefix.clone(),
        })
    }
}

/// Nodes having a property value within an inclusive string range
#[derive(Debug, Clone)]
pub struct NodesByPropertyStringRange {
    pub attribute_id: String,
    pub lang: Option<String>,
    pub lower: Option<String>,
    pub upper: Option<String>,
}

impl NodesByPropertyStringRange {
    pub fn new(
        attribute_id: impl Into<String>,
        lower: Option<String>,
        upper: Option<String>,
    ) -> Self {
        Self {
            attribute_id: attribute_id.into(),
            lang: None,
            lower,
            upper,
        }
    }

    fn in_range(&self, value: &str) -> bool {
        self.lower.as_deref().map_or(true, |l| value >= l)
            && self.upper.as_deref().map_or(true, |u| value <= u)
    }
}

impl Specification<NodeId, Node> for NodesByPropertyStringRange {
    fn test(&self, _key: &NodeId, value: &Node) -> bool {
        value
            .properties
            .get(&self.attribute_id)
            .map_or(false, |values| {
                values
                    .iter()
                    .any(|v| matches_lang(&self.lang, &v.lang) && self.in_range(&v.value))
            })
    }

    fn sql(&self) -> Option<SqlFragment> {
        let mut conditions = vec!["1 = 1".to_string()];
        let mut params = Vec::new();
        if let Some(lower) = &self.lower {
            conditions.push("v.value >= ?".to_string());
            params.push(text(lower.as_str()));
        }
        if let Some(upper) = &self.upper {
            conditions.push("v.value <= ?".to_string());
            params.push(text(upper.as_str()));
        }
        Some(text_value_exists(
            &self.attribute_id,
            &self.lang,
            &conditions.join(" AND "),
            params,
        ))
    }

    fn search_query(&self) -> Option<SearchQuery> {
        Some(SearchQuery::Range {
            field: fields::property_string(&self.attribute_id, self.lang.as_deref()),
            lower: self.lower.clone(),
            upper: self.upper.clone(),
        })
    }
}

/// Nodes whose tokenized property text contains `token`; index only
#[derive(Debug, Clone)]
pub struct NodesByPropertyToken {
    pub attribute_id: String,
    pub lang: Option<String>,
    pub token: String,
}

impl NodesByPropertyToken {
    pub fn new(attribute_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            attribute_id: attribute_id.into(),
            lang: None,
            token: token.into().to_lowercase(),
        }
    }
}

impl Specification<NodeId, Node> for NodesByPropertyToken {
    fn test(&self, _key: &NodeId, value: &Node) -> bool {
        value
            .properties
            .get(&self.attribute_id)
            .map_or(false, |values| {
                values.iter().any(|v| {
                    matches_lang(&self.lang, &v.lang)
                        && fields::tokenize(&v.value).contains(&self.token)
                })
            })
    }

    fn search_query(&self) -> Option<SearchQuery> {
        Some(SearchQuery::term(
            fields::property_text(&self.attribute_id, self.lang.as_deref()),
            self.token.as_str(),
        ))
    }
}

/// Nodes referencing `target`; through `attribute_id`, or any attribute if `None`
#[derive(Debug, Clone)]
pub struct NodesByReference {
    pub attribute_id: Option<String>,
    pub target: Uuid,
}

impl NodesByReference {
    pub fn new(attribute_id: impl Into<String>, target: Uuid) -> Self {
        Self {
            attribute_id: Some(attribute_id.into()),
            target,
        }
    }

    pub fn any(target: Uuid) -> Self {
        Self {
            attribute_id: None,
            target,
        }
    }
}

impl Specification<NodeId, Node> for NodesByReference {
    fn test(&self, _key: &NodeId, value: &Node) -> bool {
        value.references.iter().any(|(attribute_id, targets)| {
            self.attribute_id.as_ref().map_or(true, |a| a == attribute_id)
                && targets.iter().any(|t| t.id == self.target)
        })
    }

    fn sql(&self) -> Option<SqlFragment> {
        let mut clause = "EXISTS (SELECT 1 FROM node_reference_attribute_value r \
             WHERE r.node_graph_id = n.graph_id AND r.node_type_id = n.type_id AND r.node_id = n.id"
            .to_string();
        let mut params = Vec::new();
        if let Some(attribute_id) = &self.attribute_id {
            clause.push_str(" AND r.attribute_id = ?");
            params.push(text(attribute_id.as_str()));
        }
        clause.push_str(" AND r.value_id = ?)");
        params.push(text(self.target.to_string()));
        Some(SqlFragment::new(clause, params))
    }

    fn search_query(&self) -> Option<SearchQuery> {
        let field = match &self.attribute_id {
            Some(attribute_id) => fields::reference_id(attribute_id),
            None => fields::ANY_REFERENCE_ID.to_string(),
        };
        Some(SearchQuery::term(field, self.target.to_string()))
    }
}

/// Nodes referenced by `source`; through `attribute_id`, or any attribute if `None`
#[derive(Debug, Clone)]
pub struct NodesByReferrer {
    pub attribute_id: Option<String>,
    pub source: Uuid,
}

impl NodesByReferrer {
    pub fn new(attribute_id: impl Into<String>, source: Uuid) -> Self {
        Self {
            attribute_id: Some(attribute_id.into()),
            source,
        }
    }

    pub fn any(source: Uuid) -> Self {
        Self {
            attribute_id: None,
            source,
        }
    }
}

impl Specification<NodeId, Node> for NodesByReferrer {
    fn test(&self, _key: &NodeId, value: &Node) -> bool {
        value.referrers.iter().any(|(attribute_id, sources)| {
            self.attribute_id.as_ref().map_or(true, |a| a == attribute_id)
                && sources.iter().any(|s| s.id == self.source)
        })
    }

    fn sql(&self) -> Option<SqlFragment> {
        let mut clause = "EXISTS (SELECT 1 FROM node_reference_attribute_value r \
             WHERE r.value_graph_id = n.graph_id AND r.value_type_id = n.type_id AND r.value_id = n.id"
            .to_string();
        let mut params = Vec::new();
        if let Some(attribute_id) = &self.attribute_id {
            clause.push_str(" AND r.attribute_id = ?");
            params.push(text(attribute_id.as_str()));
        }
        clause.push_str(" AND r.node_id = ?)");
        params.push(text(self.source.to_string()));
        Some(SqlFragment::new(clause, params))
    }

    fn search_query(&self) -> Option<SearchQuery> {
        let field = match &self.attribute_id {
            Some(attribute_id) => fields::referrer_id(attribute_id),
            None => fields::ANY_REFERRER_ID.to_string(),
        };
        Some(SearchQuery::term(field, self.source.to_string()))
    }
}

/// Nodes last modified within an inclusive time range
#[derive(Debug, Clone)]
pub struct NodesByLastModifiedDate {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl Specification<NodeId, Node> for NodesByLastModifiedDate {
    fn test(&self, _key: &NodeId, value: &Node) -> bool {
        match &value.last_modified_date {
            // compare in the stored precision
            Some(date) => {
                let encoded = fields::encode_date(date);
                self.from
                    .as_ref()
                    .map_or(true, |f| encoded >= fields::encode_date(f))
                    && self
                        .to
                        .as_ref()
                        .map_or(true, |t| encoded <= fields::encode_date(t))
            }
            None => false,
        }
    }

    fn sql(&self) -> Option<SqlFragment> {
        let mut conditions = vec!["n.last_modified_date IS NOT NULL".to_string()];
        let mut params = Vec::new();
        if let Some(from) = &self.from {
            conditions.push("n.last_modified_date >= ?".to_string());
            params.push(text(fields::encode_date(from)));
        }
        if let Some(to) = &self.to {
            conditions.push("n.last_modified_date <= ?".to_string());
            params.push(text(fields::encode_date(to)));
        }
        Some(SqlFragment::new(conditions.join(" AND "), params))
    }

    fn search_query(&self) -> Option<SearchQuery> {
        Some(SearchQuery::Range {
            field: fields::LAST_MODIFIED_DATE.to_string(),
            lower: self.from.as_ref().map(fields::encode_date),
            upper: self.to.as_ref().map(fields::encode_date),
        })
    }
}
