//! Node to index document projection
//!
//! # Fields
//!
//! - identity and metadata: `type.graph.id`, `type.id`, `id`, `code`, `uri`,
//!   `number`, `createdBy`, `createdDate`, `lastModifiedBy`, `lastModifiedDate`
//! - per property: tokenized `properties.{attr}` and `properties.{attr}.{lang}`,
//!   exact `….string` twins, and a lowercased sort value per variant
//! - per reference and referrer: `references.{attr}.id`, `.type.id` and
//!   `.type.graph.id`, plus the attribute-agnostic `references.id` /
//!   `referrers.id`
//!
//! Keyword values longer than `max_term_length` characters are truncated.
//! The full node, referrers included, is stored gzip-compressed as the
//! document payload and is what query hits are rebuilt from.

use crate::index::document::Document;
use crate::index::error::IndexError;
use crate::index::DocumentConverter;
use crate::models::{Node, NodeId};
use crate::query::{fields, SearchQuery};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::BTreeMap;
use std::io::{Read, Write};

pub struct NodeDocumentConverter {
    max_term_length: usize,
}

impl NodeDocumentConverter {
    pub fn new(max_term_length: usize) -> Self {
        Self { max_term_length }
    }

    fn truncate(&self, value: &str) -> String {
        match value.char_indices().nth(self.max_term_length) {
            Some((byte_index, _)) => value[..byte_index].to_string(),
            None => value.to_string(),
        }
    }

    fn add_keyword(&self, doc: &mut Document, field: impl Into<String>, value: &str) {
        doc.add_keyword(field, self.truncate(value));
    }

    fn add_text(&self, doc: &mut Document, field: String, value: &str) {
        let tokens = fields::tokenize(value)
            .into_iter()
            .map(|t| self.truncate(&t))
            .collect();
        doc.add_tokens(field, tokens);
    }

    fn add_neighbors(
        &self,
        doc: &mut Document,
        neighbors: &BTreeMap<String, Vec<NodeId>>,
        referrers: bool,
    ) {
        for (attribute_id, targets) in neighbors {
            let (id_field, type_field, graph_field, any_field) = if referrers {
                (
                    fields::referrer_id(attribute_id),
                    fields::referrer_type_id(attribute_id),
                    fields::referrer_graph_id(attribute_id),
                    fields::ANY_REFERRER_ID,
                )
            } else {
                (
                    fields::reference_id(attribute_id),
                    fields::reference_type_id(attribute_id),
                    fields::reference_graph_id(attribute_id),
                    fields::ANY_REFERENCE_ID,
                )
            };

            for target in targets {
                let id = target.id.to_string();
                self.add_keyword(doc, id_field.as_str(), &id);
                self.add_keyword(doc, type_field.as_str(), &target.type_id.id);
                self.add_keyword(doc, graph_field.as_str(), &target.graph_id().to_string());
                self.add_keyword(doc, any_field, &id);
            }
        }
    }

    fn compress(key: &str, node: &Node) -> Result<Vec<u8>, IndexError> {
        let json = serde_json::to_vec(node).map_err(|e| IndexError::encoding(key, e.to_string()))?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
        encoder
            .write_all(&json)
            .map_err(|e| IndexError::encoding(key, e.to_string()))?;
        encoder
            .finish()
            .map_err(|e| IndexError::encoding(key, e.to_string()))
    }

    fn decompress(key: &str, source: &[u8]) -> Result<Node, IndexError> {
        let mut json = Vec::new();
        GzDecoder::new(source)
            .read_to_end(&mut json)
            .map_err(|e| IndexError::corrupt_document(key, e.to_string()))?;
        serde_json::from_slice(&json).map_err(|e| IndexError::corrupt_document(key, e.to_string()))
    }
}

impl DocumentConverter<NodeId, Node> for NodeDocumentConverter {
    fn document_key(&self, key: &NodeId) -> String {
        key.to_string()
    }

    fn to_document(&self, key: &NodeId, node: &Node) -> Result<Document, IndexError> {
        let doc_key = self.document_key(key);
        let mut doc = Document::new(doc_key.as_str(), Self::compress(&doc_key, node)?);

        self.add_keyword(&mut doc, fields::GRAPH_ID, &key.graph_id().to_string());
        self.add_keyword(&mut doc, fields::TYPE_ID, &key.type_id.id);
        self.add_keyword(&mut doc, fields::ID, &key.id.to_string());
        self.add_keyword(&mut doc, fields::NUMBER, &fields::encode_number(node.number));

        let optional = [
            (fields::CODE, node.code.clone()),
            (fields::URI, node.uri.clone()),
            (fields::CREATED_BY, node.created_by.clone()),
            (fields::LAST_MODIFIED_BY, node.last_modified_by.clone()),
            (fields::CREATED_DATE, node.created_date.as_ref().map(fields::encode_date)),
            (
                fields::LAST_MODIFIED_DATE,
                node.last_modified_date.as_ref().map(fields::encode_date),
            ),
        ];
        for (field, value) in optional {
            if let Some(value) = value {
                self.add_keyword(&mut doc, field, &value);
            }
        }

        for field in [
            fields::NUMBER,
            fields::CODE,
            fields::URI,
            fields::CREATED_BY,
            fields::CREATED_DATE,
            fields::LAST_MODIFIED_BY,
            fields::LAST_MODIFIED_DATE,
        ] {
            if let Some(value) = fields::node_sort_value(node, field) {
                doc.add_sortable(field, self.truncate(&value));
            }
        }

        for (attribute_id, values) in &node.properties {
            for value in values {
                let langs = if value.lang.is_empty() {
                    vec![None]
                } else {
                    vec![None, Some(value.lang.as_str())]
                };
                for lang in langs {
                    self.add_keyword(
                        &mut doc,
                        fields::property_string(attribute_id, lang),
                        &value.value,
                    );
                    self.add_text(&mut doc, fields::property_text(attribute_id, lang), &value.value);
                    doc.add_sortable(
                        fields::property_text(attribute_id, lang),
                        self.truncate(&value.value.to_lowercase()),
                    );
                }
            }
        }

        self.add_neighbors(&mut doc, &node.references, false);
        self.add_neighbors(&mut doc, &node.referrers, true);

        Ok(doc)
    }

    /// Truncate query terms the way stored terms are truncated
    fn normalize_query(&self, query: &SearchQuery) -> SearchQuery {
        match query {
            SearchQuery::Term { field, value } => SearchQuery::Term {
                field: field.clone(),
                value: self.truncate(value),
            },
            SearchQuery::Prefix { field, value } => SearchQuery::Prefix {
                field: field.clone(),
                value: self.truncate(value),
            },
            SearchQuery::Range {
                field,
                lower,
                upper,
            } => SearchQuery::Range {
                field: field.clone(),
                lower: lower.as_deref().map(|l| self.truncate(l)),
                upper: upper.as_deref().map(|u| self.truncate(u)),
            },
            SearchQuery::Bool {
                must,
                should,
                must_not,
            } => SearchQuery::Bool {
                must: must.iter().map(|q| self.normalize_query(q)).collect(),
                should: should.iter().map(|q| self.normalize_query(q)).collect(),
                must_not: must_not.iter().map(|q| self.normalize_query(q)).collect(),
            },
            SearchQuery::MatchAll | SearchQuery::MatchNone => query.clone(),
        }
    }

    fn from_document(&self, doc: &Document) -> Result<(NodeId, Node), IndexError> {
        match Self::decompress(&doc.key, &doc.source) {
            Ok(node) => Ok((node.identifier(), node)),
            Err(e) => {
                tracing::error!("Failed to decode index document {}: {}", doc.key, e);
                Err(e)
            }
        }
    }
}
