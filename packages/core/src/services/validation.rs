//! Pre-flight validation and normalization of nodes about to be saved
//!
//! Runs before any row of a batch is written. A single invalid node rejects
//! the whole batch with `BadRequest`.

use crate::models::{LangValue, Node, NodeId, Principal, TypeDef, TypeId};
use crate::services::error::NodeServiceError;
use crate::services::type_resolver::TypeResolver;
use regex::Regex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// Remove duplicate values per attribute, keeping the first occurrence
///
/// Attributes left without values are dropped. The result determines the
/// value index of every slot.
pub fn normalize(mut node: Node) -> Node {
    node.properties = node
        .properties
        .into_iter()
        .filter_map(|(attribute_id, values)| {
            let mut seen = HashSet::new();
            let values: Vec<LangValue> = values
                .into_iter()
                .filter(|v| seen.insert((v.lang.clone(), v.value.clone())))
                .collect();
            (!values.is_empty()).then_some((attribute_id, values))
        })
        .collect();

    node.references = node
        .references
        .into_iter()
        .filter_map(|(attribute_id, targets)| {
            let mut seen = HashSet::new();
            let targets: Vec<NodeId> = targets
                .into_iter()
                .filter(|t| seen.insert(t.clone()))
                .collect();
            (!targets.is_empty()).then_some((attribute_id, targets))
        })
        .collect();

    node.referrers = BTreeMap::new();
    node
}

/// Nodes ready to be written plus the reference targets they need
#[derive(Debug, Default)]
pub struct ValidatedBatch {
    pub nodes: Vec<Node>,
    pub targets: HashSet<NodeId>,
}

pub struct NodeValidator {
    resolver: Arc<dyn TypeResolver>,
}

impl NodeValidator {
    pub fn new(resolver: Arc<dyn TypeResolver>) -> Self {
        Self { resolver }
    }

    /// Check every node against its type and normalize it
    ///
    /// Text values get the validating regex of their attribute attached.
    /// Reference targets are checked for their range type here; whether they
    /// exist is left to the caller, which sees the store.
    pub async fn validate(
        &self,
        nodes: Vec<Node>,
        principal: &Principal,
    ) -> Result<ValidatedBatch, NodeServiceError> {
        let mut types: HashMap<TypeId, TypeDef> = HashMap::new();
        let mut regexes: HashMap<String, Regex> = HashMap::new();
        let mut keys = HashSet::new();
        let mut batch = ValidatedBatch::default();

        for node in nodes {
            let node = normalize(node);
            let key = node.identifier();
            if !keys.insert(key.clone()) {
                return Err(NodeServiceError::bad_request(format!(
                    "Node {} appears more than once in one batch",
                    key
                )));
            }

            if !types.contains_key(&node.type_id) {
                let type_def = self
                    .resolver
                    .resolve(&node.type_id, principal)
                    .await?
                    .ok_or_else(|| {
                        NodeServiceError::bad_request(format!("Unknown type {}", node.type_id))
                    })?;
                types.insert(node.type_id.clone(), type_def);
            }
            let type_def = &types[&node.type_id];

            let node = Self::check_properties(node, type_def, &mut regexes)?;
            for (attribute_id, targets) in &node.references {
                let attribute = type_def.reference_attribute(attribute_id).ok_or_else(|| {
                    NodeServiceError::bad_request(format!(
                        "Reference attribute {} is not declared on type {}",
                        attribute_id, type_def.id
                    ))
                })?;
                for target in targets {
                    if target.type_id != attribute.range {
                        return Err(NodeServiceError::bad_request(format!(
                            "Reference {}.{} expects {} but got {}",
                            key, attribute_id, attribute.range, target
                        )));
                    }
                    batch.targets.insert(target.clone());
                }
            }
            batch.nodes.push(node);
        }

        Ok(batch)
    }

    fn check_properties(
        mut node: Node,
        type_def: &TypeDef,
        regexes: &mut HashMap<String, Regex>,
    ) -> Result<Node, NodeServiceError> {
        for (attribute_id, values) in node.properties.iter_mut() {
            let attribute = type_def.text_attribute(attribute_id).ok_or_else(|| {
                NodeServiceError::bad_request(format!(
                    "Text attribute {} is not declared on type {}",
                    attribute_id, type_def.id
                ))
            })?;

            if !regexes.contains_key(&attribute.regex) {
                let compiled = Regex::new(&format!("^(?:{})$", attribute.regex)).map_err(|e| {
                    NodeServiceError::bad_request(format!(
                        "Invalid regex on attribute {}: {}",
                        attribute_id, e
                    ))
                })?;
                regexes.insert(attribute.regex.clone(), compiled);
            }
            let regex = &regexes[&attribute.regex];

            for value in values.iter_mut() {
                if !regex.is_match(&value.value) {
                    return Err(NodeServiceError::bad_request(format!(
                        "Value '{}' of {} does not match {}",
                        value.value, attribute_id, attribute.regex
                    )));
                }
                value.regex = attribute.regex.clone();
            }
        }
        Ok(node)
    }
}
