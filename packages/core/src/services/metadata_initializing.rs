//! Node metadata initialization
//!
//! On insert a node gets the next number of its type's sequence, a generated
//! code and URI when enabled and free, and creator plus modifier stamps. On
//! update the stored number and creator stamps are kept, missing codes and
//! URIs fall back to the stored ones, and modifier stamps are renewed.
//!
//! Generated URIs use the first namespace found in the write options, the
//! graph's configured namespace, or the store default. Under a configured
//! namespace the URI suffix is the node code, falling back to the id; under
//! the default namespace it is always the id.

use crate::db::{node_sequence_name, SequenceService};
use crate::models::{Node, NodeId, Principal, TypeId};
use crate::query::{and, relational, NodesByCode, NodesByGraphId, NodesByTypeId, NodesByUri, Query, SpecRef};
use crate::services::error::NodeServiceError;
use crate::services::revision_service::truncate_to_millis;
use crate::services::service::{SaveMode, Service, WriteOptions};
use crate::services::type_resolver::TypeResolver;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

pub struct MetadataInitializingNodeService {
    delegate: Arc<dyn Service<NodeId, Node>>,
    resolver: Arc<dyn TypeResolver>,
    sequences: Arc<dyn SequenceService>,
    default_namespace: String,
}

/// Codes and URIs handed out earlier in the same batch
#[derive(Default)]
struct Claimed {
    codes: HashSet<(TypeId, String)>,
    uris: HashSet<(Uuid, String)>,
}

impl MetadataInitializingNodeService {
    pub fn new(
        delegate: Arc<dyn Service<NodeId, Node>>,
        resolver: Arc<dyn TypeResolver>,
        sequences: Arc<dyn SequenceService>,
        default_namespace: impl Into<String>,
    ) -> Self {
        Self {
            delegate,
            resolver,
            sequences,
            default_namespace: default_namespace.into(),
        }
    }

    fn probe() -> Principal {
        Principal::internal("metadata")
    }

    async fn in_use(&self, spec: SpecRef<NodeId, Node>) -> Result<bool, NodeServiceError> {
        let query = Query::new(relational(spec)).with_max(1);
        Ok(!self.delegate.keys(&query, &Self::probe()).await?.is_empty())
    }

    async fn code_is_free(&self, type_id: &TypeId, code: &str, claimed: &Claimed) -> Result<bool, NodeServiceError> {
        if claimed.codes.contains(&(type_id.clone(), code.to_string())) {
            return Ok(false);
        }
        let spec = and(vec![
            Arc::new(NodesByTypeId(type_id.clone())) as SpecRef<NodeId, Node>,
            Arc::new(NodesByCode(code.to_string())),
        ]);
        Ok(!self.in_use(spec).await?)
    }

    async fn uri_is_free(&self, graph_id: Uuid, uri: &str, claimed: &Claimed) -> Result<bool, NodeServiceError> {
        if claimed.uris.contains(&(graph_id, uri.to_string())) {
            return Ok(false);
        }
        let spec = and(vec![
            Arc::new(NodesByGraphId(graph_id)) as SpecRef<NodeId, Node>,
            Arc::new(NodesByUri(uri.to_string())),
        ]);
        Ok(!self.in_use(spec).await?)
    }

    async fn generate_code(
        &self,
        node: &Node,
        principal: &Principal,
        claimed: &Claimed,
    ) -> Result<Option<String>, NodeServiceError> {
        let type_def = match self.resolver.resolve(&node.type_id, principal).await? {
            Some(type_def) => type_def,
            None => return Ok(None),
        };
        let code = format!("{}{}", type_def.node_code_prefix_or_default(), node.number);
        if self.code_is_free(&node.type_id, &code, claimed).await? {
            Ok(Some(code))
        } else {
            Ok(None)
        }
    }

    async fn generate_uri(
        &self,
        node: &Node,
        opts: &WriteOptions,
        claimed: &Claimed,
    ) -> Result<Option<String>, NodeServiceError> {
        let graph_id = node.type_id.graph_id;
        let configured = match &opts.uri_namespace {
            Some(namespace) => Some(namespace.clone()),
            None => self.resolver.graph_namespace(graph_id).await?,
        };
        let uri = match configured {
            Some(namespace) => {
                let suffix = node.code.clone().unwrap_or_else(|| node.id.to_string());
                format!("{}{}", namespace, suffix)
            }
            None => format!("{}{}", self.default_namespace, node.id),
        };
        if self.uri_is_free(graph_id, &uri, claimed).await? {
            Ok(Some(uri))
        } else {
            Ok(None)
        }
    }

    async fn initialize_new(
        &self,
        mut node: Node,
        opts: &WriteOptions,
        principal: &Principal,
        claimed: &mut Claimed,
    ) -> Result<Node, NodeServiceError> {
        let now = truncate_to_millis(Utc::now());
        node.number = self
            .sequences
            .get_and_advance(&node_sequence_name(&node.type_id))
            .await?;
        node.created_by = Some(principal.username.clone());
        node.created_date = Some(now);
        node.last_modified_by = Some(principal.username.clone());
        node.last_modified_date = Some(now);

        if node.code.is_none() && opts.generate_codes {
            node.code = self.generate_code(&node, principal, claimed).await?;
        }
        if node.uri.is_none() && opts.generate_uris {
            node.uri = self.generate_uri(&node, opts, claimed).await?;
        }

        if let Some(code) = &node.code {
            claimed.codes.insert((node.type_id.clone(), code.clone()));
        }
        if let Some(uri) = &node.uri {
            claimed.uris.insert((node.type_id.graph_id, uri.clone()));
        }
        Ok(node)
    }

    fn initialize_existing(mut node: Node, stored: Node, principal: &Principal) -> Node {
        node.number = stored.number;
        node.created_by = stored.created_by;
        node.created_date = stored.created_date;
        node.code = node.code.or(stored.code);
        node.uri = node.uri.or(stored.uri);
        node.last_modified_by = Some(principal.username.clone());
        node.last_modified_date = Some(truncate_to_millis(Utc::now()));
        node
    }
}

#[async_trait]
impl Service<NodeId, Node> for MetadataInitializingNodeService {
    async fn save_and_delete(
        &self,
        saves: Vec<Node>,
        deletes: Vec<NodeId>,
        mode: SaveMode,
        opts: &WriteOptions,
        principal: &Principal,
    ) -> Result<Vec<NodeId>, NodeServiceError> {
        let deleted: HashSet<&NodeId> = deletes.iter().collect();
        let mut claimed = Claimed::default();
        let mut initialized = Vec::with_capacity(saves.len());

        for node in saves {
            let key = node.identifier();
            let stored = if deleted.contains(&key) {
                None
            } else {
                self.delegate.get(&key, &Self::probe()).await?
            };

            let node = match (mode, stored) {
                (SaveMode::Insert, Some(_)) => {
                    return Err(NodeServiceError::bad_request(format!(
                        "Node {} already exists",
                        key
                    )))
                }
                (SaveMode::Update, None) => {
                    return Err(NodeServiceError::not_found(format!("Node {}", key)))
                }
                (_, Some(stored)) => Self::initialize_existing(node, stored, principal),
                (_, None) => self.initialize_new(node, opts, principal, &mut claimed).await?,
            };
            initialized.push(node);
        }

        self.delegate
            .save_and_delete(initialized, deletes, mode, opts, principal)
            .await
    }

    async fn values(
        &self,
        query: &Query<NodeId, Node>,
        principal: &Principal,
    ) -> Result<Vec<Node>, NodeServiceError> {
        self.delegate.values(query, principal).await
    }

    async fn keys(
        &self,
        query: &Query<NodeId, Node>,
        principal: &Principal,
    ) -> Result<Vec<NodeId>, NodeServiceError> {
        self.delegate.keys(query, principal).await
    }

    async fn count(
        &self,
        spec: &SpecRef<NodeId, Node>,
        principal: &Principal,
    ) -> Result<usize, NodeServiceError> {
        self.delegate.count(spec, principal).await
    }

    async fn exists(&self, key: &NodeId, principal: &Principal) -> Result<bool, NodeServiceError> {
        self.delegate.exists(key, principal).await
    }

    async fn get(&self, key: &NodeId, principal: &Principal) -> Result<Option<Node>, NodeServiceError> {
        self.delegate.get(key, principal).await
    }
}
