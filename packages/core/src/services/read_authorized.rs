//! Read permission filtering
//!
//! Drops nodes the principal may not read and redacts the attributes it may
//! not read from the rest. Each reference target and referrer source must be
//! readable itself; referrers are also checked against the reference
//! attribute of the referring node's type. Attributes left without values
//! are dropped.

use crate::models::{Node, NodeId, Permission, Principal};
use crate::query::{Query, SpecRef};
use crate::services::error::NodeServiceError;
use crate::services::permission::NodePermissions;
use crate::services::service::{SaveMode, Service, WriteOptions};
use async_trait::async_trait;
use std::sync::Arc;

pub struct ReadAuthorizedNodeService {
    delegate: Arc<dyn Service<NodeId, Node>>,
    permissions: NodePermissions,
}

impl ReadAuthorizedNodeService {
    pub fn new(delegate: Arc<dyn Service<NodeId, Node>>, permissions: NodePermissions) -> Self {
        Self {
            delegate,
            permissions,
        }
    }

    fn can_read(&self, principal: &Principal, key: &NodeId) -> bool {
        self.permissions.node(principal, key, Permission::Read)
    }

    /// `None` if the node is not readable, else the node without unreadable attributes
    fn filter(&self, principal: &Principal, mut node: Node) -> Option<Node> {
        if principal.is_internal() {
            return Some(node);
        }
        if !self.can_read(principal, &node.identifier()) {
            return None;
        }

        let type_id = node.type_id.clone();
        node.properties.retain(|attribute_id, _| {
            self.permissions
                .text_attribute(principal, &type_id, attribute_id, Permission::Read)
        });
        node.references.retain(|attribute_id, targets| {
            if !self
                .permissions
                .reference_attribute(principal, &type_id, attribute_id, Permission::Read)
            {
                return false;
            }
            targets.retain(|target| self.can_read(principal, target));
            !targets.is_empty()
        });
        node.referrers.retain(|attribute_id, sources| {
            sources.retain(|source| {
                self.permissions.reference_attribute(
                    principal,
                    &source.type_id,
                    attribute_id,
                    Permission::Read,
                ) && self.can_read(principal, source)
            });
            !sources.is_empty()
        });
        Some(node)
    }
}

#[async_trait]
impl Service<NodeId, Node> for ReadAuthorizedNodeService {
    async fn save_and_delete(
        &self,
        saves: Vec<Node>,
        deletes: Vec<NodeId>,
        mode: SaveMode,
        opts: &WriteOptions,
        principal: &Principal,
    ) -> Result<Vec<NodeId>, NodeServiceError> {
        self.delegate
            .save_and_delete(saves, deletes, mode, opts, principal)
            .await
    }

    async fn values(
        &self,
        query: &Query<NodeId, Node>,
        principal: &Principal,
    ) -> Result<Vec<Node>, NodeServiceError> {
        let nodes = self.delegate.values(query, principal).await?;
        Ok(nodes
            .into_iter()
            .filter_map(|node| self.filter(principal, node))
            .collect())
    }

    async fn keys(
        &self,
        query: &Query<NodeId, Node>,
        principal: &Principal,
    ) -> Result<Vec<NodeId>, NodeServiceError> {
        let keys = self.delegate.keys(query, principal).await?;
        Ok(keys
            .into_iter()
            .filter(|key| self.can_read(principal, key))
            .collect())
    }

    async fn count(
        &self,
        spec: &SpecRef<NodeId, Node>,
        principal: &Principal,
    ) -> Result<usize, NodeServiceError> {
        if principal.is_internal() {
            return self.delegate.count(spec, principal).await;
        }
        let keys = self.keys(&Query::new(spec.clone()), principal).await?;
        Ok(keys.len())
    }

    async fn exists(&self, key: &NodeId, principal: &Principal) -> Result<bool, NodeServiceError> {
        Ok(self.can_read(principal, key) && self.delegate.exists(key, principal).await?)
    }

    async fn get(&self, key: &NodeId, principal: &Principal) -> Result<Option<Node>, NodeServiceError> {
        if !self.can_read(principal, key) {
            return Ok(None);
        }
        Ok(self
            .delegate
            .get(key, principal)
            .await?
            .and_then(|node| self.filter(principal, node)))
    }
}
