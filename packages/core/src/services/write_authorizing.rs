//! Write pre-authorization
//!
//! Rejects the whole call with `AccessDenied` before anything is written.
//! Whether a save is an insert or an update is decided by probing existence
//! with an internal principal, so a caller who cannot read an existing node
//! still needs `UPDATE` rather than `INSERT` on it.

use crate::models::{Node, NodeId, Permission, Principal};
use crate::query::{Query, SpecRef};
use crate::services::error::NodeServiceError;
use crate::services::permission::NodePermissions;
use crate::services::service::{SaveMode, Service, WriteOptions};
use async_trait::async_trait;
use std::sync::Arc;

pub struct WriteAuthorizingNodeService {
    delegate: Arc<dyn Service<NodeId, Node>>,
    permissions: NodePermissions,
}

impl WriteAuthorizingNodeService {
    pub fn new(delegate: Arc<dyn Service<NodeId, Node>>, permissions: NodePermissions) -> Self {
        Self {
            delegate,
            permissions,
        }
    }

    async fn save_permission(&self, node: &Node, mode: SaveMode) -> Result<Permission, NodeServiceError> {
        Ok(match mode {
            SaveMode::Insert => Permission::Insert,
            SaveMode::Update => Permission::Update,
            SaveMode::Upsert => {
                let probe = Principal::internal("write-authorization");
                if self.delegate.exists(&node.identifier(), &probe).await? {
                    Permission::Update
                } else {
                    Permission::Insert
                }
            }
        })
    }

    fn check_save(&self, node: &Node, permission: Permission, principal: &Principal) -> Result<(), NodeServiceError> {
        let key = node.identifier();
        if !self.permissions.node(principal, &key, permission) {
            return Err(NodeServiceError::access_denied(format!(
                "{} may not {:?} node {}",
                principal, permission, key
            )));
        }
        for attribute_id in node.properties.keys() {
            if !self
                .permissions
                .text_attribute(principal, &node.type_id, attribute_id, permission)
            {
                return Err(NodeServiceError::access_denied(format!(
                    "{} may not {:?} attribute {} of {}",
                    principal, permission, attribute_id, key
                )));
            }
        }
        for attribute_id in node.references.keys() {
            if !self
                .permissions
                .reference_attribute(principal, &node.type_id, attribute_id, permission)
            {
                return Err(NodeServiceError::access_denied(format!(
                    "{} may not {:?} reference {} of {}",
                    principal, permission, attribute_id, key
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Service<NodeId, Node> for WriteAuthorizingNodeService {
    async fn save_and_delete(
        &self,
        saves: Vec<Node>,
        deletes: Vec<NodeId>,
        mode: SaveMode,
        opts: &WriteOptions,
        principal: &Principal,
    ) -> Result<Vec<NodeId>, NodeServiceError> {
        for key in &deletes {
            if !self.permissions.node(principal, key, Permission::Delete) {
                return Err(NodeServiceError::access_denied(format!(
                    "{} may not delete node {}",
                    principal, key
                )));
            }
        }
        for node in &saves {
            let permission = self.save_permission(node, mode).await?;
            self.check_save(node, permission, principal)?;
        }

        self.delegate
            .save_and_delete(saves, deletes, mode, opts, principal)
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
