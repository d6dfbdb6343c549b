//! Write notifications
//!
//! Successful writes are announced on a tokio broadcast channel. Subscribers
//! that lag behind lose the oldest events; having no subscribers at all is
//! fine.

use crate::models::{Node, NodeId, Principal};
use crate::query::{Query, SpecRef};
use crate::services::error::NodeServiceError;
use crate::services::service::{SaveMode, Service, WriteOptions};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Broadcast channel capacity for node events
const NODE_EVENT_CHANNEL_CAPACITY: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum NodeEvent {
    Saved { ids: Vec<NodeId>, principal: String },
    Deleted { ids: Vec<NodeId>, principal: String },
}

pub struct EventEmittingNodeService {
    delegate: Arc<dyn Service<NodeId, Node>>,
    event_tx: broadcast::Sender<NodeEvent>,
}

impl EventEmittingNodeService {
    pub fn new(delegate: Arc<dyn Service<NodeId, Node>>) -> Self {
        let (event_tx, _) = broadcast::channel(NODE_EVENT_CHANNEL_CAPACITY);
        Self { delegate, event_tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.event_tx.subscribe()
    }

    fn emit(&self, event: NodeEvent) {
        // Err only means nobody is listening
        let _ = self.event_tx.send(event);
    }
}

#[async_trait]
impl Service<NodeId, Node> for EventEmittingNodeService {
    async fn save_and_delete(
        &self,
        saves: Vec<Node>,
        deletes: Vec<NodeId>,
        mode: SaveMode,
        opts: &WriteOptions,
        principal: &Principal,
    ) -> Result<Vec<NodeId>, NodeServiceError> {
        let deleted = deletes.clone();
        let saved = self
            .delegate
            .save_and_delete(saves, deletes, mode, opts, principal)
            .await?;

        if !deleted.is_empty() {
            self.emit(NodeEvent::Deleted {
                ids: deleted,
                principal: principal.username.clone(),
            });
        }
        if !saved.is_empty() {
            self.emit(NodeEvent::Saved {
                ids: saved.clone(),
                principal: principal.username.clone(),
            });
        }
        Ok(saved)
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
