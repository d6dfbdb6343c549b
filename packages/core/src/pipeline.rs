//! Node Service Pipeline
//!
//! Assembles the decorator stack around the node repository. From the
//! caller inwards:
//!
//! 1. write pre-authorization
//! 2. write logging
//! 3. event emission
//! 4. read/write locking (plus the refresh barrier of synchronous writes)
//! 5. metadata initialization
//! 6. revision allocation
//! 7. read authorization
//! 8. index synchronization
//! 9. the SQL repository

use crate::config::StoreConfig;
use crate::db::{CachedSequenceService, DatabaseService, SequenceService};
use crate::index::{Index, MemoryIndex, NodeDocumentConverter};
use crate::models::{Node, NodeId};
use crate::services::{
    EventEmittingNodeService, IndexedNodeService, MetadataInitializingNodeService, NodeEvent,
    NodePermissions, NodeRepository, NodeRevisionRepository, NodeServiceError,
    ReadAuthorizedNodeService, ReadWriteSynchronizedService, RevisionInitializingService,
    RevisionService, Service, TypeResolver, WriteAuthorizingNodeService, WriteLoggingService,
};
use std::sync::Arc;
use tokio::sync::broadcast;

pub struct NodePipeline {
    service: Arc<dyn Service<NodeId, Node>>,
    events: Arc<EventEmittingNodeService>,
    indexed: Arc<IndexedNodeService>,
    index: Arc<dyn Index<NodeId, Node>>,
    revisions: Arc<NodeRevisionRepository>,
    sequences: Arc<dyn SequenceService>,
}

impl NodePipeline {
    /// Open the store at `config.db_path` and build the full stack
    ///
    /// An empty index is rebuilt from the repository before returning.
    pub async fn open(
        config: StoreConfig,
        resolver: Arc<dyn TypeResolver>,
        permissions: NodePermissions,
    ) -> Result<Self, NodeServiceError> {
        config
            .validate()
            .map_err(|e| NodeServiceError::illegal_state(e.to_string()))?;

        let db = Arc::new(DatabaseService::new(config.db_path.clone()).await?);
        let sequences: Arc<dyn SequenceService> =
            Arc::new(CachedSequenceService::new(db.clone(), config.sequence_increment));
        let revision_service = Arc::new(RevisionService::new(db.clone(), sequences.clone()));
        let revisions = Arc::new(NodeRevisionRepository::new(
            db.clone(),
            revision_service.clone(),
            config.batch_size,
        ));

        let memory_index = Arc::new(MemoryIndex::new(Arc::new(NodeDocumentConverter::new(
            config.max_term_length,
        ))));
        if let Some(interval) = config.refresh_interval() {
            memory_index.spawn_refresher(interval);
        }
        let index: Arc<dyn Index<NodeId, Node>> = memory_index;

        let repository: Arc<dyn Service<NodeId, Node>> = Arc::new(NodeRepository::new(
            db.clone(),
            resolver.clone(),
            config.batch_size,
        ));
        let indexed = Arc::new(IndexedNodeService::new(
            repository,
            index.clone(),
            config.refresh_timeout(),
        ));
        indexed.initialize().await?;

        let read_authorized: Arc<dyn Service<NodeId, Node>> = Arc::new(
            ReadAuthorizedNodeService::new(indexed.clone(), permissions.clone()),
        );
        let revisioned: Arc<dyn Service<NodeId, Node>> = Arc::new(RevisionInitializingService::new(
            read_authorized,
            revision_service,
            config.track_revisions,
        ));
        let initialized: Arc<dyn Service<NodeId, Node>> =
            Arc::new(MetadataInitializingNodeService::new(
                revisioned,
                resolver,
                sequences.clone(),
                config.default_namespace.clone(),
            ));
        let synchronized: Arc<dyn Service<NodeId, Node>> = Arc::new(
            ReadWriteSynchronizedService::new(initialized, config.lock_timeout())
                .with_refresh_barrier(index.clone(), config.refresh_timeout()),
        );
        let events = Arc::new(EventEmittingNodeService::new(synchronized));
        let logged: Arc<dyn Service<NodeId, Node>> = Arc::new(WriteLoggingService::new(events.clone()));
        let service: Arc<dyn Service<NodeId, Node>> =
            Arc::new(WriteAuthorizingNodeService::new(logged, permissions));

        tracing::info!("Node pipeline opened at {}", config.db_path.display());

        Ok(Self {
            service,
            events,
            indexed,
            index,
            revisions,
            sequences,
        })
    }

    /// Outermost service; every caller-facing operation goes through it
    pub fn service(&self) -> Arc<dyn Service<NodeId, Node>> {
        self.service.clone()
    }

    pub fn revisions(&self) -> &Arc<NodeRevisionRepository> {
        &self.revisions
    }

    pub fn index(&self) -> &Arc<dyn Index<NodeId, Node>> {
        &self.index
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }

    /// Re-index every stored node; returns the number indexed
    pub async fn reindex_all(&self) -> Result<usize, NodeServiceError> {
        self.indexed.reindex_all().await
    }

    /// Release reserved sequence blocks and stop the index
    pub async fn close(&self) -> Result<(), NodeServiceError> {
        self.sequences.close().await?;
        self.index.close().await;
        Ok(())
    }
}
