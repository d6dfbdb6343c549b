//! Indexed Node Service
//!
//! Keeps the search index consistent with the repository and routes reads.
//!
//! # Writes
//!
//! Writes go to the repository first. Then every written node is reindexed,
//! together with each neighbor it had before or has after the write, since
//! neighbor documents embed this node as a reference or referrer. Nodes are
//! re-read through an internal principal so documents reflect the stored
//! state, not what the caller may see. With `sync` set the call returns only
//! after the index has been refreshed.
//!
//! # Reads
//!
//! A query whose whole specification tree renders to a search query runs on
//! the index; otherwise it runs on the repository. Key lookups always go to
//! the repository.

use crate::index::Index;
use crate::models::{Node, NodeId, Principal};
use crate::query::{route, MatchAll, Query, Route, SpecRef};
use crate::services::error::NodeServiceError;
use crate::services::service::{SaveMode, Service, WriteOptions};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

pub struct IndexedNodeService {
    delegate: Arc<dyn Service<NodeId, Node>>,
    index: Arc<dyn Index<NodeId, Node>>,
    refresh_timeout: Duration,
}

impl IndexedNodeService {
    pub fn new(
        delegate: Arc<dyn Service<NodeId, Node>>,
        index: Arc<dyn Index<NodeId, Node>>,
        refresh_timeout: Duration,
    ) -> Self {
        Self {
            delegate,
            index,
            refresh_timeout,
        }
    }

    fn indexer() -> Principal {
        Principal::internal("indexer")
    }

    /// Rebuild the index from the repository when it holds no documents
    pub async fn initialize(&self) -> Result<(), NodeServiceError> {
        if self.index.is_empty().await? {
            self.reindex_all().await?;
        }
        Ok(())
    }

    /// Index every stored node and wait for the refresh
    pub async fn reindex_all(&self) -> Result<usize, NodeServiceError> {
        let spec: SpecRef<NodeId, Node> = Arc::new(MatchAll);
        let nodes = self.delegate.values(&Query::new(spec), &Self::indexer()).await?;
        let count = nodes.len();

        tracing::info!("Rebuilding search index from {} stored nodes", count);
        self.index
            .index(nodes.into_iter().map(|n| (n.identifier(), n)).collect())
            .await?;
        self.index.await_refresh(self.refresh_timeout).await?;
        Ok(count)
    }

    /// Current neighbors of `ids` in the repository
    async fn neighbors(&self, ids: &[NodeId]) -> Result<BTreeSet<NodeId>, NodeServiceError> {
        let mut neighbors = BTreeSet::new();
        for id in ids {
            if let Some(node) = self.delegate.get(id, &Self::indexer()).await? {
                neighbors.extend(node.neighbors().cloned());
            }
        }
        Ok(neighbors)
    }

    /// Overwrite or drop the documents of `written` and all affected neighbors
    async fn reindex(
        &self,
        written: Vec<NodeId>,
        mut pending: BTreeSet<NodeId>,
    ) -> Result<(), NodeServiceError> {
        let indexer = Self::indexer();
        let mut fetched: BTreeMap<NodeId, Option<Node>> = BTreeMap::new();

        for id in written {
            let node = self.delegate.get(&id, &indexer).await?;
            if let Some(node) = &node {
                pending.extend(node.neighbors().cloned());
            }
            fetched.insert(id, node);
        }
        for id in pending {
            if !fetched.contains_key(&id) {
                let node = self.delegate.get(&id, &indexer).await?;
                fetched.insert(id, node);
            }
        }

        let mut present = Vec::new();
        let mut removed = Vec::new();
        for (id, node) in fetched {
            match node {
                Some(node) => present.push((id, node)),
                None => removed.push(id),
            }
        }

        tracing::debug!(
            "Reindexing {} documents, removing {}",
            present.len(),
            removed.len()
        );
        self.index.index(present).await?;
        self.index.delete(&removed).await?;
        Ok(())
    }
}

#[async_trait]
impl Service<NodeId, Node> for IndexedNodeService {
    async fn save_and_delete(
        &self,
        saves: Vec<Node>,
        deletes: Vec<NodeId>,
        mode: SaveMode,
        opts: &WriteOptions,
        principal: &Principal,
    ) -> Result<Vec<NodeId>, NodeServiceError> {
        let written: Vec<NodeId> = deletes
            .iter()
            .cloned()
            .chain(saves.iter().map(Node::identifier))
            .collect();
        let neighbors_before = self.neighbors(&written).await?;

        let keys = self
            .delegate
            .save_and_delete(saves, deletes, mode, opts, principal)
            .await?;

        self.reindex(written, neighbors_before).await?;
        if opts.sync {
            self.index.await_refresh(self.refresh_timeout).await?;
        }
        Ok(keys)
    }

    async fn values(
        &self,
        query: &Query<NodeId, Node>,
        principal: &Principal,
    ) -> Result<Vec<Node>, NodeServiceError> {
        match route(query.spec.as_ref(), true)? {
            Route::Index(search) => Ok(self
                .index
                .values(&search, &query.sort, query.max)
                .await?
                .into_iter()
                .map(|(_, node)| node)
                .collect()),
            Route::Sql(_) => self.delegate.values(query, principal).await,
        }
    }

    async fn keys(
        &self,
        query: &Query<NodeId, Node>,
        principal: &Principal,
    ) -> Result<Vec<NodeId>, NodeServiceError> {
        match route(query.spec.as_ref(), true)? {
            Route::Index(search) => Ok(self.index.keys(&search, &query.sort, query.max).await?),
            Route::Sql(_) => self.delegate.keys(query, principal).await,
        }
    }

    async fn count(
        &self,
        spec: &SpecRef<NodeId, Node>,
        principal: &Principal,
    ) -> Result<usize, NodeServiceError> {
        match route(spec.as_ref(), true)? {
            Route::Index(search) => Ok(self.index.count(&search).await?),
            Route::Sql(_) => self.delegate.count(spec, principal).await,
        }
    }

    async fn exists(&self, key: &NodeId, principal: &Principal) -> Result<bool, NodeServiceError> {
        self.delegate.exists(key, principal).await
    }

    async fn get(&self, key: &NodeId, principal: &Principal) -> Result<Option<Node>, NodeServiceError> {
        self.delegate.get(key, principal).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DatabaseService;
    use crate::index::{MemoryIndex, NodeDocumentConverter};
    use crate::models::{LangValue, ReferenceAttribute, TextAttribute, TypeDef, TypeId};
    use crate::query::{NodeById, NodesByPropertyToken, NodesByReferrer};
    use crate::services::node_repository::NodeRepository;
    use crate::services::type_resolver::InMemoryTypeResolver;
    use anyhow::Result;
    use tempfile::TempDir;
    use uuid::Uuid;

    struct Fixture {
        service: IndexedNodeService,
        repository: Arc<NodeRepository>,
        index: Arc<MemoryIndex<NodeId, Node>>,
        person: TypeId,
        _temp_dir: TempDir,
    }

    async fn setup() -> Result<Fixture> {
        let temp_dir = TempDir::new()?;
        let db = Arc::new(DatabaseService::new(temp_dir.path().join("test.db")).await?);
        let person = TypeId::new(Uuid::new_v4(), "Person");
        let resolver = Arc::new(InMemoryTypeResolver::with_types([TypeDef::new(person.clone())
            .with_text_attribute(TextAttribute::new("name"))
            .with_reference_attribute(ReferenceAttribute::new("knows", person.clone()))]));
        let repository = Arc::new(NodeRepository::new(db, resolver, 100));
        let index = Arc::new(MemoryIndex::new(Arc::new(NodeDocumentConverter::new(100))));
        let service = IndexedNodeService::new(repository.clone(), index.clone(), Duration::from_secs(5));
        Ok(Fixture {
            service,
            repository,
            index,
            person,
            _temp_dir: temp_dir,
        })
    }

    fn query(spec: impl crate::query::Specification<NodeId, Node> + 'static) -> Query<NodeId, Node> {
        Query::new(Arc::new(spec))
    }

    #[tokio::test]
    async fn test_read_after_write_through_index() -> Result<()> {
        let f = setup().await?;
        let ann = Principal::user("ann");
        let node = Node::new(Uuid::new_v4(), f.person.clone()).with_property("name", LangValue::new("en", "Ann Smith"));

        f.service
            .save(node.clone(), SaveMode::Insert, &WriteOptions::default(), &ann)
            .await?;

        let hits = f
            .service
            .values(&query(NodesByPropertyToken::new("name", "smith")), &ann)
            .await?;
        assert_eq!(hits, vec![node]);
        Ok(())
    }

    #[tokio::test]
    async fn test_deleting_target_reindexes_referrer() -> Result<()> {
        let f = setup().await?;
        let ann = Principal::user("ann");
        let b = Node::new(Uuid::new_v4(), f.person.clone());
        let a = Node::new(Uuid::new_v4(), f.person.clone()).with_reference("knows", b.identifier());
        f.service
            .save_all(vec![b.clone(), a.clone()], SaveMode::Insert, &WriteOptions::default(), &ann)
            .await?;

        let b_referrers = f
            .service
            .keys(&query(NodesByReferrer::new("knows", a.id)), &ann)
            .await?;
        assert_eq!(b_referrers, vec![b.identifier()]);

        f.service
            .delete(b.identifier(), &WriteOptions::default(), &ann)
            .await?;

        let stored_a = f
            .service
            .values(&query(NodeById(a.identifier())), &ann)
            .await?;
        assert_eq!(stored_a.len(), 1);
        assert!(stored_a[0].references.is_empty());
        assert!(f
            .service
            .values(&query(NodeById(b.identifier())), &ann)
            .await?
            .is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_initialize_rebuilds_empty_index() -> Result<()> {
        let f = setup().await?;
        let node = Node::new(Uuid::new_v4(), f.person.clone());
        f.repository
            .save(node.clone(), SaveMode::Insert, &WriteOptions::default(), &Principal::user("ann"))
            .await?;
        assert!(f.index.is_empty().await?);

        f.service.initialize().await?;
        assert_eq!(f.index.count(&crate::query::SearchQuery::MatchAll).await?, 1);
        Ok(())
    }
}
