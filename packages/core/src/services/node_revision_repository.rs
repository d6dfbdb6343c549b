//! Point-in-time reconstruction of nodes from the audit tables
//!
//! Reconstruction is last-write-wins per row key, not per node: the node row
//! and every attribute slot are resolved independently, each from its own
//! latest audit row at or below the requested revision. A `DELETE` as the
//! latest row means the row did not exist at that revision.
//!
//! Audit rows are written only by the repository and by [`materialize`].
//! Nothing here updates them.
//!
//! [`materialize`]: NodeRevisionRepository::materialize

use crate::db::{
    AuditDao, DatabaseService, NodeRowMapper, ReferenceValueMapper, RowMapper, TextValueMapper,
};
use crate::models::{AuditEntry, Node, NodeAttributeValueId, NodeId, Revision, RevisionId, RevisionType};
use crate::query::SqlFragment;
use crate::services::error::NodeServiceError;
use crate::services::node_repository::{group_referrers, slots_of, slots_targeting};
use crate::services::revision_service::RevisionService;
use libsql::{params, Connection, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Restrict `fragment` to audit rows at or below `revision`
fn up_to(fragment: SqlFragment, alias: &str, revision: i64) -> SqlFragment {
    let mut params = fragment.params;
    params.push(Value::Integer(revision));
    SqlFragment::new(
        format!("{} AND {}.revision <= ?", fragment.clause, alias),
        params,
    )
}

/// Latest surviving value per key; rows must be ordered by revision
fn latest_values<K: Ord, V>(rows: Vec<(RevisionId<K>, AuditEntry<V>)>) -> BTreeMap<K, V> {
    let mut latest: BTreeMap<K, AuditEntry<V>> = BTreeMap::new();
    for (key, entry) in rows {
        latest.insert(key.key, entry);
    }
    latest
        .into_iter()
        .filter_map(|(key, entry)| entry.value.map(|value| (key, value)))
        .collect()
}

/// `INSERT ... SELECT` copying every live row of `M`'s table into its audit mirror
fn snapshot_sql<M: RowMapper>() -> String {
    let keys = M::KEY_COLUMNS.join(", ");
    let values = M::VALUE_COLUMNS.join(", ");
    format!(
        "INSERT OR REPLACE INTO {table}_aud ({keys}, revision, revision_type, {values}) \
         SELECT {keys}, ?, 'INSERT', {values} FROM {table}",
        table = M::TABLE,
        keys = keys,
        values = values
    )
}

pub struct NodeRevisionRepository {
    db: Arc<DatabaseService>,
    revisions: Arc<RevisionService>,
    nodes_aud: AuditDao<NodeRowMapper>,
    texts_aud: AuditDao<TextValueMapper>,
    references_aud: AuditDao<ReferenceValueMapper>,
}

impl NodeRevisionRepository {
    pub fn new(db: Arc<DatabaseService>, revisions: Arc<RevisionService>, batch_size: usize) -> Self {
        Self {
            db,
            revisions,
            nodes_aud: AuditDao::new(batch_size),
            texts_aud: AuditDao::new(batch_size),
            references_aud: AuditDao::new(batch_size),
        }
    }

    pub fn revisions(&self) -> &Arc<RevisionService> {
        &self.revisions
    }

    fn node_row(node_id: &NodeId) -> SqlFragment {
        SqlFragment::new(
            "n.graph_id = ? AND n.type_id = ? AND n.id = ?",
            vec![
                Value::Text(node_id.graph_id().to_string()),
                Value::Text(node_id.type_id.id.clone()),
                Value::Text(node_id.id.to_string()),
            ],
        )
    }

    /// The node as it was at `revision`, or `None` if it did not exist then
    pub async fn reconstruct(
        &self,
        node_id: &NodeId,
        revision: i64,
    ) -> Result<Option<Node>, NodeServiceError> {
        let conn = self.db.connect_with_timeout().await?;

        let base = self
            .nodes_aud
            .entries_by_revision(&conn, &up_to(Self::node_row(node_id), "n", revision))
            .await?
            .pop()
            .and_then(|(_, entry)| entry.value);
        let mut node = match base {
            Some(node) => node,
            None => return Ok(None),
        };

        let texts = self
            .texts_aud
            .entries_by_revision(&conn, &up_to(slots_of("v", node_id), "v", revision))
            .await?;
        for (slot, value) in latest_values(texts) {
            node.properties.entry(slot.attribute_id).or_default().push(value);
        }

        let references = self
            .references_aud
            .entries_by_revision(&conn, &up_to(slots_of("r", node_id), "r", revision))
            .await?;
        for (slot, target) in latest_values(references) {
            node.references.entry(slot.attribute_id).or_default().push(target);
        }

        node.referrers = group_referrers(self.referrers_at(&conn, node_id, revision).await?);
        Ok(Some(node))
    }

    /// Reference slots pointing at `node_id` as of `revision`
    async fn referrers_at(
        &self,
        conn: &Connection,
        node_id: &NodeId,
        revision: i64,
    ) -> Result<Vec<(NodeAttributeValueId, NodeId)>, NodeServiceError> {
        let sources: BTreeSet<NodeId> = self
            .references_aud
            .entries_by_revision(conn, &up_to(slots_targeting(node_id), "r", revision))
            .await?
            .into_iter()
            .map(|(key, _)| key.key.node_id)
            .collect();

        let mut incoming = Vec::new();
        for source in sources {
            let rows = self
                .references_aud
                .entries_by_revision(conn, &up_to(slots_of("r", &source), "r", revision))
                .await?;
            incoming.extend(
                latest_values(rows)
                    .into_iter()
                    .filter(|(_, target)| target == node_id),
            );
        }
        Ok(incoming)
    }

    /// Revisions that touched the node row or one of its slots, oldest first
    ///
    /// Revisions that only changed slots are reported as `UPDATE`.
    pub async fn history(&self, node_id: &NodeId) -> Result<Vec<(i64, RevisionType)>, NodeServiceError> {
        let conn = self.db.connect_with_timeout().await?;
        let mut history: BTreeMap<i64, RevisionType> = BTreeMap::new();

        for (key, _) in self.texts_aud.entries_by_revision(&conn, &slots_of("v", node_id)).await? {
            history.insert(key.revision, RevisionType::Update);
        }
        for (key, _) in self
            .references_aud
            .entries_by_revision(&conn, &slots_of("r", node_id))
            .await?
        {
            history.insert(key.revision, RevisionType::Update);
        }
        for (key, entry) in self
            .nodes_aud
            .entries_by_revision(&conn, &Self::node_row(node_id))
            .await?
        {
            history.insert(key.revision, entry.revision_type);
        }

        Ok(history.into_iter().collect())
    }

    /// Snapshot every live row as `INSERT` into a fresh revision
    pub async fn materialize(&self, author: &str) -> Result<Revision, NodeServiceError> {
        let revision = self.revisions.create(author).await?;
        let conn = self.db.connect_with_timeout().await?;

        DatabaseService::begin(&conn).await?;
        let result = Self::snapshot(&conn, revision.number).await;
        match result {
            Ok(()) => DatabaseService::commit(&conn).await?,
            Err(e) => {
                DatabaseService::rollback(&conn).await;
                return Err(e);
            }
        }

        tracing::info!("Materialized current state as revision {}", revision.number);
        Ok(revision)
    }

    async fn snapshot(conn: &Connection, revision: i64) -> Result<(), NodeServiceError> {
        for sql in [
            snapshot_sql::<NodeRowMapper>(),
            snapshot_sql::<TextValueMapper>(),
            snapshot_sql::<ReferenceValueMapper>(),
        ] {
            conn.execute(&sql, params![revision]).await.map_err(|e| {
                crate::db::DatabaseError::sql_execution(format!(
                    "Failed to snapshot revision {}: {}",
                    revision, e
                ))
            })?;
        }
        Ok(())
    }

    /// Drop all history and start over from a snapshot of the current state
    pub async fn purge_all(&self, author: &str) -> Result<Revision, NodeServiceError> {
        let conn = self.db.connect_with_timeout().await?;
        let purged = conn.execute("DELETE FROM revision", ()).await.map_err(|e| {
            crate::db::DatabaseError::sql_execution(format!("Failed to purge revisions: {}", e))
        })?;
        tracing::warn!("Purged {} revisions with their audit rows", purged);

        self.materialize(author).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::CachedSequenceService;
    use crate::models::{LangValue, Principal, ReferenceAttribute, TextAttribute, TypeDef, TypeId};
    use crate::services::node_repository::NodeRepository;
    use crate::services::service::{SaveMode, Service, WriteOptions};
    use crate::services::type_resolver::InMemoryTypeResolver;
    use anyhow::Result;
    use tempfile::TempDir;
    use uuid::Uuid;

    struct Fixture {
        nodes: NodeRepository,
        history: NodeRevisionRepository,
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
        let sequences = Arc::new(CachedSequenceService::new(db.clone(), 1));
        let revisions = Arc::new(RevisionService::new(db.clone(), sequences));
        Ok(Fixture {
            nodes: NodeRepository::new(db.clone(), resolver, 100),
            history: NodeRevisionRepository::new(db, revisions, 100),
            person,
            _temp_dir: temp_dir,
        })
    }

    async fn tracked(f: &Fixture) -> Result<WriteOptions> {
        let revision = f.history.revisions().create("ann").await?;
        Ok(WriteOptions::default().with_revision(revision.number))
    }

    #[tokio::test]
    async fn test_reconstruct_each_revision() -> Result<()> {
        let f = setup().await?;
        let ann = Principal::user("ann");

        let v1 = Node::new(Uuid::new_v4(), f.person.clone()).with_property("name", LangValue::new("en", "Ann"));
        let id = v1.identifier();
        let r1 = tracked(&f).await?;
        f.nodes.save(v1.clone(), SaveMode::Insert, &r1, &ann).await?;

        let v2 = v1.clone().with_property("name", LangValue::new("fi", "Anna"));
        let r2 = tracked(&f).await?;
        f.nodes.save(v2.clone(), SaveMode::Update, &r2, &ann).await?;

        let r3 = tracked(&f).await?;
        f.nodes.delete(id.clone(), &r3, &ann).await?;

        let (r1, r2, r3) = (r1.revision.unwrap(), r2.revision.unwrap(), r3.revision.unwrap());
        assert_eq!(f.history.reconstruct(&id, r1 - 1).await?, None);
        assert_eq!(f.history.reconstruct(&id, r1).await?, Some(v1));
        assert_eq!(f.history.reconstruct(&id, r2).await?, Some(v2.clone()));
        assert_eq!(f.history.reconstruct(&id, r2).await?, Some(v2));
        assert_eq!(f.history.reconstruct(&id, r3).await?, None);

        assert_eq!(
            f.history.history(&id).await?,
            vec![
                (r1, RevisionType::Insert),
                (r2, RevisionType::Update),
                (r3, RevisionType::Delete)
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_noop_write_does_not_change_reconstruction() -> Result<()> {
        let f = setup().await?;
        let ann = Principal::user("ann");
        let node = Node::new(Uuid::new_v4(), f.person.clone()).with_property("name", LangValue::new("", "Ann"));
        let r1 = tracked(&f).await?;
        f.nodes.save(node.clone(), SaveMode::Insert, &r1, &ann).await?;
        let r2 = tracked(&f).await?;
        f.nodes.save(node.clone(), SaveMode::Update, &r2, &ann).await?;

        let id = node.identifier();
        assert_eq!(
            f.history.reconstruct(&id, r1.revision.unwrap()).await?,
            f.history.reconstruct(&id, r2.revision.unwrap()).await?
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_referrers_are_reconstructed() -> Result<()> {
        let f = setup().await?;
        let ann = Principal::user("ann");
        let b = Node::new(Uuid::new_v4(), f.person.clone());
        let a = Node::new(Uuid::new_v4(), f.person.clone()).with_reference("knows", b.identifier());
        let r1 = tracked(&f).await?;
        f.nodes
            .save_all(vec![a.clone(), b.clone()], SaveMode::Insert, &r1, &ann)
            .await?;

        let r2 = tracked(&f).await?;
        f.nodes
            .save(Node::new(a.id, f.person.clone()), SaveMode::Update, &r2, &ann)
            .await?;

        let at_r1 = f.history.reconstruct(&b.identifier(), r1.revision.unwrap()).await?.expect("b");
        assert_eq!(at_r1.referrers["knows"], vec![a.identifier()]);
        let at_r2 = f.history.reconstruct(&b.identifier(), r2.revision.unwrap()).await?.expect("b");
        assert!(at_r2.referrers.is_empty());
        assert_eq!(Some(at_r2), f.nodes.get(&b.identifier(), &ann).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_purge_all_keeps_current_state() -> Result<()> {
        let f = setup().await?;
        let ann = Principal::user("ann");
        let node = Node::new(Uuid::new_v4(), f.person.clone()).with_property("name", LangValue::new("", "Ann"));
        let r1 = tracked(&f).await?;
        f.nodes.save(node.clone(), SaveMode::Insert, &r1, &ann).await?;

        let fresh = f.history.purge_all("admin").await?;
        let id = node.identifier();

        assert_eq!(f.history.revisions().list().await?, vec![fresh.clone()]);
        assert_eq!(f.history.reconstruct(&id, r1.revision.unwrap()).await?, None);
        assert_eq!(f.history.reconstruct(&id, fresh.number).await?, Some(node));
        assert_eq!(f.history.history(&id).await?, vec![(fresh.number, RevisionType::Insert)]);
        Ok(())
    }
}
