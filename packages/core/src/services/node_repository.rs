//! Node Repository
//!
//! Innermost link of the pipeline and sole owner of the node tables.
//!
//! # Normalization
//!
//! A node is stored as one `node` row plus one row per text value slot and
//! one per reference value slot. A slot is keyed by
//! `(node, attribute, index)`, where `index` is the position of the value in
//! the attribute's de-duplicated list.
//!
//! # Writes
//!
//! Each `save_and_delete` call runs in one transaction and is all-or-nothing.
//! Validation, existence checks and reference target checks all run before
//! the first row is written.
//!
//! - deletes go first, dependent rows of the whole batch before any node row
//! - node rows of all saves are written before any value row, so nodes of one
//!   batch may reference each other
//! - updates diff the freshly read slots against the desired slots and apply
//!   only the inserts, updates and deletes that differ
//! - with a revision, every touched row is mirrored into its `_aud` table
//!
//! # Reads
//!
//! Reads hydrate text values, references and referrers. Referrers are the
//! reference rows of other nodes targeting this one. Only SQL-capable
//! specifications can be executed here.

use crate::db::{
    AuditDao, Dao, DatabaseService, NodeRowMapper, ReferenceValueMapper, SqlDao, TextValueMapper,
};
use crate::models::{
    AuditEntry, LangValue, Node, NodeAttributeValueId, NodeId, Principal, RevisionId, RevisionType,
};
use crate::query::{fields, route, Query, Route, Sort, SpecRef, Specification, SqlFragment};
use crate::services::error::NodeServiceError;
use crate::services::service::{SaveMode, Service, WriteOptions};
use crate::services::type_resolver::TypeResolver;
use crate::services::validation::NodeValidator;
use async_trait::async_trait;
use chrono::Utc;
use libsql::{params, Connection, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Slots of one node's text values
pub(crate) fn text_rows(node: &Node) -> BTreeMap<NodeAttributeValueId, LangValue> {
    let key = node.identifier();
    node.properties
        .iter()
        .flat_map(|(attribute_id, values)| {
            let key = key.clone();
            values.iter().enumerate().map(move |(index, value)| {
                (
                    NodeAttributeValueId::new(key.clone(), attribute_id.as_str(), index as i64),
                    value.clone(),
                )
            })
        })
        .collect()
}

/// Slots of one node's references
pub(crate) fn reference_rows(node: &Node) -> BTreeMap<NodeAttributeValueId, NodeId> {
    let key = node.identifier();
    node.references
        .iter()
        .flat_map(|(attribute_id, targets)| {
            let key = key.clone();
            targets.iter().enumerate().map(move |(index, target)| {
                (
                    NodeAttributeValueId::new(key.clone(), attribute_id.as_str(), index as i64),
                    target.clone(),
                )
            })
        })
        .collect()
}

/// Group incoming reference slots by attribute, ordered by source slot
pub(crate) fn group_referrers(
    mut incoming: Vec<(NodeAttributeValueId, NodeId)>,
) -> BTreeMap<String, Vec<NodeId>> {
    incoming.sort_by(|a, b| a.0.cmp(&b.0));
    let mut referrers: BTreeMap<String, Vec<NodeId>> = BTreeMap::new();
    for (slot, _) in incoming {
        referrers
            .entry(slot.attribute_id)
            .or_default()
            .push(slot.node_id);
    }
    referrers
}

/// Value slots of `node_id` in the table aliased `alias`
pub(crate) fn slots_of(alias: &str, node_id: &NodeId) -> SqlFragment {
    SqlFragment::new(
        format!(
            "{a}.node_graph_id = ? AND {a}.node_type_id = ? AND {a}.node_id = ?",
            a = alias
        ),
        node_id_params(node_id),
    )
}

/// Reference slots of any node targeting `node_id`
pub(crate) fn slots_targeting(node_id: &NodeId) -> SqlFragment {
    SqlFragment::new(
        "r.value_graph_id = ? AND r.value_type_id = ? AND r.value_id = ?",
        node_id_params(node_id),
    )
}

fn node_id_params(node_id: &NodeId) -> Vec<Value> {
    vec![
        Value::Text(node_id.graph_id().to_string()),
        Value::Text(node_id.type_id.id.clone()),
        Value::Text(node_id.id.to_string()),
    ]
}

/// Minimal edit set turning `old` into `new`
#[derive(Debug)]
pub(crate) struct SlotDiff<K, V> {
    pub inserts: Vec<(K, V)>,
    pub updates: Vec<(K, V)>,
    pub deletes: Vec<K>,
}

impl<K, V> SlotDiff<K, V>
where
    K: Ord + Clone,
    V: PartialEq + Clone,
{
    pub fn between(old: &BTreeMap<K, V>, new: &BTreeMap<K, V>) -> Self {
        let mut diff = SlotDiff {
            inserts: Vec::new(),
            updates: Vec::new(),
            deletes: Vec::new(),
        };
        for (key, value) in new {
            match old.get(key) {
                None => diff.inserts.push((key.clone(), value.clone())),
                Some(current) if current != value => diff.updates.push((key.clone(), value.clone())),
                Some(_) => {}
            }
        }
        diff.deletes = old
            .keys()
            .filter(|k| !new.contains_key(*k))
            .cloned()
            .collect();
        diff
    }

    fn extend(&mut self, other: SlotDiff<K, V>) {
        self.inserts.extend(other.inserts);
        self.updates.extend(other.updates);
        self.deletes.extend(other.deletes);
    }

    fn audit_entries(&self, revision: i64) -> Vec<(RevisionId<K>, AuditEntry<V>)> {
        let inserts = self.inserts.iter().map(|(k, v)| {
            (
                RevisionId::new(k.clone(), revision),
                AuditEntry::new(RevisionType::Insert, Some(v.clone())),
            )
        });
        let updates = self.updates.iter().map(|(k, v)| {
            (
                RevisionId::new(k.clone(), revision),
                AuditEntry::new(RevisionType::Update, Some(v.clone())),
            )
        });
        let deletes = self
            .deletes
            .iter()
            .map(|k| (RevisionId::new(k.clone(), revision), AuditEntry::deleted()));
        inserts.chain(updates).chain(deletes).collect()
    }
}

impl<K, V> Default for SlotDiff<K, V> {
    fn default() -> Self {
        Self {
            inserts: Vec::new(),
            updates: Vec::new(),
            deletes: Vec::new(),
        }
    }
}

/// `ORDER BY` terms when every sort field is a node column
///
/// NULLs order last in either direction; ties fall back to the node key.
fn column_order(sort: &[Sort]) -> Option<Vec<String>> {
    let mut order = Vec::with_capacity(sort.len() * 2 + 3);
    for s in sort {
        let column = match s.field.as_str() {
            fields::NUMBER => "n.number",
            fields::CODE => "n.code",
            fields::URI => "n.uri",
            fields::CREATED_BY => "n.created_by",
            fields::CREATED_DATE => "n.created_date",
            fields::LAST_MODIFIED_BY => "n.last_modified_by",
            fields::LAST_MODIFIED_DATE => "n.last_modified_date",
            _ => return None,
        };
        order.push(format!("{} IS NULL", column));
        order.push(if s.desc {
            format!("{} DESC", column)
        } else {
            column.to_string()
        });
    }
    order.extend(["n.graph_id", "n.type_id", "n.id"].map(String::from));
    Some(order)
}

/// Order nodes in memory by sort fields
///
/// Missing values order last in either direction; ties fall back to the node key.
pub(crate) fn compare_nodes(sort: &[Sort], a: &Node, b: &Node) -> Ordering {
    for s in sort {
        let ordering = match (
            fields::node_sort_value(a, &s.field),
            fields::node_sort_value(b, &s.field),
        ) {
            (Some(x), Some(y)) if s.desc => y.cmp(&x),
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    a.identifier().to_string().cmp(&b.identifier().to_string())
}

pub struct NodeRepository {
    db: Arc<DatabaseService>,
    validator: NodeValidator,
    nodes: SqlDao<NodeRowMapper>,
    texts: SqlDao<TextValueMapper>,
    references: SqlDao<ReferenceValueMapper>,
    nodes_aud: AuditDao<NodeRowMapper>,
    texts_aud: AuditDao<TextValueMapper>,
    references_aud: AuditDao<ReferenceValueMapper>,
}

impl NodeRepository {
    pub fn new(db: Arc<DatabaseService>, resolver: Arc<dyn TypeResolver>, batch_size: usize) -> Self {
        Self {
            db,
            validator: NodeValidator::new(resolver),
            nodes: SqlDao::new(batch_size),
            texts: SqlDao::new(batch_size),
            references: SqlDao::new(batch_size),
            nodes_aud: AuditDao::new(batch_size),
            texts_aud: AuditDao::new(batch_size),
            references_aud: AuditDao::new(batch_size),
        }
    }

    fn sql_filter(spec: &dyn Specification<NodeId, Node>) -> Result<SqlFragment, NodeServiceError> {
        match route(spec, false)? {
            Route::Sql(fragment) => Ok(fragment),
            Route::Index(_) => Err(NodeServiceError::illegal_state(format!(
                "Relational store cannot execute {:?}",
                spec
            ))),
        }
    }

    /// Fill properties, references and referrers of a bare node row
    async fn hydrate(&self, conn: &Connection, mut node: Node) -> Result<Node, NodeServiceError> {
        let key = node.identifier();

        let order = ["v.attribute_id".to_string(), "v.value_index".to_string()];
        for (slot, value) in self
            .texts
            .entries_ordered(conn, &slots_of("v", &key), &order, None)
            .await?
        {
            node.properties.entry(slot.attribute_id).or_default().push(value);
        }

        let order = ["r.attribute_id".to_string(), "r.value_index".to_string()];
        for (slot, target) in self
            .references
            .entries_ordered(conn, &slots_of("r", &key), &order, None)
            .await?
        {
            node.references.entry(slot.attribute_id).or_default().push(target);
        }

        let incoming = self.references.entries(conn, &slots_targeting(&key)).await?;
        node.referrers = group_referrers(incoming);
        Ok(node)
    }

    async fn ensure_revision(
        conn: &Connection,
        revision: i64,
        principal: &Principal,
    ) -> Result<(), NodeServiceError> {
        conn.execute(
            "INSERT OR IGNORE INTO revision (number, author, date) VALUES (?, ?, ?)",
            params![
                revision,
                principal.username.as_str(),
                fields::encode_date(&Utc::now())
            ],
        )
        .await
        .map_err(|e| {
            crate::db::DatabaseError::sql_execution(format!(
                "Failed to record revision {}: {}",
                revision, e
            ))
        })?;
        Ok(())
    }

    async fn write(
        &self,
        conn: &Connection,
        saves: Vec<Node>,
        deletes: Vec<NodeId>,
        mode: SaveMode,
        revision: Option<i64>,
        principal: &Principal,
    ) -> Result<Vec<NodeId>, NodeServiceError> {
        let mut deleted = HashSet::new();
        let deletes: Vec<NodeId> = deletes
            .into_iter()
            .filter(|k| deleted.insert(k.clone()))
            .collect();
        for key in &deletes {
            if !self.nodes.exists(conn, key).await? {
                return Err(NodeServiceError::not_found(format!("Node {}", key)));
            }
        }

        let batch = self.validator.validate(saves, principal).await?;
        let saving: HashSet<NodeId> = batch.nodes.iter().map(Node::identifier).collect();
        for target in &batch.targets {
            let present = saving.contains(target)
                || (!deleted.contains(target) && self.nodes.exists(conn, target).await?);
            if !present {
                return Err(NodeServiceError::bad_request(format!(
                    "Reference target {} does not exist",
                    target
                )));
            }
        }

        let keys: Vec<NodeId> = batch.nodes.iter().map(Node::identifier).collect();
        let mut inserted = Vec::new();
        let mut updated = Vec::new();
        for node in batch.nodes {
            let key = node.identifier();
            let existing = if deleted.contains(&key) {
                None
            } else {
                self.nodes.get(conn, &key).await?
            };
            match (mode, existing) {
                (SaveMode::Insert, Some(_)) => {
                    return Err(NodeServiceError::bad_request(format!(
                        "Node {} already exists",
                        key
                    )))
                }
                (SaveMode::Update, None) => {
                    return Err(NodeServiceError::not_found(format!("Node {}", key)))
                }
                (_, None) => inserted.push(node),
                (_, Some(row)) => updated.push((node, row)),
            }
        }

        if let Some(revision) = revision {
            Self::ensure_revision(conn, revision, principal).await?;
        }

        self.delete_nodes(conn, &deletes, revision).await?;

        let mut node_diff = SlotDiff::<NodeId, Node>::default();
        node_diff.inserts = inserted
            .iter()
            .map(|n| (n.identifier(), n.without_attributes()))
            .collect();
        node_diff.updates = updated
            .iter()
            .map(|(n, row)| (n.identifier(), n.without_attributes(), row))
            .filter(|(_, new_row, old_row)| new_row != *old_row)
            .map(|(k, new_row, _)| (k, new_row))
            .collect();
        self.nodes.insert_all(conn, &node_diff.inserts).await?;
        self.nodes.update_all(conn, &node_diff.updates).await?;

        let mut text_diff = SlotDiff::default();
        let mut reference_diff = SlotDiff::default();
        for node in &inserted {
            text_diff.extend(SlotDiff::between(&BTreeMap::new(), &text_rows(node)));
            reference_diff.extend(SlotDiff::between(&BTreeMap::new(), &reference_rows(node)));
        }
        for (node, _) in &updated {
            let key = node.identifier();
            let current_texts: BTreeMap<_, _> = self
                .texts
                .entries(conn, &slots_of("v", &key))
                .await?
                .into_iter()
                .collect();
            let current_references: BTreeMap<_, _> = self
                .references
                .entries(conn, &slots_of("r", &key))
                .await?
                .into_iter()
                .collect();
            text_diff.extend(SlotDiff::between(&current_texts, &text_rows(node)));
            reference_diff.extend(SlotDiff::between(&current_references, &reference_rows(node)));
        }

        self.texts.delete_all(conn, &text_diff.deletes).await?;
        self.references.delete_all(conn, &reference_diff.deletes).await?;
        self.texts.update_all(conn, &text_diff.updates).await?;
        self.references.update_all(conn, &reference_diff.updates).await?;
        self.texts.insert_all(conn, &text_diff.inserts).await?;
        self.references.insert_all(conn, &reference_diff.inserts).await?;

        if let Some(revision) = revision {
            self.nodes_aud
                .insert_all(conn, &node_diff.audit_entries(revision))
                .await?;
            self.texts_aud
                .insert_all(conn, &text_diff.audit_entries(revision))
                .await?;
            self.references_aud
                .insert_all(conn, &reference_diff.audit_entries(revision))
                .await?;
        }

        tracing::debug!(
            "Wrote {} node rows, {} text slots and {} reference slots (revision: {:?})",
            node_diff.inserts.len() + node_diff.updates.len(),
            text_diff.inserts.len() + text_diff.updates.len() + text_diff.deletes.len(),
            reference_diff.inserts.len()
                + reference_diff.updates.len()
                + reference_diff.deletes.len(),
            revision
        );

        Ok(keys)
    }

    /// Remove nodes with all their slots and every reference targeting them
    async fn delete_nodes(
        &self,
        conn: &Connection,
        keys: &[NodeId],
        revision: Option<i64>,
    ) -> Result<(), NodeServiceError> {
        if keys.is_empty() {
            return Ok(());
        }

        let mut text_slots = Vec::new();
        let mut reference_slots = Vec::new();
        for key in keys {
            text_slots.extend(self.texts.keys(conn, &slots_of("v", key)).await?);
            reference_slots.extend(self.references.keys(conn, &slots_of("r", key)).await?);
            reference_slots.extend(self.references.keys(conn, &slots_targeting(key)).await?);
        }
        reference_slots.sort();
        reference_slots.dedup();

        self.texts.delete_all(conn, &text_slots).await?;
        self.references.delete_all(conn, &reference_slots).await?;
        self.nodes.delete_all(conn, keys).await?;

        if let Some(revision) = revision {
            let text_entries: Vec<_> = text_slots
                .iter()
                .map(|k| (RevisionId::new(k.clone(), revision), AuditEntry::deleted()))
                .collect();
            self.texts_aud.insert_all(conn, &text_entries).await?;
            let reference_entries: Vec<_> = reference_slots
                .iter()
                .map(|k| (RevisionId::new(k.clone(), revision), AuditEntry::deleted()))
                .collect();
            self.references_aud.insert_all(conn, &reference_entries).await?;
            let node_entries: Vec<_> = keys
                .iter()
                .map(|k| (RevisionId::new(k.clone(), revision), AuditEntry::deleted()))
                .collect();
            self.nodes_aud.insert_all(conn, &node_entries).await?;
        }

        tracing::debug!(
            "Deleted {} nodes, {} text slots and {} reference slots",
            keys.len(),
            text_slots.len(),
            reference_slots.len()
        );
        Ok(())
    }

    async fn select(
        &self,
        conn: &Connection,
        query: &Query<NodeId, Node>,
    ) -> Result<Vec<(NodeId, Node)>, NodeServiceError> {
        let filter = Self::sql_filter(query.spec.as_ref())?;
        match column_order(&query.sort) {
            Some(order_by) => Ok(self
                .nodes
                .entries_ordered(conn, &filter, &order_by, query.max)
                .await?),
            None => Ok(self.nodes.entries(conn, &filter).await?),
        }
    }
}

#[async_trait]
impl Service<NodeId, Node> for NodeRepository {
    async fn save_and_delete(
        &self,
        saves: Vec<Node>,
        deletes: Vec<NodeId>,
        mode: SaveMode,
        opts: &WriteOptions,
        principal: &Principal,
    ) -> Result<Vec<NodeId>, NodeServiceError> {
        if saves.is_empty() && deletes.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.db.connect_with_timeout().await?;
        DatabaseService::begin(&conn).await?;
        match self
            .write(&conn, saves, deletes, mode, opts.revision, principal)
            .await
        {
            Ok(keys) => {
                DatabaseService::commit(&conn).await?;
                Ok(keys)
            }
            Err(e) => {
                DatabaseService::rollback(&conn).await;
                Err(e)
            }
        }
    }

    async fn values(
        &self,
        query: &Query<NodeId, Node>,
        _principal: &Principal,
    ) -> Result<Vec<Node>, NodeServiceError> {
        let conn = self.db.connect_with_timeout().await?;
        let rows = self.select(&conn, query).await?;

        let mut nodes = Vec::with_capacity(rows.len());
        for (_, row) in rows {
            nodes.push(self.hydrate(&conn, row).await?);
        }

        if column_order(&query.sort).is_none() {
            nodes.sort_by(|a, b| compare_nodes(&query.sort, a, b));
            if let Some(max) = query.max {
                nodes.truncate(max);
            }
        }
        Ok(nodes)
    }

    async fn keys(
        &self,
        query: &Query<NodeId, Node>,
        principal: &Principal,
    ) -> Result<Vec<NodeId>, NodeServiceError> {
        if column_order(&query.sort).is_none() {
            let nodes = self.values(query, principal).await?;
            return Ok(nodes.iter().map(Node::identifier).collect());
        }

        let conn = self.db.connect_with_timeout().await?;
        Ok(self
            .select(&conn, query)
            .await?
            .into_iter()
            .map(|(key, _)| key)
            .collect())
    }

    async fn count(
        &self,
        spec: &SpecRef<NodeId, Node>,
        _principal: &Principal,
    ) -> Result<usize, NodeServiceError> {
        let filter = Self::sql_filter(spec.as_ref())?;
        let conn = self.db.connect_with_timeout().await?;
        Ok(self.nodes.count(&conn, &filter).await?)
    }

    async fn exists(&self, key: &NodeId, _principal: &Principal) -> Result<bool, NodeServiceError> {
        let conn = self.db.connect_with_timeout().await?;
        Ok(self.nodes.exists(&conn, key).await?)
    }

    async fn get(&self, key: &NodeId, _principal: &Principal) -> Result<Option<Node>, NodeServiceError> {
        let conn = self.db.connect_with_timeout().await?;
        match self.nodes.get(&conn, key).await? {
            Some(row) => Ok(Some(self.hydrate(&conn, row).await?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ReferenceAttribute, TextAttribute, TypeDef, TypeId};
    use crate::query::{MatchAll, NodesByProperty};
    use crate::services::type_resolver::InMemoryTypeResolver;
    use anyhow::Result;
    use tempfile::TempDir;
    use uuid::Uuid;

    struct Fixture {
        repository: NodeRepository,
        db: Arc<DatabaseService>,
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
        Ok(Fixture {
            repository: NodeRepository::new(db.clone(), resolver, 100),
            db,
            person,
            _temp_dir: temp_dir,
        })
    }

    fn principal() -> Principal {
        Principal::user("ann")
    }

    fn revision(number: i64) -> WriteOptions {
        WriteOptions::default().with_revision(number)
    }

    async fn audit_types(db: &DatabaseService, table: &str, revision: i64) -> Result<Vec<(i64, String)>> {
        let conn = db.connect_with_timeout().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT value_index, revision_type FROM {} WHERE revision = ? ORDER BY value_index",
                    table
                ),
                params![revision],
            )
            .await?;
        let mut result = Vec::new();
        while let Some(row) = rows.next().await? {
            result.push((row.get::<i64>(0)?, row.get::<String>(1)?));
        }
        Ok(result)
    }

    async fn audit_count(db: &DatabaseService, table: &str, revision: i64) -> Result<i64> {
        let conn = db.connect_with_timeout().await?;
        let mut rows = conn
            .query(
                &format!("SELECT COUNT(*) FROM {} WHERE revision = ?", table),
                params![revision],
            )
            .await?;
        Ok(rows.next().await?.expect("count row").get::<i64>(0)?)
    }

    #[test]
    fn test_missing_sort_values_order_last() {
        let t = TypeId::new(Uuid::new_v4(), "Person");
        let coded = Node::new(Uuid::new_v4(), t.clone()).with_code("P-1");
        let bare = Node::new(Uuid::new_v4(), t);

        for sort in [Sort::asc("code"), Sort::desc("code")] {
            assert_eq!(compare_nodes(&[sort.clone()], &coded, &bare), Ordering::Less);
            assert_eq!(compare_nodes(&[sort], &bare, &coded), Ordering::Greater);
        }
    }

    #[test]
    fn test_column_order_puts_nulls_last_and_breaks_ties_by_key() {
        let order = column_order(&[Sort::desc("createdBy")]).unwrap();
        assert_eq!(
            order,
            vec![
                "n.created_by IS NULL",
                "n.created_by DESC",
                "n.graph_id",
                "n.type_id",
                "n.id"
            ]
        );
        assert!(column_order(&[Sort::asc("properties.name")]).is_none());
    }

    #[test]
    fn test_slot_diff_is_minimal() {
        let old: BTreeMap<i64, &str> = [(0, "Ann"), (1, "Bob")].into_iter().collect();
        let new: BTreeMap<i64, &str> = [(0, "Ann"), (1, "Bea"), (2, "Cid")].into_iter().collect();

        let diff = SlotDiff::between(&old, &new);
        assert_eq!(diff.inserts, vec![(2, "Cid")]);
        assert_eq!(diff.updates, vec![(1, "Bea")]);
        assert!(diff.deletes.is_empty());

        let diff = SlotDiff::between(&new, &old);
        assert_eq!(diff.deletes, vec![2]);
    }

    #[tokio::test]
    async fn test_insert_and_read_back() -> Result<()> {
        let f = setup().await?;
        let node = Node::new(Uuid::new_v4(), f.person.clone())
            .with_code("p-1")
            .with_number(1)
            .with_property("name", LangValue::new("en", "Ann"))
            .with_property("name", LangValue::new("fi", "Anna"));

        let key = f
            .repository
            .save(node.clone(), SaveMode::Insert, &WriteOptions::default(), &principal())
            .await?;

        assert_eq!(f.repository.get(&key, &principal()).await?, Some(node));
        Ok(())
    }

    #[tokio::test]
    async fn test_adding_a_value_writes_one_insert_audit_row() -> Result<()> {
        let f = setup().await?;
        let node = Node::new(Uuid::new_v4(), f.person.clone()).with_property("name", LangValue::new("", "Ann"));
        f.repository
            .save(node.clone(), SaveMode::Insert, &revision(1), &principal())
            .await?;

        let updated = node.with_property("name", LangValue::new("", "Anna"));
        f.repository
            .save(updated.clone(), SaveMode::Update, &revision(2), &principal())
            .await?;

        assert_eq!(
            audit_types(&f.db, "node_text_attribute_value_aud", 2).await?,
            vec![(1, "INSERT".to_string())]
        );
        assert_eq!(audit_count(&f.db, "node_aud", 2).await?, 0);
        assert_eq!(f.repository.get(&updated.identifier(), &principal()).await?, Some(updated));
        Ok(())
    }

    #[tokio::test]
    async fn test_save_modes() -> Result<()> {
        let f = setup().await?;
        let node = Node::new(Uuid::new_v4(), f.person.clone());
        let opts = WriteOptions::default();

        assert!(matches!(
            f.repository.save(node.clone(), SaveMode::Update, &opts, &principal()).await,
            Err(NodeServiceError::NotFound(_))
        ));
        f.repository.save(node.clone(), SaveMode::Upsert, &opts, &principal()).await?;
        assert!(matches!(
            f.repository.save(node.clone(), SaveMode::Insert, &opts, &principal()).await,
            Err(NodeServiceError::BadRequest(_))
        ));
        f.repository.save(node, SaveMode::Upsert, &opts, &principal()).await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_batch_is_all_or_nothing() -> Result<()> {
        let f = setup().await?;
        let good = Node::new(Uuid::new_v4(), f.person.clone()).with_property("name", LangValue::new("", "Ann"));
        let bad = Node::new(Uuid::new_v4(), f.person.clone()).with_property("height", LangValue::new("", "170"));

        let result = f
            .repository
            .save_all(vec![good.clone(), bad], SaveMode::Insert, &WriteOptions::default(), &principal())
            .await;
        assert!(matches!(result, Err(NodeServiceError::BadRequest(_))));
        assert!(!f.repository.exists(&good.identifier(), &principal()).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_removes_slots_and_incoming_references() -> Result<()> {
        let f = setup().await?;
        let b = Node::new(Uuid::new_v4(), f.person.clone()).with_property("name", LangValue::new("", "Bob"));
        let a = Node::new(Uuid::new_v4(), f.person.clone()).with_reference("knows", b.identifier());
        f.repository
            .save_all(vec![a.clone(), b.clone()], SaveMode::Insert, &revision(1), &principal())
            .await?;

        let stored_b = f.repository.get(&b.identifier(), &principal()).await?.expect("b");
        assert_eq!(stored_b.referrers["knows"], vec![a.identifier()]);

        f.repository
            .delete(b.identifier(), &revision(2), &principal())
            .await?;

        let conn = f.db.connect_with_timeout().await?;
        let remaining = SqlDao::<TextValueMapper>::new(10)
            .count(&conn, &slots_of("v", &b.identifier()))
            .await?;
        assert_eq!(remaining, 0);
        assert_eq!(
            audit_types(&f.db, "node_text_attribute_value_aud", 2).await?,
            vec![(0, "DELETE".to_string())]
        );

        let stored_a = f.repository.get(&a.identifier(), &principal()).await?.expect("a");
        assert!(stored_a.references.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_of_missing_node_is_not_found() -> Result<()> {
        let f = setup().await?;
        let missing = NodeId::new(Uuid::new_v4(), f.person.clone());
        assert!(matches!(
            f.repository.delete(missing, &WriteOptions::default(), &principal()).await,
            Err(NodeServiceError::NotFound(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_reference_target_is_bad_request() -> Result<()> {
        let f = setup().await?;
        let a = Node::new(Uuid::new_v4(), f.person.clone())
            .with_reference("knows", NodeId::new(Uuid::new_v4(), f.person.clone()));
        assert!(matches!(
            f.repository.save(a, SaveMode::Insert, &WriteOptions::default(), &principal()).await,
            Err(NodeServiceError::BadRequest(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_values_filter_sort_and_cap() -> Result<()> {
        let f = setup().await?;
        let nodes: Vec<Node> = ["Cid", "ann", "Bob"]
            .iter()
            .enumerate()
            .map(|(i, name)| {
                Node::new(Uuid::new_v4(), f.person.clone())
                    .with_number(i as i64 + 1)
                    .with_property("name", LangValue::new("", *name))
            })
            .collect();
        f.repository
            .save_all(nodes, SaveMode::Insert, &WriteOptions::default(), &principal())
            .await?;

        let by_name = Query::new(Arc::new(MatchAll) as SpecRef<NodeId, Node>)
            .sorted_by(Sort::asc("properties.name"))
            .with_max(2);
        let names: Vec<String> = f
            .repository
            .values(&by_name, &principal())
            .await?
            .iter()
            .filter_map(|n| n.first_property_value("name").map(str::to_string))
            .collect();
        assert_eq!(names, vec!["ann", "Bob"]);

        let by_number = Query::new(Arc::new(MatchAll) as SpecRef<NodeId, Node>)
            .sorted_by(Sort::desc("number"))
            .with_max(1);
        let top = f.repository.values(&by_number, &principal()).await?;
        assert_eq!(top[0].number, 3);

        let spec: SpecRef<NodeId, Node> = Arc::new(NodesByProperty::new("name", "Bob"));
        assert_eq!(f.repository.count(&spec, &principal()).await?, 1);
        Ok(())
    }
}
