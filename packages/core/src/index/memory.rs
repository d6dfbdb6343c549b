//! In-process search index
//!
//! # Architecture
//!
//! - **Pending buffer**: `index`/`delete` only queue operations
//! - **Visible segment**: postings (field → term → document keys), sort
//!   values and payloads; queries read only this
//! - **Refresh**: moves the queued operations into the segment under its
//!   write lock; `await_refresh` bounds that wait
//! - **Background refresher**: optional periodic refresh task, stopped by
//!   `close()` or when the index is dropped

use crate::index::document::Document;
use crate::index::error::IndexError;
use crate::index::{DocumentConverter, Index};
use crate::query::{SearchQuery, Sort};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

enum PendingOp<K> {
    Put(K, Document),
    Remove(String),
}

struct Segment<K> {
    docs: BTreeMap<String, (K, Document)>,
    postings: HashMap<String, BTreeMap<String, BTreeSet<String>>>,
}

impl<K> Segment<K> {
    fn new() -> Self {
        Self {
            docs: BTreeMap::new(),
            postings: HashMap::new(),
        }
    }

    fn put(&mut self, key: K, doc: Document) {
        self.remove(&doc.key);
        for (field, term) in doc.terms() {
            self.postings
                .entry(field.to_string())
                .or_default()
                .entry(term.to_string())
                .or_default()
                .insert(doc.key.clone());
        }
        self.docs.insert(doc.key.clone(), (key, doc));
    }

    fn remove(&mut self, doc_key: &str) {
        let Some((_, old)) = self.docs.remove(doc_key) else {
            return;
        };
        for (field, term) in old.terms() {
            if let Some(terms) = self.postings.get_mut(field) {
                if let Some(keys) = terms.get_mut(term) {
                    keys.remove(doc_key);
                    if keys.is_empty() {
                        terms.remove(term);
                    }
                }
            }
        }
    }

    fn all(&self) -> BTreeSet<String> {
        self.docs.keys().cloned().collect()
    }

    fn union_of<'a, I>(sets: I) -> BTreeSet<String>
    where
        I: Iterator<Item = &'a BTreeSet<String>>,
    {
        sets.flatten().cloned().collect()
    }

    fn eval(&self, query: &SearchQuery) -> BTreeSet<String> {
        match query {
            SearchQuery::MatchAll => self.all(),
            SearchQuery::MatchNone => BTreeSet::new(),
            SearchQuery::Term { field, value } => self
                .postings
                .get(field)
                .and_then(|terms| terms.get(value))
                .cloned()
                .unwrap_or_default(),
            SearchQuery::Prefix { field, value } => match self.postings.get(field) {
                Some(terms) => Self::union_of(
                    terms
                        .range::<String, _>((Bound::Included(value), Bound::Unbounded))
                        .take_while(|(term, _)| term.starts_with(value.as_str()))
                        .map(|(_, keys)| keys),
                ),
                None => BTreeSet::new(),
            },
            SearchQuery::Range {
                field,
                lower,
                upper,
            } => match self.postings.get(field) {
                Some(terms) => {
                    let lower = lower.as_ref().map_or(Bound::Unbounded, Bound::Included);
                    let upper = upper.as_ref().map_or(Bound::Unbounded, Bound::Included);
                    if let (Bound::Included(l), Bound::Included(u)) = (lower, upper) {
                        if l > u {
                            return BTreeSet::new();
                        }
                    }
                    Self::union_of(terms.range::<String, _>((lower, upper)).map(|(_, keys)| keys))
                }
                None => BTreeSet::new(),
            },
            SearchQuery::Bool {
                must,
                should,
                must_not,
            } => {
                let mut result = match must.split_first() {
                    Some((first, rest)) => {
                        let mut acc = self.eval(first);
                        for q in rest {
                            if acc.is_empty() {
                                break;
                            }
                            let next = self.eval(q);
                            acc.retain(|k| next.contains(k));
                        }
                        acc
                    }
                    None if should.is_empty() => self.all(),
                    None => BTreeSet::new(),
                };

                if !should.is_empty() {
                    let any: BTreeSet<String> =
                        should.iter().flat_map(|q| self.eval(q)).collect();
                    if must.is_empty() {
                        result = any;
                    } else {
                        result.retain(|k| any.contains(k));
                    }
                }

                for q in must_not {
                    let excluded = self.eval(q);
                    result.retain(|k| !excluded.contains(k));
                }
                result
            }
        }
    }

    /// Matching documents in sort order, capped at `max`
    fn search(&self, query: &SearchQuery, sort: &[Sort], max: Option<usize>) -> Vec<&(K, Document)> {
        let mut hits: Vec<&(K, Document)> = self
            .eval(query)
            .iter()
            .filter_map(|key| self.docs.get(key))
            .collect();

        if !sort.is_empty() {
            hits.sort_by(|(_, a), (_, b)| compare_documents(a, b, sort));
        }
        if let Some(max) = max {
            hits.truncate(max);
        }
        hits
    }
}

/// Missing sort values order last regardless of direction
fn compare_documents(a: &Document, b: &Document, sort: &[Sort]) -> Ordering {
    for s in sort {
        let ordering = match (a.sortables.get(&s.field), b.sortables.get(&s.field)) {
            (Some(x), Some(y)) if s.desc => y.cmp(x),
            (Some(x), Some(y)) => x.cmp(y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    a.key.cmp(&b.key)
}

pub struct MemoryIndex<K, V> {
    converter: Arc<dyn DocumentConverter<K, V>>,
    pending: Mutex<Vec<PendingOp<K>>>,
    segment: RwLock<Segment<K>>,
    closed: AtomicBool,
    refresher: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl<K, V> MemoryIndex<K, V>
where
    K: Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub fn new(converter: Arc<dyn DocumentConverter<K, V>>) -> Self {
        Self {
            converter,
            pending: Mutex::new(Vec::new()),
            segment: RwLock::new(Segment::new()),
            closed: AtomicBool::new(false),
            refresher: std::sync::Mutex::new(None),
        }
    }

    /// Refresh every `interval` until closed or dropped
    pub fn spawn_refresher(self: &Arc<Self>, interval: Duration) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(index) = weak.upgrade() else {
                    break;
                };
                if index.closed.load(AtomicOrdering::Acquire) {
                    break;
                }
                if let Err(e) = index.apply_pending().await {
                    tracing::warn!("Background index refresh failed: {}", e);
                }
            }
            tracing::debug!("Index refresher stopped");
        });

        if let Ok(mut slot) = self.refresher.lock() {
            if let Some(previous) = slot.replace(handle) {
                previous.abort();
            }
        }
    }

    fn ensure_open(&self) -> Result<(), IndexError> {
        if self.closed.load(AtomicOrdering::Acquire) {
            return Err(IndexError::Closed);
        }
        Ok(())
    }

    async fn apply_pending(&self) -> Result<(), IndexError> {
        let mut segment = self.segment.write().await;
        let ops = std::mem::take(&mut *self.pending.lock().await);
        if ops.is_empty() {
            return Ok(());
        }

        let count = ops.len();
        for op in ops {
            match op {
                PendingOp::Put(key, doc) => segment.put(key, doc),
                PendingOp::Remove(doc_key) => segment.remove(&doc_key),
            }
        }
        tracing::debug!("Index refresh applied {} operations", count);
        Ok(())
    }

    fn decode(&self, doc: &Document) -> Result<V, IndexError> {
        self.converter.from_document(doc).map(|(_, value)| value)
    }
}

#[async_trait]
impl<K, V> Index<K, V> for MemoryIndex<K, V>
where
    K: Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    async fn index(&self, entries: Vec<(K, V)>) -> Result<(), IndexError> {
        self.ensure_open()?;
        let mut ops = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let doc = self.converter.to_document(&key, &value)?;
            ops.push(PendingOp::Put(key, doc));
        }
        self.pending.lock().await.extend(ops);
        Ok(())
    }

    async fn delete(&self, keys: &[K]) -> Result<(), IndexError> {
        self.ensure_open()?;
        let mut pending = self.pending.lock().await;
        pending.extend(
            keys.iter()
                .map(|k| PendingOp::Remove(self.converter.document_key(k))),
        );
        Ok(())
    }

    async fn refresh(&self) -> Result<(), IndexError> {
        self.ensure_open()?;
        self.apply_pending().await
    }

    async fn await_refresh(&self, timeout: Duration) -> Result<(), IndexError> {
        match tokio::time::timeout(timeout, self.refresh()).await {
            Ok(result) => result,
            Err(_) => Err(IndexError::RefreshTimeout {
                timeout_ms: timeout.as_millis(),
            }),
        }
    }

    async fn values(
        &self,
        query: &SearchQuery,
        sort: &[Sort],
        max: Option<usize>,
    ) -> Result<Vec<(K, V)>, IndexError> {
        self.ensure_open()?;
        let query = self.converter.normalize_query(query);
        let segment = self.segment.read().await;
        segment
            .search(&query, sort, max)
            .into_iter()
            .map(|(key, doc)| Ok((key.clone(), self.decode(doc)?)))
            .collect()
    }

    async fn keys(
        &self,
        query: &SearchQuery,
        sort: &[Sort],
        max: Option<usize>,
    ) -> Result<Vec<K>, IndexError> {
        self.ensure_open()?;
        let query = self.converter.normalize_query(query);
        let segment = self.segment.read().await;
        Ok(segment
            .search(&query, sort, max)
            .into_iter()
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn count(&self, query: &SearchQuery) -> Result<usize, IndexError> {
        self.ensure_open()?;
        let query = self.converter.normalize_query(query);
        Ok(self.segment.read().await.eval(&query).len())
    }

    async fn is_empty(&self) -> Result<bool, IndexError> {
        self.ensure_open()?;
        Ok(self.segment.read().await.docs.is_empty())
    }

    async fn close(&self) {
        self.closed.store(true, AtomicOrdering::Release);
        if let Ok(mut slot) = self.refresher.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
        self.pending.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::NodeDocumentConverter;
    use crate::models::{LangValue, Node, NodeId, TypeId};
    use crate::query::fields;
    use uuid::Uuid;

    fn index() -> MemoryIndex<NodeId, Node> {
        MemoryIndex::new(Arc::new(NodeDocumentConverter::new(100)))
    }

    fn labeled(t: &TypeId, number: i64, label: &str) -> (NodeId, Node) {
        let node = Node::new(Uuid::new_v4(), t.clone())
            .with_number(number)
            .with_property("label", LangValue::new("en", label));
        (node.identifier(), node)
    }

    #[tokio::test]
    async fn test_writes_are_invisible_until_refresh() {
        let t = TypeId::new(Uuid::new_v4(), "T");
        let index = index();
        index.index(vec![labeled(&t, 1, "one")]).await.unwrap();

        assert!(index.is_empty().await.unwrap());
        index.refresh().await.unwrap();
        assert_eq!(index.count(&SearchQuery::MatchAll).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_reindexing_replaces_old_terms() {
        let t = TypeId::new(Uuid::new_v4(), "T");
        let index = index();
        let (key, node) = labeled(&t, 1, "old");
        index.index(vec![(key.clone(), node.clone())]).await.unwrap();
        index.refresh().await.unwrap();

        let renamed = node.clone().with_property("label", LangValue::new("en", "new"));
        index.index(vec![(key.clone(), renamed)]).await.unwrap();
        index.refresh().await.unwrap();

        let old = SearchQuery::term(fields::property_text("label", None), "old");
        let new = SearchQuery::term(fields::property_text("label", None), "new");
        assert_eq!(index.count(&old).await.unwrap(), 1);
        assert_eq!(index.count(&new).await.unwrap(), 1);

        let only_new = Node::new(key.id, t.clone()).with_property("label", LangValue::new("en", "new"));
        index.index(vec![(key.clone(), only_new)]).await.unwrap();
        index.refresh().await.unwrap();
        assert_eq!(index.count(&old).await.unwrap(), 0);

        index.delete(&[key]).await.unwrap();
        index.refresh().await.unwrap();
        assert!(index.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_bool_prefix_range_and_sort() {
        let t = TypeId::new(Uuid::new_v4(), "T");
        let index = index();
        index
            .index(vec![
                labeled(&t, 1, "apple"),
                labeled(&t, 2, "apricot"),
                labeled(&t, 3, "banana"),
            ])
            .await
            .unwrap();
        index.refresh().await.unwrap();

        let string_field = fields::property_string("label", None);
        let prefix = SearchQuery::Prefix {
            field: string_field.clone(),
            value: "ap".to_string(),
        };
        assert_eq!(index.count(&prefix).await.unwrap(), 2);

        let range = SearchQuery::Range {
            field: string_field.clone(),
            lower: Some("apricot".to_string()),
            upper: None,
        };
        assert_eq!(index.count(&range).await.unwrap(), 2);

        let not_apple = SearchQuery::must_not(SearchQuery::term(string_field, "apple"));
        let sorted = index
            .values(&not_apple, &[Sort::desc(fields::NUMBER)], Some(1))
            .await
            .unwrap();
        assert_eq!(sorted.len(), 1);
        assert_eq!(sorted[0].1.number, 3);

        let by_label = index
            .keys(&SearchQuery::MatchAll, &[Sort::asc("properties.label")], None)
            .await
            .unwrap();
        assert_eq!(by_label.len(), 3);
    }

    #[tokio::test]
    async fn test_values_longer_than_term_limit_still_match() {
        use crate::query::{NodesByProperty, NodesByPropertyPrefix, Specification};

        let t = TypeId::new(Uuid::new_v4(), "T");
        let index: MemoryIndex<NodeId, Node> = MemoryIndex::new(Arc::new(NodeDocumentConverter::new(8)));
        let long = "x".repeat(20);
        let node = Node::new(Uuid::new_v4(), t).with_property("note", LangValue::new("", long.as_str()));
        let key = node.identifier();
        index.index(vec![(key.clone(), node.clone())]).await.unwrap();
        index.refresh().await.unwrap();

        let exact = NodesByProperty::new("note", long.as_str());
        assert!(exact.test(&key, &node));
        let hits = index.keys(&exact.search_query().unwrap(), &[], None).await.unwrap();
        assert_eq!(hits, vec![key.clone()]);

        let prefix = NodesByPropertyPrefix::new("note", "x".repeat(12));
        assert!(prefix.test(&key, &node));
        assert_eq!(index.count(&prefix.search_query().unwrap()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_closed_index_rejects_calls() {
        let index = index();
        index.close().await;
        assert!(matches!(index.is_empty().await, Err(IndexError::Closed)));
        assert!(matches!(index.refresh().await, Err(IndexError::Closed)));
    }

    #[tokio::test]
    async fn test_background_refresher_publishes_writes() {
        let t = TypeId::new(Uuid::new_v4(), "T");
        let index = Arc::new(index());
        index.spawn_refresher(Duration::from_millis(10));
        index.index(vec![labeled(&t, 1, "one")]).await.unwrap();

        let mut visible = false;
        for _ in 0..100 {
            if !index.is_empty().await.unwrap() {
                visible = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(visible);
        index.close().await;
    }
}
