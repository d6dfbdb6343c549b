//! Specifications and Queries
//!
//! A [`Specification`] is an immutable predicate over `(key, value)` pairs
//! with up to two optional renderings: a SQL `WHERE` fragment for the
//! relational store and a [`SearchQuery`] for the search index.
//!
//! # Architecture
//!
//! - **Capabilities**: a leaf implements `sql()`, `search_query()`, or both.
//!   A capability it lacks returns `None`.
//! - **Combinators**: [`And`], [`Or`] and [`Not`] support a capability only
//!   when every child does, so a single call at the root tells whether the
//!   whole tree can run on a backend.
//! - **Routing**: [`route`] picks the index when the whole tree is
//!   search-capable and the index is usable, the relational store when the
//!   whole tree is SQL-capable, and fails otherwise. Trees are never split
//!   across backends.

pub mod fields;
mod node_specs;

pub use node_specs::*;

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Shared handle to a specification tree
pub type SpecRef<K, V> = Arc<dyn Specification<K, V>>;

/// Errors raised while planning a query
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// Neither backend can execute the whole tree
    #[error("Specification is not executable by any single backend: {0}")]
    NotExecutable(String),

    /// Tree can only run on the index but the index is not usable
    #[error("Specification requires the search index, which is not available: {0}")]
    IndexUnavailable(String),
}

/// A relational `WHERE` fragment with positional parameters
///
/// Fragments for node specifications refer to the node table as `n`.
#[derive(Debug, Clone)]
pub struct SqlFragment {
    pub clause: String,
    pub params: Vec<libsql::Value>,
}

impl SqlFragment {
    pub fn new(clause: impl Into<String>, params: Vec<libsql::Value>) -> Self {
        Self {
            clause: clause.into(),
            params,
        }
    }

    /// Fragment without parameters
    pub fn raw(clause: impl Into<String>) -> Self {
        Self::new(clause, Vec::new())
    }

    /// Join fragments with `op`, concatenating parameters in order
    fn join(fragments: Vec<SqlFragment>, op: &str, empty: &str) -> SqlFragment {
        if fragments.is_empty() {
            return SqlFragment::raw(empty);
        }

        let mut clauses = Vec::with_capacity(fragments.len());
        let mut params = Vec::new();
        for fragment in fragments {
            clauses.push(format!("({})", fragment.clause));
            params.extend(fragment.params);
        }

        SqlFragment::new(clauses.join(&format!(" {} ", op)), params)
    }
}

/// Backend-neutral search query consumed by the index
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchQuery {
    MatchAll,
    MatchNone,
    /// Exact term in a field
    Term { field: String, value: String },
    /// Any term in a field starting with `value`
    Prefix { field: String, value: String },
    /// Terms between the bounds, both inclusive; `None` is unbounded
    Range {
        field: String,
        lower: Option<String>,
        upper: Option<String>,
    },
    /// All of `must`, at least one of `should` when non-empty, none of `must_not`
    Bool {
        must: Vec<SearchQuery>,
        should: Vec<SearchQuery>,
        must_not: Vec<SearchQuery>,
    },
}

impl SearchQuery {
    pub fn term(field: impl Into<String>, value: impl Into<String>) -> Self {
        SearchQuery::Term {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn must(queries: Vec<SearchQuery>) -> Self {
        SearchQuery::Bool {
            must: queries,
            should: Vec::new(),
            must_not: Vec::new(),
        }
    }

    pub fn should(queries: Vec<SearchQuery>) -> Self {
        if queries.is_empty() {
            return SearchQuery::MatchNone;
        }
        SearchQuery::Bool {
            must: Vec::new(),
            should: queries,
            must_not: Vec::new(),
        }
    }

    pub fn must_not(query: SearchQuery) -> Self {
        SearchQuery::Bool {
            must: vec![SearchQuery::MatchAll],
            should: Vec::new(),
            must_not: vec![query],
        }
    }
}

/// Composable predicate with optional backend renderings
pub trait Specification<K, V>: fmt::Debug + Send + Sync {
    /// In-memory evaluation
    fn test(&self, key: &K, value: &V) -> bool;

    /// Relational rendering, if supported
    fn sql(&self) -> Option<SqlFragment> {
        None
    }

    /// Search index rendering, if supported
    fn search_query(&self) -> Option<SearchQuery> {
        None
    }
}

/// Matches everything
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchAll;

impl<K, V> Specification<K, V> for MatchAll {
    fn test(&self, _key: &K, _value: &V) -> bool {
        true
    }

    fn sql(&self) -> Option<SqlFragment> {
        Some(SqlFragment::raw("1 = 1"))
    }

    fn search_query(&self) -> Option<SearchQuery> {
        Some(SearchQuery::MatchAll)
    }
}

/// Matches nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchNone;

impl<K, V> Specification<K, V> for MatchNone {
    fn test(&self, _key: &K, _value: &V) -> bool {
        false
    }

    fn sql(&self) -> Option<SqlFragment> {
        Some(SqlFragment::raw("1 = 0"))
    }

    fn search_query(&self) -> Option<SearchQuery> {
        Some(SearchQuery::MatchNone)
    }
}

/// Conjunction; empty matches everything
pub struct And<K, V> {
    pub specs: Vec<SpecRef<K, V>>,
}

/// Disjunction; empty matches nothing
pub struct Or<K, V> {
    pub specs: Vec<SpecRef<K, V>>,
}

/// Negation
pub struct Not<K, V> {
    pub spec: SpecRef<K, V>,
}

impl<K, V> fmt::Debug for And<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("And").field(&self.specs).finish()
    }
}

impl<K, V> fmt::Debug for Or<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Or").field(&self.specs).finish()
    }
}

impl<K, V> fmt::Debug for Not<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Not").field(&self.spec).finish()
    }
}

impl<K, V> Specification<K, V> for And<K, V> {
    fn test(&self, key: &K, value: &V) -> bool {
        self.specs.iter().all(|s| s.test(key, value))
    }

    fn sql(&self) -> Option<SqlFragment> {
        let fragments = self
            .specs
            .iter()
            .map(|s| s.sql())
            .collect::<Option<Vec<_>>>()?;
        Some(SqlFragment::join(fragments, "AND", "1 = 1"))
    }

    fn search_query(&self) -> Option<SearchQuery> {
        let queries = self
            .specs
            .iter()
            .map(|s| s.search_query())
            .collect::<Option<Vec<_>>>()?;
        if queries.is_empty() {
            return Some(SearchQuery::MatchAll);
        }
        Some(SearchQuery::must(queries))
    }
}

impl<K, V> Specification<K, V> for Or<K, V> {
    fn test(&self, key: &K, value: &V) -> bool {
        self.specs.iter().any(|s| s.test(key, value))
    }

    fn sql(&self) -> Option<SqlFragment> {
        let fragments = self
            .specs
            .iter()
            .map(|s| s.sql())
            .collect::<Option<Vec<_>>>()?;
        Some(SqlFragment::join(fragments, "OR", "1 = 0"))
    }

    fn search_query(&self) -> Option<SearchQuery> {
        let queries = self
            .specs
            .iter()
            .map(|s| s.search_query())
            .collect::<Option<Vec<_>>>()?;
        Some(SearchQuery::should(queries))
    }
}

impl<K, V> Specification<K, V> for Not<K, V> {
    fn test(&self, key: &K, value: &V) -> bool {
        !self.spec.test(key, value)
    }

    fn sql(&self) -> Option<SqlFragment> {
        let inner = self.spec.sql()?;
        Some(SqlFragment::new(format!("NOT ({})", inner.clause), inner.params))
    }

    fn search_query(&self) -> Option<SearchQuery> {
        Some(SearchQuery::must_not(self.spec.search_query()?))
    }
}

/// Hides the search rendering of the wrapped tree
///
/// Queries built from it always run on the relational store, which never
/// lags behind committed writes.
pub struct Relational<K, V> {
    pub spec: SpecRef<K, V>,
}

impl<K, V> fmt::Debug for Relational<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Relational").field(&self.spec).finish()
    }
}

impl<K, V> Specification<K, V> for Relational<K, V> {
    fn test(&self, key: &K, value: &V) -> bool {
        self.spec.test(key, value)
    }

    fn sql(&self) -> Option<SqlFragment> {
        self.spec.sql()
    }
}

pub fn and<K: 'static, V: 'static>(specs: Vec<SpecRef<K, V>>) -> SpecRef<K, V> {
    Arc::new(And { specs })
}

pub fn or<K: 'static, V: 'static>(specs: Vec<SpecRef<K, V>>) -> SpecRef<K, V> {
    Arc::new(Or { specs })
}

pub fn not<K: 'static, V: 'static>(spec: SpecRef<K, V>) -> SpecRef<K, V> {
    Arc::new(Not { spec })
}

pub fn relational<K: 'static, V: 'static>(spec: SpecRef<K, V>) -> SpecRef<K, V> {
    Arc::new(Relational { spec })
}

/// Sort key; field names are shared by both backends
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    pub field: String,
    pub desc: bool,
}

impl Sort {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            desc: false,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            desc: true,
        }
    }
}

/// A specification with sorting and a result cap
pub struct Query<K, V> {
    pub spec: SpecRef<K, V>,
    pub sort: Vec<Sort>,
    pub max: Option<usize>,
}

impl<K, V> Query<K, V> {
    pub fn new(spec: SpecRef<K, V>) -> Self {
        Self {
            spec,
            sort: Vec::new(),
            max: None,
        }
    }

    pub fn sorted_by(mut self, sort: Sort) -> Self {
        self.sort.push(sort);
        self
    }

    pub fn with_max(mut self, max: usize) -> Self {
        self.max = Some(max);
        self
    }
}

impl<K, V> Clone for Query<K, V> {
    fn clone(&self) -> Self {
        Self {
            spec: Arc::clone(&self.spec),
            sort: self.sort.clone(),
            max: self.max,
        }
    }
}

impl<K, V> fmt::Debug for Query<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("spec", &self.spec)
            .field("sort", &self.sort)
            .field("max", &self.max)
            .finish()
    }
}

/// Backend chosen for a specification, carrying its rendering
#[derive(Debug, Clone)]
pub enum Route {
    Index(SearchQuery),
    Sql(SqlFragment),
}

/// Decide which backend runs `spec`
pub fn route<K, V>(spec: &dyn Specification<K, V>, index_usable: bool) -> Result<Route, QueryError> {
    if index_usable {
        if let Some(query) = spec.search_query() {
            return Ok(Route::Index(query));
        }
    }

    if let Some(fragment) = spec.sql() {
        return Ok(Route::Sql(fragment));
    }

    if spec.search_query().is_some() {
        return Err(QueryError::IndexUnavailable(format!("{:?}", spec)));
    }

    Err(QueryError::NotExecutable(format!("{:?}", spec)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct SqlOnly(&'static str);

    impl Specification<i64, i64> for SqlOnly {
        fn test(&self, _key: &i64, _value: &i64) -> bool {
            true
        }

        fn sql(&self) -> Option<SqlFragment> {
            Some(SqlFragment::new(self.0, vec![libsql::Value::Integer(1)]))
        }
    }

    #[derive(Debug)]
    struct SearchOnly;

    impl Specification<i64, i64> for SearchOnly {
        fn test(&self, _key: &i64, value: &i64) -> bool {
            *value > 0
        }

        fn search_query(&self) -> Option<SearchQuery> {
            Some(SearchQuery::term("f", "v"))
        }
    }

    #[test]
    fn test_empty_combinators_render_constants() {
        let empty_and: And<i64, i64> = And { specs: vec![] };
        let empty_or: Or<i64, i64> = Or { specs: vec![] };

        assert_eq!(empty_and.sql().unwrap().clause, "1 = 1");
        assert_eq!(empty_or.sql().unwrap().clause, "1 = 0");
        assert_eq!(empty_or.search_query(), Some(SearchQuery::MatchNone));
        assert!(empty_and.test(&1, &1));
        assert!(!empty_or.test(&1, &1));
    }

    #[test]
    fn test_and_joins_clauses_and_params_in_order() {
        let spec = and::<i64, i64>(vec![
            Arc::new(SqlOnly("a = ?")),
            Arc::new(SqlOnly("b = ?")),
        ]);
        let fragment = spec.sql().unwrap();
        assert_eq!(fragment.clause, "(a = ?) AND (b = ?)");
        assert_eq!(fragment.params.len(), 2);
    }

    #[test]
    fn test_not_wraps_clause() {
        let spec = not::<i64, i64>(Arc::new(SqlOnly("a = ?")));
        assert_eq!(spec.sql().unwrap().clause, "NOT (a = ?)");
        assert!(spec.search_query().is_none());
    }

    #[test]
    fn test_route_prefers_index_when_whole_tree_is_searchable() {
        let spec = and::<i64, i64>(vec![Arc::new(SearchOnly), Arc::new(MatchAll)]);
        assert!(matches!(route(spec.as_ref(), true), Ok(Route::Index(_))));
        assert_eq!(
            route(spec.as_ref(), false).unwrap_err(),
            QueryError::IndexUnavailable(format!("{:?}", spec))
        );
    }

    #[test]
    fn test_route_falls_back_to_sql() {
        let spec = or::<i64, i64>(vec![Arc::new(SqlOnly("a = ?")), Arc::new(MatchNone)]);
        assert!(matches!(route(spec.as_ref(), true), Ok(Route::Sql(_))));
    }

    #[test]
    fn test_relational_wrapper_forces_sql() {
        let spec = relational::<i64, i64>(Arc::new(MatchAll));
        assert!(spec.search_query().is_none());
        assert!(matches!(route(spec.as_ref(), true), Ok(Route::Sql(_))));
    }

    #[test]
    fn test_route_rejects_mixed_tree() {
        let spec = and::<i64, i64>(vec![Arc::new(SqlOnly("a = ?")), Arc::new(SearchOnly)]);
        assert!(matches!(
            route(spec.as_ref(), true),
            Err(QueryError::NotExecutable(_))
        ));
    }
}
