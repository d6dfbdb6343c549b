//! Generic Data Access Objects
//!
//! One generic implementation, [`SqlDao`], serves every table through an
//! explicit [`RowMapper`] that marshals keys and values to positional
//! parameters and back. [`AuditDao`] wraps the same mapper for the `_aud`
//! mirror of a table.
//!
//! # Batching
//!
//! `insert_all` writes multi-row `INSERT` statements. Each statement holds at
//! most `batch_size` rows and stays under SQLite's bound-variable limit, so
//! large inserts are chunked without the caller noticing. Chunking bounds the
//! statement size only; the surrounding transaction still spans the whole call.

use crate::db::error::DatabaseError;
use crate::models::{AuditEntry, RevisionId, RevisionType};
use crate::query::SqlFragment;
use async_trait::async_trait;
use libsql::params::Params;
use libsql::{Connection, Row, Value};
use std::marker::PhantomData;
use uuid::Uuid;

/// SQLite's default `SQLITE_MAX_VARIABLE_NUMBER`
const MAX_BOUND_VARIABLES: usize = 32_766;

/// Explicit marshalling between one table's rows and model types
pub trait RowMapper: Send + Sync + 'static {
    type Key: Clone + Send + Sync + 'static;
    type Value: Clone + PartialEq + Send + Sync + 'static;

    const TABLE: &'static str;
    /// Alias used in `SELECT` statements; filters refer to columns through it
    const ALIAS: &'static str;
    const KEY_COLUMNS: &'static [&'static str];
    const VALUE_COLUMNS: &'static [&'static str];

    fn key_params(key: &Self::Key) -> Vec<Value>;
    fn value_params(value: &Self::Value) -> Vec<Value>;

    /// Read the key from the row, starting at column 0
    fn map_key(row: &Row) -> Result<Self::Key, DatabaseError>;

    /// Read the value from the row, starting at column `offset`
    fn map_value(key: &Self::Key, row: &Row, offset: i32) -> Result<Self::Value, DatabaseError>;
}

/// Key/value access to a single table
///
/// Every method runs on the caller's connection, inside whatever transaction
/// the caller has open on it.
#[async_trait]
pub trait Dao<K, V>: Send + Sync
where
    K: Send + Sync,
    V: Send + Sync,
{
    async fn insert_all(&self, conn: &Connection, entries: &[(K, V)]) -> Result<(), DatabaseError>;

    async fn update_all(&self, conn: &Connection, entries: &[(K, V)]) -> Result<(), DatabaseError>;

    async fn delete_all(&self, conn: &Connection, keys: &[K]) -> Result<(), DatabaseError>;

    async fn get(&self, conn: &Connection, key: &K) -> Result<Option<V>, DatabaseError>;

    async fn exists(&self, conn: &Connection, key: &K) -> Result<bool, DatabaseError>;

    async fn entries(
        &self,
        conn: &Connection,
        filter: &SqlFragment,
    ) -> Result<Vec<(K, V)>, DatabaseError>;

    async fn keys(&self, conn: &Connection, filter: &SqlFragment) -> Result<Vec<K>, DatabaseError>;

    async fn count(&self, conn: &Connection, filter: &SqlFragment) -> Result<usize, DatabaseError>;
}

/// Table layout resolved at runtime, shared by the plain and audit DAOs
struct TableLayout {
    table: String,
    alias: &'static str,
    key_columns: Vec<&'static str>,
    value_columns: Vec<&'static str>,
}

impl TableLayout {
    fn all_columns(&self) -> Vec<&'static str> {
        self.key_columns
            .iter()
            .chain(self.value_columns.iter())
            .copied()
            .collect()
    }

    fn key_condition(&self, qualified: bool) -> String {
        self.key_columns
            .iter()
            .map(|c| {
                if qualified {
                    format!("{}.{} = ?", self.alias, c)
                } else {
                    format!("{} = ?", c)
                }
            })
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    fn select(&self, columns: &[&str], filter: &str) -> String {
        let columns = columns
            .iter()
            .map(|c| format!("{}.{}", self.alias, c))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "SELECT {} FROM {} {} WHERE {}",
            columns, self.table, self.alias, filter
        )
    }

    async fn insert_rows(
        &self,
        conn: &Connection,
        verb: &str,
        rows: Vec<Vec<Value>>,
        batch_size: usize,
    ) -> Result<(), DatabaseError> {
        let columns = self.all_columns();
        let per_statement = (MAX_BOUND_VARIABLES / columns.len()).min(batch_size).max(1);
        let placeholder = format!("({})", vec!["?"; columns.len()].join(", "));

        for chunk in rows.chunks(per_statement) {
            let sql = format!(
                "{} INTO {} ({}) VALUES {}",
                verb,
                self.table,
                columns.join(", "),
                vec![placeholder.as_str(); chunk.len()].join(", ")
            );
            let params: Vec<Value> = chunk.iter().flatten().cloned().collect();
            conn.execute(&sql, Params::Positional(params))
                .await
                .map_err(|e| {
                    DatabaseError::sql_execution(format!(
                        "Failed to insert {} rows into {}: {}",
                        chunk.len(),
                        self.table,
                        e
                    ))
                })?;
        }
        Ok(())
    }

    async fn query(
        &self,
        conn: &Connection,
        sql: &str,
        params: Vec<Value>,
    ) -> Result<Vec<Row>, DatabaseError> {
        let mut rows = conn
            .query(sql, Params::Positional(params))
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to query {}: {}", self.table, e))
            })?;

        let mut result = Vec::new();
        while let Some(row) = rows.next().await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to read {} row: {}", self.table, e))
        })? {
            result.push(row);
        }
        Ok(result)
    }

    async fn count(&self, conn: &Connection, filter: &SqlFragment) -> Result<usize, DatabaseError> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} {} WHERE {}",
            self.table, self.alias, filter.clause
        );
        let rows = self.query(conn, &sql, filter.params.clone()).await?;
        let count = match rows.first() {
            Some(row) => get_integer(row, 0, &self.table)?,
            None => 0,
        };
        Ok(count as usize)
    }
}

/// DAO over a table described by `M`
pub struct SqlDao<M> {
    batch_size: usize,
    layout: TableLayout,
    _mapper: PhantomData<fn() -> M>,
}

impl<M: RowMapper> SqlDao<M> {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            layout: TableLayout {
                table: M::TABLE.to_string(),
                alias: M::ALIAS,
                key_columns: M::KEY_COLUMNS.to_vec(),
                value_columns: M::VALUE_COLUMNS.to_vec(),
            },
            _mapper: PhantomData,
        }
    }

    fn map_entry(row: &Row) -> Result<(M::Key, M::Value), DatabaseError> {
        let key = M::map_key(row)?;
        let value = M::map_value(&key, row, M::KEY_COLUMNS.len() as i32)?;
        Ok((key, value))
    }

    /// Entries matching `filter`, ordered by raw `ORDER BY` terms and capped
    ///
    /// `order_by` terms are trusted SQL built by the caller, e.g. `n.number DESC`.
    pub async fn entries_ordered(
        &self,
        conn: &Connection,
        filter: &SqlFragment,
        order_by: &[String],
        limit: Option<usize>,
    ) -> Result<Vec<(M::Key, M::Value)>, DatabaseError> {
        let mut sql = self.layout.select(&self.layout.all_columns(), &filter.clause);
        if !order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&order_by.join(", "));
        }
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        self.layout
            .query(conn, &sql, filter.params.clone())
            .await?
            .iter()
            .map(Self::map_entry)
            .collect()
    }
}

#[async_trait]
impl<M: RowMapper> Dao<M::Key, M::Value> for SqlDao<M> {
    async fn insert_all(
        &self,
        conn: &Connection,
        entries: &[(M::Key, M::Value)],
    ) -> Result<(), DatabaseError> {
        if entries.is_empty() {
            return Ok(());
        }
        let rows = entries
            .iter()
            .map(|(k, v)| {
                let mut params = M::key_params(k);
                params.extend(M::value_params(v));
                params
            })
            .collect();
        self.layout
            .insert_rows(conn, "INSERT", rows, self.batch_size)
            .await
    }

    async fn update_all(
        &self,
        conn: &Connection,
        entries: &[(M::Key, M::Value)],
    ) -> Result<(), DatabaseError> {
        if entries.is_empty() {
            return Ok(());
        }
        let assignments = M::VALUE_COLUMNS
            .iter()
            .map(|c| format!("{} = ?", c))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            M::TABLE,
            assignments,
            self.layout.key_condition(false)
        );

        for (key, value) in entries {
            let mut params = M::value_params(value);
            params.extend(M::key_params(key));
            conn.execute(&sql, Params::Positional(params))
                .await
                .map_err(|e| {
                    DatabaseError::sql_execution(format!("Failed to update {}: {}", M::TABLE, e))
                })?;
        }
        Ok(())
    }

    async fn delete_all(&self, conn: &Connection, keys: &[M::Key]) -> Result<(), DatabaseError> {
        let sql = format!(
            "DELETE FROM {} WHERE {}",
            M::TABLE,
            self.layout.key_condition(false)
        );
        for key in keys {
            conn.execute(&sql, Params::Positional(M::key_params(key)))
                .await
                .map_err(|e| {
                    DatabaseError::sql_execution(format!(
                        "Failed to delete from {}: {}",
                        M::TABLE,
                        e
                    ))
                })?;
        }
        Ok(())
    }

    async fn get(&self, conn: &Connection, key: &M::Key) -> Result<Option<M::Value>, DatabaseError> {
        let sql = self
            .layout
            .select(&self.layout.all_columns(), &self.layout.key_condition(true));
        let rows = self.layout.query(conn, &sql, M::key_params(key)).await?;
        rows.first()
            .map(|row| M::map_value(key, row, M::KEY_COLUMNS.len() as i32))
            .transpose()
    }

    async fn exists(&self, conn: &Connection, key: &M::Key) -> Result<bool, DatabaseError> {
        let filter = SqlFragment::new(self.layout.key_condition(true), M::key_params(key));
        Ok(self.layout.count(conn, &filter).await? > 0)
    }

    async fn entries(
        &self,
        conn: &Connection,
        filter: &SqlFragment,
    ) -> Result<Vec<(M::Key, M::Value)>, DatabaseError> {
        self.entries_ordered(conn, filter, &[], None).await
    }

    async fn keys(
        &self,
        conn: &Connection,
        filter: &SqlFragment,
    ) -> Result<Vec<M::Key>, DatabaseError> {
        let sql = self.layout.select(&self.layout.key_columns, &filter.clause);
        self.layout
            .query(conn, &sql, filter.params.clone())
            .await?
            .iter()
            .map(M::map_key)
            .collect()
    }

    async fn count(&self, conn: &Connection, filter: &SqlFragment) -> Result<usize, DatabaseError> {
        self.layout.count(conn, filter).await
    }
}

/// Append-only DAO over the `_aud` mirror of `M`'s table
///
/// Keys gain a trailing `revision` column, values a leading `revision_type`
/// column; value columns are `NULL` for deletions. Rows written twice in one
/// revision keep the last write. Audit rows are never changed afterwards:
/// `update_all` and `delete_all` panic.
pub struct AuditDao<M> {
    batch_size: usize,
    layout: TableLayout,
    _mapper: PhantomData<fn() -> M>,
}

impl<M: RowMapper> AuditDao<M> {
    pub fn new(batch_size: usize) -> Self {
        let mut key_columns = M::KEY_COLUMNS.to_vec();
        key_columns.push("revision");
        let mut value_columns = vec!["revision_type"];
        value_columns.extend_from_slice(M::VALUE_COLUMNS);

        Self {
            batch_size,
            layout: TableLayout {
                table: format!("{}_aud", M::TABLE),
                alias: M::ALIAS,
                key_columns,
                value_columns,
            },
            _mapper: PhantomData,
        }
    }

    fn key_params(key: &RevisionId<M::Key>) -> Vec<Value> {
        let mut params = M::key_params(&key.key);
        params.push(Value::Integer(key.revision));
        params
    }

    fn map_key(&self, row: &Row) -> Result<RevisionId<M::Key>, DatabaseError> {
        let key = M::map_key(row)?;
        let revision = get_integer(row, M::KEY_COLUMNS.len() as i32, &self.layout.table)?;
        Ok(RevisionId::new(key, revision))
    }

    fn map_value(
        &self,
        key: &RevisionId<M::Key>,
        row: &Row,
    ) -> Result<AuditEntry<M::Value>, DatabaseError> {
        let offset = M::KEY_COLUMNS.len() as i32 + 1;
        let raw_type = get_text(row, offset, &self.layout.table)?;
        let revision_type: RevisionType = raw_type
            .parse()
            .map_err(|e: String| DatabaseError::row_mapping(&self.layout.table, offset, e))?;

        let value = match revision_type {
            RevisionType::Delete => None,
            _ => Some(M::map_value(&key.key, row, offset + 1)?),
        };
        Ok(AuditEntry::new(revision_type, value))
    }

    /// Audit rows matching `filter`, oldest revision first
    pub async fn entries_by_revision(
        &self,
        conn: &Connection,
        filter: &SqlFragment,
    ) -> Result<Vec<(RevisionId<M::Key>, AuditEntry<M::Value>)>, DatabaseError> {
        let sql = format!(
            "{} ORDER BY {}.revision",
            self.layout.select(&self.layout.all_columns(), &filter.clause),
            self.layout.alias
        );
        let rows = self.layout.query(conn, &sql, filter.params.clone()).await?;
        rows.iter()
            .map(|row| {
                let key = self.map_key(row)?;
                let value = self.map_value(&key, row)?;
                Ok((key, value))
            })
            .collect()
    }
}

#[async_trait]
impl<M: RowMapper> Dao<RevisionId<M::Key>, AuditEntry<M::Value>> for AuditDao<M> {
    async fn insert_all(
        &self,
        conn: &Connection,
        entries: &[(RevisionId<M::Key>, AuditEntry<M::Value>)],
    ) -> Result<(), DatabaseError> {
        if entries.is_empty() {
            return Ok(());
        }
        let rows = entries
            .iter()
            .map(|(k, entry)| {
                let mut params = Self::key_params(k);
                params.push(Value::Text(entry.revision_type.as_str().to_string()));
                match &entry.value {
                    Some(value) => params.extend(M::value_params(value)),
                    None => params.extend(M::VALUE_COLUMNS.iter().map(|_| Value::Null)),
                }
                params
            })
            .collect();
        self.layout
            .insert_rows(conn, "INSERT OR REPLACE", rows, self.batch_size)
            .await
    }

    async fn update_all(
        &self,
        _conn: &Connection,
        _entries: &[(RevisionId<M::Key>, AuditEntry<M::Value>)],
    ) -> Result<(), DatabaseError> {
        panic!("audit rows in {} are immutable; update is unsupported", self.layout.table)
    }

    async fn delete_all(
        &self,
        _conn: &Connection,
        _keys: &[RevisionId<M::Key>],
    ) -> Result<(), DatabaseError> {
        panic!("audit rows in {} are immutable; delete is unsupported", self.layout.table)
    }

    async fn get(
        &self,
        conn: &Connection,
        key: &RevisionId<M::Key>,
    ) -> Result<Option<AuditEntry<M::Value>>, DatabaseError> {
        let sql = self
            .layout
            .select(&self.layout.all_columns(), &self.layout.key_condition(true));
        let rows = self.layout.query(conn, &sql, Self::key_params(key)).await?;
        rows.first().map(|row| self.map_value(key, row)).transpose()
    }

    async fn exists(
        &self,
        conn: &Connection,
        key: &RevisionId<M::Key>,
    ) -> Result<bool, DatabaseError> {
        let filter = SqlFragment::new(self.layout.key_condition(true), Self::key_params(key));
        Ok(self.layout.count(conn, &filter).await? > 0)
    }

    async fn entries(
        &self,
        conn: &Connection,
        filter: &SqlFragment,
    ) -> Result<Vec<(RevisionId<M::Key>, AuditEntry<M::Value>)>, DatabaseError> {
        self.entries_by_revision(conn, filter).await
    }

    async fn keys(
        &self,
        conn: &Connection,
        filter: &SqlFragment,
    ) -> Result<Vec<RevisionId<M::Key>>, DatabaseError> {
        let sql = self.layout.select(&self.layout.key_columns, &filter.clause);
        self.layout
            .query(conn, &sql, filter.params.clone())
            .await?
            .iter()
            .map(|row| self.map_key(row))
            .collect()
    }

    async fn count(&self, conn: &Connection, filter: &SqlFragment) -> Result<usize, DatabaseError> {
        self.layout.count(conn, filter).await
    }
}

pub(crate) fn get_text(row: &Row, idx: i32, table: &str) -> Result<String, DatabaseError> {
    match get_opt_text(row, idx, table)? {
        Some(text) => Ok(text),
        None => Err(DatabaseError::row_mapping(table, idx, "unexpected NULL")),
    }
}

pub(crate) fn get_opt_text(row: &Row, idx: i32, table: &str) -> Result<Option<String>, DatabaseError> {
    match row.get_value(idx)? {
        Value::Null => Ok(None),
        Value::Text(text) => Ok(Some(text)),
        other => Err(DatabaseError::row_mapping(
            table,
            idx,
            format!("expected text, got {:?}", other),
        )),
    }
}

pub(crate) fn get_integer(row: &Row, idx: i32, table: &str) -> Result<i64, DatabaseError> {
    match row.get_value(idx)? {
        Value::Integer(i) => Ok(i),
        other => Err(DatabaseError::row_mapping(
            table,
            idx,
            format!("expected integer, got {:?}", other),
        )),
    }
}

pub(crate) fn get_uuid(row: &Row, idx: i32, table: &str) -> Result<Uuid, DatabaseError> {
    let text = get_text(row, idx, table)?;
    Uuid::parse_str(&text).map_err(|e| DatabaseError::row_mapping(table, idx, e.to_string()))
}
