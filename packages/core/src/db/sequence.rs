//! Sequences
//!
//! Named counters backing node numbers (`node:{graph}:{type}`) and revision
//! numbers (`revision`). Sequences start at 1.
//!
//! # Leasing
//!
//! [`CachedSequenceService`] reserves `increment` values per database round
//! trip and hands them out locally. On `close()` it writes the unused part of
//! each reservation back, but only if nobody advanced the sequence in the
//! meantime, so the stored value never keeps a false high-water mark and never
//! moves backwards past another writer's reservation.

use crate::db::database::DatabaseService;
use crate::db::error::DatabaseError;
use async_trait::async_trait;
use libsql::{params, Connection};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[async_trait]
pub trait SequenceService: Send + Sync {
    /// Return the current value of `name` and advance it by one
    async fn get_and_advance(&self, name: &str) -> Result<i64, DatabaseError>;

    /// Release any locally held reservations
    async fn close(&self) -> Result<(), DatabaseError> {
        Ok(())
    }
}

pub fn node_sequence_name(type_id: &crate::models::TypeId) -> String {
    format!("node:{}:{}", type_id.graph_id, type_id.id)
}

pub const REVISION_SEQUENCE: &str = "revision";

/// Reserved block `[next, limit)`
#[derive(Debug, Clone, Copy)]
struct Lease {
    next: i64,
    limit: i64,
}

pub struct CachedSequenceService {
    db: Arc<DatabaseService>,
    increment: i64,
    leases: Mutex<HashMap<String, Lease>>,
}

impl CachedSequenceService {
    pub fn new(db: Arc<DatabaseService>, increment: i64) -> Self {
        Self {
            db,
            increment: increment.max(1),
            leases: Mutex::new(HashMap::new()),
        }
    }

    /// Reserve `count` values from the backing row; returns the first one
    async fn lease(&self, name: &str, count: i64) -> Result<i64, DatabaseError> {
        let conn = self.db.connect_with_timeout().await?;
        DatabaseService::begin(&conn).await?;
        match Self::advance(&conn, name, count).await {
            Ok(first) => {
                DatabaseService::commit(&conn).await?;
                Ok(first)
            }
            Err(e) => {
                DatabaseService::rollback(&conn).await;
                Err(e)
            }
        }
    }

    async fn advance(conn: &Connection, name: &str, count: i64) -> Result<i64, DatabaseError> {
        conn.execute(
            "INSERT OR IGNORE INTO sequence (name, value) VALUES (?, 1)",
            params![name],
        )
        .await
        .map_err(|e| DatabaseError::sql_execution(format!("Failed to create sequence {}: {}", name, e)))?;

        let mut rows = conn
            .query("SELECT value FROM sequence WHERE name = ?", params![name])
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to read sequence {}: {}", name, e)))?;
        let current: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => {
                return Err(DatabaseError::sql_execution(format!(
                    "Sequence {} vanished",
                    name
                )))
            }
        };

        conn.execute(
            "UPDATE sequence SET value = ? WHERE name = ?",
            params![current + count, name],
        )
        .await
        .map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to advance sequence {}: {}", name, e))
        })?;

        Ok(current)
    }
}

#[async_trait]
impl SequenceService for CachedSequenceService {
    async fn get_and_advance(&self, name: &str) -> Result<i64, DatabaseError> {
        let mut leases = self.leases.lock().await;

        if let Some(lease) = leases.get_mut(name) {
            if lease.next < lease.limit {
                let value = lease.next;
                lease.next += 1;
                return Ok(value);
            }
        }

        let first = self.lease(name, self.increment).await?;
        leases.insert(
            name.to_string(),
            Lease {
                next: first + 1,
                limit: first + self.increment,
            },
        );
        Ok(first)
    }

    async fn close(&self) -> Result<(), DatabaseError> {
        let mut leases = self.leases.lock().await;
        let conn = self.db.connect_with_timeout().await?;

        for (name, lease) in leases.drain() {
            if lease.next >= lease.limit {
                continue;
            }
            let returned = conn
                .execute(
                    "UPDATE sequence SET value = ? WHERE name = ? AND value = ?",
                    params![lease.next, name.as_str(), lease.limit],
                )
                .await
                .map_err(|e| {
                    DatabaseError::sql_execution(format!(
                        "Failed to return lease of {}: {}",
                        name, e
                    ))
                })?;
            tracing::debug!(
                "Returned {} unused values of sequence {} (applied: {})",
                lease.limit - lease.next,
                name,
                returned > 0
            );
        }
        Ok(())
    }
}
