//! Database Connection Management
//!
//! This module provides database connection and schema initialization using
//! libsql.
//!
//! # Architecture
//!
//! - **Normalized rows**: one row per node, one row per text value slot and one
//!   per reference value slot, keyed by `(node, attribute, index)`
//! - **Audit mirrors**: every value table has an `_aud` twin keyed by
//!   `(row key, revision)`; audit rows cascade when their revision is purged
//! - **WAL mode**: Write-Ahead Logging for concurrent readers
//! - **Foreign keys**: enabled on every connection
//!
//! # Database Connection Patterns
//!
//! **Use `connect_with_timeout()` in async functions.** It applies the busy
//! timeout and foreign key enforcement, both of which are per-connection
//! settings in SQLite.
//!
//! ```no_run
//! # use nodegraph_core::db::DatabaseService;
//! # use std::path::PathBuf;
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let db_service = DatabaseService::new(PathBuf::from("./data/nodegraph.db")).await?;
//! let conn = db_service.connect_with_timeout().await?;
//! # Ok(())
//! # }
//! ```

use crate::db::error::DatabaseError;
use libsql::{Builder, Connection, Database};
use std::path::PathBuf;
use std::sync::Arc;

const BUSY_TIMEOUT_PRAGMA: &str = "PRAGMA busy_timeout = 5000";

/// Schema statements, executed in order
const SCHEMA: &[(&str, &str)] = &[
    (
        "revision",
        "CREATE TABLE IF NOT EXISTS revision (
            number INTEGER PRIMARY KEY,
            author TEXT NOT NULL,
            date TEXT NOT NULL
        )",
    ),
    (
        "sequence",
        "CREATE TABLE IF NOT EXISTS sequence (
            name TEXT PRIMARY KEY,
            value INTEGER NOT NULL
        )",
    ),
    (
        "node",
        "CREATE TABLE IF NOT EXISTS node (
            graph_id TEXT NOT NULL,
            type_id TEXT NOT NULL,
            id TEXT NOT NULL,
            code TEXT,
            uri TEXT,
            number INTEGER NOT NULL,
            created_by TEXT,
            created_date TEXT,
            last_modified_by TEXT,
            last_modified_date TEXT,
            PRIMARY KEY (graph_id, type_id, id),
            UNIQUE (graph_id, type_id, code),
            UNIQUE (graph_id, uri)
        )",
    ),
    (
        "node_text_attribute_value",
        "CREATE TABLE IF NOT EXISTS node_text_attribute_value (
            node_graph_id TEXT NOT NULL,
            node_type_id TEXT NOT NULL,
            node_id TEXT NOT NULL,
            attribute_id TEXT NOT NULL,
            value_index INTEGER NOT NULL,
            lang TEXT NOT NULL,
            value TEXT NOT NULL,
            regex TEXT NOT NULL,
            PRIMARY KEY (node_graph_id, node_type_id, node_id, attribute_id, value_index),
            FOREIGN KEY (node_graph_id, node_type_id, node_id)
                REFERENCES node (graph_id, type_id, id)
        )",
    ),
    (
        "node_reference_attribute_value",
        "CREATE TABLE IF NOT EXISTS node_reference_attribute_value (
            node_graph_id TEXT NOT NULL,
            node_type_id TEXT NOT NULL,
            node_id TEXT NOT NULL,
            attribute_id TEXT NOT NULL,
            value_index INTEGER NOT NULL,
            value_graph_id TEXT NOT NULL,
            value_type_id TEXT NOT NULL,
            value_id TEXT NOT NULL,
            PRIMARY KEY (node_graph_id, node_type_id, node_id, attribute_id, value_index),
            FOREIGN KEY (node_graph_id, node_type_id, node_id)
                REFERENCES node (graph_id, type_id, id),
            FOREIGN KEY (value_graph_id, value_type_id, value_id)
                REFERENCES node (graph_id, type_id, id)
        )",
    ),
    (
        "node_aud",
        "CREATE TABLE IF NOT EXISTS node_aud (
            graph_id TEXT NOT NULL,
            type_id TEXT NOT NULL,
            id TEXT NOT NULL,
            revision INTEGER NOT NULL,
            revision_type TEXT NOT NULL,
            code TEXT,
            uri TEXT,
            number INTEGER,
            created_by TEXT,
            created_date TEXT,
            last_modified_by TEXT,
            last_modified_date TEXT,
            PRIMARY KEY (graph_id, type_id, id, revision),
            FOREIGN KEY (revision) REFERENCES revision (number) ON DELETE CASCADE
        )",
    ),
    (
        "node_text_attribute_value_aud",
        "CREATE TABLE IF NOT EXISTS node_text_attribute_value_aud (
            node_graph_id TEXT NOT NULL,
            node_type_id TEXT NOT NULL,
            node_id TEXT NOT NULL,
            attribute_id TEXT NOT NULL,
            value_index INTEGER NOT NULL,
            revision INTEGER NOT NULL,
            revision_type TEXT NOT NULL,
            lang TEXT,
            value TEXT,
            regex TEXT,
            PRIMARY KEY (node_graph_id, node_type_id, node_id, attribute_id, value_index, revision),
            FOREIGN KEY (revision) REFERENCES revision (number) ON DELETE CASCADE
        )",
    ),
    (
        "node_reference_attribute_value_aud",
        "CREATE TABLE IF NOT EXISTS node_reference_attribute_value_aud (
            node_graph_id TEXT NOT NULL,
            node_type_id TEXT NOT NULL,
            node_id TEXT NOT NULL,
            attribute_id TEXT NOT NULL,
            value_index INTEGER NOT NULL,
            revision INTEGER NOT NULL,
            revision_type TEXT NOT NULL,
            value_graph_id TEXT,
            value_type_id TEXT,
            value_id TEXT,
            PRIMARY KEY (node_graph_id, node_type_id, node_id, attribute_id, value_index, revision),
            FOREIGN KEY (revision) REFERENCES revision (number) ON DELETE CASCADE
        )",
    ),
    (
        "idx_node_reference_value",
        "CREATE INDEX IF NOT EXISTS idx_node_reference_value
            ON node_reference_attribute_value (value_graph_id, value_type_id, value_id)",
    ),
    (
        "idx_node_text_value",
        "CREATE INDEX IF NOT EXISTS idx_node_text_value
            ON node_text_attribute_value (attribute_id, value)",
    ),
    (
        "idx_node_aud_revision",
        "CREATE INDEX IF NOT EXISTS idx_node_aud_revision ON node_aud (revision)",
    ),
];

/// Database service for managing the libsql connection and schema
///
/// # Examples
///
/// ```no_run
/// use nodegraph_core::db::DatabaseService;
/// use std::path::PathBuf;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let db_service = DatabaseService::new(PathBuf::from("/path/to/nodegraph.db")).await?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct DatabaseService {
    /// libsql database handle (wrapped in Arc for sharing)
    pub db: Arc<Database>,

    /// Path to the database file
    pub db_path: PathBuf,
}

impl std::fmt::Debug for DatabaseService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseService")
            .field("db_path", &self.db_path)
            .finish()
    }
}

impl DatabaseService {
    /// Open (creating if needed) the database at `db_path` and initialize
    /// the schema
    pub async fn new(db_path: PathBuf) -> Result<Self, DatabaseError> {
        let is_new_database = !db_path.exists();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    if e.kind() == std::io::ErrorKind::PermissionDenied {
                        DatabaseError::permission_denied(db_path.clone())
                    } else {
                        DatabaseError::DirectoryCreationFailed(e)
                    }
                })?;
            }
        }

        let db = Builder::new_local(&db_path)
            .build()
            .await
            .map_err(|e| DatabaseError::connection_failed(db_path.clone(), e))?;

        let service = Self {
            db: Arc::new(db),
            db_path,
        };

        service.initialize_schema(is_new_database).await?;

        Ok(service)
    }

    /// Execute a PRAGMA statement
    ///
    /// PRAGMA statements return rows, so we must use query() instead of execute().
    async fn execute_pragma(conn: &Connection, pragma: &str) -> Result<(), DatabaseError> {
        let mut stmt = conn.prepare(pragma).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to execute '{}': {}", pragma, e))
        })?;
        let _ = stmt.query(()).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to execute '{}': {}", pragma, e))
        })?;
        Ok(())
    }

    /// Create tables and indexes; idempotent
    async fn initialize_schema(&self, is_new_database: bool) -> Result<(), DatabaseError> {
        let conn = self.connect_with_timeout().await?;

        Self::execute_pragma(&conn, "PRAGMA journal_mode = WAL").await?;

        for (name, sql) in SCHEMA {
            conn.execute(sql, ()).await.map_err(|e| {
                DatabaseError::initialization_failed(format!("Failed to create {}: {}", name, e))
            })?;
        }

        // Flush the schema out of the WAL so that a second handle opened right
        // away on the same file sees the tables.
        if is_new_database {
            Self::execute_pragma(&conn, "PRAGMA wal_checkpoint(TRUNCATE)").await?;
        }

        tracing::debug!("Database schema ready at {}", self.db_path.display());
        Ok(())
    }

    /// Get a raw connection without per-connection settings
    pub fn connect(&self) -> Result<Connection, DatabaseError> {
        self.db.connect().map_err(DatabaseError::LibsqlError)
    }

    /// Get a connection with busy timeout and foreign keys configured
    pub async fn connect_with_timeout(&self) -> Result<Connection, DatabaseError> {
        let conn = self.connect()?;
        Self::execute_pragma(&conn, BUSY_TIMEOUT_PRAGMA).await?;
        Self::execute_pragma(&conn, "PRAGMA foreign_keys = ON").await?;
        Ok(conn)
    }

    /// Start a write transaction on `conn`
    ///
    /// `IMMEDIATE` takes the write lock up front so concurrent writers wait
    /// on the busy timeout instead of failing on lock upgrade.
    pub async fn begin(conn: &Connection) -> Result<(), DatabaseError> {
        conn.execute("BEGIN IMMEDIATE", ())
            .await
            .map_err(|e| DatabaseError::transaction_failed(format!("Failed to begin: {}", e)))?;
        Ok(())
    }

    pub async fn commit(conn: &Connection) -> Result<(), DatabaseError> {
        if let Err(e) = conn.execute("COMMIT", ()).await {
            Self::rollback(conn).await;
            return Err(DatabaseError::transaction_failed(format!(
                "Failed to commit: {}",
                e
            )));
        }
        Ok(())
    }

    /// Roll back, logging instead of failing; used on error paths
    pub async fn rollback(conn: &Connection) {
        if let Err(e) = conn.execute("ROLLBACK", ()).await {
            tracing::warn!("Rollback failed: {}", e);
        }
    }
}
