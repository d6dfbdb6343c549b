//! Database Layer
//!
//! This module handles all relational storage using libsql:
//!
//! - Database initialization and connection management
//! - Generic DAOs over explicit row mappers, one per table
//! - Append-only audit DAOs mirroring the value tables per revision
//! - Sequences for node numbers and revision numbers
//!
//! # Architecture
//!
//! Every table is addressed through [`Dao`]. DAOs never open connections or
//! transactions themselves; callers pass the connection that carries the
//! surrounding transaction so a whole logical write commits or rolls back
//! together.

mod dao;
mod database;
mod error;
mod mappers;
mod sequence;

pub use dao::{AuditDao, Dao, RowMapper, SqlDao};
pub use database::DatabaseService;
pub use error::DatabaseError;
pub use mappers::{NodeRowMapper, ReferenceValueMapper, RevisionMapper, TextValueMapper};
pub use sequence::{node_sequence_name, CachedSequenceService, SequenceService, REVISION_SEQUENCE};
