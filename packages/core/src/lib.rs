//! Node Store Core
//!
//! A graph-structured metadata store: typed nodes carrying multilingual text
//! properties and references to other nodes, persisted in libsql with an
//! append-only audit trail and mirrored into a search index that is kept
//! consistent with every write.
//!
//! # Architecture
//!
//! - **Diff-based writes**: only changed attribute slots are written
//! - **Revisions**: one revision per write call; any node can be
//!   reconstructed at any past revision
//! - **Dual-backend queries**: a `Specification` renders both SQL and an
//!   index query, and the router picks the backend
//! - **Decorator pipeline**: authorization, logging, events, locking,
//!   metadata and indexing are separate `Service` layers
//!
//! # Modules
//!
//! - [`models`] - Nodes, identifiers, revisions, principals, type definitions
//! - [`query`] - Specifications and backend routing
//! - [`db`] - libsql schema, DAOs, row mappers and sequences
//! - [`index`] - Search index and document conversion
//! - [`services`] - The service layers
//! - [`pipeline`] - Assembled stack
//! - [`config`] / [`logging`] - Configuration and tracing setup

pub mod config;
pub mod db;
pub mod index;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod query;
pub mod services;

// Re-export commonly used types
pub use config::StoreConfig;
pub use models::*;
pub use pipeline::NodePipeline;
pub use services::*;
