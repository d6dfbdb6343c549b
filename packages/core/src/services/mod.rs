//! Node Services
//!
//! Every layer implements [`Service`] over `(NodeId, Node)` and wraps the
//! next one:
//!
//! - `NodeRepository` - diff-based SQL persistence with audit rows
//! - `IndexedNodeService` - synchronous search index maintenance and routing
//! - `ReadAuthorizedNodeService` - read filtering and attribute redaction
//! - `RevisionInitializingService` - one revision per tracked write
//! - `MetadataInitializingNodeService` - numbers, codes, URIs and stamps
//! - `ReadWriteSynchronizedService` - process-wide read/write lock
//! - `EventEmittingNodeService` - broadcast of successful writes
//! - `WriteLoggingService` - write logging
//! - `WriteAuthorizingNodeService` - write pre-authorization
//!
//! `NodeRevisionRepository` answers point-in-time questions from the audit
//! tables; it sits beside the stack rather than in it.

pub mod error;
pub mod event_emitting;
pub mod indexed_node_service;
pub mod metadata_initializing;
pub mod node_repository;
pub mod node_revision_repository;
pub mod permission;
pub mod read_authorized;
pub mod revision_initializing;
pub mod revision_service;
pub mod rw_synchronized;
pub mod service;
pub mod type_resolver;
pub mod validation;
pub mod write_authorizing;
pub mod write_logging;

pub use error::NodeServiceError;
pub use event_emitting::{EventEmittingNodeService, NodeEvent};
pub use indexed_node_service::IndexedNodeService;
pub use metadata_initializing::MetadataInitializingNodeService;
pub use node_repository::NodeRepository;
pub use node_revision_repository::NodeRevisionRepository;
pub use permission::{
    any_of, from_fn, AllowAll, AnyOf, AppAdminBypass, AttributeKey, CachedEvaluator, DenyAll,
    FnEvaluator, NodePermissions, PermissionEvaluator,
};
pub use read_authorized::ReadAuthorizedNodeService;
pub use revision_initializing::RevisionInitializingService;
pub use revision_service::RevisionService;
pub use rw_synchronized::ReadWriteSynchronizedService;
pub use service::{SaveMode, Service, WriteOptions};
pub use type_resolver::{InMemoryTypeResolver, TypeResolver};
pub use validation::{normalize, NodeValidator, ValidatedBatch};
pub use write_authorizing::WriteAuthorizingNodeService;
pub use write_logging::WriteLoggingService;
