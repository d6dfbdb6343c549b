//! Data Models
//!
//! This module contains the data structures shared by every layer:
//!
//! - `Node` and its identifiers (`TypeId`, `NodeId`, `NodeAttributeValueId`)
//! - Revision bookkeeping (`Revision`, `RevisionId`, `RevisionType`)
//! - Type definitions consumed for validation (`TypeDef`)
//! - Callers and permissions (`Principal`, `Permission`)

mod node;
mod principal;
mod revision;
mod schema;

pub use node::{IdParseError, LangValue, Node, NodeAttributeValueId, NodeId, TypeId, ANY_REGEX};
pub use principal::{AppRole, Permission, Principal};
pub use revision::{AuditEntry, Revision, RevisionId, RevisionType};
pub use schema::{ReferenceAttribute, TextAttribute, TypeDef};
