//! Principals and Permissions
//!
//! Authentication happens elsewhere; the store only sees an already resolved
//! principal and asks a permission evaluator about it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Application-wide role of a principal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppRole {
    User,
    Admin,
    Superuser,
}

/// Operation a permission check is made for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Permission {
    Insert,
    Read,
    Update,
    Delete,
}

/// The caller of a service operation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal {
    pub username: String,
    pub app_role: AppRole,
}

impl Principal {
    pub fn new(username: impl Into<String>, app_role: AppRole) -> Self {
        Self {
            username: username.into(),
            app_role,
        }
    }

    pub fn user(username: impl Into<String>) -> Self {
        Self::new(username, AppRole::User)
    }

    /// Unrestricted principal used for existence probes and reindexing
    pub fn internal(purpose: &str) -> Self {
        Self::new(format!("{}{}", INTERNAL_PREFIX, purpose), AppRole::Superuser)
    }

    pub fn is_admin(&self) -> bool {
        matches!(self.app_role, AppRole::Admin | AppRole::Superuser)
    }

    pub fn is_internal(&self) -> bool {
        self.app_role == AppRole::Superuser && self.username.starts_with(INTERNAL_PREFIX)
    }
}

const INTERNAL_PREFIX: &str = "internal:";

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.username)
    }
}
