//! Revision Types
//!
//! Every tracked write allocates one revision number; every row touched by
//! that write is mirrored into an audit table keyed by `(row key, revision)`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of mutation recorded by an audit row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RevisionType {
    Insert,
    Update,
    Delete,
}

impl RevisionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevisionType::Insert => "INSERT",
            RevisionType::Update => "UPDATE",
            RevisionType::Delete => "DELETE",
        }
    }
}

impl fmt::Display for RevisionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RevisionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INSERT" => Ok(RevisionType::Insert),
            "UPDATE" => Ok(RevisionType::Update),
            "DELETE" => Ok(RevisionType::Delete),
            other => Err(format!("unknown revision type '{}'", other)),
        }
    }
}

/// Key of an audit row: the mirrored row's key plus the revision number
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RevisionId<K> {
    pub key: K,
    pub revision: i64,
}

impl<K> RevisionId<K> {
    pub fn new(key: K, revision: i64) -> Self {
        Self { key, revision }
    }
}

/// Value of an audit row; `value` is `None` for deletions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry<V> {
    pub revision_type: RevisionType,
    pub value: Option<V>,
}

impl<V> AuditEntry<V> {
    pub fn new(revision_type: RevisionType, value: Option<V>) -> Self {
        Self {
            revision_type,
            value,
        }
    }

    pub fn deleted() -> Self {
        Self::new(RevisionType::Delete, None)
    }
}

/// One logical write operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    pub number: i64,
    pub author: String,
    pub date: DateTime<Utc>,
}

impl Revision {
    pub fn new(number: i64, author: impl Into<String>, date: DateTime<Utc>) -> Self {
        Self {
            number,
            author: author.into(),
            date,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revision_type_parses_stored_form() {
        for t in [RevisionType::Insert, RevisionType::Update, RevisionType::Delete] {
            assert_eq!(t.as_str().parse::<RevisionType>().unwrap(), t);
        }
        assert!("insert".parse::<RevisionType>().is_err());
    }
}
