//! Revision allocation and lookup

use crate::db::{Dao, DatabaseService, RevisionMapper, SequenceService, SqlDao, REVISION_SEQUENCE};
use crate::models::Revision;
use crate::query::SqlFragment;
use crate::services::error::NodeServiceError;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Drop sub-millisecond precision so values survive the stored text form
pub(crate) fn truncate_to_millis(date: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(date.timestamp_millis()).unwrap_or(date)
}

pub struct RevisionService {
    db: Arc<DatabaseService>,
    sequences: Arc<dyn SequenceService>,
    revisions: SqlDao<RevisionMapper>,
}

impl RevisionService {
    pub fn new(db: Arc<DatabaseService>, sequences: Arc<dyn SequenceService>) -> Self {
        Self {
            db,
            sequences,
            revisions: SqlDao::new(1),
        }
    }

    /// Allocate the next revision number and record who made it
    pub async fn create(&self, author: &str) -> Result<Revision, NodeServiceError> {
        let number = self.sequences.get_and_advance(REVISION_SEQUENCE).await?;
        let revision = Revision::new(number, author, truncate_to_millis(Utc::now()));

        let conn = self.db.connect_with_timeout().await?;
        self.revisions
            .insert_all(&conn, &[(number, revision.clone())])
            .await?;

        tracing::debug!("Created revision {} for {}", number, author);
        Ok(revision)
    }

    pub async fn get(&self, number: i64) -> Result<Option<Revision>, NodeServiceError> {
        let conn = self.db.connect_with_timeout().await?;
        Ok(self.revisions.get(&conn, &number).await?)
    }

    /// All revisions, oldest first
    pub async fn list(&self) -> Result<Vec<Revision>, NodeServiceError> {
        let conn = self.db.connect_with_timeout().await?;
        let order = ["rv.number".to_string()];
        Ok(self
            .revisions
            .entries_ordered(&conn, &SqlFragment::raw("1 = 1"), &order, None)
            .await?
            .into_iter()
            .map(|(_, revision)| revision)
            .collect())
    }

    pub async fn latest(&self) -> Result<Option<Revision>, NodeServiceError> {
        let conn = self.db.connect_with_timeout().await?;
        let order = ["rv.number DESC".to_string()];
        Ok(self
            .revisions
            .entries_ordered(&conn, &SqlFragment::raw("1 = 1"), &order, Some(1))
            .await?
            .into_iter()
            .map(|(_, revision)| revision)
            .next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::CachedSequenceService;
    use anyhow::Result;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_create_allocates_increasing_numbers() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let db = Arc::new(DatabaseService::new(temp_dir.path().join("test.db")).await?);
        let sequences = Arc::new(CachedSequenceService::new(db.clone(), 10));
        let service = RevisionService::new(db, sequences);

        assert!(service.latest().await?.is_none());

        let first = service.create("ann").await?;
        let second = service.create("bob").await?;
        assert_eq!((first.number, second.number), (1, 2));

        assert_eq!(service.get(1).await?, Some(first.clone()));
        assert_eq!(service.latest().await?, Some(second.clone()));
        assert_eq!(service.list().await?, vec![first, second]);
        Ok(())
    }
}
