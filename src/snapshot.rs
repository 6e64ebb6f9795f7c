//! Snapshot coordination for parallel reads.
//!
//! The coordinator holds the transaction that exported the snapshot; every
//! worker session joins it, so all traversal and COPY queries of one dump
//! see the same view of the data.

use crate::db::{Database, SnapshotToken, SourceSession};
use crate::error::{Result, SliceError};
use tracing::{info, warn};

pub struct SnapshotCoordinator<'d, D: Database> {
    db: &'d D,
    session: Option<D::Source>,
    token: SnapshotToken,
}

impl<'d, D: Database> SnapshotCoordinator<'d, D> {
    /// Open the coordinating transaction and export its snapshot
    pub fn begin(db: &'d D) -> Result<Self> {
        let mut session = db
            .source()
            .map_err(|e| SliceError::SnapshotUnavailable(e.to_string()))?;
        let token = session
            .export_snapshot()
            .map_err(|e| SliceError::SnapshotUnavailable(e.to_string()))?;
        info!("Running at snapshot {}", token);
        Ok(Self {
            db,
            session: Some(session),
            token,
        })
    }

    /// Open a worker session that sees the coordinator's snapshot
    pub fn join(&self) -> Result<D::Source> {
        if self.session.is_none() {
            return Err(SliceError::SnapshotUnavailable(format!(
                "snapshot {} already released",
                self.token
            )));
        }
        let mut session = self
            .db
            .source()
            .map_err(|e| SliceError::SnapshotUnavailable(e.to_string()))?;
        session
            .import_snapshot(&self.token)
            .map_err(|e| SliceError::SnapshotUnavailable(format!("{}: {}", self.token, e)))?;
        Ok(session)
    }

    /// End the coordinating transaction. Worker sessions must be closed first.
    pub fn release(mut self) -> Result<()> {
        match self.session.take() {
            Some(mut session) => session.end().map_err(SliceError::from),
            None => Ok(()),
        }
    }
}

impl<D: Database> Drop for SnapshotCoordinator<'_, D> {
    fn drop(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.end() {
                warn!("Failed to release snapshot {}: {}", self.token, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryDatabase;
    use crate::schema::SchemaDocument;

    fn db() -> MemoryDatabase {
        let doc = SchemaDocument::parse(
            "tables:\n  - { schema: public, name: t, columns: [{ name: id, type: integer }] }\n",
        )
        .unwrap();
        MemoryDatabase::from_document(&doc).unwrap()
    }

    #[test]
    fn test_workers_join_until_release() {
        let db = db();
        let coordinator = SnapshotCoordinator::begin(&db).unwrap();
        let mut worker = coordinator.join().unwrap();
        worker.end().unwrap();
        assert_eq!(db.open_snapshots(), 1);

        coordinator.release().unwrap();
        assert_eq!(db.open_snapshots(), 0);
    }

    #[test]
    fn test_drop_releases_snapshot() {
        let db = db();
        {
            let _coordinator = SnapshotCoordinator::begin(&db).unwrap();
            assert_eq!(db.open_snapshots(), 1);
        }
        assert_eq!(db.open_snapshots(), 0);
    }
}
