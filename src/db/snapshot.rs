//! Local persistence of the session snapshot
//!
//! One JSON record per installation under a fixed application key,
//! overwritten in place on every meaningful change.

use chrono::Utc;

use super::DbPool;
use crate::session::{SNAPSHOT_VERSION, Snapshot};
use crate::{Error, Result};

/// Key the session snapshot is stored under
pub const APP_KEY: &str = "triage-console/session";

/// Snapshot repository
#[derive(Clone)]
pub struct SnapshotRepo {
    pool: DbPool,
    key: String,
}

impl SnapshotRepo {
    /// Create a repository for the default application key
    #[must_use]
    pub fn new(pool: DbPool) -> Self {
        Self::with_key(pool, APP_KEY)
    }

    /// Create a repository for a custom key
    #[must_use]
    pub fn with_key(pool: DbPool, key: impl Into<String>) -> Self {
        Self {
            pool,
            key: key.into(),
        }
    }

    /// Persist a snapshot, replacing the previous one
    ///
    /// # Errors
    ///
    /// Returns error if serialization or the database write fails
    pub fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let body = serde_json::to_string(snapshot)?;
        self.save_raw(&body)
    }

    /// Load the stored snapshot
    ///
    /// Unreadable or incompatible records are treated as absent.
    #[must_use]
    pub fn load(&self) -> Option<Snapshot> {
        match self.try_load() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "discarding unreadable session snapshot");
                None
            }
        }
    }

    /// Load the stored snapshot, reporting why a record could not be used
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptState`] if the record cannot be parsed or was
    /// written by an incompatible version, or a database error
    pub fn try_load(&self) -> Result<Option<Snapshot>> {
        let Some(body) = self.load_raw()? else {
            return Ok(None);
        };

        let snapshot: Snapshot =
            serde_json::from_str(&body).map_err(|e| Error::CorruptState(e.to_string()))?;

        if snapshot.version != SNAPSHOT_VERSION {
            return Err(Error::CorruptState(format!(
                "snapshot version {} (expected {SNAPSHOT_VERSION})",
                snapshot.version
            )));
        }

        Ok(Some(snapshot))
    }

    /// Remove the stored snapshot
    ///
    /// # Errors
    ///
    /// Returns error if the database write fails
    pub fn clear(&self) -> Result<()> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;
        conn.execute("DELETE FROM snapshots WHERE key = ?1", [&self.key])
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    /// Write a raw record body
    ///
    /// # Errors
    ///
    /// Returns error if the database write fails
    pub fn save_raw(&self, body: &str) -> Result<()> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;
        conn.execute(
            "INSERT INTO snapshots (key, body, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
                body = excluded.body,
                updated_at = excluded.updated_at",
            rusqlite::params![&self.key, body, Utc::now().to_rfc3339()],
        )
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    fn load_raw(&self) -> Result<Option<String>> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;
        let result = conn.query_row(
            "SELECT body FROM snapshots WHERE key = ?1",
            [&self.key],
            |row| row.get(0),
        );
        match result {
            Ok(body) => Ok(Some(body)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Error::Database(e.to_string())),
        }
    }
}
