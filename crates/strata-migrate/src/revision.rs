//! Revisions: the persistent log of applied migrations.
//!
//! Every executed (or partially executed) migration file leaves a
//! [`Revision`] row keyed by version. Partial progress is tracked with
//! per-statement hashes so interrupted runs can resume exactly where
//! they stopped.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use bitflags::bitflags;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MigrateError, Result};

bitflags! {
    /// How a revision came to be.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct RevisionType: u8 {
        /// A synthetic baseline marking the assumed starting state.
        const BASELINE = 1 << 0;
        /// The file was executed by the executor.
        const EXECUTE = 1 << 1;
        /// The revision was resolved manually by an operator.
        const RESOLVED = 1 << 2;
    }
}

impl Default for RevisionType {
    fn default() -> Self {
        Self::empty()
    }
}

impl std::fmt::Display for RevisionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            v if v == Self::BASELINE => write!(f, "baseline"),
            v if v == Self::EXECUTE => write!(f, "applied"),
            v if v == Self::RESOLVED => write!(f, "manually set"),
            v if v == Self::EXECUTE | Self::RESOLVED => write!(f, "applied + manually set"),
            v => write!(f, "unknown ({:04b})", v.bits()),
        }
    }
}

/// A durable record of a migration file's execution state.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Revision {
    /// File version; total order is lexical.
    pub version: String,
    /// File description.
    pub description: String,
    /// How the revision came to be.
    #[serde(rename = "type")]
    pub kind: RevisionType,
    /// Number of statements applied so far.
    pub applied: usize,
    /// Total number of statements in the file.
    pub total: usize,
    /// When the execution finished.
    pub executed_at: Option<DateTime<Utc>>,
    /// Wall-clock execution time in milliseconds.
    pub execution_time_ms: u64,
    /// Error text of the last failed run, empty on success.
    pub error: String,
    /// The failing statement, empty on success.
    pub error_stmt: String,
    /// Whole-file content hash.
    pub hash: String,
    /// Per-statement hashes; cleared on full success.
    pub partial_hashes: Vec<String>,
    /// Version of the operator that produced the revision.
    pub operator_version: String,
}

impl Revision {
    /// Reports whether the file was only partially applied.
    #[must_use]
    pub fn partial(&self) -> bool {
        self.applied < self.total
    }
}

/// Identity of the revisions table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TableIdent {
    /// Optional schema qualifier.
    pub schema: Option<String>,
    /// Table name.
    pub name: String,
}

/// Default name of the revisions table.
pub const REVISIONS_TABLE: &str = "strata_schema_revisions";

/// Reserved version key under which stores persist their stable
/// identifier; never surfaced by `read_revisions`.
pub const IDENT_VERSION: &str = ".strata-identifier";

/// Persistent storage of revisions.
#[async_trait]
pub trait RevisionStore: Send + Sync {
    /// Creates the backing table.
    async fn init(&self) -> Result<()>;

    /// Reports whether the backing table exists.
    async fn exists(&self) -> Result<bool>;

    /// All revisions ordered by version.
    async fn read_revisions(&self) -> Result<Vec<Revision>>;

    /// A single revision; [`MigrateError::RevisionNotExist`] on miss.
    async fn read_revision(&self, version: &str) -> Result<Revision>;

    /// Inserts or updates a revision by version.
    async fn write_revision(&self, revision: &Revision) -> Result<()>;

    /// Deletes a revision; a miss is not an error.
    async fn delete_revision(&self, version: &str) -> Result<()>;

    /// The highest applied revision by version.
    /// [`MigrateError::RevisionNotExist`] when the log is empty.
    async fn current_revision(&self) -> Result<Revision> {
        self.read_revisions()
            .await?
            .into_iter()
            .max_by(|a, b| a.version.cmp(&b.version))
            .ok_or(MigrateError::RevisionNotExist)
    }

    /// Identity of the backing table.
    fn ident(&self) -> TableIdent;

    /// Returns a stable opaque identifier for this store, allocating it
    /// on first use. The identifier is stored under a reserved key and
    /// never returned from [`RevisionStore::read_revisions`].
    async fn id(&self, operator_version: &str) -> Result<String>;
}

/// An in-memory revision store, used in tests and dry runs.
#[derive(Debug, Default)]
pub struct MemRevisions {
    revisions: Mutex<Vec<Revision>>,
}

impl MemRevisions {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with the given revisions.
    #[must_use]
    pub fn with_revisions(revisions: Vec<Revision>) -> Self {
        Self {
            revisions: Mutex::new(revisions),
        }
    }
}

#[async_trait]
impl RevisionStore for MemRevisions {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn exists(&self) -> Result<bool> {
        Ok(true)
    }

    async fn read_revisions(&self) -> Result<Vec<Revision>> {
        let revisions = self.revisions.lock().expect("revision lock poisoned");
        let mut out: Vec<Revision> = revisions
            .iter()
            .filter(|r| r.version != IDENT_VERSION)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.version.cmp(&b.version));
        Ok(out)
    }

    async fn read_revision(&self, version: &str) -> Result<Revision> {
        let revisions = self.revisions.lock().expect("revision lock poisoned");
        revisions
            .iter()
            .find(|r| r.version == version && r.version != IDENT_VERSION)
            .cloned()
            .ok_or(MigrateError::RevisionNotExist)
    }

    async fn write_revision(&self, revision: &Revision) -> Result<()> {
        let mut revisions = self.revisions.lock().expect("revision lock poisoned");
        match revisions.iter_mut().find(|r| r.version == revision.version) {
            Some(existing) => *existing = revision.clone(),
            None => revisions.push(revision.clone()),
        }
        Ok(())
    }

    async fn delete_revision(&self, version: &str) -> Result<()> {
        let mut revisions = self.revisions.lock().expect("revision lock poisoned");
        revisions.retain(|r| r.version != version);
        Ok(())
    }

    fn ident(&self) -> TableIdent {
        TableIdent {
            schema: None,
            name: REVISIONS_TABLE.to_string(),
        }
    }

    async fn id(&self, operator_version: &str) -> Result<String> {
        let mut revisions = self.revisions.lock().expect("revision lock poisoned");
        if let Some(r) = revisions.iter().find(|r| r.version == IDENT_VERSION) {
            return Ok(r.description.clone());
        }
        let id = uuid::Uuid::new_v4().to_string();
        revisions.push(Revision {
            version: IDENT_VERSION.to_string(),
            description: id.clone(),
            operator_version: operator_version.to_string(),
            ..Revision::default()
        });
        Ok(id)
    }
}

/// Collects the set of applied versions from a revision list.
#[must_use]
pub fn applied_versions(revisions: &[Revision]) -> HashSet<&str> {
    revisions.iter().map(|r| r.version.as_str()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revision_type_rendering() {
        for (kind, expected) in [
            (RevisionType::empty(), "unknown (0000)"),
            (RevisionType::BASELINE, "baseline"),
            (RevisionType::EXECUTE, "applied"),
            (RevisionType::RESOLVED, "manually set"),
            (RevisionType::EXECUTE | RevisionType::RESOLVED, "applied + manually set"),
            (RevisionType::EXECUTE | RevisionType::BASELINE, "unknown (0011)"),
            (RevisionType::from_bits_retain(1 << 3), "unknown (1000)"),
        ] {
            assert_eq!(kind.to_string(), expected);
        }
    }

    #[tokio::test]
    async fn write_read_delete() {
        let store = MemRevisions::new();
        store
            .write_revision(&Revision {
                version: "1".into(),
                description: "init".into(),
                ..Revision::default()
            })
            .await
            .unwrap();

        let rev = store.read_revision("1").await.unwrap();
        assert_eq!(rev.description, "init");

        // Writes by the same version update in place.
        store
            .write_revision(&Revision {
                version: "1".into(),
                description: "updated".into(),
                ..Revision::default()
            })
            .await
            .unwrap();
        assert_eq!(store.read_revisions().await.unwrap().len(), 1);

        store.delete_revision("1").await.unwrap();
        assert!(matches!(
            store.read_revision("1").await,
            Err(MigrateError::RevisionNotExist)
        ));
    }

    #[tokio::test]
    async fn current_revision_is_lexical_max() {
        let store = MemRevisions::with_revisions(vec![
            Revision { version: "1".into(), ..Revision::default() },
            Revision { version: "3".into(), ..Revision::default() },
            Revision { version: "2.5".into(), ..Revision::default() },
        ]);
        assert_eq!(store.current_revision().await.unwrap().version, "3");

        let empty = MemRevisions::new();
        assert!(matches!(
            empty.current_revision().await,
            Err(MigrateError::RevisionNotExist)
        ));
    }

    #[tokio::test]
    async fn stable_id_is_allocated_once_and_hidden() {
        let store = MemRevisions::new();
        let id1 = store.id("v0.3.1").await.unwrap();
        let id2 = store.id("v0.3.2").await.unwrap();
        assert_eq!(id1, id2);
        assert!(store.read_revisions().await.unwrap().is_empty());
    }
}
