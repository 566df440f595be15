//! The migration executor.
//!
//! Scans pending files, executes them statement by statement against
//! the driver and records progress in the revision store. Execution is
//! fault tolerant: every statement boundary is persisted, so an
//! interrupted run resumes exactly where it stopped, and edits to an
//! already partially applied file are detected and rejected.

use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::dir::{validate, Dir, MigrationFile};
use crate::driver::Driver;
use crate::error::{MigrateError, Result};
use crate::revision::{Revision, RevisionStore, RevisionType};
use crate::stmt::{Stmt, TxMode};

/// Name of the advisory lock held for the duration of a migration run.
pub const LOCK_NAME: &str = "strata_migration_run";

/// Policy for out-of-order migration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecOrder {
    /// A pending file below the highest applied version is an error.
    #[default]
    Linear,
    /// Such files are silently skipped.
    LinearSkip,
    /// Such files are applied in lexical order.
    NonLinear,
}

/// An execution event emitted to the pluggable logger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEntry {
    /// A run starts: the target version and the pending file names.
    Execution {
        /// Version of the last file in the run.
        to: String,
        /// Pending file names in order.
        files: Vec<String>,
    },
    /// A file starts executing.
    File {
        /// File name.
        name: String,
        /// File version.
        version: String,
        /// Statements skipped because of a resumed partial run.
        skipped: usize,
    },
    /// A statement is about to execute.
    Stmt {
        /// Statement text.
        sql: String,
        /// Byte position within the file.
        pos: usize,
    },
    /// The run failed.
    Error {
        /// Error text.
        error: String,
    },
    /// The run finished successfully.
    Done,
}

/// Receives execution events.
pub trait Logger: Send + Sync {
    /// Handles one event.
    fn log(&self, entry: LogEntry);
}

/// Executes pending migration files against a driver.
pub struct Executor {
    driver: Arc<dyn Driver>,
    dir: Arc<dyn Dir>,
    store: Arc<dyn RevisionStore>,
    logger: Option<Arc<dyn Logger>>,
    operator_version: String,
    baseline: Option<String>,
    allow_dirty: bool,
    order: ExecOrder,
    from_version: Option<String>,
    lock_timeout: Duration,
}

impl Executor {
    /// Creates an executor over the given driver, directory and
    /// revision store.
    #[must_use]
    pub fn new(driver: Arc<dyn Driver>, dir: Arc<dyn Dir>, store: Arc<dyn RevisionStore>) -> Self {
        Self {
            driver,
            dir,
            store,
            logger: None,
            operator_version: String::new(),
            baseline: None,
            allow_dirty: false,
            order: ExecOrder::default(),
            from_version: None,
            lock_timeout: Duration::from_secs(600),
        }
    }

    /// Sets the logger receiving execution events.
    #[must_use]
    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Records this operator version on written revisions.
    #[must_use]
    pub fn operator_version(mut self, version: impl Into<String>) -> Self {
        self.operator_version = version.into();
        self
    }

    /// Baselines a non-empty database at the given file version.
    #[must_use]
    pub fn baseline_version(mut self, version: impl Into<String>) -> Self {
        self.baseline = Some(version.into());
        self
    }

    /// Allows running against a non-empty database without a baseline.
    #[must_use]
    pub fn allow_dirty(mut self, allow: bool) -> Self {
        self.allow_dirty = allow;
        self
    }

    /// Sets the out-of-order file policy.
    #[must_use]
    pub fn exec_order(mut self, order: ExecOrder) -> Self {
        self.order = order;
        self
    }

    /// Ignores pending files below the given version.
    #[must_use]
    pub fn from_version(mut self, version: impl Into<String>) -> Self {
        self.from_version = Some(version.into());
        self
    }

    /// Sets the advisory lock timeout. Zero tries once.
    #[must_use]
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    fn log(&self, entry: LogEntry) {
        if let Some(logger) = &self.logger {
            logger.log(entry);
        }
    }

    /// Preflight: validates the manifest, reconciles the revision log
    /// with the directory and returns the pending files in execution
    /// order. [`MigrateError::NoPendingFiles`] when there is nothing to
    /// do.
    pub async fn pending(&self) -> Result<Vec<MigrationFile>> {
        validate(self.dir.as_ref())?;
        let revisions = if self.store.exists().await? {
            self.store.read_revisions().await?
        } else {
            Vec::new()
        };
        let mut baseline_version = revisions
            .iter()
            .find(|r| r.kind.contains(RevisionType::BASELINE))
            .map(|r| r.version.clone());
        let mut files = self.dir.files()?;

        // A fresh revision log over a non-empty database needs either a
        // baseline or an explicit override.
        if revisions.is_empty() {
            match &self.baseline {
                Some(version) => {
                    let file = files
                        .iter()
                        .find(|f| f.version() == version)
                        .ok_or_else(|| MigrateError::MissingVersion {
                            version: version.clone(),
                            hint: None,
                        })?;
                    let revision = Revision {
                        version: file.version().to_string(),
                        description: file.desc().to_string(),
                        kind: RevisionType::BASELINE,
                        executed_at: Some(Utc::now()),
                        operator_version: self.operator_version.clone(),
                        ..Revision::default()
                    };
                    self.store.init().await?;
                    self.write_revision(&revision).await?;
                    baseline_version = Some(revision.version);
                }
                None => {
                    if let Err(err) = self.driver.check_clean(Some(&self.store.ident())).await {
                        match err {
                            MigrateError::NotClean { reason } if self.allow_dirty => {
                                warn!(reason = %reason, "running against a dirty database");
                            }
                            MigrateError::NotClean { reason } => {
                                return Err(MigrateError::DirtyState { reason });
                            }
                            err => return Err(err),
                        }
                    }
                }
            }
        }
        let revisions = if baseline_version.is_some() && revisions.is_empty() {
            self.store.read_revisions().await?
        } else {
            revisions
        };

        // A checkpoint supersedes everything before it: for a fresh
        // database, or once the checkpoint itself was applied, earlier
        // files are neither executed nor considered for ordering.
        if let Some(pos) = last_checkpoint(&files)? {
            let version = files[pos].version().to_string();
            let applied = revisions.iter().any(|r| r.version == version);
            if revisions.is_empty() || applied {
                files.drain(..pos);
            } else if baseline_version.as_deref() < Some(version.as_str()) {
                return Err(MigrateError::CheckpointNotFirst {
                    file: files[pos].name.clone(),
                });
            }
        }

        let current = revisions
            .iter()
            .map(|r| r.version.as_str())
            .max()
            .map(str::to_string);
        let mut pending = Vec::new();
        let mut out_of_order = Vec::new();
        for file in files {
            let version = file.version();
            if let Some(from) = &self.from_version {
                if version < from.as_str() {
                    continue;
                }
            }
            match revisions.iter().find(|r| r.version == version) {
                Some(r) if r.partial() => pending.push(file),
                Some(_) => {}
                None if baseline_version.as_deref() >= Some(version) => {
                    // Implicitly applied below the baseline.
                }
                None => match &current {
                    Some(current) if version < current.as_str() => match self.order {
                        ExecOrder::Linear => out_of_order.push(file.name.clone()),
                        ExecOrder::LinearSkip => {}
                        ExecOrder::NonLinear => pending.push(file),
                    },
                    _ => pending.push(file),
                },
            }
        }
        if !out_of_order.is_empty() {
            return Err(MigrateError::HistoryNonLinear(out_of_order));
        }
        if pending.is_empty() {
            return Err(MigrateError::NoPendingFiles);
        }
        Ok(pending)
    }

    /// Executes up to `n` pending files; zero executes all of them.
    pub async fn execute_n(&self, n: usize) -> Result<()> {
        let mut pending = self.pending().await?;
        if n > 0 {
            pending.truncate(n);
        }
        self.exec_files(&pending).await
    }

    /// Executes pending files up to and including the given version.
    /// The version must belong to a file in the directory.
    pub async fn execute_to(&self, version: &str) -> Result<()> {
        let files = self.dir.files()?;
        if !files.iter().any(|f| f.version() == version) {
            let trimmed = version.strip_suffix(".sql");
            let hint = trimmed
                .filter(|t| files.iter().any(|f| f.version() == *t))
                .map(str::to_string);
            return Err(MigrateError::MissingVersion {
                version: version.to_string(),
                hint,
            });
        }
        let mut pending = self.pending().await?;
        pending.retain(|f| f.version() <= version);
        if pending.is_empty() {
            return Err(MigrateError::NoPendingFiles);
        }
        self.exec_files(&pending).await
    }

    async fn exec_files(&self, files: &[MigrationFile]) -> Result<()> {
        let unlock = match self.driver.lock(LOCK_NAME, self.lock_timeout).await {
            Ok(unlock) => unlock,
            Err(err) => {
                self.log(LogEntry::Error { error: err.to_string() });
                return Err(err);
            }
        };
        let result = self.exec_files_locked(files).await;
        let unlocked = unlock.unlock().await;
        result?;
        unlocked
    }

    async fn exec_files_locked(&self, files: &[MigrationFile]) -> Result<()> {
        let to = files.last().map(|f| f.version().to_string()).unwrap_or_default();
        info!(to = %to, files = files.len(), "executing pending migration files");
        self.log(LogEntry::Execution {
            to,
            files: files.iter().map(|f| f.name.clone()).collect(),
        });
        self.store.init().await?;

        // A file declaring txmode=all wraps the whole batch.
        let mut batch_tx = false;
        for file in files {
            if file.directives()?.tx_mode == TxMode::All {
                batch_tx = self.driver.tx_begin().await?;
                break;
            }
        }
        for file in files {
            if let Err(err) = self.exec_file(file, batch_tx).await {
                if batch_tx {
                    self.driver.tx_rollback().await?;
                }
                self.log(LogEntry::Error { error: err.to_string() });
                return Err(err);
            }
        }
        if batch_tx {
            self.driver.tx_commit().await?;
        }
        self.log(LogEntry::Done);
        Ok(())
    }

    async fn exec_file(&self, file: &MigrationFile, in_batch_tx: bool) -> Result<()> {
        let content = file.content()?;
        let stmts = self.driver.scan_stmts(content)?;
        let hashes = partial_hashes(&stmts);
        let version = file.version().to_string();

        let mut revision = match self.store.read_revision(&version).await {
            Ok(r) if r.partial() => {
                // Resume: the statements already applied must be
                // byte-identical to the file's prefix.
                if r.applied > hashes.len()
                    || r.partial_hashes.len() < r.applied
                    || r.partial_hashes[..r.applied] != hashes[..r.applied]
                {
                    return Err(MigrateError::HistoryChanged { file: file.name.clone() });
                }
                r
            }
            Ok(r) => r,
            Err(MigrateError::RevisionNotExist) => Revision {
                version: version.clone(),
                description: file.desc().to_string(),
                ..Revision::default()
            },
            Err(err) => return Err(err),
        };
        let start = revision.applied;
        revision.total = stmts.len();
        revision.hash = hash_file(&file.bytes);
        revision.partial_hashes = hashes;
        revision.operator_version.clone_from(&self.operator_version);
        self.write_revision(&revision).await?;

        info!(file = %file.name, version = %version, skipped = start, "migrating version");
        self.log(LogEntry::File {
            name: file.name.clone(),
            version: version.clone(),
            skipped: start,
        });

        let tx_mode = file.directives()?.tx_mode;
        let file_tx = !in_batch_tx && tx_mode == TxMode::File && self.driver.tx_begin().await?;
        let started = Instant::now();
        for (i, stmt) in stmts.iter().enumerate().skip(start) {
            debug!(sql = %stmt.text, pos = stmt.pos, "executing statement");
            self.log(LogEntry::Stmt {
                sql: stmt.text.clone(),
                pos: stmt.pos,
            });
            if let Err(err) = self.driver.exec(&stmt.text).await {
                if file_tx {
                    self.driver.tx_rollback().await?;
                    // The rollback reverted this file's statements;
                    // retries restart from the pre-file state.
                    revision.applied = start;
                } else {
                    revision.applied = i;
                }
                revision.error = err.to_string();
                revision.error_stmt.clone_from(&stmt.text);
                self.write_revision(&revision).await?;
                return Err(MigrateError::Stmt {
                    stmt: stmt.text.clone(),
                    pos: stmt.pos,
                    source: Box::new(err),
                });
            }
            revision.applied = i + 1;
            if revision.applied < revision.total {
                self.write_revision(&revision).await?;
            }
        }
        if file_tx {
            self.driver.tx_commit().await?;
        }
        revision.applied = revision.total;
        revision.kind |= RevisionType::EXECUTE;
        revision.error.clear();
        revision.error_stmt.clear();
        revision.partial_hashes.clear();
        revision.executed_at = Some(Utc::now());
        revision.execution_time_ms = started.elapsed().as_millis() as u64;
        self.write_revision(&revision).await?;
        Ok(())
    }

    async fn write_revision(&self, revision: &Revision) -> Result<()> {
        self.store
            .write_revision(revision)
            .await
            .map_err(|err| MigrateError::WriteRevision(Box::new(err)))
    }
}

// The position of the last checkpoint file, if any.
fn last_checkpoint(files: &[MigrationFile]) -> Result<Option<usize>> {
    let mut last = None;
    for (i, file) in files.iter().enumerate() {
        if file.is_checkpoint()? {
            last = Some(i);
        }
    }
    Ok(last)
}

/// The whole-file content hash recorded on revisions.
#[must_use]
pub fn hash_file(bytes: &[u8]) -> String {
    BASE64.encode(Sha256::digest(bytes))
}

/// Per-statement hashes: each statement's leading comments plus its
/// text.
#[must_use]
pub fn partial_hashes(stmts: &[Stmt]) -> Vec<String> {
    stmts
        .iter()
        .map(|s| {
            let mut hasher = Sha256::new();
            for c in &s.comments {
                hasher.update(c.as_bytes());
            }
            hasher.update(s.text.as_bytes());
            BASE64.encode(hasher.finalize())
        })
        .collect()
}
