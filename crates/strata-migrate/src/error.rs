//! Error types for the migration engine.
//!
//! Callers distinguish failures by variant, never by message. The only
//! locally recoverable conditions are [`MigrateError::NoPendingFiles`]
//! at the preflight boundary and revision lookup misses
//! ([`MigrateError::RevisionNotExist`]); everything else propagates.

/// Errors raised by planning, directory handling and execution.
#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    /// The desired and current states are already in sync.
    #[error("strata/migrate: no changes to be made")]
    NoPlan,

    /// The driver reported a non-empty database.
    #[error("strata/migrate: connected database is not clean: {reason}")]
    NotClean {
        /// Human-readable reason, e.g. the first offending table.
        reason: String,
    },

    /// A non-empty database without revisions needs a baseline version
    /// or an explicit override.
    #[error(
        "strata/migrate: connected database is not clean: {reason}. baseline version or allow-dirty is required"
    )]
    DirtyState {
        /// Human-readable reason.
        reason: String,
    },

    /// The directory's integrity manifest does not match its files.
    #[error("strata/migrate: checksum mismatch")]
    ChecksumMismatch,

    /// Files were added out of order under the linear execution order.
    #[error("{}", non_linear_message(.0))]
    HistoryNonLinear(Vec<String>),

    /// A partially applied file was edited after its partial run.
    #[error("strata/migrate: statements of file {file} were changed after partial execution")]
    HistoryChanged {
        /// The edited file.
        file: String,
    },

    /// Nothing to execute. A sentinel at most call sites.
    #[error("strata/migrate: no pending migration files")]
    NoPendingFiles,

    /// Revision lookup miss; signals "no applied migrations".
    #[error("strata/migrate: revision does not exist")]
    RevisionNotExist,

    /// An inspected object does not exist. Local to driver internals;
    /// the differ converts lookup misses into add/drop decisions.
    #[error("{0} was not found")]
    NotExist(String),

    /// `execute_to` was given a version no migration file carries.
    #[error("strata/migrate: migration with version {version:?} not found{}", hint_suffix(.hint))]
    MissingVersion {
        /// The requested version.
        version: String,
        /// A close version, when trimming the input yields a match.
        hint: Option<String>,
    },

    /// A checkpoint file appears after already applied versions.
    #[error("strata/migrate: checkpoint file {file} follows applied migrations")]
    CheckpointNotFirst {
        /// The offending checkpoint file.
        file: String,
    },

    /// A statement failed against the database.
    #[error("executing statement {stmt:?} at position {pos}: {source}")]
    Stmt {
        /// The failing statement text.
        stmt: String,
        /// Byte position of the statement within its file.
        pos: usize,
        /// The underlying driver error.
        #[source]
        source: Box<MigrateError>,
    },

    /// Failed to persist revision state.
    #[error("strata/migrate: write revision: {0}")]
    WriteRevision(#[source] Box<MigrateError>),

    /// The advisory lock is held by another run.
    #[error("strata/migrate: lock {0:?} is held by another connection")]
    LockBusy(String),

    /// Malformed statement source (unterminated string, comment or
    /// dollar quote).
    #[error("strata/migrate: scanning statements: {message} at position {pos}")]
    Syntax {
        /// Byte position of the failure.
        pos: usize,
        /// What went wrong.
        message: String,
    },

    /// Malformed file directive.
    #[error("strata/migrate: invalid directive: {0}")]
    Directive(String),

    /// Schema-level failure (diffing, unsupported types or changes).
    #[error(transparent)]
    Schema(#[from] strata_schema::SchemaError),

    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Filesystem error on the migration directory.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Revision serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Driver-specific failure that maps to no other variant.
    #[error("{0}")]
    Driver(String),
}

fn non_linear_message(files: &[String]) -> String {
    match files {
        [one] => format!("migration file {one} was added out of order"),
        many => format!("migration files {} were added out of order", many.join(", ")),
    }
}

fn hint_suffix(hint: &Option<String>) -> String {
    match hint {
        Some(h) => format!(". Did you mean {h:?}?"),
        None => String::new(),
    }
}

/// Result alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
