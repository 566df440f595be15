//! Migration planning and execution.
//!
//! `strata-migrate` turns change-sets produced by the
//! [`strata_schema`] differ into versioned migration files and applies
//! them to target databases:
//!
//! - **Driver** - the capability set a dialect must expose: inspect,
//!   diff, plan, apply, scan, lock, snapshot, cleanliness checks and
//!   type round-tripping.
//! - **Planner** - renders change-sets as SQL statement plans and
//!   writes them into versioned files with an integrity manifest.
//! - **Dir** - the ordered migration file set, filesystem-backed or
//!   in-memory, guarded by a content-addressed checksum file.
//! - **Revisions** - the persistent log of applied and partially
//!   applied files, including per-statement progress hashes.
//! - **Executor** - fault-tolerant, resumable statement-by-statement
//!   execution under an advisory lock.

pub mod dir;
pub mod driver;
pub mod error;
pub mod executor;
pub mod plan;
pub mod revision;
pub mod stmt;

pub use dir::{validate, write_sum_file, Checksum, Dir, LocalDir, MemDir, MigrationFile, SUM_FILENAME};
pub use driver::{glob_match, Driver, InspectMode, InspectOptions, RestoreFunc, UnlockFunc};
pub use error::{MigrateError, Result};
pub use executor::{ExecOrder, Executor, LogEntry, Logger, LOCK_NAME};
pub use plan::{DefaultFormatter, Formatter, Plan, PlanChange, Planner, SplitFormatter};
pub use revision::{
    MemRevisions, Revision, RevisionStore, RevisionType, TableIdent, REVISIONS_TABLE,
};
pub use stmt::{
    escape_delimiter, parse_directives, scan_file, Directives, Scanner, ScannerOptions, Stmt,
    TxMode, DIRECTIVE_PREFIX,
};
