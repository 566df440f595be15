//! The SQLite dialect driver.
//!
//! Implements the full driver capability set over a [`sqlx`] SQLite
//! pool: catalog inspection, diff predicates, SQL planning (including
//! the table-recreation recipe for changes SQLite cannot ALTER in
//! place), statement scanning with `BEGIN ... END` trigger bodies,
//! file-based advisory locking, snapshot/restore and cleanliness
//! checks, and a transaction opener that suspends foreign-key
//! enforcement for the duration of a migration transaction.
//!
//! The driver binds to a single connection: open pools with
//! `max_connections(1)` so transaction bracketing and pragmas apply to
//! the statements that follow them.

mod diff;
mod inspect;
mod plan;
mod revisions;
mod types;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::debug;
use url::Url;

use strata_client::{Client, ClientUrl, Opener, Registration, TxOpener, UrlParser};
use strata_migrate::driver::{Driver, InspectOptions, RestoreFunc, UnlockFunc};
use strata_migrate::{
    scan_file, MigrateError, Plan, Result, ScannerOptions, Stmt, TableIdent,
};
use strata_schema::changes::{Change, DiffOptions};
use strata_schema::diff::Differ;
use strata_schema::model::{Realm, Schema, Table};
use strata_schema::types::Type;

pub use diff::SqliteDiff;
pub use inspect::MAIN_SCHEMA;
pub use revisions::SqliteRevisions;

/// Name used for registration; `sqlite3` is accepted as a flavour.
pub const DRIVER_NAME: &str = "sqlite";

// Foreign-key state captured when a transaction suspends enforcement.
struct TxState {
    fk_was_on: bool,
    before: Vec<Violation>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Violation {
    table: String,
    rowid: Option<i64>,
    parent: String,
    fkid: i64,
}

/// A SQLite driver bound to one connection.
pub struct SqliteDriver {
    pool: SqlitePool,
    lock_ns: String,
    differ: Differ<SqliteDiff>,
    tx: Mutex<Option<TxState>>,
}

impl SqliteDriver {
    /// Wraps an existing pool.
    #[must_use]
    pub fn open(pool: SqlitePool) -> Self {
        Self {
            pool,
            lock_ns: uuid::Uuid::new_v4().to_string(),
            differ: Differ::new(SqliteDiff),
            tx: Mutex::new(None),
        }
    }

    /// Connects to the given DSN with a single connection.
    pub async fn connect(dsn: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(dsn)
            .await?;
        let mut driver = Self::open(pool);
        // Every in-memory connection is its own database; file-backed
        // databases share locks by location.
        if !dsn.contains(":memory:") {
            driver.lock_ns = dsn.to_string();
        }
        Ok(driver)
    }

    /// The underlying pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn foreign_keys_enabled(&self) -> Result<bool> {
        let row = sqlx::query("PRAGMA foreign_keys").fetch_one(&self.pool).await?;
        Ok(row.try_get::<i64, _>(0)? != 0)
    }

    async fn violations(&self) -> Result<Vec<Violation>> {
        let rows = sqlx::query("PRAGMA foreign_key_check").fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                Ok(Violation {
                    table: row.try_get(0)?,
                    rowid: row.try_get(1)?,
                    parent: row.try_get(2)?,
                    fkid: row.try_get(3)?,
                })
            })
            .collect()
    }

    // The lock file path: the lock name plus a digest of the database
    // identity, so distinct databases get distinct locks.
    fn lock_path(&self, name: &str) -> PathBuf {
        let digest = Sha256::digest(self.lock_ns.as_bytes());
        let file = format!(
            "{name}_{:02x}{:02x}{:02x}{:02x}",
            digest[0], digest[1], digest[2], digest[3]
        );
        std::env::temp_dir().join(format!("{file}.lock"))
    }
}

#[async_trait]
impl Driver for SqliteDriver {
    async fn inspect_schema(&self, name: Option<&str>, opts: &InspectOptions) -> Result<Schema> {
        inspect::inspect_schema(&self.pool, name, opts).await
    }

    async fn inspect_realm(&self, opts: &InspectOptions) -> Result<Realm> {
        inspect::inspect_realm(&self.pool, opts).await
    }

    fn realm_diff(&self, from: &Realm, to: &Realm, opts: &DiffOptions) -> Result<Vec<Change>> {
        Ok(self.differ.realm_diff(from, to, opts)?)
    }

    fn schema_diff(&self, from: &Schema, to: &Schema, opts: &DiffOptions) -> Result<Vec<Change>> {
        Ok(self.differ.schema_diff(from, to, opts)?)
    }

    fn table_diff(&self, from: &Table, to: &Table, opts: &DiffOptions) -> Result<Vec<Change>> {
        Ok(self.differ.table_diff(from, to, opts)?)
    }

    async fn plan_changes(&self, name: &str, changes: &[Change]) -> Result<Plan> {
        plan::plan_changes(name, changes)
    }

    async fn apply_changes(&self, changes: &[Change]) -> Result<()> {
        let plan = plan::plan_changes("apply", changes)?;
        for change in &plan.changes {
            self.exec(&change.cmd).await?;
        }
        Ok(())
    }

    async fn exec(&self, stmt: &str) -> Result<()> {
        debug!(stmt, "exec");
        sqlx::query(stmt).execute(&self.pool).await?;
        Ok(())
    }

    fn scan_stmts(&self, input: &str) -> Result<Vec<Stmt>> {
        scan_file(
            input,
            ScannerOptions {
                match_begin: true,
                ..ScannerOptions::default()
            },
        )
    }

    async fn check_clean(&self, rev_table: Option<&TableIdent>) -> Result<()> {
        let realm = self.inspect_realm(&InspectOptions::new()).await?;
        let schema = &realm.schemas[0];
        match schema.tables.as_slice() {
            [] => Ok(()),
            [table] if rev_table.is_some_and(|t| t.name == table.name) => Ok(()),
            [table] => Err(MigrateError::NotClean {
                reason: format!("found table {:?}", table.name),
            }),
            tables => Err(MigrateError::NotClean {
                reason: format!("found multiple tables: {}", tables.len()),
            }),
        }
    }

    async fn snapshot(&self) -> Result<Box<dyn RestoreFunc>> {
        let realm = self.inspect_realm(&InspectOptions::new()).await?;
        if let Some(table) = realm.schemas[0].tables.first() {
            return Err(MigrateError::NotClean {
                reason: format!("found table {:?}", table.name),
            });
        }
        Ok(Box::new(SqliteRestore { pool: self.pool.clone() }))
    }

    async fn lock(&self, name: &str, timeout: Duration) -> Result<Box<dyn UnlockFunc>> {
        let path = self.lock_path(name);
        if let Ok(content) = std::fs::read_to_string(&path) {
            let expires: i128 = content
                .trim()
                .parse()
                .map_err(|_| MigrateError::Driver(format!("invalid lock file {}", path.display())))?;
            if expires > now_nanos() {
                return Err(MigrateError::LockBusy(name.to_string()));
            }
            // Stale lock; reclaim it.
        }
        let expires = now_nanos() + i128::from(timeout.as_nanos() as u64);
        std::fs::write(&path, expires.to_string())?;
        Ok(Box::new(FileUnlock { path: Mutex::new(Some(path)) }))
    }

    async fn tx_begin(&self) -> Result<bool> {
        let fk_was_on = self.foreign_keys_enabled().await?;
        let before = if fk_was_on {
            self.exec("PRAGMA foreign_keys = off").await?;
            self.violations().await?
        } else {
            Vec::new()
        };
        self.exec("BEGIN").await?;
        *self.tx.lock().expect("tx state poisoned") = Some(TxState { fk_was_on, before });
        Ok(true)
    }

    async fn tx_commit(&self) -> Result<()> {
        let state = self.tx.lock().expect("tx state poisoned").take();
        let Some(state) = state else {
            return Err(MigrateError::Driver("no open transaction".to_string()));
        };
        if state.fk_was_on {
            let after = self.violations().await?;
            let introduced: Vec<&Violation> =
                after.iter().filter(|v| !state.before.contains(v)).collect();
            if !introduced.is_empty() {
                self.exec("ROLLBACK").await?;
                self.exec("PRAGMA foreign_keys = on").await?;
                return Err(MigrateError::Driver(format!(
                    "foreign key mismatch: {introduced:?}"
                )));
            }
        }
        self.exec("COMMIT").await?;
        if state.fk_was_on {
            self.exec("PRAGMA foreign_keys = on").await?;
        }
        Ok(())
    }

    async fn tx_rollback(&self) -> Result<()> {
        let state = self.tx.lock().expect("tx state poisoned").take();
        let Some(state) = state else {
            return Err(MigrateError::Driver("no open transaction".to_string()));
        };
        self.exec("ROLLBACK").await?;
        if state.fk_was_on {
            self.exec("PRAGMA foreign_keys = on").await?;
        }
        Ok(())
    }

    fn format_type(&self, ty: &Type) -> Result<String> {
        Ok(types::format_type(ty)?)
    }

    fn parse_type(&self, s: &str) -> Result<Type> {
        Ok(types::parse_type(s)?)
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

struct SqliteRestore {
    pool: SqlitePool,
}

#[async_trait]
impl RestoreFunc for SqliteRestore {
    async fn restore(&self) -> Result<()> {
        for stmt in [
            "PRAGMA writable_schema = 1",
            "DELETE FROM sqlite_master WHERE type IN ('table', 'view', 'index', 'trigger')",
            "PRAGMA writable_schema = 0",
            "VACUUM",
        ] {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(())
    }
}

struct FileUnlock {
    path: Mutex<Option<PathBuf>>,
}

#[async_trait]
impl UnlockFunc for FileUnlock {
    async fn unlock(&self) -> Result<()> {
        let path = self.path.lock().expect("lock path poisoned").take();
        match path {
            Some(path) => Ok(std::fs::remove_file(path)?),
            None => Err(MigrateError::Driver("lock was already released".to_string())),
        }
    }
}

fn now_nanos() -> i128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i128)
        .unwrap_or_default()
}

struct SqliteUrlParser;

impl UrlParser for SqliteUrlParser {
    fn parse_url(&self, url: &Url) -> ClientUrl {
        let dsn = if url.query_pairs().any(|(k, v)| k == "mode" && v == "memory") {
            "sqlite::memory:".to_string()
        } else {
            let mut path = String::new();
            if let Some(host) = url.host_str() {
                path.push_str(host);
            }
            path.push_str(url.path());
            format!("sqlite:{path}")
        };
        ClientUrl {
            url: url.clone(),
            dsn,
            schema: Some(MAIN_SCHEMA.to_string()),
        }
    }
}

struct SqliteOpener;

#[async_trait]
impl Opener for SqliteOpener {
    async fn open(&self, url: &Url) -> strata_client::Result<Client> {
        let parsed = SqliteUrlParser.parse_url(url);
        let driver = SqliteDriver::connect(&parsed.dsn).await?;
        Ok(Client::new(DRIVER_NAME, parsed, Arc::new(driver)))
    }
}

struct SqliteTxOpener;

#[async_trait]
impl TxOpener for SqliteTxOpener {
    async fn begin(&self, driver: &dyn Driver) -> strata_client::Result<()> {
        driver.tx_begin().await?;
        Ok(())
    }
}

/// Registers the driver under the `sqlite` scheme (flavour `sqlite3`).
/// Call once at startup.
pub fn register() {
    Registration::new(DRIVER_NAME, Arc::new(SqliteOpener))
        .flavours(&["sqlite3"])
        .url_parser(SqliteUrlParser)
        .tx_opener(SqliteTxOpener)
        .register();
}
