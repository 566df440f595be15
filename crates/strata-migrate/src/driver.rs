//! The dialect driver capability set.
//!
//! A [`Driver`] bundles everything the engine needs from a dialect:
//! inspection, diffing, planning, statement execution and scanning,
//! cleanliness checks, snapshots and locking. Drivers are bound to one
//! connection (or transaction) and must not be shared across
//! transactions.

use std::time::Duration;

use async_trait::async_trait;
use bitflags::bitflags;

use strata_schema::changes::{Change, DiffOptions};
use strata_schema::model::{Realm, Schema, Table};
use strata_schema::types::Type;

use crate::error::Result;
use crate::plan::Plan;
use crate::revision::TableIdent;
use crate::stmt::Stmt;

bitflags! {
    /// What to read during inspection.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InspectMode: u16 {
        /// Schema attributes.
        const SCHEMAS = 1 << 0;
        /// Tables with their columns, keys and indexes.
        const TABLES = 1 << 1;
        /// Views.
        const VIEWS = 1 << 2;
        /// Functions.
        const FUNCS = 1 << 3;
        /// Procedures.
        const PROCS = 1 << 4;
        /// Triggers.
        const TRIGGERS = 1 << 5;
        /// Schema- and realm-level objects.
        const OBJECTS = 1 << 6;
    }
}

impl Default for InspectMode {
    fn default() -> Self {
        Self::all()
    }
}

/// Filters for inspection.
#[derive(Debug, Clone, Default)]
pub struct InspectOptions {
    /// What to inspect.
    pub mode: InspectMode,
    /// Glob patterns of object names to include; empty includes all.
    pub include: Vec<String>,
    /// Glob patterns of object names to exclude.
    pub exclude: Vec<String>,
}

impl InspectOptions {
    /// Creates options inspecting everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports whether the named object passes the include/exclude
    /// filters.
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        if self.exclude.iter().any(|p| glob_match(p, name)) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|p| glob_match(p, name))
    }
}

/// Minimal glob matching over `*` (any run) and `?` (any one char).
#[must_use]
pub fn glob_match(pattern: &str, name: &str) -> bool {
    fn matches(p: &[u8], n: &[u8]) -> bool {
        match (p.first(), n.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                matches(&p[1..], n) || (!n.is_empty() && matches(p, &n[1..]))
            }
            (Some(b'?'), Some(_)) => matches(&p[1..], &n[1..]),
            (Some(a), Some(b)) if a == b => matches(&p[1..], &n[1..]),
            _ => false,
        }
    }
    matches(pattern.as_bytes(), name.as_bytes())
}

/// A callback restoring the database to a snapshotted state.
#[async_trait]
pub trait RestoreFunc: Send + Sync {
    /// Restores the snapshotted state.
    async fn restore(&self) -> Result<()>;
}

/// Releases a named advisory lock. Reports failure when the lock was no
/// longer held.
#[async_trait]
pub trait UnlockFunc: Send + Sync {
    /// Releases the lock.
    async fn unlock(&self) -> Result<()>;
}

/// The full capability set of a dialect driver.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Inspects a single schema. `None` selects the connected schema.
    async fn inspect_schema(&self, name: Option<&str>, opts: &InspectOptions) -> Result<Schema>;

    /// Inspects the whole realm.
    async fn inspect_realm(&self, opts: &InspectOptions) -> Result<Realm>;

    /// Diffs two realms.
    fn realm_diff(&self, from: &Realm, to: &Realm, opts: &DiffOptions) -> Result<Vec<Change>>;

    /// Diffs two schemas.
    fn schema_diff(&self, from: &Schema, to: &Schema, opts: &DiffOptions) -> Result<Vec<Change>>;

    /// Diffs two tables.
    fn table_diff(&self, from: &Table, to: &Table, opts: &DiffOptions) -> Result<Vec<Change>>;

    /// Translates a change-set into an ordered statement plan.
    async fn plan_changes(&self, name: &str, changes: &[Change]) -> Result<Plan>;

    /// Executes a change-set directly against the connection.
    async fn apply_changes(&self, changes: &[Change]) -> Result<()>;

    /// Executes a single statement.
    async fn exec(&self, stmt: &str) -> Result<()>;

    /// Splits a script into statements, preserving comments and
    /// positions and honoring the file's delimiter directive.
    fn scan_stmts(&self, input: &str) -> Result<Vec<Stmt>>;

    /// Reports whether the connected database is empty except for an
    /// optional revisions table.
    async fn check_clean(&self, rev_table: Option<&TableIdent>) -> Result<()>;

    /// Captures the current state and returns a restore callback. Fails
    /// with [`crate::MigrateError::NotClean`] when the database is not
    /// empty.
    async fn snapshot(&self) -> Result<Box<dyn RestoreFunc>>;

    /// Acquires a named exclusive lock. A zero timeout tries once.
    async fn lock(&self, name: &str, timeout: Duration) -> Result<Box<dyn UnlockFunc>>;

    /// Optional: opens a transaction for `txmode` bracketing. Returns
    /// `false` when the driver does not support transactional DDL.
    async fn tx_begin(&self) -> Result<bool> {
        Ok(false)
    }

    /// Commits the transaction opened by [`Driver::tx_begin`].
    async fn tx_commit(&self) -> Result<()> {
        Ok(())
    }

    /// Rolls back the transaction opened by [`Driver::tx_begin`].
    async fn tx_rollback(&self) -> Result<()> {
        Ok(())
    }

    /// Renders a logical type in the dialect's syntax.
    fn format_type(&self, ty: &Type) -> Result<String>;

    /// Parses a dialect type string into a logical type.
    fn parse_type(&self, s: &str) -> Result<Type>;

    /// Releases the underlying connection resources.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_matching() {
        assert!(glob_match("*", "users"));
        assert!(glob_match("users", "users"));
        assert!(glob_match("user*", "users"));
        assert!(glob_match("*_tmp", "users_tmp"));
        assert!(glob_match("u?ers", "users"));
        assert!(!glob_match("posts", "users"));
        assert!(!glob_match("user", "users"));
    }

    #[test]
    fn inspect_filters() {
        let opts = InspectOptions {
            include: vec!["public*".into()],
            exclude: vec!["*_tmp".into()],
            ..InspectOptions::default()
        };
        assert!(opts.matches("public_users"));
        assert!(!opts.matches("public_users_tmp"));
        assert!(!opts.matches("private"));

        let all = InspectOptions::new();
        assert!(all.matches("anything"));
        assert!(all.mode.contains(InspectMode::TABLES | InspectMode::VIEWS));
    }
}
