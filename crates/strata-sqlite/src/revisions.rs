//! The SQLite-backed revision store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use strata_migrate::revision::IDENT_VERSION;
use strata_migrate::{
    MigrateError, Result, Revision, RevisionStore, RevisionType, TableIdent, REVISIONS_TABLE,
};

/// Stores revisions in a `strata_schema_revisions` table. The schema
/// qualifier is configurable.
pub struct SqliteRevisions {
    pool: SqlitePool,
    ident: TableIdent,
}

impl SqliteRevisions {
    /// Creates a store over the default table name.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            ident: TableIdent {
                schema: None,
                name: REVISIONS_TABLE.to_string(),
            },
        }
    }

    /// Qualifies the backing table with a schema.
    #[must_use]
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.ident.schema = Some(schema.into());
        self
    }

    fn table_ref(&self) -> String {
        match &self.ident.schema {
            Some(schema) => format!("`{}`.`{}`", schema, self.ident.name),
            None => format!("`{}`", self.ident.name),
        }
    }

    fn row_to_revision(row: &sqlx::sqlite::SqliteRow) -> Result<Revision> {
        let executed_at: Option<String> = row.try_get("executed_at")?;
        let executed_at = executed_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));
        let partial: String = row.try_get("partial_hashes")?;
        let kind: i64 = row.try_get("type")?;
        Ok(Revision {
            version: row.try_get("version")?,
            description: row.try_get("description")?,
            kind: RevisionType::from_bits_retain(kind as u8),
            applied: row.try_get::<i64, _>("applied")? as usize,
            total: row.try_get::<i64, _>("total")? as usize,
            executed_at,
            execution_time_ms: row.try_get::<i64, _>("execution_time")? as u64,
            error: row.try_get("error")?,
            error_stmt: row.try_get("error_stmt")?,
            hash: row.try_get("hash")?,
            partial_hashes: serde_json::from_str(&partial)?,
            operator_version: row.try_get("operator_version")?,
        })
    }
}

#[async_trait]
impl RevisionStore for SqliteRevisions {
    async fn init(&self) -> Result<()> {
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (\
             version TEXT PRIMARY KEY, \
             description TEXT NOT NULL, \
             type INTEGER NOT NULL, \
             applied INTEGER NOT NULL, \
             total INTEGER NOT NULL, \
             executed_at TEXT NULL, \
             execution_time INTEGER NOT NULL, \
             error TEXT NOT NULL, \
             error_stmt TEXT NOT NULL, \
             hash TEXT NOT NULL, \
             partial_hashes TEXT NOT NULL, \
             operator_version TEXT NOT NULL)",
            self.table_ref()
        );
        sqlx::query(&ddl).execute(&self.pool).await?;
        Ok(())
    }

    async fn exists(&self) -> Result<bool> {
        let row = sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(&self.ident.name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn read_revisions(&self) -> Result<Vec<Revision>> {
        let query = format!(
            "SELECT * FROM {} WHERE version != ? ORDER BY version",
            self.table_ref()
        );
        let rows = sqlx::query(&query)
            .bind(IDENT_VERSION)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_revision).collect()
    }

    async fn read_revision(&self, version: &str) -> Result<Revision> {
        if version == IDENT_VERSION {
            return Err(MigrateError::RevisionNotExist);
        }
        let query = format!("SELECT * FROM {} WHERE version = ?", self.table_ref());
        let row = sqlx::query(&query)
            .bind(version)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Self::row_to_revision(&row),
            None => Err(MigrateError::RevisionNotExist),
        }
    }

    async fn write_revision(&self, revision: &Revision) -> Result<()> {
        let query = format!(
            "INSERT INTO {} (version, description, type, applied, total, executed_at, \
             execution_time, error, error_stmt, hash, partial_hashes, operator_version) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(version) DO UPDATE SET \
             description = excluded.description, type = excluded.type, \
             applied = excluded.applied, total = excluded.total, \
             executed_at = excluded.executed_at, execution_time = excluded.execution_time, \
             error = excluded.error, error_stmt = excluded.error_stmt, \
             hash = excluded.hash, partial_hashes = excluded.partial_hashes, \
             operator_version = excluded.operator_version",
            self.table_ref()
        );
        sqlx::query(&query)
            .bind(&revision.version)
            .bind(&revision.description)
            .bind(i64::from(revision.kind.bits()))
            .bind(revision.applied as i64)
            .bind(revision.total as i64)
            .bind(revision.executed_at.map(|dt| dt.to_rfc3339()))
            .bind(revision.execution_time_ms as i64)
            .bind(&revision.error)
            .bind(&revision.error_stmt)
            .bind(&revision.hash)
            .bind(serde_json::to_string(&revision.partial_hashes)?)
            .bind(&revision.operator_version)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_revision(&self, version: &str) -> Result<()> {
        let query = format!("DELETE FROM {} WHERE version = ?", self.table_ref());
        sqlx::query(&query).bind(version).execute(&self.pool).await?;
        Ok(())
    }

    fn ident(&self) -> TableIdent {
        self.ident.clone()
    }

    async fn id(&self, operator_version: &str) -> Result<String> {
        self.init().await?;
        let query = format!(
            "SELECT description FROM {} WHERE version = ?",
            self.table_ref()
        );
        let row = sqlx::query(&query)
            .bind(IDENT_VERSION)
            .fetch_optional(&self.pool)
            .await?;
        if let Some(row) = row {
            return Ok(row.try_get("description")?);
        }
        let id = uuid::Uuid::new_v4().to_string();
        let insert = format!(
            "INSERT INTO {} (version, description, type, applied, total, executed_at, \
             execution_time, error, error_stmt, hash, partial_hashes, operator_version) \
             VALUES (?, ?, 0, 0, 0, NULL, 0, '', '', '', '[]', ?)",
            self.table_ref()
        );
        sqlx::query(&insert)
            .bind(IDENT_VERSION)
            .bind(&id)
            .bind(operator_version)
            .execute(&self.pool)
            .await?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory pool")
    }

    #[tokio::test]
    async fn init_is_idempotent() {
        let store = SqliteRevisions::new(pool().await);
        assert!(!store.exists().await.unwrap());
        store.init().await.unwrap();
        store.init().await.unwrap();
        assert!(store.exists().await.unwrap());
    }

    #[tokio::test]
    async fn round_trips_revisions() {
        let store = SqliteRevisions::new(pool().await);
        store.init().await.unwrap();

        let revision = Revision {
            version: "20240101".into(),
            description: "add_users".into(),
            kind: RevisionType::EXECUTE,
            applied: 1,
            total: 2,
            executed_at: Some(Utc::now()),
            execution_time_ms: 42,
            error: "boom".into(),
            error_stmt: "SELECT broken;".into(),
            hash: "h".into(),
            partial_hashes: vec!["a".into(), "b".into()],
            operator_version: "v0.3.1".into(),
        };
        store.write_revision(&revision).await.unwrap();

        let read = store.read_revision("20240101").await.unwrap();
        assert_eq!(read.description, "add_users");
        assert_eq!(read.kind, RevisionType::EXECUTE);
        assert_eq!((read.applied, read.total), (1, 2));
        assert_eq!(read.partial_hashes, vec!["a", "b"]);
        assert_eq!(read.error, "boom");
        assert!(read.executed_at.is_some());

        // Update in place.
        let mut done = read.clone();
        done.applied = 2;
        done.error.clear();
        done.partial_hashes.clear();
        store.write_revision(&done).await.unwrap();
        let read = store.read_revision("20240101").await.unwrap();
        assert_eq!(read.applied, 2);
        assert!(read.partial_hashes.is_empty());
        assert_eq!(store.read_revisions().await.unwrap().len(), 1);

        store.delete_revision("20240101").await.unwrap();
        assert!(matches!(
            store.read_revision("20240101").await,
            Err(MigrateError::RevisionNotExist)
        ));
    }

    #[tokio::test]
    async fn current_revision_orders_lexically() {
        let store = SqliteRevisions::new(pool().await);
        store.init().await.unwrap();
        for version in ["1", "2.5", "3"] {
            store
                .write_revision(&Revision {
                    version: version.into(),
                    ..Revision::default()
                })
                .await
                .unwrap();
        }
        assert_eq!(store.current_revision().await.unwrap().version, "3");
    }

    #[tokio::test]
    async fn stable_id_is_persistent_and_hidden() {
        let store = SqliteRevisions::new(pool().await);
        let id1 = store.id("op1").await.unwrap();
        let id2 = store.id("op2").await.unwrap();
        assert_eq!(id1, id2);
        assert!(store.read_revisions().await.unwrap().is_empty());
        assert!(matches!(
            store.read_revision(IDENT_VERSION).await,
            Err(MigrateError::RevisionNotExist)
        ));
    }
}
