//! Catalog inspection.
//!
//! Reads the connected database's structure from `sqlite_master` and
//! the pragma table-valued functions into the schema model. SQLite
//! exposes a single schema named `main`.

use regex::Regex;
use sqlx::{Row, SqlitePool};

use strata_migrate::{InspectMode, InspectOptions, MigrateError, Result};
use strata_schema::attr::{Attr, Check};
use strata_schema::model::{
    Column, ForeignKey, Index, IndexPart, Part, Realm, ReferenceOption, Schema, Table, Trigger,
    View,
};
use strata_schema::types::ColumnType;

use crate::types::parse_type;

/// Name of the single schema a database file presents.
pub const MAIN_SCHEMA: &str = "main";

pub(crate) async fn inspect_realm(pool: &SqlitePool, opts: &InspectOptions) -> Result<Realm> {
    Ok(Realm {
        schemas: vec![inspect_schema(pool, None, opts).await?],
        ..Realm::default()
    })
}

pub(crate) async fn inspect_schema(
    pool: &SqlitePool,
    name: Option<&str>,
    opts: &InspectOptions,
) -> Result<Schema> {
    match name {
        Some(n) if n != MAIN_SCHEMA => {
            return Err(MigrateError::NotExist(format!("schema {n:?}")));
        }
        _ => {}
    }
    let mut schema = Schema::new(MAIN_SCHEMA);
    if opts.mode.contains(InspectMode::TABLES) {
        schema.tables = inspect_tables(pool, opts).await?;
    }
    if opts.mode.contains(InspectMode::VIEWS) {
        schema.views = inspect_views(pool, opts).await?;
    }
    if opts.mode.contains(InspectMode::TRIGGERS) {
        attach_triggers(pool, &mut schema).await?;
    }
    Ok(schema)
}

async fn inspect_tables(pool: &SqlitePool, opts: &InspectOptions) -> Result<Vec<Table>> {
    let rows = sqlx::query(
        "SELECT name, sql FROM sqlite_master \
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )
    .fetch_all(pool)
    .await?;
    let mut tables = Vec::new();
    for row in rows {
        let name: String = row.try_get("name")?;
        if !opts.matches(&name) {
            continue;
        }
        let sql: String = row.try_get::<Option<String>, _>("sql")?.unwrap_or_default();
        tables.push(inspect_table(pool, &name, &sql).await?);
    }
    Ok(tables)
}

async fn inspect_table(pool: &SqlitePool, name: &str, sql: &str) -> Result<Table> {
    let mut table = Table::new(name);
    table.schema = MAIN_SCHEMA.to_string();

    // Columns and the primary key.
    let mut pk_cols: Vec<(i64, String)> = Vec::new();
    let rows = sqlx::query(
        "SELECT name, type, `notnull`, dflt_value, pk FROM pragma_table_info(?) ORDER BY cid",
    )
    .bind(name)
    .fetch_all(pool)
    .await?;
    for row in rows {
        let col_name: String = row.try_get("name")?;
        let raw_type: String = row.try_get("type")?;
        let notnull: i64 = row.try_get("notnull")?;
        let default: Option<String> = row.try_get("dflt_value")?;
        let pk: i64 = row.try_get("pk")?;
        let ty = parse_type(&raw_type).map_err(MigrateError::Schema)?;
        table.columns.push(Column {
            name: col_name.clone(),
            column_type: ColumnType {
                ty,
                null: notnull == 0,
                raw: raw_type,
            },
            default,
            attrs: Vec::new(),
        });
        if pk > 0 {
            pk_cols.push((pk, col_name));
        }
    }
    if !pk_cols.is_empty() {
        pk_cols.sort_by_key(|(pk, _)| *pk);
        let mut index = Index::new("");
        for (_, col) in pk_cols {
            index = index.column(col);
        }
        table.primary_key = Some(index);
    }

    table.indexes = inspect_indexes(pool, name).await?;
    table.foreign_keys = inspect_foreign_keys(pool, name, sql).await?;
    for check in parse_checks(sql) {
        table.attrs.push(Attr::Check(check));
    }
    Ok(table)
}

async fn inspect_indexes(pool: &SqlitePool, table: &str) -> Result<Vec<Index>> {
    let rows = sqlx::query(
        "SELECT name, `unique`, origin FROM pragma_index_list(?) ORDER BY seq",
    )
    .bind(table)
    .fetch_all(pool)
    .await?;
    let mut indexes = Vec::new();
    for row in rows {
        let origin: String = row.try_get("origin")?;
        // The implicit primary-key index is modeled on the table.
        if origin == "pk" {
            continue;
        }
        let name: String = row.try_get("name")?;
        let unique: i64 = row.try_get("unique")?;
        let mut index = Index::new(&name);
        index.unique = unique != 0;

        let parts = sqlx::query(
            "SELECT seqno, cid, name, `desc` FROM pragma_index_xinfo(?) WHERE key = 1 ORDER BY seqno",
        )
        .bind(&name)
        .fetch_all(pool)
        .await?;
        for part in parts {
            let seqno: i64 = part.try_get("seqno")?;
            let cid: i64 = part.try_get("cid")?;
            let col: Option<String> = part.try_get("name")?;
            let desc: i64 = part.try_get("desc")?;
            let part = match (col, cid) {
                (Some(col), _) => Part::Column(col),
                // An expression part; the pragma does not expose its
                // text.
                (None, -2) => Part::Expr(String::new()),
                (None, _) => continue,
            };
            index.parts.push(IndexPart {
                seq_no: seqno as u32 + 1,
                desc: desc != 0,
                part,
                attrs: Vec::new(),
            });
        }
        indexes.push(index);
    }
    Ok(indexes)
}

async fn inspect_foreign_keys(pool: &SqlitePool, table: &str, sql: &str) -> Result<Vec<ForeignKey>> {
    let rows = sqlx::query(
        "SELECT id, `table`, `from`, `to`, on_update, on_delete \
         FROM pragma_foreign_key_list(?) ORDER BY id, seq",
    )
    .bind(table)
    .fetch_all(pool)
    .await?;
    let named = named_constraints(sql);
    let mut fks: Vec<(i64, ForeignKey)> = Vec::new();
    for row in rows {
        let id: i64 = row.try_get("id")?;
        let ref_table: String = row.try_get("table")?;
        let from: String = row.try_get("from")?;
        let to: Option<String> = row.try_get("to")?;
        let on_update: String = row.try_get("on_update")?;
        let on_delete: String = row.try_get("on_delete")?;
        match fks.iter_mut().find(|(fid, _)| *fid == id) {
            Some((_, fk)) => {
                fk.columns.push(from);
                if let Some(to) = to {
                    fk.ref_columns.push(to);
                }
            }
            None => {
                let mut fk = ForeignKey::new(format!("{table}_{ref_table}_{id}"));
                fk.columns.push(from);
                fk.ref_table = ref_table;
                if let Some(to) = to {
                    fk.ref_columns.push(to);
                }
                fk.on_update = parse_action(&on_update);
                fk.on_delete = parse_action(&on_delete);
                fks.push((id, fk));
            }
        }
    }
    // Recover constraint symbols from the table definition: the pragma
    // does not expose them.
    let mut out = Vec::with_capacity(fks.len());
    for (_, mut fk) in fks {
        if let Some(symbol) = named.iter().find_map(|(symbol, cols)| {
            (cols == &fk.columns).then(|| symbol.clone())
        }) {
            fk.symbol = symbol;
        }
        out.push(fk);
    }
    out.reverse();
    Ok(out)
}

// (symbol, referencing columns) of each named foreign-key constraint in
// the table definition.
fn named_constraints(sql: &str) -> Vec<(String, Vec<String>)> {
    let re = Regex::new(r"(?is)CONSTRAINT\s+`([^`]+)`\s+FOREIGN\s+KEY\s*\(([^)]*)\)")
        .expect("constraint pattern");
    re.captures_iter(sql)
        .map(|c| {
            let cols = c[2]
                .split(',')
                .map(|s| s.trim().trim_matches('`').to_string())
                .collect();
            (c[1].to_string(), cols)
        })
        .collect()
}

// CHECK constraints from the table definition: the named
// `CONSTRAINT ... CHECK` form as well as bare column- or table-level
// `CHECK (...)` clauses, which come back unnamed.
fn parse_checks(sql: &str) -> Vec<Check> {
    let re = Regex::new(r"(?is)(?:CONSTRAINT\s+`([^`]+)`\s+)?\bCHECK\s*\(")
        .expect("check pattern");
    let mut checks = Vec::new();
    for captures in re.captures_iter(sql) {
        let whole = captures.get(0).expect("whole match");
        if let Some(expr) = balanced_expr(&sql[whole.end() - 1..]) {
            checks.push(match captures.get(1) {
                Some(name) => Check::new(name.as_str(), expr),
                None => Check::unnamed(expr),
            });
        }
    }
    checks
}

// Extracts the parenthesized expression starting at an opening paren.
fn balanced_expr(s: &str) -> Option<String> {
    let bytes = s.as_bytes();
    let mut depth = 0i32;
    let mut quoted = false;
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'\'' => quoted = !quoted,
            b'(' if !quoted => depth += 1,
            b')' if !quoted => {
                depth -= 1;
                if depth == 0 {
                    return Some(s[1..i].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_action(s: &str) -> ReferenceOption {
    match s.to_ascii_uppercase().as_str() {
        "CASCADE" => ReferenceOption::Cascade,
        "RESTRICT" => ReferenceOption::Restrict,
        "SET NULL" => ReferenceOption::SetNull,
        "SET DEFAULT" => ReferenceOption::SetDefault,
        _ => ReferenceOption::NoAction,
    }
}

async fn inspect_views(pool: &SqlitePool, opts: &InspectOptions) -> Result<Vec<View>> {
    let rows = sqlx::query("SELECT name, sql FROM sqlite_master WHERE type = 'view' ORDER BY name")
        .fetch_all(pool)
        .await?;
    let mut views = Vec::new();
    for row in rows {
        let name: String = row.try_get("name")?;
        if !opts.matches(&name) {
            continue;
        }
        let sql: String = row.try_get::<Option<String>, _>("sql")?.unwrap_or_default();
        views.push(View::new(name, view_def(&sql)));
    }
    Ok(views)
}

// The SELECT body of a CREATE VIEW statement.
fn view_def(sql: &str) -> String {
    match Regex::new(r"(?is)^\s*CREATE\s+VIEW\s+.*?\s+AS\s+(.*)$")
        .expect("view pattern")
        .captures(sql)
    {
        Some(captures) => captures[1].trim().to_string(),
        None => sql.to_string(),
    }
}

async fn attach_triggers(pool: &SqlitePool, schema: &mut Schema) -> Result<()> {
    let rows = sqlx::query(
        "SELECT name, tbl_name, sql FROM sqlite_master WHERE type = 'trigger' ORDER BY name",
    )
    .fetch_all(pool)
    .await?;
    for row in rows {
        let name: String = row.try_get("name")?;
        let tbl: String = row.try_get("tbl_name")?;
        let sql: String = row.try_get::<Option<String>, _>("sql")?.unwrap_or_default();
        let trigger = Trigger::new(name, sql);
        if let Some(table) = schema.tables.iter_mut().find(|t| t.name == tbl) {
            table.triggers.push(trigger);
        } else if let Some(view) = schema.views.iter_mut().find(|v| v.name == tbl) {
            view.triggers.push(trigger);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_constraint_recovery() {
        let sql = "CREATE TABLE `posts` (`id` bigint NOT NULL, `author_id` bigint NOT NULL, \
                   CONSTRAINT `fk_posts_author` FOREIGN KEY (`author_id`) REFERENCES `users` (`id`))";
        let named = named_constraints(sql);
        assert_eq!(named.len(), 1);
        assert_eq!(named[0].0, "fk_posts_author");
        assert_eq!(named[0].1, vec!["author_id"]);
    }

    #[test]
    fn check_parsing_handles_nested_parens() {
        let sql = "CREATE TABLE `t` (`c` int NOT NULL, \
                   CONSTRAINT `c_len` CHECK (length(trim(c)) > 0))";
        let checks = parse_checks(sql);
        assert_eq!(checks.len(), 1);
        assert_eq!(checks[0].name, "c_len");
        assert_eq!(checks[0].expr, "length(trim(c)) > 0");
    }

    #[test]
    fn unnamed_checks_are_recovered() {
        // Column-level and table-level clauses without a CONSTRAINT
        // keyword are ordinary SQLite and must come back unnamed.
        let sql = "CREATE TABLE `t` (`id` int NOT NULL CHECK (id > 0), \
                   `n` int NULL, CHECK (n < length('()')))";
        let checks = parse_checks(sql);
        assert_eq!(checks.len(), 2);
        assert_eq!(checks[0].name, "");
        assert_eq!(checks[0].expr, "id > 0");
        assert_eq!(checks[1].name, "");
        assert_eq!(checks[1].expr, "n < length('()')");
    }

    #[test]
    fn named_and_unnamed_checks_mix() {
        let sql = "CREATE TABLE `t` (`c` int NOT NULL, \
                   CONSTRAINT `c_pos` CHECK (c > 0), CHECK (c < 100))";
        let checks = parse_checks(sql);
        assert_eq!(checks.len(), 2);
        assert_eq!(checks[0].name, "c_pos");
        assert_eq!(checks[0].expr, "c > 0");
        assert_eq!(checks[1].name, "");
        assert_eq!(checks[1].expr, "c < 100");
    }

    #[test]
    fn view_definition_extraction() {
        assert_eq!(
            view_def("CREATE VIEW `v` AS SELECT id FROM users"),
            "SELECT id FROM users"
        );
        assert_eq!(
            view_def("create view v as\nselect 1"),
            "select 1"
        );
    }

    #[test]
    fn action_parsing() {
        assert_eq!(parse_action("CASCADE"), ReferenceOption::Cascade);
        assert_eq!(parse_action("SET NULL"), ReferenceOption::SetNull);
        assert_eq!(parse_action("NO ACTION"), ReferenceOption::NoAction);
        assert_eq!(parse_action(""), ReferenceOption::NoAction);
    }
}
