//! SQL generation for SQLite.
//!
//! Translates change-sets into ordered statement plans. SQLite allows
//! only a narrow set of in-place ALTERs; everything else goes through
//! the table-recreation recipe (build the desired table under a
//! temporary name, copy the surviving rows, swap), bracketed by the
//! foreign-key pragma so half-rebuilt references do not fail.

use strata_migrate::{MigrateError, Plan, PlanChange, Result};
use strata_schema::attr::{attr, checks, Predicate, WithoutRowid};
use strata_schema::changes::Change;
use strata_schema::expr::may_wrap;
use strata_schema::model::{Column, ForeignKey, Index, Part, ReferenceOption, Table, View};

use crate::types::format_type;

const FK_OFF: &str = "PRAGMA foreign_keys = off";
const FK_ON: &str = "PRAGMA foreign_keys = on";

/// Translates a change-set into a statement plan.
pub(crate) fn plan_changes(name: &str, changes: &[Change]) -> Result<Plan> {
    let mut plan = Plan {
        name: name.to_string(),
        changes: Vec::new(),
        delimiter: None,
    };
    for change in changes {
        match change {
            // Database files have exactly one schema; its lifecycle is
            // the file's.
            Change::AddSchema { .. } | Change::ModifySchema { .. } | Change::DropSchema { .. } => {}
            Change::AddTable { table } => plan.changes.extend(create_table(table)?),
            Change::DropTable { table } => {
                plan.changes.push(PlanChange::new(FK_OFF));
                plan.changes.push(
                    PlanChange::new(format!("DROP TABLE {}", quote(&table.name)))
                        .comment(format!("drop table {}", quote(&table.name))),
                );
                plan.changes.push(PlanChange::new(FK_ON));
            }
            Change::RenameTable { from, to } => plan.changes.push(
                PlanChange::new(format!(
                    "ALTER TABLE {} RENAME TO {}",
                    quote(&from.name),
                    quote(&to.name)
                ))
                .reverse(format!(
                    "ALTER TABLE {} RENAME TO {}",
                    quote(&to.name),
                    quote(&from.name)
                ))
                .comment(format!("rename table {} to {}", quote(&from.name), quote(&to.name))),
            ),
            Change::ModifyTable { table, changes } => {
                plan.changes.extend(modify_table(table, changes)?);
            }
            Change::AddView { view } => plan.changes.push(create_view(view)?),
            Change::DropView { view } => plan.changes.push(
                PlanChange::new(format!("DROP VIEW {}", quote(&view.name)))
                    .comment(format!("drop view {}", quote(&view.name))),
            ),
            Change::ModifyView { from, to, .. } => {
                plan.changes.push(
                    PlanChange::new(format!("DROP VIEW {}", quote(&from.name)))
                        .comment(format!("modify view {}", quote(&from.name))),
                );
                plan.changes.push(create_view(to)?);
            }
            Change::AddTrigger { trigger } => plan.changes.push(
                PlanChange::new(trigger.def.trim_end_matches(';'))
                    .reverse(format!("DROP TRIGGER {}", quote(&trigger.name)))
                    .comment(format!("create trigger {}", quote(&trigger.name))),
            ),
            Change::DropTrigger { trigger } => plan.changes.push(
                PlanChange::new(format!("DROP TRIGGER {}", quote(&trigger.name)))
                    .comment(format!("drop trigger {}", quote(&trigger.name))),
            ),
            Change::ModifyTrigger { from, to } => {
                plan.changes.push(PlanChange::new(format!(
                    "DROP TRIGGER {}",
                    quote(&from.name)
                )));
                plan.changes.push(PlanChange::new(to.def.trim_end_matches(';')));
            }
            other => {
                return Err(MigrateError::Schema(
                    strata_schema::SchemaError::UnsupportedChange(describe(other)),
                ))
            }
        }
    }
    Ok(plan)
}

// CREATE TABLE plus its secondary indexes.
fn create_table(table: &Table) -> Result<Vec<PlanChange>> {
    let mut out = vec![PlanChange::new(table_ddl(table, &table.name)?)
        .reverse(format!("DROP TABLE {}", quote(&table.name)))
        .comment(format!("create table {}", quote(&table.name)))];
    for index in &table.indexes {
        out.push(create_index(&table.name, index));
    }
    Ok(out)
}

fn table_ddl(table: &Table, name: &str) -> Result<String> {
    let mut parts = Vec::new();
    for column in &table.columns {
        parts.push(column_def(column)?);
    }
    if let Some(pk) = &table.primary_key {
        parts.push(format!("PRIMARY KEY ({})", part_list(&pk.parts)));
    }
    for fk in &table.foreign_keys {
        parts.push(fk_def(fk));
    }
    for check in checks(&table.attrs) {
        let constraint = if check.name.is_empty() {
            format!("CHECK {}", may_wrap(&check.expr))
        } else {
            format!("CONSTRAINT {} CHECK {}", quote(&check.name), may_wrap(&check.expr))
        };
        parts.push(constraint);
    }
    let mut ddl = format!("CREATE TABLE {} ({})", quote(name), parts.join(", "));
    if attr::<WithoutRowid>(&table.attrs).is_some() {
        ddl.push_str(" WITHOUT ROWID");
    }
    Ok(ddl)
}

fn column_def(column: &Column) -> Result<String> {
    let ty = if column.column_type.raw.is_empty() {
        format_type(&column.column_type.ty)?
    } else {
        column.column_type.raw.clone()
    };
    let mut def = format!("{} {}", quote(&column.name), ty);
    def.push_str(if column.column_type.null { " NULL" } else { " NOT NULL" });
    if let Some(default) = &column.default {
        def.push_str(&format!(" DEFAULT {default}"));
    }
    if let Some(generated) = attr::<strata_schema::attr::Generated>(&column.attrs) {
        def.push_str(&format!(
            " AS {} {}",
            may_wrap(&generated.expr),
            if generated.stored { "STORED" } else { "VIRTUAL" }
        ));
    }
    Ok(def)
}

fn fk_def(fk: &ForeignKey) -> String {
    let mut def = String::new();
    if !fk.symbol.is_empty() {
        def.push_str(&format!("CONSTRAINT {} ", quote(&fk.symbol)));
    }
    def.push_str(&format!(
        "FOREIGN KEY ({}) REFERENCES {} ({})",
        quote_list(&fk.columns),
        quote(&fk.ref_table),
        quote_list(&fk.ref_columns),
    ));
    if fk.on_update != ReferenceOption::NoAction {
        def.push_str(&format!(" ON UPDATE {}", fk.on_update.as_sql()));
    }
    if fk.on_delete != ReferenceOption::NoAction {
        def.push_str(&format!(" ON DELETE {}", fk.on_delete.as_sql()));
    }
    def
}

fn create_index(table: &str, index: &Index) -> PlanChange {
    let name = index_name(table, index);
    let unique = if index.unique { "UNIQUE " } else { "" };
    let mut cmd = format!(
        "CREATE {unique}INDEX {} ON {} ({})",
        quote(&name),
        quote(table),
        part_list(&index.parts)
    );
    if let Some(predicate) = attr::<Predicate>(&index.attrs) {
        cmd.push_str(&format!(" WHERE {}", predicate.0));
    }
    PlanChange::new(cmd)
        .reverse(format!("DROP INDEX {}", quote(&name)))
        .comment(format!("create index {}", quote(&name)))
}

// Unnamed indexes get a deterministic name derived from their parts.
fn index_name(table: &str, index: &Index) -> String {
    if !index.name.is_empty() {
        return index.name.clone();
    }
    let mut name = table.to_string();
    for part in &index.parts {
        if let Part::Column(c) = &part.part {
            name.push('_');
            name.push_str(c);
        }
    }
    name
}

fn part_list(parts: &[strata_schema::model::IndexPart]) -> String {
    parts
        .iter()
        .map(|p| {
            let base = match &p.part {
                Part::Column(c) => quote(c),
                Part::Expr(x) => may_wrap(x),
            };
            if p.desc {
                format!("{base} DESC")
            } else {
                base
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn modify_table(table: &Table, changes: &[Change]) -> Result<Vec<PlanChange>> {
    if changes.iter().any(requires_recreation) {
        return recreate_table(table, changes);
    }
    let mut out = Vec::new();
    for change in changes {
        match change {
            Change::AddColumn { column } => out.push(
                PlanChange::new(format!(
                    "ALTER TABLE {} ADD COLUMN {}",
                    quote(&table.name),
                    column_def(column)?
                ))
                .reverse(format!(
                    "ALTER TABLE {} DROP COLUMN {}",
                    quote(&table.name),
                    quote(&column.name)
                ))
                .comment(format!(
                    "add column {} to table {}",
                    quote(&column.name),
                    quote(&table.name)
                )),
            ),
            Change::DropColumn { column } => out.push(
                PlanChange::new(format!(
                    "ALTER TABLE {} DROP COLUMN {}",
                    quote(&table.name),
                    quote(&column.name)
                ))
                .comment(format!(
                    "drop column {} from table {}",
                    quote(&column.name),
                    quote(&table.name)
                )),
            ),
            Change::AddIndex { index } => out.push(create_index(&table.name, index)),
            Change::DropIndex { index } => out.push(
                PlanChange::new(format!(
                    "DROP INDEX {}",
                    quote(&index_name(&table.name, index))
                ))
                .comment(format!(
                    "drop index {} from table {}",
                    quote(&index_name(&table.name, index)),
                    quote(&table.name)
                )),
            ),
            Change::ModifyIndex { from, to, .. } => {
                out.push(PlanChange::new(format!(
                    "DROP INDEX {}",
                    quote(&index_name(&table.name, from))
                )));
                out.push(create_index(&table.name, to));
            }
            other => {
                return Err(MigrateError::Schema(
                    strata_schema::SchemaError::UnsupportedChange(describe(other)),
                ))
            }
        }
    }
    Ok(out)
}

// Anything SQLite cannot ALTER in place.
fn requires_recreation(change: &Change) -> bool {
    matches!(
        change,
        Change::ModifyColumn { .. }
            | Change::AddPrimaryKey { .. }
            | Change::DropPrimaryKey { .. }
            | Change::ModifyPrimaryKey { .. }
            | Change::AddForeignKey { .. }
            | Change::DropForeignKey { .. }
            | Change::ModifyForeignKey { .. }
            | Change::AddCheck { .. }
            | Change::DropCheck { .. }
            | Change::ModifyCheck { .. }
            | Change::AddAttr { .. }
            | Change::DropAttr { .. }
            | Change::ModifyAttr { .. }
    )
}

// The table-recreation recipe for changes ALTER TABLE cannot express.
fn recreate_table(table: &Table, changes: &[Change]) -> Result<Vec<PlanChange>> {
    let tmp = format!("_{}_new", table.name);
    // Columns that existed before the change carry their rows over.
    let added: Vec<&str> = changes
        .iter()
        .filter_map(|c| match c {
            Change::AddColumn { column } => Some(column.name.as_str()),
            _ => None,
        })
        .collect();
    let carried: Vec<String> = table
        .columns
        .iter()
        .filter(|c| !added.contains(&c.name.as_str()))
        .map(|c| c.name.clone())
        .collect();

    let mut out = vec![
        PlanChange::new(FK_OFF),
        PlanChange::new(table_ddl(table, &tmp)?)
            .comment(format!("recreate table {} with its new shape", quote(&table.name))),
        PlanChange::new(format!(
            "INSERT INTO {} ({}) SELECT {} FROM {}",
            quote(&tmp),
            quote_list(&carried),
            quote_list(&carried),
            quote(&table.name)
        )),
        PlanChange::new(format!("DROP TABLE {}", quote(&table.name))),
        PlanChange::new(format!(
            "ALTER TABLE {} RENAME TO {}",
            quote(&tmp),
            quote(&table.name)
        )),
    ];
    for index in &table.indexes {
        out.push(create_index(&table.name, index));
    }
    out.push(PlanChange::new(FK_ON));
    Ok(out)
}

fn create_view(view: &View) -> Result<PlanChange> {
    if view.materialized {
        return Err(MigrateError::Schema(
            strata_schema::SchemaError::UnsupportedChange("materialized view".to_string()),
        ));
    }
    Ok(
        PlanChange::new(format!("CREATE VIEW {} AS {}", quote(&view.name), view.def))
            .reverse(format!("DROP VIEW {}", quote(&view.name)))
            .comment(format!("create view {}", quote(&view.name))),
    )
}

fn quote(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

fn quote_list(idents: &[String]) -> String {
    idents.iter().map(|i| quote(i)).collect::<Vec<_>>().join(", ")
}

fn describe(change: &Change) -> String {
    let name = match change {
        Change::AddFunc { .. } | Change::DropFunc { .. } | Change::ModifyFunc { .. } => "function",
        Change::AddProc { .. } | Change::DropProc { .. } | Change::ModifyProc { .. } => "procedure",
        Change::AddObject { .. } | Change::DropObject { .. } | Change::ModifyObject { .. } => {
            "database object"
        }
        Change::RenameConstraint { .. } => "constraint rename",
        _ => "change",
    };
    format!("{name} is not supported by the sqlite dialect")
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_schema::attr::{Attr, Check};
    use strata_schema::changes::ChangeKind;
    use strata_schema::types::Type;

    fn t1() -> Table {
        Table::new("t1").column(Column::new("id", Type::int()).null())
    }

    #[test]
    fn create_table_plan() {
        let plan = plan_changes("add_t1", &[Change::AddTable { table: t1() }]).unwrap();
        assert_eq!(plan.changes.len(), 1);
        assert_eq!(plan.changes[0].cmd, "CREATE TABLE `t1` (`id` int NULL)");
        assert_eq!(plan.changes[0].reverse.as_deref(), Some("DROP TABLE `t1`"));
    }

    #[test]
    fn drop_table_uses_fk_bracket() {
        let plan = plan_changes("drop_users", &[Change::DropTable { table: Table::new("users") }])
            .unwrap();
        let cmds: Vec<&str> = plan.changes.iter().map(|c| c.cmd.as_str()).collect();
        assert_eq!(
            cmds,
            vec!["PRAGMA foreign_keys = off", "DROP TABLE `users`", "PRAGMA foreign_keys = on"]
        );
    }

    #[test]
    fn add_column_plan() {
        let table = Table::new("tbl");
        let changes = vec![Change::ModifyTable {
            table: table.clone(),
            changes: vec![Change::AddColumn {
                column: Column::new("col_3", Type::Text),
            }],
        }];
        let plan = plan_changes("add_col", &changes).unwrap();
        assert_eq!(plan.changes.len(), 1);
        assert_eq!(
            plan.changes[0].cmd,
            "ALTER TABLE `tbl` ADD COLUMN `col_3` text NOT NULL"
        );
    }

    #[test]
    fn full_table_ddl() {
        let table = Table::new("posts")
            .column(Column::new("id", Type::bigint()))
            .column(Column::new("author_id", Type::bigint()))
            .column(Column::new("title", Type::varchar(255)).null().default_expr("'untitled'"))
            .primary_key(Index::new("").column("id"))
            .foreign_key(
                ForeignKey::new("fk_posts_author")
                    .columns(vec!["author_id".into()])
                    .references("users", vec!["id".into()])
                    .on_delete(ReferenceOption::Cascade),
            )
            .attr(Attr::Check(Check::new("title_len", "length(title) > 0")));

        let ddl = table_ddl(&table, "posts").unwrap();
        assert_eq!(
            ddl,
            "CREATE TABLE `posts` (`id` bigint NOT NULL, `author_id` bigint NOT NULL, \
             `title` varchar(255) NULL DEFAULT 'untitled', PRIMARY KEY (`id`), \
             CONSTRAINT `fk_posts_author` FOREIGN KEY (`author_id`) REFERENCES `users` (`id`) \
             ON DELETE CASCADE, CONSTRAINT `title_len` CHECK (length(title) > 0))"
        );
    }

    #[test]
    fn modify_column_recreates_table() {
        let desired = Table::new("users")
            .column(Column::new("id", Type::bigint()))
            .column(Column::new("age", Type::bigint()).null());
        let changes = vec![Change::ModifyTable {
            table: desired.clone(),
            changes: vec![Change::ModifyColumn {
                from: Column::new("age", Type::int()).null(),
                to: Column::new("age", Type::bigint()).null(),
                change: ChangeKind::TYPE,
            }],
        }];
        let plan = plan_changes("alter", &changes).unwrap();
        let cmds: Vec<&str> = plan.changes.iter().map(|c| c.cmd.as_str()).collect();
        assert_eq!(
            cmds,
            vec![
                "PRAGMA foreign_keys = off",
                "CREATE TABLE `_users_new` (`id` bigint NOT NULL, `age` bigint NULL)",
                "INSERT INTO `_users_new` (`id`, `age`) SELECT `id`, `age` FROM `users`",
                "DROP TABLE `users`",
                "ALTER TABLE `_users_new` RENAME TO `users`",
                "PRAGMA foreign_keys = on",
            ]
        );
    }

    #[test]
    fn recreation_excludes_added_columns_from_copy() {
        let desired = Table::new("users")
            .column(Column::new("id", Type::bigint()))
            .column(Column::new("email", Type::Text).null());
        let changes = vec![Change::ModifyTable {
            table: desired,
            changes: vec![
                Change::AddColumn { column: Column::new("email", Type::Text).null() },
                Change::AddCheck { check: Check::new("c", "id > 0") },
            ],
        }];
        let plan = plan_changes("alter", &changes).unwrap();
        let copy = plan
            .changes
            .iter()
            .find(|c| c.cmd.starts_with("INSERT"))
            .unwrap();
        assert_eq!(
            copy.cmd,
            "INSERT INTO `_users_new` (`id`) SELECT `id` FROM `users`"
        );
    }

    #[test]
    fn index_statements() {
        let index = Index::new("users_email").unique().column("email");
        let change = create_index("users", &index);
        assert_eq!(
            change.cmd,
            "CREATE UNIQUE INDEX `users_email` ON `users` (`email`)"
        );

        let partial = Index::new("active_idx")
            .column("email")
            .part(strata_schema::model::IndexPart {
                seq_no: 2,
                desc: true,
                part: Part::Column("created_at".into()),
                attrs: Vec::new(),
            });
        let mut partial = partial;
        partial.attrs.push(Attr::Predicate(Predicate("active = 1".into())));
        let change = create_index("users", &partial);
        assert_eq!(
            change.cmd,
            "CREATE INDEX `active_idx` ON `users` (`email`, `created_at` DESC) WHERE active = 1"
        );
    }

    #[test]
    fn view_lifecycle() {
        let view = View::new("v_users", "SELECT id FROM users");
        let plan = plan_changes("views", &[Change::AddView { view: view.clone() }]).unwrap();
        assert_eq!(plan.changes[0].cmd, "CREATE VIEW `v_users` AS SELECT id FROM users");

        let plan = plan_changes("views", &[Change::DropView { view }]).unwrap();
        assert_eq!(plan.changes[0].cmd, "DROP VIEW `v_users`");
    }

    #[test]
    fn unsupported_changes_error() {
        let err = plan_changes(
            "fn",
            &[Change::AddFunc { func: strata_schema::model::Func::default() }],
        )
        .unwrap_err();
        assert!(err.to_string().contains("not supported"));
    }
}
