//! End-to-end tests against in-memory databases: plan round-trips,
//! executor runs with the SQLite revision store, snapshots and
//! cleanliness checks.

use std::sync::Arc;

use strata_migrate::driver::{Driver, InspectOptions};
use strata_migrate::{
    write_sum_file, DefaultFormatter, Dir, Executor, MemDir, MigrateError, Planner,
    RevisionStore, RevisionType, TableIdent,
};
use strata_schema::attr::{Attr, Check};
use strata_schema::changes::{Change, DiffOptions, SkipChanges};
use strata_schema::model::{Column, ForeignKey, Index, ReferenceOption, Schema, Table};
use strata_schema::types::Type;
use strata_sqlite::{SqliteDriver, SqliteRevisions};

async fn driver() -> SqliteDriver {
    SqliteDriver::connect("sqlite::memory:")
        .await
        .expect("in-memory driver")
}

fn users() -> Table {
    Table::new("users")
        .column(Column::new("id", Type::bigint()))
        .column(Column::new("email", Type::Text).null())
        .primary_key(Index::new("").column("id"))
        .index(Index::new("users_email").unique().column("email"))
}

fn posts() -> Table {
    Table::new("posts")
        .column(Column::new("id", Type::bigint()))
        .column(Column::new("author_id", Type::bigint()))
        .primary_key(Index::new("").column("id"))
        .foreign_key(
            ForeignKey::new("fk_posts_author")
                .columns(vec!["author_id".into()])
                .references("users", vec!["id".into()])
                .on_delete(ReferenceOption::Cascade),
        )
}

#[tokio::test]
async fn plan_apply_inspect_round_trip() {
    let drv = driver().await;
    let desired = Schema::new("main").table(users()).table(posts());

    let current = drv.inspect_schema(None, &InspectOptions::new()).await.unwrap();
    let changes = drv.schema_diff(&current, &desired, &DiffOptions::new()).unwrap();
    assert!(!changes.is_empty());

    drv.apply_changes(&changes).await.unwrap();

    // Inspecting the migrated database yields a schema structurally
    // equal to the desired one: the diff is empty.
    let inspected = drv.inspect_schema(None, &InspectOptions::new()).await.unwrap();
    assert_eq!(inspected.tables.len(), 2);
    let roundtrip = drv.schema_diff(&inspected, &desired, &DiffOptions::new()).unwrap();
    assert!(roundtrip.is_empty(), "round-trip diff should be empty: {roundtrip:#?}");
}

#[tokio::test]
async fn diff_is_idempotent_on_live_schema() {
    let drv = driver().await;
    drv.exec("CREATE TABLE t (id integer NOT NULL, name text NULL, PRIMARY KEY (id))")
        .await
        .unwrap();
    drv.exec("CREATE INDEX t_name ON t (name)").await.unwrap();

    let inspected = drv.inspect_schema(None, &InspectOptions::new()).await.unwrap();
    let changes = drv
        .schema_diff(&inspected, &inspected, &DiffOptions::new())
        .unwrap();
    assert!(changes.is_empty(), "{changes:#?}");
}

#[tokio::test]
async fn empty_to_one_table_plan() {
    let drv = driver().await;
    let desired = Schema::new("main")
        .table(Table::new("t1").column(Column::new("id", Type::int()).null()));
    let current = drv.inspect_schema(None, &InspectOptions::new()).await.unwrap();
    let changes = drv.schema_diff(&current, &desired, &DiffOptions::new()).unwrap();
    let plan = drv.plan_changes("add_t1", &changes).await.unwrap();

    assert_eq!(plan.changes.len(), 1);
    assert_eq!(plan.changes[0].cmd, "CREATE TABLE `t1` (`id` int NULL)");

    // Written to a directory, the statement carries the delimiter.
    let dir = Arc::new(MemDir::new());
    let planner = Planner::without_driver(dir.clone())
        .formatter(DefaultFormatter::with_version("20240101000000"));
    planner.write_plan(&plan).await.unwrap();
    let content = dir.read_file("20240101000000_add_t1.sql").unwrap();
    let content = String::from_utf8(content).unwrap();
    assert!(content.ends_with("CREATE TABLE `t1` (`id` int NULL);\n"), "{content}");
}

#[tokio::test]
async fn add_column_plan() {
    let drv = driver().await;
    drv.exec("CREATE TABLE tbl (col int NOT NULL, col_2 bigint NULL)")
        .await
        .unwrap();
    let current = drv.inspect_schema(None, &InspectOptions::new()).await.unwrap();
    let desired = Schema::new("main").table(
        Table::new("tbl")
            .column(Column::new("col", Type::int()))
            .column(Column::new("col_2", Type::bigint()).null())
            .column(Column::new("col_3", Type::Text)),
    );
    let changes = drv.schema_diff(&current, &desired, &DiffOptions::new()).unwrap();
    let plan = drv.plan_changes("add_col_3", &changes).await.unwrap();
    assert_eq!(plan.changes.len(), 1);
    assert_eq!(
        plan.changes[0].cmd,
        "ALTER TABLE `tbl` ADD COLUMN `col_3` text NOT NULL"
    );
}

#[tokio::test]
async fn destructive_change_respects_skip_policy() {
    let drv = driver().await;
    drv.exec("CREATE TABLE users (id bigint NOT NULL)").await.unwrap();
    let current = drv.inspect_schema(None, &InspectOptions::new()).await.unwrap();
    let desired = Schema::new("main");

    // The skip policy drops the destructive change: nothing to do.
    let opts = DiffOptions::new().skip(SkipChanges::DROP_TABLE);
    let changes = drv.schema_diff(&current, &desired, &opts).unwrap();
    assert!(changes.is_empty());

    // Without it, the drop is bracketed by the foreign-key pragma.
    let changes = drv.schema_diff(&current, &desired, &DiffOptions::new()).unwrap();
    let plan = drv.plan_changes("drop_users", &changes).await.unwrap();
    let cmds: Vec<&str> = plan.changes.iter().map(|c| c.cmd.as_str()).collect();
    assert_eq!(
        cmds,
        vec!["PRAGMA foreign_keys = off", "DROP TABLE `users`", "PRAGMA foreign_keys = on"]
    );
}

#[tokio::test]
async fn executor_runs_against_sqlite_store() {
    let drv = Arc::new(driver().await);
    let dir = Arc::new(MemDir::new());
    dir.write_file("1_init.sql", b"CREATE TABLE t1 (id int NULL);\n").unwrap();
    dir.write_file(
        "2_add_column.sql",
        b"-- add c2 column\nALTER TABLE t1 ADD COLUMN c2 text NULL;\n",
    )
    .unwrap();
    write_sum_file(dir.as_ref(), &dir.checksum().unwrap()).unwrap();

    let store = Arc::new(SqliteRevisions::new(drv.pool().clone()));
    let ex = Executor::new(drv.clone(), dir, store.clone()).operator_version("v0.3.1");
    ex.execute_n(0).await.unwrap();

    let inspected = drv
        .inspect_schema(None, &InspectOptions::new())
        .await
        .unwrap();
    // The revisions table itself plus the migrated one.
    let t1 = inspected.find_table("t1").expect("t1 exists");
    assert_eq!(t1.columns.len(), 2);

    let revisions = store.read_revisions().await.unwrap();
    assert_eq!(revisions.len(), 2);
    assert!(revisions.iter().all(|r| r.kind == RevisionType::EXECUTE));
    assert!(revisions.iter().all(|r| r.applied == r.total));
    assert_eq!(revisions[0].operator_version, "v0.3.1");

    // A second run has nothing to do.
    assert!(matches!(ex.execute_n(0).await, Err(MigrateError::NoPendingFiles)));
}

#[tokio::test]
async fn executor_resumes_partial_file_on_live_database() {
    let drv = Arc::new(driver().await);
    let dir = Arc::new(MemDir::new());
    // Statements run outside a transaction so partial progress
    // survives; the second statement fails because u1 already exists.
    dir.write_file(
        "1_broken.sql",
        b"-- strata:txmode none\nCREATE TABLE u1 (id int NULL);\nCREATE TABLE u1 (id int NULL);\n",
    )
    .unwrap();
    write_sum_file(dir.as_ref(), &dir.checksum().unwrap()).unwrap();

    let store = Arc::new(SqliteRevisions::new(drv.pool().clone()));
    let ex = Executor::new(drv.clone(), dir.clone(), store.clone());
    let err = ex.execute_n(0).await.unwrap_err();
    assert!(err.to_string().contains("u1"), "{err}");

    let rev = store.read_revision("1").await.unwrap();
    assert_eq!((rev.applied, rev.total), (1, 2));
    assert!(!rev.error.is_empty());
    assert_eq!(rev.error_stmt, "CREATE TABLE u1 (id int NULL);");

    // Fix the failing statement; the applied prefix is untouched, so
    // the run resumes at statement two.
    dir.write_file(
        "1_broken.sql",
        b"-- strata:txmode none\nCREATE TABLE u1 (id int NULL);\nCREATE TABLE u2 (id int NULL);\n",
    )
    .unwrap();
    write_sum_file(dir.as_ref(), &dir.checksum().unwrap()).unwrap();
    ex.execute_n(0).await.unwrap();

    let inspected = drv.inspect_schema(None, &InspectOptions::new()).await.unwrap();
    assert!(inspected.find_table("u1").is_some());
    assert!(inspected.find_table("u2").is_some());
    let rev = store.read_revision("1").await.unwrap();
    assert_eq!((rev.applied, rev.total), (2, 2));
    assert!(rev.error.is_empty());
}

#[tokio::test]
async fn planner_versioned_workflow() {
    use strata_schema::model::Realm;

    let drv = Arc::new(driver().await);
    let dir = Arc::new(MemDir::new());
    let planner = Planner::new(drv.clone(), dir.clone())
        .formatter(DefaultFormatter::with_version("20240101000000"))
        .inspect_options(InspectOptions {
            exclude: vec![strata_migrate::REVISIONS_TABLE.to_string()],
            ..InspectOptions::new()
        });

    // Nothing to do against an in-sync desired state.
    let in_sync = Realm::new().schema(Schema::new("main"));
    assert!(matches!(
        planner.plan("noop", &in_sync).await,
        Err(MigrateError::NoPlan)
    ));

    // Plan and persist the first migration.
    let desired = Realm::new().schema(
        Schema::new("main")
            .table(Table::new("t1").column(Column::new("id", Type::int()).null())),
    );
    let plan = planner.plan("add_t1", &desired).await.unwrap();
    let written = planner.write_plan(&plan).await.unwrap();
    assert_eq!(written, vec!["20240101000000_add_t1.sql"]);

    // The executor applies it and the planner is satisfied.
    let store = Arc::new(SqliteRevisions::new(drv.pool().clone()));
    Executor::new(drv.clone(), dir.clone(), store)
        .execute_n(0)
        .await
        .unwrap();
    assert!(matches!(
        planner.plan("again", &desired).await,
        Err(MigrateError::NoPlan)
    ));

    // A checkpoint replays the whole current state from scratch.
    let checkpoint = planner.checkpoint_plan("v1").await.unwrap();
    assert!(checkpoint
        .changes
        .iter()
        .any(|c| c.cmd.contains("CREATE TABLE `t1`")));
    let written = planner.write_checkpoint(&checkpoint, "v1").await.unwrap();
    let content = dir.read_file(&written[0]).unwrap();
    assert!(String::from_utf8(content)
        .unwrap()
        .starts_with("-- strata:checkpoint v1\n"));
}

#[tokio::test]
async fn up_down_pair_generated_from_reversed_changes() {
    use strata_schema::model::Realm;

    let drv = Arc::new(driver().await);
    let dir = Arc::new(MemDir::new());
    let planner = Planner::new(drv.clone(), dir.clone());
    let desired = Realm::new().schema(
        Schema::new("main")
            .table(Table::new("t1").column(Column::new("id", Type::int()).null())),
    );

    let written = planner.write_up_down("add_t1", &desired).await.unwrap();
    assert_eq!(written, vec!["add_t1.up.sql", "add_t1.down.sql"]);

    let up = String::from_utf8(dir.read_file("add_t1.up.sql").unwrap()).unwrap();
    assert!(up.contains("CREATE TABLE `t1` (`id` int NULL);"), "{up}");

    // The down side is the inverted change-set rendered by the driver:
    // a bracketed drop, not a hand-written reverse string.
    let down = String::from_utf8(dir.read_file("add_t1.down.sql").unwrap()).unwrap();
    assert!(down.contains("PRAGMA foreign_keys = off;"), "{down}");
    assert!(down.contains("DROP TABLE `t1`;"), "{down}");

    // Applying up then down returns the database to its initial state.
    for stmt in drv.scan_stmts(&up).unwrap() {
        drv.exec(&stmt.text).await.unwrap();
    }
    let inspected = drv.inspect_schema(None, &InspectOptions::new()).await.unwrap();
    assert!(inspected.find_table("t1").is_some());

    for stmt in drv.scan_stmts(&down).unwrap() {
        drv.exec(&stmt.text).await.unwrap();
    }
    let inspected = drv.inspect_schema(None, &InspectOptions::new()).await.unwrap();
    assert!(inspected.tables.is_empty());

    // plan_down alone mirrors the same reversed plan.
    let down_plan = planner.plan_down("add_t1", &desired).await.unwrap();
    let cmds: Vec<&str> = down_plan.changes.iter().map(|c| c.cmd.as_str()).collect();
    assert_eq!(
        cmds,
        vec!["PRAGMA foreign_keys = off", "DROP TABLE `t1`", "PRAGMA foreign_keys = on"]
    );
}

#[tokio::test]
async fn check_clean_tolerates_only_the_revisions_table() {
    let drv = driver().await;
    drv.check_clean(None).await.unwrap();

    drv.exec("CREATE TABLE x (id int NULL)").await.unwrap();
    let err = drv.check_clean(None).await.unwrap_err();
    assert!(matches!(err, MigrateError::NotClean { ref reason } if reason.contains("x")));

    let ident = TableIdent { schema: None, name: "x".into() };
    drv.check_clean(Some(&ident)).await.unwrap();

    drv.exec("CREATE TABLE y (id int NULL)").await.unwrap();
    let err = drv.check_clean(Some(&ident)).await.unwrap_err();
    assert!(matches!(err, MigrateError::NotClean { ref reason } if reason.contains("multiple")));
}

#[tokio::test]
async fn snapshot_restores_empty_state() {
    let drv = driver().await;
    let restore = drv.snapshot().await.unwrap();

    drv.exec("CREATE TABLE temp_t (id int NULL)").await.unwrap();
    drv.exec("CREATE VIEW temp_v AS SELECT id FROM temp_t").await.unwrap();
    restore.restore().await.unwrap();

    let inspected = drv.inspect_schema(None, &InspectOptions::new()).await.unwrap();
    assert!(inspected.tables.is_empty());
    assert!(inspected.views.is_empty());

    // A non-empty database cannot be snapshotted.
    drv.exec("CREATE TABLE keep (id int NULL)").await.unwrap();
    assert!(matches!(
        drv.snapshot().await,
        Err(MigrateError::NotClean { .. })
    ));
}

#[tokio::test]
async fn checks_and_triggers_round_trip() {
    let drv = driver().await;
    let desired = Schema::new("main").table(
        Table::new("accounts")
            .column(Column::new("id", Type::bigint()))
            .column(Column::new("balance", Type::int()))
            .primary_key(Index::new("").column("id"))
            .attr(Attr::Check(Check::new("balance_nonneg", "balance >= 0")))
            .attr(Attr::Check(Check::unnamed("id > 0"))),
    );
    let current = drv.inspect_schema(None, &InspectOptions::new()).await.unwrap();
    let changes = drv.schema_diff(&current, &desired, &DiffOptions::new()).unwrap();
    drv.apply_changes(&changes).await.unwrap();

    let inspected = drv.inspect_schema(None, &InspectOptions::new()).await.unwrap();
    let roundtrip = drv.schema_diff(&inspected, &desired, &DiffOptions::new()).unwrap();
    assert!(roundtrip.is_empty(), "{roundtrip:#?}");
}

#[tokio::test]
async fn modify_column_recreation_preserves_rows() {
    let drv = driver().await;
    drv.exec("CREATE TABLE m (id int NOT NULL, age int NULL)").await.unwrap();
    drv.exec("INSERT INTO m VALUES (1, 30), (2, NULL)").await.unwrap();

    let current = drv.inspect_schema(None, &InspectOptions::new()).await.unwrap();
    let desired = Schema::new("main").table(
        Table::new("m")
            .column(Column::new("id", Type::int()))
            .column(Column::new("age", Type::bigint()).null()),
    );
    let changes = drv.schema_diff(&current, &desired, &DiffOptions::new()).unwrap();
    assert!(changes.iter().any(|c| matches!(c, Change::ModifyTable { .. })));
    drv.apply_changes(&changes).await.unwrap();

    let inspected = drv.inspect_schema(None, &InspectOptions::new()).await.unwrap();
    let m = inspected.find_table("m").expect("m exists");
    assert_eq!(m.find_column("age").unwrap().column_type.ty, Type::bigint());

    let row: (i64,) = sqlx::query_as("SELECT count(*) FROM m")
        .fetch_one(drv.pool())
        .await
        .unwrap();
    assert_eq!(row.0, 2);
}

#[tokio::test]
async fn rename_collapse_applies_as_rename() {
    let drv = driver().await;
    drv.exec("CREATE TABLE old_name (id int NOT NULL, PRIMARY KEY (id))")
        .await
        .unwrap();
    drv.exec("INSERT INTO old_name VALUES (7)").await.unwrap();

    let current = drv.inspect_schema(None, &InspectOptions::new()).await.unwrap();
    let mut renamed = current.tables[0].clone();
    renamed.name = "new_name".into();
    let desired = Schema::new("main").table(renamed);

    let changes = drv.schema_diff(&current, &desired, &DiffOptions::new()).unwrap();
    assert_eq!(changes.len(), 1);
    assert!(matches!(changes[0], Change::RenameTable { .. }));

    drv.apply_changes(&changes).await.unwrap();
    let row: (i64,) = sqlx::query_as("SELECT id FROM new_name")
        .fetch_one(drv.pool())
        .await
        .unwrap();
    assert_eq!(row.0, 7);
}
