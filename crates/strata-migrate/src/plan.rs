//! Migration planning.
//!
//! A [`Plan`] is a change-set rendered as executable SQL statements with
//! optional reverses. The [`Planner`] computes plans against a driver
//! and writes them as versioned migration files, regenerating the
//! integrity manifest afterwards.

use std::sync::Arc;

use chrono::Utc;

use strata_schema::changes::{reverse_changes, Change, DiffOptions};
use strata_schema::model::Realm;

use crate::dir::{write_sum_file, Dir};
use crate::driver::{Driver, InspectOptions};
use crate::error::{MigrateError, Result};
use crate::stmt::{escape_delimiter, DIRECTIVE_PREFIX};

/// One element of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PlanChange {
    /// The SQL statement to execute.
    pub cmd: String,
    /// The exact reverse of `cmd`, when derivable.
    pub reverse: Option<String>,
    /// A comment describing the statement.
    pub comment: Option<String>,
}

impl PlanChange {
    /// Creates a forward-only change.
    #[must_use]
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            ..Self::default()
        }
    }

    /// Sets the reverse statement.
    #[must_use]
    pub fn reverse(mut self, reverse: impl Into<String>) -> Self {
        self.reverse = Some(reverse.into());
        self
    }

    /// Sets the comment.
    #[must_use]
    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

/// An ordered statement plan.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Plan {
    /// Plan name; becomes the migration file slug.
    pub name: String,
    /// Ordered statements.
    pub changes: Vec<PlanChange>,
    /// Statement delimiter override; `None` means the default `;`.
    pub delimiter: Option<String>,
}

/// Renders a plan into one or more migration files.
pub trait Formatter: Send + Sync {
    /// Returns `(file name, content)` pairs for the plan.
    fn format(&self, plan: &Plan) -> Result<Vec<(String, String)>>;
}

/// The default formatter: a single `{version}_{name}.sql` file whose
/// version is a UTC timestamp token.
#[derive(Debug, Clone, Default)]
pub struct DefaultFormatter {
    version: Option<String>,
}

impl DefaultFormatter {
    /// Creates the default formatter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pins the version token instead of using the current time.
    #[must_use]
    pub fn with_version(version: impl Into<String>) -> Self {
        Self {
            version: Some(version.into()),
        }
    }

    fn version_token(&self) -> String {
        self.version
            .clone()
            .unwrap_or_else(|| Utc::now().format("%Y%m%d%H%M%S").to_string())
    }
}

impl Formatter for DefaultFormatter {
    fn format(&self, plan: &Plan) -> Result<Vec<(String, String)>> {
        let name = match plan.name.is_empty() {
            true => format!("{}.sql", self.version_token()),
            false => format!("{}_{}.sql", self.version_token(), plan.name),
        };
        Ok(vec![(name, render_statements(plan))])
    }
}

/// A formatter emitting `{name}.up.sql` and `{name}.down.sql` files
/// from a plan's per-statement reverse strings; every change must carry
/// one. [`Planner::write_up_down`] generates the pair from the reversed
/// change-set instead.
#[derive(Debug, Clone, Default)]
pub struct SplitFormatter;

impl Formatter for SplitFormatter {
    fn format(&self, plan: &Plan) -> Result<Vec<(String, String)>> {
        let mut up = String::new();
        let mut down = String::new();
        for change in &plan.changes {
            let reverse = change.reverse.as_deref().ok_or_else(|| {
                MigrateError::Driver(format!("statement {:?} has no reverse", change.cmd))
            })?;
            up.push_str(change.cmd.trim_end_matches(';'));
            up.push_str(";\n");
            down.push_str(reverse.trim_end_matches(';'));
            down.push_str(";\n");
        }
        Ok(vec![
            (format!("{}.up.sql", plan.name), up),
            (format!("{}.down.sql", plan.name), down),
        ])
    }
}

// Renders the statement body: the optional delimiter directive header,
// then each comment and command followed by the delimiter.
fn render_statements(plan: &Plan) -> String {
    let delimiter = plan.delimiter.clone().unwrap_or_else(|| ";".to_string());
    let mut out = String::new();
    if delimiter != ";" {
        out.push_str(&format!(
            "{DIRECTIVE_PREFIX}delimiter {}\n\n",
            escape_delimiter(&delimiter)
        ));
    }
    for change in &plan.changes {
        if let Some(comment) = &change.comment {
            out.push_str(&format!("-- {comment}\n"));
        }
        if delimiter == ";" {
            out.push_str(change.cmd.trim_end_matches(';'));
            out.push(';');
        } else {
            out.push_str(&change.cmd);
            out.push_str(&delimiter);
        }
        out.push('\n');
    }
    out
}

/// Computes plans and writes them into a migration directory.
pub struct Planner {
    driver: Option<Arc<dyn Driver>>,
    dir: Arc<dyn Dir>,
    formatter: Box<dyn Formatter>,
    checksum: bool,
    diff_options: DiffOptions,
    inspect_options: InspectOptions,
}

impl Planner {
    /// Creates a planner over the given driver and directory.
    #[must_use]
    pub fn new(driver: Arc<dyn Driver>, dir: Arc<dyn Dir>) -> Self {
        Self {
            driver: Some(driver),
            dir,
            formatter: Box::new(DefaultFormatter::new()),
            checksum: true,
            diff_options: DiffOptions::new(),
            inspect_options: InspectOptions::new(),
        }
    }

    /// Creates a write-only planner without a driver. Only the
    /// `write_*` operations are available.
    #[must_use]
    pub fn without_driver(dir: Arc<dyn Dir>) -> Self {
        Self {
            driver: None,
            dir,
            formatter: Box::new(DefaultFormatter::new()),
            checksum: true,
            diff_options: DiffOptions::new(),
            inspect_options: InspectOptions::new(),
        }
    }

    /// Sets the inspection filters, e.g. to exclude the revisions
    /// table from the current state.
    #[must_use]
    pub fn inspect_options(mut self, options: InspectOptions) -> Self {
        self.inspect_options = options;
        self
    }

    /// Replaces the formatter.
    #[must_use]
    pub fn formatter(mut self, formatter: impl Formatter + 'static) -> Self {
        self.formatter = Box::new(formatter);
        self
    }

    /// Enables or disables manifest regeneration after writes.
    #[must_use]
    pub fn checksum(mut self, enabled: bool) -> Self {
        self.checksum = enabled;
        self
    }

    /// Sets the diff options used by planning.
    #[must_use]
    pub fn diff_options(mut self, options: DiffOptions) -> Self {
        self.diff_options = options;
        self
    }

    fn driver(&self) -> Result<&Arc<dyn Driver>> {
        self.driver
            .as_ref()
            .ok_or_else(|| MigrateError::Driver("planner has no driver".to_string()))
    }

    // The change-set that moves the connected database to the desired
    // realm. [`MigrateError::NoPlan`] when already in sync.
    async fn desired_changes(&self, desired: &Realm) -> Result<Vec<Change>> {
        let driver = self.driver()?;
        let current = driver.inspect_realm(&self.inspect_options).await?;
        let changes = driver.realm_diff(&current, desired, &self.diff_options)?;
        if changes.is_empty() {
            return Err(MigrateError::NoPlan);
        }
        Ok(changes)
    }

    /// Plans the statements migrating the connected database to the
    /// desired realm. [`MigrateError::NoPlan`] when already in sync.
    pub async fn plan(&self, name: &str, desired: &Realm) -> Result<Plan> {
        let changes = self.desired_changes(desired).await?;
        self.driver()?.plan_changes(name, &changes).await
    }

    /// Plans the down side of the migration to the desired realm: the
    /// change-set is passed through [`reverse_changes`] (the sequence
    /// is reversed so adds and drops swap position, each change is
    /// inverted) and planned through the driver.
    pub async fn plan_down(&self, name: &str, desired: &Realm) -> Result<Plan> {
        let changes = self.desired_changes(desired).await?;
        self.driver()?
            .plan_changes(name, &reverse_changes(&changes))
            .await
    }

    /// Plans both directions and writes them as `{name}.up.sql` and
    /// `{name}.down.sql`, regenerating the manifest afterwards. The
    /// down file is generated from the reversed change-set, not from
    /// per-statement reverse strings.
    pub async fn write_up_down(&self, name: &str, desired: &Realm) -> Result<Vec<String>> {
        let changes = self.desired_changes(desired).await?;
        let driver = self.driver()?;
        let up = driver.plan_changes(name, &changes).await?;
        let down = driver.plan_changes(name, &reverse_changes(&changes)).await?;
        let mut written = Vec::with_capacity(2);
        for (file, plan) in [
            (format!("{name}.up.sql"), &up),
            (format!("{name}.down.sql"), &down),
        ] {
            self.dir.write_file(&file, render_statements(plan).as_bytes())?;
            written.push(file);
        }
        if self.checksum {
            write_sum_file(self.dir.as_ref(), &self.dir.checksum()?)?;
        }
        Ok(written)
    }

    /// Plans the statements replaying the connected database's entire
    /// state from scratch, for use as a checkpoint.
    pub async fn checkpoint_plan(&self, name: &str) -> Result<Plan> {
        let driver = self.driver()?;
        let current = driver.inspect_realm(&self.inspect_options).await?;
        let changes = driver.realm_diff(&Realm::new(), &current, &self.diff_options)?;
        if changes.is_empty() {
            return Ok(Plan {
                name: name.to_string(),
                ..Plan::default()
            });
        }
        driver.plan_changes(name, &changes).await
    }

    /// Writes the plan through the formatter and regenerates the
    /// manifest. Returns the written file names.
    pub async fn write_plan(&self, plan: &Plan) -> Result<Vec<String>> {
        self.write_formatted(plan, None)
    }

    /// Writes the plan as a checkpoint file: its first directive is the
    /// checkpoint tag, making it supersede all earlier unapplied files.
    pub async fn write_checkpoint(&self, plan: &Plan, tag: &str) -> Result<Vec<String>> {
        self.write_formatted(plan, Some(tag))
    }

    fn write_formatted(&self, plan: &Plan, checkpoint: Option<&str>) -> Result<Vec<String>> {
        let files = self.formatter.format(plan)?;
        let mut written = Vec::with_capacity(files.len());
        for (name, content) in files {
            let content = match checkpoint {
                Some("") => format!("{DIRECTIVE_PREFIX}checkpoint\n\n{content}"),
                Some(tag) => format!("{DIRECTIVE_PREFIX}checkpoint {tag}\n\n{content}"),
                None => content,
            };
            self.dir.write_file(&name, content.as_bytes())?;
            written.push(name);
        }
        if self.checksum {
            write_sum_file(self.dir.as_ref(), &self.dir.checksum()?)?;
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dir::{validate, MemDir, SUM_FILENAME};

    fn plan() -> Plan {
        Plan {
            name: "add_t1_and_t2".to_string(),
            changes: vec![
                PlanChange::new("CREATE TABLE t1(c int)").reverse("DROP TABLE t1 IF EXISTS"),
                PlanChange::new("CREATE TABLE t2(c int)").reverse("DROP TABLE t2"),
            ],
            delimiter: None,
        }
    }

    #[tokio::test]
    async fn write_plan_default_formatter() {
        let dir = Arc::new(MemDir::new());
        let planner = Planner::without_driver(dir.clone())
            .formatter(DefaultFormatter::with_version("20240101000000"))
            .checksum(false);

        let written = planner.write_plan(&plan()).await.unwrap();
        assert_eq!(written, vec!["20240101000000_add_t1_and_t2.sql"]);

        let content = dir.read_file(&written[0]).unwrap();
        assert_eq!(
            String::from_utf8(content).unwrap(),
            "CREATE TABLE t1(c int);\nCREATE TABLE t2(c int);\n"
        );
    }

    #[tokio::test]
    async fn write_plan_custom_delimiter() {
        let dir = Arc::new(MemDir::new());
        let planner = Planner::without_driver(dir.clone())
            .formatter(DefaultFormatter::with_version("20240101000000"))
            .checksum(false);

        let mut p = plan();
        p.delimiter = Some("\nGO".to_string());
        planner.write_plan(&p).await.unwrap();

        let content = dir.read_file("20240101000000_add_t1_and_t2.sql").unwrap();
        assert_eq!(
            String::from_utf8(content).unwrap(),
            "-- strata:delimiter \\nGO\n\nCREATE TABLE t1(c int)\nGO\nCREATE TABLE t2(c int)\nGO\n"
        );
    }

    #[tokio::test]
    async fn write_plan_split_formatter() {
        let dir = Arc::new(MemDir::new());
        let planner = Planner::without_driver(dir.clone())
            .formatter(SplitFormatter)
            .checksum(false);

        planner.write_plan(&plan()).await.unwrap();
        let up = dir.read_file("add_t1_and_t2.up.sql").unwrap();
        let down = dir.read_file("add_t1_and_t2.down.sql").unwrap();
        assert_eq!(
            String::from_utf8(up).unwrap(),
            "CREATE TABLE t1(c int);\nCREATE TABLE t2(c int);\n"
        );
        assert_eq!(
            String::from_utf8(down).unwrap(),
            "DROP TABLE t1 IF EXISTS;\nDROP TABLE t2;\n"
        );
    }

    #[tokio::test]
    async fn write_checkpoint_prepends_directive() {
        let dir = Arc::new(MemDir::new());
        let planner = Planner::without_driver(dir.clone())
            .formatter(DefaultFormatter::with_version("20240101000000"));

        let mut p = plan();
        p.name = "checkpoint".to_string();
        planner.write_checkpoint(&p, "v1").await.unwrap();

        let content = dir.read_file("20240101000000_checkpoint.sql").unwrap();
        assert_eq!(
            String::from_utf8(content).unwrap(),
            "-- strata:checkpoint v1\n\nCREATE TABLE t1(c int);\nCREATE TABLE t2(c int);\n"
        );
        assert!(dir.files().unwrap()[0].is_checkpoint().unwrap());
    }

    #[tokio::test]
    async fn manifest_regenerated_after_write() {
        let dir = Arc::new(MemDir::new());
        let planner =
            Planner::without_driver(dir.clone()).formatter(DefaultFormatter::with_version("1"));

        planner.write_plan(&plan()).await.unwrap();
        assert!(dir.read_file(SUM_FILENAME).is_ok());
        validate(dir.as_ref()).unwrap();
    }

    #[tokio::test]
    async fn comments_precede_statements() {
        let dir = Arc::new(MemDir::new());
        let planner = Planner::without_driver(dir.clone())
            .formatter(DefaultFormatter::with_version("1"))
            .checksum(false);

        let p = Plan {
            name: "with_comment".to_string(),
            changes: vec![PlanChange::new("CREATE TABLE t(c int)").comment("create table t")],
            delimiter: None,
        };
        planner.write_plan(&p).await.unwrap();
        let content = dir.read_file("1_with_comment.sql").unwrap();
        assert_eq!(
            String::from_utf8(content).unwrap(),
            "-- create table t\nCREATE TABLE t(c int);\n"
        );
    }
}
