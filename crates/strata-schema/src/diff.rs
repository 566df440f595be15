//! The dialect-pluggable generic differ.
//!
//! [`Differ`] walks two realms, schemas or tables and emits the ordered
//! change-set that moves the first (current state) to the second
//! (desired state). Everything dialect-specific is delegated to the
//! [`DiffDriver`]: type comparison, attribute predicates, generated
//! index naming, case policy. Optional capabilities are default trait
//! methods; a driver advertises one by overriding it.

use std::collections::{HashMap, HashSet};

use crate::attr::{attr, checks, Attr, Charset, Check, Collation, Comment};
use crate::changes::{Change, ChangeKind, DiffMode, DiffOptions};
use crate::error::{Result, SchemaError};
use crate::expr::{body_def_changed, may_wrap, unquote};
use crate::model::{
    Column, Index, IndexPart, Part, Realm, ReferenceOption, Schema, Table, Trigger, View,
};

/// Dialect-specific diff capabilities.
///
/// The required methods mirror the predicates every dialect must answer;
/// the provided methods are optional capabilities with conservative
/// fallbacks.
pub trait DiffDriver {
    /// Changes for migrating realm-level objects (extensions, roles).
    fn realm_object_diff(&self, from: &Realm, to: &Realm) -> Result<Vec<Change>>;

    /// Changes for migrating schema attributes (charset, collation).
    fn schema_attr_diff(&self, from: &Schema, to: &Schema) -> Vec<Change>;

    /// Changes for migrating schema-level objects (custom types).
    fn schema_object_diff(&self, from: &Schema, to: &Schema, opts: &DiffOptions)
        -> Result<Vec<Change>>;

    /// Changes for migrating table attributes (checks, engine, options).
    fn table_attr_diff(&self, from: &Table, to: &Table, opts: &DiffOptions) -> Result<Vec<Change>>;

    /// Changes between two view attribute bags.
    fn view_attr_changes(&self, from: &View, to: &View) -> Vec<Change>;

    /// The change bitset for migrating one column to the other; an empty
    /// bitset means no change.
    fn column_change(
        &self,
        from_table: &Table,
        from: &Column,
        to: &Column,
        opts: &DiffOptions,
    ) -> Result<ChangeKind>;

    /// Reports whether index attributes changed (e.g. type, predicate).
    fn index_attr_changed(&self, from: &[Attr], to: &[Attr]) -> bool;

    /// Reports whether the attributes of part `i` changed.
    fn index_part_attr_changed(&self, from: &Index, to: &Index, i: usize) -> bool;

    /// Reports whether the index name was generated by the database. Such
    /// indexes are matched structurally before being tagged for drop.
    fn is_generated_index_name(&self, table: &Table, index: &Index) -> bool;

    /// Reports whether a referential action changed.
    fn reference_changed(&self, from: ReferenceOption, to: ReferenceOption) -> bool;

    /// Reports whether foreign-key attributes changed.
    fn foreign_key_attr_changed(&self, from: &[Attr], to: &[Attr]) -> bool;

    /// Optional: normalize the table pair before diffing (e.g. drop
    /// auto-created FK-supporting indexes the user never authored). The
    /// differ clones the tables, so mutation never escapes.
    fn normalize(&self, _from: &mut Table, _to: &mut Table, _opts: &DiffOptions) -> Result<()> {
        Ok(())
    }

    /// Optional: control how tables are matched (e.g. case-insensitive
    /// lookup where configured).
    fn find_table<'a>(&self, schema: &'a Schema, table: &Table) -> Option<&'a Table> {
        schema.find_table(&table.name)
    }

    /// Optional: expand a schema drop into dependent-object drops.
    fn drop_schema_changes(&self, _schema: &Schema) -> Option<Vec<Change>> {
        None
    }

    /// Optional: attach dialect-specific metadata to the final
    /// change-set. Runs strictly after all topological passes.
    fn annotate_changes(&self, _changes: &mut Vec<Change>, _opts: &DiffOptions) -> Result<()> {
        Ok(())
    }

    /// Optional: diff functions and procedures. `None` means the dialect
    /// does not support routines.
    fn proc_funcs_diff(
        &self,
        _from: &Schema,
        _to: &Schema,
        _opts: &DiffOptions,
    ) -> Result<Option<Vec<Change>>> {
        Ok(None)
    }

    /// Optional: dialect-specific trigger comparison. `None` falls back
    /// to body comparison.
    fn trigger_diff(&self, _from: &Trigger, _to: &Trigger) -> Result<Option<Vec<Change>>> {
        Ok(None)
    }

    /// Optional: veto change variants the dialect cannot express. The
    /// differ avoids suggesting vetoed changes (e.g. renames).
    fn supports_change(&self, _change: &Change) -> bool {
        true
    }

    /// Optional: match an auto-named index by the dialect's naming
    /// convention before falling back to unnamed structural matching.
    fn find_generated_index<'a>(&self, _table: &'a Table, _index: &Index) -> Option<&'a Index> {
        None
    }

    /// Optional: override the default view definition comparison.
    fn view_def_changed(&self, from: &View, to: &View) -> bool {
        body_def_changed(&from.def, &to.def)
    }
}

/// A generic differ over a [`DiffDriver`].
#[derive(Debug)]
pub struct Differ<D> {
    driver: D,
}

impl<D: DiffDriver> Differ<D> {
    /// Creates a differ delegating dialect decisions to `driver`.
    #[must_use]
    pub fn new(driver: D) -> Self {
        Self { driver }
    }

    /// Returns the underlying driver.
    #[must_use]
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Returns the changes that move realm `from` to realm `to`.
    pub fn realm_diff(&self, from: &Realm, to: &Realm, opts: &DiffOptions) -> Result<Vec<Change>> {
        let mut changes = Vec::new();
        opts.extend_or_skip(&mut changes, self.driver.realm_object_diff(from, to)?);
        // Drop or modify schemas.
        for s1 in &from.schemas {
            match to.find_schema(&s1.name) {
                None => match self.driver.drop_schema_changes(s1) {
                    Some(cs) => opts.extend_or_skip(&mut changes, cs),
                    None => opts.add_or_skip(&mut changes, Change::DropSchema { schema: s1.clone() }),
                },
                Some(s2) => changes.extend(self.schema_diff_inner(s1, s2, opts)?),
            }
        }
        // Add schemas with their contents in dependency-safe order.
        for s2 in &to.schemas {
            if from.find_schema(&s2.name).is_some() {
                continue;
            }
            opts.add_or_skip(&mut changes, Change::AddSchema { schema: s2.clone() });
            for o in &s2.objects {
                opts.add_or_skip(&mut changes, Change::AddObject { object: o.clone() });
            }
            for f in &s2.funcs {
                opts.add_or_skip(&mut changes, Change::AddFunc { func: f.clone() });
            }
            for p in &s2.procs {
                opts.add_or_skip(&mut changes, Change::AddProc { proc: p.clone() });
            }
            for t in &s2.tables {
                opts.extend_or_skip(&mut changes, add_table_changes(t));
            }
            for v in &s2.views {
                opts.extend_or_skip(&mut changes, add_view_changes(v));
            }
        }
        self.driver.annotate_changes(&mut changes, opts)?;
        Ok(changes)
    }

    /// Returns the changes that move schema `from` to schema `to`.
    pub fn schema_diff(&self, from: &Schema, to: &Schema, opts: &DiffOptions) -> Result<Vec<Change>> {
        let mut changes = self.schema_diff_inner(from, to, opts)?;
        self.driver.annotate_changes(&mut changes, opts)?;
        Ok(changes)
    }

    fn schema_diff_inner(&self, from: &Schema, to: &Schema, opts: &DiffOptions) -> Result<Vec<Change>> {
        if from.name != to.name {
            return Err(SchemaError::SchemaNameMismatch {
                from: from.name.clone(),
                to: to.name.clone(),
            });
        }
        let mut changes = Vec::new();
        let attr_changes = self.driver.schema_attr_diff(from, to);
        if !attr_changes.is_empty() {
            opts.add_or_skip(
                &mut changes,
                Change::ModifySchema {
                    schema: to.clone(),
                    changes: attr_changes,
                },
            );
        }
        opts.extend_or_skip(&mut changes, self.driver.schema_object_diff(from, to, opts)?);

        // Drop or modify tables. Triggers of dropped tables go down with
        // their table.
        for t1 in &from.tables {
            match self.driver.find_table(to, t1) {
                None => opts.add_or_skip(&mut changes, Change::DropTable { table: t1.clone() }),
                Some(t2) => {
                    let table_changes = self.table_diff_inner(t1, t2, opts)?;
                    if !table_changes.is_empty() {
                        opts.add_or_skip(
                            &mut changes,
                            Change::ModifyTable {
                                table: t2.clone(),
                                changes: table_changes,
                            },
                        );
                    }
                    changes.extend(self.trigger_diff_list(&t1.triggers, &t2.triggers, opts)?);
                }
            }
        }
        // Add tables.
        for t2 in &to.tables {
            if self.driver.find_table(from, t2).is_none() {
                opts.extend_or_skip(&mut changes, add_table_changes(t2));
            }
        }
        let mut changes = self.fix_renames(changes);

        // Drop or modify views. A materialized/plain flip is a drop and
        // an add, never a modify.
        for v1 in &from.views {
            match find_view(to, v1) {
                None => opts.add_or_skip(&mut changes, Change::DropView { view: v1.clone() }),
                Some(v2) => {
                    changes.extend(self.view_diff(v1, v2, opts)?);
                    changes.extend(self.trigger_diff_list(&v1.triggers, &v2.triggers, opts)?);
                }
            }
        }
        // Add views.
        for v2 in &to.views {
            if find_view(from, v2).is_none() {
                opts.extend_or_skip(&mut changes, add_view_changes(v2));
            }
        }
        if let Some(cs) = self.driver.proc_funcs_diff(from, to, opts)? {
            changes.extend(cs);
        }
        Ok(changes)
    }

    /// Returns the changes that move table `from` to table `to`.
    pub fn table_diff(&self, from: &Table, to: &Table, opts: &DiffOptions) -> Result<Vec<Change>> {
        if from.name != to.name {
            return Err(SchemaError::TableNameMismatch {
                from: from.name.clone(),
                to: to.name.clone(),
            });
        }
        let mut changes = self.table_diff_inner(from, to, opts)?;
        changes.extend(self.trigger_diff_list(&from.triggers, &to.triggers, opts)?);
        self.driver.annotate_changes(&mut changes, opts)?;
        Ok(changes)
    }

    fn table_diff_inner(&self, from: &Table, to: &Table, opts: &DiffOptions) -> Result<Vec<Change>> {
        // Clone both sides so name alignment and normalization never
        // leak into the caller's model.
        let mut from = from.clone();
        let mut to = to.clone();
        from.name.clone_from(&to.name);
        self.driver.normalize(&mut from, &mut to, opts)?;

        let mut changes = Vec::new();
        changes.extend(self.driver.table_attr_diff(&from, &to, opts)?);
        changes.extend(self.column_diff(&from, &to, opts)?);
        self.pk_diff(&from, &to, opts, &mut changes);
        changes.extend(self.index_diff(&from, &to, opts)?);

        // Drop or modify foreign keys, keyed by symbol.
        for fk1 in &from.foreign_keys {
            match to.find_foreign_key(&fk1.symbol) {
                None => opts.add_or_skip(
                    &mut changes,
                    Change::DropForeignKey { foreign_key: fk1.clone() },
                ),
                Some(fk2) => {
                    let change = self.fk_change(fk1, fk2);
                    if !change.is_empty() {
                        opts.add_or_skip(
                            &mut changes,
                            Change::ModifyForeignKey {
                                from: fk1.clone(),
                                to: fk2.clone(),
                                change,
                            },
                        );
                    }
                }
            }
        }
        // Add foreign keys.
        for fk2 in &to.foreign_keys {
            if from.find_foreign_key(&fk2.symbol).is_none() {
                opts.add_or_skip(
                    &mut changes,
                    Change::AddForeignKey { foreign_key: fk2.clone() },
                );
            }
        }
        Ok(changes)
    }

    fn column_diff(&self, from: &Table, to: &Table, opts: &DiffOptions) -> Result<Vec<Change>> {
        let mut changes = Vec::new();
        // Drop or modify columns.
        for c1 in &from.columns {
            match to.find_column(&c1.name) {
                None => opts.add_or_skip(&mut changes, Change::DropColumn { column: c1.clone() }),
                Some(c2) => {
                    let change = self.driver.column_change(from, c1, c2, opts)?;
                    if !change.is_empty() {
                        opts.add_or_skip(
                            &mut changes,
                            Change::ModifyColumn {
                                from: c1.clone(),
                                to: c2.clone(),
                                change,
                            },
                        );
                    }
                }
            }
        }
        // Added columns are appended last.
        for c2 in &to.columns {
            if from.find_column(&c2.name).is_none() {
                opts.add_or_skip(&mut changes, Change::AddColumn { column: c2.clone() });
            }
        }
        Ok(changes)
    }

    fn pk_diff(&self, from: &Table, to: &Table, opts: &DiffOptions, changes: &mut Vec<Change>) {
        match (&from.primary_key, &to.primary_key) {
            (None, None) => {}
            (None, Some(pk2)) => opts.add_or_skip(
                changes,
                Change::AddPrimaryKey { primary_key: pk2.clone() },
            ),
            (Some(pk1), None) => opts.add_or_skip(
                changes,
                Change::DropPrimaryKey { primary_key: pk1.clone() },
            ),
            (Some(pk1), Some(pk2)) => {
                // The unique bit carries no meaning for primary keys.
                let change = self.index_change(pk1, pk2) & !ChangeKind::UNIQUE;
                if !change.is_empty() {
                    opts.add_or_skip(
                        changes,
                        Change::ModifyPrimaryKey {
                            from: pk1.clone(),
                            to: pk2.clone(),
                            change,
                        },
                    );
                } else if !pk1.name.is_empty() && !pk2.name.is_empty() && pk1.name != pk2.name {
                    let rename = Change::RenameConstraint {
                        from: pk1.clone(),
                        to: pk2.clone(),
                    };
                    if self.driver.supports_change(&rename) {
                        opts.add_or_skip(changes, rename);
                    }
                }
            }
        }
    }

    fn index_diff(&self, from: &Table, to: &Table, opts: &DiffOptions) -> Result<Vec<Change>> {
        let mut changes = Vec::new();
        let mut matched: HashSet<usize> = HashSet::new();
        // Drop or modify indexes.
        for idx1 in &from.indexes {
            // Found directly by name.
            if let Some(pos) = to.indexes.iter().position(|i| i.name == idx1.name) {
                let idx2 = &to.indexes[pos];
                let change = self.index_change(idx1, idx2);
                if !change.is_empty() {
                    opts.add_or_skip(
                        &mut changes,
                        Change::ModifyIndex {
                            from: idx1.clone(),
                            to: idx2.clone(),
                            change,
                        },
                    );
                }
                matched.insert(pos);
                continue;
            }
            // Found indirectly: server-generated names are matched by
            // shape against unnamed desired-state indexes.
            if self.driver.is_generated_index_name(from, idx1) {
                if let Some(pos) = self.similar_unnamed_index(to, idx1) {
                    matched.insert(pos);
                    continue;
                }
            }
            opts.add_or_skip(&mut changes, Change::DropIndex { index: idx1.clone() });
        }
        // Add indexes.
        for (pos, idx2) in to.indexes.iter().enumerate() {
            if matched.contains(&pos) {
                continue;
            }
            if from.find_index(&idx2.name).is_none() {
                opts.add_or_skip(&mut changes, Change::AddIndex { index: idx2.clone() });
            }
        }
        Ok(changes)
    }

    fn view_diff(&self, from: &View, to: &View, opts: &DiffOptions) -> Result<Vec<Change>> {
        let mut nested = self.driver.view_attr_changes(from, to);
        nested.extend(self.view_index_diff(from, to, opts));
        nested.extend(self.view_column_diff(from, to, opts));
        let mut changes = Vec::new();
        if !nested.is_empty() || self.driver.view_def_changed(from, to) {
            opts.add_or_skip(
                &mut changes,
                Change::ModifyView {
                    from: from.clone(),
                    to: to.clone(),
                    changes: nested,
                },
            );
        }
        Ok(changes)
    }

    // View columns only diff on comments.
    fn view_column_diff(&self, from: &View, to: &View, opts: &DiffOptions) -> Vec<Change> {
        let mut changes = Vec::new();
        for c1 in &from.columns {
            if let Some(c2) = to.find_column(&c1.name) {
                if !comment_change(&c1.attrs, &c2.attrs).is_empty() {
                    opts.add_or_skip(
                        &mut changes,
                        Change::ModifyColumn {
                            from: c1.clone(),
                            to: c2.clone(),
                            change: ChangeKind::COMMENT,
                        },
                    );
                }
            }
        }
        changes
    }

    fn view_index_diff(&self, from: &View, to: &View, opts: &DiffOptions) -> Vec<Change> {
        let mut changes = Vec::new();
        let mut matched: HashSet<usize> = HashSet::new();
        for idx1 in &from.indexes {
            match to.indexes.iter().position(|i| i.name == idx1.name) {
                Some(pos) => {
                    let idx2 = &to.indexes[pos];
                    let change = self.index_change(idx1, idx2);
                    if !change.is_empty() {
                        opts.add_or_skip(
                            &mut changes,
                            Change::ModifyIndex {
                                from: idx1.clone(),
                                to: idx2.clone(),
                                change,
                            },
                        );
                    }
                    matched.insert(pos);
                }
                None => opts.add_or_skip(&mut changes, Change::DropIndex { index: idx1.clone() }),
            }
        }
        for (pos, idx2) in to.indexes.iter().enumerate() {
            if !matched.contains(&pos) && from.find_index(&idx2.name).is_none() {
                opts.add_or_skip(&mut changes, Change::AddIndex { index: idx2.clone() });
            }
        }
        changes
    }

    fn trigger_diff_list(
        &self,
        from: &[Trigger],
        to: &[Trigger],
        opts: &DiffOptions,
    ) -> Result<Vec<Change>> {
        let mut changes = Vec::new();
        for t1 in from {
            match to.iter().find(|t| t.name == t1.name) {
                None => opts.add_or_skip(&mut changes, Change::DropTrigger { trigger: t1.clone() }),
                Some(t2) => match self.driver.trigger_diff(t1, t2)? {
                    Some(cs) => opts.extend_or_skip(&mut changes, cs),
                    None if body_def_changed(&t1.def, &t2.def) => opts.add_or_skip(
                        &mut changes,
                        Change::ModifyTrigger {
                            from: t1.clone(),
                            to: t2.clone(),
                        },
                    ),
                    None => {}
                },
            }
        }
        for t2 in to {
            if !from.iter().any(|t| t.name == t2.name) {
                opts.add_or_skip(&mut changes, Change::AddTrigger { trigger: t2.clone() });
            }
        }
        Ok(changes)
    }

    /// The change bitset for migrating one index to the other.
    pub fn index_change(&self, from: &Index, to: &Index) -> ChangeKind {
        let mut change = ChangeKind::empty();
        if from.unique != to.unique {
            change |= ChangeKind::UNIQUE;
        }
        if self.driver.index_attr_changed(&from.attrs, &to.attrs) {
            change |= ChangeKind::ATTR;
        }
        change |= self.parts_change(from, to, None);
        change |= comment_change(&from.attrs, &to.attrs);
        change
    }

    /// Element-wise part comparison under an optional column-rename map.
    pub fn parts_change(
        &self,
        from: &Index,
        to: &Index,
        renames: Option<&HashMap<String, String>>,
    ) -> ChangeKind {
        if from.parts.len() != to.parts.len() {
            return ChangeKind::PARTS;
        }
        fn sorted(parts: &[IndexPart]) -> Vec<&IndexPart> {
            let mut v: Vec<&IndexPart> = parts.iter().collect();
            v.sort_by_key(|p| p.seq_no);
            v
        }
        let (fp, tp) = (sorted(&from.parts), sorted(&to.parts));
        for i in 0..fp.len() {
            if fp[i].desc != tp[i].desc || self.driver.index_part_attr_changed(from, to, i) {
                return ChangeKind::PARTS;
            }
            match (&fp[i].part, &tp[i].part) {
                (Part::Column(c1), Part::Column(c2)) => {
                    let renamed = renames.is_some_and(|m| m.get(c1) == Some(c2));
                    if c1 != c2 && !renamed {
                        return ChangeKind::PARTS;
                    }
                }
                (Part::Expr(x1), Part::Expr(x2)) => {
                    if x1 != x2 && *x1 != may_wrap(x2) {
                        return ChangeKind::PARTS;
                    }
                }
                _ => return ChangeKind::PARTS,
            }
        }
        ChangeKind::empty()
    }

    /// The change bitset for migrating one foreign key to the other.
    pub fn fk_change(&self, from: &crate::model::ForeignKey, to: &crate::model::ForeignKey) -> ChangeKind {
        let mut change = ChangeKind::empty();
        if from.ref_table != to.ref_table {
            change |= ChangeKind::REF_TABLE | ChangeKind::REF_COLUMN;
        } else if from.ref_columns != to.ref_columns {
            change |= ChangeKind::REF_COLUMN;
        }
        if from.columns != to.columns {
            change |= ChangeKind::COLUMN;
        }
        if self.driver.reference_changed(from.on_update, to.on_update) {
            change |= ChangeKind::UPDATE_ACTION;
        }
        if self.driver.reference_changed(from.on_delete, to.on_delete) {
            change |= ChangeKind::DELETE_ACTION;
        }
        if self.driver.foreign_key_attr_changed(&from.attrs, &to.attrs) {
            change |= ChangeKind::ATTR;
        }
        change
    }

    // Searches the desired state for an index matching the generated one
    // by shape: same unique flag and equal parts.
    fn similar_unnamed_index(&self, t: &Table, idx1: &Index) -> Option<usize> {
        let matches = |idx2: &Index| {
            idx1.unique == idx2.unique && self.parts_change(idx1, idx2, None).is_empty()
        };
        if let Some(idx2) = self.driver.find_generated_index(t, idx1) {
            if matches(idx2) {
                return t.indexes.iter().position(|i| std::ptr::eq(i, idx2));
            }
        }
        t.indexes
            .iter()
            .position(|idx2| idx2.name.is_empty() && matches(idx2))
    }

    // Collapses DropTable{X} + AddTable{Y} pairs over structurally equal
    // tables into a RenameTable, when the driver supports renames.
    fn fix_renames(&self, mut changes: Vec<Change>) -> Vec<Change> {
        loop {
            let mut found = None;
            'scan: for i in 0..changes.len() {
                let Change::DropTable { table: t1 } = &changes[i] else {
                    continue;
                };
                for (j, other) in changes.iter().enumerate() {
                    if i == j {
                        continue;
                    }
                    let Change::AddTable { table: t2 } = other else {
                        continue;
                    };
                    if structurally_equal(t1, t2) {
                        let rename = Change::RenameTable {
                            from: t1.clone(),
                            to: t2.clone(),
                        };
                        if self.driver.supports_change(&rename) {
                            found = Some((i, j, rename));
                            break 'scan;
                        }
                    }
                }
            }
            match found {
                Some((i, j, rename)) => {
                    changes[i] = rename;
                    changes.remove(j);
                }
                None => return changes,
            }
        }
    }
}

/// The change-group for creating a table: the table, then its triggers.
#[must_use]
pub fn add_table_changes(t: &Table) -> Vec<Change> {
    let mut changes = Vec::with_capacity(1 + t.triggers.len());
    changes.push(Change::AddTable { table: t.clone() });
    for r in &t.triggers {
        changes.push(Change::AddTrigger { trigger: r.clone() });
    }
    changes
}

/// The change-group for creating a view: the view, then its triggers.
#[must_use]
pub fn add_view_changes(v: &View) -> Vec<Change> {
    let mut changes = Vec::with_capacity(1 + v.triggers.len());
    changes.push(Change::AddView { view: v.clone() });
    for r in &v.triggers {
        changes.push(Change::AddTrigger { trigger: r.clone() });
    }
    changes
}

/// Finds a view by name and kind: materialized and plain views never
/// match each other.
#[must_use]
pub fn find_view<'a>(s: &'a Schema, v: &View) -> Option<&'a View> {
    if v.materialized {
        s.find_materialized(&v.name)
    } else {
        s.find_view(&v.name)
    }
}

/// Two tables are structurally equal when their columns, primary key,
/// indexes and foreign keys are equivalent modulo the table name itself.
#[must_use]
pub fn structurally_equal(t1: &Table, t2: &Table) -> bool {
    let mut c = t1.clone();
    c.name.clone_from(&t2.name);
    c.schema.clone_from(&t2.schema);
    // Self-referential foreign keys follow the rename.
    for fk in &mut c.foreign_keys {
        if fk.ref_table == t1.name {
            fk.ref_table.clone_from(&t2.name);
        }
    }
    c.columns == t2.columns
        && c.primary_key == t2.primary_key
        && c.indexes == t2.indexes
        && c.foreign_keys == t2.foreign_keys
}

/// Reports whether the element comment changed.
#[must_use]
pub fn comment_change(from: &[Attr], to: &[Attr]) -> ChangeKind {
    let (c1, c2) = (attr::<Comment>(from), attr::<Comment>(to));
    match (c1, c2) {
        (None, None) => ChangeKind::empty(),
        (Some(a), Some(b)) if a.0 == b.0 => ChangeKind::empty(),
        _ => ChangeKind::COMMENT,
    }
}

/// Computes the comment delta between two attribute bags. An empty
/// desired comment clears the current one (there is no drop form).
#[must_use]
pub fn comment_diff(from: &[Attr], to: &[Attr]) -> Option<Change> {
    match (attr::<Comment>(from), attr::<Comment>(to)) {
        (None, None) => None,
        (None, Some(c2)) if !c2.0.is_empty() => Some(Change::AddAttr {
            attr: Attr::Comment(c2.clone()),
        }),
        (None, Some(_)) => None,
        (Some(c1), None) => Some(Change::ModifyAttr {
            from: Attr::Comment(c1.clone()),
            to: Attr::Comment(Comment(String::new())),
        }),
        (Some(c1), Some(c2)) => {
            let (v1, v2) = (unquote(&c1.0), unquote(&c2.0));
            (v1 != v2).then(|| Change::ModifyAttr {
                from: Attr::Comment(c1.clone()),
                to: Attr::Comment(c2.clone()),
            })
        }
    }
}

/// Returns the charset that must be stated explicitly on the element:
/// present on the element and different from the parent's effective
/// value (tri-level inheritance).
#[must_use]
pub fn charset_override<'a>(attrs: &'a [Attr], parent: Option<&[Attr]>) -> Option<&'a str> {
    let c = attr::<Charset>(attrs)?;
    match parent {
        None => Some(&c.0),
        Some(p) => match attr::<Charset>(p) {
            Some(pc) if pc.0 == c.0 => None,
            Some(_) => Some(&c.0),
            None => None,
        },
    }
}

/// Collation counterpart of [`charset_override`].
#[must_use]
pub fn collate_override<'a>(attrs: &'a [Attr], parent: Option<&[Attr]>) -> Option<&'a str> {
    let c = attr::<Collation>(attrs)?;
    match parent {
        None => Some(&c.0),
        Some(p) => match attr::<Collation>(p) {
            Some(pc) if pc.0 == c.0 => None,
            Some(_) => Some(&c.0),
            None => None,
        },
    }
}

/// Diffs CHECK constraints. In normalized mode, constraints are matched
/// by name first and expressions are compared with redundant-parenthesis
/// absorption; otherwise similarity by expression is used.
#[must_use]
pub fn check_diff_mode(from: &Table, to: &Table, mode: DiffMode) -> Vec<Change> {
    if !mode.contains(DiffMode::NORMALIZED) {
        return checks_similar_diff(from, to);
    }
    checks_diff(from, to, |c1, c2| {
        c1.expr == c2.expr || may_wrap(&c1.expr) == may_wrap(&c2.expr)
    })
}

/// Diffs CHECK constraints with the given expression comparison. When
/// both sides carry a name, matching is by name only.
#[must_use]
pub fn checks_diff(
    from: &Table,
    to: &Table,
    compare: impl Fn(&Check, &Check) -> bool,
) -> Vec<Change> {
    let (from_checks, to_checks) = (checks(&from.attrs), checks(&to.attrs));
    let matches = |c1: &Check, c2: &Check| {
        if !c1.name.is_empty() && !c2.name.is_empty() {
            c1.name == c2.name
        } else {
            compare(c1, c2)
        }
    };
    let mut changes = Vec::new();
    for c1 in &from_checks {
        match to_checks.iter().find(|c2| matches(c1, c2)) {
            None => changes.push(Change::DropCheck { check: (*c1).clone() }),
            Some(c2) if !compare(c1, c2) => changes.push(Change::ModifyCheck {
                from: (*c1).clone(),
                to: (*c2).clone(),
            }),
            Some(_) => {}
        }
    }
    for c2 in &to_checks {
        if !from_checks.iter().any(|c1| matches(c1, c2)) {
            changes.push(Change::AddCheck { check: (*c2).clone() });
        }
    }
    changes
}

// Similarity-based check diff used when the sides were not normalized:
// the constraint name is unreliable, so expressions drive the match.
fn checks_similar_diff(from: &Table, to: &Table) -> Vec<Change> {
    let mut changes = Vec::new();
    for c1 in checks(&from.attrs) {
        if similar_check(&to.attrs, c1).is_none() {
            changes.push(Change::DropCheck { check: c1.clone() });
        }
    }
    for c2 in checks(&to.attrs) {
        if similar_check(&from.attrs, c2).is_none() {
            changes.push(Change::AddCheck { check: c2.clone() });
        }
    }
    changes
}

/// Finds a CHECK by constraint name or by expression, name taking
/// precedence.
#[must_use]
pub fn similar_check<'a>(attrs: &'a [Attr], c: &Check) -> Option<&'a Check> {
    let mut by_expr = None;
    for check in checks(attrs) {
        if !check.name.is_empty() && check.name == c.name {
            return Some(check);
        }
        if by_expr.is_none()
            && (check.expr == c.expr || may_wrap(&check.expr) == may_wrap(&c.expr))
        {
            by_expr = Some(check);
        }
    }
    by_expr
}
