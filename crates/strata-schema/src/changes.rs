//! The change algebra.
//!
//! [`Change`] is the closed set of structural modifications the differ
//! can emit and the planners can translate. Modify variants carry a
//! [`ChangeKind`] bitset naming the dimensions that changed.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::attr::{Attr, Check};
use crate::model::{Column, DbObject, ForeignKey, Func, Index, Proc, Schema, Table, Trigger, View};

bitflags! {
    /// Dimensions of a modify change.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct ChangeKind: u32 {
        /// Column type changed.
        const TYPE = 1 << 0;
        /// Nullability changed.
        const NULL = 1 << 1;
        /// Default expression changed.
        const DEFAULT = 1 << 2;
        /// Charset changed.
        const CHARSET = 1 << 3;
        /// Collation changed.
        const COLLATE = 1 << 4;
        /// Unique flag changed.
        const UNIQUE = 1 << 5;
        /// Comment changed.
        const COMMENT = 1 << 6;
        /// Index parts changed.
        const PARTS = 1 << 7;
        /// Dialect-specific attribute changed.
        const ATTR = 1 << 8;
        /// Referenced table changed.
        const REF_TABLE = 1 << 9;
        /// Referenced columns changed.
        const REF_COLUMN = 1 << 10;
        /// Referencing columns changed.
        const COLUMN = 1 << 11;
        /// ON UPDATE action changed.
        const UPDATE_ACTION = 1 << 12;
        /// ON DELETE action changed.
        const DELETE_ACTION = 1 << 13;
        /// Generation expression changed.
        const GENERATED = 1 << 14;
    }
}

bitflags! {
    /// Classes of changes a diff should drop instead of emitting.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SkipChanges: u64 {
        const ADD_SCHEMA = 1 << 0;
        const DROP_SCHEMA = 1 << 1;
        const MODIFY_SCHEMA = 1 << 2;
        const ADD_TABLE = 1 << 3;
        const DROP_TABLE = 1 << 4;
        const MODIFY_TABLE = 1 << 5;
        const RENAME_TABLE = 1 << 6;
        const ADD_COLUMN = 1 << 7;
        const DROP_COLUMN = 1 << 8;
        const MODIFY_COLUMN = 1 << 9;
        const ADD_PRIMARY_KEY = 1 << 10;
        const DROP_PRIMARY_KEY = 1 << 11;
        const MODIFY_PRIMARY_KEY = 1 << 12;
        const ADD_INDEX = 1 << 13;
        const DROP_INDEX = 1 << 14;
        const MODIFY_INDEX = 1 << 15;
        const ADD_FOREIGN_KEY = 1 << 16;
        const DROP_FOREIGN_KEY = 1 << 17;
        const MODIFY_FOREIGN_KEY = 1 << 18;
        const ADD_CHECK = 1 << 19;
        const DROP_CHECK = 1 << 20;
        const MODIFY_CHECK = 1 << 21;
        const ADD_VIEW = 1 << 22;
        const DROP_VIEW = 1 << 23;
        const MODIFY_VIEW = 1 << 24;
        const ADD_TRIGGER = 1 << 25;
        const DROP_TRIGGER = 1 << 26;
        const MODIFY_TRIGGER = 1 << 27;
        const ADD_FUNC = 1 << 28;
        const DROP_FUNC = 1 << 29;
        const MODIFY_FUNC = 1 << 30;
        const ADD_PROC = 1 << 31;
        const DROP_PROC = 1 << 32;
        const MODIFY_PROC = 1 << 33;
        const ADD_OBJECT = 1 << 34;
        const DROP_OBJECT = 1 << 35;
        const MODIFY_OBJECT = 1 << 36;
        const ADD_ATTR = 1 << 37;
        const DROP_ATTR = 1 << 38;
        const MODIFY_ATTR = 1 << 39;
        const RENAME_CONSTRAINT = 1 << 40;
    }
}

bitflags! {
    /// Mode flags controlling how the diff compares elements.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DiffMode: u8 {
        /// Both sides were normalized by a dev-database round trip;
        /// comparisons may rely on canonical forms (e.g. constraint
        /// names).
        const NORMALIZED = 1 << 0;
    }
}

impl Default for ChangeKind {
    fn default() -> Self {
        Self::empty()
    }
}

impl Default for SkipChanges {
    fn default() -> Self {
        Self::empty()
    }
}

impl Default for DiffMode {
    fn default() -> Self {
        Self::empty()
    }
}

/// A single structural modification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Change {
    /// Add a schema.
    AddSchema { schema: Schema },
    /// Drop a schema.
    DropSchema { schema: Schema },
    /// Modify schema attributes or contained objects.
    ModifySchema { schema: Schema, changes: Vec<Change> },

    /// Add a table.
    AddTable { table: Table },
    /// Drop a table.
    DropTable { table: Table },
    /// Modify a table; the nested changes describe columns, indexes,
    /// keys and attributes.
    ModifyTable { table: Table, changes: Vec<Change> },
    /// Rename a table.
    RenameTable { from: Table, to: Table },

    /// Add a column.
    AddColumn { column: Column },
    /// Drop a column.
    DropColumn { column: Column },
    /// Modify a column.
    ModifyColumn { from: Column, to: Column, change: ChangeKind },

    /// Add a primary key.
    AddPrimaryKey { primary_key: Index },
    /// Drop a primary key.
    DropPrimaryKey { primary_key: Index },
    /// Modify a primary key.
    ModifyPrimaryKey { from: Index, to: Index, change: ChangeKind },
    /// Rename a constraint without otherwise changing it.
    RenameConstraint { from: Index, to: Index },

    /// Add an index.
    AddIndex { index: Index },
    /// Drop an index.
    DropIndex { index: Index },
    /// Modify an index.
    ModifyIndex { from: Index, to: Index, change: ChangeKind },

    /// Add a foreign key.
    AddForeignKey { foreign_key: ForeignKey },
    /// Drop a foreign key.
    DropForeignKey { foreign_key: ForeignKey },
    /// Modify a foreign key.
    ModifyForeignKey { from: ForeignKey, to: ForeignKey, change: ChangeKind },

    /// Add a check constraint.
    AddCheck { check: Check },
    /// Drop a check constraint.
    DropCheck { check: Check },
    /// Modify a check constraint.
    ModifyCheck { from: Check, to: Check },

    /// Add a view.
    AddView { view: View },
    /// Drop a view.
    DropView { view: View },
    /// Modify a view.
    ModifyView { from: View, to: View, changes: Vec<Change> },

    /// Add a trigger.
    AddTrigger { trigger: Trigger },
    /// Drop a trigger.
    DropTrigger { trigger: Trigger },
    /// Modify a trigger.
    ModifyTrigger { from: Trigger, to: Trigger },

    /// Add a function.
    AddFunc { func: Func },
    /// Drop a function.
    DropFunc { func: Func },
    /// Modify a function.
    ModifyFunc { from: Func, to: Func },

    /// Add a procedure.
    AddProc { proc: Proc },
    /// Drop a procedure.
    DropProc { proc: Proc },
    /// Modify a procedure.
    ModifyProc { from: Proc, to: Proc },

    /// Add a realm- or schema-level object.
    AddObject { object: DbObject },
    /// Drop a realm- or schema-level object.
    DropObject { object: DbObject },
    /// Modify a realm- or schema-level object.
    ModifyObject { from: DbObject, to: DbObject },

    /// Add an attribute to an element.
    AddAttr { attr: Attr },
    /// Drop an attribute from an element.
    DropAttr { attr: Attr },
    /// Modify an attribute of an element.
    ModifyAttr { from: Attr, to: Attr },
}

impl Change {
    /// The skip class of this change.
    #[must_use]
    pub fn skip_class(&self) -> SkipChanges {
        match self {
            Self::AddSchema { .. } => SkipChanges::ADD_SCHEMA,
            Self::DropSchema { .. } => SkipChanges::DROP_SCHEMA,
            Self::ModifySchema { .. } => SkipChanges::MODIFY_SCHEMA,
            Self::AddTable { .. } => SkipChanges::ADD_TABLE,
            Self::DropTable { .. } => SkipChanges::DROP_TABLE,
            Self::ModifyTable { .. } => SkipChanges::MODIFY_TABLE,
            Self::RenameTable { .. } => SkipChanges::RENAME_TABLE,
            Self::AddColumn { .. } => SkipChanges::ADD_COLUMN,
            Self::DropColumn { .. } => SkipChanges::DROP_COLUMN,
            Self::ModifyColumn { .. } => SkipChanges::MODIFY_COLUMN,
            Self::AddPrimaryKey { .. } => SkipChanges::ADD_PRIMARY_KEY,
            Self::DropPrimaryKey { .. } => SkipChanges::DROP_PRIMARY_KEY,
            Self::ModifyPrimaryKey { .. } => SkipChanges::MODIFY_PRIMARY_KEY,
            Self::RenameConstraint { .. } => SkipChanges::RENAME_CONSTRAINT,
            Self::AddIndex { .. } => SkipChanges::ADD_INDEX,
            Self::DropIndex { .. } => SkipChanges::DROP_INDEX,
            Self::ModifyIndex { .. } => SkipChanges::MODIFY_INDEX,
            Self::AddForeignKey { .. } => SkipChanges::ADD_FOREIGN_KEY,
            Self::DropForeignKey { .. } => SkipChanges::DROP_FOREIGN_KEY,
            Self::ModifyForeignKey { .. } => SkipChanges::MODIFY_FOREIGN_KEY,
            Self::AddCheck { .. } => SkipChanges::ADD_CHECK,
            Self::DropCheck { .. } => SkipChanges::DROP_CHECK,
            Self::ModifyCheck { .. } => SkipChanges::MODIFY_CHECK,
            Self::AddView { .. } => SkipChanges::ADD_VIEW,
            Self::DropView { .. } => SkipChanges::DROP_VIEW,
            Self::ModifyView { .. } => SkipChanges::MODIFY_VIEW,
            Self::AddTrigger { .. } => SkipChanges::ADD_TRIGGER,
            Self::DropTrigger { .. } => SkipChanges::DROP_TRIGGER,
            Self::ModifyTrigger { .. } => SkipChanges::MODIFY_TRIGGER,
            Self::AddFunc { .. } => SkipChanges::ADD_FUNC,
            Self::DropFunc { .. } => SkipChanges::DROP_FUNC,
            Self::ModifyFunc { .. } => SkipChanges::MODIFY_FUNC,
            Self::AddProc { .. } => SkipChanges::ADD_PROC,
            Self::DropProc { .. } => SkipChanges::DROP_PROC,
            Self::ModifyProc { .. } => SkipChanges::MODIFY_PROC,
            Self::AddObject { .. } => SkipChanges::ADD_OBJECT,
            Self::DropObject { .. } => SkipChanges::DROP_OBJECT,
            Self::ModifyObject { .. } => SkipChanges::MODIFY_OBJECT,
            Self::AddAttr { .. } => SkipChanges::ADD_ATTR,
            Self::DropAttr { .. } => SkipChanges::DROP_ATTR,
            Self::ModifyAttr { .. } => SkipChanges::MODIFY_ATTR,
        }
    }

    /// Returns the inverse change: adds become drops, drops become
    /// adds, renames and modifies swap direction. Nested change lists
    /// invert through [`reverse_changes`]. Every change carries the
    /// full element value, so inversion is total.
    #[must_use]
    pub fn invert(&self) -> Self {
        match self {
            Self::AddSchema { schema } => Self::DropSchema { schema: schema.clone() },
            Self::DropSchema { schema } => Self::AddSchema { schema: schema.clone() },
            Self::ModifySchema { schema, changes } => Self::ModifySchema {
                schema: schema.clone(),
                changes: reverse_changes(changes),
            },
            Self::AddTable { table } => Self::DropTable { table: table.clone() },
            Self::DropTable { table } => Self::AddTable { table: table.clone() },
            Self::ModifyTable { table, changes } => Self::ModifyTable {
                table: table.clone(),
                changes: reverse_changes(changes),
            },
            Self::RenameTable { from, to } => Self::RenameTable {
                from: to.clone(),
                to: from.clone(),
            },
            Self::AddColumn { column } => Self::DropColumn { column: column.clone() },
            Self::DropColumn { column } => Self::AddColumn { column: column.clone() },
            Self::ModifyColumn { from, to, change } => Self::ModifyColumn {
                from: to.clone(),
                to: from.clone(),
                change: *change,
            },
            Self::AddPrimaryKey { primary_key } => Self::DropPrimaryKey {
                primary_key: primary_key.clone(),
            },
            Self::DropPrimaryKey { primary_key } => Self::AddPrimaryKey {
                primary_key: primary_key.clone(),
            },
            Self::ModifyPrimaryKey { from, to, change } => Self::ModifyPrimaryKey {
                from: to.clone(),
                to: from.clone(),
                change: *change,
            },
            Self::RenameConstraint { from, to } => Self::RenameConstraint {
                from: to.clone(),
                to: from.clone(),
            },
            Self::AddIndex { index } => Self::DropIndex { index: index.clone() },
            Self::DropIndex { index } => Self::AddIndex { index: index.clone() },
            Self::ModifyIndex { from, to, change } => Self::ModifyIndex {
                from: to.clone(),
                to: from.clone(),
                change: *change,
            },
            Self::AddForeignKey { foreign_key } => Self::DropForeignKey {
                foreign_key: foreign_key.clone(),
            },
            Self::DropForeignKey { foreign_key } => Self::AddForeignKey {
                foreign_key: foreign_key.clone(),
            },
            Self::ModifyForeignKey { from, to, change } => Self::ModifyForeignKey {
                from: to.clone(),
                to: from.clone(),
                change: *change,
            },
            Self::AddCheck { check } => Self::DropCheck { check: check.clone() },
            Self::DropCheck { check } => Self::AddCheck { check: check.clone() },
            Self::ModifyCheck { from, to } => Self::ModifyCheck {
                from: to.clone(),
                to: from.clone(),
            },
            Self::AddView { view } => Self::DropView { view: view.clone() },
            Self::DropView { view } => Self::AddView { view: view.clone() },
            Self::ModifyView { from, to, changes } => Self::ModifyView {
                from: to.clone(),
                to: from.clone(),
                changes: reverse_changes(changes),
            },
            Self::AddTrigger { trigger } => Self::DropTrigger { trigger: trigger.clone() },
            Self::DropTrigger { trigger } => Self::AddTrigger { trigger: trigger.clone() },
            Self::ModifyTrigger { from, to } => Self::ModifyTrigger {
                from: to.clone(),
                to: from.clone(),
            },
            Self::AddFunc { func } => Self::DropFunc { func: func.clone() },
            Self::DropFunc { func } => Self::AddFunc { func: func.clone() },
            Self::ModifyFunc { from, to } => Self::ModifyFunc {
                from: to.clone(),
                to: from.clone(),
            },
            Self::AddProc { proc } => Self::DropProc { proc: proc.clone() },
            Self::DropProc { proc } => Self::AddProc { proc: proc.clone() },
            Self::ModifyProc { from, to } => Self::ModifyProc {
                from: to.clone(),
                to: from.clone(),
            },
            Self::AddObject { object } => Self::DropObject { object: object.clone() },
            Self::DropObject { object } => Self::AddObject { object: object.clone() },
            Self::ModifyObject { from, to } => Self::ModifyObject {
                from: to.clone(),
                to: from.clone(),
            },
            Self::AddAttr { attr } => Self::DropAttr { attr: attr.clone() },
            Self::DropAttr { attr } => Self::AddAttr { attr: attr.clone() },
            Self::ModifyAttr { from, to } => Self::ModifyAttr {
                from: to.clone(),
                to: from.clone(),
            },
        }
    }
}

/// Options controlling a diff run.
#[derive(Debug, Clone, Default)]
pub struct DiffOptions {
    /// Comparison mode.
    pub mode: DiffMode,
    /// Change classes to drop instead of emitting.
    pub skip: SkipChanges,
    /// Upper bound on concurrent driver calls during diffing. The
    /// generic differ is sequential; drivers may use this as a hint.
    pub concurrency: Option<usize>,
}

impl DiffOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the comparison mode.
    #[must_use]
    pub fn mode(mut self, mode: DiffMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the skip policy.
    #[must_use]
    pub fn skip(mut self, skip: SkipChanges) -> Self {
        self.skip = skip;
        self
    }

    /// Appends the change unless its class is skipped. Every diff
    /// producer funnels its emissions through here.
    pub fn add_or_skip(&self, changes: &mut Vec<Change>, change: Change) {
        if !self.skip.intersects(change.skip_class()) {
            changes.push(change);
        }
    }

    /// Appends all changes, applying the skip policy to each.
    pub fn extend_or_skip(&self, changes: &mut Vec<Change>, more: impl IntoIterator<Item = Change>) {
        for c in more {
            self.add_or_skip(changes, c);
        }
    }
}

/// Builds the down-migration sequence for a change-set: the order is
/// reversed so adds and drops swap position, and each change is
/// inverted. Planners render the result to produce down files.
#[must_use]
pub fn reverse_changes(changes: &[Change]) -> Vec<Change> {
    changes.iter().rev().map(Change::invert).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Type;

    fn users() -> Table {
        Table::new("users").column(Column::new("id", Type::bigint()))
    }

    #[test]
    fn skip_drop_table() {
        let opts = DiffOptions::new().skip(SkipChanges::DROP_TABLE);
        let mut changes = Vec::new();
        opts.add_or_skip(&mut changes, Change::DropTable { table: users() });
        assert!(changes.is_empty());

        opts.add_or_skip(&mut changes, Change::AddTable { table: users() });
        assert_eq!(changes.len(), 1);
    }

    #[test]
    fn reverse_swaps_positions_and_inverts() {
        let changes = vec![
            Change::AddTable { table: users() },
            Change::DropTable { table: Table::new("legacy") },
        ];
        let reversed = reverse_changes(&changes);
        // The dropped table comes back first, the added one goes last.
        let Change::AddTable { table } = &reversed[0] else {
            panic!("expected AddTable, got {reversed:?}");
        };
        assert_eq!(table.name, "legacy");
        let Change::DropTable { table } = &reversed[1] else {
            panic!("expected DropTable, got {reversed:?}");
        };
        assert_eq!(table.name, "users");
    }

    #[test]
    fn invert_swaps_modify_direction() {
        let from = Column::new("c", Type::int());
        let to = Column::new("c", Type::bigint());
        let change = Change::ModifyColumn {
            from: from.clone(),
            to: to.clone(),
            change: ChangeKind::TYPE,
        };
        let Change::ModifyColumn { from: f, to: t, change: kind } = change.invert() else {
            panic!("expected ModifyColumn");
        };
        assert_eq!(f, to);
        assert_eq!(t, from);
        assert_eq!(kind, ChangeKind::TYPE);

        // Double inversion is the identity.
        assert_eq!(change.invert().invert(), change);
    }

    #[test]
    fn invert_reverses_nested_changes() {
        let change = Change::ModifyTable {
            table: users(),
            changes: vec![
                Change::AddColumn { column: Column::new("a", Type::int()) },
                Change::DropColumn { column: Column::new("b", Type::int()) },
            ],
        };
        let Change::ModifyTable { changes, .. } = change.invert() else {
            panic!("expected ModifyTable");
        };
        assert!(matches!(&changes[0], Change::AddColumn { column } if column.name == "b"));
        assert!(matches!(&changes[1], Change::DropColumn { column } if column.name == "a"));
    }

    #[test]
    fn change_kind_bits() {
        let kind = ChangeKind::TYPE | ChangeKind::NULL;
        assert!(kind.contains(ChangeKind::TYPE));
        assert!(!kind.contains(ChangeKind::DEFAULT));
        assert_eq!(kind & !ChangeKind::NULL, ChangeKind::TYPE);
    }
}
