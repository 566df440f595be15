//! SQLite diff predicates.

use strata_schema::attr::{attr, Attr, Generated, Predicate, WithoutRowid};
use strata_schema::changes::{Change, ChangeKind, DiffOptions};
use strata_schema::diff::{check_diff_mode, DiffDriver};
use strata_schema::error::Result;
use strata_schema::expr::may_wrap;
use strata_schema::model::{Column, Index, Realm, ReferenceOption, Schema, Table, View};

/// The SQLite [`DiffDriver`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDiff;

impl DiffDriver for SqliteDiff {
    fn realm_object_diff(&self, _: &Realm, _: &Realm) -> Result<Vec<Change>> {
        // SQLite has no realm-level objects.
        Ok(Vec::new())
    }

    fn schema_attr_diff(&self, _: &Schema, _: &Schema) -> Vec<Change> {
        // No charset or collation on database files.
        Vec::new()
    }

    fn schema_object_diff(&self, _: &Schema, _: &Schema, _: &DiffOptions) -> Result<Vec<Change>> {
        Ok(Vec::new())
    }

    fn table_attr_diff(&self, from: &Table, to: &Table, opts: &DiffOptions) -> Result<Vec<Change>> {
        let mut changes = check_diff_mode(from, to, opts.mode);
        let (r1, r2) = (
            attr::<WithoutRowid>(&from.attrs),
            attr::<WithoutRowid>(&to.attrs),
        );
        match (r1, r2) {
            (None, Some(r)) => changes.push(Change::AddAttr { attr: Attr::WithoutRowid(*r) }),
            (Some(r), None) => changes.push(Change::DropAttr { attr: Attr::WithoutRowid(*r) }),
            _ => {}
        }
        Ok(changes)
    }

    fn view_attr_changes(&self, _: &View, _: &View) -> Vec<Change> {
        Vec::new()
    }

    fn column_change(
        &self,
        _: &Table,
        from: &Column,
        to: &Column,
        _: &DiffOptions,
    ) -> Result<ChangeKind> {
        let mut change = ChangeKind::empty();
        if from.column_type.ty != to.column_type.ty {
            change |= ChangeKind::TYPE;
        }
        if from.column_type.null != to.column_type.null {
            change |= ChangeKind::NULL;
        }
        if default_changed(from.default.as_deref(), to.default.as_deref()) {
            change |= ChangeKind::DEFAULT;
        }
        if generated_changed(&from.attrs, &to.attrs) {
            change |= ChangeKind::GENERATED;
        }
        Ok(change)
    }

    fn index_attr_changed(&self, from: &[Attr], to: &[Attr]) -> bool {
        // Partial index predicates, tolerant of redundant wrapping.
        match (attr::<Predicate>(from), attr::<Predicate>(to)) {
            (None, None) => false,
            (Some(p1), Some(p2)) => p1.0 != p2.0 && may_wrap(&p1.0) != may_wrap(&p2.0),
            _ => true,
        }
    }

    fn index_part_attr_changed(&self, _: &Index, _: &Index, _: usize) -> bool {
        false
    }

    fn is_generated_index_name(&self, _: &Table, index: &Index) -> bool {
        // Implicit indexes for UNIQUE and PRIMARY KEY constraints.
        index.name.starts_with("sqlite_autoindex_")
    }

    fn reference_changed(&self, from: ReferenceOption, to: ReferenceOption) -> bool {
        // An unset action reads back as NO ACTION.
        normalize_action(from) != normalize_action(to)
    }

    fn foreign_key_attr_changed(&self, _: &[Attr], _: &[Attr]) -> bool {
        false
    }

    fn supports_change(&self, change: &Change) -> bool {
        // Constraints cannot be renamed in place.
        !matches!(change, Change::RenameConstraint { .. })
    }
}

fn normalize_action(action: ReferenceOption) -> ReferenceOption {
    match action {
        ReferenceOption::Restrict => ReferenceOption::NoAction,
        other => other,
    }
}

fn default_changed(from: Option<&str>, to: Option<&str>) -> bool {
    match (from, to) {
        (None, None) => false,
        (Some(d1), Some(d2)) => d1 != d2 && may_wrap(d1) != may_wrap(d2),
        _ => true,
    }
}

fn generated_changed(from: &[Attr], to: &[Attr]) -> bool {
    match (attr::<Generated>(from), attr::<Generated>(to)) {
        (None, None) => false,
        (Some(g1), Some(g2)) => {
            g1.stored != g2.stored
                || (g1.expr != g2.expr && may_wrap(&g1.expr) != may_wrap(&g2.expr))
        }
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_schema::types::Type;

    #[test]
    fn default_comparison_absorbs_wrapping() {
        assert!(!default_changed(Some("(0)"), Some("0")));
        assert!(default_changed(Some("0"), Some("1")));
        assert!(default_changed(None, Some("0")));
        assert!(!default_changed(None, None));
    }

    #[test]
    fn restrict_equals_no_action() {
        let d = SqliteDiff;
        assert!(!d.reference_changed(ReferenceOption::NoAction, ReferenceOption::Restrict));
        assert!(d.reference_changed(ReferenceOption::NoAction, ReferenceOption::Cascade));
    }

    #[test]
    fn autoindex_names_are_generated() {
        let d = SqliteDiff;
        let t = Table::new("users");
        assert!(d.is_generated_index_name(&t, &Index::new("sqlite_autoindex_users_1")));
        assert!(!d.is_generated_index_name(&t, &Index::new("users_email")));
    }

    #[test]
    fn column_type_and_null_changes() {
        let d = SqliteDiff;
        let from = Column::new("c", Type::int());
        let to = Column::new("c", Type::bigint()).null();
        let change = d
            .column_change(&Table::new("t"), &from, &to, &DiffOptions::new())
            .unwrap();
        assert!(change.contains(ChangeKind::TYPE));
        assert!(change.contains(ChangeKind::NULL));
        assert!(!change.contains(ChangeKind::DEFAULT));
    }

    #[test]
    fn predicate_changes_are_attr_changes() {
        let d = SqliteDiff;
        let p1 = vec![Attr::Predicate(Predicate("c > 0".into()))];
        let p2 = vec![Attr::Predicate(Predicate("(c > 0)".into()))];
        let p3 = vec![Attr::Predicate(Predicate("c > 1".into()))];
        assert!(!d.index_attr_changed(&p1, &p2));
        assert!(d.index_attr_changed(&p1, &p3));
        assert!(d.index_attr_changed(&p1, &[]));
    }
}
