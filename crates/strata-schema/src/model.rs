//! The in-memory schema model.
//!
//! A [`Realm`] owns [`Schema`]s, a schema owns [`Table`]s, [`View`]s and
//! routines, a table owns [`Column`]s, [`Index`]es, [`ForeignKey`]s and
//! [`Trigger`]s. Ownership flows strictly downwards; upward references
//! (a foreign key's referenced table, an index part's column) are held by
//! name so the graph stays acyclic and equality stays structural.
//!
//! Values are built either programmatically through the fluent
//! constructors or by a dialect inspector, and are handed to the differ
//! immutably.

use serde::{Deserialize, Serialize};

use crate::attr::Attr;
use crate::types::ColumnType;

/// The top-level namespace a database server presents.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Realm {
    /// Schemas in the realm.
    pub schemas: Vec<Schema>,
    /// Realm-level objects such as extensions or roles.
    pub objects: Vec<DbObject>,
    /// Realm attributes (server charset, collation).
    pub attrs: Vec<Attr>,
}

impl Realm {
    /// Creates an empty realm.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a schema.
    #[must_use]
    pub fn schema(mut self, schema: Schema) -> Self {
        self.schemas.push(schema);
        self
    }

    /// Looks up a schema by name.
    #[must_use]
    pub fn find_schema(&self, name: &str) -> Option<&Schema> {
        self.schemas.iter().find(|s| s.name == name)
    }
}

/// A named grouping of tables, views and routines.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Schema {
    /// Schema name.
    pub name: String,
    /// Tables owned by the schema.
    pub tables: Vec<Table>,
    /// Views (plain and materialized) owned by the schema.
    pub views: Vec<View>,
    /// Functions owned by the schema.
    pub funcs: Vec<Func>,
    /// Procedures owned by the schema.
    pub procs: Vec<Proc>,
    /// User-defined objects (domains, custom types, ...).
    pub objects: Vec<DbObject>,
    /// Schema attributes (charset, collation, comment).
    pub attrs: Vec<Attr>,
}

impl Schema {
    /// Creates an empty schema with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Adds a table.
    #[must_use]
    pub fn table(mut self, table: Table) -> Self {
        self.tables.push(table);
        self
    }

    /// Adds a view.
    #[must_use]
    pub fn view(mut self, view: View) -> Self {
        self.views.push(view);
        self
    }

    /// Adds an attribute.
    #[must_use]
    pub fn attr(mut self, attr: Attr) -> Self {
        self.attrs.push(attr);
        self
    }

    /// Looks up a table by name.
    #[must_use]
    pub fn find_table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Looks up a plain (non-materialized) view by name.
    #[must_use]
    pub fn find_view(&self, name: &str) -> Option<&View> {
        self.views.iter().find(|v| v.name == name && !v.materialized)
    }

    /// Looks up a materialized view by name.
    #[must_use]
    pub fn find_materialized(&self, name: &str) -> Option<&View> {
        self.views.iter().find(|v| v.name == name && v.materialized)
    }

    /// Looks up a function by name.
    #[must_use]
    pub fn find_func(&self, name: &str) -> Option<&Func> {
        self.funcs.iter().find(|f| f.name == name)
    }

    /// Looks up a procedure by name.
    #[must_use]
    pub fn find_proc(&self, name: &str) -> Option<&Proc> {
        self.procs.iter().find(|p| p.name == name)
    }

    /// Looks up a user-defined object by name.
    #[must_use]
    pub fn find_object(&self, name: &str) -> Option<&DbObject> {
        self.objects.iter().find(|o| o.name == name)
    }
}

/// A table: ordered columns, an optional primary key, indexes, foreign
/// keys, triggers and an attribute bag (engine, checks, options).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Table {
    /// Table name.
    pub name: String,
    /// Name of the owning schema, empty when detached.
    pub schema: String,
    /// Ordered column list.
    pub columns: Vec<Column>,
    /// Primary key, a special index.
    pub primary_key: Option<Index>,
    /// Secondary indexes.
    pub indexes: Vec<Index>,
    /// Foreign keys.
    pub foreign_keys: Vec<ForeignKey>,
    /// Triggers defined on the table.
    pub triggers: Vec<Trigger>,
    /// Table attributes (engine, checks, comment, options).
    pub attrs: Vec<Attr>,
}

impl Table {
    /// Creates an empty table with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Adds a column.
    #[must_use]
    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    /// Sets the primary key.
    #[must_use]
    pub fn primary_key(mut self, pk: Index) -> Self {
        self.primary_key = Some(pk);
        self
    }

    /// Adds an index.
    #[must_use]
    pub fn index(mut self, index: Index) -> Self {
        self.indexes.push(index);
        self
    }

    /// Adds a foreign key.
    #[must_use]
    pub fn foreign_key(mut self, fk: ForeignKey) -> Self {
        self.foreign_keys.push(fk);
        self
    }

    /// Adds an attribute.
    #[must_use]
    pub fn attr(mut self, attr: Attr) -> Self {
        self.attrs.push(attr);
        self
    }

    /// Looks up a column by name.
    #[must_use]
    pub fn find_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Looks up an index by name.
    #[must_use]
    pub fn find_index(&self, name: &str) -> Option<&Index> {
        self.indexes.iter().find(|i| i.name == name)
    }

    /// Looks up a foreign key by its symbol.
    #[must_use]
    pub fn find_foreign_key(&self, symbol: &str) -> Option<&ForeignKey> {
        self.foreign_keys.iter().find(|fk| fk.symbol == symbol)
    }
}

/// A column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Logical type and nullability.
    pub column_type: ColumnType,
    /// Default expression, if any.
    pub default: Option<String>,
    /// Column attributes (charset, collation, comment, generation).
    pub attrs: Vec<Attr>,
}

impl Column {
    /// Creates a NOT NULL column of the given type.
    #[must_use]
    pub fn new(name: impl Into<String>, ty: crate::types::Type) -> Self {
        Self {
            name: name.into(),
            column_type: ColumnType::new(ty),
            default: None,
            attrs: Vec::new(),
        }
    }

    /// Marks the column as nullable.
    #[must_use]
    pub fn null(mut self) -> Self {
        self.column_type.null = true;
        self
    }

    /// Sets the default expression.
    #[must_use]
    pub fn default_expr(mut self, expr: impl Into<String>) -> Self {
        self.default = Some(expr.into());
        self
    }

    /// Adds an attribute.
    #[must_use]
    pub fn attr(mut self, attr: Attr) -> Self {
        self.attrs.push(attr);
        self
    }
}

/// An index over columns and/or expressions.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Index {
    /// Index name. Empty for indexes the server will name itself.
    pub name: String,
    /// Whether the index enforces uniqueness.
    pub unique: bool,
    /// Ordered index parts.
    pub parts: Vec<IndexPart>,
    /// Index attributes (type, predicate).
    pub attrs: Vec<Attr>,
}

impl Index {
    /// Creates an empty index with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Marks the index unique.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Appends a part over the named column. Sequence numbers are
    /// assigned in insertion order starting at 1.
    #[must_use]
    pub fn column(mut self, name: impl Into<String>) -> Self {
        let seq_no = self.parts.len() as u32 + 1;
        self.parts.push(IndexPart {
            seq_no,
            desc: false,
            part: Part::Column(name.into()),
            attrs: Vec::new(),
        });
        self
    }

    /// Appends a part over a raw expression.
    #[must_use]
    pub fn expr(mut self, expr: impl Into<String>) -> Self {
        let seq_no = self.parts.len() as u32 + 1;
        self.parts.push(IndexPart {
            seq_no,
            desc: false,
            part: Part::Expr(expr.into()),
            attrs: Vec::new(),
        });
        self
    }

    /// Appends a pre-built part, keeping parts ordered by sequence number.
    #[must_use]
    pub fn part(mut self, part: IndexPart) -> Self {
        debug_assert!(
            self.parts.iter().all(|p| p.seq_no != part.seq_no),
            "duplicate index part seq_no {}",
            part.seq_no
        );
        self.parts.push(part);
        self.parts.sort_by_key(|p| p.seq_no);
        self
    }
}

/// One part of an index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexPart {
    /// Position within the index, starting at 1. Total order, no ties.
    pub seq_no: u32,
    /// Descending order flag.
    pub desc: bool,
    /// The indexed column or expression.
    pub part: Part,
    /// Part attributes (prefix length, collation, operator class).
    pub attrs: Vec<Attr>,
}

/// The subject of an index part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Part {
    /// A column of the owning table, by name.
    Column(String),
    /// A raw expression.
    Expr(String),
}

/// Referential action of a foreign key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ReferenceOption {
    /// No action (the dialect default).
    #[default]
    NoAction,
    /// Restrict.
    Restrict,
    /// Cascade.
    Cascade,
    /// Set referencing columns to NULL.
    SetNull,
    /// Set referencing columns to their default.
    SetDefault,
}

impl ReferenceOption {
    /// SQL rendition of the action.
    #[must_use]
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::NoAction => "NO ACTION",
            Self::Restrict => "RESTRICT",
            Self::Cascade => "CASCADE",
            Self::SetNull => "SET NULL",
            Self::SetDefault => "SET DEFAULT",
        }
    }
}

/// A foreign key constraint. Referencing and referenced columns are held
/// by name and must have matching cardinality.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Constraint symbol.
    pub symbol: String,
    /// Referencing columns of the owning table.
    pub columns: Vec<String>,
    /// Referenced table name.
    pub ref_table: String,
    /// Referenced columns.
    pub ref_columns: Vec<String>,
    /// ON UPDATE action.
    pub on_update: ReferenceOption,
    /// ON DELETE action.
    pub on_delete: ReferenceOption,
    /// Constraint attributes.
    pub attrs: Vec<Attr>,
}

impl ForeignKey {
    /// Creates a foreign key with the given symbol.
    #[must_use]
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            ..Self::default()
        }
    }

    /// Sets the referencing columns.
    #[must_use]
    pub fn columns(mut self, columns: Vec<String>) -> Self {
        self.columns = columns;
        self
    }

    /// Sets the referenced table and columns.
    #[must_use]
    pub fn references(mut self, table: impl Into<String>, columns: Vec<String>) -> Self {
        self.ref_table = table.into();
        self.ref_columns = columns;
        self
    }

    /// Sets the ON DELETE action.
    #[must_use]
    pub fn on_delete(mut self, action: ReferenceOption) -> Self {
        self.on_delete = action;
        self
    }

    /// Sets the ON UPDATE action.
    #[must_use]
    pub fn on_update(mut self, action: ReferenceOption) -> Self {
        self.on_update = action;
        self
    }
}

/// A view. Materialized and plain views are distinct identities: a
/// change of the flag never diffs into a modify.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct View {
    /// View name.
    pub name: String,
    /// View definition (the SELECT body).
    pub def: String,
    /// Whether this is a materialized view.
    pub materialized: bool,
    /// View columns, when known.
    pub columns: Vec<Column>,
    /// Indexes (materialized views).
    pub indexes: Vec<Index>,
    /// Triggers defined on the view.
    pub triggers: Vec<Trigger>,
    /// View attributes.
    pub attrs: Vec<Attr>,
}

impl View {
    /// Creates a plain view.
    #[must_use]
    pub fn new(name: impl Into<String>, def: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            def: def.into(),
            ..Self::default()
        }
    }

    /// Marks the view materialized.
    #[must_use]
    pub fn materialized(mut self) -> Self {
        self.materialized = true;
        self
    }

    /// Looks up a view column by name.
    #[must_use]
    pub fn find_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Looks up an index by name.
    #[must_use]
    pub fn find_index(&self, name: &str) -> Option<&Index> {
        self.indexes.iter().find(|i| i.name == name)
    }
}

/// A trigger, owned by exactly one table or view.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Trigger {
    /// Trigger name.
    pub name: String,
    /// Trigger body definition.
    pub def: String,
    /// Attributes (timing, events).
    pub attrs: Vec<Attr>,
}

impl Trigger {
    /// Creates a trigger.
    #[must_use]
    pub fn new(name: impl Into<String>, def: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            def: def.into(),
            attrs: Vec::new(),
        }
    }
}

/// A function.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Func {
    /// Function name.
    pub name: String,
    /// Function body definition.
    pub def: String,
}

/// A procedure.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Proc {
    /// Procedure name.
    pub name: String,
    /// Procedure body definition.
    pub def: String,
}

/// A realm- or schema-level object the core does not model further
/// (extensions, roles, custom types).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DbObject {
    /// Object name.
    pub name: String,
    /// Object definition.
    pub def: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Type;

    #[test]
    fn lookups() {
        let schema = Schema::new("main").table(
            Table::new("users")
                .column(Column::new("id", Type::bigint()))
                .column(Column::new("email", Type::Text).null())
                .index(Index::new("users_email").unique().column("email")),
        );

        let users = schema.find_table("users").expect("users table");
        assert!(users.find_column("email").is_some());
        assert!(users.find_column("missing").is_none());
        assert!(users.find_index("users_email").is_some());
        assert!(schema.find_table("posts").is_none());
    }

    #[test]
    fn view_identity_by_kind() {
        let schema = Schema::new("main")
            .view(View::new("v", "SELECT 1"))
            .view(View::new("m", "SELECT 2").materialized());

        assert!(schema.find_view("v").is_some());
        assert!(schema.find_materialized("v").is_none());
        assert!(schema.find_materialized("m").is_some());
        assert!(schema.find_view("m").is_none());
    }

    #[test]
    fn index_part_ordering() {
        let idx = Index::new("i").column("a").column("b");
        assert_eq!(idx.parts.len(), 2);
        assert_eq!(idx.parts[0].seq_no, 1);
        assert_eq!(idx.parts[1].seq_no, 2);
    }

    #[test]
    fn foreign_key_builder() {
        let fk = ForeignKey::new("fk_posts_author")
            .columns(vec!["author_id".into()])
            .references("users", vec!["id".into()])
            .on_delete(ReferenceOption::Cascade);
        assert_eq!(fk.ref_table, "users");
        assert_eq!(fk.columns.len(), fk.ref_columns.len());
        assert_eq!(fk.on_delete, ReferenceOption::Cascade);
    }
}
