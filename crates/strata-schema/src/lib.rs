//! Schema model, change algebra and diff engine.
//!
//! `strata-schema` is the dialect-independent core of the schema
//! management engine:
//!
//! - **Model** - typed in-memory representation of realms, schemas,
//!   tables, columns, indexes, foreign keys, views, triggers and
//!   routines, with attribute bags and typed retrieval.
//! - **Changes** - the closed set of structural change variants with
//!   [`changes::ChangeKind`] bitsets, skip policies and reversal.
//! - **Diff** - a generic differ parameterized by a [`diff::DiffDriver`]
//!   that answers everything dialect-specific.
//!
//! Dialect drivers implement [`diff::DiffDriver`] and plug into
//! [`diff::Differ`]; the migration engine turns the resulting change-set
//! into SQL statements.

pub mod attr;
pub mod changes;
pub mod diff;
pub mod error;
pub mod expr;
pub mod model;
pub mod types;

pub use attr::{attr as find_attr, attr_or, has_attr, set_attr, unset_attr, Attr};
pub use changes::{reverse_changes, Change, ChangeKind, DiffMode, DiffOptions, SkipChanges};
pub use diff::{DiffDriver, Differ};
pub use error::{Result, SchemaError};
pub use model::{
    Column, DbObject, ForeignKey, Func, Index, IndexPart, Part, Proc, Realm, ReferenceOption,
    Schema, Table, Trigger, View,
};
pub use types::{ColumnType, Type};
