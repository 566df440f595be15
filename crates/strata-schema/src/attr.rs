//! Attribute bags.
//!
//! Schemas, tables, columns and index parts carry heterogeneous lists of
//! attributes (charset, collation, comments, checks, ...). The list is a
//! closed [`Attr`] enum; typed retrieval goes through the [`AttrValue`]
//! trait so callers never match on the enum directly.

use serde::{Deserialize, Serialize};

/// Character set of a schema, table or column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Charset(pub String);

/// Collation of a schema, table or column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collation(pub String);

/// Comment attached to an element. An empty comment clears it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Comment(pub String);

/// Storage engine of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Engine(pub String);

/// Auto-increment counter of a table or column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoIncrement(pub u64);

/// A CHECK constraint. The name may be empty for unnamed constraints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Check {
    /// Constraint name, empty if the constraint is unnamed.
    pub name: String,
    /// Check expression as written by the user.
    pub expr: String,
    /// Whether the constraint is enforced.
    pub enforced: bool,
}

impl Check {
    /// Creates a named check constraint.
    #[must_use]
    pub fn new(name: impl Into<String>, expr: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expr: expr.into(),
            enforced: true,
        }
    }

    /// Creates an unnamed check constraint.
    #[must_use]
    pub fn unnamed(expr: impl Into<String>) -> Self {
        Self::new("", expr)
    }
}

/// Prefix length of an index part (e.g. `KEY (c(10))`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubPart(pub u32);

/// Operator class of an index part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpClass(pub String);

/// Generation expression of a computed column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Generated {
    /// The generation expression.
    pub expr: String,
    /// Stored (materialized) vs. virtual.
    pub stored: bool,
}

/// Predicate of a partial index (the WHERE clause).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Predicate(pub String);

/// Table option excluding the implicit rowid (SQLite).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithoutRowid;

/// A single element of an attribute bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Attr {
    /// Character set.
    Charset(Charset),
    /// Collation.
    Collation(Collation),
    /// Comment.
    Comment(Comment),
    /// Storage engine.
    Engine(Engine),
    /// Auto-increment counter.
    AutoIncrement(AutoIncrement),
    /// CHECK constraint.
    Check(Check),
    /// Index part prefix length.
    SubPart(SubPart),
    /// Index part operator class.
    OpClass(OpClass),
    /// Column generation expression.
    Generated(Generated),
    /// Partial index predicate.
    Predicate(Predicate),
    /// WITHOUT ROWID table option.
    WithoutRowid(WithoutRowid),
}

/// A value that can be stored in and retrieved from an attribute bag.
pub trait AttrValue: Sized {
    /// Extracts a reference to `Self` if the attribute holds this type.
    fn from_attr(attr: &Attr) -> Option<&Self>;

    /// Wraps the value into an [`Attr`].
    fn into_attr(self) -> Attr;
}

macro_rules! attr_value {
    ($($ty:ident),* $(,)?) => {
        $(
            impl AttrValue for $ty {
                fn from_attr(attr: &Attr) -> Option<&Self> {
                    match attr {
                        Attr::$ty(v) => Some(v),
                        _ => None,
                    }
                }

                fn into_attr(self) -> Attr {
                    Attr::$ty(self)
                }
            }
        )*
    };
}

attr_value!(
    Charset,
    Collation,
    Comment,
    Engine,
    AutoIncrement,
    Check,
    SubPart,
    OpClass,
    Generated,
    Predicate,
    WithoutRowid,
);

/// Returns the first attribute of type `T`, if any.
pub fn attr<T: AttrValue>(attrs: &[Attr]) -> Option<&T> {
    attrs.iter().find_map(T::from_attr)
}

/// Returns the first attribute of type `T`, or the given default.
pub fn attr_or<'a, T: AttrValue>(attrs: &'a [Attr], default: &'a T) -> &'a T {
    attr(attrs).unwrap_or(default)
}

/// Reports whether the bag contains an attribute of type `T`.
pub fn has_attr<T: AttrValue>(attrs: &[Attr]) -> bool {
    attr::<T>(attrs).is_some()
}

/// Replaces the first attribute of `T`'s type, or appends the value.
pub fn set_attr<T: AttrValue>(attrs: &mut Vec<Attr>, value: T) {
    let attr = value.into_attr();
    match attrs
        .iter()
        .position(|a| std::mem::discriminant(a) == std::mem::discriminant(&attr))
    {
        Some(i) => attrs[i] = attr,
        None => attrs.push(attr),
    }
}

/// Removes every attribute of type `T` from the bag.
pub fn unset_attr<T: AttrValue>(attrs: &mut Vec<Attr>) {
    attrs.retain(|a| T::from_attr(a).is_none());
}

/// Collects all CHECK constraints in the bag.
pub fn checks(attrs: &[Attr]) -> Vec<&Check> {
    attrs
        .iter()
        .filter_map(|a| match a {
            Attr::Check(c) => Some(c),
            _ => None,
        })
        .collect()
}
