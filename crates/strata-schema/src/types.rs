//! Logical column types.
//!
//! [`Type`] is the dialect-independent representation handed between the
//! inspectors, the differ and the planners. Dialect drivers round-trip it
//! through their `format_type`/`parse_type` capabilities.

use serde::{Deserialize, Serialize};

/// A logical SQL data type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    /// Boolean.
    Boolean,
    /// Integer with a bit width (8, 16, 32 or 64).
    Integer {
        /// Bit width.
        bits: u8,
    },
    /// Variable-length character string with an optional length limit.
    Varchar(Option<u32>),
    /// Fixed-length character string.
    Char(u32),
    /// Unbounded text.
    Text,
    /// Single-precision floating point.
    Real,
    /// Double-precision floating point.
    Double,
    /// Exact numeric with precision and scale.
    Decimal(u8, u8),
    /// Binary blob with an optional length limit.
    Blob(Option<u32>),
    /// Calendar date.
    Date,
    /// Time of day.
    Time,
    /// Date and time.
    DateTime,
    /// Point in time.
    Timestamp,
    /// JSON document.
    Json,
    /// UUID.
    Uuid,
    /// Enumeration over a fixed value set.
    Enum(Vec<String>),
    /// A raw type the dialect could not map to a logical one. Carried
    /// verbatim so diffs and plans still round-trip it.
    Unsupported(String),
}

impl Type {
    /// 32-bit integer shorthand.
    #[must_use]
    pub fn int() -> Self {
        Self::Integer { bits: 32 }
    }

    /// 64-bit integer shorthand.
    #[must_use]
    pub fn bigint() -> Self {
        Self::Integer { bits: 64 }
    }

    /// 16-bit integer shorthand.
    #[must_use]
    pub fn smallint() -> Self {
        Self::Integer { bits: 16 }
    }

    /// Bounded varchar shorthand.
    #[must_use]
    pub fn varchar(size: u32) -> Self {
        Self::Varchar(Some(size))
    }
}

/// A column type: the logical [`Type`] plus nullability, and the raw
/// database rendition when the column was read back from a live database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnType {
    /// Logical type.
    pub ty: Type,
    /// Whether NULL values are allowed.
    pub null: bool,
    /// The raw type string as reported by the database, empty when the
    /// column was built programmatically.
    pub raw: String,
}

impl ColumnType {
    /// Creates a NOT NULL column type.
    #[must_use]
    pub fn new(ty: Type) -> Self {
        Self {
            ty,
            null: false,
            raw: String::new(),
        }
    }

    /// Marks the type as nullable.
    #[must_use]
    pub fn null(mut self) -> Self {
        self.null = true;
        self
    }

    /// Attaches the raw database type string.
    #[must_use]
    pub fn raw(mut self, raw: impl Into<String>) -> Self {
        self.raw = raw.into();
        self
    }
}
