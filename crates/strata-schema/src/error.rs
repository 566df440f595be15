//! Error types for the schema model and diff engine.

/// Errors raised by the model and the differ.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// Realm or schema diff was invoked over differently named schemas.
    #[error("mismatched schema names: {from:?} != {to:?}")]
    SchemaNameMismatch {
        /// Name on the current-state side.
        from: String,
        /// Name on the desired-state side.
        to: String,
    },

    /// Table diff was invoked over differently named tables.
    #[error("mismatched table names: {from:?} != {to:?}")]
    TableNameMismatch {
        /// Name on the current-state side.
        from: String,
        /// Name on the desired-state side.
        to: String,
    },

    /// The dialect cannot represent the given type.
    #[error("unsupported type {0:?}")]
    UnsupportedType(String),

    /// The dialect cannot express the requested change.
    #[error("unsupported change: {0}")]
    UnsupportedChange(String),

    /// A dialect-specific diff predicate failed.
    #[error("{0}")]
    Driver(String),
}

/// Result alias for schema operations.
pub type Result<T> = std::result::Result<T, SchemaError>;
