//! SQLite type round-tripping.
//!
//! SQLite accepts almost any type name and maps it to one of its four
//! storage affinities; the parser here keeps the logical type where it
//! can and falls back to [`Type::Unsupported`] so unknown types still
//! round-trip verbatim.

use strata_schema::error::{Result, SchemaError};
use strata_schema::types::Type;

/// Renders a logical type in SQLite syntax.
pub fn format_type(ty: &Type) -> Result<String> {
    Ok(match ty {
        Type::Boolean => "bool".to_string(),
        Type::Integer { bits: 64 } => "bigint".to_string(),
        Type::Integer { bits: 16 } => "smallint".to_string(),
        Type::Integer { bits: 8 } => "tinyint".to_string(),
        Type::Integer { .. } => "int".to_string(),
        Type::Varchar(Some(size)) => format!("varchar({size})"),
        Type::Varchar(None) => "varchar".to_string(),
        Type::Char(size) => format!("char({size})"),
        Type::Text => "text".to_string(),
        Type::Real => "real".to_string(),
        Type::Double => "double".to_string(),
        Type::Decimal(p, s) => format!("decimal({p},{s})"),
        Type::Blob(Some(size)) => format!("blob({size})"),
        Type::Blob(None) => "blob".to_string(),
        Type::Date => "date".to_string(),
        Type::Time => "time".to_string(),
        Type::DateTime => "datetime".to_string(),
        Type::Timestamp => "timestamp".to_string(),
        Type::Json => "json".to_string(),
        Type::Uuid => "uuid".to_string(),
        Type::Enum(_) => {
            return Err(SchemaError::UnsupportedType("enum".to_string()));
        }
        Type::Unsupported(raw) => raw.clone(),
    })
}

/// Parses a SQLite type string into a logical type.
pub fn parse_type(s: &str) -> Result<Type> {
    let trimmed = s.trim();
    let (name, args) = split_args(trimmed);
    Ok(match name.to_ascii_lowercase().as_str() {
        "bool" | "boolean" => Type::Boolean,
        "bigint" | "int8" | "unsigned big int" => Type::bigint(),
        "smallint" | "int2" => Type::smallint(),
        "tinyint" => Type::Integer { bits: 8 },
        "int" | "integer" | "mediumint" => Type::int(),
        "varchar" | "nvarchar" | "varying character" => Type::Varchar(args.first().copied()),
        "char" | "character" | "nchar" => Type::Char(args.first().copied().unwrap_or(1)),
        "text" | "clob" => Type::Text,
        "real" | "float" => Type::Real,
        "double" | "double precision" => Type::Double,
        "decimal" | "numeric" => Type::Decimal(
            args.first().copied().unwrap_or(10) as u8,
            args.get(1).copied().unwrap_or(0) as u8,
        ),
        "blob" => Type::Blob(args.first().copied()),
        "date" => Type::Date,
        "time" => Type::Time,
        "datetime" => Type::DateTime,
        "timestamp" => Type::Timestamp,
        "json" => Type::Json,
        "uuid" => Type::Uuid,
        _ => Type::Unsupported(trimmed.to_string()),
    })
}

// Splits "decimal(10,2)" into ("decimal", [10, 2]).
fn split_args(s: &str) -> (&str, Vec<u32>) {
    let Some(open) = s.find('(') else {
        return (s, Vec::new());
    };
    let Some(close) = s.rfind(')') else {
        return (s, Vec::new());
    };
    let args = s[open + 1..close]
        .split(',')
        .filter_map(|a| a.trim().parse().ok())
        .collect();
    (s[..open].trim_end(), args)
}
