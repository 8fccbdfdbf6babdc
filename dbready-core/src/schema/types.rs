//! Column type compatibility.

use serde::Serialize;

/// Groups of Postgres type names that are interchangeable for validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeFamily {
    BigInt,
    Integer,
    SmallInt,
    Text,
    TimestampTz,
    Timestamp,
    Json,
    Boolean,
    /// `numeric`/`decimal` regardless of precision and scale
    Numeric,
    Date,
}

impl TypeFamily {
    const ALL: [TypeFamily; 10] = [
        Self::BigInt,
        Self::Integer,
        Self::SmallInt,
        Self::Text,
        Self::TimestampTz,
        Self::Timestamp,
        Self::Json,
        Self::Boolean,
        Self::Numeric,
        Self::Date,
    ];

    fn aliases(self) -> &'static [&'static str] {
        match self {
            Self::BigInt => &["bigint", "bigserial", "int8"],
            Self::Integer => &["integer", "int", "int4", "serial"],
            Self::SmallInt => &["smallint", "int2", "smallserial"],
            Self::Text => &["text", "varchar", "character varying", "character", "char"],
            Self::TimestampTz => &["timestamptz", "timestamp with time zone"],
            Self::Timestamp => &["timestamp", "timestamp without time zone"],
            Self::Json => &["json", "jsonb"],
            Self::Boolean => &["boolean", "bool"],
            Self::Numeric => &["numeric", "decimal"],
            Self::Date => &["date"],
        }
    }

    /// Family of a type name, ignoring case, surrounding whitespace and any
    /// parenthesized modifier such as `(12,2)`.
    pub fn of(type_name: &str) -> Option<Self> {
        let normalized = normalize(type_name);
        Self::ALL
            .into_iter()
            .find(|family| family.aliases().contains(&normalized.as_str()))
    }
}

fn normalize(type_name: &str) -> String {
    let lower = type_name.trim().to_lowercase();
    match lower.split_once('(') {
        Some((base, _)) => base.trim_end().to_string(),
        None => lower,
    }
}

/// Whether a column declared as `actual` satisfies an `expected` type.
pub fn types_compatible(expected: &str, actual: &str) -> bool {
    let (expected_norm, actual_norm) = (normalize(expected), normalize(actual));
    if expected_norm == actual_norm {
        return true;
    }
    match (TypeFamily::of(expected), TypeFamily::of(actual)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alias_groups() {
        assert!(types_compatible("bigint", "int8"));
        assert!(types_compatible("bigint", "bigserial"));
        assert!(types_compatible("integer", "int4"));
        assert!(types_compatible("smallint", "int2"));
        assert!(types_compatible("text", "character varying"));
        assert!(types_compatible("timestamp with time zone", "timestamptz"));
        assert!(types_compatible("timestamp", "timestamp without time zone"));
        assert!(types_compatible("jsonb", "json"));
        assert!(types_compatible("boolean", "bool"));
    }

    #[test]
    fn test_numeric_ignores_precision() {
        assert!(types_compatible("numeric", "numeric(12,2)"));
        assert!(types_compatible("NUMERIC(10, 4)", "decimal"));
    }

    #[test]
    fn test_incompatible_types() {
        assert!(!types_compatible("bigint", "integer"));
        assert!(!types_compatible("timestamp with time zone", "timestamp without time zone"));
        assert!(!types_compatible("jsonb", "text"));
        assert!(!types_compatible("date", "text"));
    }

    #[test]
    fn test_unknown_types_compare_by_name() {
        assert!(types_compatible("USER-DEFINED", "user-defined"));
        assert!(!types_compatible("uuid", "text"));
        assert_eq!(TypeFamily::of("uuid"), None);
    }
}
