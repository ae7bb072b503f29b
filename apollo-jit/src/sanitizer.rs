//! Validation of schema and query derived names.
//!
//! Every name that ends up in a compiled plan (response keys, field and type names, fragment
//! and variable names, enum values) is checked here first. Anything outside the identifier
//! grammar is rejected; nothing is ever rewritten or escaped.

use displaydoc::Display;
use thiserror::Error;

/// Words an enum value cannot be, since they read as literals wherever a value is expected.
const RESERVED_KEYWORDS: &[&str] = &["true", "false", "null"];

/// Why a name was rejected.
#[derive(Debug, Clone, Error, Display, PartialEq, Eq)]
#[non_exhaustive]
pub enum SanitizeError {
    /// identifier cannot be empty
    Empty,

    /// invalid identifier '{0}': must start with a letter or underscore
    InvalidStart(String),

    /// invalid identifier '{0}': contains invalid characters
    InvalidCharacters(String),

    /// invalid identifier '{0}': reserved keyword
    ReservedKeyword(String),
}

/// Returns `name` unchanged if it is a safe identifier.
///
/// A safe identifier is non-empty, starts with an ASCII letter or `_` and continues with ASCII
/// letters, digits or `_`. Words that are keywords in other languages, such as `type` or
/// `where`, are ordinary GraphQL names and are accepted.
pub fn sanitize_identifier(name: &str) -> Result<&str, SanitizeError> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err(SanitizeError::Empty);
    };
    if !(first.is_ascii_alphabetic() || first == '_') {
        return Err(SanitizeError::InvalidStart(name.to_string()));
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(SanitizeError::InvalidCharacters(name.to_string()));
    }
    Ok(name)
}

/// Like [`sanitize_identifier`], also rejecting `true`, `false` and `null`.
pub fn sanitize_enum_value(name: &str) -> Result<&str, SanitizeError> {
    let name = sanitize_identifier(name)?;
    if RESERVED_KEYWORDS.contains(&name) {
        return Err(SanitizeError::ReservedKeyword(name.to_string()));
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_graphql_names() {
        for name in ["user", "User", "_private", "__typename", "field_1", "NEW_HOPE"] {
            assert_eq!(sanitize_identifier(name), Ok(name));
        }
    }

    #[test]
    fn rejects_empty() {
        assert_eq!(sanitize_identifier(""), Err(SanitizeError::Empty));
        assert_eq!(
            SanitizeError::Empty.to_string(),
            "identifier cannot be empty"
        );
    }

    #[test]
    fn rejects_bad_first_character() {
        assert_eq!(
            sanitize_identifier("1field"),
            Err(SanitizeError::InvalidStart("1field".to_string()))
        );
        assert_eq!(
            sanitize_identifier("-x").unwrap_err().to_string(),
            "invalid identifier '-x': must start with a letter or underscore"
        );
    }

    #[test]
    fn rejects_invalid_characters() {
        for name in ["a-b", "a b", "a;drop", "caf\u{e9}", "a\"b", "a\nb"] {
            assert_eq!(
                sanitize_identifier(name),
                Err(SanitizeError::InvalidCharacters(name.to_string())),
                "{name:?}"
            );
        }
    }

    #[test]
    fn keywords_of_other_languages_are_names() {
        for name in ["type", "where", "in", "match", "use", "ref", "self", "final", "override"] {
            assert_eq!(sanitize_identifier(name), Ok(name));
            assert_eq!(sanitize_enum_value(name), Ok(name));
        }
    }

    #[test]
    fn enum_values_cannot_be_literals() {
        for name in ["true", "false", "null"] {
            assert_eq!(sanitize_identifier(name), Ok(name));
            assert_eq!(
                sanitize_enum_value(name),
                Err(SanitizeError::ReservedKeyword(name.to_string()))
            );
        }
        assert_eq!(
            sanitize_enum_value("null").unwrap_err().to_string(),
            "invalid identifier 'null': reserved keyword"
        );
        // Case sensitive
        assert!(sanitize_enum_value("NULL").is_ok());
        assert!(matches!(
            sanitize_enum_value("1st"),
            Err(SanitizeError::InvalidStart(_))
        ));
    }
}
