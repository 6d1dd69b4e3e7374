//! Property-path parsing and validation (spec §4.3).
//!
//! User-syntax dotted/bracketed paths (`a.b[0].c`) are parsed into
//! SQLite's `$.foo.bar[0]` JSONPath syntax, validating each segment
//! along the way. Grounded on the segment-by-segment parser shape of
//! the pack's `jsonpath.rs`, simplified to the name/index-only grammar
//! the spec calls for (no wildcards, slices, or filters).

use crate::error::{CoreError, ValidationKind};
use once_cell::sync::Lazy;
use regex::Regex;

static NAME_SEGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// Parses a user-facing path into `$.foo.bar[0]` form.
///
/// Each dotted segment must match `[A-Za-z_][A-Za-z0-9_]*`; each
/// bracketed segment must be a non-negative integer. At most
/// `max_depth` segments are allowed (§4.3: "Maximum 10 levels").
pub fn parse_path(raw: &str, max_depth: u32) -> crate::error::Result<String> {
    if raw.is_empty() {
        return Err(CoreError::Validation(ValidationKind::InvalidPath(
            "path is empty".into(),
        )));
    }

    let mut sql_path = String::from("$");
    let mut depth: u32 = 0;
    let mut chars = raw.char_indices().peekable();
    let mut segment = String::new();
    let mut in_brackets = false;

    macro_rules! flush_name {
        () => {
            if !segment.is_empty() {
                if !NAME_SEGMENT.is_match(&segment) {
                    return Err(CoreError::Validation(ValidationKind::InvalidPath(format!(
                        "invalid path segment '{segment}' in '{raw}'"
                    ))));
                }
                depth += 1;
                sql_path.push('.');
                sql_path.push_str(&segment);
                segment.clear();
            }
        };
    }

    while let Some((_, c)) = chars.next() {
        match c {
            '.' if !in_brackets => {
                flush_name!();
            }
            '[' if !in_brackets => {
                flush_name!();
                in_brackets = true;
            }
            ']' if in_brackets => {
                if segment.is_empty() || !segment.chars().all(|d| d.is_ascii_digit()) {
                    return Err(CoreError::Validation(ValidationKind::InvalidPath(format!(
                        "invalid array index '{segment}' in '{raw}'"
                    ))));
                }
                depth += 1;
                sql_path.push('[');
                sql_path.push_str(&segment);
                sql_path.push(']');
                segment.clear();
                in_brackets = false;
            }
            _ => segment.push(c),
        }
    }
    if in_brackets {
        return Err(CoreError::Validation(ValidationKind::InvalidPath(format!(
            "unterminated '[' in '{raw}'"
        ))));
    }
    flush_name!();

    if depth == 0 {
        return Err(CoreError::Validation(ValidationKind::InvalidPath(format!(
            "path '{raw}' has no segments"
        ))));
    }
    if depth > max_depth {
        return Err(CoreError::Validation(ValidationKind::PathTooDeep(
            raw.to_string(),
        )));
    }

    Ok(sql_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_name_path() {
        assert_eq!(parse_path("foo", 10).unwrap(), "$.foo");
    }

    #[test]
    fn nested_with_index() {
        assert_eq!(parse_path("foo.bar[0].baz", 10).unwrap(), "$.foo.bar[0].baz");
    }

    #[test]
    fn rejects_bad_segment() {
        assert!(parse_path("foo.1bad", 10).is_err());
    }

    #[test]
    fn rejects_negative_index() {
        assert!(parse_path("foo[-1]", 10).is_err());
    }

    #[test]
    fn enforces_depth_limit() {
        let ok = (0..10).map(|i| format!("a{i}")).collect::<Vec<_>>().join(".");
        assert!(parse_path(&ok, 10).is_ok());
        let too_deep = (0..11).map(|i| format!("a{i}")).collect::<Vec<_>>().join(".");
        assert!(matches!(
            parse_path(&too_deep, 10),
            Err(CoreError::Validation(ValidationKind::PathTooDeep(_)))
        ));
    }
}
