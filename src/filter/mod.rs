//! Property filter compiler (§2 component 3, §4.3).
//!
//! Compiles a filter tree into a `(sql_fragment, bindings)` pair the
//! version-chain store splices into a `WHERE` clause. Modeled as a
//! tagged sum with no dynamic dispatch, per the "Filter expressions"
//! design note (spec §9): evaluation is a recursive tree walk that
//! accumulates SQL text and bindings as it goes, in the spirit of the
//! pack's `qbe.rs` operator dispatch.

mod path;

pub use path::parse_path;

use crate::error::{CoreError, Result, ValidationKind};
use crate::store::{get_str, Bound, Statement, StorePool};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::HashMap;

/// Comparison/pattern/set/existence operators (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    Eq,
    Ne,
    Gt,
    Lt,
    Gte,
    Lte,
    Like,
    Ilike,
    StartsWith,
    EndsWith,
    Contains,
    In,
    NotIn,
    Exists,
    NotExists,
}

impl Op {
    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "eq" => Op::Eq,
            "ne" => Op::Ne,
            "gt" => Op::Gt,
            "lt" => Op::Lt,
            "gte" => Op::Gte,
            "lte" => Op::Lte,
            "like" => Op::Like,
            "ilike" => Op::Ilike,
            "starts_with" => Op::StartsWith,
            "ends_with" => Op::EndsWith,
            "contains" => Op::Contains,
            "in" => Op::In,
            "not_in" => Op::NotIn,
            "exists" => Op::Exists,
            "not_exists" => Op::NotExists,
            other => {
                return Err(CoreError::Validation(ValidationKind::UnknownOperator(
                    other.to_string(),
                )))
            }
        })
    }
}

/// A single leaf condition: `path op value`. `value` is absent for
/// `exists`/`not_exists` and a JSON array for `in`/`not_in`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropFilter {
    pub path: String,
    pub op: String,
    #[serde(default)]
    pub value: Option<Json>,
}

impl PropFilter {
    pub fn new(path: impl Into<String>, op: impl Into<String>, value: Option<Json>) -> Self {
        Self {
            path: path.into(),
            op: op.into(),
            value,
        }
    }
}

/// The filter tree (spec §9 "Filter expressions" design note).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterExpr {
    And(Vec<FilterExpr>),
    Or(Vec<FilterExpr>),
    Leaf(PropFilter),
}

impl FilterExpr {
    /// §4.3 also accepts a flat list of leaves, implicitly AND-ed
    /// (spec.md: "flat filter lists").
    pub fn from_flat_list(filters: Vec<PropFilter>) -> Self {
        FilterExpr::And(filters.into_iter().map(FilterExpr::Leaf).collect())
    }
}

/// Static `json_path -> column_name` mapping loaded from the
/// `generated_columns` table (spec §3 glossary, §4.3 optimization).
#[derive(Debug, Clone, Default)]
pub struct GeneratedColumns {
    by_path: HashMap<String, String>,
}

impl GeneratedColumns {
    pub fn new(mapping: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            by_path: mapping.into_iter().collect(),
        }
    }

    fn lookup(&self, sql_path: &str) -> Option<&str> {
        self.by_path.get(sql_path).map(String::as_str)
    }

    /// Loads the mapping applicable to `applies_to` (`"entity"` or
    /// `"link"`) from the `generated_columns` table, including rows
    /// marked `"both"`.
    pub async fn load(store: &StorePool, applies_to: &str) -> Result<Self> {
        let rows = store
            .fetch_all(&Statement::new(
                "SELECT json_path, column_name FROM generated_columns WHERE applies_to = ? OR applies_to = 'both'",
                vec![Bound::Text(applies_to.to_string())],
            ))
            .await?;
        let mut by_path = HashMap::with_capacity(rows.len());
        for row in rows {
            by_path.insert(get_str(&row, "json_path")?, get_str(&row, "column_name")?);
        }
        Ok(Self { by_path })
    }
}

/// Coerces a loosely-typed string value the way §4.3 describes for
/// bound values arriving without JSON typing: numeric-looking strings
/// become numbers, `"true"`/`"false"` become booleans, anything else
/// stays a string.
pub fn coerce_string_value(raw: &str) -> Json {
    if raw == "true" {
        return Json::Bool(true);
    }
    if raw == "false" {
        return Json::Bool(false);
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Json::Number(i.into());
    }
    if let Ok(f) = raw.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Json::Number(n);
        }
    }
    Json::String(raw.to_string())
}

fn json_to_bound(v: &Json) -> Result<Bound> {
    Ok(match v {
        Json::Null => Bound::Null,
        Json::Bool(b) => Bound::Bool(*b),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Bound::Int(i)
            } else if let Some(f) = n.as_f64() {
                Bound::Float(f)
            } else {
                return Err(CoreError::Validation(ValidationKind::InvalidFields(
                    "unsupported numeric literal".into(),
                )));
            }
        }
        Json::String(s) => Bound::Text(s.clone()),
        other => {
            return Err(CoreError::Validation(ValidationKind::InvalidFields(format!(
                "unsupported filter value: {other}"
            ))))
        }
    })
}

fn column_expr(sql_path: &str, column: &str, generated: &GeneratedColumns) -> String {
    match generated.lookup(sql_path) {
        Some(col) => col.to_string(),
        None => format!("json_extract({column}, '{sql_path}')"),
    }
}

/// Compiles `expr` into a SQL boolean expression plus ordered bindings.
/// `column` is the properties column to extract from (`properties`).
pub fn compile(
    expr: &FilterExpr,
    column: &str,
    generated: &GeneratedColumns,
    max_depth: u32,
    max_path_depth: u32,
) -> Result<(String, Vec<Bound>)> {
    let mut bindings = Vec::new();
    let sql = compile_inner(expr, column, generated, max_depth, max_path_depth, 0, &mut bindings)?;
    Ok((sql, bindings))
}

fn compile_inner(
    expr: &FilterExpr,
    column: &str,
    generated: &GeneratedColumns,
    max_depth: u32,
    max_path_depth: u32,
    depth: u32,
    bindings: &mut Vec<Bound>,
) -> Result<String> {
    if depth > max_depth {
        return Err(CoreError::Validation(ValidationKind::FilterTooDeep));
    }
    match expr {
        FilterExpr::And(children) => compile_group(
            children, column, generated, max_depth, max_path_depth, depth, " AND ", "1 = 1", bindings,
        ),
        FilterExpr::Or(children) => compile_group(
            children, column, generated, max_depth, max_path_depth, depth, " OR ", "1 = 0", bindings,
        ),
        FilterExpr::Leaf(leaf) => compile_leaf(leaf, column, generated, max_path_depth, bindings),
    }
}

#[allow(clippy::too_many_arguments)]
fn compile_group(
    children: &[FilterExpr],
    column: &str,
    generated: &GeneratedColumns,
    max_depth: u32,
    max_path_depth: u32,
    depth: u32,
    joiner: &str,
    empty_value: &str,
    bindings: &mut Vec<Bound>,
) -> Result<String> {
    if children.is_empty() {
        return Ok(empty_value.to_string());
    }
    let mut parts = Vec::with_capacity(children.len());
    for child in children {
        parts.push(compile_inner(
            child,
            column,
            generated,
            max_depth,
            max_path_depth,
            depth + 1,
            bindings,
        )?);
    }
    Ok(format!("({})", parts.join(joiner)))
}

fn compile_leaf(
    leaf: &PropFilter,
    column: &str,
    generated: &GeneratedColumns,
    max_path_depth: u32,
    bindings: &mut Vec<Bound>,
) -> Result<String> {
    let op = Op::from_str(&leaf.op)?;
    let sql_path = parse_path(&leaf.path, max_path_depth)?;
    let expr = column_expr(&sql_path, column, generated);

    match op {
        Op::Exists => return Ok(format!("{expr} IS NOT NULL")),
        Op::NotExists => return Ok(format!("{expr} IS NULL")),
        _ => {}
    }

    let value = leaf
        .value
        .as_ref()
        .ok_or_else(|| CoreError::Validation(ValidationKind::InvalidFields(format!(
            "operator '{}' requires a value",
            leaf.op
        ))))?;

    match op {
        Op::Eq => {
            bindings.push(json_to_bound(value)?);
            Ok(format!("{expr} = ?"))
        }
        Op::Ne => {
            bindings.push(json_to_bound(value)?);
            Ok(format!("({expr} IS NULL OR {expr} != ?)"))
        }
        Op::Gt => {
            bindings.push(json_to_bound(value)?);
            Ok(format!("{expr} > ?"))
        }
        Op::Lt => {
            bindings.push(json_to_bound(value)?);
            Ok(format!("{expr} < ?"))
        }
        Op::Gte => {
            bindings.push(json_to_bound(value)?);
            Ok(format!("{expr} >= ?"))
        }
        Op::Lte => {
            bindings.push(json_to_bound(value)?);
            Ok(format!("{expr} <= ?"))
        }
        Op::Like => {
            bindings.push(json_to_bound(value)?);
            Ok(format!("{expr} LIKE ?"))
        }
        Op::Ilike => {
            bindings.push(json_to_bound(value)?);
            Ok(format!("{expr} LIKE ? ESCAPE '\\' COLLATE NOCASE"))
        }
        Op::StartsWith => {
            bindings.push(Bound::Text(format!("{}%", as_like_operand(value)?)));
            Ok(format!("{expr} LIKE ? ESCAPE '\\' COLLATE NOCASE"))
        }
        Op::EndsWith => {
            bindings.push(Bound::Text(format!("%{}", as_like_operand(value)?)));
            Ok(format!("{expr} LIKE ? ESCAPE '\\' COLLATE NOCASE"))
        }
        Op::Contains => {
            bindings.push(Bound::Text(format!("%{}%", as_like_operand(value)?)));
            Ok(format!("{expr} LIKE ? ESCAPE '\\' COLLATE NOCASE"))
        }
        Op::In | Op::NotIn => {
            let items = value.as_array().ok_or_else(|| {
                CoreError::Validation(ValidationKind::InvalidFields(
                    "in/not_in requires an array value".into(),
                ))
            })?;
            if items.is_empty() {
                // An empty IN-list is invalid SQL; an empty set can
                // never match, so short-circuit to the constant.
                return Ok(if op == Op::In { "1 = 0".into() } else { "1 = 1".into() });
            }
            let placeholders = std::iter::repeat("?").take(items.len()).collect::<Vec<_>>().join(", ");
            for item in items {
                bindings.push(json_to_bound(item)?);
            }
            let not = if op == Op::NotIn { " NOT" } else { "" };
            Ok(format!("{expr}{not} IN ({placeholders})"))
        }
        Op::Exists | Op::NotExists => unreachable!("handled above"),
    }
}

fn as_like_operand(value: &Json) -> Result<String> {
    match value {
        Json::String(s) => Ok(escape_like(s)),
        other => Err(CoreError::Validation(ValidationKind::InvalidFields(format!(
            "pattern operator requires a string value, got {other}"
        )))),
    }
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gen_cols() -> GeneratedColumns {
        GeneratedColumns::new([("$.name".to_string(), "prop_name".to_string())])
    }

    #[test]
    fn eq_leaf_uses_json_extract() {
        let expr = FilterExpr::Leaf(PropFilter::new("age", "eq", Some(Json::from(30))));
        let (sql, bindings) = compile(&expr, "properties", &GeneratedColumns::default(), 5, 10).unwrap();
        assert_eq!(sql, "json_extract(properties, '$.age') = ?");
        assert_eq!(bindings, vec![Bound::Int(30)]);
    }

    #[test]
    fn generated_column_substitution() {
        let expr = FilterExpr::Leaf(PropFilter::new("name", "eq", Some(Json::from("a"))));
        let (sql, _) = compile(&expr, "properties", &gen_cols(), 5, 10).unwrap();
        assert_eq!(sql, "prop_name = ?");
    }

    #[test]
    fn and_or_nesting() {
        let expr = FilterExpr::And(vec![
            FilterExpr::Leaf(PropFilter::new("a", "exists", None)),
            FilterExpr::Or(vec![
                FilterExpr::Leaf(PropFilter::new("b", "eq", Some(Json::from(1)))),
                FilterExpr::Leaf(PropFilter::new("c", "eq", Some(Json::from(2)))),
            ]),
        ]);
        let (sql, bindings) = compile(&expr, "properties", &GeneratedColumns::default(), 5, 10).unwrap();
        assert!(sql.contains(" AND "));
        assert!(sql.contains(" OR "));
        assert_eq!(bindings.len(), 2);
    }

    #[test]
    fn rejects_nesting_beyond_five() {
        let mut expr = FilterExpr::Leaf(PropFilter::new("a", "eq", Some(Json::from(1))));
        for _ in 0..6 {
            expr = FilterExpr::And(vec![expr]);
        }
        let err = compile(&expr, "properties", &GeneratedColumns::default(), 5, 10).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Validation(ValidationKind::FilterTooDeep)
        ));
    }

    #[test]
    fn accepts_nesting_exactly_five() {
        let mut expr = FilterExpr::Leaf(PropFilter::new("a", "eq", Some(Json::from(1))));
        for _ in 0..5 {
            expr = FilterExpr::And(vec![expr]);
        }
        assert!(compile(&expr, "properties", &GeneratedColumns::default(), 5, 10).is_ok());
    }

    #[test]
    fn empty_in_list_is_always_false() {
        let expr = FilterExpr::Leaf(PropFilter::new("a", "in", Some(Json::Array(vec![]))));
        let (sql, bindings) = compile(&expr, "properties", &GeneratedColumns::default(), 5, 10).unwrap();
        assert_eq!(sql, "1 = 0");
        assert!(bindings.is_empty());
    }

    #[test]
    fn unknown_operator_rejected() {
        let expr = FilterExpr::Leaf(PropFilter::new("a", "frobnicate", Some(Json::from(1))));
        assert!(compile(&expr, "properties", &GeneratedColumns::default(), 5, 10).is_err());
    }

    #[test]
    fn coerce_values() {
        assert_eq!(coerce_string_value("true"), Json::Bool(true));
        assert_eq!(coerce_string_value("42"), Json::from(42));
        assert_eq!(coerce_string_value("hello"), Json::from("hello"));
    }
}
