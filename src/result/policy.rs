//! Policy-based suppression.
//!
//! A policy file is a JSON document `{"ignore": <expr>}` compiled once
//! and evaluated against every finding (serialized to JSON). An
//! expression that produces anything but a boolean is a fatal policy
//! error, never a silent pass.
//!
//! Expressions:
//! - `true` / `false` (any JSON literal is allowed, but the final
//!   result must be boolean)
//! - `{"all": [expr...]}`, `{"any": [expr...]}`, `{"not": expr}`
//! - `{"eq": ["field.path", value]}`
//! - `{"prefix": ["field.path", "str"]}`
//! - `{"in": ["field.path", [value...]]}`

use std::path::Path;

use serde_json::Value;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
enum Expr {
    Literal(Value),
    All(Vec<Expr>),
    Any(Vec<Expr>),
    Not(Box<Expr>),
    Eq(String, Value),
    Prefix(String, String),
    In(String, Vec<Value>),
}

/// A compiled ignore policy.
#[derive(Debug, Clone)]
pub struct Policy {
    ignore: Expr,
}

impl Policy {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Policy(format!("{}: {e}", path.display())))?;
        Self::compile(&raw)
    }

    pub fn compile(text: &str) -> Result<Self> {
        let root: Value =
            serde_json::from_str(text).map_err(|e| Error::Policy(format!("parse: {e}")))?;
        let ignore = root
            .get("ignore")
            .ok_or_else(|| Error::Policy("missing `ignore` rule".into()))?;
        Ok(Self {
            ignore: compile_expr(ignore)?,
        })
    }

    /// Evaluate against one finding. `true` means drop the finding.
    pub fn evaluate(&self, finding: &Value) -> Result<bool> {
        match eval(&self.ignore, finding) {
            Value::Bool(b) => Ok(b),
            other => Err(Error::Policy(format!(
                "the policy must return boolean, got {other}"
            ))),
        }
    }
}

fn compile_expr(value: &Value) -> Result<Expr> {
    let Some(obj) = value.as_object() else {
        return Ok(Expr::Literal(value.clone()));
    };
    if obj.len() != 1 {
        return Err(Error::Policy(format!(
            "expression must have exactly one operator: {value}"
        )));
    }
    let (op, arg) = obj.iter().next().unwrap();
    match op.as_str() {
        "all" | "any" => {
            let items = arg
                .as_array()
                .ok_or_else(|| Error::Policy(format!("`{op}` expects an array")))?;
            let exprs = items.iter().map(compile_expr).collect::<Result<Vec<_>>>()?;
            Ok(if op == "all" {
                Expr::All(exprs)
            } else {
                Expr::Any(exprs)
            })
        }
        "not" => Ok(Expr::Not(Box::new(compile_expr(arg)?))),
        "eq" | "prefix" | "in" => {
            let pair = arg
                .as_array()
                .filter(|a| a.len() == 2)
                .ok_or_else(|| Error::Policy(format!("`{op}` expects [path, value]")))?;
            let path = pair[0]
                .as_str()
                .ok_or_else(|| Error::Policy(format!("`{op}` path must be a string")))?
                .to_string();
            match op.as_str() {
                "eq" => Ok(Expr::Eq(path, pair[1].clone())),
                "prefix" => {
                    let prefix = pair[1]
                        .as_str()
                        .ok_or_else(|| Error::Policy("`prefix` value must be a string".into()))?;
                    Ok(Expr::Prefix(path, prefix.to_string()))
                }
                _ => {
                    let values = pair[1]
                        .as_array()
                        .ok_or_else(|| Error::Policy("`in` value must be an array".into()))?;
                    Ok(Expr::In(path, values.clone()))
                }
            }
        }
        other => Err(Error::Policy(format!("unknown operator `{other}`"))),
    }
}

fn lookup<'a>(finding: &'a Value, path: &str) -> &'a Value {
    let mut current = finding;
    for part in path.split('.') {
        current = current.get(part).unwrap_or(&Value::Null);
    }
    current
}

fn eval(expr: &Expr, finding: &Value) -> Value {
    match expr {
        Expr::Literal(v) => v.clone(),
        Expr::All(exprs) => Value::Bool(
            exprs
                .iter()
                .all(|e| matches!(eval(e, finding), Value::Bool(true))),
        ),
        Expr::Any(exprs) => Value::Bool(
            exprs
                .iter()
                .any(|e| matches!(eval(e, finding), Value::Bool(true))),
        ),
        Expr::Not(inner) => match eval(inner, finding) {
            Value::Bool(b) => Value::Bool(!b),
            other => other,
        },
        Expr::Eq(path, value) => Value::Bool(lookup(finding, path) == value),
        Expr::Prefix(path, prefix) => Value::Bool(
            lookup(finding, path)
                .as_str()
                .is_some_and(|s| s.starts_with(prefix)),
        ),
        Expr::In(path, values) => Value::Bool(values.contains(lookup(finding, path))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn literal_true_drops_everything() {
        let policy = Policy::compile(r#"{"ignore": true}"#).unwrap();
        assert!(policy.evaluate(&json!({"vulnerability_id": "CVE-A"})).unwrap());
    }

    #[test]
    fn non_boolean_result_is_fatal() {
        let policy = Policy::compile(r#"{"ignore": "yes"}"#).unwrap();
        let err = policy
            .evaluate(&json!({"vulnerability_id": "CVE-A"}))
            .unwrap_err();
        assert!(matches!(err, Error::Policy(_)));
        assert!(err.to_string().contains("must return boolean"));
    }

    #[test]
    fn field_predicates_compose() {
        let policy = Policy::compile(
            r#"{"ignore": {"all": [
                {"prefix": ["vulnerability_id", "CVE-2023-"]},
                {"not": {"eq": ["severity", "CRITICAL"]}}
            ]}}"#,
        )
        .unwrap();

        let drop = json!({"vulnerability_id": "CVE-2023-1111", "severity": "LOW"});
        let keep_sev = json!({"vulnerability_id": "CVE-2023-1111", "severity": "CRITICAL"});
        let keep_year = json!({"vulnerability_id": "CVE-2024-1111", "severity": "LOW"});
        assert!(policy.evaluate(&drop).unwrap());
        assert!(!policy.evaluate(&keep_sev).unwrap());
        assert!(!policy.evaluate(&keep_year).unwrap());
    }

    #[test]
    fn in_operator_matches_id_sets() {
        let policy = Policy::compile(
            r#"{"ignore": {"in": ["pkg_name", ["bash", "coreutils"]]}}"#,
        )
        .unwrap();
        assert!(policy.evaluate(&json!({"pkg_name": "bash"})).unwrap());
        assert!(!policy.evaluate(&json!({"pkg_name": "curl"})).unwrap());
    }

    #[test]
    fn unknown_operator_fails_at_compile_time() {
        assert!(Policy::compile(r#"{"ignore": {"regex": ["x", "y"]}}"#).is_err());
        assert!(Policy::compile(r#"{"rules": true}"#).is_err());
    }
}
