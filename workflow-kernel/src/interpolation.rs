//! `{{ expr }}` interpolation and single-comparison condition evaluation.
//!
//! The scanner is a single left-to-right pass over the template looking for
//! `{{`/`}}` pairs via `str::find`, which only ever splits on ASCII `{`/`}`
//! and so never lands inside a multi-byte UTF-8 sequence; it does not
//! recurse and does not support escaping. A whole-document regex was
//! deliberately not used here.

use crate::error::WorkflowError;
use crate::value::{self, Value};
use chrono::Utc;

pub const BUILTINS: &[&str] = &[
    "date", "timestamp", "time", "year", "month", "day", "workflow", "run_id",
];

/// Anything the interpolator can look values up in. `workflow-core`'s
/// `WorkflowContext` implements this; kept as a trait so the kernel (which
/// must stay free of filesystem/async dependencies) owns the algorithm.
pub trait VariableSource {
    fn lookup_variable(&self, name: &str) -> Option<Value>;
    fn lookup_step_result(&self, name: &str) -> Option<Value>;
    fn workflow_name(&self) -> &str;
    fn run_id(&self) -> &str;
}

pub struct Interpolator<'a, S: VariableSource> {
    source: &'a S,
}

impl<'a, S: VariableSource> Interpolator<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Self { source }
    }

    /// Replace every `{{ expr }}` token in `template` with its resolved,
    /// stringified value. A template with no tokens is returned unchanged.
    pub fn interpolate(&self, template: &str) -> Result<String, WorkflowError> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        loop {
            let Some(start) = rest.find("{{") else {
                out.push_str(rest);
                break;
            };
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find("}}") else {
                // Unterminated `{{` — copy verbatim rather than silently drop.
                out.push_str(&rest[start..]);
                break;
            };
            let expr = after[..end].trim();
            let resolved = self.resolve(expr)?;
            out.push_str(&value::stringify(&resolved));
            rest = &after[end + 2..];
        }
        Ok(out)
    }

    /// Resolve a single expression (built-in, variable, or dotted path) to a value.
    pub fn resolve(&self, expr: &str) -> Result<Value, WorkflowError> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Err(WorkflowError::Interpolation {
                expression: expr.to_string(),
                reason: "empty expression".to_string(),
            });
        }
        if let Some(builtin) = resolve_builtin(expr, self.source) {
            return Ok(builtin);
        }

        let mut parts = expr.split('.');
        let head = parts.next().unwrap();
        let mut value = self
            .source
            .lookup_variable(head)
            .or_else(|| self.source.lookup_step_result(head))
            .ok_or_else(|| WorkflowError::Interpolation {
                expression: expr.to_string(),
                reason: format!("unknown name `{head}`"),
            })?;

        for part in parts {
            value = descend(&value, part).ok_or_else(|| WorkflowError::Interpolation {
                expression: expr.to_string(),
                reason: format!("no field/index `{part}` on resolved value"),
            })?;
        }
        Ok(value)
    }

    /// Parse and evaluate `LHS OP RHS` with OP in {==, !=, >=, <=, >, <},
    /// longest-operator-first. A bare expression (no operator found) is a
    /// truthiness check after interpolation.
    pub fn evaluate(&self, condition: &str) -> Result<bool, WorkflowError> {
        let condition = condition.trim();
        let interpolated = self.interpolate(condition)?;
        let trimmed = interpolated.trim();

        const OPS: &[&str] = &["==", "!=", ">=", "<=", ">", "<"];
        for op in OPS {
            if let Some(idx) = find_operator(trimmed, op) {
                let lhs = trimmed[..idx].trim();
                let rhs = trimmed[idx + op.len()..].trim();
                let lhs_val = value::parse_literal(lhs);
                let rhs_val = value::parse_literal(rhs);
                return Ok(compare(&lhs_val, &rhs_val, op));
            }
        }

        Ok(value::is_truthy(&value::parse_literal(trimmed)))
    }
}

fn find_operator(s: &str, op: &str) -> Option<usize> {
    // Skip a leading `=`/`!`/`<`/`>` that is itself part of an already-checked
    // longer operator by searching left-to-right for the first exact match.
    s.find(op)
}

fn compare(lhs: &Value, rhs: &Value, op: &str) -> bool {
    use std::cmp::Ordering;
    let ordering = numeric_ordering(lhs, rhs).unwrap_or_else(|| {
        value::stringify(lhs).cmp(&value::stringify(rhs))
    });
    match op {
        "==" => lhs == rhs || ordering == Ordering::Equal,
        "!=" => !(lhs == rhs) && ordering != Ordering::Equal,
        ">=" => ordering != Ordering::Less,
        "<=" => ordering != Ordering::Greater,
        ">" => ordering == Ordering::Greater,
        "<" => ordering == Ordering::Less,
        _ => false,
    }
}

fn numeric_ordering(lhs: &Value, rhs: &Value) -> Option<std::cmp::Ordering> {
    let l = lhs.as_f64()?;
    let r = rhs.as_f64()?;
    l.partial_cmp(&r)
}

fn descend(value: &Value, part: &str) -> Option<Value> {
    if let Ok(index) = part.parse::<usize>() {
        return value.get(index).cloned();
    }
    value.get(part).cloned()
}

fn resolve_builtin<S: VariableSource>(expr: &str, source: &S) -> Option<Value> {
    let now = Utc::now();
    match expr {
        "date" => Some(Value::String(now.format("%Y-%m-%d").to_string())),
        "time" => Some(Value::String(now.format("%H:%M:%S").to_string())),
        "timestamp" => Some(Value::String(now.to_rfc3339())),
        "year" => Some(Value::String(now.format("%Y").to_string())),
        "month" => Some(Value::String(now.format("%m").to_string())),
        "day" => Some(Value::String(now.format("%d").to_string())),
        "workflow" => Some(Value::String(source.workflow_name().to_string())),
        "run_id" => Some(Value::String(source.run_id().to_string())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    struct Fixture {
        variables: BTreeMap<String, Value>,
        step_results: BTreeMap<String, Value>,
        workflow: String,
        run_id: String,
    }

    impl VariableSource for Fixture {
        fn lookup_variable(&self, name: &str) -> Option<Value> {
            self.variables.get(name).cloned()
        }
        fn lookup_step_result(&self, name: &str) -> Option<Value> {
            self.step_results.get(name).cloned()
        }
        fn workflow_name(&self) -> &str {
            &self.workflow
        }
        fn run_id(&self) -> &str {
            &self.run_id
        }
    }

    fn fixture() -> Fixture {
        let mut variables = BTreeMap::new();
        variables.insert("count".to_string(), serde_json::json!(0));
        variables.insert("x".to_string(), Value::String("42".to_string()));
        let mut step_results = BTreeMap::new();
        step_results.insert(
            "a".to_string(),
            serde_json::json!({"stdout": "hi", "nested": {"field": "deep"}}),
        );
        Fixture {
            variables,
            step_results,
            workflow: "demo".to_string(),
            run_id: "run-1".to_string(),
        }
    }

    #[test]
    fn no_tokens_returns_template_unchanged() {
        let fx = fixture();
        let interp = Interpolator::new(&fx);
        assert_eq!(interp.interpolate("plain text").unwrap(), "plain text");
    }

    #[test]
    fn interpolates_variable() {
        let fx = fixture();
        let interp = Interpolator::new(&fx);
        assert_eq!(interp.interpolate("val={{x}}").unwrap(), "val=42");
    }

    #[test]
    fn interpolates_dotted_step_result_path() {
        let fx = fixture();
        let interp = Interpolator::new(&fx);
        assert_eq!(interp.interpolate("{{a.stdout}}").unwrap(), "hi");
        assert_eq!(interp.interpolate("{{a.nested.field}}").unwrap(), "deep");
    }

    #[test]
    fn unknown_name_is_an_error() {
        let fx = fixture();
        let interp = Interpolator::new(&fx);
        assert!(interp.interpolate("{{missing}}").is_err());
    }

    #[test]
    fn condition_skip_on_false() {
        let fx = fixture();
        let interp = Interpolator::new(&fx);
        assert!(!interp.evaluate("{{count}} > 0").unwrap());
    }

    #[test]
    fn bare_expression_is_truthiness() {
        let fx = fixture();
        let interp = Interpolator::new(&fx);
        assert!(interp.evaluate("{{x}}").unwrap());
    }

    #[test]
    fn longest_operator_matches_first() {
        let fx = fixture();
        let interp = Interpolator::new(&fx);
        assert!(interp.evaluate("5 >= 5").unwrap());
        assert!(!interp.evaluate("5 > 5").unwrap());
    }

    #[test]
    fn multibyte_literal_text_survives_interpolation() {
        let fx = fixture();
        let interp = Interpolator::new(&fx);
        assert_eq!(
            interp.interpolate("café {{x}} 日本語").unwrap(),
            "café 42 日本語"
        );
    }
}
