// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Placeholder evaluation over parsed manifest documents.
//!
//! Supported syntax inside string scalars:
//! - `{{ .Values.a.b }}` looks up a path in the render context
//! - `{{ .Values.a | default .Release.Name }}` falls back when the value is empty
//! - `{{ .Values.a | required "a is required" }}` fails when the value is empty
//!
//! A scalar consisting of a single placeholder takes the looked-up value with its type;
//! a `null` result removes the surrounding map entry or list element.

use serde_json::{Map, Value};

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Top-level document key that makes emission conditional on a truthy path
pub const RENDER_IF_KEY: &str = "renderIf";

/// Render all placeholders in `value`; `Ok(None)` means the value was removed
pub fn render_value(value: &Value, ctx: &Value) -> Result<Option<Value>, String> {
    match value {
        Value::String(s) => render_string(s, ctx),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                if let Some(rendered) = render_value(item, ctx)? {
                    out.push(rendered);
                }
            }
            Ok(Some(Value::Array(out)))
        }
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, item) in map {
                if let Some(rendered) = render_value(item, ctx)? {
                    out.insert(key.clone(), rendered);
                }
            }
            Ok(Some(Value::Object(out)))
        }
        other => Ok(Some(other.clone())),
    }
}

fn render_string(s: &str, ctx: &Value) -> Result<Option<Value>, String> {
    if !s.contains(OPEN) {
        return Ok(Some(Value::String(s.to_string())));
    }

    let trimmed = s.trim();
    if trimmed.starts_with(OPEN)
        && trimmed.ends_with(CLOSE)
        && trimmed.matches(OPEN).count() == 1
    {
        let expr = &trimmed[OPEN.len()..trimmed.len() - CLOSE.len()];
        let value = eval(expr, ctx)?;
        return Ok(if value.is_null() { None } else { Some(value) });
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find(OPEN) {
        out.push_str(&rest[..start]);
        let after = &rest[start + OPEN.len()..];
        let end = after
            .find(CLOSE)
            .ok_or_else(|| format!("unterminated placeholder in {:?}", s))?;
        out.push_str(&to_text(&eval(&after[..end], ctx)?));
        rest = &after[end + CLOSE.len()..];
    }
    out.push_str(rest);
    Ok(Some(Value::String(out)))
}

/// Evaluate `term ( | func arg? )*`
fn eval(expr: &str, ctx: &Value) -> Result<Value, String> {
    let mut stages = expr.split('|').map(str::trim);
    let head = stages.next().unwrap_or_default();
    let mut value = eval_term(head, ctx)?;

    for stage in stages {
        let (func, arg) = match stage.split_once(char::is_whitespace) {
            Some((func, arg)) => (func, arg.trim()),
            None => (stage, ""),
        };
        value = match func {
            "default" => {
                if is_truthy(&value) {
                    value
                } else {
                    eval_term(arg, ctx)?
                }
            }
            "required" => {
                if is_truthy(&value) {
                    value
                } else {
                    let message = match eval_term(arg, ctx)? {
                        Value::String(m) => m,
                        _ => format!("required value missing in {{{{{}}}}}", expr),
                    };
                    return Err(message);
                }
            }
            other => return Err(format!("unsupported function {:?} in {:?}", other, expr)),
        };
    }

    Ok(value)
}

fn eval_term(term: &str, ctx: &Value) -> Result<Value, String> {
    if term.is_empty() {
        return Err("empty expression".to_string());
    }
    if term.starts_with('.') {
        return Ok(lookup(term, ctx).cloned().unwrap_or(Value::Null));
    }
    if let Some(literal) = term.strip_prefix('"').and_then(|t| t.strip_suffix('"')) {
        return Ok(Value::String(literal.to_string()));
    }
    serde_json::from_str(term).map_err(|_| format!("cannot evaluate {:?}", term))
}

/// Resolve a dotted path such as `.Values.image.tag`
pub fn lookup<'a>(path: &str, ctx: &'a Value) -> Option<&'a Value> {
    path.trim()
        .split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(ctx, |current, segment| current.get(segment))
}

/// Empty values are falsy: null, false, zero, empty strings and empty collections
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> Value {
        json!({
            "Values": {
                "replicaCount": 3,
                "image": {"repository": "ghcr.io/sap/rci", "tag": ""},
                "selector": null,
                "labels": {"a": "b"}
            },
            "Release": {"Name": "injector", "Namespace": "rci-system"},
            "Chart": {"AppVersion": "v0.1.0"}
        })
    }

    #[test]
    fn test_whole_placeholder_keeps_type() {
        let out = render_value(&json!("{{ .Values.replicaCount }}"), &ctx()).unwrap();
        assert_eq!(out, Some(json!(3)));

        let out = render_value(&json!("{{ .Values.labels }}"), &ctx()).unwrap();
        assert_eq!(out, Some(json!({"a": "b"})));
    }

    #[test]
    fn test_null_placeholder_removes_entry() {
        let doc = json!({"keep": "x", "selector": "{{ .Values.selector }}", "missing": "{{ .Values.nope }}"});
        let out = render_value(&doc, &ctx()).unwrap().unwrap();
        assert_eq!(out, json!({"keep": "x"}));
    }

    #[test]
    fn test_null_placeholder_removes_list_element() {
        let doc = json!(["a", "{{ .Values.selector }}", "b"]);
        let out = render_value(&doc, &ctx()).unwrap().unwrap();
        assert_eq!(out, json!(["a", "b"]));
    }

    #[test]
    fn test_interpolation_with_default() {
        let out = render_value(
            &json!("{{ .Values.image.repository }}:{{ .Values.image.tag | default .Chart.AppVersion }}"),
            &ctx(),
        )
        .unwrap();
        assert_eq!(out, Some(json!("ghcr.io/sap/rci:v0.1.0")));
    }

    #[test]
    fn test_interpolation_of_numbers_and_nulls() {
        let out = render_value(&json!("-v={{ .Values.replicaCount }} x={{ .Values.selector }}"), &ctx()).unwrap();
        assert_eq!(out, Some(json!("-v=3 x=")));
    }

    #[test]
    fn test_default_with_literal() {
        let out = render_value(&json!("{{ .Values.image.tag | default \"latest\" }}"), &ctx()).unwrap();
        assert_eq!(out, Some(json!("latest")));
    }

    #[test]
    fn test_required_fails_on_empty() {
        let err = render_value(
            &json!("{{ .Values.image.tag | required \"image.tag is required\" }}"),
            &ctx(),
        )
        .unwrap_err();
        assert_eq!(err, "image.tag is required");
    }

    #[test]
    fn test_unterminated_placeholder() {
        let err = render_value(&json!("prefix {{ .Values.replicaCount"), &ctx()).unwrap_err();
        assert!(err.contains("unterminated"));
    }

    #[test]
    fn test_unsupported_function() {
        let err = render_value(&json!("{{ .Values.replicaCount | upper }}"), &ctx()).unwrap_err();
        assert!(err.contains("unsupported function"));
    }

    #[test]
    fn test_plain_strings_untouched() {
        let out = render_value(&json!("no placeholders"), &ctx()).unwrap();
        assert_eq!(out, Some(json!("no placeholders")));
    }

    #[test]
    fn test_truthiness() {
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!({})));
        assert!(is_truthy(&json!("x")));
        assert!(is_truthy(&json!([1])));
    }
}
