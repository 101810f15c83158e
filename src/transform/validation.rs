// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Syntax checks for label selectors and object names.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;

const MAX_NAME_LEN: usize = 63;
const MAX_SUBDOMAIN_LEN: usize = 253;

/// Check a label selector the way the API server would before accepting it
pub fn validate_label_selector(field: &str, selector: &LabelSelector) -> Result<(), String> {
    if let Some(labels) = &selector.match_labels {
        for (key, value) in labels {
            validate_label_key(key).map_err(|e| format!("{}.matchLabels: {}", field, e))?;
            validate_label_value(value).map_err(|e| format!("{}.matchLabels[{}]: {}", field, key, e))?;
        }
    }

    for (i, expr) in selector.match_expressions.iter().flatten().enumerate() {
        let path = format!("{}.matchExpressions[{}]", field, i);
        validate_label_key(&expr.key).map_err(|e| format!("{}: {}", path, e))?;
        let values = expr.values.as_deref().unwrap_or_default();
        match expr.operator.as_str() {
            "In" | "NotIn" => {
                if values.is_empty() {
                    return Err(format!(
                        "{}: operator {} requires at least one value",
                        path, expr.operator
                    ));
                }
                for value in values {
                    validate_label_value(value).map_err(|e| format!("{}: {}", path, e))?;
                }
            }
            "Exists" | "DoesNotExist" => {
                if !values.is_empty() {
                    return Err(format!(
                        "{}: operator {} does not take values",
                        path, expr.operator
                    ));
                }
            }
            other => return Err(format!("{}: unknown operator {:?}", path, other)),
        }
    }

    Ok(())
}

/// `[prefix/]name`, prefix a DNS subdomain, name a qualified name segment
pub fn validate_label_key(key: &str) -> Result<(), String> {
    let name = match key.split_once('/') {
        Some((prefix, name)) => {
            validate_dns_subdomain(prefix)
                .map_err(|e| format!("invalid label key prefix {:?}: {}", key, e))?;
            name
        }
        None => key,
    };
    if name.is_empty() {
        return Err(format!("invalid label key {:?}: name part must not be empty", key));
    }
    validate_qualified_segment(name).map_err(|e| format!("invalid label key {:?}: {}", key, e))
}

pub fn validate_label_value(value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Ok(());
    }
    validate_qualified_segment(value).map_err(|e| format!("invalid label value {:?}: {}", value, e))
}

pub fn validate_dns_subdomain(name: &str) -> Result<(), String> {
    if name.is_empty() || name.len() > MAX_SUBDOMAIN_LEN {
        return Err(format!("must be 1-{} characters", MAX_SUBDOMAIN_LEN));
    }
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.');
    if !valid_chars || !starts_and_ends_alphanumeric(name) {
        return Err(
            "must consist of lower case alphanumeric characters, '-' or '.', and start and end with an alphanumeric character"
                .to_string(),
        );
    }
    Ok(())
}

fn validate_qualified_segment(s: &str) -> Result<(), String> {
    if s.len() > MAX_NAME_LEN {
        return Err(format!("must be no more than {} characters", MAX_NAME_LEN));
    }
    let valid_chars = s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
    if !valid_chars || !starts_and_ends_alphanumeric(s) {
        return Err(
            "must consist of alphanumeric characters, '-', '_' or '.', and start and end with an alphanumeric character"
                .to_string(),
        );
    }
    Ok(())
}

fn starts_and_ends_alphanumeric(s: &str) -> bool {
    let first = s.chars().next().is_some_and(|c| c.is_ascii_alphanumeric());
    let last = s.chars().last().is_some_and(|c| c.is_ascii_alphanumeric());
    first && last
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelectorRequirement;
    use std::collections::BTreeMap;

    fn requirement(key: &str, operator: &str, values: Option<Vec<&str>>) -> LabelSelectorRequirement {
        LabelSelectorRequirement {
            key: key.to_string(),
            operator: operator.to_string(),
            values: values.map(|v| v.into_iter().map(str::to_string).collect()),
        }
    }

    fn selector(exprs: Vec<LabelSelectorRequirement>) -> LabelSelector {
        LabelSelector {
            match_expressions: Some(exprs),
            match_labels: None,
        }
    }

    #[test]
    fn test_label_keys() {
        assert!(validate_label_key("app").is_ok());
        assert!(validate_label_key("app.kubernetes.io/name").is_ok());
        assert!(validate_label_key("-app").is_err());
        assert!(validate_label_key("Example.com/app").is_err());
        assert!(validate_label_key("example.com/").is_err());
        assert!(validate_label_key(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_label_values() {
        assert!(validate_label_value("").is_ok());
        assert!(validate_label_value("v1.2_beta").is_ok());
        assert!(validate_label_value("has space").is_err());
    }

    #[test]
    fn test_dns_subdomain() {
        assert!(validate_dns_subdomain("regcred").is_ok());
        assert!(validate_dns_subdomain("my.pull-secret").is_ok());
        assert!(validate_dns_subdomain("MySecret").is_err());
        assert!(validate_dns_subdomain("").is_err());
    }

    #[test]
    fn test_selector_with_match_labels() {
        let sel = LabelSelector {
            match_labels: Some(BTreeMap::from([(
                "inject".to_string(),
                "enabled".to_string(),
            )])),
            match_expressions: None,
        };
        assert!(validate_label_selector("objectSelector", &sel).is_ok());
    }

    #[test]
    fn test_selector_in_requires_values() {
        let sel = selector(vec![requirement("env", "In", Some(vec![]))]);
        let err = validate_label_selector("namespaceSelector", &sel).unwrap_err();
        assert!(err.contains("namespaceSelector.matchExpressions[0]"));
        assert!(err.contains("requires at least one value"));
    }

    #[test]
    fn test_selector_exists_rejects_values() {
        let sel = selector(vec![requirement("env", "Exists", Some(vec!["prod"]))]);
        assert!(validate_label_selector("objectSelector", &sel).is_err());
    }

    #[test]
    fn test_selector_unknown_operator() {
        let sel = selector(vec![requirement("env", "Matches", Some(vec!["prod"]))]);
        let err = validate_label_selector("objectSelector", &sel).unwrap_err();
        assert!(err.contains("unknown operator"));
    }

    #[test]
    fn test_selector_valid_expressions() {
        let sel = selector(vec![
            requirement("env", "NotIn", Some(vec!["kube-system"])),
            requirement("skip-injection", "DoesNotExist", None),
        ]);
        assert!(validate_label_selector("namespaceSelector", &sel).is_ok());
    }
}
