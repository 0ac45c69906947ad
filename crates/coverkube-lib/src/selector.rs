//! Render a Deployment's `LabelSelector` as a list-query selector string

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;

use crate::error::{Error, Result};

/// Convert a structured selector to the `key=value,key in (a,b)` syntax.
///
/// Requirements are emitted sorted by key, match labels first. An empty
/// selector renders as an empty string, which matches everything.
pub fn selector_string(selector: &LabelSelector) -> Result<String> {
    let mut parts = Vec::new();

    if let Some(labels) = &selector.match_labels {
        // BTreeMap iteration is already key-ordered
        for (key, value) in labels {
            parts.push(format!("{}={}", key, value));
        }
    }

    let mut expressions: Vec<_> = selector.match_expressions.iter().flatten().collect();
    expressions.sort_by(|a, b| a.key.cmp(&b.key));

    for expr in expressions {
        let mut values = expr.values.clone().unwrap_or_default();
        values.sort();

        let requirement = match expr.operator.as_str() {
            "In" | "NotIn" if values.is_empty() => {
                return Err(Error::validation(format!(
                    "selector operator {} on key {} requires at least one value",
                    expr.operator, expr.key
                )));
            }
            "In" => format!("{} in ({})", expr.key, values.join(",")),
            "NotIn" => format!("{} notin ({})", expr.key, values.join(",")),
            "Exists" => expr.key.clone(),
            "DoesNotExist" => format!("!{}", expr.key),
            other => {
                return Err(Error::validation(format!(
                    "unsupported selector operator {:?} on key {}",
                    other, expr.key
                )));
            }
        };
        parts.push(requirement);
    }

    Ok(parts.join(","))
}
