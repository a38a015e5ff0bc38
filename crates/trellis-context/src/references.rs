//! Static extraction of template references.
//!
//! Used before resolution to compute a configuration's implicit
//! cross-module and cross-provider prerequisites.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::template::{parse_template, Segment, TemplateEngine};

/// Collect every dotted path referenced by template expressions anywhere in
/// `value`. Expressions with nested interpolation contribute their inner
/// references; the outer path is not statically known and is skipped.
pub fn collect_template_references(value: &Value) -> BTreeSet<Vec<String>> {
    let mut out = BTreeSet::new();
    collect_value(value, &mut out);
    out
}

/// Names of modules referenced via `modules.<name>.…` paths.
pub fn module_template_references(value: &Value) -> BTreeSet<String> {
    collect_template_references(value)
        .into_iter()
        .filter(|path| path.len() >= 2 && path[0] == "modules")
        .map(|path| path[1].clone())
        .collect()
}

fn collect_value(value: &Value, out: &mut BTreeSet<Vec<String>>) {
    match value {
        Value::String(s) if TemplateEngine::contains_template(s) => collect_string(s, out),
        Value::Array(items) => {
            for item in items {
                collect_value(item, out);
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                collect_value(item, out);
            }
        }
        _ => {}
    }
}

fn collect_string(input: &str, out: &mut BTreeSet<Vec<String>>) {
    // Malformed templates are reported at resolution time, not here.
    let Ok(segments) = parse_template(input) else {
        return;
    };
    for segment in segments {
        if let Segment::Expression(expr) = segment {
            if TemplateEngine::contains_template(&expr) {
                collect_string(&expr, out);
            } else {
                let path: Vec<String> =
                    expr.split('.').map(|s| s.trim().to_string()).collect();
                if !path.is_empty() && path.iter().all(|s| !s.is_empty()) {
                    out.insert(path);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_collects_paths_from_nested_structures() {
        let value = json!({
            "command": "deploy ${modules.api.outputs.image}",
            "env": {
                "REGION": "${variables.region}",
            },
            "args": ["${modules.lib.version}", "plain"]
        });

        let refs = collect_template_references(&value);
        assert!(refs.contains(&vec![
            "modules".to_string(),
            "api".to_string(),
            "outputs".to_string(),
            "image".to_string()
        ]));
        assert!(refs.contains(&vec!["variables".to_string(), "region".to_string()]));
        assert!(refs.contains(&vec!["modules".to_string(), "lib".to_string(), "version".to_string()]));
        assert_eq!(refs.len(), 3);
    }

    #[test]
    fn test_nested_interpolation_contributes_inner_references() {
        let value = json!("${modules.${variables.target}.outputs.image}");
        let refs = collect_template_references(&value);
        assert!(refs.contains(&vec!["variables".to_string(), "target".to_string()]));
        // The outer path cannot be known statically.
        assert_eq!(refs.len(), 1);
    }

    #[test]
    fn test_module_references_filter() {
        let value = json!({
            "a": "${modules.api.outputs.image}",
            "b": "${modules.lib.path}",
            "c": "${variables.region}"
        });
        let modules = module_template_references(&value);
        assert_eq!(
            modules.into_iter().collect::<Vec<_>>(),
            vec!["api".to_string(), "lib".to_string()]
        );
    }
}
