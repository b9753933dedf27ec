//! `{{ key.path }}` expansion and path resolution against the option tree.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use indexmap::IndexMap;
use path_clean::PathClean;
use regex::Regex;
use serde_json::Value;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([\w.]+)\s*\}\}").expect("valid placeholder regex"));

/// Replaces `{{ dotted.key }}` placeholders with string values from `ctx`.
///
/// Unknown keys are left in place and logged.
pub fn expand(template: &str, ctx: &Value) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures<'_>| {
            let key = &caps[1];
            match lookup(ctx, key) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                Some(Value::Bool(b)) => b.to_string(),
                _ => {
                    tracing::warn!(key, template, "cannot resolve template param");
                    caps[0].to_string()
                }
            }
        })
        .into_owned()
}

fn lookup<'a>(ctx: &'a Value, dotted: &str) -> Option<&'a Value> {
    dotted.split('.').try_fold(ctx, |value, key| value.get(key))
}

/// Expands templates, substitutes the first matching alias prefix, and
/// resolves the result against `base`.
pub fn resolve_path(
    raw: &str,
    ctx: &Value,
    alias: &IndexMap<String, String>,
    base: &Path,
) -> PathBuf {
    let mut path = expand(raw, ctx);
    for (prefix, target) in alias {
        if let Some(rest) = path.strip_prefix(prefix.as_str()) {
            path = format!("{target}{rest}");
            break;
        }
    }
    absolute(base, Path::new(&path))
}

/// Joins `path` onto `base` unless it is already absolute, then cleans it.
pub fn absolute(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf().clean()
    } else {
        base.join(path).clean()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn expands_nested_keys() {
        let ctx = json!({"rootDir": "/app", "output": {"dir": "/app/.output"}});
        assert_eq!(expand("{{ rootDir }}/.stratus", &ctx), "/app/.stratus");
        assert_eq!(expand("{{output.dir}}/server", &ctx), "/app/.output/server");
    }

    #[test]
    fn unknown_placeholder_is_kept() {
        assert_eq!(expand("{{ missing }}/x", &json!({})), "{{ missing }}/x");
    }

    #[test]
    fn alias_prefix_is_substituted() {
        let mut alias = IndexMap::new();
        alias.insert("#internal/stratus".to_string(), "/rt".to_string());
        let resolved = resolve_path(
            "#internal/stratus/entries/node",
            &json!({}),
            &alias,
            Path::new("/src"),
        );
        assert_eq!(resolved, PathBuf::from("/rt/entries/node"));
    }

    #[test]
    fn relative_paths_resolve_against_base() {
        let resolved = resolve_path("../out", &json!({}), &IndexMap::new(), Path::new("/a/b"));
        assert_eq!(resolved, PathBuf::from("/a/out"));
    }
}
