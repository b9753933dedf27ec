//! Build-time text substitution.
//!
//! Matches are literal. A key that starts or ends with an identifier
//! character only matches on an identifier boundary, a key ending in an
//! identifier character never matches in front of a `.`, and a match
//! followed by an assignment is left alone.

use async_trait::async_trait;
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use serde_json::{Value, json};
use stratus_config::Options;

use crate::context::BuildContext;
use crate::pipeline::{Stage, Transformed};

/// Modules containing this marker are never rewritten.
pub const NO_REPLACE_MARKER: &str = "ROLLUP_NO_REPLACE";

const IMPORT_META_DELIMITERS: [&str; 7] = [".", ";", ")", "[", "]", "}", " "];
const GLOBAL_DELIMITERS: [&str; 7] = [";", "(", "{", "}", " ", "\t", "\n"];

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

/// A compiled set of literal replacements.
#[derive(Debug, Clone)]
pub struct Replacer {
    /// Keys grouped by first byte, longest first within a group.
    by_first: FxHashMap<u8, Vec<(String, String)>>,
}

impl Replacer {
    pub fn new(values: IndexMap<String, String>) -> Self {
        let mut by_first: FxHashMap<u8, Vec<(String, String)>> = FxHashMap::default();
        for (key, value) in values {
            if let Some(&first) = key.as_bytes().first() {
                by_first.entry(first).or_default().push((key, value));
            }
        }
        for keys in by_first.values_mut() {
            keys.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        }
        Self { by_first }
    }

    /// Values every server build substitutes, followed by the user's own.
    pub fn for_options(options: &Options) -> Self {
        let mut values = IndexMap::new();
        values.insert("typeof window".to_string(), "\"undefined\"".to_string());
        for d in IMPORT_META_DELIMITERS {
            values.insert(format!("import.meta{d}"), format!("globalThis._importMeta_{d}"));
        }
        for d in GLOBAL_DELIMITERS {
            values.insert(format!("{d}global."), format!("{d}globalThis."));
        }

        let env: [(&str, Value); 6] = [
            ("NODE_ENV", json!(options.node_env())),
            ("server", json!(true)),
            ("client", json!(false)),
            ("dev", json!(options.dev.to_string())),
            ("RUNTIME_CONFIG", options.runtime_config.clone()),
            ("DEBUG", json!(options.dev)),
        ];
        for (key, value) in &env {
            values.insert(format!("process.env.{key}"), value.to_string());
        }
        for (key, value) in &env {
            values.insert(format!("import.meta.env.{key}"), value.to_string());
        }

        for (key, value) in &options.replace {
            values.insert(key.clone(), value.clone());
        }
        Self::new(values)
    }

    fn match_at<'a>(&'a self, code: &str, at: usize) -> Option<(&'a str, &'a str)> {
        let bytes = code.as_bytes();
        let candidates = self.by_first.get(&bytes[at])?;
        candidates.iter().find_map(|(key, value)| {
            if !code[at..].starts_with(key.as_str()) {
                return None;
            }
            let key_bytes = key.as_bytes();
            let end = at + key_bytes.len();

            if is_ident_byte(key_bytes[0]) && at > 0 && is_ident_byte(bytes[at - 1]) {
                return None;
            }
            if is_ident_byte(key_bytes[key_bytes.len() - 1]) {
                if let Some(&next) = bytes.get(end) {
                    if is_ident_byte(next) || next == b'.' {
                        return None;
                    }
                }
            }
            let rest = code[end..].trim_start();
            if rest.starts_with('=') && !rest.starts_with("==") && !rest.starts_with("=>") {
                return None;
            }
            Some((key.as_str(), value.as_str()))
        })
    }

    /// Returns `None` when nothing matched.
    pub fn apply(&self, code: &str) -> Option<String> {
        let mut out = String::with_capacity(code.len());
        let mut copied = 0;
        let mut at = 0;
        let mut changed = false;

        while at < code.len() {
            if !code.is_char_boundary(at) {
                at += 1;
                continue;
            }
            match self.match_at(code, at) {
                Some((key, value)) => {
                    out.push_str(&code[copied..at]);
                    out.push_str(value);
                    at += key.len();
                    copied = at;
                    changed = true;
                }
                None => at += 1,
            }
        }

        changed.then(|| {
            out.push_str(&code[copied..]);
            out
        })
    }
}

/// Substitutes environment references and configured literals.
#[derive(Debug)]
pub struct ReplaceStage {
    replacer: Replacer,
}

impl ReplaceStage {
    pub fn new(ctx: &BuildContext) -> Self {
        Self {
            replacer: Replacer::for_options(&ctx.options),
        }
    }
}

#[async_trait]
impl Stage for ReplaceStage {
    fn name(&self) -> &'static str {
        "replace"
    }

    async fn transform(
        &self,
        _ctx: &BuildContext,
        _id: &str,
        code: &str,
    ) -> anyhow::Result<Option<Transformed>> {
        if code.contains(NO_REPLACE_MARKER) {
            return Ok(None);
        }
        Ok(self.replacer.apply(code).map(Transformed::from))
    }
}
