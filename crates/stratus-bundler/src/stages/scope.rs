//! Lexical identifier scan used by the import-injecting stages.
//!
//! Not a parser: strings and comments are blanked out, then identifiers are
//! classified by the token before them. Good enough to decide whether a
//! well-known global is referenced and not already bound.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

static IDENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z_$][\w$]*").expect("identifier regex is valid"));

static DECLARATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:const|let|var|function\*?|class)\s+([A-Za-z_$][\w$]*)")
        .expect("declaration regex is valid")
});

static IMPORT_CLAUSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bimport\s+([^'\x22;]+?)\s+from\b").expect("import clause regex is valid")
});

/// Replaces string, template and comment contents with spaces.
fn blank_literals(code: &str) -> String {
    let mut out = String::with_capacity(code.len());
    let mut chars = code.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '/' if chars.peek() == Some(&'/') => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = ' ';
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
                out.push(' ');
            }
            '"' | '\'' | '`' => {
                out.push(c);
                let mut escaped = false;
                for next in chars.by_ref() {
                    if escaped {
                        escaped = false;
                        continue;
                    }
                    if next == '\\' {
                        escaped = true;
                        continue;
                    }
                    if next == c {
                        break;
                    }
                }
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

/// Names bound at module level by declarations or imports.
pub fn declared_names(code: &str) -> HashSet<String> {
    let code = blank_literals(code);
    let mut names: HashSet<String> = DECLARATION
        .captures_iter(&code)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .collect();

    for caps in IMPORT_CLAUSE.captures_iter(&code) {
        let Some(clause) = caps.get(1) else {
            continue;
        };
        for binding in clause.as_str().split([',', '{', '}']) {
            let binding = binding.trim();
            let local = binding.rsplit(" as ").next().unwrap_or(binding).trim();
            if IDENT.find(local).is_some_and(|m| m.as_str() == local) {
                names.insert(local.to_string());
            }
        }
    }
    names
}

/// Identifiers read as free variables: not property accesses, not object
/// keys, not declared in `code`.
pub fn free_references(code: &str) -> HashSet<String> {
    let declared = declared_names(code);
    let blanked = blank_literals(code);
    let bytes = blanked.as_bytes();

    IDENT
        .find_iter(&blanked)
        .filter(|m| {
            let before = blanked[..m.start()].trim_end();
            if before.ends_with('.') && !before.ends_with("...") {
                return false;
            }
            let after = blanked[m.end()..].trim_start();
            let is_key = after.starts_with(':') && !after.starts_with("::");
            // `{ a: 1 }` keys; a ternary `x ? a : b` keeps `a`.
            !(is_key && before.ends_with(['{', ',']))
        })
        .filter(|m| m.start() == 0 || !matches!(bytes[m.start() - 1], b'#'))
        .map(|m| m.as_str().to_string())
        .filter(|name| !declared.contains(name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declarations_and_imports_bind() {
        let code = "import a, { b as c, d } from 'x'\nconst e = 1; function f() {} class G {}";
        let names = declared_names(code);
        for name in ["a", "c", "d", "e", "f", "G"] {
            assert!(names.contains(name), "{name} missing");
        }
        assert!(!names.contains("b"));
    }

    #[test]
    fn free_references_skip_members_keys_and_strings() {
        let code = r#"
            // useStorage in a comment
            const msg = "defineEventHandler in a string";
            export default defineEventHandler(() => ({ useQuery: 1, value: obj.useBody }));
        "#;
        let refs = free_references(code);
        assert!(refs.contains("defineEventHandler"));
        assert!(!refs.contains("useStorage"));
        assert!(!refs.contains("useQuery"));
        assert!(!refs.contains("useBody"));
        assert!(!refs.contains("msg"));
    }
}
