//! Diagnostic extraction from Rolldown errors.
//!
//! Rolldown's batched errors are only reachable through their `Debug`
//! output, so the extraction here is string based. Keeping it in one place
//! insulates the rest of the crate from upstream formatting changes.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static PLUGIN_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"stratus:[\w-]+").expect("valid plugin regex"));
static FILE_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"["' ]((?:/|[A-Za-z]:\\|\./)[^"'\s,]+\.(?:[cm]?[jt]sx?|json))"#)
        .expect("valid path regex")
});
static LOCATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r":(\d+):(\d+)").expect("valid location regex"));

/// A diagnostic in a cloneable, serializable form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedDiagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub help: Option<String>,
    #[serde(default)]
    pub error_chain: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    MissingExport,
    ParseError,
    CircularDependency,
    UnresolvedEntry,
    UnresolvedImport,
    /// A stage hook failed; carries the stage name when it could be read.
    Plugin(Option<String>),
    Transform,
    Other,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticKind::MissingExport => f.write_str("MissingExport"),
            DiagnosticKind::ParseError => f.write_str("ParseError"),
            DiagnosticKind::CircularDependency => f.write_str("CircularDependency"),
            DiagnosticKind::UnresolvedEntry => f.write_str("UnresolvedEntry"),
            DiagnosticKind::UnresolvedImport => f.write_str("UnresolvedImport"),
            DiagnosticKind::Plugin(Some(name)) => write!(f, "Plugin({name})"),
            DiagnosticKind::Plugin(None) => f.write_str("Plugin"),
            DiagnosticKind::Transform => f.write_str("Transform"),
            DiagnosticKind::Other => f.write_str("Error"),
        }
    }
}

/// Extracts diagnostics from a Rolldown error value.
pub fn extract_from_rolldown_error(error: &dyn fmt::Debug) -> Vec<ExtractedDiagnostic> {
    let text = format!("{error:?}");
    let parts: Vec<&str> = text
        .split("BatchedBuildDiagnostic")
        .filter(|s| !s.trim().is_empty() && s.trim() != "[" && s.trim() != "]")
        .collect();

    if parts.len() > 1 {
        parts.into_iter().map(extract_single).collect()
    } else {
        vec![extract_single(&text)]
    }
}

fn extract_single(text: &str) -> ExtractedDiagnostic {
    let kind = classify(text);
    let file = FILE_PATH.captures(text).map(|c| c[1].to_string());
    let (line, column) = LOCATION
        .captures(text)
        .map(|c| (c[1].parse().ok(), c[2].parse().ok()))
        .unwrap_or((None, None));

    ExtractedDiagnostic {
        help: help_for(&kind, text),
        kind,
        message: text.trim().to_string(),
        file,
        line,
        column,
        error_chain: extract_error_chain(text),
    }
}

fn classify(text: &str) -> DiagnosticKind {
    if text.contains("MissingExport") {
        DiagnosticKind::MissingExport
    } else if text.contains("externals are not allowed")
        || text.contains("UnresolvedImport")
        || text.contains("Cannot resolve")
        || text.contains("Could not resolve")
    {
        DiagnosticKind::UnresolvedImport
    } else if text.contains("UnresolvedEntry") {
        DiagnosticKind::UnresolvedEntry
    } else if text.contains("Parse error") || text.contains("Syntax") || text.contains("Expected")
    {
        DiagnosticKind::ParseError
    } else if text.contains("Circular") {
        DiagnosticKind::CircularDependency
    } else if text.contains("Plugin") || text.contains("stratus:") {
        DiagnosticKind::Plugin(PLUGIN_NAME.find(text).map(|m| m.as_str().to_string()))
    } else if text.contains("Transform") || text.contains("transform") {
        DiagnosticKind::Transform
    } else {
        DiagnosticKind::Other
    }
}

fn help_for(kind: &DiagnosticKind, text: &str) -> Option<String> {
    for indicator in ["help: ", "Help: ", "hint: ", "Hint: "] {
        if let Some(pos) = text.find(indicator) {
            let help = text[pos + indicator.len()..].lines().next().unwrap_or("").trim();
            if !help.is_empty() {
                return Some(help.to_string());
            }
        }
    }

    match kind {
        DiagnosticKind::UnresolvedImport if text.contains("externals are not allowed") => Some(
            "This preset bundles everything. Install the dependency or alias it to a local module."
                .to_string(),
        ),
        DiagnosticKind::UnresolvedImport => {
            Some("Check that the module is installed and the import path is correct.".to_string())
        }
        DiagnosticKind::UnresolvedEntry => {
            Some("Check the `entry` option of your preset.".to_string())
        }
        _ => None,
    }
}

fn extract_error_chain(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim();
            line.find("Caused by:")
                .map(|pos| line[pos + "Caused by:".len()..].trim().to_string())
        })
        .filter(|cause| !cause.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Raw(&'static str);

    impl fmt::Debug for Raw {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.0)
        }
    }

    #[test]
    fn classifies_no_externals_failure() {
        let diags = extract_from_rolldown_error(&Raw(
            "Plugin stratus:no-externals: Cannot resolve \"lodash\" from \"/app/routes/a.ts\" and externals are not allowed!",
        ));
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].kind, DiagnosticKind::UnresolvedImport);
        assert_eq!(diags[0].file.as_deref(), Some("/app/routes/a.ts"));
        assert!(diags[0].help.as_deref().unwrap().contains("bundles everything"));
    }

    #[test]
    fn reads_plugin_name_and_location() {
        let diags = extract_from_rolldown_error(&Raw(
            "Plugin error in stratus:raw at '/src/a.ts:3:14'\nCaused by: file missing",
        ));
        assert_eq!(diags[0].kind, DiagnosticKind::Plugin(Some("stratus:raw".to_string())));
        assert_eq!(diags[0].line, Some(3));
        assert_eq!(diags[0].column, Some(14));
        assert_eq!(diags[0].error_chain, vec!["file missing".to_string()]);
    }

    #[test]
    fn splits_batched_diagnostics() {
        let diags = extract_from_rolldown_error(&Raw(
            "[BatchedBuildDiagnostic Parse error a, BatchedBuildDiagnostic MissingExport b]",
        ));
        assert_eq!(diags.len(), 2);
    }
}
