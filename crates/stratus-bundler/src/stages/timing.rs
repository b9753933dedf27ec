use async_trait::async_trait;

use super::js_string;
use crate::Result;
use crate::context::BuildContext;
use crate::pipeline::{OutputFile, RenderedChunk, Stage};

const TIMING: &str = "globalThis.__timing__";
const HELPER_FILE: &str = "timing.js";
const HELPER_IMPORT: &str = "import './timing.js';";

fn helper() -> String {
    let body = [
        "const start = () => Date.now();",
        "const end = s => Date.now() - s;",
        "const _s = {};",
        "const metrics = [];",
        "const logStart = id => { _s[id] = Date.now(); };",
        "const logEnd = id => { const t = end(_s[id]); delete _s[id]; metrics.push([id, t]); console.debug('>', id + ' (' + t + 'ms)'); };",
        &format!("{TIMING} = {{ start, end, metrics, logStart, logEnd }};"),
    ]
    .join("");
    format!("(function() {{ {body} }})();")
}

/// Wraps every chunk in start/end timing calls.
#[derive(Debug, Default)]
pub struct TimingStage;

#[async_trait]
impl Stage for TimingStage {
    fn name(&self) -> &'static str {
        "timing"
    }

    fn render_chunk(&self, _ctx: &BuildContext, chunk: &RenderedChunk) -> Result<Option<String>> {
        let name = chunk.name();
        let log_name = if name == "index" {
            "Stratus Start".to_string()
        } else {
            format!("Load {name}")
        };
        let log_name = js_string(&log_name);
        let prefix = if chunk.is_entry { HELPER_IMPORT } else { "" };
        // The chunk may end in a `//# sourceMappingURL` comment.
        Ok(Some(format!(
            "{prefix}{TIMING}.logStart({log_name});{code}\n;{TIMING}.logEnd({log_name});",
            code = chunk.code
        )))
    }

    fn emit_files(&self, _ctx: &BuildContext) -> Result<Vec<OutputFile>> {
        Ok(vec![OutputFile {
            file_name: HELPER_FILE.to_string(),
            contents: helper().into_bytes(),
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use stratus_config::{Environment, load_options};

    fn chunk(file_name: &str, is_entry: bool) -> RenderedChunk {
        RenderedChunk {
            file_name: file_name.to_string(),
            code: "run()".to_string(),
            is_entry,
            module_ids: Vec::new(),
            imports: Vec::new(),
        }
    }

    #[test]
    fn entry_imports_the_helper() {
        let dir = tempfile::tempdir().unwrap();
        let options = load_options(json!({}), &Environment::new(dir.path())).unwrap();
        let ctx = BuildContext::new(Arc::new(options), Vec::new());

        let entry = TimingStage.render_chunk(&ctx, &chunk("index.mjs", true)).unwrap().unwrap();
        assert_eq!(
            entry,
            "import './timing.js';globalThis.__timing__.logStart(\"Stratus Start\");run()\n;globalThis.__timing__.logEnd(\"Stratus Start\");"
        );

        let lazy = TimingStage
            .render_chunk(&ctx, &chunk("chunks/handlers/users.mjs", false))
            .unwrap()
            .unwrap();
        assert!(lazy.starts_with(r#"globalThis.__timing__.logStart("Load users");"#));

        let files = TimingStage.emit_files(&ctx).unwrap();
        assert_eq!(files[0].file_name, "timing.js");
        assert!(!String::from_utf8_lossy(&files[0].contents).contains('\n'));
    }

    #[test]
    fn source_map_comment_does_not_swallow_the_end_marker() {
        let dir = tempfile::tempdir().unwrap();
        let options =
            load_options(json!({ "sourceMap": true }), &Environment::new(dir.path())).unwrap();
        let ctx = BuildContext::new(Arc::new(options), Vec::new());
        let mut mapped = chunk("chunks/handlers/users.mjs", false);
        mapped.code = "run()\n//# sourceMappingURL=users.mjs.map".to_string();

        let code = TimingStage.render_chunk(&ctx, &mapped).unwrap().unwrap();
        let last = code.lines().last().unwrap();
        assert_eq!(last, r#";globalThis.__timing__.logEnd("Load users");"#);
    }
}
