use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use super::replace::NO_REPLACE_MARKER;
use crate::Result;
use crate::context::BuildContext;
use crate::pipeline::{RenderedChunk, Stage};

static IMPORT_META: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"import\.meta|globalThis\._importMeta_").expect("import.meta regex is valid")
});

const REF: &str = "globalThis._importMeta_";

/// Defines `globalThis._importMeta_`, the target of rewritten `import.meta`.
///
/// Entry chunks assign it; other chunks only default it.
#[derive(Debug, Default)]
pub struct ImportMetaStage;

#[async_trait]
impl Stage for ImportMetaStage {
    fn name(&self) -> &'static str {
        "import-meta"
    }

    fn render_chunk(&self, ctx: &BuildContext, chunk: &RenderedChunk) -> Result<Option<String>> {
        let code = &chunk.code;
        if !chunk.is_entry && (!IMPORT_META.is_match(code) || code.contains(NO_REPLACE_MARKER)) {
            return Ok(None);
        }

        let node = ctx.options.node;
        let url = if node && chunk.is_entry {
            "import.meta.url"
        } else {
            "\"file:///_entry.js\""
        };
        let env = if node { "process.env" } else { "{}" };
        let stub = format!("{{url:{url},env:{env}}}");
        let init = if chunk.is_entry {
            format!("{REF}={stub};")
        } else {
            format!("{REF}={REF}||{stub};")
        };
        Ok(Some(format!("{init}{code}")))
    }
}
