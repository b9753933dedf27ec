use async_trait::async_trait;

use super::{ids, js_string, short_hash};
use crate::Result;
use crate::context::BuildContext;
use crate::pipeline::{Stage, StageOutput};

const SOURCE_MAP_POLYFILL: &str = "source-map-support/register.js";

/// Polyfills, user-declared virtual modules and the plugin list.
#[derive(Debug, Default)]
pub struct VirtualModulesStage;

fn polyfill_module(polyfills: &[String], source_map: bool) -> String {
    polyfills
        .iter()
        .map(String::as_str)
        .chain(source_map.then_some(SOURCE_MAP_POLYFILL))
        .map(|p| format!("import {};", js_string(p)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn plugins_module(plugins: &[String]) -> String {
    let imports: Vec<String> = plugins
        .iter()
        .map(|p| format!("import _{} from {};", short_hash(p), js_string(p)))
        .collect();
    let names: Vec<String> = plugins.iter().map(|p| format!("_{}", short_hash(p))).collect();
    format!(
        "\n{}\n\nexport const plugins = [\n  {}\n]\n    ",
        imports.join("\n"),
        names.join(",\n")
    )
}

#[async_trait]
impl Stage for VirtualModulesStage {
    fn name(&self) -> &'static str {
        "virtual"
    }

    fn contribute(&self, ctx: &BuildContext) -> Result<StageOutput> {
        let options = &ctx.options;
        let mut output = StageOutput::default()
            .module(ids::POLYFILL, polyfill_module(&options.polyfill, options.source_map));
        for (id, code) in &options.virtual_modules {
            output = output.module(id.clone(), code.clone());
        }
        Ok(output.module(ids::PLUGINS, plugins_module(&options.plugins)))
    }
}
