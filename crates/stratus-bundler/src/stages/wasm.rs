use anyhow::Context;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::context::BuildContext;
use crate::pipeline::{Loaded, Stage};

/// Inlines `.wasm` imports as base64 and instantiates them on first use.
#[derive(Debug, Default)]
pub struct WasmStage;

fn wasm_module(bytes: &[u8]) -> String {
    format!(
        r#"const source = "{data}";
let instance;
export default async function init(imports = {{}}) {{
  if (!instance) {{
    const buffer = Uint8Array.from(atob(source), c => c.charCodeAt(0));
    instance = (await WebAssembly.instantiate(buffer, imports)).instance;
  }}
  return instance.exports;
}}"#,
        data = STANDARD.encode(bytes)
    )
}

#[async_trait]
impl Stage for WasmStage {
    fn name(&self) -> &'static str {
        "wasm"
    }

    async fn load(&self, _ctx: &BuildContext, id: &str) -> anyhow::Result<Option<Loaded>> {
        if id.starts_with('\0') || !id.ends_with(".wasm") {
            return Ok(None);
        }
        let bytes = tokio::fs::read(id)
            .await
            .with_context(|| format!("Failed to read WebAssembly module {id}"))?;
        Ok(Some(Loaded::js(wasm_module(&bytes))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embeds_base64_payload() {
        let code = wasm_module(&[0, 97, 115, 109]);
        assert!(code.contains(r#"const source = "AGFzbQ==";"#));
        assert!(code.contains("WebAssembly.instantiate"));
    }
}
