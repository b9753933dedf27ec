//! Type declarations for the project's typed API routes.

use std::path::Path;

use indexmap::IndexMap;
use serde_json::json;

use crate::assets::relative_path;
use crate::context::BuildContext;
use crate::stages::js_string;
use crate::{Error, Result};

/// `stratus.d.ts` contents mapping each route to its handler's return type.
pub fn declarations(ctx: &BuildContext) -> String {
    let types_dir = ctx.options.build_dir.join("types");
    let mut routes: IndexMap<&str, Vec<String>> = IndexMap::new();
    for handler in &ctx.handlers {
        if handler.route.is_empty() || !Path::new(&handler.handler).is_absolute() {
            continue;
        }
        let rel = relative_path(&types_dir, Path::new(&handler.handler));
        let rel = match rel.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() && ext.chars().all(|c| c.is_ascii_lowercase()) => {
                stem.to_string()
            }
            _ => rel,
        };
        routes
            .entry(handler.route.as_str())
            .or_default()
            .push(format!("Awaited<ReturnType<typeof import({}).default>>", js_string(&rel)));
    }

    let mut lines = vec![
        "// Generated by stratus".to_string(),
        "declare module 'stratus' {".to_string(),
        "  type Awaited<T> = T extends PromiseLike<infer U> ? Awaited<U> : T".to_string(),
        "  interface InternalApi {".to_string(),
    ];
    lines.extend(
        routes
            .iter()
            .map(|(route, types)| format!("    {}: {}", js_string(route), types.join(" | "))),
    );
    lines.push("  }".to_string());
    lines.push("}".to_string());
    lines.push("export {}".to_string());
    lines.join("\n")
}

/// The generated `tsconfig.json`.
pub fn ts_config(ctx: &BuildContext) -> serde_json::Value {
    let options = &ctx.options;
    let types_dir = options.build_dir.join("types");
    let runtime = options.runtime_dir.to_string_lossy().replace('\\', "/");

    let paths = if options.typescript.internal_paths {
        json!({
            "#internal/stratus": [format!("{runtime}/index")],
            "#internal/stratus/*": [format!("{runtime}/*")],
        })
    } else {
        json!({})
    };

    let mut include = vec![
        "./stratus.d.ts".to_string(),
        format!("{}/**/*", relative_path(&types_dir, &options.root_dir)),
    ];
    if options.src_dir != options.root_dir {
        include.push(format!("{}/**/*", relative_path(&types_dir, &options.src_dir)));
    }

    json!({
        "compilerOptions": {
            "target": "ESNext",
            "module": "ESNext",
            "moduleResolution": "Node",
            "allowJs": true,
            "resolveJsonModule": true,
            "paths": paths,
        },
        "include": include,
    })
}

/// Writes `buildDir/types/stratus.d.ts` and, unless disabled,
/// `buildDir/types/tsconfig.json`.
pub async fn write_types(ctx: &BuildContext) -> Result<()> {
    let dir = ctx.options.build_dir.join("types");
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| Error::io(format!("Failed to create {}", dir.display()), e))?;

    let dts = dir.join("stratus.d.ts");
    tokio::fs::write(&dts, declarations(ctx))
        .await
        .map_err(|e| Error::io(format!("Failed to write {}", dts.display()), e))?;

    if ctx.options.typescript.generate_ts_config {
        let path = dir.join("tsconfig.json");
        let json = serde_json::to_string_pretty(&ts_config(ctx))
            .map_err(|e| Error::WriteFailure(format!("tsconfig.json: {e}")))?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| Error::io(format!("Failed to write {}", path.display()), e))?;
    }
    tracing::debug!(dir = %dir.display(), "types written");
    Ok(())
}
