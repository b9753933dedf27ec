//! `stratus build`.

use std::time::Instant;

use serde_json::{Map, Value};

use crate::cli::BuildArgs;
use crate::commands::load_project;
use crate::error::Result;
use crate::ui;

/// Prepare the output tree, copy public assets, prerender, then bundle.
pub async fn execute(args: BuildArgs) -> Result<()> {
    let start = Instant::now();

    let mut overrides = Map::new();
    if let Some(preset) = &args.preset {
        overrides.insert("preset".into(), Value::String(preset.clone()));
    }
    if args.minify {
        overrides.insert("minify".into(), Value::Bool(true));
    }
    let project = load_project(&args.project, overrides)?;
    let options = project.options.clone();
    ui::info(&format!("Building for preset {}", options.preset));

    stratus_bundler::prepare(&options).await?;
    let copied = stratus_bundler::copy_public_assets(&options).await?;
    tracing::debug!(copied, "copied public assets");

    let report = stratus_prerender::prerender(&options, &project.user_config, &project.env).await?;
    if !report.routes.is_empty() {
        super::prerender::summarize(&report);
    }

    let spinner = ui::Spinner::new("Bundling server...");
    let result = match stratus_bundler::build(options).await {
        Ok(result) => result,
        Err(err) => {
            spinner.fail("Build failed");
            return Err(err.into());
        }
    };
    spinner.clear();

    ui::success(&format!(
        "Built {} handlers into {} in {}",
        result.handlers.len(),
        result.manifest_path.parent().unwrap_or(result.manifest_path.as_path()).display(),
        ui::format_duration(start.elapsed())
    ));
    Ok(())
}
