//! `stratus prerender`.

use serde_json::Map;
use stratus_prerender::PrerenderReport;

use crate::cli::PrerenderArgs;
use crate::commands::load_project;
use crate::error::Result;
use crate::ui;

pub async fn execute(args: PrerenderArgs) -> Result<()> {
    let project = load_project(&args.project, Map::new())?;
    let report =
        stratus_prerender::prerender(&project.options, &project.user_config, &project.env).await?;

    if report.routes.is_empty() {
        ui::info("Nothing to prerender");
        return Ok(());
    }
    summarize(&report);
    Ok(())
}

/// Print the outcome of a crawl.
pub(crate) fn summarize(report: &PrerenderReport) {
    let failed = report.failed().count();
    let generated = report.routes.len() - failed;
    if failed == 0 {
        ui::success(&format!("Prerendered {generated} routes"));
    } else {
        ui::warning(&format!("Prerendered {generated} routes, {failed} failed"));
        for route in report.failed() {
            if let Some(error) = &route.error {
                ui::error(&format!("{} {error}", route.route));
            }
        }
    }
    if report.pass_limit_reached {
        ui::warning(&format!(
            "Stopped after {} passes; {} routes were not generated",
            report.passes,
            report.leftover.len()
        ));
    }
}
