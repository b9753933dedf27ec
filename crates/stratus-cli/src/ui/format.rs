use std::time::Duration;

/// Human duration for build and prerender summaries: `850ms`, `2.4s`, `3m 05s`.
pub fn format_duration(duration: Duration) -> String {
    match duration.as_millis() {
        ms @ 0..1_000 => format!("{ms}ms"),
        ms @ 1_000..60_000 => format!("{:.1}s", ms as f64 / 1_000.0),
        _ => {
            let secs = duration.as_secs();
            format!("{}m {:02}s", secs / 60, secs % 60)
        }
    }
}
