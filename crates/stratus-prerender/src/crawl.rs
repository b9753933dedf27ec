//! The route crawler.
//!
//! Routes move from the frontier to *generated* exactly once. A route longer
//! than `maxRouteLength` is excluded and never fetched. Each pass processes
//! the frontier as it stood when the pass began; links discovered during a
//! pass are picked up by the next one, and at most `maxPasses` passes run.
//!
//! A route that cannot be fetched or written is recorded as failed and the
//! crawl carries on with the rest of the frontier.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use indexmap::IndexSet;
use reqwest::header::{HeaderMap, HeaderValue};
use stratus_config::PrerenderOptions;
use stratus_server::LocalFetch;

use crate::error::{PrerenderError, Result};
use crate::links::{PRERENDER_HEADER, extract_links};

/// Why a generated route failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    /// The app answered with a non-200 status. The body is still written.
    Status { status: u16, status_text: String },
    /// No response came back from the app.
    Fetch(String),
    /// The response could not be written to the public directory.
    Write(String),
}

impl std::fmt::Display for RouteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouteError::Status {
                status,
                status_text,
            } => write!(f, "[{status}] {status_text}"),
            RouteError::Fetch(message) => write!(f, "fetch failed: {message}"),
            RouteError::Write(message) => write!(f, "write failed: {message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteReport {
    pub route: String,
    /// Written file, relative to the public directory, `/`-prefixed. `None`
    /// when nothing was written.
    pub file_name: Option<String>,
    /// Response status, `0` when the fetch itself failed.
    pub status: u16,
    pub error: Option<RouteError>,
    pub generate_time: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrerenderReport {
    /// Generated routes in generation order.
    pub routes: Vec<RouteReport>,
    /// Routes that were too long to generate.
    pub excluded: Vec<String>,
    pub passes: usize,
    pub pass_limit_reached: bool,
    /// Frontier left over when the pass limit stopped the crawl.
    pub leftover: Vec<String>,
}

impl PrerenderReport {
    pub fn failed(&self) -> impl Iterator<Item = &RouteReport> {
        self.routes.iter().filter(|r| r.error.is_some())
    }
}

/// Crawl settings, usually taken from `Options::prerender`.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub routes: Vec<String>,
    pub crawl_links: bool,
    pub max_passes: usize,
    pub max_route_length: usize,
    pub fail_on_pass_limit: bool,
    /// App base URL every request is prefixed with.
    pub base_url: String,
}

impl CrawlConfig {
    pub fn new(prerender: &PrerenderOptions, base_url: &str) -> Self {
        Self {
            routes: prerender.routes.clone(),
            crawl_links: prerender.crawl_links,
            max_passes: prerender.max_passes,
            max_route_length: prerender.max_route_length,
            fail_on_pass_limit: prerender.fail_on_pass_limit,
            base_url: base_url.to_string(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.routes.is_empty() || self.crawl_links
    }
}

/// Output file for a route. Implicit HTML gets `/index.html` appended;
/// directory routes of other types get an explicit `index` file.
pub fn file_name(route: &str, implicit_html: bool) -> String {
    if implicit_html {
        format!("{}/index.html", route.trim_end_matches('/'))
    } else if route.ends_with('/') {
        format!("{route}index")
    } else {
        route.to_string()
    }
}

/// `joinURL(base, route)`.
pub fn join_url(base: &str, route: &str) -> String {
    let base = base.trim_end_matches('/');
    let route = route.trim_start_matches('/');
    format!("{base}/{route}")
}

/// Value for the prerender request header. Control characters are not valid
/// in a header, so they are percent-encoded.
fn route_header(route: &str) -> Option<HeaderValue> {
    if let Ok(value) = HeaderValue::from_str(route) {
        return Some(value);
    }
    let encoded: String = route
        .chars()
        .map(|c| {
            if c.is_ascii_control() {
                format!("%{:02X}", c as u32)
            } else {
                c.to_string()
            }
        })
        .collect();
    tracing::warn!(
        route,
        header = %encoded,
        "route contains control characters, percent-encoding the prerender header"
    );
    HeaderValue::from_str(&encoded).ok()
}

fn output_path(public_dir: &Path, route: &str, file_name: &str) -> Result<PathBuf> {
    let mut path = public_dir.to_path_buf();
    for segment in file_name.split('/').filter(|s| !s.is_empty() && *s != ".") {
        if segment == ".." {
            return Err(PrerenderError::InvalidRoute {
                route: route.to_string(),
            });
        }
        path.push(segment);
    }
    Ok(path)
}

struct Crawler<'a> {
    fetch: &'a dyn LocalFetch,
    config: &'a CrawlConfig,
    public_dir: &'a Path,
    generated: HashSet<String>,
    report: PrerenderReport,
}

impl Crawler<'_> {
    fn can_prerender(&mut self, route: &str) -> bool {
        if self.generated.contains(route) {
            return false;
        }
        if route.len() > self.config.max_route_length {
            if !self.report.excluded.iter().any(|r| r == route) {
                tracing::warn!(route, "route exceeds maxRouteLength, skipping");
                self.report.excluded.push(route.to_string());
            }
            return false;
        }
        true
    }

    fn record(
        &mut self,
        route: &str,
        file_name: Option<String>,
        status: u16,
        error: Option<RouteError>,
        start: Instant,
    ) {
        let generate_time = start.elapsed();
        let ms = generate_time.as_millis() as u64;
        match &error {
            Some(error) => tracing::warn!(route, ms, "├─ {route} ({error})"),
            None => tracing::info!(route, ms, "├─ {route}"),
        }
        self.report.routes.push(RouteReport {
            route: route.to_string(),
            file_name,
            status,
            error,
            generate_time,
        });
    }

    /// Fetch and write one route, returning the links it exposes.
    async fn generate(&mut self, route: &str) -> Vec<String> {
        self.generated.insert(route.to_string());
        let start = Instant::now();

        let mut headers = HeaderMap::new();
        if let Some(value) = route_header(route) {
            headers.insert(PRERENDER_HEADER, value);
        }
        let url = join_url(&self.config.base_url, route);
        let response = match self.fetch.fetch(&url, headers).await {
            Ok(response) => response,
            Err(err) => {
                let error = RouteError::Fetch(err.to_string());
                self.record(route, None, 0, Some(error), start);
                return Vec::new();
            }
        };

        let mut error = (!response.is_ok()).then(|| RouteError::Status {
            status: response.status,
            status_text: response.status_text.clone(),
        });
        let implicit_html = !route.ends_with(".html")
            && response
                .header("content-type")
                .is_some_and(|ct| ct.contains("html"));
        let name = file_name(route, implicit_html);

        let written = match write_route(self.public_dir, route, &name, &response.body).await {
            Ok(()) => Some(name),
            Err(err) => {
                error = Some(RouteError::Write(err.to_string()));
                None
            }
        };

        let links = if error.is_none() && self.config.crawl_links && implicit_html {
            extract_links(&response.text(), response.header(PRERENDER_HEADER), route)
        } else {
            Vec::new()
        };
        self.record(route, written, response.status, error, start);
        links
    }
}

async fn write_route(public_dir: &Path, route: &str, file_name: &str, body: &[u8]) -> Result<()> {
    let path = output_path(public_dir, route, file_name)?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| PrerenderError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
    }
    tokio::fs::write(&path, body)
        .await
        .map_err(|source| PrerenderError::Write { path, source })
}

/// Prerender `config.routes` through `fetch`, writing into `public_dir`.
pub async fn crawl(
    fetch: &dyn LocalFetch,
    config: &CrawlConfig,
    public_dir: &Path,
) -> Result<PrerenderReport> {
    let mut crawler = Crawler {
        fetch,
        config,
        public_dir,
        generated: HashSet::new(),
        report: PrerenderReport::default(),
    };

    let mut frontier: IndexSet<String> = config.routes.iter().cloned().collect();
    if frontier.is_empty() && config.crawl_links {
        frontier.insert("/".to_string());
    }

    while !frontier.is_empty() && crawler.report.passes < config.max_passes {
        crawler.report.passes += 1;
        for route in std::mem::take(&mut frontier) {
            if !crawler.can_prerender(&route) {
                continue;
            }
            for link in crawler.generate(&route).await {
                if crawler.can_prerender(&link) {
                    frontier.insert(link);
                }
            }
        }
    }

    let mut report = crawler.report;
    if !frontier.is_empty() {
        report.pass_limit_reached = true;
        report.leftover = frontier.into_iter().collect();
        if config.fail_on_pass_limit {
            return Err(PrerenderError::PassLimit {
                passes: report.passes,
                leftover: report.leftover,
            });
        }
        tracing::warn!(
            passes = report.passes,
            leftover = report.leftover.len(),
            "prerender pass limit reached, some routes were not generated"
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_follow_the_response_type() {
        assert_eq!(file_name("/", true), "/index.html");
        assert_eq!(file_name("/blog/", true), "/blog/index.html");
        assert_eq!(file_name("/about", true), "/about/index.html");
        assert_eq!(file_name("/api/data.json", false), "/api/data.json");
        assert_eq!(file_name("/data/", false), "/data/index");
        assert_eq!(file_name("/legacy.html", false), "/legacy.html");
    }

    #[test]
    fn urls_join_under_the_base() {
        assert_eq!(join_url("/", "/about"), "/about");
        assert_eq!(join_url("/app/", "/about"), "/app/about");
        assert_eq!(join_url("/app", "/"), "/app/");
    }

    #[test]
    fn control_characters_are_encoded_in_the_header() {
        assert_eq!(route_header("/about").unwrap(), "/about");
        assert_eq!(route_header("/a\u{1}b\u{7f}").unwrap(), "/a%01b%7F");
    }

    #[test]
    fn parent_segments_are_rejected() {
        let public = Path::new("/srv/public");
        assert_eq!(
            output_path(public, "/a/b", "/a/b/index.html").unwrap(),
            public.join("a/b/index.html")
        );
        assert!(matches!(
            output_path(public, "/../etc", "/../etc"),
            Err(PrerenderError::InvalidRoute { .. })
        ));
    }
}
