use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use stratus_config::PrerenderOptions;
use stratus_prerender::{CrawlConfig, PRERENDER_HEADER, PrerenderError, RouteError, crawl};
use stratus_server::{FetchResponse, LocalFetch, ServerError};

type Page = fn(&str) -> (u16, &'static str, String, Option<String>);

/// A fake app server driven by a page function; counts requests per path.
struct Site {
    page: Page,
    hits: Mutex<HashMap<String, usize>>,
    seen_headers: Mutex<Vec<String>>,
}

impl Site {
    fn new(page: Page) -> Self {
        Self {
            page,
            hits: Mutex::new(HashMap::new()),
            seen_headers: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl LocalFetch for Site {
    async fn fetch(&self, path: &str, headers: HeaderMap) -> stratus_server::Result<FetchResponse> {
        *self.hits.lock().entry(path.to_string()).or_default() += 1;
        if let Some(route) = headers.get(PRERENDER_HEADER).and_then(|v| v.to_str().ok()) {
            self.seen_headers.lock().push(route.to_string());
        }

        let (status, content_type, body, announced) = (self.page)(path);
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        if let Some(announced) = announced {
            headers.insert(PRERENDER_HEADER, announced.parse().unwrap());
        }
        Ok(FetchResponse {
            status,
            status_text: if status == 200 { "OK" } else { "Not Found" }.to_string(),
            headers,
            body: body.into_bytes(),
        })
    }
}

fn config(routes: &[&str], crawl_links: bool) -> CrawlConfig {
    CrawlConfig::new(
        &PrerenderOptions {
            routes: routes.iter().map(|r| r.to_string()).collect(),
            crawl_links,
            ..PrerenderOptions::default()
        },
        "/",
    )
}

/// Every page links to itself and to the next page.
fn endless(path: &str) -> (u16, &'static str, String, Option<String>) {
    let n: u64 = path.trim_start_matches("/p/").parse().unwrap_or(0);
    let html = format!(r#"<a href="{path}">self</a> <a href="/p/{}">next</a>"#, n + 1);
    (200, "text/html; charset=utf-8", html, None)
}

#[tokio::test]
async fn self_linking_site_stops_at_the_pass_limit() {
    let public = tempfile::tempdir().unwrap();
    let site = Site::new(endless);

    let report = crawl(&site, &config(&["/p/0"], true), public.path())
        .await
        .unwrap();

    assert_eq!(report.passes, 100);
    assert_eq!(report.routes.len(), 100);
    assert!(report.pass_limit_reached);
    assert_eq!(report.leftover, vec!["/p/100"]);
    assert!(site.hits.lock().values().all(|&n| n == 1));
    assert!(public.path().join("p/99/index.html").is_file());
    assert!(!public.path().join("p/100").exists());
}

#[tokio::test]
async fn pass_limit_can_be_an_error() {
    let public = tempfile::tempdir().unwrap();
    let mut config = config(&["/p/0"], true);
    config.max_passes = 3;
    config.fail_on_pass_limit = true;

    let err = crawl(&Site::new(endless), &config, public.path())
        .await
        .unwrap_err();
    match err {
        PrerenderError::PassLimit { passes, leftover } => {
            assert_eq!(passes, 3);
            assert_eq!(leftover, vec!["/p/3"]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

fn assets_page(path: &str) -> (u16, &'static str, String, Option<String>) {
    match path {
        "/" => (
            200,
            "text/html",
            r#"<img href="/image.png"><a href="/data.json">data</a><a href="https://example.com">x</a>"#
                .to_string(),
            Some("/announced, /logo.svg".to_string()),
        ),
        "/data.json" => (200, "application/json", r#"{"href":"/never"}"#.to_string(), None),
        "/announced" => (404, "text/html", "<a href=\"/after-error\">".to_string(), None),
        _ => (404, "text/plain", String::new(), None),
    }
}

#[tokio::test]
async fn crawl_admits_extensionless_and_json_links_only() {
    let public = tempfile::tempdir().unwrap();
    let site = Site::new(assets_page);

    let report = crawl(&site, &config(&[], true), public.path()).await.unwrap();

    let routes: Vec<&str> = report.routes.iter().map(|r| r.route.as_str()).collect();
    assert_eq!(routes, vec!["/", "/data.json", "/announced"]);
    assert!(!report.pass_limit_reached);

    let files: Vec<&str> = report
        .routes
        .iter()
        .map(|r| r.file_name.as_deref().unwrap())
        .collect();
    assert_eq!(files, vec!["/index.html", "/data.json", "/announced/index.html"]);
    assert_eq!(
        std::fs::read_to_string(public.path().join("data.json")).unwrap(),
        r#"{"href":"/never"}"#
    );

    // Error responses are written but not crawled.
    let failed: Vec<String> = report
        .failed()
        .map(|r| r.error.as_ref().unwrap().to_string())
        .collect();
    assert_eq!(failed, vec!["[404] Not Found"]);
    assert!(public.path().join("announced/index.html").is_file());
    assert!(!site.hits.lock().contains_key("/after-error"));

    assert_eq!(*site.seen_headers.lock(), vec!["/", "/data.json", "/announced"]);
}

#[tokio::test]
async fn overlong_and_repeated_routes_are_skipped() {
    let public = tempfile::tempdir().unwrap();
    let long = format!("/{}", "a".repeat(300));
    let site = Site::new(|_| (200, "text/plain", "ok".to_string(), None));

    let report = crawl(&site, &config(&["/robots.txt", long.as_str(), "/robots.txt"], false), public.path())
        .await
        .unwrap();

    assert_eq!(report.routes.len(), 1);
    assert_eq!(report.excluded, vec![long]);
    assert_eq!(report.passes, 1);
    assert_eq!(
        std::fs::read_to_string(public.path().join("robots.txt")).unwrap(),
        "ok"
    );
}

#[tokio::test]
async fn requests_carry_the_base_url() {
    let public = tempfile::tempdir().unwrap();
    let site = Site::new(|_| (200, "text/plain", String::new(), None));
    let mut config = config(&["/about"], false);
    config.base_url = "/app/".into();

    crawl(&site, &config, public.path()).await.unwrap();
    assert!(site.hits.lock().contains_key("/app/about"));
}

/// Drops the connection for `/b`, serves everything else.
struct Flaky;

#[async_trait]
impl LocalFetch for Flaky {
    async fn fetch(&self, path: &str, _headers: HeaderMap) -> stratus_server::Result<FetchResponse> {
        if path == "/b" {
            return Err(ServerError::WorkerExited { code: Some(1) });
        }
        Ok(FetchResponse {
            status: 200,
            status_text: "OK".to_string(),
            headers: HeaderMap::new(),
            body: path.as_bytes().to_vec(),
        })
    }
}

#[tokio::test]
async fn one_failed_fetch_does_not_stop_the_crawl() {
    let public = tempfile::tempdir().unwrap();

    let report = crawl(&Flaky, &config(&["/a", "/b", "/c"], false), public.path())
        .await
        .unwrap();

    let routes: Vec<&str> = report.routes.iter().map(|r| r.route.as_str()).collect();
    assert_eq!(routes, vec!["/a", "/b", "/c"]);
    assert_eq!(std::fs::read_to_string(public.path().join("a")).unwrap(), "/a");
    assert_eq!(std::fs::read_to_string(public.path().join("c")).unwrap(), "/c");

    let failed: Vec<_> = report.failed().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].route, "/b");
    assert_eq!(failed[0].status, 0);
    assert_eq!(failed[0].file_name, None);
    assert_eq!(
        failed[0].error,
        Some(RouteError::Fetch("[worker] exited with code: 1".to_string()))
    );
    assert!(!public.path().join("b").exists());
}

#[tokio::test]
async fn unwritable_route_is_reported_and_the_rest_written() {
    let public = tempfile::tempdir().unwrap();
    // A file where `/blocked/` needs a directory.
    std::fs::write(public.path().join("blocked"), "").unwrap();

    let report = crawl(&Flaky, &config(&["/blocked/page", "/ok"], false), public.path())
        .await
        .unwrap();

    assert_eq!(report.routes.len(), 2);
    let failed: Vec<_> = report.failed().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].route, "/blocked/page");
    assert_eq!(failed[0].status, 200);
    assert!(matches!(failed[0].error, Some(RouteError::Write(_))));
    assert_eq!(std::fs::read_to_string(public.path().join("ok")).unwrap(), "/ok");
}
