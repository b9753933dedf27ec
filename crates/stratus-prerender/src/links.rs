//! Link discovery in prerendered pages.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

/// Response header a handler sets to announce extra routes, comma separated.
/// The crawler sends the same header, carrying the route, on each request.
pub const PRERENDER_HEADER: &str = "x-stratus-prerender";

static LINK_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"href=['"]?([^'" >]+)"#).expect("valid link regex"));

static EXTENSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\.[a-z0-9]+$").expect("valid extension regex"));

static PROTOCOL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.\-]*:").expect("valid protocol regex"));

const ALLOWED_EXTENSIONS: [&str; 2] = ["", ".json"];

/// Extension of the last path segment, dot included, or `""`.
pub fn extension(path: &str) -> &str {
    EXTENSION.find(path).map(|m| m.as_str()).unwrap_or("")
}

/// `href` targets in document order.
pub fn hrefs(html: &str) -> impl Iterator<Item = &str> {
    LINK_REGEX
        .captures_iter(html)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Same-site pathname for `link` as seen from `from`, if it is crawlable.
pub fn resolve_link(link: &str, from: &str) -> Option<String> {
    let link = link.trim();
    if link.is_empty() || link.starts_with("//") || PROTOCOL.is_match(link) {
        return None;
    }
    let origin = Url::parse("http://localhost/").ok()?;
    let base = origin.join(from).ok()?;
    let pathname = base.join(link).ok()?.path().to_string();
    let extension = extension(&pathname).to_ascii_lowercase();
    ALLOWED_EXTENSIONS
        .contains(&extension.as_str())
        .then_some(pathname)
}

/// Routes announced by a page: its `href`s plus the prerender header.
pub fn extract_links(html: &str, header: Option<&str>, from: &str) -> Vec<String> {
    let announced = header.into_iter().flat_map(|h| h.split(','));
    let mut links = Vec::new();
    for link in hrefs(html).chain(announced) {
        if let Some(route) = resolve_link(link, from) {
            if !links.contains(&route) {
                links.push(route);
            }
        }
    }
    links
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_extensionless_and_json_links_are_crawlable() {
        assert_eq!(resolve_link("/image.png", "/"), None);
        assert_eq!(resolve_link("/data.json", "/").as_deref(), Some("/data.json"));
        assert_eq!(resolve_link("/about", "/").as_deref(), Some("/about"));
        assert_eq!(resolve_link("/styles.CSS", "/"), None);
    }

    #[test]
    fn foreign_links_are_dropped() {
        for link in ["https://example.com/", "//cdn.example.com/x", "mailto:hi@example.com", "javascript:void(0)"] {
            assert_eq!(resolve_link(link, "/"), None, "{link}");
        }
    }

    #[test]
    fn relative_links_resolve_against_the_route() {
        assert_eq!(resolve_link("child", "/docs/").as_deref(), Some("/docs/child"));
        assert_eq!(resolve_link("sibling", "/docs/page").as_deref(), Some("/docs/sibling"));
        assert_eq!(resolve_link("../up?x=1#top", "/docs/a/").as_deref(), Some("/docs/up"));
    }

    #[test]
    fn links_come_from_hrefs_and_the_header() {
        let html = r#"<a href="/a">a</a><link href='/feed.json'><a href=/b>b</a><img src="/c">"#;
        let links = extract_links(html, Some(" /from-header, /a ,"), "/");
        assert_eq!(links, vec!["/a", "/feed.json", "/b", "/from-header"]);
    }
}
