//! Development HTTP surface.
//!
//! Serves the virtual-module viewer under `/_vfs`, public asset directories
//! by base URL, and proxies everything else to the supervised worker.

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    body::{Body, Bytes},
    extract::{OriginalUri, Path, Request, State},
    http::{HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use stratus_bundler::{BuildEvent, VirtualRegistry};
use stratus_config::Options;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use tower_http::services::ServeDir;

use crate::error::{Result, ServerError};
use crate::supervisor::{Supervisor, Unavailable};

/// Path prefix of the virtual module viewer.
pub const VFS_PREFIX: &str = "/_vfs";

#[derive(Clone)]
struct DevState {
    supervisor: Supervisor,
    registry: watch::Receiver<VirtualRegistry>,
    client: reqwest::Client,
}

/// One public directory mounted at an absolute base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetMount {
    /// `/`-prefixed and `/`-suffixed.
    pub base: String,
    pub dir: PathBuf,
    pub fallthrough: bool,
}

/// Public asset mounts under the app base URL, in declaration order.
pub fn asset_mounts(options: &Options) -> Vec<AssetMount> {
    options
        .public_assets
        .iter()
        .map(|asset| AssetMount {
            base: join_base(&options.base_url, &asset.base_url),
            dir: asset.dir.clone(),
            fallthrough: asset.fallthrough,
        })
        .collect()
}

fn join_base(app: &str, asset: &str) -> String {
    let segments: Vec<&str> = app
        .split('/')
        .chain(asset.split('/'))
        .filter(|s| !s.is_empty())
        .collect();
    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}/", segments.join("/"))
    }
}

/// Build the dev router.
pub fn router(
    mounts: &[AssetMount],
    supervisor: Supervisor,
    registry: watch::Receiver<VirtualRegistry>,
) -> Router {
    let state = DevState {
        supervisor,
        registry,
        client: reqwest::Client::new(),
    };
    let proxy = Router::new().fallback(proxy_request).with_state(state.clone());
    let placeholder = Router::new().fallback(serve_placeholder);

    // Group by base, keeping first-seen order.
    let mut groups: Vec<(String, Vec<&AssetMount>)> = Vec::new();
    for mount in mounts {
        match groups.iter_mut().find(|(base, _)| *base == mount.base) {
            Some((_, group)) => group.push(mount),
            None => groups.push((mount.base.clone(), vec![mount])),
        }
    }

    let mut app = Router::new()
        .route(VFS_PREFIX, get(vfs_index))
        .route(&format!("{VFS_PREFIX}/{{*id}}"), get(vfs_module))
        .with_state(state);
    let mut root = proxy.clone();

    for (base, group) in groups {
        let terminal = if group.iter().all(|m| m.fallthrough) {
            proxy.clone()
        } else {
            placeholder.clone()
        };
        let chain = group.iter().rev().fold(terminal, |next, mount| {
            Router::new().fallback_service(
                ServeDir::new(&mount.dir)
                    .call_fallback_on_method_not_allowed(true)
                    .fallback(next),
            )
        });
        if base == "/" {
            root = chain;
        } else {
            app = app.nest_service(base.trim_end_matches('/'), chain);
        }
    }

    app.fallback_service(root)
}

async fn vfs_index(State(state): State<DevState>) -> Html<String> {
    let registry = state.registry.borrow().clone();
    let items: String = registry
        .ids()
        .map(|id| {
            let href: String = url::form_urlencoded::byte_serialize(id.as_bytes()).collect();
            format!(
                "<li><a href=\"{VFS_PREFIX}/{href}\">{}</a></li>",
                html_escape(id)
            )
        })
        .collect();
    Html(page(
        "Virtual Modules",
        &format!(
            "<h1>Virtual Modules ({})</h1><ul>{items}</ul>",
            registry.len()
        ),
    ))
}

async fn vfs_module(State(state): State<DevState>, Path(id): Path<String>) -> Response {
    let registry = state.registry.borrow().clone();
    match registry.contents(&id) {
        Ok(Some(code)) => Html(page(
            &id,
            &format!(
                "<p><a href=\"{VFS_PREFIX}\">&larr; all modules</a></p><h1>{}</h1><pre><code>{}</code></pre>",
                html_escape(&id),
                html_escape(&code)
            ),
        ))
        .into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Html(page(
                "Not Found",
                &format!("<h1>Virtual module not found</h1><pre>{}</pre>", html_escape(&id)),
            )),
        )
            .into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Html(page(
                "Error",
                &format!("<h1>Failed to render module</h1><pre>{}</pre>", html_escape(&err.to_string())),
            )),
        )
            .into_response(),
    }
}

async fn serve_placeholder() -> Response {
    (
        StatusCode::NOT_FOUND,
        [(header::CACHE_CONTROL, "public, max-age=0, must-revalidate")],
    )
        .into_response()
}

async fn proxy_request(State(state): State<DevState>, OriginalUri(uri): OriginalUri, req: Request) -> Response {
    let address = match state.supervisor.acquire().await {
        Ok(address) => address,
        Err(unavailable) => return unavailable_response(&unavailable),
    };
    let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let url = match address.base_url().and_then(|base| {
        base.join(path).map_err(|e| ServerError::InvalidUrl {
            url: path.to_string(),
            message: e.to_string(),
        })
    }) {
        Ok(url) => url,
        Err(err) => return unavailable_response(&Unavailable { error: Some(err.to_string()) }),
    };

    let (parts, body) = req.into_parts();
    let mut headers = parts.headers;
    headers.remove(header::HOST);
    let body = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(body) => body,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };

    let mut request = state.client.request(parts.method, url).headers(headers);
    if !body.is_empty() {
        request = request.body(body);
    }
    let upstream = match request.send().await {
        Ok(upstream) => upstream,
        Err(err) => {
            tracing::debug!(error = %err, path, "worker request failed");
            return unavailable_response(&Unavailable { error: Some(err.to_string()) });
        }
    };

    let status = upstream.status();
    let mut upstream_headers = upstream.headers().clone();
    for hop in [header::TRANSFER_ENCODING, header::CONNECTION] {
        upstream_headers.remove(hop);
    }
    let bytes: Bytes = match upstream.bytes().await {
        Ok(bytes) => bytes,
        Err(err) => return unavailable_response(&Unavailable { error: Some(err.to_string()) }),
    };

    let mut response = (status, Body::from(bytes)).into_response();
    response.headers_mut().extend(upstream_headers);
    response
}

fn unavailable_response(unavailable: &Unavailable) -> Response {
    let body = match &unavailable.error {
        Some(error) => page(
            "Server Unavailable",
            &format!("<h1>Server Unavailable</h1><pre>{}</pre>", html_escape(error)),
        ),
        None => "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><meta http-equiv=\"refresh\" content=\"2\">\
                 <title>Server Unavailable</title></head><body><h1>Reloading server...</h1></body></html>"
            .to_string(),
    };
    let mut response = (StatusCode::SERVICE_UNAVAILABLE, Html(body)).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>{}</title>\
         <style>body{{font-family:system-ui,sans-serif;margin:2rem}}pre{{background:#f6f8fa;padding:1rem;overflow:auto}}</style>\
         </head><body>{body}</body></html>",
        html_escape(title)
    )
}

/// Escape `& < > " '` for HTML text and attributes.
pub fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

/// A bound dev listener.
pub struct DevServer {
    listener: TcpListener,
    router: Router,
}

impl DevServer {
    pub async fn bind(addr: SocketAddr, router: Router) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        Ok(Self { listener, router })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn serve(self, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}

/// Watch-build the app, restart the worker after every successful build and
/// serve the dev surface on `addr` until `shutdown` resolves.
pub async fn run(
    options: Arc<Options>,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let entry = options.output.server_dir.join(&options.entry_file_name);
    let supervisor = Supervisor::for_entry(entry);
    let session = stratus_bundler::watch(options.clone()).await?;

    let server = DevServer::bind(
        addr,
        router(&asset_mounts(&options), supervisor.clone(), session.registry_updates()),
    )
    .await?;
    tracing::info!(address = %server.local_addr()?, "dev server listening");

    let reloader = tokio::spawn(reload_on_build(session.subscribe(), supervisor.clone()));
    let served = server.serve(shutdown).await;

    reloader.abort();
    session.close().await;
    supervisor.stop().await;
    served
}

async fn reload_on_build(mut events: broadcast::Receiver<BuildEvent>, supervisor: Supervisor) {
    loop {
        match events.recv().await {
            Ok(BuildEvent::Compiled { duration }) => {
                tracing::debug!(?duration, "build finished, reloading worker");
                // Failures are published as `Crashed` and shown to requests.
                let _ = supervisor.reload().await;
            }
            Ok(BuildEvent::Failed { message }) => {
                tracing::error!("{message}");
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "build events lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
