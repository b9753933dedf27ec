//! The `localFetch` contract shared by the prerenderer and the dev proxy.

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use url::Url;

use crate::error::{Result, ServerError};
use crate::worker::WorkerAddress;

/// A buffered response from the app server.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl FetchResponse {
    /// First value of a header, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

/// Issues a request against the app without going through a public listener.
///
/// `path` is an absolute URL path, optionally with a query string.
#[async_trait]
pub trait LocalFetch: Send + Sync {
    async fn fetch(&self, path: &str, headers: HeaderMap) -> Result<FetchResponse>;
}

/// [`LocalFetch`] over HTTP to a running worker.
#[derive(Debug, Clone)]
pub struct WorkerFetch {
    client: reqwest::Client,
    base: Url,
}

impl WorkerFetch {
    pub fn new(address: &WorkerAddress) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::new(),
            base: address.base_url()?,
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn url(&self, path: &str) -> Result<Url> {
        self.base.join(path).map_err(|e| ServerError::InvalidUrl {
            url: path.to_string(),
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl LocalFetch for WorkerFetch {
    async fn fetch(&self, path: &str, headers: HeaderMap) -> Result<FetchResponse> {
        let url = self.url(path)?;
        let fetch_error = |source| ServerError::Fetch {
            url: url.to_string(),
            source,
        };

        let response = self
            .client
            .get(url.clone())
            .headers(headers)
            .send()
            .await
            .map_err(fetch_error)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(fetch_error)?;

        Ok(FetchResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body: body.to_vec(),
        })
    }
}
