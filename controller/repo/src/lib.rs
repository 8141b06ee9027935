//! An HTTP client for the proxy configuration repository.
//!
//! The repository stores codebases under paths. Each codebase holds files
//! and is published to proxies when its version is bumped.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

use bytes::Bytes;
use http::{header, Method, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use mesh_controller_core::{Batch, BatchItem, ConfigStore};
use serde::Serialize;
use tokio::time;
use tracing::{debug, warn};

const REPO_PATH: &str = "/api/v1/repo";
const FILES_PATH: &str = "/api/v1/repo-files";
const DEFAULT_TIMEOUT: time::Duration = time::Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct RepoClient {
    addr: String,
    http: Client<HttpConnector, Full<Bytes>>,
    timeout: time::Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid request: {0}")]
    Request(#[from] http::Error),

    #[error("request failed: {0}")]
    Client(#[from] hyper_util::client::legacy::Error),

    #[error("failed to read response: {0}")]
    Body(#[from] hyper::Error),

    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("{method} {path} timed out after {timeout:?}")]
    Timeout {
        method: Method,
        path: String,
        timeout: time::Duration,
    },

    #[error("{method} {path} failed: {status}")]
    Status {
        method: Method,
        path: String,
        status: StatusCode,
    },
}

#[derive(Serialize)]
struct Codebase {
    version: String,
}

// === impl RepoClient ===

impl RepoClient {
    /// Creates a client for the repository at `addr`, e.g.
    /// `http://127.0.0.1:6060`.
    pub fn new(addr: impl Into<String>) -> Self {
        let mut addr = addr.into();
        while addr.ends_with('/') {
            addr.pop();
        }
        Self {
            addr,
            http: Client::builder(TokioExecutor::new()).build_http(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: time::Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns true if a codebase exists at `path`.
    pub async fn get_codebase(&self, path: &str) -> Result<bool, Error> {
        let path = format!("{REPO_PATH}{path}");
        match self.send(Method::GET, &path, None).await? {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(Error::Status {
                method: Method::GET,
                path,
                status,
            }),
        }
    }

    pub async fn create_codebase(&self, path: &str) -> Result<(), Error> {
        let body = serde_json::to_vec(&Codebase {
            version: "1".to_string(),
        })?;
        self.expect_success(Method::POST, format!("{REPO_PATH}{path}"), Some(body))
            .await
    }

    pub async fn upsert_file(&self, base_path: &str, item: &BatchItem) -> Result<(), Error> {
        let path = format!(
            "{FILES_PATH}{base_path}{}/{}",
            item.path,
            item.filename.trim_start_matches('/')
        );
        let body = serde_json::to_vec(&item.content)?;
        self.expect_success(Method::POST, path, Some(body)).await
    }

    /// Publishes the codebase at `path` under a new version.
    pub async fn commit(&self, path: &str, version: u64) -> Result<(), Error> {
        let body = serde_json::to_vec(&Codebase {
            version: version.to_string(),
        })?;
        self.expect_success(Method::PATCH, format!("{REPO_PATH}{path}"), Some(body))
            .await
    }

    async fn expect_success(
        &self,
        method: Method,
        path: String,
        body: Option<Vec<u8>>,
    ) -> Result<(), Error> {
        let status = self.send(method.clone(), &path, body).await?;
        if !status.is_success() {
            return Err(Error::Status {
                method,
                path,
                status,
            });
        }
        Ok(())
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<StatusCode, Error> {
        let mut req = http::Request::builder()
            .method(method.clone())
            .uri(format!("{}{path}", self.addr));
        if body.is_some() {
            req = req.header(header::CONTENT_TYPE, "application/json");
        }
        let req = req.body(Full::new(Bytes::from(body.unwrap_or_default())))?;

        let rsp = async {
            let rsp = self.http.request(req).await?;
            let status = rsp.status();
            rsp.into_body().collect().await?;
            Ok::<_, Error>(status)
        };
        match time::timeout(self.timeout, rsp).await {
            Ok(res) => res,
            Err(_) => Err(Error::Timeout {
                method,
                path: path.to_string(),
                timeout: self.timeout,
            }),
        }
    }
}

#[async_trait::async_trait]
impl ConfigStore for RepoClient {
    async fn codebase_exists(&self, path: &str) -> bool {
        match self.get_codebase(path).await {
            Ok(exists) => exists,
            Err(error) => {
                warn!(%path, %error, "Failed to check codebase");
                false
            }
        }
    }

    async fn batch(&self, batches: Vec<Batch>) -> anyhow::Result<()> {
        for batch in batches {
            if !self.get_codebase(&batch.base_path).await? {
                debug!(path = %batch.base_path, "Creating codebase");
                self.create_codebase(&batch.base_path).await?;
            }
            for item in &batch.items {
                self.upsert_file(&batch.base_path, item).await?;
            }
            let version = chrono::Utc::now()
                .timestamp_nanos_opt()
                .map_or(0, |v| v.unsigned_abs());
            self.commit(&batch.base_path, version).await?;
            debug!(path = %batch.base_path, items = batch.items.len(), version, "Committed codebase");
        }
        Ok(())
    }
}
