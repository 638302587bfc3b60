//! Typed HTTP client for the rollout daemon REST API.

use anyhow::{bail, Context, Result};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;

use crate::api::rest::{DaemonHealth, ErrorBody, ResetResponse, StartResponse};
use crate::domain::types::OperationState;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:9200";

pub struct RolloutClient {
    base_url: String,
    http: Client,
}

impl RolloutClient {
    pub fn new(base_url: &str) -> Result<Self> {
        // `check` waits on every node's package query, so allow well past the
        // default per-node check timeout.
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(600))
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    pub async fn health(&self) -> Result<DaemonHealth> {
        self.get("/health").await
    }

    pub async fn status(&self) -> Result<OperationState> {
        self.get("/api/v1/updates/status").await
    }

    pub async fn check(&self) -> Result<OperationState> {
        self.post("/api/v1/updates/check").await
    }

    pub async fn start_os(&self) -> Result<StartResponse> {
        self.post("/api/v1/updates/start/os").await
    }

    pub async fn start_runtime(&self, version: &str) -> Result<StartResponse> {
        let url = self.url("/api/v1/updates/start/runtime");
        let req = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "version": version }));
        self.send(req, "POST", &url).await
    }

    pub async fn reset(&self) -> Result<ResetResponse> {
        self.post("/api/v1/updates/reset").await
    }

    // ── Internal helpers ───────────────────────────────────

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        let req = self.http.get(&url);
        self.send(req, "GET", &url).await
    }

    async fn post<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        let req = self.http.post(&url);
        self.send(req, "POST", &url).await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        req: RequestBuilder,
        method: &str,
        url: &str,
    ) -> Result<T> {
        let resp = req
            .send()
            .await
            .with_context(|| format!("{} {}", method, url))?;

        let status = resp.status();
        if !status.is_success() {
            // The daemon reports rejections as `{"error": "..."}`.
            let text = resp.text().await.unwrap_or_default();
            match serde_json::from_str::<ErrorBody>(&text) {
                Ok(body) => bail!("{} ({})", body.error, status),
                Err(_) => bail!("{} returned {}", url, status),
            }
        }

        resp.json()
            .await
            .with_context(|| format!("parsing response from {}", url))
    }
}
