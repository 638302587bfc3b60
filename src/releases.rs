//! Runtime release channel lookup.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::config::RuntimeConfig;

#[async_trait]
pub trait ReleaseChannel: Send + Sync {
    /// Latest release tag published on the configured channel.
    async fn latest(&self) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct ChannelList {
    #[serde(default)]
    data: Vec<Channel>,
}

#[derive(Debug, Deserialize)]
struct Channel {
    id: String,
    latest: Option<String>,
}

pub struct HttpReleaseChannel {
    client: reqwest::Client,
    url: String,
    channel: String,
}

impl HttpReleaseChannel {
    pub fn new(config: &RuntimeConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            client,
            url: config.release_channel_url.clone(),
            channel: config.channel.clone(),
        })
    }
}

#[async_trait]
impl ReleaseChannel for HttpReleaseChannel {
    async fn latest(&self) -> Result<String> {
        let body = self
            .client
            .get(&self.url)
            .send()
            .await
            .with_context(|| format!("GET {}", self.url))?
            .error_for_status()
            .context("release channel returned error status")?
            .text()
            .await
            .context("reading release channel response")?;

        latest_from_channels(&body, &self.channel)
    }
}

/// Pick `channel`'s latest tag out of a channel list document.
pub fn latest_from_channels(body: &str, channel: &str) -> Result<String> {
    let list: ChannelList = serde_json::from_str(body).context("parsing release channel list")?;
    list.data
        .into_iter()
        .find(|c| c.id == channel)
        .and_then(|c| c.latest)
        .with_context(|| format!("channel '{}' not published", channel))
}
