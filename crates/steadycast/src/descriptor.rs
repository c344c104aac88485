//! Stream descriptors and the sources that resolve them.
//!
//! The JSON wire format follows the listing service the player was built
//! against: `streamingUrl` is the primary source, `link` the fallback.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::error::{PlayerError, Result};

/// Channel served by the demo listing.
pub const DEMO_CHANNEL_ID: &str = "7112";

/// URLs and metadata for one channel. Immutable for a playback session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    #[serde(rename = "streamingUrl", alias = "primaryUrl", default)]
    pub primary_url: String,

    #[serde(
        rename = "link",
        alias = "fallbackUrl",
        default,
        deserialize_with = "empty_as_none"
    )]
    pub fallback_url: Option<String>,

    #[serde(rename = "Channel", alias = "channelId")]
    pub channel_id: String,

    #[serde(rename = "isStatic", default)]
    pub is_static: bool,

    #[serde(rename = "NowPlaying", default)]
    pub now_playing: bool,

    #[serde(rename = "scoreUrl", default, deserialize_with = "empty_as_none")]
    pub score_url: Option<String>,
}

fn empty_as_none<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

impl StreamDescriptor {
    pub fn new(channel_id: impl Into<String>, primary_url: impl Into<String>) -> Self {
        Self {
            primary_url: primary_url.into(),
            fallback_url: None,
            channel_id: channel_id.into(),
            is_static: false,
            now_playing: true,
            score_url: None,
        }
    }

    pub fn with_fallback(mut self, url: impl Into<String>) -> Self {
        self.fallback_url = Some(url.into());
        self
    }

    /// Primary URL, if it is not blank.
    pub fn primary(&self) -> Option<&str> {
        Some(self.primary_url.as_str()).filter(|s| !s.trim().is_empty())
    }

    /// Fallback URL, if present, not blank and distinct from the primary.
    pub fn fallback(&self) -> Option<&str> {
        self.fallback_url
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .filter(|s| Some(*s) != self.primary())
    }

    pub fn validate(&self) -> Result<()> {
        if self.primary().is_none() && self.fallback().is_none() {
            return Err(PlayerError::invalid_descriptor(
                &self.channel_id,
                "neither a primary nor a fallback URL is set",
            ));
        }
        Ok(())
    }
}

/// A request for a channel's descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRequest {
    pub channel_id: String,
    /// Event the channel is listed under, if the source needs one.
    pub event_id: Option<u64>,
}

impl ChannelRequest {
    pub fn new(channel_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            event_id: None,
        }
    }

    pub fn with_event(mut self, event_id: u64) -> Self {
        self.event_id = Some(event_id);
        self
    }
}

/// Asynchronous provider of stream descriptors.
#[async_trait]
pub trait DescriptorSource: Send + Sync {
    /// Fails with [`PlayerError::NotFound`] for unknown channels.
    async fn resolve(&self, request: &ChannelRequest) -> Result<StreamDescriptor>;
}

/// In-memory descriptor table.
#[derive(Debug, Clone, Default)]
pub struct StaticDescriptorSource {
    channels: HashMap<String, StreamDescriptor>,
}

impl StaticDescriptorSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel(mut self, descriptor: StreamDescriptor) -> Self {
        self.insert(descriptor);
        self
    }

    /// Seed the demo channel the listing service used to return.
    pub fn with_demo_channel(self) -> Self {
        self.with_channel(
            StreamDescriptor::new(
                DEMO_CHANNEL_ID,
                "https://e765432.xyz/static/dfc5b4a8b3793cb1176ab4a56dfb3e896ed419aa/getdata.php?chid=7112&ip=197.3.35.24",
            )
            .with_fallback("https://1875.space/pad=999/7109/mono.m3u8"),
        )
    }

    pub fn insert(&mut self, descriptor: StreamDescriptor) {
        self.channels
            .insert(descriptor.channel_id.clone(), descriptor);
    }
}

#[async_trait]
impl DescriptorSource for StaticDescriptorSource {
    async fn resolve(&self, request: &ChannelRequest) -> Result<StreamDescriptor> {
        self.channels
            .get(&request.channel_id)
            .cloned()
            .ok_or_else(|| PlayerError::not_found(&request.channel_id))
    }
}

/// Requests made for one resolution, counting the first.
const RESOLVE_ATTEMPTS: u32 = 3;

/// Pause between resolution attempts.
const RESOLVE_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Runs `op` until it succeeds, fails with a non-retryable error, or
/// `attempts` calls have been made.
async fn with_retry<T, F, Fut>(attempts: u32, delay: Duration, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(e) if e.is_retryable() && attempt < attempts => {
                warn!(attempt, error = %e, "Descriptor request failed, retrying");
                attempt += 1;
                tokio::time::sleep(delay).await;
            }
            result => return result,
        }
    }
}

/// Descriptor listing fetched over HTTP.
///
/// The endpoint answers with either a single descriptor or an array of them.
/// Transport failures and 5xx/429 answers are retried a few times.
pub struct HttpDescriptorSource {
    client: Client,
    endpoint: Url,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Listing {
    Many(Vec<StreamDescriptor>),
    One(StreamDescriptor),
}

impl HttpDescriptorSource {
    pub fn new(endpoint: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Self::with_client(client, endpoint)
    }

    pub fn with_client(client: Client, endpoint: &str) -> Result<Self> {
        let endpoint =
            Url::parse(endpoint).map_err(|e| PlayerError::invalid_url(endpoint, e.to_string()))?;
        Ok(Self { client, endpoint })
    }

    fn request_url(&self, request: &ChannelRequest) -> Url {
        let mut url = self.endpoint.clone();
        if let Some(event_id) = request.event_id {
            url.query_pairs_mut()
                .append_pair("eventId", &event_id.to_string());
        }
        url
    }
}

/// Pick the requested channel out of a listing body.
pub fn select_channel(body: &str, request: &ChannelRequest) -> Result<StreamDescriptor> {
    let listing: Listing = serde_json::from_str(body)?;
    let candidates = match listing {
        Listing::Many(list) => list,
        Listing::One(one) => vec![one],
    };
    candidates
        .into_iter()
        .find(|d| d.channel_id == request.channel_id)
        .ok_or_else(|| PlayerError::not_found(&request.channel_id))
}

#[async_trait]
impl DescriptorSource for HttpDescriptorSource {
    async fn resolve(&self, request: &ChannelRequest) -> Result<StreamDescriptor> {
        with_retry(RESOLVE_ATTEMPTS, RESOLVE_RETRY_DELAY, || self.fetch(request)).await
    }
}

impl HttpDescriptorSource {
    async fn fetch(&self, request: &ChannelRequest) -> Result<StreamDescriptor> {
        let url = self.request_url(request);
        debug!(%url, channel = %request.channel_id, "Resolving stream descriptor");

        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(PlayerError::not_found(&request.channel_id));
        }
        if !status.is_success() {
            return Err(PlayerError::HttpStatus {
                status,
                url: url.to_string(),
            });
        }

        let body = response.text().await?;
        select_channel(&body, request)
    }
}
