//! Binary fetching with a CORS-relay fallback, normalized to data URIs.

use crate::error::{MingleError, Result};
use crate::image::ImageFormat;
use base64::Engine;
use std::sync::Arc;
use std::time::Duration;

/// Public relay used when a direct fetch is refused.
pub const DEFAULT_RELAY_URL: &str = "https://api.allorigins.win/raw";

/// Payloads at or below this size are treated as relay error pages.
pub const DEFAULT_MIN_PAYLOAD_BYTES: usize = 1000;

/// Which step of the chain produced a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchRoute {
    Direct,
    Relay,
}

/// A fetched image, already converted for transport.
#[derive(Debug, Clone)]
pub struct FetchedImage {
    /// `data:<mime>;base64,...` reference.
    pub data_uri: String,
    pub format: ImageFormat,
    pub size: usize,
    pub route: FetchRoute,
}

/// Fetches remote images through an ordered fallback chain:
/// direct, then the same URL through a CORS relay.
#[derive(Debug, Clone)]
pub struct NetworkFetcher {
    client: Arc<reqwest::Client>,
    relay_url: Option<String>,
    min_payload_bytes: usize,
}

impl Default for NetworkFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkFetcher {
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client: Arc::new(client),
            relay_url: Some(DEFAULT_RELAY_URL.to_string()),
            min_payload_bytes: DEFAULT_MIN_PAYLOAD_BYTES,
        }
    }

    /// Sets the relay endpoint; the target URL is passed as its `url` query parameter.
    pub fn relay_url(mut self, url: impl Into<String>) -> Self {
        self.relay_url = Some(url.into());
        self
    }

    /// Disables the relay step.
    pub fn without_relay(mut self) -> Self {
        self.relay_url = None;
        self
    }

    pub fn min_payload_bytes(mut self, bytes: usize) -> Self {
        self.min_payload_bytes = bytes;
        self
    }

    /// Underlying HTTP client, shared with adapters.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// True when both fetchers send through the same connection pool.
    pub fn shares_pool_with(&self, other: &NetworkFetcher) -> bool {
        Arc::ptr_eq(&self.client, &other.client)
    }

    /// Fetches `url`, trying the relay once if the direct attempt fails.
    pub async fn fetch(&self, url: &str) -> Result<FetchedImage> {
        let direct_err = match self.fetch_once(url, FetchRoute::Direct).await {
            Ok(image) => return Ok(image),
            Err(e) => e,
        };

        let Some(relay) = self.relay_url.as_deref() else {
            return Err(direct_err);
        };

        tracing::debug!(url = %url, "direct fetch failed, trying relay: {direct_err}");
        let relayed = relay_target(relay, url)?;
        match self.fetch_once(relayed.as_str(), FetchRoute::Relay).await {
            Ok(image) => Ok(image),
            Err(relay_err) => {
                tracing::warn!(url = %url, "relay fetch failed: {relay_err}");
                Err(relay_err)
            }
        }
    }

    async fn fetch_once(&self, url: &str, route: FetchRoute) -> Result<FetchedImage> {
        let response = self
            .client
            .get(url)
            .header("Accept", "image/*")
            .timeout(Duration::from_secs(60))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(MingleError::from_status(status.as_u16(), &text));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let data = response.bytes().await?;

        if data.len() <= self.min_payload_bytes {
            return Err(MingleError::RejectedPayload(format!(
                "{} bytes via {:?} is below the {} byte threshold",
                data.len(),
                route,
                self.min_payload_bytes
            )));
        }

        let format = ImageFormat::from_magic_bytes(&data)
            .or_else(|| content_type.as_deref().and_then(ImageFormat::from_mime_type))
            .ok_or_else(|| {
                MingleError::RejectedPayload(format!(
                    "payload via {:?} is not a recognized image ({})",
                    route,
                    content_type.as_deref().unwrap_or("no content type")
                ))
            })?;

        Ok(FetchedImage {
            data_uri: encode_data_uri(format, &data),
            format,
            size: data.len(),
            route,
        })
    }
}

fn relay_target(relay: &str, target: &str) -> Result<reqwest::Url> {
    reqwest::Url::parse_with_params(relay, &[("url", target)])
        .map_err(|e| MingleError::ProviderNotAvailable(format!("invalid relay URL: {}", e)))
}

/// Encodes bytes as a `data:` URI.
pub fn encode_data_uri(format: ImageFormat, data: &[u8]) -> String {
    format!(
        "data:{};base64,{}",
        format.mime_type(),
        base64::engine::general_purpose::STANDARD.encode(data)
    )
}

/// Decodes a `data:<mime>;base64,` URI back into its format and bytes.
pub fn decode_data_uri(uri: &str) -> Result<(ImageFormat, Vec<u8>)> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| MingleError::Decode("not a data URI".into()))?;
    let (mime, payload) = rest
        .split_once(";base64,")
        .ok_or_else(|| MingleError::Decode("data URI is not base64-encoded".into()))?;
    let data = base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| MingleError::Decode(e.to_string()))?;
    let format = ImageFormat::from_mime_type(mime)
        .or_else(|| ImageFormat::from_magic_bytes(&data))
        .unwrap_or_default();
    Ok((format, data))
}
