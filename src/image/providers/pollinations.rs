//! Pollinations image generation provider.
//!
//! Pollinations needs no key: the prompt is the URL path and the image is
//! the response body, so generation is a single fetch.

use crate::error::{MingleError, Result};
use crate::fetch::NetworkFetcher;
use crate::image::prompt::{enhance, PromptProfile};
use crate::image::provider::ImageProvider;
use crate::image::types::{
    CredentialStatus, GeneratedImage, GenerationRequest, ProviderDescriptor, ProviderId,
};
use async_trait::async_trait;
use std::time::Instant;

const DEFAULT_BASE_URL: &str = "https://image.pollinations.ai";

/// Builder for [`PollinationsProvider`].
#[derive(Debug, Clone, Default)]
pub struct PollinationsProviderBuilder {
    base_url: Option<String>,
    fetcher: Option<NetworkFetcher>,
}

impl PollinationsProviderBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the fetcher, including its relay configuration.
    pub fn fetcher(mut self, fetcher: NetworkFetcher) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn build(self) -> PollinationsProvider {
        PollinationsProvider {
            base_url: self
                .base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            fetcher: self.fetcher.unwrap_or_default(),
            descriptor: ProviderDescriptor {
                id: ProviderId::Pollinations,
                credential_status: CredentialStatus::Valid,
                supports_reference_image: false,
                is_task_based: false,
            },
        }
    }
}

/// Keyless Pollinations provider.
#[derive(Debug)]
pub struct PollinationsProvider {
    base_url: String,
    fetcher: NetworkFetcher,
    descriptor: ProviderDescriptor,
}

impl PollinationsProvider {
    /// Creates a new [`PollinationsProviderBuilder`].
    pub fn builder() -> PollinationsProviderBuilder {
        PollinationsProviderBuilder::new()
    }

    #[cfg(test)]
    pub(crate) fn fetcher(&self) -> &NetworkFetcher {
        &self.fetcher
    }

    /// Builds `{base}/prompt/{prompt}?width=..&height=..&seed=..`.
    fn image_url(&self, prompt: &str, request: &GenerationRequest) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| MingleError::ProviderNotAvailable(format!("invalid Pollinations URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| {
                MingleError::ProviderNotAvailable("Pollinations URL cannot take a path".into())
            })?
            .pop_if_empty()
            .push("prompt")
            .push(prompt);

        let dims = request.aspect_ratio.dimensions();
        url.query_pairs_mut()
            .append_pair("width", &dims.width.to_string())
            .append_pair("height", &dims.height.to_string())
            .append_pair("seed", &request.variation_seed.to_string());
        Ok(url)
    }
}

#[async_trait]
impl ImageProvider for PollinationsProvider {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedImage> {
        let start = Instant::now();
        let prompt = enhance(
            PromptProfile::Pollinations,
            &request.prompt,
            request.style,
            request.asset_type,
            request.aspect_ratio,
            false,
        );
        let url = self.image_url(&prompt, request)?;
        tracing::debug!(url = %url, "fetching Pollinations image");

        let image = self.fetcher.fetch(url.as_str()).await?;

        Ok(GeneratedImage {
            image_ref: image.data_uri,
            provider: ProviderId::Pollinations,
            prompt,
            model: None,
            attempts: 1,
            duration_ms: Some(start.elapsed().as_millis() as u64),
        })
    }

    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }
}
