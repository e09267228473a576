//! Hugging Face Inference API image generation provider.

use crate::error::{MingleError, Result};
use crate::fetch::{encode_data_uri, NetworkFetcher};
use crate::image::prompt::{enhance, PromptProfile};
use crate::image::provider::{retry_transient, ImageProvider};
use crate::image::types::{
    AssetType, CredentialStatus, GeneratedImage, GenerationRequest, ImageFormat,
    ProviderDescriptor, ProviderId, Style,
};
use crate::poll::{Backoff, Sleeper, TokioSleeper};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

const DEFAULT_BASE_URL: &str = "https://api-inference.huggingface.co";
const DEFAULT_HUB_URL: &str = "https://huggingface.co";
const API_KEY_ENV: &str = "HUGGINGFACE_API_KEY";
const API_KEY_PREFIX: &str = "hf_";
const NEGATIVE_PROMPT: &str = "blurry, low quality, distorted, deformed, ugly, bad anatomy";

/// Model-loading retries: three attempts, 10s times the attempt number
/// unless the backend estimates a loading time.
const MODEL_LOADING_BACKOFF: Backoff = Backoff::linear(Duration::from_secs(10), 3);

/// Hosted diffusion models used for generation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum HuggingFaceModel {
    /// Stable Diffusion 2.1 (default).
    #[default]
    StableDiffusion21,
    /// Stable Diffusion XL base 1.0.
    StableDiffusionXl,
    /// Stable Diffusion 1.5.
    StableDiffusion15,
    /// Openjourney v4, for stylised art.
    Openjourney,
    /// Realistic Vision 2.0.
    RealisticVision,
    /// Waifu Diffusion, for playful illustration.
    WaifuDiffusion,
    /// Any other hosted model by repository id.
    Custom(String),
}

impl HuggingFaceModel {
    /// Returns the model repository id.
    pub fn as_str(&self) -> &str {
        match self {
            Self::StableDiffusion21 => "stabilityai/stable-diffusion-2-1",
            Self::StableDiffusionXl => "stabilityai/stable-diffusion-xl-base-1.0",
            Self::StableDiffusion15 => "runwayml/stable-diffusion-v1-5",
            Self::Openjourney => "prompthero/openjourney-v4",
            Self::RealisticVision => "SG161222/Realistic_Vision_V2.0",
            Self::WaifuDiffusion => "hakurei/waifu-diffusion",
            Self::Custom(id) => id,
        }
    }

    /// Picks a model for the asset type, then the style.
    pub fn select(style: Style, asset_type: AssetType) -> Self {
        match asset_type {
            AssetType::Logo | AssetType::Icon => return Self::StableDiffusionXl,
            AssetType::Layout => return Self::StableDiffusion15,
            AssetType::Image => {}
        }
        match style {
            Style::Colourful | Style::Modern => Self::StableDiffusionXl,
            Style::Cyberpunk | Style::Vintage => Self::Openjourney,
            Style::Real | Style::Elegant => Self::RealisticVision,
            Style::Minimalist => Self::StableDiffusion15,
            Style::Playful => Self::WaifuDiffusion,
            Style::Bold => Self::StableDiffusion21,
        }
    }
}

/// Builder for [`HuggingFaceProvider`].
#[derive(Clone, Default)]
pub struct HuggingFaceProviderBuilder {
    api_key: Option<String>,
    base_url: Option<String>,
    hub_url: Option<String>,
    model: Option<HuggingFaceModel>,
    sleeper: Option<Arc<dyn Sleeper>>,
    fetcher: Option<NetworkFetcher>,
}

impl std::fmt::Debug for HuggingFaceProviderBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HuggingFaceProviderBuilder")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl HuggingFaceProviderBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the API key. Falls back to the `HUGGINGFACE_API_KEY` env var.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Hub API used for the token check.
    pub fn hub_url(mut self, url: impl Into<String>) -> Self {
        self.hub_url = Some(url.into());
        self
    }

    /// Pins a model instead of choosing one per request.
    pub fn model(mut self, model: HuggingFaceModel) -> Self {
        self.model = Some(model);
        self
    }

    /// Replaces the sleeper used between model-loading retries.
    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = Some(sleeper);
        self
    }

    /// Sets the fetcher whose HTTP client carries inference calls.
    pub fn fetcher(mut self, fetcher: NetworkFetcher) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Builds the provider; credential problems are recorded, not raised.
    pub fn build(self) -> HuggingFaceProvider {
        let api_key = self
            .api_key
            .or_else(|| std::env::var(API_KEY_ENV).ok())
            .unwrap_or_default();
        let credential_status = CredentialStatus::classify(Some(&api_key), API_KEY_PREFIX);

        HuggingFaceProvider {
            fetcher: self.fetcher.unwrap_or_default(),
            api_key,
            base_url: self
                .base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            hub_url: self
                .hub_url
                .unwrap_or_else(|| DEFAULT_HUB_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: self.model,
            backoff: MODEL_LOADING_BACKOFF,
            sleeper: self.sleeper.unwrap_or_else(|| Arc::new(TokioSleeper)),
            descriptor: ProviderDescriptor {
                id: ProviderId::HuggingFace,
                credential_status,
                supports_reference_image: false,
                is_task_based: false,
            },
        }
    }
}

/// Hugging Face Inference API provider.
///
/// Synchronous: one POST returns the image bytes. A 503 while the model
/// loads is retried; credential and quota errors are not.
pub struct HuggingFaceProvider {
    fetcher: NetworkFetcher,
    api_key: String,
    base_url: String,
    hub_url: String,
    model: Option<HuggingFaceModel>,
    backoff: Backoff,
    sleeper: Arc<dyn Sleeper>,
    descriptor: ProviderDescriptor,
}

impl HuggingFaceProvider {
    /// Creates a new [`HuggingFaceProviderBuilder`].
    pub fn builder() -> HuggingFaceProviderBuilder {
        HuggingFaceProviderBuilder::new()
    }

    #[cfg(test)]
    pub(crate) fn fetcher(&self) -> &NetworkFetcher {
        &self.fetcher
    }

    async fn call(&self, model: &str, body: &InferenceRequest<'_>) -> Result<(ImageFormat, Vec<u8>)> {
        let response = self
            .fetcher
            .client()
            .post(format!("{}/models/{}", self.base_url, model))
            .bearer_auth(&self.api_key)
            .header("Content-Type", "application/json")
            .json(body)
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
        if data.is_empty() {
            return Err(MingleError::MalformedResponse(
                "Hugging Face returned an empty body".into(),
            ));
        }

        let format = ImageFormat::from_magic_bytes(&data)
            .or_else(|| content_type.as_deref().and_then(ImageFormat::from_mime_type))
            .ok_or_else(|| {
                MingleError::MalformedResponse(format!(
                    "Hugging Face returned a non-image body ({})",
                    content_type.as_deref().unwrap_or("no content type")
                ))
            })?;
        Ok((format, data.to_vec()))
    }
}

#[async_trait]
impl ImageProvider for HuggingFaceProvider {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedImage> {
        let start = Instant::now();
        let model = self
            .model
            .clone()
            .unwrap_or_else(|| HuggingFaceModel::select(request.style, request.asset_type));
        let prompt = enhance(
            PromptProfile::HuggingFace,
            &request.prompt,
            request.style,
            request.asset_type,
            request.aspect_ratio,
            false,
        );
        let body = InferenceRequest::new(&prompt);

        let ((format, data), attempts) = retry_transient(
            ProviderId::HuggingFace,
            self.backoff,
            self.sleeper.as_ref(),
            |attempt| {
                tracing::debug!(model = model.as_str(), attempt, "calling Hugging Face inference");
                self.call(model.as_str(), &body)
            },
        )
        .await?;

        Ok(GeneratedImage {
            image_ref: encode_data_uri(format, &data),
            provider: ProviderId::HuggingFace,
            prompt,
            model: Some(model.as_str().to_string()),
            attempts,
            duration_ms: Some(start.elapsed().as_millis() as u64),
        })
    }

    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    /// Validates the token against the hub's `whoami` endpoint.
    async fn test_connection(&self) -> Result<()> {
        self.descriptor.ensure_credentials()?;
        let response = self
            .fetcher
            .client()
            .get(format!("{}/api/whoami-v2", self.hub_url))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(MingleError::from_status(status.as_u16(), &text));
        }
        tracing::info!("Hugging Face token accepted");
        Ok(())
    }
}

// -- Request types --

#[derive(Debug, Serialize)]
struct InferenceRequest<'a> {
    inputs: &'a str,
    parameters: InferenceParameters,
}

#[derive(Debug, Serialize)]
struct InferenceParameters {
    guidance_scale: f32,
    num_inference_steps: u32,
    negative_prompt: &'static str,
}

impl<'a> InferenceRequest<'a> {
    fn new(inputs: &'a str) -> Self {
        Self {
            inputs,
            parameters: InferenceParameters {
                guidance_scale: 7.5,
                num_inference_steps: 20,
                negative_prompt: NEGATIVE_PROMPT,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::provider::ImageProviderExt;
    use crate::poll::RecordingSleeper;
    use httpmock::{Method::GET, Method::POST, MockServer};
    use serde_json::json;

    const KEY: &str = "hf_0123456789abcdefghij";

    fn png_bytes(len: usize) -> Vec<u8> {
        let mut data = vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
        data.resize(len, 9);
        data
    }

    fn provider(server: &MockServer) -> (HuggingFaceProvider, RecordingSleeper) {
        let sleeper = RecordingSleeper::new();
        let provider = HuggingFaceProvider::builder()
            .api_key(KEY)
            .base_url(server.base_url())
            .sleeper(Arc::new(sleeper.clone()))
            .build();
        (provider, sleeper)
    }

    #[test]
    fn test_model_selection() {
        assert_eq!(
            HuggingFaceModel::select(Style::Playful, AssetType::Logo),
            HuggingFaceModel::StableDiffusionXl
        );
        assert_eq!(
            HuggingFaceModel::select(Style::Real, AssetType::Layout),
            HuggingFaceModel::StableDiffusion15
        );
        assert_eq!(
            HuggingFaceModel::select(Style::Real, AssetType::Image),
            HuggingFaceModel::RealisticVision
        );
        assert_eq!(
            HuggingFaceModel::select(Style::Bold, AssetType::Image),
            HuggingFaceModel::StableDiffusion21
        );
        assert_eq!(
            HuggingFaceModel::select(Style::Cyberpunk, AssetType::Image).as_str(),
            "prompthero/openjourney-v4"
        );
    }

    #[test]
    fn test_request_body_shape() {
        let json = serde_json::to_value(InferenceRequest::new("a cat")).unwrap();
        assert_eq!(json["inputs"], "a cat");
        assert_eq!(json["parameters"]["guidance_scale"], 7.5);
        assert_eq!(json["parameters"]["num_inference_steps"], 20);
        assert_eq!(json["parameters"]["negative_prompt"], NEGATIVE_PROMPT);
    }

    #[test]
    fn test_descriptor() {
        let provider = HuggingFaceProvider::builder().api_key(KEY).build();
        let d = provider.descriptor();
        assert_eq!(d.credential_status, CredentialStatus::Valid);
        assert!(!d.supports_reference_image);
        assert!(!d.is_task_based);

        let wrong = HuggingFaceProvider::builder().api_key("FPSX0123456789abcdef").build();
        assert_eq!(
            wrong.descriptor().credential_status,
            CredentialStatus::InvalidFormat
        );
    }

    #[tokio::test]
    async fn test_success_returns_data_uri() {
        let server = MockServer::start_async().await;
        let call = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/models/stabilityai/stable-diffusion-xl-base-1.0")
                    .header("authorization", format!("Bearer {KEY}"));
                then.status(200)
                    .header("content-type", "image/png")
                    .body(png_bytes(1500));
            })
            .await;

        let (provider, sleeper) = provider(&server);
        let req = GenerationRequest::new("a lighthouse").with_style(Style::Colourful);
        let image = provider.attempt(&req).await.unwrap();

        assert!(image.image_ref.starts_with("data:image/png;base64,"));
        assert_eq!(image.attempts, 1);
        assert_eq!(
            image.model.as_deref(),
            Some("stabilityai/stable-diffusion-xl-base-1.0")
        );
        assert!(image.prompt.starts_with("a lighthouse, "));
        assert!(sleeper.delays().is_empty());
        call.assert_async().await;
    }

    #[tokio::test]
    async fn test_model_loading_retried_three_times() {
        let server = MockServer::start_async().await;
        let call = server
            .mock_async(|when, then| {
                when.method(POST).path_includes("/models/");
                then.status(503)
                    .json_body(json!({"error": "Model is currently loading"}));
            })
            .await;

        let (provider, sleeper) = provider(&server);
        let err = provider
            .attempt(&GenerationRequest::new("x"))
            .await
            .unwrap_err();

        assert!(matches!(err, MingleError::TransientBackend { status: 503, .. }));
        call.assert_hits_async(3).await;
        assert_eq!(
            sleeper.delays(),
            vec![Duration::from_secs(10), Duration::from_secs(20)]
        );
    }

    #[tokio::test]
    async fn test_estimated_time_overrides_backoff() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path_includes("/models/");
                then.status(503)
                    .json_body(json!({"error": "loading", "estimated_time": 3.5}));
            })
            .await;

        let (provider, sleeper) = provider(&server);
        let _ = provider.attempt(&GenerationRequest::new("x")).await;
        assert_eq!(sleeper.delays(), vec![Duration::from_secs_f64(3.5); 2]);
    }

    #[tokio::test]
    async fn test_payment_required_is_not_retried() {
        let server = MockServer::start_async().await;
        let call = server
            .mock_async(|when, then| {
                when.method(POST).path_includes("/models/");
                then.status(402).body("payment required");
            })
            .await;

        let (provider, sleeper) = provider(&server);
        let err = provider
            .attempt(&GenerationRequest::new("x"))
            .await
            .unwrap_err();

        assert!(matches!(err, MingleError::RateLimitOrQuota { status: 402, .. }));
        call.assert_hits_async(1).await;
        assert!(sleeper.delays().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_key_is_credential_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path_includes("/models/");
                then.status(401).body("invalid token");
            })
            .await;

        let (provider, _) = provider(&server);
        let err = provider
            .attempt(&GenerationRequest::new("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, MingleError::Credential(_)));
    }

    #[tokio::test]
    async fn test_unconfigured_key_makes_no_request() {
        let server = MockServer::start_async().await;
        let call = server
            .mock_async(|when, then| {
                when.method(POST).path_includes("/models/");
                then.status(200).body(png_bytes(1500));
            })
            .await;

        let provider = HuggingFaceProvider::builder()
            .api_key("YOUR_HUGGINGFACE_API_KEY_HERE")
            .base_url(server.base_url())
            .build();
        let err = provider
            .attempt(&GenerationRequest::new("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, MingleError::Credential(_)));
        call.assert_hits_async(0).await;
    }

    #[tokio::test]
    async fn test_connection_checks_token_on_hub() {
        let server = MockServer::start_async().await;
        let whoami = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/whoami-v2")
                    .header("authorization", format!("Bearer {KEY}"));
                then.status(200).json_body(json!({"name": "someone"}));
            })
            .await;

        let provider = HuggingFaceProvider::builder()
            .api_key(KEY)
            .hub_url(server.base_url())
            .build();
        provider.test_connection().await.unwrap();
        whoami.assert_async().await;
    }

    #[tokio::test]
    async fn test_connection_reports_invalid_token() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/whoami-v2");
                then.status(401).body(r#"{"error":"Invalid credentials in Authorization header"}"#);
            })
            .await;

        let provider = HuggingFaceProvider::builder()
            .api_key(KEY)
            .hub_url(server.base_url())
            .build();
        let err = provider.test_connection().await.unwrap_err();
        assert_eq!(err.hint(), "invalid API key");
    }
}
