//! Freepik Mystic image generation provider.

use crate::error::{MingleError, Result};
use crate::fetch::NetworkFetcher;
use crate::image::prompt::{enhance, PromptProfile};
use crate::image::provider::ImageProvider;
use crate::image::types::{
    AspectRatio, AssetType, CredentialStatus, GeneratedImage, GenerationRequest,
    ProviderDescriptor, ProviderId, Style,
};
use crate::poll::{GenerationTask, PollObservation, TaskPoller, TaskStatusSource};
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Instant;

const DEFAULT_BASE_URL: &str = "https://api.freepik.com";
const API_KEY_ENV: &str = "FREEPIK_API_KEY";
const API_KEY_PREFIX: &str = "FPSX";

/// Mystic model families.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MysticModel {
    /// Vivid, illustrative output.
    #[default]
    Fluid,
    /// Photographic output.
    Realism,
    /// Clean, sparse output; used for graphic assets.
    Zen,
}

impl MysticModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fluid => "fluid",
            Self::Realism => "realism",
            Self::Zen => "zen",
        }
    }

    /// Anything other than a plain image uses `zen`; images follow the style.
    pub fn select(style: Style, asset_type: AssetType) -> Self {
        if asset_type != AssetType::Image {
            return Self::Zen;
        }
        match style {
            Style::Real | Style::Vintage | Style::Elegant => Self::Realism,
            Style::Minimalist => Self::Zen,
            Style::Colourful | Style::Cyberpunk | Style::Modern | Style::Bold | Style::Playful => {
                Self::Fluid
            }
        }
    }
}

fn mystic_aspect_ratio(ratio: AspectRatio) -> &'static str {
    match ratio {
        AspectRatio::Square => "square_1_1",
        AspectRatio::Landscape => "widescreen_16_9",
        AspectRatio::Portrait => "social_story_9_16",
        AspectRatio::Standard => "classic_4_3",
        AspectRatio::StandardPortrait => "traditional_3_4",
        AspectRatio::ThreeTwo => "standard_3_2",
        AspectRatio::TwoThree => "portrait_2_3",
    }
}

/// Builder for [`FreepikProvider`].
#[derive(Debug, Clone, Default)]
pub struct FreepikProviderBuilder {
    api_key: Option<String>,
    base_url: Option<String>,
    poller: Option<TaskPoller>,
    fetcher: Option<NetworkFetcher>,
}

impl FreepikProviderBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the API key. Falls back to the `FREEPIK_API_KEY` env var.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Overrides the API origin (used by tests and proxies).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the task poller.
    pub fn poller(mut self, poller: TaskPoller) -> Self {
        self.poller = Some(poller);
        self
    }

    /// Sets the fetcher used to download finished images.
    pub fn fetcher(mut self, fetcher: NetworkFetcher) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Builds the provider.
    ///
    /// A missing or malformed key does not fail the build; it is recorded
    /// in the descriptor and every generation is refused without a request.
    pub fn build(self) -> FreepikProvider {
        let api_key = self
            .api_key
            .or_else(|| std::env::var(API_KEY_ENV).ok())
            .unwrap_or_default();
        let credential_status = CredentialStatus::classify(Some(&api_key), API_KEY_PREFIX);
        let fetcher = self.fetcher.unwrap_or_default();

        FreepikProvider {
            api_key,
            base_url: self
                .base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            poller: self.poller.unwrap_or_default(),
            fetcher,
            descriptor: ProviderDescriptor {
                id: ProviderId::Freepik,
                credential_status,
                supports_reference_image: true,
                is_task_based: true,
            },
        }
    }
}

/// Freepik Mystic provider.
///
/// Submits a task, polls it to completion, then downloads the first
/// generated image through the [`NetworkFetcher`].
pub struct FreepikProvider {
    api_key: String,
    base_url: String,
    poller: TaskPoller,
    fetcher: NetworkFetcher,
    descriptor: ProviderDescriptor,
}

impl FreepikProvider {
    /// Creates a new [`FreepikProviderBuilder`].
    pub fn builder() -> FreepikProviderBuilder {
        FreepikProviderBuilder::new()
    }

    #[cfg(test)]
    pub(crate) fn fetcher(&self) -> &NetworkFetcher {
        &self.fetcher
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/ai/mystic", self.base_url)
    }

    async fn submit(&self, body: &MysticRequest) -> Result<String> {
        let response = self
            .fetcher
            .client()
            .post(self.endpoint())
            .header("x-freepik-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(MingleError::from_status(status.as_u16(), &text));
        }

        let envelope: MysticEnvelope = response.json().await?;
        envelope
            .task()
            .task_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| MingleError::MalformedResponse("Freepik returned no task_id".into()))
    }
}

#[async_trait]
impl TaskStatusSource for FreepikProvider {
    async fn check(&self, task_id: &str) -> Result<PollObservation> {
        let response = self
            .fetcher
            .client()
            .get(format!("{}/{}", self.endpoint(), task_id))
            .header("x-freepik-api-key", &self.api_key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(MingleError::from_status(status.as_u16(), &text));
        }

        let envelope: MysticEnvelope = response.json().await?;
        Ok(envelope.task().observation())
    }
}

#[async_trait]
impl ImageProvider for FreepikProvider {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedImage> {
        let start = Instant::now();
        let body = MysticRequest::from_request(request);
        let model = body.model;

        let task_id = self.submit(&body).await?;
        tracing::debug!(task_id = %task_id, model, "submitted Freepik Mystic task");

        let task = GenerationTask::new(ProviderId::Freepik, task_id);
        let (url, polls) = self.poller.wait_for_output(self, task).await?;
        let image = self.fetcher.fetch(&url).await?;
        tracing::debug!(
            polls,
            bytes = image.size,
            route = ?image.route,
            "Freepik Mystic image downloaded"
        );

        Ok(GeneratedImage {
            image_ref: image.data_uri,
            provider: ProviderId::Freepik,
            prompt: body.prompt,
            model: Some(model.to_string()),
            attempts: polls,
            duration_ms: Some(start.elapsed().as_millis() as u64),
        })
    }

    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    /// Submits a small fixed task; Mystic has no cheaper authenticated endpoint.
    async fn test_connection(&self) -> Result<()> {
        self.descriptor.ensure_credentials()?;
        let task_id = self.submit(&MysticRequest::connection_check()).await?;
        tracing::info!(task_id = %task_id, "Freepik connection check accepted");
        Ok(())
    }
}

// -- Request types --

#[derive(Debug, Serialize)]
struct MysticRequest {
    prompt: String,
    model: &'static str,
    resolution: &'static str,
    aspect_ratio: &'static str,
    creative_detailing: u32,
    engine: &'static str,
    fixed_generation: bool,
    filter_nsfw: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    style_reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    adherence: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hdr: Option<u32>,
}

impl MysticRequest {
    fn from_request(req: &GenerationRequest) -> Self {
        let style_reference = req
            .reference_image
            .as_ref()
            .map(|img| base64::engine::general_purpose::STANDARD.encode(img));
        let with_reference = style_reference.is_some();

        Self {
            prompt: enhance(
                PromptProfile::Freepik,
                &req.prompt,
                req.style,
                req.asset_type,
                req.aspect_ratio,
                with_reference,
            ),
            model: MysticModel::select(req.style, req.asset_type).as_str(),
            resolution: "2k",
            aspect_ratio: mystic_aspect_ratio(req.aspect_ratio),
            creative_detailing: 50,
            engine: "automatic",
            fixed_generation: false,
            filter_nsfw: true,
            style_reference,
            adherence: with_reference.then_some(60),
            hdr: with_reference.then_some(40),
        }
    }

    /// Cheapest request Mystic accepts: low resolution, fixed seed.
    fn connection_check() -> Self {
        Self {
            prompt: "a simple red circle, minimalist".to_string(),
            model: MysticModel::Zen.as_str(),
            resolution: "1k",
            aspect_ratio: mystic_aspect_ratio(AspectRatio::Square),
            creative_detailing: 30,
            engine: "automatic",
            fixed_generation: true,
            filter_nsfw: true,
            style_reference: None,
            adherence: None,
            hdr: None,
        }
    }
}

// -- Response types --

/// Task fields may arrive at the top level or nested under `data`.
#[derive(Debug, Deserialize)]
struct MysticEnvelope {
    #[serde(default)]
    data: Option<MysticTask>,
    #[serde(flatten)]
    root: MysticTask,
}

impl MysticEnvelope {
    fn task(self) -> MysticTask {
        match self.data {
            Some(data) if data.task_id.is_some() || data.status().is_some() => data,
            _ => self.root,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct MysticTask {
    #[serde(default)]
    task_id: Option<String>,
    #[serde(default)]
    task_status: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    generated: Vec<MysticOutput>,
}

impl MysticTask {
    fn status(&self) -> Option<&str> {
        self.task_status.as_deref().or(self.status.as_deref())
    }

    fn observation(self) -> PollObservation {
        match self.status() {
            Some("COMPLETED") => PollObservation::Completed(
                self.generated.into_iter().map(MysticOutput::into_url).collect(),
            ),
            Some("FAILED") => PollObservation::Failed(None),
            Some("CREATED") | Some("IN_PROGRESS") => PollObservation::InProgress,
            Some(other) => PollObservation::Unknown(other.to_string()),
            None => PollObservation::Unknown("missing status".into()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MysticOutput {
    Url(String),
    Object { url: String },
}

impl MysticOutput {
    fn into_url(self) -> String {
        match self {
            Self::Url(url) | Self::Object { url } => url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::provider::ImageProviderExt;
    use crate::poll::{RecordingSleeper, Sleeper};
    use httpmock::{Method::GET, Method::POST, MockServer};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    const KEY: &str = "FPSX0123456789abcdef";

    fn png_bytes(len: usize) -> Vec<u8> {
        let mut data = vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
        data.resize(len, 3);
        data
    }

    fn provider_with(server: &MockServer, max_polls: u32, sleeper: Arc<dyn Sleeper>) -> FreepikProvider {
        FreepikProvider::builder()
            .api_key(KEY)
            .base_url(server.base_url())
            .poller(TaskPoller::new(Duration::from_secs(2), max_polls).with_sleeper(sleeper))
            .fetcher(NetworkFetcher::new().without_relay())
            .build()
    }

    fn provider(server: &MockServer, max_polls: u32) -> (FreepikProvider, RecordingSleeper) {
        let sleeper = RecordingSleeper::new();
        let provider = provider_with(server, max_polls, Arc::new(sleeper.clone()));
        (provider, sleeper)
    }

    #[test]
    fn test_model_selection() {
        assert_eq!(MysticModel::select(Style::Real, AssetType::Logo), MysticModel::Zen);
        assert_eq!(MysticModel::select(Style::Playful, AssetType::Icon), MysticModel::Zen);
        assert_eq!(MysticModel::select(Style::Vintage, AssetType::Layout), MysticModel::Zen);
        assert_eq!(MysticModel::select(Style::Real, AssetType::Image), MysticModel::Realism);
        assert_eq!(MysticModel::select(Style::Elegant, AssetType::Image), MysticModel::Realism);
        assert_eq!(MysticModel::select(Style::Minimalist, AssetType::Image), MysticModel::Zen);
        assert_eq!(MysticModel::select(Style::Cyberpunk, AssetType::Image), MysticModel::Fluid);
    }

    #[test]
    fn test_aspect_ratio_mapping() {
        assert_eq!(mystic_aspect_ratio(AspectRatio::Square), "square_1_1");
        assert_eq!(mystic_aspect_ratio(AspectRatio::Landscape), "widescreen_16_9");
        assert_eq!(mystic_aspect_ratio(AspectRatio::Portrait), "social_story_9_16");
        assert_eq!(mystic_aspect_ratio(AspectRatio::TwoThree), "portrait_2_3");
    }

    #[test]
    fn test_request_without_reference_omits_reference_fields() {
        let req = GenerationRequest::new("a fox");
        let json = serde_json::to_value(MysticRequest::from_request(&req)).unwrap();
        assert_eq!(json["resolution"], "2k");
        assert_eq!(json["creative_detailing"], 50);
        assert_eq!(json["filter_nsfw"], true);
        assert!(json.get("style_reference").is_none());
        assert!(json.get("adherence").is_none());
        assert!(json.get("hdr").is_none());
    }

    #[test]
    fn test_request_with_reference() {
        let req = GenerationRequest::new("a fox").with_reference_image(vec![1, 2, 3]);
        let json = serde_json::to_value(MysticRequest::from_request(&req)).unwrap();
        assert_eq!(json["style_reference"], "AQID");
        assert_eq!(json["adherence"], 60);
        assert_eq!(json["hdr"], 40);
        assert!(json["prompt"]
            .as_str()
            .unwrap()
            .contains("reference image"));
    }

    #[test]
    fn test_status_parsing() {
        let top: MysticEnvelope =
            serde_json::from_value(json!({"task_status": "IN_PROGRESS"})).unwrap();
        assert_eq!(top.task().observation(), PollObservation::InProgress);

        let nested: MysticEnvelope = serde_json::from_value(json!({
            "data": {"status": "COMPLETED", "generated": ["https://x/a.png", {"url": "https://x/b.png"}]}
        }))
        .unwrap();
        assert_eq!(
            nested.task().observation(),
            PollObservation::Completed(vec!["https://x/a.png".into(), "https://x/b.png".into()])
        );

        let odd: MysticEnvelope = serde_json::from_value(json!({"status": "QUEUED"})).unwrap();
        assert_eq!(odd.task().observation(), PollObservation::Unknown("QUEUED".into()));
    }

    #[test]
    fn test_credentials_from_builder() {
        let server = MockServer::start();
        let (valid, _) = provider(&server, 1);
        assert_eq!(valid.descriptor().credential_status, CredentialStatus::Valid);

        let wrong = FreepikProvider::builder().api_key("sk-not-freepik").build();
        assert_eq!(
            wrong.descriptor().credential_status,
            CredentialStatus::InvalidFormat
        );

        let placeholder = FreepikProvider::builder()
            .api_key("DEMO_KEY_NEEDS_REPLACEMENT")
            .build();
        assert_eq!(
            placeholder.descriptor().credential_status,
            CredentialStatus::Unconfigured
        );
    }

    /// Blocks each sleep until the test releases a permit.
    struct GatedSleeper {
        gate: Arc<Semaphore>,
        inner: RecordingSleeper,
    }

    #[async_trait]
    impl Sleeper for GatedSleeper {
        async fn sleep(&self, duration: Duration) {
            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }
            self.inner.sleep(duration).await;
        }
    }

    #[tokio::test]
    async fn test_task_completes_on_third_poll() {
        let server = MockServer::start_async().await;
        let submit = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/ai/mystic")
                    .header("x-freepik-api-key", KEY);
                then.status(200).json_body(json!({"data": {"task_id": "t1"}}));
            })
            .await;
        let mut created = server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/ai/mystic/t1");
                then.status(200).json_body(json!({"task_status": "CREATED"}));
            })
            .await;
        let download = server
            .mock_async(|when, then| {
                when.method(GET).path("/out/t1.png");
                then.status(200).body(png_bytes(2048));
            })
            .await;

        let gate = Arc::new(Semaphore::new(0));
        let recorded = RecordingSleeper::new();
        let sleeper = GatedSleeper {
            gate: gate.clone(),
            inner: recorded.clone(),
        };
        let provider = provider_with(&server, 30, Arc::new(sleeper));
        let poll = tokio::spawn(async move {
            provider.attempt(&GenerationRequest::new("a fox")).await
        });

        while created.hits_async().await < 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        gate.add_permits(1);
        while created.hits_async().await < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        created.delete_async().await;
        let image_url = server.url("/out/t1.png");
        let done = server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/ai/mystic/t1");
                then.status(200).json_body(json!({
                    "task_status": "COMPLETED",
                    "generated": [image_url]
                }));
            })
            .await;
        gate.add_permits(1);

        let image = poll.await.unwrap().unwrap();
        assert_eq!(image.provider, ProviderId::Freepik);
        assert_eq!(image.attempts, 3);
        assert_eq!(image.model.as_deref(), Some("fluid"));
        assert!(image.image_ref.starts_with("data:image/png;base64,"));
        assert_eq!(recorded.delays(), vec![Duration::from_secs(2); 2]);
        submit.assert_async().await;
        done.assert_hits_async(1).await;
        download.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn test_connection_check_submits_small_task() {
        let server = MockServer::start_async().await;
        let submit = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/ai/mystic")
                    .header("x-freepik-api-key", KEY)
                    .body_includes(r#""resolution":"1k""#)
                    .body_includes(r#""model":"zen""#);
                then.status(200).json_body(json!({"data": {"task_id": "check-1"}}));
            })
            .await;

        let (provider, _) = provider(&server, 1);
        provider.test_connection().await.unwrap();
        submit.assert_async().await;
    }

    #[tokio::test]
    async fn test_connection_check_reports_rejected_key() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/ai/mystic");
                then.status(403).body("forbidden");
            })
            .await;

        let (provider, _) = provider(&server, 1);
        let err = provider.test_connection().await.unwrap_err();
        assert_eq!(err.hint(), "API key lacks permission");

        let offline = FreepikProvider::builder()
            .api_key("sk-bad")
            .base_url(server.base_url())
            .build();
        assert!(matches!(
            offline.test_connection().await,
            Err(MingleError::Credential(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_task_id_is_malformed() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/ai/mystic");
                then.status(200).json_body(json!({"data": {}}));
            })
            .await;
        let poll = server
            .mock_async(|when, then| {
                when.method(GET).path_includes("/v1/ai/mystic/");
                then.status(200).json_body(json!({"task_status": "COMPLETED"}));
            })
            .await;

        let (provider, _) = provider(&server, 30);
        let err = provider
            .attempt(&GenerationRequest::new("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, MingleError::MalformedResponse(_)));
        poll.assert_hits_async(0).await;
    }

    #[tokio::test]
    async fn test_never_terminal_task_times_out() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/ai/mystic");
                then.status(200).json_body(json!({"task_id": "slow"}));
            })
            .await;
        let poll = server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/ai/mystic/slow");
                then.status(200).json_body(json!({"status": "IN_PROGRESS"}));
            })
            .await;

        let (provider, sleeper) = provider(&server, 4);
        let err = provider
            .attempt(&GenerationRequest::new("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, MingleError::Timeout { attempts: 4, .. }));
        poll.assert_hits_async(4).await;
        assert_eq!(sleeper.delays().len(), 3);
    }

    #[tokio::test]
    async fn test_completed_without_images_is_malformed() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/ai/mystic");
                then.status(200).json_body(json!({"task_id": "empty"}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/ai/mystic/empty");
                then.status(200)
                    .json_body(json!({"task_status": "COMPLETED", "generated": []}));
            })
            .await;

        let (provider, _) = provider(&server, 30);
        let err = provider
            .attempt(&GenerationRequest::new("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, MingleError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_quota_on_submit_is_terminal() {
        let server = MockServer::start_async().await;
        let submit = server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/ai/mystic");
                then.status(429).body("slow down");
            })
            .await;

        let (provider, _) = provider(&server, 30);
        let err = provider
            .attempt(&GenerationRequest::new("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, MingleError::RateLimitOrQuota { status: 429, .. }));
        submit.assert_hits_async(1).await;
    }
}
