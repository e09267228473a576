//! Batch generation across providers with guaranteed local fallback.
//!
//! One call to [`Orchestrator::generate_batch`] fans a request out into
//! `variation_count` sub-requests, routes each to a provider, and waits for
//! all of them. Any sub-request that fails, for whatever reason, is replaced
//! by a locally rendered placeholder, so a batch never fails as a whole.

use crate::error::{MingleError, Result};
use crate::fallback::FallbackRenderer;
use crate::image::{
    ConnectionCheck, GenerationRequest, GenerationResult, ImageProvider, ImageProviderExt,
    ProviderDescriptor, ProviderId,
};
use crate::output::{OutputBuffer, OutputEntry, DEFAULT_OUTPUT_CAPACITY};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

/// Sub-requests per batch when not configured.
pub const DEFAULT_VARIATION_COUNT: usize = 4;

/// Upper bound on one sub-request, including polling and downloads.
pub const DEFAULT_SUB_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// How sub-requests are assigned to providers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RoutingPolicy {
    /// Every sub-request goes to one provider.
    Single(ProviderId),
    /// Weighted split; the expanded weight list is cycled over the batch.
    Distributed(Vec<(ProviderId, usize)>),
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self::multi()
    }
}

impl RoutingPolicy {
    /// One to Hugging Face, two to Freepik, one to Pollinations.
    pub fn multi() -> Self {
        Self::Distributed(vec![
            (ProviderId::HuggingFace, 1),
            (ProviderId::Freepik, 2),
            (ProviderId::Pollinations, 1),
        ])
    }

    /// Parses `multi` or a provider id.
    pub fn parse(name: &str) -> Option<Self> {
        if name.trim().eq_ignore_ascii_case("multi") {
            return Some(Self::multi());
        }
        ProviderId::from_name(name).map(Self::Single)
    }

    /// Provider for each of `n` sub-requests, in sub-request order.
    pub fn assign(&self, n: usize) -> Vec<ProviderId> {
        match self {
            Self::Single(id) => vec![*id; n],
            Self::Distributed(weights) => {
                let slots: Vec<ProviderId> = weights
                    .iter()
                    .flat_map(|(id, weight)| std::iter::repeat(*id).take(*weight))
                    .collect();
                if slots.is_empty() {
                    return vec![ProviderId::Fallback; n];
                }
                slots.into_iter().cycle().take(n).collect()
            }
        }
    }
}

/// The aggregated outcome of one request.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationBatch {
    pub id: Uuid,
    pub results: Vec<GenerationResult>,
    pub created_at: DateTime<Utc>,
}

impl GenerationBatch {
    fn new(results: Vec<GenerationResult>) -> Self {
        Self {
            id: Uuid::new_v4(),
            results,
            created_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Number of results rendered locally.
    pub fn fallback_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_fallback).count()
    }

    /// One-line outcome for the user.
    pub fn summary(&self) -> String {
        match self.fallback_count() {
            0 => format!("all {} images generated", self.len()),
            n => format!("used fallback for {} of {} images", n, self.len()),
        }
    }
}

/// Builder for [`Orchestrator`].
pub struct OrchestratorBuilder {
    providers: Vec<Arc<dyn ImageProvider>>,
    routing: RoutingPolicy,
    variation_count: usize,
    sub_request_timeout: Duration,
    output_capacity: usize,
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            routing: RoutingPolicy::default(),
            variation_count: DEFAULT_VARIATION_COUNT,
            sub_request_timeout: DEFAULT_SUB_REQUEST_TIMEOUT,
            output_capacity: DEFAULT_OUTPUT_CAPACITY,
        }
    }
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a provider; a later provider with the same id replaces it.
    pub fn provider(mut self, provider: Arc<dyn ImageProvider>) -> Self {
        self.providers.retain(|p| p.id() != provider.id());
        self.providers.push(provider);
        self
    }

    pub fn routing(mut self, routing: RoutingPolicy) -> Self {
        self.routing = routing;
        self
    }

    /// Sets the number of sub-requests per batch (at least one).
    pub fn variation_count(mut self, count: usize) -> Self {
        self.variation_count = count.max(1);
        self
    }

    pub fn sub_request_timeout(mut self, timeout: Duration) -> Self {
        self.sub_request_timeout = timeout;
        self
    }

    pub fn output_capacity(mut self, capacity: usize) -> Self {
        self.output_capacity = capacity;
        self
    }

    pub fn build(self) -> Orchestrator {
        Orchestrator {
            providers: self.providers,
            routing: RwLock::new(self.routing),
            renderer: FallbackRenderer::new(),
            outputs: Mutex::new(OutputBuffer::new(self.output_capacity)),
            variation_count: self.variation_count,
            sub_request_timeout: self.sub_request_timeout,
        }
    }
}

/// Fans requests out to providers and collects the results.
///
/// Providers are fixed at construction. The routing policy can be switched
/// between batches; the output buffer is only mutated here, under a lock.
pub struct Orchestrator {
    providers: Vec<Arc<dyn ImageProvider>>,
    routing: RwLock<RoutingPolicy>,
    renderer: FallbackRenderer,
    outputs: Mutex<OutputBuffer>,
    variation_count: usize,
    sub_request_timeout: Duration,
}

impl Orchestrator {
    /// Creates a new [`OrchestratorBuilder`].
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    pub fn variation_count(&self) -> usize {
        self.variation_count
    }

    fn provider(&self, id: ProviderId) -> Option<&Arc<dyn ImageProvider>> {
        self.providers.iter().find(|p| p.id() == id)
    }

    /// Generates one batch. Always yields `variation_count` results.
    pub async fn generate_batch(&self, request: &GenerationRequest) -> GenerationBatch {
        let started = Instant::now();
        let assignments = self.routing.read().await.assign(self.variation_count);
        tracing::info!(
            variations = assignments.len(),
            style = %request.style,
            asset_type = ?request.asset_type,
            aspect_ratio = request.aspect_ratio.as_str(),
            "dispatching batch"
        );

        let pending = assignments.into_iter().enumerate().map(|(i, provider)| {
            let index = i as u32;
            let sub_request = request.variation(index + 1);
            async move { self.run_sub_request(index, provider, sub_request).await }
        });
        let results = join_all(pending).await;

        let batch = GenerationBatch::new(results);
        let stored = self.outputs.lock().await.push(&batch.results);
        tracing::info!(
            batch_id = %batch.id,
            fallbacks = batch.fallback_count(),
            stored,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "{}",
            batch.summary()
        );
        batch
    }

    async fn run_sub_request(
        &self,
        index: u32,
        provider_id: ProviderId,
        request: GenerationRequest,
    ) -> GenerationResult {
        if provider_id == ProviderId::Fallback {
            return self.fallback(index, &request, provider_id, None, 0);
        }
        let Some(provider) = self.provider(provider_id) else {
            let err = MingleError::ProviderNotAvailable(provider_id.to_string());
            tracing::warn!(provider = %provider_id, index, "{err}, rendering fallback");
            return self.fallback(index, &request, provider_id, Some(err.to_string()), 0);
        };

        let attempt = AssertUnwindSafe(provider.attempt(&request)).catch_unwind();
        match tokio::time::timeout(self.sub_request_timeout, attempt).await {
            Ok(Ok(Ok(image))) => {
                tracing::debug!(
                    provider = %provider_id,
                    index,
                    attempts = image.attempts,
                    "sub-request succeeded"
                );
                GenerationResult::generated(index, &request, image)
            }
            Ok(Ok(Err(e))) => {
                tracing::warn!(
                    provider = %provider_id,
                    index,
                    "generation failed, rendering fallback: {e}"
                );
                let attempts = match &e {
                    MingleError::Timeout { attempts, .. } => *attempts,
                    _ => 0,
                };
                self.fallback(index, &request, provider_id, Some(e.to_string()), attempts)
            }
            Ok(Err(_)) => {
                let message = format!("{} adapter panicked", provider_id);
                tracing::error!(provider = %provider_id, index, "{message}, rendering fallback");
                self.fallback(index, &request, provider_id, Some(message), 0)
            }
            Err(_) => {
                let message = format!(
                    "sub-request timed out after {}s",
                    self.sub_request_timeout.as_secs()
                );
                tracing::warn!(provider = %provider_id, index, "{message}, rendering fallback");
                self.fallback(index, &request, provider_id, Some(message), 0)
            }
        }
    }

    fn fallback(
        &self,
        index: u32,
        request: &GenerationRequest,
        provider: ProviderId,
        error_message: Option<String>,
        attempts: u32,
    ) -> GenerationResult {
        let rendered = self.renderer.render(
            &request.prompt,
            request.style,
            request.aspect_ratio,
            request.variation_seed,
        );
        GenerationResult::fallback(index, request, provider, rendered, error_message, attempts)
    }

    /// Routes every later batch to `id`, or to the local renderer for
    /// [`ProviderId::Fallback`].
    pub async fn switch_provider(&self, id: ProviderId) -> Result<()> {
        if id != ProviderId::Fallback && self.provider(id).is_none() {
            return Err(MingleError::ProviderNotAvailable(format!(
                "{} is not configured",
                id
            )));
        }
        self.set_routing(RoutingPolicy::Single(id)).await;
        Ok(())
    }

    /// Replaces the routing policy for later batches.
    pub async fn set_routing(&self, routing: RoutingPolicy) {
        tracing::info!(routing = ?routing, "routing changed");
        *self.routing.write().await = routing;
    }

    pub async fn routing(&self) -> RoutingPolicy {
        self.routing.read().await.clone()
    }

    /// Descriptors of the registered providers, in registration order.
    pub fn provider_health(&self) -> Vec<ProviderDescriptor> {
        self.providers
            .iter()
            .map(|p| p.descriptor().clone())
            .collect()
    }

    /// Runs every provider's live connection check concurrently.
    ///
    /// Results follow registration order. A check that outlives the
    /// sub-request timeout is reported as unreachable.
    pub async fn check_connections(&self) -> Vec<ConnectionCheck> {
        let checks = self.providers.iter().map(|provider| async move {
            let id = provider.id();
            let result =
                match tokio::time::timeout(self.sub_request_timeout, provider.test_connection())
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(MingleError::GenerationFailed(format!(
                        "no answer within {}s",
                        self.sub_request_timeout.as_secs()
                    ))),
                };
            let check = ConnectionCheck::from_result(id, &result);
            tracing::info!(provider = %id, ok = check.ok, "{}", check.message);
            check
        });
        join_all(checks).await
    }

    /// Recent results, newest first.
    pub async fn outputs(&self) -> Vec<OutputEntry> {
        self.outputs.lock().await.list()
    }
}
