//! Image provider trait and utilities.

use crate::error::Result;
use crate::image::types::{GeneratedImage, GenerationRequest, ProviderDescriptor, ProviderId};
use crate::poll::{Backoff, Sleeper};
use async_trait::async_trait;
use std::borrow::Cow;
use std::future::Future;

/// Trait for image generation backends.
#[async_trait]
pub trait ImageProvider: Send + Sync {
    /// Generates an image from the given request.
    ///
    /// Callers normally go through [`ImageProviderExt::attempt`], which
    /// applies credential gating first.
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedImage>;

    /// Returns the static description of this provider.
    fn descriptor(&self) -> &ProviderDescriptor;

    /// Checks that the backend accepts the configured credentials.
    ///
    /// The default only consults the descriptor. Backends with a cheap
    /// authenticated endpoint override it with a live request.
    async fn test_connection(&self) -> Result<()> {
        self.descriptor().ensure_credentials()
    }

    /// Returns the id of this provider.
    fn id(&self) -> ProviderId {
        self.descriptor().id
    }

    /// Returns the name of this provider for display.
    fn name(&self) -> &str {
        match self.id() {
            ProviderId::Freepik => "Freepik Mystic",
            ProviderId::HuggingFace => "Hugging Face Inference",
            ProviderId::Pollinations => "Pollinations",
            ProviderId::Fallback => "Local placeholder",
        }
    }
}

/// Uniform entry point used by the orchestrator.
#[async_trait]
pub trait ImageProviderExt: ImageProvider {
    /// Checks credentials without network cost, drops a reference image
    /// the provider cannot use, then generates.
    async fn attempt(&self, request: &GenerationRequest) -> Result<GeneratedImage> {
        let descriptor = self.descriptor();
        descriptor.ensure_credentials()?;

        let request = if request.has_reference() && !descriptor.supports_reference_image {
            tracing::debug!(
                provider = %descriptor.id,
                "provider ignores reference images, sending text prompt only"
            );
            let mut text_only = request.clone();
            text_only.reference_image = None;
            Cow::Owned(text_only)
        } else {
            Cow::Borrowed(request)
        };

        self.generate(&request).await
    }
}

impl<T: ImageProvider + ?Sized> ImageProviderExt for T {}

/// Runs `op`, retrying transient backend errors under `backoff`.
///
/// Returns the value together with the number of attempts spent.
/// Terminal errors (credentials, quota, malformed responses, other
/// statuses) are returned immediately.
pub(crate) async fn retry_transient<T, F, Fut>(
    provider: ProviderId,
    backoff: Backoff,
    sleeper: &dyn Sleeper,
    mut op: F,
) -> Result<(T, u32)>
where
    F: FnMut(u32) -> Fut + Send,
    Fut: Future<Output = Result<T>> + Send,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok((value, attempt)),
            Err(e) if e.is_retryable() && backoff.allows_another(attempt) => {
                let delay = backoff.delay(attempt, e.retry_after());
                tracing::warn!(
                    provider = %provider,
                    attempt,
                    max_attempts = backoff.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "retrying after transient error: {e}"
                );
                sleeper.sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MingleError;
    use crate::image::types::CredentialStatus;
    use crate::poll::RecordingSleeper;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct Spy {
        descriptor: ProviderDescriptor,
        calls: AtomicU32,
        saw_reference: AtomicU32,
    }

    impl Spy {
        fn new(status: CredentialStatus, supports_reference: bool) -> Self {
            Self {
                descriptor: ProviderDescriptor {
                    id: ProviderId::HuggingFace,
                    credential_status: status,
                    supports_reference_image: supports_reference,
                    is_task_based: false,
                },
                calls: AtomicU32::new(0),
                saw_reference: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ImageProvider for Spy {
        async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedImage> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if request.has_reference() {
                self.saw_reference.fetch_add(1, Ordering::SeqCst);
            }
            Ok(GeneratedImage {
                image_ref: "data:image/png;base64,AA==".into(),
                provider: self.id(),
                prompt: request.prompt.clone(),
                model: None,
                attempts: 1,
                duration_ms: None,
            })
        }

        fn descriptor(&self) -> &ProviderDescriptor {
            &self.descriptor
        }
    }

    #[tokio::test]
    async fn test_invalid_credentials_short_circuit() {
        for status in [CredentialStatus::Unconfigured, CredentialStatus::InvalidFormat] {
            let spy = Spy::new(status, false);
            let err = spy
                .attempt(&GenerationRequest::new("x"))
                .await
                .unwrap_err();
            assert!(matches!(err, MingleError::Credential(_)));
            assert_eq!(spy.calls.load(Ordering::SeqCst), 0);
        }
    }

    #[tokio::test]
    async fn test_reference_dropped_when_unsupported() {
        let spy = Spy::new(CredentialStatus::Valid, false);
        let req = GenerationRequest::new("x").with_reference_image(vec![1, 2, 3]);
        let image = spy.attempt(&req).await.unwrap();
        assert_eq!(image.prompt, "x");
        assert_eq!(spy.saw_reference.load(Ordering::SeqCst), 0);

        let capable = Spy::new(CredentialStatus::Valid, true);
        let _ = capable.attempt(&req).await.unwrap();
        assert_eq!(capable.saw_reference.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_transient_honours_hint_and_ceiling() {
        let sleeper = RecordingSleeper::new();
        let backoff = Backoff::linear(Duration::from_secs(10), 3);
        let result: Result<((), u32)> =
            retry_transient(ProviderId::HuggingFace, backoff, &sleeper, |_| async {
                Err(MingleError::from_status(503, r#"{"estimated_time": 4}"#))
            })
            .await;

        assert!(matches!(
            result,
            Err(MingleError::TransientBackend { status: 503, .. })
        ));
        assert_eq!(
            sleeper.delays(),
            vec![Duration::from_secs(4), Duration::from_secs(4)]
        );
    }

    #[tokio::test]
    async fn test_retry_transient_never_retries_quota() {
        let sleeper = RecordingSleeper::new();
        let calls = AtomicU32::new(0);
        let result: Result<((), u32)> = retry_transient(
            ProviderId::HuggingFace,
            Backoff::linear(Duration::from_secs(10), 3),
            &sleeper,
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(MingleError::from_status(402, "payment required")) }
            },
        )
        .await;

        assert!(matches!(
            result,
            Err(MingleError::RateLimitOrQuota { status: 402, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(sleeper.delays().is_empty());
    }

    #[tokio::test]
    async fn test_retry_transient_counts_attempts() {
        let sleeper = RecordingSleeper::new();
        let (value, attempts) = retry_transient(
            ProviderId::HuggingFace,
            Backoff::linear(Duration::from_secs(10), 3),
            &sleeper,
            |attempt| async move {
                if attempt < 2 {
                    Err(MingleError::from_status(503, "loading"))
                } else {
                    Ok(attempt * 100)
                }
            },
        )
        .await
        .unwrap();
        assert_eq!(value, 200);
        assert_eq!(attempts, 2);
        assert_eq!(sleeper.delays(), vec![Duration::from_secs(10)]);
    }
}
