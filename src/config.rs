//! Runtime configuration and orchestrator assembly.

use crate::fetch::{NetworkFetcher, DEFAULT_MIN_PAYLOAD_BYTES, DEFAULT_RELAY_URL};
use crate::orchestrator::{
    Orchestrator, RoutingPolicy, DEFAULT_SUB_REQUEST_TIMEOUT, DEFAULT_VARIATION_COUNT,
};
use crate::output::DEFAULT_OUTPUT_CAPACITY;
use crate::poll::{TaskPoller, DEFAULT_MAX_POLLS, DEFAULT_POLL_INTERVAL};
use std::str::FromStr;
use std::time::Duration;

/// Orchestrator knobs, with `MINGLE_*` environment overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudioConfig {
    pub variation_count: usize,
    pub poll_interval: Duration,
    pub poll_max_attempts: u32,
    pub output_capacity: usize,
    pub sub_request_timeout: Duration,
    /// CORS relay; `None` disables the relay step.
    pub relay_url: Option<String>,
    pub min_payload_bytes: usize,
    pub routing: RoutingPolicy,
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            variation_count: DEFAULT_VARIATION_COUNT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            poll_max_attempts: DEFAULT_MAX_POLLS,
            output_capacity: DEFAULT_OUTPUT_CAPACITY,
            sub_request_timeout: DEFAULT_SUB_REQUEST_TIMEOUT,
            relay_url: Some(DEFAULT_RELAY_URL.to_string()),
            min_payload_bytes: DEFAULT_MIN_PAYLOAD_BYTES,
            routing: RoutingPolicy::default(),
        }
    }
}

impl StudioConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by `lookup`. Unparseable values are logged and ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(n) = parsed::<usize>(&lookup, "MINGLE_VARIATIONS") {
            config.variation_count = n.max(1);
        }
        if let Some(ms) = parsed::<u64>(&lookup, "MINGLE_POLL_INTERVAL_MS") {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(n) = parsed::<u32>(&lookup, "MINGLE_POLL_MAX_ATTEMPTS") {
            config.poll_max_attempts = n.max(1);
        }
        if let Some(secs) = parsed::<u64>(&lookup, "MINGLE_TIMEOUT_SECS") {
            config.sub_request_timeout = Duration::from_secs(secs);
        }
        if let Some(relay) = lookup("MINGLE_RELAY_URL") {
            let relay = relay.trim();
            config.relay_url = match relay {
                "" | "off" | "none" => None,
                url => Some(url.to_string()),
            };
        }
        if let Some(name) = lookup("MINGLE_PROVIDER") {
            match RoutingPolicy::parse(&name) {
                Some(routing) => config.routing = routing,
                None => tracing::warn!(value = %name, "ignoring unknown MINGLE_PROVIDER"),
            }
        }

        config
    }

    /// Fetcher configured with this relay and payload threshold.
    pub fn fetcher(&self) -> NetworkFetcher {
        let fetcher = NetworkFetcher::new().min_payload_bytes(self.min_payload_bytes);
        match &self.relay_url {
            Some(url) => fetcher.relay_url(url.clone()),
            None => fetcher.without_relay(),
        }
    }

    pub fn poller(&self) -> TaskPoller {
        TaskPoller::new(self.poll_interval, self.poll_max_attempts)
    }

    #[cfg(feature = "freepik")]
    fn freepik(&self, fetcher: &NetworkFetcher) -> crate::image::providers::FreepikProvider {
        crate::image::providers::FreepikProvider::builder()
            .poller(self.poller())
            .fetcher(fetcher.clone())
            .build()
    }

    #[cfg(feature = "huggingface")]
    fn huggingface(
        &self,
        fetcher: &NetworkFetcher,
    ) -> crate::image::providers::HuggingFaceProvider {
        crate::image::providers::HuggingFaceProvider::builder()
            .fetcher(fetcher.clone())
            .build()
    }

    #[cfg(feature = "pollinations")]
    fn pollinations(
        &self,
        fetcher: &NetworkFetcher,
    ) -> crate::image::providers::PollinationsProvider {
        crate::image::providers::PollinationsProvider::builder()
            .fetcher(fetcher.clone())
            .build()
    }

    /// Builds every compiled-in provider once and hands them to a new orchestrator.
    ///
    /// Keys come from each provider's environment variable; a missing key
    /// leaves that provider registered but unconfigured, so its share of a
    /// batch is rendered locally.
    pub fn build_orchestrator(&self) -> Orchestrator {
        // One fetcher, so every provider shares a single connection pool.
        #[allow(unused_variables)]
        let fetcher = self.fetcher();
        #[allow(unused_mut)]
        let mut builder = Orchestrator::builder()
            .routing(self.routing.clone())
            .variation_count(self.variation_count)
            .sub_request_timeout(self.sub_request_timeout)
            .output_capacity(self.output_capacity);

        #[cfg(feature = "freepik")]
        {
            builder = builder.provider(std::sync::Arc::new(self.freepik(&fetcher)));
        }

        #[cfg(feature = "huggingface")]
        {
            builder = builder.provider(std::sync::Arc::new(self.huggingface(&fetcher)));
        }

        #[cfg(feature = "pollinations")]
        {
            builder = builder.provider(std::sync::Arc::new(self.pollinations(&fetcher)));
        }

        let orchestrator = builder.build();
        for descriptor in orchestrator.provider_health() {
            tracing::info!(
                provider = %descriptor.id,
                credentials = ?descriptor.credential_status,
                "provider registered"
            );
        }
        orchestrator
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable setting");
            None
        }
    }
}
