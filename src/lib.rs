//! Mingle - multi-provider AI image generation with a guaranteed local fallback.
//!
//! A request fans out into several variations, each routed to a backend
//! (Freepik Mystic, Hugging Face Inference, Pollinations). Whatever goes
//! wrong with a backend, be it missing keys, quota, a model that never
//! finishes loading or a task that never completes, the affected variation
//! is replaced by a deterministic placeholder rendered locally, so a batch
//! always comes back complete.
//!
//! # Quick Start
//!
//! ```no_run
//! use mingle::{AssetType, GenerationRequest, StudioConfig, Style};
//!
//! #[tokio::main]
//! async fn main() {
//!     let orchestrator = StudioConfig::from_env().build_orchestrator();
//!     let request = GenerationRequest::new("a lighthouse at dusk")
//!         .with_style(Style::Vintage)
//!         .with_asset_type(AssetType::Image);
//!
//!     let batch = orchestrator.generate_batch(&request).await;
//!     println!("{}", batch.summary());
//! }
//! ```
//!
//! # Features
//!
//! - `freepik`: Freepik Mystic (task-based, accepts a style reference)
//! - `huggingface`: Hugging Face Inference API
//! - `pollinations`: Pollinations (keyless)
//! - `cli`: the `mingle` command-line interface

pub mod config;
pub mod document;
mod error;
pub mod fallback;
pub mod fetch;
pub mod image;
pub mod orchestrator;
pub mod output;
pub mod poll;

// Re-export error types at crate root
pub use error::{MingleError, Result};

pub use config::StudioConfig;
pub use document::{place_result, DocumentContext, DocumentSurface, Placement};
pub use fallback::{FallbackRenderer, ShapeKind};
pub use fetch::NetworkFetcher;
pub use image::{
    AspectRatio, AssetType, ConnectionCheck, CredentialStatus, Dimensions, GeneratedImage,
    GenerationRequest, GenerationResult, ImageFormat, ImageProvider, ImageProviderExt,
    ProviderDescriptor, ProviderId, Style,
};
pub use orchestrator::{GenerationBatch, Orchestrator, RoutingPolicy};
pub use output::{OutputBuffer, OutputEntry};
pub use poll::{Sleeper, TaskPoller};

#[cfg(feature = "freepik")]
pub use image::providers::{FreepikProvider, FreepikProviderBuilder, MysticModel};

#[cfg(feature = "huggingface")]
pub use image::providers::{HuggingFaceModel, HuggingFaceProvider, HuggingFaceProviderBuilder};

#[cfg(feature = "pollinations")]
pub use image::providers::{PollinationsProvider, PollinationsProviderBuilder};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::error::{MingleError, Result};
    pub use crate::image::{
        GenerationRequest, GenerationResult, ImageProvider, ImageProviderExt, ProviderId,
    };
    pub use crate::orchestrator::{GenerationBatch, Orchestrator, RoutingPolicy};
    pub use crate::StudioConfig;
}
