//! Image generation module.

pub mod prompt;
mod provider;
pub mod providers;
mod types;

pub use provider::{ImageProvider, ImageProviderExt};
pub use types::{
    AspectRatio, AssetType, ConnectionCheck, CredentialStatus, Dimensions, GeneratedImage,
    GenerationRequest, GenerationResult, ImageFormat, ProviderDescriptor, ProviderId, Style,
};
