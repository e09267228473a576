//! Backend-specific prompt enhancement.
//!
//! Every backend gets the same composition order:
//!
//! 1. the raw prompt,
//! 2. a reference-image clause when a style reference is attached,
//! 3. an asset-type clause,
//! 4. a style clause,
//! 5. the profile's quality terms,
//! 6. a composition clause for 1:1, 16:9 and 9:16 only.
//!
//! Only the clause tables differ between profiles.

use crate::image::types::{AspectRatio, AssetType, Style};

/// Which backend's vocabulary to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptProfile {
    /// Freepik Mystic.
    Freepik,
    /// Hugging Face diffusion models.
    HuggingFace,
    /// Pollinations; shares the diffusion vocabulary with short quality terms.
    Pollinations,
}

impl PromptProfile {
    fn reference_clause(&self) -> &'static str {
        match self {
            Self::Freepik => "with style and aesthetic inspired by the reference image",
            Self::HuggingFace | Self::Pollinations => {
                "inspired by uploaded image, maintaining similar style and composition"
            }
        }
    }

    fn asset_clause(&self, asset_type: AssetType) -> &'static str {
        match (self, asset_type) {
            (Self::Freepik, AssetType::Image) => "high quality, detailed, professional photography",
            (Self::Freepik, AssetType::Icon) => {
                "simple icon design, clean, minimal, vector style, clear symbol"
            }
            (Self::Freepik, AssetType::Logo) => {
                "professional logo design, clean, memorable, brand identity, vector style"
            }
            (Self::Freepik, AssetType::Layout) => {
                "clean layout design, organized, professional, modern interface"
            }
            (_, AssetType::Image) => "high quality, detailed, professional",
            (_, AssetType::Icon) => {
                "simple icon, clean design, minimal, vector style, transparent background"
            }
            (_, AssetType::Logo) => {
                "logo design, clean, professional, minimal, vector style, brand identity"
            }
            (_, AssetType::Layout) => {
                "clean layout, organized design, professional, modern interface"
            }
        }
    }

    fn style_clause(&self, style: Style) -> &'static str {
        match (self, style) {
            (Self::Freepik, Style::Colourful) => {
                "vibrant colors, bright, colorful, energetic, lively"
            }
            (Self::Freepik, Style::Cyberpunk) => {
                "cyberpunk aesthetic, neon lights, futuristic, dark atmosphere, digital"
            }
            (Self::Freepik, Style::Real) => {
                "photorealistic, natural lighting, detailed, lifelike, authentic"
            }
            (Self::Freepik, Style::Modern) => {
                "modern design, contemporary, sleek, minimalist, current"
            }
            (Self::Freepik, Style::Minimalist) => {
                "minimalist design, simple, clean, white space, elegant"
            }
            (Self::Freepik, Style::Vintage) => {
                "vintage style, retro, classic, aged, nostalgic, timeless"
            }
            (Self::Freepik, Style::Bold) => {
                "bold design, strong colors, high contrast, dramatic, impactful"
            }
            (Self::Freepik, Style::Elegant) => {
                "elegant, sophisticated, refined, luxury, premium, graceful"
            }
            (Self::Freepik, Style::Playful) => {
                "playful, fun, whimsical, creative, joyful, lighthearted"
            }
            (_, Style::Colourful) => "vibrant colors, bright, colorful, cheerful, lively design",
            (_, Style::Cyberpunk) => "cyberpunk style, neon lights, dark futuristic, sci-fi, electronic",
            (_, Style::Real) => "realistic, photorealistic, natural lighting, detailed, lifelike",
            (_, Style::Modern) => "modern design, contemporary, sleek, clean lines",
            (_, Style::Minimalist) => "minimalist, simple, clean, white space, elegant",
            (_, Style::Vintage) => "vintage style, retro, classic, aged, nostalgic",
            (_, Style::Bold) => "bold design, vibrant colors, strong contrast, dynamic",
            (_, Style::Elegant) => "elegant, sophisticated, refined, luxury, premium",
            (_, Style::Playful) => "playful, fun, colorful, whimsical, creative",
        }
    }

    fn quality_terms(&self) -> &'static str {
        match self {
            Self::Freepik => "masterpiece quality, ultra detailed, sharp focus, professional",
            Self::HuggingFace => "masterpiece, best quality, highly detailed, sharp focus",
            Self::Pollinations => "best quality, highly detailed",
        }
    }

    fn composition_clause(&self, aspect_ratio: AspectRatio) -> Option<&'static str> {
        match (self, aspect_ratio) {
            (_, AspectRatio::Square) => Some("square composition, centered"),
            (Self::Freepik, AspectRatio::Landscape) => Some("wide composition, landscape format"),
            (Self::Freepik, AspectRatio::Portrait) => Some("tall composition, portrait format"),
            (_, AspectRatio::Landscape) => Some("wide composition, landscape orientation"),
            (_, AspectRatio::Portrait) => Some("tall composition, portrait orientation"),
            _ => None,
        }
    }
}

/// Builds the prompt string sent to a backend.
pub fn enhance(
    profile: PromptProfile,
    prompt: &str,
    style: Style,
    asset_type: AssetType,
    aspect_ratio: AspectRatio,
    has_reference: bool,
) -> String {
    let mut clauses: Vec<&str> = Vec::with_capacity(6);
    let prompt = prompt.trim();
    if !prompt.is_empty() {
        clauses.push(prompt);
    }
    if has_reference {
        clauses.push(profile.reference_clause());
    }
    clauses.push(profile.asset_clause(asset_type));
    clauses.push(profile.style_clause(style));
    clauses.push(profile.quality_terms());
    if let Some(composition) = profile.composition_clause(aspect_ratio) {
        clauses.push(composition);
    }
    clauses.join(", ")
}
