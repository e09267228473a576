//! Core types for image generation.

use crate::fallback::{RenderedFallback, ShapeKind};
use serde::{Deserialize, Serialize};

/// Supported image formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// PNG format (lossless).
    #[default]
    Png,
    /// JPEG format (lossy).
    Jpeg,
    /// WebP format (modern, efficient).
    WebP,
}

impl ImageFormat {
    /// Returns the file extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::WebP => "webp",
        }
    }

    /// Returns the MIME type for this format.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::WebP => "image/webp",
        }
    }

    /// Attempts to detect format from a MIME type.
    pub fn from_mime_type(mime: &str) -> Option<Self> {
        match mime.split(';').next()?.trim().to_lowercase().as_str() {
            "image/png" => Some(Self::Png),
            "image/jpeg" | "image/jpg" => Some(Self::Jpeg),
            "image/webp" => Some(Self::WebP),
            _ => None,
        }
    }

    /// Detects image format from magic bytes.
    pub fn from_magic_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < 12 {
            return None;
        }

        // PNG: 89 50 4E 47 0D 0A 1A 0A
        if data.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
            return Some(Self::Png);
        }

        // JPEG: FF D8 FF
        if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            return Some(Self::Jpeg);
        }

        // WebP: RIFF....WEBP
        if data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
            return Some(Self::WebP);
        }

        None
    }
}

/// Visual style selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Style {
    Colourful,
    Cyberpunk,
    Real,
    #[default]
    Modern,
    Minimalist,
    Vintage,
    Bold,
    Elegant,
    Playful,
}

impl Style {
    /// All styles, in menu order.
    pub const ALL: [Style; 9] = [
        Self::Colourful,
        Self::Cyberpunk,
        Self::Real,
        Self::Modern,
        Self::Minimalist,
        Self::Vintage,
        Self::Bold,
        Self::Elegant,
        Self::Playful,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Colourful => "colourful",
            Self::Cyberpunk => "cyberpunk",
            Self::Real => "real",
            Self::Modern => "modern",
            Self::Minimalist => "minimalist",
            Self::Vintage => "vintage",
            Self::Bold => "bold",
            Self::Elegant => "elegant",
            Self::Playful => "playful",
        }
    }

    /// Parses a style name, falling back to [`Style::Modern`].
    pub fn from_name(name: &str) -> Self {
        let name = name.trim().to_lowercase();
        match name.as_str() {
            "colorful" => Self::Colourful,
            _ => Self::ALL
                .into_iter()
                .find(|s| s.as_str() == name)
                .unwrap_or_default(),
        }
    }
}

impl std::fmt::Display for Style {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of asset being generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    #[default]
    Image,
    Icon,
    Logo,
    Layout,
}

impl AssetType {
    /// All asset types.
    pub const ALL: [AssetType; 4] = [Self::Image, Self::Icon, Self::Logo, Self::Layout];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Icon => "icon",
            Self::Logo => "logo",
            Self::Layout => "layout",
        }
    }

    /// Parses an asset type name, falling back to [`AssetType::Image`].
    pub fn from_name(name: &str) -> Self {
        let name = name.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == name)
            .unwrap_or_default()
    }
}

impl std::fmt::Display for AssetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Common aspect ratios for image generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AspectRatio {
    /// 1:1 square aspect ratio.
    #[default]
    #[serde(rename = "1:1")]
    Square,
    /// 16:9 landscape (widescreen) aspect ratio.
    #[serde(rename = "16:9")]
    Landscape,
    /// 9:16 portrait (tall) aspect ratio.
    #[serde(rename = "9:16")]
    Portrait,
    /// 4:3 standard landscape aspect ratio.
    #[serde(rename = "4:3")]
    Standard,
    /// 3:4 standard portrait aspect ratio.
    #[serde(rename = "3:4")]
    StandardPortrait,
    /// 3:2 photo landscape aspect ratio.
    #[serde(rename = "3:2")]
    ThreeTwo,
    /// 2:3 photo portrait aspect ratio.
    #[serde(rename = "2:3")]
    TwoThree,
}

impl AspectRatio {
    /// All supported aspect ratios.
    pub const ALL: [AspectRatio; 7] = [
        Self::Square,
        Self::Landscape,
        Self::Portrait,
        Self::Standard,
        Self::StandardPortrait,
        Self::ThreeTwo,
        Self::TwoThree,
    ];

    /// Returns the aspect ratio as a string (e.g., "16:9").
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Square => "1:1",
            Self::Landscape => "16:9",
            Self::Portrait => "9:16",
            Self::Standard => "4:3",
            Self::StandardPortrait => "3:4",
            Self::ThreeTwo => "3:2",
            Self::TwoThree => "2:3",
        }
    }

    /// Parses a ratio such as "16:9", falling back to [`AspectRatio::Square`].
    pub fn from_name(name: &str) -> Self {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|r| r.as_str() == name)
            .unwrap_or_default()
    }

    /// Canvas size in pixels used for local rendering and keyless backends.
    pub fn dimensions(&self) -> Dimensions {
        let (width, height) = match self {
            Self::Square => (512, 512),
            Self::Landscape => (768, 432),
            Self::Portrait => (432, 768),
            Self::Standard => (640, 480),
            Self::StandardPortrait => (480, 640),
            Self::ThreeTwo => (600, 400),
            Self::TwoThree => (400, 600),
        };
        Dimensions { width, height }
    }
}

impl std::fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Width and height in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Identifies a generation backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    /// Freepik Mystic (task-based, accepts style references).
    Freepik,
    /// Hugging Face Inference API (synchronous).
    HuggingFace,
    /// Pollinations (keyless, fetched through the relay chain).
    Pollinations,
    /// Local placeholder renderer.
    Fallback,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Freepik => "freepik",
            Self::HuggingFace => "huggingface",
            Self::Pollinations => "pollinations",
            Self::Fallback => "fallback",
        }
    }

    /// Parses a provider id; unknown names yield `None`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "freepik" => Some(Self::Freepik),
            "huggingface" | "hf" => Some(Self::HuggingFace),
            "pollinations" => Some(Self::Pollinations),
            "fallback" => Some(Self::Fallback),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of a provider's configured credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialStatus {
    /// No key, or a placeholder value.
    Unconfigured,
    /// A key is present but does not have the provider's shape.
    InvalidFormat,
    Valid,
}

impl CredentialStatus {
    /// Classifies a raw key against the placeholders and prefix a provider expects.
    pub fn classify(key: Option<&str>, required_prefix: &str) -> Self {
        let Some(key) = key.map(str::trim).filter(|k| !k.is_empty()) else {
            return Self::Unconfigured;
        };
        if key == "DEMO_KEY_NEEDS_REPLACEMENT" || (key.starts_with("YOUR_") && key.ends_with("_HERE"))
        {
            return Self::Unconfigured;
        }
        if key.starts_with(required_prefix) {
            Self::Valid
        } else {
            Self::InvalidFormat
        }
    }
}

/// Static facts about a provider, fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub id: ProviderId,
    pub credential_status: CredentialStatus,
    pub supports_reference_image: bool,
    pub is_task_based: bool,
}

impl ProviderDescriptor {
    /// Returns an error without touching the network unless credentials are valid.
    pub fn ensure_credentials(&self) -> crate::Result<()> {
        match self.credential_status {
            CredentialStatus::Valid => Ok(()),
            CredentialStatus::Unconfigured => Err(crate::MingleError::Credential(format!(
                "{} API key not configured",
                self.id
            ))),
            CredentialStatus::InvalidFormat => Err(crate::MingleError::Credential(format!(
                "{} API key has an invalid format",
                self.id
            ))),
        }
    }
}

/// Outcome of a live connection check against one provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionCheck {
    pub provider: ProviderId,
    pub ok: bool,
    pub message: String,
}

impl ConnectionCheck {
    pub fn from_result(provider: ProviderId, result: &crate::Result<()>) -> Self {
        match result {
            Ok(()) => Self {
                provider,
                ok: true,
                message: "connected".to_string(),
            },
            Err(e) => Self {
                provider,
                ok: false,
                message: e.hint(),
            },
        }
    }
}

/// A request to generate one or more image variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// The text prompt describing the desired image.
    pub prompt: String,
    pub style: Style,
    pub asset_type: AssetType,
    pub aspect_ratio: AspectRatio,
    /// Style reference image (raw bytes).
    #[serde(skip)]
    pub reference_image: Option<Vec<u8>>,
    /// Seed perturbed per variation.
    pub variation_seed: u64,
}

impl GenerationRequest {
    /// Creates a new request with the given prompt and default selectors.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            style: Style::default(),
            asset_type: AssetType::default(),
            aspect_ratio: AspectRatio::default(),
            reference_image: None,
            variation_seed: 0,
        }
    }

    pub fn with_style(mut self, style: Style) -> Self {
        self.style = style;
        self
    }

    pub fn with_asset_type(mut self, asset_type: AssetType) -> Self {
        self.asset_type = asset_type;
        self
    }

    /// Sets the aspect ratio.
    pub fn with_aspect_ratio(mut self, ratio: AspectRatio) -> Self {
        self.aspect_ratio = ratio;
        self
    }

    /// Sets a style reference image.
    pub fn with_reference_image(mut self, image: Vec<u8>) -> Self {
        self.reference_image = Some(image);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.variation_seed = seed;
        self
    }

    pub fn has_reference(&self) -> bool {
        self.reference_image.is_some()
    }

    /// Clones this request as the `k`-th variation of a batch (1-based).
    pub fn variation(&self, k: u32) -> Self {
        let mut sub = self.clone();
        sub.prompt = format!("{}, variation {}", self.prompt, k);
        sub.variation_seed = self.variation_seed.wrapping_add(u64::from(k));
        sub
    }
}

/// A successful backend generation, already normalized to a data URI.
#[derive(Debug, Clone)]
#[must_use = "generated image should be stored or inserted"]
pub struct GeneratedImage {
    /// `data:<mime>;base64,...` reference to the image.
    pub image_ref: String,
    pub provider: ProviderId,
    /// The prompt exactly as sent to the backend.
    pub prompt: String,
    pub model: Option<String>,
    /// Requests (sync) or polls (task-based) spent on this image.
    pub attempts: u32,
    pub duration_ms: Option<u64>,
}

/// Outcome of one sub-request, as seen by callers of the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResult {
    /// Position within its batch.
    pub index: u32,
    pub success: bool,
    pub image_ref: Option<String>,
    /// Provider the sub-request was routed to.
    pub provider: ProviderId,
    pub prompt: String,
    pub is_fallback: bool,
    pub error_message: Option<String>,
    pub attempts: u32,
    pub model: Option<String>,
    pub style: Style,
    pub asset_type: AssetType,
    pub dimensions: Dimensions,
    /// Shape vocabulary drawn, for locally rendered results.
    pub fallback_shape: Option<ShapeKind>,
}

impl GenerationResult {
    /// Wraps a backend success.
    pub fn generated(index: u32, request: &GenerationRequest, image: GeneratedImage) -> Self {
        Self {
            index,
            success: true,
            image_ref: Some(image.image_ref),
            provider: image.provider,
            prompt: image.prompt,
            is_fallback: false,
            error_message: None,
            attempts: image.attempts,
            model: image.model,
            style: request.style,
            asset_type: request.asset_type,
            dimensions: request.aspect_ratio.dimensions(),
            fallback_shape: None,
        }
    }

    /// Wraps a locally rendered placeholder standing in for `provider`.
    ///
    /// Still a success: the caller always gets an image.
    pub fn fallback(
        index: u32,
        request: &GenerationRequest,
        provider: ProviderId,
        rendered: RenderedFallback,
        error_message: Option<String>,
        attempts: u32,
    ) -> Self {
        Self {
            index,
            success: true,
            image_ref: Some(rendered.data_uri),
            provider,
            prompt: request.prompt.clone(),
            is_fallback: true,
            error_message,
            attempts,
            model: Some("local-fallback".to_string()),
            style: request.style,
            asset_type: request.asset_type,
            dimensions: rendered.dimensions,
            fallback_shape: Some(rendered.shape),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: [u8; 12] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
    const JPEG_MAGIC: [u8; 12] = [0xFF, 0xD8, 0xFF, 0xE0, 0, 0, 0, 0, 0, 0, 0, 0];
    const WEBP_MAGIC: [u8; 12] = *b"RIFF\x00\x00\x00\x00WEBP";

    #[test]
    fn test_format_from_magic_bytes() {
        assert_eq!(
            ImageFormat::from_magic_bytes(&PNG_MAGIC),
            Some(ImageFormat::Png)
        );
        assert_eq!(
            ImageFormat::from_magic_bytes(&JPEG_MAGIC),
            Some(ImageFormat::Jpeg)
        );
        assert_eq!(
            ImageFormat::from_magic_bytes(&WEBP_MAGIC),
            Some(ImageFormat::WebP)
        );
        assert_eq!(ImageFormat::from_magic_bytes(b"<html></html>"), None);
    }

    #[test]
    fn test_format_from_mime_type() {
        assert_eq!(
            ImageFormat::from_mime_type("image/jpeg; charset=binary"),
            Some(ImageFormat::Jpeg)
        );
        assert_eq!(ImageFormat::from_mime_type("text/html"), None);
    }

    #[test]
    fn test_unknown_names_fall_back_to_defaults() {
        assert_eq!(Style::from_name("steampunk"), Style::Modern);
        assert_eq!(Style::from_name("Cyberpunk"), Style::Cyberpunk);
        assert_eq!(Style::from_name("colorful"), Style::Colourful);
        assert_eq!(AssetType::from_name("banner"), AssetType::Image);
        assert_eq!(AssetType::from_name("logo"), AssetType::Logo);
        assert_eq!(AspectRatio::from_name("5:4"), AspectRatio::Square);
        assert_eq!(AspectRatio::from_name("9:16"), AspectRatio::Portrait);
    }

    #[test]
    fn test_dimensions_match_orientation() {
        for ratio in AspectRatio::ALL {
            let d = ratio.dimensions();
            match ratio {
                AspectRatio::Square => assert_eq!(d.width, d.height),
                AspectRatio::Landscape | AspectRatio::Standard | AspectRatio::ThreeTwo => {
                    assert!(d.width > d.height)
                }
                _ => assert!(d.width < d.height),
            }
        }
    }

    #[test]
    fn test_credential_classification() {
        assert_eq!(
            CredentialStatus::classify(None, "hf_"),
            CredentialStatus::Unconfigured
        );
        assert_eq!(
            CredentialStatus::classify(Some("  "), "hf_"),
            CredentialStatus::Unconfigured
        );
        assert_eq!(
            CredentialStatus::classify(Some("YOUR_FREEPIK_API_KEY_HERE"), "FPSX"),
            CredentialStatus::Unconfigured
        );
        assert_eq!(
            CredentialStatus::classify(Some("DEMO_KEY_NEEDS_REPLACEMENT"), "FPSX"),
            CredentialStatus::Unconfigured
        );
        assert_eq!(
            CredentialStatus::classify(Some("sk-123"), "hf_"),
            CredentialStatus::InvalidFormat
        );
        assert_eq!(
            CredentialStatus::classify(Some("hf_abc"), "hf_"),
            CredentialStatus::Valid
        );
    }

    #[test]
    fn test_descriptor_gates_invalid_credentials() {
        let descriptor = ProviderDescriptor {
            id: ProviderId::Freepik,
            credential_status: CredentialStatus::InvalidFormat,
            supports_reference_image: true,
            is_task_based: true,
        };
        assert!(matches!(
            descriptor.ensure_credentials(),
            Err(crate::MingleError::Credential(_))
        ));
    }

    #[test]
    fn test_variation_perturbs_prompt_and_seed() {
        let req = GenerationRequest::new("a red circle").with_seed(10);
        let sub = req.variation(2);
        assert_eq!(sub.prompt, "a red circle, variation 2");
        assert_eq!(sub.variation_seed, 12);
        assert_eq!(req.prompt, "a red circle");
    }

    #[test]
    fn test_provider_id_round_trip_names() {
        assert_eq!(ProviderId::from_name("hf"), Some(ProviderId::HuggingFace));
        assert_eq!(ProviderId::from_name("FREEPIK"), Some(ProviderId::Freepik));
        assert_eq!(ProviderId::from_name("dalle"), None);
        assert_eq!(ProviderId::Pollinations.to_string(), "pollinations");
    }
}
