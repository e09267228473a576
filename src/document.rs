//! Placing results into a host document.
//!
//! The document editor is a collaborator; it is reached only through the
//! [`DocumentSurface`] trait. [`place_result`] is the single entry point the
//! rest of the crate needs: fit, centre, caption.

use crate::error::Result;
use crate::image::{AssetType, Dimensions, GenerationResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Document size assumed when the host reports none.
pub const DEFAULT_DOCUMENT_SIZE: Dimensions = Dimensions {
    width: 800,
    height: 600,
};

/// Largest share of each document axis a placed image may take.
const FIT_RATIO: f64 = 0.8;
/// Gap between an image and its caption.
const CAPTION_GAP: f64 = 12.0;
const CAPTION_MAX_CHARS: usize = 40;

/// A point in document coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// A width and height in document units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extent {
    pub width: f64,
    pub height: f64,
}

/// RGBA fill with channels in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub red: f32,
    pub green: f32,
    pub blue: f32,
    pub alpha: f32,
}

impl Color {
    /// Fill used when a result carries no image.
    pub const PLACEHOLDER: Color = Color {
        red: 0.8,
        green: 0.8,
        blue: 0.9,
        alpha: 1.0,
    };
}

/// What the host reports about the open document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DocumentContext {
    pub width: u32,
    pub height: u32,
    pub element_count: usize,
}

/// Rough document category, inferred from its proportions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DocumentKind {
    SquarePost,
    Presentation,
    InstagramPost,
    Banner,
    Story,
    Custom,
}

impl DocumentContext {
    /// Size to lay out against; zeros mean the host did not say.
    pub fn effective_size(&self) -> Dimensions {
        if self.width == 0 || self.height == 0 {
            DEFAULT_DOCUMENT_SIZE
        } else {
            Dimensions {
                width: self.width,
                height: self.height,
            }
        }
    }

    pub fn kind(&self) -> DocumentKind {
        let size = self.effective_size();
        let ratio = f64::from(size.width) / f64::from(size.height);
        if (ratio - 1.0).abs() < 0.1 {
            DocumentKind::SquarePost
        } else if (ratio - 16.0 / 9.0).abs() < 0.1 {
            DocumentKind::Presentation
        } else if (ratio - 0.8).abs() < 0.1 {
            DocumentKind::InstagramPost
        } else if ratio > 2.0 {
            DocumentKind::Banner
        } else if ratio < 0.8 {
            DocumentKind::Story
        } else {
            DocumentKind::Custom
        }
    }

    /// Asset types that suit this document, best first.
    pub fn recommended_asset_types(&self) -> &'static [AssetType] {
        match self.kind() {
            DocumentKind::SquarePost => &[AssetType::Image, AssetType::Icon, AssetType::Logo],
            DocumentKind::Presentation => &[AssetType::Layout, AssetType::Image],
            DocumentKind::InstagramPost | DocumentKind::Banner | DocumentKind::Story => {
                &[AssetType::Image, AssetType::Layout]
            }
            DocumentKind::Custom => &AssetType::ALL,
        }
    }
}

/// Operations the host document editor provides.
#[async_trait]
pub trait DocumentSurface: Send + Sync {
    async fn insert_image(&self, image_ref: &str, size: Extent, position: Point) -> Result<()>;

    async fn insert_rectangle(&self, size: Extent, fill: Color, position: Point) -> Result<()>;

    async fn insert_text(&self, content: &str, position: Point) -> Result<()>;

    async fn document_context(&self) -> Result<DocumentContext>;
}

/// Where a result ended up.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Placement {
    pub position: Point,
    pub size: Extent,
    pub caption: String,
}

/// Scales `result` to fit the document, centres it and adds a caption.
///
/// A result without an image is placed as a plain rectangle of the same
/// size, so the layout stays predictable.
pub async fn place_result(
    surface: &dyn DocumentSurface,
    result: &GenerationResult,
) -> Result<Placement> {
    let context = surface.document_context().await?;
    let document = context.effective_size();
    let size = fit(result.dimensions, document);
    let position = Point {
        x: (f64::from(document.width) - size.width) / 2.0,
        y: (f64::from(document.height) - size.height) / 2.0,
    };

    match result.image_ref.as_deref() {
        Some(image_ref) => surface.insert_image(image_ref, size, position).await?,
        None => {
            surface
                .insert_rectangle(size, Color::PLACEHOLDER, position)
                .await?
        }
    }

    let caption = caption_for(result);
    surface
        .insert_text(
            &caption,
            Point {
                x: position.x,
                y: position.y + size.height + CAPTION_GAP,
            },
        )
        .await?;

    tracing::debug!(
        provider = %result.provider,
        width = size.width,
        height = size.height,
        elements = context.element_count,
        "placed result in document"
    );

    Ok(Placement {
        position,
        size,
        caption,
    })
}

/// Largest size with the image's proportions inside the fit box; never upscales.
fn fit(image: Dimensions, document: Dimensions) -> Extent {
    let (w, h) = (f64::from(image.width.max(1)), f64::from(image.height.max(1)));
    let max_w = f64::from(document.width) * FIT_RATIO;
    let max_h = f64::from(document.height) * FIT_RATIO;
    let scale = (max_w / w).min(max_h / h).min(1.0);
    Extent {
        width: (w * scale).round(),
        height: (h * scale).round(),
    }
}

fn caption_for(result: &GenerationResult) -> String {
    let prompt: String = if result.prompt.chars().count() > CAPTION_MAX_CHARS {
        let cut: String = result.prompt.chars().take(CAPTION_MAX_CHARS - 3).collect();
        format!("{cut}...")
    } else {
        result.prompt.clone()
    };
    if result.is_fallback {
        format!("Placeholder: {prompt}")
    } else {
        format!("{}: {prompt}", result.provider)
    }
}
