//! Local placeholder rendering.
//!
//! Used whenever every remote attempt for a sub-request has failed. The
//! output depends only on the request: the same prompt, style, aspect
//! ratio and seed always produce the same PNG bytes.

mod glyphs;

use crate::fetch::encode_data_uri;
use crate::image::{AspectRatio, Dimensions, ImageFormat, Style};
use image::{Rgba, RgbaImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Cursor;

/// 1x1 transparent PNG, returned only if in-memory encoding ever fails.
const BLANK_PNG_DATA_URI: &str = "data:image/png;base64,\
    iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

/// Shape vocabulary drawn over the gradient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeKind {
    Circles,
    Squares,
    Triangles,
    Logo,
    Icon,
    Abstract,
}

impl ShapeKind {
    /// Picks shapes from prompt keywords, in fixed priority order.
    pub fn for_prompt(prompt: &str) -> Self {
        const RULES: [(&[&str], ShapeKind); 5] = [
            (&["circle", "round"], ShapeKind::Circles),
            (&["square", "box"], ShapeKind::Squares),
            (&["triangle", "arrow"], ShapeKind::Triangles),
            (&["logo", "brand"], ShapeKind::Logo),
            (&["icon"], ShapeKind::Icon),
        ];

        let lower = prompt.to_lowercase();
        RULES
            .iter()
            .find(|(keywords, _)| keywords.iter().any(|k| lower.contains(*k)))
            .map(|(_, kind)| *kind)
            .unwrap_or(ShapeKind::Abstract)
    }
}

type Rgb = [u8; 3];

/// Colour scheme for one style.
#[derive(Debug, Clone, Copy)]
struct Palette {
    primary: Rgb,
    secondary: Rgb,
    accent: Rgb,
    shapes: [Rgb; 5],
    text: Rgb,
}

static COLOURFUL: Palette = Palette {
    primary: [0xFF, 0x6B, 0x6B],
    secondary: [0x4E, 0xCD, 0xC4],
    accent: [0x45, 0xB7, 0xD1],
    shapes: [
        [0xFF, 0x6B, 0x6B],
        [0x4E, 0xCD, 0xC4],
        [0x96, 0xCE, 0xB4],
        [0xFF, 0xEA, 0xA7],
        [0xDD, 0xA0, 0xDD],
    ],
    text: [0xFF, 0xFF, 0xFF],
};

static CYBERPUNK: Palette = Palette {
    primary: [0x0A, 0x0A, 0x0A],
    secondary: [0xFF, 0x00, 0xFF],
    accent: [0x00, 0xFF, 0xFF],
    shapes: [
        [0xFF, 0x00, 0xFF],
        [0x00, 0xFF, 0xFF],
        [0xFF, 0x00, 0x80],
        [0x80, 0x00, 0xFF],
        [0x00, 0xFF, 0x80],
    ],
    text: [0x00, 0xFF, 0xFF],
};

static REAL: Palette = Palette {
    primary: [0x2C, 0x3E, 0x50],
    secondary: [0x34, 0x49, 0x5E],
    accent: [0xEC, 0xF0, 0xF1],
    shapes: [
        [0x34, 0x98, 0xDB],
        [0xE7, 0x4C, 0x3C],
        [0x2E, 0xCC, 0x71],
        [0xF3, 0x9C, 0x12],
        [0x9B, 0x59, 0xB6],
    ],
    text: [0xFF, 0xFF, 0xFF],
};

static MINIMALIST: Palette = Palette {
    primary: [0xF8, 0xF9, 0xFA],
    secondary: [0xE9, 0xEC, 0xEF],
    accent: [0x6C, 0x75, 0x7D],
    shapes: [
        [0x00, 0x7B, 0xFF],
        [0x28, 0xA7, 0x45],
        [0xFF, 0xC1, 0x07],
        [0xDC, 0x35, 0x45],
        [0x6F, 0x42, 0xC1],
    ],
    text: [0x21, 0x25, 0x29],
};

fn palette_for(style: Style) -> &'static Palette {
    match style {
        Style::Cyberpunk => &CYBERPUNK,
        Style::Real => &REAL,
        Style::Minimalist => &MINIMALIST,
        Style::Colourful
        | Style::Modern
        | Style::Vintage
        | Style::Bold
        | Style::Elegant
        | Style::Playful => &COLOURFUL,
    }
}

/// A locally rendered placeholder.
#[derive(Debug, Clone)]
pub struct RenderedFallback {
    pub data_uri: String,
    pub shape: ShapeKind,
    pub dimensions: Dimensions,
}

/// Renders placeholder images without network access.
#[derive(Debug, Default, Clone, Copy)]
pub struct FallbackRenderer;

impl FallbackRenderer {
    pub fn new() -> Self {
        Self
    }

    /// Renders a placeholder for the request. Never fails.
    pub fn render(
        &self,
        prompt: &str,
        style: Style,
        aspect_ratio: AspectRatio,
        seed: u64,
    ) -> RenderedFallback {
        let dimensions = aspect_ratio.dimensions();
        let shape = ShapeKind::for_prompt(prompt);
        let canvas = self.rasterize(prompt, style, dimensions, shape, seed);

        let mut bytes = Vec::new();
        let data_uri = match canvas.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        {
            Ok(()) => encode_data_uri(ImageFormat::Png, &bytes),
            Err(e) => {
                tracing::error!("placeholder encoding failed: {e}");
                BLANK_PNG_DATA_URI.to_string()
            }
        };

        RenderedFallback {
            data_uri,
            shape,
            dimensions,
        }
    }

    fn rasterize(
        &self,
        prompt: &str,
        style: Style,
        dimensions: Dimensions,
        shape: ShapeKind,
        seed: u64,
    ) -> RgbaImage {
        let palette = palette_for(style);
        let mut rng = StdRng::seed_from_u64(request_seed(prompt, style, seed));
        let mut canvas = RgbaImage::new(dimensions.width, dimensions.height);

        draw_gradient(&mut canvas, palette);
        match shape {
            ShapeKind::Circles => draw_circles(&mut canvas, palette, &mut rng),
            ShapeKind::Squares => draw_squares(&mut canvas, palette, &mut rng),
            ShapeKind::Triangles => draw_triangles(&mut canvas, palette, &mut rng),
            ShapeKind::Logo => draw_logo(&mut canvas, palette),
            ShapeKind::Icon => draw_icon(&mut canvas, palette),
            ShapeKind::Abstract => draw_abstract(&mut canvas, palette, &mut rng),
        }
        draw_label(&mut canvas, palette, &label_for(prompt));
        canvas
    }
}

fn request_seed(prompt: &str, style: Style, seed: u64) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(style.as_str().as_bytes());
    hasher.update(seed.to_be_bytes());
    let digest = hasher.finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head)
}

/// First three words of the prompt, shortened to fit the label plate.
pub(crate) fn label_for(prompt: &str) -> String {
    let words: Vec<&str> = prompt.split_whitespace().take(3).collect();
    let text = words.join(" ");
    if text.chars().count() > 20 {
        let cut: String = text.chars().take(17).collect();
        format!("{}...", cut)
    } else {
        text
    }
}

fn blend(canvas: &mut RgbaImage, x: i64, y: i64, color: Rgb, alpha: u8) {
    if x < 0 || y < 0 || x >= i64::from(canvas.width()) || y >= i64::from(canvas.height()) {
        return;
    }
    let px = canvas.get_pixel_mut(x as u32, y as u32);
    let a = u16::from(alpha);
    for i in 0..3 {
        let dst = u16::from(px.0[i]);
        px.0[i] = ((u16::from(color[i]) * a + dst * (255 - a)) / 255) as u8;
    }
    px.0[3] = 255;
}

fn lerp(a: Rgb, b: Rgb, t: f32) -> Rgb {
    let mut out = [0u8; 3];
    for i in 0..3 {
        out[i] = (f32::from(a[i]) + (f32::from(b[i]) - f32::from(a[i])) * t).round() as u8;
    }
    out
}

/// Diagonal three-stop gradient: primary, secondary at the midpoint, accent.
fn draw_gradient(canvas: &mut RgbaImage, palette: &Palette) {
    let (w, h) = (canvas.width() as f32, canvas.height() as f32);
    let span = (w + h).max(1.0);
    for (x, y, px) in canvas.enumerate_pixels_mut() {
        let t = (x as f32 + y as f32) / span;
        let color = if t < 0.5 {
            lerp(palette.primary, palette.secondary, t * 2.0)
        } else {
            lerp(palette.secondary, palette.accent, (t - 0.5) * 2.0)
        };
        *px = Rgba([color[0], color[1], color[2], 255]);
    }
}

fn fill_circle(canvas: &mut RgbaImage, cx: f32, cy: f32, r: f32, color: Rgb, alpha: u8) {
    let (x0, x1) = ((cx - r).floor() as i64, (cx + r).ceil() as i64);
    let (y0, y1) = ((cy - r).floor() as i64, (cy + r).ceil() as i64);
    for y in y0..=y1 {
        for x in x0..=x1 {
            let (dx, dy) = (x as f32 - cx, y as f32 - cy);
            if dx * dx + dy * dy <= r * r {
                blend(canvas, x, y, color, alpha);
            }
        }
    }
}

fn stroke_circle(canvas: &mut RgbaImage, cx: f32, cy: f32, r: f32, width: f32, color: Rgb) {
    let outer = r + width / 2.0;
    let inner = (r - width / 2.0).max(0.0);
    let (x0, x1) = ((cx - outer).floor() as i64, (cx + outer).ceil() as i64);
    let (y0, y1) = ((cy - outer).floor() as i64, (cy + outer).ceil() as i64);
    for y in y0..=y1 {
        for x in x0..=x1 {
            let (dx, dy) = (x as f32 - cx, y as f32 - cy);
            let d2 = dx * dx + dy * dy;
            if d2 <= outer * outer && d2 >= inner * inner {
                blend(canvas, x, y, color, 255);
            }
        }
    }
}

fn fill_rect(canvas: &mut RgbaImage, x: f32, y: f32, w: f32, h: f32, color: Rgb, alpha: u8) {
    for py in (y.round() as i64)..((y + h).round() as i64) {
        for px in (x.round() as i64)..((x + w).round() as i64) {
            blend(canvas, px, py, color, alpha);
        }
    }
}

fn stroke_rect(canvas: &mut RgbaImage, x: f32, y: f32, w: f32, h: f32, width: f32, color: Rgb) {
    fill_rect(canvas, x, y, w, width, color, 255);
    fill_rect(canvas, x, y + h - width, w, width, color, 255);
    fill_rect(canvas, x, y, width, h, color, 255);
    fill_rect(canvas, x + w - width, y, width, h, color, 255);
}

/// Even-odd polygon fill over the polygon's bounding box.
fn fill_polygon(canvas: &mut RgbaImage, points: &[(f32, f32)], color: Rgb, alpha: u8) {
    if points.len() < 3 {
        return;
    }
    let min_x = points.iter().map(|p| p.0).fold(f32::MAX, f32::min).floor() as i64;
    let max_x = points.iter().map(|p| p.0).fold(f32::MIN, f32::max).ceil() as i64;
    let min_y = points.iter().map(|p| p.1).fold(f32::MAX, f32::min).floor() as i64;
    let max_y = points.iter().map(|p| p.1).fold(f32::MIN, f32::max).ceil() as i64;

    for y in min_y..=max_y {
        for x in min_x..=max_x {
            if point_in_polygon(x as f32 + 0.5, y as f32 + 0.5, points) {
                blend(canvas, x, y, color, alpha);
            }
        }
    }
}

fn point_in_polygon(x: f32, y: f32, points: &[(f32, f32)]) -> bool {
    let mut inside = false;
    let mut j = points.len() - 1;
    for i in 0..points.len() {
        let (xi, yi) = points[i];
        let (xj, yj) = points[j];
        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

fn draw_circles(canvas: &mut RgbaImage, palette: &Palette, rng: &mut StdRng) {
    let (w, h) = (canvas.width() as f32, canvas.height() as f32);
    let count: usize = rng.gen_range(3..7);
    for i in 0..count {
        let cx = rng.gen_range(0.0..w);
        let cy = rng.gen_range(0.0..h);
        let r = rng.gen_range(20.0..120.0);
        fill_circle(canvas, cx, cy, r, palette.shapes[i % 5], 0x80);
        stroke_circle(canvas, cx, cy, r, 2.0, palette.accent);
    }
}

fn draw_squares(canvas: &mut RgbaImage, palette: &Palette, rng: &mut StdRng) {
    let (w, h) = (canvas.width() as f32, canvas.height() as f32);
    let count: usize = rng.gen_range(2..5);
    for i in 0..count {
        let size = rng.gen_range(40.0..160.0_f32).min(w.min(h) - 1.0);
        let x = rng.gen_range(0.0..(w - size).max(1.0));
        let y = rng.gen_range(0.0..(h - size).max(1.0));
        fill_rect(canvas, x, y, size, size, palette.shapes[i % 5], 0x90);
        stroke_rect(canvas, x, y, size, size, 3.0, palette.accent);
    }
}

fn draw_triangles(canvas: &mut RgbaImage, palette: &Palette, rng: &mut StdRng) {
    let (w, h) = (canvas.width() as f32, canvas.height() as f32);
    let count: usize = rng.gen_range(2..5);
    for i in 0..count {
        let cx = rng.gen_range(0.0..w);
        let cy = rng.gen_range(0.0..h);
        let r = rng.gen_range(40.0..120.0_f32);
        let turn = rng.gen_range(0.0..std::f32::consts::TAU);
        let points: Vec<(f32, f32)> = (0..3)
            .map(|k| {
                let angle = turn + k as f32 * std::f32::consts::TAU / 3.0;
                (cx + angle.cos() * r, cy + angle.sin() * r)
            })
            .collect();
        fill_polygon(canvas, &points, palette.shapes[i % 5], 0x90);
    }
}

/// Emblem ring with a wordmark bar beneath it.
fn draw_logo(canvas: &mut RgbaImage, palette: &Palette) {
    let (w, h) = (canvas.width() as f32, canvas.height() as f32);
    let r = w.min(h) * 0.18;
    let (cx, cy) = (w / 2.0, h / 2.0 - r * 0.6);
    fill_circle(canvas, cx, cy, r, palette.shapes[0], 0xE0);
    stroke_circle(canvas, cx, cy, r, 4.0, palette.accent);
    fill_circle(canvas, cx, cy, r * 0.45, palette.shapes[1], 0xFF);
    let bar_w = r * 3.0;
    fill_rect(canvas, cx - bar_w / 2.0, cy + r * 1.4, bar_w, r * 0.45, palette.shapes[2], 0xD0);
}

/// Single rounded tile with a centred symbol.
fn draw_icon(canvas: &mut RgbaImage, palette: &Palette) {
    let (w, h) = (canvas.width() as f32, canvas.height() as f32);
    let size = w.min(h) * 0.45;
    let (x, y) = ((w - size) / 2.0, (h - size) / 2.0 - size * 0.1);
    let corner = size * 0.18;
    fill_rect(canvas, x + corner, y, size - 2.0 * corner, size, palette.shapes[0], 0xE0);
    fill_rect(canvas, x, y + corner, corner, size - 2.0 * corner, palette.shapes[0], 0xE0);
    fill_rect(
        canvas,
        x + size - corner,
        y + corner,
        corner,
        size - 2.0 * corner,
        palette.shapes[0],
        0xE0,
    );
    for (ccx, ccy) in [
        (x + corner, y + corner),
        (x + size - corner, y + corner),
        (x + corner, y + size - corner),
        (x + size - corner, y + size - corner),
    ] {
        fill_circle(canvas, ccx, ccy, corner, palette.shapes[0], 0xE0);
    }
    fill_circle(canvas, w / 2.0, y + size / 2.0, size * 0.22, palette.text, 0xFF);
}

/// Organic polygons with jittered radii.
fn draw_abstract(canvas: &mut RgbaImage, palette: &Palette, rng: &mut StdRng) {
    let (w, h) = (canvas.width() as f32, canvas.height() as f32);
    let count: usize = rng.gen_range(5..10);
    for i in 0..count {
        let cx = rng.gen_range(0.0..w);
        let cy = rng.gen_range(0.0..h);
        let vertices: usize = rng.gen_range(6..12);
        let points: Vec<(f32, f32)> = (0..vertices)
            .map(|j| {
                let angle = j as f32 / vertices as f32 * std::f32::consts::TAU;
                let radius = rng.gen_range(30.0..110.0_f32);
                (cx + angle.cos() * radius, cy + angle.sin() * radius)
            })
            .collect();
        fill_polygon(canvas, &points, palette.shapes[i % 5], 0x70);
    }
}

/// Dark plate along the bottom edge with the label centred on it.
fn draw_label(canvas: &mut RgbaImage, palette: &Palette, text: &str) {
    if text.is_empty() {
        return;
    }
    let scale = 2;
    let text_w = glyphs::text_width(text, scale);
    let text_h = glyphs::GLYPH_HEIGHT * scale;
    let (w, h) = (canvas.width(), canvas.height());

    let plate_w = (text_w + 20).min(w);
    let plate_h = text_h + 10;
    let plate_x = (w - plate_w) / 2;
    let plate_y = h.saturating_sub(plate_h + 10);
    fill_rect(
        canvas,
        plate_x as f32,
        plate_y as f32,
        plate_w as f32,
        plate_h as f32,
        [0, 0, 0],
        0xB3,
    );

    let mut pen_x = i64::from(w / 2) - i64::from(text_w / 2);
    let pen_y = i64::from(plate_y + 5);
    for c in text.chars() {
        let rows = glyphs::glyph(c);
        for (row, bits) in rows.iter().enumerate() {
            for col in 0..glyphs::GLYPH_WIDTH {
                if bits & (0x10 >> col) == 0 {
                    continue;
                }
                for sy in 0..scale {
                    for sx in 0..scale {
                        blend(
                            canvas,
                            pen_x + i64::from(col * scale + sx),
                            pen_y + i64::from(row as u32 * scale + sy),
                            palette.text,
                            0xFF,
                        );
                    }
                }
            }
        }
        pen_x += i64::from((glyphs::GLYPH_WIDTH + 1) * scale);
    }
}
