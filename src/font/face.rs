//! Font faces and the coverage query the fallback chain is built on.

use std::sync::Arc;

use swash::scale::image::Content;
use swash::scale::{Render, ScaleContext, Source, StrikeWith};
use swash::zeno::Format;
use swash::{CacheKey, FontRef};

/// Vertical metrics of a face at its configured pixel size
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaceMetrics {
    pub ascent: u32,
    pub descent: u32,
}

/// Pixel data of a rasterized glyph
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GlyphPixels {
    /// One coverage byte per pixel, tinted with the segment foreground
    Mask(Vec<u8>),
    /// Straight (non-premultiplied) RGBA, used as-is (emoji and color icons)
    Color(Vec<u8>),
}

/// A rasterized glyph image positioned relative to the pen on the baseline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlyphBitmap {
    /// Horizontal offset from the pen position
    pub left: i32,
    /// Distance from the baseline to the top row (positive is up)
    pub top: i32,
    pub width: u32,
    pub height: u32,
    pub pixels: GlyphPixels,
}

/// A loaded font face.
///
/// Faces are consulted in fallback order; the only question the resolver
/// asks before committing to a face is whether it covers a codepoint.
pub trait FontFace: Send + Sync {
    /// Human readable name for logging
    fn name(&self) -> &str;

    /// Glyph id for `ch`, or `None` if the face has no glyph for it
    fn glyph_id(&self, ch: char) -> Option<u16>;

    fn metrics(&self) -> FaceMetrics;

    /// Horizontal advance in pixels
    fn advance(&self, glyph_id: u16) -> f32;

    /// Rasterize a glyph. `None` for glyphs without ink (spaces).
    fn rasterize(&self, glyph_id: u16) -> Option<GlyphBitmap>;
}

/// A TrueType/OpenType face rendered through swash.
///
/// Owns the font bytes and rebuilds a borrowed `FontRef` on demand.
pub struct SwashFace {
    name: String,
    data: Arc<Vec<u8>>,
    offset: u32,
    key: CacheKey,
    size: f32,
    scale: f32,
    metrics: FaceMetrics,
}

impl SwashFace {
    /// Parse face `index` of `data` at `size` pixels.
    ///
    /// Returns `None` if the bytes are not a valid font.
    pub fn from_bytes(name: impl Into<String>, data: Vec<u8>, index: usize, size: f32) -> Option<Self> {
        let font = FontRef::from_index(&data, index)?;
        let (offset, key) = (font.offset, font.key);

        let raw = font.metrics(&[]);
        if raw.units_per_em == 0 {
            return None;
        }
        let scale = size / raw.units_per_em as f32;
        let metrics = FaceMetrics {
            ascent: (raw.ascent * scale).ceil().max(0.0) as u32,
            descent: (raw.descent.abs() * scale).ceil() as u32,
        };

        Some(Self {
            name: name.into(),
            data: Arc::new(data),
            offset,
            key,
            size,
            scale,
            metrics,
        })
    }

    fn font(&self) -> FontRef<'_> {
        FontRef {
            data: &self.data,
            offset: self.offset,
            key: self.key,
        }
    }
}

impl FontFace for SwashFace {
    fn name(&self) -> &str {
        &self.name
    }

    fn glyph_id(&self, ch: char) -> Option<u16> {
        // Glyph 0 is .notdef
        let id = self.font().charmap().map(ch);
        (id != 0).then_some(id)
    }

    fn metrics(&self) -> FaceMetrics {
        self.metrics
    }

    fn advance(&self, glyph_id: u16) -> f32 {
        self.font().glyph_metrics(&[]).advance_width(glyph_id) * self.scale
    }

    fn rasterize(&self, glyph_id: u16) -> Option<GlyphBitmap> {
        let mut context = ScaleContext::new();
        let mut scaler = context.builder(self.font()).size(self.size).hint(true).build();

        // Color sources first so icon and emoji fonts keep their colors
        let image = Render::new(&[
            Source::ColorBitmap(StrikeWith::BestFit),
            Source::ColorOutline(0),
            Source::Outline,
        ])
        .format(Format::Alpha)
        .render(&mut scaler, glyph_id)?;

        if image.placement.width == 0 || image.placement.height == 0 {
            return None;
        }

        let pixels = match image.content {
            Content::Mask => GlyphPixels::Mask(image.data),
            Content::Color => GlyphPixels::Color(image.data),
            Content::SubpixelMask => GlyphPixels::Mask(
                image
                    .data
                    .chunks_exact(4)
                    .map(|px| ((px[0] as u16 + px[1] as u16 + px[2] as u16) / 3) as u8)
                    .collect(),
            ),
        };

        Some(GlyphBitmap {
            left: image.placement.left,
            top: image.placement.top,
            width: image.placement.width,
            height: image.placement.height,
            pixels,
        })
    }
}
