//! Synthetic faces for tests that must not depend on installed fonts

use std::ops::RangeInclusive;

use super::{FaceMetrics, FontFace, FontResolver, FontSet, GlyphBitmap, GlyphPixels, LoadedFace};

/// A face covering fixed codepoint ranges with a constant advance.
///
/// Every covered glyph rasterizes to a solid box one pixel narrower than the
/// advance and as tall as the ascent; spaces have no ink.
pub struct FixedFace {
    pub name: String,
    pub ranges: Vec<RangeInclusive<char>>,
    pub advance: u32,
    pub ascent: u32,
    pub descent: u32,
}

impl FixedFace {
    pub fn new(name: &str, ranges: Vec<RangeInclusive<char>>, advance: u32) -> Self {
        Self {
            name: name.to_string(),
            ranges,
            advance,
            ascent: 12,
            descent: 4,
        }
    }

    pub fn ascii(advance: u32) -> Self {
        Self::new("ascii", vec![' '..='~'], advance)
    }

    pub fn with_metrics(mut self, ascent: u32, descent: u32) -> Self {
        self.ascent = ascent;
        self.descent = descent;
        self
    }
}

impl FontFace for FixedFace {
    fn name(&self) -> &str {
        &self.name
    }

    fn glyph_id(&self, ch: char) -> Option<u16> {
        self.ranges
            .iter()
            .any(|range| range.contains(&ch))
            .then(|| (ch as u32 & 0xffff) as u16)
    }

    fn metrics(&self) -> FaceMetrics {
        FaceMetrics {
            ascent: self.ascent,
            descent: self.descent,
        }
    }

    fn advance(&self, _glyph_id: u16) -> f32 {
        self.advance as f32
    }

    fn rasterize(&self, glyph_id: u16) -> Option<GlyphBitmap> {
        if glyph_id == u16::from(b' ') || self.advance < 2 {
            return None;
        }
        let width = self.advance - 1;
        let height = self.ascent;
        Some(GlyphBitmap {
            left: 0,
            top: height as i32,
            width,
            height,
            pixels: GlyphPixels::Mask(vec![255; (width * height) as usize]),
        })
    }
}

/// Resolver over a single ASCII face: advance 8, ascent 12, descent 4
pub fn ascii_resolver() -> FontResolver {
    resolver(vec![FixedFace::ascii(8)])
}

pub fn resolver(faces: Vec<FixedFace>) -> FontResolver {
    let faces = faces.into_iter().map(|face| LoadedFace::new(face, 0)).collect();
    match FontSet::new(faces) {
        Ok(set) => FontResolver::new(set),
        Err(e) => panic!("test font set: {e}"),
    }
}
