//! Software compositing of a laid out bar into a pixel buffer
//!
//! Each monitor owns a [`Canvas`]: the frame being drawn plus a copy of what
//! the window currently shows. After drawing, only the columns that changed
//! since the last presentation are handed to the window system.

use thiserror::Error;
use tiny_skia::{FillRule, Paint, PathBuilder, PixmapMut, Rect, Transform};

use crate::color::Rgba;
use crate::font::{FontMetrics, GlyphBitmap, GlyphPixels};
use crate::layout::{Layout, PlacedSegment};
use crate::markup::{Palette, Powerline, PowerlineDirection, PowerlineFill, PowerlineStyle};

#[derive(Debug, Error)]
pub enum CompositorError {
    #[error("cannot allocate a {width}x{height} canvas")]
    InvalidSize { width: u32, height: u32 },
}

/// A horizontal span of a canvas converted to BGRA for the window system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub x: u32,
    pub width: u32,
    pub height: u32,
    /// Premultiplied BGRA rows, `width * 4` bytes each
    pub data: Vec<u8>,
}

/// Off-screen buffer for one surface
pub struct Canvas {
    width: u32,
    height: u32,
    /// Premultiplied RGBA
    pixels: Vec<u8>,
    presented: Vec<u8>,
    full_blit: bool,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Result<Self, CompositorError> {
        if width == 0 || height == 0 {
            return Err(CompositorError::InvalidSize { width, height });
        }
        let len = width as usize * height as usize * 4;
        Ok(Self {
            width,
            height,
            pixels: vec![0u8; len],
            presented: vec![0u8; len],
            full_blit: true,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// RGBA of the drawn (not necessarily presented) pixel at (`x`, `y`)
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y * self.width + x) as usize * 4;
        Some([self.pixels[i], self.pixels[i + 1], self.pixels[i + 2], self.pixels[i + 3]])
    }

    /// Present everything on the next [`Canvas::take_dirty`], e.g. after an expose
    pub fn mark_all_dirty(&mut self) {
        self.full_blit = true;
    }

    /// The span that differs from what was last presented, recorded as
    /// presented. `None` if nothing changed.
    pub fn take_dirty(&mut self) -> Option<Frame> {
        let (start, end) = if std::mem::take(&mut self.full_blit) {
            (0, self.width)
        } else {
            self.changed_columns()?
        };

        let width = end - start;
        let row_bytes = self.width as usize * 4;
        let mut data = Vec::with_capacity(width as usize * self.height as usize * 4);

        for y in 0..self.height as usize {
            let from = y * row_bytes + start as usize * 4;
            let to = y * row_bytes + end as usize * 4;
            for px in self.pixels[from..to].chunks_exact(4) {
                data.extend_from_slice(&[px[2], px[1], px[0], px[3]]);
            }
            self.presented[from..to].copy_from_slice(&self.pixels[from..to]);
        }

        Some(Frame {
            x: start,
            width,
            height: self.height,
            data,
        })
    }

    /// Leftmost and one-past-rightmost changed column
    fn changed_columns(&self) -> Option<(u32, u32)> {
        let row_bytes = self.width as usize * 4;
        let mut span: Option<(usize, usize)> = None;

        for (row, old) in self.pixels.chunks_exact(row_bytes).zip(self.presented.chunks_exact(row_bytes)) {
            let mut changed = row
                .chunks_exact(4)
                .zip(old.chunks_exact(4))
                .enumerate()
                .filter(|(_, (new, old))| new != old)
                .map(|(x, _)| x);
            let Some(first) = changed.next() else {
                continue;
            };
            let last = changed.last().unwrap_or(first);
            span = Some(match span {
                Some((lo, hi)) => (lo.min(first), hi.max(last + 1)),
                None => (first, last + 1),
            });
        }

        span.map(|(lo, hi)| (lo as u32, hi as u32))
    }
}

/// Draws layouts with the bar's colors and font metrics
#[derive(Debug, Clone)]
pub struct Compositor {
    palette: Palette,
    metrics: FontMetrics,
    line_width: u32,
}

impl Compositor {
    pub fn new(palette: Palette, metrics: FontMetrics, line_width: u32) -> Self {
        Self {
            palette,
            metrics,
            line_width,
        }
    }

    /// Baseline row for a bar of `height` pixels, centering the font box
    pub fn baseline(&self, height: u32) -> i32 {
        (height as i32 - self.metrics.height() as i32) / 2 + self.metrics.ascent as i32
    }

    /// Redraw the whole canvas from `layout`
    pub fn render(&self, canvas: &mut Canvas, layout: &Layout) {
        let (width, height) = (canvas.width, canvas.height);
        let Some(mut pixmap) = PixmapMut::from_bytes(&mut canvas.pixels, width, height) else {
            return;
        };

        pixmap.fill(self.palette.background.to_skia());

        for segment in &layout.segments {
            self.draw_decorations(&mut pixmap, segment, height);
        }

        let baseline = self.baseline(height);
        for segment in &layout.segments {
            let fg = segment.style.foreground(&self.palette);
            if let Some(shape) = &segment.powerline {
                for polygon in powerline_polygons(shape, segment.width, height) {
                    fill_polygon(&mut pixmap, segment.x as f32, &polygon, fg);
                }
            }
            for placed in &segment.glyphs {
                let Some(bitmap) = &placed.glyph.bitmap else {
                    continue;
                };
                let x = placed.x + bitmap.left;
                let y = baseline + placed.glyph.y_offset - bitmap.top;
                draw_glyph(&mut pixmap, bitmap, x, y, fg);
            }
        }
    }

    fn draw_decorations(&self, pixmap: &mut PixmapMut<'_>, segment: &PlacedSegment, height: u32) {
        let style = &segment.style;
        let (x, w) = (segment.x as f32, segment.width as f32);

        let background = style.background(&self.palette);
        if background != self.palette.background {
            fill_rect(pixmap, x, 0.0, w, height as f32, background);
        }

        let line = self.line_width.min(height) as f32;
        if line > 0.0 {
            let color = style.line_color(&self.palette);
            if style.underline {
                fill_rect(pixmap, x, height as f32 - line, w, line, color);
            }
            if style.overline {
                fill_rect(pixmap, x, 0.0, w, line, color);
            }
        }
    }
}

fn fill_rect(pixmap: &mut PixmapMut<'_>, x: f32, y: f32, w: f32, h: f32, color: Rgba) {
    let Some(rect) = Rect::from_xywh(x, y, w, h) else {
        return;
    };
    let mut paint = Paint::default();
    paint.set_color(color.to_skia());
    paint.anti_alias = false;
    pixmap.fill_rect(rect, &paint, Transform::identity(), None);
}

/// Polygons of a separator shape in segment-local coordinates.
///
/// Shapes are described pointing right with the tip at `tip`; left-pointing
/// shapes are the mirror image within the segment width.
fn powerline_polygons(shape: &Powerline, width: u32, height: u32) -> Vec<Vec<(f32, f32)>> {
    let h = height as f32;
    // Vertical run of each diagonal edge
    let slant = match shape.style {
        PowerlineStyle::Powerline => (height / 2) as f32,
        PowerlineStyle::Octagon => (height / 4) as f32,
    };
    let tip = match shape.style {
        PowerlineStyle::Powerline => width as f32,
        PowerlineStyle::Octagon => slant + 1.0,
    };

    let mut polygons = match shape.fill {
        PowerlineFill::Full => vec![vec![
            (0.0, h),
            (tip, h - slant - 1.0),
            (tip, slant),
            (1.0, 0.0),
            (0.0, 0.0),
        ]],
        PowerlineFill::Hollow => {
            let mut edges = vec![
                vec![(0.0, 0.0), (tip, slant + 1.0), (tip, slant), (1.0, 0.0)],
                vec![(0.0, h), (tip, h - slant - 1.0), (tip - 1.0, h - slant - 1.0), (0.0, h - 1.0)],
            ];
            if shape.style == PowerlineStyle::Octagon {
                edges.push(vec![
                    (tip - 1.0, slant),
                    (tip - 1.0, h - slant),
                    (tip, h - slant),
                    (tip, slant),
                ]);
            }
            edges
        }
    };

    if shape.direction == PowerlineDirection::Left {
        let w = width as f32;
        for point in polygons.iter_mut().flatten() {
            point.0 = w - point.0;
        }
    }
    polygons
}

fn fill_polygon(pixmap: &mut PixmapMut<'_>, x: f32, points: &[(f32, f32)], color: Rgba) {
    let Some((&(x0, y0), rest)) = points.split_first() else {
        return;
    };
    let mut builder = PathBuilder::new();
    builder.move_to(x + x0, y0);
    for &(px, py) in rest {
        builder.line_to(x + px, py);
    }
    builder.close();
    let Some(path) = builder.finish() else {
        return;
    };

    let mut paint = Paint::default();
    paint.set_color(color.to_skia());
    paint.anti_alias = false;
    pixmap.fill_path(&path, &paint, FillRule::Winding, Transform::identity(), None);
}

/// Blend a glyph onto the pixmap with its top-left at (`dest_x`, `dest_y`),
/// clipped to the pixmap
fn draw_glyph(pixmap: &mut PixmapMut<'_>, bitmap: &GlyphBitmap, dest_x: i32, dest_y: i32, color: Rgba) {
    let pixmap_width = pixmap.width() as i32;
    let pixmap_height = pixmap.height() as i32;
    let data = pixmap.data_mut();

    for gy in 0..bitmap.height as i32 {
        let py = dest_y + gy;
        if py < 0 || py >= pixmap_height {
            continue;
        }

        for gx in 0..bitmap.width as i32 {
            let px = dest_x + gx;
            if px < 0 || px >= pixmap_width {
                continue;
            }

            let glyph_idx = (gy as u32 * bitmap.width + gx as u32) as usize;
            let src = match &bitmap.pixels {
                GlyphPixels::Mask(mask) => match mask.get(glyph_idx) {
                    Some(&coverage) => {
                        let a = coverage as u32 * color.a as u32 / 255;
                        [color.r as u32, color.g as u32, color.b as u32, a]
                    }
                    None => continue,
                },
                GlyphPixels::Color(rgba) => match rgba.get(glyph_idx * 4..glyph_idx * 4 + 4) {
                    Some(p) => [p[0] as u32, p[1] as u32, p[2] as u32, p[3] as u32],
                    None => continue,
                },
            };

            let src_a = src[3];
            if src_a == 0 {
                continue;
            }

            let pixel_idx = ((py * pixmap_width + px) * 4) as usize;
            let inv_a = 255 - src_a;
            for c in 0..3 {
                let dst = data[pixel_idx + c] as u32;
                data[pixel_idx + c] = ((src[c] * src_a + dst * inv_a) / 255) as u8;
            }
            let dst_a = data[pixel_idx + 3] as u32;
            data[pixel_idx + 3] = (src_a + dst_a * inv_a / 255) as u8;
        }
    }
}
