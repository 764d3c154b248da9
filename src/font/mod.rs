//! Multi-font glyph resolution
//!
//! The configured fonts form one ordered chain: the first entry is the
//! primary font, every further entry is a fallback. Markup may ask for a
//! specific font (`%{T2}`); that face is consulted first and the chain is
//! walked in configured order afterwards. Codepoints covered by no face at
//! all are drawn with a placeholder box.
//!
//! Rasterized glyphs are cached per (face, codepoint) for the lifetime of the
//! process. The cache is shared and may be filled from rayon workers; a
//! concurrent cold fill of the same key keeps whichever entry landed first.

mod face;
mod loader;

#[cfg(test)]
pub(crate) mod testing;


use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use hashbrown::{HashMap, HashSet};
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info, warn};

pub use face::{FaceMetrics, FontFace, GlyphBitmap, GlyphPixels, SwashFace};
pub use loader::{DEFAULT_FONT_SIZE, FontLoader, FontSpec};

/// Below this many cold glyphs the parallel fill is not worth the hop
const PARALLEL_FILL_THRESHOLD: usize = 32;

#[derive(Debug, Error)]
pub enum FontError {
    #[error("no fonts configured")]
    NoFonts,

    #[error("font '{name}' not found")]
    NotFound { name: String },

    #[error("failed to read font file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("'{name}' is not a usable font face")]
    InvalidFace { name: String },

    #[error("failed to load primary font")]
    PrimaryUnavailable(#[source] Box<FontError>),

    #[error("no font covers {codepoint:?}")]
    MissingGlyph { codepoint: char },
}

/// Combined vertical metrics of all loaded faces
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FontMetrics {
    pub ascent: u32,
    pub descent: u32,
}

impl FontMetrics {
    pub fn height(&self) -> u32 {
        self.ascent + self.descent
    }
}

/// Where a glyph came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlyphSource {
    Face(usize),
    Placeholder,
}

/// A resolved, rasterized glyph. Immutable once cached.
#[derive(Debug, Clone, PartialEq)]
pub struct Glyph {
    pub source: GlyphSource,
    pub codepoint: char,
    /// Advance in whole pixels
    pub advance: u32,
    /// Vertical offset of the face it came from
    pub y_offset: i32,
    pub bitmap: Option<GlyphBitmap>,
}

/// A face together with its per-face settings
pub struct LoadedFace {
    pub face: Box<dyn FontFace>,
    pub y_offset: i32,
}

impl LoadedFace {
    pub fn new(face: impl FontFace + 'static, y_offset: i32) -> Self {
        Self {
            face: Box::new(face),
            y_offset,
        }
    }
}

/// The ordered font chain: primary first, then fallbacks
pub struct FontSet {
    faces: Vec<LoadedFace>,
    metrics: FontMetrics,
}

impl FontSet {
    pub fn new(faces: Vec<LoadedFace>) -> Result<Self, FontError> {
        if faces.is_empty() {
            return Err(FontError::NoFonts);
        }

        let metrics = faces.iter().fold(FontMetrics::default(), |acc, loaded| {
            let m = loaded.face.metrics();
            FontMetrics {
                ascent: acc.ascent.max(m.ascent),
                descent: acc.descent.max(m.descent),
            }
        });

        Ok(Self { faces, metrics })
    }

    /// Load every configured font.
    ///
    /// The primary font is mandatory; fallbacks that cannot be loaded are
    /// skipped with a warning.
    pub fn load(specs: &[FontSpec]) -> Result<Self, FontError> {
        let (primary, fallbacks) = specs.split_first().ok_or(FontError::NoFonts)?;
        let mut loader = FontLoader::new();

        let face = loader
            .load(primary)
            .map_err(|e| FontError::PrimaryUnavailable(Box::new(e)))?;
        info!(font = %primary, face = face.name(), "loaded primary font");
        let mut faces = vec![LoadedFace::new(face, primary.y_offset)];

        for spec in fallbacks {
            match loader.load(spec) {
                Ok(face) => {
                    info!(font = %spec, face = face.name(), "loaded fallback font");
                    faces.push(LoadedFace::new(face, spec.y_offset));
                }
                Err(e) => warn!(font = %spec, error = %e, "skipping fallback font"),
            }
        }

        Self::new(faces)
    }

    pub fn metrics(&self) -> FontMetrics {
        self.metrics
    }

    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    /// Face indices in lookup order for a request preferring `preferred`
    fn lookup_order(&self, preferred: Option<usize>) -> impl Iterator<Item = usize> + '_ {
        let preferred = preferred.filter(|&i| i < self.faces.len());
        preferred
            .into_iter()
            .chain((0..self.faces.len()).filter(move |&i| Some(i) != preferred))
    }

    /// First face covering `ch`, with the glyph id it maps to
    fn locate(&self, ch: char, preferred: Option<usize>) -> Option<(usize, u16)> {
        self.lookup_order(preferred)
            .find_map(|i| self.faces[i].face.glyph_id(ch).map(|id| (i, id)))
    }
}

type GlyphKey = (usize, char);

/// Resolves codepoints to cached glyphs across the font chain
pub struct FontResolver {
    fonts: FontSet,
    cache: RwLock<HashMap<GlyphKey, Arc<Glyph>>>,
    placeholder: Arc<Glyph>,
}

impl FontResolver {
    pub fn new(fonts: FontSet) -> Self {
        let placeholder = Arc::new(placeholder_glyph(fonts.metrics()));
        Self {
            fonts,
            cache: RwLock::new(HashMap::new()),
            placeholder,
        }
    }

    pub fn metrics(&self) -> FontMetrics {
        self.fonts.metrics()
    }

    /// Resolve `ch`, trying `preferred` first and then the chain in order
    pub fn resolve(&self, ch: char, preferred: Option<usize>) -> Result<Arc<Glyph>, FontError> {
        let (face, glyph_id) = self
            .fonts
            .locate(ch, preferred)
            .ok_or(FontError::MissingGlyph { codepoint: ch })?;
        Ok(self.cached(face, ch, glyph_id))
    }

    /// Resolve `ch`, substituting the placeholder glyph when nothing covers it
    pub fn glyph_or_placeholder(&self, ch: char, preferred: Option<usize>) -> Arc<Glyph> {
        match self.resolve(ch, preferred) {
            Ok(glyph) => glyph,
            Err(e) => {
                debug!(error = %e, "using placeholder glyph");
                Arc::clone(&self.placeholder)
            }
        }
    }

    /// Warm the cache for a batch of lookups, rasterizing cold glyphs on the
    /// rayon pool when there are enough of them.
    pub fn prefetch<I>(&self, requests: I)
    where
        I: IntoIterator<Item = (char, Option<usize>)>,
    {
        let cold: Vec<(usize, char, u16)> = {
            let cache = self.read_cache();
            let mut seen = HashSet::new();
            requests
                .into_iter()
                .filter_map(|(ch, preferred)| {
                    let (face, id) = self.fonts.locate(ch, preferred)?;
                    (!cache.contains_key(&(face, ch)) && seen.insert((face, ch)))
                        .then_some((face, ch, id))
                })
                .collect()
        };

        if cold.is_empty() {
            return;
        }
        debug!(count = cold.len(), "filling glyph cache");

        if cold.len() >= PARALLEL_FILL_THRESHOLD {
            cold.par_iter().for_each(|&(face, ch, id)| {
                self.cached(face, ch, id);
            });
        } else {
            for &(face, ch, id) in &cold {
                self.cached(face, ch, id);
            }
        }
    }

    /// Number of cached glyphs
    pub fn cached_len(&self) -> usize {
        self.read_cache().len()
    }

    fn read_cache(&self) -> std::sync::RwLockReadGuard<'_, HashMap<GlyphKey, Arc<Glyph>>> {
        // A poisoned cache only means a panic elsewhere; the entries are still whole
        self.cache.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn cached(&self, face: usize, ch: char, glyph_id: u16) -> Arc<Glyph> {
        if let Some(glyph) = self.read_cache().get(&(face, ch)) {
            return Arc::clone(glyph);
        }

        let glyph = Arc::new(self.rasterize(face, ch, glyph_id));
        let mut cache = self
            .cache
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(cache.entry((face, ch)).or_insert(glyph))
    }

    fn rasterize(&self, face: usize, ch: char, glyph_id: u16) -> Glyph {
        let loaded = &self.fonts.faces[face];
        Glyph {
            source: GlyphSource::Face(face),
            codepoint: ch,
            advance: loaded.face.advance(glyph_id).round().max(0.0) as u32,
            y_offset: loaded.y_offset,
            bitmap: loaded.face.rasterize(glyph_id),
        }
    }
}

/// A hollow box, drawn for codepoints no face covers
fn placeholder_glyph(metrics: FontMetrics) -> Glyph {
    let height = metrics.ascent.max(4);
    let width = (metrics.height() / 2).max(4);

    let mut mask = vec![0u8; (width * height) as usize];
    for y in 0..height {
        for x in 0..width {
            if x == 0 || y == 0 || x == width - 1 || y == height - 1 {
                mask[(y * width + x) as usize] = 255;
            }
        }
    }

    Glyph {
        source: GlyphSource::Placeholder,
        codepoint: char::REPLACEMENT_CHARACTER,
        advance: width + 2,
        y_offset: 0,
        bitmap: Some(GlyphBitmap {
            left: 1,
            top: height as i32,
            width,
            height,
            pixels: GlyphPixels::Mask(mask),
        }),
    }
}
