//! Font loading from the system font database or from files.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use fontdb::{Database, Family, Query};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::FontError;
use super::face::SwashFace;

pub const DEFAULT_FONT_SIZE: f32 = 12.0;

/// One entry of the configured font list.
///
/// `family` is either a family name known to the system font database or a
/// path to a font file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FontSpec {
    pub family: String,
    #[serde(default = "default_size")]
    pub size: f32,
    /// Vertical nudge in pixels, positive moves glyphs down
    #[serde(default)]
    pub y_offset: i32,
}

fn default_size() -> f32 {
    DEFAULT_FONT_SIZE
}

impl FontSpec {
    pub fn new(family: impl Into<String>, size: f32) -> Self {
        Self {
            family: family.into(),
            size,
            y_offset: 0,
        }
    }

    fn is_path(&self) -> bool {
        self.family.contains('/')
    }
}

impl fmt::Display for FontSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:size={}", self.family, self.size)?;
        if self.y_offset != 0 {
            write!(f, ":offset={}", self.y_offset)?;
        }
        Ok(())
    }
}

/// Parses `Family Name[:size=N][:offset=N]`, the pattern form used on the
/// command line.
impl FromStr for FontSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        let family = parts.next().unwrap_or_default().trim();
        if family.is_empty() {
            return Err("font family must not be empty".to_string());
        }

        let mut spec = FontSpec::new(family, DEFAULT_FONT_SIZE);
        for part in parts {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| format!("expected key=value in font pattern, got '{part}'"))?;
            match key.trim() {
                "size" | "pixelsize" => {
                    spec.size = value
                        .trim()
                        .parse()
                        .ok()
                        .filter(|size: &f32| *size > 0.0)
                        .ok_or_else(|| format!("invalid font size '{value}'"))?;
                }
                "offset" => {
                    spec.y_offset = value
                        .trim()
                        .parse()
                        .map_err(|_| format!("invalid font offset '{value}'"))?;
                }
                other => return Err(format!("unknown font property '{other}'")),
            }
        }
        Ok(spec)
    }
}

/// Lazily populated system font database
#[derive(Default)]
pub struct FontLoader {
    db: Option<Database>,
}

impl FontLoader {
    pub fn new() -> Self {
        Self::default()
    }

    fn database(&mut self) -> &Database {
        self.db.get_or_insert_with(|| {
            let mut db = Database::new();
            db.load_system_fonts();
            debug!(faces = db.len(), "loaded system font database");
            db
        })
    }

    /// Load the face described by `spec`
    pub fn load(&mut self, spec: &FontSpec) -> Result<SwashFace, FontError> {
        if spec.is_path() {
            return load_file(Path::new(&spec.family), spec.size);
        }

        let query = Query {
            families: &[Family::Name(&spec.family)],
            ..Query::default()
        };

        let db = self.database();
        let id = db.query(&query).ok_or_else(|| FontError::NotFound {
            name: spec.family.clone(),
        })?;

        let (data, index) = db
            .with_face_data(id, |data, index| (data.to_vec(), index as usize))
            .ok_or_else(|| FontError::NotFound {
                name: spec.family.clone(),
            })?;

        SwashFace::from_bytes(spec.family.clone(), data, index, spec.size).ok_or_else(|| {
            FontError::InvalidFace {
                name: spec.family.clone(),
            }
        })
    }
}

fn load_file(path: &Path, size: f32) -> Result<SwashFace, FontError> {
    let data = std::fs::read(path).map_err(|source| FontError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let name = path.display().to_string();
    SwashFace::from_bytes(name.clone(), data, 0, size).ok_or(FontError::InvalidFace { name })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pattern() {
        let spec: FontSpec = "UbuntuMono Nerd Font:size=15.25".parse().unwrap();
        assert_eq!(spec.family, "UbuntuMono Nerd Font");
        assert_eq!(spec.size, 15.25);
        assert_eq!(spec.y_offset, 0);

        let spec: FontSpec = "Symbols Nerd Font:size=10:offset=-1".parse().unwrap();
        assert_eq!(spec.y_offset, -1);
    }

    #[test]
    fn test_parse_pattern_defaults_size() {
        let spec: FontSpec = "DejaVu Sans".parse().unwrap();
        assert_eq!(spec.size, DEFAULT_FONT_SIZE);
    }

    #[test]
    fn test_parse_pattern_errors() {
        assert!("".parse::<FontSpec>().is_err());
        assert!("Mono:size=abc".parse::<FontSpec>().is_err());
        assert!("Mono:size=0".parse::<FontSpec>().is_err());
        assert!("Mono:weight=bold".parse::<FontSpec>().is_err());
        assert!("Mono:size".parse::<FontSpec>().is_err());
    }

    #[test]
    fn test_missing_file_reports_path() {
        let mut loader = FontLoader::new();
        let spec = FontSpec::new("/nonexistent/font.ttf", 12.0);
        match loader.load(&spec) {
            Err(FontError::Read { path, .. }) => assert_eq!(path, Path::new("/nonexistent/font.ttf")),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("loading a missing file must fail"),
        }
    }
}
