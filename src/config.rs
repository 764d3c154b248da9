//! Bar configuration
//!
//! Stored as TOML through confy (`~/.config/saftbar/config.toml` on Linux).
//! Command line flags override individual fields after loading.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::color::Rgba;
use crate::font::{DEFAULT_FONT_SIZE, FontSpec};
use crate::markup::{InputFormat, Palette};
use crate::platform::Edge;

const APP_NAME: &str = "saftbar";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration")]
    Load(#[from] confy::ConfyError),

    #[error("no fonts configured")]
    NoFonts,

    #[error("line width {0} exceeds bar height {1}")]
    LineTooWide(u32, u32),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BarConfig {
    /// Screen edge the bar docks to
    pub position: Edge,
    /// Bar height in pixels; the font height when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// Primary font first, then fallbacks in lookup order
    pub fonts: Vec<FontSpec>,
    pub foreground: Rgba,
    pub background: Rgba,
    /// Under/overline color; the segment foreground when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_color: Option<Rgba>,
    pub line_width: u32,
    /// Window title and class
    pub name: String,
    pub input_format: InputFormat,
}

impl Default for BarConfig {
    fn default() -> Self {
        Self {
            position: Edge::Top,
            height: None,
            fonts: vec![FontSpec::new("monospace", DEFAULT_FONT_SIZE)],
            foreground: Rgba::WHITE,
            background: Rgba::BLACK,
            line_color: None,
            line_width: 1,
            name: APP_NAME.to_string(),
            input_format: InputFormat::Markup,
        }
    }
}

impl BarConfig {
    /// Load from the default config location, writing defaults on first run
    pub fn load() -> Result<Self, ConfigError> {
        Ok(confy::load(APP_NAME, "config")?)
    }

    pub fn load_path(path: &Path) -> Result<Self, ConfigError> {
        Ok(confy::load_path(path)?)
    }

    pub fn palette(&self) -> Palette {
        Palette {
            foreground: self.foreground,
            background: self.background,
            line: self.line_color,
        }
    }

    /// Check settings that cannot be expressed in the types
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fonts.is_empty() {
            return Err(ConfigError::NoFonts);
        }
        if let Some(height) = self.height
            && self.line_width > height
        {
            return Err(ConfigError::LineTooWide(self.line_width, height));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: BarConfig = toml::from_str(
            r##"
            position = "bottom"
            background = "#1d2021"

            [[fonts]]
            family = "UbuntuMono Nerd Font"
            size = 15.25

            [[fonts]]
            family = "/usr/share/fonts/icons.ttf"
            y_offset = -1
            "##,
        )
        .unwrap();

        assert_eq!(config.position, Edge::Bottom);
        assert_eq!(config.background, Rgba::rgb(0x1d, 0x20, 0x21));
        assert_eq!(config.foreground, Rgba::WHITE);
        assert_eq!(config.fonts.len(), 2);
        assert_eq!(config.fonts[1].size, DEFAULT_FONT_SIZE);
        assert_eq!(config.fonts[1].y_offset, -1);
        assert_eq!(config.height, None);
        assert_eq!(config.input_format, InputFormat::Markup);
    }

    #[test]
    fn test_invalid_color_rejected() {
        assert!(toml::from_str::<BarConfig>(r#"foreground = "nope""#).is_err());
    }

    #[test]
    fn test_validate() {
        assert!(BarConfig::default().validate().is_ok());

        let config = BarConfig {
            fonts: Vec::new(),
            ..BarConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::NoFonts)));

        let config = BarConfig {
            height: Some(2),
            line_width: 3,
            ..BarConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::LineTooWide(3, 2))));
    }

    #[test]
    fn test_load_path_round_trip() {
        let dir = std::env::temp_dir().join(format!("saftbar-config-{}", std::process::id()));
        let path = dir.join("config.toml");
        let config = BarConfig {
            height: Some(24),
            input_format: InputFormat::Json,
            ..BarConfig::default()
        };
        confy::store_path(&path, &config).unwrap();

        let loaded = BarConfig::load_path(&path).unwrap();
        assert_eq!(loaded, config);
        let _ = std::fs::remove_dir_all(dir);
    }
}
