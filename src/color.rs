//! RGBA colors shared by markup, configuration and the compositor
//!
//! Colors are written either as names (`red`, `darkgray`, ...) or as hex
//! literals: `#rgb`, `#rgba`, `#rrggbb` or `#rrggbbaa`. A literal without an
//! alpha component is fully opaque.

use std::fmt;
use std::str::FromStr;

use phf::phf_map;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tiny_skia::Color;

/// Named colors accepted by markup and configuration (case-insensitive)
static NAMED_COLORS: phf::Map<&'static str, [u8; 4]> = phf_map! {
    "black" => [0, 0, 0, 255],
    "white" => [255, 255, 255, 255],
    "red" => [255, 0, 0, 255],
    "green" => [0, 255, 0, 255],
    "blue" => [0, 0, 255, 255],
    "yellow" => [255, 255, 0, 255],
    "cyan" => [0, 255, 255, 255],
    "magenta" => [255, 0, 255, 255],
    "orange" => [255, 165, 0, 255],
    "purple" => [128, 0, 128, 255],
    "gray" => [128, 128, 128, 255],
    "grey" => [128, 128, 128, 255],
    "darkgray" => [64, 64, 64, 255],
    "darkgrey" => [64, 64, 64, 255],
    "lightgray" => [192, 192, 192, 255],
    "lightgrey" => [192, 192, 192, 255],
    "transparent" => [0, 0, 0, 0],
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ColorError {
    #[error("empty color")]
    Empty,

    #[error("unknown color name '{0}'")]
    UnknownName(String),

    #[error("invalid hex color '{0}': expected #rgb, #rgba, #rrggbb or #rrggbbaa")]
    InvalidHex(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const BLACK: Rgba = Rgba::rgb(0, 0, 0);
    pub const WHITE: Rgba = Rgba::rgb(255, 255, 255);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub fn is_opaque(&self) -> bool {
        self.a == 255
    }

    pub fn to_skia(self) -> Color {
        Color::from_rgba8(self.r, self.g, self.b, self.a)
    }

    fn from_hex(hex: &str) -> Result<Self, ColorError> {
        let invalid = || ColorError::InvalidHex(format!("#{hex}"));
        if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(invalid());
        }

        let nibble = |i: usize| u8::from_str_radix(&hex[i..=i], 16).map(|v| v * 17);
        let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16);

        let channels = match hex.len() {
            3 => [nibble(0), nibble(1), nibble(2), Ok(255)],
            4 => [nibble(0), nibble(1), nibble(2), nibble(3)],
            6 => [byte(0), byte(2), byte(4), Ok(255)],
            8 => [byte(0), byte(2), byte(4), byte(6)],
            _ => return Err(invalid()),
        };

        let mut out = [0u8; 4];
        for (slot, channel) in out.iter_mut().zip(channels) {
            *slot = channel.map_err(|_| invalid())?;
        }
        let [r, g, b, a] = out;
        Ok(Self { r, g, b, a })
    }
}

impl FromStr for Rgba {
    type Err = ColorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ColorError::Empty);
        }

        if let Some(hex) = s.strip_prefix('#') {
            return Self::from_hex(hex);
        }

        NAMED_COLORS
            .get(s.to_ascii_lowercase().as_str())
            .map(|&[r, g, b, a]| Self { r, g, b, a })
            .ok_or_else(|| ColorError::UnknownName(s.to_string()))
    }
}

impl fmt::Display for Rgba {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)?;
        if !self.is_opaque() {
            write!(f, "{:02x}", self.a)?;
        }
        Ok(())
    }
}

impl TryFrom<String> for Rgba {
    type Error = ColorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Rgba> for String {
    fn from(value: Rgba) -> Self {
        value.to_string()
    }
}
