//! Styled bar content and the lemonbar-style markup that produces it
//!
//! One input line describes a whole frame: text runs with colors, fonts and
//! click actions, grouped into left/center/right blocks. Blocks are either
//! broadcast to every monitor or aimed at one monitor with `%{S...}`.

mod parser;


use serde::{Deserialize, Serialize};

use crate::color::Rgba;

pub use parser::{MarkupParser, ParseWarning, ParsedLine};

/// Bar-wide default colors that unset style fields fall back to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    pub foreground: Rgba,
    pub background: Rgba,
    /// Under/overline color; `None` draws lines in the segment foreground
    pub line: Option<Rgba>,
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            foreground: Rgba::WHITE,
            background: Rgba::BLACK,
            line: None,
        }
    }
}

/// Visual attributes of a segment.
///
/// Unset colors resolve against the bar [`Palette`] when drawn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Style {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fg: Option<Rgba>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bg: Option<Rgba>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<Rgba>,
    pub underline: bool,
    pub overline: bool,
    /// Zero-based font index, consulted before the fallback chain
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font: Option<usize>,
}

impl Style {
    pub fn foreground(&self, palette: &Palette) -> Rgba {
        self.fg.unwrap_or(palette.foreground)
    }

    pub fn background(&self, palette: &Palette) -> Rgba {
        self.bg.unwrap_or(palette.background)
    }

    pub fn line_color(&self, palette: &Palette) -> Rgba {
        self.line
            .or(palette.line)
            .unwrap_or_else(|| self.foreground(palette))
    }
}

/// A command run when a region is clicked with `button`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClickAction {
    #[serde(default = "default_button")]
    pub button: u8,
    pub command: String,
}

fn default_button() -> u8 {
    1
}

impl ClickAction {
    pub fn new(button: u8, command: impl Into<String>) -> Self {
        Self {
            button,
            command: command.into(),
        }
    }
}

/// Outline of a separator shape
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerlineStyle {
    /// A single wedge spanning the bar height
    #[default]
    Powerline,
    /// A flat tip with short diagonals at top and bottom
    Octagon,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerlineFill {
    #[default]
    Full,
    /// Only the edges are drawn
    Hollow,
}

/// Side the tip of the shape points to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerlineDirection {
    Left,
    Right,
}

/// A separator drawn in the segment foreground over its background.
/// Its width follows the bar height, not the font.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Powerline {
    #[serde(default)]
    pub style: PowerlineStyle,
    #[serde(default)]
    pub fill: PowerlineFill,
    pub direction: PowerlineDirection,
}

impl Powerline {
    pub fn new(direction: PowerlineDirection) -> Self {
        Self {
            style: PowerlineStyle::default(),
            fill: PowerlineFill::default(),
            direction,
        }
    }

    /// Width in pixels on a bar `height` pixels tall
    pub fn width(&self, height: u32) -> u32 {
        height.div_ceil(2)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentContent {
    Text(String),
    /// Empty space of the given pixel width
    Gap(u32),
    Powerline(Powerline),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyledSegment {
    pub content: SegmentContent,
    #[serde(default)]
    pub style: Style,
    /// Open click regions, outermost first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<ClickAction>,
}

/// Ordered segments of one alignment zone
pub type Block = Vec<StyledSegment>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Alignment {
    Left,
    Center,
    Right,
}

impl Alignment {
    pub const ALL: [Alignment; 3] = [Alignment::Left, Alignment::Center, Alignment::Right];
}

/// Left, center and right blocks of one monitor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Blocks {
    pub left: Block,
    pub center: Block,
    pub right: Block,
}

impl Blocks {
    pub fn get(&self, align: Alignment) -> &Block {
        match align {
            Alignment::Left => &self.left,
            Alignment::Center => &self.center,
            Alignment::Right => &self.right,
        }
    }

    pub fn get_mut(&mut self, align: Alignment) -> &mut Block {
        match align {
            Alignment::Left => &mut self.left,
            Alignment::Center => &mut self.center,
            Alignment::Right => &mut self.right,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty() && self.center.is_empty() && self.right.is_empty()
    }

    /// Append `other`'s segments after ours, zone by zone
    pub fn extend(&mut self, other: &Blocks) {
        for align in Alignment::ALL {
            self.get_mut(align).extend(other.get(align).iter().cloned());
        }
    }
}

/// A monitor addressed relative to either end of the ordered monitor list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorTarget {
    FromFirst(usize),
    FromLast(usize),
}

impl MonitorTarget {
    /// Index into a list of `count` monitors, if the target exists
    pub fn resolve(self, count: usize) -> Option<usize> {
        match self {
            MonitorTarget::FromFirst(n) => (n < count).then_some(n),
            MonitorTarget::FromLast(n) => n.checked_add(1).and_then(|k| count.checked_sub(k)),
        }
    }

    /// The monitor after this one (`S+`)
    pub fn next(self) -> Self {
        match self {
            MonitorTarget::FromFirst(n) => MonitorTarget::FromFirst(n.saturating_add(1)),
            MonitorTarget::FromLast(n) => MonitorTarget::FromLast(n.saturating_sub(1)),
        }
    }

    /// The monitor before this one (`S-`)
    pub fn prev(self) -> Self {
        match self {
            MonitorTarget::FromFirst(n) => MonitorTarget::FromFirst(n.saturating_sub(1)),
            MonitorTarget::FromLast(n) => MonitorTarget::FromLast(n.saturating_add(1)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetedBlocks {
    pub target: MonitorTarget,
    #[serde(flatten)]
    pub blocks: Blocks,
}

/// Everything one input line asked the bar to show
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BarContent {
    /// Shown on every monitor
    #[serde(flatten)]
    pub broadcast: Blocks,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub targeted: Vec<TargetedBlocks>,
}

impl BarContent {
    pub fn is_empty(&self) -> bool {
        self.broadcast.is_empty() && self.targeted.iter().all(|t| t.blocks.is_empty())
    }

    /// Blocks for `target`, creating the section on first use
    pub fn blocks_mut(&mut self, target: Option<MonitorTarget>) -> &mut Blocks {
        let Some(target) = target else {
            return &mut self.broadcast;
        };
        let index = match self.targeted.iter().position(|t| t.target == target) {
            Some(index) => index,
            None => {
                self.targeted.push(TargetedBlocks {
                    target,
                    blocks: Blocks::default(),
                });
                self.targeted.len() - 1
            }
        };
        &mut self.targeted[index].blocks
    }

    /// What monitor `index` of `count` shows: broadcast content followed by
    /// every section targeting it, in input order
    pub fn blocks_for(&self, index: usize, count: usize) -> Blocks {
        let mut blocks = self.broadcast.clone();
        for section in &self.targeted {
            if section.target.resolve(count) == Some(index) {
                blocks.extend(&section.blocks);
            }
        }
        blocks
    }
}

/// Input line encoding
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputFormat {
    #[default]
    Markup,
    Json,
}

/// Where a frame's content came from. Layout only ever sees the resulting
/// [`BarContent`].
#[derive(Debug, Clone, PartialEq)]
pub enum BlockSource {
    Markup(String),
    Structured(BarContent),
}

impl BlockSource {
    pub fn from_line(line: &str, format: InputFormat) -> Result<Self, serde_json::Error> {
        match format {
            InputFormat::Markup => Ok(BlockSource::Markup(line.to_string())),
            InputFormat::Json => serde_json::from_str(line).map(BlockSource::Structured),
        }
    }
}
