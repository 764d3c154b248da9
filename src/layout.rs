//! Placement of styled blocks on one monitor's bar
//!
//! Left content starts at x=0, right content ends at the right edge and the
//! center block is centered in the space left between the two. When everything does not fit, whole segments
//! are dropped in a fixed order: center edges alternately (trailing first),
//! then the left block from its end, then the right block from its start.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::debug;

use crate::font::{FontResolver, Glyph};
use crate::markup::{Alignment, Blocks, ClickAction, Powerline, SegmentContent, Style, StyledSegment};

#[derive(Debug, Clone, PartialEq)]
pub struct PositionedGlyph {
    /// Pen position on the bar
    pub x: i32,
    pub glyph: Arc<Glyph>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlacedSegment {
    pub x: u32,
    pub width: u32,
    pub style: Style,
    pub glyphs: Vec<PositionedGlyph>,
    /// Separator shape filling the segment, drawn instead of glyphs
    pub powerline: Option<Powerline>,
}

/// Horizontal span that runs `command` when clicked with `button`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClickableRegion {
    pub x: u32,
    pub width: u32,
    pub button: u8,
    pub command: String,
    /// Nesting level, 0 for the outermost region
    pub depth: usize,
}

impl ClickableRegion {
    pub fn contains(&self, x: u32) -> bool {
        x >= self.x && x - self.x < self.width
    }

    fn end(&self) -> u32 {
        self.x + self.width
    }
}

/// Computed placement for one monitor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Layout {
    pub width: u32,
    pub height: u32,
    pub segments: Vec<PlacedSegment>,
    pub regions: Vec<ClickableRegion>,
    /// Segments dropped to make the rest fit
    pub dropped: usize,
}

struct Measured<'a> {
    segment: &'a StyledSegment,
    glyphs: Vec<Arc<Glyph>>,
    width: u32,
}

impl Layout {
    pub fn compute(blocks: &Blocks, resolver: &FontResolver, width: u32, height: u32) -> Self {
        resolver.prefetch(Alignment::ALL.into_iter().flat_map(|align| {
            blocks.get(align).iter().flat_map(|segment| {
                let font = segment.style.font;
                text_of(segment).chars().map(move |ch| (ch, font))
            })
        }));

        let mut left = measure_block(blocks.get(Alignment::Left), resolver, height);
        let mut center = measure_block(blocks.get(Alignment::Center), resolver, height);
        let mut right = measure_block(blocks.get(Alignment::Right), resolver, height);

        let dropped = truncate(&mut left, &mut center, &mut right, width);
        if dropped > 0 {
            debug!(dropped, width, "bar content truncated");
        }

        let left_width = block_width(&left);
        let center_width = block_width(&center);
        let right_width = block_width(&right);

        // Truncation guarantees the three blocks fit
        let center_x = left_width + (width - left_width - right_width - center_width) / 2;

        let mut layout = Layout {
            width,
            height,
            dropped,
            ..Layout::default()
        };
        layout.place(&left, 0);
        layout.place(&center, center_x);
        layout.place(&right, width - right_width);
        layout
    }

    /// Append one block's segments and click regions starting at `x`
    fn place(&mut self, block: &VecDeque<Measured<'_>>, mut x: u32) {
        let first_region = self.regions.len();

        for measured in block {
            let mut pen = x as i32;
            let glyphs = measured
                .glyphs
                .iter()
                .map(|glyph| {
                    let placed = PositionedGlyph {
                        x: pen,
                        glyph: Arc::clone(glyph),
                    };
                    pen += glyph.advance as i32;
                    placed
                })
                .collect();

            for (depth, action) in measured.segment.actions.iter().enumerate() {
                self.add_region(first_region, x, measured.width, depth, action);
            }

            self.segments.push(PlacedSegment {
                x,
                width: measured.width,
                style: measured.segment.style.clone(),
                glyphs,
                powerline: match measured.segment.content {
                    SegmentContent::Powerline(shape) => Some(shape),
                    _ => None,
                },
            });
            x += measured.width;
        }
    }

    /// Extend the adjacent region for the same action, or start a new one
    fn add_region(&mut self, first: usize, x: u32, width: u32, depth: usize, action: &ClickAction) {
        if width == 0 {
            return;
        }
        let adjacent = self.regions[first..].iter_mut().rev().find(|r| {
            r.depth == depth && r.end() == x && r.button == action.button && r.command == action.command
        });
        match adjacent {
            Some(region) => region.width += width,
            None => self.regions.push(ClickableRegion {
                x,
                width,
                button: action.button,
                command: action.command.clone(),
                depth,
            }),
        }
    }

    /// Innermost region under (`x`, `y`) bound to `button`
    pub fn action_at(&self, x: i32, y: i32, button: u8) -> Option<&ClickableRegion> {
        if y < 0 || y as u32 >= self.height || x < 0 {
            return None;
        }
        self.regions
            .iter()
            .filter(|r| r.button == button && r.contains(x as u32))
            .max_by_key(|r| r.depth)
    }

    /// Total width of everything placed
    pub fn used_width(&self) -> u32 {
        self.segments.iter().map(|s| s.width).sum()
    }
}

fn text_of(segment: &StyledSegment) -> &str {
    match &segment.content {
        SegmentContent::Text(text) => text,
        SegmentContent::Gap(_) | SegmentContent::Powerline(_) => "",
    }
}

fn measure_segment<'a>(segment: &'a StyledSegment, resolver: &FontResolver, height: u32) -> Measured<'a> {
    match &segment.content {
        SegmentContent::Gap(width) => Measured {
            segment,
            glyphs: Vec::new(),
            width: *width,
        },
        SegmentContent::Powerline(shape) => Measured {
            segment,
            glyphs: Vec::new(),
            width: shape.width(height),
        },
        SegmentContent::Text(text) => {
            let glyphs: Vec<_> = text
                .chars()
                .filter(|ch| !ch.is_control())
                .map(|ch| resolver.glyph_or_placeholder(ch, segment.style.font))
                .collect();
            let width = glyphs.iter().map(|g| g.advance).sum();
            Measured {
                segment,
                glyphs,
                width,
            }
        }
    }
}

fn measure_block<'a>(
    block: &'a [StyledSegment],
    resolver: &FontResolver,
    height: u32,
) -> VecDeque<Measured<'a>> {
    block
        .iter()
        .map(|segment| measure_segment(segment, resolver, height))
        .collect()
}

fn block_width(block: &VecDeque<Measured<'_>>) -> u32 {
    block.iter().map(|m| m.width).sum()
}

/// Drop segments until all three blocks fit in `width`; returns how many went
fn truncate(
    left: &mut VecDeque<Measured<'_>>,
    center: &mut VecDeque<Measured<'_>>,
    right: &mut VecDeque<Measured<'_>>,
    width: u32,
) -> usize {
    let mut total = u64::from(block_width(left)) + u64::from(block_width(center)) + u64::from(block_width(right));
    let mut dropped = 0;
    let mut trailing = true;

    while total > u64::from(width) {
        let removed = if !center.is_empty() {
            let removed = if trailing { center.pop_back() } else { center.pop_front() };
            trailing = !trailing;
            removed
        } else if !left.is_empty() {
            left.pop_back()
        } else {
            right.pop_front()
        };

        let Some(removed) = removed else { break };
        total -= u64::from(removed.width);
        dropped += 1;
    }
    dropped
}
