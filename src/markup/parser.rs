//! Markup interpreter
//!
//! Text outside `%{...}` is appended under the current style. Inside, the
//! parser reads whitespace separated commands until the closing brace. Bad
//! commands are skipped and reported; they never abort the line.

use std::fmt::Write as _;

use memchr::memmem;
use thiserror::Error;

use super::{
    Alignment, BarContent, BlockSource, Blocks, ClickAction, MonitorTarget, Palette, Powerline,
    PowerlineDirection, PowerlineFill, PowerlineStyle, SegmentContent, StyledSegment, Style,
};
use crate::color::{ColorError, Rgba};

/// A recoverable problem in one input line; offsets are byte positions
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseWarning {
    #[error("unknown command '{token}' at byte {offset}")]
    UnknownCommand { offset: usize, token: String },

    #[error("invalid argument in '{token}' at byte {offset}")]
    InvalidArgument { offset: usize, token: String },

    #[error("invalid color in '{token}' at byte {offset}")]
    InvalidColor {
        offset: usize,
        token: String,
        #[source]
        source: ColorError,
    },

    #[error("click action at byte {offset} has no closing ':'")]
    UnterminatedAction { offset: usize },

    #[error("'{token}' at byte {offset} closes no open click region")]
    UnmatchedClose { offset: usize, token: String },

    #[error("{count} click region(s) left open at byte {offset}, closed automatically")]
    AutoClosed { offset: usize, count: usize },

    #[error("'%{{' at byte {offset} is never closed")]
    Unterminated { offset: usize },
}

/// Result of parsing one line
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedLine {
    pub content: BarContent,
    pub warnings: Vec<ParseWarning>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    OutsideCommand,
    ParsingCommand { opened_at: usize },
}

/// Mutable style and placement while walking one line
struct LineState {
    style: Style,
    align: Alignment,
    /// `None` while broadcasting to every monitor
    target: Option<MonitorTarget>,
    /// Open click regions, outermost first
    actions: Vec<ClickAction>,
    text: String,
    content: BarContent,
    warnings: Vec<ParseWarning>,
}

impl LineState {
    fn new() -> Self {
        Self {
            style: Style::default(),
            align: Alignment::Left,
            target: None,
            actions: Vec::new(),
            text: String::new(),
            content: BarContent::default(),
            warnings: Vec::new(),
        }
    }

    fn push(&mut self, content: SegmentContent) {
        let segment = StyledSegment {
            content,
            style: self.style.clone(),
            actions: self.actions.clone(),
        };
        self.content
            .blocks_mut(self.target)
            .get_mut(self.align)
            .push(segment);
    }

    fn flush_text(&mut self) {
        if !self.text.is_empty() {
            let text = std::mem::take(&mut self.text);
            self.push(SegmentContent::Text(text));
        }
    }

    fn auto_close(&mut self, offset: usize) {
        if !self.actions.is_empty() {
            self.warnings.push(ParseWarning::AutoClosed {
                offset,
                count: self.actions.len(),
            });
            self.actions.clear();
        }
    }

    fn warn(&mut self, warning: ParseWarning) {
        self.warnings.push(warning);
    }
}

/// Turns lemonbar-style markup into [`BarContent`]
#[derive(Debug, Clone, Default)]
pub struct MarkupParser {
    palette: Palette,
}

impl MarkupParser {
    pub fn new(palette: Palette) -> Self {
        Self { palette }
    }

    /// Produce content from either source kind
    pub fn read(&self, source: BlockSource) -> ParsedLine {
        match source {
            BlockSource::Markup(line) => self.parse(&line),
            BlockSource::Structured(content) => ParsedLine {
                content,
                warnings: Vec::new(),
            },
        }
    }

    pub fn parse(&self, line: &str) -> ParsedLine {
        let line = line.trim_end_matches(['\n', '\r']);
        let bytes = line.as_bytes();
        let finder = memmem::Finder::new(b"%{");

        let mut st = LineState::new();
        let mut state = State::OutsideCommand;
        let mut pos = 0;

        loop {
            match state {
                State::OutsideCommand => match finder.find(&bytes[pos..]) {
                    Some(i) => {
                        st.text.push_str(&line[pos..pos + i]);
                        st.flush_text();
                        state = State::ParsingCommand { opened_at: pos + i };
                        pos += i + 2;
                    }
                    None => {
                        st.text.push_str(&line[pos..]);
                        break;
                    }
                },
                State::ParsingCommand { opened_at } => {
                    pos = skip_whitespace(bytes, pos);
                    match bytes.get(pos) {
                        None => {
                            st.warn(ParseWarning::Unterminated { offset: opened_at });
                            break;
                        }
                        Some(b'}') => {
                            pos += 1;
                            state = State::OutsideCommand;
                        }
                        Some(_) => pos = self.command(&mut st, line, pos),
                    }
                }
            }
        }

        st.flush_text();
        st.auto_close(line.len());

        ParsedLine {
            content: st.content,
            warnings: st.warnings,
        }
    }

    /// Apply the command starting at `pos`, returning the position after it
    fn command(&self, st: &mut LineState, line: &str, pos: usize) -> usize {
        if line.as_bytes()[pos] == b'A' {
            return self.action(st, line, pos);
        }

        let end = token_end(line.as_bytes(), pos);
        let token = &line[pos..end];
        let mut chars = token.chars();
        let Some(cmd) = chars.next() else {
            return end;
        };
        let arg = chars.as_str();

        let invalid = |token: &str| ParseWarning::InvalidArgument {
            offset: pos,
            token: token.to_string(),
        };

        match cmd {
            'F' | 'B' | 'U' => match color_arg(arg) {
                Ok(color) => {
                    let slot = match cmd {
                        'F' => &mut st.style.fg,
                        'B' => &mut st.style.bg,
                        _ => &mut st.style.line,
                    };
                    *slot = color;
                }
                Err(source) => st.warn(ParseWarning::InvalidColor {
                    offset: pos,
                    token: token.to_string(),
                    source,
                }),
            },
            'T' => match arg {
                "-" => st.style.font = None,
                _ => match arg.parse::<usize>() {
                    Ok(n) if n >= 1 => st.style.font = Some(n - 1),
                    _ => st.warn(invalid(token)),
                },
            },
            'l' | 'c' | 'r' if arg.is_empty() => {
                let align = match cmd {
                    'l' => Alignment::Left,
                    'c' => Alignment::Center,
                    _ => Alignment::Right,
                };
                if align != st.align {
                    st.auto_close(pos);
                    st.align = align;
                }
            }
            'R' if arg.is_empty() => {
                let fg = st.style.foreground(&self.palette);
                let bg = st.style.background(&self.palette);
                st.style.fg = Some(bg);
                st.style.bg = Some(fg);
            }
            'O' => match arg.parse::<u32>() {
                Ok(width) => st.push(SegmentContent::Gap(width)),
                Err(_) => st.warn(invalid(token)),
            },
            'P' => match powerline_arg(arg) {
                Some(shape) => st.push(SegmentContent::Powerline(shape)),
                None => st.warn(invalid(token)),
            },
            '+' | '-' => {
                let on = cmd == '+';
                match arg {
                    "u" => st.style.underline = on,
                    "o" => st.style.overline = on,
                    _ => st.warn(invalid(token)),
                }
            }
            'S' => {
                let current = st.target;
                let target = match arg {
                    "f" => Some(MonitorTarget::FromFirst(0)),
                    "l" => Some(MonitorTarget::FromLast(0)),
                    "+" => Some(current.map_or(MonitorTarget::FromFirst(1), MonitorTarget::next)),
                    "-" => Some(current.map_or(MonitorTarget::FromFirst(0), MonitorTarget::prev)),
                    _ => arg.parse().ok().map(MonitorTarget::FromFirst),
                };
                match target {
                    Some(target) if Some(target) != current => {
                        st.auto_close(pos);
                        st.target = Some(target);
                    }
                    Some(_) => {}
                    None => st.warn(invalid(token)),
                }
            }
            _ => st.warn(ParseWarning::UnknownCommand {
                offset: pos,
                token: token.to_string(),
            }),
        }

        end
    }

    /// `A[button]:command:` opens a region, `A[button]` closes one
    fn action(&self, st: &mut LineState, line: &str, pos: usize) -> usize {
        let bytes = line.as_bytes();
        let digits_end = pos + 1 + bytes[pos + 1..].iter().take_while(|b| b.is_ascii_digit()).count();
        let digits = &line[pos + 1..digits_end];

        let button = if digits.is_empty() {
            None
        } else {
            match digits.parse::<u8>() {
                Ok(b) if b > 0 => Some(b),
                _ => {
                    st.warn(ParseWarning::InvalidArgument {
                        offset: pos,
                        token: line[pos..digits_end].to_string(),
                    });
                    return token_end(bytes, digits_end);
                }
            }
        };

        if bytes.get(digits_end) != Some(&b':') {
            match close_region(&mut st.actions, button) {
                Some(_) => {}
                None => st.warn(ParseWarning::UnmatchedClose {
                    offset: pos,
                    token: line[pos..digits_end].to_string(),
                }),
            }
            return digits_end;
        }

        let Some((command, end)) = read_action(line, digits_end + 1) else {
            st.warn(ParseWarning::UnterminatedAction { offset: pos });
            return line.len();
        };
        st.actions.push(ClickAction::new(button.unwrap_or(1), command));
        end
    }
}

fn skip_whitespace(bytes: &[u8], mut pos: usize) -> usize {
    while bytes.get(pos).is_some_and(u8::is_ascii_whitespace) {
        pos += 1;
    }
    pos
}

fn token_end(bytes: &[u8], pos: usize) -> usize {
    bytes[pos..]
        .iter()
        .position(|&b| b == b'}' || b.is_ascii_whitespace())
        .map_or(bytes.len(), |i| pos + i)
}

fn color_arg(arg: &str) -> Result<Option<Rgba>, ColorError> {
    match arg {
        "-" => Ok(None),
        _ => arg.parse().map(Some),
    }
}

/// `P<l|r>[o][h]`: direction, then optional octagon style and hollow fill
fn powerline_arg(arg: &str) -> Option<Powerline> {
    let mut chars = arg.chars();
    let direction = match chars.next()? {
        'l' => PowerlineDirection::Left,
        'r' => PowerlineDirection::Right,
        _ => return None,
    };

    let mut shape = Powerline::new(direction);
    for flag in chars {
        match flag {
            'o' if shape.style == PowerlineStyle::Powerline => shape.style = PowerlineStyle::Octagon,
            'h' if shape.fill == PowerlineFill::Full => shape.fill = PowerlineFill::Hollow,
            _ => return None,
        }
    }
    Some(shape)
}

/// Read an action body up to the first unescaped ':' starting at `start`.
/// Returns the unescaped command and the position after the terminator.
fn read_action(line: &str, start: usize) -> Option<(String, usize)> {
    let mut command = String::new();
    let mut chars = line[start..].char_indices().peekable();
    while let Some((i, ch)) = chars.next() {
        match ch {
            '\\' if chars.peek().is_some_and(|&(_, next)| next == ':') => {
                command.push(':');
                chars.next();
            }
            ':' => return Some((command, start + i + 1)),
            _ => command.push(ch),
        }
    }
    None
}

/// Remove the innermost open region, restricted to `button` when given
fn close_region(actions: &mut Vec<ClickAction>, button: Option<u8>) -> Option<ClickAction> {
    let index = match button {
        Some(button) => actions.iter().rposition(|a| a.button == button)?,
        None => actions.len().checked_sub(1)?,
    };
    Some(actions.remove(index))
}

// ─────────────────────────────────────────────────────────────────────────────
// Writing markup back out
// ─────────────────────────────────────────────────────────────────────────────

impl BarContent {
    /// Render this content as markup that parses back to an equal value.
    ///
    /// Text containing `%{` has no markup representation and is written
    /// verbatim.
    pub fn to_markup(&self) -> String {
        let mut out = String::new();
        write_blocks(&mut out, &self.broadcast);
        for section in &self.targeted {
            match section.target {
                MonitorTarget::FromFirst(n) => {
                    let _ = write!(out, "%{{S{n}}}");
                }
                MonitorTarget::FromLast(n) => {
                    out.push_str("%{Sl}");
                    for _ in 0..n {
                        out.push_str("%{S-}");
                    }
                }
            }
            write_blocks(&mut out, &section.blocks);
        }
        out
    }
}

fn write_blocks(out: &mut String, blocks: &Blocks) {
    for (align, cmd) in [(Alignment::Left, 'l'), (Alignment::Center, 'c'), (Alignment::Right, 'r')] {
        let block = blocks.get(align);
        if block.is_empty() {
            continue;
        }
        let _ = write!(out, "%{{{cmd}}}");

        let mut open: &[ClickAction] = &[];
        for segment in block {
            // Close regions down to the common prefix, then open the rest
            let common = open
                .iter()
                .zip(&segment.actions)
                .take_while(|(a, b)| a == b)
                .count();
            for _ in common..open.len() {
                out.push_str("%{A}");
            }
            for action in &segment.actions[common..] {
                let _ = write!(
                    out,
                    "%{{A{}:{}:}}",
                    action.button,
                    action.command.replace(':', "\\:")
                );
            }
            open = &segment.actions;

            write_style(out, &segment.style);
            match &segment.content {
                SegmentContent::Text(text) => out.push_str(text),
                SegmentContent::Gap(width) => {
                    let _ = write!(out, "%{{O{width}}}");
                }
                SegmentContent::Powerline(shape) => write_powerline(out, shape),
            }
        }
        for _ in open {
            out.push_str("%{A}");
        }
    }
}

fn write_powerline(out: &mut String, shape: &Powerline) {
    out.push_str("%{P");
    out.push(match shape.direction {
        PowerlineDirection::Left => 'l',
        PowerlineDirection::Right => 'r',
    });
    if shape.style == PowerlineStyle::Octagon {
        out.push('o');
    }
    if shape.fill == PowerlineFill::Hollow {
        out.push('h');
    }
    out.push('}');
}

fn write_style(out: &mut String, style: &Style) {
    let color = |c: Option<Rgba>| c.map_or_else(|| "-".to_string(), |c| c.to_string());
    let font = style.font.map_or_else(|| "-".to_string(), |f| (f + 1).to_string());
    let _ = write!(
        out,
        "%{{F{} B{} U{} T{} {}u {}o}}",
        color(style.fg),
        color(style.bg),
        color(style.line),
        font,
        if style.underline { '+' } else { '-' },
        if style.overline { '+' } else { '-' },
    );
}
