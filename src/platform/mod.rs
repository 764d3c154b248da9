//! Window system abstraction
//!
//! The bar needs very little from the window system: the list of monitor
//! outputs, one docked window per output, a way to put pixels into it and a
//! stream of expose/click/hotplug events. [`WindowSystem`] captures exactly
//! that so the event loop can run against X11 or an in-memory backend.

pub mod x11;

#[cfg(test)]
pub mod headless;

use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::compositor::Frame;

/// Handle of a bar window
pub type SurfaceId = u32;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("failed to connect to display server: {0}")]
    ConnectionFailed(String),

    #[error("display server connection lost: {0}")]
    ConnectionLost(String),

    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("unknown surface {0}")]
    UnknownSurface(SurfaceId),

    #[error("{0}")]
    Other(String),
}

impl PlatformError {
    /// Whether the connection is gone and the loop cannot continue
    pub fn is_fatal(&self) -> bool {
        matches!(self, PlatformError::ConnectionLost(_) | PlatformError::ConnectionFailed(_))
    }
}

/// A monitor output as reported by the window system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputInfo {
    /// Unique identifier (the RandR monitor name on X11)
    pub id: String,
    /// X position in the virtual screen
    pub x: i32,
    /// Y position in the virtual screen
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub primary: bool,
}

impl OutputInfo {
    pub fn right(&self) -> i64 {
        self.x as i64 + self.width as i64
    }

    pub fn bottom(&self) -> i64 {
        self.y as i64 + self.height as i64
    }

    /// Whether `other` lies entirely within this output
    pub fn contains(&self, other: &OutputInfo) -> bool {
        other.x >= self.x && other.y >= self.y && other.right() <= self.right() && other.bottom() <= self.bottom()
    }

    pub fn same_geometry(&self, other: &OutputInfo) -> bool {
        (self.x, self.y, self.width, self.height) == (other.x, other.y, other.width, other.height)
    }
}

/// Screen edge the bar is docked to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Edge {
    #[default]
    Top,
    Bottom,
}

/// Absolute placement of a bar window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarGeometry {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub edge: Edge,
}

impl BarGeometry {
    /// Full-width bar of `height` pixels along `edge` of `output`
    pub fn for_output(output: &OutputInfo, height: u32, edge: Edge) -> Self {
        let height = height.min(output.height).max(1);
        let y = match edge {
            Edge::Top => output.y,
            Edge::Bottom => output.y + output.height.saturating_sub(height) as i32,
        };
        Self {
            x: output.x,
            y,
            width: output.width,
            height,
            edge,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformEvent {
    /// Part of a surface was uncovered; its contents must be redrawn
    Expose { surface: SurfaceId },
    /// Pointer button pressed at surface-relative coordinates
    ButtonPress {
        surface: SurfaceId,
        x: i32,
        y: i32,
        button: u8,
    },
    /// Monitors were added, removed or reconfigured
    OutputsChanged,
}

/// Operations the bar needs from a window system
pub trait WindowSystem {
    /// Currently connected outputs, in no particular order
    fn outputs(&mut self) -> Result<Vec<OutputInfo>, PlatformError>;

    /// Create and map a bar window on `output`
    fn create_surface(&mut self, output: &OutputInfo, geometry: BarGeometry) -> Result<SurfaceId, PlatformError>;

    fn configure_surface(&mut self, surface: SurfaceId, geometry: BarGeometry) -> Result<(), PlatformError>;

    fn destroy_surface(&mut self, surface: SurfaceId);

    /// Copy a frame span into the surface
    fn present(&mut self, surface: SurfaceId, frame: &Frame) -> Result<(), PlatformError>;

    /// Next queued event, without blocking
    fn poll_event(&mut self) -> Result<Option<PlatformEvent>, PlatformError>;

    fn flush(&mut self) -> Result<(), PlatformError>;

    /// Resolves once new events may be available
    fn readable(&self) -> impl Future<Output = Result<(), PlatformError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(x: i32, y: i32, width: u32, height: u32) -> OutputInfo {
        OutputInfo {
            id: format!("{x}x{y}"),
            x,
            y,
            width,
            height,
            primary: false,
        }
    }

    #[test]
    fn test_contains() {
        let big = output(0, 0, 1920, 1080);
        assert!(big.contains(&output(0, 0, 1280, 720)));
        assert!(big.contains(&big));
        assert!(!big.contains(&output(1920, 0, 1280, 1024)));
        assert!(!big.contains(&output(1000, 0, 1280, 720)));
    }

    #[test]
    fn test_geometry_for_edges() {
        let mon = output(1920, 0, 1280, 1024);
        let top = BarGeometry::for_output(&mon, 20, Edge::Top);
        assert_eq!((top.x, top.y, top.width, top.height), (1920, 0, 1280, 20));

        let bottom = BarGeometry::for_output(&mon, 20, Edge::Bottom);
        assert_eq!((bottom.x, bottom.y), (1920, 1004));
    }

    #[test]
    fn test_geometry_height_clamped_to_output() {
        let mon = output(0, 0, 800, 10);
        assert_eq!(BarGeometry::for_output(&mon, 20, Edge::Bottom).height, 10);
        assert_eq!(BarGeometry::for_output(&mon, 0, Edge::Top).height, 1);
    }
}
