//! Monitor outputs and the bar surface each one owns
//!
//! Outputs nested inside another output (mirrors, cloned displays) get no
//! bar of their own. The rest are ordered left to right, then top to bottom;
//! that order is what `%{S<n>}` indexes into.

use tracing::{debug, info, warn};

use crate::compositor::Canvas;
use crate::layout::Layout;
use crate::markup::Blocks;
use crate::platform::{BarGeometry, Edge, OutputInfo, PlatformError, SurfaceId, WindowSystem};

/// Drop nested outputs and sort the remainder into bar order
pub fn normalize_outputs(outputs: Vec<OutputInfo>) -> Vec<OutputInfo> {
    let mut kept: Vec<OutputInfo> = outputs
        .iter()
        .enumerate()
        .filter(|&(i, output)| {
            !outputs.iter().enumerate().any(|(j, other)| {
                // Of two identical outputs the first one wins
                j != i && other.contains(output) && (!output.contains(other) || j < i)
            })
        })
        .map(|(_, output)| output.clone())
        .collect();
    kept.sort_by_key(|o| (o.x, o.y));
    kept
}

/// A live bar window with its drawing state
pub struct MonitorSurface {
    pub id: SurfaceId,
    pub geometry: BarGeometry,
    pub canvas: Canvas,
    pub layout: Layout,
    /// Blocks the current layout was computed from; `None` forces a relayout
    pub blocks: Option<Blocks>,
}

pub struct Monitor {
    pub info: OutputInfo,
    /// `None` while the bar window could not be created
    pub surface: Option<MonitorSurface>,
}

impl Monitor {
    pub fn is_degraded(&self) -> bool {
        self.surface.is_none()
    }
}

/// What a [`OutputManager::sync`] changed, by output id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputChanges {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub resized: Vec<String>,
}

impl OutputChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.resized.is_empty()
    }
}

pub struct OutputManager {
    monitors: Vec<Monitor>,
    bar_height: u32,
    edge: Edge,
}

impl OutputManager {
    pub fn new(bar_height: u32, edge: Edge) -> Self {
        Self {
            monitors: Vec::new(),
            bar_height,
            edge,
        }
    }

    pub fn monitors(&self) -> &[Monitor] {
        &self.monitors
    }

    pub fn monitors_mut(&mut self) -> &mut [Monitor] {
        &mut self.monitors
    }

    pub fn len(&self) -> usize {
        self.monitors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.monitors.is_empty()
    }

    pub fn find_by_surface(&self, surface: SurfaceId) -> Option<&Monitor> {
        self.monitors
            .iter()
            .find(|m| m.surface.as_ref().is_some_and(|s| s.id == surface))
    }

    pub fn find_by_surface_mut(&mut self, surface: SurfaceId) -> Option<&mut Monitor> {
        self.monitors
            .iter_mut()
            .find(|m| m.surface.as_ref().is_some_and(|s| s.id == surface))
    }

    /// Enumerate outputs and reconcile surfaces with them
    pub fn refresh<W: WindowSystem>(&mut self, ws: &mut W) -> Result<OutputChanges, PlatformError> {
        let outputs = ws.outputs()?;
        self.sync(ws, outputs)
    }

    /// Reconcile surfaces with `outputs`: new outputs get a surface, vanished
    /// ones lose theirs and moved or resized ones are reconfigured. Outputs
    /// whose geometry did not change keep their surface untouched. Surfaces
    /// that previously failed are retried.
    pub fn sync<W: WindowSystem>(
        &mut self,
        ws: &mut W,
        outputs: Vec<OutputInfo>,
    ) -> Result<OutputChanges, PlatformError> {
        let outputs = normalize_outputs(outputs);
        let mut changes = OutputChanges::default();
        let mut previous = std::mem::take(&mut self.monitors);

        for info in outputs {
            let existing = previous
                .iter()
                .position(|m| m.info.id == info.id)
                .map(|i| previous.swap_remove(i));

            let monitor = match existing {
                Some(mut monitor) => {
                    if !monitor.info.same_geometry(&info) {
                        changes.resized.push(info.id.clone());
                        monitor.surface = match monitor.surface.take() {
                            Some(surface) => self.reconfigure(ws, &info, surface)?,
                            None => None,
                        };
                    }
                    monitor.info = info;
                    if monitor.surface.is_none() {
                        monitor.surface = self.open_surface(ws, &monitor.info)?;
                    }
                    monitor
                }
                None => {
                    info!(
                        output = %info.id,
                        x = info.x,
                        y = info.y,
                        width = info.width,
                        height = info.height,
                        primary = info.primary,
                        "output added"
                    );
                    changes.added.push(info.id.clone());
                    let surface = self.open_surface(ws, &info)?;
                    Monitor { info, surface }
                }
            };
            self.monitors.push(monitor);
        }

        for monitor in previous {
            info!(output = %monitor.info.id, "output removed");
            changes.removed.push(monitor.info.id);
            if let Some(surface) = monitor.surface {
                ws.destroy_surface(surface.id);
            }
        }

        if !changes.is_empty() {
            debug!(?changes, monitors = self.monitors.len(), "outputs synchronized");
        }
        Ok(changes)
    }

    /// Destroy every surface
    pub fn release_all<W: WindowSystem>(&mut self, ws: &mut W) {
        for monitor in self.monitors.drain(..) {
            if let Some(surface) = monitor.surface {
                ws.destroy_surface(surface.id);
            }
        }
    }

    /// Create a surface for `info`. Non-fatal failures leave the monitor
    /// degraded until the next sync.
    fn open_surface<W: WindowSystem>(
        &self,
        ws: &mut W,
        info: &OutputInfo,
    ) -> Result<Option<MonitorSurface>, PlatformError> {
        let geometry = BarGeometry::for_output(info, self.bar_height, self.edge);

        let id = match ws.create_surface(info, geometry) {
            Ok(id) => id,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(output = %info.id, error = %e, "cannot create bar window, monitor degraded");
                return Ok(None);
            }
        };

        match Canvas::new(geometry.width, geometry.height) {
            Ok(canvas) => Ok(Some(MonitorSurface {
                id,
                geometry,
                canvas,
                layout: Layout::default(),
                blocks: None,
            })),
            Err(e) => {
                warn!(output = %info.id, error = %e, "monitor degraded");
                ws.destroy_surface(id);
                Ok(None)
            }
        }
    }

    fn reconfigure<W: WindowSystem>(
        &self,
        ws: &mut W,
        info: &OutputInfo,
        mut surface: MonitorSurface,
    ) -> Result<Option<MonitorSurface>, PlatformError> {
        let geometry = BarGeometry::for_output(info, self.bar_height, self.edge);

        let canvas = match ws.configure_surface(surface.id, geometry) {
            Ok(()) => Canvas::new(geometry.width, geometry.height).map_err(|e| e.to_string()),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => Err(e.to_string()),
        };

        match canvas {
            Ok(canvas) => {
                debug!(output = %info.id, width = geometry.width, "bar window reconfigured");
                surface.geometry = geometry;
                surface.canvas = canvas;
                surface.layout = Layout::default();
                surface.blocks = None;
                Ok(Some(surface))
            }
            Err(e) => {
                warn!(output = %info.id, error = %e, "cannot reconfigure bar window, monitor degraded");
                ws.destroy_surface(surface.id);
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::headless::{HeadlessWindowSystem, output};

    fn ids(monitors: &[Monitor]) -> Vec<&str> {
        monitors.iter().map(|m| m.info.id.as_str()).collect()
    }

    #[test]
    fn test_normalize_filters_nested_and_sorts() {
        let outputs = vec![
            output("right", 1920, 0, 1280, 1024),
            output("left", 0, 0, 1920, 1080),
            output("mirror", 0, 0, 1280, 720),
            output("below", 0, 1080, 1920, 1080),
        ];
        let normalized = normalize_outputs(outputs);
        let ids: Vec<_> = normalized.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, ["left", "below", "right"]);
    }

    #[test]
    fn test_normalize_keeps_one_of_identical_outputs() {
        let outputs = vec![output("a", 0, 0, 1920, 1080), output("b", 0, 0, 1920, 1080)];
        let normalized = normalize_outputs(outputs);
        assert_eq!(normalized.len(), 1);
        assert_eq!(normalized[0].id, "a");
    }

    #[test]
    fn test_initial_sync_creates_surfaces() {
        let mut ws = HeadlessWindowSystem::with_outputs(vec![
            output("DP-1", 1920, 0, 1280, 1024),
            output("HDMI-1", 0, 0, 1920, 1080),
        ]);
        let mut manager = OutputManager::new(20, Edge::Bottom);
        let changes = manager.refresh(&mut ws).unwrap();

        assert_eq!(changes.added, ["HDMI-1", "DP-1"]);
        assert_eq!(ids(manager.monitors()), ["HDMI-1", "DP-1"]);
        assert_eq!(ws.surfaces.len(), 2);

        let dp = &ws.surfaces[&ws.surface_for("DP-1").unwrap()];
        assert_eq!((dp.geometry.y, dp.geometry.width, dp.geometry.height), (1004, 1280, 20));
    }

    #[test]
    fn test_hotplug_add_and_remove() {
        let mut ws = HeadlessWindowSystem::with_outputs(vec![output("A", 0, 0, 1920, 1080)]);
        let mut manager = OutputManager::new(20, Edge::Top);
        manager.refresh(&mut ws).unwrap();
        let a = ws.surface_for("A").unwrap();

        ws.outputs.push(output("B", 1920, 0, 1920, 1080));
        let changes = manager.refresh(&mut ws).unwrap();
        assert_eq!(changes.added, ["B"]);
        assert!(changes.removed.is_empty());
        assert_eq!(ws.surface_for("A"), Some(a));
        assert!(ws.configured.is_empty());

        ws.outputs.remove(0);
        let changes = manager.refresh(&mut ws).unwrap();
        assert_eq!(changes.removed, ["A"]);
        assert_eq!(ws.destroyed, [a]);
        assert_eq!(ids(manager.monitors()), ["B"]);
    }

    #[test]
    fn test_resized_output_is_reconfigured() {
        let mut ws = HeadlessWindowSystem::with_outputs(vec![output("A", 0, 0, 1920, 1080)]);
        let mut manager = OutputManager::new(20, Edge::Top);
        manager.refresh(&mut ws).unwrap();
        let a = ws.surface_for("A").unwrap();
        manager.monitors_mut()[0].surface.as_mut().unwrap().blocks = Some(Blocks::default());

        ws.outputs[0].width = 2560;
        let changes = manager.refresh(&mut ws).unwrap();
        assert_eq!(changes.resized, ["A"]);
        assert_eq!(ws.configured, [a]);

        let surface = manager.monitors()[0].surface.as_ref().unwrap();
        assert_eq!(surface.id, a);
        assert_eq!(surface.canvas.width(), 2560);
        assert!(surface.blocks.is_none());
    }

    #[test]
    fn test_unchanged_sync_is_noop() {
        let mut ws = HeadlessWindowSystem::with_outputs(vec![output("A", 0, 0, 800, 600)]);
        let mut manager = OutputManager::new(16, Edge::Top);
        manager.refresh(&mut ws).unwrap();
        let changes = manager.refresh(&mut ws).unwrap();
        assert!(changes.is_empty());
        assert_eq!(ws.created.len(), 1);
        assert!(ws.configured.is_empty() && ws.destroyed.is_empty());
    }

    #[test]
    fn test_failed_surface_degrades_and_retries() {
        let mut ws = HeadlessWindowSystem::with_outputs(vec![
            output("A", 0, 0, 800, 600),
            output("B", 800, 0, 800, 600),
        ]);
        ws.failing.insert("B".into());
        let mut manager = OutputManager::new(16, Edge::Top);
        manager.refresh(&mut ws).unwrap();

        assert!(!manager.monitors()[0].is_degraded());
        assert!(manager.monitors()[1].is_degraded());
        assert_eq!(ws.surfaces.len(), 1);

        ws.failing.clear();
        manager.refresh(&mut ws).unwrap();
        assert!(!manager.monitors()[1].is_degraded());
        assert_eq!(ws.surfaces.len(), 2);
    }

    #[test]
    fn test_release_all() {
        let mut ws = HeadlessWindowSystem::with_outputs(vec![
            output("A", 0, 0, 800, 600),
            output("B", 800, 0, 800, 600),
        ]);
        let mut manager = OutputManager::new(16, Edge::Top);
        manager.refresh(&mut ws).unwrap();
        manager.release_all(&mut ws);
        assert!(ws.surfaces.is_empty());
        assert!(manager.is_empty());
    }
}
