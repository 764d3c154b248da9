//! In-memory window system for tests

use std::collections::{BTreeMap, HashSet, VecDeque};

use super::{BarGeometry, OutputInfo, PlatformError, PlatformEvent, SurfaceId, WindowSystem};
use crate::compositor::Frame;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadlessSurface {
    pub output: String,
    pub geometry: BarGeometry,
}

/// Records every request; outputs and events are set by the test
#[derive(Default)]
pub struct HeadlessWindowSystem {
    pub outputs: Vec<OutputInfo>,
    /// Outputs whose surface creation fails
    pub failing: HashSet<String>,
    pub surfaces: BTreeMap<SurfaceId, HeadlessSurface>,
    pub presented: Vec<(SurfaceId, Frame)>,
    pub events: VecDeque<PlatformEvent>,
    /// Moved into `events` by the next output enumeration, like events the
    /// server delivers while a reply is awaited
    pub events_on_enumerate: VecDeque<PlatformEvent>,
    pub created: Vec<SurfaceId>,
    pub configured: Vec<SurfaceId>,
    pub destroyed: Vec<SurfaceId>,
    /// Fail the next event poll as if the connection dropped
    pub lose_connection: bool,
    next_id: SurfaceId,
}

pub fn output(id: &str, x: i32, y: i32, width: u32, height: u32) -> OutputInfo {
    OutputInfo {
        id: id.to_string(),
        x,
        y,
        width,
        height,
        primary: false,
    }
}

impl HeadlessWindowSystem {
    pub fn with_outputs(outputs: Vec<OutputInfo>) -> Self {
        Self {
            outputs,
            ..Self::default()
        }
    }

    pub fn surface_for(&self, output: &str) -> Option<SurfaceId> {
        self.surfaces
            .iter()
            .find(|(_, s)| s.output == output)
            .map(|(&id, _)| id)
    }

    /// Frames presented to `surface`, oldest first
    pub fn frames_for(&self, surface: SurfaceId) -> Vec<&Frame> {
        self.presented
            .iter()
            .filter(|(id, _)| *id == surface)
            .map(|(_, frame)| frame)
            .collect()
    }
}

impl WindowSystem for HeadlessWindowSystem {
    fn outputs(&mut self) -> Result<Vec<OutputInfo>, PlatformError> {
        self.events.extend(self.events_on_enumerate.drain(..));
        Ok(self.outputs.clone())
    }

    fn create_surface(&mut self, output: &OutputInfo, geometry: BarGeometry) -> Result<SurfaceId, PlatformError> {
        if self.failing.contains(&output.id) {
            return Err(PlatformError::Request(format!("cannot create window on {}", output.id)));
        }
        self.next_id += 1;
        let id = self.next_id;
        self.surfaces.insert(
            id,
            HeadlessSurface {
                output: output.id.clone(),
                geometry,
            },
        );
        self.created.push(id);
        Ok(id)
    }

    fn configure_surface(&mut self, surface: SurfaceId, geometry: BarGeometry) -> Result<(), PlatformError> {
        let entry = self
            .surfaces
            .get_mut(&surface)
            .ok_or(PlatformError::UnknownSurface(surface))?;
        entry.geometry = geometry;
        self.configured.push(surface);
        Ok(())
    }

    fn destroy_surface(&mut self, surface: SurfaceId) {
        if self.surfaces.remove(&surface).is_some() {
            self.destroyed.push(surface);
        }
    }

    fn present(&mut self, surface: SurfaceId, frame: &Frame) -> Result<(), PlatformError> {
        if !self.surfaces.contains_key(&surface) {
            return Err(PlatformError::UnknownSurface(surface));
        }
        self.presented.push((surface, frame.clone()));
        Ok(())
    }

    fn poll_event(&mut self) -> Result<Option<PlatformEvent>, PlatformError> {
        if std::mem::take(&mut self.lose_connection) {
            return Err(PlatformError::ConnectionLost("headless connection closed".into()));
        }
        Ok(self.events.pop_front())
    }

    fn flush(&mut self) -> Result<(), PlatformError> {
        Ok(())
    }

    async fn readable(&self) -> Result<(), PlatformError> {
        std::future::pending().await
    }
}
