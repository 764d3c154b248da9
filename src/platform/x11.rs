//! X11 backend
//!
//! One override-free dock window per monitor, with EWMH hints so window
//! managers keep it on every desktop and reserve its space. Monitors come
//! from RandR 1.5 and hotplug arrives as RandR notify events. The connection
//! fd is registered with tokio so the event loop can wait on it next to
//! stdin.

use std::os::fd::{AsFd, OwnedFd};

use hashbrown::HashMap;
use tokio::io::Interest;
use tokio::io::unix::AsyncFd;
use tracing::{debug, info, warn};
use x11rb::atom_manager;
use x11rb::connection::{Connection, RequestConnection};
use x11rb::errors::{ConnectionError, ReplyError, ReplyOrIdError};
use x11rb::protocol::Event;
use x11rb::protocol::randr::{self, ConnectionExt as _};
use x11rb::protocol::xproto::*;
use x11rb::rust_connection::RustConnection;
use x11rb::wrapper::ConnectionExt as _;

use super::{BarGeometry, Edge, OutputInfo, PlatformError, PlatformEvent, SurfaceId, WindowSystem};
use crate::compositor::Frame;

// Atoms needed for EWMH hints
atom_manager! {
    pub AtomCollection: AtomCollectionCookie {
        _NET_WM_WINDOW_TYPE,
        _NET_WM_WINDOW_TYPE_DOCK,
        _NET_WM_DESKTOP,
        _NET_WM_STATE,
        _NET_WM_STATE_STICKY,
        _NET_WM_STATE_ABOVE,
        _NET_WM_STRUT,
        _NET_WM_STRUT_PARTIAL,
        _NET_WM_NAME,
        UTF8_STRING,
        ATOM,
        CARDINAL,
    }
}

/// `_NET_WM_DESKTOP` value meaning "all desktops"
const ALL_DESKTOPS: u32 = 0xFFFF_FFFF;

/// Bytes reserved for the PutImage request header
const PUT_IMAGE_HEADER: usize = 24;

impl From<ConnectionError> for PlatformError {
    fn from(e: ConnectionError) -> Self {
        PlatformError::ConnectionLost(e.to_string())
    }
}

impl From<ReplyError> for PlatformError {
    fn from(e: ReplyError) -> Self {
        match e {
            ReplyError::ConnectionError(e) => e.into(),
            ReplyError::X11Error(e) => PlatformError::Request(format!("{:?} (value {})", e.error_kind, e.bad_value)),
        }
    }
}

impl From<ReplyOrIdError> for PlatformError {
    fn from(e: ReplyOrIdError) -> Self {
        match e {
            ReplyOrIdError::ConnectionError(e) => e.into(),
            ReplyOrIdError::X11Error(e) => PlatformError::Request(format!("{:?} (value {})", e.error_kind, e.bad_value)),
            ReplyOrIdError::IdsExhausted => PlatformError::Other("X11 resource ids exhausted".into()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Struts
// ─────────────────────────────────────────────────────────────────────────────

/// `_NET_WM_STRUT_PARTIAL` for a bar, relative to a root window
/// `screen_height` pixels tall. The first four values double as
/// `_NET_WM_STRUT`.
pub fn strut_for(geometry: &BarGeometry, screen_height: u32) -> [u32; 12] {
    let start_x = geometry.x.max(0) as u32;
    let end_x = (start_x + geometry.width).saturating_sub(1);
    let mut strut = [0u32; 12];
    match geometry.edge {
        Edge::Top => {
            strut[2] = geometry.y.max(0) as u32 + geometry.height;
            strut[8] = start_x;
            strut[9] = end_x;
        }
        Edge::Bottom => {
            strut[3] = screen_height.saturating_sub(geometry.y.max(0) as u32);
            strut[10] = start_x;
            strut[11] = end_x;
        }
    }
    strut
}

// ─────────────────────────────────────────────────────────────────────────────
// X11 Window System
// ─────────────────────────────────────────────────────────────────────────────

struct BarWindow {
    gc: Gcontext,
}

pub struct X11WindowSystem {
    conn: RustConnection,
    root: Window,
    visual: Visualid,
    depth: u8,
    colormap: Colormap,
    atoms: AtomCollection,
    /// Duplicate of the connection socket, registered for readiness only
    fd: AsyncFd<OwnedFd>,
    name: String,
    windows: HashMap<Window, BarWindow>,
}

impl X11WindowSystem {
    /// Connect to the display named by `$DISPLAY`. Must be called from within
    /// a tokio runtime.
    pub fn connect(name: &str) -> Result<Self, PlatformError> {
        let (conn, screen_num) =
            x11rb::connect(None).map_err(|e| PlatformError::ConnectionFailed(e.to_string()))?;

        let atoms = AtomCollection::new(&conn)?.reply()?;

        let screen = &conn.setup().roots[screen_num];
        let root = screen.root;
        let (visual, depth) = find_argb_visual(screen).unwrap_or_else(|| {
            warn!("no 32-bit visual, bar background will be opaque");
            (screen.root_visual, screen.root_depth)
        });

        let version = conn
            .randr_query_version(1, 5)?
            .reply()
            .map_err(|_| PlatformError::UnsupportedFeature("RandR extension".into()))?;
        if (version.major_version, version.minor_version) < (1, 5) {
            return Err(PlatformError::UnsupportedFeature(format!(
                "RandR 1.5 (server has {}.{})",
                version.major_version, version.minor_version
            )));
        }

        conn.randr_select_input(
            root,
            randr::NotifyMask::SCREEN_CHANGE | randr::NotifyMask::OUTPUT_CHANGE | randr::NotifyMask::CRTC_CHANGE,
        )?;

        let colormap = conn.generate_id()?;
        conn.create_colormap(ColormapAlloc::NONE, colormap, root, visual)?;
        conn.flush()?;

        let watch_failed = |e: std::io::Error| PlatformError::ConnectionFailed(format!("cannot watch X11 socket: {e}"));
        let socket = conn.stream().as_fd().try_clone_to_owned().map_err(watch_failed)?;
        // SAFETY: the AsyncFd owns the duplicate, so it stays open and unchanged until dropped
        let fd = unsafe { AsyncFd::register_with_interest(socket, Interest::READABLE) }
            .map_err(|e| watch_failed(e.into()))?;

        info!(depth, "connected to X11");

        Ok(Self {
            conn,
            root,
            visual,
            depth,
            colormap,
            atoms,
            fd,
            name: name.to_string(),
            windows: HashMap::new(),
        })
    }

    fn screen_height(&self) -> Result<u32, PlatformError> {
        Ok(self.conn.get_geometry(self.root)?.reply()?.height as u32)
    }

    /// Set EWMH hints for dock behavior
    fn setup_window_hints(&self, window: Window, geometry: &BarGeometry) -> Result<(), PlatformError> {
        let atoms = &self.atoms;

        // Window type: dock (no decorations, not managed as a normal client)
        self.conn.change_property32(
            PropMode::REPLACE,
            window,
            atoms._NET_WM_WINDOW_TYPE,
            atoms.ATOM,
            &[atoms._NET_WM_WINDOW_TYPE_DOCK],
        )?;

        // Window state: sticky on every desktop, above normal windows
        self.conn.change_property32(
            PropMode::REPLACE,
            window,
            atoms._NET_WM_STATE,
            atoms.ATOM,
            &[atoms._NET_WM_STATE_STICKY, atoms._NET_WM_STATE_ABOVE],
        )?;
        self.conn.change_property32(
            PropMode::REPLACE,
            window,
            atoms._NET_WM_DESKTOP,
            atoms.CARDINAL,
            &[ALL_DESKTOPS],
        )?;

        let name = self.name.as_bytes();
        self.conn
            .change_property8(PropMode::REPLACE, window, AtomEnum::WM_NAME, AtomEnum::STRING, name)?;
        self.conn
            .change_property8(PropMode::REPLACE, window, atoms._NET_WM_NAME, atoms.UTF8_STRING, name)?;
        let class = [name, b"\0", name, b"\0"].concat();
        self.conn
            .change_property8(PropMode::REPLACE, window, AtomEnum::WM_CLASS, AtomEnum::STRING, &class)?;

        self.set_struts(window, geometry)
    }

    fn set_struts(&self, window: Window, geometry: &BarGeometry) -> Result<(), PlatformError> {
        let strut = strut_for(geometry, self.screen_height()?);
        self.conn.change_property32(
            PropMode::REPLACE,
            window,
            self.atoms._NET_WM_STRUT_PARTIAL,
            self.atoms.CARDINAL,
            &strut,
        )?;
        self.conn.change_property32(
            PropMode::REPLACE,
            window,
            self.atoms._NET_WM_STRUT,
            self.atoms.CARDINAL,
            &strut[..4],
        )?;
        Ok(())
    }

    fn create_window(&mut self, geometry: &BarGeometry) -> Result<Window, PlatformError> {
        let window = self.conn.generate_id()?;

        let win_aux = CreateWindowAux::new()
            .background_pixel(0)
            .border_pixel(0)
            .colormap(self.colormap)
            .event_mask(EventMask::EXPOSURE | EventMask::BUTTON_PRESS)
            .override_redirect(0);

        self.conn
            .create_window(
                self.depth,
                window,
                self.root,
                geometry.x as i16,
                geometry.y as i16,
                geometry.width as u16,
                geometry.height as u16,
                0,
                WindowClass::INPUT_OUTPUT,
                self.visual,
                &win_aux,
            )?
            .check()?;
        Ok(window)
    }

    fn map_event(&self, event: Event) -> Option<PlatformEvent> {
        match event {
            Event::Expose(e) if e.count == 0 && self.windows.contains_key(&e.window) => {
                Some(PlatformEvent::Expose { surface: e.window })
            }
            Event::ButtonPress(e) if self.windows.contains_key(&e.event) => Some(PlatformEvent::ButtonPress {
                surface: e.event,
                x: e.event_x as i32,
                y: e.event_y as i32,
                button: e.detail,
            }),
            Event::RandrScreenChangeNotify(_) | Event::RandrNotify(_) => Some(PlatformEvent::OutputsChanged),
            Event::Error(e) => {
                warn!(error = ?e.error_kind, sequence = e.sequence, "X11 request failed");
                None
            }
            _ => None,
        }
    }
}

/// Find a 32-bit ARGB visual for transparency
fn find_argb_visual(screen: &Screen) -> Option<(Visualid, u8)> {
    screen
        .allowed_depths
        .iter()
        .filter(|depth| depth.depth == 32)
        .flat_map(|depth| depth.visuals.iter().map(move |visual| (visual, depth.depth)))
        .find(|(visual, _)| visual.class == VisualClass::TRUE_COLOR)
        .map(|(visual, depth)| (visual.visual_id, depth))
}

impl WindowSystem for X11WindowSystem {
    fn outputs(&mut self) -> Result<Vec<OutputInfo>, PlatformError> {
        let monitors = self.conn.randr_get_monitors(self.root, true)?.reply()?;

        let mut outputs = Vec::with_capacity(monitors.monitors.len());
        for (idx, mon) in monitors.monitors.iter().enumerate() {
            let id = self
                .conn
                .get_atom_name(mon.name)?
                .reply()
                .map(|r| String::from_utf8_lossy(&r.name).into_owned())
                .unwrap_or_else(|_| format!("monitor-{idx}"));

            outputs.push(OutputInfo {
                id,
                x: mon.x as i32,
                y: mon.y as i32,
                width: mon.width as u32,
                height: mon.height as u32,
                primary: mon.primary,
            });
        }

        if outputs.is_empty() {
            // No active monitors reported; fall back to the whole root window
            let root = self.conn.get_geometry(self.root)?.reply()?;
            outputs.push(OutputInfo {
                id: "screen".into(),
                x: 0,
                y: 0,
                width: root.width as u32,
                height: root.height as u32,
                primary: true,
            });
        }

        debug!(count = outputs.len(), "enumerated outputs");
        Ok(outputs)
    }

    fn create_surface(&mut self, output: &OutputInfo, geometry: BarGeometry) -> Result<SurfaceId, PlatformError> {
        let window = self.create_window(&geometry)?;

        let setup = self.setup_window_hints(window, &geometry).and_then(|()| {
            let gc = self.conn.generate_id()?;
            self.conn.create_gc(gc, window, &CreateGCAux::new())?;
            self.conn.map_window(window)?;
            self.conn.flush()?;
            Ok(gc)
        });

        match setup {
            Ok(gc) => {
                debug!(output = %output.id, window, "created bar window");
                self.windows.insert(window, BarWindow { gc });
                Ok(window)
            }
            Err(e) => {
                let _ = self.conn.destroy_window(window);
                let _ = self.conn.flush();
                Err(e)
            }
        }
    }

    fn configure_surface(&mut self, surface: SurfaceId, geometry: BarGeometry) -> Result<(), PlatformError> {
        if !self.windows.contains_key(&surface) {
            return Err(PlatformError::UnknownSurface(surface));
        }
        self.conn.configure_window(
            surface,
            &ConfigureWindowAux::new()
                .x(geometry.x)
                .y(geometry.y)
                .width(geometry.width)
                .height(geometry.height),
        )?;
        self.set_struts(surface, &geometry)?;
        self.conn.flush()?;
        Ok(())
    }

    fn destroy_surface(&mut self, surface: SurfaceId) {
        if let Some(window) = self.windows.remove(&surface) {
            let _ = self.conn.free_gc(window.gc);
            let _ = self.conn.destroy_window(surface);
            let _ = self.conn.flush();
        }
    }

    fn present(&mut self, surface: SurfaceId, frame: &Frame) -> Result<(), PlatformError> {
        let window = self
            .windows
            .get(&surface)
            .ok_or(PlatformError::UnknownSurface(surface))?;

        let row_bytes = frame.width as usize * 4;
        if row_bytes == 0 {
            return Ok(());
        }
        let max_rows = (self.conn.maximum_request_bytes().saturating_sub(PUT_IMAGE_HEADER) / row_bytes).max(1);

        for (chunk, rows) in frame.data.chunks(max_rows * row_bytes).enumerate() {
            let height = rows.len() / row_bytes;
            self.conn.put_image(
                ImageFormat::Z_PIXMAP,
                surface,
                window.gc,
                frame.width as u16,
                height as u16,
                frame.x as i16,
                (chunk * max_rows) as i16,
                0,
                self.depth,
                rows,
            )?;
        }
        Ok(())
    }

    fn poll_event(&mut self) -> Result<Option<PlatformEvent>, PlatformError> {
        while let Some(event) = self.conn.poll_for_event()? {
            if let Some(event) = self.map_event(event) {
                return Ok(Some(event));
            }
        }
        Ok(None)
    }

    fn flush(&mut self) -> Result<(), PlatformError> {
        self.conn.flush()?;
        Ok(())
    }

    async fn readable(&self) -> Result<(), PlatformError> {
        let mut guard = self
            .fd
            .readable()
            .await
            .map_err(|e| PlatformError::ConnectionLost(e.to_string()))?;
        guard.clear_ready();
        Ok(())
    }
}

impl Drop for X11WindowSystem {
    fn drop(&mut self) {
        for (window, bar) in self.windows.drain() {
            let _ = self.conn.free_gc(bar.gc);
            let _ = self.conn.destroy_window(window);
        }
        let _ = self.conn.free_colormap(self.colormap);
        let _ = self.conn.flush();
    }
}
