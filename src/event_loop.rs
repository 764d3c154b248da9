//! The bar's single-threaded driver
//!
//! Waits on three sources at once: the next input line, readiness of the
//! window system connection and the shutdown signal. Every wake-up is
//! handled to completion before waiting again, so a slow line simply queues
//! behind the current one in the buffered reader.

use std::borrow::Cow;
use std::future::Future;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::compositor::Compositor;
use crate::config::BarConfig;
use crate::error::BarError;
use crate::font::FontResolver;
use crate::layout::Layout;
use crate::markup::{BarContent, BlockSource, InputFormat, MarkupParser};
use crate::outputs::OutputManager;
use crate::platform::{PlatformError, PlatformEvent, WindowSystem};

enum Wake {
    Shutdown,
    /// Bytes read into the line buffer, 0 at end of input
    Line(std::io::Result<usize>),
    Readable(Result<(), PlatformError>),
}

pub struct Bar<W: WindowSystem> {
    ws: W,
    resolver: FontResolver,
    parser: MarkupParser,
    compositor: Compositor,
    outputs: OutputManager,
    /// Content of the most recent input line
    state: BarContent,
    input_format: InputFormat,
}

impl<W: WindowSystem> Bar<W> {
    pub fn new(ws: W, resolver: FontResolver, config: &BarConfig) -> Self {
        let metrics = resolver.metrics();
        let height = config.height.unwrap_or_else(|| metrics.height()).max(1);
        debug!(height, ascent = metrics.ascent, descent = metrics.descent, "bar geometry");

        Self {
            ws,
            parser: MarkupParser::new(config.palette()),
            compositor: Compositor::new(config.palette(), metrics, config.line_width),
            outputs: OutputManager::new(height, config.position),
            resolver,
            state: BarContent::default(),
            input_format: config.input_format,
        }
    }

    pub fn window_system(&self) -> &W {
        &self.ws
    }

    pub fn outputs(&self) -> &OutputManager {
        &self.outputs
    }

    pub fn state(&self) -> &BarContent {
        &self.state
    }

    /// Run until input ends, `shutdown` resolves or the window system fails.
    /// Surfaces are released in every case.
    pub async fn run<R, C, S>(&mut self, input: R, mut clicks: C, shutdown: S) -> Result<(), BarError>
    where
        R: AsyncBufRead + Unpin,
        C: AsyncWrite + Unpin,
        S: Future<Output = ()>,
    {
        let result = self.serve(input, &mut clicks, shutdown).await;
        self.outputs.release_all(&mut self.ws);
        let _ = self.ws.flush();
        info!("bar stopped");
        result
    }

    async fn serve<R, C, S>(&mut self, mut input: R, clicks: &mut C, shutdown: S) -> Result<(), BarError>
    where
        R: AsyncBufRead + Unpin,
        C: AsyncWrite + Unpin,
        S: Future<Output = ()>,
    {
        self.outputs.refresh(&mut self.ws)?;
        self.redraw()?;

        let mut buf = Vec::new();
        tokio::pin!(shutdown);

        loop {
            self.drain_events(clicks).await?;
            self.ws.flush()?;

            let wake = tokio::select! {
                biased;
                _ = &mut shutdown => Wake::Shutdown,
                read = input.read_until(b'\n', &mut buf) => Wake::Line(read),
                ready = self.ws.readable() => Wake::Readable(ready),
            };

            match wake {
                Wake::Shutdown => {
                    info!("shutdown requested");
                    return Ok(());
                }
                Wake::Line(Ok(0)) => {
                    info!("input closed");
                    return Ok(());
                }
                Wake::Line(Ok(_)) => {
                    let line = decode_line(&buf);
                    buf.clear();
                    self.handle_line(&line)?;
                }
                Wake::Line(Err(e)) => {
                    warn!(error = %e, "failed to read input");
                    return Ok(());
                }
                Wake::Readable(ready) => ready?,
            }
        }
    }

    /// Handle every queued window system event. Bursts of output changes are
    /// applied once. Replies awaited while refreshing outputs can queue more
    /// events, so the queue is drained again until it stays empty.
    async fn drain_events<C: AsyncWrite + Unpin>(&mut self, clicks: &mut C) -> Result<(), BarError> {
        loop {
            let mut outputs_changed = false;
            while let Some(event) = self.ws.poll_event()? {
                if event == PlatformEvent::OutputsChanged {
                    outputs_changed = true;
                    continue;
                }
                if let Some(action) = self.handle_event(event)? {
                    write_click(clicks, &action).await?;
                }
            }
            if !outputs_changed {
                return Ok(());
            }
            self.handle_event(PlatformEvent::OutputsChanged)?;
        }
    }

    /// Apply one input line and redraw what changed
    pub fn handle_line(&mut self, line: &str) -> Result<(), BarError> {
        let source = match BlockSource::from_line(line, self.input_format) {
            Ok(source) => source,
            Err(e) => {
                warn!(error = %e, "ignoring malformed input line");
                return Ok(());
            }
        };

        let parsed = self.parser.read(source);
        for warning in &parsed.warnings {
            warn!(%warning, "markup");
        }
        self.state = parsed.content;
        self.redraw()
    }

    /// Apply one window system event, returning the click action it
    /// triggered, if any
    pub fn handle_event(&mut self, event: PlatformEvent) -> Result<Option<String>, BarError> {
        match event {
            PlatformEvent::Expose { surface } => {
                if let Some(monitor) = self.outputs.find_by_surface_mut(surface)
                    && let Some(exposed) = monitor.surface.as_mut()
                {
                    exposed.canvas.mark_all_dirty();
                }
                self.present()?;
                Ok(None)
            }
            PlatformEvent::ButtonPress { surface, x, y, button } => {
                let action = self
                    .outputs
                    .find_by_surface(surface)
                    .and_then(|monitor| monitor.surface.as_ref())
                    .and_then(|surface| surface.layout.action_at(x, y, button))
                    .map(|region| region.command.clone());
                debug!(surface, x, y, button, ?action, "button press");
                Ok(action)
            }
            PlatformEvent::OutputsChanged => {
                let changes = self.outputs.refresh(&mut self.ws)?;
                if !changes.is_empty() {
                    self.redraw()?;
                }
                Ok(None)
            }
        }
    }

    /// Relayout monitors whose resolved blocks changed, then present
    fn redraw(&mut self) -> Result<(), BarError> {
        self.relayout();
        self.present()
    }

    fn relayout(&mut self) {
        let count = self.outputs.len();
        for (index, monitor) in self.outputs.monitors_mut().iter_mut().enumerate() {
            let Some(surface) = monitor.surface.as_mut() else {
                continue;
            };
            let blocks = self.state.blocks_for(index, count);
            if surface.blocks.as_ref() == Some(&blocks) {
                continue;
            }

            surface.layout = Layout::compute(
                &blocks,
                &self.resolver,
                surface.geometry.width,
                surface.geometry.height,
            );
            self.compositor.render(&mut surface.canvas, &surface.layout);
            surface.blocks = Some(blocks);
        }
    }

    fn present(&mut self) -> Result<(), BarError> {
        for monitor in self.outputs.monitors_mut() {
            let Some(surface) = monitor.surface.as_mut() else {
                continue;
            };
            let Some(frame) = surface.canvas.take_dirty() else {
                continue;
            };
            match self.ws.present(surface.id, &frame) {
                Ok(()) => {}
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => warn!(output = %monitor.info.id, error = %e, "failed to present frame"),
            }
        }
        self.ws.flush()?;
        Ok(())
    }
}

/// One input line without its terminator. Invalid UTF-8 is replaced rather
/// than ending the input.
fn decode_line(buf: &[u8]) -> String {
    let bytes = buf.strip_suffix(b"\n").unwrap_or(buf);
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    match String::from_utf8_lossy(bytes) {
        Cow::Borrowed(line) => line.to_string(),
        Cow::Owned(line) => {
            warn!("input line is not valid UTF-8, replacing invalid bytes");
            line
        }
    }
}

async fn write_click<C: AsyncWrite + Unpin>(clicks: &mut C, action: &str) -> Result<(), BarError> {
    let mut line = String::with_capacity(action.len() + 1);
    line.push_str(action);
    line.push('\n');
    clicks.write_all(line.as_bytes()).await.map_err(BarError::ClickOutput)?;
    clicks.flush().await.map_err(BarError::ClickOutput)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::font::testing::ascii_resolver;
    use crate::markup::SegmentContent;
    use crate::platform::headless::{HeadlessWindowSystem, output};

    fn bar(outputs: Vec<crate::platform::OutputInfo>) -> Bar<HeadlessWindowSystem> {
        Bar::new(
            HeadlessWindowSystem::with_outputs(outputs),
            ascii_resolver(),
            &BarConfig::default(),
        )
    }

    fn start(bar: &mut Bar<HeadlessWindowSystem>) {
        bar.outputs.refresh(&mut bar.ws).unwrap();
        bar.redraw().unwrap();
    }

    fn surface_of(bar: &Bar<HeadlessWindowSystem>, index: usize) -> u32 {
        bar.outputs().monitors()[index].surface.as_ref().unwrap().id
    }

    #[test]
    fn test_height_from_font_metrics() {
        let mut bar = bar(vec![output("A", 0, 0, 800, 600)]);
        start(&mut bar);
        let id = surface_of(&bar, 0);
        assert_eq!(bar.window_system().surfaces[&id].geometry.height, 16);
    }

    #[test]
    fn test_explicit_height_wins() {
        let config = BarConfig {
            height: Some(30),
            ..BarConfig::default()
        };
        let mut bar = Bar::new(
            HeadlessWindowSystem::with_outputs(vec![output("A", 0, 0, 800, 600)]),
            ascii_resolver(),
            &config,
        );
        start(&mut bar);
        let id = surface_of(&bar, 0);
        assert_eq!(bar.window_system().surfaces[&id].geometry.height, 30);
    }

    #[test]
    fn test_line_updates_state_and_presents() {
        let mut bar = bar(vec![output("A", 0, 0, 800, 600)]);
        start(&mut bar);
        let id = surface_of(&bar, 0);
        assert_eq!(bar.window_system().frames_for(id).len(), 1);

        bar.handle_line("%{F#ff0000}Hello%{F-} World").unwrap();
        let layout = &bar.outputs().monitors()[0].surface.as_ref().unwrap().layout;
        assert_eq!(layout.segments.len(), 2);
        assert_eq!(layout.used_width(), 88);

        let frames = bar.window_system().frames_for(id);
        assert_eq!(frames.len(), 2);
        assert!(frames[1].x + frames[1].width <= 88);
    }

    #[test]
    fn test_identical_line_presents_nothing() {
        let mut bar = bar(vec![output("A", 0, 0, 800, 600)]);
        start(&mut bar);
        bar.handle_line("same").unwrap();
        let presented = bar.window_system().presented.len();
        bar.handle_line("same").unwrap();
        assert_eq!(bar.window_system().presented.len(), presented);
    }

    #[test]
    fn test_only_targeted_monitor_is_redrawn() {
        let mut bar = bar(vec![output("A", 0, 0, 800, 600), output("B", 800, 0, 800, 600)]);
        start(&mut bar);
        let (a, b) = (surface_of(&bar, 0), surface_of(&bar, 1));

        bar.handle_line("%{S1}only on B").unwrap();
        assert_eq!(bar.window_system().frames_for(a).len(), 1);
        assert_eq!(bar.window_system().frames_for(b).len(), 2);
    }

    #[test]
    fn test_click_maps_to_innermost_action() {
        let mut bar = bar(vec![output("A", 0, 0, 800, 600)]);
        start(&mut bar);
        let id = surface_of(&bar, 0);
        bar.handle_line("%{A:outer:}ab%{A:inner:}cd%{A}%{A}").unwrap();

        let press = |x| PlatformEvent::ButtonPress {
            surface: id,
            x,
            y: 4,
            button: 1,
        };
        assert_eq!(bar.handle_event(press(3)).unwrap().as_deref(), Some("outer"));
        assert_eq!(bar.handle_event(press(20)).unwrap().as_deref(), Some("inner"));
        assert_eq!(bar.handle_event(press(200)).unwrap(), None);

        let other_button = PlatformEvent::ButtonPress {
            surface: id,
            x: 3,
            y: 4,
            button: 3,
        };
        assert_eq!(bar.handle_event(other_button).unwrap(), None);
    }

    #[test]
    fn test_clicks_use_latest_layout() {
        let mut bar = bar(vec![output("A", 0, 0, 800, 600)]);
        start(&mut bar);
        let id = surface_of(&bar, 0);
        bar.handle_line("%{A:old:}xx%{A}").unwrap();
        bar.handle_line("xx").unwrap();
        let press = PlatformEvent::ButtonPress {
            surface: id,
            x: 3,
            y: 4,
            button: 1,
        };
        assert_eq!(bar.handle_event(press).unwrap(), None);
    }

    #[test]
    fn test_expose_forces_full_blit() {
        let mut bar = bar(vec![output("A", 0, 0, 800, 600)]);
        start(&mut bar);
        let id = surface_of(&bar, 0);
        bar.handle_event(PlatformEvent::Expose { surface: id }).unwrap();

        let frames = bar.window_system().frames_for(id);
        assert_eq!(frames.len(), 2);
        assert_eq!((frames[1].x, frames[1].width), (0, 800));
    }

    #[test]
    fn test_hotplug_lays_out_new_monitor_from_last_state() {
        let mut bar = bar(vec![output("A", 0, 0, 800, 600)]);
        start(&mut bar);
        bar.handle_line("%{r}clock").unwrap();

        bar.ws.outputs.push(output("B", 800, 0, 1024, 768));
        bar.handle_event(PlatformEvent::OutputsChanged).unwrap();

        let monitor = &bar.outputs().monitors()[1];
        let surface = monitor.surface.as_ref().unwrap();
        assert_eq!(surface.layout.segments.len(), 1);
        assert_eq!(surface.layout.segments[0].x, 1024 - 40);
        assert_eq!(bar.window_system().frames_for(surface.id).len(), 1);
    }

    #[test]
    fn test_json_input() {
        let config = BarConfig {
            input_format: InputFormat::Json,
            ..BarConfig::default()
        };
        let mut bar = Bar::new(
            HeadlessWindowSystem::with_outputs(vec![output("A", 0, 0, 800, 600)]),
            ascii_resolver(),
            &config,
        );
        start(&mut bar);

        bar.handle_line(r#"{"center":[{"content":{"text":"hi"}}]}"#).unwrap();
        assert_eq!(
            bar.state().broadcast.center[0].content,
            SegmentContent::Text("hi".into())
        );

        // Malformed lines keep the previous state
        bar.handle_line("%{F#f00}not json").unwrap();
        assert_eq!(bar.state().broadcast.center.len(), 1);
    }

    #[tokio::test]
    async fn test_run_until_eof_releases_surfaces() {
        let mut bar = bar(vec![output("A", 0, 0, 800, 600), output("B", 800, 0, 800, 600)]);
        let input: &[u8] = b"first\n%{c}second\n";
        let mut clicks = Vec::new();

        bar.run(input, &mut clicks, std::future::pending()).await.unwrap();

        let ws = bar.window_system();
        assert_eq!(ws.created.len(), 2);
        assert!(ws.surfaces.is_empty());
        assert_eq!(ws.destroyed.len(), 2);
        assert!(matches!(&bar.state().broadcast.center[0].content, SegmentContent::Text(t) if t == "second"));
        assert!(clicks.is_empty());
    }

    #[tokio::test]
    async fn test_run_writes_clicks() {
        let mut bar = bar(vec![output("A", 0, 0, 800, 600)]);
        start(&mut bar);
        bar.handle_line("%{A:echo clicked:}button%{A}").unwrap();
        let id = surface_of(&bar, 0);
        bar.ws.events.push_back(PlatformEvent::ButtonPress {
            surface: id,
            x: 10,
            y: 3,
            button: 1,
        });

        // No further input: the initial drain handles the queued click
        let mut clicks = Vec::new();
        let input: &[u8] = b"";
        bar.run(input, &mut clicks, std::future::pending()).await.unwrap();

        assert_eq!(String::from_utf8(clicks).unwrap(), "echo clicked\n");
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_does_not_end_input() {
        let mut bar = bar(vec![output("A", 0, 0, 800, 600)]);
        let input: &[u8] = b"first\n\xff\xfe bad\nafter\n";

        bar.run(input, tokio::io::sink(), std::future::pending()).await.unwrap();
        assert!(matches!(&bar.state().broadcast.left[0].content, SegmentContent::Text(t) if t == "after"));
    }

    #[test]
    fn test_decode_line() {
        assert_eq!(decode_line(b"plain\n"), "plain");
        assert_eq!(decode_line(b"crlf\r\n"), "crlf");
        assert_eq!(decode_line(b"last"), "last");
        assert_eq!(decode_line(b"a\xffb\n"), "a\u{fffd}b");
    }

    #[tokio::test]
    async fn test_events_queued_during_output_refresh_are_handled() {
        let mut bar = bar(vec![output("A", 0, 0, 800, 600)]);
        start(&mut bar);
        bar.handle_line("%{A:menu:}menu%{A}").unwrap();
        let id = surface_of(&bar, 0);

        bar.ws.events.push_back(PlatformEvent::OutputsChanged);
        bar.ws.events_on_enumerate.push_back(PlatformEvent::ButtonPress {
            surface: id,
            x: 2,
            y: 2,
            button: 1,
        });

        let mut clicks = Vec::new();
        bar.drain_events(&mut clicks).await.unwrap();
        assert_eq!(String::from_utf8(clicks).unwrap(), "menu\n");
        assert!(bar.ws.events.is_empty());
    }

    #[test]
    fn test_reconnected_output_gets_fresh_surface() {
        let mut bar = bar(vec![output("A", 0, 0, 800, 600), output("B", 800, 0, 800, 600)]);
        start(&mut bar);
        bar.handle_line("%{S1}%{A:on-b:}bb%{A}").unwrap();
        let old_b = surface_of(&bar, 1);
        let press = |surface| PlatformEvent::ButtonPress {
            surface,
            x: 3,
            y: 4,
            button: 1,
        };
        assert_eq!(bar.handle_event(press(old_b)).unwrap().as_deref(), Some("on-b"));

        bar.ws.outputs.truncate(1);
        bar.handle_event(PlatformEvent::OutputsChanged).unwrap();
        assert_eq!(bar.outputs().len(), 1);
        assert!(bar.window_system().destroyed.contains(&old_b));
        assert_eq!(bar.handle_event(press(old_b)).unwrap(), None);
        let a = surface_of(&bar, 0);
        assert_eq!(bar.handle_event(press(a)).unwrap(), None);

        bar.ws.outputs.push(output("B", 800, 0, 800, 600));
        bar.handle_event(PlatformEvent::OutputsChanged).unwrap();
        let new_b = surface_of(&bar, 1);
        assert_ne!(new_b, old_b);

        let layout = &bar.outputs().monitors()[1].surface.as_ref().unwrap().layout;
        assert_eq!(layout.segments.len(), 1);
        assert_eq!(bar.window_system().frames_for(new_b).len(), 1);
        assert_eq!(bar.handle_event(press(new_b)).unwrap().as_deref(), Some("on-b"));
        assert_eq!(bar.handle_event(press(old_b)).unwrap(), None);
    }

    #[tokio::test]
    async fn test_shutdown_stops_loop() {
        let mut bar = bar(vec![output("A", 0, 0, 800, 600)]);
        let (_tx, rx) = tokio::io::duplex(64);
        let input = tokio::io::BufReader::new(rx);

        bar.run(input, tokio::io::sink(), std::future::ready(())).await.unwrap();
        assert!(bar.window_system().surfaces.is_empty());
    }

    #[tokio::test]
    async fn test_connection_loss_is_fatal() {
        let mut bar = bar(vec![output("A", 0, 0, 800, 600)]);
        bar.ws.lose_connection = true;
        let input: &[u8] = b"never read\n";

        let result = bar.run(input, tokio::io::sink(), std::future::pending()).await;
        assert!(matches!(result, Err(BarError::Platform(PlatformError::ConnectionLost(_)))));
        assert!(bar.window_system().surfaces.is_empty());
    }
}
