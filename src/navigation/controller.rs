// ============================================================================
// CONTROLLER.RS - View State Machine
// ============================================================================
//
// Owns the visible time window, the y-ranges of every named axis, the
// marker and the selection. Every change is checked against the extent of
// the loaded signal; a request that would leave it is dropped with a
// warning and the view stays where it was.
//
// Pixel coordinates have their origin at the top-left of the plot area.
// ============================================================================

use std::time::Instant;

use crate::error::{SessionError, SessionResult};
use crate::input::{MouseButton, PointerEvent};
use crate::render::{AxisData, Overlay, Renderer};
use crate::settings::Settings;
use crate::throttle::UpdateThrottle;

use super::bounds::{Extent, PixelRect, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Idle,
    Pan,
    Zoom,
    Select,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoomDirection {
    In,
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NavConfig {
    pub scroll_fraction: f64,
    /// Drags shorter than this on both axes count as clicks
    pub click_threshold_px: f64,
    pub marker_refresh_ms: u64,
}

impl Default for NavConfig {
    fn default() -> Self {
        Self {
            scroll_fraction: 0.25,
            click_threshold_px: 5.0,
            marker_refresh_ms: 50,
        }
    }
}

impl NavConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            scroll_fraction: settings.scroll_fraction,
            click_threshold_px: settings.click_threshold_px,
            marker_refresh_ms: settings.marker_refresh_ms,
        }
    }
}

#[derive(Debug, Clone)]
struct Axis {
    name: String,
    range: Span,
}

/// An in-progress pointer drag and the view it started from.
#[derive(Debug, Clone, Copy)]
struct Drag {
    press: PointerEvent,
    window: Span,
    primary: Option<Span>,
}

pub struct NavigationController {
    renderer: Box<dyn Renderer>,
    config: NavConfig,
    axes: Vec<Axis>,
    extent: Option<Extent>,
    window: Span,
    mode: Mode,
    marker: Option<f64>,
    selection: Option<Span>,
    drag: Option<Drag>,
    rubber_band: Option<PixelRect>,
    viewport: (f64, f64),
    marker_throttle: UpdateThrottle,
    // A throttled marker move still waiting for its redraw
    marker_pending: bool,
}

impl NavigationController {
    pub fn new(renderer: Box<dyn Renderer>, config: NavConfig) -> Self {
        Self {
            renderer,
            marker_throttle: UpdateThrottle::new(config.marker_refresh_ms),
            config,
            axes: Vec::new(),
            extent: None,
            window: Span::new(0.0, 1.0),
            mode: Mode::Idle,
            marker: None,
            selection: None,
            drag: None,
            rubber_band: None,
            viewport: (1000.0, 400.0),
            marker_pending: false,
        }
    }

    // ─── Accessors ───────────────────────────────────────────────────────────

    pub fn window(&self) -> Span {
        self.window
    }

    pub fn extent(&self) -> Option<Extent> {
        self.extent
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn marker(&self) -> Option<f64> {
        self.marker
    }

    pub fn selection(&self) -> Option<Span> {
        self.selection
    }

    pub fn rubber_band(&self) -> Option<PixelRect> {
        self.rubber_band
    }

    pub fn axis_names(&self) -> Vec<&str> {
        self.axes.iter().map(|a| a.name.as_str()).collect()
    }

    pub fn primary_axis(&self) -> Option<&str> {
        self.axes.first().map(|a| a.name.as_str())
    }

    pub fn y_range(&self, axis: &str) -> Option<Span> {
        self.axes.iter().find(|a| a.name == axis).map(|a| a.range)
    }

    // ─── Axes & Extent ───────────────────────────────────────────────────────

    /// Register a named y-axis. The first one registered is the primary axis.
    pub fn add_axis(&mut self, name: &str, init_y: Span) {
        if let Some(index) = self.axes.iter().position(|a| a.name == name) {
            log::debug!("Axis '{}' already registered, resetting its range", name);
            self.axes[index].range = init_y;
        } else {
            self.axes.push(Axis { name: name.to_string(), range: init_y });
        }
        self.renderer.set_y_range(name, init_y);
    }

    /// Bind the view to a new dataset: full extent on x, value range on the
    /// primary axis, marker at the start, no selection.
    pub fn set_extent(&mut self, extent: Extent) -> SessionResult<()> {
        if !extent.time.is_well_formed() {
            return Err(self.reject(format!("extent time range {} is empty", extent.time)));
        }
        self.extent = Some(extent);
        self.window = extent.time;
        self.marker = Some(extent.time.lo);
        self.selection = None;
        self.drag = None;
        self.rubber_band = None;
        self.renderer.set_x_range(self.window);
        if let Some(primary) = self.axes.first_mut() {
            primary.range = extent.value;
            self.renderer.set_y_range(&primary.name, extent.value);
        }
        log::info!("View bound to extent t={} v={}", extent.time, extent.value);
        self.redraw();
        Ok(())
    }

    /// Forget the dataset. Navigation is rejected until the next `set_extent`.
    pub fn clear_extent(&mut self) {
        self.extent = None;
        self.marker = None;
        self.selection = None;
        self.drag = None;
        self.rubber_band = None;
        log::info!("View unbound, nothing loaded");
        self.redraw();
    }

    /// Pixel size of the plot area, used to map gestures to data coordinates.
    pub fn set_viewport(&mut self, width: f64, height: f64) {
        if width > 0.0 && height > 0.0 {
            self.viewport = (width, height);
        }
    }

    /// Data coordinates (time, primary value) under a pixel position.
    pub fn locate(&self, x: f64, y: f64) -> (f64, f64) {
        let (vw, vh) = self.viewport;
        let t = self.window.lerp(x / vw);
        let v = match self.axes.first() {
            Some(primary) => primary.range.hi - primary.range.width() * (y / vh),
            None => 0.0,
        };
        (t, v)
    }

    /// Build a pointer event for a pixel position in the current view.
    pub fn pointer(&self, x: f64, y: f64, button: MouseButton) -> PointerEvent {
        let (t, v) = self.locate(x, y);
        PointerEvent { x, y, t, v, button }
    }

    // ─── Window & Ranges ─────────────────────────────────────────────────────

    /// Show `window` on every axis. Rejected when it is malformed or leaves
    /// the extent; the view is then unchanged.
    pub fn set_domain(&mut self, window: Span) -> SessionResult<()> {
        self.check_window(window)?;
        self.apply_window(window);
        self.redraw();
        Ok(())
    }

    pub fn set_range(&mut self, axis: &str, range: Span) -> SessionResult<()> {
        if !range.is_well_formed() {
            return Err(self.reject(format!("y-range {} for '{}' is empty", range, axis)));
        }
        let Some(index) = self.axes.iter().position(|a| a.name == axis) else {
            return Err(self.reject(format!("no axis named '{}'", axis)));
        };
        self.axes[index].range = range;
        self.renderer.set_y_range(axis, range);
        self.redraw();
        Ok(())
    }

    pub fn set_all_ranges(&mut self, range: Span) -> SessionResult<()> {
        if !range.is_well_formed() {
            return Err(self.reject(format!("y-range {} is empty", range)));
        }
        for axis in &mut self.axes {
            axis.range = range;
            self.renderer.set_y_range(&axis.name, range);
        }
        self.redraw();
        Ok(())
    }

    pub fn scroll_forward(&mut self) -> SessionResult<()> {
        let extent = self.require_extent("scroll forward")?;
        let width = self.window.width();
        let step = width * self.config.scroll_fraction;
        let mut next = self.window.shifted(step);
        if next.hi > extent.time.hi {
            next = Span::new((extent.time.hi - width).max(extent.time.lo), extent.time.hi);
        }
        self.move_view(next);
        Ok(())
    }

    pub fn scroll_backward(&mut self) -> SessionResult<()> {
        let extent = self.require_extent("scroll backward")?;
        let width = self.window.width();
        let step = width * self.config.scroll_fraction;
        let mut next = self.window.shifted(-step);
        if next.lo < extent.time.lo {
            next = Span::new(extent.time.lo, (extent.time.lo + width).min(extent.time.hi));
        }
        self.move_view(next);
        Ok(())
    }

    /// Full extent on x; the primary axis returns to the value range, the
    /// others keep theirs.
    pub fn home(&mut self) -> SessionResult<()> {
        let extent = self.require_extent("home")?;
        self.apply_window(extent.time);
        if let Some(primary) = self.axes.first_mut() {
            primary.range = extent.value;
            self.renderer.set_y_range(&primary.name, extent.value);
        }
        self.redraw();
        Ok(())
    }

    // ─── Modes & Gestures ────────────────────────────────────────────────────

    /// Enter `mode`, or return to `Idle` if it is already active.
    pub fn set_mode(&mut self, mode: Mode) -> Mode {
        self.mode = if self.mode == mode { Mode::Idle } else { mode };
        self.selection = None;
        self.drag = None;
        self.rubber_band = None;
        log::debug!("Navigation mode -> {:?}", self.mode);
        self.redraw();
        self.mode
    }

    pub fn press(&mut self, event: PointerEvent) {
        if self.mode == Mode::Idle {
            return;
        }
        if self.mode == Mode::Select && event.button == MouseButton::Left {
            self.selection = None;
        }
        self.drag = Some(Drag {
            press: event,
            window: self.window,
            primary: self.axes.first().map(|a| a.range),
        });
    }

    pub fn drag(&mut self, event: PointerEvent) {
        let Some(drag) = self.drag else { return };
        match self.mode {
            Mode::Pan => {
                // Live preview; out-of-bounds positions are skipped silently
                // and checked for real on release.
                let (window, primary) = self.pan_candidate(&drag, &event);
                if self.check_window(window).is_ok() {
                    self.apply_window(window);
                    self.apply_primary(primary);
                    self.redraw();
                }
            }
            Mode::Zoom | Mode::Select => {
                self.rubber_band = Some(PixelRect::from_corners(
                    drag.press.x,
                    drag.press.y,
                    event.x,
                    event.y,
                ));
                self.redraw();
            }
            Mode::Idle => {}
        }
    }

    pub fn release(&mut self, event: PointerEvent) -> SessionResult<()> {
        let Some(drag) = self.drag.take() else { return Ok(()) };
        self.rubber_band = None;
        match self.mode {
            Mode::Pan => self.finish_pan(&drag, &event),
            Mode::Zoom => {
                let rect = PixelRect::from_corners(drag.press.x, drag.press.y, event.x, event.y);
                let direction = match drag.press.button {
                    MouseButton::Right => ZoomDirection::Out,
                    _ => ZoomDirection::In,
                };
                self.zoom(rect, direction)
            }
            Mode::Select => {
                if event.button == MouseButton::Right {
                    self.place_marker(event.t);
                    self.redraw();
                    Ok(())
                } else {
                    self.select(drag.press, event)
                }
            }
            Mode::Idle => Ok(()),
        }
    }

    /// Shift the view by a pixel delta, as a pan drag of that length would.
    pub fn pan(&mut self, dx: f64, dy: f64) -> SessionResult<()> {
        let press = self.pointer(0.0, 0.0, MouseButton::Left);
        let drag = Drag {
            press,
            window: self.window,
            primary: self.axes.first().map(|a| a.range),
        };
        let release = PointerEvent { x: dx, y: dy, ..press };
        self.finish_pan(&drag, &release)
    }

    fn finish_pan(&mut self, drag: &Drag, release: &PointerEvent) -> SessionResult<()> {
        let (window, primary) = self.pan_candidate(drag, release);
        if let Err(e) = self.check_window(window) {
            // Snap back to where the drag started
            self.apply_window(drag.window);
            self.apply_primary(drag.primary);
            self.redraw();
            return Err(e);
        }
        self.apply_primary(primary);
        self.move_view(window);
        Ok(())
    }

    fn pan_candidate(&self, drag: &Drag, event: &PointerEvent) -> (Span, Option<Span>) {
        let (vw, vh) = self.viewport;
        let dx = event.x - drag.press.x;
        let dy = event.y - drag.press.y;
        let window = drag.window.shifted(-dx * drag.window.width() / vw);
        let primary = drag.primary.map(|r| r.shifted(dy * r.width() / vh));
        (window, primary)
    }

    /// Zoom to (or out from) a pixel rectangle. Rectangles thinner than the
    /// click threshold on either axis are ignored.
    pub fn zoom(&mut self, rect: PixelRect, direction: ZoomDirection) -> SessionResult<()> {
        let threshold = self.config.click_threshold_px;
        if rect.width() < threshold || rect.height() < threshold {
            log::debug!("Zoom rectangle too small, ignored");
            return Ok(());
        }
        let extent = self.require_extent("zoom")?;
        let vh = self.viewport.1;
        let (t0, _) = self.locate(rect.x0, 0.0);
        let (t1, _) = self.locate(rect.x1, 0.0);
        let window = match direction {
            ZoomDirection::In => Span::new(t0, t1),
            ZoomDirection::Out => zoom_out(self.window, t0, t1),
        };
        let window = if self.check_window(window).is_ok() {
            window
        } else {
            let clamped = window.clamp_to(&extent.time);
            if !clamped.is_well_formed() {
                return Err(self.reject(format!("zoom to {} collapses the view", window)));
            }
            clamped
        };

        if let Some(primary) = self.axes.first().map(|a| a.range) {
            // Pixel y grows downward, values grow upward
            let v_top = primary.hi - primary.width() * (rect.y0 / vh);
            let v_bottom = primary.hi - primary.width() * (rect.y1 / vh);
            let range = match direction {
                ZoomDirection::In => Span::new(v_bottom, v_top),
                ZoomDirection::Out => zoom_out(primary, v_bottom, v_top),
            };
            if range.is_well_formed() {
                self.apply_primary(Some(range));
            }
        }
        self.move_view(window);
        Ok(())
    }

    /// Turn a select drag into a selection, or into a marker placement when
    /// the pointer barely moved.
    pub fn select(&mut self, press: PointerEvent, release: PointerEvent) -> SessionResult<()> {
        if self.mode != Mode::Select {
            log::warn!("Select gesture outside select mode ignored");
            return Ok(());
        }
        let threshold = self.config.click_threshold_px;
        let dx = (release.x - press.x).abs();
        let dy = (release.y - press.y).abs();
        if dx < threshold && dy < threshold {
            self.selection = None;
            self.place_marker(press.t);
        } else {
            let mut span = Span::ordered(press.t, release.t);
            if let Some(extent) = self.extent {
                span = Span::new(extent.time.clamp(span.lo), extent.time.clamp(span.hi));
            }
            self.selection = Some(span);
            self.place_marker(span.lo);
            log::debug!("Selection {}", span);
        }
        self.redraw();
        Ok(())
    }

    pub fn clear_selection(&mut self) {
        if self.selection.take().is_some() {
            self.redraw();
        }
    }

    // ─── Marker ──────────────────────────────────────────────────────────────

    /// Move the marker. The value is stored at once; the redraw only happens
    /// when the refresh interval allows. Returns whether it redrew.
    pub fn set_marker(&mut self, time: f64) -> bool {
        self.set_marker_at(time, Instant::now())
    }

    pub fn set_marker_at(&mut self, time: f64, now: Instant) -> bool {
        self.place_marker(time);
        if self.marker_throttle.should_update_at(now) {
            self.redraw();
            true
        } else {
            self.marker_pending = true;
            false
        }
    }

    /// Draw a marker move the throttle held back, once the interval allows.
    /// Called on every tick.
    pub fn flush_marker(&mut self, now: Instant) -> bool {
        if self.marker_pending && self.marker_throttle.should_update_at(now) {
            self.redraw();
            true
        } else {
            false
        }
    }

    fn place_marker(&mut self, time: f64) {
        let time = match self.extent {
            Some(extent) => extent.time.clamp(time),
            None => time,
        };
        self.marker = Some(time);
    }

    // ─── Rendering ───────────────────────────────────────────────────────────

    pub fn draw_axis(&mut self, name: &str, data: &AxisData) {
        if self.y_range(name).is_none() {
            log::warn!("Drawing on unregistered axis '{}'", name);
        }
        self.renderer.draw_axis(name, data);
    }

    pub fn redraw(&mut self) {
        self.marker_pending = false;
        let overlay = Overlay {
            marker: self.marker,
            selection: self.selection,
            rubber_band: self.rubber_band,
        };
        self.renderer.show_overlay(&overlay);
        self.renderer.redraw();
    }

    // ─── Internals ───────────────────────────────────────────────────────────

    fn check_window(&self, window: Span) -> SessionResult<()> {
        if !window.is_well_formed() {
            return Err(self.reject(format!("window {} is empty or inverted", window)));
        }
        if let Some(extent) = self.extent
            && !extent.time.contains_span(&window)
        {
            return Err(self.reject(format!(
                "window {} leaves the loaded range {}",
                window, extent.time
            )));
        }
        Ok(())
    }

    fn require_extent(&self, action: &str) -> SessionResult<Extent> {
        self.extent
            .ok_or_else(|| self.reject(format!("{} with nothing loaded", action)))
    }

    fn reject(&self, reason: String) -> SessionError {
        log::debug!("Navigation rejected: {}", reason);
        SessionError::OutOfBoundsNavigation(reason)
    }

    fn apply_window(&mut self, window: Span) {
        self.window = window;
        self.renderer.set_x_range(window);
    }

    fn apply_primary(&mut self, range: Option<Span>) {
        let (Some(range), Some(primary)) = (range, self.axes.first_mut()) else { return };
        primary.range = range;
        self.renderer.set_y_range(&primary.name, range);
    }

    /// A navigation that moves the view origin; drops the selection.
    fn move_view(&mut self, window: Span) {
        self.apply_window(window);
        self.selection = None;
        log::debug!("View -> {}", window);
        self.redraw();
    }
}

/// Expand `current` so that its old contents fit into `lo..hi`.
fn zoom_out(current: Span, lo: f64, hi: f64) -> Span {
    let inner = hi - lo;
    if inner <= 0.0 {
        return current;
    }
    let scale = current.width() / inner;
    Span::new(
        current.lo - (lo - current.lo) * scale,
        current.hi + (current.hi - hi) * scale,
    )
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::testing::{RecordingRenderer, RenderCall};
    use std::time::Duration;

    fn controller() -> (NavigationController, RecordingRenderer) {
        let recorder = RecordingRenderer::default();
        let mut nav = NavigationController::new(Box::new(recorder.clone()), NavConfig::default());
        nav.set_viewport(1000.0, 400.0);
        nav.add_axis("spectrogram", Span::new(0.0, 8000.0));
        nav.add_axis("classification", Span::new(-1.0, 10.0));
        (nav, recorder)
    }

    fn loaded() -> (NavigationController, RecordingRenderer) {
        let (mut nav, recorder) = controller();
        nav.set_extent(Extent::new(0.0, 10.0, 0.0, 8000.0)).unwrap();
        recorder.clear();
        (nav, recorder)
    }

    fn at(x: f64, y: f64, t: f64) -> PointerEvent {
        PointerEvent::new(x, y, t, MouseButton::Left)
    }

    #[test]
    fn set_domain_outside_extent_is_rejected() {
        let (mut nav, recorder) = loaded();
        nav.set_domain(Span::new(2.0, 4.0)).unwrap();
        let before = nav.window();
        recorder.clear();

        assert!(nav.set_domain(Span::new(8.0, 12.0)).is_err());
        assert!(nav.set_domain(Span::new(-1.0, 3.0)).is_err());
        assert!(nav.set_domain(Span::new(5.0, 4.0)).is_err());
        assert_eq!(nav.window(), before);
        assert_eq!(recorder.redraws(), 0);
    }

    #[test]
    fn set_domain_applies_once() {
        let (mut nav, recorder) = loaded();
        nav.set_domain(Span::new(1.0, 3.0)).unwrap();
        assert_eq!(nav.window(), Span::new(1.0, 3.0));
        assert_eq!(recorder.redraws(), 1);
        assert!(recorder.calls.borrow().contains(&RenderCall::XRange(Span::new(1.0, 3.0))));
    }

    #[test]
    fn scroll_forward_converges_to_end() {
        let (mut nav, _) = loaded();
        nav.set_domain(Span::new(0.0, 3.0)).unwrap();
        for _ in 0..50 {
            nav.scroll_forward().unwrap();
            assert!(nav.window().hi <= 10.0);
            assert!((nav.window().width() - 3.0).abs() < 1e-9);
        }
        assert_eq!(nav.window().hi, 10.0);
        assert_eq!(nav.window().lo, 7.0);
    }

    #[test]
    fn scroll_backward_lands_on_start() {
        let (mut nav, _) = loaded();
        nav.set_domain(Span::new(1.0, 5.0)).unwrap();
        nav.scroll_backward().unwrap();
        assert_eq!(nav.window(), Span::new(0.0, 4.0));
        nav.scroll_backward().unwrap();
        assert_eq!(nav.window(), Span::new(0.0, 4.0));
    }

    #[test]
    fn scroll_step_is_quarter_width() {
        let (mut nav, _) = loaded();
        nav.set_domain(Span::new(0.0, 4.0)).unwrap();
        nav.scroll_forward().unwrap();
        assert_eq!(nav.window(), Span::new(1.0, 5.0));
    }

    #[test]
    fn scroll_without_data_is_rejected() {
        let (mut nav, _) = controller();
        assert!(matches!(
            nav.scroll_forward(),
            Err(SessionError::OutOfBoundsNavigation(_))
        ));
    }

    #[test]
    fn home_resets_primary_only() {
        let (mut nav, _) = loaded();
        nav.set_domain(Span::new(2.0, 3.0)).unwrap();
        nav.set_range("spectrogram", Span::new(100.0, 200.0)).unwrap();
        nav.set_range("classification", Span::new(0.0, 3.0)).unwrap();

        nav.home().unwrap();
        assert_eq!(nav.window(), Span::new(0.0, 10.0));
        assert_eq!(nav.y_range("spectrogram"), Some(Span::new(0.0, 8000.0)));
        assert_eq!(nav.y_range("classification"), Some(Span::new(0.0, 3.0)));
    }

    #[test]
    fn set_range_unknown_axis_is_noop() {
        let (mut nav, recorder) = loaded();
        assert!(nav.set_range("nope", Span::new(0.0, 1.0)).is_err());
        assert!(recorder.calls.borrow().is_empty());
    }

    #[test]
    fn set_all_ranges_moves_every_axis() {
        let (mut nav, _) = loaded();
        nav.set_all_ranges(Span::new(-5.0, 5.0)).unwrap();
        assert_eq!(nav.y_range("spectrogram"), Some(Span::new(-5.0, 5.0)));
        assert_eq!(nav.y_range("classification"), Some(Span::new(-5.0, 5.0)));
    }

    #[test]
    fn first_axis_is_primary() {
        let (nav, _) = controller();
        assert_eq!(nav.primary_axis(), Some("spectrogram"));
        assert_eq!(nav.axis_names(), vec!["spectrogram", "classification"]);
    }

    #[test]
    fn mode_toggle_clears_selection() {
        let (mut nav, _) = loaded();
        assert_eq!(nav.set_mode(Mode::Select), Mode::Select);
        nav.select(at(10.0, 10.0, 2.0), at(120.0, 10.0, 7.5)).unwrap();
        assert!(nav.selection().is_some());

        assert_eq!(nav.set_mode(Mode::Select), Mode::Idle);
        assert_eq!(nav.selection(), None);
        assert_eq!(nav.set_mode(Mode::Zoom), Mode::Zoom);
        assert_eq!(nav.set_mode(Mode::Pan), Mode::Pan);
    }

    #[test]
    fn click_cancels_selection_and_sets_marker() {
        let (mut nav, _) = loaded();
        nav.set_mode(Mode::Select);
        nav.select(at(10.0, 10.0, 2.0), at(12.0, 11.0, 2.3)).unwrap();
        assert_eq!(nav.selection(), None);
        assert_eq!(nav.marker(), Some(2.0));
    }

    #[test]
    fn drag_selects_interval() {
        let (mut nav, _) = loaded();
        nav.set_mode(Mode::Select);
        nav.select(at(10.0, 10.0, 2.0), at(120.0, 10.0, 7.5)).unwrap();
        assert_eq!(nav.selection(), Some(Span::new(2.0, 7.5)));
        assert_eq!(nav.marker(), Some(2.0));
    }

    #[test]
    fn backward_drag_selection_is_ordered() {
        let (mut nav, _) = loaded();
        nav.set_mode(Mode::Select);
        nav.select(at(120.0, 10.0, 7.5), at(10.0, 10.0, 2.0)).unwrap();
        assert_eq!(nav.selection(), Some(Span::new(2.0, 7.5)));
        assert_eq!(nav.marker(), Some(2.0));
    }

    #[test]
    fn select_outside_select_mode_is_ignored() {
        let (mut nav, _) = loaded();
        nav.select(at(10.0, 10.0, 2.0), at(120.0, 10.0, 7.5)).unwrap();
        assert_eq!(nav.selection(), None);
    }

    #[test]
    fn gesture_selection_with_rubber_band() {
        let (mut nav, recorder) = loaded();
        nav.set_mode(Mode::Select);
        nav.press(nav.pointer(100.0, 50.0, MouseButton::Left));
        nav.drag(nav.pointer(300.0, 80.0, MouseButton::Left));
        assert_eq!(
            nav.rubber_band(),
            Some(PixelRect::from_corners(100.0, 50.0, 300.0, 80.0))
        );
        nav.release(nav.pointer(300.0, 80.0, MouseButton::Left)).unwrap();
        assert_eq!(nav.rubber_band(), None);
        let selection = nav.selection().unwrap();
        assert!((selection.lo - 1.0).abs() < 1e-9);
        assert!((selection.hi - 3.0).abs() < 1e-9);
        assert!(recorder.calls.borrow().iter().any(|c| matches!(
            c,
            RenderCall::Overlay(Overlay { rubber_band: Some(_), .. })
        )));
    }

    #[test]
    fn right_click_places_marker() {
        let (mut nav, _) = loaded();
        nav.set_mode(Mode::Select);
        nav.press(nav.pointer(500.0, 50.0, MouseButton::Right));
        nav.release(nav.pointer(500.0, 50.0, MouseButton::Right)).unwrap();
        assert!((nav.marker().unwrap() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn marker_is_clamped_and_throttled() {
        let (mut nav, recorder) = loaded();
        let start = Instant::now();
        assert!(nav.set_marker_at(12.0, start));
        assert_eq!(nav.marker(), Some(10.0));

        assert!(!nav.set_marker_at(3.0, start + Duration::from_millis(10)));
        assert_eq!(nav.marker(), Some(3.0));
        assert_eq!(recorder.redraws(), 1);

        assert!(nav.set_marker_at(4.0, start + Duration::from_millis(80)));
        assert_eq!(recorder.redraws(), 2);
    }

    #[test]
    fn held_back_marker_is_drawn_on_a_later_tick() {
        let (mut nav, recorder) = loaded();
        let start = Instant::now();
        assert!(nav.set_marker_at(1.0, start));
        assert!(!nav.set_marker_at(2.0, start + Duration::from_millis(10)));
        assert!(!nav.flush_marker(start + Duration::from_millis(20)));
        assert_eq!(recorder.redraws(), 1);

        assert!(nav.flush_marker(start + Duration::from_millis(70)));
        assert_eq!(recorder.redraws(), 2);
        let drawn_marker = recorder.calls.borrow().iter().rev().find_map(|c| match c {
            RenderCall::Overlay(o) => o.marker,
            _ => None,
        });
        assert_eq!(drawn_marker, Some(2.0));

        // Nothing pending any more
        assert!(!nav.flush_marker(start + Duration::from_millis(500)));
        assert_eq!(recorder.redraws(), 2);
    }

    #[test]
    fn clear_extent_rejects_navigation_until_rebound() {
        let (mut nav, _) = loaded();
        nav.set_marker(4.0);
        nav.clear_extent();
        assert_eq!(nav.extent(), None);
        assert_eq!(nav.marker(), None);
        assert!(nav.home().is_err());
        assert!(nav.scroll_forward().is_err());

        nav.set_extent(Extent::new(0.0, 3.0, 0.0, 100.0)).unwrap();
        assert_eq!(nav.window(), Span::new(0.0, 3.0));
    }

    #[test]
    fn pan_drag_shifts_window() {
        let (mut nav, _) = loaded();
        nav.set_domain(Span::new(2.0, 6.0)).unwrap();
        nav.set_mode(Mode::Pan);
        nav.press(nav.pointer(500.0, 200.0, MouseButton::Left));
        // 250 px of a 1000 px / 4 s view is one second to the left
        nav.release(PointerEvent::new(750.0, 200.0, 0.0, MouseButton::Left)).unwrap();
        assert_eq!(nav.window(), Span::new(1.0, 5.0));
    }

    #[test]
    fn invalid_pan_keeps_pre_drag_window() {
        let (mut nav, _) = loaded();
        nav.set_domain(Span::new(1.0, 5.0)).unwrap();
        nav.set_mode(Mode::Pan);
        nav.press(nav.pointer(0.0, 200.0, MouseButton::Left));
        nav.drag(PointerEvent::new(100.0, 200.0, 0.0, MouseButton::Left));
        assert!((nav.window().lo - 0.6).abs() < 1e-9);
        assert!((nav.window().hi - 4.6).abs() < 1e-9);
        let result = nav.release(PointerEvent::new(900.0, 200.0, 0.0, MouseButton::Left));
        assert!(result.is_err());
        assert_eq!(nav.window(), Span::new(1.0, 5.0));
    }

    #[test]
    fn pan_shifts_primary_axis() {
        let (mut nav, _) = loaded();
        nav.set_domain(Span::new(2.0, 6.0)).unwrap();
        nav.pan(0.0, 100.0).unwrap();
        assert_eq!(nav.y_range("spectrogram"), Some(Span::new(2000.0, 10000.0)));
        assert_eq!(nav.y_range("classification"), Some(Span::new(-1.0, 10.0)));
    }

    #[test]
    fn zoom_in_to_rectangle() {
        let (mut nav, _) = loaded();
        let rect = PixelRect::from_corners(200.0, 100.0, 400.0, 300.0);
        nav.zoom(rect, ZoomDirection::In).unwrap();
        assert!((nav.window().lo - 2.0).abs() < 1e-9);
        assert!((nav.window().hi - 4.0).abs() < 1e-9);
        let y = nav.y_range("spectrogram").unwrap();
        assert!((y.lo - 2000.0).abs() < 1e-9);
        assert!((y.hi - 6000.0).abs() < 1e-9);
    }

    #[test]
    fn small_zoom_rectangle_is_ignored() {
        let (mut nav, _) = loaded();
        let rect = PixelRect::from_corners(200.0, 100.0, 400.0, 103.0);
        nav.zoom(rect, ZoomDirection::In).unwrap();
        assert_eq!(nav.window(), Span::new(0.0, 10.0));
    }

    #[test]
    fn zoom_out_clamps_to_extent() {
        let (mut nav, _) = loaded();
        nav.set_domain(Span::new(4.0, 6.0)).unwrap();
        let rect = PixelRect::from_corners(250.0, 100.0, 750.0, 300.0);
        nav.zoom(rect, ZoomDirection::Out).unwrap();
        assert!((nav.window().lo - 3.0).abs() < 1e-9);
        assert!((nav.window().hi - 7.0).abs() < 1e-9);

        let rect = PixelRect::from_corners(450.0, 100.0, 550.0, 300.0);
        nav.zoom(rect, ZoomDirection::Out).unwrap();
        assert_eq!(nav.window(), Span::new(0.0, 10.0));
    }

    #[test]
    fn scroll_clears_selection() {
        let (mut nav, _) = loaded();
        nav.set_domain(Span::new(0.0, 4.0)).unwrap();
        nav.set_mode(Mode::Select);
        nav.select(at(10.0, 10.0, 1.0), at(120.0, 10.0, 2.0)).unwrap();
        nav.scroll_forward().unwrap();
        assert_eq!(nav.selection(), None);
    }

    #[test]
    fn set_extent_resets_view() {
        let (mut nav, _) = loaded();
        nav.set_domain(Span::new(2.0, 3.0)).unwrap();
        nav.set_extent(Extent::new(5.0, 25.0, 0.0, 4000.0)).unwrap();
        assert_eq!(nav.window(), Span::new(5.0, 25.0));
        assert_eq!(nav.marker(), Some(5.0));
        assert_eq!(nav.y_range("spectrogram"), Some(Span::new(0.0, 4000.0)));
    }
}
