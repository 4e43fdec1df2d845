// ============================================================================
// MAIN_GUI.RS - FLTK Front End
// ============================================================================
//
// Layout (top to bottom): toolbar, spectrogram (the primary axis, receives
// pointer input), the classification/power/entropy traces, console pane.
//
// The session lives inside the 16ms poll timeout. Widgets never touch it
// directly: buttons, keys and the mouse push InputEvents through a channel,
// and the session draws back through FltkRenderer into a shared PlotModel.
//
// Run with: cargo run --bin session-gui --features gui
// ============================================================================

use fltk::{
    app,
    button::Button,
    dialog,
    draw,
    enums::{Align, Color, ColorDepth, Event, Font, FrameType, LineStyle},
    frame::Frame,
    group::Flex,
    image::RgbImage,
    input::IntInput,
    prelude::*,
    text::{TextBuffer, TextDisplay},
    widget::Widget,
    window::Window,
};

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::mpsc::Sender;
use std::time::{Duration, Instant};

use songscope::analysis::BasicBackend;
use songscope::input::{ChannelInput, InputEvent, MouseButton, NavAction, PointerPhase};
use songscope::navigation::{PixelRect, Span};
use songscope::output::apply_overwrite;
use songscope::render::{AxisData, Overlay, Renderer};
use songscope::router::CommandArgs;
use songscope::session::{AXIS_CLASSIFICATION, AXIS_ENTROPY, AXIS_POWER, AXIS_SPECTROGRAM};
use songscope::{Session, Settings, logging};

// ─── Colors ────────────────────────────────────────────────────────────────────

const BG_DARK: u32 = 0x1e1e2e;
const BG_PANEL: u32 = 0x2a2a3a;
const BG_WIDGET: u32 = 0x363646;
const TEXT_PRIMARY: u32 = 0xcdd6f4;
const TEXT_DISABLED: u32 = 0x6c7086;
const ACCENT_BLUE: u32 = 0x89b4fa;
const ACCENT_GREEN: u32 = 0xa6e3a1;
const ACCENT_RED: u32 = 0xf38ba8;
const ACCENT_YELLOW: u32 = 0xf9e2af;
const SEPARATOR: u32 = 0x585b70;

fn color(hex: u32) -> Color {
    Color::from_hex(hex)
}

const TRACE_AXES: [&str; 3] = [AXIS_CLASSIFICATION, AXIS_POWER, AXIS_ENTROPY];
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

// ─── Plot Model ────────────────────────────────────────────────────────────────

/// Everything the draw callbacks need, written by FltkRenderer.
struct PlotModel {
    data: HashMap<String, AxisData>,
    y_ranges: HashMap<String, Span>,
    window: Option<Span>,
    overlay: Overlay,
    vmin: f32,
    vmax: f32,
}

impl PlotModel {
    fn new(vmin: f32, vmax: f32) -> Self {
        Self {
            data: HashMap::new(),
            y_ranges: HashMap::new(),
            window: None,
            overlay: Overlay::default(),
            vmin,
            vmax,
        }
    }

    /// Pixel column of time `t` inside a widget `w` pixels wide.
    fn time_to_px(&self, t: f64, w: i32) -> Option<i32> {
        let window = self.window?;
        if window.width() <= 0.0 {
            return None;
        }
        Some(((t - window.lo) / window.width() * w as f64).round() as i32)
    }
}

struct FltkRenderer {
    model: Rc<RefCell<PlotModel>>,
    widgets: Vec<Widget>,
}

impl Renderer for FltkRenderer {
    fn draw_axis(&mut self, name: &str, data: &AxisData) {
        self.model.borrow_mut().data.insert(name.to_string(), data.clone());
    }

    fn set_x_range(&mut self, window: Span) {
        self.model.borrow_mut().window = Some(window);
    }

    fn set_y_range(&mut self, axis: &str, range: Span) {
        self.model.borrow_mut().y_ranges.insert(axis.to_string(), range);
    }

    fn show_overlay(&mut self, overlay: &Overlay) {
        self.model.borrow_mut().overlay = overlay.clone();
    }

    fn redraw(&mut self) {
        for widget in &mut self.widgets {
            widget.redraw();
        }
    }
}

// ─── Drawing ───────────────────────────────────────────────────────────────────

/// Dark blue through orange to pale yellow.
fn heat_color(t: f32) -> (u8, u8, u8) {
    const STOPS: [(f32, (f32, f32, f32)); 3] = [
        (0.0, (20.0, 16.0, 48.0)),
        (0.6, (220.0, 90.0, 40.0)),
        (1.0, (250.0, 240.0, 170.0)),
    ];
    let t = t.clamp(0.0, 1.0);
    let (lo, hi) = if t <= STOPS[1].0 { (STOPS[0], STOPS[1]) } else { (STOPS[1], STOPS[2]) };
    let f = (t - lo.0) / (hi.0 - lo.0);
    let mix = |a: f32, b: f32| (a + (b - a) * f) as u8;
    (mix(lo.1.0, hi.1.0), mix(lo.1.1, hi.1.1), mix(lo.1.2, hi.1.2))
}

/// Rasterize the visible part of a heatmap into an RGB buffer.
fn rasterize_heatmap(model: &PlotModel, data: &AxisData, y_range: Span, w: usize, h: usize) -> Option<Vec<u8>> {
    let AxisData::Heatmap { time, value, columns, rows, cells } = data else {
        return None;
    };
    let window = model.window?;
    if *columns == 0 || *rows == 0 || time.width() <= 0.0 || value.width() <= 0.0 {
        return None;
    }
    let bg = color(BG_DARK).to_rgb();
    let span_db = (model.vmax - model.vmin).max(1e-3);
    let mut buffer = vec![0u8; w * h * 3];

    for px in 0..w {
        let t = window.lerp((px as f64 + 0.5) / w as f64);
        let col = ((t - time.lo) / time.width() * *columns as f64).floor();
        for py in 0..h {
            let idx = (py * w + px) * 3;
            let v = y_range.hi - (py as f64 + 0.5) / h as f64 * y_range.width();
            let row = ((v - value.lo) / value.width() * *rows as f64).floor();
            let rgb = if col >= 0.0 && (col as usize) < *columns && row >= 0.0 && (row as usize) < *rows {
                let cell = cells[col as usize * rows + row as usize];
                heat_color((cell - model.vmin) / span_db)
            } else {
                bg
            };
            buffer[idx] = rgb.0;
            buffer[idx + 1] = rgb.1;
            buffer[idx + 2] = rgb.2;
        }
    }
    Some(buffer)
}

fn draw_spectrogram(model: &PlotModel, w: &Widget) {
    draw::set_draw_color(color(BG_DARK));
    draw::draw_rectf(w.x(), w.y(), w.w(), w.h());

    // A cleared view leaves an empty line here instead of a heatmap
    let data = model
        .data
        .get(AXIS_SPECTROGRAM)
        .filter(|d| matches!(d, AxisData::Heatmap { .. }));
    let y_range = model.y_ranges.get(AXIS_SPECTROGRAM).copied();
    let (Some(data), Some(y_range)) = (data, y_range) else {
        draw::set_draw_color(color(TEXT_DISABLED));
        draw::set_font(Font::Helvetica, 14);
        draw::draw_text("Open a WAV file or press Demo to begin", w.x() + 10, w.y() + w.h() / 2);
        return;
    };

    if let Some(buffer) = rasterize_heatmap(model, data, y_range, w.w() as usize, w.h() as usize) {
        match RgbImage::new(&buffer, w.w(), w.h(), ColorDepth::Rgb8) {
            Ok(mut image) => image.draw(w.x(), w.y(), w.w(), w.h()),
            Err(e) => log::warn!("Failed to create spectrogram image: {:?}", e),
        }
    }

    draw::set_draw_color(color(TEXT_PRIMARY));
    draw::set_font(Font::Helvetica, 11);
    draw::draw_text(&format!("{:.0} Hz", y_range.hi), w.x() + 4, w.y() + 12);
    draw::draw_text(&format!("{:.0} Hz", y_range.lo), w.x() + 4, w.y() + w.h() - 4);

    draw_overlay(model, w);
    if let Some(band) = model.overlay.rubber_band {
        draw_rubber_band(band, w);
    }
}

fn draw_traces(model: &PlotModel, w: &Widget) {
    draw::set_draw_color(color(BG_PANEL));
    draw::draw_rectf(w.x(), w.y(), w.w(), w.h());

    let panel_h = w.h() / TRACE_AXES.len() as i32;
    let trace_colors = [ACCENT_GREEN, ACCENT_BLUE, ACCENT_YELLOW];
    for (i, (axis, trace_color)) in TRACE_AXES.iter().zip(trace_colors).enumerate() {
        let top = w.y() + i as i32 * panel_h;
        draw::set_draw_color(color(SEPARATOR));
        draw::draw_line(w.x(), top, w.x() + w.w(), top);
        draw::set_draw_color(color(TEXT_DISABLED));
        draw::set_font(Font::Helvetica, 11);
        draw::draw_text(axis, w.x() + 4, top + 12);

        let (Some(AxisData::Line(points)), Some(range)) =
            (model.data.get(*axis), model.y_ranges.get(*axis))
        else {
            continue;
        };
        if range.width() <= 0.0 {
            continue;
        }
        draw::push_clip(w.x(), top, w.w(), panel_h);
        draw::set_draw_color(color(trace_color));
        let to_y = |v: f64| top + panel_h - ((v - range.lo) / range.width() * panel_h as f64) as i32;
        let mut last: Option<(i32, i32)> = None;
        for &(t, v) in points {
            let Some(px) = model.time_to_px(t, w.w()) else {
                break;
            };
            let point = (w.x() + px, to_y(v));
            if let Some(prev) = last {
                draw::draw_line(prev.0, prev.1, point.0, point.1);
            }
            last = Some(point);
        }
        draw::pop_clip();
    }

    if let Some(window) = model.window {
        draw::set_draw_color(color(TEXT_PRIMARY));
        draw::set_font(Font::Helvetica, 11);
        draw::draw_text(&format!("{:.2} s", window.lo), w.x() + 4, w.y() + w.h() - 4);
        let right = format!("{:.2} s", window.hi);
        let (text_w, _) = draw::measure(&right, false);
        draw::draw_text(&right, w.x() + w.w() - text_w - 4, w.y() + w.h() - 4);
    }
    draw_overlay(model, w);
}

/// Selection edges and the marker, shared by both plot widgets.
fn draw_overlay(model: &PlotModel, w: &Widget) {
    if let Some(selection) = model.overlay.selection
        && let (Some(x0), Some(x1)) = (model.time_to_px(selection.lo, w.w()), model.time_to_px(selection.hi, w.w()))
    {
        draw::set_draw_color(color(ACCENT_YELLOW));
        draw::draw_line(w.x() + x0, w.y(), w.x() + x0, w.y() + w.h());
        draw::draw_line(w.x() + x1, w.y(), w.x() + x1, w.y() + w.h());
        draw::draw_line(w.x() + x0, w.y() + 1, w.x() + x1, w.y() + 1);
    }
    if let Some(marker) = model.overlay.marker
        && let Some(x) = model.time_to_px(marker, w.w())
        && (0..=w.w()).contains(&x)
    {
        draw::set_draw_color(color(ACCENT_RED));
        draw::draw_line(w.x() + x, w.y(), w.x() + x, w.y() + w.h());
    }
}

fn draw_rubber_band(band: PixelRect, w: &Widget) {
    draw::set_draw_color(color(TEXT_PRIMARY));
    draw::set_line_style(LineStyle::Dash, 1);
    draw::draw_rect(
        w.x() + band.x0 as i32,
        w.y() + band.y0 as i32,
        band.width() as i32,
        band.height() as i32,
    );
    draw::set_line_style(LineStyle::Solid, 0);
}

// ─── Input Helpers ─────────────────────────────────────────────────────────────

fn pointer_button() -> MouseButton {
    match app::event_mouse_button() {
        app::MouseButton::Right => MouseButton::Right,
        app::MouseButton::Middle => MouseButton::Middle,
        _ => MouseButton::Left,
    }
}

/// Ask for a path; `None` when the dialog was cancelled.
fn choose_file(kind: dialog::NativeFileChooserType, filter: &str) -> Option<std::path::PathBuf> {
    let mut chooser = dialog::NativeFileChooser::new(kind);
    chooser.set_filter(filter);
    chooser.show();
    let filename = chooser.filename();
    if filename.as_os_str().is_empty() {
        return None;
    }
    Some(filename)
}

fn toolbar_button(row: &mut Flex, label: &str, width: i32) -> Button {
    let mut button = Button::default().with_label(label);
    button.set_color(color(BG_WIDGET));
    button.set_label_color(color(TEXT_PRIMARY));
    button.set_label_size(12);
    row.fixed(&button, width);
    button
}

fn send_on_click(button: &mut Button, tx: &Sender<InputEvent>, event: InputEvent) {
    let tx = tx.clone();
    button.set_callback(move |_| {
        let _ = tx.send(event.clone());
    });
}

fn send_path_on_click(
    button: &mut Button,
    tx: &Sender<InputEvent>,
    command: &'static str,
    kind: dialog::NativeFileChooserType,
    filter: &'static str,
) {
    let tx = tx.clone();
    button.set_callback(move |_| {
        if let Some(path) = choose_file(kind, filter) {
            let _ = tx.send(InputEvent::command(command, CommandArgs::with_path(path)));
        }
    });
}

// ─── MAIN ──────────────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    let settings = Settings::load_or_create(Path::new(Settings::FILE_NAME));
    let app = app::App::default();
    app::set_scheme(app::Scheme::Gtk);

    let (win_w, win_h) = (settings.window_width, settings.window_height);
    let mut win = Window::new(50, 50, win_w, win_h, "songscope");
    win.make_resizable(true);
    win.set_color(color(BG_DARK));

    let (tx, input) = ChannelInput::new();

    let mut root = Flex::default().with_size(win_w, win_h).column();

    // ─── TOOLBAR ───────────────────────────────────────────────────────────────

    let mut toolbar = Flex::default().row();
    let mut btn_open = toolbar_button(&mut toolbar, "Open", 60);
    let mut btn_demo = toolbar_button(&mut toolbar, "Demo", 60);
    let mut btn_train = toolbar_button(&mut toolbar, "Train", 60);
    let mut btn_classify = toolbar_button(&mut toolbar, "Classify", 70);
    let mut btn_motifs = toolbar_button(&mut toolbar, "Motifs", 60);
    let mut btn_save = toolbar_button(&mut toolbar, "Save", 55);
    let mut btn_restore = toolbar_button(&mut toolbar, "Restore", 65);
    let mut btn_load_net = toolbar_button(&mut toolbar, "Load Net", 75);
    let mut btn_export_net = toolbar_button(&mut toolbar, "Export Net", 85);
    let mut record_input = IntInput::default();
    record_input.set_color(color(BG_WIDGET));
    record_input.set_text_color(color(TEXT_PRIMARY));
    record_input.set_value("0");
    toolbar.fixed(&record_input, 40);
    let mut btn_active = toolbar_button(&mut toolbar, "Show", 55);
    Frame::default();
    toolbar.end();
    root.fixed(&toolbar, 28);

    let mut navbar = Flex::default().row();
    let mut btn_home = toolbar_button(&mut navbar, "Home", 60);
    let mut btn_back = toolbar_button(&mut navbar, "<", 35);
    let mut btn_forward = toolbar_button(&mut navbar, ">", 35);
    let mut btn_pan = toolbar_button(&mut navbar, "Pan", 50);
    let mut btn_zoom = toolbar_button(&mut navbar, "Zoom", 55);
    let mut btn_select = toolbar_button(&mut navbar, "Select", 60);
    let mut btn_play = toolbar_button(&mut navbar, "Play", 55);
    let mut btn_stop = toolbar_button(&mut navbar, "Stop", 55);
    let mut btn_status = toolbar_button(&mut navbar, "Status", 60);
    let mut hint = Frame::default().with_label("digits 0-9 label the selection");
    hint.set_label_color(color(TEXT_DISABLED));
    hint.set_label_size(11);
    hint.set_align(Align::Left | Align::Inside);
    navbar.end();
    root.fixed(&navbar, 28);

    // ─── PLOTS ─────────────────────────────────────────────────────────────────

    let mut spec_display = Widget::default();
    spec_display.set_frame(FrameType::FlatBox);
    let mut traces_display = Widget::default();
    traces_display.set_frame(FrameType::FlatBox);
    root.fixed(&traces_display, 180);

    // ─── CONSOLE ───────────────────────────────────────────────────────────────

    let console_buffer = TextBuffer::default();
    let mut console_display = TextDisplay::default();
    console_display.set_buffer(console_buffer.clone());
    console_display.set_color(color(BG_PANEL));
    console_display.set_text_color(color(TEXT_PRIMARY));
    console_display.set_text_font(Font::Courier);
    console_display.set_text_size(12);
    root.fixed(&console_display, settings.console_height);

    root.end();
    win.end();
    win.show();

    // ─── SESSION ───────────────────────────────────────────────────────────────

    let model = Rc::new(RefCell::new(PlotModel::new(settings.vmin, settings.vmax)));
    let renderer = FltkRenderer {
        model: model.clone(),
        widgets: vec![spec_display.clone(), traces_display.clone()],
    };
    let mut session = Session::new(settings, Box::new(renderer), Box::new(input), Arc::new(BasicBackend));
    logging::init(Some(session.console()));

    {
        let mut console_display = console_display.clone();
        let mut console_buffer = console_buffer.clone();
        let mut console_text = String::new();
        session.set_console_consumer(Box::new(move |text: &str| {
            apply_overwrite(&mut console_text, text);
            console_buffer.set_text(&console_text);
            console_display.set_insert_position(console_buffer.length());
            console_display.show_insert_position();
        }));
    }

    // ─── CALLBACKS ─────────────────────────────────────────────────────────────

    use dialog::NativeFileChooserType::{BrowseFile, BrowseSaveFile};
    send_path_on_click(&mut btn_open, &tx, "open", BrowseFile, "*.wav");
    send_path_on_click(&mut btn_save, &tx, "save", BrowseSaveFile, "*.json");
    send_path_on_click(&mut btn_restore, &tx, "restore", BrowseFile, "*.json");
    send_path_on_click(&mut btn_load_net, &tx, "load-net", BrowseFile, "*.json");
    send_path_on_click(&mut btn_export_net, &tx, "export-net", BrowseSaveFile, "*.json");

    send_on_click(&mut btn_demo, &tx, InputEvent::command("demo", CommandArgs::none()));
    send_on_click(&mut btn_train, &tx, InputEvent::command("train", CommandArgs::none()));
    send_on_click(&mut btn_classify, &tx, InputEvent::command("classify", CommandArgs::none()));
    send_on_click(&mut btn_motifs, &tx, InputEvent::command("motifs", CommandArgs::none()));
    send_on_click(&mut btn_play, &tx, InputEvent::command("play", CommandArgs::none()));
    send_on_click(&mut btn_stop, &tx, InputEvent::command("stop", CommandArgs::none()));
    send_on_click(&mut btn_status, &tx, InputEvent::command("status", CommandArgs::none()));

    send_on_click(&mut btn_home, &tx, InputEvent::Navigate(NavAction::Home));
    send_on_click(&mut btn_back, &tx, InputEvent::Navigate(NavAction::Back));
    send_on_click(&mut btn_forward, &tx, InputEvent::Navigate(NavAction::Forward));
    send_on_click(&mut btn_pan, &tx, InputEvent::Navigate(NavAction::Pan));
    send_on_click(&mut btn_zoom, &tx, InputEvent::Navigate(NavAction::Zoom));
    send_on_click(&mut btn_select, &tx, InputEvent::Navigate(NavAction::Select));

    {
        let tx = tx.clone();
        let record_input = record_input.clone();
        btn_active.set_callback(move |_| match record_input.value().trim().parse::<usize>() {
            Ok(index) => {
                let _ = tx.send(InputEvent::command("active", CommandArgs::with_index(index)));
            }
            Err(_) => log::warn!("Record index '{}' is not a number", record_input.value()),
        });
    }

    // ── Spectrogram display ──
    {
        let model = model.clone();
        spec_display.draw(move |w| {
            if !w.visible_r() || w.w() <= 0 || w.h() <= 0 {
                return;
            }
            let Ok(model) = model.try_borrow() else { return; };
            draw_spectrogram(&model, w);
        });
    }

    {
        let model = model.clone();
        traces_display.draw(move |w| {
            if !w.visible_r() || w.w() <= 0 || w.h() <= 0 {
                return;
            }
            let Ok(model) = model.try_borrow() else { return; };
            draw_traces(&model, w);
        });
    }

    // ── Spectrogram mouse handling (pan / zoom / select) ──
    {
        let tx = tx.clone();
        spec_display.handle(move |w, ev| {
            let phase = match ev {
                Event::Push => PointerPhase::Press,
                Event::Drag => PointerPhase::Drag,
                Event::Released => PointerPhase::Release,
                _ => return false,
            };
            let x = (app::event_x() - w.x()) as f64;
            let y = (app::event_y() - w.y()) as f64;
            let _ = tx.send(InputEvent::Pointer { phase, x, y, button: pointer_button() });
            true
        });
    }

    // Digit keys label the selection
    {
        let tx = tx.clone();
        win.handle(move |_, event| {
            if event == Event::KeyUp
                && let Some(key) = app::event_key().to_char()
                && key.is_ascii_digit()
            {
                let _ = tx.send(InputEvent::Key(key));
                return true;
            }
            false
        });
    }

    // Closing the window goes through the session so running tasks are awaited
    {
        let tx = tx.clone();
        win.set_callback(move |_| {
            if app::event() == Event::Close {
                let _ = tx.send(InputEvent::Quit);
            }
        });
    }

    // ═══════════════════════════════════════════════════════════════════════════
    //  MAIN POLL LOOP (16ms)
    // ═══════════════════════════════════════════════════════════════════════════

    {
        let spec_display = spec_display.clone();
        let tx = tx.clone();
        let mut last_size = (0, 0);

        app::add_timeout3(0.016, move |handle| {
            let size = (spec_display.w(), spec_display.h());
            if size != last_size && size.0 > 0 && size.1 > 0 {
                last_size = size;
                let _ = tx.send(InputEvent::Resize { width: size.0 as f64, height: size.1 as f64 });
            }

            if !session.tick(Instant::now()) {
                if !session.wait_for_tasks(SHUTDOWN_GRACE) {
                    log::warn!(
                        "Exiting with task(s) still running: [{}]",
                        session.runner().live_task_names().join(", ")
                    );
                }
                app::quit();
                return;
            }
            app::repeat_timeout3(0.016, handle);
        });
    }

    app.run()?;
    Ok(())
}
