//! Renderer interface. Only the control thread calls into a renderer.

use crate::navigation::{PixelRect, Span};

/// Data shown on one named axis.
#[derive(Debug, Clone, PartialEq)]
pub enum AxisData {
    /// A polyline of (time, value) points
    Line(Vec<(f64, f64)>),
    /// A time x value grid, `cells[col * rows + row]`, row 0 at `value.lo`
    Heatmap {
        time: Span,
        value: Span,
        columns: usize,
        rows: usize,
        cells: Vec<f32>,
    },
}

/// Transient marks drawn over the plot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overlay {
    pub marker: Option<f64>,
    pub selection: Option<Span>,
    pub rubber_band: Option<PixelRect>,
}

pub trait Renderer {
    fn draw_axis(&mut self, name: &str, data: &AxisData);
    /// Shared time window of every axis
    fn set_x_range(&mut self, window: Span);
    fn set_y_range(&mut self, axis: &str, range: Span);
    fn show_overlay(&mut self, _overlay: &Overlay) {}
    fn redraw(&mut self);
}

/// Renderer for the console front end: remembers the view and logs it.
#[derive(Debug, Default)]
pub struct HeadlessRenderer {
    window: Option<Span>,
    overlay: Overlay,
    redraws: u64,
}

impl HeadlessRenderer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Renderer for HeadlessRenderer {
    fn draw_axis(&mut self, name: &str, data: &AxisData) {
        let points = match data {
            AxisData::Line(points) => points.len(),
            AxisData::Heatmap { cells, .. } => cells.len(),
        };
        log::debug!("draw axis '{}' ({} points)", name, points);
    }

    fn set_x_range(&mut self, window: Span) {
        self.window = Some(window);
    }

    fn set_y_range(&mut self, axis: &str, range: Span) {
        log::debug!("y-range of '{}' -> {}", axis, range);
    }

    fn show_overlay(&mut self, overlay: &Overlay) {
        self.overlay = overlay.clone();
    }

    fn redraw(&mut self) {
        self.redraws += 1;
        if let Some(w) = self.window {
            log::debug!("redraw #{}: window {} overlay {:?}", self.redraws, w, self.overlay);
        }
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Debug, Clone, PartialEq)]
    pub enum RenderCall {
        DrawAxis(String),
        XRange(Span),
        YRange(String, Span),
        Overlay(Overlay),
        Redraw,
    }

    /// Captures every call; clone the handle to inspect after boxing.
    #[derive(Clone, Default)]
    pub struct RecordingRenderer {
        pub calls: Rc<RefCell<Vec<RenderCall>>>,
    }

    impl RecordingRenderer {
        pub fn redraws(&self) -> usize {
            self.calls.borrow().iter().filter(|c| **c == RenderCall::Redraw).count()
        }

        pub fn clear(&self) {
            self.calls.borrow_mut().clear();
        }
    }

    impl Renderer for RecordingRenderer {
        fn draw_axis(&mut self, name: &str, _data: &AxisData) {
            self.calls.borrow_mut().push(RenderCall::DrawAxis(name.to_string()));
        }

        fn set_x_range(&mut self, window: Span) {
            self.calls.borrow_mut().push(RenderCall::XRange(window));
        }

        fn set_y_range(&mut self, axis: &str, range: Span) {
            self.calls.borrow_mut().push(RenderCall::YRange(axis.to_string(), range));
        }

        fn show_overlay(&mut self, overlay: &Overlay) {
            self.calls.borrow_mut().push(RenderCall::Overlay(overlay.clone()));
        }

        fn redraw(&mut self) {
            self.calls.borrow_mut().push(RenderCall::Redraw);
        }
    }
}
