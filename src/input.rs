//! Events the control surface delivers to the session.

use std::sync::mpsc::{self, Receiver, Sender};

use crate::router::CommandArgs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Middle,
    Right,
}

/// A pointer position in plot pixels (origin top-left) together with the
/// data coordinates under it: `t` on the shared time axis, `v` on the
/// primary axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerEvent {
    pub x: f64,
    pub y: f64,
    pub t: f64,
    pub v: f64,
    pub button: MouseButton,
}

impl PointerEvent {
    pub fn new(x: f64, y: f64, t: f64, button: MouseButton) -> Self {
        Self { x, y, t, v: 0.0, button }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerPhase {
    Press,
    Drag,
    Release,
}

/// Navigation toolbar actions. These never go through the command router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavAction {
    Home,
    Back,
    Forward,
    Pan,
    Zoom,
    Select,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    /// Raw pointer activity in plot pixels; the session fills in data
    /// coordinates from the current view.
    Pointer { phase: PointerPhase, x: f64, y: f64, button: MouseButton },
    Key(char),
    Command { name: String, args: CommandArgs },
    Navigate(NavAction),
    /// Plot area resized, in pixels
    Resize { width: f64, height: f64 },
    Quit,
}

impl InputEvent {
    pub fn command(name: &str, args: CommandArgs) -> Self {
        InputEvent::Command { name: name.to_string(), args }
    }
}

pub trait InputSurface {
    /// Next pending event, without blocking.
    fn next_event(&mut self) -> Option<InputEvent>;
}

/// Input surface fed from any thread through an mpsc channel.
pub struct ChannelInput {
    rx: Receiver<InputEvent>,
}

impl ChannelInput {
    pub fn new() -> (Sender<InputEvent>, Self) {
        let (tx, rx) = mpsc::channel();
        (tx, Self { rx })
    }
}

impl InputSurface for ChannelInput {
    fn next_event(&mut self) -> Option<InputEvent> {
        self.rx.try_recv().ok()
    }
}
