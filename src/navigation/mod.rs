//! Constrained pan/zoom/select over a shared time axis.

mod bounds;
mod controller;

pub use bounds::{Extent, PixelRect, Span};
pub use controller::{Mode, NavConfig, NavigationController, ZoomDirection};
