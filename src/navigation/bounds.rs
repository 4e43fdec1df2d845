use std::fmt;

/// A closed interval `lo..=hi` on one axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Span {
    pub lo: f64,
    pub hi: f64,
}

impl Span {
    pub const fn new(lo: f64, hi: f64) -> Self {
        Self { lo, hi }
    }

    /// Build from two points in either order.
    pub fn ordered(a: f64, b: f64) -> Self {
        if a <= b { Self::new(a, b) } else { Self::new(b, a) }
    }

    pub fn width(&self) -> f64 {
        self.hi - self.lo
    }

    /// Finite, not inverted, positive width.
    pub fn is_well_formed(&self) -> bool {
        self.lo.is_finite() && self.hi.is_finite() && self.hi > self.lo
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.lo && value <= self.hi
    }

    pub fn contains_span(&self, other: &Span) -> bool {
        other.lo >= self.lo && other.hi <= self.hi
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.lo, self.hi)
    }

    /// Intersection with `bounds`; may come out empty or inverted.
    pub fn clamp_to(&self, bounds: &Span) -> Span {
        Span::new(self.lo.max(bounds.lo), self.hi.min(bounds.hi))
    }

    pub fn shifted(&self, delta: f64) -> Span {
        Span::new(self.lo + delta, self.hi + delta)
    }

    /// Position of `fraction` (0 = lo, 1 = hi) along the span.
    pub fn lerp(&self, fraction: f64) -> f64 {
        self.lo + self.width() * fraction
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.4}, {:.4})", self.lo, self.hi)
    }
}

/// Bounding box of the loaded signal: time on x, value on the primary y-axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extent {
    pub time: Span,
    pub value: Span,
}

impl Extent {
    pub fn new(t_min: f64, t_max: f64, v_min: f64, v_max: f64) -> Self {
        Self {
            time: Span::new(t_min, t_max),
            value: Span::new(v_min, v_max),
        }
    }
}

/// A rectangle in plot pixels, normalised so `x0 <= x1` and `y0 <= y1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelRect {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl PixelRect {
    pub fn from_corners(ax: f64, ay: f64, bx: f64, by: f64) -> Self {
        Self {
            x0: ax.min(bx),
            y0: ay.min(by),
            x1: ax.max(bx),
            y1: ay.max(by),
        }
    }

    pub fn width(&self) -> f64 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f64 {
        self.y1 - self.y0
    }
}
