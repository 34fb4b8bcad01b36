//! Rectangle geometry for normalised detection boxes.
//!
//! All boxes live in the [0..1] × [0..1] frame space and are stored as
//! origin + size. Degenerate boxes (zero/negative size, NaN) never intersect
//! anything, so every fraction below falls back to 0 instead of dividing by 0.

use serde::{Deserialize, Serialize};

// ─── Rect ────────────────────────────────────────────────────────────────────

/// Axis-aligned rectangle, origin at (x, y).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x:      f64,
    pub y:      f64,
    pub width:  f64,
    pub height: f64,
}

impl Rect {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    pub fn min_x(&self) -> f64 { self.x }
    pub fn max_x(&self) -> f64 { self.x + self.width }
    pub fn min_y(&self) -> f64 { self.y }
    pub fn max_y(&self) -> f64 { self.y + self.height }

    /// True when the box has no usable area.
    pub fn is_degenerate(&self) -> bool {
        !(self.x.is_finite() && self.y.is_finite())
            || !(self.width > 0.0 && self.height > 0.0)
            || !(self.width.is_finite() && self.height.is_finite())
    }

    pub fn area(&self) -> f64 {
        if self.is_degenerate() { 0.0 } else { self.width * self.height }
    }

    /// Overlapping region, `None` when the boxes only touch or are disjoint.
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        if self.is_degenerate() || other.is_degenerate() {
            return None;
        }
        let x1 = self.min_x().max(other.min_x());
        let y1 = self.min_y().max(other.min_y());
        let x2 = self.max_x().min(other.max_x());
        let y2 = self.max_y().min(other.max_y());

        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some(Rect::new(x1, y1, x2 - x1, y2 - y1))
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.intersection(other).is_some()
    }

    /// Intersection area relative to the mean area of both boxes.
    pub fn intersection_fraction(&self, other: &Rect) -> f64 {
        intersection_fraction(self, other)
    }

    /// Portion of `other` covered by `self`.
    pub fn overlap_fraction(&self, other: &Rect) -> f64 {
        overlap_fraction(self, other)
    }

    /// Cut away everything left of `edge`, keeping the right edge in place.
    pub fn clip_left_of(&self, edge: f64) -> Rect {
        if self.min_x() >= edge {
            return *self;
        }
        let adjust = edge - self.x;
        Rect::new(edge, self.y, self.width - adjust, self.height)
    }
}

// ─── Fractions ───────────────────────────────────────────────────────────────

/// Symmetric overlap measure: `area(a ∩ b) / ((area(a) + area(b)) / 2)`.
///
/// Returns 0 when the boxes do not intersect or either box is degenerate.
pub fn intersection_fraction(a: &Rect, b: &Rect) -> f64 {
    let Some(inter) = a.intersection(b) else { return 0.0 };
    let mean_area = (a.area() + b.area()) / 2.0;
    if mean_area <= 0.0 { 0.0 } else { inter.area() / mean_area }
}

/// Asymmetric overlap measure: `area(a ∩ b) / area(b)`, i.e. how much of `b`
/// lies under `a`.
pub fn overlap_fraction(a: &Rect, b: &Rect) -> f64 {
    let Some(inter) = a.intersection(b) else { return 0.0 };
    let area_b = b.area();
    if area_b <= 0.0 { 0.0 } else { inter.area() / area_b }
}
