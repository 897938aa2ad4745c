// THEORY:
// The `geometry` module holds the small set of integer-pixel primitives that every
// other layer speaks in. Motion boxes, tracked object boxes, consolidated regions and
// classifier tiles are all the same `Rect`, so the overlap arithmetic used to match,
// merge and resolve them lives in exactly one place.
//
// All rectangles are half-open: a `Rect { x: 0, y: 0, width: 10, height: 10 }`
// covers columns 0..10 and rows 0..10. A rectangle with a non-positive side is
// "empty" and has zero area.

use serde::Deserialize;

/// The dimensions of the frames flowing through a single pipeline session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// The full-frame rectangle.
    pub fn bounds(&self) -> Rect {
        Rect::new(0, 0, self.width as i32, self.height as i32)
    }
}

/// An axis-aligned rectangle in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// How two rectangles are compared when deciding whether they "overlap".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlapMetric {
    /// Intersection over union.
    Iou,
    /// Intersection over the area of the smaller rectangle.
    Smaller,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    /// Builds the rectangle spanning `[x0, x1) x [y0, y1)`.
    pub fn from_edges(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        Self::new(x0, y0, x1 - x0, y1 - y0)
    }

    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub fn area(&self) -> i64 {
        if self.is_empty() {
            0
        } else {
            self.width as i64 * self.height as i64
        }
    }

    pub fn center(&self) -> (f64, f64) {
        (
            self.x as f64 + self.width as f64 / 2.0,
            self.y as f64 + self.height as f64 / 2.0,
        )
    }

    /// Euclidean distance between the centers of two rectangles.
    pub fn center_distance(&self, other: &Rect) -> f64 {
        let (ax, ay) = self.center();
        let (bx, by) = other.center();
        ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
    }

    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.right().min(other.right());
        let y1 = self.bottom().min(other.bottom());
        let rect = Rect::from_edges(x0, y0, x1, y1);
        (!rect.is_empty()).then_some(rect)
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.intersection(other).is_some()
    }

    /// The smallest rectangle containing both inputs.
    pub fn union(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Rect::from_edges(
            self.x.min(other.x),
            self.y.min(other.y),
            self.right().max(other.right()),
            self.bottom().max(other.bottom()),
        )
    }

    pub fn contains(&self, other: &Rect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    pub fn iou(&self, other: &Rect) -> f64 {
        let inter = self.intersection(other).map_or(0, |r| r.area());
        let union = self.area() + other.area() - inter;
        if union <= 0 {
            0.0
        } else {
            inter as f64 / union as f64
        }
    }

    /// Intersection area divided by the area of the smaller rectangle.
    pub fn overlap_with_smaller(&self, other: &Rect) -> f64 {
        let inter = self.intersection(other).map_or(0, |r| r.area());
        let smaller = self.area().min(other.area());
        if smaller <= 0 {
            0.0
        } else {
            inter as f64 / smaller as f64
        }
    }

    pub fn overlap(&self, other: &Rect, metric: OverlapMetric) -> f64 {
        match metric {
            OverlapMetric::Iou => self.iou(other),
            OverlapMetric::Smaller => self.overlap_with_smaller(other),
        }
    }

    /// Clips the rectangle to the frame. The result may be empty.
    pub fn clamp_to(&self, frame: FrameSize) -> Rect {
        let x0 = self.x.clamp(0, frame.width as i32);
        let y0 = self.y.clamp(0, frame.height as i32);
        let x1 = self.right().clamp(0, frame.width as i32);
        let y1 = self.bottom().clamp(0, frame.height as i32);
        Rect::from_edges(x0, y0, x1.max(x0), y1.max(y0))
    }

    /// Grows the rectangle symmetrically about its center by `factor`.
    /// Factors at or below 1.0 leave it unchanged.
    pub fn expand(&self, factor: f64) -> Rect {
        if factor <= 1.0 || self.is_empty() {
            return *self;
        }
        let new_w = (self.width as f64 * factor).round() as i32;
        let new_h = (self.height as f64 * factor).round() as i32;
        let dx = (new_w - self.width) / 2;
        let dy = (new_h - self.height) / 2;
        Rect::new(self.x - dx, self.y - dy, new_w, new_h)
    }
}

/// Union of a sequence of rectangles, or `None` if the sequence is empty.
pub fn union_all<'a, I>(rects: I) -> Option<Rect>
where
    I: IntoIterator<Item = &'a Rect>,
{
    rects.into_iter().fold(None, |acc, r| match acc {
        None => Some(*r),
        Some(u) => Some(u.union(r)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intersection_of_disjoint_rects_is_none() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(10, 0, 10, 10);
        assert!(a.intersection(&b).is_none());
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn overlap_with_smaller_is_one_for_nested_rects() {
        let outer = Rect::new(0, 0, 100, 100);
        let inner = Rect::new(10, 10, 20, 20);
        assert_eq!(outer.overlap_with_smaller(&inner), 1.0);
        assert!((outer.iou(&inner) - 0.04).abs() < 1e-9);
    }

    #[test]
    fn clamp_keeps_rect_inside_frame() {
        let frame = FrameSize::new(100, 50);
        let r = Rect::new(-20, 30, 200, 40).clamp_to(frame);
        assert_eq!(r, Rect::new(0, 30, 100, 20));
        assert!(frame.bounds().contains(&r));
    }

    #[test]
    fn expand_grows_about_center() {
        let r = Rect::new(100, 100, 100, 50).expand(1.2);
        assert_eq!(r, Rect::new(90, 95, 120, 60));
        assert_eq!(Rect::new(5, 5, 10, 10).expand(0.5), Rect::new(5, 5, 10, 10));
    }

    #[test]
    fn union_all_spans_every_input() {
        let rects = [Rect::new(0, 0, 5, 5), Rect::new(20, 30, 5, 5)];
        assert_eq!(union_all(&rects), Some(Rect::new(0, 0, 25, 35)));
        assert_eq!(union_all(&[]), None);
    }
}
