// THEORY:
// `region_layout` holds the pure geometry of consolidated regions: how a group of
// object boxes becomes a classifier-shaped region, how an oversized region is cut
// into tiles, and which of two competing regions survives an overlap.
//
// The classifier wants square inputs of `ideal` pixels. A region is acceptable
// when both sides lie in `[lower, upper]`, i.e. `ideal` minus/plus the tolerance
// (448..=832 for 640 at 30%).
//
// - **Shaping**: the expanded union of the group is squared off. If its longer side
//   is already acceptable the square keeps that side; if it is smaller it grows to
//   `ideal`; if it is too large each axis is only raised to at least `ideal` and the
//   region is left for tiling. The result is centred on the union, pushed back
//   inside the frame and never smaller than the union itself.
// - **Tiling**: oversized regions are cut into `ceil(w/ideal) x ceil(h/ideal)`
//   tiles. The last row and column are truncated to the region's extent, so the
//   tiles cover the region exactly.
// - **Resolution**: candidates are ranked (in tolerance first, then smallest
//   deviation from the ideal size, then most members, then lowest id) and a
//   candidate is dropped if it overlaps an already accepted one.

use crate::core_modules::geometry::{FrameSize, Rect};

/// Acceptable region dimensions for the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeTarget {
    pub ideal: i32,
    pub lower: i32,
    pub upper: i32,
}

impl SizeTarget {
    pub fn new(ideal: u32, tolerance_percent: u32) -> Self {
        let ideal = ideal as i64;
        let tolerance = tolerance_percent as i64;
        Self {
            ideal: ideal as i32,
            lower: (ideal * (100 - tolerance) / 100) as i32,
            upper: (ideal * (100 + tolerance) / 100) as i32,
        }
    }

    pub fn within_tolerance(&self, r: &Rect) -> bool {
        let sides = self.lower..=self.upper;
        sides.contains(&r.width) && sides.contains(&r.height)
    }

    pub fn is_oversized(&self, r: &Rect) -> bool {
        r.width > self.upper || r.height > self.upper
    }

    /// L1 distance of the region's size from the ideal square.
    pub fn deviation(&self, r: &Rect) -> i64 {
        (r.width - self.ideal).unsigned_abs() as i64 + (r.height - self.ideal).unsigned_abs() as i64
    }
}

/// Builds a region box around `union` (the members' union box).
pub fn shape_region_box(union: Rect, expansion: f64, target: SizeTarget, frame: FrameSize) -> Rect {
    // --- 1. Expand ---
    let base = union.clamp_to(frame);
    let expanded = base.expand(expansion).clamp_to(frame);

    // --- 2. Square toward the ideal size ---
    let side = expanded.width.max(expanded.height);
    let (mut w, mut h) = if side <= target.upper {
        let s = if side < target.lower { target.ideal } else { side };
        (s, s)
    } else {
        (expanded.width.max(target.ideal), expanded.height.max(target.ideal))
    };

    // --- 3. Fit inside the frame ---
    let (fw, fh) = (frame.width as i32, frame.height as i32);
    w = w.min(fw).max(expanded.width);
    h = h.min(fh).max(expanded.height);
    let x = (expanded.x - (w - expanded.width) / 2).clamp(0, fw - w);
    let y = (expanded.y - (h - expanded.height) / 2).clamp(0, fh - h);
    Rect::new(x, y, w, h)
}

/// Cuts `region` into a row-major grid of tiles at most `tile` pixels square.
/// Returns `(row, col, rect)` triples.
pub fn split_into_tiles(region: Rect, tile: i32) -> Vec<(u32, u32, Rect)> {
    if region.is_empty() || tile <= 0 {
        return Vec::new();
    }
    let cols = (region.width + tile - 1) / tile;
    let rows = (region.height + tile - 1) / tile;
    let mut tiles = Vec::with_capacity((cols * rows) as usize);
    for row in 0..rows {
        for col in 0..cols {
            let x = region.x + col * tile;
            let y = region.y + row * tile;
            let w = tile.min(region.right() - x);
            let h = tile.min(region.bottom() - y);
            tiles.push((row as u32, col as u32, Rect::new(x, y, w, h)));
        }
    }
    tiles
}

/// What the overlap resolver needs to know about each candidate.
#[derive(Debug, Clone, Copy)]
pub struct RankedBox {
    pub rect: Rect,
    pub members: usize,
    /// Deterministic final tie-break; lower wins.
    pub order: (u64, Option<(u32, u32)>),
}

/// Indices of the candidates that survive overlap resolution, in input order.
pub fn resolve_overlaps(
    candidates: &[RankedBox],
    target: SizeTarget,
    threshold: f64,
) -> Vec<usize> {
    let mut ranking: Vec<usize> = (0..candidates.len()).collect();
    ranking.sort_by(|&a, &b| {
        let (ra, rb) = (&candidates[a], &candidates[b]);
        target
            .within_tolerance(&rb.rect)
            .cmp(&target.within_tolerance(&ra.rect))
            .then(target.deviation(&ra.rect).cmp(&target.deviation(&rb.rect)))
            .then(rb.members.cmp(&ra.members))
            .then(ra.order.cmp(&rb.order))
    });

    let mut kept: Vec<usize> = Vec::new();
    for i in ranking {
        let rect = candidates[i].rect;
        if kept
            .iter()
            .all(|&k| candidates[k].rect.overlap_with_smaller(&rect) < threshold)
        {
            kept.push(i);
        }
    }
    kept.sort_unstable();
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: FrameSize = FrameSize {
        width: 1920,
        height: 1080,
    };

    fn target() -> SizeTarget {
        SizeTarget::new(640, 30)
    }

    #[test]
    fn tolerance_range_follows_percentage() {
        let t = target();
        assert_eq!((t.lower, t.upper), (448, 832));
    }

    #[test]
    fn small_group_grows_to_ideal_square() {
        let r = shape_region_box(Rect::new(900, 500, 60, 40), 1.2, target(), FRAME);
        assert_eq!((r.width, r.height), (640, 640));
        assert!(r.contains(&Rect::new(900, 500, 60, 40)));
    }

    #[test]
    fn acceptable_group_is_squared_not_resized() {
        let r = shape_region_box(Rect::new(500, 300, 500, 300), 1.2, target(), FRAME);
        assert_eq!((r.width, r.height), (600, 600));
    }

    #[test]
    fn oversized_group_keeps_its_extent() {
        let union = Rect::new(100, 100, 1200, 300);
        let r = shape_region_box(union, 1.0, target(), FRAME);
        assert_eq!((r.width, r.height), (1200, 640));
        assert!(r.contains(&union));
    }

    #[test]
    fn shaped_box_is_pushed_inside_frame() {
        let r = shape_region_box(Rect::new(0, 1050, 20, 20), 1.2, target(), FRAME);
        assert_eq!(r, Rect::new(0, 440, 640, 640));
        assert!(FRAME.bounds().contains(&r));
    }

    #[test]
    fn small_frame_caps_region_size() {
        let frame = FrameSize::new(320, 240);
        let r = shape_region_box(Rect::new(100, 100, 30, 30), 1.2, target(), frame);
        assert_eq!(r, Rect::new(0, 0, 320, 240));
    }

    #[test]
    fn region_1280_by_900_splits_into_two_by_two() {
        let tiles = split_into_tiles(Rect::new(0, 0, 1280, 900), 640);
        let sizes: Vec<(u32, u32, i32, i32)> =
            tiles.iter().map(|(r, c, t)| (*r, *c, t.width, t.height)).collect();
        assert_eq!(
            sizes,
            vec![(0, 0, 640, 640), (0, 1, 640, 640), (1, 0, 640, 260), (1, 1, 640, 260)]
        );
    }

    #[test]
    fn tiles_cover_region_exactly() {
        let regions = [
            Rect::new(13, 7, 1500, 833),
            Rect::new(0, 0, 900, 2000),
            Rect::new(5, 5, 641, 641),
        ];
        for region in regions {
            let tiles = split_into_tiles(region, 640);
            let area: i64 = tiles.iter().map(|(_, _, t)| t.area()).sum();
            assert_eq!(area, region.area());
            for (i, (_, _, a)) in tiles.iter().enumerate() {
                assert!(region.contains(a));
                for (_, _, b) in tiles.iter().skip(i + 1) {
                    assert!(!a.intersects(b));
                }
            }
        }
    }

    #[test]
    fn in_tolerance_region_beats_closer_out_of_tolerance_one() {
        let candidates = [
            RankedBox {
                rect: Rect::new(0, 0, 840, 840),
                members: 5,
                order: (0, None),
            },
            RankedBox {
                rect: Rect::new(0, 0, 460, 460),
                members: 1,
                order: (1, None),
            },
        ];
        assert_eq!(resolve_overlaps(&candidates, target(), 0.3), vec![1]);
    }

    #[test]
    fn ties_fall_back_to_members_then_id() {
        let a = RankedBox {
            rect: Rect::new(0, 0, 640, 640),
            members: 2,
            order: (3, None),
        };
        let b = RankedBox {
            rect: Rect::new(100, 0, 640, 640),
            members: 3,
            order: (4, None),
        };
        assert_eq!(resolve_overlaps(&[a, b], target(), 0.3), vec![1]);
        let b_same = RankedBox { members: 2, ..b };
        assert_eq!(resolve_overlaps(&[a, b_same], target(), 0.3), vec![0]);
    }

    #[test]
    fn disjoint_regions_all_survive() {
        let candidates: Vec<RankedBox> = (0..3)
            .map(|i| RankedBox {
                rect: Rect::new(i * 640, 0, 640, 640),
                members: 1,
                order: (i as u64, None),
            })
            .collect();
        assert_eq!(resolve_overlaps(&candidates, target(), 0.3), vec![0, 1, 2]);
    }
}
