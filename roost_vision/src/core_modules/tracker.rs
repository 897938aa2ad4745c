// THEORY:
// The `tracker` module gives the engine object permanence. The contour filter hands
// over a fresh, anonymous list of motion boxes every frame; the `MotionTracker`
// associates them with the objects it already knows about, so that downstream
// consumers see the same id for the same bird from frame to frame.
//
// This module solves the data association problem with a greedy nearest match:
//
// 1.  **Candidate Pairs**: Every (object, box) pair whose centers are within
//     `max_tracking_distance`, or whose boxes overlap by at least the configured
//     overlap threshold, is a candidate.
// 2.  **Greedy Matching**: Candidates are taken in order of increasing center
//     distance, ties broken by object id and then box order. A pair is accepted
//     when neither side has been matched yet. This is not a globally optimal
//     assignment, but it is deterministic and cheap.
// 3.  **Lifecycle**: Each object moves through New -> Tracked -> Stale -> Removed.
//     - **Birth**: a box nobody claimed becomes a `New` object with a fresh id.
//     - **Tracking**: a matched object takes the new box, extends its trajectory,
//       re-estimates its velocity and clears its miss count.
//     - **Staleness**: an unmatched object counts a miss and turns `Stale`.
//     - **Death**: once the miss count exceeds `max_misses` the object is dropped
//       and its id is reported as lost for that frame.
//
// Two optional passes run on the boxes before matching. Spatial merging fuses
// boxes that touch or sit close together. Motion clustering fuses nearby boxes
// whose motion over the last few frames points the same way, which keeps the
// wings and body of one bird from becoming three objects.
//
// Trajectories record a smoothed center (an exponential moving average of the
// box centers), so the velocity does not jitter with the contour outline.

use crate::config::TrackerConfig;
use crate::core_modules::contour_filter::MotionBox;
use crate::core_modules::geometry::Rect;
use std::collections::{HashSet, VecDeque};
use tracing::{Span, debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    /// Created this frame from an unmatched box.
    New,
    /// Matched on the most recent frame.
    Tracked,
    /// Missed at least once; pending removal.
    Stale,
}

/// An object being followed across frames.
#[derive(Debug, Clone)]
pub struct TrackedObject {
    /// A unique and persistent id for this object.
    pub id: u64,
    /// The box from the last frame the object was seen in.
    pub current_box: Rect,
    /// Recent smoothed centers, oldest first.
    pub trajectory: VecDeque<(f64, f64)>,
    /// Exponential moving average of the box center.
    pub smoothed_center: (f64, f64),
    /// Mean per-frame displacement over the velocity window.
    pub velocity: (f64, f64),
    pub first_seen_frame: u64,
    pub last_seen_frame: u64,
    /// Frames in a row without a matching box.
    pub consecutive_misses: u32,
    pub state: TrackState,
}

impl TrackedObject {
    fn new(id: u64, motion_box: Rect, frame_index: u64, max_points: usize) -> Self {
        let center = motion_box.center();
        let mut trajectory = VecDeque::with_capacity(max_points);
        trajectory.push_back(center);
        Self {
            id,
            current_box: motion_box,
            trajectory,
            smoothed_center: center,
            velocity: (0.0, 0.0),
            first_seen_frame: frame_index,
            last_seen_frame: frame_index,
            consecutive_misses: 0,
            state: TrackState::New,
        }
    }

    fn update(&mut self, motion_box: Rect, frame_index: u64, config: &TrackerConfig) {
        self.current_box = motion_box;
        let (x, y) = motion_box.center();
        let (sx, sy) = self.smoothed_center;
        let f = config.smoothing_factor;
        self.smoothed_center = (sx * f + x * (1.0 - f), sy * f + y * (1.0 - f));
        self.trajectory.push_back(self.smoothed_center);
        while self.trajectory.len() > config.max_trajectory_points {
            self.trajectory.pop_front();
        }
        self.velocity = windowed_velocity(&self.trajectory, config.velocity_window);
        self.last_seen_frame = frame_index;
        self.consecutive_misses = 0;
        self.state = TrackState::Tracked;
    }

    pub fn center(&self) -> (f64, f64) {
        self.current_box.center()
    }

}

/// Displacement across the last `window` points divided by the number of steps.
fn windowed_velocity(trajectory: &VecDeque<(f64, f64)>, window: usize) -> (f64, f64) {
    let n = trajectory.len().min(window.max(2));
    if n < 2 {
        return (0.0, 0.0);
    }
    let newest = trajectory[trajectory.len() - 1];
    let oldest = trajectory[trajectory.len() - n];
    let steps = (n - 1) as f64;
    ((newest.0 - oldest.0) / steps, (newest.1 - oldest.1) / steps)
}

/// Manages the table of `TrackedObject`s from one frame to the next.
pub struct MotionTracker {
    config: TrackerConfig,
    /// Objects currently tracked, ordered by id.
    objects: Vec<TrackedObject>,
    /// Ids removed on the most recent update.
    lost_object_ids: Vec<u64>,
    /// Ensures each new object gets a unique id.
    next_id: u64,
    /// Boxes of recent frames, newest last, kept for motion clustering.
    history: VecDeque<Vec<Rect>>,
    span: Span,
}

impl MotionTracker {
    pub fn new(config: TrackerConfig, span: Span) -> Self {
        Self {
            config,
            objects: Vec::new(),
            lost_object_ids: Vec::new(),
            next_id: 0,
            history: VecDeque::new(),
            span,
        }
    }

    pub fn objects(&self) -> &[TrackedObject] {
        &self.objects
    }

    pub fn lost_object_ids(&self) -> &[u64] {
        &self.lost_object_ids
    }

    /// Updates the table with the motion boxes of one frame.
    pub fn update(&mut self, boxes: &[MotionBox], frame_index: u64) -> &[TrackedObject] {
        let mut boxes: Vec<Rect> = if self.config.spatial_merging {
            merge_nearby_boxes(
                boxes,
                self.config.spatial_merge_distance,
                self.config.spatial_merge_overlap,
            )
        } else {
            boxes.to_vec()
        };
        if self.config.motion_clustering {
            boxes = self.cluster_by_motion(boxes, frame_index);
        }
        let boxes = boxes.as_slice();

        // --- 1. Matching ---
        // (distance, id, object, box)
        let mut candidates: Vec<(f64, u64, usize, usize)> = Vec::new();
        for (i, object) in self.objects.iter().enumerate() {
            for (j, b) in boxes.iter().enumerate() {
                let distance = object.current_box.center_distance(b);
                let overlap = object
                    .current_box
                    .overlap(b, self.config.tracking_overlap_metric);
                if distance <= self.config.max_tracking_distance
                    || overlap >= self.config.tracking_overlap_threshold
                {
                    candidates.push((distance, object.id, i, j));
                }
            }
        }
        candidates.sort_by(|a, b| {
            a.0.total_cmp(&b.0)
                .then(a.1.cmp(&b.1))
                .then(a.3.cmp(&b.3))
        });

        let mut matched_objects: HashSet<usize> = HashSet::new();
        let mut matched_boxes: HashSet<usize> = HashSet::new();
        let mut matches: Vec<(usize, usize)> = Vec::new();
        for &(_, _, i, j) in &candidates {
            if matched_objects.contains(&i) || matched_boxes.contains(&j) {
                continue;
            }
            matched_objects.insert(i);
            matched_boxes.insert(j);
            matches.push((i, j));
        }

        // --- 2. State Updating ---
        for &(i, j) in &matches {
            self.objects[i].update(boxes[j], frame_index, &self.config);
        }

        self.lost_object_ids.clear();
        let max_misses = self.config.max_misses;
        let mut survivors = Vec::with_capacity(self.objects.len() + boxes.len());
        for (i, mut object) in self.objects.drain(..).enumerate() {
            if !matched_objects.contains(&i) {
                object.consecutive_misses += 1;
                object.state = TrackState::Stale;
                if object.consecutive_misses > max_misses {
                    self.lost_object_ids.push(object.id);
                    continue;
                }
            }
            survivors.push(object);
        }

        // --- 3. Birth ---
        let born_before = self.next_id;
        for (j, b) in boxes.iter().enumerate() {
            if !matched_boxes.contains(&j) {
                survivors.push(TrackedObject::new(
                    self.next_id,
                    *b,
                    frame_index,
                    self.config.max_trajectory_points,
                ));
                self.next_id += 1;
            }
        }

        self.objects = survivors;
        if !self.lost_object_ids.is_empty() {
            debug!(
                parent: &self.span,
                frame = frame_index,
                lost = ?self.lost_object_ids,
                "tracked objects removed"
            );
        }
        trace!(
            parent: &self.span,
            frame = frame_index,
            boxes = boxes.len(),
            matched = matches.len(),
            born = self.next_id - born_before,
            tracked = self.objects.len(),
            "tracker updated"
        );
        &self.objects
    }

    /// Fuses boxes that lie within `max_tracking_distance` of a seed box and move
    /// in a direction at least `motion_similarity_threshold` (cosine) alike.
    fn cluster_by_motion(&mut self, boxes: Vec<Rect>, frame_index: u64) -> Vec<Rect> {
        if boxes.is_empty() {
            return boxes;
        }
        let reach = self.config.max_tracking_distance;
        let clustered = if self.history.is_empty() {
            boxes
        } else {
            let motions: Vec<(f64, f64)> = boxes
                .iter()
                .map(|b| motion_vector(b, &self.history, reach))
                .collect();
            let mut used = vec![false; boxes.len()];
            let mut clustered = Vec::with_capacity(boxes.len());
            for i in 0..boxes.len() {
                if used[i] {
                    continue;
                }
                used[i] = true;
                let mut cluster = boxes[i];
                for j in (i + 1)..boxes.len() {
                    if used[j] || boxes[i].center_distance(&boxes[j]) > reach {
                        continue;
                    }
                    let similarity = cosine_similarity(motions[i], motions[j]);
                    if similarity >= self.config.motion_similarity_threshold {
                        used[j] = true;
                        cluster = cluster.union(&boxes[j]);
                    }
                }
                clustered.push(cluster);
            }
            if clustered.len() < boxes.len() {
                debug!(
                    parent: &self.span,
                    frame = frame_index,
                    before = boxes.len(),
                    after = clustered.len(),
                    "boxes clustered by motion"
                );
            }
            clustered
        };

        self.history.push_back(clustered.clone());
        while self.history.len() > self.config.motion_history_frames {
            self.history.pop_front();
        }
        clustered
    }
}

/// Mean per-frame displacement of `current`, found by chaining to the closest box
/// within `reach` in each older frame of `history` until the chain breaks.
fn motion_vector(current: &Rect, history: &VecDeque<Vec<Rect>>, reach: f64) -> (f64, f64) {
    let start = current.center();
    let mut point = start;
    let mut hops = 0u32;
    for frame in history.iter().rev() {
        let closest = frame
            .iter()
            .map(|b| b.center())
            .map(|c| (((c.0 - point.0).powi(2) + (c.1 - point.1).powi(2)).sqrt(), c))
            .filter(|(d, _)| *d <= reach)
            .min_by(|a, b| a.0.total_cmp(&b.0));
        let Some((_, center)) = closest else {
            break;
        };
        point = center;
        hops += 1;
    }
    if hops == 0 {
        return (0.0, 0.0);
    }
    let steps = f64::from(hops);
    ((start.0 - point.0) / steps, (start.1 - point.1) / steps)
}

/// Cosine of the angle between two vectors; 0 when either is zero.
fn cosine_similarity(a: (f64, f64), b: (f64, f64)) -> f64 {
    let norm = (a.0.hypot(a.1)) * (b.0.hypot(b.1));
    if norm == 0.0 {
        return 0.0;
    }
    (a.0 * b.0 + a.1 * b.1) / norm
}

/// Repeatedly merges boxes that are close or overlapping into their union.
pub fn merge_nearby_boxes(boxes: &[Rect], max_distance: f64, min_iou: f64) -> Vec<Rect> {
    let mut merged: Vec<Rect> = boxes.to_vec();
    loop {
        let mut pair = None;
        'search: for i in 0..merged.len() {
            for j in (i + 1)..merged.len() {
                if merged[i].center_distance(&merged[j]) <= max_distance
                    || merged[i].iou(&merged[j]) >= min_iou
                {
                    pair = Some((i, j));
                    break 'search;
                }
            }
        }
        let Some((i, j)) = pair else {
            return merged;
        };
        let absorbed = merged.remove(j);
        merged[i] = merged[i].union(&absorbed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(max_misses: u32) -> MotionTracker {
        let config = TrackerConfig {
            max_misses,
            smoothing_factor: 0.0,
            ..TrackerConfig::default()
        };
        MotionTracker::new(config, Span::none())
    }

    fn clustering_tracker() -> MotionTracker {
        let config = TrackerConfig {
            motion_clustering: true,
            smoothing_factor: 0.0,
            ..TrackerConfig::default()
        };
        MotionTracker::new(config, Span::none())
    }

    #[test]
    fn id_is_stable_while_box_moves_within_tolerance() {
        let mut t = tracker(3);
        t.update(&[Rect::new(100, 100, 20, 20)], 0);
        let id = t.objects()[0].id;
        for f in 1..10 {
            let objects = t.update(&[Rect::new(100 + 15 * f as i32, 100, 20, 20)], f);
            assert_eq!(objects.len(), 1);
            assert_eq!(objects[0].id, id);
            assert_eq!(objects[0].state, TrackState::Tracked);
        }
        let object = &t.objects()[0];
        assert_eq!(object.velocity, (15.0, 0.0));
        assert_eq!(object.first_seen_frame, 0);
        assert_eq!(object.last_seen_frame, 9);
    }

    #[test]
    fn removed_exactly_after_exceeding_miss_limit() {
        let mut t = tracker(2);
        t.update(&[Rect::new(0, 0, 10, 10)], 0);
        t.update(&[], 1);
        assert_eq!(t.objects()[0].state, TrackState::Stale);
        assert_eq!(t.objects()[0].consecutive_misses, 1);
        t.update(&[], 2);
        assert_eq!(t.objects().len(), 1);
        assert!(t.lost_object_ids().is_empty());
        t.update(&[], 3);
        assert!(t.objects().is_empty());
        assert_eq!(t.lost_object_ids(), &[0]);
        t.update(&[], 4);
        assert!(t.lost_object_ids().is_empty());
    }

    #[test]
    fn stale_object_is_recovered_and_misses_reset() {
        let mut t = tracker(5);
        t.update(&[Rect::new(50, 50, 10, 10)], 0);
        t.update(&[], 1);
        t.update(&[Rect::new(55, 50, 10, 10)], 2);
        let object = &t.objects()[0];
        assert_eq!(object.id, 0);
        assert_eq!(object.consecutive_misses, 0);
        assert_eq!(object.state, TrackState::Tracked);
    }

    #[test]
    fn far_box_spawns_new_object() {
        let mut t = tracker(5);
        t.update(&[Rect::new(0, 0, 10, 10)], 0);
        let objects = t.update(&[Rect::new(500, 500, 10, 10)], 1);
        assert_eq!(objects.len(), 2);
        let new = objects.iter().find(|o| o.id == 1).unwrap();
        assert_eq!(new.state, TrackState::New);
    }

    #[test]
    fn nearest_box_wins_and_ties_go_to_lower_id() {
        let mut t = tracker(5);
        t.update(&[Rect::new(0, 0, 10, 10), Rect::new(40, 0, 10, 10)], 0);
        // One box exactly between both objects: equal distance, object 0 claims it.
        let objects = t.update(&[Rect::new(20, 0, 10, 10)], 1);
        let claimed = objects.iter().find(|o| o.state == TrackState::Tracked).unwrap();
        assert_eq!(claimed.id, 0);
        assert_eq!(claimed.current_box, Rect::new(20, 0, 10, 10));
    }

    #[test]
    fn trajectory_is_capped() {
        let mut t = tracker(5);
        for f in 0..50 {
            t.update(&[Rect::new(f as i32, 0, 10, 10)], f);
        }
        assert_eq!(t.objects()[0].trajectory.len(), 30);
    }

    #[test]
    fn spatial_merging_unions_close_boxes() {
        let merged = merge_nearby_boxes(
            &[Rect::new(0, 0, 10, 10), Rect::new(20, 0, 10, 10), Rect::new(300, 300, 5, 5)],
            50.0,
            0.3,
        );
        assert_eq!(merged, vec![Rect::new(0, 0, 30, 10), Rect::new(300, 300, 5, 5)]);
    }

    #[test]
    fn smoothed_center_lags_behind_the_box() {
        let mut t = MotionTracker::new(TrackerConfig::default(), Span::none());
        t.update(&[Rect::new(100, 100, 10, 10)], 0);
        assert_eq!(t.objects()[0].smoothed_center, (105.0, 105.0));

        t.update(&[Rect::new(150, 100, 10, 10)], 1);
        let object = &t.objects()[0];
        assert_eq!(object.center(), (155.0, 105.0));
        let (sx, sy) = object.smoothed_center;
        assert!((sx - 125.0).abs() < 1e-9, "{sx}");
        assert!((sy - 105.0).abs() < 1e-9, "{sy}");
        assert_eq!(object.trajectory.back(), Some(&object.smoothed_center));
        assert!((object.velocity.0 - 20.0).abs() < 1e-9);
    }

    #[test]
    fn boxes_moving_together_are_clustered() {
        let mut t = clustering_tracker();
        t.update(&[Rect::new(100, 100, 10, 10), Rect::new(140, 100, 10, 10)], 0);
        assert_eq!(t.objects().len(), 2);

        let objects = t.update(&[Rect::new(110, 100, 10, 10), Rect::new(150, 100, 10, 10)], 1);
        let tracked: Vec<_> = objects
            .iter()
            .filter(|o| o.state == TrackState::Tracked)
            .collect();
        assert_eq!(tracked.len(), 1);
        assert_eq!(tracked[0].id, 1);
        assert_eq!(tracked[0].current_box, Rect::new(110, 100, 50, 10));
    }

    #[test]
    fn boxes_moving_apart_stay_separate() {
        let mut t = clustering_tracker();
        t.update(&[Rect::new(100, 100, 10, 10), Rect::new(140, 100, 10, 10)], 0);
        let objects = t.update(&[Rect::new(110, 100, 10, 10), Rect::new(130, 100, 10, 10)], 1);
        assert_eq!(objects.len(), 2);
        assert!(objects.iter().all(|o| o.state == TrackState::Tracked));
    }

    #[test]
    fn first_frame_is_never_clustered() {
        let mut t = clustering_tracker();
        let objects = t.update(&[Rect::new(100, 100, 10, 10), Rect::new(120, 100, 10, 10)], 0);
        assert_eq!(objects.len(), 2);
    }

    #[test]
    fn cosine_of_zero_motion_is_zero() {
        assert_eq!(cosine_similarity((0.0, 0.0), (3.0, 4.0)), 0.0);
        assert!((cosine_similarity((1.0, 0.0), (2.0, 0.0)) - 1.0).abs() < 1e-12);
        assert!((cosine_similarity((1.0, 0.0), (-1.0, 0.0)) + 1.0).abs() < 1e-12);
    }
}
