// THEORY:
// The `RegionConsolidator` is the final layer. It turns the tracker's objects into
// a small set of stable, classifier-sized regions so that the expensive classifier
// only ever looks at the parts of the frame where something is moving.
//
// It owns a persistent region table and runs one pass per frame:
//
// 0.  **Ageing**: every region counts one more frame since its last update and
//     forgets members that the tracker no longer knows.
// 1.  **Proximity Grouping**: objects are grouped by mutual center distance
//     (`proximity::group_by_proximity`).
// 2.  **Group Filtering**: groups smaller than `min_objects_per_region` are dropped.
// 3.  **Region Shaping**: each group's union box is expanded and squared toward the
//     ideal classifier size (`region_layout::shape_region_box`). Shaped groups
//     that overlap enough are fused and reshaped from their combined members, until
//     no two overlap.
// 4.  **Table Update**: each shaped group refreshes the region that holds most of
//     its members, or failing that the one it overlaps best, or is inserted as a
//     new region. A refreshed region takes the group's box and members outright.
//     Members it lost to no other group are split off into regions of their own.
//     Regions nobody refreshed give up grouped members and keep covering the rest.
// 5.  **Merging**: regions that overlap enough are merged under the lower id. A
//     region holding a group keeps that group's box and members.
// 6.  **Stale Removal**: regions not refreshed for too long are evicted.
// 7.  **Tiling**: oversized regions are emitted as tiles of the ideal size. The
//     table keeps the parent, so ids stay stable across passes.
// 8.  **Overlap Resolution**: among emitted regions that still overlap, only the
//     best-shaped one survives.
//
// Every region box covers the expanded union of its members' boxes. Each grouped
// object sits in exactly one region, whose box is that group's shaped box, so a
// second pass over the same objects reproduces the table; only
// `frames_since_update` of unrefreshed regions moves on.

use crate::config::ConsolidationConfig;
use crate::core_modules::geometry::{FrameSize, Rect, union_all};
use crate::core_modules::proximity::proximity::group_by_proximity;
use crate::core_modules::region_layout::{
    RankedBox, SizeTarget, resolve_overlaps, shape_region_box, split_into_tiles,
};
use crate::core_modules::tracker::TrackedObject;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{Span, debug, trace};

/// A classifier-ready region grouping nearby tracked objects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsolidatedRegion {
    /// Stable id. Tiles carry the id of the region they were cut from.
    pub id: u64,
    /// `(row, col)` when this is a tile of an oversized region.
    pub tile: Option<(u32, u32)>,
    pub bounding_box: Rect,
    /// Ids of the tracked objects this region covers.
    pub member_object_ids: BTreeSet<u64>,
    pub frames_since_update: u32,
    pub creation_frame: u64,
}

impl ConsolidatedRegion {
    pub fn member_count(&self) -> usize {
        self.member_object_ids.len()
    }

    fn sort_key(&self) -> (u64, Option<(u32, u32)>) {
        (self.id, self.tile)
    }
}

struct Candidate {
    bounding_box: Rect,
    members: BTreeSet<u64>,
}

pub struct RegionConsolidator {
    config: ConsolidationConfig,
    target: SizeTarget,
    /// Persistent regions, ordered by id.
    regions: Vec<ConsolidatedRegion>,
    next_id: u64,
    span: Span,
}

impl RegionConsolidator {
    pub fn new(config: ConsolidationConfig, span: Span) -> Self {
        let target = SizeTarget::new(config.ideal_model_region_size, config.size_tolerance_percent);
        Self {
            config,
            target,
            regions: Vec::new(),
            next_id: 0,
            span,
        }
    }

    /// The persistent region table (untiled).
    pub fn regions(&self) -> &[ConsolidatedRegion] {
        &self.regions
    }

    /// Runs one consolidation pass and returns the regions to classify.
    pub fn consolidate(
        &mut self,
        objects: &[TrackedObject],
        frame: FrameSize,
        frame_index: u64,
    ) -> Vec<ConsolidatedRegion> {
        let boxes: BTreeMap<u64, Rect> = objects.iter().map(|o| (o.id, o.current_box)).collect();

        // --- 0. Ageing ---
        for region in &mut self.regions {
            region.frames_since_update = region.frames_since_update.saturating_add(1);
            region.member_object_ids.retain(|id| boxes.contains_key(id));
        }

        // --- 1. Proximity Grouping ---
        let ids: Vec<u64> = boxes.keys().copied().collect();
        let centers: Vec<(f64, f64)> = boxes.values().map(Rect::center).collect();
        let groups = group_by_proximity(&centers, self.config.max_distance_threshold);

        // --- 2. Group Filtering ---
        // --- 3. Region Shaping ---
        let shaped: Vec<Candidate> = groups
            .into_iter()
            .filter(|g| g.len() >= self.config.min_objects_per_region)
            .map(|g| self.candidate_for(g.iter().map(|&i| ids[i]).collect(), &boxes, frame))
            .collect();
        let candidates = self.merge_candidates(shaped, &boxes, frame);
        let grouped: BTreeSet<u64> = candidates
            .iter()
            .flat_map(|c| c.members.iter().copied())
            .collect();

        // --- 4. Table Update ---
        self.update_table(candidates, &grouped, &boxes, frame, frame_index);

        // --- 5. Merging ---
        self.merge_overlapping(&grouped, &boxes, frame);

        // --- 6. Stale Removal ---
        let limit = self.config.max_frames_without_update;
        let before = self.regions.len();
        self.regions.retain(|r| r.frames_since_update <= limit);
        if self.regions.len() < before {
            debug!(
                parent: &self.span,
                frame = frame_index,
                evicted = before - self.regions.len(),
                "stale regions evicted"
            );
        }

        // --- 7. Tiling ---
        let emitted = self.emit_tiles(&boxes);

        // --- 8. Overlap Resolution ---
        let ranked: Vec<RankedBox> = emitted
            .iter()
            .map(|r| RankedBox {
                rect: r.bounding_box,
                members: r.member_count(),
                order: r.sort_key(),
            })
            .collect();
        let keep = resolve_overlaps(&ranked, self.target, self.config.overlap_threshold);
        let mut output: Vec<ConsolidatedRegion> =
            keep.into_iter().map(|i| emitted[i].clone()).collect();
        output.retain(|r| !r.bounding_box.is_empty());
        output.sort_by_key(ConsolidatedRegion::sort_key);

        trace!(
            parent: &self.span,
            frame = frame_index,
            objects = objects.len(),
            table = self.regions.len(),
            emitted = output.len(),
            "consolidation pass complete"
        );
        output
    }

    fn candidate_for(
        &self,
        members: BTreeSet<u64>,
        boxes: &BTreeMap<u64, Rect>,
        frame: FrameSize,
    ) -> Candidate {
        let union = union_all(members.iter().filter_map(|id| boxes.get(id))).unwrap_or_default();
        Candidate {
            bounding_box: shape_region_box(
                union,
                self.config.region_expansion_factor,
                self.target,
                frame,
            ),
            members,
        }
    }

    /// Fuses shaped groups that overlap by `overlap_threshold` or more, reshaping
    /// each fusion from all of its members.
    fn merge_candidates(
        &self,
        mut candidates: Vec<Candidate>,
        boxes: &BTreeMap<u64, Rect>,
        frame: FrameSize,
    ) -> Vec<Candidate> {
        while let Some((i, j)) = first_overlapping_pair(
            candidates.iter().map(|c| c.bounding_box),
            self.config.overlap_threshold,
        ) {
            let absorbed = candidates.remove(j);
            let mut members = std::mem::take(&mut candidates[i].members);
            members.extend(absorbed.members);
            candidates[i] = self.candidate_for(members, boxes, frame);
        }
        candidates
    }

    /// Expanded union of the members' boxes, clipped to the frame.
    fn cover(
        &self,
        members: &BTreeSet<u64>,
        boxes: &BTreeMap<u64, Rect>,
        frame: FrameSize,
    ) -> Option<Rect> {
        let expansion = self.config.region_expansion_factor;
        union_all(members.iter().filter_map(|id| boxes.get(id)))
            .map(|u| u.clamp_to(frame).expand(expansion).clamp_to(frame))
    }

    fn update_table(
        &mut self,
        candidates: Vec<Candidate>,
        grouped: &BTreeSet<u64>,
        boxes: &BTreeMap<u64, Rect>,
        frame: FrameSize,
        frame_index: u64,
    ) {
        let existing = self.regions.len();
        // Members each refreshed region had before this pass.
        let mut previous_members: BTreeMap<usize, BTreeSet<u64>> = BTreeMap::new();

        for candidate in candidates {
            let best = self.regions[..existing]
                .iter()
                .enumerate()
                .filter(|(i, _)| !previous_members.contains_key(i))
                .map(|(i, r)| {
                    let shared = r.member_object_ids.intersection(&candidate.members).count();
                    let overlap = candidate
                        .bounding_box
                        .overlap(&r.bounding_box, self.config.region_match_metric);
                    (i, r.id, shared, overlap)
                })
                .filter(|&(_, _, shared, overlap)| {
                    shared > 0 || overlap >= self.config.region_match_threshold
                })
                .max_by(|a, b| {
                    a.2.cmp(&b.2)
                        .then(a.3.total_cmp(&b.3))
                        .then(b.1.cmp(&a.1))
                })
                .map(|(i, ..)| i);

            if let Some(i) = best {
                let region = &mut self.regions[i];
                previous_members.insert(i, std::mem::take(&mut region.member_object_ids));
                region.bounding_box = candidate.bounding_box;
                region.member_object_ids = candidate.members;
                region.frames_since_update = 0;
                continue;
            }
            let id = self.allocate_id();
            debug!(
                parent: &self.span,
                frame = frame_index,
                region = id,
                members = ?candidate.members,
                "region created"
            );
            self.regions.push(ConsolidatedRegion {
                id,
                tile: None,
                bounding_box: candidate.bounding_box,
                member_object_ids: candidate.members,
                frames_since_update: 0,
                creation_frame: frame_index,
            });
        }

        // Regions that were not refreshed give up members now owned by a group,
        // and stay large enough to cover those they keep.
        for i in 0..existing {
            if previous_members.contains_key(&i) {
                continue;
            }
            let mut members = std::mem::take(&mut self.regions[i].member_object_ids);
            members.retain(|id| !grouped.contains(id));
            if let Some(needed) = self.cover(&members, boxes, frame) {
                let region = &mut self.regions[i];
                region.bounding_box = region.bounding_box.union(&needed);
            }
            self.regions[i].member_object_ids = members;
        }

        // Members that left a refreshed region and joined no other group split off.
        for (i, before) in previous_members {
            let orphans: Vec<u64> = before
                .into_iter()
                .filter(|id| !grouped.contains(id) && boxes.contains_key(id))
                .collect();
            if orphans.is_empty() {
                continue;
            }
            let centers: Vec<(f64, f64)> = orphans.iter().map(|id| boxes[id].center()).collect();
            for group in group_by_proximity(&centers, self.config.max_distance_threshold) {
                let members: BTreeSet<u64> = group.iter().map(|&k| orphans[k]).collect();
                let candidate = self.candidate_for(members, boxes, frame);
                let id = self.allocate_id();
                debug!(
                    parent: &self.span,
                    frame = frame_index,
                    parent_region = self.regions[i].id,
                    region = id,
                    members = ?candidate.members,
                    "members split off into new region"
                );
                self.regions.push(ConsolidatedRegion {
                    id,
                    tile: None,
                    bounding_box: candidate.bounding_box,
                    member_object_ids: candidate.members,
                    frames_since_update: 0,
                    creation_frame: frame_index,
                });
            }
        }
    }

    fn merge_overlapping(
        &mut self,
        grouped: &BTreeSet<u64>,
        boxes: &BTreeMap<u64, Rect>,
        frame: FrameSize,
    ) {
        self.regions.sort_by_key(|r| r.id);
        let holds_group =
            |r: &ConsolidatedRegion| r.member_object_ids.iter().any(|id| grouped.contains(id));
        while let Some((i, j)) = first_overlapping_pair(
            self.regions.iter().map(|r| r.bounding_box),
            self.config.overlap_threshold,
        ) {
            let absorbed = self.regions.remove(j);
            trace!(
                parent: &self.span,
                keeper = self.regions[i].id,
                absorbed = absorbed.id,
                "regions merged"
            );
            let (bounding_box, members) =
                match (holds_group(&self.regions[i]), holds_group(&absorbed)) {
                    (true, false) => (
                        self.regions[i].bounding_box,
                        std::mem::take(&mut self.regions[i].member_object_ids),
                    ),
                    (false, true) => (absorbed.bounding_box, absorbed.member_object_ids),
                    _ => {
                        let mut members = std::mem::take(&mut self.regions[i].member_object_ids);
                        members.extend(absorbed.member_object_ids);
                        let mut merged = self.regions[i].bounding_box.union(&absorbed.bounding_box);
                        if let Some(needed) = self.cover(&members, boxes, frame) {
                            merged = merged.union(&needed);
                        }
                        (merged, members)
                    }
                };
            let keeper = &mut self.regions[i];
            keeper.bounding_box = bounding_box;
            keeper.member_object_ids = members;
            keeper.frames_since_update =
                keeper.frames_since_update.min(absorbed.frames_since_update);
            keeper.creation_frame = keeper.creation_frame.min(absorbed.creation_frame);
        }
    }

    fn emit_tiles(&self, boxes: &BTreeMap<u64, Rect>) -> Vec<ConsolidatedRegion> {
        let mut emitted = Vec::with_capacity(self.regions.len());
        for region in &self.regions {
            let oversized = self.target.is_oversized(&region.bounding_box);
            if !self.config.split_oversized_regions || !oversized {
                emitted.push(region.clone());
                continue;
            }
            for (row, col, rect) in split_into_tiles(region.bounding_box, self.target.ideal) {
                let members = region
                    .member_object_ids
                    .iter()
                    .copied()
                    .filter(|id| boxes.get(id).is_some_and(|b| b.intersects(&rect)))
                    .collect();
                emitted.push(ConsolidatedRegion {
                    tile: Some((row, col)),
                    bounding_box: rect,
                    member_object_ids: members,
                    ..region.clone()
                });
            }
        }
        emitted
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

/// First pair `(i, j)`, `i < j`, whose overlap-with-smaller reaches `threshold`.
fn first_overlapping_pair<I>(rects: I, threshold: f64) -> Option<(usize, usize)>
where
    I: IntoIterator<Item = Rect>,
{
    let rects: Vec<Rect> = rects.into_iter().collect();
    for i in 0..rects.len() {
        for j in (i + 1)..rects.len() {
            if rects[i].overlap_with_smaller(&rects[j]) >= threshold {
                return Some((i, j));
            }
        }
    }
    None
}
