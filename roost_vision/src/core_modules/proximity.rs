// THEORY:
// Proximity grouping is the first step of region consolidation: decide which tracked
// objects belong together. Two objects belong to the same group only if *every*
// member of the group is within `max_distance` of every other (complete linkage),
// so a chain of birds strung out across the frame does not collapse into one
// huge group.
//
// The grouping is greedy and fully deterministic:
// 1.  Objects are visited in input order. The first object not yet in a group
//     seeds a new group.
// 2.  Every later, unassigned object is considered in input order and joins the
//     group if it is within `max_distance` of all current members.
//
// Two implementations produce exactly the same groups:
// - **Pairwise**: considers every later object. O(n^2), ideal for small n.
// - **Grid**: buckets objects into square cells a hair larger than
//   `max_distance`. Any object that can join a seed's group is within
//   `max_distance` of the seed, so it must sit in the seed's cell or one of its
//   eight neighbours. Only those are considered (in input order), which is
//   effectively O(n) for evenly spread objects.
//
// `group_by_proximity` picks the grid once the object count reaches
// `GRID_GROUPING_THRESHOLD`.

use std::collections::HashMap;

pub mod proximity {
    use super::*; // grid bucketing lives at module level

    /// Object count at and above which the spatial grid is used.
    pub const GRID_GROUPING_THRESHOLD: usize = 50;

    /// Groups point indices so that all members of a group are mutually within
    /// `max_distance`. Groups are listed by their lowest index; members ascend.
    pub fn group_by_proximity(centers: &[(f64, f64)], max_distance: f64) -> Vec<Vec<usize>> {
        if centers.len() < GRID_GROUPING_THRESHOLD {
            group_pairwise(centers, max_distance)
        } else {
            group_with_grid(centers, max_distance)
        }
    }

    pub fn group_pairwise(centers: &[(f64, f64)], max_distance: f64) -> Vec<Vec<usize>> {
        let n = centers.len();
        let mut assigned = vec![false; n];
        let mut groups = Vec::new();

        for seed in 0..n {
            if assigned[seed] {
                continue;
            }
            assigned[seed] = true;
            let mut group = vec![seed];
            for candidate in (seed + 1)..n {
                if !assigned[candidate] && joins(centers, &group, candidate, max_distance) {
                    assigned[candidate] = true;
                    group.push(candidate);
                }
            }
            groups.push(group);
        }
        groups
    }

    pub fn group_with_grid(centers: &[(f64, f64)], max_distance: f64) -> Vec<Vec<usize>> {
        let n = centers.len();
        let cell_size = max_distance * (1.0 + 1e-6);
        let grid = SpatialGrid::build(centers, cell_size);
        let mut assigned = vec![false; n];
        let mut groups = Vec::new();

        for seed in 0..n {
            if assigned[seed] {
                continue;
            }
            assigned[seed] = true;
            let mut group = vec![seed];

            // --- Neighbourhood candidates, in input order ---
            let mut candidates: Vec<usize> = grid
                .neighbourhood(centers[seed])
                .filter(|&c| c > seed && !assigned[c])
                .collect();
            candidates.sort_unstable();

            for candidate in candidates {
                if joins(centers, &group, candidate, max_distance) {
                    assigned[candidate] = true;
                    group.push(candidate);
                }
            }
            groups.push(group);
        }
        groups
    }

    fn joins(centers: &[(f64, f64)], group: &[usize], candidate: usize, max_distance: f64) -> bool {
        group
            .iter()
            .all(|&member| distance(centers[member], centers[candidate]) <= max_distance)
    }
}

fn distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

/// Uniform bucket grid over point indices.
struct SpatialGrid {
    cell_size: f64,
    cells: HashMap<(i64, i64), Vec<usize>>,
}

impl SpatialGrid {
    fn build(centers: &[(f64, f64)], cell_size: f64) -> Self {
        let mut cells: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
        for (i, &c) in centers.iter().enumerate() {
            cells.entry(cell_of(c, cell_size)).or_default().push(i);
        }
        Self { cell_size, cells }
    }

    /// Indices in the cell containing `point` and its eight neighbours.
    fn neighbourhood(&self, point: (f64, f64)) -> impl Iterator<Item = usize> + '_ {
        let (cx, cy) = cell_of(point, self.cell_size);
        (-1..=1)
            .flat_map(move |dy| (-1..=1).map(move |dx| (cx + dx, cy + dy)))
            .filter_map(|key| self.cells.get(&key))
            .flatten()
            .copied()
    }
}

fn cell_of(point: (f64, f64), cell_size: f64) -> (i64, i64) {
    (
        (point.0 / cell_size).floor() as i64,
        (point.1 / cell_size).floor() as i64,
    )
}

#[cfg(test)]
mod tests {
    use super::proximity::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn three_clustered_points_form_one_group() {
        let centers = [(100.0, 100.0), (130.0, 110.0), (115.0, 135.0), (700.0, 100.0)];
        let groups = group_by_proximity(&centers, 50.0);
        assert_eq!(groups, vec![vec![0, 1, 2], vec![3]]);
    }

    #[test]
    fn chain_does_not_collapse_into_one_group() {
        let centers: Vec<(f64, f64)> = (0..5).map(|i| (i as f64 * 40.0, 0.0)).collect();
        let groups = group_pairwise(&centers, 50.0);
        assert_eq!(groups, vec![vec![0, 1], vec![2, 3], vec![4]]);
    }

    #[test]
    fn grid_matches_pairwise_on_points_at_exact_threshold() {
        let centers: Vec<(f64, f64)> = (0..60)
            .map(|i| (i as f64 * 50.0, (i % 3) as f64 * 50.0))
            .collect();
        assert_eq!(group_pairwise(&centers, 50.0), group_with_grid(&centers, 50.0));
    }

    #[test]
    fn grid_and_pairwise_agree_on_random_sets() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for &n in &[0usize, 1, 7, 49, 50, 51, 120, 400] {
            for &d in &[25.0, 50.0, 150.0] {
                let centers: Vec<(f64, f64)> = (0..n)
                    .map(|_| (rng.gen_range(0.0..1920.0), rng.gen_range(0.0..1080.0)))
                    .collect();
                assert_eq!(
                    group_pairwise(&centers, d),
                    group_with_grid(&centers, d),
                    "n = {n}, d = {d}"
                );
            }
        }
    }

    #[test]
    fn dense_clusters_agree_across_regimes() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut centers = Vec::new();
        for cluster in 0..10 {
            let (cx, cy) = (cluster as f64 * 180.0 + 50.0, 300.0);
            for _ in 0..8 {
                centers.push((cx + rng.gen_range(-30.0..30.0), cy + rng.gen_range(-30.0..30.0)));
            }
        }
        assert!(centers.len() >= GRID_GROUPING_THRESHOLD);
        let grid = group_by_proximity(&centers, 100.0);
        assert_eq!(grid, group_pairwise(&centers, 100.0));
        for group in &grid {
            for &a in group {
                for &b in group {
                    let d = ((centers[a].0 - centers[b].0).powi(2)
                        + (centers[a].1 - centers[b].1).powi(2))
                    .sqrt();
                    assert!(d <= 100.0);
                }
            }
        }
    }
}
