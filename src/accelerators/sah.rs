//! Layer 1: the binned Surface Area Heuristic builder.
//!
//! The public entry point, [`build_range`], partitions a mutable slice of
//! [`BvhPrimitiveInfo`] in place and returns a small, already-flattened
//! [`Fragment`] — a dense pre-order array of [`BvhNode`]s whose internal
//! indices are local to the fragment. The caller (sequential or parallel)
//! splices fragments together by shifting indices; see
//! [`crate::accelerators::bvh`].
//!
//! Primitive order: because every split partitions the *same* backing
//! array in place (via [`partition::partition`]), by the time recursion
//! bottoms out at a leaf, `base_offset + local index` already is that
//! primitive's final resting place in the caller's primitive array. No
//! separate reordering pass is needed once the top-level call returns.

use partition::partition_index;

use crate::space::{pcomp, vcomp, Aabb, Point};

const NUM_BINS: usize = 16;
const MIN_AXIS_EXTENT: f32 = 1e-4;
const TRAVERSAL_COST: f32 = 1.0;
const INTERSECTION_COST: f32 = 1.0;

/// Bookkeeping the builder needs per primitive: where it came from, its
/// bounds, and the centroid used to bin it.
#[derive(Debug, Copy, Clone)]
pub struct BvhPrimitiveInfo {
    pub original_index: usize,
    pub bounds: Aabb,
    pub centroid: Point,
}

impl BvhPrimitiveInfo {
    pub fn new(original_index: usize, bounds: Aabb) -> BvhPrimitiveInfo {
        BvhPrimitiveInfo {
            original_index,
            bounds,
            centroid: bounds.center(),
        }
    }
}

/// A flattened node as produced by the builder: a leaf has
/// `primitive_count > 0` and both children set to `-1`; an internal node
/// has `primitive_count = -1` and both children `>= 0`, indexing into the
/// *same* fragment/array this node lives in.
#[derive(Debug, Copy, Clone)]
pub struct BvhNode {
    pub bounds: Aabb,
    pub left_child: i32,
    pub right_child: i32,
    pub primitive_start: i32,
    pub primitive_count: i32,
}

impl BvhNode {
    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.primitive_count > 0
    }
}

/// A dense pre-order node array produced for one subtree. `nodes[0]` is
/// always that subtree's root.
pub struct Fragment {
    pub nodes: Vec<BvhNode>,
}

impl Fragment {
    pub fn bounds(&self) -> Aabb {
        self.nodes[0].bounds
    }
}

#[derive(Copy, Clone)]
struct BinInfo {
    count: usize,
    bounds: Aabb,
}

impl BinInfo {
    fn empty() -> BinInfo {
        BinInfo {
            count: 0,
            bounds: Aabb::undefined(),
        }
    }
}

enum Split {
    Leaf,
    Binned { axis: usize, threshold: f32 },
    Median { axis: usize },
}

/// Build the subtree for `prim_info`, recursing sequentially. Used both as
/// the whole build for `Bvh::build` and as the tail of `build_parallel`
/// once a branch falls below the parallel thresholds.
pub fn build_range(prim_info: &mut [BvhPrimitiveInfo], base_offset: usize, max_leaf_size: usize) -> Fragment {
    build_range_impl(prim_info, base_offset, max_leaf_size, 0, None)
}

/// Parallel thresholds consumed by [`build_range_parallel`].
pub struct ParallelConfig {
    pub task_threshold: usize,
    pub depth_threshold: usize,
}

/// Build the subtree for `prim_info`, forking onto `rayon::join` for the
/// two children while the slice is large and shallow enough per
/// `cfg`, falling back to sequential recursion otherwise.
pub fn build_range_parallel(
    prim_info: &mut [BvhPrimitiveInfo],
    base_offset: usize,
    max_leaf_size: usize,
    cfg: &ParallelConfig,
) -> Fragment {
    build_range_impl(prim_info, base_offset, max_leaf_size, 0, Some(cfg))
}

fn build_range_impl(
    prim_info: &mut [BvhPrimitiveInfo],
    base_offset: usize,
    max_leaf_size: usize,
    depth: usize,
    parallel: Option<&ParallelConfig>,
) -> Fragment {
    let n = prim_info.len();
    let bounds = prim_info.iter().fold(Aabb::undefined(), |b, p| b.union(&p.bounds));

    if n <= max_leaf_size {
        return Fragment {
            nodes: vec![make_leaf(prim_info, base_offset, bounds)],
        };
    }

    let split = choose_split(prim_info, &bounds, max_leaf_size);
    let (axis, mid) = match split {
        Split::Leaf => {
            return Fragment {
                nodes: vec![make_leaf(prim_info, base_offset, bounds)],
            }
        }
        Split::Binned { axis, threshold } => {
            let mid = partition_index(prim_info, |p| pcomp(p.centroid, axis) < threshold);
            if mid == 0 || mid == n {
                median_split(prim_info, &bounds, max_leaf_size)
            } else {
                (axis, mid)
            }
        }
        Split::Median { axis } => median_split_with_axis(prim_info, axis),
    };

    if mid == 0 || mid == n {
        // Even the median fallback degenerated (all primitives share one
        // centroid on every axis): emit a leaf rather than loop forever.
        return Fragment {
            nodes: vec![make_leaf(prim_info, base_offset, bounds)],
        };
    }

    let (left_info, right_info) = prim_info.split_at_mut(mid);
    let right_base = base_offset + mid;

    let go_parallel = parallel
        .map(|cfg| depth < cfg.depth_threshold && n >= cfg.task_threshold)
        .unwrap_or(false);

    let (left, right) = if go_parallel {
        let cfg = parallel.unwrap();
        rayon::join(
            || build_range_impl(left_info, base_offset, max_leaf_size, depth + 1, Some(cfg)),
            || build_range_impl(right_info, right_base, max_leaf_size, depth + 1, Some(cfg)),
        )
    } else {
        (
            build_range_impl(left_info, base_offset, max_leaf_size, depth + 1, parallel),
            build_range_impl(right_info, right_base, max_leaf_size, depth + 1, parallel),
        )
    };

    let _ = axis;
    Fragment {
        nodes: splice(left, right),
    }
}

fn make_leaf(prim_info: &[BvhPrimitiveInfo], base_offset: usize, bounds: Aabb) -> BvhNode {
    // Must be recomputed from the enclosed primitives, not derived from
    // the centroid union: degenerate leaves reached via the median
    // fallback path still need tight bounds.
    BvhNode {
        bounds,
        left_child: -1,
        right_child: -1,
        primitive_start: base_offset as i32,
        primitive_count: prim_info.len() as i32,
    }
}

fn choose_split(prim_info: &[BvhPrimitiveInfo], bounds: &Aabb, max_leaf_size: usize) -> Split {
    let centroid_bounds = prim_info
        .iter()
        .fold(Aabb::undefined(), |b, p| b.union_point(p.centroid));
    let extent = centroid_bounds.size();

    let mut best_cost = f32::INFINITY;
    let mut best_axis = 0usize;
    let mut best_bin = 0usize;
    let mut found = false;

    for axis in 0..3 {
        let axis_extent = vcomp(extent, axis);
        if axis_extent < MIN_AXIS_EXTENT {
            // Contributes infinite cost: skip without touching bins.
            continue;
        }

        let mut bins = [BinInfo::empty(); NUM_BINS];
        let axis_min = pcomp(centroid_bounds.min, axis);
        let scale = NUM_BINS as f32 / axis_extent;

        for p in prim_info {
            let mut b = ((pcomp(p.centroid, axis) - axis_min) * scale) as isize;
            if b < 0 {
                b = 0;
            }
            if b as usize >= NUM_BINS {
                b = NUM_BINS as isize - 1;
            }
            let b = b as usize;
            bins[b].count += 1;
            bins[b].bounds = bins[b].bounds.union(&p.bounds);
        }

        let mut left_count = [0usize; NUM_BINS];
        let mut left_bounds = [Aabb::undefined(); NUM_BINS];
        let mut acc_count = 0;
        let mut acc_bounds = Aabb::undefined();
        for i in 0..NUM_BINS {
            acc_count += bins[i].count;
            acc_bounds = acc_bounds.union(&bins[i].bounds);
            left_count[i] = acc_count;
            left_bounds[i] = acc_bounds;
        }

        let mut right_count = [0usize; NUM_BINS];
        let mut right_bounds = [Aabb::undefined(); NUM_BINS];
        let mut acc_count = 0;
        let mut acc_bounds = Aabb::undefined();
        for i in (0..NUM_BINS).rev() {
            acc_count += bins[i].count;
            acc_bounds = acc_bounds.union(&bins[i].bounds);
            right_count[i] = acc_count;
            right_bounds[i] = acc_bounds;
        }

        let parent_area = bounds.surface_area();
        for i in 0..NUM_BINS - 1 {
            let n_l = left_count[i];
            let n_r = right_count[i + 1];
            if n_l == 0 || n_r == 0 {
                continue;
            }
            let cost = if parent_area == 0.0 {
                f32::INFINITY
            } else {
                TRAVERSAL_COST
                    + INTERSECTION_COST
                        * (left_bounds[i].surface_area() * n_l as f32
                            + right_bounds[i + 1].surface_area() * n_r as f32)
                        / parent_area
            };

            if cost < best_cost {
                best_cost = cost;
                best_axis = axis;
                best_bin = i;
                found = true;
            }
        }
    }

    let leaf_cost = INTERSECTION_COST * prim_info.len() as f32;
    if !found || best_cost >= leaf_cost {
        if prim_info.len() <= max_leaf_size {
            return Split::Leaf;
        }
        return Split::Median {
            axis: centroid_bounds.maximum_extent(),
        };
    }

    let axis_extent = vcomp(extent, best_axis);
    let axis_min = pcomp(centroid_bounds.min, best_axis);
    let scale = NUM_BINS as f32 / axis_extent;
    let threshold = axis_min + (best_bin as f32 + 1.0) / scale;
    Split::Binned {
        axis: best_axis,
        threshold,
    }
}

/// Sort-based median split on the axis of greatest centroid extent.
fn median_split(prim_info: &mut [BvhPrimitiveInfo], bounds: &Aabb, _max_leaf_size: usize) -> (usize, usize) {
    let _ = bounds;
    let centroid_bounds = prim_info
        .iter()
        .fold(Aabb::undefined(), |b, p| b.union_point(p.centroid));
    let axis = centroid_bounds.maximum_extent();
    median_split_with_axis(prim_info, axis)
}

fn median_split_with_axis(prim_info: &mut [BvhPrimitiveInfo], axis: usize) -> (usize, usize) {
    let mid = prim_info.len() / 2;
    prim_info.select_nth_unstable_by(mid, |a, b| {
        pcomp(a.centroid, axis)
            .partial_cmp(&pcomp(b.centroid, axis))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    (axis, mid)
}

/// Combine two already-flattened fragments under a new root, shifting the
/// right fragment's internal indices past the left fragment's (and both
/// past the root node at index 0).
fn splice(left: Fragment, right: Fragment) -> Vec<BvhNode> {
    let root_bounds = left.bounds().union(&right.bounds());
    let left_len = left.nodes.len();

    let mut nodes = Vec::with_capacity(1 + left.nodes.len() + right.nodes.len());
    nodes.push(BvhNode {
        bounds: root_bounds,
        left_child: 1,
        right_child: 1 + left_len as i32,
        primitive_start: -1,
        primitive_count: -1,
    });

    for mut node in left.nodes {
        shift(&mut node, 1);
        nodes.push(node);
    }
    for mut node in right.nodes {
        shift(&mut node, 1 + left_len as i32);
        nodes.push(node);
    }
    nodes
}

#[inline]
fn shift(node: &mut BvhNode, offset: i32) {
    if !node.is_leaf() {
        node.left_child += offset;
        node.right_child += offset;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::Point;

    fn cube_info(i: usize, center: Point) -> BvhPrimitiveInfo {
        let half = 0.5;
        let bounds = Aabb::new(
            Point::new(center.x - half, center.y - half, center.z - half),
            Point::new(center.x + half, center.y + half, center.z + half),
        );
        BvhPrimitiveInfo::new(i, bounds)
    }

    #[test]
    fn single_primitive_is_a_leaf() {
        let mut infos = vec![cube_info(0, Point::new(0.0, 0.0, 0.0))];
        let frag = build_range(&mut infos, 0, 4);
        assert_eq!(frag.nodes.len(), 1);
        assert!(frag.nodes[0].is_leaf());
    }

    #[test]
    fn many_primitives_produce_tight_leaf_bounds() {
        let mut infos: Vec<_> = (0..20)
            .map(|i| cube_info(i, Point::new(i as f32 * 2.0, 0.0, 0.0)))
            .collect();
        let frag = build_range(&mut infos, 0, 2);
        assert!(frag.nodes.len() > 1);
        let total_prims: i32 = frag
            .nodes
            .iter()
            .filter(|n| n.is_leaf())
            .map(|n| n.primitive_count)
            .sum();
        assert_eq!(total_prims, 20);
    }
}
