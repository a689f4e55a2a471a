//! Layer 2: the flattened BVH index built on top of the [`sah`] builder,
//! plus its parallel build variant (L2').

use crate::accelerators::sah::{self, BvhNode, BvhPrimitiveInfo, ParallelConfig};
use crate::accelerators::{CachedBounds, HasBounds};
use crate::ray::Ray;
use crate::space::{ray_aabb_intersection, Aabb, Point};

/// Depth limit for every iterative, array-backed traversal stack. Bounds
/// the tree to roughly one million primitives under a balanced SAH build.
pub const STACK_DEPTH: usize = 64;

pub const DEFAULT_MAX_LEAF_SIZE: usize = 4;
pub const PARALLEL_BUILD_THRESHOLD: usize = 1000;
pub const PARALLEL_TASK_THRESHOLD: usize = 250;
pub const PARALLEL_DEPTH_THRESHOLD: usize = 4;

/// A single raycast hit: the primitive that was struck and the distance
/// along the ray at which it was struck. A miss is `None`, not a sentinel
/// value of this type — callers never need a `Default` primitive.
#[derive(Debug, Copy, Clone)]
pub struct RayHit<T> {
    pub primitive: T,
    pub t: f32,
}

/// An unordered pair of primitives from the same `Bvh`, emitted exactly
/// once by [`Bvh::find_all_overlaps`].
#[derive(Debug, Copy, Clone)]
pub struct BvhOverlapPair<T> {
    pub a: T,
    pub b: T,
}

/// An ordered pair drawn from two different BVHs, emitted by
/// [`Bvh::find_cross_overlaps`].
#[derive(Debug, Copy, Clone)]
pub struct BvhCrossPair<T, U> {
    pub a: T,
    pub b: U,
}

#[derive(Debug, Copy, Clone, Default)]
pub struct BvhStats {
    pub total_nodes: usize,
    pub leaf_nodes: usize,
    pub internal_nodes: usize,
    pub total_primitives: usize,
    pub max_leaf_size: usize,
    pub empty_leaves: usize,
}

/// A bounding volume hierarchy over items of type `T`. `T` must expose its
/// own bounds (directly, via [`crate::accelerators::Cached`], or via a
/// closure wrapped in [`crate::accelerators::BoundsFn`]) and be cheap to
/// copy, matching the fixed-size-record style of the flattened node array
/// itself.
pub struct Bvh<T: HasBounds + Copy> {
    nodes: Vec<BvhNode>,
    primitives: Vec<T>,
    node_levels: Vec<Vec<u32>>,
    max_depth: usize,
    max_leaf_size: usize,
    needs_rebuild: bool,
}

impl<T: HasBounds + Copy> Bvh<T> {
    /// An index with no nodes and no primitives. Every query on it is a
    /// no-op; every raycast reports a miss.
    pub fn empty(max_leaf_size: usize) -> Bvh<T> {
        Bvh {
            nodes: Vec::new(),
            primitives: Vec::new(),
            node_levels: Vec::new(),
            max_depth: 0,
            max_leaf_size,
            needs_rebuild: false,
        }
    }

    /// Build sequentially. Deterministic given the same input order.
    pub fn build(items: Vec<T>, max_leaf_size: usize) -> Bvh<T> {
        Self::build_with(items, max_leaf_size, |prim_info, max_leaf| {
            sah::build_range(prim_info, 0, max_leaf)
        })
    }

    /// Build using `rayon::join` to fork the two children of a split while
    /// the slice is large and shallow enough, falling back to sequential
    /// recursion below `threshold` (and for every branch once the depth or
    /// size thresholds are crossed). Returns whether the parallel path was
    /// actually taken.
    pub fn build_parallel(items: Vec<T>, max_leaf_size: usize, threshold: usize) -> (Bvh<T>, bool) {
        if items.len() < threshold {
            log::debug!(
                "{}",
                crate::error::AccelError::ParallelBuildUnavailable {
                    reason: "item count below parallel threshold",
                }
            );
            return (Self::build(items, max_leaf_size), false);
        }

        let cfg = ParallelConfig {
            task_threshold: PARALLEL_TASK_THRESHOLD,
            depth_threshold: PARALLEL_DEPTH_THRESHOLD,
        };
        let bvh = Self::build_with(items, max_leaf_size, |prim_info, max_leaf| {
            sah::build_range_parallel(prim_info, 0, max_leaf, &cfg)
        });
        (bvh, true)
    }

    fn build_with(
        items: Vec<T>,
        max_leaf_size: usize,
        build_fragment: impl FnOnce(&mut [BvhPrimitiveInfo], usize) -> sah::Fragment,
    ) -> Bvh<T> {
        if items.is_empty() {
            return Bvh::empty(max_leaf_size);
        }

        let mut prim_info: Vec<BvhPrimitiveInfo> = items
            .iter()
            .enumerate()
            .map(|(i, it)| BvhPrimitiveInfo::new(i, it.bounds()))
            .collect();

        let fragment = build_fragment(&mut prim_info, max_leaf_size);
        let primitives: Vec<T> = prim_info.iter().map(|p| items[p.original_index]).collect();
        let (node_levels, max_depth) = compute_levels(&fragment.nodes);

        Bvh {
            nodes: fragment.nodes,
            primitives,
            node_levels,
            max_depth,
            max_leaf_size,
            needs_rebuild: false,
        }
    }

    pub fn len(&self) -> usize {
        self.primitives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primitives.is_empty()
    }

    pub fn needs_rebuild(&self) -> bool {
        self.needs_rebuild
    }

    pub fn node_levels(&self) -> &[Vec<u32>] {
        &self.node_levels
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Re-tightens every node's bounds in place, keeping topology fixed.
    /// Scans in reverse dense order so every child is refit before its
    /// parent reads it (pre-order emission guarantees children have a
    /// strictly greater index than their parent).
    pub fn refit(&mut self) {
        for i in (0..self.nodes.len()).rev() {
            let node = self.nodes[i];
            let bounds = if node.is_leaf() {
                let start = node.primitive_start as usize;
                let count = node.primitive_count as usize;
                self.primitives[start..start + count]
                    .iter()
                    .fold(Aabb::undefined(), |b, p| b.union(&p.bounds()))
            } else {
                let l = &self.nodes[node.left_child as usize];
                let r = &self.nodes[node.right_child as usize];
                l.bounds.union(&r.bounds)
            };
            self.nodes[i].bounds = bounds;
        }
    }

    /// Structural invariant check used by the test suite: every internal
    /// node's children are in range and contained (within `eps`) in its
    /// bounds, and every leaf's primitive span is in range.
    pub fn validate(&self) -> bool {
        const EPS: f32 = 1e-3;
        for node in &self.nodes {
            if node.is_leaf() {
                let start = node.primitive_start;
                let count = node.primitive_count;
                if start < 0 || count <= 0 {
                    return false;
                }
                if (start + count) as usize > self.primitives.len() {
                    return false;
                }
            } else {
                let (l, r) = (node.left_child, node.right_child);
                if l < 0 || r < 0 || l as usize >= self.nodes.len() || r as usize >= self.nodes.len() {
                    return false;
                }
                let lb = self.nodes[l as usize].bounds;
                let rb = self.nodes[r as usize].bounds;
                if !node.bounds.contains_approx(&lb, EPS) || !node.bounds.contains_approx(&rb, EPS) {
                    return false;
                }
            }
        }
        true
    }

    pub fn stats(&self) -> BvhStats {
        let mut stats = BvhStats {
            max_leaf_size: self.max_leaf_size,
            total_primitives: self.primitives.len(),
            ..Default::default()
        };
        stats.total_nodes = self.nodes.len();
        for node in &self.nodes {
            if node.is_leaf() {
                stats.leaf_nodes += 1;
                if node.primitive_count == 0 {
                    stats.empty_leaves += 1;
                }
            } else {
                stats.internal_nodes += 1;
            }
        }
        stats
    }

    /// Appends `item` without touching the node array. The caller must
    /// rebuild before the next query; [`Bvh::needs_rebuild`] reports this.
    pub fn insert(&mut self, item: T) {
        self.primitives.push(item);
        self.needs_rebuild = true;
    }

    /// Silently ignored if `index` is out of range.
    pub fn remove(&mut self, index: usize) {
        if index < self.primitives.len() {
            self.primitives.remove(index);
            self.needs_rebuild = true;
        }
    }

    /// Performs the rebuild that [`Bvh::insert`]/[`Bvh::remove`] defer: runs
    /// a fresh SAH build over the current primitive set and replaces the
    /// node array with it. Clears [`Bvh::needs_rebuild`].
    pub fn rebuild(&mut self) {
        let items = std::mem::take(&mut self.primitives);
        *self = Self::build(items, self.max_leaf_size);
    }

    /// Grows the tree in place by splitting the leaf that would cost the
    /// least additional surface area to absorb `item` into two leaves: the
    /// existing one, unchanged, and a fresh one-item leaf for `item`. A
    /// full [`Bvh::refit`] follows so every ancestor's bounds catch up.
    pub fn insert_incremental(&mut self, item: T) {
        if self.nodes.is_empty() {
            *self = Bvh::build(vec![item], self.max_leaf_size);
            return;
        }

        let item_bounds = item.bounds();
        let mut idx = 0usize;
        loop {
            let node = self.nodes[idx];
            if node.is_leaf() {
                break;
            }
            let l = &self.nodes[node.left_child as usize];
            let r = &self.nodes[node.right_child as usize];
            let cost_l = l.bounds.union(&item_bounds).surface_area() - l.bounds.surface_area();
            let cost_r = r.bounds.union(&item_bounds).surface_area() - r.bounds.surface_area();
            idx = if cost_l <= cost_r {
                node.left_child as usize
            } else {
                node.right_child as usize
            };
        }

        self.primitives.push(item);
        let new_leaf_idx = self.nodes.len();
        let old_leaf = self.nodes[idx];
        self.nodes.push(old_leaf);
        self.nodes.push(BvhNode {
            bounds: item_bounds,
            left_child: -1,
            right_child: -1,
            primitive_start: (self.primitives.len() - 1) as i32,
            primitive_count: 1,
        });

        self.nodes[idx] = BvhNode {
            bounds: old_leaf.bounds.union(&item_bounds),
            left_child: new_leaf_idx as i32,
            right_child: (new_leaf_idx + 1) as i32,
            primitive_start: -1,
            primitive_count: -1,
        };

        self.refit();
        let (levels, depth) = compute_levels(&self.nodes);
        self.node_levels = levels;
        self.max_depth = depth;
    }

    pub fn query_aabb(&self, q: &Aabb, out: &mut Vec<T>) {
        self.traverse_aabb(q, out);
    }

    fn traverse_aabb(&self, q: &Aabb, out: &mut Vec<T>) {
        if self.nodes.is_empty() {
            return;
        }
        let mut stack = [0i32; STACK_DEPTH];
        let mut sp = 1usize;
        stack[0] = 0;
        while sp > 0 {
            sp -= 1;
            let node = &self.nodes[stack[sp] as usize];
            if !node.bounds.intersects(q) {
                continue;
            }
            if node.is_leaf() {
                for p in self.leaf_slice(node) {
                    if p.bounds().intersects(q) {
                        out.push(*p);
                    }
                }
            } else {
                debug_assert!(sp + 2 <= STACK_DEPTH, "BVH traversal stack overflow");
                if sp + 2 <= STACK_DEPTH {
                    stack[sp] = node.left_child;
                    stack[sp + 1] = node.right_child;
                    sp += 2;
                }
            }
        }
    }

    pub fn query_sphere(&self, center: Point, radius: f32, out: &mut Vec<T>) {
        if self.nodes.is_empty() {
            return;
        }
        let r = crate::space::Vector::new(radius, radius, radius);
        let sphere_aabb = Aabb::new(center - r, center + r);
        let mut stack = [0i32; STACK_DEPTH];
        let mut sp = 1usize;
        stack[0] = 0;
        while sp > 0 {
            sp -= 1;
            let node = &self.nodes[stack[sp] as usize];
            if !node.bounds.intersects(&sphere_aabb) {
                continue;
            }
            if node.is_leaf() {
                for p in self.leaf_slice(node) {
                    if p.bounds().sphere_intersects(center, radius) {
                        out.push(*p);
                    }
                }
            } else if sp + 2 <= STACK_DEPTH {
                stack[sp] = node.left_child;
                stack[sp + 1] = node.right_child;
                sp += 2;
            }
        }
    }

    pub fn query_ray(&self, ray: &Ray, max_dist: f32, out: &mut Vec<T>) {
        if self.nodes.is_empty() {
            return;
        }
        let mut stack = [0i32; STACK_DEPTH];
        let mut sp = 1usize;
        stack[0] = 0;
        while sp > 0 {
            sp -= 1;
            let node = &self.nodes[stack[sp] as usize];
            if ray_aabb_intersection(ray, &node.bounds, max_dist).is_none() {
                continue;
            }
            if node.is_leaf() {
                for p in self.leaf_slice(node) {
                    if ray_aabb_intersection(ray, &p.bounds(), max_dist).is_some() {
                        out.push(*p);
                    }
                }
            } else if sp + 2 <= STACK_DEPTH {
                stack[sp] = node.left_child;
                stack[sp + 1] = node.right_child;
                sp += 2;
            }
        }
    }

    /// Best-first nearest-primitive search, ranked by point-to-AABB
    /// distance (exact point-to-triangle distance is out of scope). The
    /// traversal stack is a plain growable buffer kept sorted by ascending
    /// lower bound, so a `Vec` already gives per-call, drop-on-return
    /// scratch without needing its own arena.
    pub fn query_nearest(&self, point: Point, max_dist: f32) -> Option<(T, f32)> {
        if self.nodes.is_empty() {
            return None;
        }
        let mut best: Option<T> = None;
        let mut best_dist_sq = max_dist * max_dist;

        // Sorted descending by lower bound so `pop` yields the smallest.
        let mut stack: Vec<(f32, i32)> = Vec::with_capacity(STACK_DEPTH);
        stack.push((0.0, 0));

        while let Some((lb, idx)) = stack.pop() {
            if lb > best_dist_sq {
                break;
            }
            let node = &self.nodes[idx as usize];
            if node.is_leaf() {
                for p in self.leaf_slice(node) {
                    let d2 = p.bounds().distance_to_point(point);
                    if d2 <= best_dist_sq {
                        best_dist_sq = d2;
                        best = Some(*p);
                    }
                }
            } else {
                let l = &self.nodes[node.left_child as usize];
                let r = &self.nodes[node.right_child as usize];
                let lb_l = l.bounds.distance_to_point(point);
                let lb_r = r.bounds.distance_to_point(point);
                if lb_l <= best_dist_sq {
                    insert_sorted_desc(&mut stack, (lb_l, node.left_child));
                }
                if lb_r <= best_dist_sq {
                    insert_sorted_desc(&mut stack, (lb_r, node.right_child));
                }
            }
        }

        best.map(|p| (p, best_dist_sq.sqrt()))
    }

    pub fn find_all_overlaps(&self, out: &mut Vec<BvhOverlapPair<T>>) {
        if self.nodes.is_empty() {
            return;
        }
        self.self_overlap(0, 0, out);
    }

    fn self_overlap(&self, a: i32, b: i32, out: &mut Vec<BvhOverlapPair<T>>) {
        let na = &self.nodes[a as usize];
        let nb = &self.nodes[b as usize];
        if !na.bounds.intersects(&nb.bounds) {
            return;
        }
        match (na.is_leaf(), nb.is_leaf()) {
            (true, true) => {
                let sa = self.leaf_slice(na);
                if a == b {
                    for i in 0..sa.len() {
                        for j in (i + 1)..sa.len() {
                            if sa[i].bounds().intersects(&sa[j].bounds()) {
                                out.push(BvhOverlapPair { a: sa[i], b: sa[j] });
                            }
                        }
                    }
                } else {
                    let sb = self.leaf_slice(nb);
                    for pa in sa {
                        for pb in sb {
                            if pa.bounds().intersects(&pb.bounds()) {
                                out.push(BvhOverlapPair { a: *pa, b: *pb });
                            }
                        }
                    }
                }
            }
            (true, false) => {
                self.self_overlap(a, nb.left_child, out);
                self.self_overlap(a, nb.right_child, out);
            }
            (false, true) => {
                self.self_overlap(na.left_child, b, out);
                self.self_overlap(na.right_child, b, out);
            }
            (false, false) => {
                let (l, r) = (na.left_child, na.right_child);
                if a == b {
                    self.self_overlap(l, l, out);
                    self.self_overlap(l, r, out);
                    self.self_overlap(r, r, out);
                } else {
                    let (ol, or) = (nb.left_child, nb.right_child);
                    self.self_overlap(l, ol, out);
                    self.self_overlap(l, or, out);
                    self.self_overlap(r, ol, out);
                    self.self_overlap(r, or, out);
                }
            }
        }
    }

    /// Every `(a, b)` with `a` from `self` and `b` from `other` whose
    /// bounds intersect. Unlike `find_all_overlaps`, the two trees are
    /// distinct so there is no same-node special case and no dedup.
    pub fn find_cross_overlaps<U: HasBounds + Copy>(
        &self,
        other: &Bvh<U>,
        out: &mut Vec<BvhCrossPair<T, U>>,
    ) {
        if self.nodes.is_empty() || other.nodes.is_empty() {
            return;
        }
        cross_overlap(self, 0, other, 0, out);
    }

    fn leaf_slice(&self, node: &BvhNode) -> &[T] {
        let start = node.primitive_start as usize;
        let count = node.primitive_count as usize;
        &self.primitives[start..start + count]
    }
}

impl<T: HasBounds + Copy> Bvh<T> {
    /// Closest-hit raycast: orders children front-to-back by slab near-t
    /// and tightens `max_t` as closer hits are found.
    pub fn raycast(&self, ray: &Ray, max_dist: f32, f: impl Fn(&Ray, &T, f32) -> Option<f32>) -> Option<RayHit<T>> {
        let mut best_t = max_dist;
        let mut best: Option<T> = None;

        if !self.nodes.is_empty() {
            let mut stack = [0i32; STACK_DEPTH];
            let mut sp = 1usize;
            stack[0] = 0;
            while sp > 0 {
                sp -= 1;
                let node = &self.nodes[stack[sp] as usize];
                if ray_aabb_intersection(ray, &node.bounds, best_t).is_none() {
                    continue;
                }
                if node.is_leaf() {
                    for p in self.leaf_slice(node) {
                        if let Some(t) = f(ray, p, best_t) {
                            if t < best_t {
                                best_t = t;
                                best = Some(*p);
                            }
                        }
                    }
                } else {
                    push_front_to_back(self, node, ray, best_t, &mut stack, &mut sp);
                }
            }
        }

        best.map(|primitive| RayHit { primitive, t: best_t })
    }

    /// Returns on the first accepting leaf primitive.
    pub fn raycast_single(
        &self,
        ray: &Ray,
        max_dist: f32,
        f: impl Fn(&Ray, &T, f32) -> Option<f32>,
    ) -> Option<RayHit<T>> {
        if self.nodes.is_empty() {
            return None;
        }

        let mut stack = [0i32; STACK_DEPTH];
        let mut sp = 1usize;
        stack[0] = 0;
        while sp > 0 {
            sp -= 1;
            let node = &self.nodes[stack[sp] as usize];
            if ray_aabb_intersection(ray, &node.bounds, max_dist).is_none() {
                continue;
            }
            if node.is_leaf() {
                for p in self.leaf_slice(node) {
                    if let Some(t) = f(ray, p, max_dist) {
                        return Some(RayHit { primitive: *p, t });
                    }
                }
            } else {
                push_front_to_back(self, node, ray, max_dist, &mut stack, &mut sp);
            }
        }

        None
    }

    /// Every accepting hit, stable-sorted ascending by `t`.
    pub fn raycast_multi(
        &self,
        ray: &Ray,
        max_dist: f32,
        f: impl Fn(&Ray, &T, f32) -> Option<f32>,
        out: &mut Vec<RayHit<T>>,
    ) {
        if self.nodes.is_empty() {
            return;
        }

        let mut stack = [0i32; STACK_DEPTH];
        let mut sp = 1usize;
        stack[0] = 0;
        while sp > 0 {
            sp -= 1;
            let node = &self.nodes[stack[sp] as usize];
            if ray_aabb_intersection(ray, &node.bounds, max_dist).is_none() {
                continue;
            }
            if node.is_leaf() {
                for p in self.leaf_slice(node) {
                    if let Some(t) = f(ray, p, max_dist) {
                        out.push(RayHit { primitive: *p, t });
                    }
                }
            } else if sp + 2 <= STACK_DEPTH {
                stack[sp] = node.left_child;
                stack[sp + 1] = node.right_child;
                sp += 2;
            }
        }

        out.sort_by(|a, b| a.t.partial_cmp(&b.t).unwrap_or(std::cmp::Ordering::Equal));
    }
}

/// Additional SIMD-eligible leaf path, available only when `T`'s bounds
/// are a cached field rather than a computed closure — the batched x4
/// AABB test is only worth its setup cost when reading bounds is free.
impl<T: CachedBounds + Copy> Bvh<T> {
    pub fn query_aabb_batched4(&self, q: &Aabb, out: &mut Vec<T>) {
        if self.nodes.is_empty() {
            return;
        }
        let mut stack = [0i32; STACK_DEPTH];
        let mut sp = 1usize;
        stack[0] = 0;
        while sp > 0 {
            sp -= 1;
            let node = &self.nodes[stack[sp] as usize];
            if !node.bounds.intersects(q) {
                continue;
            }
            if node.is_leaf() {
                let prims = self.leaf_slice(node);
                let mut i = 0;
                while i + 4 <= prims.len() {
                    let boxes = [
                        prims[i].bounds(),
                        prims[i + 1].bounds(),
                        prims[i + 2].bounds(),
                        prims[i + 3].bounds(),
                    ];
                    let qs = [*q, *q, *q, *q];
                    let mask = crate::space::aabb_intersects_batch4(&boxes, &qs);
                    for k in 0..4 {
                        if mask[k] {
                            out.push(prims[i + k]);
                        }
                    }
                    i += 4;
                }
                while i < prims.len() {
                    if prims[i].bounds().intersects(q) {
                        out.push(prims[i]);
                    }
                    i += 1;
                }
            } else if sp + 2 <= STACK_DEPTH {
                stack[sp] = node.left_child;
                stack[sp + 1] = node.right_child;
                sp += 2;
            }
        }
    }
}

fn push_front_to_back<T: HasBounds + Copy>(
    bvh: &Bvh<T>,
    node: &BvhNode,
    ray: &Ray,
    max_t: f32,
    stack: &mut [i32; STACK_DEPTH],
    sp: &mut usize,
) {
    let lc = node.left_child;
    let rc = node.right_child;
    let tl = ray_aabb_intersection(ray, &bvh.nodes[lc as usize].bounds, max_t);
    let tr = ray_aabb_intersection(ray, &bvh.nodes[rc as usize].bounds, max_t);

    if *sp + 2 > STACK_DEPTH {
        debug_assert!(false, "BVH traversal stack overflow");
        return;
    }

    match (tl, tr) {
        (Some((tln, _)), Some((trn, _))) => {
            if tln <= trn {
                stack[*sp] = rc;
                stack[*sp + 1] = lc;
            } else {
                stack[*sp] = lc;
                stack[*sp + 1] = rc;
            }
            *sp += 2;
        }
        (Some(_), None) => {
            stack[*sp] = lc;
            *sp += 1;
        }
        (None, Some(_)) => {
            stack[*sp] = rc;
            *sp += 1;
        }
        (None, None) => {}
    }
}

fn cross_overlap<T: HasBounds + Copy, U: HasBounds + Copy>(
    a_bvh: &Bvh<T>,
    a: i32,
    b_bvh: &Bvh<U>,
    b: i32,
    out: &mut Vec<BvhCrossPair<T, U>>,
) {
    let na = &a_bvh.nodes[a as usize];
    let nb = &b_bvh.nodes[b as usize];
    if !na.bounds.intersects(&nb.bounds) {
        return;
    }
    match (na.is_leaf(), nb.is_leaf()) {
        (true, true) => {
            for pa in a_bvh.leaf_slice(na) {
                for pb in b_bvh.leaf_slice(nb) {
                    if pa.bounds().intersects(&pb.bounds()) {
                        out.push(BvhCrossPair { a: *pa, b: *pb });
                    }
                }
            }
        }
        (true, false) => {
            cross_overlap(a_bvh, a, b_bvh, nb.left_child, out);
            cross_overlap(a_bvh, a, b_bvh, nb.right_child, out);
        }
        (false, true) => {
            cross_overlap(a_bvh, na.left_child, b_bvh, b, out);
            cross_overlap(a_bvh, na.right_child, b_bvh, b, out);
        }
        (false, false) => {
            cross_overlap(a_bvh, na.left_child, b_bvh, nb.left_child, out);
            cross_overlap(a_bvh, na.left_child, b_bvh, nb.right_child, out);
            cross_overlap(a_bvh, na.right_child, b_bvh, nb.left_child, out);
            cross_overlap(a_bvh, na.right_child, b_bvh, nb.right_child, out);
        }
    }
}

fn insert_sorted_desc(stack: &mut Vec<(f32, i32)>, entry: (f32, i32)) {
    let pos = stack.partition_point(|e| e.0 > entry.0);
    stack.insert(pos, entry);
}

fn compute_levels(nodes: &[BvhNode]) -> (Vec<Vec<u32>>, usize) {
    if nodes.is_empty() {
        return (Vec::new(), 0);
    }
    let mut levels: Vec<Vec<u32>> = Vec::new();
    let mut queue = std::collections::VecDeque::new();
    queue.push_back((0u32, 0usize));
    let mut max_depth = 0;
    while let Some((idx, depth)) = queue.pop_front() {
        if levels.len() <= depth {
            levels.push(Vec::new());
        }
        levels[depth].push(idx);
        max_depth = max_depth.max(depth);
        let node = &nodes[idx as usize];
        if !node.is_leaf() {
            queue.push_back((node.left_child as u32, depth + 1));
            queue.push_back((node.right_child as u32, depth + 1));
        }
    }
    (levels, max_depth)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accelerators::Cached;
    use crate::space::Point;

    fn cube(i: usize, center: Point) -> Cached<usize> {
        let half = 0.5;
        Cached {
            bounds: Aabb::new(
                Point::new(center.x - half, center.y - half, center.z - half),
                Point::new(center.x + half, center.y + half, center.z + half),
            ),
            item: i,
        }
    }

    // S1 - empty build.
    #[test]
    fn empty_build() {
        let bvh: Bvh<Cached<usize>> = Bvh::build(vec![], 4);
        assert_eq!(bvh.stats().total_nodes, 0);
        let mut out = Vec::new();
        bvh.query_aabb(&Aabb::new(Point::new(-1.0, -1.0, -1.0), Point::new(1.0, 1.0, 1.0)), &mut out);
        assert!(out.is_empty());
    }

    // S2 - six-axis probe.
    #[test]
    fn six_axis_probe() {
        let items = vec![
            cube(0, Point::new(5.0, 0.0, 0.0)),
            cube(1, Point::new(-5.0, 0.0, 0.0)),
            cube(2, Point::new(0.0, 5.0, 0.0)),
            cube(3, Point::new(0.0, -5.0, 0.0)),
            cube(4, Point::new(0.0, 0.0, 5.0)),
            cube(5, Point::new(0.0, 0.0, -5.0)),
        ];
        let bvh = Bvh::build(items, 4);
        assert!(bvh.validate());

        let mut out = Vec::new();
        bvh.query_aabb(&Aabb::new(Point::new(-5.0, -5.0, -5.0), Point::new(5.0, 5.0, 5.0)), &mut out);
        assert_eq!(out.len(), 6);

        out.clear();
        bvh.query_aabb(
            &Aabb::new(Point::new(100.0, 100.0, 100.0), Point::new(200.0, 200.0, 200.0)),
            &mut out,
        );
        assert!(out.is_empty());
    }

    // S4 - SAH hot cluster + outlier.
    #[test]
    fn hot_cluster_and_outlier() {
        let mut items: Vec<_> = (0..5).map(|i| cube(i, Point::new(i as f32, 0.0, 0.0))).collect();
        items.push(cube(5, Point::new(100.0, 100.0, 100.0)));
        let bvh = Bvh::build(items, 2);
        assert!(bvh.validate());

        let mut out = Vec::new();
        bvh.query_aabb(&Aabb::new(Point::new(-1.0, -1.0, -1.0), Point::new(5.0, 1.0, 1.0)), &mut out);
        assert_eq!(out.len(), 5);

        out.clear();
        bvh.query_aabb(&Aabb::new(Point::new(99.0, 99.0, 99.0), Point::new(101.0, 101.0, 101.0)), &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].item, 5);
    }

    // S6 - overlap triangle.
    #[test]
    fn overlap_triangle() {
        let items = vec![
            cube(0, Point::new(0.0, 0.0, 0.0)),
            cube(1, Point::new(0.5, 0.0, 0.0)),
            cube(2, Point::new(0.4, 0.0, 0.0)),
        ];
        let bvh = Bvh::build(items, 4);
        let mut out = Vec::new();
        bvh.find_all_overlaps(&mut out);
        assert_eq!(out.len(), 3);
        let mut seen: Vec<(usize, usize)> = out
            .iter()
            .map(|p| {
                let (a, b) = (p.a.item, p.b.item);
                if a < b { (a, b) } else { (b, a) }
            })
            .collect();
        seen.sort();
        assert_eq!(seen, vec![(0, 1), (0, 2), (1, 2)]);
    }

    #[test]
    fn refit_is_idempotent() {
        let items = vec![cube(0, Point::new(0.0, 0.0, 0.0)), cube(1, Point::new(5.0, 0.0, 0.0))];
        let mut bvh = Bvh::build(items, 4);
        bvh.refit();
        let after_one: Vec<Aabb> = bvh.nodes.iter().map(|n| n.bounds).collect();
        bvh.refit();
        let after_two: Vec<Aabb> = bvh.nodes.iter().map(|n| n.bounds).collect();
        assert_eq!(after_one, after_two);
        assert!(bvh.validate());
    }

    #[test]
    fn insert_incremental_keeps_tree_valid() {
        let items: Vec<_> = (0..8).map(|i| cube(i, Point::new(i as f32 * 2.0, 0.0, 0.0))).collect();
        let mut bvh = Bvh::build(items, 2);
        bvh.insert_incremental(cube(8, Point::new(3.0, 3.0, 3.0)));
        assert!(bvh.validate());
        assert_eq!(bvh.len(), 9);

        let mut out = Vec::new();
        bvh.query_aabb(&Aabb::new(Point::new(2.5, 2.5, 2.5), Point::new(3.5, 3.5, 3.5)), &mut out);
        assert!(out.iter().any(|p| p.item == 8));
    }

    #[test]
    fn insert_remove_defer_then_rebuild_restores_validity() {
        let items: Vec<_> = (0..8).map(|i| cube(i, Point::new(i as f32 * 2.0, 0.0, 0.0))).collect();
        let mut bvh = Bvh::build(items, 2);
        assert!(!bvh.needs_rebuild());

        bvh.insert(cube(8, Point::new(20.0, 0.0, 0.0)));
        assert!(bvh.needs_rebuild());
        assert_eq!(bvh.len(), 9);

        bvh.remove(0);
        assert_eq!(bvh.len(), 8);

        bvh.rebuild();
        assert!(!bvh.needs_rebuild());
        assert!(bvh.validate());
        assert_eq!(bvh.len(), 8);

        let mut out = Vec::new();
        bvh.query_aabb(&Aabb::new(Point::new(19.5, -0.5, -0.5), Point::new(20.5, 0.5, 0.5)), &mut out);
        assert!(out.iter().any(|p| p.item == 8));
        assert!(out.iter().all(|p| p.item != 0));
    }

    #[test]
    fn query_nearest_finds_closest() {
        let items = vec![
            cube(0, Point::new(10.0, 0.0, 0.0)),
            cube(1, Point::new(1.0, 0.0, 0.0)),
            cube(2, Point::new(-10.0, 0.0, 0.0)),
        ];
        let bvh = Bvh::build(items, 4);
        let (found, _dist) = bvh.query_nearest(Point::new(0.0, 0.0, 0.0), f32::INFINITY).unwrap();
        assert_eq!(found.item, 1);
    }

    #[test]
    fn falls_back_below_threshold_and_logs() {
        let _ = env_logger::builder().is_test(true).try_init();
        let items: Vec<_> = (0..10).map(|i| cube(i, Point::new(i as f32, 0.0, 0.0))).collect();
        let (bvh, ran_parallel) = Bvh::build_parallel(items, 4, 1000);
        assert!(!ran_parallel);
        assert!(bvh.validate());
    }

    #[test]
    fn build_parallel_matches_sequential_result_set() {
        let items: Vec<_> = (0..2000)
            .map(|i| cube(i, Point::new((i % 50) as f32 * 1.5, (i / 50) as f32 * 1.5, 0.0)))
            .collect();
        let (bvh, ran_parallel) = Bvh::build_parallel(items, 4, PARALLEL_BUILD_THRESHOLD);
        assert!(ran_parallel);
        assert!(bvh.validate());
        assert_eq!(bvh.len(), 2000);
    }

    // Property: query_aabb against randomly scattered boxes always agrees
    // with a brute-force scan, for any seed.
    #[test]
    fn query_aabb_matches_brute_force_on_random_geometry() {
        use rand::Rng;
        use rand_pcg::Pcg32;

        for seed in 0..20u64 {
            let mut rng = Pcg32::new(seed, 0xa02b_dbf7_bb3c_0a7);
            let items: Vec<Cached<usize>> = (0..300)
                .map(|i| {
                    let center = Point::new(
                        rng.gen_range(-50.0, 50.0),
                        rng.gen_range(-50.0, 50.0),
                        rng.gen_range(-50.0, 50.0),
                    );
                    let half = rng.gen_range(0.1, 3.0);
                    Cached::new(
                        Aabb::new(
                            Point::new(center.x - half, center.y - half, center.z - half),
                            Point::new(center.x + half, center.y + half, center.z + half),
                        ),
                        i,
                    )
                })
                .collect();

            let query = Aabb::new(
                Point::new(
                    rng.gen_range(-50.0, 50.0),
                    rng.gen_range(-50.0, 50.0),
                    rng.gen_range(-50.0, 50.0),
                ),
                Point::new(
                    rng.gen_range(-50.0, 50.0),
                    rng.gen_range(-50.0, 50.0),
                    rng.gen_range(-50.0, 50.0),
                ),
            );
            let query = Aabb::new(
                Point::new(
                    query.min.x.min(query.max.x),
                    query.min.y.min(query.max.y),
                    query.min.z.min(query.max.z),
                ),
                Point::new(
                    query.min.x.max(query.max.x),
                    query.min.y.max(query.max.y),
                    query.min.z.max(query.max.z),
                ),
            );

            let mut expected: Vec<usize> = items
                .iter()
                .filter(|it| it.bounds.intersects(&query))
                .map(|it| it.item)
                .collect();
            expected.sort_unstable();

            let bvh = Bvh::build(items, 4);
            assert!(bvh.validate());
            let mut out = Vec::new();
            bvh.query_aabb(&query, &mut out);
            let mut got: Vec<usize> = out.iter().map(|c| c.item).collect();
            got.sort_unstable();

            assert_eq!(got, expected, "seed {} mismatched brute-force result set", seed);
        }
    }
}
