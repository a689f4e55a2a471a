//! Layer 3: the adaptive octree. Unlike the BVH, an octree's nodes are
//! addressed by spatial position rather than by a flattened array, so this
//! index keeps the classic owning-pointer-tree shape — there is no
//! build-then-flatten phase to amortise, and nodes are created and
//! destroyed one at a time as items come and go.

use crate::accelerators::bvh::RayHit;
use crate::accelerators::HasBounds;
use crate::ray::Ray;
use crate::space::{pcomp, ray_aabb_intersection, Aabb, Point, Vector};

pub const DEFAULT_MAX_DEPTH: usize = 8;
pub const DEFAULT_MAX_ITEMS: usize = 8;

#[derive(Debug, Copy, Clone, Default)]
pub struct OctreeStats {
    pub total_nodes: usize,
    pub leaf_nodes: usize,
    pub max_depth: usize,
    pub total_items: usize,
    pub max_items_in_node: usize,
    pub empty_nodes: usize,
}

struct OctreeCfg {
    max_depth: usize,
    max_items: usize,
    min_size: f32,
}

struct OctreeNode<T> {
    bounds: Aabb,
    center: Point,
    children: Option<Box<[OctreeNode<T>; 8]>>,
    items: Vec<T>,
    depth: usize,
    total_items: usize,
}

impl<T> OctreeNode<T> {
    fn new(bounds: Aabb, depth: usize) -> OctreeNode<T> {
        let center = bounds.center();
        OctreeNode {
            bounds,
            center,
            children: None,
            items: Vec::new(),
            depth,
            total_items: 0,
        }
    }
}

/// Adaptive 8-way spatial index over items of type `T`. Items whose bounds
/// straddle a node's centre plane on any axis are kept at that node rather
/// than pushed into a child — see [`octant_bits`].
pub struct Octree<T: HasBounds + Copy> {
    root: OctreeNode<T>,
    cfg: OctreeCfg,
}

impl<T: HasBounds + Copy> Octree<T> {
    /// `min_size` is derived once from `bounds` and `max_depth`, not
    /// supplied directly: it is the extent at which subdivision would stop
    /// making sense given the depth budget.
    pub fn new(bounds: Aabb, max_depth: usize, max_items: usize) -> Octree<T> {
        let min_size = max_dimension_floor(&bounds) / 2f32.powi(max_depth as i32);
        Octree {
            root: OctreeNode::new(bounds, 0),
            cfg: OctreeCfg {
                max_depth,
                max_items,
                min_size,
            },
        }
    }

    pub fn len(&self) -> usize {
        self.root.total_items
    }

    pub fn is_empty(&self) -> bool {
        self.root.total_items == 0
    }

    pub fn insert(&mut self, item: T) {
        insert_into(&mut self.root, item, &self.cfg);
    }

    pub fn query_aabb(&self, q: &Aabb, out: &mut Vec<T>) {
        query_aabb_node(&self.root, q, out, None);
    }

    pub fn query_aabb_limited(&self, q: &Aabb, n: usize, out: &mut Vec<T>) {
        query_aabb_node(&self.root, q, out, Some(n));
    }

    pub fn query_sphere(&self, center: Point, radius: f32, out: &mut Vec<T>) {
        query_sphere_node(&self.root, center, radius, out);
    }

    /// `normal` need not be unit length; it is normalised internally.
    pub fn query_disc(&self, center: Point, normal: Vector, radius: f32, out: &mut Vec<T>) {
        let n = crate::space::InnerSpace::normalize(normal);
        query_disc_node(&self.root, center, n, radius, out);
    }

    pub fn query_ray(&self, ray: &Ray, max_dist: f32, out: &mut Vec<T>) {
        query_ray_node(&self.root, ray, max_dist, out);
    }

    pub fn raycast(&self, ray: &Ray, max_dist: f32, f: impl Fn(&Ray, &T, f32) -> Option<f32>) -> Option<RayHit<T>> {
        let mut best_t = max_dist;
        let mut best: Option<T> = None;
        raycast_node(&self.root, ray, 0.0, max_dist, &mut best_t, &mut best, &f);
        best.map(|primitive| RayHit { primitive, t: best_t })
    }

    pub fn raycast_single(&self, ray: &Ray, max_dist: f32, f: impl Fn(&Ray, &T, f32) -> Option<f32>) -> Option<RayHit<T>> {
        raycast_single_node(&self.root, ray, 0.0, max_dist, &f).map(|(primitive, t)| RayHit { primitive, t })
    }

    pub fn stats(&self) -> OctreeStats {
        let mut stats = OctreeStats {
            total_items: self.root.total_items,
            ..Default::default()
        };
        collect_stats(&self.root, 0, &mut stats);
        stats
    }
}

impl<T: HasBounds + Copy + PartialEq> Octree<T> {
    /// `true` if `item` was found and removed.
    pub fn remove(&mut self, item: T) -> bool {
        remove_from(&mut self.root, item, &self.cfg)
    }

    /// No-op if `old` and `new` report identical bounds; otherwise a
    /// remove of `old` followed by an insert of `new`.
    pub fn update(&mut self, old: T, new: T) {
        if old.bounds() == new.bounds() {
            return;
        }
        self.remove(old);
        insert_into(&mut self.root, new, &self.cfg);
    }
}

/// `None` when `bounds` straddles `center` on some axis (a "crossing"
/// item, kept at the current node); otherwise the 3-bit octant index,
/// bit `i` set when `bounds` lies entirely on the high side of axis `i`.
fn octant_bits(bounds: &Aabb, center: Point) -> Option<usize> {
    let mut bits = 0usize;
    for axis in 0..3 {
        let min = pcomp(bounds.min, axis);
        let max = pcomp(bounds.max, axis);
        let c = pcomp(center, axis);
        if min < c && max > c {
            return None;
        }
        if min >= c {
            bits |= 1 << axis;
        }
    }
    Some(bits)
}

fn octant_bounds(bounds: &Aabb, center: Point, i: usize) -> Aabb {
    let lo = |axis: usize| pcomp(bounds.min, axis);
    let hi = |axis: usize| pcomp(bounds.max, axis);
    let c = |axis: usize| pcomp(center, axis);
    let comp = |axis: usize| -> (f32, f32) {
        if i & (1 << axis) != 0 {
            (c(axis), hi(axis))
        } else {
            (lo(axis), c(axis))
        }
    };
    let (x0, x1) = comp(0);
    let (y0, y1) = comp(1);
    let (z0, z1) = comp(2);
    Aabb::new(Point::new(x0, y0, z0), Point::new(x1, y1, z1))
}

fn max_dimension_floor(bounds: &Aabb) -> f32 {
    let size = bounds.size();
    size.x.min(size.y).min(size.z)
}

fn insert_into<T: HasBounds + Copy>(node: &mut OctreeNode<T>, item: T, cfg: &OctreeCfg) {
    node.total_items += 1;

    if let Some(children) = node.children.as_mut() {
        match octant_bits(&item.bounds(), node.center) {
            None => node.items.push(item),
            Some(bits) => insert_into(&mut children[bits], item, cfg),
        }
        return;
    }

    let would_overflow = node.items.len() >= cfg.max_items;
    let can_subdivide = node.depth < cfg.max_depth && max_dimension_floor(&node.bounds) > cfg.min_size;

    if !would_overflow || !can_subdivide {
        node.items.push(item);
        return;
    }

    subdivide(node, cfg);
    match octant_bits(&item.bounds(), node.center) {
        None => node.items.push(item),
        Some(bits) => insert_into(&mut node.children.as_mut().unwrap()[bits], item, cfg),
    }
}

fn subdivide<T: HasBounds + Copy>(node: &mut OctreeNode<T>, cfg: &OctreeCfg) {
    let center = node.center;
    let depth = node.depth + 1;
    let children: [OctreeNode<T>; 8] = [
        OctreeNode::new(octant_bounds(&node.bounds, center, 0), depth),
        OctreeNode::new(octant_bounds(&node.bounds, center, 1), depth),
        OctreeNode::new(octant_bounds(&node.bounds, center, 2), depth),
        OctreeNode::new(octant_bounds(&node.bounds, center, 3), depth),
        OctreeNode::new(octant_bounds(&node.bounds, center, 4), depth),
        OctreeNode::new(octant_bounds(&node.bounds, center, 5), depth),
        OctreeNode::new(octant_bounds(&node.bounds, center, 6), depth),
        OctreeNode::new(octant_bounds(&node.bounds, center, 7), depth),
    ];
    node.children = Some(Box::new(children));

    let old_items = std::mem::take(&mut node.items);
    for it in old_items {
        match octant_bits(&it.bounds(), center) {
            None => node.items.push(it),
            Some(bits) => insert_into(&mut node.children.as_mut().unwrap()[bits], it, cfg),
        }
    }
}

fn remove_from<T: HasBounds + Copy + PartialEq>(node: &mut OctreeNode<T>, item: T, cfg: &OctreeCfg) -> bool {
    if let Some(pos) = node.items.iter().position(|x| *x == item) {
        node.items.remove(pos);
        node.total_items -= 1;
        maybe_collapse(node);
        return true;
    }

    if node.children.is_some() {
        let target_bounds = item.bounds();
        let found = {
            let children = node.children.as_mut().unwrap();
            let mut found = false;
            for child in children.iter_mut() {
                if child.bounds.intersects(&target_bounds) && remove_from(child, item, cfg) {
                    found = true;
                    break;
                }
            }
            found
        };
        if found {
            node.total_items -= 1;
            maybe_collapse(node);
            return true;
        }
    }

    false
}

/// Gathers the whole subtree into `node.items` and drops the children once
/// `total_items` falls below the minimum useful fan-out.
fn maybe_collapse<T: HasBounds + Copy>(node: &mut OctreeNode<T>) {
    if node.children.is_none() || node.total_items >= 4 {
        return;
    }
    let mut gathered = std::mem::take(&mut node.items);
    if let Some(children) = node.children.take() {
        for child in *children {
            gather_all(child, &mut gathered);
        }
    }
    node.items = gathered;
}

fn gather_all<T: HasBounds + Copy>(mut node: OctreeNode<T>, out: &mut Vec<T>) {
    out.append(&mut node.items);
    if let Some(children) = node.children.take() {
        for child in *children {
            gather_all(child, out);
        }
    }
}

fn query_aabb_node<T: HasBounds + Copy>(node: &OctreeNode<T>, q: &Aabb, out: &mut Vec<T>, limit: Option<usize>) {
    if !node.bounds.intersects(q) {
        return;
    }
    for item in &node.items {
        if let Some(n) = limit {
            if out.len() >= n {
                return;
            }
        }
        if item.bounds().intersects(q) {
            out.push(*item);
        }
    }
    if let Some(children) = &node.children {
        for child in children.iter() {
            if let Some(n) = limit {
                if out.len() >= n {
                    return;
                }
            }
            query_aabb_node(child, q, out, limit);
        }
    }
}

fn query_sphere_node<T: HasBounds + Copy>(node: &OctreeNode<T>, center: Point, radius: f32, out: &mut Vec<T>) {
    if !node.bounds.sphere_intersects(center, radius) {
        return;
    }
    for item in &node.items {
        if item.bounds().sphere_intersects(center, radius) {
            out.push(*item);
        }
    }
    if let Some(children) = &node.children {
        for child in children.iter() {
            query_sphere_node(child, center, radius, out);
        }
    }
}

fn closest_point_in_aabb(bounds: &Aabb, p: Point) -> Point {
    Point::new(
        p.x.max(bounds.min.x).min(bounds.max.x),
        p.y.max(bounds.min.y).min(bounds.max.y),
        p.z.max(bounds.min.z).min(bounds.max.z),
    )
}

fn disc_test(bounds: &Aabb, center: Point, normal: Vector, radius: f32) -> bool {
    use crate::space::InnerSpace;
    let closest = closest_point_in_aabb(bounds, center);
    let off_plane = (closest - center).dot(normal);
    let projected = closest - normal * off_plane;
    (projected - center).dot(projected - center) <= radius * radius
}

fn query_disc_node<T: HasBounds + Copy>(
    node: &OctreeNode<T>,
    center: Point,
    normal: Vector,
    radius: f32,
    out: &mut Vec<T>,
) {
    if !disc_test(&node.bounds, center, normal, radius) {
        return;
    }
    for item in &node.items {
        if disc_test(&item.bounds(), center, normal, radius) {
            out.push(*item);
        }
    }
    if let Some(children) = &node.children {
        for child in children.iter() {
            query_disc_node(child, center, normal, radius, out);
        }
    }
}

fn query_ray_node<T: HasBounds + Copy>(node: &OctreeNode<T>, ray: &Ray, max_dist: f32, out: &mut Vec<T>) {
    if ray_aabb_intersection(ray, &node.bounds, max_dist).is_none() {
        return;
    }
    for item in &node.items {
        if ray_aabb_intersection(ray, &item.bounds(), max_dist).is_some() {
            out.push(*item);
        }
    }
    if let Some(children) = &node.children {
        for child in children.iter() {
            query_ray_node(child, ray, max_dist, out);
        }
    }
}

fn ordered_children<'a, T: HasBounds + Copy>(
    children: &'a [OctreeNode<T>; 8],
    ray: &Ray,
    t_min: f32,
    t_max: f32,
) -> Vec<(f32, &'a OctreeNode<T>)> {
    let mut ordered = Vec::with_capacity(8);
    for child in children.iter() {
        if let Some((tn, tf)) = ray_aabb_intersection(ray, &child.bounds, t_max) {
            let tn = tn.max(t_min);
            let tf = tf.min(t_max);
            if tf >= tn {
                ordered.push((tn, child));
            }
        }
    }
    ordered.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
    ordered
}

fn raycast_node<T: HasBounds + Copy>(
    node: &OctreeNode<T>,
    ray: &Ray,
    t_min: f32,
    t_max: f32,
    best_t: &mut f32,
    best: &mut Option<T>,
    f: &impl Fn(&Ray, &T, f32) -> Option<f32>,
) {
    for item in &node.items {
        if let Some(t) = f(ray, item, *best_t) {
            if t < *best_t {
                *best_t = t;
                *best = Some(*item);
            }
        }
    }
    if let Some(children) = &node.children {
        for (tn, child) in ordered_children(children, ray, t_min, t_max.min(*best_t)) {
            if tn > *best_t {
                continue;
            }
            raycast_node(child, ray, t_min, t_max, best_t, best, f);
        }
    }
}

fn raycast_single_node<T: HasBounds + Copy>(
    node: &OctreeNode<T>,
    ray: &Ray,
    t_min: f32,
    t_max: f32,
    f: &impl Fn(&Ray, &T, f32) -> Option<f32>,
) -> Option<(T, f32)> {
    for item in &node.items {
        if let Some(t) = f(ray, item, t_max) {
            return Some((*item, t));
        }
    }
    if let Some(children) = &node.children {
        for (_, child) in ordered_children(children, ray, t_min, t_max) {
            if let Some(hit) = raycast_single_node(child, ray, t_min, t_max, f) {
                return Some(hit);
            }
        }
    }
    None
}

fn collect_stats<T>(node: &OctreeNode<T>, depth: usize, stats: &mut OctreeStats) {
    stats.total_nodes += 1;
    stats.max_depth = stats.max_depth.max(depth);
    stats.max_items_in_node = stats.max_items_in_node.max(node.items.len());
    if node.items.is_empty() {
        stats.empty_nodes += 1;
    }
    match &node.children {
        None => stats.leaf_nodes += 1,
        Some(children) => {
            for child in children.iter() {
                collect_stats(child, depth + 1, stats);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accelerators::Cached;

    fn point_item(i: usize, p: Point, half: f32) -> Cached<usize> {
        Cached::new(
            Aabb::new(
                Point::new(p.x - half, p.y - half, p.z - half),
                Point::new(p.x + half, p.y + half, p.z + half),
            ),
            i,
        )
    }

    // S5 - octree boundary.
    #[test]
    fn boundary_inserts_and_empty_query() {
        let bounds = Aabb::new(Point::new(-1.0, -1.0, -1.0), Point::new(1.0, 1.0, 1.0));
        let mut tree: Octree<Cached<usize>> = Octree::new(bounds, 2, 1);
        tree.insert(point_item(0, Point::new(1.0, 1.0, 1.0), 0.0));
        tree.insert(point_item(1, Point::new(0.0, 0.0, 0.0), 0.0005));
        assert_eq!(tree.len(), 2);

        let mut out = Vec::new();
        tree.query_aabb(
            &Aabb::new(Point::new(10.0, 10.0, 10.0), Point::new(20.0, 20.0, 20.0)),
            &mut out,
        );
        assert!(out.is_empty());
    }

    #[test]
    fn crossing_items_stay_at_internal_node() {
        let bounds = Aabb::new(Point::new(-4.0, -4.0, -4.0), Point::new(4.0, 4.0, 4.0));
        let mut tree: Octree<Cached<usize>> = Octree::new(bounds, 3, 1);
        for i in 0..4 {
            tree.insert(point_item(i, Point::new(1.0 + i as f32, 1.0, 1.0), 0.1));
        }
        // Straddles x=0, y=0 and z=0 planes: must be retained at an
        // internal node rather than descending into a single octant.
        tree.insert(point_item(99, Point::new(0.0, 0.0, 0.0), 2.0));

        let mut out = Vec::new();
        tree.query_aabb(&bounds, &mut out);
        assert_eq!(out.len(), 5);
        assert!(out.iter().any(|p| p.item == 99));
    }

    #[test]
    fn remove_collapses_when_sparse() {
        let bounds = Aabb::new(Point::new(-4.0, -4.0, -4.0), Point::new(4.0, 4.0, 4.0));
        let mut tree: Octree<Cached<usize>> = Octree::new(bounds, 3, 1);
        let items: Vec<_> = (0..6)
            .map(|i| point_item(i, Point::new(i as f32 * 0.5, i as f32 * 0.5, i as f32 * 0.5), 0.05))
            .collect();
        for it in &items {
            tree.insert(*it);
        }
        for it in items.iter().take(4) {
            assert!(tree.remove(*it));
        }
        assert_eq!(tree.len(), 2);
        let stats = tree.stats();
        assert_eq!(stats.total_items, 2);
    }

    #[test]
    fn raycast_returns_closest() {
        let bounds = Aabb::new(Point::new(-20.0, -20.0, -20.0), Point::new(20.0, 20.0, 20.0));
        let mut tree: Octree<Cached<usize>> = Octree::new(bounds, 4, 2);
        tree.insert(point_item(0, Point::new(5.0, 0.0, 0.0), 0.5));
        tree.insert(point_item(1, Point::new(1.0, 0.0, 0.0), 0.5));

        let ray = Ray::new(Point::new(-10.0, 0.0, 0.0), Vector::new(1.0, 0.0, 0.0));
        let hit = tree.raycast(&ray, 100.0, |r, p: &Cached<usize>, max_t| {
            ray_aabb_intersection(r, &p.bounds(), max_t).map(|(tn, _)| tn)
        });
        let hit = hit.expect("ray along +x should hit one of the two points");
        assert_eq!(hit.primitive.item, 1);
    }
}
