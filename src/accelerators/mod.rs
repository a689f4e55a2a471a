//! The acceleration layer: L1/L2/L2' (SAH BVH), L3 (adaptive octree) and L4
//! (the unified raycast facade) that sits on top of both.

pub mod bvh;
pub mod octree;
pub mod raycast;
pub mod sah;

pub use bvh::{Bvh, BvhCrossPair, BvhOverlapPair, BvhStats, RayHit};
pub use octree::{Octree, OctreeStats};
pub use raycast::{raycast, raycast_multi, raycast_single, Accel, RaycastConfig};

use crate::space::Aabb;

/// Bounds access for anything an index can hold. Two shapes exist and the
/// choice between them is made once, at the call site that picks `T`:
///
/// - [`Cached`] wraps a payload together with a bounds value computed up
///   front — a plain field read, eligible for the batched x4 AABB leaf
///   path ([`CachedBounds`]).
/// - [`BoundsFn`] wraps a payload with a closure that computes its bounds
///   on demand, for payloads where caching would go stale (or simply isn't
///   worth the extra word).
///
/// There is no runtime branch between the two: the trait is resolved at
/// compile time for whatever `T` an index is instantiated over.
pub trait HasBounds {
    fn bounds(&self) -> Aabb;
}

/// Marker for payloads whose `bounds()` is a direct field read. Only these
/// are eligible for [`Bvh::query_aabb_batched4`].
pub trait CachedBounds: HasBounds {}

#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct Cached<T> {
    pub bounds: Aabb,
    pub item: T,
}

impl<T> Cached<T> {
    pub fn new(bounds: Aabb, item: T) -> Cached<T> {
        Cached { bounds, item }
    }
}

impl<T> HasBounds for Cached<T> {
    fn bounds(&self) -> Aabb {
        self.bounds
    }
}

impl<T> CachedBounds for Cached<T> {}

#[derive(Copy, Clone)]
pub struct BoundsFn<T, F: Fn(&T) -> Aabb + Copy> {
    pub item: T,
    pub f: F,
}

impl<T, F: Fn(&T) -> Aabb + Copy> BoundsFn<T, F> {
    pub fn new(item: T, f: F) -> BoundsFn<T, F> {
        BoundsFn { item, f }
    }
}

impl<T, F: Fn(&T) -> Aabb + Copy> HasBounds for BoundsFn<T, F> {
    fn bounds(&self) -> Aabb {
        (self.f)(&self.item)
    }
}

impl HasBounds for crate::primitive::Primitive {
    fn bounds(&self) -> Aabb {
        crate::primitive::Primitive::bounds(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accelerators::{Bvh, Octree};
    use crate::space::Point;

    // A payload that stores only a centre; its bounds are computed on
    // demand rather than cached, exercising the BoundsFn path.
    fn unit_cube_around(center: &Point) -> Aabb {
        Aabb::new(
            Point::new(center.x - 0.5, center.y - 0.5, center.z - 0.5),
            Point::new(center.x + 0.5, center.y + 0.5, center.z + 0.5),
        )
    }

    #[test]
    fn bvh_over_bounds_fn_builds_and_queries() {
        let items: Vec<BoundsFn<Point, fn(&Point) -> Aabb>> = vec![
            BoundsFn::new(Point::new(0.0, 0.0, 0.0), unit_cube_around),
            BoundsFn::new(Point::new(5.0, 0.0, 0.0), unit_cube_around),
            BoundsFn::new(Point::new(10.0, 0.0, 0.0), unit_cube_around),
        ];
        let bvh = Bvh::build(items, 2);
        assert!(bvh.validate());

        let mut out = Vec::new();
        bvh.query_aabb(&Aabb::new(Point::new(-1.0, -1.0, -1.0), Point::new(6.0, 1.0, 1.0)), &mut out);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn octree_over_bounds_fn_builds_and_queries() {
        let bounds = Aabb::new(Point::new(-20.0, -20.0, -20.0), Point::new(20.0, 20.0, 20.0));
        let mut tree: Octree<BoundsFn<Point, fn(&Point) -> Aabb>> = Octree::new(bounds, 4, 2);
        tree.insert(BoundsFn::new(Point::new(0.0, 0.0, 0.0), unit_cube_around));
        tree.insert(BoundsFn::new(Point::new(5.0, 0.0, 0.0), unit_cube_around));

        let mut out = Vec::new();
        tree.query_aabb(&Aabb::new(Point::new(-1.0, -1.0, -1.0), Point::new(1.0, 1.0, 1.0)), &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].item, Point::new(0.0, 0.0, 0.0));
    }
}
