//! Spatial acceleration core for a 3D engine's geometry package.
//!
//! Five layers, each depending only on those below it: primitive geometry
//! (AABB/Ray/Triangle/Sphere), a binned-SAH builder, a flattened BVH index
//! generic over payload type, an adaptive octree, and a raycast facade
//! that picks between them (or brute force) on demand.
//!
//! This crate has no wire protocol, reads no file, and touches no
//! environment variable — it's a library of data structures and geometric
//! routines, meant to be embedded in a renderer or a physics step.

pub mod accelerators;
pub mod core;
pub mod error;
pub mod primitive;
pub mod ray;
pub mod space;

pub use crate::accelerators::{
    raycast, raycast_multi, raycast_single, Accel, BoundsFn, Bvh, BvhCrossPair, BvhOverlapPair, BvhStats, Cached,
    CachedBounds, HasBounds, Octree, OctreeStats, RayHit, RaycastConfig,
};
pub use crate::error::AccelError;
pub use crate::primitive::{Primitive, Sphere, Triangle};
pub use crate::ray::Ray;
pub use crate::space::{Aabb, Point, Scalar, Vector};

#[cfg(test)]
mod tests {
    use super::*;

    // S3 - ray along +X.
    #[test]
    fn ray_along_positive_x() {
        let cube = |cx: f32, cy: f32, cz: f32| Aabb::new(
            Point::new(cx - 0.5, cy - 0.5, cz - 0.5),
            Point::new(cx + 0.5, cy + 0.5, cz + 0.5),
        );
        let boxes = vec![
            cube(0.0, 0.0, 0.0),
            cube(5.0, 0.0, 0.0),
            cube(10.0, 0.0, 0.0),
            cube(0.0, 5.0, 0.0),
            cube(0.0, 0.0, 5.0),
        ];
        let bvh: Bvh<Cached<usize>> = Bvh::build(
            boxes.into_iter().enumerate().map(|(i, b)| Cached::new(b, i)).collect(),
            4,
        );

        let ray = Ray::new(Point::new(-10.0, 0.0, 0.0), Vector::new(1.0, 0.0, 0.0));
        let mut hits = Vec::new();
        bvh.query_ray(&ray, 20.0, &mut hits);
        assert_eq!(hits.len(), 3);

        let closest = bvh.raycast(&ray, 20.0, |r, p: &Cached<usize>, max_t| {
            crate::space::ray_aabb_intersection(r, &p.bounds(), max_t).map(|(tn, _)| tn)
        });
        let closest = closest.expect("ray along +x should hit the nearest cube");
        assert_eq!(closest.primitive.item, 0);
    }
}
