//! Linear-algebra shortcuts used throughout the acceleration core.
//!
//! The core works in single-precision, matching the scale (coordinates up
//! to roughly 1e6) and the `f32` query results (`RayHit::t`) called for by
//! the rest of the crate.

pub use cgmath::prelude::*;
use cgmath::{Point3, Vector3};

pub mod aabb;

pub use self::aabb::{aabb_intersects_batch4, ray_aabb_intersection, Aabb};

pub type Scalar = f32;
pub type Point = Point3<Scalar>;
pub type Vector = Vector3<Scalar>;

/// Index (0, 1 or 2) of the axis with the largest magnitude.
#[inline]
pub fn max_dimension(v: Vector) -> usize {
    if v.x > v.y {
        if v.x > v.z {
            0
        } else {
            2
        }
    } else if v.y > v.z {
        1
    } else {
        2
    }
}

/// Component `i` of a vector, by axis index (0 = x, 1 = y, 2 = z).
#[inline]
pub fn vcomp(v: Vector, i: usize) -> Scalar {
    match i {
        0 => v.x,
        1 => v.y,
        _ => v.z,
    }
}

/// Component `i` of a point, by axis index (0 = x, 1 = y, 2 = z).
#[inline]
pub fn pcomp(p: Point, i: usize) -> Scalar {
    match i {
        0 => p.x,
        1 => p.y,
        _ => p.z,
    }
}
