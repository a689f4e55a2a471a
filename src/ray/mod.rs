use crate::space::{Point, Vector};

/// A ray cast through space, with its reciprocal direction precomputed.
///
/// `dir` is not required to be unit length — callers that need a `t` in
/// world units pass an already-scaled `max_dist`, same as PBRT-style
/// renderers. `inv_dir` is still well-defined (if large) when a component
/// of `dir` is zero; the slab test in [`crate::space::aabb`] checks for
/// that near-zero case explicitly rather than trusting the reciprocal.
#[derive(Debug, Copy, Clone)]
pub struct Ray {
    pub origin: Point,
    pub dir: Vector,
    pub inv_dir: Vector,
}

impl Ray {
    pub fn new(origin: Point, dir: Vector) -> Ray {
        Ray {
            origin,
            dir,
            inv_dir: Vector::new(1.0 / dir.x, 1.0 / dir.y, 1.0 / dir.z),
        }
    }

    /// Point along the ray at parameter `t`.
    #[inline]
    pub fn at(&self, t: f32) -> Point {
        self.origin + self.dir * t
    }
}
