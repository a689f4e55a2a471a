//! Layer 0: the primitive geometry the rest of the core indexes and tests
//! against rays and volumes.

pub mod sphere;
pub mod triangle;

pub use self::sphere::{ray_sphere_intersect, Sphere};
pub use self::triangle::{ray_triangle_intersect, Triangle};

use crate::ray::Ray;
use crate::space::*;

/// Tagged sum of the shape kinds the raycast facade can mix in one index.
/// Each variant dispatches to its own bounds/intersection routine; this is
/// how one `BVH<Primitive>` or `Octree<Primitive>` can hold both triangles
/// and spheres without a vtable per element.
#[derive(Debug, Copy, Clone)]
pub enum Primitive {
    Triangle(Triangle),
    Sphere(Sphere),
}

impl Primitive {
    pub fn bounds(&self) -> Aabb {
        match self {
            Primitive::Triangle(t) => t.bounds(),
            Primitive::Sphere(s) => s.bounds(),
        }
    }

    pub fn intersect(&self, ray: &Ray, max_t: f32) -> Option<f32> {
        match self {
            Primitive::Triangle(t) => ray_triangle_intersect(ray, t, max_t),
            Primitive::Sphere(s) => ray_sphere_intersect(ray, s, max_t),
        }
    }
}

/// Closest point on `tri` to `p`, via the classic Voronoi-region cascade:
/// first check whether `p` projects inside a vertex's region, then an
/// edge's, and only fall through to the face region once both are ruled
/// out.
pub fn closest_point_on_triangle(tri: &Triangle, p: Point) -> Point {
    let (a, b, c) = (tri.v0, tri.v1, tri.v2);
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;

    let d1 = ab.dot(ap);
    let d2 = ac.dot(ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return a;
    }

    let bp = p - b;
    let d3 = ab.dot(bp);
    let d4 = ac.dot(bp);
    if d3 >= 0.0 && d4 <= d3 {
        return b;
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return a + ab * v;
    }

    let cp = p - c;
    let d5 = ab.dot(cp);
    let d6 = ac.dot(cp);
    if d6 >= 0.0 && d5 <= d6 {
        return c;
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return a + ac * w;
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return b + (c - b) * w;
    }

    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    a + ab * v + ac * w
}

/// Sphere-triangle intersection: closest point on the triangle compared
/// against the sphere's radius.
pub fn sphere_triangle_intersects(sphere: &Sphere, tri: &Triangle) -> bool {
    let closest = closest_point_on_triangle(tri, sphere.center);
    let d = closest - sphere.center;
    d.dot(d) <= sphere.radius * sphere.radius
}
