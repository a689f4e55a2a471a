use crate::ray::Ray;
use crate::space::*;

/// A standalone triangle: three vertices, no mesh-level indexing. The
/// vertex-data model used by the renderer (indexed meshes, normals, UVs)
/// is an external collaborator — this type is what the acceleration core
/// actually indexes and tests against rays.
#[derive(Debug, Copy, Clone)]
pub struct Triangle {
    pub v0: Point,
    pub v1: Point,
    pub v2: Point,
}

impl Triangle {
    pub fn new(v0: Point, v1: Point, v2: Point) -> Triangle {
        Triangle { v0, v1, v2 }
    }

    pub fn bounds(&self) -> Aabb {
        Aabb::new(self.v0, self.v0).union_point(self.v1).union_point(self.v2)
    }
}

/// Moller-Trumbore ray-triangle intersection.
///
/// Reports `t` only when it lies strictly past the `1e-6` parallel/degenerate
/// guard and before `max_t`; everything else is a miss, including rays
/// coplanar with the triangle.
pub fn ray_triangle_intersect(ray: &Ray, tri: &Triangle, max_t: f32) -> Option<f32> {
    const EPS: f32 = 1e-6;

    let edge1 = tri.v1 - tri.v0;
    let edge2 = tri.v2 - tri.v0;
    let pvec = ray.dir.cross(edge2);
    let det = edge1.dot(pvec);

    if det.abs() < EPS {
        return None;
    }

    let inv_det = 1.0 / det;
    let tvec = ray.origin - tri.v0;
    let u = tvec.dot(pvec) * inv_det;
    if u < 0.0 || u > 1.0 {
        return None;
    }

    let qvec = tvec.cross(edge1);
    let v = ray.dir.dot(qvec) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }

    let t = edge2.dot(qvec) * inv_det;
    if t > EPS && t < max_t {
        Some(t)
    } else {
        None
    }
}
