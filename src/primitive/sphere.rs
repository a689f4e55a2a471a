use crate::core::math::quad_roots;
use crate::ray::Ray;
use crate::space::*;

#[derive(Debug, Copy, Clone)]
pub struct Sphere {
    pub center: Point,
    pub radius: f32,
}

impl Sphere {
    pub fn new(center: Point, radius: f32) -> Sphere {
        Sphere { center, radius }
    }

    pub fn bounds(&self) -> Aabb {
        let r = Vector::new(self.radius, self.radius, self.radius);
        Aabb::new(self.center - r, self.center + r)
    }
}

/// Ray-sphere intersection via the quadratic in the ray parameter.
///
/// Returns the smaller root `>= 1e-3` that lies within `max_t`; if that
/// root is rejected (behind the ray origin, or past `max_t`) the farther
/// root is tried before reporting a miss.
pub fn ray_sphere_intersect(ray: &Ray, sphere: &Sphere, max_t: f32) -> Option<f32> {
    const T_MIN: f32 = 1e-3;

    let oc = ray.origin - sphere.center;
    let a = ray.dir.dot(ray.dir);
    let b = 2.0 * oc.dot(ray.dir);
    let c = oc.dot(oc) - sphere.radius * sphere.radius;

    let (roots, n) = quad_roots(a, b, c);
    if n == 0 {
        return None;
    }

    let (near, far) = if n == 1 {
        (roots[0], roots[0])
    } else {
        (roots[0].min(roots[1]), roots[0].max(roots[1]))
    };

    if near >= T_MIN && near < max_t {
        Some(near)
    } else if far >= T_MIN && far < max_t {
        Some(far)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hits_from_outside() {
        let sphere = Sphere::new(Point::new(0.0, 0.0, 0.0), 1.0);
        let ray = Ray::new(Point::new(-5.0, 0.0, 0.0), Vector::new(1.0, 0.0, 0.0));
        let t = ray_sphere_intersect(&ray, &sphere, f32::MAX).unwrap();
        assert!((t - 4.0).abs() < 1e-4);
    }

    #[test]
    fn inside_sphere_reports_far_root() {
        let sphere = Sphere::new(Point::new(0.0, 0.0, 0.0), 1.0);
        let ray = Ray::new(Point::new(0.0, 0.0, 0.0), Vector::new(1.0, 0.0, 0.0));
        let t = ray_sphere_intersect(&ray, &sphere, f32::MAX).unwrap();
        assert!((t - 1.0).abs() < 1e-4);
    }

    #[test]
    fn misses_entirely() {
        let sphere = Sphere::new(Point::new(0.0, 0.0, 0.0), 1.0);
        let ray = Ray::new(Point::new(-5.0, 5.0, 0.0), Vector::new(1.0, 0.0, 0.0));
        assert!(ray_sphere_intersect(&ray, &sphere, f32::MAX).is_none());
    }
}
