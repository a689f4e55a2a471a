//! Layer 4: the unified raycast facade. Given a slice of primitives, a
//! bounds function and an intersection test, this builds whichever
//! acceleration structure the caller asked for, runs the traversal, and
//! drops the structure before returning — none of it outlives one call.

use std::cell::Cell;

use crate::accelerators::bvh::{self, Bvh, RayHit};
use crate::accelerators::octree::{self, Octree};
use crate::accelerators::Cached;
use crate::ray::Ray;
use crate::space::Aabb;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Accel {
    Bvh,
    Octree,
    BruteForce,
}

#[derive(Debug, Copy, Clone)]
pub struct RaycastConfig {
    pub max_dist: f32,
    /// 0 means unlimited.
    pub max_tests: usize,
    pub accel: Accel,
}

impl Default for RaycastConfig {
    fn default() -> RaycastConfig {
        RaycastConfig {
            max_dist: f32::INFINITY,
            max_tests: 0,
            accel: Accel::Bvh,
        }
    }
}

/// Wraps `intersect` so every call is charged against `cfg.max_tests`.
/// Once the budget is spent, every further call reports a miss rather
/// than invoking `intersect` at all — the budget bounds primitive tests,
/// not bounds-only pruning performed by the index itself.
fn budgeted<'a, T>(
    intersect: impl Fn(&Ray, &T, f32) -> Option<f32> + 'a,
    max_tests: usize,
) -> impl Fn(&Ray, &T, f32) -> Option<f32> + 'a {
    let remaining = Cell::new(max_tests);
    move |ray, item, max_t| {
        if max_tests != 0 {
            if remaining.get() == 0 {
                return None;
            }
            remaining.set(remaining.get() - 1);
        }
        intersect(ray, item, max_t)
    }
}

fn cached_items<T: Copy>(items: &[T], bounds_func: impl Fn(&T) -> Aabb) -> Vec<Cached<T>> {
    items.iter().map(|it| Cached::new(bounds_func(it), *it)).collect()
}

fn union_bounds<T: Copy>(items: &[T], bounds_func: impl Fn(&T) -> Aabb) -> Aabb {
    items.iter().fold(Aabb::undefined(), |b, it| b.union(&bounds_func(it)))
}

fn unwrap_cached<T>(hit: Option<RayHit<Cached<T>>>) -> Option<RayHit<T>> {
    hit.map(|h| RayHit {
        primitive: h.primitive.item,
        t: h.t,
    })
}

/// Closest-hit raycast over `items`. Builds a throwaway index of the kind
/// named by `cfg.accel` (or falls through to a brute-force scan), runs the
/// traversal, and discards the index.
pub fn raycast<T: Copy>(
    items: &[T],
    bounds_func: impl Fn(&T) -> Aabb + Copy,
    ray: &Ray,
    intersect: impl Fn(&Ray, &T, f32) -> Option<f32>,
    cfg: &RaycastConfig,
) -> Option<RayHit<T>> {
    let f = budgeted(intersect, cfg.max_tests);
    match cfg.accel {
        Accel::BruteForce => brute_force(items, ray, cfg.max_dist, f),
        Accel::Bvh => {
            let bvh = Bvh::build(cached_items(items, bounds_func), bvh::DEFAULT_MAX_LEAF_SIZE);
            unwrap_cached(bvh.raycast(ray, cfg.max_dist, |r, p: &Cached<T>, t| f(r, &p.item, t)))
        }
        Accel::Octree => {
            let tree = build_octree(items, bounds_func);
            unwrap_cached(tree.raycast(ray, cfg.max_dist, |r, p: &Cached<T>, t| f(r, &p.item, t)))
        }
    }
}

/// First-acceptance raycast — returns as soon as any primitive's
/// intersection test succeeds, without regard for which is closest.
pub fn raycast_single<T: Copy>(
    items: &[T],
    bounds_func: impl Fn(&T) -> Aabb + Copy,
    ray: &Ray,
    intersect: impl Fn(&Ray, &T, f32) -> Option<f32>,
    cfg: &RaycastConfig,
) -> Option<RayHit<T>> {
    let f = budgeted(intersect, cfg.max_tests);
    match cfg.accel {
        Accel::BruteForce => {
            for item in items {
                if let Some(t) = f(ray, item, cfg.max_dist) {
                    return Some(RayHit { primitive: *item, t });
                }
            }
            None
        }
        Accel::Bvh => {
            let bvh = Bvh::build(cached_items(items, bounds_func), bvh::DEFAULT_MAX_LEAF_SIZE);
            unwrap_cached(bvh.raycast_single(ray, cfg.max_dist, |r, p: &Cached<T>, t| f(r, &p.item, t)))
        }
        Accel::Octree => {
            let tree = build_octree(items, bounds_func);
            unwrap_cached(tree.raycast_single(ray, cfg.max_dist, |r, p: &Cached<T>, t| f(r, &p.item, t)))
        }
    }
}

/// Every accepting hit, ascending by `t`.
pub fn raycast_multi<T: Copy>(
    items: &[T],
    bounds_func: impl Fn(&T) -> Aabb + Copy,
    ray: &Ray,
    intersect: impl Fn(&Ray, &T, f32) -> Option<f32>,
    cfg: &RaycastConfig,
    out: &mut Vec<RayHit<T>>,
) {
    let f = budgeted(intersect, cfg.max_tests);
    match cfg.accel {
        Accel::BruteForce => {
            for item in items {
                if let Some(t) = f(ray, item, cfg.max_dist) {
                    out.push(RayHit { primitive: *item, t });
                }
            }
        }
        Accel::Bvh => {
            let bvh = Bvh::build(cached_items(items, bounds_func), bvh::DEFAULT_MAX_LEAF_SIZE);
            let mut cached_out = Vec::new();
            bvh.raycast_multi(ray, cfg.max_dist, |r, p: &Cached<T>, t| f(r, &p.item, t), &mut cached_out);
            out.extend(cached_out.into_iter().map(|h| RayHit {
                primitive: h.primitive.item,
                t: h.t,
            }));
            return;
        }
        Accel::Octree => {
            // The octree index itself only exposes closest-hit and
            // first-hit traversals; query_ray's bounds-only shortlist
            // (untouched by the budget) is enough to build the multi-hit
            // variant on top without adding a fourth octree traversal.
            let tree = build_octree(items, bounds_func);
            let mut candidates = Vec::new();
            tree.query_ray(ray, cfg.max_dist, &mut candidates);
            for c in candidates {
                if let Some(t) = f(ray, &c.item, cfg.max_dist) {
                    out.push(RayHit { primitive: c.item, t });
                }
            }
        }
    }
    out.sort_by(|a, b| a.t.partial_cmp(&b.t).unwrap_or(std::cmp::Ordering::Equal));
}

fn brute_force<T: Copy>(
    items: &[T],
    ray: &Ray,
    max_dist: f32,
    f: impl Fn(&Ray, &T, f32) -> Option<f32>,
) -> Option<RayHit<T>> {
    let mut best_t = max_dist;
    let mut best: Option<T> = None;
    for item in items {
        if let Some(t) = f(ray, item, best_t) {
            if t < best_t {
                best_t = t;
                best = Some(*item);
            }
        }
    }
    best.map(|primitive| RayHit { primitive, t: best_t })
}

fn build_octree<T: Copy>(items: &[T], bounds_func: impl Fn(&T) -> Aabb + Copy) -> Octree<Cached<T>> {
    let bounds = union_bounds(items, bounds_func);
    let mut tree = Octree::new(bounds, octree::DEFAULT_MAX_DEPTH, octree::DEFAULT_MAX_ITEMS);
    for it in cached_items(items, bounds_func) {
        tree.insert(it);
    }
    tree
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitive::{ray_sphere_intersect, Sphere};
    use crate::space::{Point, Vector};

    fn spheres() -> Vec<Sphere> {
        vec![
            Sphere::new(Point::new(0.0, 0.0, 0.0), 1.0),
            Sphere::new(Point::new(5.0, 0.0, 0.0), 1.0),
            Sphere::new(Point::new(10.0, 0.0, 0.0), 1.0),
        ]
    }

    fn bounds_of(s: &Sphere) -> Aabb {
        s.bounds()
    }

    fn hit_fn(ray: &Ray, s: &Sphere, max_t: f32) -> Option<f32> {
        ray_sphere_intersect(ray, s, max_t)
    }

    #[test]
    fn closest_hit_agrees_across_accels() {
        let items = spheres();
        let ray = Ray::new(Point::new(-10.0, 0.0, 0.0), Vector::new(1.0, 0.0, 0.0));
        for accel in [Accel::Bvh, Accel::Octree, Accel::BruteForce] {
            let cfg = RaycastConfig {
                max_dist: 100.0,
                max_tests: 0,
                accel,
            };
            let hit = raycast(&items, bounds_of, &ray, hit_fn, &cfg).unwrap_or_else(|| panic!("{:?} missed", accel));
            assert!((hit.t - 9.0).abs() < 1e-3, "{:?} t={}", accel, hit.t);
        }
    }

    #[test]
    fn multi_hit_sorted_and_complete() {
        let items = spheres();
        let ray = Ray::new(Point::new(-10.0, 0.0, 0.0), Vector::new(1.0, 0.0, 0.0));
        let cfg = RaycastConfig {
            max_dist: 100.0,
            max_tests: 0,
            accel: Accel::BruteForce,
        };
        let mut out = Vec::new();
        raycast_multi(&items, bounds_of, &ray, hit_fn, &cfg, &mut out);
        assert_eq!(out.len(), 3);
        assert!(out.windows(2).all(|w| w[0].t <= w[1].t));
    }

    #[test]
    fn budget_caps_intersection_calls() {
        let items = spheres();
        let ray = Ray::new(Point::new(-10.0, 0.0, 0.0), Vector::new(1.0, 0.0, 0.0));
        let calls = Cell::new(0usize);
        let cfg = RaycastConfig {
            max_dist: 100.0,
            max_tests: 1,
            accel: Accel::BruteForce,
        };
        let counting = |r: &Ray, s: &Sphere, max_t: f32| {
            calls.set(calls.get() + 1);
            ray_sphere_intersect(r, s, max_t)
        };
        let _ = raycast(&items, bounds_of, &ray, counting, &cfg);
        assert_eq!(calls.get(), 1);
    }
}
