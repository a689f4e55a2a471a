/// Finds the real roots of `a*x^2 + b*x + c = 0`.
///
/// Returns the roots (ascending) and how many of the two slots are valid,
/// in `[0, 2]`. Degenerate (linear, constant) and no-real-root cases are
/// all handled so callers never have to special-case the polynomial's
/// degree themselves.
pub fn quad_roots(a: f32, b: f32, c: f32) -> ([f32; 2], u8) {
    if a == 0.0 {
        if b == 0.0 {
            ([f32::NAN, f32::NAN], 0)
        } else {
            ([-c / b, f32::NAN], 1)
        }
    } else {
        let d = b * b - 4.0 * a * c;
        if d < 0.0 {
            ([f32::NAN, f32::NAN], 0)
        } else {
            let sqrt_d = d.sqrt();
            let sign = if b < 0.0 { -1.0 } else { 1.0 };
            let q = -0.5 * (b + sign * sqrt_d);
            let q_over_a = q / a;
            let other = if q == 0.0 { q_over_a } else { c / q };
            let (lo, hi) = if q_over_a < other {
                (q_over_a, other)
            } else {
                (other, q_over_a)
            };
            ([lo, hi], 2)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_distinct_roots() {
        let (roots, n) = quad_roots(1.0, -3.0, 2.0);
        assert_eq!(n, 2);
        assert!((roots[0] - 1.0).abs() < 1e-5);
        assert!((roots[1] - 2.0).abs() < 1e-5);
    }

    #[test]
    fn no_real_roots() {
        let (_, n) = quad_roots(1.0, 0.0, 1.0);
        assert_eq!(n, 0);
    }

    #[test]
    fn linear_case() {
        let (roots, n) = quad_roots(0.0, 2.0, -4.0);
        assert_eq!(n, 1);
        assert!((roots[0] - 2.0).abs() < 1e-5);
    }
}
