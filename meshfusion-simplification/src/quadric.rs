//! Quadric error metrics
//!
//! Each vertex accumulates the plane equations of its faces as a 4x4
//! quadric. The error of moving a vertex to `p` is the sum of squared
//! distances from `p` to those planes.

use meshfusion_core::Point3f;
use nalgebra::{Matrix3, Matrix4, Vector3, Vector4};

pub type Quadric = Matrix4<f64>;

#[inline]
pub fn to_f64(p: &Point3f) -> Vector3<f64> {
    p.coords.cast::<f64>()
}

/// Quadric of the plane through a triangle, `None` for zero-area triangles
pub fn face_quadric(a: &Point3f, b: &Point3f, c: &Point3f) -> Option<Quadric> {
    let (a, b, c) = (to_f64(a), to_f64(b), to_f64(c));
    let normal = (b - a).cross(&(c - a));
    let length = normal.norm();
    if !(length.is_finite() && length > 0.0) {
        return None;
    }
    let n = normal / length;
    let plane = Vector4::new(n.x, n.y, n.z, -n.dot(&a));
    Some(plane * plane.transpose())
}

/// Sum of squared plane distances folded into `q`
pub fn quadric_error(q: &Quadric, p: &Vector3<f64>) -> f64 {
    let h = Vector4::new(p.x, p.y, p.z, 1.0);
    h.dot(&(q * h)).max(0.0)
}

/// Cheapest position for the vertex replacing edge `(a, b)` and its error.
///
/// The unconstrained optimum is used when the quadric can be inverted and
/// the optimum stays near the edge; the midpoint and both endpoints are
/// always considered too.
pub fn best_position(q: &Quadric, a: &Point3f, b: &Point3f) -> (Vector3<f64>, f64) {
    let (a, b) = (to_f64(a), to_f64(b));
    let midpoint = (a + b) * 0.5;

    let system: Matrix3<f64> = q.fixed_view::<3, 3>(0, 0).into_owned();
    let rhs: Vector3<f64> = -q.fixed_view::<3, 1>(0, 3).into_owned();
    let reach = 2.0 * (b - a).norm();
    let optimum = system
        .try_inverse()
        .map(|inverse| inverse * rhs)
        .filter(|p| p.iter().all(|x| x.is_finite()) && (p - midpoint).norm() <= reach);

    let mut best = (midpoint, quadric_error(q, &midpoint));
    for p in optimum.into_iter().chain([a, b]) {
        let error = quadric_error(q, &p);
        if error < best.1 {
            best = (p, error);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_face_quadric_measures_plane_distance() {
        let q = face_quadric(
            &Point3f::new(0.0, 0.0, 1.0),
            &Point3f::new(1.0, 0.0, 1.0),
            &Point3f::new(0.0, 1.0, 1.0),
        )
        .unwrap();
        assert_relative_eq!(quadric_error(&q, &Vector3::new(5.0, -3.0, 1.0)), 0.0, epsilon = 1e-12);
        assert_relative_eq!(quadric_error(&q, &Vector3::new(0.0, 0.0, 3.0)), 4.0, epsilon = 1e-12);

        let flat = Point3f::new(1.0, 1.0, 1.0);
        assert!(face_quadric(&flat, &flat, &Point3f::origin()).is_none());
    }

    #[test]
    fn test_best_position_finds_corner() {
        // three orthogonal planes meeting at (1, 2, 3)
        let corner = Point3f::new(1.0, 2.0, 3.0);
        let q = [
            face_quadric(&corner, &(corner + Vector3::x()), &(corner + Vector3::y())),
            face_quadric(&corner, &(corner + Vector3::y()), &(corner + Vector3::z())),
            face_quadric(&corner, &(corner + Vector3::z()), &(corner + Vector3::x())),
        ]
        .into_iter()
        .flatten()
        .fold(Quadric::zeros(), |acc, q| acc + q);

        let (p, error) = best_position(&q, &Point3f::new(1.2, 2.0, 3.0), &Point3f::new(0.9, 2.1, 3.0));
        assert_relative_eq!(p, to_f64(&corner), epsilon = 1e-9);
        assert_relative_eq!(error, 0.0, epsilon = 1e-12);

        // a single plane cannot be inverted: the midpoint is as good as any
        let plane = face_quadric(&corner, &(corner + Vector3::x()), &(corner + Vector3::y())).unwrap();
        let (p, _) = best_position(&plane, &Point3f::new(0.0, 0.0, 3.0), &Point3f::new(2.0, 0.0, 3.0));
        assert_relative_eq!(p, Vector3::new(1.0, 0.0, 3.0), epsilon = 1e-9);
    }
}
