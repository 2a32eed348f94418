//! Small dense-linear-algebra helpers shared by the camera, kinematics and
//! solver modules: the skew-symmetric cross-product matrix, the Rodrigues
//! axis-angle rotation and its analytic derivative, and the Welsch robust
//! weight.

use nalgebra::{Matrix3, Vector3};

/// Cross-product matrix: `skew(v) * x == v.cross(&x)`.
pub fn skew(v: &Vector3<f32>) -> Matrix3<f32> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

/// Axis-angle to rotation matrix. Identity when the rotation angle is
/// below `1e-5` to avoid dividing by a near-zero norm.
pub fn rodrigues(vec: &Vector3<f32>) -> Matrix3<f32> {
    let theta = vec.norm();
    if theta.abs() < 1e-5 {
        return Matrix3::identity();
    }
    let c = theta.cos();
    let s = theta.sin();
    let r = vec / theta;
    let i = Matrix3::identity();
    c * i + (1.0 - c) * (r * r.transpose()) + s * skew(&r)
}

/// Analytic derivative of [`rodrigues`] with respect to each of the three
/// axis-angle components, returned as `[dR/dvec.x, dR/dvec.y, dR/dvec.z]`.
///
/// Ported from the reference `RodriguesJacobi`, which packs the same data
/// into a `3x9` row-major matrix (one row per component); the per-component
/// `Matrix3` form is more convenient for the chain-warp derivative
/// recurrence in `solver`.
pub fn rodrigues_jacobi(vec: &Vector3<f32>) -> [Matrix3<f32>; 3] {
    let theta = vec.norm();

    // d(skew)/d(vec_i), i = 0..3, each a 3x3 matrix.
    let d_skew = [
        Matrix3::new(0.0, 0.0, 0.0, 0.0, 0.0, -1.0, 0.0, 1.0, 0.0),
        Matrix3::new(0.0, 0.0, 1.0, 0.0, 0.0, 0.0, -1.0, 0.0, 0.0),
        Matrix3::new(0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0),
    ];

    if theta.abs() < 1e-5 {
        return [-d_skew[0], -d_skew[1], -d_skew[2]];
    }

    let c = theta.cos();
    let s = theta.sin();
    let c1 = 1.0 - c;
    let itheta = 1.0 / theta;
    let r = vec / theta;
    let rrt = r * r.transpose();
    let sk = skew(&r);
    let i3 = Matrix3::identity();

    // d(r r^T)/d(vec_i), i = 0..3, each a 3x3 matrix.
    let d_rrt = [
        Matrix3::new(
            r.x + r.x,
            r.y,
            r.z,
            r.y,
            0.0,
            0.0,
            r.z,
            0.0,
            0.0,
        ),
        Matrix3::new(
            0.0,
            r.x,
            0.0,
            r.x,
            r.y + r.y,
            r.z,
            0.0,
            r.z,
            0.0,
        ),
        Matrix3::new(
            0.0,
            0.0,
            r.x,
            0.0,
            0.0,
            r.y,
            r.x,
            r.y,
            r.z + r.z,
        ),
    ];

    let mut out = [Matrix3::zeros(); 3];
    for i in 0..3 {
        let ri = r[i];
        let a0 = -s * ri;
        let a1 = (s - 2.0 * c1 * itheta) * ri;
        let a2 = c1 * itheta;
        let a3 = (c - s * itheta) * ri;
        let a4 = s * itheta;
        let mut m = Matrix3::zeros();
        for k in 0..3 {
            for j in 0..3 {
                m[(k, j)] = a0 * i3[(j, k)]
                    + a1 * rrt[(j, k)]
                    + a2 * d_rrt[i][(j, k)]
                    + a3 * sk[(j, k)]
                    + a4 * d_skew[i][(j, k)];
            }
        }
        out[i] = m;
    }
    out
}

/// Welsch robust weight: saturates to 1 as `x` grows past scale `c`, is 0
/// at `x == 0`.
pub fn welsch(c: f32, x: f32) -> f32 {
    let t = x / c;
    1.0 - (-t * t / 2.0).exp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn given_zero_vector_when_rodrigues_then_identity() {
        let r = rodrigues(&Vector3::zeros());
        assert_relative_eq!(r, Matrix3::identity(), epsilon = 1e-6);
    }

    #[test]
    fn given_z_axis_quarter_turn_when_rodrigues_then_rotates_x_to_y() {
        let r = rodrigues(&Vector3::new(0.0, 0.0, std::f32::consts::FRAC_PI_2));
        let rotated = r * Vector3::new(1.0, 0.0, 0.0);
        assert_relative_eq!(rotated, Vector3::new(0.0, 1.0, 0.0), epsilon = 1e-5);
    }

    #[test]
    fn given_rotation_when_determinant_then_unit() {
        let r = rodrigues(&Vector3::new(0.3, -0.2, 0.5));
        assert_relative_eq!(r.determinant(), 1.0, epsilon = 1e-5);
    }

    #[test]
    fn given_rodrigues_jacobi_when_finite_differenced_then_matches_analytic() {
        let vec = Vector3::new(0.3, -0.2, 0.5);
        let analytic = rodrigues_jacobi(&vec);
        let h = 1e-4;
        for i in 0..3 {
            let mut plus = vec;
            plus[i] += h;
            let mut minus = vec;
            minus[i] -= h;
            let numeric = (rodrigues(&plus) - rodrigues(&minus)) / (2.0 * h);
            assert_relative_eq!(analytic[i], numeric, epsilon = 1e-2);
        }
    }

    #[test]
    fn given_x_equals_c_when_welsch_then_about_0point39() {
        assert_relative_eq!(welsch(1.0, 1.0), 1.0 - (-0.5f32).exp(), epsilon = 1e-6);
    }

    #[test]
    fn given_x_zero_when_welsch_then_zero() {
        assert_relative_eq!(welsch(1.0, 0.0), 0.0, epsilon = 1e-6);
    }
}
