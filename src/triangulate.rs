//! Iteratively reweighted Gauss-Newton triangulation of one 3D point from
//! N weighted 2D observations (C3).

use nalgebra::{Matrix3, Matrix3x4, Vector3};

use crate::config::TriangulationConfig;

/// One triangulation problem: per-view `(u, v, weight)` observations and
/// their `3x4` projection matrices. A view only contributes when its
/// weight is above machine epsilon.
pub struct Triangulator<'a> {
    pub points: &'a [(f32, f32, f32)],
    pub projs: &'a [Matrix3x4<f32>],
}

/// Result of a triangulation solve.
#[derive(Debug, Clone, Copy)]
pub struct TriangulationResult {
    pub pos: Vector3<f32>,
    pub loss: f32,
    pub convergent: bool,
}

impl<'a> Triangulator<'a> {
    pub fn new(points: &'a [(f32, f32, f32)], projs: &'a [Matrix3x4<f32>]) -> Self {
        Self { points, projs }
    }

    /// Gauss-Newton solve with Tikhonov regularization, per §4.3. Requires
    /// at least two views with positive weight; otherwise returns a
    /// non-convergent zero result without iterating.
    pub fn solve(&self, config: &TriangulationConfig) -> TriangulationResult {
        let valid_views = self
            .points
            .iter()
            .filter(|(_, _, w)| *w > f32::EPSILON)
            .count();
        if valid_views < 2 {
            return TriangulationResult {
                pos: Vector3::zeros(),
                loss: f32::MAX,
                convergent: false,
            };
        }

        let mut pos = Vector3::zeros();
        let mut loss = f32::MAX;
        for _ in 0..config.max_iter {
            let mut ata = Matrix3::identity() * config.regular_term;
            let mut atb = Vector3::zeros();
            for (point, proj) in self.points.iter().zip(self.projs.iter()) {
                let (u, v, w) = *point;
                if w <= f32::EPSILON {
                    continue;
                }
                let h = pos.insert_row(3, 1.0);
                let abc = proj * h;
                let z = abc.z;
                if z.abs() < f32::EPSILON {
                    continue;
                }
                let proj_uv = (abc.x / z, abc.y / z);
                // d(u,v)/d(X) = [1/z,0,-x/z^2; 0,1/z,-y/z^2] * proj[:, :3]
                let d_uv = nalgebra::Matrix2x3::new(
                    1.0 / z,
                    0.0,
                    -abc.x / (z * z),
                    0.0,
                    1.0 / z,
                    -abc.y / (z * z),
                );
                let jacobi = d_uv * proj.fixed_view::<3, 3>(0, 0);
                let residual = nalgebra::Vector2::new(u - proj_uv.0, v - proj_uv.1);
                ata += w * (jacobi.transpose() * jacobi);
                atb += w * (jacobi.transpose() * residual);
            }
            let delta = match ata.cholesky() {
                Some(chol) => chol.solve(&atb),
                None => break,
            };
            pos += delta;
            loss = delta.norm();
            if loss < config.update_tolerance {
                break;
            }
        }
        TriangulationResult {
            pos,
            loss,
            convergent: loss < config.update_tolerance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Camera;
    use approx::assert_relative_eq;

    fn camera_at(tx: f32) -> Camera {
        Camera::new(
            "c",
            Matrix3::new(500.0, 0.0, 320.0, 0.0, 500.0, 240.0, 0.0, 0.0, 1.0),
            Matrix3::identity(),
            Vector3::new(tx, 0.0, 0.0),
            (640, 480),
            vec![],
            None,
        )
        .unwrap()
    }

    #[test]
    fn given_three_noiseless_views_when_solve_then_converges_to_point() {
        let x = Vector3::new(0.2, -0.3, 2.0);
        let cams = [camera_at(-0.3), camera_at(0.0), camera_at(0.4)];
        let points: Vec<(f32, f32, f32)> = cams
            .iter()
            .map(|c| {
                let (u, v) = c.project(&x);
                (u, v, 1.0)
            })
            .collect();
        let projs: Vec<Matrix3x4<f32>> = cams.iter().map(|c| *c.proj()).collect();
        let tri = Triangulator::new(&points, &projs);
        let result = tri.solve(&TriangulationConfig::default());
        assert!(result.convergent);
        assert_relative_eq!(result.pos, x, epsilon = 1e-3);
    }

    #[test]
    fn given_single_valid_view_when_solve_then_non_convergent() {
        let cam = camera_at(0.0);
        let points = [(320.0, 240.0, 1.0), (0.0, 0.0, 0.0)];
        let projs = [*cam.proj(), *cam.proj()];
        let tri = Triangulator::new(&points, &projs);
        let result = tri.solve(&TriangulationConfig::default());
        assert!(!result.convergent);
    }

    #[test]
    fn given_zero_weight_views_when_solve_then_not_counted_as_valid() {
        let points = [(1.0, 1.0, 0.0), (2.0, 2.0, 0.0), (3.0, 3.0, 1.0)];
        let cam = camera_at(0.0);
        let projs = [*cam.proj(), *cam.proj(), *cam.proj()];
        let tri = Triangulator::new(&points, &projs);
        let result = tri.solve(&TriangulationConfig::default());
        assert!(!result.convergent);
    }
}
