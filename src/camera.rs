//! Camera model and ray/epipolar geometry (C2).

use nalgebra::{Matrix3, Matrix3x4, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackError};
use crate::linalg::skew;

/// One calibrated camera: pinhole intrinsics/extrinsics plus the derived
/// projection matrix and center. Rectification fields are parsed and kept
/// for round-tripping the calibration file but do not participate in
/// `ray`/`project`/`fundamental`, which (like the reference camera model)
/// operate on `k`/`r`/`t` only.
#[derive(Debug, Clone)]
pub struct Camera {
    pub name: String,
    pub k: Matrix3<f32>,
    pub r: Matrix3<f32>,
    pub t: Vector3<f32>,
    pub img_size: (u32, u32),
    pub dist_coeff: Vec<f32>,
    pub rectify_alpha: Option<f32>,
    proj: Matrix3x4<f32>,
    center: Vector3<f32>,
    k_inv: Matrix3<f32>,
}

impl Camera {
    pub fn new(
        name: impl Into<String>,
        k: Matrix3<f32>,
        r: Matrix3<f32>,
        t: Vector3<f32>,
        img_size: (u32, u32),
        dist_coeff: Vec<f32>,
        rectify_alpha: Option<f32>,
    ) -> Result<Self> {
        let k_inv = k
            .try_inverse()
            .ok_or_else(|| TrackError::Configuration("camera K is not invertible".into()))?;
        let mut rt = Matrix3x4::zeros();
        rt.fixed_view_mut::<3, 3>(0, 0).copy_from(&r);
        rt.fixed_view_mut::<3, 1>(0, 3).copy_from(&t);
        let proj = k * rt;
        let center = -(r.transpose() * t);
        Ok(Self {
            name: name.into(),
            k,
            r,
            t,
            img_size,
            dist_coeff,
            rectify_alpha,
            proj,
            center,
            k_inv,
        })
    }

    pub fn proj(&self) -> &Matrix3x4<f32> {
        &self.proj
    }

    pub fn center(&self) -> Vector3<f32> {
        self.center
    }

    /// Projects a homogeneous 3D point to pixel coordinates `(u, v)`.
    pub fn project(&self, x: &Vector3<f32>) -> (f32, f32) {
        let h = x.insert_row(3, 1.0);
        let p = self.proj * h;
        (p.x / p.z, p.y / p.z)
    }

    /// World-space unit ray through pixel `(u, v)`.
    pub fn ray(&self, u: f32, v: f32) -> Vector3<f32> {
        let uv1 = Vector3::new(u, v, 1.0);
        let dir = -(self.r.transpose() * (self.k_inv * uv1));
        dir.normalize()
    }

    /// Fundamental matrix mapping a point in `self` to its epipolar line in
    /// `other`: `Kᴬ⁻ᵀ · skew(t_rel) · R_rel · Kᴮ⁻¹`.
    pub fn fundamental(&self, other: &Camera) -> Matrix3<f32> {
        let rela_r = self.r * other.r.transpose();
        let rela_t = self.t - rela_r * other.t;
        self.k_inv.transpose() * skew(&rela_t) * rela_r * other.k_inv
    }
}

/// Point–line distance: `‖(pA − pB) × rayA‖`.
pub fn point_line_dist(p_a: &Vector3<f32>, p_b: &Vector3<f32>, ray_a: &Vector3<f32>) -> f32 {
    (p_a - p_b).cross(ray_a).norm()
}

/// Line–line distance. Falls back to point–line distance when the two
/// rays are nearly parallel (`|rayA·rayB| ≥ 1 − 1e-5`... rather, the
/// reference guards on `|rayA·rayB| < 1e-5`, i.e. near-*perpendicular*
/// doesn't apply here — the guard is on the rays' cross product norm
/// being too small to normalize safely).
pub fn line_line_dist(
    p_a: &Vector3<f32>,
    ray_a: &Vector3<f32>,
    p_b: &Vector3<f32>,
    ray_b: &Vector3<f32>,
) -> f32 {
    let cross = ray_a.cross(ray_b);
    if cross.norm() < 1e-5 {
        return point_line_dist(p_a, p_b, ray_a);
    }
    ((p_a - p_b).dot(&cross.normalize())).abs()
}

/// On-disk calibration entry (§6): `K` row-major 3x3, rotation given as
/// either 3 Rodrigues components, a 9-element row-major matrix, or folded
/// into a 12-element `RT` block together with translation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraEntry {
    pub name: String,
    #[serde(rename = "K")]
    pub k: [f32; 9],
    #[serde(rename = "R", default, skip_serializing_if = "Option::is_none")]
    pub r: Option<Vec<f32>>,
    #[serde(rename = "T", default, skip_serializing_if = "Option::is_none")]
    pub t: Option<[f32; 3]>,
    #[serde(rename = "RT", default, skip_serializing_if = "Option::is_none")]
    pub rt: Option<[f32; 12]>,
    pub img_size: (u32, u32),
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dist_coeff: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rectify_alpha: Option<f32>,
}

fn mat3_row_major(v: &[f32; 9]) -> Matrix3<f32> {
    Matrix3::new(v[0], v[1], v[2], v[3], v[4], v[5], v[6], v[7], v[8])
}

impl CameraEntry {
    pub fn into_camera(self) -> Result<Camera> {
        let k = mat3_row_major(&self.k);
        let (r, t) = if let Some(rt) = self.rt {
            let r = Matrix3::new(
                rt[0], rt[1], rt[2], rt[4], rt[5], rt[6], rt[8], rt[9], rt[10],
            );
            let t = Vector3::new(rt[3], rt[7], rt[11]);
            (r, t)
        } else {
            let r_raw = self.r.ok_or_else(|| {
                TrackError::Configuration(format!("camera {}: missing R or RT", self.name))
            })?;
            let t_raw = self.t.ok_or_else(|| {
                TrackError::Configuration(format!("camera {}: missing T", self.name))
            })?;
            let r = match r_raw.len() {
                3 => crate::linalg::rodrigues(&Vector3::new(r_raw[0], r_raw[1], r_raw[2])),
                9 => mat3_row_major(&[
                    r_raw[0], r_raw[1], r_raw[2], r_raw[3], r_raw[4], r_raw[5], r_raw[6],
                    r_raw[7], r_raw[8],
                ]),
                n => {
                    return Err(TrackError::Configuration(format!(
                        "camera {}: R must have 3 or 9 entries, got {n}",
                        self.name
                    )))
                }
            };
            (r, Vector3::new(t_raw[0], t_raw[1], t_raw[2]))
        };
        Camera::new(
            self.name,
            k,
            r,
            t,
            self.img_size,
            self.dist_coeff,
            self.rectify_alpha,
        )
    }
}

/// Parses a calibration file (§6): a JSON array of [`CameraEntry`],
/// preserving file order (insertion order of cameras by name is part of
/// the determinism law in §8).
pub fn parse_cameras(json: &str) -> Result<Vec<Camera>> {
    let entries: Vec<CameraEntry> = serde_json::from_str(json).map_err(|e| TrackError::Parse {
        what: "camera calibration".into(),
        reason: e.to_string(),
    })?;
    entries.into_iter().map(CameraEntry::into_camera).collect()
}

/// Serializes cameras back to the calibration JSON format.
pub fn serialize_cameras(cameras: &[Camera]) -> Result<String> {
    let entries: Vec<CameraEntry> = cameras
        .iter()
        .map(|c| {
            let rt = {
                let mut v = [0.0f32; 12];
                for row in 0..3 {
                    for col in 0..3 {
                        v[row * 4 + col] = c.r[(row, col)];
                    }
                    v[row * 4 + 3] = c.t[row];
                }
                v
            };
            CameraEntry {
                name: c.name.clone(),
                k: [
                    c.k[(0, 0)],
                    c.k[(0, 1)],
                    c.k[(0, 2)],
                    c.k[(1, 0)],
                    c.k[(1, 1)],
                    c.k[(1, 2)],
                    c.k[(2, 0)],
                    c.k[(2, 1)],
                    c.k[(2, 2)],
                ],
                r: None,
                t: None,
                rt: Some(rt),
                img_size: c.img_size,
                dist_coeff: c.dist_coeff.clone(),
                rectify_alpha: c.rectify_alpha,
            }
        })
        .collect();
    serde_json::to_string_pretty(&entries).map_err(|e| TrackError::Parse {
        what: "camera calibration".into(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn identity_camera(name: &str, t: Vector3<f32>) -> Camera {
        Camera::new(
            name,
            Matrix3::new(500.0, 0.0, 320.0, 0.0, 500.0, 240.0, 0.0, 0.0, 1.0),
            Matrix3::identity(),
            t,
            (640, 480),
            vec![],
            None,
        )
        .unwrap()
    }

    #[test]
    fn given_synthetic_point_when_project_then_ray_contains_point() {
        let cam = identity_camera("cam0", Vector3::new(0.0, 0.0, -5.0));
        let x = Vector3::new(0.3, -0.2, 1.5);
        let (u, v) = cam.project(&x);
        let ray = cam.ray(u, v);
        let center = cam.center();
        let d = point_line_dist(&x, &center, &ray);
        assert!(d < 1e-4, "distance {d} too large");
    }

    #[test]
    fn given_parallel_rays_when_line_line_dist_then_falls_back_to_point_line() {
        let p_a = Vector3::new(0.0, 0.0, 0.0);
        let p_b = Vector3::new(1.0, 0.0, 0.0);
        let ray = Vector3::new(0.0, 0.0, 1.0);
        let d = line_line_dist(&p_a, &ray, &p_b, &ray);
        assert_relative_eq!(d, point_line_dist(&p_a, &p_b, &ray), epsilon = 1e-6);
    }

    #[test]
    fn given_two_cameras_when_fundamental_then_epipolar_constraint_holds() {
        let cam_a = identity_camera("a", Vector3::new(0.0, 0.0, 0.0));
        let cam_b = identity_camera("b", Vector3::new(0.5, 0.0, 0.0));
        let f = cam_a.fundamental(&cam_b);
        let x = Vector3::new(0.2, 0.1, 2.0);
        let (ua, va) = cam_a.project(&x);
        let (ub, vb) = cam_b.project(&x);
        let pa = Vector3::new(ua, va, 1.0);
        let pb = Vector3::new(ub, vb, 1.0);
        let residual = pa.dot(&(f * pb));
        assert!(residual.abs() < 1e-3, "residual {residual} too large");
    }

    #[test]
    fn given_rt_entry_when_into_camera_then_rotation_is_orthonormal() {
        let entry = CameraEntry {
            name: "c".into(),
            k: [500.0, 0.0, 320.0, 0.0, 500.0, 240.0, 0.0, 0.0, 1.0],
            r: None,
            t: None,
            rt: Some([1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0]),
            img_size: (640, 480),
            dist_coeff: vec![],
            rectify_alpha: None,
        };
        let cam = entry.into_camera().unwrap();
        let rrt = cam.r * cam.r.transpose();
        assert_relative_eq!(rrt, Matrix3::identity(), epsilon = 1e-5);
    }

    #[test]
    fn given_cameras_when_round_tripped_through_json_then_matrices_match() {
        let cams = vec![identity_camera("cam0", Vector3::new(0.1, 0.2, 0.3))];
        let json = serialize_cameras(&cams).unwrap();
        let parsed = parse_cameras(&json).unwrap();
        assert_relative_eq!(parsed[0].k, cams[0].k, epsilon = 1e-5);
        assert_relative_eq!(parsed[0].t, cams[0].t, epsilon = 1e-5);
    }
}
