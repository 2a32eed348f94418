//! Skeleton template model and forward kinematics (C6): rest pose, shape
//! blend, and the node/chain warp recurrence that turns a pose+shape
//! parameter vector into final joint positions.

use std::path::Path;

use nalgebra::{DMatrix, Matrix3, Matrix4, Vector3};

use crate::error::{Result, TrackError};
use crate::linalg::rodrigues;
use crate::topology::{self, SkelType};

/// One skeleton's trans/pose/shape unknowns, laid out as a single flat
/// vector: `[trans(3), pose(3*J), shape(S)]`, mirroring the reference
/// `SkelParam` so the solver's block-indexed Jacobian assembly reads the
/// same way.
#[derive(Debug, Clone)]
pub struct SkelParam {
    pub skel_type: SkelType,
    data: Vec<f32>,
}

impl SkelParam {
    pub fn zeros(skel_type: SkelType) -> Self {
        let def = topology::def(skel_type);
        let len = 3 + def.joint_size * 3 + def.shape_size;
        SkelParam {
            skel_type,
            data: vec![0.0; len],
        }
    }

    pub fn trans(&self) -> Vector3<f32> {
        Vector3::new(self.data[0], self.data[1], self.data[2])
    }

    pub fn set_trans(&mut self, t: Vector3<f32>) {
        self.data[0] = t.x;
        self.data[1] = t.y;
        self.data[2] = t.z;
    }

    pub fn pose(&self) -> &[f32] {
        let def = topology::def(self.skel_type);
        &self.data[3..3 + def.joint_size * 3]
    }

    pub fn pose_mut(&mut self) -> &mut [f32] {
        let def = topology::def(self.skel_type);
        &mut self.data[3..3 + def.joint_size * 3]
    }

    pub fn joint_pose(&self, j: usize) -> Vector3<f32> {
        let p = self.pose();
        Vector3::new(p[3 * j], p[3 * j + 1], p[3 * j + 2])
    }

    pub fn shape(&self) -> &[f32] {
        let def = topology::def(self.skel_type);
        &self.data[3 + def.joint_size * 3..]
    }

    pub fn shape_mut(&mut self) -> &mut [f32] {
        let def = topology::def(self.skel_type);
        let off = 3 + def.joint_size * 3;
        &mut self.data[off..]
    }

    /// `[trans, pose]` as one contiguous slice, the solve target of
    /// `solve_pose`'s Gauss-Newton update.
    pub fn trans_pose_mut(&mut self) -> &mut [f32] {
        let def = topology::def(self.skel_type);
        &mut self.data[..3 + def.joint_size * 3]
    }
}

/// Rest-pose joints and shape-blend matrix loaded from a skeleton template
/// directory (`joints.txt`, `jshape_blend.txt`), plus the per-bone blend
/// derived from it at construction time.
pub struct SkelModel {
    skel_type: SkelType,
    /// `3 x J` rest-pose joint positions.
    joints: DMatrix<f32>,
    /// `(3*J) x S` per-joint shape blend matrix.
    j_shape_blend: DMatrix<f32>,
    /// `(3*(J-1)) x S` per-bone shape blend, `jShapeBlend[j] - jShapeBlend[parent[j]]`.
    bone_shape_blend: DMatrix<f32>,
}

impl SkelModel {
    pub fn new(skel_type: SkelType, joints: DMatrix<f32>, j_shape_blend: DMatrix<f32>) -> Result<Self> {
        let def = topology::def(skel_type);
        if joints.nrows() != 3 || joints.ncols() != def.joint_size {
            return Err(TrackError::InputShape(format!(
                "expected joints 3x{}, got {}x{}",
                def.joint_size,
                joints.nrows(),
                joints.ncols()
            )));
        }
        if j_shape_blend.nrows() != 3 * def.joint_size || j_shape_blend.ncols() != def.shape_size {
            return Err(TrackError::InputShape(format!(
                "expected jShapeBlend {}x{}, got {}x{}",
                3 * def.joint_size,
                def.shape_size,
                j_shape_blend.nrows(),
                j_shape_blend.ncols()
            )));
        }

        let mut bone_shape_blend = DMatrix::zeros(3 * (def.joint_size.saturating_sub(1)), def.shape_size);
        for j in 1..def.joint_size {
            let parent = def.parent[j].expect("non-root joint has a parent");
            let row = 3 * (j - 1);
            bone_shape_blend
                .rows_mut(row, 3)
                .copy_from(&(j_shape_blend.rows(3 * j, 3) - j_shape_blend.rows(3 * parent, 3)));
        }

        Ok(SkelModel {
            skel_type,
            joints,
            j_shape_blend,
            bone_shape_blend,
        })
    }

    pub fn skel_type(&self) -> SkelType {
        self.skel_type
    }

    pub fn rest_joints(&self) -> &DMatrix<f32> {
        &self.joints
    }

    pub fn j_shape_blend(&self) -> &DMatrix<f32> {
        &self.j_shape_blend
    }

    pub fn bone_shape_blend(&self) -> &DMatrix<f32> {
        &self.bone_shape_blend
    }

    /// `jBlend = restJoints + reshape(jShapeBlend * shape, 3, J)`.
    pub fn calc_j_blend(&self, param: &SkelParam) -> DMatrix<f32> {
        let def = topology::def(self.skel_type);
        let shape = nalgebra::DVector::from_row_slice(param.shape());
        let offset = &self.j_shape_blend * shape;
        let mut jblend = self.joints.clone();
        for j in 0..def.joint_size {
            jblend[(0, j)] += offset[3 * j];
            jblend[(1, j)] += offset[3 * j + 1];
            jblend[(2, j)] += offset[3 * j + 2];
        }
        jblend
    }

    /// Per-joint local `4x4` rigid transform: identity rotation composed
    /// with the Rodrigues rotation of `param.pose[j]`, translation from the
    /// rest offset to parent (or `jBlend[0] + trans` for the root). Only
    /// the first `j_cut` joints are computed (solver hierarchy cutoff).
    pub fn calc_node_warps(&self, param: &SkelParam, jblend: &DMatrix<f32>, j_cut: usize) -> Vec<Matrix4<f32>> {
        let def = topology::def(self.skel_type);
        let mut out = Vec::with_capacity(j_cut);
        for j in 0..j_cut {
            let rotation = rodrigues(&param.joint_pose(j));
            let translation = if j == 0 {
                Vector3::new(jblend[(0, j)], jblend[(1, j)], jblend[(2, j)]) + param.trans()
            } else {
                let parent = def.parent[j].expect("non-root joint has a parent");
                Vector3::new(jblend[(0, j)], jblend[(1, j)], jblend[(2, j)])
                    - Vector3::new(jblend[(0, parent)], jblend[(1, parent)], jblend[(2, parent)])
            };
            out.push(homogeneous(&rotation, &translation));
        }
        out
    }

    /// Chains each node warp onto its parent's, in topological order
    /// (`parent[j] < j` guarantees a single left-to-right pass suffices).
    pub fn calc_chain_warps(&self, node_warps: &[Matrix4<f32>]) -> Vec<Matrix4<f32>> {
        let def = topology::def(self.skel_type);
        let mut out = Vec::with_capacity(node_warps.len());
        for (j, warp) in node_warps.iter().enumerate() {
            if j == 0 {
                out.push(*warp);
            } else {
                let parent = def.parent[j].expect("non-root joint has a parent");
                out.push(out[parent] * warp);
            }
        }
        out
    }

    /// Extracts the translation column of each chain warp: the final
    /// joint position in world space.
    pub fn calc_j_final(&self, chain_warps: &[Matrix4<f32>]) -> DMatrix<f32> {
        let mut out = DMatrix::zeros(3, chain_warps.len());
        for (j, warp) in chain_warps.iter().enumerate() {
            out[(0, j)] = warp[(0, 3)];
            out[(1, j)] = warp[(1, 3)];
            out[(2, j)] = warp[(2, 3)];
        }
        out
    }

    /// Convenience: full forward kinematics from `param` alone, optionally
    /// cut off after `j_cut` joints (all joints if `None`).
    pub fn solve_j_final(&self, param: &SkelParam, j_cut: Option<usize>) -> DMatrix<f32> {
        let def = topology::def(self.skel_type);
        let j_cut = j_cut.unwrap_or(def.joint_size).min(def.joint_size);
        let jblend = self.calc_j_blend(param);
        let node_warps = self.calc_node_warps(param, &jblend, j_cut);
        let chain_warps = self.calc_chain_warps(&node_warps);
        self.calc_j_final(&chain_warps)
    }
}

fn parse_floats(what: &str, content: &str) -> Result<Vec<f32>> {
    content
        .split_whitespace()
        .map(|tok| {
            tok.parse::<f32>().map_err(|e| TrackError::Parse {
                what: what.into(),
                reason: e.to_string(),
            })
        })
        .collect()
}

/// Loads a skeleton template model from a directory (§6): `joints.txt`
/// (`J x 3`, one rest joint per line) and `jshape_blend.txt` (`(3*J) x S`,
/// row-major), transposing the former into the internal `3 x J` layout.
pub fn load_skel_model(skel_type: SkelType, dir: &Path) -> Result<SkelModel> {
    let def = topology::def(skel_type);

    let joints_path = dir.join("joints.txt");
    let joints_content = std::fs::read_to_string(&joints_path)?;
    let joints_flat = parse_floats("joints.txt", &joints_content)?;
    if joints_flat.len() != def.joint_size * 3 {
        return Err(TrackError::InputShape(format!(
            "joints.txt: expected {} values ({} x 3), got {}",
            def.joint_size * 3,
            def.joint_size,
            joints_flat.len()
        )));
    }
    let mut joints = DMatrix::zeros(3, def.joint_size);
    for j in 0..def.joint_size {
        joints[(0, j)] = joints_flat[3 * j];
        joints[(1, j)] = joints_flat[3 * j + 1];
        joints[(2, j)] = joints_flat[3 * j + 2];
    }

    let blend_path = dir.join("jshape_blend.txt");
    let blend_content = std::fs::read_to_string(&blend_path)?;
    let blend_flat = parse_floats("jshape_blend.txt", &blend_content)?;
    let blend_rows = 3 * def.joint_size;
    if blend_flat.len() != blend_rows * def.shape_size {
        return Err(TrackError::InputShape(format!(
            "jshape_blend.txt: expected {} values ({} x {}), got {}",
            blend_rows * def.shape_size,
            blend_rows,
            def.shape_size,
            blend_flat.len()
        )));
    }
    let j_shape_blend = DMatrix::from_row_slice(blend_rows, def.shape_size, &blend_flat);

    SkelModel::new(skel_type, joints, j_shape_blend)
}

fn homogeneous(rotation: &Matrix3<f32>, translation: &Vector3<f32>) -> Matrix4<f32> {
    let mut m = Matrix4::identity();
    m.fixed_view_mut::<3, 3>(0, 0).copy_from(rotation);
    m.fixed_view_mut::<3, 1>(0, 3).copy_from(translation);
    m
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy_model() -> SkelModel {
        let def = topology::def(SkelType::Skel19);
        let mut joints = DMatrix::zeros(3, def.joint_size);
        for j in 0..def.joint_size {
            joints[(1, j)] = j as f32 * 0.1;
        }
        let j_shape_blend = DMatrix::zeros(3 * def.joint_size, def.shape_size);
        SkelModel::new(SkelType::Skel19, joints, j_shape_blend).unwrap()
    }

    #[test]
    fn given_zero_param_when_solve_j_final_then_matches_rest_joints_plus_trans() {
        let model = toy_model();
        let mut param = SkelParam::zeros(SkelType::Skel19);
        param.set_trans(Vector3::new(1.0, 2.0, 3.0));
        let jfinal = model.solve_j_final(&param, None);
        assert!((jfinal[(0, 0)] - 1.0).abs() < 1e-6);
        assert!((jfinal[(1, 0)] - 2.0).abs() < 1e-6);
        assert!((jfinal[(2, 0)] - 3.0).abs() < 1e-6);
    }

    #[test]
    fn given_mismatched_joint_shape_when_new_then_input_shape_error() {
        let bad_joints = DMatrix::zeros(3, 5);
        let j_shape_blend = DMatrix::zeros(3 * 19, 10);
        assert!(SkelModel::new(SkelType::Skel19, bad_joints, j_shape_blend).is_err());
    }

    #[test]
    fn given_root_rotation_when_node_warps_then_only_root_rotated() {
        let model = toy_model();
        let mut param = SkelParam::zeros(SkelType::Skel19);
        param.pose_mut()[2] = std::f32::consts::FRAC_PI_2;
        let jblend = model.calc_j_blend(&param);
        let node_warps = model.calc_node_warps(&param, &jblend, 2);
        let rotated = node_warps[0].fixed_view::<3, 3>(0, 0) * Vector3::new(1.0, 0.0, 0.0);
        assert!((rotated - Vector3::new(0.0, 1.0, 0.0)).norm() < 1e-5);
    }

    #[test]
    fn given_model_directory_when_load_skel_model_then_joints_transposed_correctly() {
        let def = topology::def(SkelType::Skel19);
        let dir = std::env::temp_dir().join(format!("mvskel_test_model_{:?}", std::thread::current().id()));
        std::fs::create_dir_all(&dir).unwrap();

        let mut joints_txt = String::new();
        for j in 0..def.joint_size {
            joints_txt.push_str(&format!("{} {} {}\n", j as f32, j as f32 * 2.0, j as f32 * 3.0));
        }
        std::fs::write(dir.join("joints.txt"), joints_txt).unwrap();

        let blend_rows = 3 * def.joint_size;
        let mut blend_txt = String::new();
        for _ in 0..(blend_rows * def.shape_size) {
            blend_txt.push_str("0.0 ");
        }
        std::fs::write(dir.join("jshape_blend.txt"), blend_txt).unwrap();

        let model = load_skel_model(SkelType::Skel19, &dir).unwrap();
        assert_eq!(model.rest_joints()[(0, 3)], 3.0);
        assert_eq!(model.rest_joints()[(1, 3)], 6.0);
        assert_eq!(model.rest_joints()[(2, 3)], 9.0);

        std::fs::remove_dir_all(&dir).ok();
    }
}
