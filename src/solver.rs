//! Iteratively reweighted Gauss-Newton skeleton fitting (C7): rigid
//! root alignment, hierarchical pose solve, and shape solve, each against
//! a weighted mix of 3D joint, 3D bone-length, 2D reprojection, temporal
//! and regularization terms.

use nalgebra::{DMatrix, DVector, Matrix3, Matrix3x4, Vector3};

use crate::config::SolverConfig;
use crate::kinematics::{SkelModel, SkelParam};
use crate::linalg::rodrigues_jacobi;
use crate::topology;

/// One frame's fitting targets and weights, mirroring the reference's
/// `Term`. A weight of zero (the default) disables that term entirely,
/// so callers only populate the targets they have.
#[derive(Default)]
pub struct Term<'a> {
    pub w_j3d: f32,
    /// `4 x J`: xyz + confidence row.
    pub j3d_target: Option<&'a DMatrix<f32>>,

    pub w_bone3d: f32,
    /// `2 x (J-1)`: target length row + confidence row, indexed by child joint - 1.
    pub bone3d_target: Option<&'a DMatrix<f32>>,

    pub w_j2d: f32,
    pub projs: &'a [Matrix3x4<f32>],
    /// `3 x (V*J)`: u, v, confidence per view-joint column.
    pub j2d_target: Option<&'a DMatrix<f32>>,

    pub w_temporal_trans: f32,
    pub w_temporal_pose: f32,
    pub w_temporal_shape: f32,
    pub param_prev: Option<&'a SkelParam>,

    pub w_regular_pose: f32,
    pub w_regular_shape: f32,
    pub w_square_shape: f32,
}

/// Builds the orthonormal frame `[x, y, z]` from two (possibly non-
/// orthogonal) spanning vectors: `x` is the first axis, `z = x * given_y`,
/// `y = z * x` completes the right-handed basis.
fn calc_axes(x_axis: &Vector3<f32>, y_axis: &Vector3<f32>) -> Matrix3<f32> {
    let x = x_axis.normalize();
    let z = x.cross(y_axis).normalize();
    let y = z.cross(&x).normalize();
    Matrix3::from_columns(&[x, y, z])
}

/// Rigid root alignment: sets `trans` from the root joint target and the
/// root's rotation from the frame spanned by joints 1-2-3 of the target
/// versus the rest pose, per the reference `AlignRT`.
pub fn align_rt(model: &SkelModel, term: &Term, param: &mut SkelParam) {
    let j3d = term.j3d_target.expect("AlignRT requires a j3d target");
    let rest = model.rest_joints();

    param.set_trans(Vector3::new(j3d[(0, 0)], j3d[(1, 0)], j3d[(2, 0)]) - Vector3::new(rest[(0, 0)], rest[(1, 0)], rest[(2, 0)]));

    let target_axes = calc_axes(
        &(col(j3d, 2) - col(j3d, 1)),
        &(col(j3d, 3) - col(j3d, 1)),
    );
    let rest_axes = calc_axes(&(col(rest, 2) - col(rest, 1)), &(col(rest, 3) - col(rest, 1)));
    let rotation = target_axes * rest_axes.try_inverse().unwrap_or(Matrix3::identity());

    let rot3 = nalgebra::Rotation3::from_matrix(&rotation);
    if let Some((axis, angle)) = rot3.axis_angle() {
        let root = angle * axis.into_inner();
        param.pose_mut()[0] = root.x;
        param.pose_mut()[1] = root.y;
        param.pose_mut()[2] = root.z;
    }
}

fn col(m: &DMatrix<f32>, j: usize) -> Vector3<f32> {
    Vector3::new(m[(0, j)], m[(1, j)], m[(2, j)])
}

/// Hierarchical (or single-pass, if `hierarchy` is false) Gauss-Newton
/// solve over `[trans, pose]`, re-solving progressively deeper joint
/// cutoffs when `hierarchy` is set so shallow joints stabilize before
/// their descendants are unlocked (§4.6 "coarse-to-fine" pass).
pub fn solve_pose(model: &SkelModel, term: &Term, param: &mut SkelParam, config: &SolverConfig, hierarchy: bool) {
    let def = topology::def(model.skel_type());
    let jblend = model.calc_j_blend(param);
    let hier_size = def.max_hierarchy();
    let mut hier = if hierarchy { 0 } else { hier_size };
    let mut j_cut = 0usize;

    while hier <= hier_size {
        while j_cut < def.joint_size && def.hierarchy[j_cut] <= hier {
            j_cut += 1;
        }
        for _ in 0..config.pose_max_iter {
            let node_warps = model.calc_node_warps(param, &jblend, j_cut);
            let chain_warps = model.calc_chain_warps(&node_warps);
            let jfinal = model.calc_j_final(&chain_warps);

            let width = 3 + 3 * j_cut;
            let mut joint_jacobi = DMatrix::<f32>::zeros(3 * j_cut, width);
            let mut ata = DMatrix::<f32>::zeros(width, width);
            let mut atb = DVector::<f32>::zeros(width);

            let node_jacobi: Vec<[Matrix3<f32>; 3]> = (0..j_cut).map(|j| rodrigues_jacobi(&param.joint_pose(j))).collect();

            for dj in 0..j_cut {
                joint_jacobi.fixed_view_mut::<3, 3>(3 * dj, 0).copy_from(&Matrix3::identity());
                for axis in 0..3 {
                    let mut d_chain: Vec<Option<nalgebra::Matrix3x4<f32>>> = vec![None; j_cut];
                    let mut valid = vec![false; j_cut];
                    valid[dj] = true;
                    let own = node_jacobi[dj][axis];
                    let own_translation_block = nalgebra::Matrix3x4::from_columns(&[
                        own.column(0).into(),
                        own.column(1).into(),
                        own.column(2).into(),
                        Vector3::zeros(),
                    ]);
                    d_chain[dj] = Some(if dj == 0 {
                        own_translation_block
                    } else {
                        let parent = def.parent[dj].expect("non-root joint has a parent");
                        to_3x4(chain_warps[parent]) * to_4x4_from_3x4(&own_translation_block)
                    });

                    for j in (dj + 1)..j_cut {
                        let parent = def.parent[j].expect("non-root joint has a parent");
                        valid[j] = valid[parent];
                        if valid[j] {
                            let dparent = d_chain[parent].expect("parent derivative computed before child");
                            let node = node_warps[j];
                            let result = to_4x4_from_3x4(&dparent) * node;
                            d_chain[j] = Some(to_3x4(result));
                            let translation = Vector3::new(result[(0, 3)], result[(1, 3)], result[(2, 3)]);
                            joint_jacobi[(3 * j, 3 + dj * 3 + axis)] = translation.x;
                            joint_jacobi[(3 * j + 1, 3 + dj * 3 + axis)] = translation.y;
                            joint_jacobi[(3 * j + 2, 3 + dj * 3 + axis)] = translation.z;
                        }
                    }
                }
            }

            if term.w_j3d > f32::EPSILON {
                if let Some(j3d) = term.j3d_target {
                    for j in 0..j_cut {
                        let confidence = j3d[(3, j)];
                        if confidence > f32::EPSILON {
                            let w = term.w_j3d * confidence;
                            let jacobi = joint_jacobi.rows(3 * j, 3);
                            ata += w * (jacobi.transpose() * jacobi);
                            let residual = col(j3d, j) - jfinal.column(j);
                            atb += w * (jacobi.transpose() * residual);
                        }
                    }
                }
            }

            if term.w_j2d > f32::EPSILON {
                if let Some(j2d) = term.j2d_target {
                    for (view, proj) in term.projs.iter().enumerate() {
                        for j in 0..j_cut {
                            let col_idx = view * def.joint_size + j;
                            let confidence = j2d[(2, col_idx)];
                            if confidence > f32::EPSILON {
                                let point = jfinal.column(j).insert_row(3, 1.0);
                                let abc = proj * point;
                                let z = abc.z;
                                if z.abs() < f32::EPSILON {
                                    continue;
                                }
                                let proj_jacobi = nalgebra::Matrix2x3::new(
                                    1.0 / z, 0.0, -abc.x / (z * z),
                                    0.0, 1.0 / z, -abc.y / (z * z),
                                ) * proj.fixed_view::<3, 3>(0, 0);
                                let w = term.w_j2d * confidence;
                                let jacobi = proj_jacobi * joint_jacobi.rows(3 * j, 3);
                                ata += w * (jacobi.transpose() * jacobi);
                                let residual = nalgebra::Vector2::new(j2d[(0, col_idx)] - abc.x / z, j2d[(1, col_idx)] - abc.y / z);
                                atb += w * (jacobi.transpose() * residual);
                            }
                        }
                    }
                }
            }

            if term.w_temporal_trans > f32::EPSILON {
                if let Some(prev) = term.param_prev {
                    for i in 0..3 {
                        ata[(i, i)] += term.w_temporal_trans;
                    }
                    let residual = prev.trans() - param.trans();
                    atb[0] += term.w_temporal_trans * residual.x;
                    atb[1] += term.w_temporal_trans * residual.y;
                    atb[2] += term.w_temporal_trans * residual.z;
                }
            }

            if term.w_temporal_pose > f32::EPSILON {
                if let Some(prev) = term.param_prev {
                    for i in 0..(3 * j_cut) {
                        ata[(3 + i, 3 + i)] += term.w_temporal_pose;
                        atb[3 + i] += term.w_temporal_pose * (prev.pose()[i] - param.pose()[i]);
                    }
                }
            }

            if term.w_regular_pose > f32::EPSILON {
                for i in 0..width {
                    ata[(i, i)] += term.w_regular_pose;
                }
            }

            let delta = match ata.clone().cholesky() {
                Some(chol) => chol.solve(&atb),
                None => break,
            };
            let target = param.trans_pose_mut();
            for i in 0..width {
                target[i] += delta[i];
            }
            if delta.norm() < config.update_thresh {
                break;
            }
        }
        hier += 1;
    }
}

fn to_3x4(m: nalgebra::Matrix4<f32>) -> nalgebra::Matrix3x4<f32> {
    nalgebra::Matrix3x4::from_columns(&[
        m.fixed_view::<3, 1>(0, 0).into_owned(),
        m.fixed_view::<3, 1>(0, 1).into_owned(),
        m.fixed_view::<3, 1>(0, 2).into_owned(),
        m.fixed_view::<3, 1>(0, 3).into_owned(),
    ])
}

fn to_4x4_from_3x4(m: &nalgebra::Matrix3x4<f32>) -> nalgebra::Matrix4<f32> {
    let mut out = nalgebra::Matrix4::zeros();
    out.fixed_view_mut::<3, 4>(0, 0).copy_from(m);
    out[(3, 3)] = 1.0;
    out
}

/// Gauss-Newton solve over the shape unknowns alone, holding pose/trans
/// fixed. Bone-length targets drive the linearized bone-shape-blend
/// Jacobian directly; 3D/2D joint targets go through the full chain warp
/// recurrence since shape perturbs every descendant joint.
pub fn solve_shape(model: &SkelModel, term: &Term, param: &mut SkelParam, config: &SolverConfig) {
    let def = topology::def(model.skel_type());

    for _ in 0..config.shape_max_iter {
        let jblend = model.calc_j_blend(param);
        let mut ata = DMatrix::<f32>::zeros(def.shape_size, def.shape_size);
        let mut atb = DVector::<f32>::zeros(def.shape_size);

        if term.w_bone3d > f32::EPSILON {
            if let Some(bone3d) = term.bone3d_target {
                for j in 1..def.joint_size {
                    let confidence = bone3d[(1, j - 1)];
                    if confidence > f32::EPSILON {
                        let w = term.w_bone3d * confidence;
                        let parent = def.parent[j].expect("non-root joint has a parent");
                        let dir = col(&jblend, j) - col(&jblend, parent);
                        let jacobi = model.bone_shape_blend().rows(3 * (j - 1), 3);
                        ata += w * (jacobi.transpose() * jacobi);
                        let residual = bone3d[(0, j - 1)] * dir.normalize() - dir;
                        atb += w * (jacobi.transpose() * residual);
                    }
                }
            }
        }

        if term.w_j3d > f32::EPSILON || term.w_j2d > f32::EPSILON {
            let node_warps = model.calc_node_warps(param, &jblend, def.joint_size);
            let chain_warps = model.calc_chain_warps(&node_warps);
            let jfinal = model.calc_j_final(&chain_warps);

            let mut joint_jacobi = DMatrix::<f32>::zeros(3 * def.joint_size, def.shape_size);
            for j in 0..def.joint_size {
                if j == 0 {
                    joint_jacobi.rows_mut(0, 3).copy_from(&model.j_shape_blend().rows(0, 3));
                } else {
                    let parent = def.parent[j].expect("non-root joint has a parent");
                    let rotation = chain_warps[parent].fixed_view::<3, 3>(0, 0).into_owned();
                    let delta_blend = model.j_shape_blend().rows(3 * j, 3) - model.j_shape_blend().rows(3 * parent, 3);
                    let value = joint_jacobi.rows(3 * parent, 3).into_owned() + rotation * delta_blend;
                    joint_jacobi.rows_mut(3 * j, 3).copy_from(&value);
                }
            }

            if term.w_j3d > f32::EPSILON {
                if let Some(j3d) = term.j3d_target {
                    for j in 0..def.joint_size {
                        let confidence = j3d[(3, j)];
                        if confidence > f32::EPSILON {
                            let w = term.w_j3d * confidence;
                            let jacobi = joint_jacobi.rows(3 * j, 3);
                            ata += w * (jacobi.transpose() * jacobi);
                            let residual = col(j3d, j) - jfinal.column(j);
                            atb += w * (jacobi.transpose() * residual);
                        }
                    }
                }
            }

            if term.w_j2d > f32::EPSILON {
                if let Some(j2d) = term.j2d_target {
                    for (view, proj) in term.projs.iter().enumerate() {
                        for j in 0..def.joint_size {
                            let col_idx = view * def.joint_size + j;
                            let confidence = j2d[(2, col_idx)];
                            if confidence > f32::EPSILON {
                                let point = jfinal.column(j).insert_row(3, 1.0);
                                let abc = proj * point;
                                let z = abc.z;
                                if z.abs() < f32::EPSILON {
                                    continue;
                                }
                                let proj_jacobi = nalgebra::Matrix2x3::new(
                                    1.0 / z, 0.0, -abc.x / (z * z),
                                    0.0, 1.0 / z, -abc.y / (z * z),
                                ) * proj.fixed_view::<3, 3>(0, 0);
                                let w = term.w_j2d * confidence;
                                let jacobi = proj_jacobi * joint_jacobi.rows(3 * j, 3);
                                ata += w * (jacobi.transpose() * jacobi);
                                let residual = nalgebra::Vector2::new(j2d[(0, col_idx)] - abc.x / z, j2d[(1, col_idx)] - abc.y / z);
                                atb += w * (jacobi.transpose() * residual);
                            }
                        }
                    }
                }
            }
        }

        if term.w_temporal_shape > f32::EPSILON {
            if let Some(prev) = term.param_prev {
                for i in 0..def.shape_size {
                    ata[(i, i)] += term.w_temporal_shape;
                    atb[i] += term.w_temporal_shape * (prev.shape()[i] - param.shape()[i]);
                }
            }
        }

        if term.w_square_shape > f32::EPSILON {
            for i in 0..def.shape_size {
                ata[(i, i)] += term.w_square_shape;
                atb[i] -= term.w_square_shape * param.shape()[i];
            }
        }

        if term.w_regular_shape > f32::EPSILON {
            for i in 0..def.shape_size {
                ata[(i, i)] += term.w_regular_shape;
            }
        }

        let delta = match ata.clone().cholesky() {
            Some(chol) => chol.solve(&atb),
            None => break,
        };
        let shape = param.shape_mut();
        for i in 0..def.shape_size {
            shape[i] += delta[i];
        }
        if delta.norm() < config.update_thresh {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::SkelType;

    fn toy_model() -> SkelModel {
        let def = topology::def(SkelType::Skel19);
        let mut joints = DMatrix::zeros(3, def.joint_size);
        for j in 0..def.joint_size {
            joints[(1, j)] = j as f32 * 0.15;
        }
        let j_shape_blend = DMatrix::zeros(3 * def.joint_size, def.shape_size);
        SkelModel::new(SkelType::Skel19, joints, j_shape_blend).unwrap()
    }

    #[test]
    fn given_translated_target_when_align_rt_then_trans_matches_offset() {
        let model = toy_model();
        let mut j3d = model.rest_joints().clone().insert_row(3, 1.0);
        for j in 0..j3d.ncols() {
            j3d[(0, j)] += 2.0;
        }
        let mut param = SkelParam::zeros(SkelType::Skel19);
        let term = Term {
            w_j3d: 1.0,
            j3d_target: Some(&j3d),
            ..Default::default()
        };
        align_rt(&model, &term, &mut param);
        assert!((param.trans().x - 2.0).abs() < 1e-4);
    }

    #[test]
    fn given_perfect_j3d_target_when_solve_pose_then_converges_near_zero_residual() {
        let model = toy_model();
        let mut truth = SkelParam::zeros(SkelType::Skel19);
        truth.set_trans(Vector3::new(0.1, 0.0, 0.0));
        truth.pose_mut()[2] = 0.2;
        let target_positions = model.solve_j_final(&truth, None);
        let mut j3d = target_positions.insert_row(3, 1.0);
        for j in 0..j3d.ncols() {
            j3d[(3, j)] = 1.0;
        }

        let mut param = SkelParam::zeros(SkelType::Skel19);
        let term = Term {
            w_j3d: 1.0,
            j3d_target: Some(&j3d),
            w_regular_pose: 1e-5,
            ..Default::default()
        };
        let config = SolverConfig::default();
        solve_pose(&model, &term, &mut param, &config, false);

        let fitted = model.solve_j_final(&param, None);
        let err = (fitted - model.solve_j_final(&truth, None)).norm();
        assert!(err < 1e-2, "residual too large: {err}");
    }
}
