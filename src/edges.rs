//! Per-frame edge builder (C4): joint rays, PAF normalization, epipolar and
//! temporal compatibility matrices at joint and bone level.

use nalgebra::DMatrix;
use rayon::prelude::*;

use crate::camera::{line_line_dist, point_line_dist, Camera};
use crate::config::AssociationConfig;
use crate::detection::{self, Detection};
use crate::skeleton::Skeleton3d;
use crate::topology::{self, SkelType};

fn normalize_in_place(m: &mut DMatrix<f32>) {
    if m.nrows() == 0 || m.ncols() == 0 {
        return;
    }
    let row_factor: Vec<f32> = (0..m.nrows()).map(|r| m.row(r).sum().max(1.0)).collect();
    let col_factor: Vec<f32> = (0..m.ncols()).map(|c| m.column(c).sum().max(1.0)).collect();
    for r in 0..m.nrows() {
        for c in 0..m.ncols() {
            m[(r, c)] /= row_factor[r];
        }
    }
    for c in 0..m.ncols() {
        for r in 0..m.nrows() {
            m[(r, c)] /= col_factor[c];
        }
    }
}

/// Row/column-normalizes every detection's PAF matrices in place, per §4.4.
pub fn normalize_pafs(detections: &mut [Detection], normalize_edges: bool) {
    if !normalize_edges {
        return;
    }
    detections.par_iter_mut().for_each(|detection| {
        for paf in detection.pafs.iter_mut() {
            normalize_in_place(paf);
        }
    });
}

/// `rays[view][joint][candidate]`.
pub type JointRays = Vec<Vec<Vec<nalgebra::Vector3<f32>>>>;

pub fn calc_joint_rays(detections: &[Detection], cameras: &[Camera]) -> JointRays {
    detections
        .par_iter()
        .zip(cameras.par_iter())
        .map(|(detection, cam)| {
            detection
                .joints
                .iter()
                .map(|jc| {
                    (0..jc.len())
                        .map(|k| cam.ray(jc.u[k], jc.v[k]))
                        .collect()
                })
                .collect()
        })
        .collect()
}

/// The full edge set computed once per frame before association (C4).
pub struct EdgeSet {
    /// `epi[j][viewA][viewB]`, both directions filled (B,A is the transpose).
    pub epi: Vec<Vec<Vec<DMatrix<f32>>>>,
    /// `temp[j][view]`: rows = prior persons, cols = candidates.
    pub temp: Vec<Vec<DMatrix<f32>>>,
    /// `bone_nodes[paf][view]`.
    pub bone_nodes: Vec<Vec<Vec<(usize, usize)>>>,
    /// `bone_epi[paf][viewA][viewB]`, both directions filled.
    pub bone_epi: Vec<Vec<Vec<DMatrix<f32>>>>,
    /// `bone_temp[paf][view]`: rows = prior persons, cols = bones.
    pub bone_temp: Vec<Vec<DMatrix<f32>>>,
}

impl EdgeSet {
    pub fn build(
        skel_type: SkelType,
        detections: &[Detection],
        cameras: &[Camera],
        rays: &JointRays,
        priors: &[Skeleton3d],
        config: &AssociationConfig,
    ) -> EdgeSet {
        let def = topology::def(skel_type);
        let n_views = detections.len();
        let n_joints = def.joint_size;

        let epi: Vec<Vec<Vec<DMatrix<f32>>>> = (0..n_joints)
            .into_par_iter()
            .map(|j| calc_epi_for_joint(j, detections, cameras, rays, config))
            .collect();

        let temp: Vec<Vec<DMatrix<f32>>> = (0..n_joints)
            .into_par_iter()
            .map(|j| calc_temp_for_joint(j, detections, cameras, rays, priors, config))
            .collect();

        let bone_nodes: Vec<Vec<Vec<(usize, usize)>>> = (0..def.paf_size())
            .into_par_iter()
            .map(|p| (0..n_views).map(|v| detection::bone_nodes(&detections[v], p)).collect())
            .collect();

        let bone_epi: Vec<Vec<Vec<DMatrix<f32>>>> = (0..def.paf_size())
            .into_par_iter()
            .map(|p| calc_bone_epi_for_paf(p, &def, &bone_nodes[p], &epi, n_views))
            .collect();

        let bone_temp: Vec<Vec<DMatrix<f32>>> = (0..def.paf_size())
            .into_par_iter()
            .map(|p| calc_bone_temp_for_paf(p, &def, &bone_nodes[p], &temp, priors.len(), n_views))
            .collect();

        EdgeSet {
            epi,
            temp,
            bone_nodes,
            bone_epi,
            bone_temp,
        }
    }
}

fn calc_epi_for_joint(
    j: usize,
    detections: &[Detection],
    cameras: &[Camera],
    rays: &JointRays,
    config: &AssociationConfig,
) -> Vec<Vec<DMatrix<f32>>> {
    let n_views = detections.len();
    let mut out = vec![vec![DMatrix::zeros(0, 0); n_views]; n_views];
    for view_a in 0..n_views.saturating_sub(1) {
        for view_b in (view_a + 1)..n_views {
            let joints_a = &detections[view_a].joints[j];
            let joints_b = &detections[view_b].joints[j];
            if joints_a.is_empty() || joints_b.is_empty() {
                continue;
            }
            let mut m = DMatrix::from_element(joints_a.len(), joints_b.len(), -1.0f32);
            for a in 0..joints_a.len() {
                for b in 0..joints_b.len() {
                    let dist = line_line_dist(
                        &cameras[view_a].center(),
                        &rays[view_a][j][a],
                        &cameras[view_b].center(),
                        &rays[view_b][j][b],
                    );
                    if dist < config.max_epi_dist {
                        m[(a, b)] = 1.0 - dist / config.max_epi_dist;
                    }
                }
            }
            if config.normalize_edges {
                normalize_in_place(&mut m);
            }
            out[view_b][view_a] = m.transpose();
            out[view_a][view_b] = m;
        }
    }
    out
}

fn calc_temp_for_joint(
    j: usize,
    detections: &[Detection],
    cameras: &[Camera],
    rays: &JointRays,
    priors: &[Skeleton3d],
    config: &AssociationConfig,
) -> Vec<DMatrix<f32>> {
    let n_views = detections.len();
    let mut out = vec![DMatrix::zeros(0, 0); n_views];
    if priors.is_empty() {
        return out;
    }
    for view in 0..n_views {
        let cand_rays = &rays[view][j];
        if cand_rays.is_empty() {
            continue;
        }
        let mut m = DMatrix::from_element(priors.len(), cand_rays.len(), -1.0f32);
        for (p_idx, prior) in priors.iter().enumerate() {
            if prior.confidence(j) <= f32::EPSILON {
                continue;
            }
            let prior_pos = prior.position(j);
            for (k, ray) in cand_rays.iter().enumerate() {
                let dist = point_line_dist(&prior_pos, &cameras[view].center(), ray);
                if dist < config.max_temp_dist {
                    m[(p_idx, k)] = 1.0 - dist / config.max_temp_dist;
                }
            }
        }
        if config.normalize_edges {
            normalize_in_place(&mut m);
        }
        out[view] = m;
    }
    out
}

fn calc_bone_epi_for_paf(
    paf_idx: usize,
    def: &topology::SkelDef,
    bone_nodes: &[Vec<(usize, usize)>],
    epi: &[Vec<Vec<DMatrix<f32>>>],
    n_views: usize,
) -> Vec<Vec<DMatrix<f32>>> {
    let (ja, jb) = def.paf_endpoints(paf_idx);
    let mut out = vec![vec![DMatrix::zeros(0, 0); n_views]; n_views];
    for view_a in 0..n_views.saturating_sub(1) {
        for view_b in (view_a + 1)..n_views {
            let nodes_a = &bone_nodes[view_a];
            let nodes_b = &bone_nodes[view_b];
            let mut m = DMatrix::from_element(nodes_a.len(), nodes_b.len(), -1.0f32);
            for (bone_a_idx, node_a) in nodes_a.iter().enumerate() {
                for (bone_b_idx, node_b) in nodes_b.iter().enumerate() {
                    let epi_a = epi[ja][view_a][view_b][(node_a.0, node_b.0)];
                    let epi_b = epi[jb][view_a][view_b][(node_a.1, node_b.1)];
                    if epi_a < 0.0 || epi_b < 0.0 {
                        continue;
                    }
                    m[(bone_a_idx, bone_b_idx)] = 0.5 * (epi_a + epi_b);
                }
            }
            out[view_b][view_a] = m.transpose();
            out[view_a][view_b] = m;
        }
    }
    out
}

fn calc_bone_temp_for_paf(
    paf_idx: usize,
    def: &topology::SkelDef,
    bone_nodes: &[Vec<(usize, usize)>],
    temp: &[Vec<DMatrix<f32>>],
    n_priors: usize,
    n_views: usize,
) -> Vec<DMatrix<f32>> {
    let (ja, jb) = def.paf_endpoints(paf_idx);
    let mut out = vec![DMatrix::zeros(0, 0); n_views];
    if n_priors == 0 {
        return out;
    }
    for view in 0..n_views {
        let nodes = &bone_nodes[view];
        let mut m = DMatrix::from_element(n_priors, nodes.len(), -1.0f32);
        let temp_a = &temp[ja][view];
        let temp_b = &temp[jb][view];
        if temp_a.nrows() == 0 || temp_b.nrows() == 0 {
            out[view] = m;
            continue;
        }
        for p_idx in 0..n_priors {
            for (bone_idx, node) in nodes.iter().enumerate() {
                let t_a = temp_a[(p_idx, node.0)];
                let t_b = temp_b[(p_idx, node.1)];
                if t_a > 0.0 && t_b > 0.0 {
                    m[(p_idx, bone_idx)] = 0.5 * (t_a + t_b);
                }
            }
        }
        out[view] = m;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Camera;
    use crate::detection::JointCandidates;
    use nalgebra::{Matrix3, Vector3};

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

    fn single_candidate_detection(skel_type: SkelType, u: f32, v: f32) -> Detection {
        let def = topology::def(skel_type);
        let joints: Vec<JointCandidates> = (0..def.joint_size)
            .map(|_| JointCandidates {
                u: vec![u],
                v: vec![v],
                confidence: vec![1.0],
            })
            .collect();
        let pafs = (0..def.paf_size())
            .map(|_| DMatrix::from_element(1, 1, 1.0))
            .collect();
        Detection {
            skel_type,
            joints,
            pafs,
        }
    }

    #[test]
    fn given_matching_projections_when_calc_epi_then_entry_is_near_one() {
        let cams = vec![camera_at(-0.2), camera_at(0.3)];
        let x = Vector3::new(0.1, 0.05, 2.0);
        let (u0, v0) = cams[0].project(&x);
        let (u1, v1) = cams[1].project(&x);
        let detections = vec![
            single_candidate_detection(SkelType::Skel19, u0, v0),
            single_candidate_detection(SkelType::Skel19, u1, v1),
        ];
        let rays = calc_joint_rays(&detections, &cams);
        let config = AssociationConfig::default();
        let edges = EdgeSet::build(SkelType::Skel19, &detections, &cams, &rays, &[], &config);
        let val = edges.epi[0][0][1][(0, 0)];
        assert!(val > 0.9, "expected near-1 epi value, got {val}");
    }

    #[test]
    fn given_no_priors_when_calc_temp_then_matrices_empty() {
        let cams = vec![camera_at(0.0)];
        let detections = vec![single_candidate_detection(SkelType::Skel19, 320.0, 240.0)];
        let rays = calc_joint_rays(&detections, &cams);
        let config = AssociationConfig::default();
        let edges = EdgeSet::build(SkelType::Skel19, &detections, &cams, &rays, &[], &config);
        assert_eq!(edges.temp[0][0].nrows(), 0);
    }

    #[test]
    fn given_prior_matching_candidate_when_calc_temp_then_positive_entry() {
        let cam = camera_at(0.0);
        let x = Vector3::new(0.0, 0.0, 2.0);
        let (u, v) = cam.project(&x);
        let detections = vec![single_candidate_detection(SkelType::Skel19, u, v)];
        let cams = vec![cam];
        let rays = calc_joint_rays(&detections, &cams);
        let mut prior = Skeleton3d::empty(0, topology::def(SkelType::Skel19).joint_size);
        prior.set_joint(0, x, 1.0);
        let config = AssociationConfig::default();
        let edges = EdgeSet::build(SkelType::Skel19, &detections, &cams, &rays, &[prior], &config);
        assert!(edges.temp[0][0][(0, 0)] > 0.0);
    }
}
