//! Per-identity tracker / updater (C8).
//!
//! For each associated identity: triangulate and accumulate bone-length
//! samples until `boneCapacity` is reached, then lock shape and switch to
//! pose-only tracking. An activity score gates birth and death; a deleted
//! identity is never resurrected, only replaced by a fresh one.
//!
//! The reference source carries two updater variants (a bare triangulator
//! and a full shape/pose fitter); this implements the more complete one, as
//! the spec directs, and does not reproduce the simpler variant's bug of
//! re-running `SolveShape` after shape has already locked.

use std::collections::BTreeMap;

use nalgebra::{DMatrix, DVector, Matrix3x4};

use crate::associate::Skels2d;
use crate::camera::Camera;
use crate::config::{SolverConfig, TrackerTuning, TriangulationConfig};
use crate::kinematics::{SkelModel, SkelParam};
use crate::linalg::welsch;
use crate::skeleton::Skeleton3d;
use crate::solver::{self, Term};
use crate::topology::{self, SkelType};
use crate::triangulate::Triangulator;

struct SkelInfo {
    param: SkelParam,
    bone_len: DVector<f32>,
    bone_cnt: Vec<u32>,
    active: f32,
    shape_fixed: bool,
}

impl SkelInfo {
    fn new(skel_type: SkelType) -> Self {
        let def = topology::def(skel_type);
        let n_bones = def.joint_size.saturating_sub(1);
        SkelInfo {
            param: SkelParam::zeros(skel_type),
            bone_len: DVector::zeros(n_bones),
            bone_cnt: vec![0; n_bones],
            active: 0.0,
            shape_fixed: false,
        }
    }

    fn push_bones(&mut self, skel_type: SkelType, skel: &Skeleton3d) {
        let def = topology::def(skel_type);
        for j in 1..def.joint_size {
            let parent = def.parent[j].expect("non-root joint has a parent");
            if skel.confidence(j) > f32::EPSILON && skel.confidence(parent) > f32::EPSILON {
                let len = (skel.position(j) - skel.position(parent)).norm();
                let cnt = self.bone_cnt[j - 1];
                self.bone_len[j - 1] = (cnt as f32 * self.bone_len[j - 1] + len) / (cnt as f32 + 1.0);
                self.bone_cnt[j - 1] += 1;
            }
        }
    }

    fn min_bone_cnt(&self) -> u32 {
        self.bone_cnt.iter().copied().min().unwrap_or(0)
    }
}

/// Per-identity 3D skeleton lifecycle (C8): the last committed 3D pose per
/// tracked identity, plus the fitter state driving shape lock and pose
/// tracking.
pub struct Tracker {
    skel_type: SkelType,
    model: SkelModel,
    skels: BTreeMap<i32, Skeleton3d>,
    infos: BTreeMap<i32, SkelInfo>,
    triangulation: TriangulationConfig,
    solver: SolverConfig,
    tuning: TrackerTuning,
}

impl Tracker {
    pub fn new(
        model: SkelModel,
        triangulation: TriangulationConfig,
        solver: SolverConfig,
        tuning: TrackerTuning,
    ) -> Self {
        Tracker {
            skel_type: model.skel_type(),
            model,
            skels: BTreeMap::new(),
            infos: BTreeMap::new(),
            triangulation,
            solver,
            tuning,
        }
    }

    /// Current tracked 3D skeletons, keyed by stable identity.
    pub fn skels(&self) -> &BTreeMap<i32, Skeleton3d> {
        &self.skels
    }

    /// Snapshot used as the association prior for the next frame, in the
    /// same order every identity was inserted (ascending by identity).
    pub fn priors(&self) -> Vec<Skeleton3d> {
        self.skels.values().cloned().collect()
    }

    fn triangulate_person(&self, skel2d: &DMatrix<f32>, projs: &[Matrix3x4<f32>]) -> Skeleton3d {
        let def = topology::def(self.skel_type);
        let mut skel = Skeleton3d::empty(0, def.joint_size);
        for j in 0..def.joint_size {
            let points: Vec<(f32, f32, f32)> = (0..projs.len())
                .map(|view| {
                    let col = view * def.joint_size + j;
                    (skel2d[(0, col)], skel2d[(1, col)], skel2d[(2, col)])
                })
                .collect();
            let tri = Triangulator::new(&points, projs);
            let result = tri.solve(&self.triangulation);
            if result.loss < self.triangulation.triangulate_thresh {
                skel.set_joint(j, result.pos, 1.0);
            }
        }
        skel
    }

    /// Advances every identity in this frame's association output by one
    /// frame: triangulates/fits, updates `active`, and births or kills
    /// identities per §4.8.
    pub fn update(&mut self, skels2d: &Skels2d, cameras: &[Camera]) {
        let def = topology::def(self.skel_type);
        let projs: Vec<Matrix3x4<f32>> = cameras.iter().map(|c| *c.proj()).collect();

        for (&identity, skel2d) in skels2d.skels.iter() {
            let observed = (0..skel2d.ncols()).filter(|&c| skel2d[(2, c)] > f32::EPSILON).count();

            if self.infos.contains_key(&identity) {
                let active = {
                    let info = self.infos.get(&identity).unwrap();
                    (info.active + self.tuning.active_rate * (2.0 * welsch(self.tuning.min_track_j_cnt as f32, observed as f32) - 1.0))
                        .min(1.0)
                };
                if active < f32::EPSILON {
                    self.infos.remove(&identity);
                    self.skels.remove(&identity);
                    continue;
                }

                let shape_fixed = self.infos[&identity].shape_fixed;
                if !shape_fixed {
                    let skel = self.triangulate_person(skel2d, &projs);
                    let valid = (0..def.joint_size).filter(|&j| skel.confidence(j) > f32::EPSILON).count();
                    let info = self.infos.get_mut(&identity).unwrap();
                    if valid >= self.tuning.min_triangulate_j_cnt {
                        info.push_bones(self.skel_type, &skel);
                        if info.min_bone_cnt() >= self.tuning.bone_capacity {
                            info.push_bones(self.skel_type, &skel);

                            let mut bone3d = DMatrix::zeros(2, def.joint_size.saturating_sub(1));
                            for j in 0..def.joint_size.saturating_sub(1) {
                                bone3d[(0, j)] = info.bone_len[j];
                                bone3d[(1, j)] = 1.0;
                            }
                            let shape_term = Term {
                                w_bone3d: self.solver.w_bone3d,
                                bone3d_target: Some(&bone3d),
                                w_square_shape: self.solver.w_square_shape,
                                ..Default::default()
                            };
                            solver::solve_shape(&self.model, &shape_term, &mut info.param, &self.solver);

                            let mut j3d = skel.joints.clone();
                            let pose_term = Term {
                                w_j3d: self.solver.w_j3d,
                                j3d_target: Some(&j3d),
                                w_regular_pose: self.solver.w_regular_pose,
                                ..Default::default()
                            };
                            solver::align_rt(&self.model, &pose_term, &mut info.param);
                            solver::solve_pose(&self.model, &pose_term, &mut info.param, &self.solver, false);
                            let fitted = self.model.solve_j_final(&info.param, None);
                            j3d.view_mut((0, 0), (3, def.joint_size)).copy_from(&fitted);
                            info.shape_fixed = true;
                            self.skels.insert(identity, Skeleton3d { identity, joints: j3d });
                            self.infos.get_mut(&identity).unwrap().active = active;
                            continue;
                        }
                    }
                    self.infos.get_mut(&identity).unwrap().active = active;
                    self.skels.insert(identity, Skeleton3d { identity, joints: skel.joints });
                } else {
                    let mut j2d = skel2d.clone();
                    let mut j_confidence = vec![1.0f32; def.joint_size];
                    for j in 0..def.joint_size {
                        let corr_cnt = (0..cameras.len())
                            .filter(|&view| j2d[(2, view * def.joint_size + j)] > f32::EPSILON)
                            .count();
                        if corr_cnt <= 1 {
                            j_confidence[j] = f32::EPSILON;
                            for view in 0..cameras.len() {
                                let col = view * def.joint_size + j;
                                j2d[(0, col)] = 0.0;
                                j2d[(1, col)] = 0.0;
                                j2d[(2, col)] = 0.0;
                            }
                        }
                    }

                    let info = self.infos.get_mut(&identity).unwrap();
                    let param_prev = info.param.clone();
                    let pose_term = Term {
                        w_j2d: self.solver.w_j2d,
                        projs: &projs,
                        j2d_target: Some(&j2d),
                        w_regular_pose: self.solver.w_regular_pose,
                        param_prev: Some(&param_prev),
                        w_temporal_trans: self.solver.w_temporal_trans,
                        w_temporal_pose: self.solver.w_temporal_pose,
                        ..Default::default()
                    };
                    solver::solve_pose(&self.model, &pose_term, &mut info.param, &self.solver, false);
                    let fitted = self.model.solve_j_final(&info.param, None);
                    info.active = active;

                    let mut joints = DMatrix::zeros(4, def.joint_size);
                    joints.view_mut((0, 0), (3, def.joint_size)).copy_from(&fitted);
                    for j in 0..def.joint_size {
                        joints[(3, j)] = j_confidence[j];
                    }
                    self.skels.insert(identity, Skeleton3d { identity, joints });
                }
            } else {
                let skel = self.triangulate_person(skel2d, &projs);
                let valid = (0..def.joint_size).filter(|&j| skel.confidence(j) > f32::EPSILON).count();
                if valid >= self.tuning.min_triangulate_j_cnt {
                    let mut info = SkelInfo::new(self.skel_type);
                    info.push_bones(self.skel_type, &skel);
                    info.active = self.tuning.init_active;
                    self.infos.insert(identity, info);
                    self.skels.insert(identity, skel);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Camera;
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

    fn toy_model() -> SkelModel {
        let def = topology::def(SkelType::Skel19);
        let mut joints = DMatrix::zeros(3, def.joint_size);
        for j in 0..def.joint_size {
            joints[(1, j)] = j as f32 * 0.1;
        }
        let j_shape_blend = DMatrix::zeros(3 * def.joint_size, def.shape_size);
        SkelModel::new(SkelType::Skel19, joints, j_shape_blend).unwrap()
    }

    fn skel2d_for(cams: &[Camera], x: Vector3<f32>, joint_size: usize) -> DMatrix<f32> {
        let mut m = DMatrix::zeros(3, cams.len() * joint_size);
        for (view, cam) in cams.iter().enumerate() {
            let (u, v) = cam.project(&x);
            for j in 0..joint_size {
                let col = view * joint_size + j;
                m[(0, col)] = u;
                m[(1, col)] = v;
                m[(2, col)] = 1.0;
            }
        }
        m
    }

    #[test]
    fn given_new_identity_with_enough_views_when_update_then_identity_is_born() {
        let model = toy_model();
        let def = topology::def(SkelType::Skel19);
        let cams = vec![camera_at(-0.2), camera_at(0.1), camera_at(0.3)];
        let mut tracker = Tracker::new(model, TriangulationConfig::default(), SolverConfig::default(), TrackerTuning::default());
        let skel2d = skel2d_for(&cams, Vector3::new(0.0, 0.0, 2.0), def.joint_size);
        let mut skels = BTreeMap::new();
        skels.insert(0, skel2d);
        tracker.update(&Skels2d { skels }, &cams);
        assert!(tracker.skels().contains_key(&0));
    }

    #[test]
    fn given_no_observations_when_update_repeatedly_then_active_decays_to_death() {
        let model = toy_model();
        let def = topology::def(SkelType::Skel19);
        let cams = vec![camera_at(-0.2), camera_at(0.1), camera_at(0.3)];
        let mut tracker = Tracker::new(model, TriangulationConfig::default(), SolverConfig::default(), TrackerTuning::default());
        let skel2d = skel2d_for(&cams, Vector3::new(0.0, 0.0, 2.0), def.joint_size);
        let mut skels = BTreeMap::new();
        skels.insert(0, skel2d);
        tracker.update(&Skels2d { skels }, &cams);
        assert!(tracker.skels().contains_key(&0));

        let empty = DMatrix::zeros(3, cams.len() * def.joint_size);
        for _ in 0..10 {
            let mut skels = BTreeMap::new();
            skels.insert(0, empty.clone());
            tracker.update(&Skels2d { skels }, &cams);
        }
        assert!(!tracker.skels().contains_key(&0));
    }

    #[test]
    fn given_too_few_valid_joints_when_new_identity_then_not_born() {
        let model = toy_model();
        let def = topology::def(SkelType::Skel19);
        let cams = vec![camera_at(0.0)];
        let mut tracker = Tracker::new(model, TriangulationConfig::default(), SolverConfig::default(), TrackerTuning::default());
        let skel2d = skel2d_for(&cams, Vector3::new(0.0, 0.0, 2.0), def.joint_size);
        let mut skels = BTreeMap::new();
        skels.insert(0, skel2d);
        tracker.update(&Skels2d { skels }, &cams);
        assert!(tracker.skels().is_empty());
    }
}
