//! Per-view, per-frame 2D detections: joint candidates and PAF matrices,
//! topology remap, and the text-file load/save format (§6).

use nalgebra::DMatrix;

use crate::error::{Result, TrackError};
use crate::topology::{self, SkelType};

/// One joint's candidates: `u`, `v`, `confidence` per column.
#[derive(Debug, Clone, Default)]
pub struct JointCandidates {
    pub u: Vec<f32>,
    pub v: Vec<f32>,
    pub confidence: Vec<f32>,
}

impl JointCandidates {
    pub fn len(&self) -> usize {
        self.u.len()
    }

    pub fn is_empty(&self) -> bool {
        self.u.is_empty()
    }
}

/// One view's detections for one frame: per-joint candidates and per-PAF
/// affinity matrices (rows indexed by the PAF's first endpoint's
/// candidates, columns by its second).
#[derive(Debug, Clone)]
pub struct Detection {
    pub skel_type: SkelType,
    pub joints: Vec<JointCandidates>,
    pub pafs: Vec<DMatrix<f32>>,
}

impl Detection {
    pub fn validate(&self) -> Result<()> {
        let def = topology::def(self.skel_type);
        if self.joints.len() != def.joint_size {
            return Err(TrackError::InputShape(format!(
                "expected {} joints, got {}",
                def.joint_size,
                self.joints.len()
            )));
        }
        if self.pafs.len() != def.paf_size() {
            return Err(TrackError::InputShape(format!(
                "expected {} PAFs, got {}",
                def.paf_size(),
                self.pafs.len()
            )));
        }
        for (p, paf) in self.pafs.iter().enumerate() {
            let (a, b) = def.paf_endpoints(p);
            if paf.nrows() != self.joints[a].len() || paf.ncols() != self.joints[b].len() {
                return Err(TrackError::InputShape(format!(
                    "paf {p} dims ({}, {}) disagree with candidate counts ({}, {})",
                    paf.nrows(),
                    paf.ncols(),
                    self.joints[a].len(),
                    self.joints[b].len()
                )));
            }
        }
        Ok(())
    }

    /// Remaps this detection from its current topology into `target`,
    /// dropping joints/PAFs with no correspondent. Joints/PAFs not present
    /// in `target` are omitted rather than zero-filled.
    pub fn remap(&self, target: SkelType) -> Result<Detection> {
        let map = topology::mapping(self.skel_type, target).ok_or_else(|| {
            TrackError::Configuration(format!(
                "no remap table registered for {:?} -> {:?}",
                self.skel_type, target
            ))
        })?;
        let tdef = topology::def(target);

        let mut joints = vec![JointCandidates::default(); tdef.joint_size];
        for (src_j, dst_j) in map.joint_mapping.iter().enumerate() {
            if let Some(dst_j) = dst_j {
                if *dst_j < joints.len() && src_j < self.joints.len() {
                    joints[*dst_j] = self.joints[src_j].clone();
                }
            }
        }

        let mut pafs = vec![DMatrix::zeros(0, 0); tdef.paf_size()];
        for (src_p, dst_p) in map.paf_mapping.iter().enumerate() {
            if let Some(dst_p) = dst_p {
                if *dst_p < pafs.len() && src_p < self.pafs.len() {
                    pafs[*dst_p] = self.pafs[src_p].clone();
                }
            }
        }
        // Any target PAF slot left unset (no source correspondent) gets a
        // correctly-sized all-zero matrix so downstream shape checks hold.
        for (p, m) in pafs.iter_mut().enumerate() {
            if m.nrows() == 0 {
                let (a, b) = tdef.paf_endpoints(p);
                *m = DMatrix::zeros(joints[a].len(), joints[b].len());
            }
        }

        Ok(Detection {
            skel_type: target,
            joints,
            pafs,
        })
    }
}

/// Candidate bone instance for one PAF in one view: `(a, b)` indices with
/// `PAF(a,b) > epsilon`.
pub fn bone_nodes(detection: &Detection, paf_idx: usize) -> Vec<(usize, usize)> {
    let paf = &detection.pafs[paf_idx];
    let mut nodes = Vec::new();
    for a in 0..paf.nrows() {
        for b in 0..paf.ncols() {
            if paf[(a, b)] > f32::EPSILON {
                nodes.push((a, b));
            }
        }
    }
    nodes
}

/// Single-frame, single-view PAF greedy grouping with no camera geometry:
/// a debug/offline utility for inspecting one camera's raw detections
/// independent of the multi-view associater. Returns groups of
/// `(joint_idx, candidate_idx)` per discovered person, each with at least
/// `jcnt_thresh` filled joints.
pub fn single_view_group(detection: &Detection, jcnt_thresh: usize) -> Vec<Vec<(usize, i32)>> {
    let def = topology::def(detection.skel_type);
    let joint_count = def.joint_size;

    // (score, paf_idx, a, b), sorted descending by score.
    let mut scored: Vec<(f32, usize, usize, usize)> = Vec::new();
    for (p, paf) in detection.pafs.iter().enumerate() {
        let (ja, jb) = def.paf_endpoints(p);
        for a in 0..paf.nrows() {
            if detection.joints[ja].confidence.get(a).copied().unwrap_or(0.0) <= 0.0 {
                continue;
            }
            for b in 0..paf.ncols() {
                if detection.joints[jb].confidence.get(b).copied().unwrap_or(0.0) <= 0.0 {
                    continue;
                }
                let score = paf[(a, b)];
                if score > 0.0 {
                    scored.push((score, p, a, b));
                }
            }
        }
    }
    scored.sort_by(|x, y| y.0.partial_cmp(&x.0).unwrap_or(std::cmp::Ordering::Equal));

    // assign[j][k] = person index or None; persons[id][j] = candidate idx or -1.
    let mut assign: Vec<Vec<Option<usize>>> = detection
        .joints
        .iter()
        .map(|jc| vec![None; jc.len()])
        .collect();
    let mut persons: Vec<Vec<i32>> = Vec::new();

    for (_, p, a, b) in scored {
        let (ja, jb) = def.paf_endpoints(p);
        let id_a = assign[ja][a];
        let id_b = assign[jb][b];
        match (id_a, id_b) {
            (None, None) => {
                let mut row = vec![-1i32; joint_count];
                row[ja] = a as i32;
                row[jb] = b as i32;
                let id = persons.len();
                persons.push(row);
                assign[ja][a] = Some(id);
                assign[jb][b] = Some(id);
            }
            (Some(id), None) => {
                if persons[id][jb] == -1 {
                    persons[id][jb] = b as i32;
                    assign[jb][b] = Some(id);
                }
            }
            (None, Some(id)) => {
                if persons[id][ja] == -1 {
                    persons[id][ja] = a as i32;
                    assign[ja][a] = Some(id);
                }
            }
            (Some(id_a), Some(id_b)) if id_a != id_b => {
                let (lo, hi) = (id_a.min(id_b), id_a.max(id_b));
                let hi_row = persons[hi].clone();
                let mut conflict = false;
                for j in 0..joint_count {
                    if hi_row[j] != -1 && persons[lo][j] != -1 && persons[lo][j] != hi_row[j] {
                        conflict = true;
                        break;
                    }
                }
                if !conflict {
                    for j in 0..joint_count {
                        if persons[lo][j] == -1 && hi_row[j] != -1 {
                            persons[lo][j] = hi_row[j];
                            assign[j][hi_row[j] as usize] = Some(lo);
                        }
                    }
                    persons[hi] = vec![-2i32; joint_count]; // tombstoned, see filter below
                }
            }
            _ => {}
        }
    }

    persons
        .into_iter()
        .filter(|row| row.iter().filter(|&&c| c >= 0).count() >= jcnt_thresh)
        .map(|row| {
            row.into_iter()
                .enumerate()
                .map(|(j, c)| (j, c))
                .collect()
        })
        .collect()
}

/// Parses the text detection format (§6): header `skelType frameCount`,
/// then per frame per joint a `candCount` line followed by a
/// `3 x candCount` matrix (u, v, confidence rows), then per PAF a
/// `candCount(a) x candCount(b)` matrix. PAF values are raised to the
/// `0.2` power at load time (a fixed heuristic carried over from the
/// source detector's calibration).
pub fn parse_detections(text: &str, skel_type: SkelType) -> Result<Vec<Detection>> {
    const PAF_GAIN: f32 = 0.2;
    let def = topology::def(skel_type);
    let mut tokens = text.split_whitespace();
    let mut next_f32 = |what: &str| -> Result<f32> {
        tokens
            .next()
            .ok_or_else(|| TrackError::Parse {
                what: what.into(),
                reason: "unexpected end of input".into(),
            })?
            .parse::<f32>()
            .map_err(|e| TrackError::Parse {
                what: what.into(),
                reason: e.to_string(),
            })
    };

    let _declared_type = next_f32("skelType")?;
    let frame_count = next_f32("frameCount")? as usize;

    let mut frames = Vec::with_capacity(frame_count);
    for _ in 0..frame_count {
        let mut joints = Vec::with_capacity(def.joint_size);
        let mut counts = Vec::with_capacity(def.joint_size);
        for _ in 0..def.joint_size {
            let cand_count = next_f32("candCount")? as usize;
            let mut u = Vec::with_capacity(cand_count);
            let mut v = Vec::with_capacity(cand_count);
            let mut confidence = Vec::with_capacity(cand_count);
            for _ in 0..cand_count {
                u.push(next_f32("u")?);
            }
            for _ in 0..cand_count {
                v.push(next_f32("v")?);
            }
            for _ in 0..cand_count {
                confidence.push(next_f32("confidence")?);
            }
            counts.push(cand_count);
            joints.push(JointCandidates { u, v, confidence });
        }

        let mut pafs = Vec::with_capacity(def.paf_size());
        for p in 0..def.paf_size() {
            let (a, b) = def.paf_endpoints(p);
            let rows = counts[a];
            let cols = counts[b];
            let mut m = DMatrix::zeros(rows, cols);
            for r in 0..rows {
                for c in 0..cols {
                    m[(r, c)] = next_f32("paf")?.powf(PAF_GAIN);
                }
            }
            pafs.push(m);
        }

        let detection = Detection {
            skel_type,
            joints,
            pafs,
        };
        detection.validate()?;
        frames.push(detection);
    }
    Ok(frames)
}

/// Serializes detections back to the text format, PAF values written as
/// stored (callers that loaded via [`parse_detections`] already have the
/// `0.2`-power-applied values baked in; this does not invert the gain).
pub fn serialize_detections(frames: &[Detection]) -> String {
    use std::fmt::Write;
    let mut out = String::new();
    let skel_type_code = frames.first().map(skel_type_code).unwrap_or(0);
    writeln!(out, "{} {}", skel_type_code, frames.len()).unwrap();
    for detection in frames {
        for jc in &detection.joints {
            writeln!(out, "{}", jc.len()).unwrap();
            for x in &jc.u {
                write!(out, "{x} ").unwrap();
            }
            writeln!(out).unwrap();
            for x in &jc.v {
                write!(out, "{x} ").unwrap();
            }
            writeln!(out).unwrap();
            for x in &jc.confidence {
                write!(out, "{x} ").unwrap();
            }
            writeln!(out).unwrap();
        }
        for paf in &detection.pafs {
            for r in 0..paf.nrows() {
                for c in 0..paf.ncols() {
                    write!(out, "{} ", paf[(r, c)]).unwrap();
                }
                writeln!(out).unwrap();
            }
        }
    }
    out
}

fn skel_type_code(detection: &Detection) -> u32 {
    match detection.skel_type {
        SkelType::Skel19 => 0,
        SkelType::Skel17 => 1,
        SkelType::Skel15 => 2,
        SkelType::Coco18 => 3,
        SkelType::Body25 => 4,
        SkelType::Shelf15 => 5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy_detection() -> Detection {
        // SHELF15 has no shape/parent but a small, denser PAF set; use
        // SKEL19's first PAF (joint 1 -> joint 0) for a minimal valid case.
        let def = topology::def(SkelType::Skel19);
        let joints: Vec<JointCandidates> = (0..def.joint_size)
            .map(|_| JointCandidates {
                u: vec![1.0],
                v: vec![1.0],
                confidence: vec![1.0],
            })
            .collect();
        let pafs: Vec<DMatrix<f32>> = (0..def.paf_size())
            .map(|_| DMatrix::from_element(1, 1, 1.0))
            .collect();
        Detection {
            skel_type: SkelType::Skel19,
            joints,
            pafs,
        }
    }

    #[test]
    fn given_well_formed_detection_when_validate_then_ok() {
        assert!(toy_detection().validate().is_ok());
    }

    #[test]
    fn given_mismatched_paf_dims_when_validate_then_input_shape_error() {
        let mut d = toy_detection();
        d.pafs[0] = DMatrix::from_element(2, 1, 1.0);
        assert!(matches!(d.validate(), Err(TrackError::InputShape(_))));
    }

    #[test]
    fn given_body25_detection_when_remap_to_skel19_then_root_joint_populated() {
        let def = topology::def(SkelType::Body25);
        let joints: Vec<JointCandidates> = (0..def.joint_size)
            .map(|_| JointCandidates {
                u: vec![0.0],
                v: vec![0.0],
                confidence: vec![1.0],
            })
            .collect();
        let pafs: Vec<DMatrix<f32>> = (0..def.paf_size())
            .map(|_| DMatrix::from_element(1, 1, 1.0))
            .collect();
        let d = Detection {
            skel_type: SkelType::Body25,
            joints,
            pafs,
        };
        let remapped = d.remap(SkelType::Skel19).unwrap();
        assert_eq!(remapped.joints[0].len(), 1);
    }

    #[test]
    fn given_two_bone_chain_when_single_view_group_then_one_person_found() {
        let mut d = toy_detection();
        // Raise the threshold's relevant PAF scores; everything already
        // wired to 1.0 forms a single connected person across all joints.
        let groups = single_view_group(&d, 2);
        assert_eq!(groups.len(), 1);
        d.joints[0].confidence[0] = 0.0;
        let groups_empty = single_view_group(&d, d.joints.len());
        assert!(groups_empty.is_empty());
    }

    #[test]
    fn given_text_format_when_round_tripped_then_paf_values_preserved() {
        let d = toy_detection();
        let text = serialize_detections(std::slice::from_ref(&d));
        let parsed = parse_detections(&text, SkelType::Skel19).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].joints[0].u[0], d.joints[0].u[0]);
    }
}
