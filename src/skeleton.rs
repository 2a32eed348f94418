//! The minimal 3D skeleton representation passed between association and
//! the updater: per-joint position plus confidence, keyed by the stable
//! external identity, plus the text-file load/save format (§6).

use nalgebra::{DMatrix, Vector3};
use std::fmt::Write as _;

use crate::error::{Result, TrackError};

/// One tracked identity's 3D joints for one frame. `joints` is `4 x J`:
/// rows 0..3 are `x, y, z`, row 3 is confidence (0 means "not observed").
#[derive(Debug, Clone)]
pub struct Skeleton3d {
    pub identity: i32,
    pub joints: DMatrix<f32>,
}

impl Skeleton3d {
    pub fn empty(identity: i32, joint_size: usize) -> Self {
        Self {
            identity,
            joints: DMatrix::zeros(4, joint_size),
        }
    }

    pub fn position(&self, j: usize) -> Vector3<f32> {
        Vector3::new(self.joints[(0, j)], self.joints[(1, j)], self.joints[(2, j)])
    }

    pub fn confidence(&self, j: usize) -> f32 {
        self.joints[(3, j)]
    }

    pub fn set_joint(&mut self, j: usize, pos: Vector3<f32>, confidence: f32) {
        self.joints[(0, j)] = pos.x;
        self.joints[(1, j)] = pos.y;
        self.joints[(2, j)] = pos.z;
        self.joints[(3, j)] = confidence;
    }

    pub fn joint_size(&self) -> usize {
        self.joints.ncols()
    }
}

/// Parses the skeleton-state text format (§6): header `jointSize
/// frameCount`, then per frame a `personCount` line followed by, per
/// person, an `identity` line and a `4 x jointSize` block (x, y, z,
/// confidence rows), mirroring the detection format's row-major
/// "3 rows x candCount columns" convention.
pub fn parse_skel_frames(text: &str, joint_size: usize) -> Result<Vec<Vec<Skeleton3d>>> {
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

    let declared_joint_size = next_f32("jointSize")? as usize;
    if declared_joint_size != joint_size {
        return Err(TrackError::InputShape(format!(
            "expected jointSize {joint_size}, got {declared_joint_size}"
        )));
    }
    let frame_count = next_f32("frameCount")? as usize;

    let mut frames = Vec::with_capacity(frame_count);
    for _ in 0..frame_count {
        let person_count = next_f32("personCount")? as usize;
        let mut persons = Vec::with_capacity(person_count);
        for _ in 0..person_count {
            let identity = next_f32("identity")? as i32;
            let mut skel = Skeleton3d::empty(identity, joint_size);
            for row in 0..4 {
                for j in 0..joint_size {
                    skel.joints[(row, j)] = next_f32("skeleton value")?;
                }
            }
            persons.push(skel);
        }
        frames.push(persons);
    }
    Ok(frames)
}

/// Serializes tracked skeletons back to the text format.
pub fn serialize_skel_frames(frames: &[Vec<Skeleton3d>], joint_size: usize) -> String {
    let mut out = String::new();
    writeln!(out, "{} {}", joint_size, frames.len()).unwrap();
    for persons in frames {
        writeln!(out, "{}", persons.len()).unwrap();
        for skel in persons {
            writeln!(out, "{}", skel.identity).unwrap();
            for row in 0..4 {
                for j in 0..joint_size {
                    write!(out, "{} ", skel.joints[(row, j)]).unwrap();
                }
                writeln!(out).unwrap();
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_empty_frame_when_round_tripped_then_zero_persons() {
        let frames: Vec<Vec<Skeleton3d>> = vec![Vec::new()];
        let text = serialize_skel_frames(&frames, 19);
        let parsed = parse_skel_frames(&text, 19).unwrap();
        assert_eq!(parsed.len(), 1);
        assert!(parsed[0].is_empty());
    }

    #[test]
    fn given_one_person_when_round_tripped_then_identity_and_joints_preserved() {
        let mut skel = Skeleton3d::empty(7, 19);
        skel.set_joint(0, Vector3::new(1.0, 2.0, 3.0), 0.9);
        let frames = vec![vec![skel]];
        let text = serialize_skel_frames(&frames, 19);
        let parsed = parse_skel_frames(&text, 19).unwrap();
        assert_eq!(parsed[0][0].identity, 7);
        assert_eq!(parsed[0][0].position(0), Vector3::new(1.0, 2.0, 3.0));
        assert!((parsed[0][0].confidence(0) - 0.9).abs() < 1e-6);
    }

    #[test]
    fn given_wrong_joint_size_when_parse_then_input_shape_error() {
        let text = "19 1\n0\n";
        assert!(matches!(parse_skel_frames(text, 17), Err(TrackError::InputShape(_))));
    }
}
