//! Skeleton schema (C1): enumerated topologies and their static tables.
//!
//! Joint count, PAF list, parent array, hierarchy levels and shape
//! dimension are immutable per topology. Tables are static constants, never
//! built at runtime, so the registry is reachable without ambient mutable
//! state.

/// One of the supported skeleton topologies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkelType {
    Skel19,
    Skel17,
    Skel15,
    Coco18,
    Body25,
    Shelf15,
}

/// Static per-topology definition.
pub struct SkelDef {
    pub joint_size: usize,
    /// Ordered joint-index pairs, length `paf_size`. `paf_size == joint_size - 1`
    /// for articulated (tree) topologies; SHELF15 is a denser evaluation-only
    /// topology where that invariant does not hold.
    pub paf_dict: &'static [(usize, usize)],
    /// `parent[0]` is `None` (the root); every other entry's index is `< j`.
    pub parent: &'static [Option<usize>],
    /// Hierarchy level per joint: root is 0, extremities are highest.
    pub hierarchy: &'static [u32],
    pub shape_size: usize,
}

impl SkelDef {
    pub fn paf_size(&self) -> usize {
        self.paf_dict.len()
    }

    pub fn paf_endpoints(&self, p: usize) -> (usize, usize) {
        self.paf_dict[p]
    }

    pub fn max_hierarchy(&self) -> u32 {
        self.hierarchy.iter().copied().max().unwrap_or(0)
    }
}

macro_rules! skel_def {
    ($joint_size:expr, $paf_dict:expr, $parent:expr, $hierarchy:expr, $shape_size:expr) => {
        SkelDef {
            joint_size: $joint_size,
            paf_dict: $paf_dict,
            parent: $parent,
            hierarchy: $hierarchy,
            shape_size: $shape_size,
        }
    };
}

const SKEL19_PAF: &[(usize, usize)] = &[
    (1, 0),
    (2, 7),
    (7, 13),
    (0, 2),
    (0, 3),
    (3, 8),
    (8, 14),
    (1, 5),
    (5, 11),
    (11, 15),
    (5, 9),
    (1, 6),
    (6, 12),
    (12, 16),
    (6, 10),
    (1, 4),
    (14, 17),
    (13, 18),
];
const SKEL19_PARENT: &[Option<usize>] = &[
    None,
    Some(0),
    Some(0),
    Some(0),
    Some(1),
    Some(1),
    Some(1),
    Some(2),
    Some(3),
    Some(4),
    Some(4),
    Some(5),
    Some(6),
    Some(7),
    Some(8),
    Some(11),
    Some(12),
    Some(14),
    Some(13),
];
const SKEL19_HIER: &[u32] = &[0, 0, 0, 0, 1, 1, 1, 1, 1, 2, 2, 2, 2, 2, 2, 3, 3, 3, 3];

const SKEL17_PAF: &[(usize, usize)] = &[
    (1, 0),
    (2, 7),
    (7, 11),
    (0, 2),
    (0, 3),
    (3, 8),
    (8, 12),
    (1, 5),
    (5, 9),
    (9, 13),
    (1, 6),
    (6, 10),
    (10, 14),
    (1, 4),
    (12, 15),
    (11, 16),
];
const SKEL17_PARENT: &[Option<usize>] = &[
    None,
    Some(0),
    Some(0),
    Some(0),
    Some(1),
    Some(1),
    Some(1),
    Some(2),
    Some(3),
    Some(5),
    Some(6),
    Some(7),
    Some(8),
    Some(9),
    Some(10),
    Some(12),
    Some(11),
];
const SKEL17_HIER: &[u32] = &[0, 0, 0, 0, 1, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3];

const SKEL15_PAF: &[(usize, usize)] = &[
    (1, 0),
    (2, 7),
    (7, 11),
    (0, 2),
    (0, 3),
    (3, 8),
    (8, 12),
    (1, 5),
    (5, 9),
    (9, 13),
    (1, 6),
    (6, 10),
    (10, 14),
    (1, 4),
];
const SKEL15_PARENT: &[Option<usize>] = &[
    None,
    Some(0),
    Some(0),
    Some(0),
    Some(1),
    Some(1),
    Some(1),
    Some(2),
    Some(3),
    Some(5),
    Some(6),
    Some(7),
    Some(8),
    Some(9),
    Some(10),
];
const SKEL15_HIER: &[u32] = &[0, 0, 0, 0, 1, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3];

// COCO18 has no parent/hierarchy in the original (draw-only fields absent);
// it is used only as a detection-space topology that gets remapped into
// BODY25/SKEL* before association, so parent/hierarchy are left empty and
// any attempt to drive or solve it directly is a logic error.
const COCO18_PAF: &[(usize, usize)] = &[
    (1, 8),
    (8, 9),
    (9, 10),
    (1, 11),
    (11, 12),
    (12, 13),
    (1, 2),
    (2, 3),
    (3, 4),
    (2, 16),
    (1, 5),
    (5, 6),
    (6, 7),
    (5, 17),
    (1, 0),
    (0, 14),
    (0, 15),
    (14, 16),
    (15, 17),
];
const COCO18_PARENT: &[Option<usize>] = &[];
const COCO18_HIER: &[u32] = &[];

const BODY25_PAF: &[(usize, usize)] = &[
    (1, 8),
    (9, 10),
    (10, 11),
    (8, 9),
    (8, 12),
    (12, 13),
    (13, 14),
    (1, 2),
    (2, 3),
    (3, 4),
    (2, 17),
    (1, 5),
    (5, 6),
    (6, 7),
    (5, 18),
    (1, 0),
    (0, 15),
    (0, 16),
    (15, 17),
    (16, 18),
    (14, 19),
    (19, 20),
    (14, 21),
    (11, 22),
    (22, 23),
    (11, 24),
];
const BODY25_PARENT: &[Option<usize>] = &[];
const BODY25_HIER: &[u32] = &[];

const SHELF15_PAF: &[(usize, usize)] = &[
    (9, 10),
    (8, 7),
    (10, 11),
    (7, 6),
    (3, 4),
    (2, 1),
    (4, 5),
    (1, 0),
    (12, 13),
    (12, 14),
];

pub fn def(t: SkelType) -> SkelDef {
    match t {
        SkelType::Skel19 => skel_def!(19, SKEL19_PAF, SKEL19_PARENT, SKEL19_HIER, 10),
        SkelType::Skel17 => skel_def!(17, SKEL17_PAF, SKEL17_PARENT, SKEL17_HIER, 10),
        SkelType::Skel15 => skel_def!(15, SKEL15_PAF, SKEL15_PARENT, SKEL15_HIER, 10),
        SkelType::Coco18 => skel_def!(18, COCO18_PAF, COCO18_PARENT, COCO18_HIER, 0),
        SkelType::Body25 => skel_def!(25, BODY25_PAF, BODY25_PARENT, BODY25_HIER, 0),
        SkelType::Shelf15 => skel_def!(15, SHELF15_PAF, &[], &[], 0),
    }
}

/// Joint/PAF index remap from `src` topology into `tar` topology. `-1`
/// (`None`) means "no correspondent in the target topology".
pub struct SkelMapping {
    pub joint_mapping: Vec<Option<usize>>,
    pub paf_mapping: Vec<Option<usize>>,
}

/// Returns the remap table for `(src, tar)`, or `None` when no table is
/// registered for that pair (the original only tabulates BODY25 as the
/// universal detector-space topology mapped down into SKEL19/17/15).
pub fn mapping(src: SkelType, tar: SkelType) -> Option<SkelMapping> {
    use SkelType::*;
    let (joint_mapping, paf_mapping): (&[i32], &[i32]) = match (src, tar) {
        (Body25, Skel19) => (
            &[
                4, 1, 5, 11, 15, 6, 12, 16, 0, 2, 7, 13, 3, 8, 14, -1, -1, 9, 10, 17, -1, -1, 18,
                -1, -1,
            ],
            &[
                0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, -1, -1, -1, -1, 16, -1, -1,
                17, -1, -1,
            ],
        ),
        (Body25, Skel17) => (
            &[
                4, 1, 5, 9, 13, 6, 10, 14, 0, 2, 7, 11, 3, 8, 12, -1, -1, -1, -1, 15, -1, -1, 16,
                -1, -1,
            ],
            &[
                0, 1, 2, 3, 4, 5, 6, 7, 8, 9, -1, 10, 11, 12, -1, 13, -1, -1, -1, -1, 14, -1, -1,
                15, -1, -1,
            ],
        ),
        (Body25, Skel15) => (
            &[
                4, 1, 5, 9, 13, 6, 10, 14, 0, 2, 7, 11, 3, 8, 12, -1, -1, -1, -1, -1, -1, -1, -1,
                -1, -1,
            ],
            &[
                0, 1, 2, 3, 4, 5, 6, 7, 8, 9, -1, 10, 11, 12, -1, 13, -1, -1, -1, -1, -1, -1, -1,
                -1, -1, -1,
            ],
        ),
        _ => return None,
    };
    let to_opt = |v: &[i32]| v.iter().map(|&x| if x < 0 { None } else { Some(x as usize) }).collect();
    Some(SkelMapping {
        joint_mapping: to_opt(joint_mapping),
        paf_mapping: to_opt(paf_mapping),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_skel19_when_queried_then_paf_size_is_joint_size_minus_one() {
        let d = def(SkelType::Skel19);
        assert_eq!(d.paf_size(), d.joint_size - 1);
    }

    #[test]
    fn given_skel19_when_walking_parents_then_every_parent_index_is_smaller() {
        let d = def(SkelType::Skel19);
        for (j, parent) in d.parent.iter().enumerate() {
            if let Some(p) = parent {
                assert!(*p < j, "joint {j} has parent {p} >= j");
            }
        }
    }

    #[test]
    fn given_body25_to_skel19_mapping_when_applied_then_root_joints_correspond() {
        let m = mapping(SkelType::Body25, SkelType::Skel19).expect("mapping exists");
        // BODY25 joint 8 (mid-hip) maps to SKEL19 joint 0 (root).
        assert_eq!(m.joint_mapping[8], Some(0));
    }

    #[test]
    fn given_shelf15_when_queried_then_paf_denser_than_joint_tree() {
        let d = def(SkelType::Shelf15);
        // SHELF15 is explicitly a denser, non-tree evaluation topology.
        assert!(d.paf_size() < d.joint_size - 1);
    }

    /// For the articulated (tree) topologies, the PAF set must cover every
    /// non-root joint exactly once as an endpoint. A transcription slip in
    /// the PAF table can drop a joint from every edge without changing
    /// `paf_size`, so this checks coverage directly rather than just the
    /// edge count.
    fn assert_paf_spans_every_joint(skel_type: SkelType) {
        let d = def(skel_type);
        let mut seen = vec![false; d.joint_size];
        for p in 0..d.paf_size() {
            let (a, b) = d.paf_endpoints(p);
            seen[a] = true;
            seen[b] = true;
        }
        for j in 1..d.joint_size {
            assert!(seen[j], "{skel_type:?} joint {j} is isolated: missing from every PAF edge");
        }
    }

    #[test]
    fn given_skel19_when_queried_then_paf_set_spans_every_joint() {
        assert_paf_spans_every_joint(SkelType::Skel19);
    }

    #[test]
    fn given_skel17_when_queried_then_paf_set_spans_every_joint() {
        assert_paf_spans_every_joint(SkelType::Skel17);
    }

    #[test]
    fn given_skel15_when_queried_then_paf_set_spans_every_joint() {
        assert_paf_spans_every_joint(SkelType::Skel15);
    }

    #[test]
    fn given_coco18_when_queried_then_paf_set_spans_every_joint() {
        assert_paf_spans_every_joint(SkelType::Coco18);
    }

    #[test]
    fn given_body25_when_queried_then_paf_set_spans_every_joint() {
        assert_paf_spans_every_joint(SkelType::Body25);
    }
}
