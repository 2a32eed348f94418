//! Kruskal-style greedy multi-view, multi-person association (C5).
//!
//! Enumerates candidate bone cliques spanning cameras and a prior-person
//! slot, scores them into a max-heap, and greedily commits the top clique
//! at a time, repairing conflicts by pushing residual or merged cliques
//! back onto the heap until it drains.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};

use nalgebra::DMatrix;

use crate::config::AssociationConfig;
use crate::detection::Detection;
use crate::edges::EdgeSet;
use crate::linalg::welsch;
use crate::skeleton::Skeleton3d;
use crate::topology::{self, SkelDef, SkelType};

/// `persons[identity][joint][view] = candidate index, or -1`.
type PersonMatrix = DMatrix<i32>;

#[derive(Debug, Clone)]
struct BoneClique {
    score: f32,
    paf_idx: usize,
    /// Length `n_views + 1`; the last slot is the prior-person index.
    proposal: Vec<i32>,
    /// Monotonic insertion order, used to break score ties deterministically
    /// (earlier insertion wins, matching heap-push order rather than an
    /// arbitrary `BinaryHeap` tiebreak).
    seq: u64,
}

impl PartialEq for BoneClique {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score && self.seq == other.seq
    }
}
impl Eq for BoneClique {}
impl PartialOrd for BoneClique {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for BoneClique {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .partial_cmp(&other.score)
            .unwrap_or(Ordering::Equal)
            // Earlier insertion order must win ties, so it sorts *greater*
            // under `BinaryHeap`'s max-heap pop order.
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Tallies, per candidate identity, how many already-assigned views back
/// that identity at each end of a bone. Used to pick the dominant identity
/// a new clique should merge into.
#[derive(Default)]
struct Voting {
    vote: BTreeMap<i32, [i32; 2]>,
}

impl Voting {
    /// Returns every voted identity ordered by total vote count, highest
    /// first.
    fn ranked(&self) -> Vec<(i32, [i32; 2])> {
        let mut entries: Vec<(i32, [i32; 2])> = self.vote.iter().map(|(&k, &v)| (k, v)).collect();
        entries.sort_by(|a, b| (b.1[0] + b.1[1]).cmp(&(a.1[0] + a.1[1])));
        entries
    }
}

/// Stateless per-topology configuration shared across frames.
pub struct Associater {
    def: SkelDef,
    n_views: usize,
    joint2paf: Vec<Vec<usize>>,
    paf_hier: Vec<u32>,
    paf_hier_size: u32,
    config: AssociationConfig,
}

/// Output of one association pass: for every committed identity, a
/// `3 x (V*J)` matrix of chosen 2D candidates (zero columns where none was
/// chosen), keyed by stable identity.
pub struct Skels2d {
    pub skels: BTreeMap<i32, DMatrix<f32>>,
}

impl Associater {
    pub fn new(skel_type: SkelType, n_views: usize, config: AssociationConfig) -> Self {
        let def = topology::def(skel_type);
        let mut joint2paf = vec![Vec::new(); def.joint_size];
        for p in 0..def.paf_size() {
            let (a, b) = def.paf_endpoints(p);
            joint2paf[a].push(p);
            joint2paf[b].push(p);
        }
        let paf_hier: Vec<u32> = (0..def.paf_size())
            .map(|p| {
                let (a, b) = def.paf_endpoints(p);
                def.hierarchy[a].min(def.hierarchy[b])
            })
            .collect();
        let paf_hier_size = paf_hier.iter().copied().max().unwrap_or(0);
        Associater {
            def,
            n_views,
            joint2paf,
            paf_hier,
            paf_hier_size,
            config,
        }
    }

    /// Runs the full per-frame pipeline: enumerate cliques, greedily
    /// commit, dismember and filter, then relabel into stable identities.
    pub fn associate(&self, detections: &[Detection], edges: &EdgeSet, priors: &[Skeleton3d]) -> Skels2d {
        let mut state = AssocState::new(self, detections, edges, priors.len());
        let mut heap: BinaryHeap<BoneClique> = state.enum_all_cliques().into_iter().collect();
        while let Some(clique) = heap.pop() {
            state.assign_top_clique(clique, &mut heap);
        }
        state.dismember_persons(&mut heap);
        while let Some(clique) = heap.pop() {
            state.assign_top_clique(clique, &mut heap);
        }
        state.calc_skels2d(priors)
    }
}

struct AssocState<'a> {
    assoc: &'a Associater,
    detections: &'a [Detection],
    edges: &'a EdgeSet,
    n_priors: usize,
    /// assign[view][joint][candidate] = identity or -1.
    assign: Vec<Vec<Vec<i32>>>,
    /// persons[identity] = J x V candidate-index matrix, -1 where unset.
    persons: BTreeMap<i32, PersonMatrix>,
    next_identity: i32,
    /// Monotonic counter stamped onto every `BoneClique` as it is scored, so
    /// heap ties break by insertion order rather than arbitrarily.
    next_seq: u64,
}

impl<'a> AssocState<'a> {
    fn new(assoc: &'a Associater, detections: &'a [Detection], edges: &'a EdgeSet, n_priors: usize) -> Self {
        let assign: Vec<Vec<Vec<i32>>> = detections
            .iter()
            .map(|d| d.joints.iter().map(|jc| vec![-1i32; jc.len()]).collect())
            .collect();
        let mut persons = BTreeMap::new();
        for i in 0..n_priors {
            persons.insert(
                i as i32,
                PersonMatrix::from_element(assoc.def.joint_size, assoc.n_views, -1),
            );
        }
        AssocState {
            assoc,
            detections,
            edges,
            n_priors,
            assign,
            persons,
            next_identity: n_priors as i32,
            next_seq: 0,
        }
    }

    fn alloc_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Enumerates every bone clique for every PAF: every combination of
    /// per-view candidates (including "absent", coded -1) plus a prior-
    /// person slot, pruned so that any two filled view-slots are epipolar
    /// compatible and any filled view-slot is temporally compatible with a
    /// filled prior slot. A clique with every view slot unset is dropped.
    fn enum_all_cliques(&mut self) -> Vec<BoneClique> {
        let def = &self.assoc.def;
        let n_views = self.assoc.n_views;
        let mut out = Vec::new();
        for paf_idx in 0..def.paf_size() {
            let bone_nodes = &self.edges.bone_nodes[paf_idx];
            let mut proposal = vec![-1i32; n_views + 1];
            self.enum_recurse(paf_idx, bone_nodes, 0, n_views, &mut proposal, &mut out);
        }
        out
    }

    fn enum_recurse(
        &mut self,
        paf_idx: usize,
        bone_nodes: &[Vec<(usize, usize)>],
        slot: usize,
        n_views: usize,
        proposal: &mut Vec<i32>,
        out: &mut Vec<BoneClique>,
    ) {
        let width = n_views + 1;
        if slot == width {
            if proposal[..n_views].iter().any(|&x| x != -1) {
                out.push(self.score_clique(paf_idx, proposal.clone()));
            }
            return;
        }

        // Leave this slot empty.
        proposal[slot] = -1;
        self.enum_recurse(paf_idx, bone_nodes, slot + 1, n_views, proposal, out);

        if slot < n_views {
            for candidate in 0..bone_nodes[slot].len() {
                if self.compatible_view_slot(paf_idx, slot, candidate, proposal, n_views) {
                    proposal[slot] = candidate as i32;
                    self.enum_recurse(paf_idx, bone_nodes, slot + 1, n_views, proposal, out);
                }
            }
        } else {
            for prior_idx in 0..self.n_priors {
                if self.compatible_prior_slot(paf_idx, prior_idx, proposal, n_views) {
                    proposal[slot] = prior_idx as i32;
                    self.enum_recurse(paf_idx, bone_nodes, slot + 1, n_views, proposal, out);
                }
            }
        }
        proposal[slot] = -1;
    }

    fn compatible_view_slot(&self, paf_idx: usize, view: usize, candidate: usize, proposal: &[i32], n_views: usize) -> bool {
        for other_view in 0..n_views {
            let other = proposal[other_view];
            if other == -1 || other_view == view {
                continue;
            }
            let (a, b) = if other_view < view { (other_view, view) } else { (view, other_view) };
            let (cand_a, cand_b) = if other_view < view {
                (other as usize, candidate)
            } else {
                (candidate, other as usize)
            };
            if self.edges.bone_epi[paf_idx][a][b][(cand_a, cand_b)] <= 0.0 {
                return false;
            }
        }
        let prior = proposal[n_views];
        if prior != -1 && self.edges.bone_temp[paf_idx][view][(prior as usize, candidate)] <= 0.0 {
            return false;
        }
        true
    }

    fn compatible_prior_slot(&self, paf_idx: usize, prior_idx: usize, proposal: &[i32], n_views: usize) -> bool {
        for view in 0..n_views {
            let cand = proposal[view];
            if cand == -1 {
                continue;
            }
            if self.edges.bone_temp[paf_idx][view][(prior_idx, cand as usize)] <= 0.0 {
                return false;
            }
        }
        true
    }

    fn score_clique(&mut self, paf_idx: usize, proposal: Vec<i32>) -> BoneClique {
        let n_views = self.assoc.n_views;
        let cfg = &self.assoc.config;

        let mut epi_scores = Vec::new();
        for view_a in 0..n_views.saturating_sub(1) {
            if proposal[view_a] == -1 {
                continue;
            }
            for view_b in (view_a + 1)..n_views {
                if proposal[view_b] == -1 {
                    continue;
                }
                epi_scores.push(
                    self.edges.bone_epi[paf_idx][view_a][view_b]
                        [(proposal[view_a] as usize, proposal[view_b] as usize)],
                );
            }
        }
        let epi_score = mean_or(&epi_scores, 1.0);

        let mut temp_scores = Vec::new();
        let prior_idx = proposal[n_views];
        if prior_idx != -1 {
            for view in 0..n_views {
                if proposal[view] == -1 {
                    continue;
                }
                temp_scores.push(self.edges.bone_temp[paf_idx][view][(prior_idx as usize, proposal[view] as usize)]);
            }
        }
        let temp_score = mean_or(&temp_scores, 0.0);

        let mut paf_scores = Vec::new();
        for view in 0..n_views {
            if proposal[view] == -1 {
                continue;
            }
            let (a, b) = self.edges.bone_nodes[paf_idx][view][proposal[view] as usize];
            paf_scores.push(self.detections[view].pafs[paf_idx][(a, b)]);
        }
        let paf_score = mean_or(&paf_scores, 0.0);

        let view_cnt = proposal[..n_views].iter().filter(|&&x| x != -1).count();
        let view_score = welsch(cfg.c_view_cnt, view_cnt as f32);

        let hier = self.assoc.paf_hier[paf_idx] as f32;
        let hier_score = 1.0 - (hier / self.assoc.paf_hier_size.max(1) as f32).powi(4);

        let denom = cfg.w_epi + cfg.w_temp + cfg.w_paf + cfg.w_view + cfg.w_hier;
        let score = if denom.abs() < f32::EPSILON {
            0.0
        } else {
            (cfg.w_epi * epi_score
                + cfg.w_temp * temp_score
                + cfg.w_paf * paf_score
                + cfg.w_view * view_score
                + cfg.w_hier * hier_score)
                / denom
        };

        let seq = self.alloc_seq();
        BoneClique { score, paf_idx, proposal, seq }
    }

    /// Checks whether `candidate` can be written into `person`'s joint `j`
    /// for `view` without conflicting with an already-placed candidate, a
    /// PAF-incompatible neighbor joint, or an epipolar-incompatible sibling
    /// view. Returns the number of corroborating constraints on success,
    /// or -1 on conflict.
    fn check_joint_compat(&self, view: usize, j: usize, candidate: usize, person_idx: i32) -> i32 {
        let def = &self.assoc.def;
        let person = &self.persons[&person_idx];
        let mut count = 0;

        let existing = person[(j, view)];
        if existing != -1 && existing != candidate as i32 {
            return -1;
        }

        for &paf_idx in &self.assoc.joint2paf[j] {
            let (pa, pb) = def.paf_endpoints(paf_idx);
            let check_j = if pa == j { pb } else { pa };
            let check_candidate = person[(check_j, view)];
            if check_candidate == -1 {
                continue;
            }
            let (a, b) = if j == pa {
                (candidate, check_candidate as usize)
            } else {
                (check_candidate as usize, candidate)
            };
            if self.detections[view].pafs[paf_idx][(a, b)] > 0.0 {
                count += 1;
            } else {
                return -1;
            }
        }

        for view_i in 0..self.assoc.n_views {
            if view_i == view {
                continue;
            }
            let other = person[(j, view_i)];
            if other == -1 {
                continue;
            }
            let (a, b) = if view_i < view { (view_i, view) } else { (view, view_i) };
            let (cand_a, cand_b) = if view_i < view {
                (other as usize, candidate)
            } else {
                (candidate, other as usize)
            };
            if self.edges.epi[j][a][b][(cand_a, cand_b)] > 0.0 {
                count += 1;
            } else {
                return -1;
            }
        }
        count
    }

    fn check_person_compat_view(&self, master_idx: i32, slave_idx: i32, view: usize) -> i32 {
        let def = &self.assoc.def;
        let master = &self.persons[&master_idx];
        let slave = &self.persons[&slave_idx];
        let mut count = 0;

        for j in 0..def.joint_size {
            let m = master[(j, view)];
            let s = slave[(j, view)];
            if m != -1 && s != -1 && m != s {
                return -1;
            }
        }

        if (master_idx as usize) < self.n_priors {
            for j in 0..def.joint_size {
                let s = slave[(j, view)];
                if s == -1 {
                    continue;
                }
                if self.edges.temp[j][view][(master_idx as usize, s as usize)] > 0.0 {
                    count += 1;
                } else {
                    return -1;
                }
            }
        }

        for paf_idx in 0..def.paf_size() {
            let (pa, pb) = def.paf_endpoints(paf_idx);
            for (a, b) in [(master[(pa, view)], slave[(pb, view)]), (slave[(pa, view)], master[(pb, view)])] {
                if a >= 0 && b >= 0 {
                    if self.detections[view].pafs[paf_idx][(a as usize, b as usize)] > 0.0 {
                        count += 1;
                    } else {
                        return -1;
                    }
                }
            }
        }
        count
    }

    /// Full cross-view compatibility check for merging `slave_idx` into
    /// `master_idx`: per-view checks plus cross-view epipolar checks
    /// between joints the two persons each already hold in different
    /// views. `slave_idx` must not itself be a prior slot.
    fn check_person_compat(&self, master_idx: i32, slave_idx: i32) -> i32 {
        if (slave_idx as usize) < self.n_priors {
            return -1;
        }
        let def = &self.assoc.def;
        let mut count = 0;
        for view in 0..self.assoc.n_views {
            let c = self.check_person_compat_view(master_idx, slave_idx, view);
            if c == -1 {
                return -1;
            }
            count += c;
        }

        let master = &self.persons[&master_idx];
        let slave = &self.persons[&slave_idx];
        for j in 0..def.joint_size {
            for view_a in 0..self.assoc.n_views.saturating_sub(1) {
                let a = master[(j, view_a)];
                if a == -1 {
                    continue;
                }
                for view_b in (view_a + 1)..self.assoc.n_views {
                    let b = slave[(j, view_b)];
                    if b == -1 {
                        continue;
                    }
                    if self.edges.epi[j][view_a][view_b][(a as usize, b as usize)] > 0.0 {
                        count += 1;
                    } else {
                        return -1;
                    }
                }
            }
        }
        count
    }

    fn merge_person(&mut self, master_idx: i32, slave_idx: i32) {
        let joint_size = self.assoc.def.joint_size;
        let n_views = self.assoc.n_views;
        let slave = self.persons.remove(&slave_idx).expect("slave exists");
        {
            let master = self.persons.get_mut(&master_idx).expect("master exists");
            for view in 0..n_views {
                for j in 0..joint_size {
                    let v = slave[(j, view)];
                    if v != -1 {
                        master[(j, view)] = v;
                    }
                }
            }
        }
        for view in 0..n_views {
            for j in 0..joint_size {
                let v = slave[(j, view)];
                if v != -1 {
                    self.assign[view][j][v as usize] = master_idx;
                }
            }
        }
    }

    fn voting_for(&self, clique: &BoneClique) -> Voting {
        let def = &self.assoc.def;
        let (ja, jb) = def.paf_endpoints(clique.paf_idx);
        let mut voting = Voting::default();
        for view in 0..self.assoc.n_views {
            let index = clique.proposal[view];
            if index == -1 {
                continue;
            }
            let (a, b) = self.edges.bone_nodes[clique.paf_idx][view][index as usize];
            let id_a = self.assign[view][ja][a];
            let id_b = self.assign[view][jb][b];
            if id_a != -1 {
                voting.vote.entry(id_a).or_insert([0, 0])[0] += 1;
            }
            if id_b != -1 {
                voting.vote.entry(id_b).or_insert([0, 0])[1] += 1;
            }
        }
        voting
    }

    /// Case 2 of §4.5: when neither endpoint of an unvoted clique is
    /// already claimed, try to attach it to an existing identity before
    /// spawning a new one. Picks one representative selected view,
    /// checks both endpoints' joint compatibility against every existing
    /// identity (prior or already created), and returns the most
    /// corroborated one meeting `min_check_cnt`, or `None` if none
    /// qualifies (the caller then creates a fresh identity).
    fn find_unvoted_attach_target(&self, clique: &BoneClique, ja: usize, jb: usize, n_views: usize) -> Option<i32> {
        let view = (0..n_views).find(|&v| clique.proposal[v] != -1)?;
        let (a, b) = self.edges.bone_nodes[clique.paf_idx][view][clique.proposal[view] as usize];
        let min_check_cnt = self.assoc.config.min_check_cnt;
        let mut best: Option<(i32, i32)> = None;
        for &pid in self.persons.keys() {
            let ca = self.check_joint_compat(view, ja, a, pid);
            if ca == -1 {
                continue;
            }
            let cb = self.check_joint_compat(view, jb, b, pid);
            if cb == -1 {
                continue;
            }
            let total = ca + cb;
            if total >= min_check_cnt && best.map_or(true, |(best_total, _)| total > best_total) {
                best = Some((total, pid));
            }
        }
        best.map(|(_, pid)| pid)
    }

    /// Greedily commits one clique, following the reference's five-case
    /// dispatch: a pre-bound prior slot always wins; an unvoted clique
    /// attaches to an existing identity if one checks out (else spawns a
    /// new one); a clique voted for by exactly one identity joins it; a
    /// clique whose two ends agree on identity extends it; and a clique
    /// whose two ends disagree either merges the two identities (if
    /// compatible) or keeps only the dominant one.
    fn assign_top_clique(&mut self, clique: BoneClique, heap: &mut BinaryHeap<BoneClique>) {
        let def = &self.assoc.def;
        let (ja, jb) = def.paf_endpoints(clique.paf_idx);
        let n_views = self.assoc.n_views;

        let prior_idx = clique.proposal[n_views];
        let target = if prior_idx != -1 {
            prior_idx
        } else {
            let voting = self.voting_for(&clique);
            let ranked = voting.ranked();
            match ranked.len() {
                0 => match self.find_unvoted_attach_target(&clique, ja, jb, n_views) {
                    Some(id) => id,
                    None => {
                        let id = self.next_identity;
                        self.next_identity += 1;
                        self.persons.insert(id, PersonMatrix::from_element(def.joint_size, n_views, -1));
                        id
                    }
                },
                1 => ranked[0].0,
                _ => {
                    let (master, slave) = (ranked[0].0, ranked[1].0);
                    if master == slave {
                        master
                    } else if self.check_person_compat(master, slave) >= 0 {
                        self.merge_person(master, slave);
                        master
                    } else {
                        master
                    }
                }
            }
        };

        for view in 0..n_views {
            let index = clique.proposal[view];
            if index == -1 {
                continue;
            }
            let (a, b) = self.edges.bone_nodes[clique.paf_idx][view][index as usize];
            if self.check_joint_compat(view, ja, a, target) >= 0 {
                self.persons.get_mut(&target).unwrap()[(ja, view)] = a as i32;
                self.assign[view][ja][a] = target;
            }
            if self.check_joint_compat(view, jb, b, target) >= 0 {
                self.persons.get_mut(&target).unwrap()[(jb, view)] = b as i32;
                self.assign[view][jb][b] = target;
            }
        }
        let _ = heap;
    }

    /// Drops any non-prior identity whose total filled cells fall below
    /// `min_asgn_cnt`, returns its bones to the heap as single-view
    /// proposals so they can be re-grouped under a different identity.
    ///
    /// The reference pipeline never calls its equivalent of this pass; it
    /// only clears assignment-map entries for under-filled identities
    /// without re-queuing their bones. The documented post-pass behavior
    /// this mirrors is closer to re-queuing, so this implementation does
    /// that.
    fn dismember_persons(&mut self, heap: &mut BinaryHeap<BoneClique>) {
        let def = &self.assoc.def;
        let n_views = self.assoc.n_views;
        let mut to_drop = Vec::new();
        for (&id, person) in self.persons.iter() {
            if (id as usize) < self.n_priors {
                continue;
            }
            let filled = (0..def.joint_size)
                .flat_map(|j| (0..n_views).map(move |v| (j, v)))
                .filter(|&(j, v)| person[(j, v)] != -1)
                .count();
            if filled < self.assoc.config.min_asgn_cnt {
                to_drop.push(id);
            }
        }

        for id in to_drop {
            let person = self.persons.remove(&id).expect("dropped identity exists");
            for view in 0..n_views {
                for j in 0..def.joint_size {
                    let c = person[(j, view)];
                    if c != -1 {
                        self.assign[view][j][c as usize] = -1;
                    }
                }
            }
            for paf_idx in 0..def.paf_size() {
                let (pa, pb) = def.paf_endpoints(paf_idx);
                for view in 0..n_views {
                    let a = person[(pa, view)];
                    let b = person[(pb, view)];
                    if a == -1 && b == -1 {
                        continue;
                    }
                    let mut proposal = vec![-1i32; n_views + 1];
                    if a != -1 {
                        if let Some(idx) = self.edges.bone_nodes[paf_idx][view]
                            .iter()
                            .position(|&(na, _)| na as i32 == a)
                        {
                            proposal[view] = idx as i32;
                        }
                    } else if b != -1 {
                        if let Some(idx) = self.edges.bone_nodes[paf_idx][view]
                            .iter()
                            .position(|&(_, nb)| nb as i32 == b)
                        {
                            proposal[view] = idx as i32;
                        }
                    }
                    if proposal[..n_views].iter().any(|&x| x != -1) {
                        heap.push(self.score_clique(paf_idx, proposal));
                    }
                }
            }
        }
    }

    fn calc_skels2d(&mut self, priors: &[Skeleton3d]) -> Skels2d {
        let def = &self.assoc.def;
        let n_views = self.assoc.n_views;

        let mut skels = BTreeMap::new();
        for (&idx, person) in self.persons.iter() {
            let identity = if (idx as usize) < self.n_priors {
                priors[idx as usize].identity
            } else {
                idx
            };
            let mut skel2d = DMatrix::zeros(3, n_views * def.joint_size);
            for view in 0..n_views {
                for j in 0..def.joint_size {
                    let c = person[(j, view)];
                    if c != -1 {
                        let jc = &self.detections[view].joints[j];
                        let col = view * def.joint_size + j;
                        skel2d[(0, col)] = jc.u[c as usize];
                        skel2d[(1, col)] = jc.v[c as usize];
                        skel2d[(2, col)] = jc.confidence[c as usize];
                    }
                }
            }
            skels.insert(identity, skel2d);
        }
        Skels2d { skels }
    }
}

fn mean_or(values: &[f32], default: f32) -> f32 {
    if values.is_empty() {
        default
    } else {
        values.iter().sum::<f32>() / values.len() as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Camera;
    use crate::edges::{self, EdgeSet};
    use crate::topology::SkelType;
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

    fn full_detection(skel_type: SkelType, u: f32, v: f32) -> Detection {
        let def = topology::def(skel_type);
        let joints = (0..def.joint_size)
            .map(|_| crate::detection::JointCandidates {
                u: vec![u],
                v: vec![v],
                confidence: vec![1.0],
            })
            .collect();
        let pafs = (0..def.paf_size()).map(|_| DMatrix::from_element(1, 1, 1.0)).collect();
        Detection { skel_type, joints, pafs }
    }

    #[test]
    fn given_two_view_single_person_when_associate_then_one_identity_with_all_joints() {
        let cams = vec![camera_at(-0.2), camera_at(0.3)];
        let x = Vector3::new(0.05, 0.02, 2.0);
        let (u0, v0) = cams[0].project(&x);
        let (u1, v1) = cams[1].project(&x);
        let detections = vec![
            full_detection(SkelType::Skel19, u0, v0),
            full_detection(SkelType::Skel19, u1, v1),
        ];
        let rays = edges::calc_joint_rays(&detections, &cams);
        let config = AssociationConfig::default();
        let edge_set = EdgeSet::build(SkelType::Skel19, &detections, &cams, &rays, &[], &config);

        let associater = Associater::new(SkelType::Skel19, 2, config);
        let result = associater.associate(&detections, &edge_set, &[]);
        assert_eq!(result.skels.len(), 1);
        let skel = result.skels.values().next().unwrap();
        assert!(skel.row(2).iter().filter(|&&c| c > 0.0).count() > 0);
    }

    #[test]
    fn given_no_candidates_above_threshold_when_associate_then_no_identities() {
        let cams = vec![camera_at(0.0)];
        let mut d = full_detection(SkelType::Skel19, 320.0, 240.0);
        for paf in d.pafs.iter_mut() {
            paf[(0, 0)] = 0.0;
        }
        let detections = vec![d];
        let rays = edges::calc_joint_rays(&detections, &cams);
        let config = AssociationConfig::default();
        let edge_set = EdgeSet::build(SkelType::Skel19, &detections, &cams, &rays, &[], &config);
        let associater = Associater::new(SkelType::Skel19, 1, config);
        let result = associater.associate(&detections, &edge_set, &[]);
        assert!(result.skels.is_empty());
    }

    #[test]
    fn given_prior_identity_when_associate_then_output_keeps_stable_identity() {
        let cam = camera_at(0.0);
        let x = Vector3::new(0.0, 0.0, 2.0);
        let (u, v) = cam.project(&x);
        let detections = vec![full_detection(SkelType::Skel19, u, v)];
        let cams = vec![cam];
        let rays = edges::calc_joint_rays(&detections, &cams);
        let mut prior = Skeleton3d::empty(42, topology::def(SkelType::Skel19).joint_size);
        for j in 0..prior.joint_size() {
            prior.set_joint(j, x, 1.0);
        }
        let config = AssociationConfig::default();
        let edge_set = EdgeSet::build(SkelType::Skel19, &detections, &cams, &rays, &[prior.clone()], &config);
        let associater = Associater::new(SkelType::Skel19, 1, config);
        let result = associater.associate(&detections, &edge_set, &[prior]);
        assert!(result.skels.contains_key(&42));
    }

    /// §4.5 case 2: an unvoted clique whose single selected view is
    /// otherwise unclaimed should still attach to an existing identity
    /// when that identity already holds both endpoints from a different
    /// view with positive cross-view agreement, rather than spawning a
    /// spurious new identity.
    #[test]
    fn given_existing_identity_spans_both_endpoints_elsewhere_when_unvoted_clique_then_attaches_instead_of_new() {
        let cams = vec![camera_at(-0.2), camera_at(0.3)];
        let x = Vector3::new(0.05, 0.02, 2.0);
        let (u0, v0) = cams[0].project(&x);
        let (u1, v1) = cams[1].project(&x);
        let detections = vec![
            full_detection(SkelType::Skel19, u0, v0),
            full_detection(SkelType::Skel19, u1, v1),
        ];
        let rays = edges::calc_joint_rays(&detections, &cams);
        let config = AssociationConfig::default();
        let edge_set = EdgeSet::build(SkelType::Skel19, &detections, &cams, &rays, &[], &config);
        let associater = Associater::new(SkelType::Skel19, 2, config);

        let mut state = AssocState::new(&associater, &detections, &edge_set, 0);
        let def = topology::def(SkelType::Skel19);
        let (ja, jb) = def.paf_endpoints(0);

        let mut person = PersonMatrix::from_element(def.joint_size, 2, -1);
        person[(ja, 0)] = 0;
        person[(jb, 0)] = 0;
        state.persons.insert(0, person);
        state.assign[0][ja][0] = 0;
        state.assign[0][jb][0] = 0;
        state.next_identity = 1;

        let mut proposal = vec![-1i32; 3];
        proposal[1] = 0;
        let clique = BoneClique {
            score: 1.0,
            paf_idx: 0,
            proposal,
            seq: 0,
        };

        let target = state.find_unvoted_attach_target(&clique, ja, jb, 2);
        assert_eq!(target, Some(0));
    }
}
