use serde::{Deserialize, Serialize};

/// Tunables for the edge builder (C4) and associater (C5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssociationConfig {
    pub max_epi_dist: f32,
    pub max_temp_dist: f32,
    pub min_asgn_cnt: usize,
    pub normalize_edges: bool,
    pub w_epi: f32,
    pub w_temp: f32,
    pub w_paf: f32,
    pub w_view: f32,
    pub w_hier: f32,
    pub c_view_cnt: f32,
    pub min_check_cnt: i32,
}

impl Default for AssociationConfig {
    fn default() -> Self {
        Self {
            max_epi_dist: 0.15,
            max_temp_dist: 0.3,
            min_asgn_cnt: 5,
            normalize_edges: true,
            w_epi: 1.0,
            w_temp: 2.0,
            w_paf: 1.0,
            w_view: 1.0,
            w_hier: 0.0,
            c_view_cnt: 1.5,
            min_check_cnt: 2,
        }
    }
}

/// Tunables for the triangulator (C3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriangulationConfig {
    pub max_iter: usize,
    pub update_tolerance: f32,
    pub regular_term: f32,
    pub triangulate_thresh: f32,
}

impl Default for TriangulationConfig {
    fn default() -> Self {
        Self {
            max_iter: 20,
            update_tolerance: 1e-4,
            regular_term: 1e-4,
            triangulate_thresh: 0.05,
        }
    }
}

/// Tunables for the skeleton solver (C7), shared by shape and pose terms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverConfig {
    pub shape_max_iter: usize,
    pub pose_max_iter: usize,
    pub update_thresh: f32,
    pub w_bone3d: f32,
    pub w_j3d: f32,
    pub w_j2d: f32,
    pub w_square_shape: f32,
    pub w_regular_shape: f32,
    pub w_regular_pose: f32,
    pub w_temporal_trans: f32,
    pub w_temporal_pose: f32,
    pub w_temporal_shape: f32,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            shape_max_iter: 5,
            pose_max_iter: 5,
            update_thresh: 1e-4,
            w_bone3d: 1.0,
            w_j3d: 1.0,
            w_j2d: 1e-5,
            w_square_shape: 1e-3,
            w_regular_shape: 0.0,
            w_regular_pose: 1e-4,
            w_temporal_trans: 1e-2,
            w_temporal_pose: 1e-3,
            w_temporal_shape: 0.0,
        }
    }
}

/// Tunables for the updater/tracker (C8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerTuning {
    pub min_track_j_cnt: usize,
    pub min_triangulate_j_cnt: usize,
    pub bone_capacity: u32,
    pub init_active: f32,
    pub active_rate: f32,
}

impl Default for TrackerTuning {
    fn default() -> Self {
        Self {
            min_track_j_cnt: 20,
            min_triangulate_j_cnt: 5,
            bone_capacity: 30,
            init_active: 0.9,
            active_rate: 0.5,
        }
    }
}

/// All tunable parameters for one tracking session (§6).
///
/// Loaded from a JSON file with the same `serde_json` + `anyhow::Context`
/// idiom the teacher uses for `ProjectSettings`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackerConfig {
    pub association: AssociationConfig,
    pub triangulation: TriangulationConfig,
    pub solver: SolverConfig,
    pub tracking: TrackerTuning,
}

impl TrackerConfig {
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        use anyhow::Context;
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to load tracker config: {}", path.display()))?;
        let config: TrackerConfig =
            serde_json::from_str(&content).context("failed to parse tracker config JSON")?;
        Ok(config)
    }

    pub fn save(&self, path: &std::path::Path) -> anyhow::Result<()> {
        use anyhow::Context;
        let content = serde_json::to_string_pretty(self)
            .context("failed to serialize tracker config as JSON")?;
        std::fs::write(path, content)
            .with_context(|| format!("failed to save tracker config: {}", path.display()))?;
        Ok(())
    }
}
