//! Online 4D (3D + time) multi-view multi-person skeleton association and
//! fitting.
//!
//! Per frame: 2D pose detections from N calibrated cameras are grouped into
//! identity-tagged bone cliques ([`associate`]), triangulated and fit
//! against a parametric skeleton template ([`kinematics`], [`solver`]), and
//! carried forward as the next frame's association prior ([`updater`]).

pub mod associate;
pub mod camera;
pub mod config;
pub mod detection;
pub mod edges;
pub mod error;
pub mod hungarian;
pub mod kinematics;
pub mod linalg;
pub mod skeleton;
pub mod solver;
pub mod topology;
pub mod triangulate;
pub mod updater;

pub use associate::{Associater, Skels2d};
pub use camera::Camera;
pub use config::TrackerConfig;
pub use detection::Detection;
pub use error::{Result, TrackError};
pub use kinematics::SkelModel;
pub use skeleton::Skeleton3d;
pub use topology::SkelType;
pub use updater::Tracker;
