use thiserror::Error;

/// Errors surfaced by the library boundary.
///
/// Per the error-handling design, only configuration and input-shape
/// problems are fatal; numeric non-convergence, empty frames, and person
/// deletion are contained locally and never reach this type (see
/// `triangulate`, `tracker`).
#[derive(Error, Debug)]
pub enum TrackError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("input shape error: {0}")]
    InputShape(String),

    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse {what}: {reason}")]
    Parse { what: String, reason: String },
}

pub type Result<T> = std::result::Result<T, TrackError>;
