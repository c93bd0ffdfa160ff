use thiserror::Error;

/// Failures that abort tracking for a single frame.
///
/// None of these leave the tracking registry half-updated: reconciliation
/// validates everything before it mutates state.
#[derive(Debug, Error)]
pub enum TrackError {
    /// The caller handed over input the engine cannot reason about
    /// (negative costs, non-square matrices, empty meshes, NaN coordinates).
    #[error("precondition violated: {0}")]
    Precondition(String),

    /// The assignment solver did not return a perfect matching.
    #[error("assignment solver returned {pairs} pairs that do not form a perfect matching of size {size}")]
    SolverContract { size: usize, pairs: usize },

    #[error("opencv: {0}")]
    OpenCv(#[from] opencv::Error),
}

pub type TrackResult<T> = std::result::Result<T, TrackError>;
