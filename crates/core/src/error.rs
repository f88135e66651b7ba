//! Error types for the meridian layout-analysis library.

use thiserror::Error;

/// Primary error type for tab-stop detection.
#[derive(Error, Debug)]
pub enum TabFindError {
    /// The fitted page skew is too large to be believable. Detection is
    /// abandoned so the caller can fall back to an unskewed, single-column
    /// interpretation of the page.
    #[error("implausible page skew: cos(angle) = {cos_angle:.4} below threshold {threshold:.4}")]
    ExcessiveSkew { cos_angle: f64, threshold: f64 },

    #[error("grid extent is empty: ({left},{bottom})->({right},{top})")]
    EmptyGridExtent {
        left: i32,
        bottom: i32,
        right: i32,
        top: i32,
    },

    #[error("invalid page description: {0}")]
    InvalidInput(String),
}

/// Convenience Result type alias for TabFindError.
pub type Result<T> = std::result::Result<T, TabFindError>;
