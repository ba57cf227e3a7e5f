use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("input not found: {}", .0.display())]
    MissingInput(PathBuf),

    #[error("ground-truth directory not found: {}", .0.display())]
    MissingGroundTruth(PathBuf),

    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("score {0} outside [0, 1]")]
    ScoreOutOfRange(f64),

    #[error("malformed label line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Rejects an IoU-style threshold outside `[0, 1]`.
pub(crate) fn check_unit_interval(name: &'static str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(Error::InvalidParameter {
            name,
            reason: format!("{} is outside [0, 1]", value),
        })
    }
}

pub(crate) fn check_positive(name: &'static str, value: usize) -> Result<()> {
    if value > 0 {
        Ok(())
    } else {
        Err(Error::InvalidParameter {
            name,
            reason: "must be at least 1".to_string(),
        })
    }
}
