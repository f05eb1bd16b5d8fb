//! Review processors: filtering, errant selection, drift correction and
//! link-quality scoring.

pub mod drift;
pub mod errant;
pub mod filter;
pub mod filter_set;
pub mod links;
pub mod memory_links;
pub mod stats;

use thiserror::Error;

use crate::core::table::TableError;

/// Errors shared by the review processors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProcessingError {
    /// A filter or processor referenced a column the table does not have.
    #[error("unknown feature '{feature}': no such column in the table")]
    UnknownFeature { feature: String },

    /// A scalar parameter is outside its valid range.
    #[error("invalid parameter {name} = {value}: {reason}")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error(transparent)]
    Table(#[from] TableError),
}

/// Result type for processor operations.
pub type Result<T> = std::result::Result<T, ProcessingError>;

impl ProcessingError {
    pub(crate) fn unknown_feature(feature: &str) -> Self {
        ProcessingError::UnknownFeature {
            feature: feature.to_string(),
        }
    }

    pub(crate) fn invalid(name: &'static str, value: impl ToString, reason: &'static str) -> Self {
        ProcessingError::InvalidParameter {
            name,
            value: value.to_string(),
            reason,
        }
    }
}

/// Rejects a zero result limit.
pub(crate) fn require_nonzero(name: &'static str, value: usize) -> Result<()> {
    if value == 0 {
        return Err(ProcessingError::invalid(name, value, "must be greater than zero"));
    }
    Ok(())
}

// Re-export key types for convenience
pub use drift::{compute_drift, correct_drift, subtract_drift, FrameDrift};
pub use errant::{select_errant, ErrantCandidate};
pub use filter::{Combine, FilterExpression, FilterParseError, Operator, SimpleFilter};
pub use filter_set::FilterSet;
pub use links::{score_links, LinkScore, LinkScoringParams};
pub use memory_links::{find_memory_links, MemoryLink};
pub use stats::{filter_stubs, prepare_trajectories, trajectory_stats, TrajectoryStats};
