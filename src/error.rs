// src/error.rs
use thiserror::Error;
use std::io;
use std::time::Duration;
use crate::types::PixelId;

/// Why the optimizer concluded that no partition satisfies the constraints.
#[derive(Debug, Clone, PartialEq)]
pub enum InfeasibilityReason {
    /// `min_regions * min_region_size` exceeds the pixel count.
    TooFewPixels { required: usize, available: usize },
    /// `max_regions * max_region_size` is below the pixel count.
    TooManyPixels { capacity: usize, available: usize },
    /// Each connected component needs its own region.
    TooManyComponents { components: usize, max_regions: usize },
    /// No split of region counts across components respects the size bounds.
    ComponentSizes { component_sizes: Vec<usize> },
    /// Exhaustive search visited every labeling without one passing every constraint.
    SearchExhausted { nodes: u64 },
}

impl std::fmt::Display for InfeasibilityReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooFewPixels { required, available } => write!(
                f,
                "minimum region sizes need {} pixels but only {} are available",
                required, available
            ),
            Self::TooManyPixels { capacity, available } => write!(
                f,
                "maximum region sizes hold {} pixels but {} must be assigned",
                capacity, available
            ),
            Self::TooManyComponents { components, max_regions } => write!(
                f,
                "graph has {} disconnected components but at most {} regions are allowed",
                components, max_regions
            ),
            Self::ComponentSizes { component_sizes } => write!(
                f,
                "component sizes {:?} cannot be split within the region size and count bounds",
                component_sizes
            ),
            Self::SearchExhausted { nodes } => write!(
                f,
                "exhaustive search of {} nodes found no contiguous partition satisfying all constraints",
                nodes
            ),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Pixel {pixel_id} has {actual} attributes, expected {expected}")]
    DimensionMismatch { pixel_id: PixelId, expected: usize, actual: usize },

    #[error("Attribute {attribute} has zero variance")]
    DegenerateAttribute { attribute: usize },

    #[error("Empty input: {0}")]
    EmptyInput(String),

    #[error("Invalid cluster count {k} for {pixel_count} pixels")]
    InvalidK { k: usize, pixel_count: usize },

    #[error("Infeasible: {reason}")]
    Infeasible { reason: InfeasibilityReason },

    #[error("Solver timed out after {elapsed:?} ({iterations} iterations) without a feasible partition")]
    TimedOut {
        elapsed: Duration,
        iterations: u64,
        /// Objective of the best complete labeling seen, feasible or not.
        best_objective: Option<f64>,
    },

    #[error("No feasible partition found after {attempts} heuristic attempts in {elapsed:?}; infeasibility was not proven")]
    NoSolutionFound {
        attempts: usize,
        elapsed: Duration,
        best_objective: Option<f64>,
    },

    #[error("Pixel {pixel_id} is missing from the assignment")]
    IncompleteAssignment { pixel_id: PixelId },

    #[error("Assignment references unknown pixel {pixel_id}")]
    UnknownPixelReference { pixel_id: PixelId },

    #[error("Duplicate pixel id: {0}")]
    DuplicatePixel(PixelId),

    #[error("Geometry error: {0}")]
    Geometry(String),

    #[error("Thread pool error: {0}")]
    ThreadPool(String),
}

// Type alias for Result
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    pub fn empty<S: Into<String>>(msg: S) -> Self {
        Error::EmptyInput(msg.into())
    }

    pub fn geometry<S: Into<String>>(msg: S) -> Self {
        Error::Geometry(msg.into())
    }

    /// Terminal optimizer outcomes, as opposed to bad input or internal bugs.
    pub fn is_solver_outcome(&self) -> bool {
        matches!(
            self,
            Error::Infeasible { .. } | Error::TimedOut { .. } | Error::NoSolutionFound { .. }
        )
    }

    /// Cross-stage contract violations; these are bugs, not user errors.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Error::IncompleteAssignment { .. } | Error::UnknownPixelReference { .. }
        )
    }
}

impl From<rayon::ThreadPoolBuildError> for Error {
    fn from(err: rayon::ThreadPoolBuildError) -> Self {
        Error::ThreadPool(format!("Thread pool build failed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_solver_outcomes() {
        let infeasible = Error::Infeasible {
            reason: InfeasibilityReason::TooFewPixels { required: 15, available: 9 },
        };
        let timed_out = Error::TimedOut {
            elapsed: Duration::from_secs(1),
            iterations: 10,
            best_objective: None,
        };
        assert!(infeasible.is_solver_outcome());
        assert!(timed_out.is_solver_outcome());
        let unproven = Error::NoSolutionFound {
            attempts: 64,
            elapsed: Duration::from_millis(30),
            best_objective: Some(4.5),
        };
        assert!(unproven.is_solver_outcome());
        assert!(!unproven.is_contract_violation());
        assert!(!infeasible.is_contract_violation());

        let missing = Error::IncompleteAssignment { pixel_id: PixelId(3) };
        assert!(missing.is_contract_violation());
        assert!(!missing.is_solver_outcome());
    }

    #[test]
    fn messages_carry_detail() {
        let err = Error::Infeasible {
            reason: InfeasibilityReason::TooFewPixels { required: 15, available: 9 },
        };
        let msg = err.to_string();
        assert!(msg.contains("15"));
        assert!(msg.contains("9"));
    }
}
