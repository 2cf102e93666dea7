//! Error taxonomy for the optimization loop.
//!
//! Errors fall into five classes with different blast radii:
//!
//! | Class               | Radius      | Loop behavior                        |
//! |---------------------|-------------|--------------------------------------|
//! | Config              | whole run   | abort before the loop starts         |
//! | Measurement         | one batch   | batch fails, iteration continues     |
//! | DegenerateScore     | one record  | record excluded from matrices        |
//! | ConstraintViolation | one batch   | batch dropped, iteration continues   |
//! | Fatal               | whole run   | abort; snapshot may be stale         |
//!
//! Batch-local classes never stop the run: the controller logs them, marks
//! the batch, and keeps going with whatever batches remain.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = OptimizerError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum OptimizerError {
    /// Invalid configuration, caught before the loop starts.
    #[error("configuration error: {reason}")]
    Config { reason: String },

    /// The executor failed to run a batch or deliver its signals.
    #[error("measurement failed for {batch_id}: {source}")]
    Measurement {
        batch_id: String,
        #[source]
        source: anyhow::Error,
    },

    /// A score came out undefined (NaN, empty regions, non-positive areas).
    #[error("degenerate score: {reason}")]
    DegenerateScore { reason: String },

    /// A resolved constrained parameter fell outside its declared bounds.
    #[error("constraint violation in {batch_id}: {param} = {value} outside [{min}, {max}]")]
    ConstraintViolation {
        batch_id: String,
        param: String,
        value: f64,
        min: f64,
        max: f64,
    },

    /// Unrecoverable condition (snapshot write failure, poisoned state).
    #[error("fatal: {0}")]
    Fatal(#[from] anyhow::Error),
}

impl OptimizerError {
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config { reason: reason.into() }
    }

    pub fn degenerate(reason: impl Into<String>) -> Self {
        Self::DegenerateScore { reason: reason.into() }
    }

    /// True for errors that invalidate a single batch or record but leave
    /// the run itself healthy.
    pub fn is_batch_local(&self) -> bool {
        matches!(
            self,
            Self::Measurement { .. } | Self::DegenerateScore { .. } | Self::ConstraintViolation { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_local_classification() {
        let degenerate = OptimizerError::degenerate("no peak regions");
        assert!(degenerate.is_batch_local());

        let config = OptimizerError::config("unknown algorithm");
        assert!(!config.is_batch_local());

        let fatal = OptimizerError::Fatal(anyhow::anyhow!("disk full"));
        assert!(!fatal.is_batch_local());
    }

    #[test]
    fn test_constraint_violation_message() {
        let err = OptimizerError::ConstraintViolation {
            batch_id: "batch 2".into(),
            param: "Add_2-volume".into(),
            value: 55.0,
            min: 0.0,
            max: 50.0,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("batch 2"), "got {}", msg);
        assert!(msg.contains("Add_2-volume"), "got {}", msg);
    }
}
