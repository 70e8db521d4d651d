//! Error types for akin.

use thiserror::Error;

/// Errors that can occur while building or refining a neighbor graph.
///
/// All variants are raised during input validation, before any work starts.
/// Cooperative interruption is not an error; it is reported through
/// [`Termination::Interrupted`](crate::descent::Termination).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DescentError {
    /// Invalid parameter value; the message names the offending parameter.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Dimension mismatch between two point sets.
    #[error("dimension mismatch: left side has {x_dim} dimensions, right side has {y_dim}")]
    DimensionMismatch { x_dim: usize, y_dim: usize },

    /// Metric name not in the catalog.
    #[error("unknown metric: {0:?}")]
    UnknownMetric(String),

    /// Malformed flat matrix or CSR input.
    #[error("invalid data shape: {0}")]
    InvalidShape(String),
}

/// Result type alias for akin operations.
pub type Result<T> = std::result::Result<T, DescentError>;
