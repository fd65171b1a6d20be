//! Errors in the library.
use thiserror::Error;

/// Errors in the library.
#[derive(Error, Debug, PartialEq)]
pub enum PpoError {
    /// Record key error.
    #[error("Record key error: {0}")]
    RecordKeyError(String),

    /// Record value type error.
    #[error("Record value type error: {0}")]
    RecordValueTypeError(String),

    /// A configuration value makes the requested computation impossible.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A tensor produced by the policy or handed to a computation has an unexpected shape.
    #[error("Shape mismatch for {name}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Name of the offending tensor.
        name: String,
        /// Expected shape; `-1` matches any size.
        expected: Vec<i64>,
        /// Actual shape.
        actual: Vec<i64>,
    },

    /// Observation shape of the policy differs from the environment's.
    #[error(
        "Observation space mismatch error:\n[policy] shape: {policy:?}\nenvironment_shape: {env:?}"
    )]
    ObsShapeMismatch {
        /// Shape the policy was built for.
        policy: Vec<i64>,
        /// Shape reported by the environment.
        env: Vec<i64>,
    },

    /// The policy does not declare the capability required by the caller.
    #[error("Unsupported policy: {0}")]
    UnsupportedPolicy(String),

    /// Environment slot identifiers in one receive were not a contiguous range.
    #[error("Environment ids are not contiguous: {0:?}")]
    NonContiguousEnvIds(Vec<usize>),

    /// A collective reduction could not be completed.
    #[error("Collective reduction failed: {0}")]
    Reduction(String),
}
