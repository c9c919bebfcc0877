//! Error types for the resource pool

use thiserror::Error;

/// Failures surfaced by pool operations.
///
/// Expected negative outcomes (a rejected `add`, a `remove` of an unknown
/// resource, a timed out acquire) are ordinary return values, not errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("Pool is not open")]
    PoolClosed,

    #[error("Pool is closing - wait for close() to finish before reopening")]
    Closing,

    #[error("Wait was cancelled")]
    Cancelled,
}

pub type PoolResult<T> = Result<T, PoolError>;
